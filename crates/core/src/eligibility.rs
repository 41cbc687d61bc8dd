//! Event eligibility
//!
//! Aggregates every rule on an event into a single verdict plus the discount
//! the event grants the cart. Rules are never short-circuited: each one's
//! outcome is reported so callers can show why an event did or did not apply.

use std::time::{Duration, Instant};

use crate::{
    discounts::{Discount, calculate_discount},
    events::{EventRule, PromotionalEvent, RuleDiscount, RuleKind},
    ids::RuleUuid,
    rules::{EvaluationContext, evaluate_rule},
};

/// A single rule's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleReport {
    /// Rule UUID
    pub rule_uuid: RuleUuid,
    /// Rule kind.
    pub kind: RuleKind,
    /// Rule priority.
    pub priority: i32,
    /// Why it passed or failed.
    pub message: String,
}

impl RuleReport {
    fn new(rule: &EventRule, message: String) -> Self {
        Self {
            rule_uuid: rule.uuid,
            kind: rule.kind,
            priority: rule.priority,
            message,
        }
    }
}

/// Aggregated verdict for an event against a cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEvaluationResult {
    /// All rules passed.
    pub is_eligible: bool,
    /// Rules that passed, in evaluation order.
    pub applied_rules: Vec<RuleReport>,
    /// Rules that failed, in evaluation order.
    pub failed_rules: Vec<RuleReport>,
    /// Discount before caps.
    pub calculated_discount: Discount,
    /// Discount after the rule cap and then the event cap.
    pub final_discount: Discount,
    /// Override supplied by the winning rule, when the cart is eligible.
    pub discount_rule: Option<RuleDiscount>,
    /// Event-level reason the cart was rejected, if any.
    pub message: Option<String>,
    /// Internal failure that forced an ineligible verdict.
    pub error: Option<String>,
    /// Wall time spent evaluating.
    pub elapsed: Duration,
}

impl RuleEvaluationResult {
    /// Safe fallback: ineligible, no discount, carrying `error`.
    #[must_use]
    pub fn failed(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            is_eligible: false,
            applied_rules: Vec::new(),
            failed_rules: Vec::new(),
            calculated_discount: Discount::NONE,
            final_discount: Discount::NONE,
            discount_rule: None,
            message: None,
            error: Some(error.into()),
            elapsed,
        }
    }
}

/// Evaluate every rule of `event` against `ctx`.
///
/// The discount is computed against the cart total. With no rules the event's
/// own kind and value apply; otherwise the first passing rule (ascending
/// priority) that carries a discount override supplies it, capped by its own
/// cap and then by the event's cap.
pub fn evaluate_all(event: &PromotionalEvent, ctx: &EvaluationContext) -> RuleEvaluationResult {
    let started = Instant::now();

    let mut result = RuleEvaluationResult {
        is_eligible: false,
        applied_rules: Vec::new(),
        failed_rules: Vec::new(),
        calculated_discount: Discount::NONE,
        final_discount: Discount::NONE,
        discount_rule: None,
        message: None,
        error: None,
        elapsed: Duration::ZERO,
    };

    let mut discount_rule: Option<&EventRule> = None;

    for rule in event.ordered_rules() {
        let outcome = evaluate_rule(rule, ctx);

        if outcome.valid {
            if discount_rule.is_none() && rule.discount.is_some() {
                discount_rule = Some(rule);
            }

            result.applied_rules.push(RuleReport::new(rule, outcome.message));
        } else {
            result.failed_rules.push(RuleReport::new(rule, outcome.message));
        }
    }

    if let Some(min) = event.min_order_value
        && ctx.cart_total < min
    {
        result.message = Some(format!(
            "cart total {} is below the event minimum order value {min}",
            ctx.cart_total
        ));
        result.elapsed = started.elapsed();

        return result;
    }

    if !result.failed_rules.is_empty() {
        result.elapsed = started.elapsed();

        return result;
    }

    let computed = match discount_rule.and_then(|rule| rule.discount.as_ref()) {
        Some(rule_discount) => calculate_discount(
            rule_discount.kind,
            rule_discount.value,
            ctx.cart_total,
            None,
        )
        .map(|calculated| (calculated, calculated.capped(rule_discount.max_discount))),
        None => calculate_discount(event.kind, event.discount_value, ctx.cart_total, None)
            .map(|calculated| (calculated, calculated)),
    };

    match computed {
        Ok((calculated, capped)) => {
            result.is_eligible = true;
            result.calculated_discount = calculated;
            result.final_discount = capped.capped(event.max_discount);
            result.discount_rule = discount_rule.and_then(|rule| rule.discount.clone());
            result.elapsed = started.elapsed();

            result
        }
        Err(err) => RuleEvaluationResult::failed(err.to_string(), started.elapsed()),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::{
        events::{
            PromotionKind, RuleDiscount,
            test_support::{event, rule},
        },
        ids::{CategoryUuid, ProductUuid, UserUuid},
        rules::{Address, CartLine, Customer},
    };

    use super::*;

    fn cart(category: CategoryUuid, total: u64) -> EvaluationContext {
        EvaluationContext::from_lines(vec![CartLine {
            product_uuid: ProductUuid::new(),
            category_uuid: Some(category),
            sub_category_uuid: None,
            sub_sub_category_uuid: None,
            quantity: 1,
            unit_price: total,
        }])
        .with_customer(Customer {
            uuid: UserUuid::new(),
            addresses: vec![Address {
                city: "York".to_string(),
            }],
        })
    }

    #[test]
    fn no_rules_uses_event_discount_with_cap() {
        let mut e = event(PromotionKind::Percentage, 20);
        e.max_discount = Some(150);

        let result = evaluate_all(&e, &cart(CategoryUuid::new(), 1_000));

        assert!(result.is_eligible, "rule-less events are eligible");
        assert_eq!(result.calculated_discount.amount, 200, "20% of 1000");
        assert_eq!(result.final_discount.amount, 150, "event cap applies");
    }

    #[test]
    fn failing_rule_does_not_hide_passing_ones() {
        let category = CategoryUuid::new();
        let mut e = event(PromotionKind::Percentage, 20);
        e.rules = vec![
            rule(RuleKind::Geography, "Leeds", 1),
            rule(RuleKind::Category, &category.to_string(), 2),
        ];

        let result = evaluate_all(&e, &cart(category, 1_000));

        assert!(!result.is_eligible, "geography rule fails");
        assert_eq!(result.final_discount, Discount::NONE, "no discount when ineligible");

        let failed: Vec<RuleKind> = result.failed_rules.iter().map(|r| r.kind).collect();
        let applied: Vec<RuleKind> = result.applied_rules.iter().map(|r| r.kind).collect();

        assert_eq!(failed, vec![RuleKind::Geography], "failed rules");
        assert_eq!(applied, vec![RuleKind::Category], "applied rules");
        assert_eq!(
            result.failed_rules.first().map(|r| r.message.as_str()),
            Some("city 'York' is not allowed"),
            "failure should be descriptive"
        );
    }

    #[test]
    fn first_passing_override_wins_and_is_capped_twice() {
        let mut e = event(PromotionKind::Percentage, 10);
        e.max_discount = Some(250);

        let mut low = rule(RuleKind::All, "", 5);
        low.discount = Some(RuleDiscount {
            kind: PromotionKind::FixedAmount,
            value: Decimal::from(50),
            max_discount: None,
        });

        let mut high = rule(RuleKind::All, "", 1);
        high.discount = Some(RuleDiscount {
            kind: PromotionKind::Percentage,
            value: Decimal::from(40),
            max_discount: Some(300),
        });

        e.rules = vec![low, high];

        let result = evaluate_all(&e, &cart(CategoryUuid::new(), 1_000));

        assert!(result.is_eligible, "all rules pass");
        assert_eq!(result.calculated_discount.amount, 400, "40% of 1000");
        assert_eq!(result.final_discount.amount, 250, "rule cap then event cap");
        assert_eq!(
            result.discount_rule.map(|discount| discount.value),
            Some(Decimal::from(40)),
            "winning override is reported"
        );
    }

    #[test]
    fn passing_rules_without_override_fall_back_to_event() {
        let mut e = event(PromotionKind::FixedAmount, 75);
        e.rules = vec![rule(RuleKind::All, "", 0)];

        let result = evaluate_all(&e, &cart(CategoryUuid::new(), 1_000));

        assert!(result.is_eligible, "all rules pass");
        assert_eq!(result.final_discount.amount, 75, "event-level discount");
        assert_eq!(result.discount_rule, None, "no override");
    }

    #[test]
    fn event_minimum_order_value_rejects_small_carts() {
        let mut e = event(PromotionKind::Percentage, 10);
        e.min_order_value = Some(5_000);
        e.rules = vec![rule(RuleKind::All, "", 0)];

        let result = evaluate_all(&e, &cart(CategoryUuid::new(), 1_000));

        assert!(!result.is_eligible, "below event minimum");
        assert_eq!(result.applied_rules.len(), 1, "rules are still reported");
        assert!(result.message.is_some(), "reason should be given");
    }

    #[test]
    fn negative_values_degrade_to_error_result() {
        let e = event(PromotionKind::Percentage, -10);

        let result = evaluate_all(&e, &cart(CategoryUuid::new(), 1_000));

        assert!(!result.is_eligible, "error results are ineligible");
        assert!(result.error.is_some(), "error should be carried");
    }
}
