//! Rule Evaluator
//!
//! Pure evaluation of a single [`EventRule`] against a proposed cart. Every
//! rule kind is dispatched through [`evaluate_rule`]; malformed targets come
//! back as invalid outcomes with a message instead of an error.

use thiserror::Error;
use uuid::Uuid;

use crate::{
    events::{EventRule, RuleKind},
    ids::{CategoryUuid, ProductUuid, UserUuid},
};

/// Problems with a rule's serialized target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// Target list was empty.
    #[error("{0} rule has no targets")]
    Empty(RuleKind),

    /// An id in the target list could not be parsed.
    #[error("invalid id '{0}' in rule target")]
    InvalidId(String),

    /// Price range was not `min-max` with `min <= max`.
    #[error("invalid price range '{0}', expected 'min-max'")]
    InvalidRange(String),
}

/// A cart line with its product's resolved category hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    /// Product on the line.
    pub product_uuid: ProductUuid,
    /// Top-level category.
    pub category_uuid: Option<CategoryUuid>,
    /// Second-level category.
    pub sub_category_uuid: Option<CategoryUuid>,
    /// Third-level category.
    pub sub_sub_category_uuid: Option<CategoryUuid>,
    /// Units on the line.
    pub quantity: u64,
    /// Pre-discount unit price.
    pub unit_price: u64,
}

impl CartLine {
    /// Pre-discount line total, saturating.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.unit_price.saturating_mul(self.quantity)
    }
}

/// Shipping address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// City name as entered.
    pub city: String,
}

/// The requesting user, as far as rules care.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    /// User UUID
    pub uuid: UserUuid,
    /// Addresses, primary first.
    pub addresses: Vec<Address>,
}

/// Everything rules may inspect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationContext {
    /// Cart lines.
    pub lines: Vec<CartLine>,
    /// Requesting user, if known.
    pub customer: Option<Customer>,
    /// Payment method; `None` until checkout.
    pub payment_method: Option<String>,
    /// Pre-discount cart total.
    pub cart_total: u64,
}

impl EvaluationContext {
    /// Build a context whose total is the sum of its lines.
    #[must_use]
    pub fn from_lines(lines: Vec<CartLine>) -> Self {
        let cart_total = lines
            .iter()
            .fold(0_u64, |acc, line| acc.saturating_add(line.total()));

        Self {
            lines,
            cart_total,
            ..Self::default()
        }
    }

    /// Attach the requesting user.
    #[must_use]
    pub fn with_customer(mut self, customer: Customer) -> Self {
        self.customer = Some(customer);
        self
    }

    /// Attach the payment method.
    #[must_use]
    pub fn with_payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = Some(method.into());
        self
    }
}

/// Result of one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    /// Whether the rule passed.
    pub valid: bool,
    /// Human-readable explanation.
    pub message: String,
}

impl RuleOutcome {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// Evaluate one rule against the cart.
pub fn evaluate_rule(rule: &EventRule, ctx: &EvaluationContext) -> RuleOutcome {
    if let Some(min) = rule.min_order_value
        && ctx.cart_total < min
    {
        return RuleOutcome::fail(format!(
            "cart total {} is below the minimum order value {min}",
            ctx.cart_total
        ));
    }

    match evaluate_kind(rule, ctx) {
        Ok(outcome) => outcome,
        Err(err) => RuleOutcome::fail(err.to_string()),
    }
}

fn evaluate_kind(rule: &EventRule, ctx: &EvaluationContext) -> Result<RuleOutcome, TargetError> {
    let outcome = match rule.kind {
        RuleKind::Category => {
            id_list_matches(rule, ctx, |line| line.category_uuid.map(Uuid::from))?
        }
        RuleKind::SubCategory => {
            id_list_matches(rule, ctx, |line| line.sub_category_uuid.map(Uuid::from))?
        }
        RuleKind::SubSubCategory => id_list_matches(rule, ctx, |line| {
            line.sub_sub_category_uuid.map(Uuid::from)
        })?,
        RuleKind::Product => {
            id_list_matches(rule, ctx, |line| Some(Uuid::from(line.product_uuid)))?
        }
        RuleKind::PriceRange => {
            let (min, max) = parse_range(&rule.target)?;

            if (min..=max).contains(&ctx.cart_total) {
                RuleOutcome::pass(format!("cart total {} is within {min}-{max}", ctx.cart_total))
            } else {
                RuleOutcome::fail(format!(
                    "cart total {} is outside {min}-{max}",
                    ctx.cart_total
                ))
            }
        }
        RuleKind::Geography => {
            let cities = parse_names(rule)?;

            match ctx
                .customer
                .as_ref()
                .and_then(|customer| customer.addresses.first())
            {
                None => RuleOutcome::fail("customer has no address"),
                Some(address) => {
                    let city = address.city.trim().to_lowercase();

                    if cities.iter().any(|allowed| *allowed == city) {
                        RuleOutcome::pass(format!("city '{}' is allowed", address.city))
                    } else {
                        RuleOutcome::fail(format!("city '{}' is not allowed", address.city))
                    }
                }
            }
        }
        RuleKind::PaymentMethod => {
            let methods = parse_names(rule)?;

            match ctx.payment_method.as_deref() {
                None => RuleOutcome::pass("payment method not chosen yet; checked at checkout"),
                Some(method) => {
                    if methods.iter().any(|allowed| *allowed == method.trim().to_lowercase()) {
                        RuleOutcome::pass(format!("payment method '{method}' is allowed"))
                    } else {
                        RuleOutcome::fail(format!("payment method '{method}' is not allowed"))
                    }
                }
            }
        }
        RuleKind::All => RuleOutcome::pass("no restriction"),
    };

    Ok(outcome)
}

fn id_list_matches(
    rule: &EventRule,
    ctx: &EvaluationContext,
    attribute: impl Fn(&CartLine) -> Option<Uuid>,
) -> Result<RuleOutcome, TargetError> {
    let targets = parse_ids(rule)?;

    let matched = ctx
        .lines
        .iter()
        .filter_map(&attribute)
        .any(|id| targets.contains(&id));

    Ok(if matched {
        RuleOutcome::pass(format!("cart contains a matching {}", rule.kind))
    } else {
        RuleOutcome::fail(format!("cart contains no matching {}", rule.kind))
    })
}

fn split_targets(target: &str) -> impl Iterator<Item = &str> {
    target.split(',').map(str::trim).filter(|part| !part.is_empty())
}

fn parse_ids(rule: &EventRule) -> Result<Vec<Uuid>, TargetError> {
    let ids = split_targets(&rule.target)
        .map(|part| Uuid::parse_str(part).map_err(|_err| TargetError::InvalidId(part.to_string())))
        .collect::<Result<Vec<_>, _>>()?;

    if ids.is_empty() {
        return Err(TargetError::Empty(rule.kind));
    }

    Ok(ids)
}

fn parse_names(rule: &EventRule) -> Result<Vec<String>, TargetError> {
    let names: Vec<String> = split_targets(&rule.target)
        .map(str::to_lowercase)
        .collect();

    if names.is_empty() {
        return Err(TargetError::Empty(rule.kind));
    }

    Ok(names)
}

fn parse_range(target: &str) -> Result<(u64, u64), TargetError> {
    let invalid = || TargetError::InvalidRange(target.to_string());

    let (min, max) = target.split_once('-').ok_or_else(invalid)?;
    let min: u64 = min.trim().parse().map_err(|_err| invalid())?;
    let max: u64 = max.trim().parse().map_err(|_err| invalid())?;

    if min > max {
        return Err(invalid());
    }

    Ok((min, max))
}
