//! Test Helpers

use jiff::SignedDuration;
use rust_decimal::Decimal;
use storefront::{clock::Clock, events::PromotionKind, ids::EventUuid};

use crate::{domain::events::data::NewEvent, test::TestContext};

/// An event for every product that started an hour ago and runs for a day.
///
/// Allows 1000 uses overall and 5 per user.
pub(crate) fn new_event(ctx: &TestContext, kind: PromotionKind, value: i64) -> NewEvent {
    let now = ctx.clock.now();

    NewEvent {
        uuid: EventUuid::new(),
        name: format!("{} {value}", kind.as_str()),
        starts_at: now
            .checked_sub(SignedDuration::from_hours(1))
            .expect("start in range"),
        ends_at: now
            .checked_add(SignedDuration::from_hours(24))
            .expect("end in range"),
        priority: 0,
        kind,
        discount_value: Decimal::from(value),
        max_discount: None,
        min_order_value: None,
        max_usage_count: 1_000,
        max_usage_per_user: 5,
        products: Vec::new(),
        rules: Vec::new(),
    }
}
