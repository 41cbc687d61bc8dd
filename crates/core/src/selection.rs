//! Event selection

use std::cmp::Ordering;

use jiff::Timestamp;

use crate::{events::PromotionalEvent, ids::ProductUuid};

/// Total order over candidate events for `product`; the best comes first.
///
/// Higher priority, then larger discount value, then earlier creation, then
/// UUID.
pub fn compare_candidates(
    a: &PromotionalEvent,
    b: &PromotionalEvent,
    product: ProductUuid,
) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| {
            b.discount_value_for(product)
                .cmp(&a.discount_value_for(product))
        })
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.uuid.cmp(&b.uuid))
}

/// The single best event running at `now` that applies to `product`.
pub fn select_best<'a, I>(events: I, product: ProductUuid, now: Timestamp) -> Option<&'a PromotionalEvent>
where
    I: IntoIterator<Item = &'a PromotionalEvent>,
{
    events
        .into_iter()
        .filter(|event| event.is_running(now) && event.applies_to(product))
        .min_by(|a, b| compare_candidates(a, b, product))
}
