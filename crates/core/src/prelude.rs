//! Storefront prelude.
//!
//! Convenience exports for common library consumers.

pub use crate::{
    clock::{Clock, ManualClock, SystemClock},
    discounts::{Discount, DiscountError, calculate_discount},
    eligibility::{RuleEvaluationResult, RuleReport, evaluate_all},
    events::{
        EventError, EventProduct, EventRule, EventStatus, ParseKindError, PromotionKind,
        PromotionalEvent, RuleDiscount, RuleKind,
    },
    ids::{
        CartItemUuid, CategoryUuid, EventUuid, OrderItemUuid, OrderUuid, ProductUuid,
        ReservationToken, RuleUuid, TypedUuid, UsageUuid, UserUuid,
    },
    pricing::{
        CartPrice, PriceInfo, ProductPricing, resolve_cart_price, resolve_price, split_quantity,
    },
    rules::{Address, CartLine, Customer, EvaluationContext, RuleOutcome, evaluate_rule},
    selection::select_best,
    stock::{StockError, StockLevel},
};
