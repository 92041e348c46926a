use crate::orders::models::{FulfillmentStatus, LineStatus, OrderStatus};

/// Progress rank of a non-canceled line
fn rank(status: LineStatus) -> Option<u8> {
    match status {
        LineStatus::Pending => Some(0),
        LineStatus::Confirmed => Some(1),
        LineStatus::Shipping => Some(2),
        LineStatus::Delivered => Some(3),
        LineStatus::Canceled => None,
    }
}

/// Derives the order-level status from its line statuses.
///
/// Canceled lines only count when every line is canceled.
pub fn aggregate(statuses: &[LineStatus]) -> FulfillmentStatus {
    if statuses.is_empty() {
        return FulfillmentStatus::None;
    }

    let ranks: Vec<u8> = statuses.iter().filter_map(|s| rank(*s)).collect();
    if ranks.is_empty() {
        return FulfillmentStatus::Canceled;
    }

    let all = |min: u8| ranks.iter().all(|r| *r >= min);
    let any = |min: u8| ranks.iter().any(|r| *r >= min);

    if all(3) {
        FulfillmentStatus::Delivered
    } else if all(2) {
        FulfillmentStatus::Shipped
    } else if all(1) && any(2) {
        FulfillmentStatus::PartiallyShipped
    } else if all(1) {
        FulfillmentStatus::Processing
    } else if any(1) {
        FulfillmentStatus::PartiallyConfirmed
    } else {
        FulfillmentStatus::None
    }
}

fn order_rank(status: FulfillmentStatus) -> Option<u8> {
    match status {
        FulfillmentStatus::None => Some(0),
        FulfillmentStatus::PartiallyConfirmed => Some(1),
        FulfillmentStatus::Processing => Some(2),
        FulfillmentStatus::PartiallyShipped => Some(3),
        FulfillmentStatus::Shipped => Some(4),
        FulfillmentStatus::Delivered => Some(5),
        FulfillmentStatus::Canceled => None,
    }
}

/// Group-level status over the orders of one checkout.
///
/// Same shape as [`aggregate`]: canceled orders are ignored unless every
/// order is canceled, and a partial order status makes the group partial.
pub fn aggregate_orders(statuses: &[FulfillmentStatus]) -> FulfillmentStatus {
    if statuses.is_empty() {
        return FulfillmentStatus::None;
    }

    let ranks: Vec<u8> = statuses.iter().filter_map(|s| order_rank(*s)).collect();
    if ranks.is_empty() {
        return FulfillmentStatus::Canceled;
    }

    let all = |min: u8| ranks.iter().all(|r| *r >= min);
    let any = |min: u8| ranks.iter().any(|r| *r >= min);

    if all(5) {
        FulfillmentStatus::Delivered
    } else if all(4) {
        FulfillmentStatus::Shipped
    } else if all(2) && any(3) {
        FulfillmentStatus::PartiallyShipped
    } else if all(2) {
        FulfillmentStatus::Processing
    } else if any(1) {
        FulfillmentStatus::PartiallyConfirmed
    } else {
        FulfillmentStatus::None
    }
}

pub fn can_transition(from: LineStatus, to: LineStatus) -> bool {
    use LineStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Confirmed, Shipping)
            | (Shipping, Delivered)
            | (Pending, Canceled)
            | (Confirmed, Canceled)
    )
}

/// Order status implied by a terminal aggregate
pub fn terminal_order_status(status: FulfillmentStatus) -> Option<OrderStatus> {
    match status {
        FulfillmentStatus::Delivered => Some(OrderStatus::Completed),
        FulfillmentStatus::Canceled => Some(OrderStatus::Canceled),
        _ => None,
    }
}
