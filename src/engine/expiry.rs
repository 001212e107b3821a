use chrono::{DateTime, Duration, Utc};

use crate::models::order::{Order, OrderStatus};

/// Time budgets for the two derived failure states. Pure data; "now" is
/// always passed in, never read here.
#[derive(Debug, Clone, Copy)]
pub struct ExpiryPolicy {
    /// How long an unclaimed order stays visible to drivers.
    pub unclaimed_ttl: Duration,
    /// How long a driver has from claim to delivery.
    pub overdue_ttl: Duration,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            unclaimed_ttl: Duration::hours(2),
            overdue_ttl: Duration::hours(2),
        }
    }
}

impl ExpiryPolicy {
    /// An unclaimed order past its claim window. Idempotent under
    /// repeated evaluation: depends only on `now` and `created_at`.
    pub fn is_expired(&self, order: &Order, now: DateTime<Utc>) -> bool {
        order.status == OrderStatus::Unclaimed && now - order.created_at >= self.unclaimed_ttl
    }

    /// A claimed order whose delivery budget ran out. Evaluated from the
    /// stored status; a materialized `Overdue` is past this predicate.
    pub fn is_overdue(&self, order: &Order, now: DateTime<Utc>) -> bool {
        let running = matches!(
            order.status,
            OrderStatus::Accepted | OrderStatus::PickedUp | OrderStatus::InTransit
        );
        match (running, order.accepted_at) {
            (true, Some(accepted_at)) => now - accepted_at >= self.overdue_ttl,
            _ => false,
        }
    }

    /// Whether this order counts against its driver at the eligibility
    /// gate, whether or not the sweep has materialized the status yet.
    pub fn counts_as_overdue(&self, order: &Order, now: DateTime<Utc>) -> bool {
        order.status == OrderStatus::Overdue || self.is_overdue(order, now)
    }

    /// Status as a reader should see it at `now`. The sweep materializes
    /// the same answer into the store; reads never trust a cached status
    /// to still be fresh.
    pub fn effective_status(&self, order: &Order, now: DateTime<Utc>) -> OrderStatus {
        if self.is_expired(order, now) {
            OrderStatus::Expired
        } else if self.is_overdue(order, now) {
            OrderStatus::Overdue
        } else {
            order.status
        }
    }
}
