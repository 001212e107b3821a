use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two order services run as separate partitions with independent id
/// sequences. A bare numeric id is meaningless without its partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Agricultural,
    Necessities,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Agricultural => write!(f, "agricultural"),
            Partition::Necessities => write!(f, "necessities"),
        }
    }
}

/// Fully-qualified order identity: partition + sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderRef {
    pub partition: Partition,
    pub id: u64,
}

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Unclaimed,
    Accepted,
    PickedUp,
    InTransit,
    Completed,
    Overdue,
    Expired,
    Cancelled,
}

impl OrderStatus {
    /// An active order is claimed and still owed to the buyer. Overdue
    /// counts: the driver must still deliver it.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            OrderStatus::Accepted
                | OrderStatus::PickedUp
                | OrderStatus::InTransit
                | OrderStatus::Overdue
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Expired | OrderStatus::Cancelled
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::Unclaimed => "unclaimed",
            OrderStatus::Accepted => "accepted",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::InTransit => "in_transit",
            OrderStatus::Completed => "completed",
            OrderStatus::Overdue => "overdue",
            OrderStatus::Expired => "expired",
            OrderStatus::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: u64,
    pub name: String,
    pub unit_price: f64,
    pub quantity: u32,
    /// Where the driver collects this item (stall, farm gate, store shelf).
    pub pickup_location: String,
}

impl LineItem {
    pub fn subtotal(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

/// One prior assignment, recorded when a transfer hands the order to a
/// different driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    pub driver_id: u64,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub partition: Partition,
    pub buyer_id: u64,
    /// None for aggregated necessities orders filled from multiple stores.
    pub seller_id: Option<u64>,
    pub items: Vec<LineItem>,
    pub destination: String,
    pub is_urgent: bool,
    pub note: String,
    pub status: OrderStatus,
    pub driver_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// The buyer account that cancelled, when the order was cancelled.
    pub cancelled_by: Option<u64>,
    pub handoffs: Vec<Handoff>,
}

impl Order {
    pub fn order_ref(&self) -> OrderRef {
        OrderRef {
            partition: self.partition,
            id: self.id,
        }
    }

    /// Line items are immutable after creation, so the total is always
    /// derived rather than stored.
    pub fn total_price(&self) -> f64 {
        self.items.iter().map(LineItem::subtotal).sum()
    }

    // Transition appliers. Guards live in the engine; these only keep the
    // status/timestamp/driver invariants in one place.

    pub fn apply_claim(&mut self, driver_id: u64, now: DateTime<Utc>) {
        self.status = OrderStatus::Accepted;
        self.driver_id = Some(driver_id);
        self.accepted_at = Some(now);
    }

    pub fn apply_pickup(&mut self, now: DateTime<Utc>) {
        self.status = OrderStatus::PickedUp;
        self.picked_up_at = Some(now);
    }

    pub fn apply_transit(&mut self) {
        self.status = OrderStatus::InTransit;
    }

    pub fn apply_complete(&mut self, now: DateTime<Utc>) {
        self.status = OrderStatus::Completed;
        self.completed_at = Some(now);
    }

    pub fn apply_cancel(&mut self, buyer_id: u64) {
        self.status = OrderStatus::Cancelled;
        self.driver_id = None;
        self.cancelled_by = Some(buyer_id);
    }

    pub fn apply_expired(&mut self) {
        self.status = OrderStatus::Expired;
    }

    pub fn apply_overdue(&mut self) {
        self.status = OrderStatus::Overdue;
    }

    pub fn apply_handoff(&mut self, to_driver: u64, now: DateTime<Utc>, reason: Option<String>) {
        if let Some(prior) = self.driver_id {
            self.handoffs.push(Handoff {
                driver_id: prior,
                at: now,
                reason,
            });
        }
        self.driver_id = Some(to_driver);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{LineItem, Order, OrderStatus, Partition};

    fn order_with_items(items: Vec<LineItem>) -> Order {
        Order {
            id: 1,
            partition: Partition::Necessities,
            buyer_id: 10,
            seller_id: Some(20),
            items,
            destination: "riverside village hall".to_string(),
            is_urgent: false,
            note: String::new(),
            status: OrderStatus::Unclaimed,
            driver_id: None,
            created_at: Utc::now(),
            accepted_at: None,
            picked_up_at: None,
            completed_at: None,
            cancelled_by: None,
            handoffs: Vec::new(),
        }
    }

    #[test]
    fn total_price_is_sum_of_subtotals() {
        let order = order_with_items(vec![
            LineItem {
                product_id: 1,
                name: "rice 5kg".to_string(),
                unit_price: 250.0,
                quantity: 2,
                pickup_location: "store a".to_string(),
            },
            LineItem {
                product_id: 2,
                name: "eggs".to_string(),
                unit_price: 80.0,
                quantity: 3,
                pickup_location: "store b".to_string(),
            },
        ]);

        assert_eq!(order.total_price(), 740.0);
    }

    #[test]
    fn claim_sets_driver_and_accepted_timestamp_together() {
        let mut order = order_with_items(Vec::new());
        let now = Utc::now();

        order.apply_claim(7, now);

        assert_eq!(order.status, OrderStatus::Accepted);
        assert_eq!(order.driver_id, Some(7));
        assert_eq!(order.accepted_at, Some(now));
    }

    #[test]
    fn handoff_records_prior_driver() {
        let mut order = order_with_items(Vec::new());
        let now = Utc::now();
        order.apply_claim(7, now);

        order.apply_handoff(9, now, Some("shift ended".to_string()));

        assert_eq!(order.driver_id, Some(9));
        assert_eq!(order.handoffs.len(), 1);
        assert_eq!(order.handoffs[0].driver_id, 7);
    }
}
