pub mod memory;

pub use memory::MemoryOrderStore;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::order::{LineItem, Order, OrderRef, OrderStatus, Partition};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order {0} not found")]
    NotFound(OrderRef),

    /// The conditional update found the order in a state the caller did
    /// not expect. Carries what was actually there so the engine can
    /// decide between "lost the race" and "never legal".
    #[error("order {order} is {current}")]
    PreconditionFailed {
        order: OrderRef,
        current: OrderStatus,
        driver: Option<u64>,
    },
}

/// Compare part of the store's compare-and-swap: the update commits only
/// if the order's status is one of `statuses` and, when given, its
/// assigned driver equals `driver`.
#[derive(Debug, Clone, Copy)]
pub struct Precondition<'a> {
    pub statuses: &'a [OrderStatus],
    pub driver: Option<u64>,
}

impl<'a> Precondition<'a> {
    pub fn status(statuses: &'a [OrderStatus]) -> Self {
        Self {
            statuses,
            driver: None,
        }
    }

    pub fn status_and_driver(statuses: &'a [OrderStatus], driver: u64) -> Self {
        Self {
            statuses,
            driver: Some(driver),
        }
    }

    pub(crate) fn holds(&self, order: &Order) -> bool {
        self.statuses.contains(&order.status)
            && self.driver.is_none_or(|d| order.driver_id == Some(d))
    }
}

/// Everything the buyer checkout provides; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub partition: Partition,
    pub buyer_id: u64,
    pub seller_id: Option<u64>,
    pub items: Vec<LineItem>,
    pub destination: String,
    pub is_urgent: bool,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct OrderFilter {
    pub partition: Option<Partition>,
    pub status: Option<OrderStatus>,
    pub buyer_id: Option<u64>,
    pub seller_id: Option<u64>,
    pub driver_id: Option<u64>,
}

impl OrderFilter {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn buyer(buyer_id: u64) -> Self {
        Self {
            buyer_id: Some(buyer_id),
            ..Self::default()
        }
    }

    pub fn seller(seller_id: u64) -> Self {
        Self {
            seller_id: Some(seller_id),
            ..Self::default()
        }
    }

    pub fn driver(driver_id: u64) -> Self {
        Self {
            driver_id: Some(driver_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, order: &Order) -> bool {
        if self.partition.is_some_and(|p| p != order.partition) {
            return false;
        }
        if self.status.is_some_and(|s| s != order.status) {
            return false;
        }
        if self.buyer_id.is_some_and(|id| id != order.buyer_id) {
            return false;
        }
        if self.seller_id.is_some_and(|id| Some(id) != order.seller_id) {
            return false;
        }
        if self.driver_id.is_some_and(|id| Some(id) != order.driver_id) {
            return false;
        }
        true
    }
}

/// Persistence boundary the engine mutates orders through. `update_if` is
/// the exclusivity primitive: precondition check and mutation happen
/// atomically with respect to every other caller of the same order.
pub trait OrderStore: Send + Sync {
    fn create(&self, new: NewOrder) -> Order;

    fn get(&self, id: OrderRef) -> Result<Order, StoreError>;

    fn update_if(
        &self,
        id: OrderRef,
        pre: Precondition<'_>,
        mutate: &mut dyn FnMut(&mut Order),
    ) -> Result<Order, StoreError>;

    fn list(&self, filter: &OrderFilter) -> Vec<Order>;
}
