use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::models::order::{Order, OrderRef, OrderStatus, Partition};
use crate::store::{NewOrder, OrderFilter, OrderStore, Precondition, StoreError};

struct Record {
    order: Order,
    version: u64,
}

struct PartitionMap {
    records: DashMap<u64, Record>,
    next_id: AtomicU64,
}

impl PartitionMap {
    fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

/// In-memory order store. Each partition keeps its own map and id
/// sequence; the DashMap entry lock makes `update_if` a compare-and-swap
/// against concurrent writers of the same order.
pub struct MemoryOrderStore {
    agricultural: PartitionMap,
    necessities: PartitionMap,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self {
            agricultural: PartitionMap::new(),
            necessities: PartitionMap::new(),
        }
    }

    fn partition(&self, partition: Partition) -> &PartitionMap {
        match partition {
            Partition::Agricultural => &self.agricultural,
            Partition::Necessities => &self.necessities,
        }
    }
}

impl Default for MemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderStore for MemoryOrderStore {
    fn create(&self, new: NewOrder) -> Order {
        let map = self.partition(new.partition);
        let id = map.next_id.fetch_add(1, Ordering::Relaxed);

        let order = Order {
            id,
            partition: new.partition,
            buyer_id: new.buyer_id,
            seller_id: new.seller_id,
            items: new.items,
            destination: new.destination,
            is_urgent: new.is_urgent,
            note: new.note,
            status: OrderStatus::Unclaimed,
            driver_id: None,
            created_at: new.created_at,
            accepted_at: None,
            picked_up_at: None,
            completed_at: None,
            cancelled_by: None,
            handoffs: Vec::new(),
        };

        map.records.insert(
            id,
            Record {
                order: order.clone(),
                version: 1,
            },
        );
        order
    }

    fn get(&self, id: OrderRef) -> Result<Order, StoreError> {
        self.partition(id.partition)
            .records
            .get(&id.id)
            .map(|record| record.order.clone())
            .ok_or(StoreError::NotFound(id))
    }

    fn update_if(
        &self,
        id: OrderRef,
        pre: Precondition<'_>,
        mutate: &mut dyn FnMut(&mut Order),
    ) -> Result<Order, StoreError> {
        let mut record = self
            .partition(id.partition)
            .records
            .get_mut(&id.id)
            .ok_or(StoreError::NotFound(id))?;

        if !pre.holds(&record.order) {
            return Err(StoreError::PreconditionFailed {
                order: id,
                current: record.order.status,
                driver: record.order.driver_id,
            });
        }

        mutate(&mut record.order);
        record.version += 1;
        Ok(record.order.clone())
    }

    fn list(&self, filter: &OrderFilter) -> Vec<Order> {
        let mut out = Vec::new();
        for map in [&self.agricultural, &self.necessities] {
            for record in map.records.iter() {
                if filter.matches(&record.order) {
                    out.push(record.order.clone());
                }
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }
}
