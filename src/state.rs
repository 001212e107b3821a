use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use dashmap::DashMap;

use crate::clock::Clock;
use crate::config::Config;
use crate::engine::expiry::ExpiryPolicy;
use crate::engine::transfer::TransferBroker;
use crate::error::DispatchError;
use crate::geo::geocoder::Geocoder;
use crate::models::driver::{AvailabilityWindow, Driver};
use crate::observability::metrics::Metrics;
use crate::store::OrderStore;

/// Registered drivers, addressable by id and by phone number (transfers
/// name the receiving driver by phone).
pub struct DriverDirectory {
    drivers: DashMap<u64, Driver>,
    next_id: AtomicU64,
}

impl DriverDirectory {
    pub fn new() -> Self {
        Self {
            drivers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(
        &self,
        user_id: u64,
        name: String,
        phone: String,
        availability: Vec<AvailabilityWindow>,
    ) -> Result<Driver, DispatchError> {
        if name.trim().is_empty() {
            return Err(DispatchError::Validation("name cannot be empty".to_string()));
        }
        if phone.trim().is_empty() {
            return Err(DispatchError::Validation(
                "phone cannot be empty".to_string(),
            ));
        }
        if self.by_phone(&phone).is_some() {
            return Err(DispatchError::Conflict(format!(
                "phone {phone} is already registered"
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let driver = Driver {
            id,
            user_id,
            name,
            phone,
            availability,
        };
        self.drivers.insert(id, driver.clone());
        Ok(driver)
    }

    pub fn get(&self, id: u64) -> Result<Driver, DispatchError> {
        self.drivers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DispatchError::NotFound(format!("driver {id}")))
    }

    pub fn by_phone(&self, phone: &str) -> Option<Driver> {
        self.drivers
            .iter()
            .find(|entry| entry.value().phone == phone)
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl Default for DriverDirectory {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub drivers: DriverDirectory,
    pub transfers: TransferBroker,
    pub clock: Arc<dyn Clock>,
    pub geocoder: Arc<dyn Geocoder>,
    pub policy: ExpiryPolicy,
    pub transfer_ttl: Duration,
    pub geocode_timeout: StdDuration,
    pub max_items_per_order: u32,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn OrderStore>,
        clock: Arc<dyn Clock>,
        geocoder: Arc<dyn Geocoder>,
    ) -> Self {
        Self {
            store,
            drivers: DriverDirectory::new(),
            transfers: TransferBroker::new(),
            clock,
            geocoder,
            policy: ExpiryPolicy {
                unclaimed_ttl: Duration::hours(config.unclaimed_ttl_hours),
                overdue_ttl: Duration::hours(config.overdue_ttl_hours),
            },
            transfer_ttl: Duration::hours(config.transfer_ttl_hours),
            geocode_timeout: StdDuration::from_secs(config.geocode_timeout_secs),
            max_items_per_order: config.max_items_per_order,
            metrics: Metrics::new(),
        }
    }
}
