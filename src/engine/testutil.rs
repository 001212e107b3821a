//! Shared fixtures for engine tests: a pinned clock, a canned geocoder
//! and a ready-made grocery order.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use crate::clock::ManualClock;
use crate::engine::expiry::ExpiryPolicy;
use crate::engine::lifecycle::{self, CreateOrder};
use crate::engine::transfer::TransferBroker;
use crate::geo::geocoder::{GeocodeError, Geocoder};
use crate::geo::GeoPoint;
use crate::models::driver::Driver;
use crate::models::order::{LineItem, Order, Partition};
use crate::observability::metrics::Metrics;
use crate::state::{AppState, DriverDirectory};
use crate::store::memory::MemoryOrderStore;

/// Geocoder with canned answers. `reverse` answers every reverse lookup,
/// `forward` every address lookup; `fail` makes both calls error.
pub struct StubGeocoder {
    pub reverse: Option<String>,
    pub forward: Option<GeoPoint>,
    pub fail: bool,
}

impl StubGeocoder {
    /// Finds nothing, but answers.
    pub fn blind() -> Self {
        Self {
            reverse: None,
            forward: None,
            fail: false,
        }
    }

    /// Every call errors.
    pub fn unavailable() -> Self {
        Self {
            reverse: None,
            forward: None,
            fail: true,
        }
    }

    pub fn reverse_to(address: &str) -> Self {
        Self {
            reverse: Some(address.to_string()),
            forward: None,
            fail: false,
        }
    }

    pub fn forward_to(point: GeoPoint) -> Self {
        Self {
            reverse: None,
            forward: Some(point),
            fail: false,
        }
    }
}

#[async_trait]
impl Geocoder for StubGeocoder {
    async fn geocode(&self, _address: &str) -> Result<Option<GeoPoint>, GeocodeError> {
        if self.fail {
            return Err(GeocodeError::Malformed("stub outage".to_string()));
        }
        Ok(self.forward)
    }

    async fn reverse_geocode(&self, _point: GeoPoint) -> Result<Option<String>, GeocodeError> {
        if self.fail {
            return Err(GeocodeError::Malformed("stub outage".to_string()));
        }
        Ok(self.reverse.clone())
    }
}

pub fn state_with(geocoder: StubGeocoder) -> (Arc<AppState>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
    ));
    let state = AppState {
        store: Arc::new(MemoryOrderStore::new()),
        drivers: DriverDirectory::new(),
        transfers: TransferBroker::new(),
        clock: clock.clone(),
        geocoder: Arc::new(geocoder),
        policy: ExpiryPolicy::default(),
        transfer_ttl: Duration::hours(24),
        geocode_timeout: StdDuration::from_secs(1),
        max_items_per_order: 30,
        metrics: Metrics::new(),
    };
    (Arc::new(state), clock)
}

pub fn state() -> (Arc<AppState>, Arc<ManualClock>) {
    state_with(StubGeocoder::blind())
}

pub fn driver(state: &AppState, user_id: u64, name: &str, phone: &str) -> Driver {
    state
        .drivers
        .register(user_id, name.to_string(), phone.to_string(), Vec::new())
        .expect("driver registers")
}

/// A small necessities order from buyer `buyer_id`, sold by user 500,
/// bound for "Riverside Village Hall".
pub fn groceries(state: &AppState, buyer_id: u64) -> Order {
    lifecycle::create_order(
        state,
        CreateOrder {
            partition: Partition::Necessities,
            buyer_id,
            seller_id: Some(500),
            items: vec![LineItem {
                product_id: 1,
                name: "rice 5kg".to_string(),
                unit_price: 250.0,
                quantity: 1,
                pickup_location: "store a".to_string(),
            }],
            destination: "Riverside Village Hall, Main Street".to_string(),
            is_urgent: false,
            note: String::new(),
        },
    )
    .expect("order creates")
}
