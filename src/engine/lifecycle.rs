use serde::Serialize;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::DispatchError;
use crate::geo::{self, GeoPoint};
use crate::models::order::{LineItem, Order, OrderRef, OrderStatus, Partition};
use crate::state::AppState;
use crate::store::{NewOrder, OrderFilter, Precondition, StoreError};

/// Buyer checkout payload, validated here before it reaches the store.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub partition: Partition,
    pub buyer_id: u64,
    pub seller_id: Option<u64>,
    pub items: Vec<LineItem>,
    pub destination: String,
    pub is_urgent: bool,
    pub note: String,
}

/// An assigned order as the driver sees it: overdue is flagged but the
/// order stays actionable.
#[derive(Debug, Serialize)]
pub struct AssignedOrder {
    #[serde(flatten)]
    pub order: Order,
    pub overdue: bool,
}

fn order_not_found(id: OrderRef) -> DispatchError {
    DispatchError::NotFound(format!("order {id}"))
}

fn fetch(state: &AppState, id: OrderRef) -> Result<Order, DispatchError> {
    state.store.get(id).map_err(|_| order_not_found(id))
}

fn guard_assigned(order: &Order, driver_id: u64, event: &'static str) -> Result<(), DispatchError> {
    match order.driver_id {
        Some(d) if d == driver_id => Ok(()),
        Some(_) => Err(DispatchError::Forbidden(format!(
            "driver {driver_id} is not assigned to order {}",
            order.order_ref()
        ))),
        None => Err(DispatchError::InvalidTransition {
            event,
            state: order.status.to_string(),
        }),
    }
}

/// Map a failed CAS after guards already passed: somebody else moved the
/// order between our read and our write, which is a retryable conflict.
fn lost_race(err: StoreError, id: OrderRef) -> DispatchError {
    match err {
        StoreError::NotFound(_) => order_not_found(id),
        StoreError::PreconditionFailed { .. } => DispatchError::Conflict(format!(
            "order {id} was modified concurrently; fetch fresh state and retry"
        )),
    }
}

fn record(state: &AppState, event: &str, outcome: &str) {
    state
        .metrics
        .transitions_total
        .with_label_values(&[event, outcome])
        .inc();
}

pub fn create_order(state: &AppState, req: CreateOrder) -> Result<Order, DispatchError> {
    if req.items.is_empty() {
        return Err(DispatchError::Validation(
            "order must contain at least one item".to_string(),
        ));
    }
    if req.items.iter().any(|item| item.quantity == 0) {
        return Err(DispatchError::Validation(
            "item quantities must be positive".to_string(),
        ));
    }
    if req
        .items
        .iter()
        .any(|item| !item.unit_price.is_finite() || item.unit_price < 0.0)
    {
        return Err(DispatchError::Validation(
            "item prices must be finite and non-negative".to_string(),
        ));
    }
    let total_quantity: u32 = req.items.iter().map(|item| item.quantity).sum();
    if total_quantity > state.max_items_per_order {
        return Err(DispatchError::Validation(format!(
            "at most {} items per order, got {total_quantity}",
            state.max_items_per_order
        )));
    }
    if req.destination.trim().is_empty() {
        return Err(DispatchError::Validation(
            "delivery destination cannot be empty".to_string(),
        ));
    }

    let order = state.store.create(NewOrder {
        partition: req.partition,
        buyer_id: req.buyer_id,
        seller_id: req.seller_id,
        items: req.items,
        destination: req.destination,
        is_urgent: req.is_urgent,
        note: req.note,
        created_at: state.clock.now(),
    });

    info!(
        order = %order.order_ref(),
        buyer = order.buyer_id,
        total = order.total_price(),
        urgent = order.is_urgent,
        "order created"
    );
    Ok(order)
}

/// Exclusive claim. Exactly one of N concurrent claims commits; the rest
/// see `Conflict`. Guards (eligibility, self-dealing, expiry) run before
/// any mutation.
pub fn claim(state: &AppState, id: OrderRef, driver_id: u64) -> Result<Order, DispatchError> {
    let driver = state.drivers.get(driver_id)?;
    let now = state.clock.now();
    let order = fetch(state, id)?;

    if state.policy.is_expired(&order, now) {
        // Materialize what any reader would already derive, then refuse.
        let _ = state.store.update_if(
            id,
            Precondition::status(&[OrderStatus::Unclaimed]),
            &mut |o| o.apply_expired(),
        );
        record(state, "claim", "expired");
        return Err(DispatchError::InvalidTransition {
            event: "claim",
            state: OrderStatus::Expired.to_string(),
        });
    }

    if order.buyer_id == driver.user_id || order.seller_id == Some(driver.user_id) {
        record(state, "claim", "forbidden");
        return Err(DispatchError::Forbidden(
            "drivers cannot deliver their own orders".to_string(),
        ));
    }

    let overdue = overdue_orders_at(state, driver_id).len();
    if overdue > 0 {
        record(state, "claim", "blocked");
        return Err(DispatchError::Blocked { overdue });
    }

    let claimed = state
        .store
        .update_if(id, Precondition::status(&[OrderStatus::Unclaimed]), &mut |o| {
            o.apply_claim(driver_id, now)
        })
        .map_err(|err| match err {
            StoreError::NotFound(_) => order_not_found(id),
            StoreError::PreconditionFailed { current, .. } if current.is_active() => {
                DispatchError::Conflict("order already claimed by another driver".to_string())
            }
            StoreError::PreconditionFailed { current, .. } => DispatchError::InvalidTransition {
                event: "claim",
                state: current.to_string(),
            },
        });

    match &claimed {
        Ok(order) => {
            record(state, "claim", "success");
            info!(order = %order.order_ref(), driver = driver_id, "order claimed");
        }
        Err(err) => {
            record(state, "claim", err.kind());
            warn!(order = %id, driver = driver_id, error = %err, "claim refused");
        }
    }
    claimed
}

pub fn confirm_pickup(
    state: &AppState,
    id: OrderRef,
    driver_id: u64,
) -> Result<Order, DispatchError> {
    state.drivers.get(driver_id)?;
    let now = state.clock.now();
    let order = fetch(state, id)?;
    guard_assigned(&order, driver_id, "confirm pickup")?;

    match state.policy.effective_status(&order, now) {
        OrderStatus::Accepted => {}
        // Overdue does not take the order away; the driver still has to
        // pick it up and deliver.
        OrderStatus::Overdue if order.picked_up_at.is_none() => {}
        other => {
            record(state, "pickup", "invalid_transition");
            return Err(DispatchError::InvalidTransition {
                event: "confirm pickup",
                state: other.to_string(),
            });
        }
    }

    let updated = state
        .store
        .update_if(
            id,
            Precondition::status_and_driver(&[order.status], driver_id),
            &mut |o| o.apply_pickup(now),
        )
        .map_err(|err| lost_race(err, id))?;

    record(state, "pickup", "success");
    info!(order = %id, driver = driver_id, "pickup confirmed");
    Ok(updated)
}

pub fn start_transit(
    state: &AppState,
    id: OrderRef,
    driver_id: u64,
) -> Result<Order, DispatchError> {
    state.drivers.get(driver_id)?;
    let now = state.clock.now();
    let order = fetch(state, id)?;
    guard_assigned(&order, driver_id, "start transit")?;

    match state.policy.effective_status(&order, now) {
        OrderStatus::PickedUp => {}
        OrderStatus::Overdue if order.picked_up_at.is_some() => {}
        other => {
            record(state, "transit", "invalid_transition");
            return Err(DispatchError::InvalidTransition {
                event: "start transit",
                state: other.to_string(),
            });
        }
    }

    let updated = state
        .store
        .update_if(
            id,
            Precondition::status_and_driver(&[order.status], driver_id),
            &mut |o| o.apply_transit(),
        )
        .map_err(|err| lost_race(err, id))?;

    record(state, "transit", "success");
    info!(order = %id, driver = driver_id, "delivery in transit");
    Ok(updated)
}

/// Delivery completion. Requires the driver's reported coordinates to
/// match the destination (shared keyword in the reverse-geocoded address,
/// or within the arrival radius of the geocoded destination). Geocoder
/// trouble surfaces as a retryable `ExternalService` error; the
/// transition is never forced through.
pub async fn complete(
    state: &AppState,
    id: OrderRef,
    driver_id: u64,
    location: GeoPoint,
) -> Result<Order, DispatchError> {
    state.drivers.get(driver_id)?;
    let now = state.clock.now();
    let order = fetch(state, id)?;
    guard_assigned(&order, driver_id, "complete")?;

    match state.policy.effective_status(&order, now) {
        OrderStatus::PickedUp | OrderStatus::InTransit | OrderStatus::Overdue => {}
        other => {
            record(state, "complete", "invalid_transition");
            return Err(DispatchError::InvalidTransition {
                event: "complete",
                state: other.to_string(),
            });
        }
    }

    if !verify_arrival(state, &order, location).await? {
        record(state, "complete", "location_mismatch");
        return Err(DispatchError::Validation(
            "reported location does not match the delivery destination".to_string(),
        ));
    }

    let updated = state
        .store
        .update_if(
            id,
            Precondition::status_and_driver(&[order.status], driver_id),
            &mut |o| o.apply_complete(now),
        )
        .map_err(|err| lost_race(err, id))?;

    record(state, "complete", "success");
    info!(order = %id, driver = driver_id, "order completed");
    Ok(updated)
}

async fn verify_arrival(
    state: &AppState,
    order: &Order,
    location: GeoPoint,
) -> Result<bool, DispatchError> {
    let timer = state.metrics.location_check_seconds.start_timer();
    let result = check_arrival(state, order, location).await;
    timer.observe_duration();

    if let Err(err) = &result {
        warn!(order = %order.order_ref(), error = %err, "location verification unavailable");
    }
    result
}

async fn check_arrival(
    state: &AppState,
    order: &Order,
    location: GeoPoint,
) -> Result<bool, DispatchError> {
    let reverse = timeout(
        state.geocode_timeout,
        state.geocoder.reverse_geocode(location),
    )
    .await
    .map_err(|_| DispatchError::ExternalService("geocoding timed out".to_string()))?
    .map_err(|err| DispatchError::ExternalService(err.to_string()))?;

    if let Some(address) = reverse {
        if geo::addresses_share_keyword(&address, &order.destination) {
            return Ok(true);
        }
    }

    let destination = timeout(
        state.geocode_timeout,
        state.geocoder.geocode(&order.destination),
    )
    .await
    .map_err(|_| DispatchError::ExternalService("geocoding timed out".to_string()))?
    .map_err(|err| DispatchError::ExternalService(err.to_string()))?;

    Ok(destination.is_some_and(|point| geo::haversine_m(location, point) <= geo::ARRIVAL_RADIUS_M))
}

/// Buyer cancellation. Legal only before pickup, and only for the buyer
/// who placed the order.
pub fn cancel(state: &AppState, id: OrderRef, buyer_id: u64) -> Result<Order, DispatchError> {
    let now = state.clock.now();
    let order = fetch(state, id)?;

    if order.buyer_id != buyer_id {
        record(state, "cancel", "forbidden");
        return Err(DispatchError::Forbidden(
            "only the buyer who placed the order may cancel it".to_string(),
        ));
    }

    match state.policy.effective_status(&order, now) {
        OrderStatus::Unclaimed | OrderStatus::Accepted => {}
        other => {
            record(state, "cancel", "invalid_transition");
            return Err(DispatchError::InvalidTransition {
                event: "cancel",
                state: other.to_string(),
            });
        }
    }

    let updated = state
        .store
        .update_if(id, Precondition::status(&[order.status]), &mut |o| {
            o.apply_cancel(buyer_id)
        })
        .map_err(|err| lost_race(err, id))?;

    record(state, "cancel", "success");
    info!(order = %id, buyer = buyer_id, "order cancelled");
    Ok(updated)
}

/// Authoritative single-order read; status is re-derived at read time.
pub fn get_order(state: &AppState, id: OrderRef) -> Result<Order, DispatchError> {
    let now = state.clock.now();
    let mut order = fetch(state, id)?;
    order.status = state.policy.effective_status(&order, now);
    Ok(order)
}

/// Orders still open for claiming. Expired ones are filtered here even if
/// the sweep has not materialized them yet.
pub fn list_unclaimed(state: &AppState) -> Vec<Order> {
    let now = state.clock.now();
    state
        .store
        .list(&OrderFilter::status(OrderStatus::Unclaimed))
        .into_iter()
        .filter(|order| !state.policy.is_expired(order, now))
        .collect()
}

/// The driver's open workload, overdue flagged but never hidden.
pub fn driver_orders(state: &AppState, driver_id: u64) -> Result<Vec<AssignedOrder>, DispatchError> {
    state.drivers.get(driver_id)?;
    let now = state.clock.now();

    Ok(state
        .store
        .list(&OrderFilter::driver(driver_id))
        .into_iter()
        .filter(|order| order.status.is_active())
        .map(|mut order| {
            let overdue = state.policy.counts_as_overdue(&order, now);
            order.status = state.policy.effective_status(&order, now);
            AssignedOrder { order, overdue }
        })
        .collect())
}

/// Eligibility gate input: the driver's currently-overdue orders. No
/// state of its own; purely an aggregation over the store.
pub fn overdue_orders(state: &AppState, driver_id: u64) -> Result<Vec<Order>, DispatchError> {
    state.drivers.get(driver_id)?;
    Ok(overdue_orders_at(state, driver_id))
}

fn overdue_orders_at(state: &AppState, driver_id: u64) -> Vec<Order> {
    let now = state.clock.now();
    state
        .store
        .list(&OrderFilter::driver(driver_id))
        .into_iter()
        .filter(|order| state.policy.counts_as_overdue(order, now))
        .collect()
}

pub fn buyer_orders(state: &AppState, buyer_id: u64) -> Vec<Order> {
    let now = state.clock.now();
    state
        .store
        .list(&OrderFilter::buyer(buyer_id))
        .into_iter()
        .map(|mut order| {
            order.status = state.policy.effective_status(&order, now);
            order
        })
        .collect()
}

pub fn seller_orders(state: &AppState, seller_id: u64) -> Vec<Order> {
    let now = state.clock.now();
    state
        .store
        .list(&OrderFilter::seller(seller_id))
        .into_iter()
        .map(|mut order| {
            order.status = state.policy.effective_status(&order, now);
            order
        })
        .collect()
}
