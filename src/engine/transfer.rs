use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::order::{Order, OrderRef, OrderStatus};
use crate::models::transfer::{TransferRequest, TransferStatus};
use crate::state::AppState;
use crate::store::{Precondition, StoreError};

/// Stored statuses under which an order can change hands. A materialized
/// overdue order is still the offering driver's to hand off.
const TRANSFERABLE: [OrderStatus; 4] = [
    OrderStatus::Accepted,
    OrderStatus::PickedUp,
    OrderStatus::InTransit,
    OrderStatus::Overdue,
];

/// Handoff state. Requests live in `requests`; `pending_by_order` is the
/// uniqueness index enforcing at most one pending transfer per order.
pub struct TransferBroker {
    requests: DashMap<Uuid, TransferRequest>,
    pending_by_order: DashMap<OrderRef, Uuid>,
}

impl TransferBroker {
    pub fn new() -> Self {
        Self {
            requests: DashMap::new(),
            pending_by_order: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Publish `request` under the pending slot for its order. The slot
    /// entry is held across the insert into `requests`, so a request is
    /// never visible as pending unless it owns the slot. A live pending
    /// request wins the slot; a resolved or expired one is evicted and
    /// the claim retried.
    fn register_pending(
        &self,
        request: TransferRequest,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let order = request.order;
        let id = request.id;
        loop {
            match self.pending_by_order.entry(order) {
                Entry::Vacant(slot) => {
                    self.requests.insert(id, request);
                    slot.insert(id);
                    return Ok(());
                }
                Entry::Occupied(slot) => {
                    let existing = *slot.get();
                    // Resolve the old request outside the index entry
                    // lock; the resolution paths lock `requests` first.
                    drop(slot);

                    let stale = match self.requests.get_mut(&existing) {
                        None => true,
                        Some(mut prior) => {
                            if prior.is_expired(now) {
                                prior.status = TransferStatus::Expired;
                                true
                            } else {
                                prior.status != TransferStatus::Pending
                            }
                        }
                    };

                    if !stale {
                        return Err(DispatchError::Conflict(format!(
                            "a transfer for order {order} is already pending"
                        )));
                    }
                    self.pending_by_order.remove_if(&order, |_, v| *v == existing);
                }
            }
        }
    }

    fn clear_pending(&self, order: OrderRef, id: Uuid) {
        self.pending_by_order.remove_if(&order, |_, v| *v == id);
    }

    /// Materialize expiry on pending requests past their window; returns
    /// how many were marked. The read path ignores them either way.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> usize {
        let stale: Vec<Uuid> = self
            .requests
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| *entry.key())
            .collect();

        let mut marked = 0;
        for id in stale {
            if let Some(mut request) = self.requests.get_mut(&id) {
                if request.is_expired(now) {
                    request.status = TransferStatus::Expired;
                    let order = request.order;
                    drop(request);
                    self.clear_pending(order, id);
                    marked += 1;
                }
            }
        }
        marked
    }
}

impl Default for TransferBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn transfer_not_found(id: Uuid) -> DispatchError {
    DispatchError::NotFound(format!("transfer {id}"))
}

fn record(state: &AppState, outcome: &str) {
    state
        .metrics
        .transfers_total
        .with_label_values(&[outcome])
        .inc();
}

/// Offer an order to another driver, addressed by phone. The offer
/// expires on its own if the receiver never responds.
pub fn propose_transfer(
    state: &AppState,
    order_ref: OrderRef,
    from_driver_id: u64,
    to_driver_phone: &str,
    reason: Option<String>,
) -> Result<TransferRequest, DispatchError> {
    let from = state.drivers.get(from_driver_id)?;
    let to = state
        .drivers
        .by_phone(to_driver_phone)
        .ok_or_else(|| {
            DispatchError::NotFound(format!("no registered driver with phone {to_driver_phone}"))
        })?;

    if to.id == from.id {
        return Err(DispatchError::Validation(
            "cannot transfer an order to yourself".to_string(),
        ));
    }

    let now = state.clock.now();
    let order = state
        .store
        .get(order_ref)
        .map_err(|_| DispatchError::NotFound(format!("order {order_ref}")))?;

    if order.driver_id != Some(from_driver_id) {
        return Err(DispatchError::Forbidden(
            "only the assigned driver may offer this order".to_string(),
        ));
    }
    if !order.status.is_active() {
        return Err(DispatchError::InvalidTransition {
            event: "propose transfer",
            state: order.status.to_string(),
        });
    }

    let request = TransferRequest {
        id: Uuid::new_v4(),
        order: order_ref,
        from_driver: from.id,
        to_driver: to.id,
        reason,
        created_at: now,
        expires_at: now + state.transfer_ttl,
        status: TransferStatus::Pending,
    };

    if let Err(err) = state.transfers.register_pending(request.clone(), now) {
        record(state, "rejected_duplicate");
        return Err(err);
    }

    record(state, "proposed");
    info!(
        transfer = %request.id,
        order = %order_ref,
        from = from.id,
        to = to.id,
        "transfer proposed"
    );
    Ok(request)
}

/// Receiving driver takes over the order. The order reassignment and the
/// request resolution commit together: the request entry stays locked
/// across the store's conditional update, so no reader can see one
/// without the other.
pub fn accept_transfer(
    state: &AppState,
    transfer_id: Uuid,
    driver_id: u64,
) -> Result<(TransferRequest, Order), DispatchError> {
    let now = state.clock.now();
    let mut request = state
        .transfers
        .requests
        .get_mut(&transfer_id)
        .ok_or_else(|| transfer_not_found(transfer_id))?;

    if request.to_driver != driver_id {
        return Err(DispatchError::Forbidden(
            "this transfer is addressed to a different driver".to_string(),
        ));
    }
    if request.status != TransferStatus::Pending {
        return Err(DispatchError::InvalidTransition {
            event: "accept transfer",
            state: request.status.to_string(),
        });
    }
    if request.is_expired(now) {
        request.status = TransferStatus::Expired;
        let (order, id) = (request.order, request.id);
        drop(request);
        state.transfers.clear_pending(order, id);
        record(state, "expired");
        return Err(DispatchError::InvalidTransition {
            event: "accept transfer",
            state: TransferStatus::Expired.to_string(),
        });
    }

    let reason = request.reason.clone();
    let reassigned = state.store.update_if(
        request.order,
        Precondition::status_and_driver(&TRANSFERABLE, request.from_driver),
        &mut |o| o.apply_handoff(driver_id, now, reason.clone()),
    );

    let order = match reassigned {
        Ok(order) => order,
        Err(err) => {
            // The offering driver no longer holds the order; the offer
            // is dead no matter why.
            request.status = TransferStatus::Expired;
            let (order_ref, id) = (request.order, request.id);
            drop(request);
            state.transfers.clear_pending(order_ref, id);
            record(state, "expired");
            warn!(transfer = %transfer_id, error = %err, "transfer acceptance lost the order");
            return Err(match err {
                StoreError::NotFound(_) => transfer_not_found(transfer_id),
                StoreError::PreconditionFailed { .. } => DispatchError::Conflict(
                    "the offering driver no longer holds this order".to_string(),
                ),
            });
        }
    };

    request.status = TransferStatus::Accepted;
    let accepted = request.clone();
    drop(request);
    state.transfers.clear_pending(accepted.order, accepted.id);

    record(state, "accepted");
    info!(
        transfer = %transfer_id,
        order = %accepted.order,
        from = accepted.from_driver,
        to = accepted.to_driver,
        "transfer accepted"
    );
    Ok((accepted, order))
}

pub fn reject_transfer(
    state: &AppState,
    transfer_id: Uuid,
    driver_id: u64,
) -> Result<TransferRequest, DispatchError> {
    let now = state.clock.now();
    let mut request = state
        .transfers
        .requests
        .get_mut(&transfer_id)
        .ok_or_else(|| transfer_not_found(transfer_id))?;

    if request.to_driver != driver_id {
        return Err(DispatchError::Forbidden(
            "this transfer is addressed to a different driver".to_string(),
        ));
    }
    if request.status != TransferStatus::Pending {
        return Err(DispatchError::InvalidTransition {
            event: "reject transfer",
            state: request.status.to_string(),
        });
    }

    let outcome = if request.is_expired(now) {
        request.status = TransferStatus::Expired;
        "expired"
    } else {
        request.status = TransferStatus::Rejected;
        "rejected"
    };

    let rejected = request.clone();
    drop(request);
    state.transfers.clear_pending(rejected.order, rejected.id);

    record(state, outcome);
    info!(transfer = %transfer_id, driver = driver_id, outcome, "transfer resolved");
    Ok(rejected)
}

/// Offering driver takes the offer back before the receiver responds.
pub fn withdraw_transfer(
    state: &AppState,
    transfer_id: Uuid,
    driver_id: u64,
) -> Result<TransferRequest, DispatchError> {
    let now = state.clock.now();
    let mut request = state
        .transfers
        .requests
        .get_mut(&transfer_id)
        .ok_or_else(|| transfer_not_found(transfer_id))?;

    if request.from_driver != driver_id {
        return Err(DispatchError::Forbidden(
            "only the offering driver may withdraw a transfer".to_string(),
        ));
    }
    if request.status != TransferStatus::Pending {
        return Err(DispatchError::InvalidTransition {
            event: "withdraw transfer",
            state: request.status.to_string(),
        });
    }

    let outcome = if request.is_expired(now) {
        request.status = TransferStatus::Expired;
        "expired"
    } else {
        request.status = TransferStatus::Withdrawn;
        "withdrawn"
    };

    let withdrawn = request.clone();
    drop(request);
    state.transfers.clear_pending(withdrawn.order, withdrawn.id);

    record(state, outcome);
    info!(transfer = %transfer_id, driver = driver_id, outcome, "transfer resolved");
    Ok(withdrawn)
}

/// Open offers addressed to this driver, newest first. Requests past
/// their window are skipped even before the sweep marks them.
pub fn pending_transfers_for(
    state: &AppState,
    driver_id: u64,
) -> Result<Vec<TransferRequest>, DispatchError> {
    state.drivers.get(driver_id)?;
    let now = state.clock.now();

    let mut pending: Vec<TransferRequest> = state
        .transfers
        .requests
        .iter()
        .filter(|entry| {
            let request = entry.value();
            request.to_driver == driver_id
                && request.status == TransferStatus::Pending
                && !request.is_expired(now)
        })
        .map(|entry| entry.value().clone())
        .collect();

    pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(pending)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::engine::{lifecycle, testutil};
    use crate::models::driver::Driver;
    use crate::state::AppState;
    use std::sync::Arc;

    /// Two drivers, one claimed order held by the first.
    fn claimed(state: &Arc<AppState>) -> (Order, Driver, Driver) {
        let holder = testutil::driver(state, 100, "Dana", "0911-000-001");
        let receiver = testutil::driver(state, 101, "Eli", "0911-000-002");
        let order = testutil::groceries(state, 10);
        let order = lifecycle::claim(state, order.order_ref(), holder.id).unwrap();
        (order, holder, receiver)
    }

    #[test]
    fn accepting_a_transfer_reassigns_the_order() {
        let (state, _clock) = testutil::state();
        let (order, holder, receiver) = claimed(&state);

        let offer = propose_transfer(
            &state,
            order.order_ref(),
            holder.id,
            &receiver.phone,
            Some("shift ended".to_string()),
        )
        .unwrap();
        assert_eq!(offer.status, TransferStatus::Pending);

        let (resolved, reassigned) = accept_transfer(&state, offer.id, receiver.id).unwrap();

        assert_eq!(resolved.status, TransferStatus::Accepted);
        assert_eq!(reassigned.driver_id, Some(receiver.id));
        assert_eq!(reassigned.handoffs.len(), 1);
        assert_eq!(reassigned.handoffs[0].driver_id, holder.id);
        // The pending slot is free again.
        assert!(pending_transfers_for(&state, receiver.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn offering_an_order_to_yourself_is_rejected() {
        let (state, _clock) = testutil::state();
        let (order, holder, _receiver) = claimed(&state);

        let err =
            propose_transfer(&state, order.order_ref(), holder.id, &holder.phone, None)
                .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[test]
    fn only_the_assigned_driver_may_offer() {
        let (state, _clock) = testutil::state();
        let (order, _holder, receiver) = claimed(&state);
        let outsider = testutil::driver(&state, 102, "Finn", "0911-000-003");

        let err = propose_transfer(
            &state,
            order.order_ref(),
            outsider.id,
            &receiver.phone,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::Forbidden(_)));
    }

    #[test]
    fn one_pending_offer_per_order() {
        let (state, _clock) = testutil::state();
        let (order, holder, receiver) = claimed(&state);
        let third = testutil::driver(&state, 102, "Finn", "0911-000-003");

        let offer =
            propose_transfer(&state, order.order_ref(), holder.id, &receiver.phone, None)
                .unwrap();

        let err =
            propose_transfer(&state, order.order_ref(), holder.id, &third.phone, None)
                .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));

        // A resolved offer frees the slot.
        reject_transfer(&state, offer.id, receiver.id).unwrap();
        propose_transfer(&state, order.order_ref(), holder.id, &third.phone, None).unwrap();
    }

    #[test]
    fn losing_proposal_never_publishes_a_request() {
        let (state, _clock) = testutil::state();
        let (order, holder, receiver) = claimed(&state);
        let third = testutil::driver(&state, 102, "Finn", "0911-000-003");

        propose_transfer(&state, order.order_ref(), holder.id, &receiver.phone, None)
            .unwrap();
        let err =
            propose_transfer(&state, order.order_ref(), holder.id, &third.phone, None)
                .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));

        // The refused offer left no record behind; the intended receiver
        // never sees it.
        assert_eq!(state.transfers.len(), 1);
        assert!(pending_transfers_for(&state, third.id).unwrap().is_empty());
    }

    #[test]
    fn racing_proposals_publish_exactly_one_pending_offer() {
        let (state, _clock) = testutil::state();
        let holder = testutil::driver(&state, 100, "Dana", "0911-000-001");
        let receivers: Vec<_> = (0..8u64)
            .map(|i| {
                testutil::driver(
                    &state,
                    101 + i,
                    &format!("Receiver {i}"),
                    &format!("0911-111-{i:03}"),
                )
            })
            .collect();
        let order = testutil::groceries(&state, 10);
        let order = lifecycle::claim(&state, order.order_ref(), holder.id).unwrap();

        let from_driver = holder.id;
        let order_ref = order.order_ref();
        let wins = std::thread::scope(|scope| {
            let handles: Vec<_> = receivers
                .iter()
                .map(|to| {
                    let state = &state;
                    scope.spawn(move || {
                        propose_transfer(state, order_ref, from_driver, &to.phone, None)
                            .is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|&ok| ok)
                .count()
        });

        assert_eq!(wins, 1);
        assert_eq!(state.transfers.len(), 1);

        let pending_total: usize = receivers
            .iter()
            .map(|r| pending_transfers_for(&state, r.id).unwrap().len())
            .sum();
        assert_eq!(pending_total, 1);
    }

    #[test]
    fn only_the_addressed_driver_may_accept() {
        let (state, _clock) = testutil::state();
        let (order, holder, receiver) = claimed(&state);
        let outsider = testutil::driver(&state, 102, "Finn", "0911-000-003");

        let offer =
            propose_transfer(&state, order.order_ref(), holder.id, &receiver.phone, None)
                .unwrap();

        let err = accept_transfer(&state, offer.id, outsider.id).unwrap_err();
        assert!(matches!(err, DispatchError::Forbidden(_)));
    }

    #[test]
    fn accept_after_the_window_closes_fails_and_marks_expiry() {
        let (state, clock) = testutil::state();
        let (order, holder, receiver) = claimed(&state);

        let offer =
            propose_transfer(&state, order.order_ref(), holder.id, &receiver.phone, None)
                .unwrap();

        clock.advance(Duration::hours(25));

        let err = accept_transfer(&state, offer.id, receiver.id).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));

        let stored = state.transfers.requests.get(&offer.id).unwrap();
        assert_eq!(stored.status, TransferStatus::Expired);
    }

    #[test]
    fn withdrawn_offers_cannot_be_accepted() {
        let (state, _clock) = testutil::state();
        let (order, holder, receiver) = claimed(&state);

        let offer =
            propose_transfer(&state, order.order_ref(), holder.id, &receiver.phone, None)
                .unwrap();
        withdraw_transfer(&state, offer.id, holder.id).unwrap();

        let err = accept_transfer(&state, offer.id, receiver.id).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));
    }

    #[test]
    fn withdraw_after_the_window_resolves_as_expired() {
        let (state, clock) = testutil::state();
        let (order, holder, receiver) = claimed(&state);

        let offer =
            propose_transfer(&state, order.order_ref(), holder.id, &receiver.phone, None)
                .unwrap();

        clock.advance(Duration::hours(25));

        let resolved = withdraw_transfer(&state, offer.id, holder.id).unwrap();
        assert_eq!(resolved.status, TransferStatus::Expired);

        let stored = state.transfers.requests.get(&offer.id).unwrap();
        assert_eq!(stored.status, TransferStatus::Expired);
    }

    #[test]
    fn only_the_offering_driver_may_withdraw() {
        let (state, _clock) = testutil::state();
        let (order, holder, receiver) = claimed(&state);

        let offer =
            propose_transfer(&state, order.order_ref(), holder.id, &receiver.phone, None)
                .unwrap();

        let err = withdraw_transfer(&state, offer.id, receiver.id).unwrap_err();
        assert!(matches!(err, DispatchError::Forbidden(_)));
    }

    #[test]
    fn accept_fails_once_the_offering_driver_lost_the_order() {
        let (state, _clock) = testutil::state();
        let (order, holder, receiver) = claimed(&state);

        let offer =
            propose_transfer(&state, order.order_ref(), holder.id, &receiver.phone, None)
                .unwrap();

        // Buyer cancels while the offer is open.
        lifecycle::cancel(&state, order.order_ref(), 10).unwrap();

        let err = accept_transfer(&state, offer.id, receiver.id).unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)), "got {err:?}");

        let stored = state.transfers.requests.get(&offer.id).unwrap();
        assert_eq!(stored.status, TransferStatus::Expired);
    }

    #[test]
    fn reject_after_acceptance_is_an_invalid_transition() {
        let (state, _clock) = testutil::state();
        let (order, holder, receiver) = claimed(&state);

        let offer =
            propose_transfer(&state, order.order_ref(), holder.id, &receiver.phone, None)
                .unwrap();
        accept_transfer(&state, offer.id, receiver.id).unwrap();

        let err = reject_transfer(&state, offer.id, receiver.id).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));

        // The order still belongs to the accepting driver.
        let stored = state.store.get(order.order_ref()).unwrap();
        assert_eq!(stored.driver_id, Some(receiver.id));
    }

    #[test]
    fn pending_listing_skips_offers_past_their_window() {
        let (state, clock) = testutil::state();
        let (order, holder, receiver) = claimed(&state);

        propose_transfer(&state, order.order_ref(), holder.id, &receiver.phone, None).unwrap();
        assert_eq!(pending_transfers_for(&state, receiver.id).unwrap().len(), 1);

        clock.advance(Duration::hours(25));
        assert!(pending_transfers_for(&state, receiver.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn expire_stale_frees_the_pending_slot() {
        let (state, clock) = testutil::state();
        let (order, holder, receiver) = claimed(&state);

        propose_transfer(&state, order.order_ref(), holder.id, &receiver.phone, None).unwrap();

        clock.advance(Duration::hours(25));
        assert_eq!(state.transfers.expire_stale(state.clock.now()), 1);

        propose_transfer(&state, order.order_ref(), holder.id, &receiver.phone, None).unwrap();
    }
}
