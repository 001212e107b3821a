use std::sync::Arc;

use tracing::{debug, info};

use crate::models::order::OrderStatus;
use crate::state::AppState;
use crate::store::{OrderFilter, Precondition};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub overdue: usize,
    pub transfers_expired: usize,
}

/// One pass of the periodic sweep: materialize what the read-time
/// predicates already answer, so listings and direct reads agree with
/// stored state sooner rather than later.
pub fn sweep_once(state: &AppState) -> SweepReport {
    let now = state.clock.now();
    let mut report = SweepReport::default();

    for order in state.store.list(&OrderFilter::status(OrderStatus::Unclaimed)) {
        if !state.policy.is_expired(&order, now) {
            continue;
        }
        let marked = state.store.update_if(
            order.order_ref(),
            Precondition::status(&[OrderStatus::Unclaimed]),
            &mut |o| o.apply_expired(),
        );
        if marked.is_ok() {
            report.expired += 1;
        }
    }

    for status in [
        OrderStatus::Accepted,
        OrderStatus::PickedUp,
        OrderStatus::InTransit,
    ] {
        for order in state.store.list(&OrderFilter::status(status)) {
            if !state.policy.is_overdue(&order, now) {
                continue;
            }
            let marked = state.store.update_if(
                order.order_ref(),
                Precondition::status(&[status]),
                &mut |o| o.apply_overdue(),
            );
            if marked.is_ok() {
                report.overdue += 1;
            }
        }
    }

    report.transfers_expired = state.transfers.expire_stale(now);

    state
        .metrics
        .sweep_marked_total
        .with_label_values(&["expired"])
        .inc_by(report.expired as u64);
    state
        .metrics
        .sweep_marked_total
        .with_label_values(&["overdue"])
        .inc_by(report.overdue as u64);
    state
        .metrics
        .sweep_marked_total
        .with_label_values(&["transfer_expired"])
        .inc_by(report.transfers_expired as u64);

    report
}

/// Background loop around `sweep_once`.
pub async fn run_sweep(state: Arc<AppState>, interval: std::time::Duration) {
    info!(interval_secs = interval.as_secs(), "expiry sweep started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let report = sweep_once(&state);
        if report == SweepReport::default() {
            debug!("sweep pass found nothing to mark");
        } else {
            info!(
                expired = report.expired,
                overdue = report.overdue,
                transfers_expired = report.transfers_expired,
                "sweep pass materialized derived states"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::engine::{lifecycle, testutil, transfer};
    use crate::models::order::OrderStatus;

    #[test]
    fn sweep_materializes_expired_and_overdue_orders() {
        let (state, clock) = testutil::state();
        let driver = testutil::driver(&state, 100, "Dana", "0911-000-001");

        let unclaimed = testutil::groceries(&state, 10);
        let claimed = testutil::groceries(&state, 11);
        lifecycle::claim(&state, claimed.order_ref(), driver.id).unwrap();

        clock.advance(Duration::hours(3));

        let report = sweep_once(&state);
        assert_eq!(report.expired, 1);
        assert_eq!(report.overdue, 1);

        let stored = state.store.get(unclaimed.order_ref()).unwrap();
        assert_eq!(stored.status, OrderStatus::Expired);
        let stored = state.store.get(claimed.order_ref()).unwrap();
        assert_eq!(stored.status, OrderStatus::Overdue);
    }

    #[test]
    fn sweep_is_idempotent() {
        let (state, clock) = testutil::state();
        testutil::groceries(&state, 10);

        clock.advance(Duration::hours(3));

        assert_eq!(sweep_once(&state).expired, 1);
        assert_eq!(sweep_once(&state), SweepReport::default());
    }

    #[test]
    fn sweep_expires_stale_transfer_offers() {
        let (state, clock) = testutil::state();
        let holder = testutil::driver(&state, 100, "Dana", "0911-000-001");
        let receiver = testutil::driver(&state, 101, "Eli", "0911-000-002");
        let order = testutil::groceries(&state, 10);
        lifecycle::claim(&state, order.order_ref(), holder.id).unwrap();
        transfer::propose_transfer(&state, order.order_ref(), holder.id, &receiver.phone, None)
            .unwrap();

        clock.advance(Duration::hours(25));

        let report = sweep_once(&state);
        assert_eq!(report.transfers_expired, 1);
        assert!(transfer::pending_transfers_for(&state, receiver.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn sweep_leaves_fresh_orders_alone() {
        let (state, clock) = testutil::state();
        let driver = testutil::driver(&state, 100, "Dana", "0911-000-001");
        let order = testutil::groceries(&state, 10);
        lifecycle::claim(&state, order.order_ref(), driver.id).unwrap();

        clock.advance(Duration::minutes(30));

        assert_eq!(sweep_once(&state), SweepReport::default());
        let stored = state.store.get(order.order_ref()).unwrap();
        assert_eq!(stored.status, OrderStatus::Accepted);
    }
}
