use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::transfer;
use crate::error::DispatchError;
use crate::models::order::{Order, OrderRef, Partition};
use crate::models::transfer::TransferRequest;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/transfers", post(propose))
        .route("/transfers/pending/:driver_id", get(pending))
        .route("/transfers/:id/accept", post(accept))
        .route("/transfers/:id/reject", post(reject))
        .route("/transfers/:id/withdraw", post(withdraw))
}

#[derive(Deserialize)]
pub struct ProposeTransferRequest {
    pub partition: Partition,
    pub order_id: u64,
    pub from_driver_id: u64,
    /// The receiving driver is addressed by phone, not id.
    pub to_driver_phone: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct DriverAction {
    pub driver_id: u64,
}

/// Accept response: the resolved request plus the reassigned order, so
/// the caller does not need a follow-up read to see the new assignment.
#[derive(Serialize)]
pub struct AcceptedTransfer {
    pub transfer: TransferRequest,
    pub order: Order,
}

async fn propose(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ProposeTransferRequest>,
) -> Result<Json<TransferRequest>, DispatchError> {
    let order_ref = OrderRef {
        partition: payload.partition,
        id: payload.order_id,
    };
    let request = transfer::propose_transfer(
        &state,
        order_ref,
        payload.from_driver_id,
        &payload.to_driver_phone,
        payload.reason,
    )?;
    Ok(Json(request))
}

async fn pending(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<u64>,
) -> Result<Json<Vec<TransferRequest>>, DispatchError> {
    let requests = transfer::pending_transfers_for(&state, driver_id)?;
    Ok(Json(requests))
}

async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverAction>,
) -> Result<Json<AcceptedTransfer>, DispatchError> {
    let (request, order) = transfer::accept_transfer(&state, id, payload.driver_id)?;
    Ok(Json(AcceptedTransfer {
        transfer: request,
        order,
    }))
}

async fn reject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverAction>,
) -> Result<Json<TransferRequest>, DispatchError> {
    let request = transfer::reject_transfer(&state, id, payload.driver_id)?;
    Ok(Json(request))
}

async fn withdraw(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverAction>,
) -> Result<Json<TransferRequest>, DispatchError> {
    let request = transfer::withdraw_transfer(&state, id, payload.driver_id)?;
    Ok(Json(request))
}
