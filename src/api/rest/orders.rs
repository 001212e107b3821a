use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::engine::lifecycle;
use crate::error::DispatchError;
use crate::geo::GeoPoint;
use crate::models::order::{LineItem, Order, OrderRef, Partition};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_unclaimed))
        .route("/orders/buyer/:buyer_id", get(buyer_orders))
        .route("/orders/seller/:seller_id", get(seller_orders))
        .route("/orders/:partition/:id", get(get_order))
        .route("/orders/:partition/:id/claim", post(claim))
        .route("/orders/:partition/:id/pickup", post(confirm_pickup))
        .route("/orders/:partition/:id/transit", post(start_transit))
        .route("/orders/:partition/:id/complete", post(complete))
        .route("/orders/:partition/:id/cancel", post(cancel))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub partition: Partition,
    pub buyer_id: u64,
    #[serde(default)]
    pub seller_id: Option<u64>,
    pub items: Vec<LineItem>,
    pub destination: String,
    #[serde(default)]
    pub is_urgent: bool,
    #[serde(default)]
    pub note: String,
}

#[derive(Deserialize)]
pub struct DriverAction {
    pub driver_id: u64,
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub driver_id: u64,
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub buyer_id: u64,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, DispatchError> {
    let order = lifecycle::create_order(
        &state,
        lifecycle::CreateOrder {
            partition: payload.partition,
            buyer_id: payload.buyer_id,
            seller_id: payload.seller_id,
            items: payload.items,
            destination: payload.destination,
            is_urgent: payload.is_urgent,
            note: payload.note,
        },
    )?;
    Ok(Json(order))
}

async fn list_unclaimed(State(state): State<Arc<AppState>>) -> Json<Vec<Order>> {
    Json(lifecycle::list_unclaimed(&state))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path((partition, id)): Path<(Partition, u64)>,
) -> Result<Json<Order>, DispatchError> {
    let order = lifecycle::get_order(&state, OrderRef { partition, id })?;
    Ok(Json(order))
}

async fn buyer_orders(
    State(state): State<Arc<AppState>>,
    Path(buyer_id): Path<u64>,
) -> Json<Vec<Order>> {
    Json(lifecycle::buyer_orders(&state, buyer_id))
}

async fn seller_orders(
    State(state): State<Arc<AppState>>,
    Path(seller_id): Path<u64>,
) -> Json<Vec<Order>> {
    Json(lifecycle::seller_orders(&state, seller_id))
}

async fn claim(
    State(state): State<Arc<AppState>>,
    Path((partition, id)): Path<(Partition, u64)>,
    Json(payload): Json<DriverAction>,
) -> Result<Json<Order>, DispatchError> {
    let order = lifecycle::claim(&state, OrderRef { partition, id }, payload.driver_id)?;
    Ok(Json(order))
}

async fn confirm_pickup(
    State(state): State<Arc<AppState>>,
    Path((partition, id)): Path<(Partition, u64)>,
    Json(payload): Json<DriverAction>,
) -> Result<Json<Order>, DispatchError> {
    let order = lifecycle::confirm_pickup(&state, OrderRef { partition, id }, payload.driver_id)?;
    Ok(Json(order))
}

async fn start_transit(
    State(state): State<Arc<AppState>>,
    Path((partition, id)): Path<(Partition, u64)>,
    Json(payload): Json<DriverAction>,
) -> Result<Json<Order>, DispatchError> {
    let order = lifecycle::start_transit(&state, OrderRef { partition, id }, payload.driver_id)?;
    Ok(Json(order))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Path((partition, id)): Path<(Partition, u64)>,
    Json(payload): Json<CompleteRequest>,
) -> Result<Json<Order>, DispatchError> {
    let order = lifecycle::complete(
        &state,
        OrderRef { partition, id },
        payload.driver_id,
        payload.location,
    )
    .await?;
    Ok(Json(order))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path((partition, id)): Path<(Partition, u64)>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<Order>, DispatchError> {
    let order = lifecycle::cancel(&state, OrderRef { partition, id }, payload.buyer_id)?;
    Ok(Json(order))
}
