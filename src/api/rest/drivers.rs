use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::engine::lifecycle::{self, AssignedOrder};
use crate::error::DispatchError;
use crate::models::driver::{AvailabilityWindow, Driver};
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver))
        .route("/drivers/:id/orders", get(driver_orders))
        .route("/drivers/:id/overdue", get(overdue_orders))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub user_id: u64,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub availability: Vec<AvailabilityWindow>,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<Driver>, DispatchError> {
    let driver = state.drivers.register(
        payload.user_id,
        payload.name,
        payload.phone,
        payload.availability,
    )?;
    Ok(Json(driver))
}

async fn driver_orders(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Vec<AssignedOrder>>, DispatchError> {
    let orders = lifecycle::driver_orders(&state, id)?;
    Ok(Json(orders))
}

async fn overdue_orders(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Vec<Order>>, DispatchError> {
    let orders = lifecycle::overdue_orders(&state, id)?;
    Ok(Json(orders))
}
