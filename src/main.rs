use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use delivery_dispatch::clock::SystemClock;
use delivery_dispatch::geo::geocoder::HttpGeocoder;
use delivery_dispatch::store::memory::MemoryOrderStore;
use delivery_dispatch::{api, config, engine, error, state};

#[tokio::main]
async fn main() -> Result<(), error::DispatchError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let store = Arc::new(MemoryOrderStore::new());
    let clock = Arc::new(SystemClock);
    let geocoder = Arc::new(
        HttpGeocoder::new(
            config.geocoder_url.clone(),
            std::time::Duration::from_secs(config.geocode_timeout_secs),
        )
        .map_err(|err| error::DispatchError::ExternalService(err.to_string()))?,
    );

    let app_state = state::AppState::new(&config, store, clock, geocoder);
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(engine::sweep::run_sweep(
        shared_state.clone(),
        std::time::Duration::from_secs(config.sweep_interval_secs),
    ));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| {
            error::DispatchError::ExternalService(format!("failed to bind {bind_addr}: {err}"))
        })?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::DispatchError::ExternalService(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
