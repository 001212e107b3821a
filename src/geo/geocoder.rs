use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::geo::GeoPoint;

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("geocoding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("geocoding timed out")]
    Timeout,

    #[error("geocoding response malformed: {0}")]
    Malformed(String),
}

/// External geocoding collaborator. Only the delivery-completion check
/// talks to it.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a free-text address to coordinates, or None if the service
    /// cannot place it.
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>, GeocodeError>;

    /// Resolve coordinates to a display address, or None for open terrain.
    async fn reverse_geocode(&self, point: GeoPoint) -> Result<Option<String>, GeocodeError>;
}

/// Nominatim-compatible HTTP geocoder.
pub struct HttpGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGeocoder {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("delivery-dispatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, base_url })
    }
}

#[derive(Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

#[derive(Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>, GeocodeError> {
        let url = format!("{}/search", self.base_url);
        let hits: Vec<SearchHit> = self
            .client
            .get(&url)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(hit) = hits.into_iter().next() else {
            debug!(address, "geocoder found no match");
            return Ok(None);
        };

        let lat = hit
            .lat
            .parse::<f64>()
            .map_err(|err| GeocodeError::Malformed(format!("lat: {err}")))?;
        let lng = hit
            .lon
            .parse::<f64>()
            .map_err(|err| GeocodeError::Malformed(format!("lon: {err}")))?;

        Ok(Some(GeoPoint { lat, lng }))
    }

    async fn reverse_geocode(&self, point: GeoPoint) -> Result<Option<String>, GeocodeError> {
        let url = format!("{}/reverse", self.base_url);
        let response: ReverseResponse = self
            .client
            .get(&url)
            .query(&[
                ("lat", point.lat.to_string()),
                ("lon", point.lng.to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.display_name)
    }
}
