use std::env;

use crate::error::DispatchError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub unclaimed_ttl_hours: i64,
    pub overdue_ttl_hours: i64,
    pub transfer_ttl_hours: i64,
    pub sweep_interval_secs: u64,
    pub geocoder_url: String,
    pub geocode_timeout_secs: u64,
    pub max_items_per_order: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, DispatchError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            unclaimed_ttl_hours: parse_or_default("UNCLAIMED_TTL_HOURS", 2)?,
            overdue_ttl_hours: parse_or_default("OVERDUE_TTL_HOURS", 2)?,
            transfer_ttl_hours: parse_or_default("TRANSFER_TTL_HOURS", 24)?,
            sweep_interval_secs: parse_or_default("SWEEP_INTERVAL_SECS", 60)?,
            geocoder_url: env::var("GEOCODER_URL")
                .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string()),
            geocode_timeout_secs: parse_or_default("GEOCODE_TIMEOUT_SECS", 5)?,
            max_items_per_order: parse_or_default("MAX_ITEMS_PER_ORDER", 30)?,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, DispatchError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| DispatchError::Validation(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
