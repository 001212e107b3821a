use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::OrderRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
    Withdrawn,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Accepted => "accepted",
            TransferStatus::Rejected => "rejected",
            TransferStatus::Expired => "expired",
            TransferStatus::Withdrawn => "withdrawn",
        };
        write!(f, "{name}")
    }
}

/// A proposed handoff of one claimed order from its current driver to a
/// named receiving driver. Resolved by the receiver (accept/reject), by
/// the offering driver (withdraw), or passively by its expiry timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub id: Uuid,
    pub order: OrderRef,
    pub from_driver: u64,
    pub to_driver: u64,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: TransferStatus,
}

impl TransferRequest {
    /// Passive expiry: a pending request past its window is dead even if
    /// the sweep has not materialized that yet.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == TransferStatus::Pending && now >= self.expires_at
    }
}
