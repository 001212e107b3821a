use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// A registered availability slot: which day a driver starts driving and
/// which settlements they cover on that run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: u64,
    /// The marketplace account behind this driver profile. Used for the
    /// self-dealing check: a driver may not deliver their own orders.
    pub user_id: u64,
    pub name: String,
    pub phone: String,
    pub availability: Vec<AvailabilityWindow>,
}
