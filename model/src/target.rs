use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ZipCode;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetReason {
    UserLocation,
    Neighbor,
    EventTrigger,
}

impl TargetReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserLocation => "user_location",
            Self::Neighbor => "neighbor",
            Self::EventTrigger => "event_trigger",
        }
    }
}

/// A row of `target_zipcodes`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetZipEntry {
    pub zip_code: ZipCode,
    pub reason: TargetReason,
    #[serde(default)]
    pub priority: f64,
    #[serde(default)]
    pub user_count: u32,
}

impl TargetZipEntry {
    /// A ZIP asked for by an external event rather than by user demand.
    pub fn event_trigger(zip_code: ZipCode) -> Self {
        Self {
            zip_code,
            reason: TargetReason::EventTrigger,
            priority: 0.0,
            user_count: 0,
        }
    }
}

/// Tracking upsert for `scraped_zipcodes`, keyed on `zip_code`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScrapedZip {
    pub zip_code: ZipCode,
    pub last_scraped_at: DateTime<Utc>,
    pub store_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl ScrapedZip {
    pub fn new(zip_code: ZipCode, store_count: u32, now: DateTime<Utc>) -> Self {
        Self {
            zip_code,
            last_scraped_at: now,
            store_count,
            updated_at: now,
        }
    }
}

/// City, state and centroid backfilled onto a `scraped_zipcodes` row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ZipMetadata {
    pub city: Option<String>,
    pub state: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub geom: String,
}
