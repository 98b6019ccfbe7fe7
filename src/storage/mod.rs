use std::fmt;

use _model::{Brand, ScrapedZip, StoreRecord, TargetReason, TargetZipEntry, ZipCode, ZipMetadata};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DefaultOnNull};
use thiserror::Error;

#[cfg(test)]
pub mod memory;
mod postgrest;

pub use postgrest::Postgrest;

use crate::http::FetchError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{operation}: HTTP {status}")]
    Status { operation: String, status: u16 },

    #[error("{operation}: {message}")]
    Network { operation: String, message: String },

    #[error("{operation}: unexpected response")]
    Decode {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn fetch(operation: impl Into<String>, error: FetchError) -> Self {
        let operation = operation.into();
        match error {
            FetchError::Status { status, .. } => Self::Status { operation, status },
            FetchError::Network { message, .. } => Self::Network { operation, message },
        }
    }
}

/// Primary key of a `grocery_stores` row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(x) => write!(f, "{x}"),
            Self::Text(x) => f.write_str(x),
        }
    }
}

/// The columns of an already imported store that identify it.
#[derive(Clone, Debug, Deserialize)]
pub struct ExistingStore {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// A store without a precise location.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct PendingStore {
    pub id: RowId,
    pub store_enum: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub geom: Option<Value>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub failure_count: u32,
}

impl PendingStore {
    pub fn zip(&self) -> Option<ZipCode> {
        ZipCode::normalize(self.zip_code.as_deref()?)
    }

    /// Whether the row is placed at its ZIP centroid rather than missing a location.
    pub fn has_centroid(&self) -> bool {
        self.geom.as_ref().is_some_and(|x| !x.is_null())
            && self.address.as_deref().is_some_and(is_centroid_marker)
    }
}

pub fn is_centroid_marker(address: &str) -> bool {
    address.starts_with("ZIP ") && address.ends_with(" (centroid)")
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GeometryUpdate {
    pub geom: String,
    /// `None` leaves the address alone, `Some(None)` clears it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Option<String>>,
}

/// Tables and procedures the importer reads and writes.
pub trait StoreDb {
    /// Identity columns of every store of `brand`, limited to `zips` when given.
    fn existing_stores(
        &self,
        brand: Brand,
        zips: Option<&[ZipCode]>,
    ) -> Result<Vec<ExistingStore>, StorageError>;

    fn insert_stores(&self, batch: &[StoreRecord]) -> Result<(), StorageError>;

    fn upsert_scraped_zips(&self, rows: &[ScrapedZip]) -> Result<(), StorageError>;

    /// All targets, highest priority first.
    fn target_zipcodes(&self) -> Result<Vec<TargetZipEntry>, StorageError>;

    /// Stores with no geometry or only a centroid, below `max_failures`.
    fn stores_needing_geometry(
        &self,
        brands: Option<&[Brand]>,
        max_failures: u32,
    ) -> Result<Vec<PendingStore>, StorageError>;

    fn count_permanently_skipped(
        &self,
        brands: Option<&[Brand]>,
        max_failures: u32,
    ) -> Result<usize, StorageError>;

    /// Rows of `brand` whose address is a centroid marker.
    fn centroid_markers(&self, brand: Brand) -> Result<Vec<ExistingStore>, StorageError>;

    fn update_store(&self, id: &RowId, update: &GeometryUpdate) -> Result<(), StorageError>;

    /// Bumps `failure_count` on each row, returning the ones that reached the limit.
    fn increment_geocoding_failures(&self, ids: &[RowId]) -> Result<Vec<RowId>, StorageError>;

    fn update_target_zipcodes(&self) -> Result<u64, StorageError>;

    fn add_neighbor_zipcodes(&self, radius: u32) -> Result<u64, StorageError>;

    fn unscraped_target_count(&self) -> Result<u64, StorageError>;

    fn upsert_targets(&self, rows: &[TargetZipEntry]) -> Result<(), StorageError>;

    fn targets_by_reason(&self, reasons: &[TargetReason]) -> Result<Vec<TargetZipEntry>, StorageError>;

    /// The subset of `zips` that already has a `scraped_zipcodes` row.
    fn scraped_zipcodes_in(&self, zips: &[ZipCode]) -> Result<Vec<ZipCode>, StorageError>;

    /// Deletes targets with `reason`, or only those without users when `unused_only`.
    fn delete_targets(&self, reason: TargetReason, unused_only: bool) -> Result<(), StorageError>;

    fn zipcodes_missing_metadata(&self, limit: usize) -> Result<Vec<ZipCode>, StorageError>;

    fn update_zip_metadata(&self, zip: &ZipCode, metadata: &ZipMetadata) -> Result<(), StorageError>;
}
