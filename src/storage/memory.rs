use std::cell::{Cell, RefCell};

use _model::{
    point_literal, Brand, ScrapedZip, StoreRecord, TargetReason, TargetZipEntry, ZipCode, ZipMetadata,
};
use serde_json::Value;

use super::{
    is_centroid_marker, ExistingStore, GeometryUpdate, PendingStore, RowId, StorageError, StoreDb,
};

#[derive(Clone, Debug)]
pub struct Row {
    pub id: i64,
    pub store_enum: String,
    pub name: String,
    pub zip_code: String,
    pub address: Option<String>,
    pub geom: Option<String>,
    pub failure_count: u32,
}

impl Row {
    fn needs_geometry(&self) -> bool {
        self.geom.is_none() || self.address.as_deref().is_some_and(is_centroid_marker)
    }

    fn in_brands(&self, brands: Option<&[Brand]>) -> bool {
        brands.map_or(true, |x| x.iter().any(|b| b.slug() == self.store_enum))
    }
}

#[derive(Clone, Debug)]
pub struct Scraped {
    pub zip_code: ZipCode,
    pub store_count: u32,
    pub metadata: Option<ZipMetadata>,
}

/// Tables held in memory, with switches for failing calls.
#[derive(Default)]
pub struct MemoryDb {
    pub stores: RefCell<Vec<Row>>,
    pub scraped: RefCell<Vec<Scraped>>,
    pub targets: RefCell<Vec<TargetZipEntry>>,
    pub insert_calls: Cell<usize>,
    /// Insert calls (1-based) that fail.
    pub failing_inserts: RefCell<Vec<usize>>,
    pub fail_targets: Cell<bool>,
    pub fail_tracking: Cell<bool>,
    pub updates: RefCell<Vec<(RowId, GeometryUpdate)>>,
    pub increments: RefCell<Vec<Vec<RowId>>>,
    pub refreshed: Cell<u64>,
    pub limit: u32,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self {
            limit: 3,
            ..Default::default()
        }
    }

    pub fn with_store(self, brand: Brand, name: &str, zip: &str, address: Option<&str>) -> Self {
        self.push_row(brand, name, zip, address, Some("POINT(0 0)"), 0);
        self
    }

    pub fn push_row(
        &self,
        brand: Brand,
        name: &str,
        zip: &str,
        address: Option<&str>,
        geom: Option<&str>,
        failure_count: u32,
    ) -> i64 {
        let mut stores = self.stores.borrow_mut();
        let id = stores.len() as i64 + 1;
        stores.push(Row {
            id,
            store_enum: brand.slug().to_string(),
            name: name.to_string(),
            zip_code: zip.to_string(),
            address: address.map(str::to_string),
            geom: geom.map(str::to_string),
            failure_count,
        });
        id
    }

    pub fn row(&self, id: i64) -> Row {
        self.stores.borrow()[id as usize - 1].clone()
    }

    pub fn with_target(self, zip: &str, reason: TargetReason, priority: f64, user_count: u32) -> Self {
        self.targets.borrow_mut().push(TargetZipEntry {
            zip_code: zip.parse().unwrap(),
            reason,
            priority,
            user_count,
        });
        self
    }

    pub fn with_scraped(self, zip: &str) -> Self {
        self.scraped.borrow_mut().push(Scraped {
            zip_code: zip.parse().unwrap(),
            store_count: 0,
            metadata: None,
        });
        self
    }

    pub fn scraped_count(&self, zip: &str) -> Option<u32> {
        self.scraped
            .borrow()
            .iter()
            .find(|x| x.zip_code.as_str() == zip)
            .map(|x| x.store_count)
    }

    fn failure(operation: &str) -> StorageError {
        StorageError::Status {
            operation: operation.to_string(),
            status: 500,
        }
    }

    fn existing(row: &Row) -> ExistingStore {
        ExistingStore {
            name: Some(row.name.clone()),
            zip_code: Some(row.zip_code.clone()),
            address: row.address.clone(),
        }
    }
}

impl StoreDb for MemoryDb {
    fn existing_stores(
        &self,
        brand: Brand,
        zips: Option<&[ZipCode]>,
    ) -> Result<Vec<ExistingStore>, StorageError> {
        Ok(self
            .stores
            .borrow()
            .iter()
            .filter(|x| x.store_enum == brand.slug())
            .filter(|x| zips.map_or(true, |z| z.iter().any(|z| z.as_str() == x.zip_code)))
            .map(Self::existing)
            .collect())
    }

    fn insert_stores(&self, batch: &[StoreRecord]) -> Result<(), StorageError> {
        let call = self.insert_calls.get() + 1;
        self.insert_calls.set(call);
        if self.failing_inserts.borrow().contains(&call) {
            return Err(Self::failure("insert grocery_stores"));
        }

        for x in batch {
            self.push_row(
                x.brand,
                &x.name,
                x.zip_code.as_str(),
                x.street_address.as_deref(),
                x.geometry.as_ref().map(point_literal).as_deref(),
                x.failure_count,
            );
        }
        Ok(())
    }

    fn upsert_scraped_zips(&self, rows: &[ScrapedZip]) -> Result<(), StorageError> {
        if self.fail_tracking.get() {
            return Err(Self::failure("upsert scraped_zipcodes"));
        }
        let mut scraped = self.scraped.borrow_mut();
        for row in rows {
            match scraped.iter_mut().find(|x| x.zip_code == row.zip_code) {
                Some(x) => x.store_count = row.store_count,
                None => scraped.push(Scraped {
                    zip_code: row.zip_code.clone(),
                    store_count: row.store_count,
                    metadata: None,
                }),
            }
        }
        Ok(())
    }

    fn target_zipcodes(&self) -> Result<Vec<TargetZipEntry>, StorageError> {
        if self.fail_targets.get() {
            return Err(Self::failure("select target_zipcodes"));
        }
        let mut targets = self.targets.borrow().clone();
        targets.sort_by(|a, b| b.priority.total_cmp(&a.priority));
        Ok(targets)
    }

    fn stores_needing_geometry(
        &self,
        brands: Option<&[Brand]>,
        max_failures: u32,
    ) -> Result<Vec<PendingStore>, StorageError> {
        Ok(self
            .stores
            .borrow()
            .iter()
            .filter(|x| x.needs_geometry() && x.in_brands(brands) && x.failure_count < max_failures)
            .map(|x| PendingStore {
                id: RowId::Int(x.id),
                store_enum: x.store_enum.clone(),
                name: Some(x.name.clone()),
                zip_code: Some(x.zip_code.clone()).filter(|x| !x.is_empty()),
                address: x.address.clone(),
                geom: x.geom.clone().map(Value::String),
                failure_count: x.failure_count,
            })
            .collect())
    }

    fn count_permanently_skipped(
        &self,
        brands: Option<&[Brand]>,
        max_failures: u32,
    ) -> Result<usize, StorageError> {
        Ok(self
            .stores
            .borrow()
            .iter()
            .filter(|x| x.needs_geometry() && x.in_brands(brands) && x.failure_count >= max_failures)
            .count())
    }

    fn centroid_markers(&self, brand: Brand) -> Result<Vec<ExistingStore>, StorageError> {
        Ok(self
            .stores
            .borrow()
            .iter()
            .filter(|x| x.store_enum == brand.slug())
            .filter(|x| x.address.as_deref().is_some_and(is_centroid_marker))
            .map(Self::existing)
            .collect())
    }

    fn update_store(&self, id: &RowId, update: &GeometryUpdate) -> Result<(), StorageError> {
        self.updates.borrow_mut().push((id.clone(), update.clone()));
        let mut stores = self.stores.borrow_mut();
        if let Some(row) = stores.iter_mut().find(|x| RowId::Int(x.id) == *id) {
            row.geom = Some(update.geom.clone());
            if let Some(address) = &update.address {
                row.address = address.clone();
            }
        }
        Ok(())
    }

    fn increment_geocoding_failures(&self, ids: &[RowId]) -> Result<Vec<RowId>, StorageError> {
        self.increments.borrow_mut().push(ids.to_vec());
        let mut reached = Vec::new();
        for row in self.stores.borrow_mut().iter_mut() {
            let id = RowId::Int(row.id);
            if ids.contains(&id) {
                row.failure_count += 1;
                if row.failure_count >= self.limit {
                    reached.push(id);
                }
            }
        }
        Ok(reached)
    }

    fn update_target_zipcodes(&self) -> Result<u64, StorageError> {
        Ok(self.refreshed.get())
    }

    /// Adds the numerically adjacent ZIPs of every seeded target.
    fn add_neighbor_zipcodes(&self, radius: u32) -> Result<u64, StorageError> {
        let mut targets = self.targets.borrow_mut();
        let seeds: Vec<u32> = targets
            .iter()
            .filter(|x| x.reason != TargetReason::Neighbor)
            .filter_map(|x| x.zip_code.as_str().parse().ok())
            .collect();

        let mut added = 0;
        for seed in seeds {
            for n in seed.saturating_sub(radius)..=seed + radius {
                let zip: ZipCode = format!("{n:05}").parse().map_err(|_| Self::failure("rpc"))?;
                if targets.iter().any(|x| x.zip_code == zip) {
                    continue;
                }
                targets.push(TargetZipEntry {
                    zip_code: zip,
                    reason: TargetReason::Neighbor,
                    priority: 0.0,
                    user_count: 0,
                });
                added += 1;
            }
        }
        Ok(added)
    }

    fn unscraped_target_count(&self) -> Result<u64, StorageError> {
        Err(Self::failure("rpc get_unscraped_target_zipcodes_count"))
    }

    fn upsert_targets(&self, rows: &[TargetZipEntry]) -> Result<(), StorageError> {
        let mut targets = self.targets.borrow_mut();
        for row in rows {
            targets.retain(|x| x.zip_code != row.zip_code);
            targets.push(row.clone());
        }
        Ok(())
    }

    fn targets_by_reason(&self, reasons: &[TargetReason]) -> Result<Vec<TargetZipEntry>, StorageError> {
        Ok(self
            .target_zipcodes()?
            .into_iter()
            .filter(|x| reasons.contains(&x.reason))
            .collect())
    }

    fn scraped_zipcodes_in(&self, zips: &[ZipCode]) -> Result<Vec<ZipCode>, StorageError> {
        Ok(self
            .scraped
            .borrow()
            .iter()
            .filter(|x| zips.contains(&x.zip_code))
            .map(|x| x.zip_code.clone())
            .collect())
    }

    fn delete_targets(&self, reason: TargetReason, unused_only: bool) -> Result<(), StorageError> {
        self.targets
            .borrow_mut()
            .retain(|x| x.reason != reason || (unused_only && x.user_count > 0));
        Ok(())
    }

    fn zipcodes_missing_metadata(&self, limit: usize) -> Result<Vec<ZipCode>, StorageError> {
        Ok(self
            .scraped
            .borrow()
            .iter()
            .filter(|x| x.metadata.as_ref().map_or(true, |m| m.city.is_none()))
            .take(limit)
            .map(|x| x.zip_code.clone())
            .collect())
    }

    fn update_zip_metadata(&self, zip: &ZipCode, metadata: &ZipMetadata) -> Result<(), StorageError> {
        if let Some(x) = self.scraped.borrow_mut().iter_mut().find(|x| x.zip_code == *zip) {
            x.metadata = Some(metadata.clone());
        }
        Ok(())
    }
}
