use std::{collections::BTreeMap, mem};

use _model::{ScrapedZip, StoreRecord, ZipCode};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::{stats::ImportStats, storage::StoreDb};

pub const BATCH_SIZE: usize = 100;

/// Buffers new stores and inserts them a batch at a time.
pub struct BatchWriter<'a> {
    db: &'a dyn StoreDb,
    batch: Vec<StoreRecord>,
    batch_size: usize,
    dry_run: bool,
    inserted: BTreeMap<ZipCode, u32>,
}

impl<'a> BatchWriter<'a> {
    pub fn new(db: &'a dyn StoreDb, batch_size: usize, dry_run: bool) -> Self {
        Self {
            db,
            batch: Vec::with_capacity(batch_size),
            batch_size: batch_size.max(1),
            dry_run,
            inserted: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, record: StoreRecord, stats: &mut ImportStats) {
        self.batch.push(record);
        if self.batch.len() >= self.batch_size {
            self.flush(stats);
        }
    }

    /// Inserts whatever is buffered. A failed batch is dropped.
    pub fn flush(&mut self, stats: &mut ImportStats) {
        if self.batch.is_empty() {
            return;
        }
        let batch = mem::take(&mut self.batch);

        if self.dry_run {
            info!(stores = batch.len(), "dry run, not inserting");
        } else if let Err(e) = self.db.insert_stores(&batch) {
            error!(stores = batch.len(), "batch insert failed: {e}");
            stats.errors += 1;
            return;
        } else {
            info!(stores = batch.len(), "inserted");
        }

        stats.new_stores += batch.len();
        for x in batch {
            *self.inserted.entry(x.zip_code).or_default() += 1;
        }
    }

    /// Flushes the tail and records one tracking row per ZIP that received stores.
    pub fn finish(mut self, stats: &mut ImportStats, now: DateTime<Utc>) -> BTreeMap<ZipCode, u32> {
        self.flush(stats);
        if self.dry_run || self.inserted.is_empty() {
            return self.inserted;
        }

        let rows: Vec<ScrapedZip> = self
            .inserted
            .iter()
            .map(|(zip, count)| ScrapedZip::new(zip.clone(), *count, now))
            .collect();
        match self.db.upsert_scraped_zips(&rows) {
            Ok(()) => info!(zips = rows.len(), "tracked scraped ZIP codes"),
            Err(e) => warn!("could not update scraped ZIP tracking: {e}"),
        }
        self.inserted
    }
}

#[cfg(test)]
mod tests {
    use _model::Brand;
    use geo::Point;

    use super::*;
    use crate::storage::memory::MemoryDb;

    fn record(i: usize, zip: &str) -> StoreRecord {
        StoreRecord {
            brand: Brand::Walmart,
            name: format!("Walmart #{i}"),
            street_address: Some(format!("{i} Main St")),
            city: None,
            state: None,
            zip_code: zip.parse().unwrap(),
            geometry: Some(Point::new(-86.9, 40.4)),
            failure_count: 0,
        }
    }

    #[test]
    fn flushes_every_batch() {
        let db = MemoryDb::new();
        let mut stats = ImportStats::default();
        let mut writer = BatchWriter::new(&db, BATCH_SIZE, false);
        for i in 0..250 {
            writer.push(record(i, if i % 2 == 0 { "47906" } else { "47907" }), &mut stats);
        }
        assert_eq!(db.insert_calls.get(), 2);

        let counts = writer.finish(&mut stats, Utc::now());
        assert_eq!(db.insert_calls.get(), 3);
        assert_eq!(stats.new_stores, 250);
        assert_eq!(counts.values().sum::<u32>(), 250);
        assert_eq!(db.scraped_count("47906"), Some(125));
        assert_eq!(db.scraped_count("47907"), Some(125));
    }

    #[test]
    fn failed_batch_is_abandoned() {
        let db = MemoryDb::new();
        db.failing_inserts.borrow_mut().push(1);
        let mut stats = ImportStats::default();
        let mut writer = BatchWriter::new(&db, 2, false);
        for i in 0..3 {
            writer.push(record(i, "47906"), &mut stats);
        }
        writer.finish(&mut stats, Utc::now());

        assert_eq!(stats.errors, 1);
        assert_eq!(stats.new_stores, 1);
        assert_eq!(db.stores.borrow().len(), 1);
        assert_eq!(db.scraped_count("47906"), Some(1));
    }

    #[test]
    fn tracking_failure_is_not_fatal() {
        let db = MemoryDb::new();
        db.fail_tracking.set(true);
        let mut stats = ImportStats::default();
        let mut writer = BatchWriter::new(&db, 10, false);
        writer.push(record(0, "47906"), &mut stats);
        writer.finish(&mut stats, Utc::now());
        assert_eq!(stats.new_stores, 1);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let db = MemoryDb::new();
        let mut stats = ImportStats::default();
        let mut writer = BatchWriter::new(&db, 1, true);
        writer.push(record(0, "47906"), &mut stats);
        let counts = writer.finish(&mut stats, Utc::now());
        assert_eq!(stats.new_stores, 1);
        assert_eq!(counts.len(), 1);
        assert_eq!(db.insert_calls.get(), 0);
        assert_eq!(db.scraped_count("47906"), None);
    }
}
