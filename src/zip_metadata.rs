use std::{thread::sleep, time::Duration};

use _model::{ZipCode, ZipMetadata};
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use rayon::{prelude::*, ThreadPoolBuilder};
use tracing::{info, warn};

use crate::{geocode::ZipMetadataSource, storage::StoreDb, utils::progress_style};

#[derive(Clone, Debug)]
pub struct MetadataOptions {
    pub limit: usize,
    /// Pause after each successful lookup, per worker.
    pub delay: Duration,
    pub repeat: bool,
    pub max_batches: Option<usize>,
    pub concurrency: usize,
    pub dry_run: bool,
    pub pause_between_batches: Duration,
}

/// Fills in city, state and centroid for tracked ZIP codes that lack them.
/// Returns how many ZIPs were updated.
pub fn run(db: &dyn StoreDb, source: &dyn ZipMetadataSource, options: &MetadataOptions) -> Result<usize> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(options.concurrency.max(1))
        .build()
        .context("Failed to start lookup workers")?;

    let mut total = 0;
    let mut batch = 0;
    loop {
        batch += 1;
        let zips = db
            .zipcodes_missing_metadata(options.limit)
            .context("Failed to load ZIP codes missing metadata")?;
        if zips.is_empty() {
            info!(batch, "no ZIP codes left without metadata");
            break;
        }

        eprintln!("Batch {batch}: looking up {} ZIP codes...", zips.len());
        let found = pool.install(|| lookup(source, &zips, options.delay));
        let updated = store(db, found, options.dry_run);
        total += updated;
        info!(batch, updated, missing = zips.len() - updated, "batch done");

        if !options.repeat {
            break;
        }
        if options.max_batches.is_some_and(|x| batch >= x) {
            warn!(batch, "reached batch limit, stopping");
            break;
        }
        // a dry run or a batch of failed lookups would select the same rows forever
        if updated == 0 || options.dry_run {
            warn!("nothing updated in this batch, stopping");
            break;
        }
        sleep(options.pause_between_batches);
    }

    Ok(total)
}

fn lookup(source: &dyn ZipMetadataSource, zips: &[ZipCode], delay: Duration) -> Vec<(ZipCode, ZipMetadata)> {
    let pb = ProgressBar::new(zips.len() as u64).with_style(progress_style());
    let found = zips
        .par_iter()
        .filter_map(|zip| {
            let result = source.metadata(zip);
            pb.inc(1);
            match result {
                Ok(x) => {
                    sleep(delay);
                    Some((zip.clone(), x))
                }
                Err(e) => {
                    warn!(%zip, "lookup failed: {e}");
                    None
                }
            }
        })
        .collect();
    pb.finish_and_clear();
    found
}

fn store(db: &dyn StoreDb, found: Vec<(ZipCode, ZipMetadata)>, dry_run: bool) -> usize {
    let mut updated = 0;
    for (zip, metadata) in found {
        if dry_run {
            info!(%zip, city = ?metadata.city, state = ?metadata.state, geom = %metadata.geom, "dry run, not updating");
            updated += 1;
            continue;
        }
        match db.update_zip_metadata(&zip, &metadata) {
            Ok(()) => updated += 1,
            Err(e) => warn!(%zip, "update failed: {e}"),
        }
    }
    updated
}
