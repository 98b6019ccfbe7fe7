use std::{thread::sleep, time::Duration};

use _model::Brand;
use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::{
    features::parse_store,
    index::{Admission, KeyIndex},
    spiders::{DatasetError, FeatureSource},
    stats::ImportStats,
    storage::StoreDb,
    targets::ZipScope,
    writer::BatchWriter,
};

#[derive(Clone, Copy, Debug)]
pub struct Pacing {
    pub between_brands: Duration,
    pub after_error: Duration,
}

impl Pacing {
    pub const IMPORT: Self = Self {
        between_brands: Duration::from_secs(15),
        after_error: Duration::from_secs(60),
    };

    /// Shorter waits for small on-demand runs.
    pub const REALTIME: Self = Self {
        between_brands: Duration::from_secs(10),
        after_error: Duration::from_secs(15),
    };
}

#[derive(Clone, Debug)]
pub struct ImportOptions {
    pub brands: Vec<Brand>,
    /// Only prefetch existing stores inside the scope.
    pub realtime: bool,
    pub dry_run: bool,
    pub batch_size: usize,
    pub pacing: Pacing,
}

/// Streams every brand's dataset and inserts the stores not seen before.
pub fn run(
    db: &dyn StoreDb,
    source: &dyn FeatureSource,
    scope: &ZipScope,
    options: &ImportOptions,
) -> Result<ImportStats> {
    let mut stats = ImportStats {
        target_zipcodes: scope.is_restricted().then(|| scope.len()),
        ..Default::default()
    };
    if scope.is_restricted() && scope.len() == 0 {
        warn!("no ZIP codes to import");
        return Ok(stats);
    }

    let brands = &options.brands;
    let prefetch = if options.realtime { scope.zips() } else { None };
    let mut index = KeyIndex::load(db, brands, prefetch).context("Failed to load existing stores")?;
    info!(known = index.len(), brands = brands.len(), "loaded existing store keys");

    let mut writer = BatchWriter::new(db, options.batch_size, options.dry_run);
    for (i, &brand) in brands.iter().enumerate() {
        info!("[{}/{}] {} ({})", i + 1, brands.len(), brand.name(), brand.spider());

        let mut matched = 0;
        let result = source.stream(brand, &mut |feature| {
            let record = match parse_store(&feature, brand) {
                Ok(x) => x,
                Err(_) => {
                    stats.no_geometry += 1;
                    return;
                }
            };
            if !scope.contains(&record.zip_code) {
                stats.wrong_zipcode += 1;
                return;
            }
            match index.admit(&record) {
                Admission::Duplicate => stats.duplicates_skipped += 1,
                Admission::Accepted => {
                    matched += 1;
                    writer.push(record, &mut stats);
                }
            }
        });

        match result {
            Ok(features) => info!(%brand, features, matched, "processed dataset"),
            Err(DatasetError::NotFound { tried, .. }) => {
                warn!(%brand, tried = tried.len(), "no dataset found, skipping")
            }
            Err(e) => {
                error!(%brand, matched, "{e}");
                stats.errors += 1;
                if e.is_transient() {
                    info!(delay = ?options.pacing.after_error, "waiting after failure");
                    sleep(options.pacing.after_error);
                }
            }
        }

        if i + 1 < brands.len() {
            sleep(options.pacing.between_brands);
        }
    }

    writer.finish(&mut stats, Utc::now());
    Ok(stats)
}
