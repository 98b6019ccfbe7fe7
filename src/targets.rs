use std::{
    collections::{BTreeMap, HashSet},
    fmt::{self, Write},
};

use _model::{TargetReason, TargetZipEntry, ZipCode};
use anyhow::Result;
use itertools::Itertools;
use tracing::{info, warn};

use crate::storage::{StorageError, StoreDb};

/// ZIP codes an import is allowed to write.
#[derive(Debug)]
pub enum ZipScope {
    Nationwide,
    /// Ordered by priority, highest first.
    Restricted {
        zips: Vec<ZipCode>,
        set: HashSet<ZipCode>,
    },
}

impl ZipScope {
    pub fn explicit(zips: impl IntoIterator<Item = ZipCode>) -> Self {
        let zips = zips.into_iter().unique().collect_vec();
        let set = zips.iter().cloned().collect();
        Self::Restricted { zips, set }
    }

    /// Targets from `target_zipcodes`, or nationwide when there are none or
    /// they can't be read.
    pub fn load(db: &dyn StoreDb, nationwide: bool) -> Self {
        if nationwide {
            info!("nationwide import requested");
            return Self::Nationwide;
        }

        match db.target_zipcodes() {
            Ok(targets) if targets.is_empty() => {
                info!("no target ZIP codes, importing nationwide");
                Self::Nationwide
            }
            Ok(targets) => {
                let scope = Self::explicit(targets.into_iter().map(|x| x.zip_code));
                info!(zips = scope.len(), "restricting import to target ZIP codes");
                scope
            }
            Err(error) => {
                warn!("could not load target ZIP codes, importing nationwide: {error}");
                Self::Nationwide
            }
        }
    }

    pub fn contains(&self, zip: &ZipCode) -> bool {
        match self {
            Self::Nationwide => true,
            Self::Restricted { set, .. } => set.contains(zip),
        }
    }

    pub fn zips(&self) -> Option<&[ZipCode]> {
        match self {
            Self::Nationwide => None,
            Self::Restricted { zips, .. } => Some(zips),
        }
    }

    pub fn len(&self) -> usize {
        self.zips().map_or(0, |x| x.len())
    }

    pub fn is_restricted(&self) -> bool {
        matches!(self, Self::Restricted { .. })
    }
}

#[derive(Debug, Default)]
pub struct RefreshReport {
    pub processed: u64,
    pub neighbors_added: Option<u64>,
    pub by_reason: BTreeMap<&'static str, usize>,
    pub unscraped: Option<u64>,
    pub top: Vec<TargetZipEntry>,
}

impl fmt::Display for RefreshReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        writeln!(out, "## Target ZIP codes")?;
        writeln!(out, "Processed: {}", self.processed)?;
        if let Some(x) = self.neighbors_added {
            writeln!(out, "Neighbors added: {x}")?;
        }
        for (reason, count) in &self.by_reason {
            writeln!(out, "{reason}: {count}")?;
        }
        if let Some(x) = self.unscraped {
            writeln!(out, "Not yet scraped: {x}")?;
        }
        if !self.top.is_empty() {
            writeln!(out, "\n## Top {} by priority", self.top.len())?;
            for x in &self.top {
                writeln!(
                    out,
                    "{} {:>8.1} users={} ({})",
                    x.zip_code,
                    x.priority,
                    x.user_count,
                    x.reason.as_str()
                )?;
            }
        }
        f.write_str(&out)
    }
}

/// Rebuilds `target_zipcodes` from user locations and optionally pads it with neighbours.
pub fn refresh(db: &dyn StoreDb, neighbors: bool, radius: u32) -> Result<RefreshReport> {
    let mut report = RefreshReport {
        processed: db.update_target_zipcodes()?,
        ..Default::default()
    };
    info!(processed = report.processed, "updated target ZIP codes");

    if report.processed > 0 && neighbors {
        match db.add_neighbor_zipcodes(radius) {
            Ok(x) => {
                info!(added = x, radius, "added neighboring ZIP codes");
                report.neighbors_added = Some(x);
            }
            Err(error) => warn!("could not add neighboring ZIP codes: {error}"),
        }
    }

    let targets = db.target_zipcodes()?;
    for x in &targets {
        *report.by_reason.entry(x.reason.as_str()).or_default() += 1;
    }
    report.unscraped = match db.unscraped_target_count() {
        Ok(x) => Some(x),
        Err(error) => {
            warn!("unscraped count procedure failed, counting directly: {error}");
            unscraped_directly(db, &targets).ok()
        }
    };
    report.top = targets.into_iter().take(10).collect();

    Ok(report)
}

fn unscraped_directly(db: &dyn StoreDb, targets: &[TargetZipEntry]) -> Result<u64, StorageError> {
    let zips = targets.iter().map(|x| x.zip_code.clone()).unique().collect_vec();
    let scraped: HashSet<ZipCode> = db.scraped_zipcodes_in(&zips)?.into_iter().collect();
    Ok(zips.iter().filter(|x| !scraped.contains(*x)).count() as u64)
}

#[derive(Clone, Debug)]
pub struct ExpandOptions {
    pub radius: u32,
    pub cleanup: bool,
    pub skip_existing: bool,
}

/// Seeds event-trigger targets, grows them by neighbours, and returns the
/// ZIPs worth scraping. Storage failures fall back to the seeds.
pub fn expand(db: &dyn StoreDb, seeds: &[ZipCode], options: &ExpandOptions) -> Vec<ZipCode> {
    match try_expand(db, seeds, options) {
        Ok(x) => x,
        Err(error) => {
            warn!("could not expand ZIP codes, using the seeds only: {error}");
            seeds.iter().cloned().unique().collect()
        }
    }
}

fn try_expand(
    db: &dyn StoreDb,
    seeds: &[ZipCode],
    options: &ExpandOptions,
) -> Result<Vec<ZipCode>, StorageError> {
    let rows = seeds
        .iter()
        .unique()
        .map(|x| TargetZipEntry::event_trigger(x.clone()))
        .collect_vec();
    db.upsert_targets(&rows)?;
    info!(seeds = rows.len(), "inserted event trigger ZIP codes");

    match db.add_neighbor_zipcodes(options.radius) {
        Ok(x) => info!(added = x, radius = options.radius, "added neighboring ZIP codes"),
        Err(error) => warn!("could not add neighboring ZIP codes, continuing with seeds: {error}"),
    }

    let mut zips = db
        .targets_by_reason(&[TargetReason::EventTrigger, TargetReason::Neighbor])?
        .into_iter()
        .map(|x| x.zip_code)
        .unique()
        .collect_vec();
    if zips.is_empty() {
        zips = rows.into_iter().map(|x| x.zip_code).collect();
    }
    info!(zips = zips.len(), seeds = seeds.len(), "expanded ZIP codes");

    if options.skip_existing && !zips.is_empty() {
        let scraped: HashSet<ZipCode> = db.scraped_zipcodes_in(&zips)?.into_iter().collect();
        zips.retain(|x| !scraped.contains(x));
        info!(skipped = scraped.len(), remaining = zips.len(), "dropped already scraped ZIP codes");
    }

    if options.cleanup {
        db.delete_targets(TargetReason::EventTrigger, false)?;
        db.delete_targets(TargetReason::Neighbor, true)?;
        info!("removed temporary target rows");
    }

    Ok(zips)
}
