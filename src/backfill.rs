use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    thread::sleep,
};

use _model::{point_literal, Brand, ZipCode};
use anyhow::{Context, Result};
use geo::Point;
use itertools::Itertools;
use tracing::{debug, error, info, warn};

use crate::{
    geocode::ZipGeocoder,
    import::Pacing,
    index::{CentroidMarkers, KeyIndex},
    spiders::{DatasetError, FeatureSource},
    stats::BackfillStats,
    storage::{is_centroid_marker, GeometryUpdate, PendingStore, RowId, StoreDb},
};

/// Misses after which a store is no longer attempted.
pub const MAX_FAILURES: u32 = 3;

#[derive(Clone, Debug)]
pub struct BackfillOptions {
    pub brands: Option<Vec<Brand>>,
    pub dry_run: bool,
    pub pacing: Pacing,
}

#[derive(Clone, Debug, PartialEq)]
struct PreciseMatch {
    point: Point,
    street_address: Option<String>,
}

/// What a run decided for one store.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// Dataset coordinates for a store that had none.
    Precise(GeometryUpdate),
    /// Dataset coordinates replacing a centroid.
    Upgraded(GeometryUpdate),
    /// Newly placed at its ZIP centroid.
    Centroid(GeometryUpdate),
    /// Already at its centroid and no better match found.
    KeptCentroid,
    Failed,
}

impl Resolution {
    fn update(&self) -> Option<&GeometryUpdate> {
        match self {
            Self::Precise(x) | Self::Upgraded(x) | Self::Centroid(x) => Some(x),
            Self::KeptCentroid | Self::Failed => None,
        }
    }

    /// Everything short of dataset coordinates counts as a miss.
    fn is_miss(&self) -> bool {
        matches!(self, Self::Centroid(_) | Self::KeptCentroid | Self::Failed)
    }
}

/// Pending stores of one brand, bucketed by ZIP. Each bucket hands out its
/// stores front first, so the first store in a ZIP takes the first feature.
struct ZipBuckets {
    stores: Vec<PendingStore>,
    matches: Vec<Option<PreciseMatch>>,
    buckets: HashMap<ZipCode, VecDeque<usize>>,
}

impl ZipBuckets {
    fn new(stores: Vec<PendingStore>) -> Self {
        let mut buckets: HashMap<ZipCode, VecDeque<usize>> = HashMap::new();
        for (i, store) in stores.iter().enumerate() {
            if let Some(zip) = store.zip() {
                buckets.entry(zip).or_default().push_back(i);
            }
        }
        Self {
            matches: vec![None; stores.len()],
            stores,
            buckets,
        }
    }

    fn claim(&mut self, zip: &ZipCode, found: PreciseMatch) -> bool {
        let Some(bucket) = self.buckets.get_mut(zip) else {
            return false;
        };
        let Some(i) = bucket.pop_front() else {
            return false;
        };
        if bucket.is_empty() {
            self.buckets.remove(zip);
        }
        self.matches[i] = Some(found);
        true
    }

    fn into_parts(self) -> impl Iterator<Item = (PendingStore, Option<PreciseMatch>)> {
        self.stores.into_iter().zip(self.matches)
    }
}

/// Resolves coordinates for stores without a precise location.
pub fn run(
    db: &dyn StoreDb,
    source: &dyn FeatureSource,
    geocoder: &dyn ZipGeocoder,
    options: &BackfillOptions,
) -> Result<BackfillStats> {
    let mut stats = BackfillStats::default();
    let brands = options.brands.as_deref();

    match db.count_permanently_skipped(brands, MAX_FAILURES) {
        Ok(x) => stats.permanently_skipped = x,
        Err(e) => warn!("could not count permanently skipped stores: {e}"),
    }
    let pending = db
        .stores_needing_geometry(brands, MAX_FAILURES)
        .context("Failed to load stores missing geometry")?;
    info!(
        stores = pending.len(),
        permanently_skipped = stats.permanently_skipped,
        "loaded stores missing geometry"
    );
    if pending.is_empty() {
        return Ok(stats);
    }

    let mut by_brand: BTreeMap<Brand, Vec<PendingStore>> = BTreeMap::new();
    for store in pending {
        match store.store_enum.parse::<Brand>() {
            Ok(brand) => by_brand.entry(brand).or_default().push(store),
            Err(e) => warn!(id = %store.id, "{e}"),
        }
    }

    let brand_list = by_brand.keys().copied().collect_vec();
    let mut markers =
        CentroidMarkers::load(db, &brand_list).context("Failed to load centroid markers")?;
    let mut centroids: HashMap<ZipCode, Option<Point>> = HashMap::new();
    let mut resolved: Vec<(RowId, Resolution)> = Vec::new();

    let total = by_brand.len();
    for (i, (brand, stores)) in by_brand.into_iter().enumerate() {
        info!("[{}/{}] {} stores of {}", i + 1, total, stores.len(), brand.name());

        let marked_zips = stores
            .iter()
            .filter(|x| x.address.as_deref().is_some_and(is_centroid_marker))
            .filter_map(PendingStore::zip)
            .unique()
            .collect_vec();
        let mut slots = address_slots(db, brand, &marked_zips);

        let mut buckets = ZipBuckets::new(stores);
        let result = source.stream(brand, &mut |feature| {
            let Some(zip) = feature.zip_code() else {
                return;
            };
            if !buckets.buckets.contains_key(&zip) {
                return;
            }
            let Some(point) = feature.point() else {
                return;
            };
            buckets.claim(
                &zip,
                PreciseMatch {
                    point,
                    street_address: feature.street_address(),
                },
            );
        });

        let mut transient = false;
        match result {
            Ok(features) => debug!(%brand, features, "streamed dataset"),
            Err(DatasetError::NotFound { .. }) => {
                warn!(%brand, "no dataset found, falling back to ZIP centroids")
            }
            Err(e) => {
                error!(%brand, "{e}");
                stats.errors += 1;
                transient = e.is_transient();
            }
        }

        for (store, found) in buckets.into_parts() {
            let resolution = match found {
                Some(x) => precise(brand, &store, x, &mut slots),
                None => fallback(brand, &store, geocoder, &mut centroids, &mut markers),
            };
            match &resolution {
                Resolution::Precise(_) => stats.precise_matches += 1,
                Resolution::Upgraded(_) => stats.centroid_upgrades += 1,
                Resolution::Centroid(_) => stats.zip_fallback += 1,
                Resolution::KeptCentroid => stats.kept_centroid += 1,
                Resolution::Failed => stats.failed += 1,
            }
            resolved.push((store.id, resolution));
        }

        if transient {
            info!(delay = ?options.pacing.after_error, "waiting after failure");
            sleep(options.pacing.after_error);
        }
        if i + 1 < total {
            sleep(options.pacing.between_brands);
        }
    }

    apply(db, &resolved, options.dry_run, &mut stats);
    Ok(stats)
}

fn precise(
    brand: Brand,
    store: &PendingStore,
    found: PreciseMatch,
    slots: &mut Option<KeyIndex>,
) -> Resolution {
    let current = store.address.as_deref().map(str::trim).filter(|x| !x.is_empty());
    let marked = current.is_some_and(is_centroid_marker);
    let address = match found.street_address {
        Some(street) if current.is_none() || marked => Some(Some(street)),
        // a marker left in place would select the row again on every run
        _ if marked => Some(unmarked_address(brand, store, slots)),
        _ => None,
    };
    debug!(id = %store.id, name = ?store.name, "matched dataset feature");

    let update = GeometryUpdate {
        geom: point_literal(&found.point),
        address,
    };
    if store.has_centroid() {
        Resolution::Upgraded(update)
    } else {
        Resolution::Precise(update)
    }
}

/// Null when the `(brand, zip)` address-less slot is free, else the store's
/// name with its ZIP.
fn unmarked_address(brand: Brand, store: &PendingStore, slots: &mut Option<KeyIndex>) -> Option<String> {
    let zip = store.zip();
    if let (Some(zip), Some(slots)) = (&zip, slots.as_mut()) {
        if slots.claim_addressless(brand, zip) {
            return None;
        }
    }

    let name = store.name.as_deref().unwrap_or(brand.name());
    Some(match zip {
        Some(zip) => format!("{name} ({zip})"),
        None => name.to_string(),
    })
}

/// Address-less slots in `zips`, or `None` when they can't be read, which
/// leaves every slot taken.
fn address_slots(db: &dyn StoreDb, brand: Brand, zips: &[ZipCode]) -> Option<KeyIndex> {
    if zips.is_empty() {
        return None;
    }
    KeyIndex::load(db, &[brand], Some(zips))
        .map_err(|e| warn!(%brand, "could not load address-less stores: {e}"))
        .ok()
}

fn fallback(
    brand: Brand,
    store: &PendingStore,
    geocoder: &dyn ZipGeocoder,
    centroids: &mut HashMap<ZipCode, Option<Point>>,
    markers: &mut CentroidMarkers,
) -> Resolution {
    let Some(zip) = store.zip() else {
        warn!(id = %store.id, name = ?store.name, failures = store.failure_count, "store has no ZIP code");
        return Resolution::Failed;
    };
    if store.has_centroid() {
        return Resolution::KeptCentroid;
    }

    let centroid = *centroids.entry(zip.clone()).or_insert_with(|| {
        geocoder
            .centroid(&zip)
            .map_err(|e| warn!(%zip, "could not geocode: {e}"))
            .ok()
    });
    let Some(point) = centroid else {
        debug!(id = %store.id, name = ?store.name, failures = store.failure_count, "no centroid");
        return Resolution::Failed;
    };

    let address = markers.claim(brand, &zip).map(Some);
    if address.is_none() {
        debug!(id = %store.id, %zip, "centroid marker taken, updating geometry only");
    }
    Resolution::Centroid(GeometryUpdate {
        geom: point_literal(&point),
        address,
    })
}

fn apply(db: &dyn StoreDb, resolved: &[(RowId, Resolution)], dry_run: bool, stats: &mut BackfillStats) {
    let updates = resolved
        .iter()
        .filter_map(|(id, x)| Some((id, x.update()?)))
        .collect_vec();
    info!(updates = updates.len(), "writing geometry");
    for (id, update) in updates {
        if dry_run {
            info!(%id, geom = %update.geom, address = ?update.address, "dry run, not updating");
        } else if let Err(e) = db.update_store(id, update) {
            error!(%id, "update failed: {e}");
            stats.errors += 1;
        }
    }

    let misses = resolved
        .iter()
        .filter(|(_, x)| x.is_miss())
        .map(|(id, _)| id.clone())
        .collect_vec();
    if misses.is_empty() {
        return;
    }
    if dry_run {
        info!(stores = misses.len(), "dry run, not incrementing failure counts");
        return;
    }

    match db.increment_geocoding_failures(&misses) {
        Ok(reached) => {
            stats.newly_skipped = reached.len();
            if !reached.is_empty() {
                info!(
                    ids = %reached.iter().join(", "),
                    "stores reached {MAX_FAILURES} failures and will be skipped from now on"
                );
            }
        }
        Err(e) => {
            error!(stores = misses.len(), "could not increment failure counts: {e}");
            stats.errors += 1;
        }
    }
}
