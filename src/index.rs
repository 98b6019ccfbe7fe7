use std::collections::HashSet;

use _model::{Brand, StoreRecord, ZipCode};
use tracing::warn;

use crate::storage::{ExistingStore, StorageError, StoreDb};

/// `"<brand>:<lower-trim name>:<zip5>"`
pub fn store_key(brand: &str, name: &str, zip: &str) -> String {
    let zip = ZipCode::normalize(zip);
    format!(
        "{brand}:{}:{}",
        name.trim().to_lowercase(),
        zip.as_ref().map_or("", |x| x.as_str())
    )
}

#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Duplicate,
}

/// Stores already present, by identity key and by address-less `(brand, zip)` slot.
#[derive(Default)]
pub struct KeyIndex {
    keys: HashSet<String>,
    addressless: HashSet<(Brand, ZipCode)>,
}

impl KeyIndex {
    pub fn load(
        db: &dyn StoreDb,
        brands: &[Brand],
        zips: Option<&[ZipCode]>,
    ) -> Result<Self, StorageError> {
        let mut index = Self::default();
        for &brand in brands {
            for row in db.existing_stores(brand, zips)? {
                index.insert_existing(brand, &row);
            }
        }
        Ok(index)
    }

    fn insert_existing(&mut self, brand: Brand, row: &ExistingStore) {
        let zip = row.zip_code.as_deref().unwrap_or_default();
        self.keys.insert(store_key(
            brand.slug(),
            row.name.as_deref().unwrap_or_default(),
            zip,
        ));

        let addressless = row.address.as_deref().map_or(true, |x| x.trim().is_empty());
        if let (true, Some(zip)) = (addressless, ZipCode::normalize(zip)) {
            self.addressless.insert((brand, zip));
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Claims the record's key, and its `(brand, zip)` slot when it has no street address.
    pub fn admit(&mut self, record: &StoreRecord) -> Admission {
        let key = store_key(record.brand.slug(), &record.name, record.zip_code.as_str());
        if self.keys.contains(&key) {
            return Admission::Duplicate;
        }

        if record.street_address.is_none() && !self.claim_addressless(record.brand, &record.zip_code) {
            return Admission::Duplicate;
        }

        self.keys.insert(key);
        Admission::Accepted
    }

    /// Takes the address-less slot of `(brand, zip)`, false when a store already holds it.
    pub fn claim_addressless(&mut self, brand: Brand, zip: &ZipCode) -> bool {
        self.addressless.insert((brand, zip.clone()))
    }
}

/// `(brand, zip, marker)` triples already used as an address.
#[derive(Default)]
pub struct CentroidMarkers(HashSet<(Brand, ZipCode, String)>);

impl CentroidMarkers {
    pub fn load(db: &dyn StoreDb, brands: &[Brand]) -> Result<Self, StorageError> {
        let mut markers = Self::default();
        for &brand in brands {
            for row in db.centroid_markers(brand)? {
                let (Some(zip), Some(address)) = (
                    row.zip_code.as_deref().and_then(ZipCode::normalize),
                    row.address,
                ) else {
                    warn!(%brand, "centroid marker row without a ZIP");
                    continue;
                };
                markers.0.insert((brand, zip, address));
            }
        }
        Ok(markers)
    }

    /// Takes `zip`'s marker for `brand`, returning it unless another row holds it.
    pub fn claim(&mut self, brand: Brand, zip: &ZipCode) -> Option<String> {
        let marker = zip.centroid_marker();
        self.0
            .insert((brand, zip.clone(), marker.clone()))
            .then_some(marker)
    }
}
