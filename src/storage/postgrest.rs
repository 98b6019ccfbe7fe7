use std::time::Duration;

use _model::{Brand, ScrapedZip, StoreRecord, TargetReason, TargetZipEntry, ZipCode, ZipMetadata};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use ureq::Request;

use super::{ExistingStore, GeometryUpdate, PendingStore, RowId, StorageError, StoreDb};
use crate::http::RetryAgent;

const PAGE_SIZE: usize = 1000;
/// Values per `in.(...)` filter, keeping urls a sane length.
const IN_CHUNK: usize = 200;

const STORES: &str = "grocery_stores";
const SCRAPED: &str = "scraped_zipcodes";
const TARGETS: &str = "target_zipcodes";

const STORE_KEY_COLUMNS: &str = "name,zip_code,address";
const PENDING_COLUMNS: &str = "id,store_enum,name,zip_code,address,geom,failure_count";
const TARGET_COLUMNS: &str = "zip_code,reason,priority,user_count";
const NEEDS_GEOMETRY: &str = r#"or(geom.is.null,address.like."ZIP * (centroid)")"#;

/// Client for a PostgREST endpoint, as exposed by Supabase.
pub struct Postgrest {
    http: RetryAgent,
    base: String,
    key: String,
}

type Filters<'a> = Vec<(&'a str, String)>;

#[derive(Serialize)]
struct MetadataUpdate<'a> {
    #[serde(flatten)]
    metadata: &'a ZipMetadata,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ZipRow {
    zip_code: Option<String>,
}

impl Postgrest {
    pub fn new(base: &str, key: &str) -> Self {
        Self {
            http: RetryAgent::new(3, 1.0, Duration::from_secs(60)),
            base: base.trim_end_matches('/').to_string(),
            key: key.to_string(),
        }
    }

    fn request(&self, method: &str, path: &str) -> Request {
        self.http
            .agent()
            .request(method, &format!("{}/rest/v1/{path}", self.base))
            .set("apikey", &self.key)
            .set("Authorization", &format!("Bearer {}", self.key))
    }

    fn select_page<T: DeserializeOwned>(
        &self,
        table: &str,
        columns: &str,
        filters: &Filters,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<T>, StorageError> {
        let operation = format!("select {table}");
        let mut request = self.request("GET", table).query("select", columns);
        for (k, v) in filters {
            request = request.query(k, v);
        }
        let request = request
            .query("limit", &limit.to_string())
            .query("offset", &offset.to_string());

        let response = self
            .http
            .send(request)
            .map_err(|x| StorageError::fetch(&operation, x))?;
        response
            .into_json()
            .map_err(|source| StorageError::Decode { operation, source })
    }

    /// Every row matching `filters`, fetched a page at a time.
    fn select_all<T: DeserializeOwned>(
        &self,
        table: &str,
        columns: &str,
        filters: Filters,
    ) -> Result<Vec<T>, StorageError> {
        let mut rows = Vec::new();
        loop {
            let page: Vec<T> = self.select_page(table, columns, &filters, PAGE_SIZE, rows.len())?;
            let done = page.len() < PAGE_SIZE;
            rows.extend(page);
            if done {
                debug!(table, rows = rows.len(), "selected");
                return Ok(rows);
            }
        }
    }

    fn write(
        &self,
        operation: &str,
        request: Request,
        body: impl Serialize,
    ) -> Result<(), StorageError> {
        self.http
            .send_json(request.set("Prefer", "return=minimal"), body)
            .map_err(|x| StorageError::fetch(operation, x))?;
        Ok(())
    }

    fn upsert(&self, table: &str, conflict: &str, rows: impl Serialize) -> Result<(), StorageError> {
        let request = self.request("POST", table).query("on_conflict", conflict);
        self.http
            .send_json(request.set("Prefer", "resolution=merge-duplicates,return=minimal"), rows)
            .map_err(|x| StorageError::fetch(format!("upsert {table}"), x))?;
        Ok(())
    }

    fn rpc(&self, name: &str, args: Value) -> Result<Value, StorageError> {
        let operation = format!("rpc {name}");
        let response = self
            .http
            .send_json(self.request("POST", &format!("rpc/{name}")), args)
            .map_err(|x| StorageError::fetch(&operation, x))?;

        let text = response.into_string().map_err(|source| StorageError::Decode {
            operation: operation.clone(),
            source,
        })?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|x| StorageError::Decode {
            operation,
            source: x.into(),
        })
    }

    fn zips_in(&self, table: &str, zips: &[ZipCode]) -> Result<Vec<ZipCode>, StorageError> {
        let mut found = Vec::new();
        for chunk in zips.chunks(IN_CHUNK) {
            let rows: Vec<ZipRow> =
                self.select_all(table, "zip_code", vec![("zip_code", in_list(chunk))])?;
            found.extend(
                rows.into_iter()
                    .filter_map(|x| ZipCode::normalize(x.zip_code.as_deref()?)),
            );
        }
        Ok(found)
    }
}

fn in_list<T: ToString>(values: &[T]) -> String {
    format!(
        "in.({})",
        values
            .iter()
            .map(|x| format!("\"{}\"", x.to_string()))
            .join(",")
    )
}

fn brand_filters<'a>(filters: &mut Filters<'a>, brands: Option<&[Brand]>) {
    if let Some(brands) = brands {
        filters.push(("store_enum", in_list(brands)));
    }
}

/// Reads a procedure result that is either a bare number or a row set.
fn count_result(value: &Value) -> u64 {
    match value {
        Value::Number(x) => x.as_u64().unwrap_or(0),
        Value::Array(x) => x.len() as u64,
        _ => 0,
    }
}

/// Ids returned as scalars or as `{ "id": .. }` rows.
fn id_result(value: Value) -> Vec<RowId> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|x| match x {
            Value::Object(mut row) => row.remove("id"),
            x => Some(x),
        })
        .filter_map(|x| serde_json::from_value(x).ok())
        .collect()
}

impl StoreDb for Postgrest {
    fn existing_stores(
        &self,
        brand: Brand,
        zips: Option<&[ZipCode]>,
    ) -> Result<Vec<ExistingStore>, StorageError> {
        let base = vec![("store_enum", format!("eq.{brand}")), ("order", "id".to_string())];
        let Some(zips) = zips else {
            return self.select_all(STORES, STORE_KEY_COLUMNS, base);
        };

        let mut rows = Vec::new();
        for chunk in zips.chunks(IN_CHUNK) {
            let mut filters = base.clone();
            filters.push(("zip_code", in_list(chunk)));
            rows.extend(self.select_all::<ExistingStore>(STORES, STORE_KEY_COLUMNS, filters)?);
        }
        Ok(rows)
    }

    fn insert_stores(&self, batch: &[StoreRecord]) -> Result<(), StorageError> {
        self.write("insert grocery_stores", self.request("POST", STORES), batch)
    }

    fn upsert_scraped_zips(&self, rows: &[ScrapedZip]) -> Result<(), StorageError> {
        self.upsert(SCRAPED, "zip_code", rows)
    }

    fn target_zipcodes(&self) -> Result<Vec<TargetZipEntry>, StorageError> {
        self.select_all(
            TARGETS,
            TARGET_COLUMNS,
            vec![("order", "priority.desc,zip_code".to_string())],
        )
    }

    fn stores_needing_geometry(
        &self,
        brands: Option<&[Brand]>,
        max_failures: u32,
    ) -> Result<Vec<PendingStore>, StorageError> {
        // a null failure_count has never failed
        let mut filters = vec![
            (
                "and",
                format!("({NEEDS_GEOMETRY},or(failure_count.lt.{max_failures},failure_count.is.null))"),
            ),
            ("order", "id".to_string()),
        ];
        brand_filters(&mut filters, brands);
        self.select_all(STORES, PENDING_COLUMNS, filters)
    }

    fn count_permanently_skipped(
        &self,
        brands: Option<&[Brand]>,
        max_failures: u32,
    ) -> Result<usize, StorageError> {
        let mut filters = vec![
            ("and", format!("({NEEDS_GEOMETRY},failure_count.gte.{max_failures})")),
            ("order", "id".to_string()),
        ];
        brand_filters(&mut filters, brands);
        let rows: Vec<Value> = self.select_all(STORES, "id", filters)?;
        Ok(rows.len())
    }

    fn centroid_markers(&self, brand: Brand) -> Result<Vec<ExistingStore>, StorageError> {
        self.select_all(
            STORES,
            STORE_KEY_COLUMNS,
            vec![
                ("store_enum", format!("eq.{brand}")),
                ("address", "like.ZIP * (centroid)".to_string()),
                ("order", "id".to_string()),
            ],
        )
    }

    fn update_store(&self, id: &RowId, update: &GeometryUpdate) -> Result<(), StorageError> {
        let request = self.request("PATCH", STORES).query("id", &format!("eq.{id}"));
        self.write("update grocery_stores", request, update)
    }

    fn increment_geocoding_failures(&self, ids: &[RowId]) -> Result<Vec<RowId>, StorageError> {
        let result = self.rpc("increment_geocoding_failures", json!({ "ids": ids }))?;
        Ok(id_result(result))
    }

    fn update_target_zipcodes(&self) -> Result<u64, StorageError> {
        Ok(count_result(&self.rpc("update_target_zipcodes", json!({}))?))
    }

    fn add_neighbor_zipcodes(&self, radius: u32) -> Result<u64, StorageError> {
        Ok(count_result(&self.rpc("add_neighbor_zipcodes", json!({ "radius": radius }))?))
    }

    fn unscraped_target_count(&self) -> Result<u64, StorageError> {
        Ok(count_result(&self.rpc("get_unscraped_target_zipcodes_count", json!({}))?))
    }

    fn upsert_targets(&self, rows: &[TargetZipEntry]) -> Result<(), StorageError> {
        self.upsert(TARGETS, "zip_code", rows)
    }

    fn targets_by_reason(&self, reasons: &[TargetReason]) -> Result<Vec<TargetZipEntry>, StorageError> {
        let reasons = reasons.iter().map(|x| x.as_str()).collect_vec();
        self.select_all(
            TARGETS,
            TARGET_COLUMNS,
            vec![
                ("reason", in_list(&reasons)),
                ("order", "priority.desc,zip_code".to_string()),
            ],
        )
    }

    fn scraped_zipcodes_in(&self, zips: &[ZipCode]) -> Result<Vec<ZipCode>, StorageError> {
        self.zips_in(SCRAPED, zips)
    }

    fn delete_targets(&self, reason: TargetReason, unused_only: bool) -> Result<(), StorageError> {
        let mut request = self
            .request("DELETE", TARGETS)
            .query("reason", &format!("eq.{}", reason.as_str()));
        if unused_only {
            request = request.query("user_count", "eq.0");
        }
        self.http
            .send(request)
            .map_err(|x| StorageError::fetch("delete target_zipcodes", x))?;
        Ok(())
    }

    fn zipcodes_missing_metadata(&self, limit: usize) -> Result<Vec<ZipCode>, StorageError> {
        let filters = vec![
            ("or", "(geom.is.null,city.is.null)".to_string()),
            ("order", "zip_code".to_string()),
        ];
        let rows: Vec<ZipRow> = self.select_page(SCRAPED, "zip_code", &filters, limit, 0)?;
        Ok(rows
            .into_iter()
            .filter_map(|x| ZipCode::normalize(x.zip_code.as_deref()?))
            .collect())
    }

    fn update_zip_metadata(&self, zip: &ZipCode, metadata: &ZipMetadata) -> Result<(), StorageError> {
        let request = self
            .request("PATCH", SCRAPED)
            .query("zip_code", &format!("eq.{zip}"));
        let body = MetadataUpdate {
            metadata,
            updated_at: Utc::now(),
        };
        self.write("update scraped_zipcodes", request, body)
    }
}
