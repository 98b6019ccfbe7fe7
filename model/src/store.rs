use geo::Point;
use serde::{Serialize, Serializer};

use crate::{Brand, ZipCode};

/// A row of `grocery_stores` as written by the importer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoreRecord {
    #[serde(rename = "store_enum")]
    pub brand: Brand,
    pub name: String,
    #[serde(rename = "address")]
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: ZipCode,
    #[serde(rename = "geom", serialize_with = "serialize_point")]
    pub geometry: Option<Point>,
    pub failure_count: u32,
}

/// Well-known-text for a point, longitude first: `POINT(-86.9 40.4)`.
pub fn point_literal(point: &Point) -> String {
    format!("POINT({} {})", point.x(), point.y())
}

fn serialize_point<S: Serializer>(point: &Option<Point>, s: S) -> Result<S::Ok, S::Error> {
    match point {
        Some(x) => s.serialize_str(&point_literal(x)),
        None => s.serialize_none(),
    }
}
