use std::{
    collections::BTreeMap,
    fmt,
    io::{BufReader, Read},
};

use _model::{Brand, StoreRecord, ZipCode};
use geo::Point;
use serde::{
    de::{DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor},
    Deserialize, Deserializer,
};
use serde_json::Value;

const NAME: &[&str] = &["name", "brand"];
const POSTCODE: &[&str] = &["addr:postcode", "postcode"];
const STREET: &[&str] = &["addr:street", "street"];
const HOUSENUMBER: &[&str] = &["addr:housenumber", "housenumber"];
const CITY: &[&str] = &["addr:city", "city"];
const STATE: &[&str] = &["addr:state", "state"];

/// One entry of a GeoJSON `FeatureCollection`.
#[derive(Debug, Default, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub properties: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    pub coordinates: Option<Value>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    MissingName,
    MissingZip,
    MissingGeometry,
}

impl Feature {
    /// First non-blank property among `keys`, trimmed.
    fn property(&self, keys: &[&str]) -> Option<String> {
        let properties = self.properties.as_ref()?;
        keys.iter()
            .filter_map(|k| match properties.get(*k)? {
                Value::String(x) => Some(x.trim().to_string()),
                Value::Number(x) => Some(x.to_string()),
                _ => None,
            })
            .find(|x| !x.is_empty())
    }

    pub fn zip_code(&self) -> Option<ZipCode> {
        ZipCode::normalize(&self.property(POSTCODE)?)
    }

    /// The feature's position when it is exactly a `[longitude, latitude]` pair.
    pub fn point(&self) -> Option<Point> {
        let coordinates = self.geometry.as_ref()?.coordinates.as_ref()?.as_array()?;
        match coordinates.as_slice() {
            [lon, lat] => {
                let (lon, lat) = (lon.as_f64()?, lat.as_f64()?);
                (lon.is_finite() && lat.is_finite()).then(|| Point::new(lon, lat))
            }
            _ => None,
        }
    }

    pub fn street_address(&self) -> Option<String> {
        match (self.property(HOUSENUMBER), self.property(STREET)) {
            (Some(number), Some(street)) => Some(format!("{number} {street}")),
            (None, Some(street)) => Some(street),
            _ => None,
        }
    }
}

/// Turns a feature into a store row for `brand`.
pub fn parse_store(feature: &Feature, brand: Brand) -> Result<StoreRecord, Rejection> {
    let name = feature.property(NAME).ok_or(Rejection::MissingName)?;
    let zip_code = feature.zip_code().ok_or(Rejection::MissingZip)?;
    let point = feature.point().ok_or(Rejection::MissingGeometry)?;

    Ok(StoreRecord {
        brand,
        name,
        street_address: feature.street_address(),
        city: feature.property(CITY),
        state: feature.property(STATE),
        zip_code,
        geometry: Some(point),
        failure_count: 0,
    })
}

/// Streams the `features` array of a `FeatureCollection`, handing each
/// feature to `sink` as soon as it is parsed. Returns how many were seen.
pub fn for_each_feature<R: Read>(reader: R, sink: &mut dyn FnMut(Feature)) -> serde_json::Result<usize> {
    let mut de = serde_json::Deserializer::from_reader(BufReader::new(reader));
    let count = (&mut de).deserialize_map(CollectionVisitor { sink })?;
    de.end()?;
    Ok(count)
}

struct CollectionVisitor<'a> {
    sink: &'a mut dyn FnMut(Feature),
}

impl<'de, 'a> Visitor<'de> for CollectionVisitor<'a> {
    type Value = usize;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a GeoJSON FeatureCollection")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<usize, A::Error> {
        let sink = self.sink;
        let mut count = 0;
        while let Some(key) = map.next_key::<String>()? {
            if key == "features" {
                count += map.next_value_seed(FeatureSeq { sink: &mut *sink })?;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(count)
    }
}

struct FeatureSeq<'a> {
    sink: &'a mut dyn FnMut(Feature),
}

impl<'de, 'a> DeserializeSeed<'de> for FeatureSeq<'a> {
    type Value = usize;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<usize, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, 'a> Visitor<'de> for FeatureSeq<'a> {
    type Value = usize;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of features")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<usize, A::Error> {
        let sink = self.sink;
        let mut count = 0;
        while let Some(feature) = seq.next_element::<Feature>()? {
            sink(feature);
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
pub fn feature(properties: Value, coordinates: Value) -> Feature {
    serde_json::from_value(serde_json::json!({
        "type": "Feature",
        "properties": properties,
        "geometry": { "type": "Point", "coordinates": coordinates },
    }))
    .unwrap()
}
