use std::time::Duration;

use _model::{point_literal, ZipCode, ZipMetadata};
use geo::Point;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use thiserror::Error;

use crate::http::{FetchError, RetryAgent};

const GOOGLE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const ZIPPOPOTAM_URL: &str = "https://api.zippopotam.us/us";

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("geocoder answered {0}")]
    Status(String),

    #[error("no places returned")]
    NoResult,

    #[error("unreadable response: {0}")]
    Decode(#[from] std::io::Error),
}

/// Looks up the centroid of a ZIP code.
pub trait ZipGeocoder {
    fn centroid(&self, zip: &ZipCode) -> Result<Point, GeocodeError>;
}

/// Looks up city, state and centroid of a ZIP code. Shared across worker threads.
pub trait ZipMetadataSource: Sync {
    fn metadata(&self, zip: &ZipCode) -> Result<ZipMetadata, GeocodeError>;
}

pub struct GoogleGeocoder {
    http: RetryAgent,
    key: String,
}

#[derive(Deserialize)]
struct GoogleResponse {
    status: String,
    #[serde(default)]
    results: Vec<GoogleResult>,
}

#[derive(Deserialize)]
struct GoogleResult {
    geometry: GoogleGeometry,
}

#[derive(Deserialize)]
struct GoogleGeometry {
    location: LatLng,
}

#[derive(Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

impl GoogleResponse {
    fn point(self) -> Result<Point, GeocodeError> {
        if self.status != "OK" {
            return Err(GeocodeError::Status(self.status));
        }
        let location = &self.results.first().ok_or(GeocodeError::NoResult)?.geometry.location;
        Ok(Point::new(location.lng, location.lat))
    }
}

impl GoogleGeocoder {
    pub fn new(key: &str) -> Self {
        Self {
            http: RetryAgent::new(2, 1.0, Duration::from_secs(10)),
            key: key.to_string(),
        }
    }
}

impl ZipGeocoder for GoogleGeocoder {
    fn centroid(&self, zip: &ZipCode) -> Result<Point, GeocodeError> {
        let request = self
            .http
            .agent()
            .get(GOOGLE_URL)
            .query("address", zip.as_str())
            .query("key", &self.key);
        let response: GoogleResponse = self.http.send(request)?.into_json()?;
        response.point()
    }
}

/// The key-free zippopotam.us service.
pub struct Zippopotam {
    http: RetryAgent,
    base: String,
}

#[derive(Deserialize)]
struct ZippopotamResponse {
    #[serde(default)]
    places: Vec<Place>,
}

#[serde_as]
#[derive(Deserialize)]
struct Place {
    #[serde(rename = "place name")]
    place_name: Option<String>,
    #[serde(rename = "state abbreviation")]
    state: Option<String>,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    latitude: f64,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    longitude: f64,
}

impl ZippopotamResponse {
    fn metadata(self) -> Result<ZipMetadata, GeocodeError> {
        let place = self.places.into_iter().next().ok_or(GeocodeError::NoResult)?;
        Ok(ZipMetadata {
            city: place.place_name,
            state: place.state,
            latitude: place.latitude,
            longitude: place.longitude,
            geom: point_literal(&Point::new(place.longitude, place.latitude)),
        })
    }
}

impl Zippopotam {
    pub fn new() -> Self {
        Self {
            http: RetryAgent::new(3, 2.0, Duration::from_secs(15)),
            base: ZIPPOPOTAM_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base(base: &str) -> Self {
        Self {
            http: RetryAgent::new(0, 0.0, Duration::from_secs(5)),
            base: base.to_string(),
        }
    }
}

impl ZipMetadataSource for Zippopotam {
    fn metadata(&self, zip: &ZipCode) -> Result<ZipMetadata, GeocodeError> {
        let response: ZippopotamResponse = self
            .http
            .get(&format!("{}/{zip}", self.base))?
            .into_json()?;
        response.metadata()
    }
}

impl ZipGeocoder for Zippopotam {
    fn centroid(&self, zip: &ZipCode) -> Result<Point, GeocodeError> {
        let x = self.metadata(zip)?;
        Ok(Point::new(x.longitude, x.latitude))
    }
}

/// Google when a key is configured, zippopotam.us otherwise.
pub fn geocoder(google_key: Option<&str>) -> Box<dyn ZipGeocoder> {
    match google_key.map(str::trim).filter(|x| !x.is_empty()) {
        Some(key) => Box::new(GoogleGeocoder::new(key)),
        None => Box::new(Zippopotam::new()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::http::testing::Responder;

    #[test]
    fn google_location() {
        let response: GoogleResponse = serde_json::from_value(json!({
            "status": "OK",
            "results": [{ "geometry": { "location": { "lat": 40.42, "lng": -86.91 } } }],
        }))
        .unwrap();
        let point = response.point().unwrap();
        assert_eq!((point.x(), point.y()), (-86.91, 40.42));
    }

    #[test]
    fn google_non_ok_status() {
        let response: GoogleResponse =
            serde_json::from_value(json!({ "status": "ZERO_RESULTS", "results": [] })).unwrap();
        assert!(matches!(response.point(), Err(GeocodeError::Status(x)) if x == "ZERO_RESULTS"));
    }

    #[test]
    fn zippopotam_place() {
        let response: ZippopotamResponse = serde_json::from_value(json!({
            "post code": "47906",
            "places": [{
                "place name": "West Lafayette",
                "state abbreviation": "IN",
                "latitude": "40.4478",
                "longitude": "-86.9276",
            }],
        }))
        .unwrap();
        let metadata = response.metadata().unwrap();
        assert_eq!(metadata.city.as_deref(), Some("West Lafayette"));
        assert_eq!(metadata.state.as_deref(), Some("IN"));
        assert_eq!(metadata.geom, "POINT(-86.9276 40.4478)");
    }

    #[test]
    fn zippopotam_lookup() {
        let body = r#"{"places":[{"place name":"New York","state abbreviation":"NY","latitude":40.7484,"longitude":-73.9967}]}"#;
        let server = Responder::start(vec![("/10001", 200, body)]);
        let zippopotam = Zippopotam::with_base(&server.base);

        let point = zippopotam.centroid(&"10001".parse().unwrap()).unwrap();
        assert_eq!((point.x(), point.y()), (-73.9967, 40.7484));

        let missing = zippopotam.metadata(&"00000".parse().unwrap()).unwrap_err();
        assert!(matches!(missing, GeocodeError::Fetch(x) if x.status() == Some(404)));
    }
}
