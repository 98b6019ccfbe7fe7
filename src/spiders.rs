use std::time::Duration;

use _model::Brand;
use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    features::{for_each_feature, Feature},
    http::{FetchError, RetryAgent},
};

pub const DEFAULT_MIRRORS: [&str; 2] = [
    "https://data.alltheplaces.xyz/runs/latest/output",
    "https://alltheplaces-data.openaddresses.io/runs/latest/output",
];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("no dataset published for {brand} (tried {} urls)", tried.len())]
    NotFound { brand: Brand, tried: Vec<String> },

    #[error("server error {status} from {url}")]
    Server { url: String, status: u16 },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("malformed dataset at {url}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DatasetError {
    /// Failures after which the session should back off before the next brand.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Network { .. })
    }
}

/// Something that can stream the feature collection for a brand.
pub trait FeatureSource {
    fn stream(&self, brand: Brand, sink: &mut dyn FnMut(Feature)) -> Result<usize, DatasetError>;
}

/// Spider names to try for `brand`: the current name, then historical
/// aliases, then each of those with the `_us` suffix toggled.
pub fn spider_candidates(brand: Brand) -> Vec<String> {
    let known: Vec<&str> = std::iter::once(brand.spider())
        .chain(brand.spider_aliases().iter().copied())
        .collect();

    let toggled = known.iter().map(|x| match x.strip_suffix("_us") {
        Some(stem) => stem.to_string(),
        None => format!("{x}_us"),
    });

    known
        .iter()
        .map(|x| x.to_string())
        .chain(toggled)
        .unique()
        .collect()
}

/// Mirror base urls in the order they are tried.
pub fn mirrors(custom: Option<&str>) -> Vec<String> {
    custom
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(str::to_string)
        .into_iter()
        .chain(DEFAULT_MIRRORS.map(String::from))
        .map(|x| x.trim_end_matches('/').to_string())
        .unique()
        .collect()
}

pub struct DatasetClient {
    http: RetryAgent,
    mirrors: Vec<String>,
}

impl DatasetClient {
    pub fn new(mirrors: Vec<String>, timeout: Duration) -> Self {
        Self {
            http: RetryAgent::new(3, 2.0, timeout),
            mirrors,
        }
    }

    #[cfg(test)]
    pub fn with_agent(http: RetryAgent, mirrors: Vec<String>) -> Self {
        Self { http, mirrors }
    }
}

impl FeatureSource for DatasetClient {
    fn stream(&self, brand: Brand, sink: &mut dyn FnMut(Feature)) -> Result<usize, DatasetError> {
        let names = spider_candidates(brand);
        let mut tried = Vec::new();

        for mirror in &self.mirrors {
            for name in &names {
                let url = format!("{mirror}/{name}.geojson");
                let response = match self.http.get(&url) {
                    Ok(x) => x,
                    Err(FetchError::Status { status: 404, .. }) => {
                        debug!(%url, "not published");
                        tried.push(url);
                        continue;
                    }
                    Err(FetchError::Status { url, status }) if status >= 500 || status == 429 => {
                        return Err(DatasetError::Server { url, status })
                    }
                    Err(FetchError::Status { url, status }) => {
                        return Err(DatasetError::Http { url, status })
                    }
                    Err(FetchError::Network { url, message }) => {
                        return Err(DatasetError::Network { url, message })
                    }
                };

                info!(%brand, spider = %name, %url, "streaming dataset");
                return for_each_feature(response.into_reader(), sink).map_err(|source| {
                    if source.is_io() {
                        DatasetError::Network {
                            url: url.clone(),
                            message: source.to_string(),
                        }
                    } else {
                        DatasetError::Parse { url, source }
                    }
                });
            }
        }

        Err(DatasetError::NotFound { brand, tried })
    }
}
