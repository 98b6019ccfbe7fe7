use std::{fmt, str::FromStr};

use anyhow::bail;
use serde_with::{DeserializeFromStr, SerializeDisplay};

/// A US ZIP code with any ZIP+4 suffix removed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, DeserializeFromStr, SerializeDisplay)]
pub struct ZipCode(String);

impl ZipCode {
    /// `"47906-1234"`, `" 47906 "` and `"479061234"` all become `"47906"`.
    /// Returns `None` when nothing is left.
    pub fn normalize(raw: &str) -> Option<Self> {
        let base = raw.split('-').next().unwrap_or_default().trim();
        if base.is_empty() {
            return None;
        }

        let base = if base.len() == 9 && base.bytes().all(|x| x.is_ascii_digit()) {
            &base[..5]
        } else {
            base
        };
        Some(Self(base.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address placed on a store whose location is only the ZIP centroid.
    pub fn centroid_marker(&self) -> String {
        format!("ZIP {} (centroid)", self.0)
    }
}

impl fmt::Display for ZipCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ZipCode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::normalize(s) {
            Some(x) => Ok(x),
            None => bail!("empty ZIP code: {s:?}"),
        }
    }
}
