use core::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

mod store;
mod target;
mod zip;

pub use store::{point_literal, StoreRecord};
pub use target::{ScrapedZip, TargetReason, TargetZipEntry, ZipMetadata};
pub use zip::ZipCode;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Brand {
    #[serde(rename = "aldi")]
    Aldi,
    #[serde(rename = "kroger")]
    Kroger,
    #[serde(rename = "safeway")]
    Safeway,
    #[serde(rename = "meijer")]
    Meijer,
    #[serde(rename = "target")]
    Target,
    #[serde(rename = "traderjoes")]
    TraderJoes,
    #[serde(rename = "99ranch")]
    Ranch99,
    #[serde(rename = "walmart")]
    Walmart,
    #[serde(rename = "wholefoods")]
    WholeFoods,
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Brand {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::all().into_iter().find(|x| x.slug() == s) {
            Some(x) => Ok(x),
            None => bail!("Unknown brand: {s}"),
        }
    }
}

impl Brand {
    pub fn all() -> Vec<Self> {
        vec![
            Brand::Aldi,
            Brand::Kroger,
            Brand::Safeway,
            Brand::Meijer,
            Brand::Target,
            Brand::TraderJoes,
            Brand::Ranch99,
            Brand::Walmart,
            Brand::WholeFoods,
        ]
    }

    /// Value of the `store_enum` column.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Aldi => "aldi",
            Self::Kroger => "kroger",
            Self::Safeway => "safeway",
            Self::Meijer => "meijer",
            Self::Target => "target",
            Self::TraderJoes => "traderjoes",
            Self::Ranch99 => "99ranch",
            Self::Walmart => "walmart",
            Self::WholeFoods => "wholefoods",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Aldi => "Aldi",
            Self::Kroger => "Kroger",
            Self::Safeway => "Safeway",
            Self::Meijer => "Meijer",
            Self::Target => "Target",
            Self::TraderJoes => "Trader Joe's",
            Self::Ranch99 => "99 Ranch Market",
            Self::Walmart => "Walmart",
            Self::WholeFoods => "Whole Foods Market",
        }
    }

    /// All the Places spider currently publishing this brand.
    pub fn spider(&self) -> &'static str {
        match self {
            Self::Aldi => "aldi_us",
            Self::Kroger => "kroger_us",
            Self::Safeway => "safeway",
            Self::Meijer => "meijer_us",
            Self::Target => "target_us",
            Self::TraderJoes => "trader_joes_us",
            Self::Ranch99 => "99_ranch_market_us",
            Self::Walmart => "walmart_us",
            Self::WholeFoods => "whole_foods",
        }
    }

    /// Names the spider has been published under before.
    pub fn spider_aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Aldi => &["aldi"],
            Self::Kroger => &["kroger"],
            Self::Safeway => &[],
            Self::Meijer => &["meijer"],
            Self::Target => &[],
            Self::TraderJoes => &[],
            Self::Ranch99 => &["99_ranch_market"],
            Self::Walmart => &[],
            Self::WholeFoods => &["whole_foods_market"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_round_trip() {
        for brand in Brand::all() {
            assert_eq!(brand.slug().parse::<Brand>().unwrap(), brand);
        }
        assert!("costco".parse::<Brand>().is_err());
    }

    #[test]
    fn serde_uses_store_enum() {
        assert_eq!(serde_json::to_string(&Brand::Ranch99).unwrap(), "\"99ranch\"");
        assert_eq!(
            serde_json::from_str::<Brand>("\"traderjoes\"").unwrap(),
            Brand::TraderJoes
        );
    }
}
