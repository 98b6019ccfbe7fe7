use std::time::Duration;

use _model::{Brand, ZipCode};
use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing::warn;

use crate::{storage::Postgrest, utils::split_list, writer::BATCH_SIZE};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    MissingCredential(&'static str),

    #[error("{name} is not an http(s) url: {value:?}")]
    InvalidUrl { name: &'static str, value: String },
}

#[derive(Debug, Parser)]
#[command(about = "Imports grocery store locations and keeps their coordinates complete")]
pub struct Cli {
    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct StorageArgs {
    #[arg(long, global = true, env = "SUPABASE_URL", hide_env_values = true)]
    pub supabase_url: Option<String>,

    #[arg(long, global = true, env = "SUPABASE_SERVICE_ROLE_KEY", hide_env_values = true)]
    pub supabase_key: Option<String>,
}

impl StorageArgs {
    pub fn connect(&self) -> Result<Postgrest, ConfigError> {
        let url = required(&self.supabase_url, "SUPABASE_URL")?;
        let key = required(&self.supabase_key, "SUPABASE_SERVICE_ROLE_KEY")?;
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::InvalidUrl {
                name: "SUPABASE_URL",
                value: url.to_string(),
            });
        }
        Ok(Postgrest::new(url, key))
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .ok_or(ConfigError::MissingCredential(name))
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Import stores that aren't in the database yet
    Import(ImportArgs),
    /// Find coordinates for stores that are missing them
    Backfill(BackfillArgs),
    /// Fill in city, state and centroid of scraped ZIP codes
    ZipMetadata(MetadataArgs),
    /// Maintain the ZIP codes imports are restricted to
    #[command(subcommand)]
    Targets(TargetsCommand),
}

#[derive(Debug, Args)]
pub struct BrandArgs {
    /// Only these brands, comma or space separated (repeatable)
    #[arg(long = "brand", short = 'b', env = "BRAND_FILTER")]
    pub brands: Vec<String>,
}

impl BrandArgs {
    /// The brands named, or `None` when no filter was given.
    pub fn filter(&self) -> Result<Option<Vec<Brand>>> {
        let names = split_list(&self.brands);
        if names.is_empty() {
            return Ok(None);
        }

        let brands: Vec<Brand> = names
            .iter()
            .filter_map(|x| match x.to_lowercase().parse() {
                Ok(x) => Some(x),
                Err(e) => {
                    warn!("{e}, ignoring");
                    None
                }
            })
            .collect();
        if brands.is_empty() {
            bail!("No known brands in filter: {}", names.join(", "));
        }
        Ok(Some(brands))
    }
}

#[derive(Debug, Args)]
pub struct DatasetArgs {
    /// Mirror of the All the Places output tried before the public hosts
    #[arg(long, env = "ATP_MIRROR_URL")]
    pub dataset_mirror: Option<String>,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub brands: BrandArgs,

    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Only these ZIP codes, comma or space separated (repeatable)
    #[arg(long = "zip", short = 'z', env = "REALTIME_TARGET_ZIPCODES")]
    pub zips: Vec<String>,

    /// Ignore target and realtime ZIP codes
    #[arg(long)]
    pub nationwide: bool,

    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, default_value_t = BATCH_SIZE)]
    pub batch_size: usize,

    /// Brands processed per run, 0 for all
    #[arg(long, env = "MAX_SPIDERS_PER_RUN", default_value_t = 0)]
    pub max_spiders: usize,
}

impl ImportArgs {
    /// ZIPs were given and `--nationwide` wasn't.
    pub fn is_realtime(&self) -> bool {
        !self.nationwide && !self.zips.is_empty()
    }

    pub fn zip_list(&self) -> Vec<ZipCode> {
        zip_list(&self.zips)
    }

    pub fn brand_list(&self) -> Result<Vec<Brand>> {
        let mut brands = self.brands.filter()?.unwrap_or_else(Brand::all);
        if self.max_spiders > 0 && brands.len() > self.max_spiders {
            warn!(max = self.max_spiders, skipped = brands.len() - self.max_spiders, "limiting brands");
            brands.truncate(self.max_spiders);
        }
        Ok(brands)
    }

    pub fn dataset_timeout(&self) -> Duration {
        Duration::from_secs(if self.is_realtime() { 90 } else { 120 })
    }
}

pub fn zip_list<S: AsRef<str>>(values: &[S]) -> Vec<ZipCode> {
    split_list(values)
        .iter()
        .filter_map(|x| ZipCode::normalize(x))
        .collect()
}

#[derive(Debug, Args)]
pub struct BackfillArgs {
    #[command(flatten)]
    pub brands: BrandArgs,

    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Geocodes ZIP centroids with Google instead of zippopotam.us
    #[arg(long, env = "GOOGLE_MAPS_API_KEY", hide_env_values = true)]
    pub google_maps_api_key: Option<String>,

    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct MetadataArgs {
    /// ZIP codes per batch
    #[arg(long, default_value_t = 100)]
    pub limit: usize,

    /// Seconds to wait after each successful lookup
    #[arg(long, default_value_t = 0.1)]
    pub delay: f64,

    /// Keep going until no ZIP code is missing metadata
    #[arg(long = "loop")]
    pub repeat: bool,

    /// Stop looping after this many batches, 0 for no limit
    #[arg(long, default_value_t = 0)]
    pub max_batches: usize,

    #[arg(long, default_value_t = 10)]
    pub concurrency: usize,

    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Subcommand)]
pub enum TargetsCommand {
    /// Rebuild target ZIP codes from user locations
    Refresh {
        #[arg(long)]
        no_neighbors: bool,

        #[arg(long, default_value_t = 5)]
        neighbor_radius: u32,
    },
    /// Add event ZIP codes and their neighbours, printing the ones to scrape
    Expand {
        /// Comma separated ZIP codes
        #[arg(long, required = true)]
        zips: Vec<String>,

        #[arg(long, default_value_t = 5)]
        radius: u32,

        /// Remove the temporary target rows afterwards
        #[arg(long)]
        cleanup: bool,

        /// Include ZIP codes that were scraped before
        #[arg(long)]
        no_skip_existing: bool,
    },
}
