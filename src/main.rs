use std::{io, time::Duration};

use _model::Brand;
use anyhow::{bail, Result};
use clap::Parser;
use itertools::Itertools;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod backfill;
mod config;
mod features;
mod geocode;
mod http;
mod import;
mod index;
mod spiders;
mod stats;
mod storage;
mod targets;
mod utils;
mod writer;
mod zip_metadata;

use crate::{
    backfill::BackfillOptions,
    config::{Cli, Command, TargetsCommand},
    geocode::Zippopotam,
    import::{ImportOptions, Pacing},
    spiders::DatasetClient,
    targets::{ExpandOptions, ZipScope},
    zip_metadata::MetadataOptions,
};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "groceries=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let db = cli.storage.connect()?;

    match cli.command {
        Command::Import(args) => {
            let realtime = args.is_realtime();
            let scope = if realtime {
                ZipScope::explicit(args.zip_list())
            } else {
                ZipScope::load(&db, args.nationwide)
            };
            let source = DatasetClient::new(
                spiders::mirrors(args.dataset.dataset_mirror.as_deref()),
                args.dataset_timeout(),
            );
            let options = ImportOptions {
                brands: args.brand_list()?,
                realtime,
                dry_run: args.dry_run,
                batch_size: args.batch_size.max(1),
                pacing: if realtime { Pacing::REALTIME } else { Pacing::IMPORT },
            };
            if options.dry_run {
                info!("dry run, nothing will be written");
            }

            let stats = import::run(&db, &source, &scope, &options)?;
            println!("{stats}");
        }
        Command::Backfill(args) => {
            let source = DatasetClient::new(
                spiders::mirrors(args.dataset.dataset_mirror.as_deref()),
                Duration::from_secs(120),
            );
            let geocoder = geocode::geocoder(args.google_maps_api_key.as_deref());
            let options = BackfillOptions {
                brands: args.brands.filter()?,
                dry_run: args.dry_run,
                pacing: Pacing::IMPORT,
            };
            info!(
                brands = %options.brands.as_deref().map_or("all".to_string(), |x| x.iter().map(Brand::slug).join(",")),
                "starting backfill"
            );

            let stats = backfill::run(&db, &source, geocoder.as_ref(), &options)?;
            println!("{stats}");
        }
        Command::ZipMetadata(args) => {
            let options = MetadataOptions {
                limit: args.limit.max(1),
                delay: Duration::from_secs_f64(args.delay.max(0.0)),
                repeat: args.repeat,
                max_batches: (args.max_batches > 0).then_some(args.max_batches),
                concurrency: args.concurrency,
                dry_run: args.dry_run,
                pause_between_batches: Duration::from_secs(1),
            };

            let updated = zip_metadata::run(&db, &Zippopotam::new(), &options)?;
            println!("Updated {updated} ZIP codes");
        }
        Command::Targets(TargetsCommand::Refresh {
            no_neighbors,
            neighbor_radius,
        }) => {
            let report = targets::refresh(&db, !no_neighbors, neighbor_radius)?;
            println!("{report}");
        }
        Command::Targets(TargetsCommand::Expand {
            zips,
            radius,
            cleanup,
            no_skip_existing,
        }) => {
            let seeds = config::zip_list(&zips);
            if seeds.is_empty() {
                bail!("No ZIP codes given");
            }
            let options = ExpandOptions {
                radius,
                cleanup,
                skip_existing: !no_skip_existing,
            };

            let expanded = targets::expand(&db, &seeds, &options);
            println!("{}", expanded.iter().join(","));
        }
    }

    Ok(())
}
