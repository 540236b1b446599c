pub mod types;
pub mod config;
pub mod data;
pub mod boundary;
pub mod catchment;
pub mod processing;
pub mod stats;
pub mod export;
pub mod render;
pub mod server;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute catchments and write GeoJSON, CSV summaries and PNG maps
    Generate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Share of trips the catchment must cover, overrides the config
        #[arg(short, long)]
        percentile: Option<f64>,
    },
    /// Write trip distance statistics per POI
    Stats {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Compute catchments and serve them over HTTP
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long)]
        percentile: Option<f64>,
    },
}

fn load_config(path: &Path, percentile: Option<f64>) -> anyhow::Result<config::AppConfig> {
    info!("Using config {:?}", path);
    let mut app_config = config::AppConfig::load_from_file(path)?;
    if let Some(p) = percentile {
        app_config.catchment.percentile = p;
        app_config.validate()?;
    }
    Ok(app_config)
}

fn compute(app_config: &config::AppConfig) -> anyhow::Result<Vec<processing::PoiCatchments>> {
    // 1. Load Data
    let zones = data::load_zones(app_config)?;
    let boundary = boundary::ReferenceBoundary::from_config(&app_config.boundary)?;

    // 2. Catchments for every POI and mode
    Ok(processing::process_all(app_config, &zones, &boundary))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Generate { config, percentile } => {
            let app_config = load_config(config, *percentile)?;
            let results = compute(&app_config)?;

            // 3. Overlaps and outputs
            let overlaps = processing::compute_overlaps(&app_config, &results);
            export::write_all(&app_config, &results, &overlaps)?;
            render::render_maps(&app_config, &results)?;

            let failed = results.iter().filter(|r| r.load_error.is_some()).count();
            if failed > 0 {
                warn!("{} POI(s) skipped because their trip data failed to load", failed);
            }
            info!("Generation complete!");
        }
        Commands::Stats { config } => {
            let app_config = load_config(config, None)?;
            let zones = data::load_zones(&app_config)?;

            let mut rows = Vec::new();
            for poi in &app_config.pois {
                let records = match data::load_poi_trips(&app_config, poi) {
                    Ok(records) => records,
                    Err(e) => {
                        warn!("Skipping {}: {:#}", poi.name, e);
                        continue;
                    }
                };
                match stats::distance_stats(poi, &records, &zones) {
                    Some(s) => {
                        info!(
                            "{}: {:.0} trips, avg {:.1} km, 50% within {:.1} km, 75% within {:.1} km, 90% within {:.1} km",
                            poi.display_name(), s.total_trips, s.avg_distance_km,
                            s.median_distance_km, s.p75_distance_km, s.p90_distance_km
                        );
                        rows.push(s);
                    }
                    None => warn!("{}: no trips with known origin zones", poi.name),
                }
            }

            std::fs::create_dir_all(&app_config.output.dir)
                .with_context(|| format!("Failed to create output directory {:?}", app_config.output.dir))?;
            export::write_stats_csv(&app_config.output.dir.join("distance_stats.csv"), &rows)?;
        }
        Commands::Serve { config, percentile } => {
            let app_config = load_config(config, *percentile)?;
            let results = compute(&app_config)?;
            server::start_server(app_config, results).await?;
        }
    }

    Ok(())
}
