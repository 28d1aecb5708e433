use clap::{Parser, Subcommand};
use mrf_nearest::config::AppConfig;
use mrf_nearest::output::{self, OutputColumns};
use mrf_nearest::{data, matcher, normalize};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the nearest facility for every tract and write the joined CSV
    Join {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Project tracts into the target frame and save them as GeoJSON
    Reproject {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Join { config } => {
            info!("Joining with config: {:?}", config);
            let app_config = AppConfig::load_from_file(config)?;
            let registry = app_config.frame_registry();

            // 1. Load
            let tracts = data::load_tracts(&app_config.input)?;
            let facilities = data::load_facilities(&app_config.input)?;

            // 2. Co-project
            info!(
                "Re-projecting to {}...",
                app_config.processing.target_frame
            );
            let normalized = normalize::normalize(
                tracts,
                facilities,
                &app_config.processing.target_frame,
                &registry,
            )?;

            // 3. Match
            info!("Finding nearest MRF for each census tract...");
            let results = matcher::match_nearest(
                &normalized.units,
                &normalized.facilities,
                &app_config.match_options(),
            )?;

            // 4. Save
            let columns = OutputColumns {
                id_column: &app_config.input.tract_id_column,
                prefix: &app_config.processing.column_prefix,
            };
            output::save_matches(&app_config.output.csv, &columns, &results)?;

            info!("Finished");
        }
        Commands::Reproject { config, out } => {
            info!("Re-projecting tracts with config: {:?}", config);
            let app_config = AppConfig::load_from_file(config)?;
            let registry = app_config.frame_registry();

            let tracts = data::load_tracts(&app_config.input)?;
            let units = normalize::normalize_units(
                tracts,
                &app_config.processing.target_frame,
                &registry,
            )?;
            output::save_units_geojson(out, &units, &app_config.input.tract_id_column)?;

            info!("Finished");
        }
    }

    Ok(())
}
