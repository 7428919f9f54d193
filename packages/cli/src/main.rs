#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line zone analysis.
//!
//! Loads a population grid CSV and a commerce JSON document, runs the
//! filter, sample, cluster, and score pipeline, and writes the ranked
//! zones as JSON or `GeoJSON`.
//!
//! ```text
//! city_insights analyze --grid grid.csv --commerces bakeries.json --format geojson
//! city_insights evaluate --grid grid.csv --commerces bakeries.json --k-min 2 --k-max 8
//! ```

mod export;
mod progress;

use std::io::Write as _;
use std::path::{Path, PathBuf};

use city_insights_grid::ingest::{
    DEFAULT_INSEE_SCALE, GridCsvFormat, load_commerce_json, load_grid_csv,
};
use city_insights_grid_models::{BoundingBox, CommercePoint};
use city_insights_pipeline::{
    AnalysisRequest, AnalysisResult, CancellationToken, KRange, PipelineConfig,
    PipelineOrchestrator,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::MultiProgress;

use crate::progress::{IndicatifProgress, init_logger};

#[derive(Parser)]
#[command(name = "city_insights", about = "Commerce opportunity zones from population density")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster the area into zones and rank them by opportunity
    Analyze {
        #[command(flatten)]
        input: InputArgs,

        /// Number of zones (chosen from quality metrics when omitted)
        #[arg(long)]
        k: Option<usize>,

        /// Include quality candidates in the output even when `--k` is given
        #[arg(long)]
        evaluate: bool,

        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Evaluate clustering quality over a range of zone counts
    Evaluate {
        #[command(flatten)]
        input: InputArgs,

        /// Smallest zone count to evaluate
        #[arg(long)]
        k_min: Option<usize>,

        /// Largest zone count to evaluate
        #[arg(long)]
        k_max: Option<usize>,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Population grid CSV
    #[arg(long)]
    grid: PathBuf,

    /// Commerce JSON document (`items` or `places`)
    #[arg(long)]
    commerces: PathBuf,

    /// Commerce category, used when the document names none
    #[arg(long)]
    category: Option<String>,

    /// Read the grid in the INSEE layout (`X`, `Y`, `ind_c`)
    #[arg(long)]
    insee: bool,

    /// Multiplier from INSEE `X`/`Y` values to LAEA meters
    #[arg(long, default_value_t = DEFAULT_INSEE_SCALE)]
    insee_scale: f64,

    /// Fraction of the commerce box added on every side
    #[arg(long, default_value_t = 0.35)]
    expand: f64,

    /// Pipeline config TOML
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop evaluating after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Geojson,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            k,
            evaluate,
            format,
            output,
        } => {
            let config = load_config(&input)?;
            let mut request = load_request(&input)?;
            request.k = k;
            request.evaluate_quality = evaluate;

            let result = run(&multi, config, &request)?;
            log_ranking(&result);

            let body = match format {
                OutputFormat::Json => serde_json::to_string_pretty(&result)?,
                OutputFormat::Geojson => export::to_feature_collection(&result).to_string(),
            };
            write_output(output.as_deref(), &body)?;
        }
        Commands::Evaluate {
            input,
            k_min,
            k_max,
        } => {
            let mut config = load_config(&input)?;
            let defaults = config.k_range;
            config.k_range = KRange {
                min: k_min.unwrap_or(defaults.min),
                max: k_max.unwrap_or(defaults.max),
            };
            config.validate()?;

            let mut request = load_request(&input)?;
            request.k = None;
            request.evaluate_quality = true;

            let result = run(&multi, config, &request)?;
            let report = serde_json::json!({
                "category": result.category,
                "sampledPoints": result.sampled_points,
                "chosenK": result.k,
                "complete": result.candidates_complete,
                "candidates": result.candidates.unwrap_or_default(),
            });
            write_output(None, &serde_json::to_string_pretty(&report)?)?;
        }
    }

    Ok(())
}

fn load_config(input: &InputArgs) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match &input.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if input.timeout.is_some() {
        config.time_budget_secs = input.timeout;
        config.validate()?;
    }
    Ok(config)
}

/// Loads both inputs and derives the analyzed box from the commerce
/// document: its own `bbox` when present, otherwise the extent of its
/// places, grown by `--expand`.
fn load_request(input: &InputArgs) -> Result<AnalysisRequest, Box<dyn std::error::Error>> {
    let commerce = load_commerce_json(&input.commerces, input.category.as_deref())?;
    let category = commerce
        .category
        .ok_or("commerce document names no category; pass --category")?;

    let base = commerce
        .bbox
        .or_else(|| {
            BoundingBox::from_points(commerce.points.iter().map(CommercePoint::coordinate), 0.0)
        })
        .ok_or("commerce document has neither a bbox nor any located place")?;
    let bbox = base.expand(input.expand);
    let center = bbox.center();
    log::info!(
        "Analyzing {category} in {} around ({:.4}, {:.4}), lat {:.4}..{:.4}, lon {:.4}..{:.4}",
        commerce.city.as_deref().unwrap_or("unnamed area"),
        center.latitude,
        center.longitude,
        bbox.min_lat,
        bbox.max_lat,
        bbox.min_lon,
        bbox.max_lon
    );

    let format = if input.insee {
        GridCsvFormat::InseeLaea {
            scale: input.insee_scale,
        }
    } else {
        GridCsvFormat::LatLon
    };
    let cells = load_grid_csv(&input.grid, format, Some(&bbox))?;

    Ok(AnalysisRequest {
        cells,
        commerces: commerce.points,
        bbox,
        category,
        k: None,
        evaluate_quality: false,
    })
}

fn run(
    multi: &MultiProgress,
    config: PipelineConfig,
    request: &AnalysisRequest,
) -> Result<AnalysisResult, Box<dyn std::error::Error>> {
    let orchestrator = PipelineOrchestrator::try_new(config)?;
    let progress = IndicatifProgress::analysis_bar(multi, "Starting analysis");

    let result = match orchestrator.run_with(request, progress.as_ref(), &CancellationToken::new())
    {
        Ok(result) => result,
        Err(e) => {
            progress.finish_and_clear();
            return Err(e.into());
        }
    };
    progress.finish(format!(
        "Ranked {} zones for {} (k={})",
        result.priority_zones.len(),
        result.category,
        result.k
    ));
    if !result.candidates_complete {
        log::warn!("Time budget ran out before every k was evaluated");
    }
    Ok(result)
}

fn log_ranking(result: &AnalysisResult) {
    log::info!(
        "{} zones from {} sampled points ({} people)",
        result.zones.len(),
        result.sampled_points,
        result.population.total_population
    );
    for priority in &result.priority_zones {
        log::info!(
            "#{} zone {}: score {:.3}, population {:.0}, {} competitors",
            priority.rank,
            priority.zone.label,
            priority.score,
            priority.zone.population_mass,
            priority.zone.commerce_count
        );
    }
}

fn write_output(path: Option<&Path>, body: &str) -> std::io::Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, body)?;
            log::info!("Wrote {}", path.display());
            Ok(())
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{body}")
        }
    }
}
