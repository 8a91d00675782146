#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the wellrisk toolchain.
//!
//! Two subcommands: `run` executes one scenario end to end (loads, links,
//! concentrations), `calibrate` grid-searches the free parameters against
//! lab observations. Scenario and grid files are TOML; input and output
//! tables are canonical CSV handled by `wellrisk_ingest`.

mod progress;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use wellrisk_calibrate::GridSpec;
use wellrisk_models::Scenario;

use crate::progress::IndicatifProgress;

#[derive(Parser)]
#[command(name = "wellrisk", about = "Groundwater contamination risk toolchain")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scenario end to end and write the result tables
    Run {
        /// Scenario TOML file; omit for the built-in baseline
        #[arg(long)]
        scenario: Option<PathBuf>,
        /// Canonical source table (CSV)
        #[arg(long)]
        sources: PathBuf,
        /// Canonical receptor table (CSV)
        #[arg(long)]
        receptors: PathBuf,
        /// Directory the result tables are written into
        #[arg(long, default_value = "out")]
        output_dir: PathBuf,
    },
    /// Grid-search calibration against lab observations
    Calibrate {
        /// Base scenario TOML file; omit for the built-in baseline
        #[arg(long)]
        scenario: Option<PathBuf>,
        /// Grid TOML file listing candidate values per dimension
        #[arg(long)]
        grid: Option<PathBuf>,
        /// Canonical source table (CSV)
        #[arg(long)]
        sources: PathBuf,
        /// Canonical receptor table (CSV)
        #[arg(long)]
        receptors: PathBuf,
        /// Standalone ground-truth table; defaults to the receptors'
        /// `observed` column
        #[arg(long)]
        observations: Option<PathBuf>,
        /// Directory the grid table and best record are written into
        #[arg(long, default_value = "out")]
        output_dir: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = progress::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scenario,
            sources,
            receptors,
            output_dir,
        } => run(scenario.as_deref(), &sources, &receptors, &output_dir),
        Commands::Calibrate {
            scenario,
            grid,
            sources,
            receptors,
            observations,
            output_dir,
        } => calibrate(
            &multi,
            scenario.as_deref(),
            grid.as_deref(),
            &sources,
            &receptors,
            observations.as_deref(),
            &output_dir,
        ),
    }
}

fn run(
    scenario_path: Option<&Path>,
    sources_path: &Path,
    receptors_path: &Path,
    output_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = load_scenario(scenario_path)?;
    let sources = wellrisk_ingest::read_sources(sources_path, &scenario)?;
    let receptors = wellrisk_ingest::read_receptors(receptors_path)?;

    let result = wellrisk_pipeline::run_scenario(&sources, &receptors, &scenario)?;

    fs::create_dir_all(output_dir)?;
    wellrisk_ingest::write_loads(&output_dir.join("loads.csv"), &result.loads)?;
    wellrisk_ingest::write_links(&output_dir.join("links.csv"), &result.links)?;
    wellrisk_ingest::write_concentrations(
        &output_dir.join("concentrations.csv"),
        &result.concentrations,
    )?;

    log::info!(
        "scenario `{}` complete: {} links, {} receptor rows",
        scenario.name,
        result.links.len(),
        result.concentrations.len()
    );
    Ok(())
}

fn calibrate(
    multi: &indicatif::MultiProgress,
    scenario_path: Option<&Path>,
    grid_path: Option<&Path>,
    sources_path: &Path,
    receptors_path: &Path,
    observations_path: Option<&Path>,
    output_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let base = load_scenario(scenario_path)?;
    let spec = load_grid(grid_path)?;
    let sources = wellrisk_ingest::read_sources(sources_path, &base)?;
    let receptors = wellrisk_ingest::read_receptors(receptors_path)?;

    let ground_truth = match observations_path {
        Some(path) => wellrisk_ingest::read_observations(path)?,
        None => wellrisk_ingest::ground_truth_from_receptors(&receptors),
    };

    let bar = IndicatifProgress::grid_bar(multi, "scoring calibration grid");
    let result =
        wellrisk_calibrate::run_grid(&base, &spec, &sources, &receptors, &ground_truth, &bar)?;

    fs::create_dir_all(output_dir)?;
    wellrisk_ingest::write_calibration(
        &output_dir.join("calibration_grid.csv"),
        &output_dir.join("best_parameters.json"),
        &result,
    )?;

    log::info!(
        "calibration complete: best decay {} at emission factor {} (n = {})",
        result.best.point.decay,
        result.best.point.emission_factor,
        result.best.n
    );
    Ok(())
}

/// Loads a scenario TOML file, or the built-in baseline when no path is
/// given. Validation happens inside the pipeline before any computation.
fn load_scenario(path: Option<&Path>) -> Result<Scenario, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("cannot read scenario {}: {e}", path.display()))?;
            Ok(toml::from_str(&text)?)
        }
        None => {
            log::info!("no scenario file given; using built-in baseline");
            Ok(Scenario::default())
        }
    }
}

/// Loads a grid TOML file, or the default grid when no path is given.
fn load_grid(path: Option<&Path>) -> Result<GridSpec, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("cannot read grid {}: {e}", path.display()))?;
            Ok(toml::from_str(&text)?)
        }
        None => {
            log::info!("no grid file given; using default grid");
            Ok(GridSpec::default())
        }
    }
}
