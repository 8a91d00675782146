#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Canonical table I/O.
//!
//! Reads the standardized input tables (sources, receptors, observations)
//! from CSV and writes the result tables (loads, links, concentrations,
//! calibration grid) back out. The core engines only ever accept the
//! canonical schema: any raw-survey column renaming happens upstream of
//! this crate, and a table reaching here with a required column missing
//! is a fatal error naming the table and column — silently inventing a
//! population or location column would corrupt every downstream number
//! undetectably.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;
use std::str::FromStr as _;

use serde::Deserialize;
use wellrisk_calibrate::CalibrationResult;
use wellrisk_models::{
    ConcentrationRow, Link, Receptor, ReceptorType, Scenario, SourceCategory, SourceRecord,
};

/// Errors reading or writing canonical tables.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// A required column is absent from a table's header row.
    #[error("table `{table}`: missing required column `{column}`")]
    MissingColumn {
        /// Table name (e.g. "sources").
        table: &'static str,
        /// The absent column.
        column: &'static str,
    },

    /// A cell could not be parsed into its canonical type.
    #[error("table `{table}` row {row}: {message}")]
    InvalidValue {
        /// Table name.
        table: &'static str,
        /// 1-based data row number (excluding the header).
        row: usize,
        /// What was wrong.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CSV reading or writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawSourceRow {
    id: String,
    lat: f64,
    lon: f64,
    category: String,
    #[serde(default)]
    population: Option<f64>,
    #[serde(default)]
    efficiency: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawReceptorRow {
    id: String,
    receptor_type: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    flow: Option<f64>,
    #[serde(default)]
    observed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawObservationRow {
    receptor_id: String,
    #[serde(default)]
    observed: Option<f64>,
}

/// Reads the canonical source table.
///
/// Records with no population get the scenario's default household
/// size — a documented default, not an anomaly.
///
/// # Errors
///
/// Returns [`TableError`] on a missing required column, an unknown
/// category, or an unreadable file.
pub fn read_sources(path: &Path, scenario: &Scenario) -> Result<Vec<SourceRecord>, TableError> {
    let file = File::open(path)?;
    let sources = read_sources_from(file, scenario)?;
    log::info!("read {} sources from {}", sources.len(), path.display());
    Ok(sources)
}

/// Reader-generic form of [`read_sources`], used directly in tests.
///
/// # Errors
///
/// See [`read_sources`].
pub fn read_sources_from<R: io::Read>(
    reader: R,
    scenario: &Scenario,
) -> Result<Vec<SourceRecord>, TableError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    require_columns("sources", csv_reader.headers()?, &["id", "lat", "lon", "category"])?;

    let mut records = Vec::new();
    for (i, row) in csv_reader.deserialize::<RawSourceRow>().enumerate() {
        let row = row?;
        let category =
            SourceCategory::from_str(&row.category).map_err(|_| TableError::InvalidValue {
                table: "sources",
                row: i + 1,
                message: format!("unknown category `{}`", row.category),
            })?;

        records.push(SourceRecord {
            id: row.id,
            lat: row.lat,
            lon: row.lon,
            category,
            population: row.population.unwrap_or(scenario.default_household_size),
            efficiency: row.efficiency,
            load: None,
        });
    }

    Ok(records)
}

/// Reads the canonical receptor table.
///
/// # Errors
///
/// Returns [`TableError`] on a missing required column, an unknown
/// receptor type, or an unreadable file.
pub fn read_receptors(path: &Path) -> Result<Vec<Receptor>, TableError> {
    let file = File::open(path)?;
    let receptors = read_receptors_from(file)?;
    log::info!("read {} receptors from {}", receptors.len(), path.display());
    Ok(receptors)
}

/// Reader-generic form of [`read_receptors`].
///
/// # Errors
///
/// See [`read_receptors`].
pub fn read_receptors_from<R: io::Read>(reader: R) -> Result<Vec<Receptor>, TableError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    require_columns(
        "receptors",
        csv_reader.headers()?,
        &["id", "receptor_type", "lat", "lon"],
    )?;

    let mut records = Vec::new();
    for (i, row) in csv_reader.deserialize::<RawReceptorRow>().enumerate() {
        let row = row?;
        let receptor_type =
            ReceptorType::from_str(&row.receptor_type).map_err(|_| TableError::InvalidValue {
                table: "receptors",
                row: i + 1,
                message: format!("unknown receptor_type `{}`", row.receptor_type),
            })?;

        records.push(Receptor {
            id: row.id,
            receptor_type,
            lat: row.lat,
            lon: row.lon,
            flow: row.flow,
            observed: row.observed,
        });
    }

    Ok(records)
}

/// Reads a standalone ground-truth table (receptor id → observed
/// concentration). Rows with an empty observation are skipped; they
/// represent receptors that were sampled but produced no usable value.
///
/// # Errors
///
/// Returns [`TableError`] on a missing required column or an unreadable
/// file.
pub fn read_observations(path: &Path) -> Result<BTreeMap<String, f64>, TableError> {
    let file = File::open(path)?;
    let truth = read_observations_from(file)?;
    log::info!("read {} observations from {}", truth.len(), path.display());
    Ok(truth)
}

/// Reader-generic form of [`read_observations`].
///
/// # Errors
///
/// See [`read_observations`].
pub fn read_observations_from<R: io::Read>(reader: R) -> Result<BTreeMap<String, f64>, TableError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    require_columns("observations", csv_reader.headers()?, &["receptor_id", "observed"])?;

    let mut truth = BTreeMap::new();
    for row in csv_reader.deserialize::<RawObservationRow>() {
        let row = row?;
        if let Some(observed) = row.observed {
            truth.insert(row.receptor_id, observed);
        }
    }

    Ok(truth)
}

/// Ground truth carried inline on the receptor table.
#[must_use]
pub fn ground_truth_from_receptors(receptors: &[Receptor]) -> BTreeMap<String, f64> {
    receptors
        .iter()
        .filter_map(|r| r.observed.map(|obs| (r.id.clone(), obs)))
        .collect()
}

/// Writes the per-source load table.
///
/// # Errors
///
/// Returns [`TableError`] on I/O or serialization failure.
pub fn write_loads(path: &Path, loads: &[SourceRecord]) -> Result<(), TableError> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in loads {
        writer.serialize(record)?;
    }
    writer.flush()?;
    log::info!("wrote {} load rows to {}", loads.len(), path.display());
    Ok(())
}

/// Writes the per-link surviving-load table.
///
/// # Errors
///
/// Returns [`TableError`] on I/O or serialization failure.
pub fn write_links(path: &Path, links: &[Link]) -> Result<(), TableError> {
    let mut writer = csv::Writer::from_path(path)?;
    for link in links {
        writer.serialize(link)?;
    }
    writer.flush()?;
    log::info!("wrote {} link rows to {}", links.len(), path.display());
    Ok(())
}

/// Writes the per-receptor concentration table.
///
/// # Errors
///
/// Returns [`TableError`] on I/O or serialization failure.
pub fn write_concentrations(path: &Path, rows: &[ConcentrationRow]) -> Result<(), TableError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    log::info!(
        "wrote {} concentration rows to {}",
        rows.len(),
        path.display()
    );
    Ok(())
}

/// Writes the full calibration grid as CSV, one row per parameter
/// combination, and the selected best record as JSON alongside it.
///
/// # Errors
///
/// Returns [`TableError`] on I/O or serialization failure.
pub fn write_calibration(
    grid_path: &Path,
    best_path: &Path,
    result: &CalibrationResult,
) -> Result<(), TableError> {
    let mut writer = csv::Writer::from_path(grid_path)?;
    writer.write_record([
        "decay",
        "emission_factor",
        "efficiency_overrides",
        "n",
        "rmse_log",
        "spearman",
        "kendall",
        "pearson_log",
    ])?;

    for score in &result.grid {
        let overrides = score
            .point
            .efficiency_overrides
            .iter()
            .map(|(cat, eta)| format!("{cat}={eta}"))
            .collect::<Vec<_>>()
            .join(";");
        writer.write_record([
            score.point.decay.to_string(),
            score.point.emission_factor.to_string(),
            overrides,
            score.n.to_string(),
            score.rmse_log.to_string(),
            optional_cell(score.spearman),
            optional_cell(score.kendall),
            optional_cell(score.pearson_log),
        ])?;
    }
    writer.flush()?;

    serde_json::to_writer_pretty(File::create(best_path)?, &result.best)?;

    log::info!(
        "wrote {} grid rows to {} and best record to {}",
        result.grid.len(),
        grid_path.display(),
        best_path.display()
    );
    Ok(())
}

/// Undefined metrics become empty cells rather than "NaN" text.
fn optional_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Fails with the first required column missing from `headers`.
fn require_columns(
    table: &'static str,
    headers: &csv::StringRecord,
    required: &[&'static str],
) -> Result<(), TableError> {
    for &column in required {
        if !headers.iter().any(|h| h == column) {
            return Err(TableError::MissingColumn { table, column });
        }
    }
    Ok(())
}
