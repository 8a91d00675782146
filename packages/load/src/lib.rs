#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Source load model.
//!
//! Converts standardized source records into daily emission loads:
//! `load = population × EFIO × (1 − η)` where EFIO is the scenario's
//! emission rate and η the resolved containment efficiency. Intervention
//! reallocations (moving a fraction of one category's population to
//! another category) are applied first and must preserve total population
//! exactly — under- or double-counting here silently corrupts every
//! downstream number.

use wellrisk_models::{Scenario, SourceCategory, SourceRecord};

/// Errors from the load model.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// A record-level efficiency override fell outside [0, 1]. This
    /// signals an upstream data error and fails loudly rather than
    /// silently clipping.
    #[error("source `{source_id}`: efficiency must be in [0, 1], got {value}")]
    EfficiencyOutOfRange {
        /// Identifier of the offending source record.
        source_id: String,
        /// Offending value.
        value: f64,
    },

    /// A record carried a negative population.
    #[error("source `{source_id}`: population must be >= 0, got {value}")]
    NegativePopulation {
        /// Identifier of the offending source record.
        source_id: String,
        /// Offending value.
        value: f64,
    },
}

/// Resolves the containment efficiency for one record: the record's own
/// override if present, else the scenario's category override, else the
/// category default.
///
/// # Errors
///
/// Returns [`LoadError::EfficiencyOutOfRange`] when the record override
/// lies outside [0, 1]. Scenario-level overrides are validated by
/// [`Scenario::validate`] before any record is touched.
pub fn resolve_efficiency(record: &SourceRecord, scenario: &Scenario) -> Result<f64, LoadError> {
    match record.efficiency {
        Some(eta) if (0.0..=1.0).contains(&eta) => Ok(eta),
        Some(eta) => Err(LoadError::EfficiencyOutOfRange {
            source_id: record.id.clone(),
            value: eta,
        }),
        None => Ok(scenario.category_efficiency(record.category)),
    }
}

/// Applies the scenario's intervention reallocations.
///
/// For each intervention (from, to, p), every from-category record with
/// population P is split into a retained row keeping `P − P·p` in the
/// from-category and a moved row carrying `P·p` in the to-category. The
/// retained population is computed by subtraction so the two rows always
/// sum to exactly P. The moved row drops any per-record efficiency
/// override (it now sits in a different containment class) and gets an
/// id suffixed with the target category.
///
/// Interventions apply in scenario order, each over the output of the
/// previous one. A fraction of 0 leaves records untouched; a fraction of
/// 1 moves the whole record (leaving no empty twin behind).
#[must_use]
pub fn apply_interventions(sources: Vec<SourceRecord>, scenario: &Scenario) -> Vec<SourceRecord> {
    let mut current = sources;

    for intervention in &scenario.interventions {
        if intervention.fraction <= 0.0 {
            continue;
        }

        let mut next = Vec::with_capacity(current.len());
        let mut moved_rows = 0_usize;

        for record in current {
            if record.category != intervention.from {
                next.push(record);
                continue;
            }

            let moved = record.population * intervention.fraction;
            let retained = record.population - moved;
            moved_rows += 1;

            next.push(SourceRecord {
                id: moved_id(&record.id, intervention.to),
                category: intervention.to,
                population: moved,
                efficiency: None,
                load: None,
                ..record.clone()
            });

            if intervention.fraction < 1.0 {
                next.push(SourceRecord {
                    population: retained,
                    load: None,
                    ..record
                });
            }
        }

        log::debug!(
            "intervention {} -> {} at {:.0}%: split {moved_rows} sources",
            intervention.from,
            intervention.to,
            intervention.fraction * 100.0,
        );
        current = next;
    }

    current
}

/// Computes the daily emission load for every record.
///
/// Records with a missing population get the scenario's default household
/// size first. Population 0 and η = 1 both yield load 0 without error.
///
/// # Errors
///
/// Returns [`LoadError`] when a record carries a negative population or
/// an out-of-range efficiency override.
pub fn compute_loads(
    sources: Vec<SourceRecord>,
    scenario: &Scenario,
) -> Result<Vec<SourceRecord>, LoadError> {
    let mut loaded = Vec::with_capacity(sources.len());

    for mut record in sources {
        if record.population < 0.0 {
            return Err(LoadError::NegativePopulation {
                source_id: record.id,
                value: record.population,
            });
        }

        let eta = resolve_efficiency(&record, scenario)?;
        record.load = Some(record.population * scenario.emission_rate * (1.0 - eta));
        loaded.push(record);
    }

    log::debug!(
        "computed loads for {} sources at EFIO {:.3e}",
        loaded.len(),
        scenario.emission_rate,
    );

    Ok(loaded)
}

/// Runs the full load model: interventions, then load computation.
///
/// # Errors
///
/// Returns [`LoadError`] on invalid record-level data; see
/// [`compute_loads`].
pub fn run(sources: Vec<SourceRecord>, scenario: &Scenario) -> Result<Vec<SourceRecord>, LoadError> {
    let reallocated = apply_interventions(sources, scenario);
    compute_loads(reallocated, scenario)
}

/// Id for the moved half of a split record.
fn moved_id(original: &str, to: SourceCategory) -> String {
    format!("{original}~{to}")
}
