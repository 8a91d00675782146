#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Concentration aggregator.
//!
//! Sums surviving load per receptor and divides by the receptor's daily
//! flow to produce a concentration in CFU per 100 mL. Every receptor
//! appears in the output, including those with zero incoming links —
//! downstream comparison against lab data needs a true zero, not a
//! missing row.

use std::collections::BTreeMap;

use wellrisk_models::{ConcentrationRow, Link, Receptor, Scenario};

/// Millilitres in one reported sample volume. Concentrations are
/// `CFU/day ÷ (flow L/day ÷ ML_PER_SAMPLE)`, i.e. load divided by flow
/// expressed in 100 mL-units per day. This is the single place the unit
/// convention lives; changing it rescales every downstream number.
pub const ML_PER_SAMPLE: f64 = 100.0;

/// Concentration in CFU/100 mL from a total load and a daily flow.
///
/// `flow` must already be positive; callers default it from the
/// scenario's type parameters before division.
#[must_use]
pub fn concentration(total_surviving_load: f64, flow: f64) -> f64 {
    total_surviving_load / (flow / ML_PER_SAMPLE)
}

/// Aggregates a link table into one row per receptor.
///
/// Missing or non-positive receptor flows are replaced by the scenario's
/// type default before division, so a raw zero flow can never divide.
/// Rows come out ordered by receptor id for deterministic tables.
#[must_use]
pub fn aggregate(links: &[Link], receptors: &[Receptor], scenario: &Scenario) -> Vec<ConcentrationRow> {
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for link in links {
        *totals.entry(link.receptor_id.as_str()).or_insert(0.0) += link.surviving_load;
    }

    let mut rows: Vec<ConcentrationRow> = receptors
        .iter()
        .map(|receptor| {
            let total = totals.get(receptor.id.as_str()).copied().unwrap_or(0.0);
            let flow = effective_flow(receptor, scenario);
            ConcentrationRow {
                receptor_id: receptor.id.clone(),
                receptor_type: receptor.receptor_type,
                total_surviving_load: total,
                flow,
                concentration: concentration(total, flow),
            }
        })
        .collect();

    rows.sort_by(|a, b| a.receptor_id.cmp(&b.receptor_id));

    log::debug!(
        "aggregated {} links into {} receptor rows",
        links.len(),
        rows.len()
    );

    rows
}

/// The flow used as the dilution denominator: the receptor's own flow
/// when present and positive, otherwise the scenario's type default.
/// Defaulting is a documented, expected path, not an anomaly.
#[must_use]
pub fn effective_flow(receptor: &Receptor, scenario: &Scenario) -> f64 {
    match receptor.flow {
        Some(flow) if flow > 0.0 => flow,
        _ => scenario.type_params(receptor.receptor_type).default_flow,
    }
}
