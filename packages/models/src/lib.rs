#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Core data model for the groundwater contamination pipeline.
//!
//! These types are shared between the load model, the spatial linking
//! engine, the concentration aggregator, and the calibration engine. They
//! carry no behaviour beyond defaults and validation; the ingestion crate
//! is responsible for producing them from canonical CSV tables, and the
//! core engines only ever accept these standardized shapes.

pub mod scenario;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use scenario::{Intervention, ReceptorTypeParams, Scenario, ScenarioError};

/// Containment class of an on-site sanitation facility.
///
/// The class determines the default containment efficiency η — the
/// fraction of generated load retained on site rather than released to
/// the subsurface. Scenario overrides take precedence over these defaults.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceCategory {
    /// Sealed tank with soakaway; moderate retention.
    SepticTank,
    /// Pit latrine with a lined pit.
    LinedPit,
    /// Pit latrine with an unlined pit; most of the load reaches soil.
    UnlinedPit,
    /// Dry composting toilet; near-complete retention.
    Composting,
    /// No facility; nothing is retained.
    OpenDefecation,
}

impl SourceCategory {
    /// All categories, in canonical order.
    pub const ALL: &[Self] = &[
        Self::SepticTank,
        Self::LinedPit,
        Self::UnlinedPit,
        Self::Composting,
        Self::OpenDefecation,
    ];

    /// Default containment efficiency η for this category.
    #[must_use]
    pub const fn default_efficiency(self) -> f64 {
        match self {
            Self::SepticTank => 0.50,
            Self::LinedPit => 0.70,
            Self::UnlinedPit => 0.20,
            Self::Composting => 0.90,
            Self::OpenDefecation => 0.00,
        }
    }
}

/// Class of water point at which concentration is evaluated.
///
/// Each type carries its own search radius and default abstraction flow
/// (see [`ReceptorTypeParams`]); government boreholes are typically deeper
/// and higher-yield than private wells, so they draw from a wider area.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceptorType {
    /// Privately owned shallow well.
    Private,
    /// Government-operated borehole.
    Government,
}

impl ReceptorType {
    /// All receptor types, in canonical order.
    pub const ALL: &[Self] = &[Self::Private, Self::Government];
}

/// One contamination-generating point (a household sanitation facility).
///
/// Produced by the ingestion crate from the canonical source table.
/// `load` is `None` until the load model has run; it is never mutated
/// afterwards within a scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Stable source identifier.
    pub id: String,
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
    /// Containment class.
    pub category: SourceCategory,
    /// Population served. Fractional after intervention splits.
    pub population: f64,
    /// Per-record containment efficiency override (η ∈ [0, 1]).
    pub efficiency: Option<f64>,
    /// Daily emission load in CFU/day, filled in by the load model.
    pub load: Option<f64>,
}

/// One water point at which concentration is evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receptor {
    /// Stable receptor identifier.
    pub id: String,
    /// Receptor class; selects search radius and default flow.
    pub receptor_type: ReceptorType,
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
    /// Abstraction flow in L/day. Missing or non-positive values are
    /// replaced by the scenario's type default before any division.
    pub flow: Option<f64>,
    /// Observed concentration in CFU/100 mL (lab ground truth), if any.
    pub observed: Option<f64>,
}

/// A directed source→receptor relationship within the search radius.
///
/// An intermediate artifact: recomputed on every run, never canonical
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Identifier of the emitting source.
    pub source_id: String,
    /// Identifier of the receiving receptor.
    pub receptor_id: String,
    /// Receptor class the link was computed under.
    pub receptor_type: ReceptorType,
    /// Great-circle distance in meters.
    pub distance_m: f64,
    /// Load remaining after exponential distance decay, CFU/day.
    pub surviving_load: f64,
}

/// Per-receptor aggregation result.
///
/// Every receptor appears exactly once, including receptors with no
/// in-radius source (total 0, concentration 0) so that downstream joins
/// against lab data see a true zero rather than a missing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationRow {
    /// Receptor identifier.
    pub receptor_id: String,
    /// Receptor class.
    pub receptor_type: ReceptorType,
    /// Sum of surviving load over all incoming links, CFU/day.
    pub total_surviving_load: f64,
    /// Flow used as the dilution denominator, L/day (after defaulting).
    pub flow: f64,
    /// Modeled concentration in CFU/100 mL.
    pub concentration: f64,
}
