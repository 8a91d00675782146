//! Scenario parameter bundles and their validation.
//!
//! A [`Scenario`] is an immutable, named bundle of every free parameter a
//! run depends on. Nothing in the pipeline reads ambient defaults: all
//! lookups (efficiency overrides, per-type radius and flow) go through the
//! scenario object, which keeps every run auditable and makes parallel
//! grid evaluation safe by construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ReceptorType, SourceCategory};

/// Per-receptor-type parameters: search radius and fallback flow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReceptorTypeParams {
    /// Search radius in meters; only sources within this great-circle
    /// distance of a receptor can contribute to it.
    pub radius_m: f64,
    /// Flow substituted when a receptor's raw flow is missing or
    /// non-positive, L/day.
    pub default_flow: f64,
}

/// A mass-preserving reallocation of population between containment
/// classes, applied before load computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    /// Category whose sources are split.
    pub from: SourceCategory,
    /// Category the moved fraction is reassigned to.
    pub to: SourceCategory,
    /// Fraction p ∈ [0, 1] of each source's population that moves.
    pub fraction: f64,
}

/// An immutable named parameter bundle. Fully determines a deterministic
/// run given fixed input tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Human-readable scenario name, used in logs and error messages.
    pub name: String,
    /// Exponential decay coefficient k, per meter. 0 means no decay.
    pub decay: f64,
    /// Emission rate EFIO in CFU/person/day.
    pub emission_rate: f64,
    /// Population substituted when a source record has none.
    pub default_household_size: f64,
    /// Per-category containment efficiency overrides (η ∈ [0, 1]).
    pub efficiency_overrides: BTreeMap<SourceCategory, f64>,
    /// Per-type search radius and default flow.
    pub receptor_types: BTreeMap<ReceptorType, ReceptorTypeParams>,
    /// Population reallocations applied before load computation.
    pub interventions: Vec<Intervention>,
    /// Observed concentrations strictly below this value are excluded
    /// from rank-correlation metrics during calibration (CFU/100 mL).
    /// 0 keeps every observation.
    pub detection_floor: f64,
}

impl Default for Scenario {
    fn default() -> Self {
        let mut receptor_types = BTreeMap::new();
        receptor_types.insert(
            ReceptorType::Private,
            ReceptorTypeParams {
                radius_m: 50.0,
                default_flow: 2_000.0,
            },
        );
        receptor_types.insert(
            ReceptorType::Government,
            ReceptorTypeParams {
                radius_m: 100.0,
                default_flow: 10_000.0,
            },
        );

        Self {
            name: "baseline".to_string(),
            decay: 0.1,
            emission_rate: 1e7,
            default_household_size: 5.0,
            efficiency_overrides: BTreeMap::new(),
            receptor_types,
            interventions: Vec::new(),
            detection_floor: 0.0,
        }
    }
}

impl Scenario {
    /// Radius/flow parameters for a receptor type.
    ///
    /// Types absent from the scenario file fall back to the built-in
    /// defaults, so a partial TOML scenario is always complete.
    #[must_use]
    pub fn type_params(&self, receptor_type: ReceptorType) -> ReceptorTypeParams {
        self.receptor_types
            .get(&receptor_type)
            .copied()
            .unwrap_or_else(|| {
                let defaults = Self::default();
                defaults.receptor_types[&receptor_type]
            })
    }

    /// Scenario-level containment efficiency for a category: the override
    /// if present, otherwise the category default.
    #[must_use]
    pub fn category_efficiency(&self, category: SourceCategory) -> f64 {
        self.efficiency_overrides
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_efficiency())
    }

    /// Validates every field, failing fast before any computation.
    ///
    /// # Errors
    ///
    /// Returns the first [`ScenarioError`] found, naming the invalid
    /// field. Partial results from a malformed scenario are strictly
    /// worse than refusing to run.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if !self.decay.is_finite() || self.decay < 0.0 {
            return Err(ScenarioError::InvalidDecay {
                scenario: self.name.clone(),
                value: self.decay,
            });
        }
        if !self.emission_rate.is_finite() || self.emission_rate <= 0.0 {
            return Err(ScenarioError::InvalidEmissionRate {
                scenario: self.name.clone(),
                value: self.emission_rate,
            });
        }
        if !self.default_household_size.is_finite() || self.default_household_size <= 0.0 {
            return Err(ScenarioError::InvalidHouseholdSize {
                scenario: self.name.clone(),
                value: self.default_household_size,
            });
        }
        for (&category, &eta) in &self.efficiency_overrides {
            if !(0.0..=1.0).contains(&eta) {
                return Err(ScenarioError::InvalidEfficiency {
                    scenario: self.name.clone(),
                    category,
                    value: eta,
                });
            }
        }
        for (&receptor_type, params) in &self.receptor_types {
            if !params.radius_m.is_finite() || params.radius_m <= 0.0 {
                return Err(ScenarioError::InvalidRadius {
                    scenario: self.name.clone(),
                    receptor_type,
                    value: params.radius_m,
                });
            }
            if !params.default_flow.is_finite() || params.default_flow <= 0.0 {
                return Err(ScenarioError::InvalidFlow {
                    scenario: self.name.clone(),
                    receptor_type,
                    value: params.default_flow,
                });
            }
        }
        for intervention in &self.interventions {
            if !(0.0..=1.0).contains(&intervention.fraction) {
                return Err(ScenarioError::InvalidInterventionFraction {
                    scenario: self.name.clone(),
                    from: intervention.from,
                    to: intervention.to,
                    value: intervention.fraction,
                });
            }
        }
        if !self.detection_floor.is_finite() || self.detection_floor < 0.0 {
            return Err(ScenarioError::InvalidDetectionFloor {
                scenario: self.name.clone(),
                value: self.detection_floor,
            });
        }
        Ok(())
    }
}

/// A scenario field failed validation.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// Decay coefficient was negative or non-finite.
    #[error("scenario `{scenario}`: decay must be >= 0, got {value}")]
    InvalidDecay {
        /// Scenario name.
        scenario: String,
        /// Offending value.
        value: f64,
    },

    /// Emission rate was non-positive or non-finite.
    #[error("scenario `{scenario}`: emission_rate must be > 0, got {value}")]
    InvalidEmissionRate {
        /// Scenario name.
        scenario: String,
        /// Offending value.
        value: f64,
    },

    /// Default household size was non-positive or non-finite.
    #[error("scenario `{scenario}`: default_household_size must be > 0, got {value}")]
    InvalidHouseholdSize {
        /// Scenario name.
        scenario: String,
        /// Offending value.
        value: f64,
    },

    /// An efficiency override fell outside [0, 1].
    #[error("scenario `{scenario}`: efficiency override for {category} must be in [0, 1], got {value}")]
    InvalidEfficiency {
        /// Scenario name.
        scenario: String,
        /// Category whose override is invalid.
        category: SourceCategory,
        /// Offending value.
        value: f64,
    },

    /// A receptor type's search radius was non-positive or non-finite.
    #[error("scenario `{scenario}`: radius_m for {receptor_type} must be > 0, got {value}")]
    InvalidRadius {
        /// Scenario name.
        scenario: String,
        /// Receptor type whose radius is invalid.
        receptor_type: ReceptorType,
        /// Offending value.
        value: f64,
    },

    /// A receptor type's default flow was non-positive or non-finite.
    #[error("scenario `{scenario}`: default_flow for {receptor_type} must be > 0, got {value}")]
    InvalidFlow {
        /// Scenario name.
        scenario: String,
        /// Receptor type whose default flow is invalid.
        receptor_type: ReceptorType,
        /// Offending value.
        value: f64,
    },

    /// An intervention fraction fell outside [0, 1].
    #[error(
        "scenario `{scenario}`: intervention fraction {from} -> {to} must be in [0, 1], got {value}"
    )]
    InvalidInterventionFraction {
        /// Scenario name.
        scenario: String,
        /// Category population is moved from.
        from: SourceCategory,
        /// Category population is moved to.
        to: SourceCategory,
        /// Offending value.
        value: f64,
    },

    /// Detection floor was negative or non-finite.
    #[error("scenario `{scenario}`: detection_floor must be >= 0, got {value}")]
    InvalidDetectionFloor {
        /// Scenario name.
        scenario: String,
        /// Offending value.
        value: f64,
    },
}
