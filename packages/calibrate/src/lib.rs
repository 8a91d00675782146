#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Parameter calibration engine.
//!
//! Runs the full pipeline once per point of a cross-product parameter
//! grid (decay coefficient × emission scale factor × efficiency override
//! set), scores each point against lab ground truth, and selects a best
//! point through a deterministic tie-break cascade: highest Spearman ρ,
//! then highest Kendall τ, then lowest log-space RMSE.
//!
//! With few positive ground-truth observations, rank agreement is a more
//! robust optimization target than absolute error; absolute error stays
//! in the cascade because rank metrics alone cannot separate parameter
//! sets that all reach perfect rank agreement on a small sample.
//!
//! A grid point that matches zero observations scores worst-possible
//! (infinite RMSE, undefined correlations) and is recorded, never
//! dropped: the full grid stays auditable and the search never aborts
//! mid-grid. Configuration errors (empty grid dimension, empty ground
//! truth, an invalid materialized scenario) abort before any scenario
//! runs.

pub mod metrics;
pub mod progress;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use wellrisk_models::{Receptor, Scenario, SourceCategory, SourceRecord};
use wellrisk_pipeline::{LinkCache, PipelineError};

use crate::progress::ProgressCallback;

/// Errors from the calibration engine.
#[derive(Debug, thiserror::Error)]
pub enum CalibrateError {
    /// The ground-truth table held no observations.
    #[error("ground truth table is empty; nothing to calibrate against")]
    EmptyGroundTruth,

    /// A grid dimension held no candidate values.
    #[error("calibration grid dimension `{0}` is empty")]
    EmptyGridDimension(&'static str),

    /// A materialized scenario failed validation or a run failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Candidate values for each grid dimension, expanded as a full
/// cross-product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    /// Candidate decay coefficients, per meter.
    pub decay: Vec<f64>,
    /// Multipliers applied to the base scenario's emission rate.
    pub emission_factor: Vec<f64>,
    /// Candidate per-category efficiency override sets. An empty map
    /// means "use the base scenario's efficiencies unchanged".
    pub efficiency_sets: Vec<BTreeMap<SourceCategory, f64>>,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            decay: vec![0.01, 0.05, 0.1, 0.5, 1.0],
            emission_factor: vec![0.1, 1.0, 10.0],
            efficiency_sets: vec![BTreeMap::new()],
        }
    }
}

impl GridSpec {
    /// Expands the cross-product into concrete grid points, in
    /// deterministic dimension order (decay outermost, efficiency sets
    /// innermost).
    ///
    /// # Errors
    ///
    /// Returns [`CalibrateError::EmptyGridDimension`] when any dimension
    /// has no candidates.
    pub fn expand(&self) -> Result<Vec<GridPoint>, CalibrateError> {
        if self.decay.is_empty() {
            return Err(CalibrateError::EmptyGridDimension("decay"));
        }
        if self.emission_factor.is_empty() {
            return Err(CalibrateError::EmptyGridDimension("emission_factor"));
        }
        if self.efficiency_sets.is_empty() {
            return Err(CalibrateError::EmptyGridDimension("efficiency_sets"));
        }

        let mut points =
            Vec::with_capacity(self.decay.len() * self.emission_factor.len() * self.efficiency_sets.len());
        for &decay in &self.decay {
            for &emission_factor in &self.emission_factor {
                for efficiency_set in &self.efficiency_sets {
                    points.push(GridPoint {
                        decay,
                        emission_factor,
                        efficiency_overrides: efficiency_set.clone(),
                    });
                }
            }
        }
        Ok(points)
    }
}

/// One parameter combination under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Decay coefficient for this point, per meter.
    pub decay: f64,
    /// Multiplier on the base scenario's emission rate.
    pub emission_factor: f64,
    /// Per-category efficiency overrides layered over the base
    /// scenario's.
    pub efficiency_overrides: BTreeMap<SourceCategory, f64>,
}

impl GridPoint {
    /// Materializes a runnable scenario: the base scenario with this
    /// point's overrides applied.
    #[must_use]
    pub fn materialize(&self, base: &Scenario) -> Scenario {
        let mut scenario = base.clone();
        scenario.decay = self.decay;
        scenario.emission_rate = base.emission_rate * self.emission_factor;
        for (&category, &eta) in &self.efficiency_overrides {
            scenario.efficiency_overrides.insert(category, eta);
        }
        scenario
    }
}

/// The score vector of one grid point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridScore {
    /// The parameters scored.
    pub point: GridPoint,
    /// Matched (modeled, observed) sample count.
    pub n: usize,
    /// RMSE of `log10(v + 1)`-transformed series; infinite when n = 0.
    pub rmse_log: f64,
    /// Spearman rank correlation; `None` when undefined.
    pub spearman: Option<f64>,
    /// Kendall tau-b; `None` when undefined.
    pub kendall: Option<f64>,
    /// Pearson on log-transformed values. Diagnostic only.
    pub pearson_log: Option<f64>,
}

/// The selected best point plus the full scored grid for audit.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationResult {
    /// Index of the selected point in `grid`.
    pub best_index: usize,
    /// The selected score record.
    pub best: GridScore,
    /// Every scored grid point, in grid order.
    pub grid: Vec<GridScore>,
}

/// Runs the whole grid and selects the best point.
///
/// Every materialized scenario is validated up front, so an invalid
/// grid value aborts before any scenario runs; after that the grid
/// always completes with exactly one score per point. All points share
/// one [`LinkCache`], so points differing only in emission factor or
/// efficiencies reuse the spatial pass.
///
/// # Errors
///
/// Returns [`CalibrateError`] on an empty grid dimension, an empty
/// ground-truth table, or an invalid materialized scenario.
pub fn run_grid(
    base: &Scenario,
    spec: &GridSpec,
    sources: &[SourceRecord],
    receptors: &[Receptor],
    ground_truth: &BTreeMap<String, f64>,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<CalibrationResult, CalibrateError> {
    if ground_truth.is_empty() {
        return Err(CalibrateError::EmptyGroundTruth);
    }

    let points = spec.expand()?;
    let scenarios: Vec<Scenario> = points.iter().map(|p| p.materialize(base)).collect();
    for scenario in &scenarios {
        scenario.validate().map_err(PipelineError::from)?;
    }

    log::info!(
        "calibrating over {} grid points against {} observations",
        points.len(),
        ground_truth.len()
    );
    progress.set_total(points.len() as u64);

    let mut cache = LinkCache::new(1);
    let mut grid = Vec::with_capacity(points.len());

    for (point, scenario) in points.into_iter().zip(scenarios) {
        progress.set_message(format!(
            "k={} f={} ({} overrides)",
            point.decay,
            point.emission_factor,
            point.efficiency_overrides.len()
        ));

        let run = wellrisk_pipeline::run_scenario_cached(sources, receptors, &scenario, &mut cache)?;
        let score = score_run(point, &run.concentrations, ground_truth, base.detection_floor);
        grid.push(score);
        progress.inc(1);
    }

    // `expand()` rejects empty dimensions, so the grid has at least one
    // point and a best always exists.
    let best_index = select_best(&grid).unwrap_or_default();
    let best = grid[best_index].clone();
    progress.finish(format!(
        "best: k={} f={} (ρ={:?}, rmse_log={:.4})",
        best.point.decay, best.point.emission_factor, best.spearman, best.rmse_log
    ));

    Ok(CalibrationResult {
        best_index,
        best,
        grid,
    })
}

/// Scores one completed run against the ground truth.
///
/// Modeled and observed values are inner-joined on receptor id; the
/// rank metrics additionally drop pairs whose observation lies strictly
/// below `detection_floor` (near-zero lab readings carry little rank
/// information and can invert rankings on measurement noise alone).
/// RMSE always uses the full matched set.
#[must_use]
pub fn score_run(
    point: GridPoint,
    concentrations: &[wellrisk_models::ConcentrationRow],
    ground_truth: &BTreeMap<String, f64>,
    detection_floor: f64,
) -> GridScore {
    let mut modeled = Vec::new();
    let mut observed = Vec::new();
    for row in concentrations {
        if let Some(&truth) = ground_truth.get(&row.receptor_id) {
            modeled.push(row.concentration);
            observed.push(truth);
        }
    }

    let n = modeled.len();
    if n == 0 {
        log::debug!(
            "grid point k={} f={}: no matched observations, scoring worst-possible",
            point.decay,
            point.emission_factor
        );
        return GridScore {
            point,
            n,
            rmse_log: f64::INFINITY,
            spearman: None,
            kendall: None,
            pearson_log: None,
        };
    }

    let (rank_modeled, rank_observed): (Vec<f64>, Vec<f64>) = modeled
        .iter()
        .zip(&observed)
        .filter(|&(_, &obs)| obs >= detection_floor)
        .map(|(&m, &o)| (m, o))
        .unzip();

    GridScore {
        rmse_log: metrics::rmse_log10(&modeled, &observed).unwrap_or(f64::INFINITY),
        spearman: metrics::spearman(&rank_modeled, &rank_observed),
        kendall: metrics::kendall(&rank_modeled, &rank_observed),
        pearson_log: metrics::pearson_log10(&modeled, &observed),
        point,
        n,
    }
}

/// Index of the best score under the tie-break cascade: highest
/// Spearman, then highest Kendall, then lowest RMSE. Undefined
/// correlations compare as worse than any defined value. A full tie
/// keeps the earlier grid point. Returns `None` for an empty grid.
#[must_use]
pub fn select_best(grid: &[GridScore]) -> Option<usize> {
    if grid.is_empty() {
        return None;
    }
    let mut best = 0;
    for candidate in 1..grid.len() {
        if better(&grid[candidate], &grid[best]) {
            best = candidate;
        }
    }
    Some(best)
}

/// Whether `candidate` strictly beats `incumbent` under the cascade.
fn better(candidate: &GridScore, incumbent: &GridScore) -> bool {
    match cmp_correlation(candidate.spearman, incumbent.spearman) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match cmp_correlation(candidate.kendall, incumbent.kendall) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => {
                candidate.rmse_log.total_cmp(&incumbent.rmse_log) == Ordering::Less
            }
        },
    }
}

/// `None` (undefined) orders below every defined correlation.
fn cmp_correlation(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use wellrisk_models::{ConcentrationRow, ReceptorType, SourceCategory};

    use super::*;
    use crate::progress::null_progress;

    /// One degree of longitude at the equator, meters (haversine radius).
    const DEG_AT_EQUATOR_M: f64 = 111_195.0;

    fn point(decay: f64) -> GridPoint {
        GridPoint {
            decay,
            emission_factor: 1.0,
            efficiency_overrides: BTreeMap::new(),
        }
    }

    fn score(spearman: Option<f64>, kendall: Option<f64>, rmse_log: f64) -> GridScore {
        GridScore {
            point: point(0.1),
            n: 5,
            rmse_log,
            spearman,
            kendall,
            pearson_log: None,
        }
    }

    fn conc_row(id: &str, concentration: f64) -> ConcentrationRow {
        ConcentrationRow {
            receptor_id: id.to_string(),
            receptor_type: ReceptorType::Private,
            total_surviving_load: concentration * 10.0,
            flow: 1_000.0,
            concentration,
        }
    }

    #[test]
    fn grid_expansion_is_a_full_cross_product() {
        let spec = GridSpec {
            decay: vec![0.1, 0.5],
            emission_factor: vec![1.0, 2.0, 3.0],
            efficiency_sets: vec![BTreeMap::new()],
        };
        assert_eq!(spec.expand().unwrap().len(), 6);
    }

    #[test]
    fn empty_dimension_is_a_configuration_error() {
        let spec = GridSpec {
            decay: vec![],
            ..GridSpec::default()
        };
        let err = spec.expand().unwrap_err();
        assert!(err.to_string().contains("decay"));
    }

    #[test]
    fn materialize_layers_overrides_over_base() {
        let base = Scenario {
            emission_rate: 1e7,
            ..Scenario::default()
        };
        let mut overrides = BTreeMap::new();
        overrides.insert(SourceCategory::UnlinedPit, 0.4);
        let gp = GridPoint {
            decay: 0.3,
            emission_factor: 10.0,
            efficiency_overrides: overrides,
        };

        let scenario = gp.materialize(&base);
        assert!((scenario.decay - 0.3).abs() < 1e-12);
        assert!((scenario.emission_rate - 1e8).abs() < 1.0);
        assert!((scenario.category_efficiency(SourceCategory::UnlinedPit) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn tie_break_prefers_lower_rmse_when_correlations_tie() {
        let grid = vec![
            score(Some(0.9), Some(0.8), 2.0),
            score(Some(0.9), Some(0.8), 1.0),
        ];
        assert_eq!(select_best(&grid), Some(1));
    }

    #[test]
    fn tie_break_prefers_higher_kendall_before_rmse() {
        let grid = vec![
            score(Some(0.9), Some(0.7), 0.5),
            score(Some(0.9), Some(0.8), 2.0),
        ];
        assert_eq!(select_best(&grid), Some(1));
    }

    #[test]
    fn spearman_dominates_the_cascade() {
        let grid = vec![
            score(Some(0.5), Some(1.0), 0.0),
            score(Some(0.9), Some(0.0), 9.0),
        ];
        assert_eq!(select_best(&grid), Some(1));
    }

    #[test]
    fn undefined_correlation_loses_to_any_defined_value() {
        let grid = vec![
            score(None, None, 0.0),
            score(Some(-0.9), Some(-0.9), 5.0),
        ];
        assert_eq!(select_best(&grid), Some(1));
    }

    #[test]
    fn full_tie_keeps_the_earlier_point() {
        let grid = vec![
            score(Some(0.9), Some(0.8), 1.0),
            score(Some(0.9), Some(0.8), 1.0),
        ];
        assert_eq!(select_best(&grid), Some(0));
    }

    #[test]
    fn empty_grid_has_no_best() {
        assert_eq!(select_best(&[]), None);
    }

    #[test]
    fn unmatched_run_scores_worst_possible() {
        let truth: BTreeMap<String, f64> = [("other".to_string(), 5.0)].into();
        let result = score_run(point(0.1), &[conc_row("r1", 3.0)], &truth, 0.0);
        assert_eq!(result.n, 0);
        assert!(result.rmse_log.is_infinite());
        assert!(result.spearman.is_none());
        assert!(result.kendall.is_none());
    }

    #[test]
    fn detection_floor_drops_pairs_from_rank_metrics_only() {
        let rows = vec![
            conc_row("r1", 10.0),
            conc_row("r2", 100.0),
            conc_row("r3", 1_000.0),
        ];
        // r3's observation sits below the floor and is discordant; with
        // the floor applied the remaining pairs rank perfectly.
        let truth: BTreeMap<String, f64> = [
            ("r1".to_string(), 20.0),
            ("r2".to_string(), 200.0),
            ("r3".to_string(), 0.5),
        ]
        .into();

        let unfloored = score_run(point(0.1), &rows, &truth, 0.0);
        assert!(unfloored.spearman.unwrap() < 1.0);
        assert_eq!(unfloored.n, 3);

        let floored = score_run(point(0.1), &rows, &truth, 1.0);
        assert!((floored.spearman.unwrap() - 1.0).abs() < 1e-12);
        // RMSE still uses all three matched pairs.
        assert_eq!(floored.n, 3);
        assert!((floored.rmse_log - unfloored.rmse_log).abs() < 1e-12);
    }

    fn calibration_fixture() -> (Vec<SourceRecord>, Vec<Receptor>, BTreeMap<String, f64>) {
        // Three receptors at increasing distance from a single source.
        let source = SourceRecord {
            id: "s1".to_string(),
            lat: 0.0,
            lon: 0.0,
            category: SourceCategory::UnlinedPit,
            population: 50.0,
            efficiency: None,
            load: None,
        };
        let receptors: Vec<Receptor> = [10.0, 25.0, 45.0]
            .iter()
            .enumerate()
            .map(|(i, &meters)| Receptor {
                id: format!("r{i}"),
                receptor_type: ReceptorType::Private,
                lat: 0.0,
                lon: meters / DEG_AT_EQUATOR_M,
                flow: Some(2_000.0),
                observed: None,
            })
            .collect();
        // Observations decline with distance, matching any positive decay.
        let truth: BTreeMap<String, f64> = [
            ("r0".to_string(), 900.0),
            ("r1".to_string(), 300.0),
            ("r2".to_string(), 80.0),
        ]
        .into();
        (vec![source], receptors, truth)
    }

    #[test]
    fn grid_always_returns_one_score_per_point() {
        let (sources, receptors, truth) = calibration_fixture();
        let spec = GridSpec {
            decay: vec![0.0, 0.1, 0.5],
            emission_factor: vec![1.0, 10.0],
            efficiency_sets: vec![BTreeMap::new()],
        };

        let result = run_grid(
            &Scenario::default(),
            &spec,
            &sources,
            &receptors,
            &truth,
            &null_progress(),
        )
        .unwrap();
        assert_eq!(result.grid.len(), 6);
        assert_eq!(result.best, result.grid[result.best_index]);
    }

    #[test]
    fn grid_records_unmatched_points_instead_of_dropping_them() {
        let (sources, receptors, _) = calibration_fixture();
        // Ground truth for receptors that do not exist in the run.
        let truth: BTreeMap<String, f64> = [("ghost".to_string(), 1.0)].into();

        let result = run_grid(
            &Scenario::default(),
            &GridSpec::default(),
            &sources,
            &receptors,
            &truth,
            &null_progress(),
        )
        .unwrap();
        assert_eq!(result.grid.len(), 15);
        assert!(result.grid.iter().all(|s| s.n == 0));
        assert!(result.grid.iter().all(|s| s.rmse_log.is_infinite()));
    }

    #[test]
    fn empty_ground_truth_aborts_before_running() {
        let (sources, receptors, _) = calibration_fixture();
        let err = run_grid(
            &Scenario::default(),
            &GridSpec::default(),
            &sources,
            &receptors,
            &BTreeMap::new(),
            &null_progress(),
        )
        .unwrap_err();
        assert!(matches!(err, CalibrateError::EmptyGroundTruth));
    }

    #[test]
    fn rmse_breaks_rank_ties_across_decay_candidates() {
        // Every positive decay ranks the three receptors identically
        // (ρ = τ = 1), so selection must fall through to RMSE.
        let (sources, receptors, truth) = calibration_fixture();
        let spec = GridSpec {
            decay: vec![0.01, 0.1, 1.0],
            emission_factor: vec![1.0],
            efficiency_sets: vec![BTreeMap::new()],
        };

        let result = run_grid(
            &Scenario::default(),
            &spec,
            &sources,
            &receptors,
            &truth,
            &null_progress(),
        )
        .unwrap();

        let perfect = result
            .grid
            .iter()
            .filter(|s| s.spearman.is_some_and(|rho| (rho - 1.0).abs() < 1e-12))
            .count();
        assert!(perfect >= 2, "fixture should produce rank ties");
        let best_rmse = result.best.rmse_log;
        for s in &result.grid {
            if s.spearman.is_some_and(|rho| (rho - 1.0).abs() < 1e-12) {
                assert!(best_rmse <= s.rmse_log);
            }
        }
    }

    #[test]
    fn invalid_grid_value_aborts_before_any_run() {
        let (sources, receptors, truth) = calibration_fixture();
        let mut bad_set = BTreeMap::new();
        bad_set.insert(SourceCategory::SepticTank, 1.4);
        let spec = GridSpec {
            decay: vec![0.1],
            emission_factor: vec![1.0],
            efficiency_sets: vec![bad_set],
        };

        let err = run_grid(
            &Scenario::default(),
            &spec,
            &sources,
            &receptors,
            &truth,
            &null_progress(),
        )
        .unwrap_err();
        assert!(matches!(err, CalibrateError::Pipeline(_)));
    }
}
