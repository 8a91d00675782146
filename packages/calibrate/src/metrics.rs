//! Scoring metrics for calibration.
//!
//! Concentrations span many orders of magnitude, so absolute error is
//! always measured in log space; rank correlations (Spearman, Kendall
//! tau-b) measure ordering agreement independent of scale. Every metric
//! returns `Option<f64>`: `None` means the value is undefined for the
//! given data (fewer than two points, or a constant series) and must
//! compare as worse than any defined value — never as a propagating NaN.

use std::cmp::Ordering;

/// Offset added before `log10` so a true zero maps to `log10(1) = 0`
/// instead of −∞. Lab non-detects are recorded as zero, so this path is
/// routine.
pub const LOG_EPSILON: f64 = 1.0;

/// Root-mean-square error between the two series after a
/// `log10(v + LOG_EPSILON)` transform of each.
///
/// Returns `None` on an empty or length-mismatched input.
#[must_use]
pub fn rmse_log10(modeled: &[f64], observed: &[f64]) -> Option<f64> {
    if modeled.is_empty() || modeled.len() != observed.len() {
        return None;
    }

    let sum_sq: f64 = modeled
        .iter()
        .zip(observed)
        .map(|(&m, &o)| {
            let diff = (m + LOG_EPSILON).log10() - (o + LOG_EPSILON).log10();
            diff * diff
        })
        .sum();

    #[allow(clippy::cast_precision_loss)]
    Some((sum_sq / modeled.len() as f64).sqrt())
}

/// Pearson correlation coefficient.
///
/// Returns `None` when n < 2 or either series has zero variance.
#[must_use]
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() < 2 || a.len() != b.len() {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = (var_a * var_b).sqrt();
    if denom <= 0.0 || !denom.is_finite() {
        return None;
    }
    Some(cov / denom)
}

/// Pearson correlation of the `log10(v + LOG_EPSILON)` transforms.
/// Secondary diagnostic only; never used for selection.
#[must_use]
pub fn pearson_log10(a: &[f64], b: &[f64]) -> Option<f64> {
    let log_a: Vec<f64> = a.iter().map(|&v| (v + LOG_EPSILON).log10()).collect();
    let log_b: Vec<f64> = b.iter().map(|&v| (v + LOG_EPSILON).log10()).collect();
    pearson(&log_a, &log_b)
}

/// Spearman rank correlation: Pearson on average-tied ranks.
///
/// Returns `None` when n < 2 or either series is constant (rank
/// variance zero).
#[must_use]
pub fn spearman(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() < 2 || a.len() != b.len() {
        return None;
    }
    pearson(&average_ranks(a), &average_ranks(b))
}

/// Kendall rank correlation, tau-b (tie-corrected).
///
/// O(n²) over pairs, which is fine at calibration sample sizes (tens of
/// matched lab observations). Returns `None` when n < 2 or either
/// series is constant.
#[must_use]
pub fn kendall(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len();
    if n < 2 || n != b.len() {
        return None;
    }

    let mut concordant = 0_u64;
    let mut discordant = 0_u64;
    let mut tied_a = 0_u64;
    let mut tied_b = 0_u64;

    for i in 0..n {
        for j in (i + 1)..n {
            let ord_a = a[i].total_cmp(&a[j]);
            let ord_b = b[i].total_cmp(&b[j]);
            match (ord_a, ord_b) {
                (Ordering::Equal, Ordering::Equal) => {
                    tied_a += 1;
                    tied_b += 1;
                }
                (Ordering::Equal, _) => tied_a += 1,
                (_, Ordering::Equal) => tied_b += 1,
                (x, y) if x == y => concordant += 1,
                _ => discordant += 1,
            }
        }
    }

    let n0 = (n * (n - 1) / 2) as u64;
    #[allow(clippy::cast_precision_loss)]
    let denom = (((n0 - tied_a) as f64) * ((n0 - tied_b) as f64)).sqrt();
    if denom <= 0.0 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    Some((concordant as f64 - discordant as f64) / denom)
}

/// Average ranks (1-based); tied values share the mean of the ranks
/// they span.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len()
            && values[order[end + 1]].total_cmp(&values[order[start]]) == Ordering::Equal
        {
            end += 1;
        }
        #[allow(clippy::cast_precision_loss)]
        let avg_rank = (start + end) as f64 / 2.0 + 1.0;
        for &idx in &order[start..=end] {
            ranks[idx] = avg_rank;
        }
        start = end + 1;
    }

    ranks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rmse_of_identical_series_is_zero() {
        let v = [0.0, 10.0, 1e4];
        assert!(rmse_log10(&v, &v).unwrap().abs() < 1e-12);
    }

    #[test]
    fn rmse_matches_hand_calculation() {
        // log10(99 + 1) − log10(9 + 1) = 1 for both pairs, so RMSE = 1.
        let modeled = [99.0, 999.0];
        let observed = [9.0, 99.0];
        assert!((rmse_log10(&modeled, &observed).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rmse_of_empty_series_is_undefined() {
        assert!(rmse_log10(&[], &[]).is_none());
    }

    #[test]
    fn epsilon_maps_zero_cleanly() {
        // A modeled and observed zero must agree exactly, not hit −∞.
        assert!(rmse_log10(&[0.0], &[0.0]).unwrap().abs() < 1e-12);
    }

    #[test]
    fn spearman_is_one_for_any_monotonic_map() {
        let a: [f64; 4] = [1.0, 5.0, 20.0, 300.0];
        let b: Vec<f64> = a.iter().map(|&v| v.ln()).collect();
        assert!((spearman(&a, &b).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn spearman_is_minus_one_for_reversed_order() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [9.0, 7.0, 5.0, 3.0];
        assert!((spearman(&a, &b).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn spearman_handles_ties_with_average_ranks() {
        let a = [1.0, 2.0, 2.0, 3.0];
        let b = [1.0, 2.0, 2.0, 3.0];
        assert!((spearman(&a, &b).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn constant_series_has_undefined_correlation() {
        let a = [5.0, 5.0, 5.0];
        let b = [1.0, 2.0, 3.0];
        assert!(spearman(&a, &b).is_none());
        assert!(kendall(&a, &b).is_none());
        assert!(pearson(&a, &b).is_none());
    }

    #[test]
    fn kendall_is_one_for_concordant_series() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [10.0, 20.0, 30.0, 40.0];
        assert!((kendall(&a, &b).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn kendall_counts_discordant_pairs() {
        // One swapped pair among 4 elements: tau = (5 − 1) / 6.
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [1.0, 2.0, 4.0, 3.0];
        assert!((kendall(&a, &b).unwrap() - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn kendall_tau_b_corrects_for_ties() {
        let a = [1.0, 2.0, 2.0, 3.0];
        let b = [1.0, 2.0, 2.0, 3.0];
        assert!((kendall(&a, &b).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn single_point_is_undefined() {
        assert!(spearman(&[1.0], &[1.0]).is_none());
        assert!(kendall(&[1.0], &[1.0]).is_none());
    }

    #[test]
    fn average_ranks_share_tied_positions() {
        let ranks = average_ranks(&[10.0, 20.0, 20.0, 30.0]);
        assert_eq!(ranks, vec![1.0, 2.5, 2.5, 4.0]);
    }
}
