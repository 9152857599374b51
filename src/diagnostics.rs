// src/diagnostics.rs

use crate::config::{DiagnosticsConfig, OutlierRule};
use crate::error::{ensure_finite, PcaError, Result};
use crate::linalg_backends::{symmetric_inverse, NdarrayLinAlgBackend};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, Normal};

/// Eigenvalues at or below this fraction of the largest retained one are
/// treated as zero variance, both for T² and for the score covariance.
const RELATIVE_TOLERANCE: f64 = 1e-12;

/// Per-sample diagnostics of one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleMetrics {
    pub hotelling_t2: f64,
    pub mahalanobis: f64,
    /// Q-residual (RSS). `None` when the model has no loadings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q_residual: Option<f64>,
    pub is_outlier: bool,
}

/// T² and Q limits at the two reporting levels. A limit is `None` when it is
/// undefined for the data (too few samples, no residual variance).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfidenceLimits {
    pub t2_95: Option<f64>,
    pub t2_99: Option<f64>,
    pub q_95: Option<f64>,
    pub q_99: Option<f64>,
}

/// Confidence ellipse of the PC1/PC2 scores. Axes are semi-axes; `angle` is
/// the rotation of the major axis from PC1, in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EllipseParams {
    pub center_x: f64,
    pub center_y: f64,
    pub major_axis: f64,
    pub minor_axis: f64,
    pub angle: f64,
    pub confidence: f64,
}

/// Everything the calculator produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub metrics: Vec<SampleMetrics>,
    pub limits: ConfidenceLimits,
    /// Limits at the configured outlier confidence.
    pub outlier_t2_limit: Option<f64>,
    pub outlier_q_limit: Option<f64>,
    pub rule: OutlierRule,
    /// Squared loadings normalized per component.
    /// Shape: (n_features, k_components)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contributions: Option<Array2<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ellipse: Option<EllipseParams>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_ellipses: Vec<(String, EllipseParams)>,
}

impl DiagnosticsReport {
    pub fn outlier_indices(&self) -> Vec<usize> {
        self.metrics
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.is_outlier.then_some(i))
            .collect()
    }
}

/// Training-score statistics that control limits and Mahalanobis distances
/// are drawn from. Fixed at fit time so later batches of any size are judged
/// against the same reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReference {
    /// Samples the model was fitted on.
    pub n_samples: usize,
    /// Shape: (k_components)
    pub mean: Array1<f64>,
    /// Shape: (k_components, k_components)
    pub covariance: Array2<f64>,
}

impl ScoreReference {
    /// Mean and sample covariance of training scores.
    pub fn from_scores(scores: &Array2<f64>) -> Result<Self> {
        let (n, k) = scores.dim();
        if n < 2 || k == 0 {
            return Err(PcaError::Validation(format!(
                "a score reference needs at least 2 samples and 1 component, got {} and {}",
                n, k
            )));
        }
        let mean = scores
            .mean_axis(Axis(0))
            .ok_or_else(|| PcaError::Validation("no samples for the score reference".to_string()))?;
        let centered = scores - &mean;
        let covariance = centered.t().dot(&centered) / (n - 1) as f64;
        Ok(Self {
            n_samples: n,
            mean,
            covariance,
        })
    }

    pub fn n_components(&self) -> usize {
        self.mean.len()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let k = self.n_components();
        if self.n_samples < 2 {
            return Err(PcaError::Validation(format!(
                "score reference records {} training samples; at least 2 are needed",
                self.n_samples
            )));
        }
        if self.covariance.dim() != (k, k) {
            return Err(PcaError::dimension(k, self.covariance.nrows(), "score reference covariance"));
        }
        if self.mean.iter().chain(self.covariance.iter()).any(|v| !v.is_finite()) {
            return Err(PcaError::Validation("score reference contains non-finite values".to_string()));
        }
        Ok(())
    }
}

/// Inputs borrowed from a fitted model and the data it was fitted on.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsInput<'a> {
    /// Shape: (n_samples, k_components)
    pub scores: &'a Array2<f64>,
    /// Retained eigenvalues. Shape: (k_components)
    pub eigenvalues: &'a Array1<f64>,
    /// Retained followed by non-retained eigenvalues.
    pub all_eigenvalues: &'a Array1<f64>,
    /// Preprocessed samples, required together with `loadings` for Q.
    pub preprocessed: Option<&'a Array2<f64>>,
    /// Shape: (n_features, k_components)
    pub loadings: Option<&'a Array2<f64>>,
    /// Group label per sample for per-group ellipses.
    pub groups: Option<&'a [String]>,
    /// Training reference for new samples. `None` means `scores` are the
    /// training scores themselves.
    pub reference: Option<&'a ScoreReference>,
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticsCalculator {
    config: DiagnosticsConfig,
}

impl DiagnosticsCalculator {
    pub fn new(config: DiagnosticsConfig) -> Self {
        Self { config }
    }

    /// Computes per-sample metrics, limits and outlier flags.
    ///
    /// # Errors
    /// * `Dimension` when the inputs disagree on sample or component counts.
    /// * `Validation` without samples, or with fewer than 2 and no reference.
    /// * `Computation` when a retained component has zero variance, the score
    ///   covariance is singular, or a distribution cannot be built.
    pub fn compute(&self, input: DiagnosticsInput<'_>) -> Result<DiagnosticsReport> {
        let (n_samples, k) = input.scores.dim();
        if input.eigenvalues.len() != k {
            return Err(PcaError::dimension(k, input.eigenvalues.len(), "diagnostics eigenvalues"));
        }
        if k == 0 || n_samples == 0 {
            return Err(PcaError::Validation(format!(
                "diagnostics need at least 1 sample and 1 component, got {} and {}",
                n_samples, k
            )));
        }
        let own_reference;
        let reference = match input.reference {
            Some(reference) => {
                if reference.n_components() != k {
                    return Err(PcaError::dimension(reference.n_components(), k, "score reference components"));
                }
                reference
            }
            None => {
                own_reference = ScoreReference::from_scores(input.scores)?;
                &own_reference
            }
        };
        let largest = input.eigenvalues.iter().cloned().fold(0.0_f64, f64::max);
        if let Some((j, &lambda)) = input
            .eigenvalues
            .iter()
            .enumerate()
            .find(|(_, &lambda)| !(lambda > RELATIVE_TOLERANCE * largest && lambda > 0.0))
        {
            return Err(PcaError::Computation(format!(
                "component {} has variance {}; Hotelling's T² is undefined",
                j + 1,
                lambda
            )));
        }

        let t2 = hotelling_t2(input.scores, input.eigenvalues);
        let mahalanobis = mahalanobis_distances(input.scores, reference)?;
        let q = match (input.preprocessed, input.loadings) {
            (Some(x), Some(loadings)) => Some(q_residuals(x, input.scores, loadings)?),
            _ => None,
        };

        let residual_eigenvalues: Vec<f64> = input
            .all_eigenvalues
            .iter()
            .skip(k)
            .map(|&l| if l > RELATIVE_TOLERANCE * largest { l } else { 0.0 })
            .collect();
        let q_limit_at = |level: f64| -> Result<Option<f64>> {
            if q.is_some() {
                q_limit(level, &residual_eigenvalues)
            } else {
                Ok(None)
            }
        };
        let limits = ConfidenceLimits {
            t2_95: t2_limit(0.95, reference.n_samples, k)?,
            t2_99: t2_limit(0.99, reference.n_samples, k)?,
            q_95: q_limit_at(0.95)?,
            q_99: q_limit_at(0.99)?,
        };
        let outlier_t2_limit = t2_limit(self.config.confidence, reference.n_samples, k)?;
        let outlier_q_limit = q_limit_at(self.config.confidence)?;

        let metrics: Vec<SampleMetrics> = (0..n_samples)
            .map(|i| {
                let q_i = q.as_ref().map(|values| values[i]);
                SampleMetrics {
                    hotelling_t2: t2[i],
                    mahalanobis: mahalanobis[i],
                    q_residual: q_i,
                    is_outlier: is_outlier(self.config.rule, t2[i], outlier_t2_limit, q_i, outlier_q_limit),
                }
            })
            .collect();
        let n_outliers = metrics.iter().filter(|m| m.is_outlier).count();
        info!(
            "Diagnostics: {} of {} samples flagged with rule {:?} at {:.0}% confidence",
            n_outliers,
            n_samples,
            self.config.rule,
            100.0 * self.config.confidence
        );

        let contributions = input.loadings.map(variable_contributions);
        let ellipse = if k >= 2 {
            confidence_ellipse(
                input.scores.column(0),
                input.scores.column(1),
                self.config.ellipse_confidence,
            )?
        } else {
            None
        };
        let group_ellipses = match input.groups {
            Some(groups) if k >= 2 => group_ellipses(input.scores, groups, self.config.ellipse_confidence)?,
            _ => Vec::new(),
        };

        Ok(DiagnosticsReport {
            metrics,
            limits,
            outlier_t2_limit,
            outlier_q_limit,
            rule: self.config.rule,
            contributions,
            ellipse,
            group_ellipses,
        })
    }
}

/// `T²ᵢ = Σⱼ tᵢⱼ² / λⱼ`, one task per sample.
pub fn hotelling_t2(scores: &Array2<f64>, eigenvalues: &Array1<f64>) -> Vec<f64> {
    (0..scores.nrows())
        .into_par_iter()
        .map(|i| {
            scores
                .row(i)
                .iter()
                .zip(eigenvalues.iter())
                .map(|(t, lambda)| t * t / lambda)
                .sum()
        })
        .collect()
}

/// Generalized distance of each score vector from the reference centroid
/// under the reference score covariance.
pub fn mahalanobis_distances(scores: &Array2<f64>, reference: &ScoreReference) -> Result<Vec<f64>> {
    if scores.ncols() != reference.n_components() {
        return Err(PcaError::dimension(reference.n_components(), scores.ncols(), "Mahalanobis components"));
    }
    let centered = scores - &reference.mean;
    let inverse = symmetric_inverse(&NdarrayLinAlgBackend, &reference.covariance, RELATIVE_TOLERANCE)?;
    let distances: Vec<f64> = (0..scores.nrows())
        .into_par_iter()
        .map(|i| {
            let row = centered.row(i);
            row.dot(&inverse.dot(&row)).max(0.0).sqrt()
        })
        .collect();
    ensure_finite(distances.iter(), "Mahalanobis distances")?;
    Ok(distances)
}

/// `Qᵢ = ‖xᵢ - x̂ᵢ‖²` with `x̂ = T·Pᵀ`. `NaN` cells are left out of the sum.
pub fn q_residuals(x: &Array2<f64>, scores: &Array2<f64>, loadings: &Array2<f64>) -> Result<Vec<f64>> {
    if x.ncols() != loadings.nrows() {
        return Err(PcaError::dimension(loadings.nrows(), x.ncols(), "Q residuals (features)"));
    }
    if x.nrows() != scores.nrows() {
        return Err(PcaError::dimension(scores.nrows(), x.nrows(), "Q residuals (samples)"));
    }
    let q: Vec<f64> = (0..x.nrows())
        .into_par_iter()
        .map(|i| {
            let reconstructed = loadings.dot(&scores.row(i));
            x.row(i)
                .iter()
                .zip(reconstructed.iter())
                .filter(|(v, _)| !v.is_nan())
                .map(|(v, r)| (v - r) * (v - r))
                .sum()
        })
        .collect();
    ensure_finite(q.iter(), "Q residuals")?;
    Ok(q)
}

/// `k(n-1)/(n-k) · F_conf(k, n-k)`; `None` when `n <= k`.
pub fn t2_limit(confidence: f64, n_samples: usize, n_components: usize) -> Result<Option<f64>> {
    if n_samples <= n_components || n_components == 0 {
        return Ok(None);
    }
    let (n, k) = (n_samples as f64, n_components as f64);
    let f = FisherSnedecor::new(k, n - k).map_err(|e| PcaError::Computation(e.to_string()))?;
    Ok(Some(k * (n - 1.0) / (n - k) * f.inverse_cdf(confidence)))
}

/// Jackson–Mudholkar limit from the non-retained eigenvalues.
///
/// Falls back to Box's `g·χ²(h)` approximation when `h₀ <= 0`. `None` when
/// the residual spectrum carries no variance.
pub fn q_limit(confidence: f64, residual_eigenvalues: &[f64]) -> Result<Option<f64>> {
    let theta = |power: i32| -> f64 { residual_eigenvalues.iter().map(|l| l.max(0.0).powi(power)).sum() };
    let (theta1, theta2, theta3) = (theta(1), theta(2), theta(3));
    if !(theta1 > 0.0) || !(theta2 > 0.0) {
        return Ok(None);
    }

    let h0 = 1.0 - 2.0 * theta1 * theta3 / (3.0 * theta2 * theta2);
    if h0 > 0.0 {
        let normal = Normal::new(0.0, 1.0).map_err(|e| PcaError::Computation(e.to_string()))?;
        let z = normal.inverse_cdf(confidence);
        let base = z * (2.0 * theta2 * h0 * h0).sqrt() / theta1
            + 1.0
            + theta2 * h0 * (h0 - 1.0) / (theta1 * theta1);
        if base > 0.0 {
            return Ok(Some(theta1 * base.powf(1.0 / h0)));
        }
    }
    debug!("Jackson-Mudholkar not applicable (h0 = {}); using Box approximation", h0);
    let g = theta2 / theta1;
    let h = theta1 * theta1 / theta2;
    let chi = ChiSquared::new(h).map_err(|e| PcaError::Computation(e.to_string()))?;
    Ok(Some(g * chi.inverse_cdf(confidence)))
}

fn is_outlier(rule: OutlierRule, t2: f64, t2_limit: Option<f64>, q: Option<f64>, q_limit: Option<f64>) -> bool {
    let t2_out = t2_limit.map(|limit| t2 > limit);
    let q_out = match (q, q_limit) {
        (Some(q), Some(limit)) => Some(q > limit),
        _ => None,
    };
    // A rule that needs Q degrades to T² when Q is unavailable.
    let decided = match (rule, t2_out, q_out) {
        (OutlierRule::T2, t, _) => t,
        (OutlierRule::Q, t, q) => q.or(t),
        (OutlierRule::T2OrQ, Some(t), Some(q)) => Some(t || q),
        (OutlierRule::T2AndQ, Some(t), Some(q)) => Some(t && q),
        (_, t, q) => t.or(q),
    };
    decided.unwrap_or(false)
}

/// Squared loadings divided by their column sum.
pub fn variable_contributions(loadings: &Array2<f64>) -> Array2<f64> {
    let mut contributions = loadings.mapv(|v| v * v);
    for mut column in contributions.axis_iter_mut(Axis(1)) {
        let total = column.sum();
        if total > 0.0 {
            column /= total;
        }
    }
    contributions
}

/// Ellipse containing `confidence` of a bivariate normal fitted to `(x, y)`.
/// `None` for fewer than 3 points or a degenerate covariance.
pub fn confidence_ellipse(x: ArrayView1<f64>, y: ArrayView1<f64>, confidence: f64) -> Result<Option<EllipseParams>> {
    let n = x.len();
    if n != y.len() {
        return Err(PcaError::dimension(x.len(), y.len(), "confidence ellipse coordinates"));
    }
    if n < 3 {
        return Ok(None);
    }
    let mean_x = x.sum() / n as f64;
    let mean_y = y.sum() / n as f64;
    let denom = (n - 1) as f64;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y.iter()) {
        let (dx, dy) = (a - mean_x, b - mean_y);
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    let (sxx, syy, sxy) = (sxx / denom, syy / denom, sxy / denom);

    // Closed-form eigenvalues of the 2x2 covariance.
    let half_trace = 0.5 * (sxx + syy);
    let spread = (0.25 * (sxx - syy).powi(2) + sxy * sxy).sqrt();
    let (lambda_major, lambda_minor) = (half_trace + spread, half_trace - spread);
    if !(lambda_minor > 0.0) {
        debug!("Score covariance is degenerate; no ellipse");
        return Ok(None);
    }
    let chi = ChiSquared::new(2.0)
        .map_err(|e| PcaError::Computation(e.to_string()))?
        .inverse_cdf(confidence);
    Ok(Some(EllipseParams {
        center_x: mean_x,
        center_y: mean_y,
        major_axis: (chi * lambda_major).sqrt(),
        minor_axis: (chi * lambda_minor).sqrt(),
        angle: 0.5 * (2.0 * sxy).atan2(sxx - syy),
        confidence,
    }))
}

/// One PC1/PC2 ellipse per group label, in order of first appearance.
/// Groups with fewer than 3 members are skipped.
pub fn group_ellipses(scores: &Array2<f64>, groups: &[String], confidence: f64) -> Result<Vec<(String, EllipseParams)>> {
    if groups.len() != scores.nrows() {
        return Err(PcaError::dimension(scores.nrows(), groups.len(), "ellipse group labels"));
    }
    let mut labels: Vec<&String> = Vec::new();
    for label in groups {
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    let mut ellipses = Vec::new();
    for label in labels {
        let members: Vec<usize> = groups
            .iter()
            .enumerate()
            .filter_map(|(i, g)| (g == label).then_some(i))
            .collect();
        let subset = scores.select(Axis(0), &members);
        if let Some(ellipse) = confidence_ellipse(subset.column(0), subset.column(1), confidence)? {
            ellipses.push((label.clone(), ellipse));
        }
    }
    Ok(ellipses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn t2_is_sum_of_scaled_squared_scores() {
        let scores = array![[1.0, 2.0], [-3.0, 0.5]];
        let eigenvalues = array![2.0, 0.5];
        let t2 = hotelling_t2(&scores, &eigenvalues);
        assert_abs_diff_eq!(t2[0], 0.5 + 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t2[1], 4.5 + 0.5, epsilon = 1e-12);
    }

    #[test]
    fn t2_limit_matches_f_quantile_formula() {
        // F(1, 9) at 0.95 is 5.117355
        let limit = t2_limit(0.95, 10, 1).unwrap().unwrap();
        assert_abs_diff_eq!(limit, 9.0 / 9.0 * 5.117355, epsilon = 1e-4);
        assert!(t2_limit(0.95, 3, 3).unwrap().is_none());
    }

    #[test]
    fn q_limit_grows_with_confidence() {
        let residual = [0.5, 0.3, 0.1];
        let q95 = q_limit(0.95, &residual).unwrap().unwrap();
        let q99 = q_limit(0.99, &residual).unwrap().unwrap();
        assert!(q95 > 0.0);
        assert!(q99 > q95);
        assert!(q_limit(0.95, &[]).unwrap().is_none());
        assert!(q_limit(0.95, &[0.0, 0.0]).unwrap().is_none());
    }

    #[test]
    fn q_residual_is_reconstruction_error() {
        let loadings = array![[1.0], [0.0]];
        let scores = array![[2.0], [3.0]];
        let x = array![[2.0, 1.0], [3.0, f64::NAN]];
        let q = q_residuals(&x, &scores, &loadings).unwrap();
        assert_abs_diff_eq!(q[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn mahalanobis_equals_sqrt_t2_for_uncorrelated_centered_scores() {
        let scores = array![[1.0, 1.0], [1.0, -1.0], [-1.0, 1.0], [-1.0, -1.0]];
        // Column variances are 4/3, no covariance.
        let eigenvalues = array![4.0 / 3.0, 4.0 / 3.0];
        let t2 = hotelling_t2(&scores, &eigenvalues);
        let reference = ScoreReference::from_scores(&scores).unwrap();
        let d = mahalanobis_distances(&scores, &reference).unwrap();
        for i in 0..4 {
            assert_abs_diff_eq!(d[i] * d[i], t2[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn outlier_rules() {
        assert!(is_outlier(OutlierRule::T2, 10.0, Some(5.0), Some(0.0), Some(1.0)));
        assert!(!is_outlier(OutlierRule::Q, 10.0, Some(5.0), Some(0.0), Some(1.0)));
        assert!(is_outlier(OutlierRule::T2OrQ, 1.0, Some(5.0), Some(2.0), Some(1.0)));
        assert!(!is_outlier(OutlierRule::T2AndQ, 1.0, Some(5.0), Some(2.0), Some(1.0)));
        // Without Q, Q-based rules fall back to T².
        assert!(is_outlier(OutlierRule::T2AndQ, 10.0, Some(5.0), None, None));
        assert!(!is_outlier(OutlierRule::T2, 10.0, None, None, None));
    }

    #[test]
    fn zero_variance_component_is_rejected() {
        let scores = array![[1.0], [-1.0], [0.0]];
        let eigenvalues = array![0.0];
        let all = eigenvalues.clone();
        let input = DiagnosticsInput {
            scores: &scores,
            eigenvalues: &eigenvalues,
            all_eigenvalues: &all,
            preprocessed: None,
            loadings: None,
            groups: None,
            reference: None,
        };
        let err = DiagnosticsCalculator::default().compute(input).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Computation);
    }

    #[test]
    fn single_sample_is_scored_against_reference() {
        let training = array![[2.0, 1.0], [-2.0, 1.0], [2.0, -1.0], [-2.0, -1.0], [0.0, 0.0]];
        let reference = ScoreReference::from_scores(&training).unwrap();
        assert_abs_diff_eq!(reference.covariance, array![[4.0, 0.0], [0.0, 1.0]], epsilon = 1e-12);

        let eigenvalues = array![4.0, 1.0];
        let all = eigenvalues.clone();
        let new_scores = array![[4.0, 0.0]];
        let input = DiagnosticsInput {
            scores: &new_scores,
            eigenvalues: &eigenvalues,
            all_eigenvalues: &all,
            preprocessed: None,
            loadings: None,
            groups: None,
            reference: Some(&reference),
        };
        let report = DiagnosticsCalculator::default().compute(input).unwrap();
        assert_eq!(report.metrics.len(), 1);
        assert_abs_diff_eq!(report.metrics[0].hotelling_t2, 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(report.metrics[0].mahalanobis, 2.0, epsilon = 1e-12);
        assert_eq!(report.limits.t2_99, t2_limit(0.99, 5, 2).unwrap());

        let without_reference = DiagnosticsInput { reference: None, ..input };
        let err = DiagnosticsCalculator::default().compute(without_reference).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn small_but_resolved_spectrum_passes_both_guards() {
        let scores = array![[1e-2, 1e-7], [-1e-2, -1e-7], [-1e-2, 1e-7], [1e-2, -1e-7]];
        let eigenvalues = array![4e-4 / 3.0, 4e-14 / 3.0];
        let all = eigenvalues.clone();
        let input = DiagnosticsInput {
            scores: &scores,
            eigenvalues: &eigenvalues,
            all_eigenvalues: &all,
            preprocessed: None,
            loadings: None,
            groups: None,
            reference: None,
        };
        let report = DiagnosticsCalculator::default().compute(input).unwrap();
        for m in &report.metrics {
            assert_abs_diff_eq!(m.hotelling_t2, 1.5, epsilon = 1e-9);
            assert_abs_diff_eq!(m.mahalanobis * m.mahalanobis, m.hotelling_t2, epsilon = 1e-6);
        }
    }

    #[test]
    fn contributions_sum_to_one_per_component() {
        let loadings = array![[0.6, 0.0], [0.8, 1.0]];
        let c = variable_contributions(&loadings);
        assert_abs_diff_eq!(c, array![[0.36, 0.0], [0.64, 1.0]], epsilon = 1e-12);
    }

    #[test]
    fn axis_aligned_ellipse() {
        let x = array![2.0, -2.0, 0.0, 0.0];
        let y = array![0.0, 0.0, 1.0, -1.0];
        let ellipse = confidence_ellipse(x.view(), y.view(), 0.95).unwrap().unwrap();
        let chi = ChiSquared::new(2.0).unwrap().inverse_cdf(0.95);
        assert_abs_diff_eq!(ellipse.major_axis, (chi * 8.0 / 3.0).sqrt(), epsilon = 1e-9);
        assert_abs_diff_eq!(ellipse.minor_axis, (chi * 2.0 / 3.0).sqrt(), epsilon = 1e-9);
        assert_abs_diff_eq!(ellipse.angle, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn groups_get_their_own_ellipse() {
        let scores = array![
            [1.0, 0.0], [2.0, 1.0], [3.0, 0.5],
            [-1.0, 0.0], [-2.0, -1.5], [-3.0, 0.2],
            [0.0, 9.0]
        ];
        let groups: Vec<String> = ["a", "a", "a", "b", "b", "b", "c"].iter().map(|s| s.to_string()).collect();
        let ellipses = group_ellipses(&scores, &groups, 0.95).unwrap();
        let names: Vec<&str> = ellipses.iter().map(|(g, _)| g.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
