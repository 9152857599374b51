// src/nipals.rs

use crate::config::NipalsOptions;
use crate::engine::{
    align_signs_by_loadings, column_sum_squares, feasible_components, first_missing, psd_spectrum,
    small_side_covariance, Decomposer, Decomposition,
};
use crate::error::{ensure_finite, PcaError, Result};
use crate::linalg_backends::{BackendEigh, NdarrayLinAlgBackend};
use log::{debug, warn};
use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;

/// Extraction stops once the largest residual column sum of squares falls
/// below this fraction of the initial total.
const EXHAUSTED_VARIANCE: f64 = 1e-12;

/// Iterative PCA, one component at a time with deflation.
///
/// Both regressions of an iteration skip `NaN` cells pairwise, so a matrix
/// with missing entries can be decomposed without imputation. Components are
/// extracted strictly in order; only the per-iteration products run in
/// parallel.
#[derive(Debug, Clone)]
pub struct NipalsDecomposer {
    options: NipalsOptions,
    /// Shape: (n_features, k_components)
    loadings: Option<Array2<f64>>,
    iterations: Vec<usize>,
}

impl NipalsDecomposer {
    pub fn new(options: NipalsOptions) -> Self {
        Self {
            options,
            loadings: None,
            iterations: Vec::new(),
        }
    }

    /// Rebuilds a fitted decomposer from stored loadings.
    pub fn from_loadings(options: NipalsOptions, loadings: Array2<f64>) -> Self {
        Self {
            options,
            loadings: Some(loadings),
            iterations: Vec::new(),
        }
    }

    /// Iterations used by each extracted component during the last fit.
    pub fn iterations(&self) -> &[usize] {
        &self.iterations
    }
}

impl Decomposer for NipalsDecomposer {
    fn fit(&mut self, x: &Array2<f64>, n_components: usize) -> Result<Decomposition> {
        let (n_samples, n_features) = x.dim();
        let has_missing = first_missing(x).is_some();
        let mut residual = x.clone();
        let initial_ss = column_sum_squares(&residual).sum();
        if !(initial_ss > 0.0) {
            return Err(PcaError::Computation(
                "matrix has no variance to decompose".to_string(),
            ));
        }

        let mut loading_columns: Vec<Array1<f64>> = Vec::with_capacity(n_components);
        let mut iterations = Vec::with_capacity(n_components);
        for component in 0..n_components {
            let column_ss = column_sum_squares(&residual);
            let (start, max_ss) = column_ss
                .iter()
                .cloned()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (j, ss)| if ss > best.1 { (j, ss) } else { best });
            if max_ss <= EXHAUSTED_VARIANCE * initial_ss {
                warn!(
                    "Residual variance exhausted after {} of {} requested components",
                    component, n_components
                );
                break;
            }

            let (t, p, used) = extract_component(&residual, start, &self.options, component, has_missing)?;
            debug!("NIPALS component {} converged after {} iterations", component + 1, used);
            for (mut row, &t_i) in residual.axis_iter_mut(Axis(0)).zip(t.iter()) {
                // NaN cells stay NaN.
                row.scaled_add(-t_i, &p);
            }
            loading_columns.push(p);
            iterations.push(used);
        }
        if loading_columns.is_empty() {
            return Err(PcaError::Computation(
                "NIPALS extracted no components".to_string(),
            ));
        }

        let k = loading_columns.len();
        let views: Vec<ArrayView1<f64>> = loading_columns.iter().map(|c| c.view()).collect();
        let mut loadings = ndarray::stack(Axis(1), &views).map_err(|e| PcaError::Computation(e.to_string()))?;

        // Scores come from the same projection used by transform, so applying
        // the fitted model to its training data reproduces them exactly.
        let mut scores = project_with_missing(x, &loadings)?;
        align_signs_by_loadings(&mut loadings, &mut scores);
        ensure_finite(scores.iter(), "NIPALS scores")?;

        let denom = (n_samples - 1) as f64;
        let eigenvalues = scores.map_axis(Axis(0), |t| t.dot(&t) / denom);

        let residual_spectrum = if has_missing {
            // Without a complete residual matrix the remaining variance is
            // spread evenly over the components that were not extracted.
            let remaining = feasible_components(n_samples, n_features).saturating_sub(k);
            let residual_variance = column_sum_squares(&residual).sum() / denom;
            if remaining > 0 {
                Array1::from_elem(remaining, residual_variance / remaining as f64)
            } else {
                Array1::zeros(0)
            }
        } else {
            let remaining = n_samples.min(n_features).saturating_sub(k);
            let covariance = small_side_covariance(&residual);
            let spectrum = psd_spectrum(&NdarrayLinAlgBackend.eigh_upper(&covariance)?.eigenvalues);
            spectrum.iter().take(remaining).cloned().collect()
        };
        let all_eigenvalues = concatenate(Axis(0), &[eigenvalues.view(), residual_spectrum.view()])
            .map_err(|e| PcaError::Computation(e.to_string()))?;

        self.loadings = Some(loadings.clone());
        self.iterations = iterations;
        Ok(Decomposition {
            scores,
            loadings: Some(loadings),
            eigenvalues,
            all_eigenvalues,
        })
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let loadings = self.loadings.as_ref().ok_or(PcaError::NotFitted)?;
        project_with_missing(x, loadings)
    }

    fn loadings(&self) -> Option<&Array2<f64>> {
        self.loadings.as_ref()
    }
}

/// Power iteration for one component of `residual`.
fn extract_component(
    residual: &Array2<f64>,
    start: usize,
    options: &NipalsOptions,
    component: usize,
    has_missing: bool,
) -> Result<(Array1<f64>, Array1<f64>, usize)> {
    let mut t = residual.column(start).mapv(|v| if v.is_nan() { 0.0 } else { v });
    for iteration in 1..=options.max_iterations {
        let mut p = regress_on_scores(residual, &t, has_missing);
        let norm = p.dot(&p).sqrt();
        if !(norm > 0.0 && norm.is_finite()) {
            return Err(PcaError::Computation(format!(
                "NIPALS loading vector for component {} degenerated (norm {})",
                component + 1,
                norm
            )));
        }
        p /= norm;

        let t_new = regress_on_loadings(residual, &p, has_missing);
        let delta = (&t_new - &t).mapv(|v| v * v).sum().sqrt();
        let scale = t_new.dot(&t_new).sqrt();
        t = t_new;
        if delta <= options.tolerance * scale.max(f64::MIN_POSITIVE) {
            return Ok((t, p, iteration));
        }
    }
    Err(PcaError::Convergence {
        component: component + 1,
        iterations: options.max_iterations,
    })
}

/// `p_j = Σ x_ij t_i / Σ t_i²` over the observed cells of column `j`.
fn regress_on_scores(x: &Array2<f64>, t: &Array1<f64>, has_missing: bool) -> Array1<f64> {
    if !has_missing {
        return x.t().dot(t) / t.dot(t);
    }
    let values: Vec<f64> = (0..x.ncols())
        .into_par_iter()
        .map(|j| pairwise_ratio(x.column(j), t.view()))
        .collect();
    Array1::from(values)
}

/// `t_i = Σ x_ij p_j / Σ p_j²` over the observed cells of row `i`.
fn regress_on_loadings(x: &Array2<f64>, p: &Array1<f64>, has_missing: bool) -> Array1<f64> {
    if !has_missing {
        // p has unit norm.
        return x.dot(p);
    }
    let values: Vec<f64> = (0..x.nrows())
        .into_par_iter()
        .map(|i| pairwise_ratio(x.row(i), p.view()))
        .collect();
    Array1::from(values)
}

/// Least-squares coefficient of `data` on `basis`, skipping `NaN` in `data`.
fn pairwise_ratio(data: ArrayView1<f64>, basis: ArrayView1<f64>) -> f64 {
    let (num, den) = data
        .iter()
        .zip(basis.iter())
        .filter(|(v, _)| !v.is_nan())
        .fold((0.0, 0.0), |(num, den), (v, w)| (num + v * w, den + w * w));
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Projects rows onto `loadings`. Complete rows use `x · loadings`; rows with
/// `NaN` are projected one component at a time over their observed cells,
/// deflating as they go.
pub(crate) fn project_with_missing(x: &Array2<f64>, loadings: &Array2<f64>) -> Result<Array2<f64>> {
    if x.ncols() != loadings.nrows() {
        return Err(PcaError::dimension(
            loadings.nrows(),
            x.ncols(),
            "projection (features)",
        ));
    }
    if first_missing(x).is_none() {
        return Ok(x.dot(loadings));
    }
    let rows: Vec<Array1<f64>> = (0..x.nrows())
        .into_par_iter()
        .map(|i| project_row(i, x.row(i), loadings))
        .collect::<Result<Vec<_>>>()?;
    let mut scores = Array2::zeros((x.nrows(), loadings.ncols()));
    for (mut target, row) in scores.axis_iter_mut(Axis(0)).zip(rows.iter()) {
        target.assign(row);
    }
    Ok(scores)
}

fn project_row(index: usize, row: ArrayView1<f64>, loadings: &Array2<f64>) -> Result<Array1<f64>> {
    if row.iter().all(|v| !v.is_nan()) {
        return Ok(row.dot(loadings));
    }
    let mut residual = row.to_owned();
    let mut scores = Array1::zeros(loadings.ncols());
    for (a, p) in loadings.axis_iter(Axis(1)).enumerate() {
        let (num, den) = residual
            .iter()
            .zip(p.iter())
            .filter(|(v, _)| !v.is_nan())
            .fold((0.0, 0.0), |(num, den), (v, w)| (num + v * w, den + w * w));
        if den <= f64::EPSILON {
            let column = row.iter().position(|v| v.is_nan()).unwrap_or(0);
            return Err(PcaError::MissingData {
                row: index,
                column,
                message: format!(
                    "observed features carry no weight on component {}; score is undefined",
                    a + 1
                ),
            });
        }
        let t = num / den;
        scores[a] = t;
        residual.zip_mut_with(&p, |r, &w| *r -= t * w);
    }
    Ok(scores)
}
