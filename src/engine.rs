// src/engine.rs

use crate::config::Algorithm;
use crate::error::{PcaError, Result};
use crate::kernel::KernelDecomposer;
use crate::nipals::NipalsDecomposer;
use crate::svd::SvdDecomposer;
use log::{info, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};

/// What every algorithm hands back from `fit`.
#[derive(Debug, Clone)]
pub struct Decomposition {
    /// Shape: (n_samples, k_components)
    pub scores: Array2<f64>,
    /// Shape: (n_features, k_components). `None` for kernel PCA.
    pub loadings: Option<Array2<f64>>,
    /// Variance captured by each retained component.
    /// Shape: (k_components)
    pub eigenvalues: Array1<f64>,
    /// Retained eigenvalues followed by the non-retained spectrum, descending
    /// within each part. Q limits and variance ratios are computed from it.
    pub all_eigenvalues: Array1<f64>,
}

impl Decomposition {
    pub fn n_components(&self) -> usize {
        self.eigenvalues.len()
    }

    /// Denominator of the explained-variance ratio.
    pub fn total_variance(&self) -> f64 {
        self.all_eigenvalues.sum()
    }
}

/// Fit/transform contract shared by SVD, NIPALS and kernel PCA.
///
/// `fit` receives a preprocessed matrix and an already clamped component
/// count; `transform` receives new data preprocessed with the same
/// parameters.
pub trait Decomposer {
    fn fit(&mut self, x: &Array2<f64>, n_components: usize) -> Result<Decomposition>;

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Feature-space loadings, shape (n_features, k_components).
    fn loadings(&self) -> Option<&Array2<f64>>;
}

/// The three algorithms behind one interface.
#[derive(Debug, Clone)]
pub enum DecompositionEngine {
    Svd(SvdDecomposer),
    Nipals(NipalsDecomposer),
    Kernel(KernelDecomposer),
}

impl DecompositionEngine {
    pub fn from_algorithm(algorithm: &Algorithm) -> Self {
        match algorithm {
            Algorithm::Svd => DecompositionEngine::Svd(SvdDecomposer::new()),
            Algorithm::Nipals(options) => DecompositionEngine::Nipals(NipalsDecomposer::new(*options)),
            Algorithm::Kernel(kernel) => DecompositionEngine::Kernel(KernelDecomposer::new(*kernel)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DecompositionEngine::Svd(_) => "svd",
            DecompositionEngine::Nipals(_) => "nipals",
            DecompositionEngine::Kernel(_) => "kernel",
        }
    }

    fn inner(&self) -> &dyn Decomposer {
        match self {
            DecompositionEngine::Svd(d) => d,
            DecompositionEngine::Nipals(d) => d,
            DecompositionEngine::Kernel(d) => d,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Decomposer {
        match self {
            DecompositionEngine::Svd(d) => d,
            DecompositionEngine::Nipals(d) => d,
            DecompositionEngine::Kernel(d) => d,
        }
    }
}

impl Decomposer for DecompositionEngine {
    /// Clamps `n_components` to the feasible rank, then delegates.
    fn fit(&mut self, x: &Array2<f64>, n_components: usize) -> Result<Decomposition> {
        let (n_samples, n_features) = x.dim();
        let feasible = match self {
            // The kernel matrix is n x n, so the feature count does not bound it.
            DecompositionEngine::Kernel(_) if n_features > 0 => n_samples.saturating_sub(1),
            _ => feasible_components(n_samples, n_features),
        };
        if feasible == 0 {
            return Err(PcaError::Validation(format!(
                "PCA needs at least 2 samples and 1 feature, got {} x {}",
                n_samples, n_features
            )));
        }
        let k = n_components.min(feasible);
        if k < n_components {
            warn!(
                "Requested {} components but at most {} are feasible for a {} x {} matrix; computing {}",
                n_components, feasible, n_samples, n_features, k
            );
        }
        info!(
            "Fitting {} decomposition with {} components on {} samples x {} features",
            self.name(),
            k,
            n_samples,
            n_features
        );
        self.inner_mut().fit(x, k)
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.inner().transform(x)
    }

    fn loadings(&self) -> Option<&Array2<f64>> {
        self.inner().loadings()
    }
}

/// `min(n_samples - 1, n_features)`.
pub fn feasible_components(n_samples: usize, n_features: usize) -> usize {
    n_samples.saturating_sub(1).min(n_features)
}

/// Entry with the largest magnitude; the first one wins ties.
fn dominant_entry(v: ArrayView1<f64>) -> f64 {
    v.iter()
        .cloned()
        .fold(0.0, |best, x| if x.abs() > best.abs() { x } else { best })
}

/// Flips each component so that its largest-magnitude loading is positive.
pub(crate) fn align_signs_by_loadings(loadings: &mut Array2<f64>, scores: &mut Array2<f64>) {
    for j in 0..loadings.ncols() {
        if dominant_entry(loadings.column(j)) < 0.0 {
            loadings.column_mut(j).mapv_inplace(|v| -v);
            scores.column_mut(j).mapv_inplace(|v| -v);
        }
    }
}

/// Kernel PCA has no loadings, so the largest-magnitude score decides.
/// `vectors` holds the eigenvectors paired with the score columns.
pub(crate) fn align_signs_by_scores(scores: &mut Array2<f64>, vectors: &mut Array2<f64>) {
    for j in 0..scores.ncols() {
        if dominant_entry(scores.column(j)) < 0.0 {
            scores.column_mut(j).mapv_inplace(|v| -v);
            vectors.column_mut(j).mapv_inplace(|v| -v);
        }
    }
}

/// Returns the location of the first `NaN`, if any.
pub(crate) fn first_missing(x: &Array2<f64>) -> Option<(usize, usize)> {
    x.indexed_iter()
        .find(|(_, v)| v.is_nan())
        .map(|(idx, _)| idx)
}

/// Rejects `NaN` input for algorithms that cannot skip it.
pub(crate) fn require_complete(x: &Array2<f64>, algorithm: &str) -> Result<()> {
    match first_missing(x) {
        Some((row, column)) => Err(PcaError::MissingData {
            row,
            column,
            message: format!("{} requires a matrix without missing values", algorithm),
        }),
        None => Ok(()),
    }
}

/// Clamps negative round-off to zero and sorts descending. For spectra that
/// are positive semi-definite in exact arithmetic.
pub(crate) fn psd_spectrum(values: &Array1<f64>) -> Array1<f64> {
    let mut sorted: Vec<f64> = values.iter().map(|&v| v.max(0.0)).collect();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    Array1::from(sorted)
}

/// `x · loadings`, checking the feature dimension first.
pub(crate) fn project(x: &Array2<f64>, loadings: &Array2<f64>) -> Result<Array2<f64>> {
    if x.ncols() != loadings.nrows() {
        return Err(PcaError::dimension(
            loadings.nrows(),
            x.ncols(),
            "projection (features)",
        ));
    }
    Ok(x.dot(loadings))
}

/// Gram matrix on the smaller side of `x`, divided by `n_samples - 1`.
/// Its eigenvalues are the covariance spectrum of `x`.
pub(crate) fn small_side_covariance(x: &Array2<f64>) -> Array2<f64> {
    let denom = (x.nrows().saturating_sub(1)).max(1) as f64;
    if x.nrows() >= x.ncols() {
        x.t().dot(x) / denom
    } else {
        x.dot(&x.t()) / denom
    }
}

/// Sum of squares down each column.
pub(crate) fn column_sum_squares(x: &Array2<f64>) -> Array1<f64> {
    x.map_axis(Axis(0), |c| c.iter().filter(|v| !v.is_nan()).map(|v| v * v).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn feasible_rank_is_min_of_samples_minus_one_and_features() {
        assert_eq!(feasible_components(10, 3), 3);
        assert_eq!(feasible_components(3, 10), 2);
        assert_eq!(feasible_components(1, 10), 0);
    }

    #[test]
    fn sign_alignment_makes_dominant_loading_positive() {
        let mut loadings = array![[0.2, 0.9], [-0.9, 0.1]];
        let mut scores = array![[1.0, 2.0], [3.0, 4.0]];
        align_signs_by_loadings(&mut loadings, &mut scores);
        assert_eq!(loadings, array![[-0.2, 0.9], [0.9, 0.1]]);
        assert_eq!(scores, array![[-1.0, 2.0], [-3.0, 4.0]]);
    }

    #[test]
    fn single_sample_is_rejected() {
        let mut engine = DecompositionEngine::from_algorithm(&Algorithm::Svd);
        let err = engine.fit(&array![[1.0, 2.0]], 1).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }
}
