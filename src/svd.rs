// src/svd.rs

use crate::engine::{align_signs_by_loadings, project, require_complete, Decomposer, Decomposition};
use crate::error::{ensure_finite, PcaError, Result};
use crate::linalg_backends::{BackendSvd, NdarrayLinAlgBackend};
use crate::resources::ensure_f64_allocation;
use log::{debug, warn};
use ndarray::{s, Array1, Array2};

/// Exact PCA through a singular value decomposition.
///
/// The SVD is taken on whichever side of the matrix is smaller, so the
/// square factor never exceeds `min(n, p)²` entries:
/// * `n >= p`: SVD of `X`, keep the right singular vectors `V`.
/// * `n < p`: SVD of `Xᵀ`, whose right singular vectors are the left singular
///   vectors `U` of `X`; loadings follow as `Xᵀ·U·Σ⁻¹`.
#[derive(Debug, Clone, Default)]
pub struct SvdDecomposer {
    /// Shape: (n_features, k_components)
    loadings: Option<Array2<f64>>,
}

impl SvdDecomposer {
    pub fn new() -> Self {
        Self { loadings: None }
    }
}

impl Decomposer for SvdDecomposer {
    fn fit(&mut self, x: &Array2<f64>, n_components: usize) -> Result<Decomposition> {
        require_complete(x, "SVD")?;
        let (n_samples, n_features) = x.dim();
        let side = n_samples.min(n_features);
        ensure_f64_allocation(side * side + n_samples * n_features, "SVD workspace")?;

        let backend = NdarrayLinAlgBackend;
        let tall = n_samples >= n_features;
        let out = if tall {
            debug!("SVD on X ({} x {})", n_samples, n_features);
            backend.svd_into(x.to_owned(), true)?
        } else {
            debug!("SVD on X^T ({} x {})", n_features, n_samples);
            backend.svd_into(x.t().to_owned(), true)?
        };
        let vt = out
            .vt
            .ok_or_else(|| PcaError::Computation("SVD did not return right singular vectors".to_string()))?;
        let singular_values = out.s;

        let rank = numerical_rank(&singular_values, n_samples.max(n_features));
        if rank == 0 {
            return Err(PcaError::Computation(
                "preprocessed data have zero total variance".to_string(),
            ));
        }
        let k = n_components.min(side).min(rank);
        if k < n_components.min(side) {
            warn!(
                "Data have numerical rank {}; computing {} of {} requested components",
                rank, k, n_components
            );
        }

        let (mut loadings, mut scores) = if tall {
            let loadings = vt.slice(s![..k, ..]).t().to_owned();
            let scores = x.dot(&loadings);
            (loadings, scores)
        } else {
            // Rows of vt are the left singular vectors of X.
            let mut scores = vt.slice(s![..k, ..]).t().to_owned();
            let mut loadings = x.t().dot(&scores);
            for (j, &sigma) in singular_values.iter().take(k).enumerate() {
                loadings.column_mut(j).mapv_inplace(|v| v / sigma);
                scores.column_mut(j).mapv_inplace(|v| v * sigma);
            }
            (loadings, scores)
        };

        align_signs_by_loadings(&mut loadings, &mut scores);
        ensure_finite(scores.iter(), "SVD scores")?;
        ensure_finite(loadings.iter(), "SVD loadings")?;

        let denom = (n_samples - 1) as f64;
        let all_eigenvalues: Array1<f64> = singular_values.mapv(|sigma| sigma * sigma / denom);
        let eigenvalues = all_eigenvalues.slice(s![..k]).to_owned();
        debug!(
            "SVD eigenvalues (retained {} of {}): {:?}",
            k,
            all_eigenvalues.len(),
            eigenvalues
        );

        self.loadings = Some(loadings.clone());
        Ok(Decomposition {
            scores,
            loadings: Some(loadings),
            eigenvalues,
            all_eigenvalues,
        })
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let loadings = self.loadings.as_ref().ok_or(PcaError::NotFitted)?;
        require_complete(x, "SVD transform")?;
        project(x, loadings)
    }

    fn loadings(&self) -> Option<&Array2<f64>> {
        self.loadings.as_ref()
    }
}

/// Singular values above `σ_max · max(n, p) · ε`.
fn numerical_rank(singular_values: &Array1<f64>, largest_dim: usize) -> usize {
    let largest = singular_values.iter().cloned().fold(0.0_f64, f64::max);
    let tolerance = largest * largest_dim as f64 * f64::EPSILON;
    singular_values.iter().filter(|&&sigma| sigma > tolerance).count()
}

impl SvdDecomposer {
    /// Rebuilds a fitted decomposer from stored loadings.
    pub fn from_loadings(loadings: Array2<f64>) -> Self {
        Self {
            loadings: Some(loadings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Axis};

    fn centered(x: &Array2<f64>) -> Array2<f64> {
        let mean = x.mean_axis(Axis(0)).unwrap();
        x - &mean
    }

    #[test]
    fn collinear_data_has_one_component() {
        let x = centered(&array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [4.0, 8.0]]);
        let mut svd = SvdDecomposer::new();
        let out = svd.fit(&x, 1).unwrap();
        let ratio = out.eigenvalues[0] / out.total_variance();
        assert_abs_diff_eq!(ratio, 1.0, epsilon = 1e-12);
        let loading = out.loadings.unwrap();
        assert_abs_diff_eq!(loading[[0, 0]], 1.0 / 5f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(loading[[1, 0]], 2.0 / 5f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn wide_matrix_path_gives_unit_loadings() {
        let tall = centered(&array![
            [1.0, 0.5, 2.0],
            [0.0, 1.5, -1.0],
            [3.0, -2.0, 0.5],
            [-1.0, 0.0, 1.0],
            [2.0, 2.0, 2.5]
        ]);
        let wide = tall.t().to_owned();
        let wide = centered(&wide);

        let mut a = SvdDecomposer::new();
        let tall_out = a.fit(&tall, 2).unwrap();
        let mut b = SvdDecomposer::new();
        let wide_out = b.fit(&wide, 2).unwrap();

        // Same data transposed; every loading column must be unit length and
        // scores must equal X·V on both paths.
        for out in [&tall_out, &wide_out] {
            let loadings = out.loadings.as_ref().unwrap();
            for column in loadings.axis_iter(Axis(1)) {
                assert_abs_diff_eq!(column.dot(&column), 1.0, epsilon = 1e-10);
            }
        }
        let wide_loadings = wide_out.loadings.as_ref().unwrap();
        assert_abs_diff_eq!(wide.dot(wide_loadings), wide_out.scores, epsilon = 1e-10);
        assert_eq!(wide_out.all_eigenvalues.len(), 3);
    }

    #[test]
    fn duplicate_samples_trim_wide_fit_to_rank() {
        // Rows 0 and 1 are identical, so the centered matrix has rank 2.
        let x = centered(&array![
            [1.0, 2.0, 0.0, 3.0, -1.0, 4.0],
            [1.0, 2.0, 0.0, 3.0, -1.0, 4.0],
            [5.0, -2.0, 1.0, 0.0, 2.0, 1.0],
            [-3.0, 6.0, 3.0, 1.0, 3.0, -1.0]
        ]);
        let mut svd = SvdDecomposer::new();
        let out = svd.fit(&x, 3).unwrap();
        assert_eq!(out.n_components(), 2);
        assert_abs_diff_eq!(out.eigenvalues.sum() / out.total_variance(), 1.0, epsilon = 1e-10);
        let loadings = out.loadings.as_ref().unwrap();
        for column in loadings.axis_iter(Axis(1)) {
            assert_abs_diff_eq!(column.dot(&column), 1.0, epsilon = 1e-10);
        }
        assert_abs_diff_eq!(x.dot(loadings), out.scores, epsilon = 1e-10);
    }

    #[test]
    fn tiny_scale_data_fit_like_unit_scale_data() {
        let x = centered(&array![
            [1.0, 0.5, 2.0, -1.0, 0.0, 3.0],
            [0.0, 1.5, -1.0, 2.0, 1.0, 0.5],
            [3.0, -2.0, 0.5, 0.0, -1.5, 1.0],
            [-1.0, 0.0, 1.0, 1.5, 2.5, -2.0]
        ]);
        let tiny = &x * 1e-15;
        let reference = SvdDecomposer::new().fit(&x, 3).unwrap();
        let out = SvdDecomposer::new().fit(&tiny, 3).unwrap();
        assert_eq!(out.n_components(), 3);
        assert_abs_diff_eq!(&out.scores * 1e15, reference.scores, epsilon = 1e-9);
        assert_abs_diff_eq!(&out.eigenvalues * 1e30, reference.eigenvalues, epsilon = 1e-9);
    }

    #[test]
    fn zero_matrix_is_a_computation_error() {
        let err = SvdDecomposer::new().fit(&Array2::zeros((4, 3)), 2).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Computation);
    }

    #[test]
    fn transform_requires_fit() {
        let svd = SvdDecomposer::new();
        let err = svd.transform(&array![[1.0]]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFitted);
    }
}
