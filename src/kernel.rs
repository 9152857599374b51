// src/kernel.rs

use crate::config::KernelType;
use crate::engine::{align_signs_by_scores, require_complete, Decomposer, Decomposition};
use crate::error::{ensure_finite, PcaError, Result};
use crate::linalg_backends::{eigh_descending, NdarrayLinAlgBackend};
use crate::resources::ensure_f64_allocation;
use log::{debug, warn};
use ndarray::{s, Array1, Array2, ArrayView1, Axis, Zip};

/// Eigenvalues at or below this fraction of the largest are treated as zero.
const EIGENVALUE_FLOOR: f64 = 1e-12;

/// Everything needed to project new rows after a fit.
#[derive(Debug, Clone)]
struct KernelFit {
    kernel: KernelType,
    training: Array2<f64>,
    /// Column means of the uncentered training kernel matrix.
    column_means: Array1<f64>,
    grand_mean: f64,
    /// Shape: (n_samples, k_components)
    eigenvectors: Array2<f64>,
    /// Eigenvalues of the centered kernel matrix (not divided by n - 1).
    kernel_eigenvalues: Array1<f64>,
}

/// Kernel PCA: eigendecomposition of the double-centered kernel matrix.
///
/// There is no feature-space loadings matrix. Scores of the training rows are
/// `v·√λ`; new rows are projected with `K̃_new·v/√λ`, which gives the same
/// value for a training row.
#[derive(Debug, Clone)]
pub struct KernelDecomposer {
    kernel: KernelType,
    fitted: Option<KernelFit>,
}

impl KernelDecomposer {
    pub fn new(kernel: KernelType) -> Self {
        Self { kernel, fitted: None }
    }

    /// Kernel with gamma resolved, once fitted.
    pub fn resolved_kernel(&self) -> Option<KernelType> {
        self.fitted.as_ref().map(|f| f.kernel)
    }
}

/// Evaluates the kernel function on two samples.
pub fn kernel_value(kernel: &KernelType, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    match *kernel {
        KernelType::Linear => a.dot(&b),
        KernelType::Rbf { gamma } => {
            let gamma = gamma.unwrap_or(1.0 / a.len().max(1) as f64);
            let squared_distance: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
            (-gamma * squared_distance).exp()
        }
        KernelType::Polynomial {
            gamma,
            degree,
            coef0,
        } => {
            let gamma = gamma.unwrap_or(1.0 / a.len().max(1) as f64);
            (gamma * a.dot(&b) + coef0).powi(degree as i32)
        }
    }
}

/// `K[i, j] = k(rows_i, columns_j)`, each entry computed independently in
/// parallel.
pub fn kernel_matrix(kernel: &KernelType, rows: &Array2<f64>, columns: &Array2<f64>) -> Result<Array2<f64>> {
    if rows.ncols() != columns.ncols() {
        return Err(PcaError::dimension(
            columns.ncols(),
            rows.ncols(),
            "kernel evaluation (features)",
        ));
    }
    ensure_f64_allocation(rows.nrows() * columns.nrows(), "kernel matrix")?;
    let mut k = Array2::zeros((rows.nrows(), columns.nrows()));
    Zip::indexed(&mut k).par_for_each(|(i, j), value| {
        *value = kernel_value(kernel, rows.row(i), columns.row(j));
    });
    ensure_finite(k.iter(), "kernel matrix")?;
    Ok(k)
}

/// Double-centers a square kernel matrix in place. Returns the column means
/// and the grand mean of the uncentered matrix.
fn double_center(k: &mut Array2<f64>) -> (Array1<f64>, f64) {
    let column_means = k.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(k.ncols()));
    let row_means = k.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(k.nrows()));
    let grand_mean = column_means.mean().unwrap_or(0.0);
    Zip::indexed(k).for_each(|(i, j), value| {
        *value += grand_mean - row_means[i] - column_means[j];
    });
    (column_means, grand_mean)
}

impl Decomposer for KernelDecomposer {
    fn fit(&mut self, x: &Array2<f64>, n_components: usize) -> Result<Decomposition> {
        require_complete(x, "kernel PCA")?;
        let (n_samples, n_features) = x.dim();
        let kernel = self.kernel.resolved(n_features);
        debug!("Kernel PCA with {:?} on {} samples", kernel, n_samples);

        // Kernel matrix plus its eigenvectors.
        ensure_f64_allocation(2 * n_samples * n_samples, "kernel PCA workspace")?;
        let mut k = kernel_matrix(&kernel, x, x)?;
        let (column_means, grand_mean) = double_center(&mut k);

        let eig = eigh_descending(&NdarrayLinAlgBackend, &k)?;
        let largest = eig.eigenvalues.iter().cloned().fold(0.0_f64, f64::max);
        let positive: Vec<f64> = eig
            .eigenvalues
            .iter()
            .cloned()
            .filter(|&v| v > EIGENVALUE_FLOOR * largest && v > 0.0)
            .collect();
        if positive.is_empty() {
            return Err(PcaError::Computation(
                "centered kernel matrix has no positive eigenvalues".to_string(),
            ));
        }
        let k_eff = n_components.min(positive.len());
        if k_eff < n_components {
            warn!(
                "Kernel matrix has {} positive eigenvalues; computing {} of {} requested components",
                positive.len(),
                k_eff,
                n_components
            );
        }

        let kernel_eigenvalues = Array1::from(positive[..k_eff].to_vec());
        let mut eigenvectors = eig.eigenvectors.slice(s![.., ..k_eff]).to_owned();
        let mut scores = eigenvectors.clone();
        for (mut column, &lambda) in scores.axis_iter_mut(Axis(1)).zip(kernel_eigenvalues.iter()) {
            column *= lambda.sqrt();
        }
        align_signs_by_scores(&mut scores, &mut eigenvectors);
        ensure_finite(scores.iter(), "kernel PCA scores")?;

        let denom = (n_samples - 1) as f64;
        let eigenvalues = kernel_eigenvalues.mapv(|v| v / denom);
        let all_eigenvalues = Array1::from_iter(positive.iter().map(|v| v / denom));

        self.fitted = Some(KernelFit {
            kernel,
            training: x.clone(),
            column_means,
            grand_mean,
            eigenvectors,
            kernel_eigenvalues,
        });
        Ok(Decomposition {
            scores,
            loadings: None,
            eigenvalues,
            all_eigenvalues,
        })
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let fit = self.fitted.as_ref().ok_or(PcaError::NotFitted)?;
        require_complete(x, "kernel PCA transform")?;
        if x.ncols() != fit.training.ncols() {
            return Err(PcaError::dimension(
                fit.training.ncols(),
                x.ncols(),
                "kernel PCA transform (features)",
            ));
        }
        let mut k_new = kernel_matrix(&fit.kernel, x, &fit.training)?;
        let row_means = k_new
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(k_new.nrows()));
        Zip::indexed(&mut k_new).for_each(|(i, j), value| {
            *value += fit.grand_mean - row_means[i] - fit.column_means[j];
        });

        let mut scores = k_new.dot(&fit.eigenvectors);
        for (mut column, &lambda) in scores.axis_iter_mut(Axis(1)).zip(fit.kernel_eigenvalues.iter()) {
            column /= lambda.sqrt();
        }
        Ok(scores)
    }

    fn loadings(&self) -> Option<&Array2<f64>> {
        None
    }
}
