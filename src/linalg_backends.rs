// src/linalg_backends.rs

use crate::error::{PcaError, Result};
use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::{Eigh as NdLinalgEigh, SVDInto as NdLinalgSVDInto, UPLO};
use std::cmp::Ordering;

/// Eigenpairs of a symmetric matrix. Column `i` of `eigenvectors` pairs
/// with `eigenvalues[i]`; the order is whatever the backend produced until
/// [`eigh_descending`] sorts it.
#[derive(Debug)]
pub struct EighOutput {
    pub eigenvalues: Array1<f64>,
    pub eigenvectors: Array2<f64>,
}

/// Symmetric eigensolver reading only the upper triangle of `matrix`.
pub trait BackendEigh {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput>;
}

/// Singular values (descending) and, when requested, `Vᵀ`.
#[derive(Debug)]
pub struct SvdOutput {
    pub s: Array1<f64>,
    pub vt: Option<Array2<f64>>,
}

/// Thin SVD that consumes its input. Callers needing left singular vectors
/// decompose the transpose instead.
pub trait BackendSvd {
    fn svd_into(&self, matrix: Array2<f64>, compute_vt: bool) -> Result<SvdOutput>;
}

/// LAPACK through ndarray-linalg. The provider (OpenBLAS, MKL) is picked by
/// cargo feature.
#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

impl BackendEigh for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput> {
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper)?;
        Ok(EighOutput { eigenvalues, eigenvectors })
    }
}

impl BackendSvd for NdarrayLinAlgBackend {
    fn svd_into(&self, matrix: Array2<f64>, compute_vt: bool) -> Result<SvdOutput> {
        let (_, s, vt) = matrix.svd_into(false, compute_vt)?;
        Ok(SvdOutput { s, vt })
    }
}

/// Eigendecomposition with eigenpairs reordered by decreasing eigenvalue.
pub fn eigh_descending<B: BackendEigh>(backend: &B, matrix: &Array2<f64>) -> Result<EighOutput> {
    let EighOutput {
        eigenvalues,
        eigenvectors,
    } = backend.eigh_upper(matrix)?;

    let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
    order.sort_by(|&a, &b| {
        eigenvalues[b]
            .partial_cmp(&eigenvalues[a])
            .unwrap_or(Ordering::Equal)
    });

    let sorted_values = Array1::from_iter(order.iter().map(|&i| eigenvalues[i]));
    let sorted_vectors = eigenvectors.select(Axis(1), &order);
    Ok(EighOutput {
        eigenvalues: sorted_values,
        eigenvectors: sorted_vectors,
    })
}

/// Inverse of a symmetric positive-definite matrix via its eigendecomposition.
///
/// # Errors
/// `Computation` when an eigenvalue is not above `tolerance` times the largest
/// one, i.e. the matrix is singular for practical purposes.
pub fn symmetric_inverse<B: BackendEigh>(
    backend: &B,
    matrix: &Array2<f64>,
    tolerance: f64,
) -> Result<Array2<f64>> {
    let EighOutput {
        eigenvalues,
        eigenvectors,
    } = backend.eigh_upper(matrix)?;
    let largest = eigenvalues.iter().cloned().fold(0.0_f64, f64::max);
    if largest <= 0.0 || eigenvalues.iter().any(|&v| v <= tolerance * largest) {
        return Err(PcaError::Computation(format!(
            "matrix of order {} is singular or not positive definite",
            matrix.nrows()
        )));
    }
    let mut scaled = eigenvectors.clone();
    for (mut column, &value) in scaled.axis_iter_mut(Axis(1)).zip(eigenvalues.iter()) {
        column /= value;
    }
    Ok(scaled.dot(&eigenvectors.t()))
}
