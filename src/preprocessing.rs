// src/preprocessing.rs

use crate::config::{ColumnScaling, Preprocessing, RowNormalization};
use crate::error::{PcaError, Result};
use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayViewMut1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Deviations (and row norms) below this are treated as zero.
pub const VARIANCE_EPSILON: f64 = 1e-8;

/// Statistics learned by [`Preprocessor::fit`].
///
/// Immutable once built; every later transform reads it, including transforms
/// driven by a persisted model. Vectors that the chosen mode does not need are
/// left empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingParams {
    feature_means: Vec<f64>,
    feature_std_devs: Vec<f64>,
    #[serde(default)]
    feature_medians: Vec<f64>,
    /// Already multiplied by the MAD scale factor.
    #[serde(default)]
    feature_mads: Vec<f64>,
    #[serde(default)]
    row_means: Vec<f64>,
    #[serde(default)]
    row_std_devs: Vec<f64>,
    #[serde(default)]
    zero_variance_features: Vec<usize>,
}

impl PreprocessingParams {
    pub fn n_features(&self) -> usize {
        self.feature_means.len()
    }

    /// Column means of the row-normalized training data.
    pub fn feature_means(&self) -> &[f64] {
        &self.feature_means
    }

    /// Sample (n-1) standard deviations of the row-normalized training data.
    pub fn feature_std_devs(&self) -> &[f64] {
        &self.feature_std_devs
    }

    /// Populated only for robust scaling.
    pub fn feature_medians(&self) -> &[f64] {
        &self.feature_medians
    }

    /// Populated only for robust scaling.
    pub fn feature_mads(&self) -> &[f64] {
        &self.feature_mads
    }

    /// Populated only when SNV is applied.
    pub fn row_means(&self) -> &[f64] {
        &self.row_means
    }

    /// Populated only when SNV is applied.
    pub fn row_std_devs(&self) -> &[f64] {
        &self.row_std_devs
    }

    /// Columns whose spread statistic fell below [`VARIANCE_EPSILON`]. They
    /// are scaled by 1 instead of being divided by ~0.
    pub fn zero_variance_features(&self) -> &[usize] {
        &self.zero_variance_features
    }

    /// Checks the vectors agree with each other and with the mode.
    pub fn validate_for(&self, mode: &Preprocessing) -> Result<()> {
        let p = self.n_features();
        if self.feature_std_devs.len() != p {
            return Err(PcaError::dimension(
                p,
                self.feature_std_devs.len(),
                "preprocessing standard deviations",
            ));
        }
        if mode.column == ColumnScaling::Robust
            && (self.feature_medians.len() != p || self.feature_mads.len() != p)
        {
            return Err(PcaError::Preprocessing(format!(
                "robust scaling needs {} medians and MADs, found {} and {}",
                p,
                self.feature_medians.len(),
                self.feature_mads.len()
            )));
        }
        let all_values = self
            .feature_means
            .iter()
            .chain(&self.feature_std_devs)
            .chain(&self.feature_medians)
            .chain(&self.feature_mads);
        if all_values.into_iter().any(|v| !v.is_finite()) {
            return Err(PcaError::Preprocessing(
                "preprocessing parameters contain non-finite values".to_string(),
            ));
        }
        Ok(())
    }
}

/// Applies a [`Preprocessing`] mode: row-wise step first, then column-wise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preprocessor {
    mode: Preprocessing,
}

impl Preprocessor {
    pub fn new(mode: Preprocessing) -> Result<Self> {
        mode.validate()?;
        Ok(Self { mode })
    }

    pub fn mode(&self) -> &Preprocessing {
        &self.mode
    }

    /// Learns the statistics of `data`. `NaN` cells are skipped.
    ///
    /// # Errors
    /// `Validation` for an empty matrix or infinite entries, `MissingData`
    /// for a column without any observed value.
    pub fn fit(&self, data: &Array2<f64>) -> Result<PreprocessingParams> {
        check_input(data)?;
        let (normalized, row_stats) = self.normalize_rows(data);
        let (n_samples, n_features) = normalized.dim();

        let mut feature_means = Vec::with_capacity(n_features);
        let mut feature_std_devs = Vec::with_capacity(n_features);
        let mut feature_medians = Vec::new();
        let mut feature_mads = Vec::new();
        let mut zero_variance_features = Vec::new();

        for (j, column) in normalized.axis_iter(Axis(1)).enumerate() {
            let mut observed: Vec<f64> = column.iter().cloned().filter(|v| !v.is_nan()).collect();
            if observed.is_empty() {
                return Err(PcaError::MissingData {
                    row: 0,
                    column: j,
                    message: "column has no observed values".to_string(),
                });
            }
            let mean = observed_mean(&observed);
            let std_dev = observed_std(&observed, mean);
            feature_means.push(mean);
            feature_std_devs.push(std_dev);

            let spread = if self.mode.column == ColumnScaling::Robust {
                let median = median_in_place(&mut observed);
                let mut deviations: Vec<f64> = observed.iter().map(|v| (v - median).abs()).collect();
                let mad = median_in_place(&mut deviations) * self.mode.mad_scale;
                feature_medians.push(median);
                feature_mads.push(mad);
                mad
            } else {
                std_dev
            };
            if spread < VARIANCE_EPSILON {
                zero_variance_features.push(j);
            }
        }

        if !zero_variance_features.is_empty() {
            if self.divides_columns() {
                warn!(
                    "{} of {} features have near-zero variance and are left unscaled: {:?}",
                    zero_variance_features.len(),
                    n_features,
                    zero_variance_features
                );
            } else {
                debug!("Near-zero variance features: {:?}", zero_variance_features);
            }
        }

        let (row_means, row_std_devs): (Vec<f64>, Vec<f64>) = if self.mode.row.applies_snv() {
            row_stats.into_iter().unzip()
        } else {
            (Vec::new(), Vec::new())
        };
        debug!(
            "Fitted preprocessing {:?} on {} samples x {} features",
            self.mode, n_samples, n_features
        );

        Ok(PreprocessingParams {
            feature_means,
            feature_std_devs,
            feature_medians,
            feature_mads,
            row_means,
            row_std_devs,
            zero_variance_features,
        })
    }

    /// Applies stored statistics to `data`. Nothing is re-estimated from
    /// `data` except the per-row quantities of the row-wise step, which are
    /// properties of each sample by definition.
    pub fn transform(&self, data: &Array2<f64>, params: &PreprocessingParams) -> Result<Array2<f64>> {
        check_input(data)?;
        if data.ncols() != params.n_features() {
            return Err(PcaError::dimension(
                params.n_features(),
                data.ncols(),
                "preprocessing transform (features)",
            ));
        }
        params.validate_for(&self.mode)?;

        let (mut out, _) = self.normalize_rows(data);
        let (centers, scales) = self.column_factors(params);
        for mut row in out.axis_iter_mut(Axis(0)) {
            ndarray::Zip::from(&mut row)
                .and(&centers)
                .and(&scales)
                .for_each(|value, &center, &scale| {
                    *value = (*value - center) / scale;
                });
        }
        Ok(out)
    }

    /// `fit` followed by `transform` on the same matrix.
    pub fn fit_transform(&self, data: &Array2<f64>) -> Result<(Array2<f64>, PreprocessingParams)> {
        let params = self.fit(data)?;
        let transformed = self.transform(data, &params)?;
        Ok((transformed, params))
    }

    /// Undoes the column-wise step. Row-wise normalization is not reverted.
    pub fn inverse_transform(&self, data: &Array2<f64>, params: &PreprocessingParams) -> Result<Array2<f64>> {
        if data.ncols() != params.n_features() {
            return Err(PcaError::dimension(
                params.n_features(),
                data.ncols(),
                "preprocessing inverse transform (features)",
            ));
        }
        params.validate_for(&self.mode)?;

        let (centers, scales) = self.column_factors(params);
        let mut out = data.clone();
        for mut row in out.axis_iter_mut(Axis(0)) {
            ndarray::Zip::from(&mut row)
                .and(&centers)
                .and(&scales)
                .for_each(|value, &center, &scale| {
                    *value = *value * scale + center;
                });
        }
        Ok(out)
    }

    fn divides_columns(&self) -> bool {
        matches!(
            self.mode.column,
            ColumnScaling::Standard | ColumnScaling::Robust | ColumnScaling::ScaleOnly
        )
    }

    /// Per-column `(center, scale)` so that the column step is `(x - c) / s`.
    fn column_factors(&self, params: &PreprocessingParams) -> (Array1<f64>, Array1<f64>) {
        let p = params.n_features();
        let zeros = Array1::zeros(p);
        let ones = Array1::ones(p);
        let safe = |values: &[f64]| Array1::from_iter(values.iter().map(|&v| effective_scale(v)));
        match self.mode.column {
            ColumnScaling::None => (zeros, ones),
            ColumnScaling::MeanCenter => (Array1::from(params.feature_means.clone()), ones),
            ColumnScaling::Standard => (
                Array1::from(params.feature_means.clone()),
                safe(&params.feature_std_devs),
            ),
            ColumnScaling::Robust => (
                Array1::from(params.feature_medians.clone()),
                safe(&params.feature_mads),
            ),
            ColumnScaling::ScaleOnly => (zeros, safe(&params.feature_std_devs)),
        }
    }

    /// Row-wise step, one task per row. Returns the SNV `(mean, std)` of each
    /// row, or `(0, 0)` when SNV is not part of the mode.
    fn normalize_rows(&self, data: &Array2<f64>) -> (Array2<f64>, Vec<(f64, f64)>) {
        let mut out = data.clone();
        let mode = self.mode.row;
        if mode == RowNormalization::None {
            return (out, Vec::new());
        }
        let stats: Vec<(f64, f64)> = out
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .map(|mut row| normalize_row(&mut row, mode))
            .collect();
        (out, stats)
    }
}

fn normalize_row(row: &mut ArrayViewMut1<f64>, mode: RowNormalization) -> (f64, f64) {
    let mut snv_stats = (0.0, 0.0);
    if mode.applies_snv() {
        let observed: Vec<f64> = row.iter().cloned().filter(|v| !v.is_nan()).collect();
        if !observed.is_empty() {
            let mean = observed_mean(&observed);
            let std_dev = observed_std(&observed, mean);
            // A flat row is only centered.
            let scale = effective_scale(std_dev);
            row.mapv_inplace(|v| (v - mean) / scale);
            snv_stats = (mean, std_dev);
        }
    }
    if mode.applies_vector_norm() {
        let norm = row
            .iter()
            .filter(|v| !v.is_nan())
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt();
        if norm >= VARIANCE_EPSILON {
            row.mapv_inplace(|v| v / norm);
        }
    }
    snv_stats
}

fn check_input(data: &Array2<f64>) -> Result<()> {
    let (n_samples, n_features) = data.dim();
    if n_samples == 0 || n_features == 0 {
        return Err(PcaError::Validation(format!(
            "input matrix must be non-empty, got {} x {}",
            n_samples, n_features
        )));
    }
    if let Some(((row, column), _)) = data.indexed_iter().find(|(_, v)| v.is_infinite()) {
        return Err(PcaError::Validation(format!(
            "infinite value at row {}, column {}",
            row, column
        )));
    }
    Ok(())
}

fn effective_scale(value: f64) -> f64 {
    if value.is_finite() && value >= VARIANCE_EPSILON {
        value
    } else {
        1.0
    }
}

pub(crate) fn observed_mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; 0 for fewer than two values.
pub(crate) fn observed_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Median of a non-empty slice; the two middle values are averaged for even
/// lengths. Reorders the slice.
pub(crate) fn median_in_place(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn preprocessor(row: RowNormalization, column: ColumnScaling) -> Preprocessor {
        Preprocessor::new(Preprocessing::new(row, column)).unwrap()
    }

    #[test]
    fn standard_scaling_gives_zero_mean_unit_std() {
        let data = array![[1.0, 10.0], [2.0, 20.0], [3.0, 60.0], [6.0, 10.0]];
        let pre = preprocessor(RowNormalization::None, ColumnScaling::Standard);
        let (out, params) = pre.fit_transform(&data).unwrap();
        for column in out.axis_iter(Axis(1)) {
            let values: Vec<f64> = column.to_vec();
            let mean = observed_mean(&values);
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(observed_std(&values, mean), 1.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(params.feature_means()[0], 3.0, epsilon = 1e-12);
        assert!(params.zero_variance_features().is_empty());
    }

    #[test]
    fn zero_variance_column_is_flagged_and_left_unscaled() {
        let data = array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0]];
        let pre = preprocessor(RowNormalization::None, ColumnScaling::Standard);
        let (out, params) = pre.fit_transform(&data).unwrap();
        assert_eq!(params.zero_variance_features(), &[1]);
        assert!(out.iter().all(|v| v.is_finite()));
        assert_abs_diff_eq!(out.column(1).to_owned(), array![0.0, 0.0, 0.0], epsilon = 1e-15);
    }

    #[test]
    fn transform_uses_stored_statistics() {
        let train = array![[0.0, 0.0], [2.0, 4.0]];
        let pre = preprocessor(RowNormalization::None, ColumnScaling::MeanCenter);
        let params = pre.fit(&train).unwrap();
        let new_data = array![[101.0, 102.0]];
        let out = pre.transform(&new_data, &params).unwrap();
        assert_abs_diff_eq!(out, array![[100.0, 100.0]], epsilon = 1e-12);
    }

    #[test]
    fn scale_only_does_not_center() {
        let data = array![[2.0], [4.0], [6.0]];
        let pre = preprocessor(RowNormalization::None, ColumnScaling::ScaleOnly);
        let (out, params) = pre.fit_transform(&data).unwrap();
        assert_abs_diff_eq!(params.feature_std_devs()[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out, array![[1.0], [2.0], [3.0]], epsilon = 1e-12);
    }

    #[test]
    fn robust_scaling_uses_median_and_scaled_mad() {
        let data = array![[1.0], [2.0], [3.0], [4.0], [100.0]];
        let pre = preprocessor(RowNormalization::None, ColumnScaling::Robust);
        let (out, params) = pre.fit_transform(&data).unwrap();
        assert_abs_diff_eq!(params.feature_medians()[0], 3.0, epsilon = 1e-12);
        // |x - 3| = [2, 1, 0, 1, 97] -> median 1
        assert_abs_diff_eq!(params.feature_mads()[0], 1.4826, epsilon = 1e-12);
        assert_abs_diff_eq!(out[[0, 0]], -2.0 / 1.4826, epsilon = 1e-12);
    }

    #[test]
    fn snv_rows_have_zero_mean_and_unit_std() {
        let data = array![[1.0, 2.0, 3.0, 4.0], [10.0, 30.0, 20.0, 40.0]];
        let pre = preprocessor(RowNormalization::Snv, ColumnScaling::None);
        let (out, params) = pre.fit_transform(&data).unwrap();
        for row in out.axis_iter(Axis(0)) {
            let values = row.to_vec();
            let mean = observed_mean(&values);
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(observed_std(&values, mean), 1.0, epsilon = 1e-12);
        }
        assert_eq!(params.row_means().len(), 2);
        assert_abs_diff_eq!(params.row_means()[1], 25.0, epsilon = 1e-12);
    }

    #[test]
    fn vector_norm_rows_have_unit_length() {
        let data = array![[3.0, 4.0], [0.0, 0.0]];
        let pre = preprocessor(RowNormalization::VectorNorm, ColumnScaling::None);
        let (out, params) = pre.fit_transform(&data).unwrap();
        assert_abs_diff_eq!(out.row(0).to_owned(), array![0.6, 0.8], epsilon = 1e-12);
        assert_abs_diff_eq!(out.row(1).to_owned(), array![0.0, 0.0], epsilon = 1e-15);
        assert!(params.row_means().is_empty());
    }

    #[test]
    fn statistics_skip_missing_cells() {
        let data = array![[1.0, f64::NAN], [3.0, 4.0], [f64::NAN, 8.0]];
        let pre = preprocessor(RowNormalization::None, ColumnScaling::MeanCenter);
        let (out, params) = pre.fit_transform(&data).unwrap();
        assert_abs_diff_eq!(params.feature_means()[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(params.feature_means()[1], 6.0, epsilon = 1e-12);
        assert!(out[[0, 1]].is_nan());
        assert_abs_diff_eq!(out[[1, 1]], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn transform_rejects_wrong_feature_count() {
        let pre = preprocessor(RowNormalization::None, ColumnScaling::MeanCenter);
        let params = pre.fit(&array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        let err = pre.transform(&array![[1.0, 2.0, 3.0]], &params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dimension);
    }

    #[test]
    fn inverse_transform_restores_column_units() {
        let data = array![[1.0, 10.0], [2.0, 25.0], [7.0, 13.0]];
        let pre = preprocessor(RowNormalization::None, ColumnScaling::Standard);
        let (out, params) = pre.fit_transform(&data).unwrap();
        let restored = pre.inverse_transform(&out, &params).unwrap();
        assert_abs_diff_eq!(restored, data, epsilon = 1e-12);
    }

    #[test]
    fn median_averages_middle_values() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_abs_diff_eq!(median_in_place(&mut values), 2.5, epsilon = 1e-15);
    }
}
