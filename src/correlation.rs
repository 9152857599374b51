// src/correlation.rs

use crate::config::{CorrelationMethod, EigencorrelationConfig};
use crate::error::{PcaError, Result};
use log::debug;
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::cmp::Ordering;

/// Minimum number of paired observations for a coefficient.
const MIN_OBSERVATIONS: usize = 3;

/// One external column supplied alongside the data matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValues {
    /// `NaN` marks a missing value.
    Numeric(Vec<f64>),
    /// Grouping labels. Never correlated.
    Categorical(Vec<String>),
}

impl MetadataValues {
    pub fn len(&self) -> usize {
        match self {
            MetadataValues::Numeric(values) => values.len(),
            MetadataValues::Categorical(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn select(&self, rows: &[usize]) -> MetadataValues {
        match self {
            MetadataValues::Numeric(values) => MetadataValues::Numeric(rows.iter().map(|&i| values[i]).collect()),
            MetadataValues::Categorical(values) => {
                MetadataValues::Categorical(rows.iter().map(|&i| values[i].clone()).collect())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataColumn {
    pub name: String,
    pub values: MetadataValues,
}

impl MetadataColumn {
    pub fn numeric(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values: MetadataValues::Numeric(values),
        }
    }

    pub fn categorical(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values: MetadataValues::Categorical(values),
        }
    }
}

/// Coefficients and p-values of one variable against each analyzed component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableCorrelation {
    pub name: String,
    pub coefficients: Vec<f64>,
    pub p_values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EigencorrelationResult {
    pub method: CorrelationMethod,
    /// Labels of the analyzed components, e.g. `PC1`.
    pub components: Vec<String>,
    /// Numeric variables in input order.
    pub variables: Vec<VariableCorrelation>,
}

impl EigencorrelationResult {
    pub fn get(&self, name: &str) -> Option<&VariableCorrelation> {
        self.variables.iter().find(|v| v.name == name)
    }
}

/// Correlates score columns with numeric metadata.
#[derive(Debug, Clone, Default)]
pub struct EigencorrelationAnalyzer {
    config: EigencorrelationConfig,
}

impl EigencorrelationAnalyzer {
    pub fn new(config: EigencorrelationConfig) -> Self {
        Self { config }
    }

    /// # Errors
    /// * `Validation` when a column's length differs from the score rows or a
    ///   requested component index is out of range.
    /// * `Computation` when the t distribution cannot be built.
    pub fn analyze(&self, scores: &Array2<f64>, metadata: &[MetadataColumn]) -> Result<EigencorrelationResult> {
        let n_samples = scores.nrows();
        let components: Vec<usize> = match &self.config.components {
            Some(selected) => {
                if let Some(&bad) = selected.iter().find(|&&j| j >= scores.ncols()) {
                    return Err(PcaError::Validation(format!(
                        "eigencorrelation component {} is out of range (0..{})",
                        bad,
                        scores.ncols()
                    )));
                }
                selected.clone()
            }
            None => (0..scores.ncols()).collect(),
        };

        let mut variables = Vec::new();
        for column in metadata {
            if column.values.len() != n_samples {
                return Err(PcaError::Validation(format!(
                    "metadata column '{}' has {} values for {} samples",
                    column.name,
                    column.values.len(),
                    n_samples
                )));
            }
            let values = match &column.values {
                MetadataValues::Numeric(values) => values,
                MetadataValues::Categorical(_) => {
                    debug!("Skipping categorical metadata column '{}'", column.name);
                    continue;
                }
            };
            let pairs: Vec<(f64, f64)> = components
                .par_iter()
                .map(|&j| correlate(self.config.method, scores.column(j), values))
                .collect::<Result<Vec<_>>>()?;
            let (coefficients, p_values) = pairs.into_iter().unzip();
            variables.push(VariableCorrelation {
                name: column.name.clone(),
                coefficients,
                p_values,
            });
        }

        Ok(EigencorrelationResult {
            method: self.config.method,
            components: components.iter().map(|j| format!("PC{}", j + 1)).collect(),
            variables,
        })
    }
}

/// Correlation and two-sided p-value over the rows where both sides are
/// observed. `(NaN, NaN)` when fewer than 3 pairs remain or either side is
/// constant.
pub fn correlate(method: CorrelationMethod, scores: ArrayView1<f64>, values: &[f64]) -> Result<(f64, f64)> {
    let (x, y): (Vec<f64>, Vec<f64>) = scores
        .iter()
        .zip(values.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .unzip();
    if x.len() < MIN_OBSERVATIONS {
        return Ok((f64::NAN, f64::NAN));
    }
    let r = match method {
        CorrelationMethod::Pearson => pearson(&x, &y),
        CorrelationMethod::Spearman => pearson(&average_ranks(&x), &average_ranks(&y)),
    };
    match r {
        Some(r) => Ok((r, p_value(r, x.len())?)),
        None => Ok((f64::NAN, f64::NAN)),
    }
}

/// `None` for a constant input.
fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y.iter()) {
        let (dx, dy) = (a - mean_x, b - mean_y);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// 1-based ranks; ties share the average of the ranks they span.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));
    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

/// Two-sided p-value of `r` under `t = r·√((n-2)/(1-r²))` with `n - 2`
/// degrees of freedom.
fn p_value(r: f64, n: usize) -> Result<f64> {
    let df = (n - 2) as f64;
    let denom = 1.0 - r * r;
    if denom <= 0.0 {
        return Ok(0.0);
    }
    let t = r.abs() * (df / denom).sqrt();
    let dist = StudentsT::new(0.0, 1.0, df).map_err(|e| PcaError::Computation(e.to_string()))?;
    Ok((2.0 * (1.0 - dist.cdf(t))).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn ties_get_average_ranks() {
        assert_eq!(average_ranks(&[10.0, 20.0, 10.0, 30.0]), vec![1.5, 3.0, 1.5, 4.0]);
    }

    #[test]
    fn perfect_linear_relation() {
        let scores = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let (r, p) = correlate(CorrelationMethod::Pearson, scores.view(), &[2.0, 4.0, 6.0, 8.0, 10.0]).unwrap();
        assert_abs_diff_eq!(r, 1.0, epsilon = 1e-12);
        assert_eq!(p, 0.0);
    }

    #[test]
    fn spearman_sees_monotone_relation() {
        let scores = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let values = [1.0, 8.0, 27.0, 64.0, 125.0];
        let (pearson_r, _) = correlate(CorrelationMethod::Pearson, scores.view(), &values).unwrap();
        let (spearman_r, _) = correlate(CorrelationMethod::Spearman, scores.view(), &values).unwrap();
        assert!(pearson_r < 1.0 - 1e-6);
        assert_abs_diff_eq!(spearman_r, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn p_value_matches_reference() {
        // r = 0.5, n = 10: t = 1.632993, two-sided p = 0.141
        let p = p_value(0.5, 10).unwrap();
        assert_abs_diff_eq!(p, 0.141, epsilon = 2e-3);
    }

    #[test]
    fn degenerate_inputs_give_nan() {
        let scores = array![1.0, 2.0, 3.0, 4.0];
        let (r, p) = correlate(CorrelationMethod::Pearson, scores.view(), &[5.0, 5.0, 5.0, 5.0]).unwrap();
        assert!(r.is_nan() && p.is_nan());
        let (r, _) = correlate(
            CorrelationMethod::Pearson,
            scores.view(),
            &[1.0, f64::NAN, f64::NAN, 2.0],
        )
        .unwrap();
        assert!(r.is_nan());
    }

    #[test]
    fn categorical_columns_are_skipped_and_order_kept() {
        let scores = array![[1.0, 0.3], [2.0, -0.1], [3.0, 0.4], [4.0, 0.0]];
        let metadata = vec![
            MetadataColumn::numeric("dose", vec![1.0, 2.0, 3.0, 5.0]),
            MetadataColumn::categorical("batch", vec!["a".into(), "a".into(), "b".into(), "b".into()]),
            MetadataColumn::numeric("age", vec![40.0, 30.0, 20.0, 10.0]),
        ];
        let result = EigencorrelationAnalyzer::default().analyze(&scores, &metadata).unwrap();
        let names: Vec<&str> = result.variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["dose", "age"]);
        assert_eq!(result.components, vec!["PC1", "PC2"]);
        assert_abs_diff_eq!(result.get("age").unwrap().coefficients[0], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let scores = array![[1.0], [2.0], [3.0]];
        let metadata = vec![MetadataColumn::numeric("x", vec![1.0, 2.0])];
        let err = EigencorrelationAnalyzer::default().analyze(&scores, &metadata).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn component_subset() {
        let scores = array![[1.0, 0.3], [2.0, -0.1], [3.0, 0.4], [4.0, 0.0]];
        let analyzer = EigencorrelationAnalyzer::new(EigencorrelationConfig {
            method: CorrelationMethod::Pearson,
            components: Some(vec![1]),
        });
        let result = analyzer
            .analyze(&scores, &[MetadataColumn::numeric("x", vec![1.0, 2.0, 3.0, 4.0])])
            .unwrap();
        assert_eq!(result.components, vec!["PC2"]);
        assert_eq!(result.variables[0].coefficients.len(), 1);
    }
}
