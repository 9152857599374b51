// src/missing.rs

use crate::config::MissingStrategy;
use crate::error::{PcaError, Result};
use crate::preprocessing::{median_in_place, observed_mean};
use log::{debug, info};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Where the `NaN` cells of a matrix are.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MissingInfo {
    pub n_rows: usize,
    pub n_columns: usize,
    pub total_missing: usize,
    /// Row indices with at least one missing cell, ascending.
    pub rows_with_missing: Vec<usize>,
    /// Column indices with at least one missing cell, ascending.
    pub columns_with_missing: Vec<usize>,
}

impl MissingInfo {
    /// Scans `data` for `NaN`.
    pub fn from_data(data: &Array2<f64>) -> Self {
        let (n_rows, n_columns) = data.dim();
        let mut row_flags = vec![false; n_rows];
        let mut column_flags = vec![false; n_columns];
        let mut total_missing = 0;
        for ((i, j), value) in data.indexed_iter() {
            if value.is_nan() {
                total_missing += 1;
                row_flags[i] = true;
                column_flags[j] = true;
            }
        }
        let flagged = |flags: Vec<bool>| -> Vec<usize> {
            flags
                .into_iter()
                .enumerate()
                .filter_map(|(idx, f)| f.then_some(idx))
                .collect()
        };
        Self {
            n_rows,
            n_columns,
            total_missing,
            rows_with_missing: flagged(row_flags),
            columns_with_missing: flagged(column_flags),
        }
    }

    /// Like [`MissingInfo::from_data`], after checking that `mask` marks
    /// exactly the `NaN` cells of `data`.
    pub fn from_mask(data: &Array2<f64>, mask: &Array2<bool>) -> Result<Self> {
        if mask.dim() != data.dim() {
            return Err(PcaError::Validation(format!(
                "missing mask shape {:?} does not match data shape {:?}",
                mask.dim(),
                data.dim()
            )));
        }
        let mismatch = data
            .indexed_iter()
            .zip(mask.iter())
            .find(|((_, value), flag)| value.is_nan() != **flag);
        if let Some((((row, column), value), flag)) = mismatch {
            return Err(PcaError::Validation(format!(
                "missing mask disagrees with data at row {}, column {} (value {}, mask {})",
                row, column, value, flag
            )));
        }
        Ok(Self::from_data(data))
    }

    pub fn has_missing(&self) -> bool {
        self.total_missing > 0
    }

    pub fn missing_fraction(&self) -> f64 {
        let cells = self.n_rows * self.n_columns;
        if cells == 0 {
            0.0
        } else {
            self.total_missing as f64 / cells as f64
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} missing values ({:.2}%) in {} rows and {} columns",
            self.total_missing,
            100.0 * self.missing_fraction(),
            self.rows_with_missing.len(),
            self.columns_with_missing.len()
        )
    }
}

/// Output of [`MissingValueResolver::resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedData {
    pub data: Array2<f64>,
    /// Indices into the input rows that survived, in order. Use it to filter
    /// row names and metadata.
    pub retained_rows: Vec<usize>,
    /// `(row, column)` of every cell that was filled in, in output coordinates.
    pub imputed_cells: Vec<(usize, usize)>,
}

/// Applies a [`MissingStrategy`] to a raw matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingValueResolver {
    strategy: MissingStrategy,
}

impl MissingValueResolver {
    pub fn new(strategy: MissingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> MissingStrategy {
        self.strategy
    }

    /// Conditions `data` for decomposition.
    ///
    /// # Errors
    /// * `MissingData` on the first `NaN` under the `error` strategy, or for a
    ///   column without observed values under `mean`/`median`.
    /// * `Validation` when `drop` would remove every row.
    pub fn resolve(&self, data: &Array2<f64>) -> Result<ResolvedData> {
        let n_rows = data.nrows();
        let all_rows: Vec<usize> = (0..n_rows).collect();
        let info = MissingInfo::from_data(data);
        if !info.has_missing() {
            return Ok(ResolvedData {
                data: data.clone(),
                retained_rows: all_rows,
                imputed_cells: Vec::new(),
            });
        }
        info!("Resolving {} with strategy {:?}", info.summary(), self.strategy);

        match self.strategy {
            MissingStrategy::Error => {
                let ((row, column), _) = data
                    .indexed_iter()
                    .find(|(_, v)| v.is_nan())
                    .ok_or_else(|| PcaError::Computation("missing cell vanished during scan".to_string()))?;
                Err(PcaError::MissingData {
                    row,
                    column,
                    message: "missing values are not allowed with the error strategy".to_string(),
                })
            }
            MissingStrategy::Drop => {
                let retained_rows: Vec<usize> = all_rows
                    .into_iter()
                    .filter(|i| info.rows_with_missing.binary_search(i).is_err())
                    .collect();
                if retained_rows.is_empty() {
                    return Err(PcaError::Validation(
                        "every row contains missing values; nothing left after drop".to_string(),
                    ));
                }
                debug!("Dropped {} rows with missing values", n_rows - retained_rows.len());
                Ok(ResolvedData {
                    data: data.select(Axis(0), &retained_rows),
                    retained_rows,
                    imputed_cells: Vec::new(),
                })
            }
            MissingStrategy::Mean | MissingStrategy::Median => {
                let mut filled = data.clone();
                let mut imputed_cells = Vec::with_capacity(info.total_missing);
                for &j in &info.columns_with_missing {
                    let mut observed: Vec<f64> =
                        data.column(j).iter().cloned().filter(|v| !v.is_nan()).collect();
                    if observed.is_empty() {
                        return Err(PcaError::MissingData {
                            row: 0,
                            column: j,
                            message: "cannot impute a column without observed values".to_string(),
                        });
                    }
                    let fill = if self.strategy == MissingStrategy::Mean {
                        observed_mean(&observed)
                    } else {
                        median_in_place(&mut observed)
                    };
                    for (i, cell) in filled.column_mut(j).iter_mut().enumerate() {
                        if cell.is_nan() {
                            *cell = fill;
                            imputed_cells.push((i, j));
                        }
                    }
                }
                imputed_cells.sort_unstable();
                Ok(ResolvedData {
                    data: filled,
                    retained_rows: all_rows,
                    imputed_cells,
                })
            }
            MissingStrategy::Native => Ok(ResolvedData {
                data: data.clone(),
                retained_rows: all_rows,
                imputed_cells: Vec::new(),
            }),
        }
    }
}

/// Rows and columns that survive an exclusion list.
#[derive(Debug, Clone)]
pub struct Selection {
    pub data: Array2<f64>,
    pub mask: Option<Array2<bool>>,
    pub rows: Vec<usize>,
    pub columns: Vec<usize>,
}

/// Removes excluded rows and columns (zero-based) from `data` and its mask.
///
/// # Errors
/// `Validation` for an out-of-range index or when nothing would remain.
pub fn apply_exclusions(
    data: &Array2<f64>,
    mask: Option<&Array2<bool>>,
    excluded_rows: &[usize],
    excluded_columns: &[usize],
) -> Result<Selection> {
    let (n_rows, n_columns) = data.dim();
    let keep = |excluded: &[usize], len: usize, what: &str| -> Result<Vec<usize>> {
        if let Some(&bad) = excluded.iter().find(|&&idx| idx >= len) {
            return Err(PcaError::Validation(format!(
                "excluded {} index {} is out of range (0..{})",
                what, bad, len
            )));
        }
        let kept: Vec<usize> = (0..len).filter(|idx| !excluded.contains(idx)).collect();
        if kept.is_empty() {
            return Err(PcaError::Validation(format!("every {} is excluded", what)));
        }
        Ok(kept)
    };
    let rows = keep(excluded_rows, n_rows, "row")?;
    let columns = keep(excluded_columns, n_columns, "column")?;

    let data = data.select(Axis(0), &rows).select(Axis(1), &columns);
    let mask = mask.map(|m| m.select(Axis(0), &rows).select(Axis(1), &columns));
    Ok(Selection {
        data,
        mask,
        rows,
        columns,
    })
}
