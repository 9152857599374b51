// src/analysis.rs

use crate::config::PcaConfig;
use crate::correlation::{EigencorrelationAnalyzer, MetadataColumn, MetadataValues};
use crate::diagnostics::group_ellipses;
use crate::error::{PcaError, Result};
use crate::missing::{apply_exclusions, MissingInfo};
use crate::pca::{PcaResult, PCA};
use log::{info, warn};
use ndarray::Array2;

/// A data matrix plus everything that travels with its rows and columns.
#[derive(Debug, Clone, Default)]
pub struct AnalysisInput {
    /// `NaN` marks a missing cell.
    /// Shape: (n_samples, n_features)
    pub data: Array2<f64>,
    /// `true` where a cell is missing. Must agree with the `NaN` layout.
    pub missing_mask: Option<Array2<bool>>,
    pub feature_names: Vec<String>,
    pub row_names: Vec<String>,
    /// Per-row external columns, used for eigencorrelation and grouping.
    pub metadata: Vec<MetadataColumn>,
}

impl AnalysisInput {
    pub fn new(data: Array2<f64>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn with_feature_names(mut self, names: Vec<String>) -> Self {
        self.feature_names = names;
        self
    }

    pub fn with_row_names(mut self, names: Vec<String>) -> Self {
        self.row_names = names;
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<MetadataColumn>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_missing_mask(mut self, mask: Array2<bool>) -> Self {
        self.missing_mask = Some(mask);
        self
    }
}

/// A finished analysis: the fitted model, its result and the names that line
/// up with the score rows and loading columns.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub model: PCA,
    pub result: PcaResult,
    pub missing: MissingInfo,
    /// Names of the rows behind each score row.
    pub row_names: Vec<String>,
    pub feature_names: Vec<String>,
    /// Metadata filtered to the analyzed rows.
    pub metadata: Vec<MetadataColumn>,
}

/// Runs exclusion, missing-value handling, preprocessing, decomposition,
/// diagnostics and eigencorrelation.
///
/// # Errors
/// `Validation` when names, mask or metadata disagree with the matrix shape,
/// otherwise whatever the failing stage reports.
pub fn analyze(input: &AnalysisInput, config: &PcaConfig) -> Result<Analysis> {
    config.validate()?;
    let (n_rows, n_columns) = input.data.dim();
    check_len(input.feature_names.len(), n_columns, "feature names")?;
    check_len(input.row_names.len(), n_rows, "row names")?;
    for column in &input.metadata {
        if column.values.len() != n_rows {
            return Err(PcaError::Validation(format!(
                "metadata column '{}' has {} values for {} rows",
                column.name,
                column.values.len(),
                n_rows
            )));
        }
    }

    let selection = apply_exclusions(
        &input.data,
        input.missing_mask.as_ref(),
        &config.excluded_rows,
        &config.excluded_columns,
    )?;
    let missing = match &selection.mask {
        Some(mask) => MissingInfo::from_mask(&selection.data, mask)?,
        None => MissingInfo::from_data(&selection.data),
    };
    if missing.has_missing() {
        info!("{}", missing.summary());
    }

    let feature_names: Vec<String> = pick(&input.feature_names, &selection.columns);
    let mut model = PCA::new().with_feature_names(feature_names.clone());
    let mut result = model.fit(&selection.data, config)?;

    // Input row index of every score row.
    let rows: Vec<usize> = result.retained_rows.iter().map(|&i| selection.rows[i]).collect();
    if rows.len() < n_rows {
        info!("Analyzing {} of {} rows", rows.len(), n_rows);
    }
    let row_names = pick(&input.row_names, &rows);
    let metadata: Vec<MetadataColumn> = input
        .metadata
        .iter()
        .map(|column| MetadataColumn {
            name: column.name.clone(),
            values: column.values.select(&rows),
        })
        .collect();

    if let (Some(diagnostics), Some(report)) = (&config.diagnostics, result.diagnostics.as_mut()) {
        if let Some(group_by) = &diagnostics.group_by {
            match metadata.iter().find(|c| &c.name == group_by).map(|c| &c.values) {
                Some(MetadataValues::Categorical(groups)) if result.components_computed >= 2 => {
                    report.group_ellipses = group_ellipses(&result.scores, groups, diagnostics.ellipse_confidence)?;
                }
                Some(MetadataValues::Categorical(_)) => {}
                Some(MetadataValues::Numeric(_)) => warn!("Grouping column '{}' is not categorical", group_by),
                None => warn!("Grouping column '{}' not found in metadata", group_by),
            }
        }
    }

    if let Some(eigencorrelation) = &config.eigencorrelation {
        result.eigencorrelation = Some(EigencorrelationAnalyzer::new(eigencorrelation.clone()).analyze(&result.scores, &metadata)?);
    }

    Ok(Analysis {
        model,
        result,
        missing,
        row_names,
        feature_names,
        metadata,
    })
}

/// Empty name lists are allowed and stay empty.
fn check_len(actual: usize, expected: usize, what: &str) -> Result<()> {
    if actual != 0 && actual != expected {
        return Err(PcaError::Validation(format!(
            "{} has {} entries for {} positions",
            what, actual, expected
        )));
    }
    Ok(())
}

fn pick(names: &[String], indices: &[usize]) -> Vec<String> {
    if names.is_empty() {
        return Vec::new();
    }
    indices.iter().map(|&i| names[i].clone()).collect()
}
