// src/model.rs

use crate::config::{KernelType, NipalsOptions, Preprocessing};
use crate::diagnostics::ScoreReference;
use crate::engine::{project, require_complete};
use crate::error::{PcaError, Result};
use crate::nipals::project_with_missing;
use crate::preprocessing::{PreprocessingParams, Preprocessor};
use log::{info, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Algorithm tag stored with a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelMethod {
    Svd,
    Nipals,
    Kernel,
}

impl ModelMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ModelMethod::Svd => "svd",
            ModelMethod::Nipals => "nipals",
            ModelMethod::Kernel => "kernel",
        }
    }
}

/// Read-only snapshot of a fitted model, stored as JSON.
///
/// Fields added after the first layout carry `#[serde(default)]` so older
/// files still load, and unknown fields are ignored. The `kernel` block is
/// written only for kernel models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedModel {
    pub method: ModelMethod,
    pub components_requested: usize,
    pub components_computed: usize,
    #[serde(default)]
    pub feature_names: Vec<String>,
    pub preprocessing: Preprocessing,
    pub parameters: PreprocessingParams,
    /// One row per component. Empty for kernel models.
    /// Shape: (k_components, n_features)
    #[serde(default)]
    pub loadings: Vec<Vec<f64>>,
    pub explained_variance: Vec<f64>,
    #[serde(default)]
    pub explained_variance_ratio: Vec<f64>,
    #[serde(default)]
    pub all_eigenvalues: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nipals: Option<NipalsOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelType>,
    /// Training-score statistics for diagnosing new samples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_reference: Option<ScoreReference>,
}

impl PersistedModel {
    pub fn n_features(&self) -> usize {
        self.parameters.n_features()
    }

    /// Loadings as (n_features, k_components), the layout used for projection.
    pub fn loadings_matrix(&self) -> Result<Array2<f64>> {
        let k = self.loadings.len();
        let p = self.n_features();
        let mut matrix = Array2::zeros((p, k));
        for (j, row) in self.loadings.iter().enumerate() {
            if row.len() != p {
                return Err(PcaError::dimension(p, row.len(), format!("stored loadings of component {}", j + 1)));
            }
            for (i, &value) in row.iter().enumerate() {
                matrix[[i, j]] = value;
            }
        }
        Ok(matrix)
    }

    /// Checks the snapshot is internally consistent.
    ///
    /// # Errors
    /// `Validation` or `Dimension` describing the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        let k = self.components_computed;
        if k == 0 {
            return Err(PcaError::Validation("model has no components".to_string()));
        }
        if k > self.components_requested {
            return Err(PcaError::Validation(format!(
                "model computed {} components but only {} were requested",
                k, self.components_requested
            )));
        }
        if self.explained_variance.len() != k {
            return Err(PcaError::dimension(k, self.explained_variance.len(), "stored explained variance"));
        }
        if !self.explained_variance_ratio.is_empty() && self.explained_variance_ratio.len() != k {
            return Err(PcaError::dimension(
                k,
                self.explained_variance_ratio.len(),
                "stored explained variance ratio",
            ));
        }
        if !self.feature_names.is_empty() && self.feature_names.len() != self.n_features() {
            return Err(PcaError::dimension(self.n_features(), self.feature_names.len(), "stored feature names"));
        }
        self.preprocessing.validate()?;
        self.parameters.validate_for(&self.preprocessing)?;
        if let Some(reference) = &self.score_reference {
            if reference.n_components() != k {
                return Err(PcaError::dimension(k, reference.n_components(), "stored score reference"));
            }
            reference.validate()?;
        }

        match self.method {
            ModelMethod::Kernel => {
                let kernel = self
                    .kernel
                    .ok_or_else(|| PcaError::Validation("kernel model without kernel parameters".to_string()))?;
                kernel.validate()?;
            }
            ModelMethod::Svd | ModelMethod::Nipals => {
                if self.kernel.is_some() {
                    return Err(PcaError::Validation(format!(
                        "{} model must not carry kernel parameters",
                        self.method.name()
                    )));
                }
                if self.loadings.len() != k {
                    return Err(PcaError::dimension(k, self.loadings.len(), "stored loading vectors"));
                }
                let loadings = self.loadings_matrix()?;
                if loadings.iter().any(|v| !v.is_finite()) {
                    return Err(PcaError::Validation("stored loadings contain non-finite values".to_string()));
                }
            }
        }
        Ok(())
    }

    /// Projects new samples with the stored parameters. Nothing is refitted.
    ///
    /// Columns are matched by position; a differing feature name is only
    /// logged.
    ///
    /// # Errors
    /// * `Configuration` for kernel models.
    /// * `Dimension` when the feature count differs from the model's.
    /// * `MissingData` for `NaN` cells in a non-NIPALS model.
    pub fn transform(&self, data: &Array2<f64>, feature_names: Option<&[String]>) -> Result<Array2<f64>> {
        if self.method == ModelMethod::Kernel {
            return Err(PcaError::Configuration(
                "transform is not supported for kernel PCA models".to_string(),
            ));
        }
        if data.ncols() != self.n_features() {
            return Err(PcaError::dimension(self.n_features(), data.ncols(), "model transform (features)"));
        }
        if let Some(names) = feature_names {
            self.warn_on_name_mismatch(names);
        }

        let preprocessor = Preprocessor::new(self.preprocessing)?;
        let x = preprocessor.transform(data, &self.parameters)?;
        let loadings = self.loadings_matrix()?;
        match self.method {
            ModelMethod::Nipals => project_with_missing(&x, &loadings),
            _ => {
                require_complete(&x, "model transform")?;
                project(&x, &loadings)
            }
        }
    }

    fn warn_on_name_mismatch(&self, names: &[String]) {
        if self.feature_names.is_empty() {
            return;
        }
        let mismatched: Vec<String> = self
            .feature_names
            .iter()
            .zip(names.iter())
            .enumerate()
            .filter(|(_, (expected, actual))| expected != actual)
            .map(|(i, (expected, actual))| format!("column {}: expected '{}', got '{}'", i, expected, actual))
            .collect();
        if !mismatched.is_empty() {
            warn!(
                "Feature names differ from the model in {} column(s); proceeding by column order ({})",
                mismatched.len(),
                mismatched.iter().take(5).cloned().collect::<Vec<_>>().join("; ")
            );
        }
    }

    /// Writes the model as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!("Saved {} model to {}", self.method.name(), path.as_ref().display());
        Ok(())
    }

    /// Reads and validates a model written by [`PersistedModel::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let model: PersistedModel = serde_json::from_reader(reader)?;
        model.validate()?;
        info!(
            "Loaded {} model with {} components over {} features",
            model.method.name(),
            model.components_computed,
            model.n_features()
        );
        Ok(model)
    }
}
