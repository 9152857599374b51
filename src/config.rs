// src/config.rs

use crate::error::{PcaError, Result};
use serde::{Deserialize, Serialize};

/// Normal-consistency factor turning a median absolute deviation into a
/// standard-deviation estimate for Gaussian data.
pub const DEFAULT_MAD_SCALE: f64 = 1.4826;

/// Row-wise operation applied before any column-wise step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowNormalization {
    #[default]
    None,
    /// Standard normal variate: subtract the row mean, divide by the row std-dev.
    Snv,
    /// Divide each row by its Euclidean norm.
    VectorNorm,
    /// SNV followed by L2 normalization.
    SnvThenVectorNorm,
}

impl RowNormalization {
    pub fn applies_snv(&self) -> bool {
        matches!(self, RowNormalization::Snv | RowNormalization::SnvThenVectorNorm)
    }

    pub fn applies_vector_norm(&self) -> bool {
        matches!(
            self,
            RowNormalization::VectorNorm | RowNormalization::SnvThenVectorNorm
        )
    }
}

/// Column-wise operation applied after the row-wise step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnScaling {
    None,
    #[default]
    MeanCenter,
    /// Center, then divide by the column standard deviation.
    Standard,
    /// Subtract the column median, divide by the scaled MAD.
    Robust,
    /// Divide by the column standard deviation without centering.
    ScaleOnly,
}

/// Preprocessing mode.
///
/// Every combination of a row operation and a column operation is valid, so
/// there is nothing to reject beyond the MAD scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Preprocessing {
    #[serde(default)]
    pub row: RowNormalization,
    #[serde(default)]
    pub column: ColumnScaling,
    /// Multiplier applied to the raw MAD for [`ColumnScaling::Robust`].
    #[serde(default = "default_mad_scale")]
    pub mad_scale: f64,
}

fn default_mad_scale() -> f64 {
    DEFAULT_MAD_SCALE
}

impl Default for Preprocessing {
    fn default() -> Self {
        Self::new(RowNormalization::None, ColumnScaling::MeanCenter)
    }
}

impl Preprocessing {
    pub fn new(row: RowNormalization, column: ColumnScaling) -> Self {
        Self {
            row,
            column,
            mad_scale: DEFAULT_MAD_SCALE,
        }
    }

    /// Only the column step; no row normalization.
    pub fn column_only(column: ColumnScaling) -> Self {
        Self::new(RowNormalization::None, column)
    }

    pub fn with_mad_scale(mut self, mad_scale: f64) -> Self {
        self.mad_scale = mad_scale;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.mad_scale.is_finite() || self.mad_scale <= 0.0 {
            return Err(PcaError::Preprocessing(format!(
                "MAD scale factor must be positive and finite, got {}",
                self.mad_scale
            )));
        }
        Ok(())
    }
}

/// Kernel function for kernel PCA.
///
/// An absent `gamma` resolves to `1 / n_features` at fit time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelType {
    Linear,
    Rbf {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gamma: Option<f64>,
    },
    Polynomial {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gamma: Option<f64>,
        degree: u32,
        #[serde(default)]
        coef0: f64,
    },
}

impl KernelType {
    pub fn name(&self) -> &'static str {
        match self {
            KernelType::Linear => "linear",
            KernelType::Rbf { .. } => "rbf",
            KernelType::Polynomial { .. } => "polynomial",
        }
    }

    pub(crate) fn gamma(&self) -> Option<f64> {
        match self {
            KernelType::Linear => None,
            KernelType::Rbf { gamma } | KernelType::Polynomial { gamma, .. } => *gamma,
        }
    }

    /// Fills in the default gamma for the given feature count.
    pub fn resolved(&self, n_features: usize) -> KernelType {
        let default_gamma = 1.0 / n_features.max(1) as f64;
        match *self {
            KernelType::Linear => KernelType::Linear,
            KernelType::Rbf { gamma } => KernelType::Rbf {
                gamma: Some(gamma.unwrap_or(default_gamma)),
            },
            KernelType::Polynomial {
                gamma,
                degree,
                coef0,
            } => KernelType::Polynomial {
                gamma: Some(gamma.unwrap_or(default_gamma)),
                degree,
                coef0,
            },
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(gamma) = self.gamma() {
            if !gamma.is_finite() || gamma <= 0.0 {
                return Err(PcaError::Configuration(format!(
                    "{} kernel gamma must be positive and finite, got {}",
                    self.name(),
                    gamma
                )));
            }
        }
        if let KernelType::Polynomial { degree, coef0, .. } = self {
            if *degree == 0 {
                return Err(PcaError::Configuration(
                    "polynomial kernel degree must be at least 1".to_string(),
                ));
            }
            if !coef0.is_finite() {
                return Err(PcaError::Configuration(format!(
                    "polynomial kernel coef0 must be finite, got {}",
                    coef0
                )));
            }
        }
        Ok(())
    }
}

/// Stopping rule for NIPALS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NipalsOptions {
    /// Convergence threshold on `‖t_new - t‖ / ‖t_new‖`.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for NipalsOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 10_000,
        }
    }
}

/// Decomposition algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "method", content = "options", rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    Svd,
    Nipals(NipalsOptions),
    Kernel(KernelType),
}

impl Algorithm {
    pub fn nipals() -> Self {
        Algorithm::Nipals(NipalsOptions::default())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Svd => "svd",
            Algorithm::Nipals(_) => "nipals",
            Algorithm::Kernel(_) => "kernel",
        }
    }

    pub fn is_kernel(&self) -> bool {
        matches!(self, Algorithm::Kernel(_))
    }
}

/// How `NaN` cells are handled before decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStrategy {
    /// Any `NaN` is an error.
    #[default]
    Error,
    /// Remove rows that contain a `NaN`.
    Drop,
    Mean,
    Median,
    /// Leave `NaN` in place; NIPALS skips it pairwise.
    Native,
}

/// Rule that turns T² and Q into an outlier flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierRule {
    /// T² above its limit.
    #[default]
    T2,
    /// Q above its limit.
    Q,
    T2OrQ,
    T2AndQ,
}

/// Options for the diagnostics calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Confidence level of the limit used for the outlier flag.
    pub confidence: f64,
    pub rule: OutlierRule,
    /// Confidence level for the PC1/PC2 ellipses.
    pub ellipse_confidence: f64,
    /// Categorical metadata column whose groups get their own ellipse.
    pub group_by: Option<String>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            confidence: 0.99,
            rule: OutlierRule::T2,
            ellipse_confidence: 0.95,
            group_by: None,
        }
    }
}

impl DiagnosticsConfig {
    fn validate(&self) -> Result<()> {
        for (name, level) in [
            ("confidence", self.confidence),
            ("ellipse_confidence", self.ellipse_confidence),
        ] {
            if !(level > 0.0 && level < 1.0) {
                return Err(PcaError::Configuration(format!(
                    "diagnostics {} must lie in (0, 1), got {}",
                    name, level
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    Spearman,
}

/// Options for the eigencorrelation analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EigencorrelationConfig {
    #[serde(default)]
    pub method: CorrelationMethod,
    /// Zero-based component indices; `None` means every retained component.
    #[serde(default)]
    pub components: Option<Vec<usize>>,
}

/// Full configuration of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaConfig {
    /// Requested component count. Clamped to the feasible rank at fit time.
    pub n_components: usize,
    pub preprocessing: Preprocessing,
    pub algorithm: Algorithm,
    pub missing_strategy: MissingStrategy,
    /// Zero-based row indices removed before anything else happens.
    pub excluded_rows: Vec<usize>,
    /// Zero-based column indices removed before anything else happens.
    pub excluded_columns: Vec<usize>,
    pub diagnostics: Option<DiagnosticsConfig>,
    pub eigencorrelation: Option<EigencorrelationConfig>,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self::new(2)
    }
}

impl PcaConfig {
    /// Mean-centered SVD with the `error` missing strategy.
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            preprocessing: Preprocessing::default(),
            algorithm: Algorithm::Svd,
            missing_strategy: MissingStrategy::Error,
            excluded_rows: Vec::new(),
            excluded_columns: Vec::new(),
            diagnostics: None,
            eigencorrelation: None,
        }
    }

    pub fn with_preprocessing(mut self, preprocessing: Preprocessing) -> Self {
        self.preprocessing = preprocessing;
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_missing_strategy(mut self, strategy: MissingStrategy) -> Self {
        self.missing_strategy = strategy;
        self
    }

    pub fn with_excluded_rows(mut self, rows: Vec<usize>) -> Self {
        self.excluded_rows = rows;
        self
    }

    pub fn with_excluded_columns(mut self, columns: Vec<usize>) -> Self {
        self.excluded_columns = columns;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsConfig) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn with_eigencorrelation(mut self, eigencorrelation: EigencorrelationConfig) -> Self {
        self.eigencorrelation = Some(eigencorrelation);
        self
    }

    /// Checks every option combination. Runs before any numerical work.
    ///
    /// # Errors
    /// * `Validation` when no components are requested.
    /// * `Configuration` for `native` missing handling outside NIPALS, invalid
    ///   kernel or NIPALS parameters, or out-of-range confidence levels.
    /// * `Preprocessing` for an invalid MAD scale factor.
    pub fn validate(&self) -> Result<()> {
        if self.n_components == 0 {
            return Err(PcaError::Validation(
                "number of components must be at least 1".to_string(),
            ));
        }
        self.preprocessing.validate()?;

        match &self.algorithm {
            Algorithm::Svd => {}
            Algorithm::Nipals(options) => {
                if !options.tolerance.is_finite() || options.tolerance <= 0.0 {
                    return Err(PcaError::Configuration(format!(
                        "NIPALS tolerance must be positive, got {}",
                        options.tolerance
                    )));
                }
                if options.max_iterations == 0 {
                    return Err(PcaError::Configuration(
                        "NIPALS max_iterations must be at least 1".to_string(),
                    ));
                }
            }
            Algorithm::Kernel(kernel) => kernel.validate()?,
        }

        if self.missing_strategy == MissingStrategy::Native
            && !matches!(self.algorithm, Algorithm::Nipals(_))
        {
            return Err(PcaError::Configuration(format!(
                "native missing-value handling requires the nipals algorithm, not {}",
                self.algorithm.name()
            )));
        }

        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.validate()?;
        }
        Ok(())
    }
}
