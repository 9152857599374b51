// src/pca.rs

use crate::config::{Algorithm, DiagnosticsConfig, PcaConfig, Preprocessing};
use crate::correlation::EigencorrelationResult;
use crate::diagnostics::{
    ConfidenceLimits, DiagnosticsCalculator, DiagnosticsInput, DiagnosticsReport, SampleMetrics, ScoreReference,
};
use crate::engine::{Decomposer, DecompositionEngine};
use crate::error::{PcaError, Result};
use crate::missing::MissingValueResolver;
use crate::model::{ModelMethod, PersistedModel};
use crate::nipals::NipalsDecomposer;
use crate::preprocessing::{PreprocessingParams, Preprocessor};
use crate::svd::SvdDecomposer;
use log::{debug, info};
use ndarray::{Array1, Array2, Axis};
use std::path::Path;
use std::sync::Arc;

/// Output of [`PCA::fit`].
#[derive(Debug, Clone)]
pub struct PcaResult {
    /// Shape: (n_samples, k_components)
    pub scores: Array2<f64>,
    /// One row per component. `None` for kernel PCA.
    /// Shape: (k_components, n_features)
    pub loadings: Option<Array2<f64>>,
    /// Variance of each component, descending.
    pub explained_variance: Array1<f64>,
    /// Fractions of the total variance.
    pub explained_variance_ratio: Array1<f64>,
    /// Running sum of the ratios; ends at 1 when every component is kept.
    pub cumulative_variance: Array1<f64>,
    /// Retained followed by non-retained eigenvalues.
    pub all_eigenvalues: Array1<f64>,
    pub component_labels: Vec<String>,
    pub components_requested: usize,
    pub components_computed: usize,
    pub method: ModelMethod,
    /// Input rows that produced a score row, in order.
    pub retained_rows: Vec<usize>,
    pub preprocessing_params: Arc<PreprocessingParams>,
    pub diagnostics: Option<DiagnosticsReport>,
    pub eigencorrelation: Option<EigencorrelationResult>,
}

impl PcaResult {
    pub fn metrics(&self) -> Option<&[SampleMetrics]> {
        self.diagnostics.as_ref().map(|d| d.metrics.as_slice())
    }

    pub fn limits(&self) -> Option<&ConfidenceLimits> {
        self.diagnostics.as_ref().map(|d| &d.limits)
    }
}

#[derive(Debug, Clone)]
struct FittedState {
    preprocessor: Preprocessor,
    params: Arc<PreprocessingParams>,
    engine: DecompositionEngine,
    algorithm: Algorithm,
    components_requested: usize,
    explained_variance: Array1<f64>,
    explained_variance_ratio: Array1<f64>,
    all_eigenvalues: Array1<f64>,
    /// `None` only for models restored from files written without it.
    reference: Option<ScoreReference>,
}

/// Fit once, then transform, reconstruct or persist.
///
/// ```no_run
/// use pca_toolkit::{PcaConfig, PCA};
/// use ndarray::array;
///
/// let data = array![[1.0, 2.0], [2.0, 4.1], [3.0, 5.9], [4.0, 8.2]];
/// let mut pca = PCA::new();
/// let result = pca.fit(&data, &PcaConfig::new(1)).unwrap();
/// let projected = pca.transform(&data).unwrap();
/// assert_eq!(projected.dim(), result.scores.dim());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PCA {
    state: Option<FittedState>,
    feature_names: Vec<String>,
}

impl PCA {
    pub fn new() -> Self {
        Self {
            state: None,
            feature_names: Vec::new(),
        }
    }

    /// Names stored with the model and checked (by warning) on transform.
    pub fn with_feature_names(mut self, names: Vec<String>) -> Self {
        self.feature_names = names;
        self
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// Feature-space loadings, shape (n_features, k_components).
    pub fn loadings(&self) -> Option<&Array2<f64>> {
        self.state.as_ref().and_then(|s| s.engine.loadings())
    }

    pub fn explained_variance(&self) -> Option<&Array1<f64>> {
        self.state.as_ref().map(|s| &s.explained_variance)
    }

    pub fn explained_variance_ratio(&self) -> Option<&Array1<f64>> {
        self.state.as_ref().map(|s| &s.explained_variance_ratio)
    }

    pub fn preprocessing_params(&self) -> Option<&PreprocessingParams> {
        self.state.as_ref().map(|s| s.params.as_ref())
    }

    /// Missing-value handling, preprocessing, decomposition and (when
    /// configured) diagnostics. Replaces any previous fit.
    ///
    /// # Errors
    /// Configuration problems are reported before any numerical work; after
    /// that, the first failing stage's error is returned unchanged.
    pub fn fit(&mut self, data: &Array2<f64>, config: &PcaConfig) -> Result<PcaResult> {
        config.validate()?;
        if !self.feature_names.is_empty() && self.feature_names.len() != data.ncols() {
            return Err(PcaError::dimension(data.ncols(), self.feature_names.len(), "feature names"));
        }

        let resolved = MissingValueResolver::new(config.missing_strategy).resolve(data)?;
        if !resolved.imputed_cells.is_empty() {
            debug!("Imputed {} cells", resolved.imputed_cells.len());
        }
        let preprocessor = Preprocessor::new(config.preprocessing)?;
        let (x, params) = preprocessor.fit_transform(&resolved.data)?;

        let mut engine = DecompositionEngine::from_algorithm(&config.algorithm);
        let decomposition = engine.fit(&x, config.n_components)?;
        let total = decomposition.total_variance();
        if !(total > 0.0) {
            return Err(PcaError::Computation(
                "preprocessed data have zero total variance".to_string(),
            ));
        }
        let explained_variance = decomposition.eigenvalues.clone();
        let explained_variance_ratio = explained_variance.mapv(|v| v / total);
        let mut running = 0.0;
        let cumulative_variance = explained_variance_ratio.mapv(|r| {
            running += r;
            running
        });
        let k = decomposition.n_components();
        info!(
            "{} fit: {} components explain {:.2}% of the variance",
            engine.name(),
            k,
            100.0 * running
        );

        let reference = ScoreReference::from_scores(&decomposition.scores)?;
        let diagnostics = match &config.diagnostics {
            Some(diagnostics_config) => Some(DiagnosticsCalculator::new(diagnostics_config.clone()).compute(
                DiagnosticsInput {
                    scores: &decomposition.scores,
                    eigenvalues: &decomposition.eigenvalues,
                    all_eigenvalues: &decomposition.all_eigenvalues,
                    preprocessed: Some(&x),
                    loadings: decomposition.loadings.as_ref(),
                    groups: None,
                    reference: Some(&reference),
                },
            )?),
            None => None,
        };

        let params = Arc::new(params);
        let method = method_of(&engine);
        self.state = Some(FittedState {
            preprocessor,
            params: Arc::clone(&params),
            engine,
            algorithm: config.algorithm,
            components_requested: config.n_components,
            explained_variance: explained_variance.clone(),
            explained_variance_ratio: explained_variance_ratio.clone(),
            all_eigenvalues: decomposition.all_eigenvalues.clone(),
            reference: Some(reference),
        });

        Ok(PcaResult {
            loadings: decomposition.loadings.map(|l| l.t().to_owned()),
            scores: decomposition.scores,
            explained_variance,
            explained_variance_ratio,
            cumulative_variance,
            all_eigenvalues: decomposition.all_eigenvalues,
            component_labels: (1..=k).map(|j| format!("PC{}", j)).collect(),
            components_requested: config.n_components,
            components_computed: k,
            method,
            retained_rows: resolved.retained_rows,
            preprocessing_params: params,
            diagnostics,
            eigencorrelation: None,
        })
    }

    /// Applies the stored preprocessing parameters and projects.
    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        let state = self.state.as_ref().ok_or(PcaError::NotFitted)?;
        let x = state.preprocessor.transform(data, &state.params)?;
        state.engine.transform(&x)
    }

    /// [`PCA::fit`] followed by [`PCA::transform`] of the same data.
    pub fn fit_transform(&mut self, data: &Array2<f64>, config: &PcaConfig) -> Result<Array2<f64>> {
        self.fit(data, config)?;
        self.transform(data)
    }

    /// Maps scores back to feature units: `scores · Pᵀ`, then the inverse of
    /// the column-wise preprocessing step.
    ///
    /// # Errors
    /// `Configuration` for kernel PCA, which has no loadings.
    pub fn reconstruct(&self, scores: &Array2<f64>) -> Result<Array2<f64>> {
        let state = self.state.as_ref().ok_or(PcaError::NotFitted)?;
        let loadings = state.engine.loadings().ok_or_else(|| {
            PcaError::Configuration("kernel PCA has no loadings; reconstruction is undefined".to_string())
        })?;
        if scores.ncols() != loadings.ncols() {
            return Err(PcaError::dimension(loadings.ncols(), scores.ncols(), "reconstruction (components)"));
        }
        let approximation = scores.dot(&loadings.t());
        state.preprocessor.inverse_transform(&approximation, &state.params)
    }

    /// Diagnostics of new samples against the fitted model. Limits and
    /// Mahalanobis distances come from the training scores, so a single
    /// sample can be scored.
    ///
    /// # Errors
    /// `Configuration` for a restored model that carries no training
    /// score reference.
    pub fn diagnostics(&self, data: &Array2<f64>, config: &DiagnosticsConfig) -> Result<DiagnosticsReport> {
        let state = self.state.as_ref().ok_or(PcaError::NotFitted)?;
        let reference = state.reference.as_ref().ok_or_else(|| {
            PcaError::Configuration(
                "model has no training score reference; refit it to diagnose new samples".to_string(),
            )
        })?;
        let x = state.preprocessor.transform(data, &state.params)?;
        let scores = state.engine.transform(&x)?;
        DiagnosticsCalculator::new(config.clone()).compute(DiagnosticsInput {
            scores: &scores,
            eigenvalues: &state.explained_variance,
            all_eigenvalues: &state.all_eigenvalues,
            preprocessed: Some(&x),
            loadings: state.engine.loadings(),
            groups: None,
            reference: Some(reference),
        })
    }

    /// Snapshot of the fitted model.
    pub fn to_model(&self) -> Result<PersistedModel> {
        let state = self.state.as_ref().ok_or(PcaError::NotFitted)?;
        let loadings = state
            .engine
            .loadings()
            .map(|l| l.axis_iter(Axis(1)).map(|c| c.to_vec()).collect())
            .unwrap_or_default();
        let kernel = match &state.engine {
            DecompositionEngine::Kernel(d) => d.resolved_kernel(),
            _ => None,
        };
        let nipals = match state.algorithm {
            Algorithm::Nipals(options) => Some(options),
            _ => None,
        };
        Ok(PersistedModel {
            method: method_of(&state.engine),
            components_requested: state.components_requested,
            components_computed: state.explained_variance.len(),
            feature_names: self.feature_names.clone(),
            preprocessing: *state.preprocessor.mode(),
            parameters: state.params.as_ref().clone(),
            loadings,
            explained_variance: state.explained_variance.to_vec(),
            explained_variance_ratio: state.explained_variance_ratio.to_vec(),
            all_eigenvalues: state.all_eigenvalues.to_vec(),
            nipals,
            kernel,
            score_reference: state.reference.clone(),
        })
    }

    /// Rebuilds a transform-ready model from a snapshot.
    ///
    /// # Errors
    /// `Configuration` for kernel models, plus anything
    /// [`PersistedModel::validate`] reports.
    pub fn from_model(model: PersistedModel) -> Result<Self> {
        model.validate()?;
        let loadings = model.loadings_matrix()?;
        let (engine, algorithm) = match model.method {
            ModelMethod::Kernel => {
                return Err(PcaError::Configuration(
                    "kernel PCA models cannot be restored for transform".to_string(),
                ))
            }
            ModelMethod::Svd => (DecompositionEngine::Svd(SvdDecomposer::from_loadings(loadings)), Algorithm::Svd),
            ModelMethod::Nipals => {
                let options = model.nipals.unwrap_or_default();
                (
                    DecompositionEngine::Nipals(NipalsDecomposer::from_loadings(options, loadings)),
                    Algorithm::Nipals(options),
                )
            }
        };
        let explained_variance = Array1::from(model.explained_variance);
        let explained_variance_ratio = if model.explained_variance_ratio.is_empty() {
            Array1::from_elem(explained_variance.len(), f64::NAN)
        } else {
            Array1::from(model.explained_variance_ratio)
        };
        let all_eigenvalues = if model.all_eigenvalues.is_empty() {
            explained_variance.clone()
        } else {
            Array1::from(model.all_eigenvalues)
        };
        Ok(Self {
            state: Some(FittedState {
                preprocessor: Preprocessor::new(model.preprocessing)?,
                params: Arc::new(model.parameters),
                engine,
                algorithm,
                components_requested: model.components_requested,
                explained_variance,
                explained_variance_ratio,
                all_eigenvalues,
                reference: model.score_reference,
            }),
            feature_names: model.feature_names,
        })
    }

    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_model()?.save(path)
    }

    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_model(PersistedModel::load(path)?)
    }

    /// Preprocessing mode of the fitted model.
    pub fn preprocessing(&self) -> Option<Preprocessing> {
        self.state.as_ref().map(|s| *s.preprocessor.mode())
    }
}

fn method_of(engine: &DecompositionEngine) -> ModelMethod {
    match engine {
        DecompositionEngine::Svd(_) => ModelMethod::Svd,
        DecompositionEngine::Nipals(_) => ModelMethod::Nipals,
        DecompositionEngine::Kernel(_) => ModelMethod::Kernel,
    }
}
