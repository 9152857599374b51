// src/lib.rs

//! Principal component analysis over dense in-memory matrices.
//!
//! Three decompositions share one pipeline: exact SVD, NIPALS (which can
//! skip missing cells) and kernel PCA. Around them sit missing-value handling,
//! row- and column-wise preprocessing, sample diagnostics (Hotelling's T²,
//! Q residuals, Mahalanobis distance, confidence limits, outlier flags),
//! eigencorrelation against sample metadata, and a JSON model format that
//! reproduces a fit on new data.
//!
//! ```no_run
//! use pca_toolkit::{analyze, AnalysisInput, DiagnosticsConfig, PcaConfig};
//! use ndarray::array;
//!
//! let data = array![[5.1, 3.5, 1.4], [4.9, 3.0, 1.4], [6.2, 3.4, 5.4], [5.9, 3.0, 5.1]];
//! let config = PcaConfig::new(2).with_diagnostics(DiagnosticsConfig::default());
//! let analysis = analyze(&AnalysisInput::new(data), &config).unwrap();
//! println!("{:?}", analysis.result.explained_variance_ratio);
//! ```

pub mod analysis;
pub mod config;
pub mod correlation;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod kernel;
pub mod linalg_backends;
pub mod missing;
pub mod model;
pub mod nipals;
pub mod pca;
pub mod preprocessing;
pub mod resources;
pub mod svd;

pub use analysis::{analyze, Analysis, AnalysisInput};
pub use config::{
    Algorithm, ColumnScaling, CorrelationMethod, DiagnosticsConfig, EigencorrelationConfig, KernelType,
    MissingStrategy, NipalsOptions, OutlierRule, PcaConfig, Preprocessing, RowNormalization,
};
pub use correlation::{EigencorrelationAnalyzer, EigencorrelationResult, MetadataColumn, MetadataValues};
pub use diagnostics::{
    ConfidenceLimits, DiagnosticsCalculator, DiagnosticsReport, EllipseParams, SampleMetrics, ScoreReference,
};
pub use engine::{Decomposer, Decomposition, DecompositionEngine};
pub use error::{ErrorKind, PcaError, Result};
pub use missing::{MissingInfo, MissingValueResolver};
pub use model::{ModelMethod, PersistedModel};
pub use pca::{PcaResult, PCA};
pub use preprocessing::{PreprocessingParams, Preprocessor};
