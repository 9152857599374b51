use approx::assert_abs_diff_eq;
use ndarray::{array, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use pca_toolkit::{
    Algorithm, ColumnScaling, DiagnosticsConfig, ErrorKind, KernelType, ModelMethod, PcaConfig, PersistedModel, Preprocessing,
    RowNormalization, PCA,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::error::Error;
use tempfile::tempdir;

fn random_data(n_samples: usize, n_features: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array2::random_using((n_samples, n_features), Uniform::new(0.0, 10.0), &mut rng)
}

#[test]
fn test_saved_model_reproduces_transform() -> Result<(), Box<dyn Error>> {
    let data = random_data(30, 5, 1);
    let names: Vec<String> = (1..=5).map(|i| format!("gene_{}", i)).collect();
    let config = PcaConfig::new(3).with_preprocessing(Preprocessing::new(RowNormalization::Snv, ColumnScaling::Standard));
    let mut pca = PCA::new().with_feature_names(names.clone());
    let result = pca.fit(&data, &config)?;

    let dir = tempdir()?;
    let path = dir.path().join("model.json");
    pca.save_model(&path)?;
    let loaded = PCA::load_model(&path)?;

    assert_eq!(loaded.feature_names(), names.as_slice());
    assert_abs_diff_eq!(loaded.transform(&data)?, result.scores, epsilon = 1e-10);

    let new_samples = random_data(4, 5, 2);
    assert_abs_diff_eq!(loaded.transform(&new_samples)?, pca.transform(&new_samples)?, epsilon = 1e-10);

    let one_sample = random_data(1, 5, 3);
    let before = pca.diagnostics(&one_sample, &DiagnosticsConfig::default())?;
    let after = loaded.diagnostics(&one_sample, &DiagnosticsConfig::default())?;
    assert_eq!(after.limits.t2_99, before.limits.t2_99);
    assert_abs_diff_eq!(after.metrics[0].mahalanobis, before.metrics[0].mahalanobis, epsilon = 1e-10);
    Ok(())
}

#[test]
fn test_nipals_model_keeps_options_and_skips_missing_cells() -> Result<(), Box<dyn Error>> {
    let data = random_data(20, 4, 3);
    let mut pca = PCA::new();
    pca.fit(&data, &PcaConfig::new(2).with_algorithm(Algorithm::nipals()))?;
    let model = pca.to_model()?;
    assert_eq!(model.method, ModelMethod::Nipals);
    assert!(model.nipals.is_some());

    let mut gappy = random_data(3, 4, 4);
    gappy[[1, 2]] = f64::NAN;
    let scores = model.transform(&gappy, None)?;
    assert!(scores.iter().all(|v| v.is_finite()));
    Ok(())
}

#[test]
fn test_transform_rejects_wrong_feature_count() -> Result<(), Box<dyn Error>> {
    let data = random_data(10, 4, 5);
    let mut pca = PCA::new();
    pca.fit(&data, &PcaConfig::new(2))?;
    let model = pca.to_model()?;

    let wide = random_data(3, 5, 6);
    let err = model.transform(&wide, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dimension);
    assert_eq!(pca.transform(&wide).unwrap_err().kind(), ErrorKind::Dimension);
    Ok(())
}

#[test]
fn test_feature_name_mismatch_is_not_an_error() -> Result<(), Box<dyn Error>> {
    let data = random_data(10, 3, 7);
    let mut pca = PCA::new().with_feature_names(vec!["a".into(), "b".into(), "c".into()]);
    let result = pca.fit(&data, &PcaConfig::new(2))?;
    let model = pca.to_model()?;
    let renamed = vec!["a".to_string(), "x".to_string(), "c".to_string()];
    let scores = model.transform(&data, Some(renamed.as_slice()))?;
    assert_abs_diff_eq!(scores, result.scores, epsilon = 1e-10);
    Ok(())
}

#[test]
fn test_kernel_model_refuses_transform() -> Result<(), Box<dyn Error>> {
    let data = random_data(12, 3, 8);
    let mut pca = PCA::new();
    pca.fit(
        &data,
        &PcaConfig::new(2).with_algorithm(Algorithm::Kernel(KernelType::Rbf { gamma: None })),
    )?;
    let model = pca.to_model()?;
    assert_eq!(model.method, ModelMethod::Kernel);
    assert!(model.loadings.is_empty());
    assert_eq!(model.kernel, Some(KernelType::Rbf { gamma: Some(1.0 / 3.0) }));

    assert_eq!(model.transform(&data, None).unwrap_err().kind(), ErrorKind::Configuration);
    assert_eq!(PCA::from_model(model).unwrap_err().kind(), ErrorKind::Configuration);
    Ok(())
}

#[test]
fn test_kernel_fields_absent_for_linear_methods() -> Result<(), Box<dyn Error>> {
    let data = random_data(10, 3, 9);
    let mut pca = PCA::new();
    pca.fit(&data, &PcaConfig::new(2))?;
    let value = serde_json::to_value(pca.to_model()?)?;
    let object = value.as_object().ok_or("model is not a JSON object")?;
    assert!(!object.contains_key("kernel"));
    assert!(!object.contains_key("nipals"));
    assert_eq!(object.get("method").and_then(|m| m.as_str()), Some("svd"));
    Ok(())
}

#[test]
fn test_older_files_without_optional_fields_load() -> Result<(), Box<dyn Error>> {
    let data = random_data(10, 3, 10);
    let mut pca = PCA::new();
    let result = pca.fit(&data, &PcaConfig::new(2))?;
    let mut value = serde_json::to_value(pca.to_model()?)?;
    let object = value.as_object_mut().ok_or("model is not a JSON object")?;
    object.remove("explained_variance_ratio");
    object.remove("all_eigenvalues");
    object.remove("feature_names");
    object.remove("score_reference");
    object.insert("written_by".to_string(), serde_json::Value::from("a newer release"));

    let model: PersistedModel = serde_json::from_value(value)?;
    let restored = PCA::from_model(model)?;
    assert_abs_diff_eq!(restored.transform(&data)?, result.scores, epsilon = 1e-10);
    let err = restored.diagnostics(&data, &DiagnosticsConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    Ok(())
}

#[test]
fn test_load_rejects_inconsistent_model() -> Result<(), Box<dyn Error>> {
    let data = random_data(10, 3, 11);
    let mut pca = PCA::new();
    pca.fit(&data, &PcaConfig::new(2))?;
    let mut model = pca.to_model()?;
    model.explained_variance.pop();

    let dir = tempdir()?;
    let path = dir.path().join("broken.json");
    std::fs::write(&path, serde_json::to_string(&model)?)?;
    assert_eq!(PCA::load_model(&path).unwrap_err().kind(), ErrorKind::Dimension);

    std::fs::write(&path, "{ not json")?;
    assert_eq!(PCA::load_model(&path).unwrap_err().kind(), ErrorKind::Serialization);

    let missing = dir.path().join("absent.json");
    assert_eq!(PCA::load_model(&missing).unwrap_err().kind(), ErrorKind::Io);
    Ok(())
}

#[test]
fn test_robust_scaling_round_trips_through_json() -> Result<(), Box<dyn Error>> {
    let data = array![
        [1.0, 10.0, 100.0],
        [2.0, 12.0, 90.0],
        [3.0, 9.0, 110.0],
        [4.0, 15.0, 95.0],
        [5.0, 11.0, 105.0],
        [6.0, 14.0, 99.0]
    ];
    let config = PcaConfig::new(2).with_preprocessing(Preprocessing::column_only(ColumnScaling::Robust));
    let mut pca = PCA::new();
    let result = pca.fit(&data, &config)?;
    let json = serde_json::to_string(&pca.to_model()?)?;
    let restored = PCA::from_model(serde_json::from_str(&json)?)?;
    let (before, after) = (
        pca.preprocessing_params().ok_or("not fitted")?,
        restored.preprocessing_params().ok_or("not fitted")?,
    );
    for (a, b) in before.feature_mads().iter().zip(after.feature_mads()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
    }
    assert_abs_diff_eq!(restored.transform(&data)?, result.scores, epsilon = 1e-10);
    Ok(())
}
