pub mod metrics;

use crate::domain::{EnrichedRecord, EvaluationMetrics, FEATURE_COLUMNS};
use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::path::PathBuf;

pub const N_TREES: usize = 100;
pub const SEED: u64 = 42;
pub const TEST_FRACTION: f64 = 0.2;
const ARTIFACT_VERSION: u32 = 1;

type Regressor = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Persisted regressor plus what is needed to check it still fits the current feature layout.
#[derive(Serialize, Deserialize)]
struct TrainedModel {
    version: u32,
    feature_names: Vec<String>,
    trained_at: DateTime<Utc>,
    train_size: usize,
    test_size: usize,
    regressor: Regressor,
}

impl TrainedModel {
    fn predict(&self, rows: &[[f64; 5]]) -> Result<Vec<f64>, PipelineError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let x = to_matrix(rows)?;
        self.regressor
            .predict(&x)
            .map_err(|e| PipelineError::Artifact {
                detail: format!("prediction failed: {e}"),
            })
    }

    fn check_compatible(&self) -> Result<(), PipelineError> {
        if self.version != ARTIFACT_VERSION {
            return Err(PipelineError::ModelUnavailable {
                detail: format!(
                    "artifact version {} is not supported (expected {ARTIFACT_VERSION})",
                    self.version
                ),
            });
        }
        if self.feature_names != FEATURE_COLUMNS {
            return Err(PipelineError::ModelUnavailable {
                detail: format!(
                    "artifact trained on features {:?}, expected {:?}",
                    self.feature_names, FEATURE_COLUMNS
                ),
            });
        }
        Ok(())
    }
}

enum ModelState {
    Unloaded,
    Loaded(Box<TrainedModel>),
}

/// Owns the model lifecycle: train, persist, lazy load, predict.
pub struct ModelManager {
    artifact_path: PathBuf,
    state: ModelState,
    span: tracing::Span,
}

impl ModelManager {
    pub fn new(artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            state: ModelState::Unloaded,
            span: tracing::info_span!("model_manager"),
        }
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ModelState::Loaded(_))
    }

    /// Fits a fresh model, evaluates it on the held-out split and replaces the persisted artifact.
    pub fn train(&mut self, records: &[EnrichedRecord]) -> Result<EvaluationMetrics, PipelineError> {
        let span = self.span.clone();
        let _guard = span.enter();
        tracing::info!(op = "train", records = records.len(), "training started");

        match self.fit_and_persist(records) {
            Ok(metrics) => {
                tracing::info!(
                    op = "train",
                    rmse = metrics.rmse,
                    mae = metrics.mae,
                    train_size = metrics.train_size,
                    test_size = metrics.test_size,
                    path = %self.artifact_path.display(),
                    "model trained and saved"
                );
                Ok(metrics)
            }
            Err(err) => {
                tracing::error!(op = "train", error = %err, "training failed");
                Err(err)
            }
        }
    }

    fn fit_and_persist(&mut self, records: &[EnrichedRecord]) -> Result<EvaluationMetrics, PipelineError> {
        let (x, y) = feature_matrix(records)?;
        let split = split_indices(x.len(), TEST_FRACTION, SEED)?;

        let pick_x = |idx: &[usize]| idx.iter().map(|&i| x[i]).collect::<Vec<_>>();
        let pick_y = |idx: &[usize]| idx.iter().map(|&i| y[i]).collect::<Vec<_>>();
        let (x_train, y_train) = (pick_x(&split.train), pick_y(&split.train));
        let (x_test, y_test) = (pick_x(&split.test), pick_y(&split.test));

        let params = RandomForestRegressorParameters::default()
            .with_n_trees(N_TREES)
            .with_seed(SEED);
        let regressor = RandomForestRegressor::fit(&to_matrix(&x_train)?, &y_train, params)
            .map_err(|e| PipelineError::TrainingInput {
                detail: format!("random forest fit failed: {e}"),
            })?;

        let model = TrainedModel {
            version: ARTIFACT_VERSION,
            feature_names: FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect(),
            trained_at: Utc::now(),
            train_size: x_train.len(),
            test_size: x_test.len(),
            regressor,
        };

        let predicted = model.predict(&x_test)?;
        let metrics = EvaluationMetrics {
            rmse: metrics::rmse(&y_test, &predicted),
            mae: metrics::mae(&y_test, &predicted),
            train_size: x_train.len(),
            test_size: x_test.len(),
        };

        self.persist(&model)?;
        self.state = ModelState::Loaded(Box::new(model));
        Ok(metrics)
    }

    // Write-then-rename so a reader never sees a half-written artifact.
    fn persist(&self, model: &TrainedModel) -> Result<(), PipelineError> {
        let artifact_err = |detail: String| PipelineError::Artifact { detail };

        if let Some(parent) = self.artifact_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| artifact_err(format!("create {}: {e}", parent.display())))?;
        }

        let bytes = serde_json::to_vec(model)
            .map_err(|e| artifact_err(format!("serialize model: {e}")))?;
        let tmp = self.artifact_path.with_extension("tmp");
        std::fs::write(&tmp, bytes)
            .map_err(|e| artifact_err(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.artifact_path).map_err(|e| {
            artifact_err(format!("replace {}: {e}", self.artifact_path.display()))
        })?;
        Ok(())
    }

    /// Loads the persisted artifact into memory, replacing whatever was held.
    pub fn load(&mut self) -> Result<(), PipelineError> {
        let bytes = match std::fs::read(&self.artifact_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::ModelUnavailable {
                    detail: format!(
                        "no trained model in memory and no artifact at {}",
                        self.artifact_path.display()
                    ),
                });
            }
            Err(e) => {
                return Err(PipelineError::Artifact {
                    detail: format!("read {}: {e}", self.artifact_path.display()),
                });
            }
        };

        let model: TrainedModel =
            serde_json::from_slice(&bytes).map_err(|e| PipelineError::Artifact {
                detail: format!("decode {}: {e}", self.artifact_path.display()),
            })?;
        model.check_compatible()?;

        tracing::info!(
            parent: &self.span,
            op = "load",
            path = %self.artifact_path.display(),
            trained_at = %model.trained_at,
            "model loaded"
        );
        self.state = ModelState::Loaded(Box::new(model));
        Ok(())
    }

    /// One predicted close per record, in input order. Failures are logged and yield an empty vec.
    pub fn predict(&mut self, records: &[EnrichedRecord]) -> Vec<f64> {
        match self.try_predict(records) {
            Ok(predictions) => predictions,
            Err(err) => {
                tracing::error!(parent: &self.span, op = "predict", error = %err, "prediction failed");
                Vec::new()
            }
        }
    }

    pub fn try_predict(&mut self, records: &[EnrichedRecord]) -> Result<Vec<f64>, PipelineError> {
        if let ModelState::Unloaded = self.state {
            self.load()?;
        }
        let ModelState::Loaded(model) = &self.state else {
            return Err(PipelineError::ModelUnavailable {
                detail: "model state is unloaded after load".to_string(),
            });
        };

        let rows = records
            .iter()
            .map(require_features)
            .collect::<Result<Vec<_>, _>>()?;
        let predictions = model.predict(&rows)?;

        tracing::info!(
            parent: &self.span,
            op = "predict",
            records = records.len(),
            "predictions produced"
        );
        Ok(predictions)
    }
}

fn require_features(record: &EnrichedRecord) -> Result<[f64; 5], PipelineError> {
    record.features().ok_or_else(|| {
        let values = [
            record.daily_log_return,
            record.moving_avg_7,
            record.moving_avg_30,
            record.volatility_7,
            record.volatility_30,
        ];
        let missing: Vec<&str> = FEATURE_COLUMNS
            .iter()
            .zip(values)
            .filter(|(_, v)| v.is_none())
            .map(|(name, _)| *name)
            .collect();
        PipelineError::TrainingInput {
            detail: format!("record {} lacks features {missing:?}", record.date),
        }
    })
}

fn feature_matrix(records: &[EnrichedRecord]) -> Result<(Vec<[f64; 5]>, Vec<f64>), PipelineError> {
    if records.is_empty() {
        return Err(PipelineError::TrainingInput {
            detail: "no records to train on".to_string(),
        });
    }
    let x = records
        .iter()
        .map(require_features)
        .collect::<Result<Vec<_>, _>>()?;
    let y = records.iter().map(|r| r.close).collect();
    Ok((x, y))
}

fn to_matrix(rows: &[[f64; 5]]) -> Result<DenseMatrix<f64>, PipelineError> {
    let rows: Vec<Vec<f64>> = rows.iter().map(|r| r.to_vec()).collect();
    DenseMatrix::from_2d_vec(&rows).map_err(|e| PipelineError::TrainingInput {
        detail: format!("feature matrix: {e}"),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Seeded shuffle, then the first `ceil(n * test_fraction)` indices form the test partition.
pub fn split_indices(n: usize, test_fraction: f64, seed: u64) -> Result<Split, PipelineError> {
    let n_test = (n as f64 * test_fraction).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(PipelineError::TrainingInput {
            detail: format!("{n} records cannot be split into non-empty train and test partitions"),
        });
    }

    let mut idx: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    idx.shuffle(&mut rng);
    let train = idx.split_off(n_test);
    Ok(Split { train, test: idx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::testing::raw_table;
    use crate::enrich::Enricher;
    use crate::ingest::macro_series::StaticMacroSource;
    use std::io;
    use std::sync::{Arc, Mutex};

    fn model_ready(n_rows: usize) -> Vec<EnrichedRecord> {
        let enricher = Enricher::new(Arc::new(StaticMacroSource::default()));
        let obs = enricher.clean(&raw_table(n_rows)).unwrap();
        enricher
            .build_features(&obs)
            .into_iter()
            .filter(EnrichedRecord::is_model_ready)
            .collect()
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn split_is_reproducible_and_disjoint() {
        let a = split_indices(31, TEST_FRACTION, SEED).unwrap();
        let b = split_indices(31, TEST_FRACTION, SEED).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.test.len(), 7);
        assert_eq!(a.train.len(), 24);

        let mut all: Vec<_> = a.train.iter().chain(&a.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..31).collect::<Vec<_>>());
    }

    #[test]
    fn split_rejects_tiny_inputs() {
        assert!(split_indices(0, TEST_FRACTION, SEED).is_err());
        assert!(split_indices(1, TEST_FRACTION, SEED).is_err());
        assert!(split_indices(2, TEST_FRACTION, SEED).is_ok());
    }

    #[test]
    fn training_is_deterministic() {
        let records = model_ready(70);
        let dir = tempfile::tempdir().unwrap();

        let first = ModelManager::new(dir.path().join("a/model.json"))
            .train(&records)
            .unwrap();
        let second = ModelManager::new(dir.path().join("b/model.json"))
            .train(&records)
            .unwrap();

        assert_eq!(first.rmse.to_bits(), second.rmse.to_bits());
        assert_eq!(first.mae.to_bits(), second.mae.to_bits());
        assert_eq!(first.test_size, 9);
        assert!(first.rmse >= first.mae);
    }

    #[test]
    fn trained_model_is_persisted_and_reloaded() {
        let records = model_ready(60);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models/model.json");

        let mut trainer = ModelManager::new(&path);
        trainer.train(&records).unwrap();
        assert!(trainer.is_loaded());
        assert!(path.exists());
        let in_memory = trainer.predict(&records);

        let mut fresh = ModelManager::new(&path);
        assert!(!fresh.is_loaded());
        let reloaded = fresh.predict(&records);
        assert!(fresh.is_loaded());
        assert_eq!(reloaded.len(), records.len());
        assert_eq!(reloaded, in_memory);
    }

    #[test]
    fn retraining_overwrites_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut manager = ModelManager::new(&path);

        manager.train(&model_ready(45)).unwrap();
        let first = std::fs::read(&path).unwrap();
        manager.train(&model_ready(80)).unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_ne!(first, second);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn predict_without_model_is_empty_and_logged() {
        let dir = tempfile::tempdir().unwrap();
        let records = model_ready(40);
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .finish();

        let predictions = tracing::subscriber::with_default(subscriber, || {
            let mut manager = ModelManager::new(dir.path().join("missing.json"));
            let out = manager.predict(&records);
            assert!(!manager.is_loaded());
            out
        });

        assert!(predictions.is_empty());
        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("ERROR"), "{logs}");
        assert!(logs.contains("model unavailable"), "{logs}");
        assert!(!dir.path().join("missing.json").exists());
    }

    #[test]
    fn predict_rejects_records_missing_features() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ModelManager::new(dir.path().join("model.json"));
        let mut records = model_ready(50);
        manager.train(&records).unwrap();

        records[3].volatility_7 = None;
        let err = manager.try_predict(&records).unwrap_err();
        assert!(matches!(err, PipelineError::TrainingInput { .. }));
        assert!(err.to_string().contains("volatility_7"));
        assert!(manager.predict(&records).is_empty());
    }

    #[test]
    fn train_rejects_empty_and_incomplete_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut manager = ModelManager::new(&path);

        assert!(matches!(
            manager.train(&[]),
            Err(PipelineError::TrainingInput { .. })
        ));

        let mut records = model_ready(40);
        records[0].moving_avg_30 = None;
        assert!(matches!(
            manager.train(&records),
            Err(PipelineError::TrainingInput { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn incompatible_artifact_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut manager = ModelManager::new(&path);
        manager.train(&model_ready(45)).unwrap();

        let mut doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        doc["feature_names"] = serde_json::json!(["close"]);
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let err = ModelManager::new(&path).load().unwrap_err();
        assert!(matches!(err, PipelineError::ModelUnavailable { .. }));
    }

    #[test]
    fn corrupt_artifact_is_an_artifact_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = ModelManager::new(&path).load().unwrap_err();
        assert_eq!(err.kind(), "artifact");
    }
}
