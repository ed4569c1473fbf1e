//! Local evaluation tests: completeness, fault isolation, timeout
//! classification and artifact layout.

use std::sync::Arc;

use serde_json::json;
use trueno_eval::adapter::{Adapter, SCORES_FILE};
use trueno_eval::dataset::{DatasetCatalog, DatasetId, DatasetPayload, InMemoryCatalog, TimeSeries};
use trueno_eval::experiment::{Algorithm, EXECUTION_FILE};
use trueno_eval::metrics::{Metric, RocAuc};
use trueno_eval::params::ParameterConfig;
use trueno_eval::runner::{EvaluationBuilder, RESULTS_FILE};
use trueno_eval::store::Status;
use trueno_eval::Error;

fn series() -> TimeSeries {
    TimeSeries {
        data: vec![vec![0.1], vec![0.2], vec![9.0], vec![0.1]],
        labels: vec![0.0, 0.0, 1.0, 0.0],
    }
}

fn catalog(names: &[&str]) -> (Arc<dyn DatasetCatalog>, Vec<DatasetId>) {
    let mut catalog = InMemoryCatalog::new();
    let mut ids = Vec::new();
    for name in names {
        let id = DatasetId::new("custom", *name);
        catalog.insert_series(id.clone(), series());
        ids.push(id);
    }
    (Arc::new(catalog), ids)
}

fn magnitude() -> Adapter {
    Adapter::function(|payload, _| match payload {
        DatasetPayload::Series(s) => Ok(s.data.iter().map(|row| row[0].abs()).collect()),
        DatasetPayload::File(path) => anyhow::bail!("unexpected file {}", path.display()),
    })
}

/// Fails on dataset `D2` only.
fn flaky(message: &'static str, timeout: bool) -> Adapter {
    Adapter::function(move |payload, _| match payload {
        DatasetPayload::Series(s) if s.data[0][0] < 0.0 => {
            if timeout {
                Err(Error::AdapterTimeout(message.to_string()).into())
            } else {
                anyhow::bail!(message)
            }
        }
        DatasetPayload::Series(s) => Ok(vec![0.0; s.len()]),
        DatasetPayload::File(_) => Ok(Vec::new()),
    })
}

fn catalog_with_marked_d2() -> (Arc<dyn DatasetCatalog>, Vec<DatasetId>) {
    let mut catalog = InMemoryCatalog::new();
    let mut ids = Vec::new();
    for name in ["D1", "D2", "D3"] {
        let id = DatasetId::new("custom", name);
        let mut s = series();
        if name == "D2" {
            s.data[0][0] = -1.0;
        }
        catalog.insert_series(id.clone(), s);
        ids.push(id);
    }
    (Arc::new(catalog), ids)
}

/// Panics on any series whose first score is at least 1.0.
struct FragileMetric;

impl Metric for FragileMetric {
    fn name(&self) -> &str {
        "FRAGILE"
    }

    fn score(&self, scores: &[f64], _truth: &[f64]) -> trueno_eval::Result<f64> {
        assert!(scores[0] < 1.0, "metric cannot handle {}", scores[0]);
        Ok(0.5)
    }
}

#[tokio::test]
async fn test_two_by_three_all_ok() {
    let dir = tempfile::tempdir().unwrap();
    let (catalog, ids) = catalog(&["D1", "D2", "D3"]);
    let algorithms = vec![
        Algorithm::new("Alg1", magnitude()),
        Algorithm::new("Alg2", magnitude()),
    ];

    let mut evaluation = EvaluationBuilder::new(catalog, ids, algorithms)
        .results_root(dir.path())
        .metric(RocAuc)
        .parallelism(2)
        .build()
        .unwrap();
    let summary = evaluation.run().await.unwrap();

    assert_eq!(summary.total, 6);
    assert_eq!(summary.ok, 6);
    assert!(summary.reconciliation.is_none());
    let store = evaluation.results();
    assert!(store.is_complete());
    for result in store.iter() {
        assert_eq!(result.status(), Status::Ok);
        assert!(result.times().unwrap().main >= 0.0);
        assert!((result.metrics()["ROC_AUC"] - 1.0).abs() < 1e-9);
        assert!(result.artifact_path().join(SCORES_FILE).exists());
        assert!(result.artifact_path().join(EXECUTION_FILE).exists());
    }
}

#[tokio::test]
async fn test_results_follow_enumeration_order() {
    let dir = tempfile::tempdir().unwrap();
    let (catalog, ids) = catalog(&["D1", "D2"]);
    let algorithms = vec![Algorithm::new("Alg1", magnitude())
        .params(ParameterConfig::grid([("w", vec![json!(1), json!(2)])]))];

    let mut evaluation = EvaluationBuilder::new(catalog, ids, algorithms)
        .results_root(dir.path())
        .repetitions(2)
        .parallelism(3)
        .build()
        .unwrap();
    evaluation.run().await.unwrap();

    let order: Vec<(String, u32)> = evaluation
        .results()
        .iter()
        .map(|r| (r.key().dataset().name().to_string(), r.key().repetition()))
        .collect();
    assert_eq!(order.len(), 8);
    assert_eq!(order[0], ("D1".to_string(), 1));
    assert_eq!(order[1], ("D1".to_string(), 2));
    assert_eq!(order[4], ("D2".to_string(), 1));
}

#[tokio::test]
async fn test_single_failure_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let (catalog, ids) = catalog_with_marked_d2();
    let algorithms = vec![
        Algorithm::new("Alg1", flaky("test-exception", false)),
        Algorithm::new("Alg2", magnitude()),
    ];

    let mut evaluation = EvaluationBuilder::new(catalog, ids, algorithms)
        .results_root(dir.path())
        .build()
        .unwrap();
    let summary = evaluation.run().await.unwrap();

    assert_eq!(summary.ok, 5);
    assert_eq!(summary.errors, 1);
    let failed: Vec<_> = evaluation
        .results()
        .iter()
        .filter(|r| r.status() == Status::Error)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].key().algorithm(), "Alg1");
    assert_eq!(failed[0].key().dataset().name(), "D2");
    assert_eq!(failed[0].error_message(), Some("test-exception"));
    assert!(failed[0].times().is_none());
}

#[tokio::test]
async fn test_timeout_is_recorded_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let (catalog, ids) = catalog_with_marked_d2();
    let algorithms = vec![Algorithm::new("Alg1", flaky("test-exception-timeout", true))];

    let mut evaluation = EvaluationBuilder::new(catalog, ids, algorithms)
        .results_root(dir.path())
        .build()
        .unwrap();
    let summary = evaluation.run().await.unwrap();

    assert_eq!(summary.timeouts, 1);
    assert_eq!(summary.errors, 0);
    let timed_out = evaluation
        .results()
        .iter()
        .find(|r| r.status() == Status::Timeout)
        .unwrap();
    assert_eq!(timed_out.error_message(), Some("test-exception-timeout"));
}

#[tokio::test]
async fn test_same_descriptor_same_artifact_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut paths = Vec::new();
    for _ in 0..2 {
        let (catalog, ids) = catalog(&["D1"]);
        let algorithms = vec![Algorithm::new("Alg1", magnitude())
            .params(ParameterConfig::fixed([("window", json!(5)), ("alpha", json!(0.5))]))];
        let mut evaluation = EvaluationBuilder::new(catalog, ids, algorithms)
            .results_root(dir.path())
            .build()
            .unwrap();
        evaluation.run().await.unwrap();
        paths.push(evaluation.results().results()[0].artifact_path().to_path_buf());
    }
    assert_eq!(paths[0], paths[1]);
    assert!(paths[0].starts_with(dir.path().join("Alg1")));
    assert!(paths[0].ends_with("custom/D1/1"));
}

#[tokio::test]
async fn test_results_table_written() {
    let dir = tempfile::tempdir().unwrap();
    let (catalog, ids) = catalog(&["D1"]);
    let mut evaluation = EvaluationBuilder::new(catalog, ids, vec![Algorithm::new("Alg1", magnitude())])
        .results_root(dir.path())
        .build()
        .unwrap();
    let summary = evaluation.run().await.unwrap();

    let file = summary.results_file.unwrap();
    assert_eq!(file, dir.path().join(RESULTS_FILE));
    assert!(file.metadata().unwrap().len() > 0);
    let batch = evaluation.results().to_record_batch().unwrap();
    assert_eq!(batch.num_rows(), 1);
}

#[tokio::test]
async fn test_no_datasets_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let (catalog, _) = catalog(&[]);
    let mut evaluation =
        EvaluationBuilder::new(catalog, Vec::new(), vec![Algorithm::new("Alg1", magnitude())])
            .results_root(dir.path().join("run"))
            .build()
            .unwrap();
    let summary = evaluation.run().await.unwrap();

    assert_eq!(summary.total, 0);
    assert!(summary.results_file.is_none());
    assert!(!dir.path().join("run").exists());
}

#[tokio::test]
async fn test_evaluation_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let (catalog, ids) = catalog(&["D1"]);
    let mut evaluation = EvaluationBuilder::new(catalog, ids, vec![Algorithm::new("Alg1", magnitude())])
        .results_root(dir.path())
        .build()
        .unwrap();
    evaluation.run().await.unwrap();
    assert!(evaluation.run().await.unwrap_err().is_fatal());
}

#[tokio::test]
async fn test_missing_dataset_becomes_error_row() {
    let dir = tempfile::tempdir().unwrap();
    let (catalog, mut ids) = catalog(&["D1"]);
    ids.push(DatasetId::new("custom", "missing"));
    let mut evaluation = EvaluationBuilder::new(catalog, ids, vec![Algorithm::new("Alg1", magnitude())])
        .results_root(dir.path())
        .build()
        .unwrap();
    let summary = evaluation.run().await.unwrap();

    assert_eq!(summary.ok, 1);
    assert_eq!(summary.errors, 1);
}

#[tokio::test]
async fn test_panicking_metric_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let (catalog, ids) = catalog_with_marked_d2();
    let mut evaluation = EvaluationBuilder::new(catalog, ids, vec![Algorithm::new("Alg1", magnitude())])
        .results_root(dir.path())
        .metric(FragileMetric)
        .parallelism(2)
        .build()
        .unwrap();
    let summary = evaluation.run().await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.ok, 2);
    assert_eq!(summary.errors, 1);
    let store = evaluation.results();
    assert!(store.is_complete());
    let failed = store.iter().find(|r| r.status() == Status::Error).unwrap();
    assert_eq!(failed.key().dataset().name(), "D2");
    assert!(failed.error_message().unwrap().contains("panicked"));
}
