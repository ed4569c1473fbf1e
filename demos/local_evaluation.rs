//! Local Evaluation Example
//!
//! Evaluates two in-process detectors on synthetic series with a small
//! parameter grid, then prints the results table.
//!
//! Run with: cargo run --example local_evaluation

use std::sync::Arc;

use serde_json::json;
use trueno_eval::adapter::Adapter;
use trueno_eval::dataset::{DatasetId, DatasetPayload, InMemoryCatalog, TimeSeries};
use trueno_eval::experiment::Algorithm;
use trueno_eval::logging::init_tracing;
use trueno_eval::metrics::RocAuc;
use trueno_eval::params::{ParameterConfig, Params};
use trueno_eval::runner::EvaluationBuilder;

/// Sine wave with a spike every `period` steps.
#[allow(clippy::cast_precision_loss)]
fn spiky_sine(len: usize, period: usize) -> TimeSeries {
    let mut data = Vec::with_capacity(len);
    let mut labels = Vec::with_capacity(len);
    for i in 0..len {
        let anomaly = i > 0 && i % period == 0;
        let base = (i as f64 / 8.0).sin();
        data.push(vec![if anomaly { base + 4.0 } else { base }]);
        labels.push(if anomaly { 1.0 } else { 0.0 });
    }
    TimeSeries { data, labels }
}

/// Distance to the moving average over `window` previous points.
fn moving_average(payload: &DatasetPayload, params: &Params) -> anyhow::Result<Vec<f64>> {
    let DatasetPayload::Series(series) = payload else {
        anyhow::bail!("moving average needs loaded data");
    };
    let window = params
        .get("window")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(5)
        .max(1) as usize;
    let values: Vec<f64> = series.data.iter().map(|row| row[0]).collect();
    Ok(values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let start = i.saturating_sub(window);
            let history = &values[start..i];
            if history.is_empty() {
                return 0.0;
            }
            #[allow(clippy::cast_precision_loss)]
            let mean = history.iter().sum::<f64>() / history.len() as f64;
            (v - mean).abs()
        })
        .collect())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    println!("=== Trueno-Eval Local Evaluation ===\n");

    let mut catalog = InMemoryCatalog::new();
    let datasets = vec![
        DatasetId::new("synthetic", "sine-20"),
        DatasetId::new("synthetic", "sine-35"),
    ];
    catalog.insert_series(datasets[0].clone(), spiky_sine(200, 20));
    catalog.insert_series(datasets[1].clone(), spiky_sine(200, 35));

    let algorithms = vec![
        Algorithm::new("moving_average", Adapter::function(moving_average)).params(
            ParameterConfig::grid([("window", vec![json!(3), json!(10)])]),
        ),
        Algorithm::new(
            "magnitude",
            Adapter::function(|payload, _| match payload {
                DatasetPayload::Series(s) => Ok(s.data.iter().map(|row| row[0].abs()).collect()),
                DatasetPayload::File(_) => anyhow::bail!("magnitude needs loaded data"),
            }),
        ),
    ];

    let results_dir = std::env::temp_dir().join("trueno-eval-demo");
    let mut evaluation = EvaluationBuilder::new(Arc::new(catalog), datasets, algorithms)
        .results_path(&results_dir)
        .repetitions(2)
        .parallelism(4)
        .metric(RocAuc)
        .build()?;

    println!("Experiments: {}", evaluation.experiments().len());
    println!("Results root: {}\n", evaluation.results_root().display());

    let summary = evaluation.run().await?;

    for result in evaluation.results().iter() {
        let auc = result.metrics().get("ROC_AUC").copied().unwrap_or(f64::NAN);
        println!(
            "{:<16} {:<18} rep {} {:<7} ROC_AUC {:.3}",
            result.key().algorithm(),
            result.key().dataset().to_string(),
            result.key().repetition(),
            result.status().as_str(),
            auc
        );
    }

    println!(
        "\n{} ok, {} errors, {} timeouts",
        summary.ok, summary.errors, summary.timeouts
    );
    if let Some(file) = summary.results_file {
        println!("Results table: {}", file.display());
    }
    Ok(())
}
