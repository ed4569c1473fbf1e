//! Production ssh cluster on hosts that all resolve to this machine.
//!
//! Local aliases never open an ssh connection, so these tests run the real
//! provisioning, slot dispatch, reconciliation and teardown without a
//! reachable ssh server.

use std::sync::Arc;

use trueno_eval::adapter::Adapter;
use trueno_eval::config::{RemoteConfiguration, ResourceConstraints};
use trueno_eval::dataset::{DatasetCatalog, DatasetId, DatasetPayload, InMemoryCatalog, TimeSeries};
use trueno_eval::experiment::{enumerate, Algorithm, ExecutionContext};
use trueno_eval::host::SystemResolver;
use trueno_eval::runner::{Cluster, ClusterProvider, EvaluationBuilder, SshClusterProvider};
use trueno_eval::store::Status;

fn catalog(n: usize) -> (Arc<dyn DatasetCatalog>, Vec<DatasetId>) {
    let mut catalog = InMemoryCatalog::new();
    let mut ids = Vec::new();
    for i in 0..n {
        let id = DatasetId::new("local", format!("d{i}"));
        catalog.insert_series(
            id.clone(),
            TimeSeries {
                data: vec![vec![0.1], vec![7.0], vec![0.2]],
                labels: vec![0.0, 1.0, 0.0],
            },
        );
        ids.push(id);
    }
    (Arc::new(catalog), ids)
}

fn magnitude() -> Algorithm {
    Algorithm::new(
        "magnitude",
        Adapter::function(|payload, _| match payload {
            DatasetPayload::Series(s) => Ok(s.data.iter().map(|row| row[0].abs()).collect()),
            DatasetPayload::File(_) => anyhow::bail!("needs loaded data"),
        }),
    )
}

#[tokio::test]
async fn test_evaluation_on_local_alias_workers() {
    let dir = tempfile::tempdir().unwrap();
    let (catalog, ids) = catalog(3);
    let remote = RemoteConfiguration::new("localhost", ["localhost", "127.0.0.1"]);

    let mut evaluation = EvaluationBuilder::new(catalog, ids, vec![magnitude()])
        .results_root(dir.path())
        .distributed(remote)
        .build()
        .unwrap();
    let summary = evaluation.run().await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.ok, 3);
    assert!(evaluation.results().iter().all(|r| r.status() == Status::Ok));
    let report = summary.reconciliation.unwrap();
    assert!(report.synced.is_empty());
    assert!(report.failures.is_empty());
    assert_eq!(report.skipped, ["localhost", "127.0.0.1"]);
}

#[tokio::test]
async fn test_cluster_lifecycle_releases_control_dir() {
    let dir = tempfile::tempdir().unwrap();
    let (catalog, ids) = catalog(4);
    let constraints = ResourceConstraints {
        tasks_per_host: 2,
        ..ResourceConstraints::default()
    };
    let provider = SshClusterProvider::new(Arc::new(SystemResolver), constraints);
    let mut cluster = provider
        .provision(&RemoteConfiguration::new("localhost", ["localhost", "127.0.0.1", "localhost"]))
        .await
        .unwrap();
    assert_eq!(cluster.workers(), ["localhost", "127.0.0.1"]);
    let control_dir = cluster.control_dir().unwrap().to_path_buf();
    assert!(control_dir.exists());

    let root = dir.path().join("run");
    cluster.prepare(&root).await.unwrap();
    assert!(root.is_dir());

    let experiments = enumerate(&[Arc::new(magnitude())], &ids, 1).unwrap();
    let ctx = ExecutionContext::new(catalog, &root);
    let handles: Vec<_> = experiments
        .iter()
        .map(|e| cluster.submit(e.clone(), ctx.clone()))
        .collect();
    for handle in handles {
        let output = handle.await.unwrap();
        assert!(output.times.main >= 0.0);
    }

    cluster.shutdown().await.unwrap();
    assert!(cluster.control_dir().is_none());
    assert!(!control_dir.exists());
    // shutting down twice is harmless
    cluster.shutdown().await.unwrap();
}
