//! # Trueno-Eval: Benchmark Execution Engine
//!
//! Trueno-Eval runs the cross-product of
//! {algorithm × dataset × parameter point × repetition} as independent
//! experiments, locally or on a cluster of ssh-reachable workers, and
//! consolidates every outcome into one result store.
//!
//! ## Design Principles
//!
//! - **Exactly one result per experiment**: every enumerated experiment ends
//!   `OK`, `ERROR` or `TIMEOUT`, also when the run aborts
//! - **Failure containment**: an experiment's failure is recorded, never propagated
//! - **Deterministic addressing**: artifacts live under
//!   `<algorithm>/<fingerprint>/<collection>/<dataset>/<repetition>`
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trueno_eval::adapter::{Adapter, DockerAdapter};
//! use trueno_eval::dataset::{DatasetId, InMemoryCatalog};
//! use trueno_eval::experiment::Algorithm;
//! use trueno_eval::metrics::RocAuc;
//! use trueno_eval::runner::EvaluationBuilder;
//!
//! # async fn demo() -> trueno_eval::Result<()> {
//! let mut catalog = InMemoryCatalog::new();
//! let id = DatasetId::new("NAB", "ec2_cpu");
//! catalog.insert_path(id.clone(), "/data/nab/ec2_cpu.csv");
//!
//! let iforest = Algorithm::new("iforest", Adapter::from(DockerAdapter::new("algorithms/iforest:0.3")))
//!     .data_as_file(true);
//! let mut evaluation = EvaluationBuilder::new(Arc::new(catalog), vec![id], vec![iforest])
//!     .repetitions(3)
//!     .metric(RocAuc)
//!     .build()?;
//! let summary = evaluation.run().await?;
//! println!("{} ok, {} failed", summary.ok, summary.errors + summary.timeouts);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod adapter;
pub mod config;
pub mod dataset;
pub mod error;
pub mod experiment;
pub mod fingerprint;
pub mod host;
pub mod logging;
pub mod metrics;
pub mod params;
pub mod runner;
pub mod store;

pub use error::{Error, Result};
