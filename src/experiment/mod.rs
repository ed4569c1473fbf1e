//! Experiments: declaration, enumeration and execution
//!
//! An [`Algorithm`] declares how to run one detector. The [`enumerate`]
//! function expands algorithms, datasets, parameter points and repetitions
//! into a flat list of [`Experiment`]s, each carrying an immutable
//! [`ExperimentDescriptor`].
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use trueno_eval::adapter::Adapter;
//! use trueno_eval::dataset::DatasetId;
//! use trueno_eval::experiment::{enumerate, Algorithm};
//! use trueno_eval::params::ParameterConfig;
//!
//! let algorithm = Algorithm::new("constant", Adapter::function(|_, _| Ok(vec![0.0])))
//!     .params(ParameterConfig::grid([("window", vec![json!(10), json!(20)])]));
//! let datasets = [DatasetId::new("NAB", "ec2"), DatasetId::new("NAB", "art")];
//!
//! let experiments = enumerate(&[Arc::new(algorithm)], &datasets, 3).unwrap();
//! assert_eq!(experiments.len(), 2 * 2 * 3);
//! ```

mod algorithm;
mod descriptor;
mod enumerator;
mod execute;

pub use algorithm::{Algorithm, PostprocessFn, PreprocessFn};
pub use descriptor::{ExperimentDescriptor, ExperimentKey};
pub use enumerator::enumerate;
pub use execute::{ExecutionContext, ExperimentOutput, EXECUTION_FILE};

use std::sync::Arc;

/// One unit of work: a descriptor plus the algorithm that executes it.
#[derive(Debug, Clone)]
pub struct Experiment {
    descriptor: Arc<ExperimentDescriptor>,
    algorithm: Arc<Algorithm>,
}

impl Experiment {
    /// Pair a descriptor with its algorithm.
    #[must_use]
    pub fn new(descriptor: ExperimentDescriptor, algorithm: Arc<Algorithm>) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            algorithm,
        }
    }

    /// Get the descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &ExperimentDescriptor {
        &self.descriptor
    }

    /// Get the algorithm.
    #[must_use]
    pub fn algorithm(&self) -> &Algorithm {
        &self.algorithm
    }

    /// Result key of this experiment.
    #[must_use]
    pub fn key(&self) -> ExperimentKey {
        self.descriptor.key()
    }
}
