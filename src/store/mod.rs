//! Result Store - one result per experiment of a run
//!
//! The store is append-only: every experiment key is registered once (in
//! `WAITING`), may be started once and completed once. Queries return the
//! results in registration order, which is the enumeration order.
//!
//! ## Usage
//!
//! ```rust
//! use std::path::Path;
//! use trueno_eval::dataset::DatasetId;
//! use trueno_eval::experiment::ExperimentDescriptor;
//! use trueno_eval::params::Params;
//! use trueno_eval::store::{ResultStore, Status};
//! use trueno_eval::Error;
//!
//! let descriptor = ExperimentDescriptor::new("iforest", DatasetId::new("NAB", "ec2"), Params::new(), 1);
//! let mut store = ResultStore::new();
//! store.register(&descriptor, Path::new("/results")).unwrap();
//! store.start(&descriptor.key()).unwrap();
//! let status = store
//!     .complete(&descriptor.key(), Err(Error::AdapterExecution("crashed".into())))
//!     .unwrap();
//! assert_eq!(status, Status::Error);
//! assert!(store.is_complete());
//! ```

mod result;
mod table;

pub use result::{ExecutionResult, Status, Times};
pub use table::RESULT_COLUMNS;

use std::collections::HashMap;
use std::path::Path;

use crate::experiment::{ExperimentDescriptor, ExperimentKey, ExperimentOutput};
use crate::{Error, Result};

/// In-memory, append-only result collection keyed by [`ExperimentKey`].
#[derive(Debug, Default)]
pub struct ResultStore {
    results: Vec<ExecutionResult>,
    index: HashMap<ExperimentKey, usize>,
}

impl ResultStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Register a dispatched experiment in `WAITING` status.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateResult`] if the key is already present.
    pub fn register(&mut self, descriptor: &ExperimentDescriptor, results_root: &Path) -> Result<()> {
        let key = descriptor.key();
        if self.index.contains_key(&key) {
            return Err(Error::DuplicateResult(key.to_string()));
        }
        self.index.insert(key, self.results.len());
        self.results
            .push(ExecutionResult::new(descriptor, results_root));
        Ok(())
    }

    /// Move an experiment to `RUNNING`.
    ///
    /// # Errors
    /// Returns an error for unknown keys or results that already started.
    pub fn start(&mut self, key: &ExperimentKey) -> Result<()> {
        self.get_mut(key)?.start()
    }

    /// Record an experiment's outcome.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateResult`] if the key already holds a terminal result.
    pub fn complete(&mut self, key: &ExperimentKey, outcome: Result<ExperimentOutput>) -> Result<Status> {
        self.get_mut(key)?.complete(outcome)
    }

    /// Get a result by key.
    #[must_use]
    pub fn get(&self, key: &ExperimentKey) -> Option<&ExecutionResult> {
        self.index.get(key).map(|&idx| &self.results[idx])
    }

    fn get_mut(&mut self, key: &ExperimentKey) -> Result<&mut ExecutionResult> {
        let idx = *self
            .index
            .get(key)
            .ok_or_else(|| Error::UnknownExperiment(key.to_string()))?;
        Ok(&mut self.results[idx])
    }

    /// All results in registration order.
    #[must_use]
    pub fn results(&self) -> &[ExecutionResult] {
        &self.results
    }

    /// Iterate over all results.
    pub fn iter(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter()
    }

    /// Number of results with the given status.
    #[must_use]
    pub fn count(&self, status: Status) -> usize {
        self.results.iter().filter(|r| r.status() == status).count()
    }

    /// Whether every registered result is terminal.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(|r| r.status().is_terminal())
    }

    /// Force every non-terminal result to `ERROR` with `message`.
    ///
    /// Returns the number of results that were closed.
    pub fn abort_pending(&mut self, message: &str) -> usize {
        let mut closed = 0;
        for result in &mut self.results {
            if !result.status().is_terminal()
                && result
                    .complete(Err(Error::AdapterExecution(message.to_string())))
                    .is_ok()
            {
                closed += 1;
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetId;
    use crate::params::Params;

    fn descriptor(name: &str, rep: u32) -> ExperimentDescriptor {
        ExperimentDescriptor::new("alg", DatasetId::new("c", name), Params::new(), rep)
    }

    #[test]
    fn test_store_default() {
        let store = ResultStore::new();
        assert!(store.is_empty());
        assert!(store.is_complete());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut store = ResultStore::new();
        let d = descriptor("d1", 1);
        store.register(&d, Path::new("/r")).unwrap();
        assert!(matches!(
            store.register(&d, Path::new("/r")),
            Err(Error::DuplicateResult(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_key() {
        let mut store = ResultStore::new();
        let err = store.start(&descriptor("d1", 1).key()).unwrap_err();
        assert!(matches!(err, Error::UnknownExperiment(_)));
    }

    #[test]
    fn test_abort_pending_closes_everything() {
        let mut store = ResultStore::new();
        for rep in 1..=3 {
            store.register(&descriptor("d1", rep), Path::new("/r")).unwrap();
        }
        store.start(&descriptor("d1", 1).key()).unwrap();
        assert!(!store.is_complete());
        assert_eq!(store.abort_pending("aborted"), 3);
        assert!(store.is_complete());
        assert_eq!(store.count(Status::Error), 3);
    }
}
