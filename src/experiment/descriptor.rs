//! Experiment Descriptor - one immutable unit of work

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::DatasetId;
use crate::fingerprint::fingerprint;
use crate::params::Params;

/// Result key: `(algorithm, dataset, params fingerprint, repetition)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExperimentKey {
    algorithm: String,
    dataset: DatasetId,
    fingerprint: String,
    repetition: u32,
}

impl ExperimentKey {
    /// Get the algorithm name.
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Get the dataset identifier.
    #[must_use]
    pub const fn dataset(&self) -> &DatasetId {
        &self.dataset
    }

    /// Get the parameter fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Get the repetition number.
    #[must_use]
    pub const fn repetition(&self) -> u32 {
        self.repetition
    }

    /// `<root>/<algorithm>/<fingerprint>/<collection>/<dataset>/<repetition>`
    #[must_use]
    pub fn artifact_path(&self, results_root: &Path) -> PathBuf {
        results_root
            .join(&self.algorithm)
            .join(&self.fingerprint)
            .join(self.dataset.collection())
            .join(self.dataset.name())
            .join(self.repetition.to_string())
    }
}

impl fmt::Display for ExperimentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.fingerprint.get(..12).unwrap_or(&self.fingerprint);
        write!(
            f,
            "{}[{}] on {} #{}",
            self.algorithm, short, self.dataset, self.repetition
        )
    }
}

/// Experiment Descriptor: algorithm, dataset, parameter point and repetition.
///
/// Created once by the enumerator and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentDescriptor {
    algorithm_id: String,
    dataset_id: DatasetId,
    params: Params,
    repetition: u32,
    fingerprint: String,
}

impl ExperimentDescriptor {
    /// Create a descriptor; the fingerprint is derived from `params`.
    #[must_use]
    pub fn new(
        algorithm_id: impl Into<String>,
        dataset_id: DatasetId,
        params: Params,
        repetition: u32,
    ) -> Self {
        let fingerprint = fingerprint(&params);
        Self {
            algorithm_id: algorithm_id.into(),
            dataset_id,
            params,
            repetition,
            fingerprint,
        }
    }

    /// Get the algorithm name.
    #[must_use]
    pub fn algorithm_id(&self) -> &str {
        &self.algorithm_id
    }

    /// Get the dataset identifier.
    #[must_use]
    pub const fn dataset_id(&self) -> &DatasetId {
        &self.dataset_id
    }

    /// Get the parameter point.
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Get the repetition number.
    #[must_use]
    pub const fn repetition(&self) -> u32 {
        self.repetition
    }

    /// Get the parameter fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Result key of this descriptor.
    #[must_use]
    pub fn key(&self) -> ExperimentKey {
        ExperimentKey {
            algorithm: self.algorithm_id.clone(),
            dataset: self.dataset_id.clone(),
            fingerprint: self.fingerprint.clone(),
            repetition: self.repetition,
        }
    }

    /// Artifact directory below `results_root`.
    #[must_use]
    pub fn artifact_path(&self, results_root: &Path) -> PathBuf {
        self.key().artifact_path(results_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_artifact_layout() {
        let descriptor = ExperimentDescriptor::new(
            "docker",
            DatasetId::new("custom", "dataset.1"),
            Params::new(),
            1,
        );
        let path = descriptor.artifact_path(Path::new("/results/run"));
        let expected = Path::new("/results/run")
            .join("docker")
            .join(fingerprint(&Params::new()))
            .join("custom")
            .join("dataset.1")
            .join("1");
        assert_eq!(path, expected);
    }

    #[test]
    fn test_same_inputs_same_key() {
        let mut params = Params::new();
        params.insert("k".into(), json!(3));
        let a = ExperimentDescriptor::new("alg", DatasetId::new("c", "d"), params.clone(), 2);
        let b = ExperimentDescriptor::new("alg", DatasetId::new("c", "d"), params, 2);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.artifact_path(Path::new("/r")), b.artifact_path(Path::new("/r")));
    }

    #[test]
    fn test_key_display_is_short() {
        let d = ExperimentDescriptor::new("alg", DatasetId::new("c", "d"), Params::new(), 1);
        let shown = d.key().to_string();
        assert!(shown.starts_with("alg["));
        assert!(shown.ends_with("on c/d #1"));
    }
}
