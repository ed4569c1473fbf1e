//! Experiment Enumerator
//!
//! Expands algorithms × datasets × parameter points × repetitions, in that
//! nesting order (algorithms outermost, repetitions innermost).

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{Algorithm, Experiment, ExperimentDescriptor};
use crate::dataset::DatasetId;
use crate::fingerprint::fingerprint;
use crate::{Error, Result};

/// Build the flat experiment list of a run.
///
/// Repetitions are numbered from 1. Duplicate parameter points of one
/// algorithm are dropped (first occurrence kept) so each result key is
/// unique. An empty dataset list, an empty parameter space or zero
/// repetitions yield an empty list.
///
/// # Errors
/// Returns [`Error::Configuration`] if `algorithms` is empty, two
/// algorithms share a name or a parameter space cannot be sampled.
pub fn enumerate(
    algorithms: &[Arc<Algorithm>],
    datasets: &[DatasetId],
    repetitions: u32,
) -> Result<Vec<Experiment>> {
    if algorithms.is_empty() {
        return Err(Error::Configuration(
            "No algorithms given for evaluation".to_string(),
        ));
    }
    let mut names = HashSet::new();
    if let Some(dup) = algorithms.iter().find(|a| !names.insert(a.name())) {
        return Err(Error::Configuration(format!(
            "algorithm name {} is used more than once",
            dup.name()
        )));
    }

    let mut experiments = Vec::new();
    for algorithm in algorithms {
        let mut seen = HashSet::new();
        let points: Vec<_> = algorithm
            .param_config()
            .points()?
            .into_iter()
            .filter(|point| {
                let fresh = seen.insert(fingerprint(point));
                if !fresh {
                    warn!(algorithm = algorithm.name(), "dropping duplicate parameter point");
                }
                fresh
            })
            .collect();

        for dataset in datasets {
            for params in &points {
                for repetition in 1..=repetitions {
                    let descriptor = ExperimentDescriptor::new(
                        algorithm.name(),
                        dataset.clone(),
                        params.clone(),
                        repetition,
                    );
                    experiments.push(Experiment::new(descriptor, Arc::clone(algorithm)));
                }
            }
        }
    }

    debug!(
        algorithms = algorithms.len(),
        datasets = datasets.len(),
        repetitions,
        experiments = experiments.len(),
        "enumerated experiments"
    );
    Ok(experiments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Adapter;
    use crate::params::{Distribution, ParameterConfig};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn algorithm(name: &str, config: ParameterConfig) -> Arc<Algorithm> {
        Arc::new(Algorithm::new(name, Adapter::function(|_, _| Ok(vec![]))).params(config))
    }

    #[test]
    fn test_no_algorithms_is_configuration_error() {
        let err = enumerate(&[], &[DatasetId::new("c", "d")], 1).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_no_datasets_is_empty() {
        let algs = [algorithm("a", ParameterConfig::defaults())];
        assert!(enumerate(&algs, &[], 3).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_points_dropped() {
        let config = ParameterConfig::grid([("k", vec![json!(1), json!(1), json!(2)])]);
        let algs = [algorithm("a", config)];
        let experiments = enumerate(&algs, &[DatasetId::new("c", "d")], 1).unwrap();
        assert_eq!(experiments.len(), 2);
    }

    #[test]
    fn test_zero_repetitions_is_empty() {
        let algs = [algorithm("a", ParameterConfig::defaults())];
        assert!(enumerate(&algs, &[DatasetId::new("c", "d")], 0).unwrap().is_empty());
    }

    #[test]
    fn test_unsampleable_space_is_configuration_error() {
        let config = ParameterConfig::Search {
            distributions: BTreeMap::from([(
                "alpha".to_string(),
                Distribution::Uniform { low: -1e308, high: 1e308 },
            )]),
            samples: 2,
            seed: 0,
        };
        let algs = [algorithm("a", config)];
        let err = enumerate(&algs, &[DatasetId::new("c", "d")], 1).unwrap_err();
        assert!(err.is_fatal());
    }
}
