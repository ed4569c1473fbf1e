//! Parameter spaces
//!
//! A [`ParameterConfig`] expands into concrete parameter points. Points are
//! `BTreeMap`s, so key order never depends on construction order.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{Error, Result};

/// One concrete parameter point: name → value.
pub type Params = BTreeMap<String, Value>;

/// Sampling distribution for a searched parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Distribution {
    /// Continuous uniform in `[low, high)`.
    Uniform {
        /// Lower bound (inclusive)
        low: f64,
        /// Upper bound (exclusive)
        high: f64,
    },
    /// Integer uniform in `[low, high]`.
    IntUniform {
        /// Lower bound (inclusive)
        low: i64,
        /// Upper bound (inclusive)
        high: i64,
    },
    /// Pick one of the listed values.
    Choice {
        /// Candidate values
        values: Vec<Value>,
    },
}

impl Distribution {
    /// Reject bounds that cannot be sampled.
    fn validate(&self, name: &str) -> Result<()> {
        let problem = match self {
            Self::Uniform { low, high }
                if !(low.is_finite() && high.is_finite() && (high - low).is_finite()) =>
            {
                format!("uniform bounds [{low}, {high}) are not a finite range")
            }
            Self::IntUniform { low, high } if high < low => {
                format!("int_uniform bounds [{low}, {high}] are empty")
            }
            Self::Choice { values } if values.is_empty() => "choice has no values".to_string(),
            _ => return Ok(()),
        };
        Err(Error::Configuration(format!("parameter {name}: {problem}")))
    }

    fn sample(&self, rng: &mut StdRng) -> Value {
        match self {
            Self::Uniform { low, high } => {
                if high <= low {
                    return json!(low);
                }
                json!(rng.gen_range(*low..*high))
            }
            Self::IntUniform { low, high } => json!(rng.gen_range(*low..=*high)),
            Self::Choice { values } => values.choose(rng).cloned().unwrap_or(Value::Null),
        }
    }
}

/// Parameter space of one algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterConfig {
    /// A single fixed point.
    Fixed {
        /// The point
        #[serde(default)]
        params: Params,
    },
    /// Cartesian product over every listed value.
    Grid {
        /// Values per parameter
        grid: BTreeMap<String, Vec<Value>>,
    },
    /// `samples` points drawn deterministically from `seed`.
    Search {
        /// Distribution per parameter
        distributions: BTreeMap<String, Distribution>,
        /// Number of points to draw
        samples: usize,
        /// RNG seed
        #[serde(default)]
        seed: u64,
    },
}

impl Default for ParameterConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

impl ParameterConfig {
    /// Empty fixed point: the algorithm runs with its own defaults.
    #[must_use]
    pub fn defaults() -> Self {
        Self::Fixed {
            params: Params::new(),
        }
    }

    /// Fixed point from name/value pairs.
    pub fn fixed<K, I>(params: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Fixed {
            params: params.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Grid from name/values pairs.
    pub fn grid<K, I>(grid: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Vec<Value>)>,
    {
        Self::Grid {
            grid: grid.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Expand the space into its parameter points, in a stable order.
    ///
    /// A grid with an empty value list yields no points; an empty grid
    /// yields one empty point.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if a search distribution cannot be
    /// sampled: non-finite or overflowing uniform bounds, inverted integer
    /// bounds or an empty choice.
    pub fn points(&self) -> Result<Vec<Params>> {
        let points: Vec<Params> = match self {
            Self::Fixed { params } => vec![params.clone()],
            Self::Grid { grid } => {
                let axes: Vec<(&String, &Vec<Value>)> = grid.iter().collect();
                let mut outputs = Vec::new();
                expand_grid(&axes, 0, Params::new(), &mut outputs);
                outputs
            }
            Self::Search {
                distributions,
                samples,
                seed,
            } => {
                for (name, dist) in distributions {
                    dist.validate(name)?;
                }
                let mut rng = StdRng::seed_from_u64(*seed);
                (0..*samples)
                    .map(|_| {
                        distributions
                            .iter()
                            .map(|(name, dist)| (name.clone(), dist.sample(&mut rng)))
                            .collect::<Params>()
                    })
                    .collect()
            }
        };
        Ok(points)
    }
}

fn expand_grid(
    axes: &[(&String, &Vec<Value>)],
    idx: usize,
    current: Params,
    outputs: &mut Vec<Params>,
) {
    if idx == axes.len() {
        outputs.push(current);
        return;
    }
    let (name, values) = axes[idx];
    for value in values {
        let mut next = current.clone();
        next.insert(name.clone(), value.clone());
        expand_grid(axes, idx + 1, next, outputs);
    }
}
