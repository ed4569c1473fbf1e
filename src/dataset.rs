//! Dataset catalog collaborator
//!
//! The engine only needs to turn a [`DatasetId`] into a file path or an
//! in-memory series (plus ground-truth labels for scoring). Indexing and
//! selection live outside this crate.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Dataset identifier: collection name plus dataset name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetId {
    collection: String,
    name: String,
}

impl DatasetId {
    /// Create a dataset identifier.
    #[must_use]
    pub fn new(collection: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            name: name.into(),
        }
    }

    /// Collection the dataset belongs to.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Dataset name within its collection.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.name)
    }
}

/// A loaded time series: one row per timestamp, one column per channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeSeries {
    /// Observations, `data[t][channel]`
    pub data: Vec<Vec<f64>>,
    /// Ground-truth anomaly labels, one per timestamp
    pub labels: Vec<f64>,
}

impl TimeSeries {
    /// Number of timestamps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the series has no timestamps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of channels (0 for an empty series).
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.data.first().map_or(0, Vec::len)
    }

    /// Render as CSV: `timestamp,value-0,..,is_anomaly`.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::from("timestamp");
        for channel in 0..self.dimensions() {
            out.push_str(&format!(",value-{channel}"));
        }
        out.push_str(",is_anomaly\n");
        for (t, row) in self.data.iter().enumerate() {
            out.push_str(&t.to_string());
            for value in row {
                out.push_str(&format!(",{value}"));
            }
            let label = self.labels.get(t).copied().unwrap_or(0.0);
            out.push_str(&format!(",{label}\n"));
        }
        out
    }
}

/// What an adapter receives as input.
#[derive(Debug, Clone)]
pub enum DatasetPayload {
    /// Path to the dataset file
    File(PathBuf),
    /// Already loaded series
    Series(Arc<TimeSeries>),
}

/// Descriptive attributes used for reporting only.
pub type DatasetMetadata = BTreeMap<String, Value>;

/// Resolves dataset identifiers to data.
pub trait DatasetCatalog: Send + Sync {
    /// Filesystem path of the dataset.
    ///
    /// # Errors
    /// Returns [`Error::Dataset`] if the dataset is unknown or has no file.
    fn path(&self, id: &DatasetId) -> Result<PathBuf>;

    /// Load the dataset into memory.
    ///
    /// # Errors
    /// Returns [`Error::Dataset`] if the dataset is unknown or unreadable.
    fn load(&self, id: &DatasetId) -> Result<Arc<TimeSeries>>;

    /// Optional reporting attributes.
    fn metadata(&self, _id: &DatasetId) -> Option<DatasetMetadata> {
        None
    }
}

#[derive(Debug, Clone, Default)]
struct CatalogEntry {
    path: Option<PathBuf>,
    series: Option<Arc<TimeSeries>>,
    metadata: Option<DatasetMetadata>,
}

/// Catalog backed by a hash map, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    entries: HashMap<DatasetId, CatalogEntry>,
}

impl InMemoryCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-memory series.
    pub fn insert_series(&mut self, id: DatasetId, series: TimeSeries) {
        self.entries.entry(id).or_default().series = Some(Arc::new(series));
    }

    /// Register a dataset file path.
    pub fn insert_path(&mut self, id: DatasetId, path: impl Into<PathBuf>) {
        self.entries.entry(id).or_default().path = Some(path.into());
    }

    /// Attach reporting metadata.
    pub fn insert_metadata(&mut self, id: DatasetId, metadata: DatasetMetadata) {
        self.entries.entry(id).or_default().metadata = Some(metadata);
    }

    /// Number of registered datasets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no dataset is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered identifiers in sorted order.
    #[must_use]
    pub fn dataset_ids(&self) -> Vec<DatasetId> {
        let mut ids: Vec<DatasetId> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl DatasetCatalog for InMemoryCatalog {
    fn path(&self, id: &DatasetId) -> Result<PathBuf> {
        self.entries
            .get(id)
            .and_then(|entry| entry.path.clone())
            .ok_or_else(|| Error::Dataset(format!("no file registered for dataset {id}")))
    }

    fn load(&self, id: &DatasetId) -> Result<Arc<TimeSeries>> {
        self.entries
            .get(id)
            .and_then(|entry| entry.series.clone())
            .ok_or_else(|| Error::Dataset(format!("no series registered for dataset {id}")))
    }

    fn metadata(&self, id: &DatasetId) -> Option<DatasetMetadata> {
        self.entries.get(id).and_then(|entry| entry.metadata.clone())
    }
}
