//! Algorithm declaration: name, adapter, parameter space and hooks

use std::fmt;
use std::sync::Arc;

use crate::adapter::Adapter;
use crate::dataset::DatasetPayload;
use crate::params::{ParameterConfig, Params};

/// In-process step run before the adapter; may replace the payload.
pub type PreprocessFn =
    dyn Fn(DatasetPayload, &Params) -> anyhow::Result<DatasetPayload> + Send + Sync;

/// In-process step run after the adapter; may replace the scores.
pub type PostprocessFn = dyn Fn(Vec<f64>, &Params) -> anyhow::Result<Vec<f64>> + Send + Sync;

/// An algorithm under evaluation.
#[derive(Clone)]
pub struct Algorithm {
    name: String,
    adapter: Adapter,
    param_config: ParameterConfig,
    data_as_file: bool,
    preprocess: Option<Arc<PreprocessFn>>,
    postprocess: Option<Arc<PostprocessFn>>,
}

impl Algorithm {
    /// Algorithm with default parameters that receives loaded data.
    #[must_use]
    pub fn new(name: impl Into<String>, adapter: Adapter) -> Self {
        Self {
            name: name.into(),
            adapter,
            param_config: ParameterConfig::defaults(),
            data_as_file: false,
            preprocess: None,
            postprocess: None,
        }
    }

    /// Set the parameter space.
    #[must_use]
    pub fn params(mut self, config: ParameterConfig) -> Self {
        self.param_config = config;
        self
    }

    /// Pass the dataset as a file path instead of loaded data.
    #[must_use]
    pub const fn data_as_file(mut self, as_file: bool) -> Self {
        self.data_as_file = as_file;
        self
    }

    /// Set the pre-processing step.
    #[must_use]
    pub fn preprocess<F>(mut self, f: F) -> Self
    where
        F: Fn(DatasetPayload, &Params) -> anyhow::Result<DatasetPayload> + Send + Sync + 'static,
    {
        self.preprocess = Some(Arc::new(f));
        self
    }

    /// Set the post-processing step.
    #[must_use]
    pub fn postprocess<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<f64>, &Params) -> anyhow::Result<Vec<f64>> + Send + Sync + 'static,
    {
        self.postprocess = Some(Arc::new(f));
        self
    }

    /// Get the algorithm name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the execution adapter.
    #[must_use]
    pub const fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Get the parameter space.
    #[must_use]
    pub const fn param_config(&self) -> &ParameterConfig {
        &self.param_config
    }

    /// Whether the adapter receives a file path instead of loaded data.
    #[must_use]
    pub const fn wants_file(&self) -> bool {
        self.data_as_file
    }

    /// Get the pre-processing step.
    #[must_use]
    pub fn preprocess_fn(&self) -> Option<&Arc<PreprocessFn>> {
        self.preprocess.as_ref()
    }

    /// Get the post-processing step.
    #[must_use]
    pub fn postprocess_fn(&self) -> Option<&Arc<PostprocessFn>> {
        self.postprocess.as_ref()
    }
}

impl fmt::Debug for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Algorithm")
            .field("name", &self.name)
            .field("adapter", &self.adapter)
            .field("param_config", &self.param_config)
            .field("data_as_file", &self.data_as_file)
            .field("preprocess", &self.preprocess.is_some())
            .field("postprocess", &self.postprocess.is_some())
            .finish()
    }
}
