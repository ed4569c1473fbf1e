//! In-process adapter

use std::sync::Arc;

use super::AdapterInput;
use crate::dataset::DatasetPayload;
use crate::params::Params;
use crate::{Error, Result};

/// Signature of an in-process algorithm.
pub type AdapterFn = dyn Fn(&DatasetPayload, &Params) -> anyhow::Result<Vec<f64>> + Send + Sync;

/// Adapter wrapping a user function.
#[derive(Clone)]
pub struct FunctionAdapter {
    func: Arc<AdapterFn>,
}

impl FunctionAdapter {
    /// Wrap a closure.
    #[must_use]
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&DatasetPayload, &Params) -> anyhow::Result<Vec<f64>> + Send + Sync + 'static,
    {
        Self { func: Arc::new(f) }
    }

    /// Call the function on the blocking pool.
    ///
    /// # Errors
    /// Returns the function's error (converted via [`Error::from_user`]) or
    /// [`Error::AdapterExecution`] if the function panicked.
    pub async fn run(&self, input: AdapterInput<'_>) -> Result<Vec<f64>> {
        let func = Arc::clone(&self.func);
        let payload = input.payload.clone();
        let params = input.params.clone();
        run_blocking(move || func(&payload, &params)).await
    }
}

/// Run user code on the blocking pool, mapping panics and user errors.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Error::from_user(err)),
        Err(join) => Err(Error::AdapterExecution(format!("algorithm panicked: {join}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConstraints;
    use crate::dataset::TimeSeries;
    use crate::host::Host;
    use std::path::Path;

    async fn call(adapter: &FunctionAdapter) -> Result<Vec<f64>> {
        let payload = DatasetPayload::Series(Arc::new(TimeSeries {
            data: vec![vec![1.0], vec![2.0]],
            labels: vec![0.0, 1.0],
        }));
        let input = AdapterInput {
            payload: &payload,
            params: &Params::new(),
            artifact_dir: Path::new("/unused"),
            host: &Host::Local,
            constraints: &ResourceConstraints::default(),
        };
        adapter.run(input).await
    }

    #[tokio::test]
    async fn test_function_result_passes_through() {
        let adapter = FunctionAdapter::new(|payload, _| match payload {
            DatasetPayload::Series(s) => Ok(s.data.iter().map(|r| r[0] * 2.0).collect()),
            DatasetPayload::File(_) => Ok(Vec::new()),
        });
        assert_eq!(call(&adapter).await.unwrap(), vec![2.0, 4.0]);
    }

    #[tokio::test]
    async fn test_user_error_message_kept() {
        let adapter = FunctionAdapter::new(|_, _| anyhow::bail!("test-exception"));
        let err = call(&adapter).await.unwrap_err();
        assert_eq!(err.to_string(), "test-exception");
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_user_timeout_is_timeout() {
        let adapter = FunctionAdapter::new(|_, _| {
            Err(Error::AdapterTimeout("test-exception-timeout".to_string()).into())
        });
        let err = call(&adapter).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "test-exception-timeout");
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let adapter = FunctionAdapter::new(|_, _| panic!("boom"));
        let err = call(&adapter).await.unwrap_err();
        assert!(matches!(err, Error::AdapterExecution(_)));
    }
}
