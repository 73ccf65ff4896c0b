use calm_core::{AdapterError, AdapterFailureKind};
use std::time::Duration;
use tracing::warn;

/// Runs blocking adapter calls off the async runtime with a bounded wait.
#[derive(Debug, Clone, Copy)]
pub struct ExternalCalls {
    timeout: Duration,
}

impl ExternalCalls {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A call that outlives the timeout keeps running detached; its result
    /// is dropped.
    pub async fn call<T, F>(&self, work: F) -> Result<T, AdapterError>
    where
        F: FnOnce() -> Result<T, AdapterError> + Send + 'static,
        T: Send + 'static,
    {
        let task = tokio::task::spawn_blocking(work);
        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(AdapterError::new(
                AdapterFailureKind::Timeout,
                format!("no reply within {} ms", self.timeout.as_millis()),
            )),
            Ok(Err(join)) if join.is_panic() => Err(AdapterError::new(
                AdapterFailureKind::Panicked,
                "adapter panicked",
            )),
            Ok(Err(join)) => Err(AdapterError::new(
                AdapterFailureKind::ProviderError,
                join.to_string(),
            )),
            Ok(Ok(result)) => result,
        }
    }

    /// Like `call`, but any failure is logged and replaced by `fallback`.
    pub async fn guarded<T, F, D>(&self, name: &'static str, work: F, fallback: D) -> T
    where
        F: FnOnce() -> Result<T, AdapterError> + Send + 'static,
        T: Send + 'static,
        D: FnOnce() -> T,
    {
        match self.call(work).await {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    event = "external_call_fallback",
                    call = name,
                    kind = %err.kind,
                    error = %err.message,
                );
                fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calls() -> ExternalCalls {
        ExternalCalls::new(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn successful_call_passes_through() {
        let value = calls().call(|| Ok::<_, AdapterError>(7)).await.expect("call");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let err = calls()
            .call(|| {
                std::thread::sleep(Duration::from_millis(300));
                Ok::<_, AdapterError>(())
            })
            .await
            .expect_err("timeout");
        assert_eq!(err.kind, AdapterFailureKind::Timeout);
    }

    #[tokio::test]
    async fn panicking_call_is_contained() {
        let err = calls()
            .call(|| -> Result<(), AdapterError> { panic!("adapter blew up") })
            .await
            .expect_err("panic");
        assert_eq!(err.kind, AdapterFailureKind::Panicked);
    }

    #[tokio::test]
    async fn guarded_substitutes_fallback_on_error() {
        let value = calls()
            .guarded(
                "test",
                || Err(AdapterError::new(AdapterFailureKind::ProviderError, "down")),
                || "fallback".to_string(),
            )
            .await;
        assert_eq!(value, "fallback");
    }
}
