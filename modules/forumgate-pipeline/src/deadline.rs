use std::future::Future;
use std::time::Duration;

use forumgate_common::{PipelineError, PipelineResult};

/// Await an external call under `timeout`. Errors and timeouts both become
/// `PipelineError::Transient` tagged with `dependency`.
pub async fn with_deadline<T, F>(
    dependency: &'static str,
    timeout: Duration,
    call: F,
) -> PipelineResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PipelineError::transient(dependency, e)),
        Err(_) => Err(PipelineError::transient(
            dependency,
            anyhow::anyhow!("timed out after {}ms", timeout.as_millis()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_call_becomes_transient() {
        let err = with_deadline("vector index", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("vector index failed: timed out"));
    }

    #[tokio::test]
    async fn call_error_keeps_its_message() {
        let err = with_deadline::<(), _>("embedder", Duration::from_secs(1), async {
            Err(anyhow::anyhow!("429 Too Many Requests"))
        })
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "embedder failed: 429 Too Many Requests");
    }
}
