//! Timeout utilities for page operations
//!
//! Every CDP call that waits on the remote page goes through here so no
//! render can hang the single browser slot.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;

/// Marker error for an elapsed page timeout
#[derive(Debug, thiserror::Error)]
#[error("{operation} timed out after {}s", .after.as_secs())]
pub struct PageTimeout {
    pub operation: String,
    pub after: Duration,
}

/// Race `operation` against `timeout`
///
/// On expiry returns a [`PageTimeout`] inside the `anyhow::Error`, so
/// callers can tell a timeout from an operation failure with
/// `err.is::<PageTimeout>()`.
pub async fn with_page_timeout<F, T>(
    operation: F,
    timeout: Duration,
    operation_name: &str,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(PageTimeout {
            operation: operation_name.to_string(),
            after: timeout,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_is_distinguishable() {
        let err = with_page_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<(), anyhow::Error>(())
            },
            Duration::from_millis(10),
            "extraction",
        )
        .await
        .unwrap_err();
        assert!(err.is::<PageTimeout>());
        assert_eq!(err.to_string(), "extraction timed out after 0s");
    }

    #[tokio::test]
    async fn test_operation_error_passes_through() {
        let err = with_page_timeout(
            async { Err::<(), _>(anyhow::anyhow!("boom")) },
            Duration::from_secs(1),
            "navigation",
        )
        .await
        .unwrap_err();
        assert!(!err.is::<PageTimeout>());
    }
}
