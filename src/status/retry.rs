// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Run `op` until it succeeds, fails with something other than a conflict,
/// or has been retried `retries` times.
///
/// `op` is expected to re-read the current record on every call, so each
/// attempt applies its change on top of the latest version.
pub async fn retry_on_conflict<T, F, Fut>(retries: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < retries => {
                attempt += 1;
                debug!("Write conflict ({}), retry {} of {}", e, attempt, retries);
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvergeError;
    use crate::types::ObjectKey;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_conflicts_until_success() {
        let calls = AtomicU32::new(0);
        let key = ObjectKey::new("default", "a");

        let result = retry_on_conflict(5, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let key = key.clone();
            async move {
                if n < 2 {
                    Err(ConvergeError::conflict(&key, "stale"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_retries() {
        let calls = AtomicU32::new(0);
        let key = ObjectKey::new("default", "a");

        let result: Result<()> = retry_on_conflict(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            let key = key.clone();
            async move { Err(ConvergeError::conflict(&key, "stale")) }
        })
        .await;

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry_on_conflict(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ConvergeError::transient("unavailable")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
