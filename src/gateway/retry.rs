// Gateway Retry Client - bounded retry with a recovery hook
//
// - Only transport failures (connect, timeout, send) are retried
// - Fixed backoff between attempts, optional uniform jitter
// - After the last failed attempt the recovery callback runs exactly once and its
//   sentinel is returned instead of the error
// - Gateway rejections are returned immediately, never retried or recovered

use rand::Rng;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first call
    pub max_attempts: u32,
    pub backoff: Duration,
    /// Upper bound of random extra delay added to each backoff
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_secs(1),
            jitter: Duration::ZERO,
        }
    }
}

/// Deterministic "did not succeed" result handed back after recovery.
/// Callers must treat it as a failure that may need compensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoverySentinel {
    pub operation: String,
    pub key: String,
    pub status: String,
}

impl RecoverySentinel {
    pub const INTERNAL_SERVER_ERROR: &'static str = "500 INTERNAL_SERVER_ERROR";

    pub fn internal_error(operation: &str, key: &str) -> Self {
        Self {
            operation: operation.to_string(),
            key: key.to_string(),
            status: Self::INTERNAL_SERVER_ERROR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum GatewayOutcome<T> {
    Completed(T),
    Recovered(RecoverySentinel),
}

impl<T> GatewayOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, GatewayOutcome::Completed(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct GatewayRetryClient {
    policy: RetryPolicy,
}

impl GatewayRetryClient {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `call` under the retry policy.
    ///
    /// `key` identifies the business object (e.g. the payment id) and is handed to
    /// `recover` together with the final transport error. The backoff sleep only
    /// suspends the calling task; dropping the returned future cancels it.
    pub async fn invoke<K, T, F, Fut, R>(
        &self,
        operation: &str,
        key: &K,
        mut call: F,
        recover: R,
    ) -> Result<GatewayOutcome<T>, GatewayError>
    where
        K: Display + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
        R: FnOnce(&GatewayError, &K) -> RecoverySentinel,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("✓ {} for {} succeeded on attempt {}", operation, key, attempt);
                    }
                    return Ok(GatewayOutcome::Completed(value));
                }
                Err(e) if !e.is_transient() => {
                    warn!("⚠️ {} for {} rejected, not retrying: {}", operation, key, e);
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    error!(
                        "❌ {} for {} failed after {} attempts: {}",
                        operation, key, attempt, e
                    );
                    return Ok(GatewayOutcome::Recovered(recover(&e, key)));
                }
                Err(e) => {
                    let wait = self.next_delay();
                    warn!(
                        "⚠️ {} for {} failed (attempt {}/{}): {}. Retrying in {}ms...",
                        operation,
                        key,
                        attempt,
                        max_attempts,
                        e,
                        wait.as_millis()
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = self.policy.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.policy.backoff;
        }
        self.policy.backoff + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}
