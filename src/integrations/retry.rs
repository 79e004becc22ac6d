use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::warn;

use super::{CallError, CallKind, CallRequest, ExternalCallAdapter};
use crate::config::IntegrationsConfig;
use crate::flow::CallLimits;

/// Timeout and retry budget for one logical external call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &IntegrationsConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Policy for one call: global settings, then the kind's overrides,
    /// then the node's own.
    pub fn resolve(config: &IntegrationsConfig, kind: CallKind, node: &CallLimits) -> Self {
        let mut policy = Self::from_config(config);
        let kind_limits = config.kinds.get(&kind.to_string()).copied().unwrap_or_default();
        for limits in [kind_limits, *node] {
            if let Some(secs) = limits.timeout_secs {
                policy.timeout = Duration::from_secs(secs);
            }
            if let Some(retries) = limits.max_retries {
                policy.max_retries = retries;
            }
        }
        policy
    }

    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&IntegrationsConfig::default())
    }
}

/// Outcome of a call including how many attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub result: Result<JsonValue, CallError>,
    pub attempts: u32,
}

/// Invoke with a per-attempt timeout, retrying transient failures only
pub async fn invoke_with_retry(
    adapter: &dyn ExternalCallAdapter,
    request: &CallRequest,
    policy: &RetryPolicy,
) -> CallOutcome {
    let mut attempt = 0;
    loop {
        attempt += 1;

        let result = match tokio::time::timeout(policy.timeout, adapter.invoke(request)).await {
            Ok(result) => result,
            Err(_) => Err(CallError::Transient(format!(
                "timed out after {}ms",
                policy.timeout.as_millis()
            ))),
        };

        match result {
            Err(err) if err.is_transient() && attempt <= policy.max_retries => {
                let delay = policy.backoff(attempt);
                warn!(
                    kind = %request.kind,
                    url = %request.url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "External call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            result => {
                return CallOutcome {
                    result,
                    attempts: attempt,
                }
            }
        }
    }
}
