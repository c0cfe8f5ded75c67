//! The one retry policy applied to every runtime call.

use std::future::Future;
use std::time::Duration;

use cgov_core::ValidationError;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Exponential backoff curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    /// Delay before the first retry, milliseconds.
    pub initial_ms: u64,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Upper bound on a single delay, milliseconds.
    pub max_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_ms: 50,
            multiplier: 2.0,
            max_ms: 1_000,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let ms = (self.initial_ms as f64 * factor).min(self.max_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }
}

/// What to answer when the runtime cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Deny.
    FailClosed,
    /// Allow, with a logged warning.
    FailOpen,
}

impl FailureMode {
    /// The decision this mode produces.
    pub fn allows(self) -> bool {
        matches!(self, Self::FailOpen)
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailClosed => "fail_closed",
            Self::FailOpen => "fail_open",
        }
    }
}

impl std::str::FromStr for FailureMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_closed" | "closed" | "deny" => Ok(Self::FailClosed),
            "fail_open" | "open" | "allow" => Ok(Self::FailOpen),
            other => Err(ValidationError::InvalidConfig {
                field: "failure_mode".into(),
                reason: format!("unknown failure mode '{other}'"),
            }),
        }
    }
}

/// Failure mode per context class. A deployment setting, never chosen by
/// the engine at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailurePolicy {
    /// Mode for safety-critical contexts.
    pub safety_critical: FailureMode,
    /// Mode for everything else.
    pub non_critical: FailureMode,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            safety_critical: FailureMode::FailClosed,
            non_critical: FailureMode::FailOpen,
        }
    }
}

impl FailurePolicy {
    /// Mode for a context.
    pub fn mode_for(&self, safety_critical: bool) -> FailureMode {
        if safety_critical {
            self.safety_critical
        } else {
            self.non_critical
        }
    }
}

/// Bounded retry with backoff, plus the failure policy applied afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts including the first. `2` means one retry.
    pub max_attempts: u32,
    /// Delay curve between attempts.
    pub backoff: Backoff,
    /// Fail-open/closed per context class.
    pub failure: FailurePolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Backoff::default(),
            failure: FailurePolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// Reject a policy that would never call the runtime.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(ValidationError::InvalidConfig {
                field: "runtime.retry.max_attempts".into(),
                reason: "must be between 1 and 10".into(),
            });
        }
        if !(self.backoff.multiplier >= 1.0) {
            return Err(ValidationError::InvalidConfig {
                field: "runtime.retry.backoff.multiplier".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Run `call` until it succeeds, fails non-transiently, or the attempt
    /// budget is spent. Exhaustion yields [`RuntimeError::Unavailable`].
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, RuntimeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if attempt < attempts {
                        let delay = self.backoff.delay(attempt);
                        tracing::warn!(
                            operation,
                            attempt,
                            max_attempts = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "runtime call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last = Some(e);
                }
            }
        }
        let reason = last.map_or_else(|| "no attempt made".to_string(), |e| e.to_string());
        tracing::error!(operation, attempts, %reason, "runtime unavailable");
        Err(RuntimeError::Unavailable {
            operation: operation.to_string(),
            attempts,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Backoff {
                initial_ms: 1,
                multiplier: 2.0,
                max_ms: 5,
            },
            ..RetryPolicy::default()
        }
    }

    fn transport() -> RuntimeError {
        RuntimeError::Transport {
            operation: "query".into(),
            reason: "connection refused".into(),
        }
    }

    #[test]
    fn backoff_curve_is_capped() {
        let b = Backoff::default();
        assert_eq!(b.delay(1), Duration::from_millis(50));
        assert_eq!(b.delay(2), Duration::from_millis(100));
        assert_eq!(b.delay(10), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn one_bounded_retry_then_unavailable() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast(2)
            .run("query", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transport()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result {
            Err(RuntimeError::Unavailable { attempts, reason, .. }) => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("connection refused"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast(3)
            .run("push", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(RuntimeError::Status {
                        operation: "push".into(),
                        status: 400,
                        body: "bad policy".into(),
                    })
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RuntimeError::Status { status: 400, .. })));
    }

    #[tokio::test]
    async fn recovers_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let result = fast(2)
            .run("health", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(transport())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn failure_policy_defaults() {
        let p = FailurePolicy::default();
        assert_eq!(p.mode_for(true), FailureMode::FailClosed);
        assert_eq!(p.mode_for(false), FailureMode::FailOpen);
        assert_eq!("closed".parse::<FailureMode>().unwrap(), FailureMode::FailClosed);
        assert!("maybe".parse::<FailureMode>().is_err());
    }
}
