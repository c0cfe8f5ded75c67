//! Scripted in-process runtime for tests and offline runs.
//!
//! It does not evaluate policy: decisions come from a caller-supplied
//! responder, and failures can be injected per call.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cgov_core::{BundleVersion, Namespace};
use parking_lot::Mutex;
use serde_json::Value;

use crate::client::{PolicyRuntime, RuntimeDecision};
use crate::error::RuntimeError;
use crate::retry::RetryPolicy;

type Responder = dyn Fn(&Namespace, &Value) -> RuntimeDecision + Send + Sync;

/// A [`PolicyRuntime`] driven by a closure.
pub struct FakeRuntime {
    responder: Arc<Responder>,
    retry: RetryPolicy,
    pushed: Mutex<BTreeMap<Namespace, (BundleVersion, String)>>,
    fail_next: AtomicU32,
    delay_ms: AtomicU64,
    queries: AtomicU32,
    healthy: std::sync::atomic::AtomicBool,
    reject_pushes: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for FakeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeRuntime")
            .field("namespaces", &self.pushed.lock().len())
            .field("queries", &self.queries.load(Ordering::Relaxed))
            .finish()
    }
}

impl FakeRuntime {
    /// A runtime answering every query with `responder`.
    pub fn new(responder: impl Fn(&Namespace, &Value) -> RuntimeDecision + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            retry: RetryPolicy {
                backoff: crate::retry::Backoff {
                    initial_ms: 1,
                    multiplier: 1.0,
                    max_ms: 1,
                },
                ..RetryPolicy::default()
            },
            pushed: Mutex::new(BTreeMap::new()),
            fail_next: AtomicU32::new(0),
            delay_ms: AtomicU64::new(0),
            queries: AtomicU32::new(0),
            healthy: std::sync::atomic::AtomicBool::new(true),
            reject_pushes: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// A runtime that allows everything.
    pub fn allow_all() -> Self {
        Self::new(|_, _| RuntimeDecision {
            allow: true,
            ..RuntimeDecision::default()
        })
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fail the next `n` query attempts with a transport error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Delay every query by `ms`.
    pub fn set_delay_ms(&self, ms: u64) {
        self.delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Mark the runtime up or down for health checks.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Make bundle pushes fail until reset.
    pub fn reject_pushes(&self, reject: bool) {
        self.reject_pushes.store(reject, Ordering::SeqCst);
    }

    /// Query attempts seen so far.
    pub fn query_attempts(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }

    /// Last bundle pushed for a namespace.
    pub fn pushed(&self, namespace: &Namespace) -> Option<(BundleVersion, String)> {
        self.pushed.lock().get(namespace).cloned()
    }

    async fn query_once(
        &self,
        namespace: &Namespace,
        input: &Value,
        timeout: Option<Duration>,
    ) -> Result<RuntimeDecision, RuntimeError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RuntimeError::Status {
                operation: "query".into(),
                status: 503,
                body: "injected failure".into(),
            });
        }
        let delay = Duration::from_millis(self.delay_ms.load(Ordering::SeqCst));
        if let Some(limit) = timeout {
            if delay > limit {
                tokio::time::sleep(limit).await;
                return Err(RuntimeError::Timeout {
                    operation: "query".into(),
                    after_ms: limit.as_millis() as u64,
                });
            }
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !self.pushed.lock().contains_key(namespace) {
            return Err(RuntimeError::Decode {
                operation: "query".into(),
                reason: format!("no bundle loaded for namespace {namespace}"),
            });
        }
        Ok((self.responder)(namespace, input))
    }
}

#[async_trait]
impl PolicyRuntime for FakeRuntime {
    async fn push_bundle(&self, namespace: &Namespace, version: BundleVersion, text: &str) -> Result<(), RuntimeError> {
        if self.reject_pushes.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable {
                operation: "push".into(),
                attempts: self.retry.max_attempts,
                reason: "bundle rejected".into(),
            });
        }
        self.pushed
            .lock()
            .insert(namespace.clone(), (version, text.to_string()));
        Ok(())
    }

    async fn query(
        &self,
        namespace: &Namespace,
        input: &Value,
        timeout: Option<Duration>,
    ) -> Result<RuntimeDecision, RuntimeError> {
        self.retry
            .run("query", || self.query_once(namespace, input, timeout))
            .await
    }

    async fn health(&self) -> Result<(), RuntimeError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RuntimeError::Unavailable {
                operation: "health".into(),
                attempts: 1,
                reason: "marked unhealthy".into(),
            })
        }
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}
