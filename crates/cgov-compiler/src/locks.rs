//! Per-namespace compilation exclusion.
//!
//! At most one compilation runs per namespace. Waiters queue in FIFO order
//! (tokio's mutex is fair) instead of racing. Different namespaces never
//! contend.

use std::sync::Arc;

use cgov_core::Namespace;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held for the duration of one compile-to-activation pipeline run.
#[derive(Debug)]
pub struct NamespaceGuard {
    namespace: Namespace,
    _guard: OwnedMutexGuard<()>,
}

impl NamespaceGuard {
    /// The namespace this guard serializes.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }
}

/// One async mutex per namespace, created on first use.
#[derive(Debug, Default, Clone)]
pub struct NamespaceLocks {
    locks: Arc<DashMap<Namespace, Arc<Mutex<()>>>>,
}

impl NamespaceLocks {
    /// No namespaces locked yet.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, namespace: &Namespace) -> Arc<Mutex<()>> {
        self.locks
            .entry(namespace.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive compilation rights on `namespace`.
    pub async fn acquire(&self, namespace: &Namespace) -> NamespaceGuard {
        let lock = self.lock_for(namespace);
        let guard = lock.lock_owned().await;
        tracing::trace!(namespace = %namespace, "compilation lock acquired");
        NamespaceGuard {
            namespace: namespace.clone(),
            _guard: guard,
        }
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self, namespace: &Namespace) -> Option<NamespaceGuard> {
        let lock = self.lock_for(namespace);
        lock.try_lock_owned().ok().map(|guard| NamespaceGuard {
            namespace: namespace.clone(),
            _guard: guard,
        })
    }
}
