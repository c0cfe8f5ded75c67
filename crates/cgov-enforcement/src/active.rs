//! Bundles currently advertised as active, per namespace.

use std::sync::Arc;

use cgov_compiler::CompiledBundle;
use cgov_core::{BundleVersion, Namespace};
use dashmap::DashMap;

/// Active bundle per namespace. Reads never block on a writer in another
/// namespace; replacing an entry is a single map write.
#[derive(Debug, Default)]
pub struct ActiveBundles {
    bundles: DashMap<Namespace, Arc<CompiledBundle>>,
}

impl ActiveBundles {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The active bundle for `namespace`.
    pub fn get(&self, namespace: &Namespace) -> Option<Arc<CompiledBundle>> {
        self.bundles.get(namespace).map(|b| Arc::clone(b.value()))
    }

    /// The active version for `namespace`.
    pub fn version(&self, namespace: &Namespace) -> Option<BundleVersion> {
        self.bundles.get(namespace).map(|b| b.version)
    }

    /// Advertise `bundle` as active, returning the bundle it replaced.
    pub fn set(&self, bundle: Arc<CompiledBundle>) -> Option<Arc<CompiledBundle>> {
        self.bundles.insert(bundle.namespace.clone(), bundle)
    }

    /// Stop serving `namespace`.
    pub fn remove(&self, namespace: &Namespace) -> Option<Arc<CompiledBundle>> {
        self.bundles.remove(namespace).map(|(_, b)| b)
    }

    /// Namespaces with an active bundle, sorted.
    pub fn namespaces(&self) -> Vec<Namespace> {
        let mut out: Vec<Namespace> = self.bundles.iter().map(|e| e.key().clone()).collect();
        out.sort();
        out
    }
}
