//! Shared application state.

use std::sync::Arc;

use cgov_engine::Engine;

/// State handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The engine behind every route.
    pub engine: Arc<Engine>,
}

impl AppState {
    /// Wrap an engine.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}
