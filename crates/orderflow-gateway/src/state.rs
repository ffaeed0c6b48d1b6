//! Shared axum handler state: a cheap-to-clone handle onto the composition
//! root's [`Runtime`].

use std::sync::Arc;

use orderflow_runtime::{Publisher, Runtime, Store};

/// Per-request state handed to every axum handler.
pub struct AppState<S: Store, P: Publisher> {
    /// The wired composition root.
    pub runtime: Arc<Runtime<S, P>>,
}

impl<S: Store, P: Publisher> Clone for AppState<S, P> {
    fn clone(&self) -> Self {
        Self { runtime: self.runtime.clone() }
    }
}

impl<S: Store, P: Publisher> AppState<S, P> {
    /// Wraps `runtime` for handler use.
    pub fn new(runtime: Runtime<S, P>) -> Self {
        Self { runtime: Arc::new(runtime) }
    }
}
