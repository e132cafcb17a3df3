//! Application state shared across handlers.

use std::sync::Arc;

use cart_insights_etl::Aggregator;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    aggregator: Aggregator,
}

impl AppState {
    /// Create a new application state around `aggregator`.
    #[must_use]
    pub fn new(aggregator: Aggregator) -> Self {
        Self {
            inner: Arc::new(AppStateInner { aggregator }),
        }
    }

    /// Get a reference to the rankings aggregator.
    #[must_use]
    pub fn aggregator(&self) -> &Aggregator {
        &self.inner.aggregator
    }
}
