//! Application state shared across request handlers.

use std::sync::Arc;

use crate::assignment::AssignmentEngine;
use crate::db::Database;
use crate::lifecycle::LifecycleReconciler;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    db: Database,
    engine: AssignmentEngine,
    lifecycle: LifecycleReconciler,
}

impl AppState {
    pub fn new(db: Database, engine: AssignmentEngine, lifecycle: LifecycleReconciler) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                db,
                engine,
                lifecycle,
            }),
        }
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn engine(&self) -> &AssignmentEngine {
        &self.inner.engine
    }

    pub fn lifecycle(&self) -> &LifecycleReconciler {
        &self.inner.lifecycle
    }
}
