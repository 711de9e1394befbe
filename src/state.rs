//! Application state management
//!
//! Contains shared state accessible across all handlers.
//! All storage is backed by PostgreSQL, no in-memory fallbacks.

use crate::artifacts::PgArtifactStore;
use crate::compat::CompatibilityProvider;
use crate::versioning::SnapshotStore;
use deadpool_postgres::Pool;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Read access to the designer's live artifacts
    pub artifacts: PgArtifactStore,

    /// Immutable snapshot store
    pub snapshots: SnapshotStore,

    /// Cached naming histories, replayed from published snapshots
    pub compat: CompatibilityProvider,
}

impl AppState {
    pub fn new(pool: Pool) -> Self {
        Self {
            artifacts: PgArtifactStore::new(pool.clone()),
            snapshots: SnapshotStore::new(pool),
            compat: CompatibilityProvider::new(),
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
