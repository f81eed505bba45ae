pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod marketplace;
pub mod telemetry;

use std::sync::Arc;

use homeserve_core::{StorageBackend, StorageError};
use homeserve_memory::InMemoryStorage;
use homeserve_sqlite::SqliteStorage;

use crate::config::{StorageConfig, StorageKind};

/// Opens the storage backend named in the `[storage]` section.
pub fn open_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match config.backend {
        StorageKind::Memory => {
            tracing::info!("Using in-memory storage");
            Ok(Arc::new(InMemoryStorage::new()))
        }
        StorageKind::Sqlite => {
            tracing::info!(path = %config.path, "Using SQLite storage");
            Ok(Arc::new(SqliteStorage::new(&config.path)?))
        }
    }
}
