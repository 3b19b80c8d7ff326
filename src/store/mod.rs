pub mod disk;
pub mod memory;

use crate::core::config::AppConfig;
use crate::core::store::NavStore;
use anyhow::Result;
use disk::DiskStore;
use std::sync::Arc;
use tracing::warn;

/// Opens the NAV store under the configured data path, falling back to an
/// in-memory store when the directory cannot be used.
pub fn open_nav_store(config: &AppConfig) -> Result<Arc<dyn NavStore>> {
    let path = config.data_path()?;
    match DiskStore::open(&path) {
        Ok(store) => Ok(Arc::new(store)),
        Err(e) => {
            warn!(
                "Falling back to in-memory store, {} is unusable: {:#}",
                path.display(),
                e
            );
            Ok(Arc::new(memory::MemoryStore::default()))
        }
    }
}
