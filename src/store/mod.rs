pub mod disk;
pub mod memory;

use crate::core::store::RecordStore;
use anyhow::{Context, Result};
use disk::DiskStore;
use memory::MemoryStore;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Opens the fjall record store under `data_path`, or an in-memory store when
/// no path is given.
pub fn open_store(data_path: Option<&Path>) -> Result<Arc<dyn RecordStore>> {
    let Some(path) = data_path else {
        debug!("Using in-memory record store");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let store_dir = path.join("records");
    std::fs::create_dir_all(&store_dir)
        .with_context(|| format!("Failed to create directory: {}", store_dir.display()))?;
    let store = DiskStore::open(&store_dir)
        .with_context(|| format!("Failed to open record store at {}", store_dir.display()))?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::portfolio::Portfolio;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_store_on_disk() {
        let dir = tempdir().unwrap();
        let store = open_store(Some(dir.path())).unwrap();
        store.put_portfolio(&Portfolio::new("alice")).await.unwrap();

        assert!(dir.path().join("records").is_dir());
        assert!(store.get_portfolio("alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_open_store_in_memory() {
        let store = open_store(None).unwrap();
        assert!(store.get_portfolio("alice").await.unwrap().is_none());
    }
}
