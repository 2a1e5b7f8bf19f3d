//! Vector store backends for persisting deduplicated keywords.

#![warn(clippy::unwrap_used)]

pub mod memory;
pub mod redis_store;

pub use memory::MemoryVectorStore;
pub use redis_store::RedisVectorStore;

use sem_core::config::{StoreBackend, StoreConfig};
use sem_core::providers::{Neighbor, VectorStore};
use sem_core::PipelineResult;
use std::sync::Arc;

/// Build the backend selected in configuration.
pub async fn connect(config: &StoreConfig) -> PipelineResult<Arc<dyn VectorStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryVectorStore::new())),
        StoreBackend::Redis => Ok(Arc::new(RedisVectorStore::connect(config).await?)),
    }
}

/// Best first, ties by id, at most `k`.
pub(crate) fn top_k(mut hits: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}
