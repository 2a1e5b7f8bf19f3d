//! In-process vector store backed by DashMap.
//! Default backend for local runs and tests; contents live as long as the
//! store does.

use crate::top_k;
use async_trait::async_trait;
use dashmap::DashMap;
use sem_core::providers::{Neighbor, VectorStore};
use sem_core::vector::cosine_similarity;
use sem_core::ProviderError;
use std::sync::Arc;

struct StoredEntry {
    vector: Vec<f32>,
    payload: serde_json::Value,
}

#[derive(Clone, Default)]
pub struct MemoryVectorStore {
    entries: Arc<DashMap<String, StoredEntry>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn payload(&self, id: &str) -> Option<serde_json::Value> {
        self.entries.get(id).map(|entry| entry.payload.clone())
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        payload: &serde_json::Value,
    ) -> Result<(), ProviderError> {
        if vector.is_empty() {
            return Err(ProviderError::Rejected(format!("empty vector for {id}")));
        }
        self.entries.insert(
            id.to_string(),
            StoredEntry {
                vector: vector.to_vec(),
                payload: payload.clone(),
            },
        );
        metrics::counter!("store.upserts", "backend" => "memory").increment(1);
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, ProviderError> {
        let hits = self
            .entries
            .iter()
            .filter(|entry| entry.vector.len() == vector.len())
            .map(|entry| Neighbor {
                id: entry.key().clone(),
                similarity: cosine_similarity(&entry.vector, vector),
                payload: entry.payload.clone(),
            })
            .collect();
        Ok(top_k(hits, k))
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryVectorStore::new();
        store.upsert("a", &[1.0, 0.0], &json!({"keyword": "shoes"})).await.unwrap();
        store.upsert("a", &[1.0, 0.0], &json!({"keyword": "shoes"})).await.unwrap();
        assert_eq!(store.len(), 1);

        store.upsert("a", &[0.0, 1.0], &json!({"keyword": "boots"})).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.payload("a").unwrap()["keyword"], "boots");
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let store = MemoryVectorStore::new();
        store.upsert("far", &[0.0, 1.0], &json!({})).await.unwrap();
        store.upsert("near", &[1.0, 0.1], &json!({})).await.unwrap();
        store.upsert("exact", &[1.0, 0.0], &json!({})).await.unwrap();
        store.upsert("other-dim", &[1.0, 0.0, 0.0], &json!({})).await.unwrap();

        let hits = store.query(&[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near"]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_empty_vector_rejected() {
        let store = MemoryVectorStore::new();
        assert!(store.upsert("a", &[], &json!({})).await.is_err());
        assert!(store.is_empty());
    }
}
