//! In-process response cache for generative model completions.
//! Keyed by a content hash of model name and prompt so identical prompts
//! within the TTL skip the network round trip.

use dashmap::DashMap;
use sem_core::hashing::content_hash;
use sem_core::providers::GeneratedKeyword;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CacheEntry {
    keywords: Vec<GeneratedKeyword>,
    inserted_at: Instant,
}

/// Lock-free cache of parsed completions.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<DashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            store: Arc::new(DashMap::with_capacity(max_entries.min(1024))),
            ttl: Duration::from_secs(ttl_secs),
            max_entries,
        }
    }

    pub fn key(model: &str, prompt: &str) -> String {
        content_hash(&["completion", model, prompt])
    }

    /// Returns None if expired or missing.
    pub fn get(&self, key: &str) -> Option<Vec<GeneratedKeyword>> {
        let entry = self.store.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.store.remove(key);
            return None;
        }
        Some(entry.keywords.clone())
    }

    pub fn put(&self, key: String, keywords: Vec<GeneratedKeyword>) {
        // Full cache: evict expired entries first, then skip the insert if still full
        if self.store.len() >= self.max_entries && !self.store.contains_key(&key) {
            self.evict_expired();
            if self.store.len() >= self.max_entries {
                return;
            }
        }
        self.store.insert(
            key,
            CacheEntry {
                keywords,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn evict_expired(&self) -> usize {
        let before = self.store.len();
        self.store
            .retain(|_, entry| entry.inserted_at.elapsed() <= self.ttl);
        before - self.store.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
