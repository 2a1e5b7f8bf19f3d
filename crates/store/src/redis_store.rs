//! Redis-backed vector store.
//! Each entry is a hash `{prefix}:entry:{id}` holding the JSON-encoded vector
//! and payload; `{prefix}:ids` indexes the ids. Queries scan the index and
//! rank by cosine similarity in process.

use crate::top_k;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::RedisError;
use sem_core::config::StoreConfig;
use sem_core::providers::{Neighbor, VectorStore};
use sem_core::vector::cosine_similarity;
use sem_core::{PipelineError, PipelineResult, ProviderError};
use tracing::{debug, info, warn};

pub struct RedisVectorStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisVectorStore {
    pub async fn connect(config: &StoreConfig) -> PipelineResult<Self> {
        info!(url = %config.redis_url, "Connecting to Redis vector store");

        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| PipelineError::Config(format!("invalid store.redis_url: {e}")))?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| PipelineError::Store(redis_error(e)))?;

        // Verify connectivity
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| PipelineError::Store(redis_error(e)))?;
        info!(response = %pong, "Redis connection established");

        Ok(Self {
            conn,
            prefix: config.key_prefix.trim_end_matches(':').to_string(),
        })
    }

    fn entry_key(&self, id: &str) -> String {
        entry_key(&self.prefix, id)
    }

    fn index_key(&self) -> String {
        format!("{}:ids", self.prefix)
    }
}

fn entry_key(prefix: &str, id: &str) -> String {
    format!("{prefix}:entry:{id}")
}

#[async_trait]
impl VectorStore for RedisVectorStore {
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        payload: &serde_json::Value,
    ) -> Result<(), ProviderError> {
        if vector.is_empty() {
            return Err(ProviderError::Rejected(format!("empty vector for {id}")));
        }
        let vector_json = serde_json::to_string(vector)
            .map_err(|e| ProviderError::Rejected(format!("unencodable vector: {e}")))?;
        let payload_json = payload.to_string();

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset_multiple(
                self.entry_key(id),
                &[("vector", vector_json), ("payload", payload_json)],
            )
            .ignore()
            .sadd(self.index_key(), id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(redis_error)?;

        metrics::counter!("store.upserts", "backend" => "redis").increment(1);
        debug!(id, "Upserted keyword vector");
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, ProviderError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.index_key())
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.cmd("HMGET")
                .arg(self.entry_key(id))
                .arg("vector")
                .arg("payload");
        }
        let rows: Vec<(Option<String>, Option<String>)> =
            pipe.query_async(&mut conn).await.map_err(redis_error)?;

        let mut hits = Vec::with_capacity(ids.len());
        for (id, (stored_vector, stored_payload)) in ids.into_iter().zip(rows) {
            let (Some(stored_vector), Some(stored_payload)) = (stored_vector, stored_payload) else {
                warn!(id = %id, "Indexed entry is missing, skipping");
                continue;
            };
            let stored: Vec<f32> = serde_json::from_str(&stored_vector)
                .map_err(|e| ProviderError::Malformed(format!("stored vector {id}: {e}")))?;
            if stored.len() != vector.len() {
                continue;
            }
            let payload = serde_json::from_str(&stored_payload)
                .map_err(|e| ProviderError::Malformed(format!("stored payload {id}: {e}")))?;
            hits.push(Neighbor {
                similarity: cosine_similarity(&stored, vector),
                id,
                payload,
            });
        }
        Ok(top_k(hits, k))
    }

    fn backend_name(&self) -> &str {
        "redis"
    }
}

fn redis_error(err: RedisError) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        ProviderError::Unavailable(err.to_string())
    } else if err.kind() == redis::ErrorKind::AuthenticationFailed {
        ProviderError::Auth(err.to_string())
    } else {
        ProviderError::Rejected(err.to_string())
    }
}
