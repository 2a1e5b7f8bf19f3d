//! Provider abstractions for the external collaborators of the pipeline.
//!
//! The generative model, the advertising platform, the embedding service and
//! the vector store are each reached through a trait so the pipeline can run
//! against real HTTP clients, the deterministic development providers, or
//! test doubles without change.

use crate::error::ProviderError;
use crate::types::MatchType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One keyword proposal as returned by a generative model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedKeyword {
    pub text: String,
    #[serde(default)]
    pub match_type: Option<MatchType>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub headlines: Vec<String>,
    #[serde(default)]
    pub descriptions: Vec<String>,
}

impl GeneratedKeyword {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            match_type: None,
            confidence: None,
            headlines: Vec::new(),
            descriptions: Vec::new(),
        }
    }

    pub fn with_ad_copy(mut self, headlines: &[&str], descriptions: &[&str]) -> Self {
        self.headlines = headlines.iter().map(|h| h.to_string()).collect();
        self.descriptions = descriptions.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_match_type(mut self, match_type: MatchType) -> Self {
        self.match_type = Some(match_type);
        self
    }
}

/// Generative language model that proposes keywords.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Generate up to `max_candidates` keyword proposals for the prompt.
    async fn generate(
        &self,
        prompt: &str,
        max_candidates: usize,
    ) -> Result<Vec<GeneratedKeyword>, ProviderError>;

    /// Model name for metrics/logging.
    fn model_name(&self) -> &str;
}

/// Raw keyword metrics as reported by an advertising platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordMetrics {
    pub search_volume: u64,
    pub cpc_low: f64,
    pub cpc_high: f64,
    pub competition: f64,
}

/// Advertising platform keyword-metrics API.
#[async_trait]
pub trait AdPlatformClient: Send + Sync {
    /// Fetch volume / CPC / competition for one keyword in a market and
    /// language.
    async fn fetch_metrics(
        &self,
        keyword: &str,
        market: &str,
        language: &str,
    ) -> Result<KeywordMetrics, ProviderError>;

    /// Fetch metrics for several keywords in one call. The outer error fails
    /// the whole batch; inner errors fail single keywords. Results are
    /// positional.
    async fn fetch_metrics_batch(
        &self,
        keywords: &[String],
        market: &str,
        language: &str,
    ) -> Result<Vec<Result<KeywordMetrics, ProviderError>>, ProviderError> {
        let mut results = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            results.push(self.fetch_metrics(keyword, market, language).await);
        }
        Ok(results)
    }

    /// Largest batch the platform accepts.
    fn max_batch_size(&self) -> usize {
        1
    }

    fn platform_name(&self) -> &str;
}

/// Text embedding model. Must be deterministic for identical text.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    fn model_name(&self) -> &str;
}

/// Nearest-neighbour hit returned by a vector store query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: String,
    pub similarity: f32,
    pub payload: serde_json::Value,
}

/// Vector index used to persist surviving candidates.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the entry stored under `id`. Repeating an upsert
    /// with the same id never creates a second entry.
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        payload: &serde_json::Value,
    ) -> Result<(), ProviderError>;

    /// The `k` entries most similar to `vector`, best first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, ProviderError>;

    fn backend_name(&self) -> &str;
}
