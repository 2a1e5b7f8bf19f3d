//! OpenAI-compatible clients for keyword generation and text embeddings.
//!
//! Both clients make a single attempt per call. Retries, backoff and
//! degradation are owned by the pipeline, which sees the classified
//! [`ProviderError`] returned here.

use crate::cache::ResponseCache;
use crate::http::{build_client, send_json};
use crate::parse::parse_keyword_list;
use async_trait::async_trait;
use sem_core::config::{EmbeddingConfig, GeneratorConfig};
use sem_core::providers::{Embedder, GeneratedKeyword, GenerativeModel};
use sem_core::{PipelineError, PipelineResult, ProviderError};
use serde::{Deserialize, Serialize};
use tracing::debug;

const SYSTEM_PROMPT: &str =
    "You are a search engine marketing expert. Respond with JSON only, no commentary.";

const CACHE_MAX_ENTRIES: usize = 10_000;

/// Chat-completions client that turns prompts into keyword proposals.
pub struct OpenAiModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    cache: Option<ResponseCache>,
}

impl OpenAiModel {
    pub fn new(config: &GeneratorConfig) -> PipelineResult<Self> {
        let api_key = require_key(config.api_key.as_deref(), "generator.api_key")?;
        if config.model.trim().is_empty() {
            return Err(PipelineError::Config("generator.model is empty".to_string()));
        }
        let client = build_client(api_key, &[], config.timeout_ms)?;
        let cache = config
            .cache_enabled
            .then(|| ResponseCache::new(config.cache_ttl_secs, CACHE_MAX_ENTRIES));

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            cache,
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let body = send_json(self.client.post(&self.endpoint).json(&request)).await?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("unexpected completion body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::Malformed("completion has no content".to_string()))
    }
}

#[async_trait]
impl GenerativeModel for OpenAiModel {
    async fn generate(
        &self,
        prompt: &str,
        max_candidates: usize,
    ) -> Result<Vec<GeneratedKeyword>, ProviderError> {
        let cache_key = ResponseCache::key(&self.model, prompt);
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&cache_key)) {
            metrics::counter!("generator.cache_hits").increment(1);
            debug!(model = %self.model, "completion served from cache");
            return Ok(cached.into_iter().take(max_candidates).collect());
        }

        metrics::counter!("generator.requests", "model" => self.model.clone()).increment(1);
        let content = self.complete(prompt).await?;
        let keywords = parse_keyword_list(&content)?;

        if let Some(cache) = &self.cache {
            cache.put(cache_key, keywords.clone());
        }
        Ok(keywords.into_iter().take(max_candidates).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Embeddings client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> PipelineResult<Self> {
        let api_key = require_key(config.api_key.as_deref(), "embedding.api_key")?;
        if config.model.trim().is_empty() {
            return Err(PipelineError::Config("embedding.model is empty".to_string()));
        }
        let client = build_client(api_key, &[], config.timeout_ms)?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: [text],
            dimensions: self.dimensions,
        };
        metrics::counter!("embedding.requests", "model" => self.model.clone()).increment(1);
        let body = send_json(self.client.post(&self.endpoint).json(&request)).await?;
        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("unexpected embedding body: {e}")))?;

        let vector = parsed
            .data
            .into_iter()
            .min_by_key(|entry| entry.index)
            .map(|entry| entry.embedding)
            .ok_or_else(|| ProviderError::Malformed("embedding response is empty".to_string()))?;
        if vector.is_empty() {
            return Err(ProviderError::Malformed("embedding has zero dimensions".to_string()));
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn require_key<'a>(key: Option<&'a str>, field: &str) -> PipelineResult<&'a str> {
    match key.map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(PipelineError::Config(format!("missing {field}"))),
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
