//! Deterministic offline providers for local runs and tests.
//! Same input always yields the same output, and nothing leaves the process.

use crate::prompts::seed_from_prompt;
use async_trait::async_trait;
use sem_core::providers::{AdPlatformClient, Embedder, GeneratedKeyword, GenerativeModel, KeywordMetrics};
use sem_core::types::title_case;
use sem_core::ProviderError;
use sha2::{Digest, Sha256};

const VARIATIONS: &[&str] = &[
    "buy {}",
    "best {}",
    "cheap {}",
    "{} online",
    "{} store",
    "{} reviews",
    "{} price",
    "top {}",
    "{} deals",
    "{} sale",
    "affordable {}",
    "{} near me",
    "{} service",
    "{} company",
];

fn digest(parts: &[&str]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hasher.finalize().into()
}

fn word(bytes: &[u8], index: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[index * 8..index * 8 + 8]);
    u64::from_le_bytes(buf)
}

// ─── Generative model ───────────────────────────────────────────────────────

/// Expands the seed found in the prompt with fixed commercial modifiers.
#[derive(Debug, Default, Clone)]
pub struct TemplateModel;

impl TemplateModel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GenerativeModel for TemplateModel {
    async fn generate(
        &self,
        prompt: &str,
        max_candidates: usize,
    ) -> Result<Vec<GeneratedKeyword>, ProviderError> {
        let seed = seed_from_prompt(prompt)
            .ok_or_else(|| ProviderError::Malformed("prompt carries no seed".to_string()))?;

        let keywords = std::iter::once(seed.to_string())
            .chain(VARIATIONS.iter().map(|template| template.replace("{}", seed)))
            .take(max_candidates)
            .enumerate()
            .map(|(i, text)| {
                let headline = title_case(&text);
                let description = format!("Find {text} online. Compare options and order today.");
                GeneratedKeyword::text(text)
                    .with_confidence(0.9 - 0.04 * i as f64)
                    .with_ad_copy(
                        &[headline.as_str(), "Compare Top Picks", "Fast Free Delivery"],
                        &[description.as_str(), "Quality picks, fast delivery and easy returns."],
                    )
            })
            .collect();
        Ok(keywords)
    }

    fn model_name(&self) -> &str {
        "template"
    }
}

// ─── Ad platform ────────────────────────────────────────────────────────────

/// Synthesizes stable metrics from a hash of keyword, market and language.
#[derive(Debug, Clone)]
pub struct HashedMetricsPlatform {
    batch_size: usize,
}

impl HashedMetricsPlatform {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

impl Default for HashedMetricsPlatform {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl AdPlatformClient for HashedMetricsPlatform {
    async fn fetch_metrics(
        &self,
        keyword: &str,
        market: &str,
        language: &str,
    ) -> Result<KeywordMetrics, ProviderError> {
        let normalized = keyword.trim().to_lowercase();
        let market = market.trim().to_uppercase();
        let language = language.trim().to_lowercase();
        let hash = digest(&[&normalized, &market, &language]);

        let search_volume = 100 + word(&hash, 0) % 49_900;
        let cpc_low = 0.2 + (word(&hash, 1) % 300) as f64 / 100.0;
        let cpc_high = cpc_low + 0.1 + (word(&hash, 2) % 200) as f64 / 100.0;
        let competition = (word(&hash, 3) % 101) as f64 / 100.0;

        Ok(KeywordMetrics {
            search_volume,
            cpc_low,
            cpc_high,
            competition,
        })
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    fn platform_name(&self) -> &str {
        "hashed"
    }
}

// ─── Embedder ───────────────────────────────────────────────────────────────

/// Feature-hashing embedder over word tokens and character trigrams.
/// Texts sharing most tokens land close together.
#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    dimensions: usize,
}

impl HashedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let hash = digest(&[feature]);
        let index = (word(&hash, 0) % self.dimensions as u64) as usize;
        let sign = if hash[31] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let normalized = text.trim().to_lowercase();
        let mut vector = vec![0.0f32; self.dimensions];

        for token in normalized.split_whitespace() {
            let (index, sign) = self.bucket(&format!("w:{token}"));
            vector[index] += 2.0 * sign;

            let chars: Vec<char> = format!(" {token} ").chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let (index, sign) = self.bucket(&format!("t:{trigram}"));
                vector[index] += sign;
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(ProviderError::Malformed(format!(
                "cannot embed empty text \"{text}\""
            )));
        }
        vector.iter_mut().for_each(|v| *v /= norm);
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "hashed"
    }
}
