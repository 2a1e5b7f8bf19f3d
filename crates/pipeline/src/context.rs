//! Per-run settings and provider handles passed explicitly to the orchestrator.

use crate::retry::RetryPolicy;
use sem_core::providers::{AdPlatformClient, Embedder, GenerativeModel, VectorStore};
use sem_core::types::{GroupingPolicy, ScoreWeights};
use sem_core::{AppConfig, PipelineError, PipelineResult};
use std::sync::Arc;

/// Scoring bounds and filters.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringRules {
    pub weights: ScoreWeights,
    pub volume_ceiling: u64,
    pub cpc_ceiling: f64,
    pub min_search_volume: u64,
    pub max_words: usize,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            volume_ceiling: 100_000,
            cpc_ceiling: 20.0,
            min_search_volume: 0,
            max_words: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub max_seeds: usize,
    pub max_concurrency: usize,
    pub candidates_per_seed: usize,
    pub default_confidence: f64,
    pub scoring: ScoringRules,
    pub similarity_threshold: f32,
    pub grouping: GroupingPolicy,
    pub max_plan_keywords: usize,
    pub conversion_rate: f64,
    pub retry: RetryPolicy,
}

impl Default for RunContext {
    fn default() -> Self {
        // AppConfig defaults always validate
        Self::from_parts(&AppConfig::default(), ScoreWeights::default())
    }
}

impl RunContext {
    pub fn from_config(config: &AppConfig) -> PipelineResult<Self> {
        config.validate()?;
        if config.generator.candidates_per_seed == 0 {
            return Err(PipelineError::Config(
                "generator.candidates_per_seed must be at least 1".to_string(),
            ));
        }
        let weights = config.scoring.weights()?;
        Ok(Self::from_parts(config, weights))
    }

    fn from_parts(config: &AppConfig, weights: ScoreWeights) -> Self {
        Self {
            max_seeds: config.pipeline.max_seeds,
            max_concurrency: config.pipeline.max_concurrency.max(1),
            candidates_per_seed: config.generator.candidates_per_seed,
            default_confidence: config.generator.default_confidence.clamp(0.0, 1.0),
            scoring: ScoringRules {
                weights,
                volume_ceiling: config.scoring.volume_ceiling.max(1),
                cpc_ceiling: config.scoring.cpc_ceiling,
                min_search_volume: config.scoring.min_search_volume,
                max_words: config.scoring.max_words,
            },
            similarity_threshold: config.dedup.similarity_threshold,
            grouping: config.pipeline.grouping,
            max_plan_keywords: config.pipeline.max_plan_keywords,
            conversion_rate: config.bids.conversion_rate,
            retry: RetryPolicy::from(&config.retry),
        }
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> PipelineResult<Self> {
        weights.validate()?;
        self.scoring.weights = weights;
        Ok(self)
    }
}

/// The four external collaborators of a run.
#[derive(Clone)]
pub struct Providers {
    pub model: Arc<dyn GenerativeModel>,
    pub ads: Arc<dyn AdPlatformClient>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_from_default_config() {
        let context = RunContext::from_config(&AppConfig::default()).unwrap();
        assert_eq!(context, RunContext::default());
        assert_eq!(context.candidates_per_seed, 25);
        assert_eq!(context.retry.max_attempts, 3);
        assert_eq!(context.max_plan_keywords, 150);
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let mut config = AppConfig::default();
        config.scoring.cpc_weight = 0.6;
        assert!(matches!(
            RunContext::from_config(&config),
            Err(PipelineError::Config(_))
        ));
        assert!(RunContext::default()
            .with_weights(ScoreWeights {
                volume_weight: 0.0,
                cpc_weight: 0.0,
                confidence_weight: 0.5,
            })
            .is_err());
    }
}
