//! Candidate generation: one model call per seed, fanned out with bounded
//! concurrency and joined back in seed order.

use crate::context::RunContext;
use crate::normalizer::normalize_term;
use crate::retry::{Attempted, RetryPolicy};
use futures::stream::{self, StreamExt};
use sem_core::hashing::candidate_id;
use sem_core::providers::{GeneratedKeyword, GenerativeModel};
use sem_core::types::{
    AdCopy, AuditRecord, CampaignBrief, Candidate, DropReason, MatchType, RunState, SearchIntent,
};
use sem_core::{PipelineError, ProviderError};
use sem_providers::prompts::KeywordPrompt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct GenerationOutcome {
    /// Ordinals are contiguous from 0 in seed order, then model order.
    pub candidates: Vec<Candidate>,
    pub audit: Vec<AuditRecord>,
}

pub struct CandidateGenerator {
    candidates_per_seed: usize,
    default_confidence: f64,
    max_concurrency: usize,
    retry: RetryPolicy,
}

impl CandidateGenerator {
    pub fn new(context: &RunContext) -> Self {
        Self {
            candidates_per_seed: context.candidates_per_seed,
            default_confidence: context.default_confidence,
            max_concurrency: context.max_concurrency,
            retry: context.retry.clone(),
        }
    }

    /// Generate candidates for every seed of a normalized brief.
    ///
    /// A seed that keeps failing, or whose answers hold no usable keyword,
    /// is dropped with an audit record. The stage fails only when every seed
    /// fails, or immediately on an auth error. `attempts` is the largest
    /// attempt count spent on any seed.
    pub async fn generate(
        &self,
        brief: &CampaignBrief,
        model: &dyn GenerativeModel,
    ) -> Attempted<GenerationOutcome, PipelineError> {
        let allowed: Vec<MatchType> = brief.match_types.allowed.iter().copied().collect();

        let per_seed: Vec<(u32, Result<Vec<GeneratedKeyword>, ProviderError>)> =
            stream::iter(brief.seeds.iter())
                .map(|seed| {
                    let prompt = KeywordPrompt {
                        seed,
                        market: &brief.market,
                        language: &brief.language,
                        count: self.candidates_per_seed,
                        brand_terms: &brief.brand_terms,
                        match_types: &allowed,
                    }
                    .render();
                    let count = self.candidates_per_seed;
                    async move {
                        let prompt = prompt.as_str();
                        let attempted = self
                            .retry
                            .run("generate", is_retryable, move || async move {
                                let proposals = model.generate(prompt, count).await?;
                                if proposals.iter().all(|p| normalize_term(&p.text).is_empty()) {
                                    return Err(ProviderError::Malformed(
                                        "model returned no keywords".to_string(),
                                    ));
                                }
                                Ok(proposals)
                            })
                            .await;
                        (attempted.attempts, attempted.result)
                    }
                })
                .buffered(self.max_concurrency)
                .collect()
                .await;

        let mut outcome = GenerationOutcome::default();
        let mut first_seen: HashMap<String, u32> = HashMap::new();
        let mut last_error = None;
        let mut failed_seeds = 0usize;
        let mut max_attempts_used = 0;

        for (seed_index, (attempts, result)) in per_seed.into_iter().enumerate() {
            let seed = &brief.seeds[seed_index];
            max_attempts_used = max_attempts_used.max(attempts);

            let proposals = match result {
                Ok(proposals) => proposals,
                Err(err) if err.is_auth() => {
                    return Attempted {
                        result: Err(PipelineError::Config(err.to_string())),
                        attempts,
                    };
                }
                Err(err) => {
                    warn!(seed = %seed, attempts, error = %err, "Seed generation failed, dropping seed");
                    outcome.audit.push(AuditRecord {
                        candidate_id: None,
                        keyword: seed.clone(),
                        stage: RunState::Generating,
                        reason: DropReason::GenerationFailed {
                            cause: err.to_string(),
                            attempts,
                        },
                    });
                    failed_seeds += 1;
                    last_error = Some(err);
                    continue;
                }
            };

            let mut accepted = 0usize;
            for proposal in proposals.into_iter().take(self.candidates_per_seed) {
                let keyword = normalize_term(&proposal.text);
                if keyword.is_empty() {
                    continue;
                }
                let id = candidate_id(&brief.market, &brief.language, &keyword);

                if let Some(first_ordinal) = first_seen.get(&keyword) {
                    outcome.audit.push(AuditRecord {
                        candidate_id: Some(id),
                        keyword,
                        stage: RunState::Generating,
                        reason: DropReason::DuplicateText {
                            first_ordinal: *first_ordinal,
                        },
                    });
                    continue;
                }

                let ordinal = outcome.candidates.len() as u32;
                let intent = SearchIntent::classify(&keyword, &brief.brand_terms);
                let confidence = proposal
                    .confidence
                    .filter(|c| c.is_finite())
                    .unwrap_or(self.default_confidence)
                    .clamp(0.0, 1.0);
                let (ad_copy, too_long) = AdCopy::fit(&proposal.headlines, &proposal.descriptions);
                if too_long > 0 {
                    warn!(keyword = %keyword, too_long, "Dropped ad copy over the length limits");
                    metrics::counter!("generator.ad_copy_rejected").increment(too_long as u64);
                }
                let ad_copy = ad_copy.or_fallback(&keyword);
                first_seen.insert(keyword.clone(), ordinal);
                outcome.candidates.push(Candidate {
                    id,
                    ordinal,
                    keyword,
                    seed_index,
                    seed: seed.clone(),
                    match_type: proposal
                        .match_type
                        .unwrap_or_else(|| intent.default_match_type()),
                    confidence,
                    intent,
                    ad_copy,
                });
                accepted += 1;
            }
            debug!(seed = %seed, accepted, "Seed generated");
        }

        if failed_seeds == brief.seeds.len() {
            if let Some(err) = last_error {
                return Attempted {
                    result: Err(PipelineError::Generation(err)),
                    attempts: max_attempts_used,
                };
            }
        }

        metrics::counter!("generator.candidates").increment(outcome.candidates.len() as u64);
        info!(
            seeds = brief.seeds.len(),
            failed_seeds,
            candidates = outcome.candidates.len(),
            model = model.model_name(),
            "Generation complete"
        );
        Attempted {
            result: Ok(outcome),
            attempts: max_attempts_used,
        }
    }
}

/// Generation retries malformed output as well as transient failures.
fn is_retryable(err: &ProviderError) -> bool {
    err.is_transient() || matches!(err, ProviderError::Malformed(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sem_providers::prompts::seed_from_prompt;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Answers from a per-seed script; unknown seeds fail as unavailable.
    struct ScriptedModel {
        answers: HashMap<String, Result<Vec<GeneratedKeyword>, ProviderError>>,
        calls: AtomicU32,
    }

    impl ScriptedModel {
        fn new(answers: Vec<(&str, Result<Vec<GeneratedKeyword>, ProviderError>)>) -> Self {
            Self {
                answers: answers
                    .into_iter()
                    .map(|(seed, answer)| (seed.to_string(), answer))
                    .collect(),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerativeModel for ScriptedModel {
        async fn generate(
            &self,
            prompt: &str,
            _max_candidates: usize,
        ) -> Result<Vec<GeneratedKeyword>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let seed = seed_from_prompt(prompt).unwrap_or_default();
            self.answers
                .get(seed)
                .cloned()
                .unwrap_or_else(|| Err(ProviderError::Unavailable("no script".into())))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn generator() -> CandidateGenerator {
        CandidateGenerator::new(&RunContext {
            retry: RetryPolicy::immediate(2),
            ..RunContext::default()
        })
    }

    fn brief(seeds: &[&str]) -> CampaignBrief {
        crate::normalizer::normalize_brief(&CampaignBrief::new("US", "en", seeds), 50).unwrap()
    }

    #[tokio::test]
    async fn test_ordinals_follow_seed_then_model_order() {
        let model = ScriptedModel::new(vec![
            (
                "running shoes",
                Ok(vec![
                    GeneratedKeyword::text("Running Shoes").with_confidence(0.9),
                    GeneratedKeyword::text("buy running shoes"),
                ]),
            ),
            (
                "trail shoes",
                Ok(vec![
                    GeneratedKeyword::text("trail shoes").with_match_type(MatchType::Exact),
                    GeneratedKeyword::text("running  shoes"),
                ]),
            ),
        ]);
        let outcome = generator()
            .generate(&brief(&["running shoes", "trail shoes"]), &model)
            .await
            .result
            .unwrap();

        let keywords: Vec<&str> = outcome.candidates.iter().map(|c| c.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["running shoes", "buy running shoes", "trail shoes"]);
        let ordinals: Vec<u32> = outcome.candidates.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);

        assert_eq!(outcome.candidates[1].confidence, 0.5);
        assert_eq!(outcome.candidates[1].intent, SearchIntent::Transactional);
        assert_eq!(outcome.candidates[1].match_type, MatchType::Broad);
        assert_eq!(outcome.candidates[2].match_type, MatchType::Exact);
        assert_eq!(outcome.candidates[2].seed_index, 1);

        assert_eq!(outcome.audit.len(), 1);
        assert_eq!(
            outcome.audit[0].reason,
            DropReason::DuplicateText { first_ordinal: 0 }
        );
    }

    #[tokio::test]
    async fn test_failing_seed_degrades() {
        let model = ScriptedModel::new(vec![(
            "running shoes",
            Ok(vec![GeneratedKeyword::text("running shoes")]),
        )]);
        let attempted = generator()
            .generate(&brief(&["running shoes", "trail shoes"]), &model)
            .await;
        assert_eq!(attempted.attempts, 2);
        let outcome = attempted.result.unwrap();

        assert_eq!(outcome.candidates.len(), 1);
        assert!(matches!(
            outcome.audit[0].reason,
            DropReason::GenerationFailed { attempts: 2, .. }
        ));
        // one call for the good seed, two for the failing one
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_all_seeds_failing_fails_stage() {
        let model = ScriptedModel::new(vec![]);
        let attempted = generator().generate(&brief(&["running shoes"]), &model).await;
        assert_eq!(attempted.attempts, 2);
        let err = attempted.result.unwrap_err();
        assert!(matches!(err, PipelineError::Generation(ProviderError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal_without_retry() {
        let model = ScriptedModel::new(vec![(
            "running shoes",
            Err(ProviderError::Auth("invalid key".into())),
        )]);
        let attempted = generator().generate(&brief(&["running shoes"]), &model).await;
        assert_eq!(attempted.attempts, 1);
        assert!(matches!(attempted.result, Err(PipelineError::Config(_))));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_confidence_clamped() {
        let model = ScriptedModel::new(vec![(
            "shoes",
            Ok(vec![
                GeneratedKeyword::text("shoes").with_confidence(3.0),
                GeneratedKeyword::text("shoe store").with_confidence(-1.0),
            ]),
        )]);
        let outcome = generator().generate(&brief(&["shoes"]), &model).await.result.unwrap();
        assert_eq!(outcome.candidates[0].confidence, 1.0);
        assert_eq!(outcome.candidates[1].confidence, 0.0);
    }

    #[tokio::test]
    async fn test_empty_answer_is_retried_then_audited() {
        let model = ScriptedModel::new(vec![
            ("running shoes", Ok(vec![GeneratedKeyword::text("running shoes")])),
            ("trail shoes", Ok(vec![])),
            ("hiking boots", Ok(vec![GeneratedKeyword::text("  "), GeneratedKeyword::text("")])),
        ]);
        let attempted = generator()
            .generate(&brief(&["running shoes", "trail shoes", "hiking boots"]), &model)
            .await;
        assert_eq!(attempted.attempts, 2);
        let outcome = attempted.result.unwrap();

        assert_eq!(outcome.candidates.len(), 1);
        let failed: Vec<&str> = outcome
            .audit
            .iter()
            .filter(|a| {
                matches!(
                    &a.reason,
                    DropReason::GenerationFailed { attempts: 2, cause } if cause.contains("no keywords")
                )
            })
            .map(|a| a.keyword.as_str())
            .collect();
        assert_eq!(failed, vec!["trail shoes", "hiking boots"]);
        // one call for the good seed, two for each empty one
        assert_eq!(model.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_only_empty_answers_fail_stage() {
        let model = ScriptedModel::new(vec![("shoes", Ok(vec![]))]);
        let attempted = generator().generate(&brief(&["shoes"]), &model).await;
        assert!(matches!(
            attempted.result,
            Err(PipelineError::Generation(ProviderError::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn test_ad_copy_limits_and_fallback() {
        let model = ScriptedModel::new(vec![(
            "trail shoes",
            Ok(vec![
                GeneratedKeyword::text("trail shoes").with_ad_copy(
                    &["Trail Shoes In Stock", "Waterproof Trail Running Shoes For Every Season"],
                    &["Grip and comfort on every trail. Free returns."],
                ),
                GeneratedKeyword::text("trail shoes sale"),
            ]),
        )]);
        let outcome = generator()
            .generate(&brief(&["trail shoes"]), &model)
            .await
            .result
            .unwrap();

        let copy = &outcome.candidates[0].ad_copy;
        assert_eq!(copy.headlines, vec!["Trail Shoes In Stock"]);
        assert_eq!(copy.descriptions, vec!["Grip and comfort on every trail. Free returns."]);

        let fallback = &outcome.candidates[1].ad_copy;
        assert_eq!(fallback.headlines[0], "Trail Shoes Sale");
        assert!(!fallback.descriptions.is_empty());
    }
}
