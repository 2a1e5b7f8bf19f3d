//! Validity checks and composite scoring. Pure and deterministic.

use crate::context::ScoringRules;
use crate::enricher::EnrichedCandidate;
use sem_core::types::{
    AuditRecord, Candidate, DropReason, MatchTypePolicy, MetricSnapshot, RunState, ScoredCandidate,
};

pub struct Scorer<'a> {
    rules: &'a ScoringRules,
    policy: &'a MatchTypePolicy,
}

impl<'a> Scorer<'a> {
    pub fn new(rules: &'a ScoringRules, policy: &'a MatchTypePolicy) -> Self {
        Self { rules, policy }
    }

    /// Score every candidate, preserving input order. Invalid candidates
    /// come back with score 0.0 and an audit record each.
    pub fn score_all(&self, enriched: Vec<EnrichedCandidate>) -> (Vec<ScoredCandidate>, Vec<AuditRecord>) {
        let mut audit = Vec::new();
        let scored = enriched
            .into_iter()
            .map(|item| {
                let scored = match item.metrics {
                    Ok(metrics) => self.score(item.candidate, Some(metrics)),
                    Err(failure) => invalid(
                        item.candidate,
                        None,
                        DropReason::MetricsUnavailable {
                            cause: failure.cause,
                            attempts: failure.attempts,
                        },
                    ),
                };
                if let Some(reason) = &scored.rejection {
                    let stage = match reason {
                        DropReason::MetricsUnavailable { .. } => RunState::Enriching,
                        _ => RunState::Scoring,
                    };
                    audit.push(AuditRecord {
                        candidate_id: Some(scored.candidate.id.clone()),
                        keyword: scored.candidate.keyword.clone(),
                        stage,
                        reason: reason.clone(),
                    });
                }
                scored
            })
            .collect();
        (scored, audit)
    }

    pub fn score(&self, candidate: Candidate, metrics: Option<MetricSnapshot>) -> ScoredCandidate {
        match self.rejection(&candidate, metrics.as_ref()) {
            Some(reason) => invalid(candidate, metrics, reason),
            None => {
                let score = metrics
                    .as_ref()
                    .map(|m| self.composite(&candidate, m))
                    .unwrap_or(0.0);
                ScoredCandidate {
                    candidate,
                    metrics,
                    score,
                    valid: true,
                    rejection: None,
                }
            }
        }
    }

    /// First failing check wins.
    fn rejection(&self, candidate: &Candidate, metrics: Option<&MetricSnapshot>) -> Option<DropReason> {
        let Some(metrics) = metrics else {
            return Some(DropReason::MetricsUnavailable {
                cause: "no metrics".to_string(),
                attempts: 0,
            });
        };
        if metrics.search_volume == 0 {
            return Some(DropReason::ZeroVolume);
        }
        if !self.policy.allows(candidate.match_type) {
            return Some(DropReason::MatchTypeNotAllowed {
                match_type: candidate.match_type,
            });
        }
        if metrics.search_volume < self.rules.min_search_volume {
            return Some(DropReason::BelowMinVolume {
                volume: metrics.search_volume,
                min: self.rules.min_search_volume,
            });
        }
        let words = candidate.word_count();
        if words > self.rules.max_words {
            return Some(DropReason::TooManyWords {
                words,
                max: self.rules.max_words,
            });
        }
        if candidate.keyword.chars().count() <= 1 {
            return Some(DropReason::TooShort);
        }
        None
    }

    fn composite(&self, candidate: &Candidate, metrics: &MetricSnapshot) -> f64 {
        let weights = &self.rules.weights;
        let volume = volume_component(metrics.search_volume, self.rules.volume_ceiling);
        let cpc = cpc_component(metrics.mid_cpc(), self.rules.cpc_ceiling);
        let confidence = candidate.confidence.clamp(0.0, 1.0);
        weights.volume_weight * volume + weights.cpc_weight * cpc + weights.confidence_weight * confidence
    }
}

/// ln(1+volume) / ln(1+ceiling), capped at 1.
fn volume_component(volume: u64, ceiling: u64) -> f64 {
    let ceiling = (ceiling.max(1) as f64).ln_1p();
    ((volume as f64).ln_1p() / ceiling).min(1.0)
}

/// Cheaper clicks score higher; at or above the ceiling scores 0.
fn cpc_component(mid_cpc: f64, ceiling: f64) -> f64 {
    if ceiling <= 0.0 {
        return 0.0;
    }
    1.0 - (mid_cpc.max(0.0) / ceiling).min(1.0)
}

fn invalid(candidate: Candidate, metrics: Option<MetricSnapshot>, reason: DropReason) -> ScoredCandidate {
    ScoredCandidate {
        candidate,
        metrics,
        score: 0.0,
        valid: false,
        rejection: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enricher::EnrichmentFailure;
    use chrono::Utc;
    use sem_core::types::{AdCopy, MatchType, ScoreWeights, SearchIntent};

    fn candidate(keyword: &str, match_type: MatchType, confidence: f64) -> Candidate {
        Candidate {
            id: format!("id-{keyword}"),
            ordinal: 0,
            keyword: keyword.to_string(),
            seed_index: 0,
            seed: "shoes".to_string(),
            match_type,
            confidence,
            intent: SearchIntent::Commercial,
            ad_copy: AdCopy::default(),
        }
    }

    fn metrics(volume: u64, low: f64, high: f64) -> MetricSnapshot {
        MetricSnapshot {
            candidate_id: "id".to_string(),
            search_volume: volume,
            cpc_low: low,
            cpc_high: high,
            competition: 0.4,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_composite_score() {
        let rules = ScoringRules::default();
        let policy = MatchTypePolicy::allow_all();
        let scorer = Scorer::new(&rules, &policy);

        // volume at the ceiling, free clicks, full confidence
        let scored = scorer.score(
            candidate("running shoes", MatchType::Broad, 1.0),
            Some(metrics(100_000, 0.0, 0.0)),
        );
        assert!(scored.valid);
        assert!((scored.score - 1.0).abs() < 1e-9);

        // volume above the ceiling is capped, cpc above ceiling scores 0
        let scored = scorer.score(
            candidate("running shoes", MatchType::Broad, 0.5),
            Some(metrics(5_000_000, 30.0, 50.0)),
        );
        assert!((scored.score - (0.4 + 0.3 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_only_weights() {
        let rules = ScoringRules {
            weights: ScoreWeights::new(0.0, 0.0, 1.0).unwrap(),
            ..ScoringRules::default()
        };
        let policy = MatchTypePolicy::allow_all();
        let scored = Scorer::new(&rules, &policy).score(
            candidate("trail shoes", MatchType::Phrase, 0.8),
            Some(metrics(10, 1.0, 2.0)),
        );
        assert!((scored.score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_rejection_order() {
        let rules = ScoringRules {
            min_search_volume: 50,
            ..ScoringRules::default()
        };
        let policy = MatchTypePolicy::only([MatchType::Exact]);
        let scorer = Scorer::new(&rules, &policy);

        let zero = scorer.score(candidate("shoes", MatchType::Broad, 0.5), Some(metrics(0, 1.0, 1.0)));
        assert_eq!(zero.rejection, Some(DropReason::ZeroVolume));
        assert_eq!(zero.score, 0.0);

        let wrong_type = scorer.score(candidate("shoes", MatchType::Broad, 0.5), Some(metrics(10, 1.0, 1.0)));
        assert_eq!(
            wrong_type.rejection,
            Some(DropReason::MatchTypeNotAllowed {
                match_type: MatchType::Broad
            })
        );

        let low = scorer.score(candidate("shoes", MatchType::Exact, 0.5), Some(metrics(10, 1.0, 1.0)));
        assert_eq!(low.rejection, Some(DropReason::BelowMinVolume { volume: 10, min: 50 }));

        let long = scorer.score(
            candidate("very long tail keyword for running shoes", MatchType::Exact, 0.5),
            Some(metrics(500, 1.0, 1.0)),
        );
        assert_eq!(long.rejection, Some(DropReason::TooManyWords { words: 7, max: 6 }));

        let short = scorer.score(candidate("x", MatchType::Exact, 0.5), Some(metrics(500, 1.0, 1.0)));
        assert_eq!(short.rejection, Some(DropReason::TooShort));
    }

    #[test]
    fn test_score_all_audits_and_preserves_order() {
        let rules = ScoringRules::default();
        let policy = MatchTypePolicy::allow_all();
        let enriched = vec![
            EnrichedCandidate {
                candidate: candidate("a shoes", MatchType::Broad, 0.5),
                metrics: Err(EnrichmentFailure {
                    cause: "timeout".to_string(),
                    attempts: 3,
                }),
            },
            EnrichedCandidate {
                candidate: candidate("b shoes", MatchType::Broad, 0.5),
                metrics: Ok(metrics(100, 1.0, 2.0)),
            },
        ];
        let (scored, audit) = Scorer::new(&rules, &policy).score_all(enriched.clone());
        assert_eq!(scored[0].candidate.keyword, "a shoes");
        assert!(!scored[0].valid);
        assert!(scored[0].metrics.is_none());
        assert!(scored[1].valid);
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].stage, RunState::Enriching);
        assert_eq!(
            audit[0].reason,
            DropReason::MetricsUnavailable {
                cause: "timeout".to_string(),
                attempts: 3
            }
        );

        // same input, same output
        let (again, _) = Scorer::new(&rules, &policy).score_all(enriched);
        assert_eq!(scored[1].score, again[1].score);
    }
}
