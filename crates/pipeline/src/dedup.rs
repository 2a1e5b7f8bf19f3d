//! Embedding-based near-duplicate removal.
//!
//! Greedy single-linkage: candidates are visited best first and join the
//! first cluster whose representative is similar enough, otherwise they
//! found a new one. Clusters live in an index arena over the visit order.

use futures::stream::{self, StreamExt, TryStreamExt};
use sem_core::providers::Embedder;
use sem_core::types::{DiscardedCandidate, DuplicateCluster, EmbeddingVector, ScoredCandidate};
use sem_core::{PipelineError, PipelineResult, ProviderError};
use std::cmp::Ordering;
use tracing::{debug, info};

/// A surviving candidate with the embedding it was compared by.
#[derive(Debug, Clone, PartialEq)]
pub struct Representative {
    pub scored: ScoredCandidate,
    pub embedding: EmbeddingVector,
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// In processing order: score descending, ordinal ascending.
    pub representatives: Vec<Representative>,
    pub clusters: Vec<DuplicateCluster>,
    pub discarded: Vec<DiscardedCandidate>,
}

/// Arena slot: indices into the sorted candidate list.
#[derive(Debug, Clone)]
struct ClusterSlot {
    representative: usize,
    members: Vec<usize>,
}

pub struct Deduplicator {
    threshold: f32,
    max_concurrency: usize,
}

impl Deduplicator {
    pub fn new(threshold: f32, max_concurrency: usize) -> Self {
        Self {
            threshold,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Embed the valid candidates and cluster them. Invalid candidates are
    /// ignored.
    pub async fn deduplicate(
        &self,
        scored: &[ScoredCandidate],
        embedder: &dyn Embedder,
    ) -> PipelineResult<DedupOutcome> {
        let valid: Vec<&ScoredCandidate> = scored.iter().filter(|s| s.valid).collect();

        let embeddings: Vec<EmbeddingVector> = stream::iter(valid.iter())
            .map(|candidate| async move {
                embedder
                    .embed(&candidate.candidate.keyword)
                    .await
                    .map(EmbeddingVector)
                    .map_err(|e| PipelineError::from_provider(e, PipelineError::Embedding))
            })
            .buffered(self.max_concurrency)
            .try_collect()
            .await?;

        check_dimensions(&embeddings)?;

        let items: Vec<(ScoredCandidate, EmbeddingVector)> = valid
            .into_iter()
            .cloned()
            .zip(embeddings)
            .collect();
        let outcome = cluster(items, self.threshold);

        metrics::counter!("dedup.discarded").increment(outcome.discarded.len() as u64);
        info!(
            representatives = outcome.representatives.len(),
            discarded = outcome.discarded.len(),
            model = embedder.model_name(),
            "Deduplication complete"
        );
        Ok(outcome)
    }
}

fn check_dimensions(embeddings: &[EmbeddingVector]) -> PipelineResult<()> {
    let Some(first) = embeddings.first() else {
        return Ok(());
    };
    let dim = first.dim();
    if dim == 0 {
        return Err(PipelineError::Embedding(ProviderError::Malformed(
            "embedding has zero dimensions".to_string(),
        )));
    }
    if let Some(other) = embeddings.iter().find(|e| e.dim() != dim) {
        return Err(PipelineError::Embedding(ProviderError::Malformed(format!(
            "embedding dimensions differ: {dim} and {}",
            other.dim()
        ))));
    }
    Ok(())
}

/// Score descending, generation ordinal ascending.
pub fn rank_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.candidate.ordinal.cmp(&b.candidate.ordinal))
}

/// Cluster embedded candidates. Deterministic for a given input set.
pub fn cluster(mut items: Vec<(ScoredCandidate, EmbeddingVector)>, threshold: f32) -> DedupOutcome {
    items.sort_by(|a, b| rank_order(&a.0, &b.0));

    let mut arena: Vec<ClusterSlot> = Vec::new();
    let mut joined: Vec<Option<(usize, f32)>> = vec![None; items.len()];

    for index in 0..items.len() {
        let hit = arena.iter().enumerate().find_map(|(slot_index, slot)| {
            let similarity = items[index].1.cosine(&items[slot.representative].1);
            (similarity >= threshold).then_some((slot_index, similarity))
        });
        match hit {
            Some((slot_index, similarity)) => {
                arena[slot_index].members.push(index);
                joined[index] = Some((slot_index, similarity));
                debug!(
                    keyword = %items[index].0.candidate.keyword,
                    similarity,
                    "Near duplicate"
                );
            }
            None => arena.push(ClusterSlot {
                representative: index,
                members: vec![index],
            }),
        }
    }

    let clusters = arena
        .iter()
        .map(|slot| DuplicateCluster {
            representative_id: items[slot.representative].0.candidate.id.clone(),
            member_ids: slot
                .members
                .iter()
                .map(|&m| items[m].0.candidate.id.clone())
                .collect(),
        })
        .collect();

    let mut outcome = DedupOutcome {
        clusters,
        ..DedupOutcome::default()
    };
    let representatives: Vec<usize> = arena.iter().map(|slot| slot.representative).collect();
    let winners: Vec<(String, String)> = items
        .iter()
        .map(|(s, _)| (s.candidate.id.clone(), s.candidate.keyword.clone()))
        .collect();

    for (index, (scored, embedding)) in items.into_iter().enumerate() {
        match joined[index] {
            None => outcome.representatives.push(Representative { scored, embedding }),
            Some((slot_index, similarity)) => {
                let (id, keyword) = &winners[representatives[slot_index]];
                outcome.discarded.push(DiscardedCandidate {
                    candidate: scored,
                    duplicate_of: id.clone(),
                    duplicate_of_keyword: keyword.clone(),
                    similarity,
                });
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use sem_core::types::{AdCopy, Candidate, MatchType, SearchIntent};
    use sem_core::vector::cosine_similarity;

    fn scored(ordinal: u32, keyword: &str, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            candidate: Candidate {
                id: format!("id-{ordinal}"),
                ordinal,
                keyword: keyword.to_string(),
                seed_index: 0,
                seed: "shoes".to_string(),
                match_type: MatchType::Broad,
                confidence: 0.5,
                intent: SearchIntent::Commercial,
                ad_copy: AdCopy::default(),
            },
            metrics: None,
            score,
            valid: true,
            rejection: None,
        }
    }

    #[test]
    fn test_best_candidate_represents_cluster() {
        let items = vec![
            (scored(0, "running shoe", 0.6), EmbeddingVector(vec![1.0, 0.05])),
            (scored(1, "running shoes", 0.8), EmbeddingVector(vec![1.0, 0.0])),
            (scored(2, "garden hose", 0.7), EmbeddingVector(vec![0.0, 1.0])),
        ];
        let outcome = cluster(items, 0.95);

        let kept: Vec<&str> = outcome
            .representatives
            .iter()
            .map(|r| r.scored.candidate.keyword.as_str())
            .collect();
        assert_eq!(kept, vec!["running shoes", "garden hose"]);
        assert_eq!(outcome.discarded.len(), 1);
        assert_eq!(outcome.discarded[0].duplicate_of, "id-1");
        assert_eq!(outcome.discarded[0].duplicate_of_keyword, "running shoes");
        assert!(outcome.discarded[0].similarity >= 0.95);
        assert_eq!(outcome.clusters[0].member_ids, vec!["id-1", "id-0"]);
    }

    #[test]
    fn test_ties_broken_by_ordinal() {
        let items = vec![
            (scored(3, "b", 0.5), EmbeddingVector(vec![1.0, 0.0])),
            (scored(1, "a", 0.5), EmbeddingVector(vec![1.0, 0.0])),
        ];
        let outcome = cluster(items, 0.9);
        assert_eq!(outcome.representatives[0].scored.candidate.ordinal, 1);
    }

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            match text {
                "broken" => Ok(vec![1.0, 0.0, 0.0]),
                "auth" => Err(ProviderError::Auth("no key".into())),
                _ => Ok(vec![1.0, 0.0]),
            }
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_embedding_error() {
        let input = vec![scored(0, "shoes", 0.5), scored(1, "broken", 0.4)];
        let err = Deduplicator::new(0.9, 2)
            .deduplicate(&input, &FixedEmbedder)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_invalid_candidates_skipped_and_auth_is_config() {
        let mut invalid = scored(1, "auth", 0.0);
        invalid.valid = false;
        let outcome = Deduplicator::new(0.9, 2)
            .deduplicate(&[scored(0, "shoes", 0.5), invalid.clone()], &FixedEmbedder)
            .await
            .unwrap();
        assert_eq!(outcome.representatives.len(), 1);

        invalid.valid = true;
        let err = Deduplicator::new(0.9, 2)
            .deduplicate(&[invalid], &FixedEmbedder)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    fn arb_items() -> impl Strategy<Value = Vec<(ScoredCandidate, EmbeddingVector)>> {
        prop::collection::vec(
            (0u8..=10, prop::collection::vec(-1.0f32..1.0, 3)),
            1..25,
        )
        .prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (score, mut vector))| {
                    if vector.iter().all(|v| *v == 0.0) {
                        vector[0] = 1.0;
                    }
                    (
                        scored(i as u32, &format!("kw {i}"), score as f64 / 10.0),
                        EmbeddingVector(vector),
                    )
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_survivors_are_not_duplicates(items in arb_items(), threshold in 0.5f32..0.99) {
            let outcome = cluster(items, threshold);
            let reps = &outcome.representatives;
            for i in 0..reps.len() {
                for j in (i + 1)..reps.len() {
                    let similarity = cosine_similarity(reps[i].embedding.as_slice(), reps[j].embedding.as_slice());
                    prop_assert!(similarity < threshold);
                }
            }
        }

        #[test]
        fn prop_representative_has_best_score(items in arb_items(), threshold in 0.5f32..0.99) {
            let total = items.len();
            let outcome = cluster(items, threshold);
            prop_assert_eq!(outcome.representatives.len() + outcome.discarded.len(), total);
            prop_assert_eq!(outcome.clusters.len(), outcome.representatives.len());

            for discarded in &outcome.discarded {
                let winner = outcome
                    .representatives
                    .iter()
                    .find(|r| r.scored.candidate.id == discarded.duplicate_of);
                prop_assert!(winner.is_some());
                let winner = winner.unwrap();
                prop_assert!(winner.scored.score >= discarded.candidate.score);
                prop_assert!(discarded.similarity >= threshold);
            }
            for cluster in &outcome.clusters {
                prop_assert_eq!(&cluster.member_ids[0], &cluster.representative_id);
            }
        }
    }
}
