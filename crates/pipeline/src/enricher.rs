//! Metrics enrichment against the ad platform.
//!
//! Candidates are chunked by the platform's batch size and batches run
//! concurrently. A batch that keeps failing falls back to per-keyword
//! lookups; keywords that still fail carry their cause forward so the
//! scorer can audit them. Only authentication failures abort the stage.

use crate::retry::RetryPolicy;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use sem_core::providers::{AdPlatformClient, KeywordMetrics};
use sem_core::types::{Candidate, MetricSnapshot};
use sem_core::{PipelineError, PipelineResult, ProviderError};
use tracing::{debug, info, warn};

/// Why a candidate has no metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentFailure {
    pub cause: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedCandidate {
    pub candidate: Candidate,
    pub metrics: Result<MetricSnapshot, EnrichmentFailure>,
}

pub struct MetricsEnricher {
    max_concurrency: usize,
    retry: RetryPolicy,
}

type Lookup = Result<KeywordMetrics, (ProviderError, u32)>;

impl MetricsEnricher {
    pub fn new(max_concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            retry,
        }
    }

    /// Enrich candidates in order. The output is positional.
    pub async fn enrich(
        &self,
        candidates: Vec<Candidate>,
        market: &str,
        language: &str,
        platform: &dyn AdPlatformClient,
    ) -> PipelineResult<Vec<EnrichedCandidate>> {
        let batch_size = platform.max_batch_size().max(1);
        let keywords: Vec<String> = candidates.iter().map(|c| c.keyword.clone()).collect();

        let batches: Vec<Vec<Lookup>> = stream::iter(keywords.chunks(batch_size))
            .map(|chunk| self.fetch_batch(chunk, market, language, platform))
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let fetched_at = Utc::now();
        let mut failures = 0u64;
        let mut enriched = Vec::with_capacity(candidates.len());
        for (candidate, lookup) in candidates.into_iter().zip(batches.into_iter().flatten()) {
            let metrics = match lookup {
                Ok(raw) => Ok(snapshot(&candidate, raw, fetched_at)),
                Err((err, _)) if err.is_auth() => {
                    return Err(PipelineError::Config(err.to_string()));
                }
                Err((err, attempts)) => {
                    warn!(keyword = %candidate.keyword, attempts, error = %err, "Metrics unavailable");
                    failures += 1;
                    Err(EnrichmentFailure {
                        cause: PipelineError::Enrichment {
                            keyword: candidate.keyword.clone(),
                            source: err,
                        }
                        .to_string(),
                        attempts,
                    })
                }
            };
            enriched.push(EnrichedCandidate { candidate, metrics });
        }

        metrics::counter!("enricher.failures").increment(failures);
        info!(
            candidates = enriched.len(),
            failures,
            platform = platform.platform_name(),
            "Enrichment complete"
        );
        Ok(enriched)
    }

    async fn fetch_batch(
        &self,
        chunk: &[String],
        market: &str,
        language: &str,
        platform: &dyn AdPlatformClient,
    ) -> Vec<Lookup> {
        let batch = self
            .retry
            .run("fetch_metrics_batch", ProviderError::is_transient, || {
                platform.fetch_metrics_batch(chunk, market, language)
            })
            .await;

        let batch_attempts = batch.attempts;
        let per_keyword: Vec<Option<Result<KeywordMetrics, ProviderError>>> = match batch.result {
            Ok(results) if results.len() == chunk.len() => results.into_iter().map(Some).collect(),
            Ok(results) => {
                warn!(
                    expected = chunk.len(),
                    got = results.len(),
                    "Batch result count mismatch, looking up keywords individually"
                );
                vec![None; chunk.len()]
            }
            Err(err) if err.is_auth() => {
                return chunk.iter().map(|_| Err((err.clone(), batch_attempts))).collect();
            }
            Err(err) => {
                debug!(error = %err, size = chunk.len(), "Batch failed, looking up keywords individually");
                vec![None; chunk.len()]
            }
        };

        let mut lookups = Vec::with_capacity(chunk.len());
        for (keyword, result) in chunk.iter().zip(per_keyword) {
            let lookup = match result {
                Some(Ok(metrics)) => Ok(metrics),
                Some(Err(err)) if err.is_auth() => Err((err, batch_attempts)),
                _ => {
                    let single = self
                        .retry
                        .run("fetch_metrics", ProviderError::is_transient, || {
                            platform.fetch_metrics(keyword, market, language)
                        })
                        .await;
                    single
                        .result
                        .map_err(|err| (err, batch_attempts + single.attempts))
                }
            };
            lookups.push(lookup);
        }
        lookups
    }
}

fn snapshot(
    candidate: &Candidate,
    raw: KeywordMetrics,
    fetched_at: chrono::DateTime<Utc>,
) -> MetricSnapshot {
    let cpc_low = raw.cpc_low.max(0.0);
    MetricSnapshot {
        candidate_id: candidate.id.clone(),
        search_volume: raw.search_volume,
        cpc_low,
        cpc_high: raw.cpc_high.max(cpc_low),
        competition: raw.competition.clamp(0.0, 1.0),
        fetched_at,
    }
}
