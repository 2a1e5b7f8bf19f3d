//! Sequences the pipeline stages for one brief.
//!
//! Each stage consumes the whole output of the previous one. Stages that
//! call out are raced against the run's cancellation token; persistence is
//! the exception and always runs to completion once started.

use crate::assembler::PlanAssembler;
use crate::context::{Providers, RunContext};
use crate::dedup::{DedupOutcome, Deduplicator, Representative};
use crate::enricher::MetricsEnricher;
use crate::generator::CandidateGenerator;
use crate::normalizer::normalize_brief;
use crate::scorer::Scorer;
use crate::state::RunStateMachine;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use sem_core::types::{
    AuditRecord, CampaignBrief, CampaignPlan, DropReason, RunState, StageTransition,
};
use sem_core::{ErrorClass, PipelineError, PipelineResult};
use serde::Serialize;
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Why a run did not produce a plan.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("run {run_id} failed while {stage}: {cause}")]
pub struct RunFailure {
    pub run_id: Uuid,
    pub stage: RunState,
    pub error_class: ErrorClass,
    pub cause: String,
    pub attempts: u32,
    pub retries_exhausted: bool,
    pub transitions: Vec<StageTransition>,
    pub audit: Vec<AuditRecord>,
}

pub struct Orchestrator {
    context: RunContext,
    providers: Providers,
}

/// Mutable bookkeeping of a single run.
struct Run {
    id: Uuid,
    machine: RunStateMachine,
    audit: Vec<AuditRecord>,
    stage_started: Instant,
}

impl Run {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            machine: RunStateMachine::new(),
            audit: Vec::new(),
            stage_started: Instant::now(),
        }
    }

    fn enter(&mut self, next: RunState) -> PipelineResult<()> {
        let finished = self.machine.state();
        metrics::histogram!("pipeline.stage_latency_ms", "stage" => finished.as_str())
            .record(self.stage_started.elapsed().as_secs_f64() * 1000.0);
        self.machine.advance(next)?;
        self.stage_started = Instant::now();
        Ok(())
    }

    /// Fail on an error that was not retried.
    fn fail(self, err: PipelineError) -> RunFailure {
        self.fail_after(err, 1, false)
    }

    fn fail_after(mut self, err: PipelineError, attempts: u32, retries_exhausted: bool) -> RunFailure {
        let stage = self.machine.state();
        if let Err(transition_err) = self.machine.advance(RunState::Failed) {
            warn!(error = %transition_err, "Could not record failure transition");
        }
        metrics::counter!("pipeline.failures", "stage" => stage.as_str()).increment(1);
        error!(
            run_id = %self.id,
            stage = %stage,
            attempts,
            retries_exhausted,
            error = %err,
            "Pipeline run failed"
        );
        RunFailure {
            run_id: self.id,
            stage,
            error_class: err.class(),
            cause: err.to_string(),
            attempts,
            retries_exhausted,
            transitions: self.machine.into_transitions(),
            audit: self.audit,
        }
    }
}

/// Race a stage against cancellation. Dropping the stage future drops its
/// in-flight calls.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    stage: impl Future<Output = T>,
) -> Result<T, PipelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        output = stage => Ok(output),
    }
}

impl Orchestrator {
    pub fn new(context: RunContext, providers: Providers) -> Self {
        Self { context, providers }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub async fn run(&self, brief: &CampaignBrief) -> Result<CampaignPlan, RunFailure> {
        self.run_with_cancel(brief, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(
        &self,
        brief: &CampaignBrief,
        cancel: CancellationToken,
    ) -> Result<CampaignPlan, RunFailure> {
        let run = Run::new();
        let span = info_span!("pipeline_run", run_id = %run.id);
        self.execute(run, brief, cancel).instrument(span).await
    }

    async fn execute(
        &self,
        mut run: Run,
        brief: &CampaignBrief,
        cancel: CancellationToken,
    ) -> Result<CampaignPlan, RunFailure> {
        let ctx = &self.context;
        let retry = &ctx.retry;
        metrics::counter!("pipeline.runs").increment(1);

        // ─── Intake ─────────────────────────────────────────────────────
        let brief = match normalize_brief(brief, ctx.max_seeds) {
            Ok(brief) => brief,
            Err(err) => return Err(run.fail(err)),
        };
        info!(
            market = %brief.market,
            language = %brief.language,
            seeds = brief.seeds.len(),
            "Starting pipeline run"
        );

        // ─── Generating ─────────────────────────────────────────────────
        if let Err(err) = run.enter(RunState::Generating) {
            return Err(run.fail(err));
        }
        let generator = CandidateGenerator::new(ctx);
        let attempted = match until_cancelled(
            &cancel,
            generator.generate(&brief, self.providers.model.as_ref()),
        )
        .await
        {
            Ok(attempted) => attempted,
            Err(err) => return Err(run.fail(err)),
        };
        let exhausted = attempted.exhausted(retry.max_attempts);
        let generated = match attempted.result {
            Ok(generated) => generated,
            Err(err) => {
                let exhausted = exhausted && err.is_retryable();
                return Err(run.fail_after(err, attempted.attempts, exhausted));
            }
        };
        run.audit.extend(generated.audit);
        if generated.candidates.is_empty() {
            let err = PipelineError::NoViableCandidates {
                stage: RunState::Generating,
            };
            return Err(run.fail(err));
        }

        // ─── Enriching ──────────────────────────────────────────────────
        if let Err(err) = run.enter(RunState::Enriching) {
            return Err(run.fail(err));
        }
        let enricher = MetricsEnricher::new(ctx.max_concurrency, retry.clone());
        let enriched = match until_cancelled(
            &cancel,
            enricher.enrich(
                generated.candidates,
                &brief.market,
                &brief.language,
                self.providers.ads.as_ref(),
            ),
        )
        .await
        .and_then(|result| result)
        {
            Ok(enriched) => enriched,
            Err(err) => return Err(run.fail(err)),
        };

        // ─── Scoring ────────────────────────────────────────────────────
        if let Err(err) = run.enter(RunState::Scoring) {
            return Err(run.fail(err));
        }
        let (scored, rejected) = Scorer::new(&ctx.scoring, &brief.match_types).score_all(enriched);
        run.audit.extend(rejected);
        let valid = scored.iter().filter(|s| s.valid).count();
        info!(scored = scored.len(), valid, "Scoring complete");
        if valid == 0 {
            let err = PipelineError::NoViableCandidates {
                stage: RunState::Scoring,
            };
            return Err(run.fail(err));
        }

        // ─── Deduplicating ──────────────────────────────────────────────
        if let Err(err) = run.enter(RunState::Deduplicating) {
            return Err(run.fail(err));
        }
        let deduplicator = Deduplicator::new(ctx.similarity_threshold, ctx.max_concurrency);
        let embedder = self.providers.embedder.as_ref();
        let attempted = match until_cancelled(
            &cancel,
            retry.run("deduplicate", PipelineError::is_retryable, || {
                deduplicator.deduplicate(&scored, embedder)
            }),
        )
        .await
        {
            Ok(attempted) => attempted,
            Err(err) => return Err(run.fail_after(err, 1, false)),
        };
        let exhausted = attempted.exhausted(retry.max_attempts);
        let DedupOutcome {
            representatives,
            clusters,
            discarded,
        } = match attempted.result {
            Ok(outcome) => outcome,
            Err(err) => return Err(run.fail_after(err, attempted.attempts, exhausted)),
        };
        run.audit.extend(discarded.iter().map(|d| AuditRecord {
            candidate_id: Some(d.candidate.candidate.id.clone()),
            keyword: d.candidate.candidate.keyword.clone(),
            stage: RunState::Deduplicating,
            reason: DropReason::NearDuplicate {
                of: d.duplicate_of.clone(),
                similarity: d.similarity,
            },
        }));

        if cancel.is_cancelled() {
            return Err(run.fail_after(PipelineError::Cancelled, 1, false));
        }

        // ─── Persisting ─────────────────────────────────────────────────
        if let Err(err) = run.enter(RunState::Persisting) {
            return Err(run.fail(err));
        }
        let assembler = PlanAssembler::new(ctx.grouping, ctx.max_plan_keywords, ctx.conversion_rate);
        let (representatives, over_limit) = assembler.cap(representatives);
        run.audit.extend(over_limit);

        let persisted = retry
            .run("persist", PipelineError::is_retryable, || {
                self.persist(&brief, &representatives)
            })
            .await;
        if let Err(err) = persisted.result {
            let exhausted = persisted.attempts >= retry.max_attempts;
            return Err(run.fail_after(err, persisted.attempts, exhausted));
        }

        let ad_groups = assembler.assemble(
            &brief,
            representatives.into_iter().map(|r| r.scored).collect(),
        );

        if let Err(err) = run.enter(RunState::Done) {
            return Err(run.fail(err));
        }

        let plan = CampaignPlan {
            run_id: run.id,
            brief_fingerprint: brief.fingerprint(),
            market: brief.market.clone(),
            language: brief.language.clone(),
            ad_groups,
            clusters,
            discarded,
            audit: run.audit,
            transitions: run.machine.into_transitions(),
            created_at: Utc::now(),
        };
        info!(
            ad_groups = plan.ad_groups.len(),
            keywords = plan.keyword_count(),
            dropped = plan.audit.len(),
            "Pipeline run complete"
        );
        Ok(plan)
    }

    /// Upsert every representative keyed by its content id.
    async fn persist(
        &self,
        brief: &CampaignBrief,
        representatives: &[Representative],
    ) -> PipelineResult<()> {
        let store = self.providers.store.as_ref();
        stream::iter(representatives)
            .map(|rep| async move {
                let candidate = &rep.scored.candidate;
                let payload = serde_json::json!({
                    "keyword": candidate.keyword,
                    "seed": candidate.seed,
                    "market": brief.market,
                    "language": brief.language,
                    "match_type": candidate.match_type,
                    "intent": candidate.intent,
                    "score": rep.scored.score,
                    "metrics": rep.scored.metrics,
                    "ad_copy": candidate.ad_copy,
                });
                store
                    .upsert(&candidate.id, rep.embedding.as_slice(), &payload)
                    .await
                    .map_err(|e| PipelineError::from_provider(e, PipelineError::Store))
            })
            .buffer_unordered(self.context.max_concurrency)
            .try_collect::<Vec<()>>()
            .await?;
        info!(
            entries = representatives.len(),
            backend = store.backend_name(),
            "Persisted keyword vectors"
        );
        Ok(())
    }
}
