//! Keyword generation, enrichment, scoring and deduplication pipeline.
//!
//! [`Orchestrator`] drives one [`CampaignBrief`](sem_core::types::CampaignBrief)
//! through the stages and returns either a
//! [`CampaignPlan`](sem_core::types::CampaignPlan) or a [`RunFailure`].

#![warn(clippy::unwrap_used)]

pub mod assembler;
pub mod context;
pub mod dedup;
pub mod enricher;
pub mod generator;
pub mod normalizer;
pub mod orchestrator;
pub mod retry;
pub mod scorer;
pub mod state;

pub use context::{Providers, RunContext, ScoringRules};
pub use orchestrator::{Orchestrator, RunFailure};
pub use retry::RetryPolicy;
