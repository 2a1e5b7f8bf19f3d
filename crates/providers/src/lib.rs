//! Concrete clients for the pipeline's external collaborators.

#![warn(clippy::unwrap_used)]

pub mod ads;
pub mod cache;
pub mod dev;
pub mod openai;
pub mod parse;
pub mod prompts;

mod http;

pub use ads::GoogleAdsClient;
pub use cache::ResponseCache;
pub use dev::{HashedEmbedder, HashedMetricsPlatform, TemplateModel};
pub use openai::{OpenAiEmbedder, OpenAiModel};
