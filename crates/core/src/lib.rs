pub mod config;
pub mod error;
pub mod hashing;
pub mod providers;
pub mod types;
pub mod vector;

pub use config::AppConfig;
pub use error::{ErrorClass, PipelineError, PipelineResult, ProviderError};
