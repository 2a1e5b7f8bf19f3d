//! SEM Planner: turns a campaign brief into a deduplicated, scored keyword plan.
//!
//! Reads a JSON brief, runs one pipeline and prints the plan (or the failure
//! report) as JSON on stdout. Logs go to stderr.

use anyhow::Context;
use clap::Parser;
use sem_core::config::AppConfig;
use sem_core::types::CampaignBrief;
use sem_pipeline::{Orchestrator, Providers, RunContext};
use sem_providers::{
    GoogleAdsClient, HashedEmbedder, HashedMetricsPlatform, OpenAiEmbedder, OpenAiModel,
    TemplateModel,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sem-planner")]
#[command(about = "Generate, enrich, score and deduplicate SEM keywords for a campaign brief")]
#[command(version)]
struct Cli {
    /// Campaign brief (JSON)
    #[arg(long)]
    brief: PathBuf,

    /// Optional config file; environment variables override it
    #[arg(long, env = "SEM_PLANNER_CONFIG")]
    config: Option<PathBuf>,

    /// Use the deterministic offline providers instead of OpenAI and Google Ads
    #[arg(long, default_value_t = false)]
    dev_providers: bool,

    /// Maximum concurrent external calls (overrides config)
    #[arg(long, env = "SEM_PLANNER__PIPELINE__MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Pretty-print the JSON output
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sem_planner=info,sem_pipeline=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) if cli.config.is_none() => {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }
        Err(e) => return Err(e).context("failed to load config file"),
    };
    if let Some(max_concurrency) = cli.max_concurrency {
        config.pipeline.max_concurrency = max_concurrency;
    }

    let brief: CampaignBrief = {
        let raw = std::fs::read_to_string(&cli.brief)
            .with_context(|| format!("failed to read brief {}", cli.brief.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid brief {}", cli.brief.display()))?
    };

    let context = RunContext::from_config(&config)?;
    let providers = build_providers(&config, cli.dev_providers).await?;
    info!(
        dev_providers = cli.dev_providers,
        model = providers.model.model_name(),
        platform = providers.ads.platform_name(),
        store = providers.store.backend_name(),
        grouping = ?context.grouping,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let orchestrator = Orchestrator::new(context, providers);
    let outcome = orchestrator.run_with_cancel(&brief, cancel).await;

    let (output, failed) = match &outcome {
        Ok(plan) => (render(plan, cli.pretty)?, false),
        Err(failure) => (render(failure, cli.pretty)?, true),
    };
    println!("{output}");

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn render<T: serde::Serialize>(value: &T, pretty: bool) -> anyhow::Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(json)
}

async fn build_providers(config: &AppConfig, dev: bool) -> anyhow::Result<Providers> {
    let store = sem_store::connect(&config.store).await?;

    if dev {
        return Ok(Providers {
            model: Arc::new(TemplateModel::new()),
            ads: Arc::new(HashedMetricsPlatform::new(config.ads.batch_size)),
            embedder: Arc::new(HashedEmbedder::new(config.embedding.dimensions.unwrap_or(256))),
            store,
        });
    }

    Ok(Providers {
        model: Arc::new(OpenAiModel::new(&config.generator)?),
        ads: Arc::new(GoogleAdsClient::new(&config.ads)?),
        embedder: Arc::new(OpenAiEmbedder::new(&config.embedding)?),
        store,
    })
}
