//! Seed normalization and brief validation. Runs before any external call.

use sem_core::types::{CampaignBrief, MatchTypePolicy};
use sem_core::{PipelineError, PipelineResult};

/// Trim, collapse inner whitespace and lower-case.
pub fn normalize_term(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Canonical copy of `brief`. The input is left untouched.
pub fn normalize_brief(brief: &CampaignBrief, max_seeds: usize) -> PipelineResult<CampaignBrief> {
    let market = brief.market.trim().to_uppercase();
    if market.is_empty() {
        return Err(PipelineError::Validation("market is empty".to_string()));
    }
    let language = brief.language.trim().to_lowercase();
    if language.is_empty() {
        return Err(PipelineError::Validation("language is empty".to_string()));
    }

    let seeds = dedupe(brief.seeds.iter().map(|s| normalize_term(s)));
    if seeds.is_empty() {
        return Err(PipelineError::Validation(
            "brief has no non-empty seed terms".to_string(),
        ));
    }
    if seeds.len() > max_seeds {
        return Err(PipelineError::Validation(format!(
            "brief has {} seed terms, at most {max_seeds} allowed",
            seeds.len()
        )));
    }

    let match_types = if brief.match_types.allowed.is_empty() {
        MatchTypePolicy::allow_all()
    } else {
        brief.match_types.clone()
    };

    Ok(CampaignBrief {
        market,
        language,
        seeds,
        brand_terms: dedupe(brief.brand_terms.iter().map(|b| normalize_term(b))),
        budget: brief.budget.clone(),
        match_types,
    })
}

/// Drop empties and repeats, keeping first occurrences in order.
fn dedupe(terms: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for term in terms {
        if !term.is_empty() && !out.contains(&term) {
            out.push(term);
        }
    }
    out
}
