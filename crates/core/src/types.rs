use crate::error::{PipelineError, PipelineResult};
use crate::hashing;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

// ─── Brief ──────────────────────────────────────────────────────────────────

/// Ad-platform keyword matching mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Phrase,
    Broad,
}

impl MatchType {
    pub const ALL: [MatchType; 3] = [MatchType::Exact, MatchType::Phrase, MatchType::Broad];

    /// Lenient parse of model output ("EXACT", "phrase match", "broad_match").
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let head = lowered
            .split(|c: char| c == '_' || c == ' ' || c == '-')
            .next()
            .unwrap_or("");
        match head {
            "exact" => Some(MatchType::Exact),
            "phrase" => Some(MatchType::Phrase),
            "broad" => Some(MatchType::Broad),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Phrase => "phrase",
            MatchType::Broad => "broad",
        }
    }
}

/// Which match types the advertiser is willing to buy.
/// An empty set means every match type is allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchTypePolicy {
    #[serde(default)]
    pub allowed: BTreeSet<MatchType>,
}

impl MatchTypePolicy {
    pub fn allow_all() -> Self {
        Self {
            allowed: MatchType::ALL.into_iter().collect(),
        }
    }

    pub fn only(types: impl IntoIterator<Item = MatchType>) -> Self {
        Self {
            allowed: types.into_iter().collect(),
        }
    }

    pub fn allows(&self, match_type: MatchType) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&match_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetConstraints {
    #[serde(default)]
    pub monthly_budget: Option<f64>,
    #[serde(default)]
    pub target_cpa: Option<f64>,
    #[serde(default)]
    pub max_cpc: Option<f64>,
}

/// Campaign brief as submitted by the caller. Input to the pipeline;
/// never mutated by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignBrief {
    pub market: String,
    pub language: String,
    pub seeds: Vec<String>,
    /// Advertiser brand names, used to recognize brand-intent keywords.
    #[serde(default)]
    pub brand_terms: Vec<String>,
    #[serde(default)]
    pub budget: BudgetConstraints,
    #[serde(default)]
    pub match_types: MatchTypePolicy,
}

impl CampaignBrief {
    pub fn new(market: &str, language: &str, seeds: &[&str]) -> Self {
        Self {
            market: market.to_string(),
            language: language.to_string(),
            seeds: seeds.iter().map(|s| s.to_string()).collect(),
            brand_terms: Vec::new(),
            budget: BudgetConstraints::default(),
            match_types: MatchTypePolicy::default(),
        }
    }

    /// Stable hash of everything that influences the plan.
    pub fn fingerprint(&self) -> String {
        let match_types: Vec<&str> = self.match_types.allowed.iter().map(|m| m.as_str()).collect();
        let budget = format!(
            "{:?}|{:?}|{:?}",
            self.budget.monthly_budget, self.budget.target_cpa, self.budget.max_cpc
        );
        let seeds = self.seeds.join("\n");
        let brands = self.brand_terms.join("\n");
        let match_types = match_types.join(",");
        hashing::content_hash(&[
            "brief",
            self.market.as_str(),
            self.language.as_str(),
            seeds.as_str(),
            brands.as_str(),
            match_types.as_str(),
            budget.as_str(),
        ])
    }
}

// ─── Candidates ─────────────────────────────────────────────────────────────

/// Heuristic search intent derived from keyword wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchIntent {
    Brand,
    Transactional,
    Commercial,
    Informational,
}

const TRANSACTIONAL_TERMS: &[&str] = &[
    "buy", "purchase", "order", "shop", "store", "online", "deal", "deals", "price", "prices",
    "cheap", "discount", "sale", "coupon",
];
const INFORMATIONAL_TERMS: &[&str] = &[
    "how", "what", "why", "when", "guide", "tips", "ideas", "tutorial", "meaning",
];

impl SearchIntent {
    pub const ALL: [SearchIntent; 4] = [
        SearchIntent::Brand,
        SearchIntent::Transactional,
        SearchIntent::Commercial,
        SearchIntent::Informational,
    ];

    /// Classify a normalized keyword. Generic product terms default to
    /// commercial intent.
    pub fn classify(keyword: &str, brand_terms: &[String]) -> Self {
        let lowered = keyword.to_lowercase();
        if brand_terms
            .iter()
            .map(|b| b.trim().to_lowercase())
            .any(|b| !b.is_empty() && lowered.contains(&b))
        {
            return SearchIntent::Brand;
        }
        let words: Vec<&str> = lowered.split_whitespace().collect();
        if words.iter().any(|w| TRANSACTIONAL_TERMS.contains(w)) {
            SearchIntent::Transactional
        } else if words.iter().any(|w| INFORMATIONAL_TERMS.contains(w)) {
            SearchIntent::Informational
        } else {
            SearchIntent::Commercial
        }
    }

    /// Match type suggested when the model did not name one.
    pub fn default_match_type(&self) -> MatchType {
        match self {
            SearchIntent::Brand => MatchType::Exact,
            SearchIntent::Transactional | SearchIntent::Commercial => MatchType::Broad,
            SearchIntent::Informational => MatchType::Phrase,
        }
    }
}

/// Responsive search ad limits.
pub const MAX_HEADLINE_CHARS: usize = 30;
pub const MAX_DESCRIPTION_CHARS: usize = 90;
pub const MAX_HEADLINES: usize = 3;
pub const MAX_DESCRIPTIONS: usize = 2;

/// Ad copy proposed alongside a keyword, or merged for an ad group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdCopy {
    #[serde(default)]
    pub headlines: Vec<String>,
    #[serde(default)]
    pub descriptions: Vec<String>,
}

impl AdCopy {
    /// Keep non-blank, distinct lines within the character limits, up to
    /// the per-ad counts. Returns the copy and how many lines were too long.
    pub fn fit(headlines: &[String], descriptions: &[String]) -> (Self, usize) {
        let (headlines, long_headlines) = fit_lines(headlines, MAX_HEADLINE_CHARS, MAX_HEADLINES);
        let (descriptions, long_descriptions) =
            fit_lines(descriptions, MAX_DESCRIPTION_CHARS, MAX_DESCRIPTIONS);
        (
            Self {
                headlines,
                descriptions,
            },
            long_headlines + long_descriptions,
        )
    }

    /// Generic copy for a keyword, used where the model supplied none that fits.
    pub fn fallback(keyword: &str) -> Self {
        let title = title_case(keyword);
        let headlines = [title.as_str(), "Shop Now", "Best Deals"]
            .map(str::to_string)
            .to_vec();
        let descriptions = [
            format!("Find {keyword} online. Compare options and order today."),
            "Quality products at low prices.".to_string(),
        ];
        Self::fit(&headlines, &descriptions).0
    }

    /// Fill whichever side is empty from [`AdCopy::fallback`].
    pub fn or_fallback(mut self, keyword: &str) -> Self {
        if self.headlines.is_empty() || self.descriptions.is_empty() {
            let fallback = Self::fallback(keyword);
            if self.headlines.is_empty() {
                self.headlines = fallback.headlines;
            }
            if self.descriptions.is_empty() {
                self.descriptions = fallback.descriptions;
            }
        }
        self
    }

    /// Combine several copies in order, keeping the first distinct lines.
    pub fn merge<'a>(copies: impl IntoIterator<Item = &'a AdCopy>) -> Self {
        let mut headlines = Vec::new();
        let mut descriptions = Vec::new();
        for copy in copies {
            headlines.extend(copy.headlines.iter().cloned());
            descriptions.extend(copy.descriptions.iter().cloned());
        }
        Self::fit(&headlines, &descriptions).0
    }

    pub fn is_empty(&self) -> bool {
        self.headlines.is_empty() && self.descriptions.is_empty()
    }
}

fn fit_lines(lines: &[String], max_chars: usize, max_lines: usize) -> (Vec<String>, usize) {
    let mut kept: Vec<String> = Vec::new();
    let mut too_long = 0;
    for line in lines {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            continue;
        }
        if line.chars().count() > max_chars {
            too_long += 1;
            continue;
        }
        if kept.len() < max_lines && !kept.iter().any(|k| k.eq_ignore_ascii_case(&line)) {
            kept.push(line);
        }
    }
    (kept, too_long)
}

pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A generated keyword proposal. Owned by a single pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Content hash of (market, language, keyword).
    pub id: String,
    /// Position in generation order; breaks score ties downstream.
    pub ordinal: u32,
    pub keyword: String,
    pub seed_index: usize,
    pub seed: String,
    pub match_type: MatchType,
    pub confidence: f64,
    pub intent: SearchIntent,
    #[serde(default)]
    pub ad_copy: AdCopy,
}

impl Candidate {
    pub fn word_count(&self) -> usize {
        self.keyword.split_whitespace().count()
    }
}

/// Ad-platform metrics for one candidate at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub candidate_id: String,
    pub search_volume: u64,
    pub cpc_low: f64,
    pub cpc_high: f64,
    /// 0.0 (none) to 1.0 (highest).
    pub competition: f64,
    pub fetched_at: DateTime<Utc>,
}

impl MetricSnapshot {
    pub fn mid_cpc(&self) -> f64 {
        (self.cpc_low + self.cpc_high) / 2.0
    }
}

/// Candidate + metrics + composite score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub metrics: Option<MetricSnapshot>,
    pub score: f64,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<DropReason>,
}

/// Fixed-dimension embedding of a candidate's keyword text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector(pub Vec<f32>);

impl EmbeddingVector {
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn cosine(&self, other: &EmbeddingVector) -> f32 {
        crate::vector::cosine_similarity(&self.0, &other.0)
    }
}

/// Candidates judged semantically equivalent. The representative is the
/// highest-scoring member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCluster {
    pub representative_id: String,
    pub member_ids: Vec<String>,
}

/// Candidate dropped by deduplication, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscardedCandidate {
    pub candidate: ScoredCandidate,
    pub duplicate_of: String,
    pub duplicate_of_keyword: String,
    pub similarity: f32,
}

// ─── Plan ───────────────────────────────────────────────────────────────────

/// How deduplicated keywords are arranged into ad groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingPolicy {
    #[default]
    BySeed,
    ByIntent,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuggestedBid {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedKeyword {
    pub scored: ScoredCandidate,
    pub bid: SuggestedBid,
}

impl PlannedKeyword {
    pub fn keyword(&self) -> &str {
        &self.scored.candidate.keyword
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdGroup {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<SearchIntent>,
    pub keywords: Vec<PlannedKeyword>,
    /// Copy for the group's ad, drawn from its best keywords.
    #[serde(default)]
    pub ad_copy: AdCopy,
}

/// Final output of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignPlan {
    pub run_id: Uuid,
    pub brief_fingerprint: String,
    pub market: String,
    pub language: String,
    pub ad_groups: Vec<AdGroup>,
    pub clusters: Vec<DuplicateCluster>,
    pub discarded: Vec<DiscardedCandidate>,
    pub audit: Vec<AuditRecord>,
    pub transitions: Vec<StageTransition>,
    pub created_at: DateTime<Utc>,
}

impl CampaignPlan {
    pub fn keywords(&self) -> impl Iterator<Item = &PlannedKeyword> {
        self.ad_groups.iter().flat_map(|g| g.keywords.iter())
    }

    pub fn keyword_count(&self) -> usize {
        self.ad_groups.iter().map(|g| g.keywords.len()).sum()
    }

    pub fn contains_keyword(&self, keyword: &str) -> bool {
        self.keywords().any(|k| k.keyword() == keyword)
    }
}

// ─── Run state & audit ──────────────────────────────────────────────────────

/// Lifecycle of a single pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Intake,
    Generating,
    Enriching,
    Scoring,
    Deduplicating,
    Persisting,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Intake => "intake",
            RunState::Generating => "generating",
            RunState::Enriching => "enriching",
            RunState::Scoring => "scoring",
            RunState::Deduplicating => "deduplicating",
            RunState::Persisting => "persisting",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
}

/// Why a candidate (or a seed's whole batch) did not reach the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    GenerationFailed { cause: String, attempts: u32 },
    DuplicateText { first_ordinal: u32 },
    MetricsUnavailable { cause: String, attempts: u32 },
    ZeroVolume,
    BelowMinVolume { volume: u64, min: u64 },
    MatchTypeNotAllowed { match_type: MatchType },
    TooManyWords { words: usize, max: usize },
    TooShort,
    NearDuplicate { of: String, similarity: f32 },
    OverPlanLimit { limit: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    pub keyword: String,
    pub stage: RunState,
    #[serde(flatten)]
    pub reason: DropReason,
}

// ─── Scoring weights ────────────────────────────────────────────────────────

/// Composite score weights; must be non-negative and sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub volume_weight: f64,
    pub cpc_weight: f64,
    pub confidence_weight: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            volume_weight: 0.4,
            cpc_weight: 0.3,
            confidence_weight: 0.3,
        }
    }
}

impl ScoreWeights {
    pub fn new(volume_weight: f64, cpc_weight: f64, confidence_weight: f64) -> PipelineResult<Self> {
        let weights = Self {
            volume_weight,
            cpc_weight,
            confidence_weight,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let parts = [self.volume_weight, self.cpc_weight, self.confidence_weight];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(PipelineError::Config(format!(
                "score weights must be finite and non-negative: {self:?}"
            )));
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(PipelineError::Config(format!(
                "score weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_type_parse() {
        assert_eq!(MatchType::parse("EXACT"), Some(MatchType::Exact));
        assert_eq!(MatchType::parse("phrase match"), Some(MatchType::Phrase));
        assert_eq!(MatchType::parse("broad_match"), Some(MatchType::Broad));
        assert_eq!(MatchType::parse("modified"), None);
    }

    #[test]
    fn test_empty_policy_allows_everything() {
        let policy = MatchTypePolicy::default();
        assert!(MatchType::ALL.iter().all(|m| policy.allows(*m)));

        let policy = MatchTypePolicy::only([MatchType::Exact]);
        assert!(policy.allows(MatchType::Exact));
        assert!(!policy.allows(MatchType::Broad));
    }

    #[test]
    fn test_intent_classification() {
        let brands = vec!["Acme".to_string()];
        assert_eq!(SearchIntent::classify("acme trail shoes", &brands), SearchIntent::Brand);
        assert_eq!(SearchIntent::classify("buy running shoes", &brands), SearchIntent::Transactional);
        assert_eq!(
            SearchIntent::classify("how to lace running shoes", &brands),
            SearchIntent::Informational
        );
        assert_eq!(SearchIntent::classify("running shoes", &brands), SearchIntent::Commercial);
        // "shopping" is not the token "shop"
        assert_eq!(SearchIntent::classify("shopping bags", &[]), SearchIntent::Commercial);
    }

    #[test]
    fn test_score_weights_validation() {
        assert!(ScoreWeights::new(0.5, 0.25, 0.25).is_ok());
        assert!(ScoreWeights::new(0.5, 0.5, 0.5).is_err());
        assert!(ScoreWeights::new(1.2, -0.1, -0.1).is_err());
        assert!(ScoreWeights::default().validate().is_ok());
    }

    #[test]
    fn test_brief_fingerprint_is_stable() {
        let a = CampaignBrief::new("US", "en", &["running shoes", "trail shoes"]);
        let b = CampaignBrief::new("US", "en", &["running shoes", "trail shoes"]);
        let c = CampaignBrief::new("GB", "en", &["running shoes", "trail shoes"]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_ad_copy_fit_enforces_limits() {
        let headlines = vec![
            "Trail Shoes In Stock".to_string(),
            "Waterproof Trail Running Shoes For Every Season".to_string(),
            "  ".to_string(),
            "trail shoes in stock".to_string(),
            "Free Returns".to_string(),
        ];
        let descriptions = vec!["x".repeat(91), "Grip, comfort and free returns.".to_string()];
        let (copy, too_long) = AdCopy::fit(&headlines, &descriptions);
        assert_eq!(copy.headlines, vec!["Trail Shoes In Stock", "Free Returns"]);
        assert_eq!(copy.descriptions, vec!["Grip, comfort and free returns."]);
        assert_eq!(too_long, 2);
    }

    #[test]
    fn test_ad_copy_fallback_fills_gaps() {
        let copy = AdCopy::fit(&["Hiking Boots Sale".to_string()], &[]).0.or_fallback("hiking boots");
        assert_eq!(copy.headlines, vec!["Hiking Boots Sale"]);
        assert_eq!(copy.descriptions.len(), 2);
        assert!(copy.descriptions[0].contains("hiking boots"));

        let long = "extremely lightweight waterproof trail running shoes";
        let copy = AdCopy::fallback(long);
        assert_eq!(copy.headlines, vec!["Shop Now", "Best Deals"]);
        assert!(copy
            .descriptions
            .iter()
            .all(|d| d.chars().count() <= MAX_DESCRIPTION_CHARS));
    }

    #[test]
    fn test_ad_copy_merge_keeps_first_lines() {
        let a = AdCopy::fallback("running shoes");
        let b = AdCopy {
            headlines: vec!["Shop Now".into(), "Top Running Gear".into()],
            descriptions: vec!["Other text.".into()],
        };
        let merged = AdCopy::merge([&a, &b]);
        assert_eq!(merged.headlines, vec!["Running Shoes", "Shop Now", "Best Deals"]);
        assert_eq!(merged.descriptions.len(), MAX_DESCRIPTIONS);
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("running shoes"), "Running Shoes");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn test_audit_record_serializes_flat() {
        let record = AuditRecord {
            candidate_id: Some("abc".into()),
            keyword: "cheap shoes".into(),
            stage: RunState::Scoring,
            reason: DropReason::ZeroVolume,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["reason"], "zero_volume");
        assert_eq!(json["stage"], "scoring");
    }
}
