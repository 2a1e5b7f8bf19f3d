//! Google Ads keyword-metrics client.
//! Translates keyword batches into `generateKeywordHistoricalMetrics` calls
//! and maps the response onto [`KeywordMetrics`].

use crate::http::{build_client, send_json};
use async_trait::async_trait;
use sem_core::config::AdsConfig;
use sem_core::providers::{AdPlatformClient, KeywordMetrics};
use sem_core::{PipelineError, PipelineResult, ProviderError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Geo target constants for supported markets.
const GEO_TARGETS: &[(&str, u32)] = &[
    ("US", 2840),
    ("GB", 2826),
    ("UK", 2826),
    ("CA", 2124),
    ("AU", 2036),
    ("DE", 2276),
    ("FR", 2250),
    ("IN", 2356),
];

/// Language constants for supported campaign languages (ISO 639-1).
const LANGUAGE_CONSTANTS: &[(&str, u32)] = &[
    ("en", 1000),
    ("de", 1001),
    ("fr", 1002),
    ("es", 1003),
    ("it", 1004),
    ("ja", 1005),
    ("da", 1009),
    ("nl", 1010),
    ("fi", 1011),
    ("ko", 1012),
    ("no", 1013),
    ("pt", 1014),
    ("sv", 1015),
    ("zh", 1017),
    ("hi", 1023),
];

/// Accepts bare codes and regional tags ("en", "en-GB", "pt_BR").
pub fn language_constant_for(language: &str) -> Option<u32> {
    let primary = language
        .trim()
        .split(|c: char| c == '-' || c == '_')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    LANGUAGE_CONSTANTS
        .iter()
        .find(|(code, _)| *code == primary)
        .map(|(_, id)| *id)
}

pub fn geo_target_for(market: &str) -> Option<u32> {
    let market = market.trim().to_ascii_uppercase();
    GEO_TARGETS
        .iter()
        .find(|(code, _)| *code == market)
        .map(|(_, id)| *id)
}

pub struct GoogleAdsClient {
    client: reqwest::Client,
    endpoint: String,
    default_language: String,
    batch_size: usize,
}

impl GoogleAdsClient {
    pub fn new(config: &AdsConfig) -> PipelineResult<Self> {
        let developer_token = required(config.developer_token.as_deref(), "ads.developer_token")?;
        let access_token = required(config.access_token.as_deref(), "ads.access_token")?;
        let customer_id = required(config.customer_id.as_deref(), "ads.customer_id")?.replace('-', "");

        let mut headers = vec![("developer-token", developer_token)];
        let login_customer_id = config
            .login_customer_id
            .as_deref()
            .map(|id| id.trim().replace('-', ""))
            .filter(|id| !id.is_empty());
        if let Some(login) = login_customer_id.as_deref() {
            headers.push(("login-customer-id", login));
        }
        let client = build_client(access_token, &headers, config.timeout_ms)?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/customers/{}:generateKeywordHistoricalMetrics",
                config.base_url.trim_end_matches('/'),
                customer_id
            ),
            default_language: config.language_constant.clone(),
            batch_size: config.batch_size.max(1),
        })
    }
}

impl GoogleAdsClient {
    /// Falls back to the configured constant for languages without a mapping.
    fn language_constant(&self, language: &str) -> String {
        match language_constant_for(language) {
            Some(id) => format!("languageConstants/{id}"),
            None => self.default_language.clone(),
        }
    }
}

#[async_trait]
impl AdPlatformClient for GoogleAdsClient {
    async fn fetch_metrics(
        &self,
        keyword: &str,
        market: &str,
        language: &str,
    ) -> Result<KeywordMetrics, ProviderError> {
        let mut results = self
            .fetch_metrics_batch(&[keyword.to_string()], market, language)
            .await?;
        results
            .pop()
            .unwrap_or_else(|| Err(ProviderError::Malformed("empty metrics response".to_string())))
    }

    async fn fetch_metrics_batch(
        &self,
        keywords: &[String],
        market: &str,
        language: &str,
    ) -> Result<Vec<Result<KeywordMetrics, ProviderError>>, ProviderError> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let geo = geo_target_for(market)
            .ok_or_else(|| ProviderError::Rejected(format!("unsupported market {market}")))?;
        let language_constant = self.language_constant(language);

        let request = HistoricalMetricsRequest {
            keywords,
            language: &language_constant,
            geo_target_constants: [format!("geoTargetConstants/{geo}")],
            keyword_plan_network: "GOOGLE_SEARCH",
        };
        debug!(
            platform = "google_ads",
            batch = keywords.len(),
            market,
            language = %language_constant,
            "Requesting historical keyword metrics"
        );
        metrics::counter!("ads.requests", "platform" => "google_ads").increment(1);

        let body = send_json(self.client.post(&self.endpoint).json(&request)).await?;
        let parsed: HistoricalMetricsResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("unexpected metrics body: {e}")))?;

        Ok(match_results(keywords, parsed.results))
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    fn platform_name(&self) -> &str {
        "google_ads"
    }
}

/// Pairs response rows with the requested keywords. Rows are matched by
/// normalized text or close variant since the API may reorder or merge them.
fn match_results(
    keywords: &[String],
    results: Vec<KeywordResult>,
) -> Vec<Result<KeywordMetrics, ProviderError>> {
    let mut by_text: HashMap<String, KeywordMetrics> = HashMap::new();
    for result in results {
        let metrics = result.keyword_metrics.map(to_metrics).unwrap_or(KeywordMetrics {
            search_volume: 0,
            cpc_low: 0.0,
            cpc_high: 0.0,
            competition: 0.0,
        });
        for variant in &result.close_variants {
            by_text
                .entry(variant.trim().to_lowercase())
                .or_insert_with(|| metrics.clone());
        }
        by_text.insert(result.text.trim().to_lowercase(), metrics);
    }

    keywords
        .iter()
        .map(|keyword| {
            by_text
                .get(&keyword.trim().to_lowercase())
                .cloned()
                .ok_or_else(|| {
                    ProviderError::Malformed(format!("no metrics returned for \"{keyword}\""))
                })
        })
        .collect()
}

fn to_metrics(raw: RawKeywordMetrics) -> KeywordMetrics {
    let low = micros_to_units(raw.low_top_of_page_bid_micros);
    let high = micros_to_units(raw.high_top_of_page_bid_micros).max(low);
    KeywordMetrics {
        search_volume: raw.avg_monthly_searches,
        cpc_low: low,
        cpc_high: high,
        competition: (raw.competition_index as f64 / 100.0).clamp(0.0, 1.0),
    }
}

fn micros_to_units(micros: u64) -> f64 {
    micros as f64 / 1_000_000.0
}

fn required<'a>(value: Option<&'a str>, field: &str) -> PipelineResult<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(PipelineError::Config(format!("missing {field}"))),
    }
}

// ─── Wire format ────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoricalMetricsRequest<'a> {
    keywords: &'a [String],
    language: &'a str,
    geo_target_constants: [String; 1],
    keyword_plan_network: &'a str,
}

#[derive(Deserialize)]
struct HistoricalMetricsResponse {
    #[serde(default)]
    results: Vec<KeywordResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeywordResult {
    text: String,
    #[serde(default)]
    close_variants: Vec<String>,
    #[serde(default)]
    keyword_metrics: Option<RawKeywordMetrics>,
}

/// int64 fields arrive as JSON strings.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawKeywordMetrics {
    #[serde(default, deserialize_with = "int64")]
    avg_monthly_searches: u64,
    #[serde(default, deserialize_with = "int64")]
    competition_index: u64,
    #[serde(default, deserialize_with = "int64")]
    low_top_of_page_bid_micros: u64,
    #[serde(default, deserialize_with = "int64")]
    high_top_of_page_bid_micros: u64,
}

fn int64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64 {
        Number(u64),
        Text(String),
    }

    match Int64::deserialize(deserializer)? {
        Int64::Number(n) => Ok(n),
        Int64::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
