//! Prompt templates for keyword generation.

use sem_core::types::{
    MatchType, MAX_DESCRIPTIONS, MAX_DESCRIPTION_CHARS, MAX_HEADLINES, MAX_HEADLINE_CHARS,
};

/// Line prefix carrying the seed term. Development providers read it back.
pub const SEED_MARKER: &str = "Seed keyword:";

/// Parameters for one keyword-generation prompt.
#[derive(Debug, Clone)]
pub struct KeywordPrompt<'a> {
    pub seed: &'a str,
    pub market: &'a str,
    pub language: &'a str,
    pub count: usize,
    pub brand_terms: &'a [String],
    pub match_types: &'a [MatchType],
}

impl KeywordPrompt<'_> {
    pub fn render(&self) -> String {
        let match_types = if self.match_types.is_empty() {
            "exact, phrase, broad".to_string()
        } else {
            self.match_types
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let brands = if self.brand_terms.is_empty() {
            String::new()
        } else {
            format!("Advertiser brand terms: {}\n", self.brand_terms.join(", "))
        };

        format!(
            "As a strategic SEM keyword planner, generate {count} high-intent search keywords \
             for a paid search campaign.\n\
             {marker} {seed}\n\
             Market: {market}\n\
             Language: {language}\n\
             {brands}\
             Allowed match types: {match_types}\n\
             Keep each keyword between 1 and 6 words, in the campaign language, without \
             punctuation or quotes.\n\
             For each keyword also write {headlines} ad headlines of at most {headline_chars} \
             characters and {descriptions} ad descriptions of at most {description_chars} \
             characters. Do not invent prices or make unsupported claims.\n\
             Return only a JSON array of objects like \
             [{{\"keyword\": \"...\", \"match_type\": \"exact|phrase|broad\", \"confidence\": 0.0-1.0, \
             \"headlines\": [\"...\"], \"descriptions\": [\"...\"]}}] \
             where confidence is how likely the keyword converts for this seed.",
            count = self.count,
            marker = SEED_MARKER,
            seed = self.seed,
            market = self.market,
            language = self.language,
            headlines = MAX_HEADLINES,
            headline_chars = MAX_HEADLINE_CHARS,
            descriptions = MAX_DESCRIPTIONS,
            description_chars = MAX_DESCRIPTION_CHARS,
        )
    }
}

/// Extracts the seed term from a prompt rendered by [`KeywordPrompt`].
pub fn seed_from_prompt(prompt: &str) -> Option<&str> {
    prompt
        .lines()
        .find_map(|line| line.trim().strip_prefix(SEED_MARKER))
        .map(str::trim)
        .filter(|seed| !seed.is_empty())
}
