//! Tolerant parsing of model output into keyword proposals.
//!
//! Models wrap JSON in Markdown fences, leave trailing commas, and mix plain
//! strings with objects. Anything that still is not a JSON array after the
//! cleanup is reported as malformed.

use sem_core::providers::GeneratedKeyword;
use sem_core::types::MatchType;
use sem_core::ProviderError;
use serde_json::Value;

/// Parse a completion into keyword proposals.
pub fn parse_keyword_list(raw: &str) -> Result<Vec<GeneratedKeyword>, ProviderError> {
    let body = strip_code_fences(raw);
    let start = body.find('[');
    let end = body.rfind(']');
    let array = match (start, end) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => {
            return Err(ProviderError::Malformed(
                "response does not contain a JSON array".to_string(),
            ))
        }
    };

    let cleaned = remove_trailing_commas(array);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| ProviderError::Malformed(format!("invalid JSON array: {e}")))?;

    let items = value
        .as_array()
        .ok_or_else(|| ProviderError::Malformed("expected a JSON array".to_string()))?;

    let keywords: Vec<GeneratedKeyword> = items.iter().filter_map(keyword_from_value).collect();
    if keywords.is_empty() {
        return Err(ProviderError::Malformed(
            "response contained no keywords".to_string(),
        ));
    }
    Ok(keywords)
}

fn keyword_from_value(value: &Value) -> Option<GeneratedKeyword> {
    match value {
        Value::String(text) => non_empty(text).map(GeneratedKeyword::text),
        Value::Object(map) => {
            let text = ["keyword", "text", "term"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .and_then(non_empty)?;
            let match_type = map
                .get("match_type")
                .or_else(|| map.get("matchType"))
                .and_then(Value::as_str)
                .and_then(MatchType::parse);
            let confidence = map.get("confidence").and_then(|c| match c {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            });
            Some(GeneratedKeyword {
                text,
                match_type,
                confidence,
                headlines: string_list(map.get("headlines")),
                descriptions: string_list(map.get("descriptions")),
            })
        }
        _ => None,
    }
}

/// An array of strings, or a single string, as a list. Anything else is empty.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(non_empty)
            .collect(),
        Some(Value::String(text)) => non_empty(text).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Returns the content of the first fenced block, or the input unchanged.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_open = &trimmed[open + 3..];
    // skip the language tag ("json") up to the end of the fence line
    let content_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let content = &after_open[content_start..];
    match content.find("```") {
        Some(close) => content[..close].trim(),
        None => content.trim(),
    }
}

/// Drops commas that directly precede `]` or `}`, outside string literals.
fn remove_trailing_commas(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some(']') | Some('}')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_string_array() {
        let parsed = parse_keyword_list(r#"["trail shoes", "  buy trail shoes "]"#).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].text, "buy trail shoes");
        assert!(parsed[0].confidence.is_none());
    }

    #[test]
    fn test_parse_fenced_objects_with_trailing_commas() {
        let raw = "Here you go:\n```json\n[\n  {\"keyword\": \"waterproof trail shoes\", \"match_type\": \"PHRASE\", \"confidence\": 0.82},\n  {\"keyword\": \"trail shoes sale\", \"confidence\": \"0.6\",},\n]\n```\nEnjoy";
        let parsed = parse_keyword_list(raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].match_type, Some(MatchType::Phrase));
        assert_eq!(parsed[0].confidence, Some(0.82));
        assert_eq!(parsed[1].match_type, None);
        assert_eq!(parsed[1].confidence, Some(0.6));
    }

    #[test]
    fn test_parse_ad_copy() {
        let raw = r#"[
            {"keyword": "trail shoes", "headlines": ["Trail Shoes In Stock", " ", 7], "descriptions": "Grip for every trail."},
            {"keyword": "trail boots"}
        ]"#;
        let parsed = parse_keyword_list(raw).unwrap();
        assert_eq!(parsed[0].headlines, vec!["Trail Shoes In Stock"]);
        assert_eq!(parsed[0].descriptions, vec!["Grip for every trail."]);
        assert!(parsed[1].headlines.is_empty());
        assert!(parsed[1].descriptions.is_empty());
    }

    #[test]
    fn test_commas_inside_strings_survive() {
        let parsed = parse_keyword_list(r#"["shoes, boots,]", "socks",]"#).unwrap();
        assert_eq!(parsed[0].text, "shoes, boots,]");
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_malformed_responses() {
        assert!(matches!(
            parse_keyword_list("I cannot help with that."),
            Err(ProviderError::Malformed(_))
        ));
        assert!(matches!(parse_keyword_list("[]"), Err(ProviderError::Malformed(_))));
        assert!(matches!(
            parse_keyword_list("[{\"keyword\": \"\"}, 42]"),
            Err(ProviderError::Malformed(_))
        ));
        assert!(matches!(parse_keyword_list("[\"a\" \"b\"]"), Err(ProviderError::Malformed(_))));
    }
}
