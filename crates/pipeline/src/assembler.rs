//! Turns deduplicated representatives into ad groups with suggested bids.

use crate::dedup::{rank_order, Representative};
use sem_core::hashing::content_hash;
use sem_core::types::{
    title_case, AdCopy, AdGroup, AuditRecord, BudgetConstraints, CampaignBrief, DropReason,
    GroupingPolicy, PlannedKeyword, RunState, ScoredCandidate, SearchIntent, SuggestedBid,
};
use std::collections::HashSet;

pub struct PlanAssembler {
    grouping: GroupingPolicy,
    max_plan_keywords: usize,
    conversion_rate: f64,
}

impl PlanAssembler {
    pub fn new(grouping: GroupingPolicy, max_plan_keywords: usize, conversion_rate: f64) -> Self {
        Self {
            grouping,
            max_plan_keywords,
            conversion_rate,
        }
    }

    /// Keep the best `max_plan_keywords` representatives. The rest come back
    /// as audit records and must not be persisted.
    pub fn cap(
        &self,
        mut representatives: Vec<Representative>,
    ) -> (Vec<Representative>, Vec<AuditRecord>) {
        representatives.sort_by(|a, b| rank_order(&a.scored, &b.scored));
        let overflow = if representatives.len() > self.max_plan_keywords {
            representatives.split_off(self.max_plan_keywords)
        } else {
            Vec::new()
        };
        let audit = overflow
            .into_iter()
            .map(|rep| AuditRecord {
                candidate_id: Some(rep.scored.candidate.id),
                keyword: rep.scored.candidate.keyword,
                stage: RunState::Persisting,
                reason: DropReason::OverPlanLimit {
                    limit: self.max_plan_keywords,
                },
            })
            .collect();
        (representatives, audit)
    }

    /// Group and price capped representatives, best first within each group.
    pub fn assemble(
        &self,
        brief: &CampaignBrief,
        mut representatives: Vec<ScoredCandidate>,
    ) -> Vec<AdGroup> {
        representatives.sort_by(rank_order);

        let fingerprint = brief.fingerprint();
        let planned = |scored: ScoredCandidate| PlannedKeyword {
            bid: suggest_bid(&scored, &brief.budget, self.conversion_rate),
            scored,
        };

        let mut groups = Vec::new();
        match self.grouping {
            GroupingPolicy::BySeed => {
                for (seed_index, seed) in brief.seeds.iter().enumerate() {
                    let keywords: Vec<PlannedKeyword> = representatives
                        .iter()
                        .filter(|s| s.candidate.seed_index == seed_index)
                        .cloned()
                        .map(planned)
                        .collect();
                    if keywords.is_empty() {
                        continue;
                    }
                    let name = title_case(seed);
                    groups.push(AdGroup {
                        id: group_id(&fingerprint, &name),
                        name,
                        seed: Some(seed.clone()),
                        intent: None,
                        ad_copy: group_copy(&keywords),
                        keywords,
                    });
                }
            }
            GroupingPolicy::ByIntent => {
                let mut used_names = HashSet::new();
                for intent in SearchIntent::ALL {
                    let keywords: Vec<PlannedKeyword> = representatives
                        .iter()
                        .filter(|s| s.candidate.intent == intent)
                        .cloned()
                        .map(planned)
                        .collect();
                    if keywords.is_empty() {
                        continue;
                    }
                    let texts: Vec<&str> = keywords.iter().map(|k| k.keyword()).collect();
                    let mut name = fallback_group_name(&texts);
                    if !used_names.insert(name.clone()) {
                        name = format!("{name} ({})", title_case(intent_label(intent)));
                        used_names.insert(name.clone());
                    }
                    groups.push(AdGroup {
                        id: group_id(&fingerprint, &name),
                        name,
                        seed: None,
                        intent: Some(intent),
                        ad_copy: group_copy(&keywords),
                        keywords,
                    });
                }
            }
            GroupingPolicy::Flat => {
                if !representatives.is_empty() {
                    let name = "All Keywords".to_string();
                    let keywords: Vec<PlannedKeyword> =
                        representatives.into_iter().map(planned).collect();
                    groups.push(AdGroup {
                        id: group_id(&fingerprint, &name),
                        name,
                        seed: None,
                        intent: None,
                        ad_copy: group_copy(&keywords),
                        keywords,
                    });
                }
            }
        }
        groups
    }
}

/// Ad copy for a group, taken from its keywords best first.
fn group_copy(keywords: &[PlannedKeyword]) -> AdCopy {
    AdCopy::merge(keywords.iter().map(|k| &k.scored.candidate.ad_copy))
}

/// Bid range from target CPA when the brief has one, otherwise the
/// platform's CPC range. Capped by max CPC and rounded to cents.
pub fn suggest_bid(scored: &ScoredCandidate, budget: &BudgetConstraints, conversion_rate: f64) -> SuggestedBid {
    let (competition, cpc_low, cpc_high) = scored
        .metrics
        .as_ref()
        .map(|m| (m.competition, m.cpc_low, m.cpc_high))
        .unwrap_or((0.0, 0.0, 0.0));

    let (mut low, mut high) = match budget.target_cpa.filter(|cpa| *cpa > 0.0) {
        Some(target_cpa) => {
            let base = target_cpa * conversion_rate;
            let multiplier = 1.0 + competition * 0.2;
            (base * multiplier * 0.8, base * multiplier * 1.2)
        }
        None => (cpc_low, cpc_high),
    };
    if let Some(max_cpc) = budget.max_cpc.filter(|m| *m > 0.0) {
        low = low.min(max_cpc);
        high = high.min(max_cpc);
    }
    SuggestedBid {
        low: round_cents(low),
        high: round_cents(high),
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Name a group from its best keyword.
pub fn fallback_group_name(keywords: &[&str]) -> String {
    let Some(first) = keywords.first() else {
        return "Unnamed Group".to_string();
    };
    let base = first.to_lowercase();
    let has_any = |terms: &[&str]| terms.iter().any(|t| base.contains(t));

    if has_any(&["buy", "purchase", "order"]) {
        "Purchase Intent".to_string()
    } else if has_any(&["best", "top", "review"]) {
        "Research Intent".to_string()
    } else if has_any(&["cheap", "discount", "deal"]) {
        "Price Focused".to_string()
    } else if has_any(&["near me", "local", "location"]) {
        "Local Search".to_string()
    } else {
        let words: Vec<&str> = base.split_whitespace().collect();
        match words.as_slice() {
            [] => "Unnamed Group".to_string(),
            [single] => format!("{} Group", title_case(single)),
            [.., last] => format!("{} Keywords", title_case(last)),
        }
    }
}

fn intent_label(intent: SearchIntent) -> &'static str {
    match intent {
        SearchIntent::Brand => "brand",
        SearchIntent::Transactional => "transactional",
        SearchIntent::Commercial => "commercial",
        SearchIntent::Informational => "informational",
    }
}

fn group_id(fingerprint: &str, name: &str) -> String {
    let mut id = content_hash(&["ad_group", fingerprint, name]);
    id.truncate(16);
    format!("ag-{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sem_core::types::{Candidate, EmbeddingVector, MatchType, MetricSnapshot};

    fn scored(ordinal: u32, keyword: &str, seed_index: usize, score: f64) -> ScoredCandidate {
        let intent = SearchIntent::classify(keyword, &[]);
        ScoredCandidate {
            candidate: Candidate {
                id: format!("id-{ordinal}"),
                ordinal,
                keyword: keyword.to_string(),
                seed_index,
                seed: String::new(),
                match_type: MatchType::Broad,
                confidence: 0.5,
                intent,
                ad_copy: AdCopy::fallback(keyword),
            },
            metrics: Some(MetricSnapshot {
                candidate_id: format!("id-{ordinal}"),
                search_volume: 1000,
                cpc_low: 0.456,
                cpc_high: 1.234,
                competition: 0.5,
                fetched_at: Utc::now(),
            }),
            score,
            valid: true,
            rejection: None,
        }
    }

    fn brief() -> CampaignBrief {
        CampaignBrief::new("US", "en", &["running shoes", "trail shoes", "socks"])
    }

    #[test]
    fn test_group_by_seed_orders_by_score() {
        let assembler = PlanAssembler::new(GroupingPolicy::BySeed, 150, 0.02);
        let reps = vec![
            scored(0, "running shoes", 0, 0.5),
            scored(1, "buy running shoes", 0, 0.9),
            scored(2, "trail shoes", 1, 0.7),
        ];
        let groups = assembler.assemble(&brief(), reps);

        assert_eq!(groups.len(), 2, "empty socks group omitted");
        assert_eq!(groups[0].name, "Running Shoes");
        assert_eq!(groups[0].keywords[0].keyword(), "buy running shoes");
        assert_eq!(groups[1].seed.as_deref(), Some("trail shoes"));
        assert!(groups[0].id.starts_with("ag-"));
        assert_eq!(
            groups[0].ad_copy.headlines,
            vec!["Buy Running Shoes", "Shop Now", "Best Deals"]
        );
        assert_eq!(groups[0].ad_copy.descriptions.len(), 2);
    }

    #[test]
    fn test_plan_cap_audits_overflow() {
        let assembler = PlanAssembler::new(GroupingPolicy::Flat, 2, 0.02);
        let reps = vec![
            scored(0, "a shoes", 0, 0.2),
            scored(1, "b shoes", 0, 0.9),
            scored(2, "c shoes", 0, 0.5),
        ]
        .into_iter()
        .map(|scored| Representative {
            scored,
            embedding: EmbeddingVector(vec![1.0]),
        })
        .collect();
        let (kept, audit) = assembler.cap(reps);
        let kept_keywords: Vec<&str> = kept
            .iter()
            .map(|r| r.scored.candidate.keyword.as_str())
            .collect();
        assert_eq!(kept_keywords, vec!["b shoes", "c shoes"]);

        let groups = assembler.assemble(&brief(), kept.into_iter().map(|r| r.scored).collect());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "All Keywords");
        assert_eq!(groups[0].keywords.len(), 2);
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].keyword, "a shoes");
        assert_eq!(audit[0].reason, DropReason::OverPlanLimit { limit: 2 });
    }

    #[test]
    fn test_group_by_intent_names() {
        let assembler = PlanAssembler::new(GroupingPolicy::ByIntent, 150, 0.02);
        let reps = vec![
            scored(0, "buy running shoes", 0, 0.9),
            scored(1, "how to clean shoes", 0, 0.4),
            scored(2, "trail running shoes", 0, 0.6),
        ];
        let groups = assembler.assemble(&brief(), reps);
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Purchase Intent", "Shoes Keywords", "Shoes Keywords (Informational)"]);
        assert_eq!(groups[1].intent, Some(SearchIntent::Commercial));
    }

    #[test]
    fn test_fallback_names() {
        assert_eq!(fallback_group_name(&[]), "Unnamed Group");
        assert_eq!(fallback_group_name(&["cheap boots"]), "Price Focused");
        assert_eq!(fallback_group_name(&["shoe repair near me"]), "Local Search");
        assert_eq!(fallback_group_name(&["top sneakers"]), "Research Intent");
        assert_eq!(fallback_group_name(&["sneakers"]), "Sneakers Group");
    }

    #[test]
    fn test_bid_from_target_cpa() {
        let budget = BudgetConstraints {
            target_cpa: Some(50.0),
            ..BudgetConstraints::default()
        };
        // base 1.0, multiplier 1.1
        let bid = suggest_bid(&scored(0, "shoes", 0, 0.5), &budget, 0.02);
        assert_eq!(bid, SuggestedBid { low: 0.88, high: 1.32 });

        let capped = BudgetConstraints {
            max_cpc: Some(1.0),
            ..budget
        };
        let bid = suggest_bid(&scored(0, "shoes", 0, 0.5), &capped, 0.02);
        assert_eq!(bid, SuggestedBid { low: 0.88, high: 1.0 });
    }

    #[test]
    fn test_bid_from_cpc_range() {
        let bid = suggest_bid(&scored(0, "shoes", 0, 0.5), &BudgetConstraints::default(), 0.02);
        assert_eq!(bid, SuggestedBid { low: 0.46, high: 1.23 });
    }
}
