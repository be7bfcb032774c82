//! Turns one activity record plus the user's rule set into a verdict. Pure and
//! deterministic: the same inputs always yield the same winner.

use tracing::debug;

use super::{
    domain::{domain_from_title, domain_from_url},
    probe::ActivityRecord,
    rules::{ActivityRule, Rating, RulePredicate, TitleCondition},
};

/// Classification result for one activity sample. `rating` stays `None` when
/// no rule matched; callers must treat that as unclassified rather than
/// defaulting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict<'a> {
    pub rating: Option<Rating>,
    pub matched: Option<&'a ActivityRule>,
}

/// Evaluates `record` against the rule set. Every predicate of a rule must
/// hold for the rule to match; among matching rules the first by creation
/// order wins. Rules without predicates never match (treated as inactive).
pub fn classify<'a>(record: &ActivityRecord, rules: &'a [ActivityRule]) -> Verdict<'a> {
    let mut candidates = rules
        .iter()
        .filter(|rule| rule.active && !rule.predicates.is_empty())
        .collect::<Vec<_>>();
    candidates.sort_by_key(|rule| (rule.created_at, rule.id));

    let record_domain = record_domain(record);

    for rule in candidates {
        if rule
            .predicates
            .iter()
            .all(|predicate| matches_predicate(predicate, record, &record_domain))
        {
            return Verdict {
                rating: Some(rule.rating),
                matched: Some(rule),
            };
        }
    }

    debug!(
        "No rule matched '{}' ({}), leaving unclassified",
        record.title, record.owner_name
    );
    Verdict {
        rating: None,
        matched: None,
    }
}

/// Domain of the record: taken from the url when present, otherwise dug out of
/// the window title. Empty when nothing is recognized.
pub fn record_domain(record: &ActivityRecord) -> String {
    match record.url.as_deref() {
        Some(url) if !url.is_empty() => domain_from_url(url),
        _ => domain_from_title(&record.title, &record.owner_name),
    }
}

fn matches_predicate(
    predicate: &RulePredicate,
    record: &ActivityRecord,
    record_domain: &str,
) -> bool {
    match predicate {
        RulePredicate::Title { condition, needle } => {
            let title = record.title.to_lowercase();
            let needle = needle.to_lowercase();
            match condition {
                TitleCondition::Contains => title.contains(&needle),
                TitleCondition::StartsWith => title.starts_with(&needle),
                TitleCondition::EndsWith => title.ends_with(&needle),
                TitleCondition::Equals => title == needle,
            }
        }
        RulePredicate::Duration { condition, seconds } => {
            condition.evaluate(record.duration_seconds, *seconds)
        }
        RulePredicate::App { name } => {
            record.owner_name.eq_ignore_ascii_case(name)
                || record
                    .owner_bundle_id
                    .as_deref()
                    .is_some_and(|bundle| bundle.eq_ignore_ascii_case(name))
        }
        RulePredicate::Domain { domain } => {
            !record_domain.is_empty()
                && (record_domain == domain.as_ref()
                    || record_domain.ends_with(&format!(".{domain}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use crate::engine::rules::DurationCondition;

    use super::*;

    fn record(title: &str, owner: &str, duration: i64, url: Option<&str>) -> ActivityRecord {
        ActivityRecord {
            id: 1,
            platform: "test".into(),
            title: title.into(),
            owner_process_id: 10,
            owner_bundle_id: None,
            owner_name: owner.into(),
            url: url.map(Arc::from),
            timestamp: Utc.timestamp_opt(1_600_000_000, 0).unwrap(),
            duration_seconds: duration,
        }
    }

    fn rule(id: u64, created_offset: i64, rating: Rating, predicates: Vec<RulePredicate>) -> ActivityRule {
        ActivityRule {
            id,
            name: format!("rule {id}").into(),
            predicates,
            rating,
            active: true,
            created_at: Utc.timestamp_opt(1_500_000_000 + created_offset, 0).unwrap(),
        }
    }

    #[test]
    fn test_title_contains_matches_case_insensitively() {
        let rules = vec![rule(
            1,
            0,
            Rating::Distracting,
            vec![RulePredicate::Title {
                condition: TitleCondition::Contains,
                needle: "youtube".into(),
            }],
        )];
        let verdict = classify(&record("YouTube - Watch videos", "chrome", 120, None), &rules);
        assert_eq!(verdict.rating, Some(Rating::Distracting));
        assert_eq!(verdict.matched.map(|v| v.id), Some(1));
    }

    #[test]
    fn test_all_predicates_must_hold() {
        let rules = vec![rule(
            1,
            0,
            Rating::Distracting,
            vec![
                RulePredicate::Title {
                    condition: TitleCondition::Contains,
                    needle: "youtube".into(),
                },
                RulePredicate::Duration {
                    condition: DurationCondition::Greater,
                    seconds: 300,
                },
            ],
        )];
        let verdict = classify(&record("YouTube", "chrome", 120, None), &rules);
        assert_eq!(verdict.rating, None);
        assert!(verdict.matched.is_none());
    }

    #[test]
    fn test_first_match_by_creation_order_wins() {
        let title = |needle: &str| RulePredicate::Title {
            condition: TitleCondition::Contains,
            needle: needle.into(),
        };
        // Stored out of creation order on purpose.
        let rules = vec![
            rule(2, 50, Rating::Productive, vec![title("videos")]),
            rule(1, 10, Rating::Distracting, vec![title("videos")]),
        ];
        let verdict = classify(&record("watch videos", "chrome", 10, None), &rules);
        assert_eq!(verdict.matched.map(|v| v.id), Some(1));
        assert_eq!(verdict.rating, Some(Rating::Distracting));
    }

    #[test]
    fn test_inactive_rules_are_skipped() {
        let mut skipped = rule(
            1,
            0,
            Rating::Distracting,
            vec![RulePredicate::Title {
                condition: TitleCondition::Contains,
                needle: "videos".into(),
            }],
        );
        skipped.active = false;
        let rules = [skipped];
        let verdict = classify(&record("watch videos", "chrome", 10, None), &rules);
        assert_eq!(verdict.rating, None);
    }

    #[test]
    fn test_domain_predicate_uses_url_then_title() {
        let rules = vec![rule(
            1,
            0,
            Rating::Distracting,
            vec![RulePredicate::Domain {
                domain: "youtube.com".into(),
            }],
        )];

        let by_url = record(
            "something",
            "Google Chrome",
            10,
            Some("https://music.youtube.com/playlist"),
        );
        assert_eq!(classify(&by_url, &rules).rating, Some(Rating::Distracting));

        let by_title = record("Cat videos - YouTube - Google Chrome", "Google Chrome", 10, None);
        assert_eq!(classify(&by_title, &rules).rating, Some(Rating::Distracting));

        let unrelated = record("Cat videos", "vlc", 10, None);
        assert_eq!(classify(&unrelated, &rules).rating, None);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let rules = vec![
            rule(
                1,
                0,
                Rating::Productive,
                vec![RulePredicate::App {
                    name: "code".into(),
                }],
            ),
            rule(
                2,
                5,
                Rating::Distracting,
                vec![RulePredicate::Duration {
                    condition: DurationCondition::GreaterOrEqual,
                    seconds: 0,
                }],
            ),
        ];
        let sample = record("main.rs - code", "Code", 42, None);
        let first = classify(&sample, &rules);
        let second = classify(&sample, &rules);
        assert_eq!(first, second);
        assert_eq!(first.matched.map(|v| v.id), Some(1));
    }
}
