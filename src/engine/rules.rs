//! User-defined classification rules. Drafts coming from the cli/UI are loose
//! bags of optional fields; they get validated into [ActivityRule] with typed
//! predicates before ever reaching storage or the matcher.

use std::{fmt::Display, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum TitleCondition {
    Contains,
    StartsWith,
    EndsWith,
    Equals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum DurationCondition {
    #[serde(rename = ">")]
    #[clap(name = "gt")]
    Greater,
    #[serde(rename = "<")]
    #[clap(name = "lt")]
    Less,
    #[serde(rename = "=")]
    #[clap(name = "eq")]
    Equal,
    #[serde(rename = ">=")]
    #[clap(name = "ge")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    #[clap(name = "le")]
    LessOrEqual,
}

impl DurationCondition {
    pub fn evaluate(&self, left: i64, right: i64) -> bool {
        match self {
            DurationCondition::Greater => left > right,
            DurationCondition::Less => left < right,
            DurationCondition::Equal => left == right,
            DurationCondition::GreaterOrEqual => left >= right,
            DurationCondition::LessOrEqual => left <= right,
        }
    }
}

/// Verdict value carried by a rule. Persisted as 1/0 to stay compatible with
/// rule exports from other trackers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(into = "u8", try_from = "u8")]
pub enum Rating {
    Distracting,
    Productive,
}

impl From<Rating> for u8 {
    fn from(value: Rating) -> Self {
        match value {
            Rating::Distracting => 0,
            Rating::Productive => 1,
        }
    }
}

impl TryFrom<u8> for Rating {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Rating::Distracting),
            1 => Ok(Rating::Productive),
            other => Err(format!("rating must be 0 or 1, got {other}")),
        }
    }
}

impl Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rating::Distracting => write!(f, "distracting"),
            Rating::Productive => write!(f, "productive"),
        }
    }
}

/// A single fully-formed predicate. A rule matches only when every one of its
/// predicates matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RulePredicate {
    Title {
        condition: TitleCondition,
        needle: Arc<str>,
    },
    Duration {
        condition: DurationCondition,
        seconds: i64,
    },
    App {
        name: Arc<str>,
    },
    Domain {
        domain: Arc<str>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRule {
    pub id: u64,
    pub name: Arc<str>,
    pub predicates: Vec<RulePredicate>,
    pub rating: Rating,
    pub active: bool,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

/// Loose rule shape the way the cli and UI submit it. Validation happens here,
/// at creation time, so the matcher can assume well-formed rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    #[serde(default)]
    pub title_condition: Option<TitleCondition>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration_condition: Option<DurationCondition>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    pub rating: Option<Rating>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Default for RuleDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            title_condition: None,
            title: None,
            duration_condition: None,
            duration: None,
            app_name: None,
            domain: None,
            rating: None,
            active: default_active(),
        }
    }
}

impl RuleDraft {
    /// Turns the draft into a validated rule. Condition fields inconsistent
    /// with their operand, a missing rating, or a draft with no predicates at
    /// all are rejected with [EngineError::MalformedRule].
    pub fn validate(self, id: u64, created_at: DateTime<Utc>) -> Result<ActivityRule, EngineError> {
        let mut predicates = vec![];

        match (self.title_condition, self.title) {
            (Some(condition), Some(needle)) if !needle.is_empty() => {
                predicates.push(RulePredicate::Title {
                    condition,
                    needle: needle.into(),
                })
            }
            (None, None) => {}
            _ => {
                return Err(EngineError::MalformedRule(
                    "title condition and title must be specified together".into(),
                ))
            }
        }

        match (self.duration_condition, self.duration) {
            (Some(condition), Some(seconds)) => {
                if seconds < 0 {
                    return Err(EngineError::MalformedRule(
                        "duration must not be negative".into(),
                    ));
                }
                predicates.push(RulePredicate::Duration { condition, seconds })
            }
            (None, None) => {}
            _ => {
                return Err(EngineError::MalformedRule(
                    "duration condition and duration must be specified together".into(),
                ))
            }
        }

        if let Some(name) = self.app_name.filter(|v| !v.is_empty()) {
            predicates.push(RulePredicate::App { name: name.into() });
        }

        if let Some(domain) = self.domain.filter(|v| !v.is_empty()) {
            predicates.push(RulePredicate::Domain {
                domain: domain.to_lowercase().into(),
            });
        }

        if predicates.is_empty() {
            return Err(EngineError::MalformedRule(
                "a rule needs at least one predicate".into(),
            ));
        }

        let Some(rating) = self.rating else {
            return Err(EngineError::MalformedRule("a rule needs a rating".into()));
        };

        if self.name.is_empty() {
            return Err(EngineError::MalformedRule("a rule needs a name".into()));
        }

        Ok(ActivityRule {
            id,
            name: self.name.into(),
            predicates,
            rating,
            active: self.active,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn base_draft() -> RuleDraft {
        RuleDraft {
            name: "videos".into(),
            rating: Some(Rating::Distracting),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_collects_typed_predicates() {
        let draft = RuleDraft {
            title_condition: Some(TitleCondition::Contains),
            title: Some("youtube".into()),
            duration_condition: Some(DurationCondition::GreaterOrEqual),
            duration: Some(60),
            ..base_draft()
        };

        let rule = draft
            .validate(1, Utc.timestamp_opt(1_600_000_000, 0).unwrap())
            .unwrap();
        assert_eq!(rule.predicates.len(), 2);
        assert!(rule.active);
        assert_eq!(rule.rating, Rating::Distracting);
    }

    #[test]
    fn test_validate_rejects_condition_without_operand() {
        let draft = RuleDraft {
            title_condition: Some(TitleCondition::Contains),
            ..base_draft()
        };

        assert!(matches!(
            draft.validate(1, Utc::now()),
            Err(EngineError::MalformedRule(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_predicate_set() {
        assert!(matches!(
            base_draft().validate(1, Utc::now()),
            Err(EngineError::MalformedRule(_))
        ));
    }

    #[test]
    fn test_rating_round_trips_as_number() {
        let json = serde_json::to_string(&Rating::Distracting).unwrap();
        assert_eq!(json, "0");
        assert_eq!(
            serde_json::from_str::<Rating>("1").unwrap(),
            Rating::Productive
        );
        assert!(serde_json::from_str::<Rating>("2").is_err());
    }
}
