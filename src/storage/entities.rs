use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{domain::activity_signature, rules::Rating};

/// One classified activity sample flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedSampleEntity {
    pub title: Arc<str>,
    pub owner_name: Arc<str>,
    /// Extracted domain, empty when the activity isn't browser-shaped.
    pub domain: Arc<str>,
    pub rating: Option<Rating>,
    pub rule_id: Option<u64>,
    pub moment: DateTime<Utc>,
    #[serde(with = "duration_ser")]
    pub duration: Duration,
}

/// The struct stored on disk. Consecutive samples of the same activity are
/// collapsed into one interval to keep day files small.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedIntervalEntity {
    pub title: Arc<str>,
    pub owner_name: Arc<str>,
    #[serde(default)]
    pub domain: Arc<str>,
    #[serde(default)]
    pub rating: Option<Rating>,
    #[serde(default)]
    pub rule_id: Option<u64>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub start: DateTime<Utc>,
    #[serde(with = "duration_ser")]
    pub duration: Duration,
}

impl ClassifiedIntervalEntity {
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration
    }

    pub fn set_end(&mut self, v: DateTime<Utc>) {
        self.duration = v - self.start;
    }

    pub fn signature(&self) -> Arc<str> {
        activity_signature(&self.owner_name, &self.domain)
    }

    /// True when `sample` continues the same activity with the same verdict.
    pub fn same_activity(&self, sample: &ClassifiedSampleEntity) -> bool {
        self.title == sample.title
            && self.owner_name == sample.owner_name
            && self.rating == sample.rating
    }

    /// Splits an interval into the parts before and after `split`. Used when
    /// clamping intervals to a report range.
    pub fn split_by(
        self,
        split: DateTime<Utc>,
    ) -> (
        Option<ClassifiedIntervalEntity>,
        Option<ClassifiedIntervalEntity>,
    ) {
        let end = self.end();
        if split < self.start {
            (None, Some(self))
        } else if split >= end {
            (Some(self), None)
        } else {
            let before = ClassifiedIntervalEntity {
                duration: split - self.start,
                ..self.clone()
            };
            let after = ClassifiedIntervalEntity {
                start: split,
                duration: end - split,
                ..self
            };
            (Some(before), Some(after))
        }
    }

    /// Returns the part of the interval inside [from, to), if any.
    pub fn clamp(
        self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Option<ClassifiedIntervalEntity> {
        self.split_by(from).1.and_then(|v| v.split_by(to).0)
    }
}

impl From<ClassifiedSampleEntity> for ClassifiedIntervalEntity {
    fn from(sample: ClassifiedSampleEntity) -> Self {
        ClassifiedIntervalEntity {
            title: sample.title,
            owner_name: sample.owner_name,
            domain: sample.domain,
            rating: sample.rating,
            rule_id: sample.rule_id,
            start: sample.moment,
            duration: sample.duration,
        }
    }
}

mod duration_ser {
    use chrono::Duration;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = i64::deserialize(deserializer)?;
        Ok(Duration::seconds(s))
    }
}
