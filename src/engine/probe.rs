//! Inbound activity feed. The actual window/process enumeration lives in a
//! separate probe process; the engine only consumes its records.

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::warn;

/// One sample of foreground-window activity, immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: u64,
    pub platform: Arc<str>,
    /// Window title, for example 'Vibing in YouTube - Google Chrome'.
    pub title: Arc<str>,
    pub owner_process_id: u32,
    #[serde(default)]
    pub owner_bundle_id: Option<Arc<str>>,
    /// Application name, for example 'Google Chrome'.
    pub owner_name: Arc<str>,
    #[serde(default)]
    pub url: Option<Arc<str>>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: i64,
}

/// Contract the external window probe must satisfy. Each record is consumed
/// exactly once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityProbe: Send + 'static {
    /// Returns records produced since the previous poll, oldest first.
    async fn poll(&mut self) -> Result<Vec<ActivityRecord>>;
}

/// Tails a JSON-lines feed file written by the probe process. Only complete
/// lines are consumed; a partial trailing line is left for the next poll.
pub struct FeedProbe {
    path: PathBuf,
    offset: u64,
}

impl FeedProbe {
    pub fn new(path: PathBuf) -> Self {
        Self { path, offset: 0 }
    }
}

#[async_trait]
impl ActivityProbe for FeedProbe {
    async fn poll(&mut self) -> Result<Vec<ActivityRecord>> {
        let mut file = match File::open(&self.path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata().await?.len();
        if len < self.offset {
            // Feed file was truncated or replaced by the probe.
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(vec![]);
        }

        file.seek(std::io::SeekFrom::Start(self.offset)).await?;
        let mut buffer = String::new();
        file.read_to_string(&mut buffer).await?;

        let complete = match buffer.rfind('\n') {
            Some(v) => v + 1,
            None => return Ok(vec![]),
        };

        let mut records = vec![];
        for line in buffer[..complete].lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ActivityRecord>(line) {
                Ok(v) => records.push(v),
                Err(e) => {
                    // Might happen if the probe got killed mid write.
                    warn!("Skipping illegal feed line {line}: {e}")
                }
            }
        }
        self.offset += complete as u64;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use anyhow::Result;
    use chrono::TimeZone;

    use super::*;

    fn record(id: u64, title: &str) -> ActivityRecord {
        ActivityRecord {
            id,
            platform: "test".into(),
            title: title.into(),
            owner_process_id: 1,
            owner_bundle_id: None,
            owner_name: "test app".into(),
            url: None,
            timestamp: Utc.timestamp_opt(1_600_000_000, 0).unwrap(),
            duration_seconds: 5,
        }
    }

    #[tokio::test]
    async fn test_feed_probe_consumes_each_line_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("feed.jsonl");

        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "{}", serde_json::to_string(&record(1, "a"))?)?;
        writeln!(file, "{}", serde_json::to_string(&record(2, "b"))?)?;

        let mut probe = FeedProbe::new(path.clone());
        let first = probe.poll().await?;
        assert_eq!(first.iter().map(|v| v.id).collect::<Vec<_>>(), vec![1, 2]);

        assert!(probe.poll().await?.is_empty());

        writeln!(file, "{}", serde_json::to_string(&record(3, "c"))?)?;
        let third = probe.poll().await?;
        assert_eq!(third.iter().map(|v| v.id).collect::<Vec<_>>(), vec![3]);

        Ok(())
    }

    #[tokio::test]
    async fn test_feed_probe_skips_corrupted_and_partial_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("feed.jsonl");

        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "{{ not json")?;
        writeln!(file, "{}", serde_json::to_string(&record(7, "a"))?)?;
        write!(file, "{{\"id\": 8")?;

        let mut probe = FeedProbe::new(path);
        let records = probe.poll().await?;
        assert_eq!(records.iter().map(|v| v.id).collect::<Vec<_>>(), vec![7]);

        Ok(())
    }
}
