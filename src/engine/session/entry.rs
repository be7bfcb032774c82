use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One tracked session. Owned exclusively by the state machine while open
/// (`end_time == None`); becomes immutable history once completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: Arc<str>,
    pub user_id: Arc<str>,
    #[serde(default)]
    pub board_id: Option<Arc<str>>,
    #[serde(default)]
    pub item_id: Option<Arc<str>>,
    #[serde(default)]
    pub description: Option<Arc<str>>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub start_time: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub target_duration_seconds: Option<i64>,
    pub is_focus_mode: bool,
    /// Final active duration, written on completion. Whole seconds, excludes
    /// paused intervals.
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl TimeEntry {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Idle,
    Running,
    Paused,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Running => "running",
            SessionPhase::Paused => "paused",
        }
    }
}

/// Projection of session state broadcast to observer surfaces. Derived from
/// the open entry plus in-memory pause bookkeeping; never a source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub time_entry_id: Option<Arc<str>>,
    pub is_focus_mode: bool,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub paused_at: Option<DateTime<Utc>>,
    /// Set when an open entry survived a process restart and the user must
    /// decide between resuming and completing it.
    pub requires_resume: bool,
    pub elapsed_seconds: i64,
    #[serde(default)]
    pub target_duration_seconds: Option<i64>,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self {
            phase: SessionPhase::Idle,
            time_entry_id: None,
            is_focus_mode: false,
            paused_at: None,
            requires_resume: false,
            elapsed_seconds: 0,
            target_duration_seconds: None,
        }
    }
}

/// Event fanned out by the broadcaster. The state machine is the only
/// publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    Running { snapshot: SessionSnapshot },
    Paused { snapshot: SessionSnapshot },
    Completed { entry: TimeEntry },
}
