//! The single authoritative owner of focus-session state. All transitions are
//! serialized through one mutex; a second mutating call arriving while one is
//! in flight gets a conflict error instead of queueing behind it.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::{storage::entry_store::TimeEntryStore, utils::clock::Clock};

use super::{
    broadcast::SessionBroadcaster,
    entry::{SessionEvent, SessionPhase, SessionSnapshot, TimeEntry},
};
use crate::engine::error::EngineError;

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub description: Option<Arc<str>>,
    pub board_id: Option<Arc<str>>,
    pub item_id: Option<Arc<str>>,
    pub target_duration_seconds: Option<i64>,
    pub is_focus_mode: bool,
}

struct OpenSession {
    entry: TimeEntry,
    paused_at: Option<DateTime<Utc>>,
    /// Sum of all finished pause intervals. Session local, never persisted;
    /// elapsed time is always `(now - start) - paused_total`.
    paused_total: Duration,
    requires_resume: bool,
}

impl OpenSession {
    fn phase(&self) -> SessionPhase {
        if self.paused_at.is_some() {
            SessionPhase::Paused
        } else {
            SessionPhase::Running
        }
    }

    fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        // While paused the elapsed time is frozen at the pause moment.
        let effective_now = self.paused_at.unwrap_or(now);
        (effective_now - self.entry.start_time - self.paused_total)
            .num_seconds()
            .max(0)
    }

    fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase(),
            time_entry_id: Some(self.entry.id.clone()),
            is_focus_mode: self.entry.is_focus_mode,
            paused_at: self.paused_at,
            requires_resume: self.requires_resume,
            elapsed_seconds: self.elapsed_seconds(now),
            target_duration_seconds: self.entry.target_duration_seconds,
        }
    }
}

pub struct SessionMachine {
    state: Mutex<Option<OpenSession>>,
    store: Arc<dyn TimeEntryStore>,
    clock: Arc<dyn Clock>,
    broadcaster: Arc<SessionBroadcaster>,
    user_id: Arc<str>,
}

impl SessionMachine {
    pub fn new(
        store: Arc<dyn TimeEntryStore>,
        clock: Arc<dyn Clock>,
        broadcaster: Arc<SessionBroadcaster>,
        user_id: Arc<str>,
    ) -> Self {
        Self {
            state: Mutex::new(None),
            store,
            clock,
            broadcaster,
            user_id,
        }
    }

    pub fn broadcaster(&self) -> Arc<SessionBroadcaster> {
        self.broadcaster.clone()
    }

    /// Picks up an entry left open by a previous process run. Such an entry
    /// surfaces as paused with `requires_resume` set so the observer layer can
    /// ask the user to resume or complete it.
    pub async fn recover(&self) -> Result<Option<SessionSnapshot>> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Ok(None);
        }
        let Some(entry) = self.store.get_open(&self.user_id).await? else {
            return Ok(None);
        };

        info!("Recovered open time entry {} from a previous run", entry.id);
        let now = self.clock.time();
        let open = OpenSession {
            entry,
            paused_at: Some(now),
            paused_total: Duration::zero(),
            requires_resume: true,
        };
        let snapshot = open.snapshot(now);
        *guard = Some(open);
        self.broadcaster.publish(
            SessionEvent::Paused {
                snapshot: snapshot.clone(),
            },
            snapshot.clone(),
        );
        Ok(Some(snapshot))
    }

    pub async fn start(&self, options: StartOptions) -> Result<SessionSnapshot> {
        let mut guard = self.try_mutate("start")?;
        if guard.is_some() {
            return Err(EngineError::Conflict("a time entry is already open".into()).into());
        }

        let now = self.clock.time();
        let entry = TimeEntry {
            id: Uuid::new_v4().to_string().into(),
            user_id: self.user_id.clone(),
            board_id: options.board_id,
            item_id: options.item_id,
            description: options.description,
            start_time: now,
            end_time: None,
            target_duration_seconds: options.target_duration_seconds,
            is_focus_mode: options.is_focus_mode,
            duration_seconds: None,
            created_at: now,
        };

        // Persist before committing in memory, a failed write must leave the
        // machine idle.
        self.store.append_open(&entry).await?;

        let open = OpenSession {
            entry,
            paused_at: None,
            paused_total: Duration::zero(),
            requires_resume: false,
        };
        let snapshot = open.snapshot(now);
        *guard = Some(open);

        info!("Started session {:?}", snapshot.time_entry_id);
        self.broadcaster.publish(
            SessionEvent::Running {
                snapshot: snapshot.clone(),
            },
            snapshot.clone(),
        );
        Ok(snapshot)
    }

    pub async fn pause(&self) -> Result<SessionSnapshot> {
        let mut guard = self.try_mutate("pause")?;
        let open = guard.as_mut().ok_or(EngineError::InvalidState {
            attempted: "pause",
            phase: SessionPhase::Idle.as_str(),
        })?;
        if open.paused_at.is_some() {
            return Err(EngineError::InvalidState {
                attempted: "pause",
                phase: SessionPhase::Paused.as_str(),
            }
            .into());
        }

        let now = self.clock.time();
        open.paused_at = Some(now);
        let snapshot = open.snapshot(now);

        self.broadcaster.publish(
            SessionEvent::Paused {
                snapshot: snapshot.clone(),
            },
            snapshot.clone(),
        );
        Ok(snapshot)
    }

    pub async fn resume(&self) -> Result<SessionSnapshot> {
        let mut guard = self.try_mutate("resume")?;
        let open = guard.as_mut().ok_or(EngineError::InvalidState {
            attempted: "resume",
            phase: SessionPhase::Idle.as_str(),
        })?;
        let Some(paused_at) = open.paused_at.take() else {
            return Err(EngineError::InvalidState {
                attempted: "resume",
                phase: SessionPhase::Running.as_str(),
            }
            .into());
        };

        let now = self.clock.time();
        open.paused_total += now - paused_at;
        open.requires_resume = false;
        let snapshot = open.snapshot(now);

        self.broadcaster.publish(
            SessionEvent::Running {
                snapshot: snapshot.clone(),
            },
            snapshot.clone(),
        );
        Ok(snapshot)
    }

    /// Finishes the open session from either running or paused state. The
    /// entry becomes immutable history and the machine returns to idle.
    pub async fn complete(&self) -> Result<TimeEntry> {
        let mut guard = self.try_mutate("complete")?;
        let open = guard.as_mut().ok_or(EngineError::InvalidState {
            attempted: "complete",
            phase: SessionPhase::Idle.as_str(),
        })?;

        let now = self.clock.time();
        let elapsed = open.elapsed_seconds(now);

        let mut entry = open.entry.clone();
        entry.end_time = Some(now);
        entry.duration_seconds = Some(elapsed);

        self.store.complete(&entry).await?;
        *guard = None;

        info!("Completed session {} after {elapsed}s", entry.id);
        self.broadcaster.publish(
            SessionEvent::Completed {
                entry: entry.clone(),
            },
            SessionSnapshot::idle(),
        );
        Ok(entry)
    }

    /// Current projection of the machine. Safe to call from anywhere.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let guard = self.state.lock().await;
        match guard.as_ref() {
            Some(open) => open.snapshot(self.clock.time()),
            None => SessionSnapshot::idle(),
        }
    }

    fn try_mutate(
        &self,
        attempted: &'static str,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<OpenSession>>, EngineError> {
        self.state.try_lock().map_err(|_| {
            EngineError::Conflict(format!("another session call is in progress during {attempted}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    use crate::{
        storage::entry_store::TimeEntryStoreImpl,
        utils::clock::test_support::ManualClock,
    };

    use super::*;

    fn machine_with(
        dir: &std::path::Path,
        clock: ManualClock,
    ) -> (SessionMachine, Arc<SessionBroadcaster>) {
        let store = Arc::new(TimeEntryStoreImpl::new(dir.to_owned()).unwrap());
        let broadcaster = Arc::new(SessionBroadcaster::new());
        let machine = SessionMachine::new(
            store,
            Arc::new(clock),
            broadcaster.clone(),
            "local".into(),
        );
        (machine, broadcaster)
    }

    fn clock() -> ManualClock {
        ManualClock::starting_at(Utc.timestamp_opt(1_600_000_000, 0).unwrap())
    }

    fn focus_options() -> StartOptions {
        StartOptions {
            description: Some("deep work".into()),
            is_focus_mode: true,
            target_duration_seconds: Some(1500),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pause_excluded_from_persisted_duration() -> Result<()> {
        let dir = tempdir()?;
        let clock = clock();
        let (machine, _) = machine_with(dir.path(), clock.clone());

        machine.start(focus_options()).await?;
        clock.advance(Duration::seconds(30));
        machine.pause().await?;
        clock.advance(Duration::seconds(10));
        machine.resume().await?;
        clock.advance(Duration::seconds(30));
        // 70 seconds of wall clock, 10 of them paused.
        let entry = machine.complete().await?;

        assert_eq!(entry.duration_seconds, Some(60));
        assert_eq!(
            entry.end_time,
            Some(Utc.timestamp_opt(1_600_000_070, 0).unwrap())
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_start_while_open_is_a_conflict() -> Result<()> {
        let dir = tempdir()?;
        let clock = clock();
        let (machine, _) = machine_with(dir.path(), clock.clone());

        let first = machine.start(focus_options()).await?;
        clock.advance(Duration::seconds(5));
        let error = machine.start(focus_options()).await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<EngineError>(),
            Some(EngineError::Conflict(_))
        ));

        // The open entry is untouched.
        let snapshot = machine.snapshot().await;
        assert_eq!(snapshot.time_entry_id, first.time_entry_id);
        assert_eq!(snapshot.phase, SessionPhase::Running);
        Ok(())
    }

    #[tokio::test]
    async fn test_transitions_from_wrong_phase_are_rejected() -> Result<()> {
        let dir = tempdir()?;
        let (machine, _) = machine_with(dir.path(), clock());

        for attempt in [machine.pause().await, machine.resume().await] {
            let error = attempt.unwrap_err();
            assert!(matches!(
                error.downcast_ref::<EngineError>(),
                Some(EngineError::InvalidState { .. })
            ));
        }

        machine.start(focus_options()).await?;
        let error = machine.resume().await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidState {
                attempted: "resume",
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_immediate_pause_resume_is_a_no_op_on_elapsed() -> Result<()> {
        let dir = tempdir()?;
        let clock = clock();
        let (machine, _) = machine_with(dir.path(), clock.clone());

        machine.start(focus_options()).await?;
        clock.advance(Duration::seconds(20));
        machine.pause().await?;
        let resumed = machine.resume().await?;
        assert_eq!(resumed.elapsed_seconds, 20);

        clock.advance(Duration::seconds(20));
        let entry = machine.complete().await?;
        assert_eq!(entry.duration_seconds, Some(40));
        Ok(())
    }

    #[tokio::test]
    async fn test_elapsed_is_frozen_while_paused() -> Result<()> {
        let dir = tempdir()?;
        let clock = clock();
        let (machine, _) = machine_with(dir.path(), clock.clone());

        machine.start(focus_options()).await?;
        clock.advance(Duration::seconds(15));
        let paused = machine.pause().await?;
        assert_eq!(paused.elapsed_seconds, 15);

        clock.advance(Duration::seconds(100));
        assert_eq!(machine.snapshot().await.elapsed_seconds, 15);
        Ok(())
    }

    #[tokio::test]
    async fn test_recover_surfaces_requires_resume() -> Result<()> {
        let dir = tempdir()?;
        let clock = clock();

        {
            let (machine, _) = machine_with(dir.path(), clock.clone());
            machine.start(focus_options()).await?;
            // Process dies here, no clean complete.
        }

        clock.advance(Duration::seconds(120));
        let (machine, broadcaster) = machine_with(dir.path(), clock.clone());
        let recovered = machine.recover().await?.expect("entry should be found");
        assert!(recovered.requires_resume);
        assert_eq!(recovered.phase, SessionPhase::Paused);
        assert_eq!(broadcaster.snapshot(), recovered);

        let resumed = machine.resume().await?;
        assert!(!resumed.requires_resume);
        assert_eq!(resumed.phase, SessionPhase::Running);

        // Second recover is a no-op.
        assert!(machine.recover().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_observers_see_transitions_in_order() -> Result<()> {
        let dir = tempdir()?;
        let clock = clock();
        let (machine, broadcaster) = machine_with(dir.path(), clock.clone());
        let (initial, mut receiver) = broadcaster.subscribe();
        assert_eq!(initial.phase, SessionPhase::Idle);

        machine.start(focus_options()).await?;
        clock.advance(Duration::seconds(5));
        machine.pause().await?;
        machine.resume().await?;
        machine.complete().await?;

        assert!(matches!(
            receiver.recv().await?,
            SessionEvent::Running { .. }
        ));
        assert!(matches!(receiver.recv().await?, SessionEvent::Paused { .. }));
        assert!(matches!(
            receiver.recv().await?,
            SessionEvent::Running { .. }
        ));
        assert!(matches!(
            receiver.recv().await?,
            SessionEvent::Completed { .. }
        ));
        assert_eq!(broadcaster.snapshot().phase, SessionPhase::Idle);
        Ok(())
    }
}
