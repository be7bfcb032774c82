//! Fan-out of session state to observer surfaces. Delivery per observer keeps
//! publish order, but there is no delivery to observers that weren't
//! subscribed yet. Every subscriber therefore receives the current
//! authoritative snapshot at subscribe time (the reconciliation read) and must
//! re-subscribe after a lag.

use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use super::entry::{SessionEvent, SessionSnapshot};

const CHANNEL_CAPACITY: usize = 64;

pub struct SessionBroadcaster {
    sender: broadcast::Sender<SessionEvent>,
    current: Mutex<SessionSnapshot>,
}

impl Default for SessionBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            current: Mutex::new(SessionSnapshot::idle()),
        }
    }

    /// Publishes a transition. Only the session state machine may call this;
    /// all other surfaces are read-only projections.
    pub(crate) fn publish(&self, event: SessionEvent, after: SessionSnapshot) {
        {
            let mut guard = self.current.lock().unwrap();
            *guard = after;
        }
        // Zero receivers is fine, observers reconcile on subscribe.
        let delivered = self.sender.send(event).unwrap_or(0);
        debug!("Published session event to {delivered} observers");
    }

    /// Registers an observer. The returned snapshot is the authoritative state
    /// at subscription time; the receiver only carries transitions that happen
    /// afterwards.
    pub fn subscribe(&self) -> (SessionSnapshot, broadcast::Receiver<SessionEvent>) {
        // Lock before subscribing so no event can slip between the snapshot
        // read and the receiver creation.
        let guard = self.current.lock().unwrap();
        let receiver = self.sender.subscribe();
        (guard.clone(), receiver)
    }

    /// Reconciliation read without joining the event stream.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.current.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::session::entry::SessionPhase;

    use super::*;

    fn running_snapshot(elapsed: i64) -> SessionSnapshot {
        SessionSnapshot {
            phase: SessionPhase::Running,
            time_entry_id: Some("entry".into()),
            is_focus_mode: true,
            paused_at: None,
            requires_resume: false,
            elapsed_seconds: elapsed,
            target_duration_seconds: None,
        }
    }

    #[tokio::test]
    async fn test_observers_receive_events_in_publish_order() {
        let broadcaster = SessionBroadcaster::new();
        let (_, mut receiver) = broadcaster.subscribe();

        for elapsed in 0..3 {
            let snapshot = running_snapshot(elapsed);
            broadcaster.publish(
                SessionEvent::Running {
                    snapshot: snapshot.clone(),
                },
                snapshot,
            );
        }

        for elapsed in 0..3 {
            let event = receiver.recv().await.unwrap();
            match event {
                SessionEvent::Running { snapshot } => {
                    assert_eq!(snapshot.elapsed_seconds, elapsed)
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_converges_through_reconciliation_read() {
        let broadcaster = SessionBroadcaster::new();

        let snapshot = running_snapshot(42);
        broadcaster.publish(
            SessionEvent::Running {
                snapshot: snapshot.clone(),
            },
            snapshot.clone(),
        );

        // Subscribed after the publish: the event is gone, the snapshot isn't.
        let (reconciled, mut receiver) = broadcaster.subscribe();
        assert_eq!(reconciled, snapshot);
        assert!(matches!(
            receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
