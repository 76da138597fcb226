//! Fan-out of session state to subscribers.
//!
//! Each session owns a `watch` channel: it only ever holds the newest
//! [`SessionUpdate`], so late subscribers get the current state straight away
//! and slow readers simply skip intermediate values. Final scores go through a
//! separate `broadcast` feed consumed by the leaderboard stream.

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};
use tracing::debug;
use uuid::Uuid;

use crate::state::phase_clock::Phase;

/// Reason a [`SessionUpdate`] was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Initial state when the session is opened.
    Snapshot,
    /// Periodic refresh of the remaining time.
    Tick,
    /// The phase changed.
    PhaseChanged,
    /// An accepted press changed the score.
    ScoreChanged,
    /// A user registered.
    Registration,
    /// The session ended and its score is frozen.
    Ended,
}

/// Latest known state of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    /// Session identifier.
    pub session_id: Uuid,
    /// Community owning the session.
    pub community_id: Uuid,
    /// Phase at `emitted_at`.
    pub phase: Phase,
    /// Seconds left in the phase at `emitted_at`.
    pub seconds_remaining: f64,
    /// Progress fraction at `emitted_at`.
    pub progress: f64,
    /// Running score.
    pub current_score: u32,
    /// Frozen score once ended.
    pub final_score: Option<u32>,
    /// Number of registered users.
    pub registered: usize,
    /// What triggered this update.
    pub kind: UpdateKind,
    /// Server instant the update was computed at.
    pub emitted_at: OffsetDateTime,
}

/// Final score of a session, published once when it ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalScore {
    /// Session that ended.
    pub session_id: Uuid,
    /// Community owning the session.
    pub community_id: Uuid,
    /// Frozen score.
    pub final_score: u32,
    /// Instant the button phase closed.
    pub ended_at: OffsetDateTime,
}

/// Registry of per-session state channels plus the final score feed.
pub struct NotificationHub {
    sessions: DashMap<Uuid, watch::Sender<SessionUpdate>>,
    final_scores: broadcast::Sender<FinalScore>,
}

impl NotificationHub {
    /// Build a hub whose final score feed buffers `final_score_capacity` events.
    pub fn new(final_score_capacity: usize) -> Self {
        let (final_scores, _receiver) = broadcast::channel(final_score_capacity.max(1));
        Self {
            sessions: DashMap::new(),
            final_scores,
        }
    }

    /// Create (or reset) the channel of a session with its initial state.
    pub fn open(&self, initial: SessionUpdate) -> watch::Receiver<SessionUpdate> {
        let sender = self
            .sessions
            .entry(initial.session_id)
            .or_insert_with(|| watch::channel(initial.clone()).0);
        sender.send_replace(initial);
        sender.subscribe()
    }

    /// Replace the latest state of a session. Never blocks.
    pub fn publish(&self, update: SessionUpdate) {
        match self.sessions.get(&update.session_id) {
            Some(sender) => {
                // `send_replace` stores the value even with zero receivers.
                sender.send_replace(update);
            }
            None => {
                debug!(session_id = %update.session_id, "publishing to a session without channel");
                drop(self.open(update));
            }
        }
    }

    /// Subscribe to a session; the receiver already holds the latest state.
    pub fn subscribe(&self, session_id: Uuid) -> Option<watch::Receiver<SessionUpdate>> {
        self.sessions.get(&session_id).map(|sender| sender.subscribe())
    }

    /// Latest state of a session, if it has a channel.
    pub fn latest(&self, session_id: Uuid) -> Option<SessionUpdate> {
        self.sessions
            .get(&session_id)
            .map(|sender| sender.borrow().clone())
    }

    /// Drop a session channel; open receivers observe the sender closing.
    pub fn close(&self, session_id: Uuid) -> bool {
        self.sessions.remove(&session_id).is_some()
    }

    /// Number of sessions with an open channel.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Announce a final score to leaderboard subscribers, ignoring missing receivers.
    pub fn announce_final(&self, score: FinalScore) {
        let _ = self.final_scores.send(score);
    }

    /// Register a new final score subscriber.
    pub fn subscribe_final_scores(&self) -> broadcast::Receiver<FinalScore> {
        self.final_scores.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(session_id: Uuid, score: u32, kind: UpdateKind) -> SessionUpdate {
        SessionUpdate {
            session_id,
            community_id: Uuid::nil(),
            phase: Phase::ButtonPhase,
            seconds_remaining: 10.0,
            progress: 0.5,
            current_score: score,
            final_score: None,
            registered: 0,
            kind,
            emitted_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn late_subscriber_sees_latest_state() {
        let hub = NotificationHub::new(4);
        let id = Uuid::new_v4();
        hub.open(update(id, 0, UpdateKind::Snapshot));
        hub.publish(update(id, 1, UpdateKind::ScoreChanged));
        hub.publish(update(id, 2, UpdateKind::ScoreChanged));

        let receiver = hub.subscribe(id).unwrap();
        assert_eq!(receiver.borrow().current_score, 2);
        assert_eq!(hub.latest(id).unwrap().kind, UpdateKind::ScoreChanged);
    }

    #[tokio::test]
    async fn slow_subscriber_is_coalesced_to_newest() {
        let hub = NotificationHub::new(4);
        let id = Uuid::new_v4();
        hub.open(update(id, 0, UpdateKind::Snapshot));
        let mut receiver = hub.subscribe(id).unwrap();

        for score in 1..=50 {
            hub.publish(update(id, score, UpdateKind::ScoreChanged));
        }

        receiver.changed().await.unwrap();
        assert_eq!(receiver.borrow_and_update().current_score, 50);
        assert!(!receiver.has_changed().unwrap());
    }

    #[tokio::test]
    async fn dropped_receivers_never_block_publishers() {
        let hub = NotificationHub::new(4);
        let id = Uuid::new_v4();
        hub.open(update(id, 0, UpdateKind::Snapshot));
        drop(hub.subscribe(id));
        hub.publish(update(id, 7, UpdateKind::ScoreChanged));
        assert_eq!(hub.latest(id).unwrap().current_score, 7);
    }

    #[tokio::test]
    async fn closing_a_session_ends_subscriptions() {
        let hub = NotificationHub::new(4);
        let id = Uuid::new_v4();
        hub.open(update(id, 0, UpdateKind::Snapshot));
        let mut receiver = hub.subscribe(id).unwrap();

        assert!(hub.close(id));
        assert!(receiver.changed().await.is_err());
        assert!(hub.subscribe(id).is_none());
        assert_eq!(hub.session_count(), 0);
    }

    #[tokio::test]
    async fn final_scores_reach_every_subscriber() {
        let hub = NotificationHub::new(4);
        let mut first = hub.subscribe_final_scores();
        let mut second = hub.subscribe_final_scores();
        let score = FinalScore {
            session_id: Uuid::new_v4(),
            community_id: Uuid::new_v4(),
            final_score: 3,
            ended_at: OffsetDateTime::UNIX_EPOCH,
        };

        hub.announce_final(score.clone());

        assert_eq!(first.recv().await.unwrap(), score);
        assert_eq!(second.recv().await.unwrap(), score);
    }
}
