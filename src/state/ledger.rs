//! Append-only, time-ordered press ledger of one session.

use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::state::session::ButtonPress;

/// Errors raised by the in-memory press ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The session has ended; its ledger no longer accepts presses.
    #[error("press ledger of session `{0}` is sealed")]
    Sealed(Uuid),
}

/// Append-only record of the presses accepted for one session.
///
/// Entries are kept ordered by timestamp; presses sharing a timestamp keep
/// their arrival order.
#[derive(Debug, Clone)]
pub struct PressLedger {
    session_id: Uuid,
    presses: Vec<ButtonPress>,
    sealed: bool,
}

impl PressLedger {
    /// Create an empty ledger for `session_id`.
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            presses: Vec::new(),
            sealed: false,
        }
    }

    /// Rebuild a ledger from presses read back from storage.
    pub fn restore(session_id: Uuid, presses: impl IntoIterator<Item = ButtonPress>) -> Self {
        let mut presses: Vec<ButtonPress> = presses
            .into_iter()
            .filter(|press| press.session_id == session_id)
            .collect();
        // Stable sort keeps storage order for equal timestamps.
        presses.sort_by_key(|press| press.pressed_at);
        Self {
            session_id,
            presses,
            sealed: false,
        }
    }

    /// Record a press and return the index it was stored at.
    pub fn append(&mut self, user_id: Uuid, pressed_at: OffsetDateTime) -> Result<usize, LedgerError> {
        if self.sealed {
            return Err(LedgerError::Sealed(self.session_id));
        }

        let index = self
            .presses
            .partition_point(|press| press.pressed_at <= pressed_at);
        self.presses.insert(
            index,
            ButtonPress {
                session_id: self.session_id,
                user_id,
                pressed_at,
            },
        );
        Ok(index)
    }

    /// Immutable copy of the presses in timestamp order.
    pub fn snapshot(&self) -> Arc<[ButtonPress]> {
        Arc::from(self.presses.as_slice())
    }

    /// Borrow the ordered presses.
    pub fn presses(&self) -> &[ButtonPress] {
        &self.presses
    }

    /// Refuse any further append.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Whether [`PressLedger::seal`] was called.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Number of recorded presses.
    pub fn len(&self) -> usize {
        self.presses.len()
    }

    /// Whether no press was recorded.
    pub fn is_empty(&self) -> bool {
        self.presses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    fn t(ms: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap() + Duration::milliseconds(ms)
    }

    #[test]
    fn appends_in_arrival_order_when_monotonic() {
        let session = Uuid::new_v4();
        let mut ledger = PressLedger::new(session);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(ledger.append(a, t(100)).unwrap(), 0);
        assert_eq!(ledger.append(b, t(200)).unwrap(), 1);

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].user_id, a);
        assert!(snapshot.iter().all(|press| press.session_id == session));
    }

    #[test]
    fn late_arrival_is_inserted_by_timestamp() {
        let mut ledger = PressLedger::new(Uuid::new_v4());
        let late = Uuid::new_v4();
        ledger.append(Uuid::new_v4(), t(100)).unwrap();
        ledger.append(Uuid::new_v4(), t(300)).unwrap();

        assert_eq!(ledger.append(late, t(200)).unwrap(), 1);
        assert_eq!(ledger.presses()[1].user_id, late);
    }

    #[test]
    fn ties_keep_arrival_order() {
        let mut ledger = PressLedger::new(Uuid::new_v4());
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.append(first, t(100)).unwrap();
        ledger.append(second, t(100)).unwrap();

        let users: Vec<_> = ledger.presses().iter().map(|press| press.user_id).collect();
        assert_eq!(users, vec![first, second]);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_appends() {
        let mut ledger = PressLedger::new(Uuid::new_v4());
        ledger.append(Uuid::new_v4(), t(100)).unwrap();
        let snapshot = ledger.snapshot();
        ledger.append(Uuid::new_v4(), t(200)).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn sealed_ledger_refuses_appends() {
        let session = Uuid::new_v4();
        let mut ledger = PressLedger::new(session);
        ledger.seal();
        assert_eq!(
            ledger.append(Uuid::new_v4(), t(0)).unwrap_err(),
            LedgerError::Sealed(session)
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn restore_sorts_and_filters_foreign_presses() {
        let session = Uuid::new_v4();
        let user = Uuid::new_v4();
        let press = |session_id, ms| ButtonPress {
            session_id,
            user_id: user,
            pressed_at: t(ms),
        };
        let ledger = PressLedger::restore(
            session,
            vec![press(session, 300), press(Uuid::new_v4(), 50), press(session, 100)],
        );
        let stamps: Vec<_> = ledger.presses().iter().map(|p| p.pressed_at).collect();
        assert_eq!(stamps, vec![t(100), t(300)]);
    }
}
