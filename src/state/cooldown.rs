//! Per-user press rate limiting for a single session.

use dashmap::{DashMap, mapref::entry::Entry};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Reservation handed out when a press passes the cooldown check.
///
/// It remembers the value it replaced so the reservation can be undone when
/// the press cannot be recorded durably.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownTicket {
    user_id: Uuid,
    accepted_at: OffsetDateTime,
    previous: Option<OffsetDateTime>,
}

impl CooldownTicket {
    /// User the ticket was issued to.
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Instant recorded as the user's last accepted press.
    pub fn accepted_at(&self) -> OffsetDateTime {
        self.accepted_at
    }
}

/// Tracks the last accepted press of every user in a session.
///
/// Check and update happen under the map entry lock, so two racing presses
/// from the same user cannot both win.
#[derive(Debug)]
pub struct CooldownGuard {
    timeout: Duration,
    last_accepted: DashMap<Uuid, OffsetDateTime>,
}

impl CooldownGuard {
    /// Build a guard enforcing `timeout` between a user's accepted presses.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_accepted: DashMap::new(),
        }
    }

    /// Accept the press and record it, or refuse it. Returns whether it was accepted.
    pub fn try_accept(&self, user_id: Uuid, now: OffsetDateTime) -> bool {
        self.acquire(user_id, now).is_ok()
    }

    /// Reserve a press slot for `user_id`, or return how long the user still has to wait.
    pub fn acquire(&self, user_id: Uuid, now: OffsetDateTime) -> Result<CooldownTicket, Duration> {
        match self.last_accepted.entry(user_id) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                Ok(CooldownTicket {
                    user_id,
                    accepted_at: now,
                    previous: None,
                })
            }
            Entry::Occupied(mut slot) => {
                let last = *slot.get();
                let elapsed = now - last;
                if elapsed >= self.timeout {
                    slot.insert(now);
                    Ok(CooldownTicket {
                        user_id,
                        accepted_at: now,
                        previous: Some(last),
                    })
                } else {
                    Err(self.timeout - elapsed)
                }
            }
        }
    }

    /// Undo a reservation, provided nothing else replaced it since.
    pub fn rollback(&self, ticket: CooldownTicket) {
        if let Entry::Occupied(mut slot) = self.last_accepted.entry(ticket.user_id) {
            if *slot.get() != ticket.accepted_at {
                return;
            }
            match ticket.previous {
                Some(previous) => {
                    slot.insert(previous);
                }
                None => {
                    slot.remove();
                }
            }
        }
    }

    /// Seed the guard with a press recovered from the ledger, keeping the most recent one.
    pub fn restore(&self, user_id: Uuid, pressed_at: OffsetDateTime) {
        self.last_accepted
            .entry(user_id)
            .and_modify(|last| {
                if pressed_at > *last {
                    *last = pressed_at;
                }
            })
            .or_insert(pressed_at);
    }

    /// Remaining wait for `user_id` at `now`, zero when a press would be accepted.
    pub fn remaining(&self, user_id: Uuid, now: OffsetDateTime) -> Duration {
        self.last_accepted
            .get(&user_id)
            .map(|last| (self.timeout - (now - *last)).max(Duration::ZERO))
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc, Barrier,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    use super::*;

    fn t(secs: f64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap() + Duration::seconds_f64(secs)
    }

    #[test]
    fn first_press_is_always_accepted() {
        let guard = CooldownGuard::new(Duration::seconds(5));
        assert!(guard.try_accept(Uuid::new_v4(), t(0.0)));
    }

    #[test]
    fn presses_inside_the_timeout_are_refused() {
        let guard = CooldownGuard::new(Duration::seconds(5));
        let user = Uuid::new_v4();
        assert!(guard.try_accept(user, t(12.0)));

        let wait = guard.acquire(user, t(14.0)).unwrap_err();
        assert_eq!(wait, Duration::seconds(3));

        assert!(guard.try_accept(user, t(17.0)));
    }

    #[test]
    fn refused_press_does_not_reset_the_timer() {
        let guard = CooldownGuard::new(Duration::seconds(5));
        let user = Uuid::new_v4();
        assert!(guard.try_accept(user, t(0.0)));
        assert!(!guard.try_accept(user, t(4.0)));
        assert!(guard.try_accept(user, t(5.0)));
    }

    #[test]
    fn users_are_independent() {
        let guard = CooldownGuard::new(Duration::seconds(5));
        assert!(guard.try_accept(Uuid::new_v4(), t(0.0)));
        assert!(guard.try_accept(Uuid::new_v4(), t(0.1)));
    }

    #[test]
    fn zero_timeout_never_refuses() {
        let guard = CooldownGuard::new(Duration::ZERO);
        let user = Uuid::new_v4();
        assert!(guard.try_accept(user, t(1.0)));
        assert!(guard.try_accept(user, t(1.0)));
    }

    #[test]
    fn rollback_restores_previous_press() {
        let guard = CooldownGuard::new(Duration::seconds(5));
        let user = Uuid::new_v4();
        assert!(guard.try_accept(user, t(0.0)));
        let ticket = guard.acquire(user, t(6.0)).unwrap();
        guard.rollback(ticket);

        assert_eq!(guard.remaining(user, t(6.0)), Duration::ZERO);
        assert_eq!(guard.remaining(user, t(2.0)), Duration::seconds(3));
    }

    #[test]
    fn rollback_of_first_press_clears_user() {
        let guard = CooldownGuard::new(Duration::seconds(5));
        let user = Uuid::new_v4();
        let ticket = guard.acquire(user, t(0.0)).unwrap();
        guard.rollback(ticket);
        assert!(guard.try_accept(user, t(0.5)));
    }

    #[test]
    fn restore_keeps_latest_press() {
        let guard = CooldownGuard::new(Duration::seconds(5));
        let user = Uuid::new_v4();
        guard.restore(user, t(10.0));
        guard.restore(user, t(8.0));
        assert!(!guard.try_accept(user, t(14.0)));
        assert!(guard.try_accept(user, t(15.0)));
    }

    #[test]
    fn only_one_concurrent_press_wins() {
        let guard = Arc::new(CooldownGuard::new(Duration::seconds(5)));
        let user = Uuid::new_v4();
        let accepted = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let accepted = Arc::clone(&accepted);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    if guard.try_accept(user, t(12.0)) {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }
}
