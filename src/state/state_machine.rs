//! Single-session state: phase observation, registrations and the press pipeline.

use indexmap::IndexMap;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::state::{
    cooldown::{CooldownGuard, CooldownTicket},
    hub::{SessionUpdate, UpdateKind},
    ledger::{LedgerError, PressLedger},
    phase_clock::{Phase, PhaseReading, phase_of},
    score::ScoreEngine,
    session::{ButtonPress, Registration, Session},
};

/// Why a button press was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PressRejection {
    /// Presses are only accepted during the button phase.
    #[error("presses are not accepted during the {phase:?} phase")]
    NotButtonPhase {
        /// Phase at the time of the press.
        phase: Phase,
    },
    /// The user pressed again before their cooldown elapsed.
    #[error("cooldown active, retry in {retry_after}")]
    CooldownActive {
        /// Time left before the next press can be accepted.
        retry_after: Duration,
    },
}

/// Why a registration was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Registrations close when the button phase opens.
    #[error("registration closed: session is in the {phase:?} phase")]
    TooLate {
        /// Phase at the time of the request.
        phase: Phase,
    },
}

/// Successful registration result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The user was added to the session.
    Registered,
    /// The user was already registered; nothing changed.
    AlreadyRegistered,
}

/// Phase change detected while observing the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Phase before the observation.
    pub from: Phase,
    /// Phase after the observation.
    pub to: Phase,
}

/// Outcome of re-evaluating the phase clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Fresh phase reading.
    pub reading: PhaseReading,
    /// Phase change since the previous observation, if any.
    pub transition: Option<Transition>,
    /// Final score frozen by this observation, if it just happened.
    pub finalized: Option<u32>,
}

/// A press that passed the phase and cooldown checks but is not recorded yet.
///
/// It must be either applied with [`SessionMachine::apply_press`] once the
/// press is stored durably, or aborted with [`SessionMachine::abort_press`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PressPlan {
    ticket: CooldownTicket,
}

impl PressPlan {
    /// Press that will be recorded when the plan is applied.
    pub fn press(&self, session_id: Uuid) -> ButtonPress {
        ButtonPress {
            session_id,
            user_id: self.ticket.user_id(),
            pressed_at: self.ticket.accepted_at(),
        }
    }
}

/// State machine owning everything mutable about one session.
///
/// Phase is never stored as truth: it is recomputed from the clock on every
/// call and only remembered to detect transitions.
#[derive(Debug)]
pub struct SessionMachine {
    session: Session,
    last_phase: Phase,
    cooldown: CooldownGuard,
    ledger: PressLedger,
    score: ScoreEngine,
    registrations: IndexMap<Uuid, OffsetDateTime>,
}

impl SessionMachine {
    /// Create a machine for a fresh session.
    pub fn new(session: Session, now: OffsetDateTime) -> Self {
        let last_phase = phase_of(now, session.scheduled_at, &session.config).phase;
        Self {
            cooldown: CooldownGuard::new(session.config.cooldown()),
            ledger: PressLedger::new(session.id),
            score: ScoreEngine::new(session.config.score_window()),
            registrations: IndexMap::new(),
            last_phase,
            session,
        }
    }

    /// Rebuild a machine from persisted registrations and presses.
    ///
    /// The cooldown guard is seeded with every user's latest press and the
    /// score is recomputed from the ledger, so nothing is replayed twice.
    pub fn restore(
        session: Session,
        registrations: impl IntoIterator<Item = Registration>,
        presses: impl IntoIterator<Item = ButtonPress>,
        now: OffsetDateTime,
    ) -> Self {
        let mut machine = Self::new(session, now);

        for registration in registrations {
            machine
                .registrations
                .entry(registration.user_id)
                .or_insert(registration.registered_at);
        }

        machine.ledger = PressLedger::restore(machine.session.id, presses);
        for press in machine.ledger.presses() {
            machine.cooldown.restore(press.user_id, press.pressed_at);
        }

        let recomputed = machine.score.recompute(machine.ledger.presses());
        machine.session.current_score = match machine.session.final_score {
            Some(final_score) => final_score,
            None => recomputed,
        };

        if machine.session.is_finalized() {
            machine.ledger.seal();
            machine.last_phase = Phase::Ended;
        }

        machine
    }

    /// Borrow the session record.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Session identifier.
    pub fn id(&self) -> Uuid {
        self.session.id
    }

    /// Borrow the press ledger.
    pub fn ledger(&self) -> &PressLedger {
        &self.ledger
    }

    /// Number of registered users.
    pub fn registered_count(&self) -> usize {
        self.registrations.len()
    }

    /// Whether `user_id` registered to this session.
    pub fn is_registered(&self, user_id: Uuid) -> bool {
        self.registrations.contains_key(&user_id)
    }

    /// Registered users in registration order.
    pub fn registered_users(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.registrations.keys().copied()
    }

    /// Evaluate the phase clock without side effects.
    pub fn reading(&self, now: OffsetDateTime) -> PhaseReading {
        phase_of(now, self.session.scheduled_at, &self.session.config)
    }

    /// Re-evaluate the clock, record phase changes and freeze the score on end.
    pub fn observe(&mut self, now: OffsetDateTime) -> Observation {
        let reading = self.reading(now);

        // Phase only moves forward; a clock stepping backward is ignored.
        let transition = if reading.phase > self.last_phase {
            let transition = Transition {
                from: self.last_phase,
                to: reading.phase,
            };
            self.last_phase = reading.phase;
            Some(transition)
        } else {
            None
        };

        let finalized = if self.last_phase == Phase::Ended {
            self.finalize()
        } else {
            None
        };

        Observation {
            reading: self.effective_reading(reading),
            transition,
            finalized,
        }
    }

    /// Freeze the final score and seal the ledger. Returns the score the first time only.
    pub fn finalize(&mut self) -> Option<u32> {
        if self.session.final_score.is_some() {
            return None;
        }
        let final_score = self.score.current();
        self.session.current_score = final_score;
        self.session.final_score = Some(final_score);
        self.ledger.seal();
        self.last_phase = Phase::Ended;
        Some(final_score)
    }

    /// Register `user_id` while registrations are open.
    pub fn register(
        &mut self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        self.registration_open(now)?;
        if self.registrations.contains_key(&user_id) {
            return Ok(RegistrationOutcome::AlreadyRegistered);
        }
        self.registrations.insert(user_id, now);
        Ok(RegistrationOutcome::Registered)
    }

    /// Fail with [`RegistrationError::TooLate`] once the button phase has opened.
    pub fn registration_open(&self, now: OffsetDateTime) -> Result<(), RegistrationError> {
        let phase = self.effective_reading(self.reading(now)).phase;
        if phase.accepts_registrations() {
            Ok(())
        } else {
            Err(RegistrationError::TooLate { phase })
        }
    }

    /// Check phase then cooldown for a press, reserving the user's cooldown slot.
    pub fn plan_press(
        &mut self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<PressPlan, PressRejection> {
        let phase = self.effective_reading(self.reading(now)).phase;
        if !phase.accepts_presses() {
            return Err(PressRejection::NotButtonPhase { phase });
        }

        let ticket = self
            .cooldown
            .acquire(user_id, now)
            .map_err(|retry_after| PressRejection::CooldownActive { retry_after })?;

        Ok(PressPlan { ticket })
    }

    /// Record a planned press and return the updated score.
    pub fn apply_press(&mut self, plan: PressPlan) -> Result<u32, LedgerError> {
        let index = match self
            .ledger
            .append(plan.ticket.user_id(), plan.ticket.accepted_at())
        {
            Ok(index) => index,
            Err(err) => {
                self.cooldown.rollback(plan.ticket);
                return Err(err);
            }
        };
        let score = self.score.record(self.ledger.presses(), index);
        self.session.current_score = score;
        Ok(score)
    }

    /// Drop a planned press, releasing its cooldown reservation.
    pub fn abort_press(&mut self, plan: PressPlan) {
        self.cooldown.rollback(plan.ticket);
    }

    /// Build the state-sync snapshot published to subscribers.
    pub fn update(&self, now: OffsetDateTime, kind: UpdateKind) -> SessionUpdate {
        let reading = self.effective_reading(self.reading(now));
        SessionUpdate {
            session_id: self.session.id,
            community_id: self.session.community_id,
            phase: reading.phase,
            seconds_remaining: reading.seconds_remaining(),
            progress: reading.progress,
            current_score: self.session.current_score,
            final_score: self.session.final_score,
            registered: self.registrations.len(),
            kind,
            emitted_at: now,
        }
    }

    /// Once finalized the session reads as ended whatever the clock says.
    fn effective_reading(&self, reading: PhaseReading) -> PhaseReading {
        if self.session.is_finalized() && reading.phase != Phase::Ended {
            PhaseReading {
                phase: Phase::Ended,
                remaining: Duration::ZERO,
                progress: 0.0,
            }
        } else {
            reading
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::state::session::SessionConfig;

    fn start() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn at(secs: f64) -> OffsetDateTime {
        start() + Duration::seconds_f64(secs)
    }

    fn machine(countdown: u32, button: u32, timeout: u32, window: u32) -> SessionMachine {
        let config = Arc::new(SessionConfig::new(countdown, button, timeout, window).unwrap());
        let session = Session::new(
            Uuid::new_v4(),
            start(),
            config,
            Uuid::new_v4(),
            None,
            start() - Duration::minutes(5),
        );
        SessionMachine::new(session, start() - Duration::minutes(5))
    }

    fn press(machine: &mut SessionMachine, user: Uuid, now: OffsetDateTime) -> Result<u32, PressRejection> {
        machine.observe(now);
        let plan = machine.plan_press(user, now)?;
        Ok(machine.apply_press(plan).unwrap())
    }

    #[test]
    fn reference_scenario() {
        let mut sm = machine(10, 20, 5, 10);
        let user = Uuid::new_v4();

        assert_eq!(
            press(&mut sm, user, at(5.0)).unwrap_err(),
            PressRejection::NotButtonPhase {
                phase: Phase::Countdown
            }
        );
        assert_eq!(press(&mut sm, user, at(12.0)).unwrap(), 1);
        assert_eq!(
            press(&mut sm, user, at(14.0)).unwrap_err(),
            PressRejection::CooldownActive {
                retry_after: Duration::seconds(3)
            }
        );
        assert_eq!(press(&mut sm, user, at(17.0)).unwrap(), 1);

        let last_current = sm.session().current_score;
        let observation = sm.observe(at(31.0));
        assert_eq!(observation.reading.phase, Phase::Ended);
        assert_eq!(observation.finalized, Some(last_current));
        assert_eq!(sm.session().final_score, Some(last_current));
        assert_eq!(sm.ledger().len(), 2);
    }

    #[test]
    fn clustered_presses_from_three_users_score_three() {
        let mut sm = machine(10, 20, 5, 1);
        let scores: Vec<_> = [12.0, 12.3, 12.8]
            .into_iter()
            .map(|secs| press(&mut sm, Uuid::new_v4(), at(secs)).unwrap())
            .collect();
        assert_eq!(scores, vec![1, 2, 3]);
    }

    #[test]
    fn press_outside_button_phase_is_rejected_even_without_cooldown() {
        let mut sm = machine(10, 20, 0, 10);
        let user = Uuid::new_v4();
        assert!(matches!(
            press(&mut sm, user, at(-1.0)),
            Err(PressRejection::NotButtonPhase {
                phase: Phase::Scheduled
            })
        ));
        assert!(matches!(
            press(&mut sm, user, at(30.0)),
            Err(PressRejection::NotButtonPhase {
                phase: Phase::Ended
            })
        ));
    }

    #[test]
    fn observe_reports_each_transition_once() {
        let mut sm = machine(10, 20, 5, 10);
        assert_eq!(sm.observe(at(-10.0)).transition, None);

        let countdown = sm.observe(at(0.5)).transition.unwrap();
        assert_eq!((countdown.from, countdown.to), (Phase::Scheduled, Phase::Countdown));
        assert_eq!(sm.observe(at(1.0)).transition, None);

        let ended = sm.observe(at(40.0));
        assert_eq!(
            ended.transition,
            Some(Transition {
                from: Phase::Countdown,
                to: Phase::Ended
            })
        );
        assert_eq!(ended.finalized, Some(0));
        assert_eq!(sm.observe(at(41.0)).finalized, None);
    }

    #[test]
    fn final_score_is_frozen_once() {
        let mut sm = machine(0, 10, 0, 5);
        press(&mut sm, Uuid::new_v4(), at(1.0)).unwrap();
        assert_eq!(sm.finalize(), Some(1));
        assert_eq!(sm.finalize(), None);

        // Even a clock stepping back cannot reopen the session.
        let observation = sm.observe(at(2.0));
        assert_eq!(observation.reading.phase, Phase::Ended);
        assert!(matches!(
            sm.plan_press(Uuid::new_v4(), at(2.0)),
            Err(PressRejection::NotButtonPhase { .. })
        ));
        assert_eq!(sm.session().final_score, Some(1));
    }

    #[test]
    fn aborted_press_releases_cooldown() {
        let mut sm = machine(0, 20, 5, 5);
        let user = Uuid::new_v4();
        let plan = sm.plan_press(user, at(1.0)).unwrap();
        sm.abort_press(plan);
        assert!(sm.ledger().is_empty());
        assert!(sm.plan_press(user, at(1.5)).is_ok());
    }

    #[test]
    fn registration_rules() {
        let mut sm = machine(10, 20, 5, 10);
        let user = Uuid::new_v4();

        assert_eq!(sm.register(user, at(-5.0)), Ok(RegistrationOutcome::Registered));
        assert_eq!(
            sm.register(user, at(3.0)),
            Ok(RegistrationOutcome::AlreadyRegistered)
        );
        assert_eq!(
            sm.register(Uuid::new_v4(), at(9.9)),
            Ok(RegistrationOutcome::Registered)
        );
        assert_eq!(
            sm.register(Uuid::new_v4(), at(10.0)),
            Err(RegistrationError::TooLate {
                phase: Phase::ButtonPhase
            })
        );
        assert_eq!(sm.registered_count(), 2);
        assert!(sm.is_registered(user));
    }

    #[test]
    fn registered_user_cannot_reregister_once_buttons_open() {
        let mut sm = machine(10, 20, 5, 10);
        let user = Uuid::new_v4();

        assert_eq!(sm.register(user, at(1.0)), Ok(RegistrationOutcome::Registered));
        assert_eq!(
            sm.register(user, at(12.0)),
            Err(RegistrationError::TooLate {
                phase: Phase::ButtonPhase
            })
        );
        assert_eq!(sm.registered_count(), 1);
    }

    #[test]
    fn restore_does_not_replay_presses() {
        let mut original = machine(0, 30, 5, 2);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        press(&mut original, a, at(1.0)).unwrap();
        press(&mut original, b, at(1.5)).unwrap();
        original.register(a, at(0.5)).ok();

        let presses = original.ledger().presses().to_vec();
        let mut restored =
            SessionMachine::restore(original.session().clone(), Vec::new(), presses, at(3.0));

        assert_eq!(restored.session().current_score, 2);
        assert_eq!(restored.ledger().len(), 2);
        assert!(matches!(
            restored.plan_press(a, at(4.0)),
            Err(PressRejection::CooldownActive { .. })
        ));
        assert!(restored.plan_press(a, at(6.0)).is_ok());
    }

    #[test]
    fn update_snapshot_reflects_state() {
        let mut sm = machine(10, 20, 5, 10);
        sm.register(Uuid::new_v4(), at(1.0)).unwrap();
        press(&mut sm, Uuid::new_v4(), at(15.0)).unwrap();

        let update = sm.update(at(15.0), UpdateKind::ScoreChanged);
        assert_eq!(update.phase, Phase::ButtonPhase);
        assert_eq!(update.current_score, 1);
        assert_eq!(update.final_score, None);
        assert_eq!(update.registered, 1);
        assert!((update.seconds_remaining - 15.0).abs() < 1e-9);
    }
}
