//! Pure mapping from wall-clock time to the phase of a session.
//!
//! Nothing here holds state: the phase is always recomputed from
//! `scheduled_at` and the session config, so the server tick, a polling read
//! and a client display refresh all agree on the same answer.

use time::{Duration, OffsetDateTime};

use crate::state::session::SessionConfig;

/// Stage of a session's lifecycle, derived from time.
///
/// Variants are declared in lifecycle order so `Ord` follows the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// The session has not started yet.
    Scheduled,
    /// The countdown before the button phase is running.
    Countdown,
    /// Presses are accepted.
    ButtonPhase,
    /// The session is over and its score is frozen.
    Ended,
}

impl Phase {
    /// Whether registrations are still accepted in this phase.
    pub fn accepts_registrations(self) -> bool {
        matches!(self, Phase::Scheduled | Phase::Countdown)
    }

    /// Whether button presses are accepted in this phase.
    pub fn accepts_presses(self) -> bool {
        self == Phase::ButtonPhase
    }
}

/// Result of evaluating the phase clock at a given instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseReading {
    /// Current phase.
    pub phase: Phase,
    /// Time left before the current phase ends (zero once ended).
    pub remaining: Duration,
    /// Progress indicator in `[0, 1]`; counts up during the countdown and
    /// drains from full to empty during the button phase.
    pub progress: f64,
}

impl PhaseReading {
    /// Remaining time expressed in fractional seconds.
    pub fn seconds_remaining(&self) -> f64 {
        self.remaining.as_seconds_f64()
    }
}

/// Absolute instants delimiting the phases of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseBounds {
    /// Countdown start.
    pub scheduled_at: OffsetDateTime,
    /// Countdown end, button phase start.
    pub button_start: OffsetDateTime,
    /// Button phase end, session end.
    pub button_end: OffsetDateTime,
}

/// Compute the phase boundaries for a session.
pub fn phase_bounds(scheduled_at: OffsetDateTime, config: &SessionConfig) -> PhaseBounds {
    let button_start = scheduled_at + config.countdown();
    PhaseBounds {
        scheduled_at,
        button_start,
        button_end: button_start + config.button_phase(),
    }
}

/// Evaluate the phase of a session at `now`.
pub fn phase_of(
    now: OffsetDateTime,
    scheduled_at: OffsetDateTime,
    config: &SessionConfig,
) -> PhaseReading {
    let bounds = phase_bounds(scheduled_at, config);

    if now < bounds.scheduled_at {
        PhaseReading {
            phase: Phase::Scheduled,
            remaining: bounds.scheduled_at - now,
            progress: 0.0,
        }
    } else if now < bounds.button_start {
        PhaseReading {
            phase: Phase::Countdown,
            remaining: bounds.button_start - now,
            progress: fraction(now - bounds.scheduled_at, config.countdown()),
        }
    } else if now < bounds.button_end {
        let remaining = bounds.button_end - now;
        PhaseReading {
            phase: Phase::ButtonPhase,
            remaining,
            progress: fraction(remaining, config.button_phase()),
        }
    } else {
        PhaseReading {
            phase: Phase::Ended,
            remaining: Duration::ZERO,
            progress: 0.0,
        }
    }
}

/// Next instant strictly after `now` at which the phase changes, if any.
pub fn next_boundary(
    now: OffsetDateTime,
    scheduled_at: OffsetDateTime,
    config: &SessionConfig,
) -> Option<OffsetDateTime> {
    let bounds = phase_bounds(scheduled_at, config);
    [bounds.scheduled_at, bounds.button_start, bounds.button_end]
        .into_iter()
        .find(|boundary| *boundary > now)
}

fn fraction(part: Duration, whole: Duration) -> f64 {
    if whole <= Duration::ZERO {
        return 0.0;
    }
    (part.as_seconds_f64() / whole.as_seconds_f64()).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(countdown: u32, button: u32) -> SessionConfig {
        SessionConfig::new(countdown, button, 5, 10).unwrap()
    }

    fn start() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    #[test]
    fn reports_each_phase_in_order() {
        let config = config(10, 20);
        let at = |secs: f64| phase_of(start() + Duration::seconds_f64(secs), start(), &config);

        assert_eq!(at(-3.0).phase, Phase::Scheduled);
        assert_eq!(at(0.0).phase, Phase::Countdown);
        assert_eq!(at(9.999).phase, Phase::Countdown);
        assert_eq!(at(10.0).phase, Phase::ButtonPhase);
        assert_eq!(at(29.999).phase, Phase::ButtonPhase);
        assert_eq!(at(30.0).phase, Phase::Ended);
        assert_eq!(at(3_600.0).phase, Phase::Ended);
    }

    #[test]
    fn phase_never_moves_backward() {
        let config = config(7, 13);
        let mut previous = Phase::Scheduled;
        for tenth in -50..300 {
            let now = start() + Duration::milliseconds(tenth * 100);
            let reading = phase_of(now, start(), &config);
            assert!(reading.phase >= previous, "phase regressed at {tenth}");
            assert!((0.0..=1.0).contains(&reading.progress));
            previous = reading.phase;
        }
        assert_eq!(previous, Phase::Ended);
    }

    #[test]
    fn countdown_progress_counts_up() {
        let config = config(10, 20);
        let reading = phase_of(start() + Duration::seconds(5), start(), &config);
        assert_eq!(reading.phase, Phase::Countdown);
        assert!((reading.progress - 0.5).abs() < f64::EPSILON);
        assert_eq!(reading.remaining, Duration::seconds(5));
    }

    #[test]
    fn button_progress_drains_from_full() {
        let config = config(10, 20);
        let opening = phase_of(start() + Duration::seconds(10), start(), &config);
        assert!((opening.progress - 1.0).abs() < f64::EPSILON);
        assert_eq!(opening.remaining, Duration::seconds(20));

        let quarter_left = phase_of(start() + Duration::seconds(25), start(), &config);
        assert!((quarter_left.progress - 0.25).abs() < f64::EPSILON);
        assert!((quarter_left.seconds_remaining() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ended_reading_is_empty() {
        let config = config(10, 20);
        let reading = phase_of(start() + Duration::seconds(31), start(), &config);
        assert_eq!(reading.phase, Phase::Ended);
        assert_eq!(reading.remaining, Duration::ZERO);
        assert_eq!(reading.progress, 0.0);
    }

    #[test]
    fn zero_countdown_skips_straight_to_button_phase() {
        let config = config(0, 20);
        let reading = phase_of(start(), start(), &config);
        assert_eq!(reading.phase, Phase::ButtonPhase);
    }

    #[test]
    fn next_boundary_walks_the_timeline() {
        let config = config(10, 20);
        let before = start() - Duration::seconds(1);
        assert_eq!(next_boundary(before, start(), &config), Some(start()));
        assert_eq!(
            next_boundary(start(), start(), &config),
            Some(start() + Duration::seconds(10))
        );
        assert_eq!(
            next_boundary(start() + Duration::seconds(12), start(), &config),
            Some(start() + Duration::seconds(30))
        );
        assert_eq!(
            next_boundary(start() + Duration::seconds(30), start(), &config),
            None
        );
    }
}
