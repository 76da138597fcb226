//! Clustering score computed from the press ledger.
//!
//! The score of a session is the largest number of distinct users whose
//! presses fit together inside one scoring window. Two presses share a window
//! when their timestamps are strictly less than the window length apart; a
//! user pressing several times inside the same window counts once. The best
//! window ever observed is kept, so the score never decreases.

use std::collections::HashMap;

use time::Duration;
use uuid::Uuid;

use crate::state::session::ButtonPress;

/// Incremental two-pointer sweep over the timestamp-ordered ledger.
#[derive(Debug, Clone)]
pub struct ScoreEngine {
    window: Duration,
    best: u32,
    /// First ledger index still inside the current window.
    left: usize,
    /// Number of ledger entries already swept.
    swept: usize,
    /// Presses per user inside `presses[left..swept]`.
    in_window: HashMap<Uuid, usize>,
}

impl ScoreEngine {
    /// Build an engine for a given scoring window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            best: 0,
            left: 0,
            swept: 0,
            in_window: HashMap::new(),
        }
    }

    /// Best score seen so far.
    pub fn current(&self) -> u32 {
        self.best
    }

    /// Fold the press stored at `inserted_at` into the score.
    ///
    /// `presses` is the whole ledger after the insertion. Appends at the end
    /// are absorbed in amortized constant time; an out-of-order insertion
    /// triggers a full sweep.
    pub fn record(&mut self, presses: &[ButtonPress], inserted_at: usize) -> u32 {
        if inserted_at == self.swept && presses.len() == self.swept + 1 {
            self.advance(presses);
        } else {
            self.recompute(presses);
        }
        self.best
    }

    /// Rebuild the sweep state from scratch over the whole ledger.
    pub fn recompute(&mut self, presses: &[ButtonPress]) -> u32 {
        let best = self.best;
        self.left = 0;
        self.swept = 0;
        self.in_window.clear();
        self.best = 0;
        while self.swept < presses.len() {
            self.advance(presses);
        }
        // Best-window-ever semantics: a recompute can only confirm or raise it.
        self.best = self.best.max(best);
        self.best
    }

    fn advance(&mut self, presses: &[ButtonPress]) {
        let newest = &presses[self.swept];
        while self.left < self.swept
            && newest.pressed_at - presses[self.left].pressed_at >= self.window
        {
            let leaving = presses[self.left].user_id;
            if let Some(count) = self.in_window.get_mut(&leaving) {
                *count -= 1;
                if *count == 0 {
                    self.in_window.remove(&leaving);
                }
            }
            self.left += 1;
        }

        *self.in_window.entry(newest.user_id).or_insert(0) += 1;
        self.swept += 1;

        let distinct = u32::try_from(self.in_window.len()).unwrap_or(u32::MAX);
        self.best = self.best.max(distinct);
    }
}

/// Score of a complete, timestamp-ordered ledger.
pub fn best_window(presses: &[ButtonPress], window: Duration) -> u32 {
    let mut engine = ScoreEngine::new(window);
    engine.recompute(presses)
}
