//! Round state: the single-writer context shared between the scheduler and
//! concurrent request handlers.
//!
//! Phase and timing live behind a short-critical-section `RwLock` so readers
//! take a consistent snapshot and compute the multiplier lock-free from
//! wall-clock time. Bet mutations serialize on the round's own bet book lock
//! in `bets`; only one round is ever mutable at a time.

use crate::bets::BetBook;
use crate::clock::MultiplierClock;
use crate::fairness::RoundSeed;
use serde::Serialize;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Round lifecycle phase. Linear `Betting → Flight → Crashed → Settled`;
/// `Voided` is the single branch off that path, taken when crash-point
/// derivation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Betting,
    Flight,
    Crashed,
    Settled,
    Voided,
}

#[derive(Debug, Clone, Copy)]
struct RoundState {
    phase: Phase,
    start_of_flight: Option<Instant>,
    crash_deadline: Option<Instant>,
    crash_multiplier: Option<f64>,
}

/// Consistent point-in-time view of a round's phase and timing.
#[derive(Debug, Clone, Copy)]
pub struct RoundSnapshot {
    pub phase: Phase,
    pub start_of_flight: Option<Instant>,
    pub crash_deadline: Option<Instant>,
    pub crash_multiplier: Option<f64>,
}

/// One betting round from seed commit to settlement. Owns its bets; bets
/// never migrate across rounds.
pub struct Round {
    pub id: u64,
    pub commit_hash: String,
    pub seed: RoundSeed,
    pub betting_ends_at: Instant,
    pub betting_ends_at_unix_ms: u64,
    state: RwLock<RoundState>,
    pub bets: tokio::sync::Mutex<BetBook>,
}

impl Round {
    pub fn new(id: u64, commit_hash: String, seed: RoundSeed, betting_window: Duration) -> Self {
        let betting_ends_at_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d + betting_window)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            id,
            commit_hash,
            seed,
            betting_ends_at: Instant::now() + betting_window,
            betting_ends_at_unix_ms,
            state: RwLock::new(RoundState {
                phase: Phase::Betting,
                start_of_flight: None,
                crash_deadline: None,
                crash_multiplier: None,
            }),
            bets: tokio::sync::Mutex::new(BetBook::new(id)),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.read().expect("round state lock poisoned").phase
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        let state = self.state.read().expect("round state lock poisoned");
        RoundSnapshot {
            phase: state.phase,
            start_of_flight: state.start_of_flight,
            crash_deadline: state.crash_deadline,
            crash_multiplier: state.crash_multiplier,
        }
    }

    /// Enter `Flight`. The crash multiplier is fixed here and never changes;
    /// `deadline` is the exact instant the round must crash.
    pub fn begin_flight(&self, start: Instant, crash_multiplier: f64, deadline: Instant) {
        let mut state = self.state.write().expect("round state lock poisoned");
        debug_assert_eq!(state.phase, Phase::Betting);
        state.phase = Phase::Flight;
        state.start_of_flight = Some(start);
        state.crash_deadline = Some(deadline);
        state.crash_multiplier = Some(crash_multiplier);
    }

    pub fn mark_crashed(&self) {
        let mut state = self.state.write().expect("round state lock poisoned");
        debug_assert_eq!(state.phase, Phase::Flight);
        state.phase = Phase::Crashed;
    }

    pub fn mark_settled(&self) {
        let mut state = self.state.write().expect("round state lock poisoned");
        debug_assert_eq!(state.phase, Phase::Crashed);
        state.phase = Phase::Settled;
    }

    pub fn mark_voided(&self) {
        let mut state = self.state.write().expect("round state lock poisoned");
        state.phase = Phase::Voided;
    }

    /// Full-precision multiplier at this instant. During flight the value is
    /// clamped to the crash deadline so a reader sampling between the crash
    /// instant and the phase flip never observes a multiplier past the
    /// committed crash point.
    pub fn current_multiplier(&self, clock: &MultiplierClock) -> f64 {
        let snapshot = self.snapshot();
        match snapshot.phase {
            Phase::Betting | Phase::Voided => 1.00,
            Phase::Flight => {
                let (Some(start), Some(deadline)) =
                    (snapshot.start_of_flight, snapshot.crash_deadline)
                else {
                    return 1.00;
                };
                let now = Instant::now().min(deadline);
                clock.multiplier_at(now.saturating_duration_since(start))
            }
            Phase::Crashed | Phase::Settled => snapshot.crash_multiplier.unwrap_or(1.00),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::FairnessCommitter;

    pub(crate) fn test_round(id: u64) -> Round {
        let committer = FairnessCommitter::new("test".to_string(), 3, 1000.0);
        let (commit_hash, seed) = committer.commit();
        Round::new(id, commit_hash, seed, Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_phase_progression() {
        let round = test_round(1);
        assert_eq!(round.phase(), Phase::Betting);

        let now = Instant::now();
        round.begin_flight(now, 2.35, now + Duration::from_secs(12));
        assert_eq!(round.phase(), Phase::Flight);

        round.mark_crashed();
        assert_eq!(round.phase(), Phase::Crashed);

        round.mark_settled();
        assert_eq!(round.phase(), Phase::Settled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiplier_is_one_during_betting() {
        let round = test_round(1);
        let clock = MultiplierClock::new(0.07);
        assert_eq!(round.current_multiplier(&clock), 1.00);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiplier_clamped_at_crash_deadline() {
        let round = test_round(1);
        let clock = MultiplierClock::new(0.07);

        let crash = 2.35;
        let now = Instant::now();
        let deadline = now + clock.time_for_multiplier(crash);
        round.begin_flight(now, crash, deadline);

        // Sample well past the crash instant but before the phase flip.
        tokio::time::advance(clock.time_for_multiplier(crash) + Duration::from_secs(5)).await;
        let m = round.current_multiplier(&clock);
        assert!((m - crash).abs() < 1e-9, "expected clamp at {}, got {}", crash, m);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_round_reports_crash_multiplier() {
        let round = test_round(1);
        let clock = MultiplierClock::new(0.07);
        let now = Instant::now();
        round.begin_flight(now, 3.5, now + Duration::from_secs(17));
        round.mark_crashed();
        assert_eq!(round.current_multiplier(&clock), 3.5);
    }
}
