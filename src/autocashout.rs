//! Auto-cashout monitor: ticks the clock during flight and cashes out bets
//! whose target multiplier has been reached.
//!
//! Tick granularity bounds the firing latency to one tick past the target.
//! Races against manual cashouts on the same bet resolve through the bet
//! ledger's exactly-once settlement; losing the race is a benign outcome.

use crate::bets::BetLedger;
use crate::clock::MultiplierClock;
use crate::errors::EngineError;
use crate::round::Round;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

pub struct AutoCashoutMonitor {
    bets: Arc<BetLedger>,
    clock: MultiplierClock,
    tick: Duration,
}

impl AutoCashoutMonitor {
    pub fn new(bets: Arc<BetLedger>, clock: MultiplierClock, tick: Duration) -> Self {
        Self { bets, clock, tick }
    }

    /// Drive auto-cashouts for one flight. Returns at exactly `deadline`,
    /// the round's scheduled crash instant.
    pub async fn run_flight(&self, round: &Arc<Round>, deadline: Instant) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => break,
                _ = interval.tick() => self.scan(round, deadline).await,
            }
        }
    }

    async fn scan(&self, round: &Arc<Round>, deadline: Instant) {
        let snapshot = round.snapshot();
        let Some(start) = snapshot.start_of_flight else {
            return;
        };

        let now = Instant::now().min(deadline);
        let current = self.clock.multiplier_at(now.saturating_duration_since(start));

        for (bet_id, target) in self.bets.auto_cashouts_due(round, current).await {
            match self.bets.cashout_at_target(round, bet_id, target).await {
                Ok(payout) => {
                    tracing::debug!(
                        round_id = round.id,
                        bet_id = %bet_id,
                        target,
                        payout,
                        "auto-cashout fired"
                    );
                }
                // Lost the race to a manual cashout or the crash; both fine.
                Err(EngineError::AlreadySettled) | Err(EngineError::WindowClosed) => {}
                Err(e) => {
                    tracing::warn!(
                        round_id = round.id,
                        bet_id = %bet_id,
                        error = %e,
                        "auto-cashout failed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bets::BetStatus;
    use crate::fairness::FairnessCommitter;
    use crate::ledger::{AccountLedger, CreditWorker, InMemoryAccountLedger};
    use crate::stats::StatsBook;

    struct Fixture {
        accounts: Arc<InMemoryAccountLedger>,
        bets: Arc<BetLedger>,
        clock: MultiplierClock,
    }

    fn fixture() -> Fixture {
        let accounts = Arc::new(InMemoryAccountLedger::new());
        accounts.open_account("alice", 10_000);
        accounts.open_account("bob", 10_000);

        let ledger: Arc<dyn AccountLedger> = accounts.clone();
        let credits = CreditWorker::spawn(
            ledger.clone(),
            Duration::from_millis(10),
            Duration::from_millis(100),
        );
        let clock = MultiplierClock::new(0.07);
        Fixture {
            accounts,
            bets: Arc::new(BetLedger::new(
                ledger,
                credits,
                Arc::new(StatsBook::new()),
                clock,
            )),
            clock,
        }
    }

    fn test_round(id: u64) -> Arc<Round> {
        let committer = FairnessCommitter::new("test".to_string(), 3, 1000.0);
        let (commit_hash, seed) = committer.commit();
        Arc::new(Round::new(id, commit_hash, seed, Duration::from_secs(1)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_target_before_crash() {
        let f = fixture();
        let round = test_round(1);

        // Crash 2.35 > target 2.00: the auto-cashout must win.
        let bet_id = f
            .bets
            .place_bet(&round, "alice".to_string(), 50, Some(2.00))
            .await
            .unwrap();

        let crash = 2.35;
        let start = Instant::now();
        let deadline = start + f.clock.time_for_multiplier(crash);
        round.begin_flight(start, crash, deadline);

        let monitor = AutoCashoutMonitor::new(f.bets.clone(), f.clock, Duration::from_millis(50));
        monitor.run_flight(&round, deadline).await;

        let bet = f.bets.bet(&round, bet_id).await.unwrap();
        assert_eq!(bet.status, BetStatus::CashedOut);
        assert_eq!(bet.cashout_multiplier, Some(2.00));
        assert_eq!(bet.payout, Some(100));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.accounts.balance("alice"), Some(10_050));
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_above_crash_never_fires() {
        let f = fixture();
        let round = test_round(1);

        let bet_id = f
            .bets
            .place_bet(&round, "bob".to_string(), 50, Some(3.00))
            .await
            .unwrap();

        let crash = 2.35;
        let start = Instant::now();
        let deadline = start + f.clock.time_for_multiplier(crash);
        round.begin_flight(start, crash, deadline);

        let monitor = AutoCashoutMonitor::new(f.bets.clone(), f.clock, Duration::from_millis(50));
        monitor.run_flight(&round, deadline).await;

        let bet = f.bets.bet(&round, bet_id).await.unwrap();
        assert_eq!(bet.status, BetStatus::Placed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_returns_at_deadline() {
        let f = fixture();
        let round = test_round(1);

        let crash = 1.50;
        let start = Instant::now();
        let deadline = start + f.clock.time_for_multiplier(crash);
        round.begin_flight(start, crash, deadline);

        let monitor = AutoCashoutMonitor::new(f.bets.clone(), f.clock, Duration::from_millis(50));
        monitor.run_flight(&round, deadline).await;

        assert!(Instant::now() >= deadline);
        assert!(Instant::now() < deadline + Duration::from_millis(5));
    }
}
