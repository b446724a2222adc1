//! Bet admission and exactly-once settlement for the active round.
//!
//! All mutations of a round's bet set serialize on the round's bet book
//! mutex. A bet reaches exactly one terminal status (`CashedOut`, `Lost`,
//! `Voided`), and the terminal status is always recorded before the matching
//! credit is handed to the credit worker, so a crash between the two can
//! never double-pay — only leave a credit owed, which the worker retries.

use crate::clock::MultiplierClock;
use crate::errors::{EngineError, EngineResult};
use crate::ledger::{AccountId, AccountLedger, CreditWorker, OwedCredit};
use crate::round::{Phase, Round};
use crate::stats::StatsBook;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

/// Bet identifier
pub type BetId = Uuid;

/// Minimum accepted auto-cashout target.
pub const MIN_AUTO_CASHOUT: f64 = 1.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Placed,
    CashedOut,
    Lost,
    Voided,
}

impl BetStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BetStatus::Placed)
    }
}

/// A single bet, owned exclusively by the round it was placed in.
#[derive(Debug, Clone, Serialize)]
pub struct Bet {
    pub id: BetId,
    pub round_id: u64,
    pub account: AccountId,
    /// Stake in currency minor units, debited exactly once at placement.
    pub stake: u64,
    pub status: BetStatus,
    pub auto_cashout_target: Option<f64>,
    /// Display-precision multiplier the bet cashed out at; set only when
    /// status is `CashedOut`.
    pub cashout_multiplier: Option<f64>,
    pub payout: Option<u64>,
}

/// Wager totals for a completed round, feeding the history entry.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RoundTotals {
    pub bet_count: usize,
    pub total_wagered: u64,
    pub total_paid_out: u64,
}

/// All bets for one round, guarded by the round's mutex.
pub struct BetBook {
    round_id: u64,
    bets: HashMap<BetId, Bet>,
}

impl BetBook {
    pub fn new(round_id: u64) -> Self {
        Self {
            round_id,
            bets: HashMap::new(),
        }
    }

    pub fn get(&self, bet_id: &BetId) -> Option<&Bet> {
        self.bets.get(bet_id)
    }

    pub fn totals(&self) -> RoundTotals {
        let mut totals = RoundTotals {
            bet_count: self.bets.len(),
            ..RoundTotals::default()
        };
        for bet in self.bets.values() {
            totals.total_wagered += bet.stake;
            totals.total_paid_out += bet.payout.unwrap_or(0);
        }
        totals
    }
}

/// Admission and settlement operations over the active round's bet book.
pub struct BetLedger {
    ledger: Arc<dyn AccountLedger>,
    credits: CreditWorker,
    stats: Arc<StatsBook>,
    clock: MultiplierClock,
}

impl BetLedger {
    pub fn new(
        ledger: Arc<dyn AccountLedger>,
        credits: CreditWorker,
        stats: Arc<StatsBook>,
        clock: MultiplierClock,
    ) -> Self {
        Self {
            ledger,
            credits,
            stats,
            clock,
        }
    }

    /// Place a bet in the given round. Allowed only during `Betting`. The
    /// stake is debited before the bet is recorded; if the debit fails, no
    /// bet exists. If the window closes between the debit and the record,
    /// the stake is refunded through the credit worker and the placement is
    /// rejected, keeping the per-round money flow reconciled.
    pub async fn place_bet(
        &self,
        round: &Round,
        account: AccountId,
        stake: u64,
        auto_cashout_target: Option<f64>,
    ) -> EngineResult<BetId> {
        if stake == 0 {
            return Err(EngineError::InvalidStake(
                "stake must be positive".to_string(),
            ));
        }
        if let Some(target) = auto_cashout_target {
            if !target.is_finite() || target < MIN_AUTO_CASHOUT {
                return Err(EngineError::InvalidStake(format!(
                    "auto-cashout target {} below minimum {}",
                    target, MIN_AUTO_CASHOUT
                )));
            }
        }
        if round.phase() != Phase::Betting {
            return Err(EngineError::WindowClosed);
        }

        // Debit first: a failed or timed-out debit means no bet is recorded.
        self.ledger.debit(&account, stake).await?;

        let mut book = round.bets.lock().await;
        if round.phase() != Phase::Betting {
            // Window closed while the debit was in flight. Refund the stake;
            // the bet never existed.
            drop(book);
            tracing::warn!(
                round_id = round.id,
                account = %account,
                stake,
                "betting window closed during debit; refunding stake"
            );
            self.credits.enqueue(OwedCredit {
                credit_id: Uuid::new_v4(),
                account,
                amount: stake,
                round_id: round.id,
                bet_id: Uuid::nil(),
            });
            return Err(EngineError::WindowClosed);
        }

        let bet = Bet {
            id: Uuid::new_v4(),
            round_id: round.id,
            account: account.clone(),
            stake,
            status: BetStatus::Placed,
            auto_cashout_target,
            cashout_multiplier: None,
            payout: None,
        };
        let bet_id = bet.id;
        book.bets.insert(bet_id, bet);
        drop(book);

        tracing::debug!(
            round_id = round.id,
            bet_id = %bet_id,
            account = %account,
            stake,
            target = ?auto_cashout_target,
            "bet placed"
        );
        Ok(bet_id)
    }

    /// Manual cashout at the live multiplier. Allowed only during `Flight`
    /// while the bet is still `Placed`; exactly-once under the book lock.
    pub async fn cashout(&self, round: &Round, bet_id: BetId) -> EngineResult<u64> {
        let mut book = round.bets.lock().await;

        let snapshot = round.snapshot();
        if snapshot.phase != Phase::Flight {
            return Err(EngineError::WindowClosed);
        }
        let (Some(start), Some(deadline)) = (snapshot.start_of_flight, snapshot.crash_deadline)
        else {
            return Err(EngineError::WindowClosed);
        };

        // Full-precision comparison against the scheduled crash instant: a
        // cashout arriving after the crash instant loses even if the phase
        // flip has not landed yet.
        let now = Instant::now();
        if now >= deadline {
            return Err(EngineError::WindowClosed);
        }

        let multiplier =
            MultiplierClock::display(self.clock.multiplier_at(now.saturating_duration_since(start)));
        self.settle_cashout(&mut book, round.id, bet_id, multiplier)
    }

    /// Cashout on behalf of the auto-cashout monitor, at the bet's target
    /// multiplier. The monitor only calls this once the live multiplier has
    /// reached the target, so the payout is pinned to the target rather than
    /// drifting with tick latency.
    pub async fn cashout_at_target(
        &self,
        round: &Round,
        bet_id: BetId,
        target: f64,
    ) -> EngineResult<u64> {
        let mut book = round.bets.lock().await;
        if round.phase() != Phase::Flight {
            return Err(EngineError::WindowClosed);
        }
        self.settle_cashout(&mut book, round.id, bet_id, MultiplierClock::display(target))
    }

    fn settle_cashout(
        &self,
        book: &mut BetBook,
        round_id: u64,
        bet_id: BetId,
        multiplier: f64,
    ) -> EngineResult<u64> {
        let bet = book
            .bets
            .get_mut(&bet_id)
            .ok_or(EngineError::BetNotFound(bet_id))?;
        if bet.status != BetStatus::Placed {
            return Err(EngineError::AlreadySettled);
        }

        let payout = (bet.stake as f64 * multiplier).floor() as u64;
        bet.status = BetStatus::CashedOut;
        bet.cashout_multiplier = Some(multiplier);
        bet.payout = Some(payout);

        self.stats.record_win(&bet.account, bet.stake, payout, multiplier);
        self.credits.enqueue(OwedCredit {
            credit_id: Uuid::new_v4(),
            account: bet.account.clone(),
            amount: payout,
            round_id,
            bet_id,
        });

        tracing::info!(
            round_id,
            bet_id = %bet_id,
            account = %bet.account,
            multiplier,
            payout,
            "bet cashed out"
        );
        Ok(payout)
    }

    /// Collect bets whose auto-cashout target has been reached. Read-only
    /// scan under the book lock; settlement happens per bet afterwards so a
    /// racing manual cashout resolves through the exactly-once check.
    pub async fn auto_cashouts_due(&self, round: &Round, current_multiplier: f64) -> Vec<(BetId, f64)> {
        let book = round.bets.lock().await;
        book.bets
            .values()
            .filter(|bet| bet.status == BetStatus::Placed)
            .filter_map(|bet| {
                let target = bet.auto_cashout_target?;
                (target <= current_multiplier).then_some((bet.id, target))
            })
            .collect()
    }

    /// Settle every remaining `Placed` bet as `Lost`. Called exactly once by
    /// the scheduler on entering `Crashed`; bets already cashed out are never
    /// touched. Returns the round totals for the history entry.
    pub async fn settle_losses_on_crash(&self, round: &Round) -> RoundTotals {
        let mut book = round.bets.lock().await;
        let mut lost = 0usize;
        for bet in book.bets.values_mut() {
            if bet.status == BetStatus::Placed {
                bet.status = BetStatus::Lost;
                self.stats.record_loss(&bet.account, bet.stake);
                lost += 1;
            }
        }
        if lost > 0 {
            tracing::info!(round_id = round.id, lost, "settled remaining bets as lost");
        }
        book.totals()
    }

    /// Refund every non-terminal bet in full. Taken only on the voided
    /// failure path, before any cashout could have happened.
    pub async fn void_round(&self, round: &Round) -> RoundTotals {
        let mut book = round.bets.lock().await;
        let mut refunded = 0usize;
        for bet in book.bets.values_mut() {
            if bet.status == BetStatus::Placed {
                bet.status = BetStatus::Voided;
                self.credits.enqueue(OwedCredit {
                    credit_id: Uuid::new_v4(),
                    account: bet.account.clone(),
                    amount: bet.stake,
                    round_id: round.id,
                    bet_id: bet.id,
                });
                refunded += 1;
            }
        }
        tracing::warn!(round_id = round.id, refunded, "round voided; stakes refunded");
        let mut totals = book.totals();
        // Refunds are not payouts; a voided round pays out nothing.
        totals.total_paid_out = 0;
        totals
    }

    /// Look up a bet in the given round.
    pub async fn bet(&self, round: &Round, bet_id: BetId) -> Option<Bet> {
        round.bets.lock().await.get(&bet_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::FairnessCommitter;
    use crate::ledger::InMemoryAccountLedger;
    use std::time::Duration;

    struct Fixture {
        accounts: Arc<InMemoryAccountLedger>,
        bets: BetLedger,
        clock: MultiplierClock,
    }

    fn fixture() -> Fixture {
        let accounts = Arc::new(InMemoryAccountLedger::new());
        accounts.open_account("alice", 10_000);
        accounts.open_account("bob", 10_000);
        accounts.open_account("carol", 10_000);

        let ledger: Arc<dyn AccountLedger> = accounts.clone();
        let credits = CreditWorker::spawn(
            ledger.clone(),
            Duration::from_millis(10),
            Duration::from_millis(100),
        );
        let clock = MultiplierClock::new(0.07);
        Fixture {
            accounts,
            bets: BetLedger::new(ledger, credits, Arc::new(StatsBook::new()), clock),
            clock,
        }
    }

    fn test_round(id: u64) -> Round {
        let committer = FairnessCommitter::new("test".to_string(), 3, 1000.0);
        let (commit_hash, seed) = committer.commit();
        Round::new(id, commit_hash, seed, Duration::from_secs(5))
    }

    fn start_flight(round: &Round, clock: &MultiplierClock, crash: f64) {
        let now = Instant::now();
        round.begin_flight(now, crash, now + clock.time_for_multiplier(crash));
    }

    /// Let queued credits drain under the paused clock.
    async fn drain_credits() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_place_debits_stake() {
        let f = fixture();
        let round = test_round(1);

        let bet_id = f
            .bets
            .place_bet(&round, "alice".to_string(), 100, None)
            .await
            .unwrap();
        assert_eq!(f.accounts.balance("alice"), Some(9_900));

        let bet = f.bets.bet(&round, bet_id).await.unwrap();
        assert_eq!(bet.status, BetStatus::Placed);
        assert_eq!(bet.stake, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_place_rejects_invalid_stakes() {
        let f = fixture();
        let round = test_round(1);

        let err = f
            .bets
            .place_bet(&round, "alice".to_string(), 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStake(_)));

        let err = f
            .bets
            .place_bet(&round, "alice".to_string(), 100, Some(1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStake(_)));

        // Neither attempt may have debited anything.
        assert_eq!(f.accounts.balance("alice"), Some(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_place_rejects_insufficient_funds_without_recording() {
        let f = fixture();
        let round = test_round(1);

        let err = f
            .bets
            .place_bet(&round, "alice".to_string(), 50_000, None)
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::InsufficientFunds);
        assert_eq!(round.bets.lock().await.totals().bet_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_place_outside_window_fails() {
        let f = fixture();
        let round = test_round(1);
        start_flight(&round, &f.clock, 2.0);

        let err = f
            .bets
            .place_bet(&round, "alice".to_string(), 100, None)
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::WindowClosed);
        assert_eq!(f.accounts.balance("alice"), Some(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_cashout_at_observed_multiplier() {
        let f = fixture();
        let round = test_round(1);
        let bet_id = f
            .bets
            .place_bet(&round, "alice".to_string(), 100, None)
            .await
            .unwrap();

        // Crash point 2.35; cash out when the clock reads 1.80.
        start_flight(&round, &f.clock, 2.35);
        tokio::time::advance(f.clock.time_for_multiplier(1.80)).await;

        let payout = f.bets.cashout(&round, bet_id).await.unwrap();
        assert_eq!(payout, 180);

        let bet = f.bets.bet(&round, bet_id).await.unwrap();
        assert_eq!(bet.status, BetStatus::CashedOut);
        assert_eq!(bet.cashout_multiplier, Some(1.80));
        assert_eq!(bet.payout, Some(180));

        drain_credits().await;
        assert_eq!(f.accounts.balance("alice"), Some(10_080));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cashout_twice_fails_with_single_credit() {
        let f = fixture();
        let round = test_round(1);
        let bet_id = f
            .bets
            .place_bet(&round, "alice".to_string(), 100, None)
            .await
            .unwrap();
        start_flight(&round, &f.clock, 5.0);
        tokio::time::advance(f.clock.time_for_multiplier(2.0)).await;

        f.bets.cashout(&round, bet_id).await.unwrap();
        let err = f.bets.cashout(&round, bet_id).await.unwrap_err();
        assert_eq!(err, EngineError::AlreadySettled);

        drain_credits().await;
        // 10_000 - 100 stake + 200 payout, exactly once.
        assert_eq!(f.accounts.balance("alice"), Some(10_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cashouts_exactly_one_succeeds() {
        let f = fixture();
        let round = Arc::new(test_round(1));
        let bets = Arc::new(f.bets);
        let bet_id = bets
            .place_bet(&round, "alice".to_string(), 100, None)
            .await
            .unwrap();
        start_flight(&round, &f.clock, 5.0);
        tokio::time::advance(f.clock.time_for_multiplier(2.0)).await;

        // Manual cashout racing the auto-trigger path on the same bet.
        let manual = {
            let (bets, round) = (bets.clone(), round.clone());
            tokio::spawn(async move { bets.cashout(&round, bet_id).await })
        };
        let auto = {
            let (bets, round) = (bets.clone(), round.clone());
            tokio::spawn(async move { bets.cashout_at_target(&round, bet_id, 2.0).await })
        };

        let results = [manual.await.unwrap(), auto.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let already = results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::AlreadySettled)))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(already, 1);

        drain_credits().await;
        assert_eq!(f.accounts.balance("alice"), Some(10_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cashout_after_crash_instant_loses() {
        let f = fixture();
        let round = test_round(1);
        let bet_id = f
            .bets
            .place_bet(&round, "alice".to_string(), 100, None)
            .await
            .unwrap();
        start_flight(&round, &f.clock, 1.50);

        // Past the crash instant; phase flip may not have landed yet.
        tokio::time::advance(f.clock.time_for_multiplier(1.50) + Duration::from_millis(1)).await;
        let err = f.bets.cashout(&round, bet_id).await.unwrap_err();
        assert_eq!(err, EngineError::WindowClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_losses_skips_cashed_out() {
        let f = fixture();
        let round = test_round(1);
        let winner = f
            .bets
            .place_bet(&round, "alice".to_string(), 100, None)
            .await
            .unwrap();
        let loser = f
            .bets
            .place_bet(&round, "bob".to_string(), 20, None)
            .await
            .unwrap();

        start_flight(&round, &f.clock, 2.35);
        tokio::time::advance(f.clock.time_for_multiplier(1.80)).await;
        f.bets.cashout(&round, winner).await.unwrap();

        tokio::time::advance(f.clock.time_for_multiplier(2.35)).await;
        round.mark_crashed();
        let totals = f.bets.settle_losses_on_crash(&round).await;

        assert_eq!(totals.bet_count, 2);
        assert_eq!(totals.total_wagered, 120);
        assert_eq!(totals.total_paid_out, 180);

        let winner = f.bets.bet(&round, winner).await.unwrap();
        let loser = f.bets.bet(&round, loser).await.unwrap();
        assert_eq!(winner.status, BetStatus::CashedOut);
        assert_eq!(loser.status, BetStatus::Lost);
        assert_eq!(loser.payout, None);

        drain_credits().await;
        // Loser gets no credit.
        assert_eq!(f.accounts.balance("bob"), Some(9_980));
    }

    #[tokio::test(start_paused = true)]
    async fn test_void_refunds_stakes_in_full() {
        let f = fixture();
        let round = test_round(1);
        f.bets
            .place_bet(&round, "alice".to_string(), 30, None)
            .await
            .unwrap();

        round.mark_voided();
        let totals = f.bets.void_round(&round).await;
        assert_eq!(totals.total_paid_out, 0);

        drain_credits().await;
        assert_eq!(f.accounts.balance("alice"), Some(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_cashouts_due_scan() {
        let f = fixture();
        let round = test_round(1);
        let due = f
            .bets
            .place_bet(&round, "alice".to_string(), 50, Some(2.0))
            .await
            .unwrap();
        f.bets
            .place_bet(&round, "bob".to_string(), 50, Some(8.0))
            .await
            .unwrap();
        f.bets
            .place_bet(&round, "carol".to_string(), 50, None)
            .await
            .unwrap();

        start_flight(&round, &f.clock, 10.0);
        let hits = f.bets.auto_cashouts_due(&round, 2.04).await;
        assert_eq!(hits, vec![(due, 2.0)]);
    }
}
