//! Public engine facade: the query/command interface any transport (HTTP
//! polling, WebSocket, RPC) can wrap.
//!
//! Reads (`current_round`, `recent_rounds`, `verify_round`) take a consistent
//! snapshot and never contend with bet mutations. Polling transports should
//! sample `current_round` purely for display; settlement correctness comes
//! from the scheduler's own deadlines, not poll timing.

use crate::autocashout::AutoCashoutMonitor;
use crate::bets::{Bet, BetId, BetLedger};
use crate::clock::MultiplierClock;
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::fairness::{self, FairnessCommitter};
use crate::history::{RoundHistoryEntry, RoundHistoryStore};
use crate::ledger::{AccountId, AccountLedger, CreditWorker, TimedLedger};
use crate::round::{Phase, Round};
use crate::scheduler::RoundScheduler;
use crate::stats::{AccountStats, StatsBook};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Snapshot of the active round for display collaborators. Never exposes the
/// crash point or seed before reveal.
#[derive(Debug, Clone, Serialize)]
pub struct RoundStatus {
    pub round_id: u64,
    pub phase: Phase,
    /// Display-rounded multiplier at the sampling instant.
    pub current_multiplier: f64,
    pub commit_hash: String,
    pub betting_ends_at_unix_ms: u64,
    /// Populated only once the round has crashed.
    pub crash_multiplier: Option<f64>,
}

/// The round engine. Owns the scheduler, auto-cashout monitor, and credit
/// worker tasks; exposes the external interface of the system.
pub struct Engine {
    clock: MultiplierClock,
    max_multiplier: f64,
    bets: Arc<BetLedger>,
    history: Arc<RoundHistoryStore>,
    stats: Arc<StatsBook>,
    current: watch::Receiver<Arc<Round>>,
    shutdown: watch::Sender<bool>,
    scheduler_task: JoinHandle<()>,
}

impl Engine {
    /// Validate the configuration, open the first betting window, and spawn
    /// the background tasks. Must be called within a tokio runtime.
    pub fn start(config: EngineConfig, accounts: Arc<dyn AccountLedger>) -> EngineResult<Self> {
        config.validate()?;

        let clock = MultiplierClock::new(config.round.growth_rate);
        let timed: Arc<dyn AccountLedger> =
            Arc::new(TimedLedger::new(accounts, config.ledger_call_timeout()));
        let credits = CreditWorker::spawn(
            timed.clone(),
            Duration::from_millis(config.ledger.credit_retry_initial_ms),
            Duration::from_millis(config.ledger.credit_retry_max_ms),
        );
        let stats = Arc::new(StatsBook::new());
        let bets = Arc::new(BetLedger::new(timed, credits, stats.clone(), clock));
        let history = Arc::new(RoundHistoryStore::new(config.history.retention));
        let committer = FairnessCommitter::new(
            config.fairness.client_seed.clone(),
            config.fairness.house_edge_percent,
            config.fairness.max_multiplier,
        );
        let monitor = AutoCashoutMonitor::new(bets.clone(), clock, config.tick_interval());

        let (scheduler, current) = RoundScheduler::new(
            &config,
            committer,
            clock,
            bets.clone(),
            history.clone(),
            monitor,
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

        Ok(Self {
            clock,
            max_multiplier: config.fairness.max_multiplier,
            bets,
            history,
            stats,
            current,
            shutdown,
            scheduler_task,
        })
    }

    fn active_round(&self) -> Arc<Round> {
        self.current.borrow().clone()
    }

    /// Current round snapshot for polling transports.
    pub fn current_round(&self) -> RoundStatus {
        let round = self.active_round();
        let snapshot = round.snapshot();
        let crash_multiplier = match snapshot.phase {
            Phase::Crashed | Phase::Settled => snapshot.crash_multiplier,
            _ => None,
        };
        RoundStatus {
            round_id: round.id,
            phase: snapshot.phase,
            current_multiplier: MultiplierClock::display(round.current_multiplier(&self.clock)),
            commit_hash: round.commit_hash.clone(),
            betting_ends_at_unix_ms: round.betting_ends_at_unix_ms,
            crash_multiplier,
        }
    }

    /// Place a bet in the active round's betting window.
    pub async fn place_bet(
        &self,
        account: AccountId,
        stake: u64,
        auto_cashout_target: Option<f64>,
    ) -> EngineResult<BetId> {
        let round = self.active_round();
        self.bets
            .place_bet(&round, account, stake, auto_cashout_target)
            .await
    }

    /// Cash out a bet in the active round at the live multiplier.
    pub async fn cashout(&self, bet_id: BetId) -> EngineResult<u64> {
        let round = self.active_round();
        self.bets.cashout(&round, bet_id).await
    }

    /// Look up a bet in the active round. Bets never migrate across rounds;
    /// settled rounds are visible only through their history entry.
    pub async fn bet(&self, bet_id: BetId) -> Option<Bet> {
        let round = self.active_round();
        self.bets.bet(&round, bet_id).await
    }

    /// Last `n` completed rounds, most recent first, seeds revealed.
    pub fn recent_rounds(&self, n: usize) -> Vec<RoundHistoryEntry> {
        self.history.recent(n)
    }

    /// Recompute the commitment and crash point of a completed round from
    /// its revealed seed and compare against what was published.
    pub fn verify_round(&self, round_id: u64) -> EngineResult<bool> {
        let entry = self
            .history
            .get(round_id)
            .ok_or(EngineError::RoundNotFound(round_id))?;
        Ok(fairness::verify(
            &entry.seed,
            &entry.commit_hash,
            entry.crash_multiplier,
            self.max_multiplier,
        ))
    }

    pub fn account_stats(&self, account: &str) -> Option<AccountStats> {
        self.stats.get(account)
    }

    pub fn top_winners(&self, n: usize) -> Vec<(AccountId, AccountStats)> {
        self.stats.top_winners(n)
    }

    /// Stop the scheduler. In-flight credit deliveries keep running until
    /// the runtime is torn down.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.scheduler_task.await;
    }
}
