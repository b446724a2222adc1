//! Round scheduler: the single authoritative task driving the round state
//! machine.
//!
//! Phase transitions are scheduled against computed deadlines with
//! `sleep_until`, never approximated by polling: the crash fires at exactly
//! `start_of_flight + time_for_multiplier(crash_multiplier)`. Rounds are
//! strictly sequential; at most one round is ever in an active phase, and the
//! active round is published to readers through a `watch` channel.

use crate::autocashout::AutoCashoutMonitor;
use crate::bets::BetLedger;
use crate::clock::MultiplierClock;
use crate::config::EngineConfig;
use crate::fairness::FairnessCommitter;
use crate::history::{RoundHistoryEntry, RoundHistoryStore};
use crate::round::Round;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

pub struct RoundScheduler {
    committer: FairnessCommitter,
    clock: MultiplierClock,
    bets: Arc<BetLedger>,
    history: Arc<RoundHistoryStore>,
    monitor: AutoCashoutMonitor,
    betting_window: Duration,
    inter_round_pause: Duration,
    current: watch::Sender<Arc<Round>>,
    next_round_id: AtomicU64,
}

impl RoundScheduler {
    /// Build the scheduler and open the first round's betting window. The
    /// returned receiver always holds the active round.
    pub fn new(
        config: &EngineConfig,
        committer: FairnessCommitter,
        clock: MultiplierClock,
        bets: Arc<BetLedger>,
        history: Arc<RoundHistoryStore>,
        monitor: AutoCashoutMonitor,
    ) -> (Self, watch::Receiver<Arc<Round>>) {
        let next_round_id = AtomicU64::new(1);
        let first = new_round(&committer, &next_round_id, config.betting_window());
        tracing::info!(
            round_id = first.id,
            commit_hash = %first.commit_hash,
            "betting window open"
        );
        let (current, receiver) = watch::channel(first);

        (
            Self {
                committer,
                clock,
                bets,
                history,
                monitor,
                betting_window: config.betting_window(),
                inter_round_pause: config.inter_round_pause(),
                current,
                next_round_id,
            },
            receiver,
        )
    }

    /// Drive rounds until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let round = self.current.borrow().clone();

            if !wait_until(&mut shutdown, round.betting_ends_at).await {
                break;
            }

            match self.committer.derive_crash_point(&round.seed) {
                Ok(crash_multiplier) => {
                    let start = Instant::now();
                    let deadline = start + self.clock.time_for_multiplier(crash_multiplier);
                    {
                        // Serialize the phase flip with bet admission so no
                        // placement straddles the closing window.
                        let _book = round.bets.lock().await;
                        round.begin_flight(start, crash_multiplier, deadline);
                    }
                    tracing::info!(round_id = round.id, "round in flight");

                    let crashed = tokio::select! {
                        _ = self.monitor.run_flight(&round, deadline) => true,
                        _ = shutdown.changed() => false,
                    };
                    if !crashed {
                        break;
                    }

                    round.mark_crashed();
                    let totals = self.bets.settle_losses_on_crash(&round).await;
                    self.history.record(RoundHistoryEntry::new(
                        round.id,
                        round.commit_hash.clone(),
                        self.committer.reveal(&round.seed),
                        Some(crash_multiplier),
                        totals,
                    ));
                    round.mark_settled();
                    tracing::info!(
                        round_id = round.id,
                        crash_multiplier,
                        bets = totals.bet_count,
                        wagered = totals.total_wagered,
                        paid_out = totals.total_paid_out,
                        "round settled"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        round_id = round.id,
                        error = %e,
                        "crash point derivation failed; voiding round"
                    );
                    round.mark_voided();
                    let totals = self.bets.void_round(&round).await;
                    self.history.record(RoundHistoryEntry::new(
                        round.id,
                        round.commit_hash.clone(),
                        self.committer.reveal(&round.seed),
                        None,
                        totals,
                    ));
                }
            }

            if !wait_for(&mut shutdown, self.inter_round_pause).await {
                break;
            }

            let next = new_round(&self.committer, &self.next_round_id, self.betting_window);
            tracing::info!(
                round_id = next.id,
                commit_hash = %next.commit_hash,
                "betting window open"
            );
            self.current.send_replace(next);
        }

        tracing::info!("round scheduler stopped");
    }
}

fn new_round(
    committer: &FairnessCommitter,
    next_round_id: &AtomicU64,
    betting_window: Duration,
) -> Arc<Round> {
    let (commit_hash, seed) = committer.commit();
    let id = next_round_id.fetch_add(1, Ordering::SeqCst);
    Arc::new(Round::new(id, commit_hash, seed, betting_window))
}

/// Sleep until `deadline`; false if shutdown fired first.
async fn wait_until(shutdown: &mut watch::Receiver<bool>, deadline: Instant) -> bool {
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => true,
        _ = shutdown.changed() => false,
    }
}

/// Sleep for `duration`; false if shutdown fired first.
async fn wait_for(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.changed() => false,
    }
}
