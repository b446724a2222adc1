//! Append-only record of completed rounds for auditability and display.

use crate::bets::RoundTotals;
use crate::fairness::RevealedSeed;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Immutable snapshot of a completed round. Created once the round reaches
/// `Settled` or `Voided`; never mutated thereafter. Includes the revealed
/// seed material so any third party can re-verify the outcome.
#[derive(Debug, Clone, Serialize)]
pub struct RoundHistoryEntry {
    pub round_id: u64,
    pub commit_hash: String,
    pub seed: RevealedSeed,
    /// `None` for voided rounds, which never derived a crash point.
    pub crash_multiplier: Option<f64>,
    pub voided: bool,
    pub bet_count: usize,
    pub total_wagered: u64,
    pub total_paid_out: u64,
    pub recorded_at_unix_ms: u64,
}

impl RoundHistoryEntry {
    pub fn new(
        round_id: u64,
        commit_hash: String,
        seed: RevealedSeed,
        crash_multiplier: Option<f64>,
        totals: RoundTotals,
    ) -> Self {
        Self {
            round_id,
            commit_hash,
            seed,
            crash_multiplier,
            voided: crash_multiplier.is_none(),
            bet_count: totals.bet_count,
            total_wagered: totals.total_wagered,
            total_paid_out: totals.total_paid_out,
            recorded_at_unix_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }
}

/// Bounded append-only store of round history entries.
pub struct RoundHistoryStore {
    retention: usize,
    entries: RwLock<VecDeque<RoundHistoryEntry>>,
}

impl RoundHistoryStore {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            entries: RwLock::new(VecDeque::new()),
        }
    }

    /// Record a completed round. Called exactly once per round; a duplicate
    /// round id indicates a scheduler bug and is rejected loudly.
    pub fn record(&self, entry: RoundHistoryEntry) {
        let mut entries = self.entries.write().expect("history lock poisoned");
        if entries.iter().any(|e| e.round_id == entry.round_id) {
            tracing::error!(round_id = entry.round_id, "duplicate history record dropped");
            return;
        }
        entries.push_back(entry);
        while entries.len() > self.retention {
            entries.pop_front();
        }
    }

    /// Last `n` completed rounds, most recent first.
    pub fn recent(&self, n: usize) -> Vec<RoundHistoryEntry> {
        let entries = self.entries.read().expect("history lock poisoned");
        entries.iter().rev().take(n).cloned().collect()
    }

    pub fn get(&self, round_id: u64) -> Option<RoundHistoryEntry> {
        let entries = self.entries.read().expect("history lock poisoned");
        entries.iter().find(|e| e.round_id == round_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("history lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
