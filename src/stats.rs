//! Per-account betting statistics for leaderboard and profile consumers.
//!
//! Updated at settlement time only: voided bets leave no trace, matching the
//! refund semantics. Reads are lock-free per shard via `DashMap`.

use crate::ledger::AccountId;
use dashmap::DashMap;
use serde::Serialize;

/// Aggregated statistics for one account
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AccountStats {
    pub bets_settled: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_wagered: u64,
    pub total_won: u64,
    pub biggest_win: u64,
    pub biggest_multiplier: f64,
}

impl AccountStats {
    pub fn win_rate(&self) -> f64 {
        if self.bets_settled == 0 {
            return 0.0;
        }
        self.wins as f64 / self.bets_settled as f64
    }
}

/// Statistics book keyed by account
#[derive(Default)]
pub struct StatsBook {
    accounts: DashMap<AccountId, AccountStats>,
}

impl StatsBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_win(&self, account: &AccountId, stake: u64, payout: u64, multiplier: f64) {
        let mut stats = self.accounts.entry(account.clone()).or_default();
        stats.bets_settled += 1;
        stats.wins += 1;
        stats.total_wagered += stake;
        stats.total_won += payout;
        if payout > stats.biggest_win {
            stats.biggest_win = payout;
        }
        if multiplier > stats.biggest_multiplier {
            stats.biggest_multiplier = multiplier;
        }
    }

    pub fn record_loss(&self, account: &AccountId, stake: u64) {
        let mut stats = self.accounts.entry(account.clone()).or_default();
        stats.bets_settled += 1;
        stats.losses += 1;
        stats.total_wagered += stake;
    }

    pub fn get(&self, account: &str) -> Option<AccountStats> {
        self.accounts.get(account).map(|s| *s)
    }

    /// Accounts ranked by total winnings, largest first.
    pub fn top_winners(&self, n: usize) -> Vec<(AccountId, AccountStats)> {
        let mut all: Vec<(AccountId, AccountStats)> = self
            .accounts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        all.sort_by(|a, b| b.1.total_won.cmp(&a.1.total_won));
        all.truncate(n);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_win_and_loss_aggregation() {
        let book = StatsBook::new();
        let alice = "alice".to_string();

        book.record_win(&alice, 100, 180, 1.80);
        book.record_win(&alice, 50, 500, 10.0);
        book.record_loss(&alice, 20);

        let stats = book.get("alice").unwrap();
        assert_eq!(stats.bets_settled, 3);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.total_wagered, 170);
        assert_eq!(stats.total_won, 680);
        assert_eq!(stats.biggest_win, 500);
        assert_eq!(stats.biggest_multiplier, 10.0);
        assert!((stats.win_rate() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_top_winners_ordering() {
        let book = StatsBook::new();
        book.record_win(&"alice".to_string(), 10, 100, 10.0);
        book.record_win(&"bob".to_string(), 10, 300, 30.0);
        book.record_win(&"carol".to_string(), 10, 200, 20.0);

        let top = book.top_winners(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, "bob");
        assert_eq!(top[1].0, "carol");
    }

    #[test]
    fn test_unknown_account() {
        let book = StatsBook::new();
        assert!(book.get("nobody").is_none());
    }
}
