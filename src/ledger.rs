//! External account-ledger collaborator interface.
//!
//! The engine never persists balances itself; it issues debit/credit calls
//! against this trait. Debits fail fast (a timed-out debit means the bet is
//! not placed). Credits are retried with a per-credit idempotency id until
//! they succeed, since a lost payout is a correctness bug, not a transient
//! error to ignore.

use crate::errors::{EngineError, EngineResult};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Account identifier (wallet address or session id)
pub type AccountId = String;

/// Atomic debit/credit operations provided by the wallet service
#[async_trait]
pub trait AccountLedger: Send + Sync {
    /// Debit `amount` minor units from the account. Fails with
    /// `InsufficientFunds` or `AccountNotFound`; no partial debits.
    async fn debit(&self, account: &AccountId, amount: u64) -> EngineResult<()>;

    /// Credit `amount` minor units to the account. Idempotent per
    /// `credit_id`: replaying a delivered credit is a no-op success.
    async fn credit(&self, credit_id: Uuid, account: &AccountId, amount: u64) -> EngineResult<()>;
}

/// Wraps a ledger so every call carries a timeout. A timed-out debit is a
/// placement failure; a timed-out credit is retried by the credit worker.
pub struct TimedLedger {
    inner: Arc<dyn AccountLedger>,
    timeout: Duration,
}

impl TimedLedger {
    pub fn new(inner: Arc<dyn AccountLedger>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn timeout_error(&self) -> EngineError {
        EngineError::CollaboratorTimeout(self.timeout.as_millis() as u64)
    }
}

#[async_trait]
impl AccountLedger for TimedLedger {
    async fn debit(&self, account: &AccountId, amount: u64) -> EngineResult<()> {
        tokio::time::timeout(self.timeout, self.inner.debit(account, amount))
            .await
            .map_err(|_| self.timeout_error())?
    }

    async fn credit(&self, credit_id: Uuid, account: &AccountId, amount: u64) -> EngineResult<()> {
        tokio::time::timeout(self.timeout, self.inner.credit(credit_id, account, amount))
            .await
            .map_err(|_| self.timeout_error())?
    }
}

/// In-memory reference ledger for tests, the simulator binary, and embedding.
#[derive(Default)]
pub struct InMemoryAccountLedger {
    balances: DashMap<AccountId, u64>,
    applied_credits: DashSet<Uuid>,
}

impl InMemoryAccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an account with an initial balance, replacing any existing one.
    pub fn open_account(&self, account: impl Into<AccountId>, balance: u64) {
        self.balances.insert(account.into(), balance);
    }

    pub fn balance(&self, account: &str) -> Option<u64> {
        self.balances.get(account).map(|b| *b)
    }
}

#[async_trait]
impl AccountLedger for InMemoryAccountLedger {
    async fn debit(&self, account: &AccountId, amount: u64) -> EngineResult<()> {
        let mut balance = self
            .balances
            .get_mut(account)
            .ok_or_else(|| EngineError::AccountNotFound(account.clone()))?;
        if *balance < amount {
            return Err(EngineError::InsufficientFunds);
        }
        *balance -= amount;
        Ok(())
    }

    async fn credit(&self, credit_id: Uuid, account: &AccountId, amount: u64) -> EngineResult<()> {
        let mut balance = self
            .balances
            .get_mut(account)
            .ok_or_else(|| EngineError::AccountNotFound(account.clone()))?;
        if !self.applied_credits.insert(credit_id) {
            // Replayed credit: already delivered.
            return Ok(());
        }
        *balance += amount;
        Ok(())
    }
}

/// A payout the engine owes an account. The owning bet's terminal status is
/// already recorded before this marker is created.
#[derive(Debug, Clone)]
pub struct OwedCredit {
    pub credit_id: Uuid,
    pub account: AccountId,
    pub amount: u64,
    pub round_id: u64,
    pub bet_id: Uuid,
}

/// Background worker delivering owed credits with retry and backoff.
///
/// Each owed credit is driven by its own task so one stuck account cannot
/// delay payouts to others. `AccountNotFound` cannot be retried into
/// existence; it is escalated for operator intervention instead.
#[derive(Clone)]
pub struct CreditWorker {
    tx: mpsc::UnboundedSender<OwedCredit>,
}

impl CreditWorker {
    pub fn spawn(
        ledger: Arc<dyn AccountLedger>,
        initial_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<OwedCredit>();

        tokio::spawn(async move {
            while let Some(owed) = rx.recv().await {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    deliver_credit(ledger, owed, initial_backoff, max_backoff).await;
                });
            }
        });

        Self { tx }
    }

    /// Queue a credit for delivery. Infallible from the caller's view; the
    /// worker owns retries from here.
    pub fn enqueue(&self, owed: OwedCredit) {
        if self.tx.send(owed.clone()).is_err() {
            // Worker gone during shutdown; surface loudly rather than drop.
            tracing::error!(
                credit_id = %owed.credit_id,
                account = %owed.account,
                amount = owed.amount,
                "credit worker unavailable; payout requires manual intervention"
            );
        }
    }
}

async fn deliver_credit(
    ledger: Arc<dyn AccountLedger>,
    owed: OwedCredit,
    initial_backoff: Duration,
    max_backoff: Duration,
) {
    let mut backoff = initial_backoff;
    loop {
        match ledger.credit(owed.credit_id, &owed.account, owed.amount).await {
            Ok(()) => {
                tracing::debug!(
                    credit_id = %owed.credit_id,
                    account = %owed.account,
                    amount = owed.amount,
                    round_id = owed.round_id,
                    "credit delivered"
                );
                return;
            }
            Err(EngineError::AccountNotFound(account)) => {
                tracing::error!(
                    credit_id = %owed.credit_id,
                    account = %account,
                    amount = owed.amount,
                    round_id = owed.round_id,
                    "credit failed: account not found; manual intervention required"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(
                    credit_id = %owed.credit_id,
                    account = %owed.account,
                    error = %e,
                    "credit attempt failed; retrying in {:?}",
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(max_backoff);
            }
        }
    }
}
