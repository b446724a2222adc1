//! Altitude - Provably Fair Crash Game Round Engine
//!
//! A single authoritative process that runs a continuously repeating crash
//! betting round: the multiplier climbs from 1.00x, bets placed before the
//! round starts may be cashed out any time before a pre-committed crash
//! instant, and bets still open at the crash lose their stake.
//!
//! The engine commits to each round's outcome before betting opens
//! (commit/reveal with a published reduction formula), schedules the crash
//! against an exact deadline rather than a polled approximation, and settles
//! every bet exactly once. Transports, wallets, and payment providers are
//! external collaborators behind the [`ledger::AccountLedger`] trait and the
//! [`engine::Engine`] facade.

pub mod autocashout;
pub mod bets;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fairness;
pub mod history;
pub mod ledger;
pub mod round;
pub mod scheduler;
pub mod stats;

pub use bets::{Bet, BetId, BetStatus};
pub use clock::MultiplierClock;
pub use config::{ConfigLoader, EngineConfig};
pub use engine::{Engine, RoundStatus};
pub use errors::{EngineError, EngineResult};
pub use fairness::{FairnessCommitter, RevealedSeed, FORMULA_VERSION};
pub use history::RoundHistoryEntry;
pub use ledger::{AccountId, AccountLedger, InMemoryAccountLedger};
pub use round::Phase;
pub use stats::AccountStats;
