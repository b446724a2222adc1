//! Provably fair seed commitment and crash-point derivation.
//!
//! Before a betting window opens the engine publishes a SHA-256 commitment
//! over the round's secret seed material. After the round crashes the seed is
//! revealed so any third party can recompute both the commitment and the
//! crash multiplier and confirm they match what was published.
//!
//! Crash-point reduction, formula v1 (published, reproducible):
//! - `digest = HMAC-SHA256(key = server_seed, msg = "{client_seed}:{nonce}")`
//! - `h` = first 52 bits of the digest as an integer, `M` = 2^52
//! - instant crash: if `h % (100 / house_edge_percent) == 0`, point = 1.00
//! - otherwise `point = floor((100*M - h) / (M - h)) / 100`, clamped to
//!   `[1.00, max_multiplier]`
//!
//! The formula version and house-edge parameter are recorded with every
//! round so historical rounds stay verifiable if constants change later.

use crate::errors::{EngineError, EngineResult};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    OnceLock,
};

type HmacSha256 = Hmac<Sha256>;

/// Version tag of the crash-point reduction formula.
pub const FORMULA_VERSION: u32 = 1;

const FRACTION_BITS: u32 = 52;
const FRACTION_SPACE: u64 = 1 << FRACTION_BITS;

/// Secret seed material for one round. The crash point is derived exactly
/// once and cached; it is revealed, never recomputed or changed.
#[derive(Debug)]
pub struct RoundSeed {
    server_seed: [u8; 32],
    client_seed: String,
    nonce: u64,
    house_edge_percent: u8,
    max_multiplier: f64,
    crash: OnceLock<f64>,
}

impl RoundSeed {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }
}

/// Seed material published after a round ends, sufficient for third-party
/// verification of the commitment and the crash multiplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevealedSeed {
    pub server_seed: String,
    pub client_seed: String,
    pub nonce: u64,
    pub formula_version: u32,
    pub house_edge_percent: u8,
}

/// Generates and commits round seeds, derives crash points, reveals seeds.
pub struct FairnessCommitter {
    client_seed: String,
    house_edge_percent: u8,
    max_multiplier: f64,
    nonce: AtomicU64,
}

impl FairnessCommitter {
    pub fn new(client_seed: String, house_edge_percent: u8, max_multiplier: f64) -> Self {
        Self {
            client_seed,
            house_edge_percent,
            max_multiplier,
            nonce: AtomicU64::new(0),
        }
    }

    /// Generate a fresh secret server seed, mix in the client seed and a
    /// strictly increasing nonce, and return the public commitment hash
    /// alongside the secret seed handle.
    pub fn commit(&self) -> (String, RoundSeed) {
        let mut server_seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut server_seed);

        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let commit_hash = commit_hash(&hex::encode(server_seed), &self.client_seed, nonce);

        let seed = RoundSeed {
            server_seed,
            client_seed: self.client_seed.clone(),
            nonce,
            house_edge_percent: self.house_edge_percent,
            max_multiplier: self.max_multiplier,
            crash: OnceLock::new(),
        };

        (commit_hash, seed)
    }

    /// Derive the crash point for a committed seed. Idempotent: the value is
    /// computed exactly once per handle and cached, never regenerated.
    pub fn derive_crash_point(&self, seed: &RoundSeed) -> EngineResult<f64> {
        if let Some(point) = seed.crash.get() {
            return Ok(*point);
        }
        let point = crash_point_v1(
            &seed.server_seed,
            &seed.client_seed,
            seed.nonce,
            seed.house_edge_percent,
            seed.max_multiplier,
        )?;
        Ok(*seed.crash.get_or_init(|| point))
    }

    /// Reveal the secret seed material. The scheduler only calls this after
    /// the round has crashed or been voided.
    pub fn reveal(&self, seed: &RoundSeed) -> RevealedSeed {
        RevealedSeed {
            server_seed: hex::encode(seed.server_seed),
            client_seed: seed.client_seed.clone(),
            nonce: seed.nonce,
            formula_version: FORMULA_VERSION,
            house_edge_percent: seed.house_edge_percent,
        }
    }
}

/// Public commitment: SHA-256 over `server_seed_hex:client_seed:nonce`.
pub fn commit_hash(server_seed_hex: &str, client_seed: &str, nonce: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", server_seed_hex, client_seed, nonce).as_bytes());
    hex::encode(hasher.finalize())
}

/// Crash-point reduction formula, version 1. Pure; reproducible by any third
/// party given the revealed seed material.
pub fn crash_point_v1(
    server_seed: &[u8],
    client_seed: &str,
    nonce: u64,
    house_edge_percent: u8,
    max_multiplier: f64,
) -> EngineResult<f64> {
    if !(1..=10).contains(&house_edge_percent) {
        return Err(EngineError::FairnessDerivationFailed(format!(
            "house edge percent {} outside supported range 1..=10",
            house_edge_percent
        )));
    }
    if max_multiplier < 1.0 {
        return Err(EngineError::FairnessDerivationFailed(format!(
            "max multiplier {} below 1.00",
            max_multiplier
        )));
    }

    let mut mac = HmacSha256::new_from_slice(server_seed)
        .map_err(|e| EngineError::FairnessDerivationFailed(e.to_string()))?;
    mac.update(format!("{}:{}", client_seed, nonce).as_bytes());
    let digest = mac.finalize().into_bytes();

    let prefix = u64::from_be_bytes(
        digest[..8]
            .try_into()
            .map_err(|_| EngineError::FairnessDerivationFailed("short digest".to_string()))?,
    );
    let h = prefix >> (64 - FRACTION_BITS);

    // Instant crash folds the house edge into the reduction.
    let instant_crash_modulus = 100 / house_edge_percent as u64;
    if h % instant_crash_modulus == 0 {
        return Ok(1.00);
    }

    let point = ((100 * FRACTION_SPACE - h) / (FRACTION_SPACE - h)) as f64 / 100.0;
    Ok(point.clamp(1.00, max_multiplier))
}

/// Recompute commitment and crash point from revealed seed material and
/// compare against what was published. Voided rounds carry no crash point;
/// pass `None` to verify the commitment alone.
pub fn verify(
    revealed: &RevealedSeed,
    expected_commit_hash: &str,
    expected_crash: Option<f64>,
    max_multiplier: f64,
) -> bool {
    if revealed.formula_version != FORMULA_VERSION {
        return false;
    }

    let recomputed_hash = commit_hash(&revealed.server_seed, &revealed.client_seed, revealed.nonce);
    if recomputed_hash != expected_commit_hash {
        return false;
    }

    let Some(expected) = expected_crash else {
        return true;
    };

    let Ok(server_seed) = hex::decode(&revealed.server_seed) else {
        return false;
    };
    match crash_point_v1(
        &server_seed,
        &revealed.client_seed,
        revealed.nonce,
        revealed.house_edge_percent,
        max_multiplier,
    ) {
        Ok(point) => (point - expected).abs() < 1e-9,
        Err(_) => false,
    }
}
