//! Multiplier clock: pure mapping between elapsed flight time and the
//! displayed multiplier, plus the inverse used to schedule the crash instant.
//!
//! Growth law: `multiplier = e^(k * elapsed_secs)` for a tunable growth rate
//! `k`. The forward value is carried at full precision for settlement
//! comparisons; only `display` rounds to two decimals.

use std::time::Duration;

/// Pure multiplier-vs-time function
#[derive(Debug, Clone, Copy)]
pub struct MultiplierClock {
    growth_rate: f64,
}

impl MultiplierClock {
    /// Create a clock with the given exponential growth rate (per second).
    ///
    /// The default of 0.07/s reaches 2.00x at roughly 9.9 seconds.
    pub fn new(growth_rate: f64) -> Self {
        debug_assert!(growth_rate > 0.0, "growth rate must be positive");
        Self { growth_rate }
    }

    /// Multiplier at the given elapsed flight time, full precision.
    /// `multiplier_at(0) == 1.00` and the function is strictly increasing.
    pub fn multiplier_at(&self, elapsed: Duration) -> f64 {
        (self.growth_rate * elapsed.as_secs_f64()).exp()
    }

    /// Exact flight duration at which the multiplier reaches `multiplier`.
    ///
    /// Used by the scheduler to compute the wall-clock crash instant from the
    /// pre-committed crash multiplier. Values below 1.00 map to zero.
    pub fn time_for_multiplier(&self, multiplier: f64) -> Duration {
        let m = multiplier.max(1.0);
        Duration::from_secs_f64(m.ln() / self.growth_rate)
    }

    /// Round a full-precision multiplier to the two-decimal display value.
    pub fn display(multiplier: f64) -> f64 {
        (multiplier * 100.0).round() / 100.0
    }
}
