//! Invalidation Module
//!
//! Strategies an item applies on a miss, an expiry, or an early-refresh
//! window, to keep concurrent callers from all recomputing the same value.

use std::time::Duration;

use crate::value::Value;

// == Invalidation ==
/// How [`Item::get`](crate::pool::Item::get) behaves when the stored value
/// cannot be served as fresh.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Invalidation {
    /// Report a miss straight away.
    #[default]
    None,
    /// Serve the stale value; still a miss unless another caller is
    /// already recomputing.
    Old,
    /// Serve this placeholder instead of the stale value.
    Value(Value),
    /// While another caller holds the recompute lease, re-check every
    /// `interval` for up to `timeout`.
    Sleep { timeout: Duration, interval: Duration },
    /// Treat a still-valid value as a miss once it enters the window, so one
    /// caller can refresh it before it really expires.
    Precompute(PrecomputeWindow),
}

impl Invalidation {
    pub fn sleep(timeout: Duration, interval: Duration) -> Self {
        Invalidation::Sleep { timeout, interval }
    }

    pub fn precompute_fraction(fraction: f64) -> Self {
        Invalidation::Precompute(PrecomputeWindow::Fraction(fraction))
    }

    pub fn precompute_lead(lead: Duration) -> Self {
        Invalidation::Precompute(PrecomputeWindow::Lead(lead))
    }
}

// == Precompute Window ==
/// Size of the early-refresh window at the end of a value's lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrecomputeWindow {
    /// Fraction of the total lifetime, clamped to `0.0..=1.0`.
    Fraction(f64),
    /// Fixed lead time before expiration.
    Lead(Duration),
}

impl PrecomputeWindow {
    /// Window length for a value that lives `lifetime` in total.
    pub fn lead(&self, lifetime: chrono::Duration) -> chrono::Duration {
        match *self {
            PrecomputeWindow::Fraction(fraction) => {
                let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
                let millis = lifetime.num_milliseconds().max(0) as f64 * fraction;
                chrono::Duration::milliseconds(millis.round() as i64)
            }
            PrecomputeWindow::Lead(lead) => {
                chrono::Duration::from_std(lead).unwrap_or(chrono::Duration::MAX)
            }
        }
    }
}
