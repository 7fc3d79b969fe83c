//! Randomness for prize draws.
//!
//! All draws come through [`RandomSource`] so the orchestrator can run
//! against the OS CSPRNG in production and a scripted source in tests. A
//! draw carries both the uniform value and the seed bytes it came from; the
//! seed is persisted on every spin record so a draw can be re-derived after
//! the fact.

use crate::errors::{FairspinError, FairspinResult};
use rand_core::{OsRng, RngCore};
use std::sync::atomic::{AtomicUsize, Ordering};

const SEED_BYTES: usize = 8;

/// One uniform draw and the entropy that produced it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawValue {
    /// Uniform value in [0, 1).
    pub unit: f64,
    pub seed: [u8; SEED_BYTES],
}

impl DrawValue {
    /// Maps 8 seed bytes onto [0, 1) using the top 53 bits, the full
    /// precision of an f64 mantissa.
    pub fn from_seed(seed: [u8; SEED_BYTES]) -> Self {
        let unit = (u64::from_be_bytes(seed) >> 11) as f64 / (1u64 << 53) as f64;
        Self { unit, seed }
    }

    pub fn seed_hex(&self) -> String {
        hex::encode(self.seed)
    }
}

pub trait RandomSource: Send + Sync {
    fn draw(&self) -> FairspinResult<DrawValue>;
}

/// Production source backed by the operating system CSPRNG. Entropy
/// failures surface as errors rather than degrading to a weaker generator.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEntropySource;

impl RandomSource for OsEntropySource {
    fn draw(&self) -> FairspinResult<DrawValue> {
        let mut seed = [0u8; SEED_BYTES];
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| FairspinError::Entropy(format!("os entropy unavailable: {}", e)))?;
        Ok(DrawValue::from_seed(seed))
    }
}

/// Deterministic source that replays a fixed list of unit values, cycling
/// when exhausted. Used by tests and the simulator for reproducible runs.
pub struct SequenceSource {
    values: Vec<f64>,
    next: AtomicUsize,
}

impl SequenceSource {
    pub fn new(values: Vec<f64>) -> Self {
        assert!(!values.is_empty());
        Self {
            values,
            next: AtomicUsize::new(0),
        }
    }
}

impl RandomSource for SequenceSource {
    fn draw(&self) -> FairspinResult<DrawValue> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.values.len();
        let unit = self.values[idx];
        // Invert the unit mapping so seed_hex still re-derives the value.
        let seed = (((unit * (1u64 << 53) as f64) as u64) << 11).to_be_bytes();
        Ok(DrawValue { unit, seed })
    }
}
