//! Injectable random sources
//!
//! Every engine takes a [`SharedRandom`] at construction instead of reaching
//! for a process-wide generator. Production code uses [`OsRandom`]; tests
//! swap in [`SeededRandom`], [`ScriptedRandom`] or [`FailingRandom`].

use crate::error::EntropyError;
use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// Resolution of [`RandomSource::unit`] draws.
pub const UNIT_RESOLUTION: u64 = 1_000_000;

/// Substituted for a zero uniform draw before taking its logarithm.
pub const EPSILON: f64 = 0.000_001;

/// Narrow interface over a uniform random generator.
pub trait RandomSource: Send + Sync {
    /// Uniform integer in `[0, bound)`.
    fn below(&self, bound: u64) -> Result<u64, EntropyError>;

    /// Fill `dest` with random bytes.
    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError>;

    /// Uniform float in `[0, 1)` with one-in-a-million resolution.
    fn unit(&self) -> Result<f64, EntropyError> {
        Ok(self.below(UNIT_RESOLUTION)? as f64 / UNIT_RESOLUTION as f64)
    }
}

/// Shared handle passed to each engine.
pub type SharedRandom = Arc<dyn RandomSource>;

/// The default handle: the operating system CSPRNG.
pub fn os_random() -> SharedRandom {
    Arc::new(OsRandom)
}

/// Draw in `[0, bound)`, or `fallback` if the source fails.
pub(crate) fn below_or(rng: &dyn RandomSource, bound: u64, fallback: u64) -> u64 {
    match rng.below(bound) {
        Ok(v) => v,
        Err(e) => {
            trace!("random draw failed, using fallback {}: {}", fallback, e);
            fallback
        }
    }
}

/// Operating system random source.
///
/// `OsRng` holds no state, so concurrent use needs no locking.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn below(&self, bound: u64) -> Result<u64, EntropyError> {
        if bound == 0 {
            return Err(EntropyError::EmptyRange);
        }

        // Reject the partial zone at the top of the u64 range so every
        // residue is equally likely.
        let reject = (u64::MAX % bound + 1) % bound;
        let mut buf = [0u8; 8];
        loop {
            OsRng.try_fill_bytes(&mut buf)?;
            let v = u64::from_le_bytes(buf);
            if v <= u64::MAX - reject {
                return Ok(v % bound);
            }
        }
    }

    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError> {
        OsRng.try_fill_bytes(dest)?;
        Ok(())
    }
}

/// Deterministic generator for reproducible runs.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn shared(seed: u64) -> SharedRandom {
        Arc::new(Self::new(seed))
    }
}

impl RandomSource for SeededRandom {
    fn below(&self, bound: u64) -> Result<u64, EntropyError> {
        if bound == 0 {
            return Err(EntropyError::EmptyRange);
        }
        Ok(self.rng.lock().gen_range(0..bound))
    }

    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError> {
        self.rng.lock().fill_bytes(dest);
        Ok(())
    }
}

/// Replays a fixed sequence of raw draws, cycling when exhausted.
///
/// Each call to [`RandomSource::below`] consumes one value and reduces it
/// modulo the bound, so a script of `[250_000]` makes every `unit()` draw
/// return exactly `0.25`.
pub struct ScriptedRandom {
    values: Vec<u64>,
    cursor: AtomicUsize,
}

impl ScriptedRandom {
    pub fn new(values: Vec<u64>) -> Self {
        Self {
            values,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn shared(values: Vec<u64>) -> SharedRandom {
        Arc::new(Self::new(values))
    }

    /// Number of draws consumed so far
    pub fn draws(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    fn next(&self) -> Result<u64, EntropyError> {
        if self.values.is_empty() {
            return Err(EntropyError::Unavailable);
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(self.values[i % self.values.len()])
    }
}

impl RandomSource for ScriptedRandom {
    fn below(&self, bound: u64) -> Result<u64, EntropyError> {
        if bound == 0 {
            return Err(EntropyError::EmptyRange);
        }
        Ok(self.next()? % bound)
    }

    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError> {
        for byte in dest.iter_mut() {
            *byte = self.next()? as u8;
        }
        Ok(())
    }
}

/// A source that always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingRandom;

impl FailingRandom {
    pub fn shared() -> SharedRandom {
        Arc::new(Self)
    }
}

impl RandomSource for FailingRandom {
    fn below(&self, _bound: u64) -> Result<u64, EntropyError> {
        Err(EntropyError::Unavailable)
    }

    fn fill(&self, _dest: &mut [u8]) -> Result<(), EntropyError> {
        Err(EntropyError::Unavailable)
    }
}
