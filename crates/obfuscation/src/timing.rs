//! Timing jitter for inter-packet delays

use crate::entropy::{EPSILON, SharedRandom};
use crate::error::UnknownMode;
use serde::Serialize;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Default upper bound on a single jitter wait
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(50);

/// Default mean delay (typical CDN edge latency)
pub const DEFAULT_MEAN_DELAY: Duration = Duration::from_millis(10);

/// Statistical law used for inter-packet delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingProfile {
    /// No jitter
    #[default]
    None,
    /// Uniform in `[min, max)`
    Uniform,
    /// Exponential with rate 1/mean (CDN-like latency)
    Exponential,
    /// Normal with stddev mean/3 (network jitter)
    Normal,
}

impl FromStr for TimingProfile {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "uniform" => Ok(Self::Uniform),
            "exponential" => Ok(Self::Exponential),
            "normal" => Ok(Self::Normal),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for TimingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Uniform => "uniform",
            Self::Exponential => "exponential",
            Self::Normal => "normal",
        })
    }
}

/// Computes and applies inter-packet delays
pub struct TimingEngine {
    profile: TimingProfile,
    min_delay: Duration,
    max_delay: Duration,
    mean_delay: Duration,
    last_send: Instant,
    rng: SharedRandom,
}

impl TimingEngine {
    pub fn new(profile: TimingProfile, rng: SharedRandom) -> Self {
        Self {
            profile,
            min_delay: Duration::ZERO,
            max_delay: DEFAULT_MAX_DELAY,
            mean_delay: DEFAULT_MEAN_DELAY,
            last_send: Instant::now(),
            rng,
        }
    }

    /// Start from an explicit range; the mean is its midpoint
    pub fn with_range(mut self, min: Duration, max: Duration) -> Self {
        self.set_delay_range(min, max);
        self
    }

    pub fn profile(&self) -> TimingProfile {
        self.profile
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn mean_delay(&self) -> Duration {
        self.mean_delay
    }

    /// Set the delay range and reset the mean to its midpoint
    pub fn set_delay_range(&mut self, min: Duration, max: Duration) {
        self.min_delay = min;
        self.max_delay = max;
        self.mean_delay = if min <= max {
            min + (max - min) / 2
        } else {
            max + (min - max) / 2
        };
    }

    /// Set the mean used by the exponential and normal profiles.
    /// May lie outside the range; results are still clamped to max.
    pub fn set_mean_delay(&mut self, mean: Duration) {
        self.mean_delay = mean;
    }

    /// Elapsed time since the last applied wait
    pub fn time_since_last_send(&self) -> Duration {
        self.last_send.elapsed()
    }

    /// Next delay under the current profile, in `[0, max_delay]`
    pub fn calculate_delay(&self) -> Duration {
        let delay = match self.profile {
            TimingProfile::None => Duration::ZERO,
            TimingProfile::Uniform => self.uniform_delay(),
            TimingProfile::Exponential => self.exponential_delay(),
            TimingProfile::Normal => self.normal_delay(),
        };
        delay.min(self.max_delay)
    }

    /// Wait for the next delay, or until `cancel` fires.
    ///
    /// Returns the delay that was scheduled (zero when no wait happened).
    /// Cancellation ends the wait early but is not an error.
    pub async fn apply_jitter(&mut self, cancel: &CancellationToken) -> Duration {
        if self.profile == TimingProfile::None {
            return Duration::ZERO;
        }

        let delay = self.calculate_delay();
        if delay.is_zero() {
            return Duration::ZERO;
        }

        self.last_send = Instant::now();

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                trace!("jitter wait of {:?} cut short by cancellation", delay);
            }
        }

        delay
    }

    fn uniform_delay(&self) -> Duration {
        let min_ms = millis(self.min_delay);
        let max_ms = millis(self.max_delay);
        if max_ms <= min_ms {
            return self.mean_delay;
        }

        match self.rng.below(max_ms - min_ms) {
            Ok(r) => Duration::from_millis(min_ms + r),
            Err(e) => {
                trace!("uniform delay draw failed, using mean: {}", e);
                self.mean_delay
            }
        }
    }

    fn exponential_delay(&self) -> Duration {
        let u = match self.rng.unit() {
            Ok(u) if u == 0.0 => EPSILON,
            Ok(u) => u,
            Err(e) => {
                trace!("exponential delay draw failed, using mean: {}", e);
                return self.mean_delay;
            }
        };

        let mean_ms = millis(self.mean_delay) as f64;
        if mean_ms <= 0.0 {
            return Duration::ZERO;
        }

        // -ln(U) / λ with λ = 1 / mean
        let sample = -u.ln() * mean_ms;
        Duration::from_millis((sample as u64).min(millis(self.max_delay)))
    }

    fn normal_delay(&self) -> Duration {
        let (u1, u2) = match (self.rng.unit(), self.rng.unit()) {
            (Ok(u1), Ok(u2)) => (u1 + EPSILON, u2 + EPSILON),
            _ => {
                trace!("normal delay draw failed, using mean");
                return self.mean_delay;
            }
        };

        // Box-Muller
        let z0 = (-2.0 * u1.ln()).max(0.0).sqrt() * (2.0 * PI * u2).cos();

        let mean_ms = millis(self.mean_delay) as f64;
        let stddev_ms = mean_ms / 3.0;
        let sample = (z0 * stddev_ms + mean_ms).max(0.0);
        Duration::from_millis((sample as u64).min(millis(self.max_delay)))
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}
