//! Padding lengths shaped after real protocol packet sizes

use crate::chunk::{Chunk, HEADER_RESERVE, MAX_CHUNK_SIZE};
use crate::entropy::{EPSILON, SharedRandom, below_or};
use crate::error::UnknownMode;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Default padding ceiling
pub const DEFAULT_MAX_PADDING: usize = 1400;

/// HTTP/3 Initial packets are padded to roughly this size
const HTTP3_INITIAL_TARGET: i64 = 1200;

/// Rate of the exponential padding used for HTTPS application data
const HTTPS_LAMBDA: f64 = 0.002;

/// Fallback for HTTPS application data: the distribution mean (1/λ)
const HTTPS_FALLBACK: i64 = 500;

/// Statistical law used for padding lengths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingDistribution {
    /// 900-1400 bytes in the handshake, 0-255 afterwards
    #[default]
    Uniform,
    /// QUIC-like: ~1200 byte Initial packets, then bimodal small/large
    Http3,
    /// ~250 byte handshake burst, then exponential (mean ~500 bytes)
    Https,
}

impl FromStr for PaddingDistribution {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uniform" => Ok(Self::Uniform),
            "http3" => Ok(Self::Http3),
            "https" => Ok(Self::Https),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for PaddingDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uniform => "uniform",
            Self::Http3 => "http3",
            Self::Https => "https",
        })
    }
}

/// Generates padding lengths and appends padding to chunks
pub struct PaddingEngine {
    distribution: PaddingDistribution,
    min_padding: usize,
    max_padding: usize,
    rng: SharedRandom,
}

impl PaddingEngine {
    pub fn new(distribution: PaddingDistribution, rng: SharedRandom) -> Self {
        Self {
            distribution,
            min_padding: 0,
            max_padding: DEFAULT_MAX_PADDING,
            rng,
        }
    }

    /// Override the padding bounds. `max` is capped at what a single
    /// chunk can carry and `min` at `max`.
    pub fn with_bounds(mut self, min: usize, max: usize) -> Self {
        self.max_padding = max.min(MAX_CHUNK_SIZE - HEADER_RESERVE);
        self.min_padding = min.min(self.max_padding);
        self
    }

    pub fn distribution(&self) -> PaddingDistribution {
        self.distribution
    }

    pub fn max_padding(&self) -> usize {
        self.max_padding
    }

    /// Padding length for a packet carrying `current_size` payload bytes.
    ///
    /// Always in `[min_padding, max_padding]`; entropy failures fall back
    /// to fixed values and never surface as errors.
    pub fn generate_padding(&self, is_handshake: bool, current_size: usize) -> usize {
        let current = current_size.min(i64::MAX as usize) as i64;
        let padding = match self.distribution {
            PaddingDistribution::Uniform => self.uniform_padding(is_handshake),
            PaddingDistribution::Http3 => self.http3_padding(is_handshake, current),
            PaddingDistribution::Https => self.https_padding(is_handshake, current),
        };
        (padding.max(0) as usize).clamp(self.min_padding, self.max_padding)
    }

    fn uniform_padding(&self, is_handshake: bool) -> i64 {
        let rng = self.rng.as_ref();
        if is_handshake {
            900 + below_or(rng, 500, 0) as i64
        } else {
            below_or(rng, 256, 128) as i64
        }
    }

    fn http3_padding(&self, is_handshake: bool, current: i64) -> i64 {
        let rng = self.rng.as_ref();
        let max = self.max_padding as i64;

        if is_handshake {
            if current >= HTTP3_INITIAL_TARGET {
                return below_or(rng, 100, 0) as i64;
            }
            // Pad toward the Initial target, ±100 bytes
            let jitter = below_or(rng, 200, 100) as i64;
            return (HTTP3_INITIAL_TARGET - current + jitter - 100).clamp(0, max);
        }

        // Bimodal: 70% small (200-300 byte) packets, 30% large (1000-1400)
        if below_or(rng, 100, 0) < 70 {
            let l = below_or(rng, 100, 50) as i64;
            let padding = 250 - current + l - 50;
            let padding = if padding < 0 { l } else { padding };
            padding.min(300)
        } else {
            let l = below_or(rng, 400, 200) as i64;
            let padding = HTTP3_INITIAL_TARGET - current + l - 200;
            let padding = if padding < 0 { l } else { padding };
            padding.min(max)
        }
    }

    fn https_padding(&self, is_handshake: bool, current: i64) -> i64 {
        let rng = self.rng.as_ref();

        if is_handshake {
            let l = below_or(rng, 100, 50) as i64;
            let padding = 250 - current + l - 50;
            let padding = if padding < 0 {
                below_or(rng, 100, 50) as i64
            } else {
                padding
            };
            return padding.min(500);
        }

        // Exponential via inverse transform: -ln(U) / λ
        let u = match rng.unit() {
            Ok(u) if u == 0.0 => EPSILON,
            Ok(u) => u,
            Err(e) => {
                debug!("padding draw failed, using mean: {}", e);
                return HTTPS_FALLBACK;
            }
        };
        let sample = -u.ln() / HTTPS_LAMBDA;
        (sample as i64).clamp(0, self.max_padding as i64)
    }

    /// Append `len` random bytes to `chunk`, trimmed so the chunk plus the
    /// transport header still fits in [`MAX_CHUNK_SIZE`].
    ///
    /// Returns the number of bytes actually appended.
    pub fn apply_padding(&self, chunk: &mut Chunk, len: usize) -> usize {
        if len == 0 {
            return 0;
        }

        let available = MAX_CHUNK_SIZE.saturating_sub(chunk.len() + HEADER_RESERVE);
        let len = len.min(available);
        if len == 0 {
            return 0;
        }

        let padding = chunk.extend(len);
        if let Err(e) = self.rng.fill(padding) {
            debug!("failed to generate random padding, zero-filling: {}", e);
            padding.fill(0);
        }
        len
    }
}

/// Shannon entropy of `data` in bits per byte
pub fn entropy_estimate(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq = [0usize; 256];
    for &b in data {
        freq[b as usize] += 1;
    }

    let len = data.len() as f64;
    freq.iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::{FailingRandom, ScriptedRandom, SeededRandom, os_random};

    fn engine(distribution: PaddingDistribution) -> PaddingEngine {
        PaddingEngine::new(distribution, os_random())
    }

    #[test]
    fn test_uniform_ranges() {
        let engine = engine(PaddingDistribution::Uniform);
        for _ in 0..1000 {
            let hs = engine.generate_padding(true, 0);
            assert!((900..1400).contains(&hs));
            let app = engine.generate_padding(false, 0);
            assert!(app < 256);
        }
    }

    #[test]
    fn test_http3_handshake_targets_initial_size() {
        let engine = engine(PaddingDistribution::Http3);
        for _ in 0..1000 {
            let padded = engine.generate_padding(true, 0);
            assert!((1100..=1400).contains(&padded), "padded to {}", padded);
        }
    }

    #[test]
    fn test_http3_handshake_large_payload() {
        let engine = engine(PaddingDistribution::Http3);
        for _ in 0..200 {
            assert!(engine.generate_padding(true, 1300) < 100);
        }
    }

    #[test]
    fn test_http3_small_mode() {
        // mode draw 10 (< 70), jitter 60
        let engine = PaddingEngine::new(
            PaddingDistribution::Http3,
            ScriptedRandom::shared(vec![10, 60]),
        );
        assert_eq!(engine.generate_padding(false, 100), 160);
    }

    #[test]
    fn test_http3_large_mode() {
        let engine = PaddingEngine::new(
            PaddingDistribution::Http3,
            ScriptedRandom::shared(vec![80, 300]),
        );
        assert_eq!(engine.generate_padding(false, 0), 1300);
        // Payload already past the target: falls back to the jitter draw
        assert_eq!(engine.generate_padding(false, 5000), 300);
    }

    #[test]
    fn test_https_handshake() {
        let engine =
            PaddingEngine::new(PaddingDistribution::Https, ScriptedRandom::shared(vec![40]));
        assert_eq!(engine.generate_padding(true, 0), 240);

        // Payload already past the target: the second draw is used
        let engine = PaddingEngine::new(
            PaddingDistribution::Https,
            ScriptedRandom::shared(vec![40, 77]),
        );
        assert_eq!(engine.generate_padding(true, 600), 77);
    }

    #[test]
    fn test_https_exponential_inverse_transform() {
        let engine = PaddingEngine::new(
            PaddingDistribution::Https,
            ScriptedRandom::shared(vec![500_000]),
        );
        // -ln(0.5) / 0.002 = 346.57
        assert_eq!(engine.generate_padding(false, 0), 346);

        let engine =
            PaddingEngine::new(PaddingDistribution::Https, ScriptedRandom::shared(vec![0]));
        assert_eq!(engine.generate_padding(false, 0), DEFAULT_MAX_PADDING);
    }

    #[test]
    fn test_https_exponential_mean() {
        let engine = PaddingEngine::new(PaddingDistribution::Https, SeededRandom::shared(1))
            .with_bounds(0, MAX_CHUNK_SIZE);
        let n = 100_000;
        let total: usize = (0..n).map(|_| engine.generate_padding(false, 0)).sum();
        let mean = total as f64 / n as f64;
        // 1/λ = 500; allow 5%
        assert!((mean - 500.0).abs() < 25.0, "mean {}", mean);
    }

    #[test]
    fn test_entropy_failure_fallbacks() {
        let rng = FailingRandom::shared();
        let uniform = PaddingEngine::new(PaddingDistribution::Uniform, rng.clone());
        assert_eq!(uniform.generate_padding(true, 0), 900);
        assert_eq!(uniform.generate_padding(false, 0), 128);

        let http3 = PaddingEngine::new(PaddingDistribution::Http3, rng.clone());
        assert_eq!(http3.generate_padding(true, 0), 1200);
        assert_eq!(http3.generate_padding(false, 0), 250);

        let https = PaddingEngine::new(PaddingDistribution::Https, rng);
        assert_eq!(https.generate_padding(true, 0), 250);
        assert_eq!(https.generate_padding(false, 0), 500);
    }

    #[test]
    fn test_bounds_are_respected() {
        let engine =
            PaddingEngine::new(PaddingDistribution::Http3, os_random()).with_bounds(64, 512);
        for size in [0, 10, 300, 1200, 4000] {
            for hs in [true, false] {
                let padding = engine.generate_padding(hs, size);
                assert!((64..=512).contains(&padding));
            }
        }
    }

    #[test]
    fn test_apply_padding_respects_chunk_capacity() {
        let engine = engine(PaddingDistribution::Uniform);

        let mut chunk = Chunk::from(vec![0u8; 8000]);
        let applied = engine.apply_padding(&mut chunk, 1000);
        assert_eq!(applied, MAX_CHUNK_SIZE - 8000 - HEADER_RESERVE);
        assert_eq!(chunk.len() + HEADER_RESERVE, MAX_CHUNK_SIZE);

        let mut full = Chunk::from(vec![0u8; 8180]);
        assert_eq!(engine.apply_padding(&mut full, 50), 0);
        assert_eq!(full.len(), 8180);
    }

    #[test]
    fn test_padded_size_never_exceeds_capacity() {
        let rng = SeededRandom::shared(9);
        for distribution in [
            PaddingDistribution::Uniform,
            PaddingDistribution::Http3,
            PaddingDistribution::Https,
        ] {
            let engine = PaddingEngine::new(distribution, rng.clone());
            for i in 0..500 {
                let size = (i * 97) % MAX_CHUNK_SIZE;
                let mut chunk = Chunk::from(vec![1u8; size]);
                let padding = engine.generate_padding(i % 3 == 0, size);
                engine.apply_padding(&mut chunk, padding);
                assert!(chunk.len() + HEADER_RESERVE <= MAX_CHUNK_SIZE.max(size + HEADER_RESERVE));
            }
        }
    }

    #[test]
    fn test_padding_bytes_are_high_entropy() {
        let engine = engine(PaddingDistribution::Uniform);
        let mut chunk = Chunk::new();
        engine.apply_padding(&mut chunk, 4096);
        assert!(entropy_estimate(chunk.as_slice()) > 7.5);
    }

    #[test]
    fn test_fill_failure_zero_fills() {
        let engine = PaddingEngine::new(PaddingDistribution::Uniform, FailingRandom::shared());
        let mut chunk = Chunk::from(&b"payload"[..]);
        assert_eq!(engine.apply_padding(&mut chunk, 16), 16);
        assert_eq!(chunk.len(), 23);
        assert!(chunk.bytes_from(7).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_entropy_estimate() {
        assert_eq!(entropy_estimate(&[]), 0.0);
        assert_eq!(entropy_estimate(&[7; 64]), 0.0);
        assert!((entropy_estimate(&[0, 1, 0, 1]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_distribution() {
        assert_eq!("http3".parse(), Ok(PaddingDistribution::Http3));
        assert_eq!("Https".parse(), Ok(PaddingDistribution::Https));
        assert!("quic".parse::<PaddingDistribution>().is_err());
        assert_eq!(PaddingDistribution::Http3.to_string(), "http3");
    }
}
