//! Burst shaping
//!
//! Each connection owns one [`BurstShaper`]. It walks a two-state machine
//! (in a burst / between bursts) whose transitions depend only on the
//! packet count and the selected [`BurstPattern`], re-tunes the timing
//! engine accordingly, waits, and pads.

use crate::chunk::Chunk;
use crate::config::ShapingProfile;
use crate::entropy::SharedRandom;
use crate::error::UnknownMode;
use crate::padding::{PaddingDistribution, PaddingEngine};
use crate::timing::{TimingEngine, TimingProfile};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Traffic class whose burst/gap rhythm is reproduced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BurstPattern {
    /// No re-tuning; the timing engine keeps its configured range
    #[default]
    Normal,
    /// Short request/response bursts separated by longer gaps
    Https,
    /// Evenly paced, congestion-controlled packets
    Http3,
    /// Frame bursts at roughly 30 fps
    VideoStream,
}

impl FromStr for BurstPattern {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "https" => Ok(Self::Https),
            "http3" => Ok(Self::Http3),
            "video" => Ok(Self::VideoStream),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for BurstPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Https => "https",
            Self::Http3 => "http3",
            Self::VideoStream => "video",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BurstState {
    #[default]
    InBurst,
    BetweenBursts,
}

/// Timing parameters for the current packet and the state that follows it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retune {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub mean_delay: Duration,
    pub next_state: BurstState,
    pub burst_completed: bool,
}

const fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

const fn retune(
    min: u64,
    max: u64,
    mean: u64,
    next_state: BurstState,
    burst_completed: bool,
) -> Retune {
    Retune {
        min_delay: ms(min),
        max_delay: ms(max),
        mean_delay: ms(mean),
        next_state,
        burst_completed,
    }
}

/// The burst transition table.
///
/// `packet_count` is the 1-based index of the packet being shaped. Returns
/// `None` for [`BurstPattern::Normal`], which never re-tunes.
pub fn transition(pattern: BurstPattern, state: BurstState, packet_count: u64) -> Option<Retune> {
    use BurstState::{BetweenBursts, InBurst};

    let r = match (pattern, state) {
        (BurstPattern::Normal, _) => return None,

        // Bursts of ~5 packets, 20-50ms think time between them
        (BurstPattern::Https, InBurst) if packet_count % 5 == 0 => {
            retune(0, 5, 2, BetweenBursts, true)
        }
        (BurstPattern::Https, InBurst) => retune(0, 5, 2, InBurst, false),
        (BurstPattern::Https, BetweenBursts) if packet_count % 8 == 0 => {
            retune(20, 50, 30, InBurst, false)
        }
        (BurstPattern::Https, BetweenBursts) => retune(20, 50, 30, BetweenBursts, false),

        // Paced, 5-15ms
        (BurstPattern::Http3, s) => retune(5, 15, 10, s, false),

        // Frames of ~10 packets, ~33ms apart
        (BurstPattern::VideoStream, InBurst) if packet_count % 10 == 0 => {
            retune(0, 2, 1, BetweenBursts, false)
        }
        (BurstPattern::VideoStream, InBurst) => retune(0, 2, 1, InBurst, false),
        (BurstPattern::VideoStream, BetweenBursts) if packet_count % 11 == 0 => {
            retune(25, 40, 33, InBurst, true)
        }
        (BurstPattern::VideoStream, BetweenBursts) => retune(25, 40, 33, BetweenBursts, false),
    };
    Some(r)
}

/// What happened to one shaped packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShapeReport {
    pub packet: u64,
    pub original_size: usize,
    pub padding: usize,
    pub delay: Duration,
}

/// Diagnostic snapshot of a shaper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BurstStatistics {
    pub total_packets: u64,
    pub burst_count: u64,
    pub state: BurstState,
    pub time_since_last: Duration,
}

/// Per-connection burst state machine
pub struct BurstShaper {
    pattern: BurstPattern,
    padding: PaddingEngine,
    timing: TimingEngine,
    packet_count: u64,
    burst_count: u64,
    state: BurstState,
}

impl BurstShaper {
    pub fn new(
        pattern: BurstPattern,
        distribution: PaddingDistribution,
        profile: TimingProfile,
        rng: SharedRandom,
    ) -> Self {
        Self {
            pattern,
            padding: PaddingEngine::new(distribution, rng.clone()),
            timing: TimingEngine::new(profile, rng),
            packet_count: 0,
            burst_count: 0,
            state: BurstState::InBurst,
        }
    }

    /// Build from resolved configuration, seeding the delay range
    pub fn from_profile(profile: &ShapingProfile, rng: SharedRandom) -> Self {
        let mut shaper = Self::new(profile.pattern, profile.distribution, profile.timing, rng);
        shaper
            .timing
            .set_delay_range(profile.min_delay, profile.max_delay);
        shaper
    }

    /// Derive companion padding and timing from the pattern alone
    pub fn for_pattern(pattern: BurstPattern, rng: SharedRandom) -> Self {
        let (distribution, profile) = match pattern {
            BurstPattern::Https => (PaddingDistribution::Https, TimingProfile::Exponential),
            BurstPattern::Http3 => (PaddingDistribution::Http3, TimingProfile::Exponential),
            _ => (PaddingDistribution::Uniform, TimingProfile::None),
        };
        Self::new(pattern, distribution, profile, rng)
    }

    pub fn pattern(&self) -> BurstPattern {
        self.pattern
    }

    pub fn state(&self) -> BurstState {
        self.state
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    pub fn burst_count(&self) -> u64 {
        self.burst_count
    }

    pub fn timing(&self) -> &TimingEngine {
        &self.timing
    }

    pub fn padding(&self) -> &PaddingEngine {
        &self.padding
    }

    /// Shape one packet in place: re-tune and wait (steady state only,
    /// never for the first packet), then pad.
    pub async fn shape_packet(
        &mut self,
        chunk: &mut Chunk,
        is_handshake: bool,
        cancel: &CancellationToken,
    ) -> ShapeReport {
        self.packet_count += 1;

        let mut delay = Duration::ZERO;
        if self.packet_count > 1 && !is_handshake {
            self.adjust_timing();
            delay = self.timing.apply_jitter(cancel).await;
        }

        let original_size = chunk.len();
        let wanted = self.padding.generate_padding(is_handshake, original_size);
        let padding = self.padding.apply_padding(chunk, wanted);

        ShapeReport {
            packet: self.packet_count,
            original_size,
            padding,
            delay,
        }
    }

    fn adjust_timing(&mut self) {
        let Some(r) = transition(self.pattern, self.state, self.packet_count) else {
            return;
        };

        self.timing.set_delay_range(r.min_delay, r.max_delay);
        self.timing.set_mean_delay(r.mean_delay);
        self.state = r.next_state;
        if r.burst_completed {
            self.burst_count += 1;
        }
    }

    pub fn statistics(&self) -> BurstStatistics {
        BurstStatistics {
            total_packets: self.packet_count,
            burst_count: self.burst_count,
            state: self.state,
            time_since_last: self.timing.time_since_last_send(),
        }
    }

    /// Back to the initial state; engine bounds are left as they are
    pub fn reset(&mut self) {
        self.packet_count = 0;
        self.burst_count = 0;
        self.state = BurstState::InBurst;
    }
}
