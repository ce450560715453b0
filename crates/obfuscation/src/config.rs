//! Obfuscation configuration
//!
//! The named options are resolved once into a [`ShapingProfile`]; nothing
//! downstream looks at the mode strings again.

use crate::burst::BurstPattern;
use crate::error::ConfigError;
use crate::padding::PaddingDistribution;
use crate::timing::TimingProfile;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Obfuscation configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ObfuscationConfig {
    /// Master switch; off means reads and writes pass straight through
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Padding distribution: "uniform", "http3" or "https"
    #[serde(default = "default_padding_mode")]
    pub padding_mode: String,

    /// Timing profile: "none", "uniform", "exponential" or "normal"
    #[serde(default = "default_timing_mode")]
    pub timing_mode: String,

    /// Burst pattern: "normal", "https", "http3" or "video"
    #[serde(default = "default_burst_pattern")]
    pub burst_pattern: String,

    /// Minimum jitter delay (ms)
    #[serde(default)]
    pub min_delay_ms: u32,

    /// Maximum jitter delay (ms)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u32,

    /// Per-packet diagnostic logging
    #[serde(default)]
    pub debug: bool,
}

fn default_true() -> bool {
    true
}

fn default_padding_mode() -> String {
    "http3".to_string()
}

fn default_timing_mode() -> String {
    "exponential".to_string()
}

fn default_burst_pattern() -> String {
    "https".to_string()
}

fn default_max_delay_ms() -> u32 {
    50
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            padding_mode: default_padding_mode(),
            timing_mode: default_timing_mode(),
            burst_pattern: default_burst_pattern(),
            min_delay_ms: 0,
            max_delay_ms: default_max_delay_ms(),
            debug: false,
        }
    }
}

/// Accepts either a bare table or one nested under `[obfuscation]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigFile {
    Nested { obfuscation: ObfuscationConfig },
    Bare(ObfuscationConfig),
}

impl ObfuscationConfig {
    /// A configuration with shaping switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(match file {
            ConfigFile::Nested { obfuscation } => obfuscation,
            ConfigFile::Bare(config) => config,
        })
    }

    pub fn padding_distribution(&self) -> PaddingDistribution {
        self.padding_mode.parse().unwrap_or_else(|_| {
            warn!(
                "Unknown padding mode {:?}, using {}",
                self.padding_mode,
                PaddingDistribution::default()
            );
            PaddingDistribution::default()
        })
    }

    pub fn timing_profile(&self) -> TimingProfile {
        self.timing_mode.parse().unwrap_or_else(|_| {
            warn!(
                "Unknown timing mode {:?}, using {}",
                self.timing_mode,
                TimingProfile::default()
            );
            TimingProfile::default()
        })
    }

    pub fn burst_pattern(&self) -> BurstPattern {
        self.burst_pattern.parse().unwrap_or_else(|_| {
            warn!(
                "Unknown burst pattern {:?}, using {}",
                self.burst_pattern,
                BurstPattern::default()
            );
            BurstPattern::default()
        })
    }

    /// Resolve the named options into the enums the engines consume
    pub fn resolve(&self) -> ShapingProfile {
        let max_delay = Duration::from_millis(self.max_delay_ms.into());
        let mut min_delay = Duration::from_millis(self.min_delay_ms.into());
        if min_delay > max_delay {
            warn!(
                "min_delay_ms {} exceeds max_delay_ms {}, clamping",
                self.min_delay_ms, self.max_delay_ms
            );
            min_delay = max_delay;
        }

        ShapingProfile {
            enabled: self.enabled,
            distribution: self.padding_distribution(),
            timing: self.timing_profile(),
            pattern: self.burst_pattern(),
            min_delay,
            max_delay,
            debug: self.debug,
        }
    }
}

/// Resolved, immutable shaping settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShapingProfile {
    pub enabled: bool,
    pub distribution: PaddingDistribution,
    pub timing: TimingProfile,
    pub pattern: BurstPattern,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub debug: bool,
}

impl Default for ShapingProfile {
    fn default() -> Self {
        ObfuscationConfig::default().resolve()
    }
}
