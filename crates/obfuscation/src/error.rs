//! Error types

use thiserror::Error;

/// Failure of the random source backing padding and delay generation.
///
/// Never leaves the crate's shaping path: every call site substitutes a
/// documented fallback value instead.
#[derive(Error, Debug)]
pub enum EntropyError {
    #[error("OS random source failed: {0}")]
    Os(#[from] rand::Error),

    #[error("Random bound must be positive")]
    EmptyRange,

    #[error("Random source unavailable")]
    Unavailable,
}

/// Errors raised while loading an obfuscation configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A mode name that matches no known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown mode: {0:?}")]
pub struct UnknownMode(pub String);
