//! Mimic Obfuscation - Statistical traffic shaping
//!
//! Makes a proxied connection's packet sizes and timing resemble HTTPS,
//! HTTP/3 or video streaming traffic. This crate provides:
//! - Padding length distributions (uniform, HTTP/3-like, HTTPS-like)
//! - Inter-packet delay profiles (uniform, exponential, normal)
//! - Per-connection burst state machine
//! - Writer/reader wrappers over a chunked transport
//! - Trace analysis for checking the result

mod analysis;
mod burst;
mod chunk;
mod config;
mod entropy;
mod error;
mod padding;
mod timing;
mod wrapper;

pub use analysis::*;
pub use burst::*;
pub use chunk::*;
pub use config::*;
pub use entropy::*;
pub use error::*;
pub use padding::*;
pub use timing::*;
pub use wrapper::*;
