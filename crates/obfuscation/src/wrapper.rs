//! Writer/reader wrappers that shape a connection's chunk stream

use crate::burst::{BurstShaper, BurstStatistics};
use crate::chunk::{ChunkReader, ChunkWriter, MultiChunk, total_len};
use crate::config::{ObfuscationConfig, ShapingProfile};
use crate::entropy::{SharedRandom, os_random};
use async_trait::async_trait;
use std::io;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Number of leading units on a connection treated as handshake traffic
pub const HANDSHAKE_PACKETS: u64 = 8;

/// Shapes every outbound unit before handing the batch to `inner`
pub struct ObfuscationWriter<W> {
    inner: W,
    profile: ShapingProfile,
    shaper: Option<BurstShaper>,
    cancel: CancellationToken,
    packet_count: u64,
}

impl<W: ChunkWriter> ObfuscationWriter<W> {
    pub fn new(inner: W, config: &ObfuscationConfig, cancel: CancellationToken) -> Self {
        Self::with_rng(inner, config, cancel, os_random())
    }

    pub fn with_rng(
        inner: W,
        config: &ObfuscationConfig,
        cancel: CancellationToken,
        rng: SharedRandom,
    ) -> Self {
        let profile = config.resolve();
        let shaper = profile
            .enabled
            .then(|| BurstShaper::from_profile(&profile, rng));

        Self {
            inner,
            profile,
            shaper,
            cancel,
            packet_count: 0,
        }
    }
}

impl<W> ObfuscationWriter<W> {
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn profile(&self) -> &ShapingProfile {
        &self.profile
    }

    /// Non-empty units seen so far
    pub fn packets_sent(&self) -> u64 {
        self.packet_count
    }

    pub fn statistics(&self) -> Option<BurstStatistics> {
        self.shaper.as_ref().map(BurstShaper::statistics)
    }
}

#[async_trait]
impl<W: ChunkWriter> ChunkWriter for ObfuscationWriter<W> {
    async fn write_chunks(&mut self, chunks: MultiChunk) -> io::Result<()> {
        // A shaper exists only when shaping is enabled
        let Some(shaper) = self.shaper.as_mut() else {
            return self.inner.write_chunks(chunks).await;
        };

        let mut shaped = Vec::with_capacity(chunks.len());
        for mut chunk in chunks {
            if chunk.is_empty() {
                continue;
            }

            self.packet_count += 1;
            let is_handshake = self.packet_count <= HANDSHAKE_PACKETS;

            let report = shaper
                .shape_packet(&mut chunk, is_handshake, &self.cancel)
                .await;

            if self.profile.debug {
                debug!(
                    "Obfuscation applied: packet={} handshake={} original_size={} final_size={} padding={} delay={:?} bursts={}",
                    self.packet_count,
                    is_handshake,
                    report.original_size,
                    chunk.len(),
                    report.padding,
                    report.delay,
                    shaper.burst_count()
                );
            }

            shaped.push(chunk);
        }

        if shaped.is_empty() {
            return Ok(());
        }

        self.inner.write_chunks(shaped).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner.close().await
    }
}

/// Symmetric hook on the inbound side. Currently a pure pass-through.
pub struct ObfuscationReader<R> {
    inner: R,
    profile: ShapingProfile,
    packet_count: u64,
}

impl<R: ChunkReader> ObfuscationReader<R> {
    pub fn new(inner: R, config: &ObfuscationConfig) -> Self {
        Self {
            inner,
            profile: config.resolve(),
            packet_count: 0,
        }
    }
}

impl<R> ObfuscationReader<R> {
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read calls made so far
    pub fn packets_read(&self) -> u64 {
        self.packet_count
    }
}

#[async_trait]
impl<R: ChunkReader> ChunkReader for ObfuscationReader<R> {
    async fn read_chunks(&mut self) -> io::Result<MultiChunk> {
        self.packet_count += 1;

        let result = self.inner.read_chunks().await;

        if self.profile.debug {
            if let Ok(mb) = &result {
                if !mb.is_empty() {
                    debug!(
                        "Obfuscation read: packet={} size={}",
                        self.packet_count,
                        total_len(mb)
                    );
                }
            }
        }

        result
    }
}

/// A writer as returned by [`wrap_writer`]: the original, or a shaping wrapper
pub enum WrappedWriter<W> {
    Plain(W),
    Obfuscated(ObfuscationWriter<W>),
}

impl<W> WrappedWriter<W> {
    pub fn is_obfuscated(&self) -> bool {
        matches!(self, Self::Obfuscated(_))
    }

    pub fn get_ref(&self) -> &W {
        match self {
            Self::Plain(w) => w,
            Self::Obfuscated(w) => w.get_ref(),
        }
    }

    pub fn into_inner(self) -> W {
        match self {
            Self::Plain(w) => w,
            Self::Obfuscated(w) => w.into_inner(),
        }
    }

    pub fn statistics(&self) -> Option<BurstStatistics> {
        match self {
            Self::Plain(_) => None,
            Self::Obfuscated(w) => w.statistics(),
        }
    }
}

#[async_trait]
impl<W: ChunkWriter> ChunkWriter for WrappedWriter<W> {
    async fn write_chunks(&mut self, chunks: MultiChunk) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.write_chunks(chunks).await,
            Self::Obfuscated(w) => w.write_chunks(chunks).await,
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.close().await,
            Self::Obfuscated(w) => w.close().await,
        }
    }
}

/// A reader as returned by [`wrap_reader`]
pub enum WrappedReader<R> {
    Plain(R),
    Obfuscated(ObfuscationReader<R>),
}

impl<R> WrappedReader<R> {
    pub fn is_obfuscated(&self) -> bool {
        matches!(self, Self::Obfuscated(_))
    }

    pub fn into_inner(self) -> R {
        match self {
            Self::Plain(r) => r,
            Self::Obfuscated(r) => r.into_inner(),
        }
    }
}

#[async_trait]
impl<R: ChunkReader> ChunkReader for WrappedReader<R> {
    async fn read_chunks(&mut self) -> io::Result<MultiChunk> {
        match self {
            Self::Plain(r) => r.read_chunks().await,
            Self::Obfuscated(r) => r.read_chunks().await,
        }
    }
}

/// Wrap a connection's writer if shaping is enabled
pub fn wrap_writer<W: ChunkWriter>(
    writer: W,
    config: &ObfuscationConfig,
    cancel: CancellationToken,
) -> WrappedWriter<W> {
    wrap_writer_with_rng(writer, config, cancel, os_random())
}

pub fn wrap_writer_with_rng<W: ChunkWriter>(
    writer: W,
    config: &ObfuscationConfig,
    cancel: CancellationToken,
    rng: SharedRandom,
) -> WrappedWriter<W> {
    if !config.enabled {
        return WrappedWriter::Plain(writer);
    }
    WrappedWriter::Obfuscated(ObfuscationWriter::with_rng(writer, config, cancel, rng))
}

/// Wrap a connection's reader if shaping is enabled
pub fn wrap_reader<R: ChunkReader>(reader: R, config: &ObfuscationConfig) -> WrappedReader<R> {
    if !config.enabled {
        return WrappedReader::Plain(reader);
    }
    WrappedReader::Obfuscated(ObfuscationReader::new(reader, config))
}
