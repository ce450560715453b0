//! Drive synthetic traffic through the shaping layer

use async_trait::async_trait;
use mimic_obfuscation::{
    BurstStatistics, Chunk, ChunkWriter, MultiChunk, ObfuscationConfig, PacketRecord,
    SeededRandom, ShapingProfile, os_random, wrap_writer_with_rng,
};
use std::io;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::report::TraceReport;

/// In-memory transport that timestamps every chunk it receives
pub struct RecordingTransport {
    start: Instant,
    records: Vec<PacketRecord>,
    batches: usize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            records: Vec::new(),
            batches: 0,
        }
    }

    pub fn records(&self) -> &[PacketRecord] {
        &self.records
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkWriter for RecordingTransport {
    async fn write_chunks(&mut self, chunks: MultiChunk) -> io::Result<()> {
        let timestamp = self.start.elapsed();
        self.batches += 1;
        self.records.extend(
            chunks
                .iter()
                .map(|c| PacketRecord::new(timestamp, c.len())),
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub packets: usize,
    pub batch: usize,
    pub min_size: usize,
    pub max_size: usize,
    pub seed: Option<u64>,
}

#[derive(Debug, serde::Serialize)]
pub struct SimulationReport {
    pub profile: ShapingProfile,
    pub bytes_in: usize,
    pub bytes_out: usize,
    pub downstream_writes: usize,
    pub shaper: Option<BurstStatistics>,
    pub trace: TraceReport,
}

pub async fn run(
    config: &ObfuscationConfig,
    opts: &SimulateOptions,
) -> io::Result<SimulationReport> {
    let rng = match opts.seed {
        Some(seed) => SeededRandom::shared(seed),
        None => os_random(),
    };
    let mut sizes = match opts.seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    };

    let cancel = CancellationToken::new();
    let mut writer = wrap_writer_with_rng(RecordingTransport::new(), config, cancel, rng);

    let min = opts.min_size.max(1);
    let max = opts.max_size.max(min);
    let batch = opts.batch.max(1);

    info!(
        "Simulating {} packets ({}..={} bytes, batches of {})",
        opts.packets, min, max, batch
    );

    let mut bytes_in = 0;
    let mut sent = 0;
    while sent < opts.packets {
        let n = batch.min(opts.packets - sent);
        let chunks: MultiChunk = (0..n)
            .map(|_| {
                let len = sizes.usize(min..=max);
                bytes_in += len;
                Chunk::from((0..len).map(|_| sizes.u8(..)).collect::<Vec<u8>>())
            })
            .collect();
        writer.write_chunks(chunks).await?;
        sent += n;
    }

    let shaper = writer.statistics();
    let transport = writer.into_inner();
    let records = transport.records();

    Ok(SimulationReport {
        profile: config.resolve(),
        bytes_in,
        bytes_out: records.iter().map(|r| r.size).sum(),
        downstream_writes: transport.batches,
        shaper,
        trace: TraceReport::from_records(records),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(packets: usize) -> SimulateOptions {
        SimulateOptions {
            packets,
            batch: 1,
            min_size: 100,
            max_size: 400,
            seed: Some(7),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_pads_traffic() {
        let report = run(&ObfuscationConfig::default(), &opts(50)).await.unwrap();
        assert_eq!(report.downstream_writes, 50);
        assert!(report.bytes_out > report.bytes_in);
        assert_eq!(report.shaper.unwrap().total_packets, 50);
        assert_eq!(report.trace.sizes.unwrap().total_packets, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_simulation_is_untouched() {
        let report = run(&ObfuscationConfig::disabled(), &opts(20)).await.unwrap();
        assert_eq!(report.bytes_out, report.bytes_in);
        assert!(report.shaper.is_none());
    }
}
