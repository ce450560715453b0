//! Trace reports and table rendering

use anyhow::{Context, Result, bail};
use mimic_obfuscation::{
    BurstStats, Detection, PacketRecord, SizeStats, TimingStats, burst_stats, detect_tls_in_tls,
    size_stats, timing_stats,
};
use serde::Serialize;
use std::time::Duration;
use tabled::{Table, Tabled};

#[derive(Debug, Serialize)]
pub struct TraceReport {
    pub sizes: Option<SizeStats>,
    pub timing: Option<TimingStats>,
    pub bursts: Option<BurstStats>,
    pub detection: Detection,
}

impl TraceReport {
    pub fn from_records(records: &[PacketRecord]) -> Self {
        Self {
            sizes: size_stats(records),
            timing: timing_stats(records),
            bursts: burst_stats(records),
            detection: detect_tls_in_tls(records),
        }
    }
}

#[derive(Tabled)]
pub struct Row {
    metric: String,
    value: String,
}

impl Row {
    pub fn new(metric: &str, value: impl ToString) -> Self {
        Self {
            metric: metric.to_string(),
            value: value.to_string(),
        }
    }
}

pub fn table(rows: Vec<Row>) -> String {
    Table::new(rows).to_string()
}

pub fn trace_rows(report: &TraceReport) -> Vec<Row> {
    let mut rows = Vec::new();

    if let Some(s) = &report.sizes {
        rows.push(Row::new("packets", s.total_packets));
        rows.push(Row::new("size range", format!("{} - {} bytes", s.min_size, s.max_size)));
        rows.push(Row::new(
            "average size",
            format!("{:.2} ± {:.2} bytes", s.avg_size, s.size_stddev),
        ));
        rows.push(Row::new("unique 3-grams", s.unique_trigrams));
        for ([a, b, c], count) in &s.most_common_trigrams {
            let gram = format!("({}, {}, {}) x{}", a, b, c, count);
            rows.push(Row::new("common 3-gram", gram));
        }
    }

    if let Some(t) = &report.timing {
        rows.push(Row::new(
            "IAT range",
            format!("{:.2} - {:.2} ms", t.min_iat_ms, t.max_iat_ms),
        ));
        rows.push(Row::new(
            "average IAT",
            format!("{:.2} ± {:.2} ms", t.avg_iat_ms, t.iat_stddev_ms),
        ));
    }

    if let Some(b) = &report.bursts {
        rows.push(Row::new("bursts", b.total_bursts));
        rows.push(Row::new("average burst size", format!("{:.2} bytes", b.avg_burst_size)));
        rows.push(Row::new("packets per burst", format!("{:.2}", b.avg_packets_per_burst)));
        rows.push(Row::new("burst size stddev", format!("{:.2}", b.burst_size_stddev)));
    }

    let d = &report.detection;
    rows.push(Row::new("TLS-in-TLS detected", d.detected));
    rows.push(Row::new("confidence", format!("{:.0}%", d.confidence * 100.0)));
    for reason in &d.reasons {
        rows.push(Row::new("reason", reason));
    }
    rows.extend(assessment_rows(d));

    rows
}

/// Closing verdict with a recommendation
fn assessment_rows(d: &Detection) -> Vec<Row> {
    if d.detected {
        vec![
            Row::new(
                "assessment",
                "TLS-in-TLS pattern DETECTED, obfuscation may be insufficient",
            ),
            Row::new("recommendation", "Increase padding, adjust burst patterns"),
        ]
    } else {
        vec![
            Row::new("assessment", "No clear TLS-in-TLS signature detected"),
            Row::new(
                "handshake burst",
                format!("{:.0} bytes (target: 200-350)", d.avg_handshake_size),
            ),
            Row::new("recommendation", "Traffic appears similar to normal HTTPS"),
        ]
    }
}

/// Parse a `timestamp_seconds,size` trace. Timestamps are made relative
/// to the first packet.
pub fn parse_trace(content: &str) -> Result<Vec<PacketRecord>> {
    let mut raw = Vec::new();

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((ts, size)) = line.split_once(',') else {
            bail!("line {}: expected `timestamp,size`", i + 1);
        };
        let ts: f64 = ts
            .trim()
            .parse()
            .with_context(|| format!("line {}: bad timestamp", i + 1))?;
        let size: usize = size
            .trim()
            .parse()
            .with_context(|| format!("line {}: bad size", i + 1))?;
        if !ts.is_finite() || ts < 0.0 {
            bail!("line {}: timestamp must be a non-negative number", i + 1);
        }
        raw.push((i + 1, ts, size));
    }

    let origin = raw.first().map(|&(_, ts, _)| ts).unwrap_or(0.0);
    raw.into_iter()
        .map(|(line, ts, size)| {
            let Ok(offset) = Duration::try_from_secs_f64((ts - origin).max(0.0)) else {
                bail!("line {}: timestamp out of range", line);
            };
            Ok(PacketRecord::new(offset, size))
        })
        .collect()
}
