//! Packet trace analysis
//!
//! Measures what a passive classifier sees: size distribution, inter-arrival
//! times and burst structure, plus a heuristic TLS-in-TLS detector. Used to
//! check that shaped traffic looks like the protocol it imitates.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Gap that separates two bursts
pub const BURST_GAP: Duration = Duration::from_millis(50);

/// Packets inspected by [`detect_tls_in_tls`]
pub const HANDSHAKE_WINDOW: usize = 10;

/// Most frequent size 3-grams kept in [`SizeStats`]
pub const TOP_TRIGRAMS: usize = 5;

/// One observed packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PacketRecord {
    /// Offset from the start of the capture
    pub timestamp: Duration,
    pub size: usize,
}

impl PacketRecord {
    pub fn new(timestamp: Duration, size: usize) -> Self {
        Self { timestamp, size }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizeStats {
    pub total_packets: usize,
    pub min_size: usize,
    pub max_size: usize,
    pub avg_size: f64,
    pub size_stddev: f64,
    /// Distinct (size, size, size) sequences
    pub unique_trigrams: usize,
    /// Up to [`TOP_TRIGRAMS`] sequences with their counts, most frequent
    /// first; ties keep first-seen order
    pub most_common_trigrams: Vec<([usize; 3], usize)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingStats {
    pub min_iat_ms: f64,
    pub max_iat_ms: f64,
    pub avg_iat_ms: f64,
    pub iat_stddev_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurstStats {
    pub total_bursts: usize,
    pub avg_burst_size: f64,
    pub avg_packets_per_burst: f64,
    pub burst_size_stddev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub detected: bool,
    pub confidence: f64,
    pub score: f64,
    pub reasons: Vec<String>,
    pub avg_handshake_size: f64,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
fn stddev(values: &[f64]) -> f64 {
    let m = mean(values);
    (values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

pub fn size_stats(packets: &[PacketRecord]) -> Option<SizeStats> {
    if packets.is_empty() {
        return None;
    }

    let sizes: Vec<usize> = packets.iter().map(|p| p.size).collect();
    let as_f64: Vec<f64> = sizes.iter().map(|&s| s as f64).collect();

    // count and first position of each 3-gram
    let mut trigrams: HashMap<[usize; 3], (usize, usize)> = HashMap::new();
    for (i, w) in sizes.windows(3).enumerate() {
        trigrams.entry([w[0], w[1], w[2]]).or_insert((0, i)).0 += 1;
    }
    let mut most_common: Vec<([usize; 3], usize, usize)> = trigrams
        .iter()
        .map(|(&gram, &(count, first))| (gram, count, first))
        .collect();
    most_common.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    most_common.truncate(TOP_TRIGRAMS);

    Some(SizeStats {
        total_packets: sizes.len(),
        min_size: sizes.iter().copied().min().unwrap_or(0),
        max_size: sizes.iter().copied().max().unwrap_or(0),
        avg_size: mean(&as_f64),
        size_stddev: stddev(&as_f64),
        unique_trigrams: trigrams.len(),
        most_common_trigrams: most_common
            .into_iter()
            .map(|(gram, count, _)| (gram, count))
            .collect(),
    })
}

pub fn timing_stats(packets: &[PacketRecord]) -> Option<TimingStats> {
    if packets.len() < 2 {
        return None;
    }

    let iats: Vec<f64> = packets
        .windows(2)
        .map(|w| w[1].timestamp.saturating_sub(w[0].timestamp).as_secs_f64() * 1000.0)
        .collect();

    Some(TimingStats {
        min_iat_ms: iats.iter().copied().fold(f64::INFINITY, f64::min),
        max_iat_ms: iats.iter().copied().fold(0.0, f64::max),
        avg_iat_ms: mean(&iats),
        iat_stddev_ms: stddev(&iats),
    })
}

/// Split packets into bursts separated by gaps longer than [`BURST_GAP`]
pub fn split_bursts(packets: &[PacketRecord]) -> Vec<&[PacketRecord]> {
    let mut bursts = Vec::new();
    let mut start = 0;
    for i in 1..packets.len() {
        if packets[i].timestamp.saturating_sub(packets[i - 1].timestamp) > BURST_GAP {
            bursts.push(&packets[start..i]);
            start = i;
        }
    }
    if start < packets.len() {
        bursts.push(&packets[start..]);
    }
    bursts
}

pub fn burst_stats(packets: &[PacketRecord]) -> Option<BurstStats> {
    if packets.is_empty() {
        return None;
    }

    let bursts = split_bursts(packets);
    let sizes: Vec<f64> = bursts
        .iter()
        .map(|b| b.iter().map(|p| p.size).sum::<usize>() as f64)
        .collect();
    let counts: Vec<f64> = bursts.iter().map(|b| b.len() as f64).collect();

    Some(BurstStats {
        total_bursts: bursts.len(),
        avg_burst_size: mean(&sizes),
        avg_packets_per_burst: mean(&counts),
        burst_size_stddev: if sizes.len() > 1 { stddev(&sizes) } else { 0.0 },
    })
}

/// Heuristic TLS-in-TLS detector over the first [`HANDSHAKE_WINDOW`] packets.
///
/// Plain HTTPS opens with a ~200-300 byte burst and one round trip; a
/// tunnelled TLS handshake shows larger (500-900 byte) packets spread over
/// several round trips.
pub fn detect_tls_in_tls(packets: &[PacketRecord]) -> Detection {
    if packets.len() < HANDSHAKE_WINDOW {
        return Detection {
            detected: false,
            confidence: 0.0,
            score: 0.0,
            reasons: vec!["Insufficient packets".to_string()],
            avg_handshake_size: 0.0,
        };
    }

    let window = &packets[..HANDSHAKE_WINDOW];
    let avg = window.iter().map(|p| p.size).sum::<usize>() as f64 / window.len() as f64;

    let mut score = 0.0;
    let mut reasons = Vec::new();

    if (500.0..=900.0).contains(&avg) {
        score += 0.3;
        reasons.push(format!("Large handshake burst: {:.0} bytes", avg));
    } else if (200.0..=350.0).contains(&avg) {
        reasons.push(format!("Normal handshake burst: {:.0} bytes (HTTPS-like)", avg));
    }

    if let Some(bursts) = burst_stats(window) {
        if bursts.total_bursts > 2 {
            score += 0.3;
            reasons.push(format!("Multiple RTT rounds: {} bursts", bursts.total_bursts));
        }
        if bursts.burst_size_stddev > 300.0 {
            score += 0.2;
            reasons.push(format!(
                "High variability: stddev={:.0}",
                bursts.burst_size_stddev
            ));
        }
    }

    Detection {
        detected: score >= 0.5,
        confidence: f64::min(score, 1.0),
        score,
        reasons,
        avg_handshake_size: avg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(points: &[(u64, usize)]) -> Vec<PacketRecord> {
        points
            .iter()
            .map(|&(ms, size)| PacketRecord::new(Duration::from_millis(ms), size))
            .collect()
    }

    #[test]
    fn test_size_stats() {
        let packets = trace(&[(0, 100), (1, 300), (2, 100), (3, 300), (4, 100)]);
        let stats = size_stats(&packets).unwrap();
        assert_eq!(stats.total_packets, 5);
        assert_eq!(stats.min_size, 100);
        assert_eq!(stats.max_size, 300);
        assert!((stats.avg_size - 180.0).abs() < 1e-9);
        // (100,300,100) and (300,100,300)
        assert_eq!(stats.unique_trigrams, 2);
        assert_eq!(
            stats.most_common_trigrams,
            vec![([100, 300, 100], 2), ([300, 100, 300], 1)]
        );
        assert!(size_stats(&[]).is_none());
    }

    #[test]
    fn test_most_common_trigrams_capped_and_ordered() {
        // nine distinct 3-grams, (1,1,1) seen three times
        let sizes = [9, 8, 7, 6, 5, 4, 3, 2, 1, 1, 1, 1, 1];
        let packets: Vec<PacketRecord> = sizes
            .iter()
            .map(|&s| PacketRecord::new(Duration::ZERO, s))
            .collect();
        let stats = size_stats(&packets).unwrap();
        assert_eq!(stats.unique_trigrams, 9);
        assert_eq!(stats.most_common_trigrams.len(), TOP_TRIGRAMS);
        assert_eq!(stats.most_common_trigrams[0], ([1, 1, 1], 3));
        assert_eq!(stats.most_common_trigrams[1], ([9, 8, 7], 1));
        assert_eq!(stats.most_common_trigrams[4], ([6, 5, 4], 1));
        assert!(size_stats(&packets[..2]).unwrap().most_common_trigrams.is_empty());
    }

    #[test]
    fn test_timing_stats() {
        let packets = trace(&[(0, 1), (10, 1), (30, 1)]);
        let stats = timing_stats(&packets).unwrap();
        assert!((stats.min_iat_ms - 10.0).abs() < 1e-9);
        assert!((stats.max_iat_ms - 20.0).abs() < 1e-9);
        assert!((stats.avg_iat_ms - 15.0).abs() < 1e-9);
        assert!((stats.iat_stddev_ms - 5.0).abs() < 1e-9);
        assert!(timing_stats(&packets[..1]).is_none());
    }

    #[test]
    fn test_burst_split_on_gap() {
        let packets = trace(&[(0, 100), (5, 100), (100, 200), (110, 200), (400, 150)]);
        let bursts = split_bursts(&packets);
        assert_eq!(bursts.len(), 3);
        assert_eq!(bursts[0].len(), 2);
        assert_eq!(bursts[2].len(), 1);

        let stats = burst_stats(&packets).unwrap();
        assert_eq!(stats.total_bursts, 3);
        assert!((stats.avg_burst_size - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_exact_gap_does_not_split() {
        let packets = trace(&[(0, 1), (50, 1)]);
        assert_eq!(split_bursts(&packets).len(), 1);
    }

    #[test]
    fn test_detects_tunnelled_handshake() {
        // 600-byte packets over four round trips with uneven bursts
        let packets = trace(&[
            (0, 600),
            (1, 600),
            (100, 600),
            (200, 600),
            (201, 600),
            (202, 600),
            (203, 600),
            (300, 600),
            (301, 600),
            (302, 600),
        ]);
        let detection = detect_tls_in_tls(&packets);
        assert!(detection.detected);
        // +0.3 size, +0.3 rounds, +0.2 variability
        assert!((detection.score - 0.8).abs() < 1e-9);
        assert!((detection.avg_handshake_size - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_https_like_handshake_passes() {
        let packets: Vec<PacketRecord> = (0..10)
            .map(|i| PacketRecord::new(Duration::from_millis(i * 2), 250))
            .collect();
        let detection = detect_tls_in_tls(&packets);
        assert!(!detection.detected);
        assert_eq!(detection.score, 0.0);
        assert!(detection.reasons[0].contains("HTTPS-like"));
    }

    #[test]
    fn test_too_few_packets() {
        let detection = detect_tls_in_tls(&trace(&[(0, 600)]));
        assert!(!detection.detected);
        assert_eq!(detection.reasons, vec!["Insufficient packets".to_string()]);
    }
}
