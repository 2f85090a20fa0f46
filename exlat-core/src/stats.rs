use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::graph::{refresh, simulate, synthesize, Connection, SeverityThresholds, SynthesisParams};
use crate::ScoredServer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min: u32,
    pub max: u32,
    pub avg: u32,
    pub median: u32,
}

impl LatencyStats {
    /// Median is the element at `len / 2` of the sorted values, i.e. the upper
    /// of the two middle elements on even-length input.
    pub fn from_latencies(latencies: &[u32]) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }
        let mut s = latencies.to_vec();
        s.sort_unstable();
        let sum: u64 = s.iter().map(|&v| v as u64).sum();
        Self {
            min: s[0],
            max: s[s.len() - 1],
            avg: (sum as f64 / s.len() as f64).round() as u32,
            median: s[s.len() / 2],
        }
    }
}

pub fn reduce(connections: &[Connection]) -> LatencyStats {
    let latencies: Vec<u32> = connections.iter().map(|c| c.latency_ms).collect();
    LatencyStats::from_latencies(&latencies)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyUpdate {
    pub connections: Vec<Connection>,
    pub stats: LatencyStats,
    pub timestamp_ms: i64,
}

impl LatencyUpdate {
    pub fn new(connections: Vec<Connection>, timestamp_ms: i64) -> Self {
        let stats = reduce(&connections);
        Self {
            connections,
            stats,
            timestamp_ms,
        }
    }

    /// Cold start: build the graph from scratch.
    pub fn synthesized(servers: &[ScoredServer], params: &SynthesisParams, timestamp_ms: i64) -> Self {
        Self::new(synthesize(servers, params, timestamp_ms), timestamp_ms)
    }

    /// Graph built from distance alone, no measurements involved.
    pub fn simulated<R: Rng + ?Sized>(
        servers: &[ScoredServer],
        params: &SynthesisParams,
        rng: &mut R,
        timestamp_ms: i64,
    ) -> Self {
        Self::new(simulate(servers, params, rng, timestamp_ms), timestamp_ms)
    }

    /// Steady state: jitter the previous weights, keep the edges.
    pub fn refreshed<R: Rng + ?Sized>(
        previous: &[Connection],
        variance: f64,
        thresholds: &SeverityThresholds,
        rng: &mut R,
        timestamp_ms: i64,
    ) -> Self {
        Self::new(
            refresh(previous, variance, thresholds, rng, timestamp_ms),
            timestamp_ms,
        )
    }
}
