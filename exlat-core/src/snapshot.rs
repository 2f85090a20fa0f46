use serde::{Deserialize, Serialize};

use crate::graph::Connection;
use crate::registry::{NetworkLatencyData, NetworkSummary};
use crate::stats::{LatencyStats, LatencyUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleKind {
    /// Fresh measurements and a rebuilt graph.
    Full,
    /// Previous graph with jittered weights.
    Refresh,
}

/// One line of the snapshot log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub cycle: u64,
    pub kind: CycleKind,
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<NetworkSummary>,
    pub stats: LatencyStats,
    pub connections: Vec<Connection>,
}

impl SnapshotRecord {
    pub fn full(cycle: u64, data: &NetworkLatencyData, update: &LatencyUpdate) -> Self {
        Self {
            cycle,
            kind: CycleKind::Full,
            timestamp_ms: update.timestamp_ms,
            summary: Some(data.summary.clone()),
            stats: update.stats,
            connections: update.connections.clone(),
        }
    }

    pub fn refresh(cycle: u64, update: &LatencyUpdate) -> Self {
        Self {
            cycle,
            kind: CycleKind::Refresh,
            timestamp_ms: update.timestamp_ms,
            summary: None,
            stats: update.stats,
            connections: update.connections.clone(),
        }
    }
}
