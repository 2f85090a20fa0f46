//! Connection synthesis: a sparse nearest-neighbour graph over scored
//! servers, with a latency estimate and severity bucket per edge.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::{Location, OperationalState, ScoredServer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(format!("unknown severity {}", other)),
        }
    }
}

/// Upper bounds (inclusive) of the low and medium buckets. Anything above
/// `medium_max_ms` is high; `low_max_ms <= medium_max_ms` keeps the buckets
/// monotonic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityThresholds {
    pub low_max_ms: u32,
    pub medium_max_ms: u32,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            low_max_ms: DEFAULT_LOW_MAX_MS,
            medium_max_ms: DEFAULT_MEDIUM_MAX_MS,
        }
    }
}

impl SeverityThresholds {
    pub fn classify(&self, latency_ms: u32) -> Severity {
        if latency_ms <= self.low_max_ms {
            Severity::Low
        } else if latency_ms <= self.medium_max_ms {
            Severity::Medium
        } else {
            Severity::High
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistanceModel {
    pub ms_per_km: f64,
    pub base_ms: f64,
    /// Share of the distance latency added on top of the mean measured latency.
    pub overhead_factor: f64,
}

impl Default for DistanceModel {
    fn default() -> Self {
        Self {
            ms_per_km: DEFAULT_MS_PER_KM,
            base_ms: DEFAULT_BASE_MS,
            overhead_factor: DEFAULT_OVERHEAD_FACTOR,
        }
    }
}

impl DistanceModel {
    pub fn distance_latency_ms(&self, a: &Location, b: &Location) -> u32 {
        let km = haversine_km(a.latitude, a.longitude, b.latitude, b.longitude);
        (km * self.ms_per_km + self.base_ms).round() as u32
    }

    /// Mean of the two measured latencies plus a distance overhead; the pure
    /// distance latency when either side has no measurement.
    pub fn blend(&self, source_ms: u32, target_ms: u32, distance_ms: u32) -> u32 {
        if source_ms == 0 || target_ms == 0 {
            return distance_ms;
        }
        let avg = (source_ms as f64 + target_ms as f64) / 2.0;
        (avg + distance_ms as f64 * self.overhead_factor).round() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisParams {
    pub max_connections: usize,
    pub neighbors: usize,
    pub distance: DistanceModel,
    pub thresholds: SeverityThresholds,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            neighbors: DEFAULT_NEIGHBORS_PER_SERVER,
            distance: DistanceModel::default(),
            thresholds: SeverityThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub source_server_id: String,
    pub target_server_id: String,
    /// `[longitude, latitude]`
    pub source_coordinates: [f64; 2],
    /// `[longitude, latitude]`
    pub target_coordinates: [f64; 2],
    pub latency_ms: u32,
    pub severity: Severity,
    pub computed_at_ms: i64,
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let r = EARTH_RADIUS_KM;
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    r * c
}

/// Distance-derived latency with the default model.
pub fn distance_latency_ms(a: &Location, b: &Location) -> u32 {
    DistanceModel::default().distance_latency_ms(a, b)
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Builds the connection graph. Offline servers are never endpoints; each
/// server proposes edges to its `neighbors` nearest peers (by distance
/// latency, ties in input order); an unordered pair is emitted once; the
/// output stops at `max_connections`.
pub fn synthesize(
    servers: &[ScoredServer],
    params: &SynthesisParams,
    computed_at_ms: i64,
) -> Vec<Connection> {
    let eligible: Vec<&ScoredServer> = servers.iter().filter(|s| !s.is_offline()).collect();
    let mut out: Vec<Connection> = Vec::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    'sources: for (i, source) in eligible.iter().enumerate() {
        if out.len() >= params.max_connections {
            break;
        }

        let mut candidates: Vec<(usize, u32)> = eligible
            .iter()
            .enumerate()
            .filter(|(j, t)| *j != i && t.server_id != source.server_id)
            .map(|(j, t)| (j, params.distance.distance_latency_ms(&source.location, &t.location)))
            .collect();
        candidates.sort_by_key(|&(_, d)| d);

        for &(j, distance_ms) in candidates.iter().take(params.neighbors) {
            if out.len() >= params.max_connections {
                break 'sources;
            }
            let target = eligible[j];
            if !seen.insert(pair_key(&source.server_id, &target.server_id)) {
                continue;
            }
            let latency_ms = params
                .distance
                .blend(source.latency_ms, target.latency_ms, distance_ms);
            out.push(Connection {
                id: format!("{}-{}", source.server_id, target.server_id),
                source_server_id: source.server_id.clone(),
                target_server_id: target.server_id.clone(),
                source_coordinates: source.location.lon_lat(),
                target_coordinates: target.location.lon_lat(),
                latency_ms,
                severity: params.thresholds.classify(latency_ms),
                computed_at_ms,
            });
        }
    }

    out
}

/// Resamples every edge weight uniformly within `±variance` of its previous
/// value. Ids, endpoints and order are untouched.
pub fn refresh<R: Rng + ?Sized>(
    connections: &[Connection],
    variance: f64,
    thresholds: &SeverityThresholds,
    rng: &mut R,
    computed_at_ms: i64,
) -> Vec<Connection> {
    jitter(
        connections,
        variance.clamp(0.0, MAX_VARIANCE),
        thresholds,
        rng,
        computed_at_ms,
    )
}

/// Offline stand-in for a measured graph: online servers only, each edge
/// weighted by its distance latency within `±SIMULATED_VARIANCE`.
pub fn simulate<R: Rng + ?Sized>(
    servers: &[ScoredServer],
    params: &SynthesisParams,
    rng: &mut R,
    computed_at_ms: i64,
) -> Vec<Connection> {
    let online: Vec<ScoredServer> = servers
        .iter()
        .filter(|s| s.operational_state == OperationalState::Online)
        .map(|s| ScoredServer {
            latency_ms: 0,
            ..s.clone()
        })
        .collect();
    let edges = synthesize(&online, params, computed_at_ms);
    jitter(
        &edges,
        SIMULATED_VARIANCE,
        &params.thresholds,
        rng,
        computed_at_ms,
    )
}

fn jitter<R: Rng + ?Sized>(
    connections: &[Connection],
    variance: f64,
    thresholds: &SeverityThresholds,
    rng: &mut R,
    computed_at_ms: i64,
) -> Vec<Connection> {
    connections
        .iter()
        .map(|c| {
            let base = c.latency_ms as f64;
            let min = base * (1.0 - variance);
            let max = base * (1.0 + variance);
            let sample: f64 = rng.gen();
            let latency_ms = (min + sample * (max - min)).round() as u32;
            Connection {
                latency_ms,
                severity: thresholds.classify(latency_ms),
                computed_at_ms,
                ..c.clone()
            }
        })
        .collect()
}

pub fn filter_by_severity(connections: &[Connection], severities: &[Severity]) -> Vec<Connection> {
    connections
        .iter()
        .filter(|c| severities.contains(&c.severity))
        .cloned()
        .collect()
}
