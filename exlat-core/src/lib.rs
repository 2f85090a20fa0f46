pub mod constants;
pub mod graph;
pub mod registry;
pub mod snapshot;
pub mod stats;

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use constants::*;

pub use graph::{
    distance_latency_ms, filter_by_severity, haversine_km, refresh, simulate, synthesize, Connection,
    DistanceModel, Severity, SeverityThresholds, SynthesisParams,
};
pub use registry::{
    ExchangeRegion, ExchangeRegions, NetworkLatencyData, NetworkSummary, OperationalState,
    ProviderCounts, Registry, ScoredServer,
};
pub use snapshot::{CycleKind, SnapshotRecord};
pub use stats::{reduce, LatencyStats, LatencyUpdate};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config io: {0}")]
    Io(#[from] io::Error),
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "AWS")]
    Aws,
    #[serde(rename = "GCP")]
    Gcp,
    Azure,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Aws => write!(f, "AWS"),
            Provider::Gcp => write!(f, "GCP"),
            Provider::Azure => write!(f, "Azure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub city: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// `[longitude, latitude]`, the order connections carry their coordinates in.
    pub fn lon_lat(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub region_id: String,
    pub address: String,
    pub provider: Provider,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProbeOutcome {
    Success,
    Failed,
    TimedOut,
}

/// One probe attempt against an endpoint. Later measurements for the same
/// region supersede earlier ones; nothing mutates a measurement in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub region_id: String,
    pub address: String,
    pub latency_ms: u32,
    pub measured_at_ms: i64,
    pub outcome: ProbeOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl Measurement {
    pub fn is_success(&self) -> bool {
        self.outcome == ProbeOutcome::Success
    }
}

/// Rounded mean latency over the successful measurements, 0 when there are none.
pub fn average_success_latency(measurements: &[Measurement]) -> u32 {
    let ok: Vec<u32> = measurements
        .iter()
        .filter(|m| m.is_success())
        .map(|m| m.latency_ms)
        .collect();
    if ok.is_empty() {
        return 0;
    }
    let sum: u64 = ok.iter().map(|&v| v as u64).sum();
    (sum as f64 / ok.len() as f64).round() as u32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub endpoints: Vec<Endpoint>,
    pub exchanges: Vec<ExchangeRegions>,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_neighbors_per_server")]
    pub neighbors_per_server: usize,
    #[serde(default = "default_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,
    #[serde(default)]
    pub full_refresh_every: Option<u32>,
    #[serde(default)]
    pub severity: SeverityThresholds,
    #[serde(default = "default_degraded_threshold_ms")]
    pub degraded_threshold_ms: u32,
    #[serde(default = "default_variance")]
    pub variance: f64,
    #[serde(default)]
    pub distance_model: DistanceModel,
    #[serde(default = "default_output_path")]
    pub output_path: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path)?;
        let cfg: Config = serde_json::from_slice(&data)?;
        Ok(cfg)
    }

    /// Collects every problem with the static configuration so a bad file is
    /// reported once, at startup, instead of surfacing per probe.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.endpoints.is_empty() {
            problems.push("endpoints must not be empty".to_string());
        }
        let mut regions = HashSet::new();
        for ep in &self.endpoints {
            if ep.region_id.trim().is_empty() {
                problems.push("endpoint with empty regionId".to_string());
            }
            if !regions.insert(ep.region_id.as_str()) {
                problems.push(format!("duplicate endpoint region {}", ep.region_id));
            }
            if ep.address.trim().is_empty() {
                problems.push(format!("endpoint {} has empty address", ep.region_id));
            }
            let (lat, lon) = (ep.location.latitude, ep.location.longitude);
            if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
                problems.push(format!("endpoint {} has invalid coordinates", ep.region_id));
            }
        }

        let mut names = HashSet::new();
        for ex in &self.exchanges {
            if !names.insert(ex.exchange.to_lowercase()) {
                problems.push(format!("duplicate exchange {}", ex.exchange));
            }
            for r in &ex.regions {
                if !regions.contains(r.region.as_str()) {
                    problems.push(format!(
                        "exchange {} references unknown region {}",
                        ex.exchange, r.region
                    ));
                }
            }
        }

        if self.cache_ttl_ms == 0 || self.probe_timeout_ms == 0 {
            problems.push("cacheTtlMs and probeTimeoutMs must be > 0".to_string());
        }
        if !REFRESH_INTERVAL_CHOICES_SECS.contains(&self.refresh_interval_seconds) {
            problems.push(format!(
                "refreshIntervalSeconds must be one of {:?}",
                REFRESH_INTERVAL_CHOICES_SECS
            ));
        }
        if self.full_refresh_every == Some(0) {
            problems.push("fullRefreshEvery must be > 0 when set".to_string());
        }
        if self.severity.low_max_ms > self.severity.medium_max_ms {
            problems.push("severity.lowMaxMs must not exceed severity.mediumMaxMs".to_string());
        }
        if !(self.variance > 0.0 && self.variance <= MAX_VARIANCE) {
            problems.push(format!("variance must be in (0, {}]", MAX_VARIANCE));
        }
        let dm = &self.distance_model;
        if !(dm.ms_per_km.is_finite() && dm.ms_per_km >= 0.0)
            || !(dm.base_ms.is_finite() && dm.base_ms >= 0.0)
            || !(dm.overhead_factor.is_finite() && dm.overhead_factor >= 0.0)
        {
            problems.push("distanceModel values must be finite and non-negative".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfig(problems))
        }
    }

    pub fn synthesis_params(&self) -> SynthesisParams {
        SynthesisParams {
            max_connections: self.max_connections,
            neighbors: self.neighbors_per_server,
            distance: self.distance_model.clone(),
            thresholds: self.severity.clone(),
        }
    }
}

pub fn now_unix_ms() -> i64 {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (dur.as_secs() as i64) * 1000 + (dur.subsec_millis() as i64)
}

fn default_cache_ttl_ms() -> u64 {
    DEFAULT_CACHE_TTL_MS
}

fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_neighbors_per_server() -> usize {
    DEFAULT_NEIGHBORS_PER_SERVER
}

fn default_refresh_interval_seconds() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

fn default_degraded_threshold_ms() -> u32 {
    DEFAULT_DEGRADED_THRESHOLD_MS
}

fn default_variance() -> f64 {
    DEFAULT_VARIANCE
}

fn default_output_path() -> String {
    DEFAULT_OUTPUT_PATH.to_string()
}
