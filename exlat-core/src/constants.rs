pub const DEFAULT_CACHE_TTL_MS: u64 = 30_000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;

pub const DEFAULT_MAX_CONNECTIONS: usize = 50;
pub const DEFAULT_NEIGHBORS_PER_SERVER: usize = 3;

pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 5;
pub const REFRESH_INTERVAL_CHOICES_SECS: [u64; 4] = [5, 10, 15, 30];

pub const DEFAULT_LOW_MAX_MS: u32 = 50;
pub const DEFAULT_MEDIUM_MAX_MS: u32 = 150;
pub const DEFAULT_DEGRADED_THRESHOLD_MS: u32 = 500;

/// Jitter applied by variance refresh, as a fraction of the previous latency.
pub const DEFAULT_VARIANCE: f64 = 0.15;
pub const MAX_VARIANCE: f64 = 0.20;
/// Spread around the distance latency in simulated mode.
pub const SIMULATED_VARIANCE: f64 = 0.30;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const DEFAULT_MS_PER_KM: f64 = 0.02;
pub const DEFAULT_BASE_MS: f64 = 5.0;
pub const DEFAULT_OVERHEAD_FACTOR: f64 = 0.3;

pub const DEFAULT_OUTPUT_PATH: &str = "~/.exlat/snapshots.jsonl";
