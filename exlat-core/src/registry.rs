//! Static endpoint registry and the exchange→region mapping, plus the
//! derivation of scored servers from a round of measurements.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Config, Endpoint, Location, Measurement, ProbeOutcome, Provider, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRegion {
    pub region: String,
    pub provider: Provider,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRegions {
    pub exchange: String,
    pub regions: Vec<ExchangeRegion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationalState {
    Online,
    Degraded,
    Offline,
}

impl OperationalState {
    pub fn from_measurement(m: &Measurement, degraded_threshold_ms: u32) -> Self {
        match m.outcome {
            ProbeOutcome::Failed | ProbeOutcome::TimedOut => OperationalState::Offline,
            ProbeOutcome::Success if m.latency_ms > degraded_threshold_ms => {
                OperationalState::Degraded
            }
            ProbeOutcome::Success => OperationalState::Online,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredServer {
    pub server_id: String,
    pub exchange_name: String,
    pub location: Location,
    pub provider: Provider,
    pub region: String,
    pub latency_ms: u32,
    pub operational_state: OperationalState,
}

impl ScoredServer {
    pub fn is_offline(&self) -> bool {
        self.operational_state == OperationalState::Offline
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCounts {
    #[serde(rename = "AWS")]
    pub aws: usize,
    #[serde(rename = "GCP")]
    pub gcp: usize,
    #[serde(rename = "Azure")]
    pub azure: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSummary {
    pub total_servers: usize,
    pub average_latency: u32,
    pub by_provider: ProviderCounts,
    pub online_count: usize,
    pub degraded_count: usize,
    pub offline_count: usize,
    pub by_exchange: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkLatencyData {
    pub timestamp_ms: i64,
    pub servers: Vec<ScoredServer>,
    pub summary: NetworkSummary,
}

impl NetworkLatencyData {
    pub fn from_servers(servers: Vec<ScoredServer>, timestamp_ms: i64) -> Self {
        let mut summary = NetworkSummary {
            total_servers: servers.len(),
            ..Default::default()
        };
        let mut active_sum: u64 = 0;
        let mut active = 0usize;
        for s in &servers {
            match s.operational_state {
                OperationalState::Online => summary.online_count += 1,
                OperationalState::Degraded => summary.degraded_count += 1,
                OperationalState::Offline => summary.offline_count += 1,
            }
            if !s.is_offline() {
                active_sum += s.latency_ms as u64;
                active += 1;
            }
            match s.provider {
                Provider::Aws => summary.by_provider.aws += 1,
                Provider::Gcp => summary.by_provider.gcp += 1,
                Provider::Azure => summary.by_provider.azure += 1,
            }
            *summary.by_exchange.entry(s.exchange_name.clone()).or_insert(0) += 1;
        }
        if active > 0 {
            summary.average_latency = (active_sum as f64 / active as f64).round() as u32;
        }
        Self {
            timestamp_ms,
            servers,
            summary,
        }
    }

    pub fn servers_by_provider(&self, provider: Provider) -> Vec<&ScoredServer> {
        self.servers.iter().filter(|s| s.provider == provider).collect()
    }

    pub fn servers_by_exchange(&self, exchange: &str) -> Vec<&ScoredServer> {
        self.servers
            .iter()
            .filter(|s| s.exchange_name == exchange)
            .collect()
    }
}

/// Read-only view over the configured endpoints and exchange deployments.
#[derive(Debug, Clone)]
pub struct Registry {
    endpoints: Vec<Endpoint>,
    by_region: HashMap<String, usize>,
    exchanges: Vec<ExchangeRegions>,
}

impl Registry {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::new(cfg.endpoints.clone(), cfg.exchanges.clone()))
    }

    /// Builds without validation; a region referenced by an exchange but absent
    /// from `endpoints` is skipped (and logged) during server expansion.
    pub fn new(endpoints: Vec<Endpoint>, exchanges: Vec<ExchangeRegions>) -> Self {
        let mut by_region = HashMap::new();
        for (i, ep) in endpoints.iter().enumerate() {
            by_region.entry(ep.region_id.clone()).or_insert(i);
        }
        Self {
            endpoints,
            by_region,
            exchanges,
        }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn exchanges(&self) -> &[ExchangeRegions] {
        &self.exchanges
    }

    pub fn endpoint(&self, region: &str) -> Option<&Endpoint> {
        self.by_region.get(region).map(|&i| &self.endpoints[i])
    }

    pub fn endpoints_by_provider(&self, provider: Provider) -> Vec<&Endpoint> {
        self.endpoints
            .iter()
            .filter(|e| e.provider == provider)
            .collect()
    }

    pub fn exchange(&self, name: &str) -> Option<&ExchangeRegions> {
        self.exchanges
            .iter()
            .find(|m| m.exchange.eq_ignore_ascii_case(name))
    }

    pub fn primary_region(&self, name: &str) -> Option<&ExchangeRegion> {
        self.exchange(name)?.regions.iter().find(|r| r.is_primary)
    }

    pub fn exchange_names(&self) -> Vec<&str> {
        self.exchanges.iter().map(|m| m.exchange.as_str()).collect()
    }

    /// Distinct regions referenced by any exchange, in first-seen order.
    pub fn regions_in_use(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for m in &self.exchanges {
            for r in &m.regions {
                if seen.insert(r.region.as_str()) {
                    out.push(r.region.as_str());
                }
            }
        }
        out
    }

    /// Resolves region ids to endpoints. Unknown ids come back in the second
    /// list instead of failing the whole lookup.
    pub fn resolve<'a, I>(&self, regions: I) -> (Vec<Endpoint>, Vec<String>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for region in regions {
            match self.endpoint(region) {
                Some(ep) => found.push(ep.clone()),
                None => missing.push(region.to_string()),
            }
        }
        (found, missing)
    }

    /// Expands every exchange deployment into a scored server.
    pub fn score_servers(
        &self,
        measurements: &HashMap<String, Measurement>,
        degraded_threshold_ms: u32,
    ) -> Vec<ScoredServer> {
        let mut out = Vec::new();
        for mapping in &self.exchanges {
            self.score_exchange_into(mapping, measurements, degraded_threshold_ms, &mut out);
        }
        out
    }

    pub fn score_exchange(
        &self,
        name: &str,
        measurements: &HashMap<String, Measurement>,
        degraded_threshold_ms: u32,
    ) -> Vec<ScoredServer> {
        let mut out = Vec::new();
        if let Some(mapping) = self.exchange(name) {
            self.score_exchange_into(mapping, measurements, degraded_threshold_ms, &mut out);
        }
        out
    }

    /// Every deployment as an online server with no measured latency, for
    /// building a graph without touching the network.
    pub fn simulated_servers(&self) -> Vec<ScoredServer> {
        let measurements: HashMap<String, Measurement> = self
            .regions_in_use()
            .into_iter()
            .filter_map(|region| self.endpoint(region))
            .map(|ep| {
                (
                    ep.region_id.clone(),
                    Measurement {
                        region_id: ep.region_id.clone(),
                        address: ep.address.clone(),
                        latency_ms: 0,
                        measured_at_ms: 0,
                        outcome: ProbeOutcome::Success,
                        error_detail: None,
                    },
                )
            })
            .collect();
        self.score_servers(&measurements, u32::MAX)
    }

    fn score_exchange_into(
        &self,
        mapping: &ExchangeRegions,
        measurements: &HashMap<String, Measurement>,
        degraded_threshold_ms: u32,
        out: &mut Vec<ScoredServer>,
    ) {
        for (index, info) in mapping.regions.iter().enumerate() {
            let Some(endpoint) = self.endpoint(&info.region) else {
                warn!(exchange = %mapping.exchange, region = %info.region, "region unavailable in registry");
                continue;
            };
            let Some(m) = measurements.get(&info.region) else {
                continue;
            };
            out.push(ScoredServer {
                server_id: format!(
                    "{}-{}-{}",
                    mapping.exchange.to_lowercase(),
                    info.region,
                    index + 1
                ),
                exchange_name: mapping.exchange.clone(),
                location: endpoint.location.clone(),
                provider: info.provider,
                region: info.region.clone(),
                latency_ms: m.latency_ms,
                operational_state: OperationalState::from_measurement(m, degraded_threshold_ms),
            });
        }
    }
}
