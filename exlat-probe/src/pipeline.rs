use std::sync::Arc;

use exlat_core::{
    Config, Connection, LatencyUpdate, NetworkLatencyData, Registry, ScoredServer,
    SeverityThresholds, SynthesisParams,
};
use rand::Rng;
use tracing::info;

use crate::aggregate::measure_regions;
use crate::cache::MeasurementCache;
use crate::clock::Clock;
use crate::prober::{ProbeSettings, Prober};
use crate::transport::Transport;

/// One full pass: measure every region in use, score the servers, and either
/// synthesize the connection graph or jitter the previous one.
pub struct Pipeline {
    registry: Registry,
    prober: Prober,
    clock: Arc<dyn Clock>,
    params: SynthesisParams,
    degraded_threshold_ms: u32,
    variance: f64,
    max_retries: u32,
}

impl Pipeline {
    pub fn from_config(
        cfg: &Config,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> exlat_core::Result<Self> {
        let registry = Registry::from_config(cfg)?;
        let cache = Arc::new(MeasurementCache::new(cfg.cache_ttl_ms, clock.clone()));
        let prober = Prober::new(transport, cache, ProbeSettings::from_config(cfg));
        Ok(Self {
            registry,
            prober,
            clock,
            params: cfg.synthesis_params(),
            degraded_threshold_ms: cfg.degraded_threshold_ms,
            variance: cfg.variance,
            max_retries: cfg.max_retries,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn prober(&self) -> &Prober {
        &self.prober
    }

    pub fn thresholds(&self) -> &SeverityThresholds {
        &self.params.thresholds
    }

    /// Measures every region referenced by an exchange (single attempt, cache
    /// honoured) and expands the exchanges into scored servers.
    pub async fn snapshot(&self) -> NetworkLatencyData {
        let regions = self.registry.regions_in_use();
        let measured = measure_regions(&self.prober, &self.registry, regions, 0).await;
        let servers = self
            .registry
            .score_servers(&measured.measurements, self.degraded_threshold_ms);
        let data = NetworkLatencyData::from_servers(servers, self.clock.now_ms());
        info!(
            regions = measured.measurements.len(),
            servers = data.summary.total_servers,
            online = data.summary.online_count,
            degraded = data.summary.degraded_count,
            offline = data.summary.offline_count,
            avg_ms = data.summary.average_latency,
            "snapshot ready"
        );
        data
    }

    pub fn synthesize(&self, servers: &[ScoredServer]) -> LatencyUpdate {
        let update = LatencyUpdate::synthesized(servers, &self.params, self.clock.now_ms());
        info!(
            connections = update.connections.len(),
            "connection graph synthesized"
        );
        update
    }

    pub fn refresh<R: Rng + ?Sized>(&self, previous: &[Connection], rng: &mut R) -> LatencyUpdate {
        LatencyUpdate::refreshed(
            previous,
            self.variance,
            &self.params.thresholds,
            rng,
            self.clock.now_ms(),
        )
    }

    /// Full cycle without probing: every deployment online, edges weighted
    /// from distance alone.
    pub fn simulate<R: Rng + ?Sized>(&self, rng: &mut R) -> (NetworkLatencyData, LatencyUpdate) {
        let now = self.clock.now_ms();
        let data = NetworkLatencyData::from_servers(self.registry.simulated_servers(), now);
        let update = LatencyUpdate::simulated(&data.servers, &self.params, rng, now);
        info!(
            servers = data.summary.total_servers,
            connections = update.connections.len(),
            "simulated graph built"
        );
        (data, update)
    }

    /// On-demand re-measure of a single exchange, with retries. Unknown
    /// exchanges yield no servers.
    pub async fn refresh_exchange(&self, name: &str) -> Vec<ScoredServer> {
        let Some(mapping) = self.registry.exchange(name) else {
            return Vec::new();
        };
        let regions = mapping.regions.iter().map(|r| r.region.as_str());
        let measured =
            measure_regions(&self.prober, &self.registry, regions, self.max_retries).await;
        self.registry
            .score_exchange(name, &measured.measurements, self.degraded_threshold_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::prober::tests::{Behavior, FakeTransport};
    use exlat_core::{OperationalState, Severity};
    use rand::rngs::mock::StepRng;
    use serde_json::json;

    fn config() -> Config {
        serde_json::from_value(json!({
            "endpoints": [
                { "regionId": "us-east-1", "address": "https://use1.test", "provider": "AWS",
                  "location": { "city": "Ashburn", "country": "US", "latitude": 39.04, "longitude": -77.49 } },
                { "regionId": "eu-central-1", "address": "https://euc1.test", "provider": "AWS",
                  "location": { "city": "Frankfurt", "country": "DE", "latitude": 50.11, "longitude": 8.68 } },
                { "regionId": "asia-northeast1", "address": "https://ane1.test", "provider": "GCP",
                  "location": { "city": "Tokyo", "country": "JP", "latitude": 35.68, "longitude": 139.69 } }
            ],
            "exchanges": [
                { "exchange": "Coinbase", "regions": [
                    { "region": "us-east-1", "provider": "AWS", "isPrimary": true },
                    { "region": "eu-central-1", "provider": "AWS" } ] },
                { "exchange": "Bybit", "regions": [
                    { "region": "asia-northeast1", "provider": "GCP", "isPrimary": true } ] }
            ],
            "maxRetries": 1
        }))
        .unwrap()
    }

    fn pipeline(transport: Arc<FakeTransport>, clock: Arc<ManualClock>) -> Pipeline {
        Pipeline::from_config(&config(), transport, clock).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_scores_every_deployment() {
        let transport = Arc::new(
            FakeTransport::new(Behavior::Respond { after_ms: 40 })
                .with("https://ane1.test", Behavior::Refuse { after_ms: 3 }),
        );
        let p = pipeline(transport.clone(), Arc::new(ManualClock::new(7_000)));

        let data = p.snapshot().await;
        assert_eq!(transport.calls(), 3);
        assert_eq!(data.timestamp_ms, 7_000);
        assert_eq!(data.summary.total_servers, 3);
        assert_eq!(data.summary.offline_count, 1);
        assert_eq!(data.summary.by_exchange["Coinbase"], 2);

        let bybit = data.servers_by_exchange("Bybit");
        assert_eq!(bybit.len(), 1);
        assert_eq!(bybit[0].operational_state, OperationalState::Offline);
        assert_eq!(bybit[0].server_id, "bybit-asia-northeast1-1");
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_within_ttl_reuses_cache() {
        let transport = Arc::new(FakeTransport::new(Behavior::Respond { after_ms: 10 }));
        let clock = Arc::new(ManualClock::new(0));
        let p = pipeline(transport.clone(), clock.clone());

        p.snapshot().await;
        clock.advance(5_000);
        p.snapshot().await;
        assert_eq!(transport.calls(), 3);
        clock.advance(25_000);
        p.snapshot().await;
        assert_eq!(transport.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn synthesize_then_refresh_keeps_edges() {
        let transport = Arc::new(FakeTransport::new(Behavior::Respond { after_ms: 20 }));
        let p = pipeline(transport, Arc::new(ManualClock::new(1)));

        let data = p.snapshot().await;
        let full = p.synthesize(&data.servers);
        // three servers, all within each other's nearest three
        assert_eq!(full.connections.len(), 3);
        assert!(full.connections.iter().all(|c| c.severity != Severity::Low));

        let mut rng = StepRng::new(u64::MAX / 2, 0);
        let next = p.refresh(&full.connections, &mut rng);
        let before: Vec<&str> = full.connections.iter().map(|c| c.id.as_str()).collect();
        let after: Vec<&str> = next.connections.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn simulate_never_touches_the_transport() {
        let transport = Arc::new(FakeTransport::new(Behavior::Hang));
        let p = pipeline(transport.clone(), Arc::new(ManualClock::new(42)));

        let (data, update) = p.simulate(&mut StepRng::new(0, 0));
        assert_eq!(transport.calls(), 0);
        assert_eq!(data.summary.total_servers, 3);
        assert_eq!(data.summary.online_count, 3);
        assert_eq!(update.connections.len(), 3);
        assert_eq!(update.timestamp_ms, 42);
        assert!(p.prober().cached_measurements().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_exchange_retries_and_ignores_unknown() {
        let transport = Arc::new(
            FakeTransport::new(Behavior::Respond { after_ms: 15 }).failing_first(1),
        );
        let p = pipeline(transport.clone(), Arc::new(ManualClock::new(0)));

        let servers = p.refresh_exchange("bybit").await;
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].operational_state, OperationalState::Online);
        assert_eq!(transport.calls(), 2);

        assert!(p.refresh_exchange("Nowhere").await.is_empty());
        assert_eq!(transport.calls(), 2);
    }
}
