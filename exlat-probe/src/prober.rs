use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use exlat_core::{Config, Endpoint, Measurement, ProbeOutcome};
use tokio::time::Instant;
use tracing::debug;

use crate::cache::MeasurementCache;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub timeout: Duration,
    pub retry_base_delay: Duration,
}

impl ProbeSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            timeout: Duration::from_millis(cfg.probe_timeout_ms),
            retry_base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
        }
    }
}

/// Measures round trips to single endpoints. Never fails: timeouts and
/// transport errors come back as the measurement's outcome.
pub struct Prober {
    transport: Arc<dyn Transport>,
    cache: Arc<MeasurementCache>,
    settings: ProbeSettings,
}

impl Prober {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<MeasurementCache>,
        settings: ProbeSettings,
    ) -> Self {
        Self {
            transport,
            cache,
            settings,
        }
    }

    pub fn cache(&self) -> &MeasurementCache {
        &self.cache
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Fresh cache entry if there is one, otherwise a network probe.
    pub async fn measure(&self, endpoint: &Endpoint) -> Measurement {
        if let Some(cached) = self.cache.get_fresh(&endpoint.region_id) {
            debug!(region = %endpoint.region_id, "cache hit");
            return cached;
        }
        self.probe(endpoint).await
    }

    /// Always goes to the network and overwrites the cache entry.
    pub async fn probe(&self, endpoint: &Endpoint) -> Measurement {
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.settings.timeout,
            self.transport.round_trip(&endpoint.address),
        )
        .await;
        let latency_ms = round_ms(started.elapsed());

        let (outcome, error_detail) = match result {
            Ok(Ok(())) => (ProbeOutcome::Success, None),
            Ok(Err(err)) => (ProbeOutcome::Failed, Some(err.to_string())),
            Err(_) => (
                ProbeOutcome::TimedOut,
                Some(format!(
                    "no response within {}ms",
                    self.settings.timeout.as_millis()
                )),
            ),
        };

        let m = Measurement {
            region_id: endpoint.region_id.clone(),
            address: endpoint.address.clone(),
            latency_ms,
            measured_at_ms: self.cache.clock().now_ms(),
            outcome,
            error_detail,
        };
        debug!(
            region = %m.region_id,
            latency_ms = m.latency_ms,
            outcome = ?m.outcome,
            "probe finished"
        );
        self.cache.insert(m.clone());
        m
    }

    /// Retries non-success outcomes up to `max_retries` extra times, sleeping
    /// `base, 2*base, 4*base, ...` in between. The first attempt may be served
    /// from cache; retries always probe, otherwise they would just read back the
    /// cached failure.
    pub async fn measure_with_retry(&self, endpoint: &Endpoint, max_retries: u32) -> Measurement {
        let mut last = self.measure(endpoint).await;
        for attempt in 0..max_retries {
            if last.is_success() {
                break;
            }
            let delay = self
                .settings
                .retry_base_delay
                .saturating_mul(2u32.saturating_pow(attempt));
            debug!(
                region = %endpoint.region_id,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "retrying probe"
            );
            tokio::time::sleep(delay).await;
            last = self.probe(endpoint).await;
        }
        last
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_measurements(&self) -> HashMap<String, Measurement> {
        self.cache.snapshot()
    }
}

fn round_ms(d: Duration) -> u32 {
    (d.as_secs_f64() * 1000.0).round() as u32
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use exlat_core::{Location, Provider};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    pub(crate) enum Behavior {
        Respond { after_ms: u64 },
        Refuse { after_ms: u64 },
        Hang,
    }

    /// Fake transport: fixed behavior per address, optional number of initial
    /// failures, counts every call.
    pub(crate) struct FakeTransport {
        pub calls: AtomicUsize,
        behaviors: HashMap<String, Behavior>,
        default: Behavior,
        fail_first: usize,
    }

    impl FakeTransport {
        pub fn new(default: Behavior) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                behaviors: HashMap::new(),
                default,
                fail_first: 0,
            }
        }

        pub fn with(mut self, address: &str, behavior: Behavior) -> Self {
            self.behaviors.insert(address.to_string(), behavior);
            self
        }

        pub fn failing_first(mut self, n: usize) -> Self {
            self.fail_first = n;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn round_trip(&self, address: &str) -> Result<(), TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(TransportError::Other("connection reset".to_string()));
            }
            match self.behaviors.get(address).copied().unwrap_or(self.default) {
                Behavior::Respond { after_ms } => {
                    tokio::time::sleep(Duration::from_millis(after_ms)).await;
                    Ok(())
                }
                Behavior::Refuse { after_ms } => {
                    tokio::time::sleep(Duration::from_millis(after_ms)).await;
                    Err(TransportError::Other("connection refused".to_string()))
                }
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        }
    }

    pub(crate) fn endpoint(region: &str) -> Endpoint {
        Endpoint {
            region_id: region.to_string(),
            address: format!("https://{}.example.test", region),
            provider: Provider::Aws,
            location: Location {
                city: region.to_string(),
                country: "Nowhere".to_string(),
                latitude: 0.0,
                longitude: 0.0,
            },
        }
    }

    pub(crate) fn prober(transport: Arc<FakeTransport>, clock: Arc<ManualClock>) -> Prober {
        Prober::new(
            transport,
            Arc::new(MeasurementCache::new(30_000, clock)),
            ProbeSettings {
                timeout: Duration::from_millis(10_000),
                retry_base_delay: Duration::from_millis(1_000),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn success_reports_elapsed() {
        let transport = Arc::new(FakeTransport::new(Behavior::Respond { after_ms: 120 }));
        let p = prober(transport.clone(), Arc::new(ManualClock::new(5)));

        let m = p.measure(&endpoint("us-east-1")).await;
        assert_eq!(m.outcome, ProbeOutcome::Success);
        assert!((120..=121).contains(&m.latency_ms), "{}", m.latency_ms);
        assert_eq!(m.measured_at_ms, 5);
        assert!(m.error_detail.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_still_reports_elapsed() {
        let transport = Arc::new(FakeTransport::new(Behavior::Refuse { after_ms: 40 }));
        let p = prober(transport.clone(), Arc::new(ManualClock::new(0)));

        let m = p.measure(&endpoint("eu-west-1")).await;
        assert_eq!(m.outcome, ProbeOutcome::Failed);
        assert!((40..=41).contains(&m.latency_ms), "{}", m.latency_ms);
        assert_eq!(m.error_detail.as_deref(), Some("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn hang_times_out_at_budget() {
        let transport = Arc::new(FakeTransport::new(Behavior::Hang));
        let p = prober(transport.clone(), Arc::new(ManualClock::new(0)));

        let started = Instant::now();
        let m = p.measure(&endpoint("ap-south-1")).await;
        assert_eq!(m.outcome, ProbeOutcome::TimedOut);
        assert!((10_000..=10_001).contains(&m.latency_ms), "{}", m.latency_ms);
        assert!(started.elapsed() <= Duration::from_millis(10_002));
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_within_ttl_is_cached() {
        let transport = Arc::new(FakeTransport::new(Behavior::Respond { after_ms: 30 }));
        let clock = Arc::new(ManualClock::new(0));
        let p = prober(transport.clone(), clock.clone());
        let ep = endpoint("us-west-2");

        let first = p.measure(&ep).await;
        clock.advance(29_999);
        let second = p.measure(&ep).await;
        assert_eq!(first, second);
        assert_eq!(transport.calls(), 1);

        clock.advance(1);
        let third = p.measure(&ep).await;
        assert_eq!(transport.calls(), 2);
        assert_eq!(third.measured_at_ms, 30_000);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_cached_too() {
        let transport = Arc::new(FakeTransport::new(Behavior::Refuse { after_ms: 1 }));
        let p = prober(transport.clone(), Arc::new(ManualClock::new(0)));
        let ep = endpoint("me-south-1");

        p.measure(&ep).await;
        let again = p.measure(&ep).await;
        assert_eq!(again.outcome, ProbeOutcome::Failed);
        assert_eq!(transport.calls(), 1);

        p.clear_cache();
        assert!(p.cached_measurements().is_empty());
        p.measure(&ep).await;
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backs_off_and_recovers() {
        let transport = Arc::new(
            FakeTransport::new(Behavior::Respond { after_ms: 10 }).failing_first(2),
        );
        let p = prober(transport.clone(), Arc::new(ManualClock::new(0)));

        let started = Instant::now();
        let m = p.measure_with_retry(&endpoint("sa-east-1"), 2).await;
        assert_eq!(m.outcome, ProbeOutcome::Success);
        assert_eq!(transport.calls(), 3);
        // 1s + 2s of backoff plus the final 10ms round trip
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3_010), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(3_020), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_with_last_failure() {
        let transport = Arc::new(FakeTransport::new(Behavior::Refuse { after_ms: 5 }));
        let p = prober(transport.clone(), Arc::new(ManualClock::new(0)));

        let m = p.measure_with_retry(&endpoint("af-south-1"), 2).await;
        assert_eq!(m.outcome, ProbeOutcome::Failed);
        assert_eq!(transport.calls(), 3);

        let zero = p.measure_with_retry(&endpoint("eu-north-1"), 0).await;
        assert_eq!(zero.outcome, ProbeOutcome::Failed);
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_skips_when_first_attempt_succeeds() {
        let transport = Arc::new(FakeTransport::new(Behavior::Respond { after_ms: 5 }));
        let p = prober(transport.clone(), Arc::new(ManualClock::new(0)));

        let m = p.measure_with_retry(&endpoint("ca-central-1"), 3).await;
        assert!(m.is_success());
        assert_eq!(transport.calls(), 1);
    }
}
