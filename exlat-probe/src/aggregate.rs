//! Fan-out / fan-in over the prober.
//!
//! All probes of one call are polled together on the calling task with
//! `join_all`, so nothing runs in parallel and nothing is spawned. Each probe
//! carries its own timeout; a slow or failing endpoint only delays the join,
//! it never cancels or fails its siblings.

use std::collections::{HashMap, HashSet};

use exlat_core::{Endpoint, Measurement, Registry};
use futures::future::join_all;
use tracing::warn;

use crate::prober::Prober;

/// Result of measuring a set of region ids against the registry.
#[derive(Debug, Clone, Default)]
pub struct RegionMeasurements {
    pub measurements: HashMap<String, Measurement>,
    /// Requested regions with no registry endpoint.
    pub unavailable: Vec<String>,
}

fn dedup_by_region(endpoints: &[Endpoint]) -> Vec<&Endpoint> {
    let mut seen = HashSet::new();
    endpoints
        .iter()
        .filter(|ep| seen.insert(ep.region_id.as_str()))
        .collect()
}

/// Maps the per-region results back onto the caller's list, so duplicates of
/// a region share the one measurement taken for it.
fn spread(endpoints: &[Endpoint], unique: &[&Endpoint], results: Vec<Measurement>) -> Vec<Measurement> {
    let by_region: HashMap<&str, Measurement> = unique
        .iter()
        .map(|ep| ep.region_id.as_str())
        .zip(results)
        .collect();
    endpoints
        .iter()
        .filter_map(|ep| by_region.get(ep.region_id.as_str()).cloned())
        .collect()
}

/// One measurement per input endpoint, with each distinct region probed once.
/// Failures are ordinary elements.
pub async fn measure_all(prober: &Prober, endpoints: &[Endpoint]) -> Vec<Measurement> {
    let unique = dedup_by_region(endpoints);
    let results = join_all(unique.iter().map(|ep| prober.measure(ep))).await;
    spread(endpoints, &unique, results)
}

/// Same fan-out, each probe retried on failure.
pub async fn measure_all_with_retry(
    prober: &Prober,
    endpoints: &[Endpoint],
    max_retries: u32,
) -> Vec<Measurement> {
    let unique = dedup_by_region(endpoints);
    let results = join_all(
        unique
            .iter()
            .map(|ep| prober.measure_with_retry(ep, max_retries)),
    )
    .await;
    spread(endpoints, &unique, results)
}

pub async fn measure_regions<'a, I>(
    prober: &Prober,
    registry: &Registry,
    regions: I,
    max_retries: u32,
) -> RegionMeasurements
where
    I: IntoIterator<Item = &'a str>,
{
    let (endpoints, unavailable) = registry.resolve(regions);
    for region in &unavailable {
        warn!(region = %region, "no endpoint registered for region, skipping");
    }
    let results = if max_retries == 0 {
        measure_all(prober, &endpoints).await
    } else {
        measure_all_with_retry(prober, &endpoints, max_retries).await
    };
    RegionMeasurements {
        measurements: results
            .into_iter()
            .map(|m| (m.region_id.clone(), m))
            .collect(),
        unavailable,
    }
}
