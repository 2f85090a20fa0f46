use std::collections::HashMap;
use std::sync::Arc;

use exlat_core::Measurement;
use parking_lot::Mutex;

use crate::clock::Clock;

/// Most recent measurement per region. Entries at or past the TTL read as
/// absent; writes overwrite unconditionally.
pub struct MeasurementCache {
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Measurement>>,
}

impl MeasurementCache {
    pub fn new(ttl_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl_ms,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    pub fn get_fresh(&self, region: &str) -> Option<Measurement> {
        let now = self.clock.now_ms();
        let entries = self.entries.lock();
        let m = entries.get(region)?;
        let age = now.saturating_sub(m.measured_at_ms);
        if age >= 0 && (age as u64) < self.ttl_ms {
            Some(m.clone())
        } else {
            None
        }
    }

    pub fn age_ms(&self, region: &str) -> Option<i64> {
        let now = self.clock.now_ms();
        self.entries
            .lock()
            .get(region)
            .map(|m| now.saturating_sub(m.measured_at_ms))
    }

    pub fn insert(&self, m: Measurement) {
        self.entries.lock().insert(m.region_id.clone(), m);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Copy of every entry, stale ones included.
    pub fn snapshot(&self) -> HashMap<String, Measurement> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
