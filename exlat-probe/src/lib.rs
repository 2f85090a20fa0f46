//! Measurement side of exlat: round-trip probes against cloud region
//! endpoints, a TTL cache in front of them, and the pipeline that turns a
//! round of measurements into scored servers and a connection graph.

pub mod aggregate;
pub mod cache;
pub mod clock;
pub mod pipeline;
pub mod prober;
pub mod transport;

pub use aggregate::{measure_all, measure_all_with_retry, measure_regions, RegionMeasurements};
pub use cache::MeasurementCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use pipeline::Pipeline;
pub use prober::{ProbeSettings, Prober};
pub use transport::{HttpTransport, Transport, TransportError};
