//! Process observability: Prometheus counters for playback sessions and the
//! request layer, plus tracing subscriber setup.

mod metrics;
mod tracing;

pub use self::metrics::{MetricsContext, MetricsServerConfig};
pub use self::tracing::init_tracing;
