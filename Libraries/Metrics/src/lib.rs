mod metrics;
mod server;

pub use metrics::{Metrics, MetricsBuilder, get_metrics};
pub use server::{start_server, metrics_handler};
