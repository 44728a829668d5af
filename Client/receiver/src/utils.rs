use metrics::MetricsBuilder;
use tracing::info;

/// Installs the process-wide metrics registry, labeled as the receiver.
/// Must run before the first `Storage` is created so its gauges carry the label.
pub fn create_metrics() -> Result<(), Box<dyn std::error::Error>> {
    let metrics = MetricsBuilder::new().add_label("mode", "receiver").build();
    info!("Metrics registry ready ({} families)", metrics.registry().gather().len());
    Ok(())
}
