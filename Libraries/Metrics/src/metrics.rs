use prometheus::{self, IntGauge, Opts, Registry};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};
use tracing::{debug, instrument, warn};
use once_cell::sync::Lazy;

/// Global singleton for the `Metrics` instance.
pub static METRICS: Lazy<Arc<Mutex<Option<Metrics>>>> = Lazy::new(|| Arc::new(Mutex::new(None)));

/// Registry of named integer gauges shared by the whole process.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    common_labels: Arc<RwLock<Vec<(String, String)>>>,
    custom_gauges: Arc<Mutex<HashMap<String, IntGauge>>>, // Store custom gauges by name
}

pub struct MetricsBuilder {
    common_labels: Vec<(String, String)>,
    custom_gauges: Vec<(String, String)>,
}

impl Default for MetricsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsBuilder {
    /// Create a new `MetricsBuilder`.
    #[instrument(skip_all)]
    pub fn new() -> Self {
        Self {
            common_labels: Vec::new(),
            custom_gauges: Vec::new(),
        }
    }

    /// Add a common label to be applied to all metrics.
    #[instrument(skip_all)]
    pub fn add_label(mut self, key: &str, value: &str) -> Self {
        self.common_labels.push((key.to_string(), value.to_string()));
        self
    }

    /// Add a gauge by name and description.
    #[instrument(skip_all)]
    pub fn add_gauge(mut self, name: &str, description: &str) -> Self {
        self.custom_gauges.push((name.to_string(), description.to_string()));
        self
    }

    /// Build the metrics instance and install it as the process-wide one.
    ///
    /// If an instance was already installed, that instance is returned and the
    /// gauges requested here are added to it.
    #[instrument(skip_all)]
    pub fn build(self) -> Metrics {
        let mut metrics_guard = METRICS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(ref existing) = *metrics_guard {
            warn!("Metrics instance already initialized, reusing it");
            for (name, description) in &self.custom_gauges {
                if let Err(e) = existing.get_or_create_gauge(name, description) {
                    warn!("{}", e);
                }
            }
            return existing.clone();
        }

        let metrics = Metrics {
            registry: Registry::new(),
            common_labels: Arc::new(RwLock::new(self.common_labels)),
            custom_gauges: Arc::new(Mutex::new(HashMap::new())),
        };

        for (name, description) in &self.custom_gauges {
            if let Err(e) = metrics.get_or_create_gauge(name, description) {
                warn!("{}", e);
            }
        }

        debug!("Metrics successfully built");

        *metrics_guard = Some(metrics.clone());
        metrics
    }

    /// Helper to create metric options with labels.
    fn opts_with_labels(name: &str, help: &str, labels: &[(String, String)]) -> Opts {
        let mut opts = Opts::new(name, help);
        for (key, value) in labels {
            opts = opts.const_label(key.clone(), value.clone());
        }
        opts
    }
}

/// Retrieve the global Metrics instance, building an unlabeled one on first use.
#[instrument(skip_all)]
pub fn get_metrics() -> Metrics {
    {
        let metrics_guard = METRICS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(ref metrics) = *metrics_guard {
            return metrics.clone();
        }
    }

    MetricsBuilder::new().build()
}

impl Metrics {
    /// Add or get a custom gauge by name.
    #[instrument(skip_all)]
    pub fn get_or_create_gauge(&self, name: &str, description: &str) -> Result<IntGauge, String> {
        let mut gauges = self
            .custom_gauges
            .lock()
            .map_err(|_| "Failed to lock custom gauges".to_string())?;
        if let Some(gauge) = gauges.get(name) {
            return Ok(gauge.clone());
        }

        let labels = self
            .common_labels
            .read()
            .map_err(|_| "Failed to lock common labels".to_string())?;
        let opts = MetricsBuilder::opts_with_labels(name, description, &labels);
        let gauge = IntGauge::with_opts(opts).map_err(|e| format!("Failed to create gauge: {}", e))?;
        self.registry
            .register(Box::new(gauge.clone()))
            .map_err(|e| format!("Failed to register gauge: {}", e))?;
        gauges.insert(name.to_string(), gauge.clone());
        Ok(gauge)
    }

    /// Get the Prometheus registry.
    #[instrument(skip_all)]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
