//! Health check metrics
//!
//! Components report health through a [`HealthChecker`]. The default
//! implementation publishes a gauge (0 healthy, 1 unhealthy) named
//! `telestore_health_check` with a `component` label.

use crate::Error;
use metrics::gauge;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Receives health transitions of a component.
pub trait HealthChecker: Send + Sync {
    fn health(&self);
    fn unhealth(&self, reason: &Error);
}

/// Creates health metrics, usually provided by the telemetry module.
pub trait MetricsCreator: Send + Sync {
    fn create_health_check_metric(&self, component: &str) -> Arc<HealthCheckMetrics>;
}

/// Gauge-backed health state of one component.
#[derive(Debug)]
pub struct HealthCheckMetrics {
    component: String,
    state: AtomicU8,
}

impl HealthCheckMetrics {
    /// Starts unhealthy until the first successful check.
    pub fn new(component: impl Into<String>) -> Self {
        let metrics = Self {
            component: component.into(),
            state: AtomicU8::new(1),
        };
        metrics.publish(1);
        metrics
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Current gauge value.
    pub fn value(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn publish(&self, value: u8) {
        self.state.store(value, Ordering::Release);
        gauge!("telestore_health_check", "component" => self.component.clone()).set(value as f64);
    }
}

impl HealthChecker for HealthCheckMetrics {
    fn health(&self) {
        self.publish(0);
    }

    fn unhealth(&self, reason: &Error) {
        if self.state.swap(1, Ordering::AcqRel) == 0 {
            warn!(component = %self.component, error = %reason, "Component became unhealthy");
        }
        gauge!("telestore_health_check", "component" => self.component.clone()).set(1.0);
    }
}

/// [`MetricsCreator`] backed by the process-wide `metrics` recorder.
#[derive(Debug, Default)]
pub struct GaugeMetricsCreator;

impl MetricsCreator for GaugeMetricsCreator {
    fn create_health_check_metric(&self, component: &str) -> Arc<HealthCheckMetrics> {
        Arc::new(HealthCheckMetrics::new(component))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_update_the_value() {
        let m = GaugeMetricsCreator.create_health_check_metric("storage_measure");
        assert_eq!(m.value(), 1);
        m.health();
        assert_eq!(m.value(), 0);
        m.unhealth(&Error::Connection("reset".into()));
        assert_eq!(m.value(), 1);
        assert_eq!(m.component(), "storage_measure");
    }
}
