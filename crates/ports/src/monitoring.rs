//! Metric emission boundary contract.

/// Boundary contract for pushing backup freshness metrics.
///
/// The emitter is fire-and-forget; failures are logged by adapters and
/// never propagate into backup or restore outcomes.
pub trait MonitoringPort: Send + Sync {
    /// Send one gauge value tagged with a metric key, a measurement
    /// name, and the backup it describes.
    fn send(&self, key: &str, what: &str, backup_name: &str, value: i64);
}

/// A monitoring sink that drops every metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMonitoring;

impl MonitoringPort for NoopMonitoring {
    fn send(&self, _key: &str, _what: &str, _backup_name: &str, _value: i64) {}
}
