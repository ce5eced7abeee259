//! Log-backed monitoring adapter.

use ringvault_ports::{fields, LoggerPort, MonitoringPort};
use std::sync::Arc;

/// Emits metrics as structured log events.
///
/// Stands in for a real metric transport when `monitoring_provider`
/// is `log`; metric emission is always fire-and-forget.
pub struct LogMonitoring {
    logger: Arc<dyn LoggerPort>,
}

impl LogMonitoring {
    /// Create a monitoring sink writing through a logger.
    #[must_use]
    pub fn new(logger: Arc<dyn LoggerPort>) -> Self {
        Self { logger }
    }
}

impl MonitoringPort for LogMonitoring {
    fn send(&self, key: &str, what: &str, backup_name: &str, value: i64) {
        self.logger.info(
            "monitoring.metric",
            "metric emitted",
            Some(fields(&[
                ("key", key),
                ("what", what),
                ("backup", backup_name),
                ("value", &value.to_string()),
            ])),
        );
    }
}
