use serde::Serialize;
use tracing::{info, warn};

/// Counters reported at step and batch boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub errors: usize,
}

/// Receives sync progress. How it is displayed is up to the implementation.
pub trait ProgressSink: Send + Sync {
    fn initialize(&self, service: &str, operation: &str, fields: &ProgressFields);
    fn update(&self, service: &str, operation: &str, fields: &ProgressFields);
    fn complete(&self, service: &str, operation: &str, fields: &ProgressFields);
    fn fail(&self, service: &str, operation: &str, message: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn initialize(&self, service: &str, operation: &str, fields: &ProgressFields) {
        info!(service, operation, total = ?fields.total, "sync started");
    }

    fn update(&self, service: &str, operation: &str, fields: &ProgressFields) {
        info!(
            service,
            operation,
            processed = fields.processed,
            total = ?fields.total,
            "sync progress"
        );
    }

    fn complete(&self, service: &str, operation: &str, fields: &ProgressFields) {
        info!(
            service,
            operation,
            inserted = fields.inserted,
            updated = fields.updated,
            errors = fields.errors,
            "sync finished"
        );
    }

    fn fail(&self, service: &str, operation: &str, message: &str) {
        warn!(service, operation, message, "sync failed");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn initialize(&self, _: &str, _: &str, _: &ProgressFields) {}
    fn update(&self, _: &str, _: &str, _: &ProgressFields) {}
    fn complete(&self, _: &str, _: &str, _: &ProgressFields) {}
    fn fail(&self, _: &str, _: &str, _: &str) {}
}
