//! # Subscription Observer
//!
//! Optional hook on a subscription's lifecycle. The stock `LoggingObserver`
//! writes the usual `[label] ...` lines for every event.

use crate::error::StreamError;
use crate::record::SensorRecord;

/// Lifecycle callbacks. Every method defaults to a no-op.
pub trait SubscriptionObserver: Send + Sync + 'static {
    fn on_subscribe(&self, _id: u64) {}
    fn on_next(&self, _id: u64, _record: &SensorRecord) {}
    fn on_error(&self, _id: u64, _error: &StreamError) {}
    fn on_complete(&self, _id: u64) {}
    fn on_cancel(&self, _id: u64) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SubscriptionObserver for NoopObserver {}

/// Logs each lifecycle event under a label such as `Flowable` or `Backpressure DROP`.
#[derive(Debug, Clone)]
pub struct LoggingObserver {
    label: String,
}

impl LoggingObserver {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl SubscriptionObserver for LoggingObserver {
    fn on_subscribe(&self, id: u64) {
        log::info!("[{}] Subscription {} started.", self.label, id);
    }

    fn on_next(&self, id: u64, record: &SensorRecord) {
        log::info!("[{}] #{} Received sensor data: {:?}", self.label, id, record);
    }

    fn on_error(&self, id: u64, error: &StreamError) {
        log::error!("[{}] #{} Error occurred while fetching sensor data: {}", self.label, id, error);
    }

    fn on_complete(&self, id: u64) {
        log::info!("[{}] #{} Completed successfully.", self.label, id);
    }

    fn on_cancel(&self, id: u64) {
        log::info!("[{}] #{} Subscription cancelled", self.label, id);
    }
}
