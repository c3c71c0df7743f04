//! The log sink abstraction.

use crate::error::TelemetryResult;
use crate::models::LogRecord;
use async_trait::async_trait;

/// A destination for enriched log records.
///
/// `emit` is the synchronous hand-off at the call boundary: it must return
/// quickly and must not fail. Sinks that deliver over the network queue the
/// record and ship it from their own background task.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Accepts one record.
    fn emit(&self, record: &LogRecord);

    /// Delivers anything buffered.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink's background task is gone.
    async fn flush(&self) -> TelemetryResult<()> {
        Ok(())
    }

    /// Flushes and releases the sink. Records emitted afterwards are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush could not be performed.
    async fn shutdown(&self) -> TelemetryResult<()> {
        self.flush().await
    }
}
