//! Per-run context shared by every phase.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::VcfApi;
use crate::config::UpgradeTimings;
use crate::error::VuoError;
use crate::metrics::Metrics;
use crate::state::{Severity, UpgradePhase};
use crate::status::StatusSink;

/// Everything one upgrade run needs: the API, the sink, its timings and its
/// cancellation token.
pub struct RunContext {
    pub domain_id: String,
    pub run_id: u64,
    pub api: Arc<dyn VcfApi>,
    pub sink: StatusSink,
    pub timings: UpgradeTimings,
    pub cancel: CancellationToken,
    pub metrics: Option<Arc<Metrics>>,
}

impl RunContext {
    /// Move to `phase` and append its log line atomically.
    pub fn transition(&self, phase: UpgradePhase, severity: Severity, message: &str) {
        info!(domain = %self.domain_id, run_id = self.run_id, %phase, "{}", message);
        self.sink
            .transition(&self.domain_id, phase, severity, message);
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(&self.domain_id, phase);
        }
    }

    pub fn log(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Warning => warn!(domain = %self.domain_id, run_id = self.run_id, "{}", message),
            Severity::Error => error!(domain = %self.domain_id, run_id = self.run_id, "{}", message),
            Severity::Info | Severity::Success => {
                info!(domain = %self.domain_id, run_id = self.run_id, "{}", message);
            }
        }
        self.sink.append_log(&self.domain_id, severity, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Severity::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Severity::Warning, message);
    }

    /// Cancellation-aware sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), VuoError> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(self.cancelled()),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Sleep one remote poll interval.
    pub async fn poll_wait(&self) -> Result<(), VuoError> {
        self.sleep(self.timings.poll_interval).await
    }

    pub fn check_cancelled(&self) -> Result<(), VuoError> {
        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        Ok(())
    }

    fn cancelled(&self) -> VuoError {
        VuoError::Cancelled(format!("run {} for domain {}", self.run_id, self.domain_id))
    }

    pub fn ignore_alerts(&self) -> bool {
        self.sink.ignore_alerts(&self.domain_id)
    }

    pub fn enter_wait(&self, message: &str) {
        warn!(domain = %self.domain_id, run_id = self.run_id, "{}", message);
        self.sink.enter_wait(&self.domain_id, message);
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(
                &self.domain_id,
                UpgradePhase::WaitingForAlertAcknowledgement,
            );
        }
    }

    pub fn take_acknowledgement(&self) -> bool {
        self.sink.take_acknowledgement(&self.domain_id)
    }

    pub fn set_target_version(&self, version: &str) {
        self.sink.set_target_version(&self.domain_id, version);
    }

    pub fn set_resource_ids(&self, resource_ids: BTreeMap<String, Vec<String>>) {
        self.sink.set_resource_ids(&self.domain_id, resource_ids);
    }

    pub fn resource_ids(&self) -> BTreeMap<String, Vec<String>> {
        self.sink.state(&self.domain_id).resource_ids
    }
}

/// Wall-clock envelope for a polling loop, measured on the tokio clock so
/// paused-time tests advance it.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.limit
    }

    /// Envelope length in whole minutes.
    pub const fn minutes(&self) -> u64 {
        self.limit.as_secs() / 60
    }

    /// Timeout error for this envelope.
    pub fn timeout(&self, operation: impl Into<String>) -> VuoError {
        VuoError::Timeout {
            operation: operation.into(),
            minutes: self.minutes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires_on_tokio_clock() {
        let deadline = Deadline::after(Duration::from_secs(40 * 60));
        assert!(!deadline.expired());
        tokio::time::advance(Duration::from_secs(39 * 60)).await;
        assert!(!deadline.expired());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(deadline.expired());
        assert_eq!(deadline.minutes(), 40);
    }

    #[tokio::test]
    async fn test_deadline_timeout_error() {
        let deadline = Deadline::after(Duration::from_secs(30 * 60));
        let err = deadline.timeout("Final validation");
        assert_eq!(err.to_string(), "Final validation timed out after 30 minutes");
    }
}
