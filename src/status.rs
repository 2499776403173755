//! Per-domain status and log sink.
//!
//! `StatusSink` is a cloneable handle over shared state. Every write
//! publishes a [`StatusEvent`] on a broadcast channel so presentation
//! subscribers are notified asynchronously without touching the
//! orchestrator's task.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::VuoError;
use crate::state::{Severity, UpgradePhase, UpgradeState, format_log_line};

/// Capacity of the notification channel. Slow subscribers lose the oldest events.
const EVENT_CAPACITY: usize = 256;

/// Notification published on every sink write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusEvent {
    Phase {
        domain_id: String,
        phase: UpgradePhase,
    },
    Log {
        domain_id: String,
        line: String,
    },
    IgnoreAlerts {
        domain_id: String,
        enabled: bool,
    },
}

impl StatusEvent {
    pub fn domain_id(&self) -> &str {
        match self {
            Self::Phase { domain_id, .. }
            | Self::Log { domain_id, .. }
            | Self::IgnoreAlerts { domain_id, .. } => domain_id,
        }
    }
}

#[derive(Default)]
struct Inner {
    states: RwLock<HashMap<String, UpgradeState>>,
    ignore_alerts: RwLock<HashSet<String>>,
}

#[derive(Clone)]
pub struct StatusSink {
    inner: Arc<Inner>,
    events: broadcast::Sender<StatusEvent>,
}

impl Default for StatusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner::default()),
            events,
        }
    }

    /// Sink with ignore-alerts already enabled for the given domains.
    pub fn with_ignore_alerts<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sink = Self::new();
        sink.inner
            .ignore_alerts
            .write()
            .extend(domains.into_iter().map(Into::into));
        sink
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: StatusEvent) {
        // No receivers is not an error.
        let _ = self.events.send(event);
    }

    fn with_state<R>(&self, domain_id: &str, f: impl FnOnce(&mut UpgradeState) -> R) -> R {
        let mut states = self.inner.states.write();
        f(states.entry(domain_id.to_string()).or_default())
    }

    /// Like `with_state` but never creates an entry for an untouched domain.
    fn with_existing<R>(
        &self,
        domain_id: &str,
        f: impl FnOnce(&mut UpgradeState) -> R,
    ) -> Option<R> {
        self.inner.states.write().get_mut(domain_id).map(f)
    }

    /// Whether the domain has ever been written to.
    pub fn has_state(&self, domain_id: &str) -> bool {
        self.inner.states.read().contains_key(domain_id)
    }

    pub fn get_status(&self, domain_id: &str) -> UpgradePhase {
        self.inner
            .states
            .read()
            .get(domain_id)
            .map(|s| s.phase)
            .unwrap_or_default()
    }

    pub fn get_log(&self, domain_id: &str) -> String {
        self.inner
            .states
            .read()
            .get(domain_id)
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    /// Copy of one domain's state, idle if the domain was never touched.
    pub fn state(&self, domain_id: &str) -> UpgradeState {
        self.inner
            .states
            .read()
            .get(domain_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, UpgradeState> {
        self.inner
            .states
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn set_status(&self, domain_id: &str, phase: UpgradePhase) {
        self.with_state(domain_id, |state| set_phase(state, phase));
        self.publish(StatusEvent::Phase {
            domain_id: domain_id.to_string(),
            phase,
        });
    }

    pub fn append_log(&self, domain_id: &str, severity: Severity, message: &str) {
        let line = format_log_line(Utc::now(), severity, message);
        self.with_state(domain_id, |state| state.log.push_str(&line));
        self.publish(StatusEvent::Log {
            domain_id: domain_id.to_string(),
            line,
        });
    }

    /// Set the phase and append its log line under one write lock.
    pub fn transition(
        &self,
        domain_id: &str,
        phase: UpgradePhase,
        severity: Severity,
        message: &str,
    ) {
        let line = format_log_line(Utc::now(), severity, message);
        self.with_state(domain_id, |state| {
            set_phase(state, phase);
            state.log.push_str(&line);
        });
        debug!(domain = domain_id, %phase, "Phase transition");
        self.publish(StatusEvent::Phase {
            domain_id: domain_id.to_string(),
            phase,
        });
        self.publish(StatusEvent::Log {
            domain_id: domain_id.to_string(),
            line,
        });
    }

    /// Reset a domain for a new run and return its run id.
    ///
    /// Rejected without mutation while a run is active.
    pub fn begin_run(&self, domain_id: &str, message: &str) -> Result<u64, VuoError> {
        let line = format_log_line(Utc::now(), Severity::Info, message);
        let run_id = {
            let mut states = self.inner.states.write();
            let state = states.entry(domain_id.to_string()).or_default();
            if state.phase.is_active() {
                return Err(VuoError::RunInProgress(domain_id.to_string()));
            }
            let run_id = state.run_id + 1;
            *state = UpgradeState {
                run_id,
                started_at: Some(Utc::now()),
                log: line.clone(),
                ..UpgradeState::default()
            };
            run_id
        };
        self.publish(StatusEvent::Phase {
            domain_id: domain_id.to_string(),
            phase: UpgradePhase::Idle,
        });
        self.publish(StatusEvent::Log {
            domain_id: domain_id.to_string(),
            line,
        });
        Ok(run_id)
    }

    /// Enter the acknowledgment wait, discarding any earlier acknowledgment.
    pub fn enter_wait(&self, domain_id: &str, message: &str) {
        let line = format_log_line(Utc::now(), Severity::Warning, message);
        let phase = UpgradePhase::WaitingForAlertAcknowledgement;
        self.with_state(domain_id, |state| {
            set_phase(state, phase);
            state.acknowledged = false;
            state.log.push_str(&line);
        });
        self.publish(StatusEvent::Phase {
            domain_id: domain_id.to_string(),
            phase,
        });
        self.publish(StatusEvent::Log {
            domain_id: domain_id.to_string(),
            line,
        });
    }

    /// Record an acknowledgment. Returns false for a domain with no state.
    pub fn acknowledge(&self, domain_id: &str) -> bool {
        self.with_existing(domain_id, |state| state.acknowledged = true)
            .is_some()
    }

    /// Consume the acknowledgment flag, clearing it.
    pub fn take_acknowledgement(&self, domain_id: &str) -> bool {
        self.with_existing(domain_id, |state| std::mem::take(&mut state.acknowledged))
            .unwrap_or(false)
    }

    pub fn set_ignore_alerts(&self, domain_id: &str, enabled: bool) {
        {
            let mut flags = self.inner.ignore_alerts.write();
            if enabled {
                flags.insert(domain_id.to_string());
            } else {
                flags.remove(domain_id);
            }
        }
        self.publish(StatusEvent::IgnoreAlerts {
            domain_id: domain_id.to_string(),
            enabled,
        });
    }

    pub fn ignore_alerts(&self, domain_id: &str) -> bool {
        self.inner.ignore_alerts.read().contains(domain_id)
    }

    pub fn set_target_version(&self, domain_id: &str, version: &str) {
        self.with_state(domain_id, |state| {
            state.target_version = Some(version.to_string());
        });
    }

    pub fn set_resource_ids(&self, domain_id: &str, resource_ids: BTreeMap<String, Vec<String>>) {
        self.with_state(domain_id, |state| state.resource_ids = resource_ids);
    }

    /// Mark the run failed with a message and an error log line.
    pub fn fail(&self, domain_id: &str, message: &str) {
        let line = format_log_line(Utc::now(), Severity::Error, message);
        self.with_state(domain_id, |state| {
            set_phase(state, UpgradePhase::Failed);
            state.message = Some(message.to_string());
            state.log.push_str(&line);
        });
        self.publish(StatusEvent::Phase {
            domain_id: domain_id.to_string(),
            phase: UpgradePhase::Failed,
        });
        self.publish(StatusEvent::Log {
            domain_id: domain_id.to_string(),
            line,
        });
    }

    /// Return to idle only if `run_id` is still the successfully completed run.
    pub fn reset_if(&self, domain_id: &str, run_id: u64) -> bool {
        let line = format_log_line(Utc::now(), Severity::Info, "Upgrade state reset to idle");
        let reset = self
            .with_existing(domain_id, |state| {
                if state.run_id == run_id && state.phase == UpgradePhase::SuccessfullyCompleted {
                    state.phase = UpgradePhase::Idle;
                    state.log.push_str(&line);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if reset {
            self.publish(StatusEvent::Phase {
                domain_id: domain_id.to_string(),
                phase: UpgradePhase::Idle,
            });
            self.publish(StatusEvent::Log {
                domain_id: domain_id.to_string(),
                line,
            });
        }
        reset
    }
}

fn set_phase(state: &mut UpgradeState, phase: UpgradePhase) {
    if phase.is_terminal() {
        state.completed_at = Some(Utc::now());
    }
    state.phase = phase;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_domain_is_idle() {
        let sink = StatusSink::new();
        assert_eq!(sink.get_status("d-1"), UpgradePhase::Idle);
        assert!(sink.get_log("d-1").is_empty());
        assert!(sink.snapshot().is_empty());
    }

    #[test]
    fn test_transition_sets_phase_and_log() {
        let sink = StatusSink::new();
        sink.transition(
            "d-1",
            UpgradePhase::VersionTargeting,
            Severity::Info,
            "Selecting target version",
        );
        assert_eq!(sink.get_status("d-1"), UpgradePhase::VersionTargeting);
        let log = sink.get_log("d-1");
        assert!(log.ends_with("[INFO] Selecting target version\n"));
        assert!(log.starts_with('['));
    }

    #[test]
    fn test_log_is_append_only() {
        let sink = StatusSink::new();
        sink.append_log("d-1", Severity::Info, "first");
        sink.append_log("d-1", Severity::Warning, "second");
        let log = sink.get_log("d-1");
        assert_eq!(log.lines().count(), 2);
        assert!(log.lines().next().unwrap().ends_with("[INFO] first"));
        assert!(log.lines().nth(1).unwrap().ends_with("[WARNING] second"));
    }

    #[test]
    fn test_begin_run_resets_state() {
        let sink = StatusSink::new();
        sink.append_log("d-1", Severity::Info, "old run");
        sink.acknowledge("d-1");
        sink.set_target_version("d-1", "5.2.1.0");
        sink.fail("d-1", "boom");

        let run_id = sink.begin_run("d-1", "Starting upgrade").unwrap();
        assert_eq!(run_id, 1);
        let state = sink.state("d-1");
        assert_eq!(state.phase, UpgradePhase::Idle);
        assert!(!state.acknowledged);
        assert!(state.target_version.is_none());
        assert!(state.message.is_none());
        assert!(!state.log.contains("old run"));
        assert!(state.log.contains("Starting upgrade"));
    }

    #[test]
    fn test_begin_run_rejected_while_active() {
        let sink = StatusSink::new();
        sink.begin_run("d-1", "first").unwrap();
        sink.transition(
            "d-1",
            UpgradePhase::RunningPrechecks,
            Severity::Info,
            "running",
        );
        let before = sink.state("d-1");

        let err = sink.begin_run("d-1", "second").unwrap_err();
        assert!(matches!(err, VuoError::RunInProgress(_)));

        let after = sink.state("d-1");
        assert_eq!(after.phase, before.phase);
        assert_eq!(after.log, before.log);
        assert_eq!(after.run_id, before.run_id);
    }

    #[test]
    fn test_run_ids_increase() {
        let sink = StatusSink::new();
        assert_eq!(sink.begin_run("d-1", "a").unwrap(), 1);
        sink.fail("d-1", "x");
        assert_eq!(sink.begin_run("d-1", "b").unwrap(), 2);
        assert_eq!(sink.begin_run("d-2", "c").unwrap(), 1);
    }

    #[test]
    fn test_take_acknowledgement_clears() {
        let sink = StatusSink::new();
        sink.begin_run("d-1", "start").unwrap();
        assert!(!sink.take_acknowledgement("d-1"));
        assert!(sink.acknowledge("d-1"));
        assert!(sink.take_acknowledgement("d-1"));
        assert!(!sink.take_acknowledgement("d-1"));
    }

    #[test]
    fn test_acknowledge_unknown_domain_creates_no_state() {
        let sink = StatusSink::new();
        assert!(!sink.acknowledge("nope"));
        assert!(!sink.take_acknowledgement("nope"));
        assert!(!sink.has_state("nope"));
        assert!(sink.snapshot().is_empty());
    }

    #[test]
    fn test_enter_wait_discards_stale_ack() {
        let sink = StatusSink::new();
        sink.begin_run("d-1", "start").unwrap();
        sink.acknowledge("d-1");
        sink.enter_wait("d-1", "2 warnings");
        assert_eq!(
            sink.get_status("d-1"),
            UpgradePhase::WaitingForAlertAcknowledgement
        );
        assert!(!sink.take_acknowledgement("d-1"));
        assert!(sink.get_log("d-1").contains("[WARNING] 2 warnings"));
    }

    #[test]
    fn test_ignore_alerts_flag() {
        let sink = StatusSink::with_ignore_alerts(["d-2"]);
        assert!(sink.ignore_alerts("d-2"));
        assert!(!sink.ignore_alerts("d-1"));
        sink.set_ignore_alerts("d-1", true);
        assert!(sink.ignore_alerts("d-1"));
        sink.set_ignore_alerts("d-1", false);
        assert!(!sink.ignore_alerts("d-1"));
    }

    #[test]
    fn test_fail_records_message() {
        let sink = StatusSink::new();
        sink.fail("d-1", "Upgrade failed: boom");
        let state = sink.state("d-1");
        assert_eq!(state.phase, UpgradePhase::Failed);
        assert_eq!(state.message.as_deref(), Some("Upgrade failed: boom"));
        assert!(state.completed_at.is_some());
        assert!(state.log.contains("[ERROR] Upgrade failed: boom"));
    }

    #[test]
    fn test_reset_if_same_run_only() {
        let sink = StatusSink::new();
        let run_id = sink.begin_run("d-1", "start").unwrap();
        sink.transition(
            "d-1",
            UpgradePhase::SuccessfullyCompleted,
            Severity::Success,
            "done",
        );
        assert!(!sink.reset_if("d-1", run_id + 1));
        assert!(sink.reset_if("d-1", run_id));
        assert_eq!(sink.get_status("d-1"), UpgradePhase::Idle);
        assert!(sink.get_log("d-1").contains("done"));
    }

    #[test]
    fn test_reset_if_appends_log_line() {
        let sink = StatusSink::new();
        let run_id = sink.begin_run("d-1", "start").unwrap();
        sink.transition(
            "d-1",
            UpgradePhase::SuccessfullyCompleted,
            Severity::Success,
            "done",
        );
        let before = sink.get_log("d-1").lines().count();

        assert!(!sink.reset_if("d-1", run_id + 1));
        assert_eq!(sink.get_log("d-1").lines().count(), before);

        assert!(sink.reset_if("d-1", run_id));
        let log = sink.get_log("d-1");
        assert_eq!(log.lines().count(), before + 1);
        assert!(log.ends_with("[INFO] Upgrade state reset to idle\n"));
    }

    #[test]
    fn test_reset_if_unknown_domain_is_noop() {
        let sink = StatusSink::new();
        assert!(!sink.reset_if("d-1", 1));
        assert!(!sink.has_state("d-1"));
    }

    #[test]
    fn test_reset_if_skips_failed() {
        let sink = StatusSink::new();
        let run_id = sink.begin_run("d-1", "start").unwrap();
        sink.fail("d-1", "boom");
        assert!(!sink.reset_if("d-1", run_id));
        assert_eq!(sink.get_status("d-1"), UpgradePhase::Failed);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let sink = StatusSink::new();
        let mut rx = sink.subscribe();
        sink.transition(
            "d-1",
            UpgradePhase::DownloadingBundles,
            Severity::Info,
            "Downloading",
        );

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            StatusEvent::Phase {
                domain_id: "d-1".into(),
                phase: UpgradePhase::DownloadingBundles
            }
        );
        let second = rx.recv().await.unwrap();
        assert_eq!(second.domain_id(), "d-1");
        assert!(matches!(second, StatusEvent::Log { ref line, .. } if line.contains("Downloading")));
    }

    #[test]
    fn test_clones_share_state() {
        let sink = StatusSink::new();
        let other = sink.clone();
        other.set_status("d-1", UpgradePhase::FinalValidation);
        assert_eq!(sink.get_status("d-1"), UpgradePhase::FinalValidation);
    }
}
