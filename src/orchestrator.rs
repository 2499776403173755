//! Upgrade orchestrator: per-domain run registry and the phase sequence.
//!
//! Each run is an independent tokio task. A supervising task observes the
//! run's `JoinHandle`, so errors and panics alike end in `failed` with a
//! log entry.

pub mod context;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::VcfApi;
use crate::config::UpgradeTimings;
use crate::error::VuoError;
use crate::metrics::Metrics;
use crate::phases::{bundles, components, prechecks, targeting, validation};
use crate::state::{Severity, UpgradePhase};
use crate::status::StatusSink;
use context::RunContext;

struct ActiveRun {
    run_id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

type RunRegistry = Arc<Mutex<HashMap<String, ActiveRun>>>;

#[derive(Clone)]
pub struct Orchestrator {
    api: Arc<dyn VcfApi>,
    sink: StatusSink,
    timings: UpgradeTimings,
    metrics: Option<Arc<Metrics>>,
    runs: RunRegistry,
}

impl Orchestrator {
    pub fn new(api: Arc<dyn VcfApi>, sink: StatusSink, timings: UpgradeTimings) -> Self {
        Self {
            api,
            sink,
            timings,
            metrics: None,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub const fn sink(&self) -> &StatusSink {
        &self.sink
    }

    /// Start an upgrade run for a domain and return its run id.
    ///
    /// Rejected with `RunInProgress`, leaving state untouched, if the domain
    /// already has a live run or an active phase.
    pub fn start_upgrade(&self, domain_id: &str) -> Result<u64, VuoError> {
        let mut runs = self.runs.lock();
        if runs
            .get(domain_id)
            .is_some_and(|run| !run.handle.is_finished())
        {
            return Err(VuoError::RunInProgress(domain_id.to_string()));
        }

        let run_id = self
            .sink
            .begin_run(domain_id, &format!("Upgrade requested for domain {domain_id}"))?;
        let cancel = CancellationToken::new();
        let ctx = RunContext {
            domain_id: domain_id.to_string(),
            run_id,
            api: self.api.clone(),
            sink: self.sink.clone(),
            timings: self.timings.clone(),
            cancel: cancel.clone(),
            metrics: self.metrics.clone(),
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_started(domain_id);
        }

        info!(domain = domain_id, run_id, "Starting upgrade run");
        let handle = tokio::spawn(supervise(ctx, self.runs.clone()));
        runs.insert(
            domain_id.to_string(),
            ActiveRun {
                run_id,
                cancel,
                handle,
            },
        );
        Ok(run_id)
    }

    /// Record an operator acknowledgment of precheck warnings.
    ///
    /// Returns false when the domain has never had a run.
    pub fn acknowledge(&self, domain_id: &str) -> bool {
        let accepted = self.sink.acknowledge(domain_id);
        if accepted {
            info!(domain = domain_id, "Precheck warnings acknowledged");
        } else {
            warn!(domain = domain_id, "Ignoring acknowledgment for unknown domain");
        }
        accepted
    }

    /// Cancel a domain's live run. Returns false if none is running.
    pub fn abandon(&self, domain_id: &str) -> bool {
        let runs = self.runs.lock();
        match runs.get(domain_id) {
            Some(run) if !run.handle.is_finished() => {
                warn!(domain = domain_id, run_id = run.run_id, "Abandoning upgrade run");
                run.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn is_running(&self, domain_id: &str) -> bool {
        self.runs
            .lock()
            .get(domain_id)
            .is_some_and(|run| !run.handle.is_finished())
    }

    /// Abandon every live run and wait for each to record its outcome.
    pub async fn shutdown(&self) {
        let active: Vec<ActiveRun> = self.runs.lock().drain().map(|(_, run)| run).collect();
        if active.is_empty() {
            return;
        }
        info!(count = active.len(), "Abandoning active upgrade runs");
        for run in &active {
            run.cancel.cancel();
        }
        join_all(active.into_iter().map(|run| run.handle)).await;
    }
}

/// Drive one run to its terminal phase and release its registry slot.
async fn supervise(ctx: RunContext, runs: RunRegistry) {
    let domain_id = ctx.domain_id.clone();
    let run_id = ctx.run_id;
    let sink = ctx.sink.clone();
    let metrics = ctx.metrics.clone();
    let reset_delay = ctx.timings.reset_delay;

    let ctx = Arc::new(ctx);
    let inner = tokio::spawn({
        let ctx = ctx.clone();
        async move { run_phases(&ctx).await }
    });

    let outcome = match inner.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(VuoError::Cancelled(_))) => Err("Upgrade abandoned".to_string()),
        Ok(Err(e)) => Err(format!("Upgrade failed: {e}")),
        Err(e) if e.is_panic() => Err(format!(
            "Upgrade failed: internal error: {}",
            panic_message(e.into_panic())
        )),
        Err(e) => Err(format!("Upgrade failed: {e}")),
    };

    match outcome {
        Ok(()) => {
            info!(domain = %domain_id, run_id, "Upgrade run completed");
            if let Some(metrics) = &metrics {
                metrics.record_completed(&domain_id);
            }
            let domain_id = domain_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(reset_delay).await;
                if sink.reset_if(&domain_id, run_id) {
                    info!(domain = %domain_id, run_id, "Upgrade state reset to idle");
                }
            });
        }
        Err(message) => {
            error!(domain = %domain_id, run_id, "{}", message);
            sink.fail(&domain_id, &message);
            if let Some(metrics) = &metrics {
                metrics.record_failed(&domain_id);
                metrics.record_transition(&domain_id, UpgradePhase::Failed);
            }
        }
    }

    let mut runs = runs.lock();
    if runs.get(&domain_id).is_some_and(|run| run.run_id == run_id) {
        runs.remove(&domain_id);
    }
}

/// The canonical phase sequence: target, download, set target, prechecks,
/// component upgrades, final validation.
async fn run_phases(ctx: &RunContext) -> Result<(), VuoError> {
    let release = targeting::select_target(ctx).await?;
    bundles::download_all(ctx, &release).await?;
    targeting::apply_target_version(ctx, &release).await?;
    prechecks::run_prechecks(ctx, &release.version).await?;
    components::upgrade_all(ctx, &release.version).await?;
    validation::final_validation(ctx, &release.version).await?;

    ctx.transition(
        UpgradePhase::SuccessfullyCompleted,
        Severity::Success,
        &format!("Domain upgraded to {}", release.version),
    );
    Ok(())
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
