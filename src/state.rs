//! Upgrade phase, log severity and per-domain upgrade state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of an upgrade run.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpgradePhase {
    #[default]
    Idle,
    VersionTargeting,
    DownloadingBundles,
    SettingTargetVersion,
    InitializingPrechecks,
    RunningPrechecks,
    PrechecksDone,
    WaitingForAlertAcknowledgement,
    AlertsWereAcknowledged,
    StartingUpgrades,
    FinalValidation,
    SuccessfullyCompleted,
    Failed,
}

impl UpgradePhase {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::SuccessfullyCompleted | Self::Failed)
    }

    /// A run is in flight: neither idle nor terminal.
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle) && !self.is_terminal()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::VersionTargeting => "version_targeting",
            Self::DownloadingBundles => "downloading_bundles",
            Self::SettingTargetVersion => "setting_target_version",
            Self::InitializingPrechecks => "initializing_prechecks",
            Self::RunningPrechecks => "running_prechecks",
            Self::PrechecksDone => "prechecks_done",
            Self::WaitingForAlertAcknowledgement => "waiting_for_alert_acknowledgement",
            Self::AlertsWereAcknowledged => "alerts_were_acknowledged",
            Self::StartingUpgrades => "starting_upgrades",
            Self::FinalValidation => "final_validation",
            Self::SuccessfullyCompleted => "successfully_completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity tag of a log entry.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Success => write!(f, "SUCCESS"),
        }
    }
}

/// Format one log line: `[2026-10-16 08:00:00 UTC] [INFO] message`.
pub fn format_log_line(at: DateTime<Utc>, severity: Severity, message: &str) -> String {
    format!(
        "[{}] [{}] {}\n",
        at.format("%Y-%m-%d %H:%M:%S UTC"),
        severity,
        message
    )
}

/// Orchestrator-owned state of one domain.
#[derive(Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeState {
    pub phase: UpgradePhase,

    /// Append-only log of the current (or last) run.
    pub log: String,

    /// Set externally, consumed by the run waiting on precheck warnings.
    pub acknowledged: bool,

    /// Resource ids found by the precheck query, keyed by resource type.
    pub resource_ids: BTreeMap<String, Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,

    pub run_id: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Failure message of the last failed run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
