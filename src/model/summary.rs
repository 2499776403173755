//! Externally visible update summary.

use serde::{Deserialize, Serialize};

use super::release::{BomComponent, Release};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    UpToDate,
    UpdatesAvailable,
    Error,
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpToDate => write!(f, "up_to_date"),
            Self::UpdatesAvailable => write!(f, "updates_available"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Detail of the next release a domain can upgrade to.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NextRelease {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub bom: Vec<BomComponent>,
    #[serde(default)]
    pub bundle_ids: Vec<String>,
}

impl From<&Release> for NextRelease {
    fn from(release: &Release) -> Self {
        Self {
            version: release.version.clone(),
            release_date: release.release_date.clone(),
            description: release.description.clone(),
            bom: release.bom.clone(),
            bundle_ids: release.bundle_ids(),
        }
    }
}

/// Update snapshot for one domain.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
    pub status: UpdateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_release: Option<NextRelease>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateSummary {
    pub fn from_selection(current_version: Option<String>, next: Option<&Release>) -> Self {
        let status = if next.is_some() {
            UpdateStatus::UpdatesAvailable
        } else {
            UpdateStatus::UpToDate
        };
        Self {
            current_version,
            status,
            next_release: next.map(NextRelease::from),
            error: None,
        }
    }

    pub fn error(current_version: Option<String>, message: impl Into<String>) -> Self {
        Self {
            current_version,
            status: UpdateStatus::Error,
            next_release: None,
            error: Some(message.into()),
        }
    }
}
