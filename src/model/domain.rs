//! Management domain representation.

use serde::Serialize;

use super::release::Release;
use super::summary::UpdateSummary;
use crate::api::types::{DomainRecord, SddcManagerRecord};

/// Manager service (SDDC Manager) instance responsible for a domain.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagerRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    /// Version reported by the manager service itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl From<&SddcManagerRecord> for ManagerRef {
    fn from(record: &SddcManagerRecord) -> Self {
        Self {
            id: record.id.clone(),
            fqdn: record.fqdn.clone(),
            version: record.version.clone(),
        }
    }
}

/// One management domain as seen by a discovery pass.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub id: String,
    pub name: String,
    pub status: String,
    /// Ordinal assigned during discovery (`domain1`, `domain2`, ...).
    /// Not stable across runs; identity is `id`.
    pub prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager: Option<ManagerRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_release: Option<Release>,
}

impl Domain {
    /// Build a domain from its API record and 0-based discovery index.
    pub fn from_record(record: &DomainRecord, index: usize) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            status: record.status.clone(),
            prefix: format!("domain{}", index + 1),
            manager: None,
            current_version: None,
            next_release: None,
        }
    }

    /// Externally visible update snapshot for this domain.
    pub fn to_summary(&self) -> UpdateSummary {
        UpdateSummary::from_selection(self.current_version.clone(), self.next_release.as_ref())
    }
}
