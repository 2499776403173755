//! Request and response bodies of the VCF automation API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// List envelope shared by every collection endpoint.
#[derive(Deserialize, Clone, Debug)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub elements: Vec<T>,
}

/// Reference to another resource by id.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct IdRef {
    pub id: String,
}

/// Domain status value that makes a domain participate in upgrades.
pub const ACTIVE: &str = "ACTIVE";

#[derive(Deserialize, Clone, Debug)]
pub struct DomainRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub clusters: Vec<IdRef>,
}

impl DomainRecord {
    /// Only ACTIVE domains take part in refresh and capacity reporting.
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case(ACTIVE)
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct SddcManagerRecord {
    pub id: String,
    #[serde(default)]
    pub fqdn: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub domain: Option<IdRef>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ReleaseRecord {
    pub version: String,
}

// ============================================================================
// Bundles
// ============================================================================

/// Download state of a bundle.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(from = "String", into = "String")]
pub enum DownloadStatus {
    #[default]
    NotStarted,
    Pending,
    InProgress,
    Successful,
    Failed,
    Unknown(String),
}

impl From<String> for DownloadStatus {
    fn from(value: String) -> Self {
        match value.to_uppercase().as_str() {
            "" | "NOT_STARTED" => Self::NotStarted,
            "PENDING" | "SCHEDULED" => Self::Pending,
            "IN_PROGRESS" | "INPROGRESS" => Self::InProgress,
            "SUCCESSFUL" | "SUCCESS" | "COMPLETED" => Self::Successful,
            "FAILED" | "CANCELLED" => Self::Failed,
            _ => Self::Unknown(value),
        }
    }
}

impl From<DownloadStatus> for String {
    fn from(value: DownloadStatus) -> Self {
        match value {
            DownloadStatus::NotStarted => "NOT_STARTED".to_string(),
            DownloadStatus::Pending => "PENDING".to_string(),
            DownloadStatus::InProgress => "IN_PROGRESS".to_string(),
            DownloadStatus::Successful => "SUCCESSFUL".to_string(),
            DownloadStatus::Failed => "FAILED".to_string(),
            DownloadStatus::Unknown(s) => s,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub id: String,
    #[serde(default)]
    pub download_status: DownloadStatus,
}

// ============================================================================
// Long-running tasks
// ============================================================================

/// Normalized status of a remote asynchronous task.
///
/// The API is not consistent across endpoints, so several spellings map to
/// each variant. Unrecognized values are kept and treated as still running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed(String),
    Unknown(String),
}

impl TaskStatus {
    pub fn parse(value: &str) -> Self {
        match value.to_uppercase().as_str() {
            "IN_PROGRESS" | "INPROGRESS" | "PENDING" | "RUNNING" | "SCHEDULED" | "NOT_STARTED" => {
                Self::Running
            }
            "COMPLETED_WITH_SUCCESS" | "SUCCESSFUL" | "SUCCEEDED" | "SUCCESS" | "COMPLETED" => {
                Self::Succeeded
            }
            "COMPLETED_WITH_FAILURE" | "FAILED" | "FAILURE" | "CANCELLED" | "ABORTED" => {
                Self::Failed(value.to_string())
            }
            _ => Self::Unknown(value.to_string()),
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

// ============================================================================
// Prechecks
// ============================================================================

/// A resource discovered by a precheck query. Unknown fields are preserved
/// so the resource can be sent back verbatim when starting the run.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrecheckResource {
    pub resource_id: String,
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrecheckQuery {
    pub query_id: String,
    #[serde(default)]
    pub resources: Vec<PrecheckResource>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct PrecheckRun {
    #[serde(alias = "runId")]
    pub id: String,
}

/// Validation counts for one resource, with nested sub-resource summaries.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    #[serde(default, alias = "resourceName", alias = "domainName")]
    pub name: Option<String>,
    #[serde(default)]
    pub error_validations_count: u64,
    #[serde(default)]
    pub warning_validations_count: u64,
    #[serde(default)]
    pub critical_gaps_count: u64,
    #[serde(default)]
    pub warning_gaps_count: u64,
    #[serde(default, alias = "resourceSummaries")]
    pub sub_resources: Vec<ValidationSummary>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct PresentedArtifacts {
    #[serde(rename = "validation-domain-summary", default)]
    pub domain_summaries: Vec<ValidationSummary>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrecheckStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub presented_artifacts_map: Option<PresentedArtifacts>,
}

// ============================================================================
// Upgrades
// ============================================================================

/// State of an upgradable bundle for a domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpgradableStatus {
    Available,
    Pending,
    Scheduled,
    InProgress,
    Completed,
    Other(String),
}

impl From<String> for UpgradableStatus {
    fn from(value: String) -> Self {
        match value.to_uppercase().as_str() {
            "AVAILABLE" => Self::Available,
            "PENDING" => Self::Pending,
            "SCHEDULED" => Self::Scheduled,
            "IN_PROGRESS" | "INPROGRESS" => Self::InProgress,
            "COMPLETED" | "COMPLETED_WITH_SUCCESS" => Self::Completed,
            _ => Self::Other(value),
        }
    }
}

impl<'de> Deserialize<'de> for UpgradableStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct SoftwareComponent {
    #[serde(rename = "type")]
    pub component_type: String,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UpgradableItem {
    pub bundle_id: String,
    #[serde(default)]
    pub bundle_type: Option<String>,
    pub status: UpgradableStatus,
    #[serde(default)]
    pub software_components: Vec<SoftwareComponent>,
}

impl UpgradableItem {
    /// Remote type string identifying the component this bundle upgrades.
    pub fn component_type(&self) -> &str {
        self.software_components
            .first()
            .map(|c| c.component_type.as_str())
            .or(self.bundle_type.as_deref())
            .unwrap_or("UNKNOWN")
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUpgradeSpec {
    pub resource_id: String,
    pub upgrade_now: bool,
}

/// Body of `POST /v1/upgrades`.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRequest {
    pub bundle_id: String,
    pub resource_type: String,
    pub resource_upgrade_specs: Vec<ResourceUpgradeSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nsxt_upgrade_user_input_specs: Vec<Value>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct UpgradeTask {
    pub id: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ValidationTask {
    pub id: String,
    #[serde(default)]
    pub execution_status: Option<String>,
    #[serde(default)]
    pub result_status: Option<String>,
}

// ============================================================================
// Capacity
// ============================================================================

#[derive(Deserialize, Clone, Debug)]
pub struct ClusterRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain: Option<IdRef>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct HostCpu {
    #[serde(rename = "usedFrequencyMHz", default)]
    pub used_mhz: f64,
    #[serde(rename = "frequencyMHz", default)]
    pub total_mhz: f64,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct HostCapacity {
    #[serde(rename = "usedCapacityMB", default)]
    pub used_mb: f64,
    #[serde(rename = "totalCapacityMB", default)]
    pub total_mb: f64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct HostRecord {
    pub id: String,
    #[serde(default)]
    pub fqdn: Option<String>,
    #[serde(default)]
    pub domain: Option<IdRef>,
    #[serde(default)]
    pub cluster: Option<IdRef>,
    #[serde(default)]
    pub cpu: Option<HostCpu>,
    #[serde(default)]
    pub memory: Option<HostCapacity>,
    #[serde(default)]
    pub storage: Option<HostCapacity>,
}
