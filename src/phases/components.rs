//! Component upgrade phase.
//!
//! Repeatedly asks the remote what is upgradable, submits the next AVAILABLE
//! bundle in component order and monitors it within that component's
//! envelope. Host bundles are never submitted.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::api::types::{
    ResourceUpgradeSpec, TaskStatus, UpgradableItem, UpgradableStatus, UpgradeRequest,
};
use crate::config::UpgradeTimings;
use crate::error::VuoError;
use crate::orchestrator::context::{Deadline, RunContext};
use crate::state::{Severity, UpgradePhase};

/// Resource types under which the network controller may appear in the
/// precheck resource map.
const NETWORK_RESOURCE_TYPES: &[&str] = &["NSXT_MANAGER", "NSX_T_MANAGER", "NSX_MANAGER"];

const CLUSTER_RESOURCE_TYPE: &str = "CLUSTER";

/// Upgrade submissions target the domain as a whole.
const DOMAIN_RESOURCE_TYPE: &str = "DOMAIN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentKind {
    ManagerService,
    NetworkController,
    VirtualizationController,
    Host,
    Other(String),
}

impl ComponentKind {
    pub fn from_type(value: &str) -> Self {
        match value.to_uppercase().as_str() {
            "SDDC_MANAGER" | "SDDC_MANAGER_VCF" => Self::ManagerService,
            "NSX_T_MANAGER" | "NSXT_MANAGER" | "NSX_MANAGER" => Self::NetworkController,
            "VCENTER" => Self::VirtualizationController,
            "HOST" | "ESX_HOST" | "ESXI" => Self::Host,
            _ => Self::Other(value.to_string()),
        }
    }

    /// Submission order within one pass: manager service first.
    pub const fn precedence(&self) -> u8 {
        match self {
            Self::ManagerService => 0,
            Self::NetworkController => 1,
            Self::VirtualizationController => 2,
            Self::Other(_) => 3,
            Self::Host => 4,
        }
    }

    pub const fn is_host(&self) -> bool {
        matches!(self, Self::Host)
    }

    /// Connection loss is expected while the manager service upgrades itself.
    pub const fn tolerates_unreachable(&self) -> bool {
        matches!(self, Self::ManagerService)
    }

    pub const fn timeout(&self, timings: &UpgradeTimings) -> Duration {
        match self {
            Self::ManagerService => timings.manager_upgrade_timeout,
            Self::NetworkController => timings.network_upgrade_timeout,
            Self::VirtualizationController => timings.virtualization_upgrade_timeout,
            Self::Host | Self::Other(_) => timings.other_upgrade_timeout,
        }
    }

    /// Build the upgrade submission for a bundle of this kind.
    pub fn build_request(
        &self,
        domain_id: &str,
        bundle_id: &str,
        resource_ids: &BTreeMap<String, Vec<String>>,
    ) -> Result<UpgradeRequest, VuoError> {
        let mut request = UpgradeRequest {
            bundle_id: bundle_id.to_string(),
            resource_type: DOMAIN_RESOURCE_TYPE.to_string(),
            resource_upgrade_specs: vec![ResourceUpgradeSpec {
                resource_id: domain_id.to_string(),
                upgrade_now: true,
            }],
            nsxt_upgrade_user_input_specs: Vec::new(),
        };

        if *self == Self::NetworkController {
            let nsxt_id = NETWORK_RESOURCE_TYPES
                .iter()
                .find_map(|t| resource_ids.get(*t).and_then(|ids| ids.first()))
                .ok_or_else(|| {
                    VuoError::Validation(
                        "no network controller resource found in precheck results".into(),
                    )
                })?;
            let clusters: Vec<_> = resource_ids
                .get(CLUSTER_RESOURCE_TYPE)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .map(|id| {
                    json!({
                        "hostClusterId": id,
                        "liveUpgrade": false,
                        "hostParallelUpgrade": false,
                    })
                })
                .collect();
            request.nsxt_upgrade_user_input_specs.push(json!({
                "nsxtId": nsxt_id,
                "nsxtHostClusterUpgradeSpecs": clusters,
                "nsxtUpgradeOptions": {
                    "isEdgeOnlyUpgrade": false,
                    "isHostClustersUpgradeParallel": true,
                    "isEdgeClustersUpgradeParallel": true,
                },
            }));
        }
        Ok(request)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManagerService => write!(f, "SDDC Manager"),
            Self::NetworkController => write!(f, "NSX"),
            Self::VirtualizationController => write!(f, "vCenter"),
            Self::Host => write!(f, "ESXi host"),
            Self::Other(t) => write!(f, "{t}"),
        }
    }
}

/// Upgrade every non-host component until nothing remains.
pub async fn upgrade_all(ctx: &RunContext, target_version: &str) -> Result<(), VuoError> {
    ctx.transition(
        UpgradePhase::StartingUpgrades,
        Severity::Info,
        &format!("Starting component upgrades to {target_version}"),
    );

    let resource_ids = ctx.resource_ids();
    // Bounds the time spent waiting with nothing submittable.
    let mut ceiling = Deadline::after(ctx.timings.upgrade_loop_ceiling);
    let mut submitted: HashSet<String> = HashSet::new();
    let mut skipped_hosts: HashSet<String> = HashSet::new();

    loop {
        ctx.check_cancelled()?;
        let items = ctx
            .api
            .list_upgradables(&ctx.domain_id, target_version)
            .await?;

        let mut remaining = 0usize;
        let mut next: Option<(ComponentKind, &UpgradableItem)> = None;
        for item in &items {
            if item.status == UpgradableStatus::Completed {
                continue;
            }
            let kind = ComponentKind::from_type(item.component_type());
            if kind.is_host() {
                if skipped_hosts.insert(item.bundle_id.clone()) {
                    ctx.info(&format!(
                        "Skipping ESXi host bundle {}: host upgrades are not automated",
                        item.bundle_id
                    ));
                }
                continue;
            }
            remaining += 1;

            let ready = item.status == UpgradableStatus::Available
                && !submitted.contains(&item.bundle_id);
            if ready && next.as_ref().is_none_or(|(k, _)| kind.precedence() < k.precedence()) {
                next = Some((kind, item));
            }
        }

        if remaining == 0 {
            ctx.log(Severity::Success, "All components upgraded");
            return Ok(());
        }

        if let Some((kind, item)) = next {
            upgrade_component(ctx, &kind, &item.bundle_id, &resource_ids).await?;
            submitted.insert(item.bundle_id.clone());
            ceiling = Deadline::after(ctx.timings.upgrade_loop_ceiling);
            continue;
        }

        if ceiling.expired() {
            ctx.log(
                Severity::Error,
                &format!(
                    "{remaining} component(s) still pending after {} minutes",
                    ceiling.minutes()
                ),
            );
            return Err(ceiling.timeout("Component upgrades"));
        }
        debug!(domain = %ctx.domain_id, remaining, "Waiting for upgradable components");
        ctx.poll_wait().await?;
    }
}

async fn upgrade_component(
    ctx: &RunContext,
    kind: &ComponentKind,
    bundle_id: &str,
    resource_ids: &BTreeMap<String, Vec<String>>,
) -> Result<(), VuoError> {
    ctx.info(&format!("Upgrading {kind} with bundle {bundle_id}"));
    let request = kind.build_request(&ctx.domain_id, bundle_id, resource_ids)?;

    let task = match ctx.api.submit_upgrade(&request).await {
        Ok(task) => task,
        Err(e) if e.is_conflict_tolerable() => {
            ctx.info(&format!(
                "{kind} upgrade with bundle {bundle_id} already in progress or done ({e})"
            ));
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    ctx.info(&format!("{kind} upgrade {} submitted", task.id));

    monitor_upgrade(ctx, kind, &task.id).await?;
    ctx.log(Severity::Success, &format!("{kind} upgraded"));
    Ok(())
}

/// Poll one upgrade to a terminal status within the component's envelope.
///
/// For the manager service, unreachable errors start an outage window
/// bounded by `manager_unreachable_ceiling`; the envelope is not enforced
/// while the API is down.
async fn monitor_upgrade(
    ctx: &RunContext,
    kind: &ComponentKind,
    upgrade_id: &str,
) -> Result<(), VuoError> {
    let deadline = Deadline::after(kind.timeout(&ctx.timings));
    let mut outage: Option<Deadline> = None;

    loop {
        ctx.poll_wait().await?;

        match ctx.api.upgrade_status(upgrade_id).await {
            Ok(task) => {
                if outage.take().is_some() {
                    ctx.info("API reachable again");
                }
                match TaskStatus::parse(&task.status) {
                    TaskStatus::Succeeded => return Ok(()),
                    TaskStatus::Failed(status) => {
                        return Err(VuoError::Validation(format!(
                            "{kind} upgrade {upgrade_id} ended with status {status}"
                        )));
                    }
                    TaskStatus::Running | TaskStatus::Unknown(_) => {}
                }
                if deadline.expired() {
                    ctx.log(
                        Severity::Error,
                        &format!(
                            "{kind} upgrade {upgrade_id} still {} after {} minutes",
                            task.status,
                            deadline.minutes()
                        ),
                    );
                    return Err(deadline.timeout(format!("{kind} upgrade")));
                }
            }
            Err(e) if kind.tolerates_unreachable() && e.is_unreachable() => {
                let window = *outage.get_or_insert_with(|| {
                    ctx.warn(&format!(
                        "API unreachable during {kind} upgrade, upgrade possibly still in progress ({e})"
                    ));
                    Deadline::after(ctx.timings.manager_unreachable_ceiling)
                });
                if window.expired() {
                    return Err(VuoError::TransientUnavailable(format!(
                        "API unreachable for {} minutes during {kind} upgrade",
                        window.minutes()
                    )));
                }
            }
            Err(e) => return Err(e),
        }
    }
}
