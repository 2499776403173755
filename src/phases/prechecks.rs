//! Precheck phase: query, run, monitor and gate on findings.

use std::collections::BTreeMap;

use crate::api::types::{PrecheckResource, PrecheckStatus, TaskStatus, ValidationSummary};
use crate::error::VuoError;
use crate::orchestrator::context::{Deadline, RunContext};
use crate::state::{Severity, UpgradePhase};

/// Error and warning totals of a precheck run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Findings {
    pub errors: u64,
    pub warnings: u64,
}

impl Findings {
    /// Sum findings over a summary tree.
    ///
    /// errors = errorValidationsCount + criticalGapsCount,
    /// warnings = warningValidationsCount + warningGapsCount.
    pub fn count(summaries: &[ValidationSummary]) -> Self {
        summaries.iter().fold(Self::default(), |acc, summary| {
            let nested = Self::count(&summary.sub_resources);
            Self {
                errors: acc.errors
                    + summary.error_validations_count
                    + summary.critical_gaps_count
                    + nested.errors,
                warnings: acc.warnings
                    + summary.warning_validations_count
                    + summary.warning_gaps_count
                    + nested.warnings,
            }
        })
    }

    pub fn from_status(status: &PrecheckStatus) -> Self {
        status
            .presented_artifacts_map
            .as_ref()
            .map(|artifacts| Self::count(&artifacts.domain_summaries))
            .unwrap_or_default()
    }
}

/// Group precheck resources by type: type -> resource ids.
pub fn resource_map(resources: &[PrecheckResource]) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for resource in resources {
        let ids = map.entry(resource.resource_type.to_uppercase()).or_default();
        if !ids.contains(&resource.resource_id) {
            ids.push(resource.resource_id.clone());
        }
    }
    map
}

pub async fn run_prechecks(ctx: &RunContext, target_version: &str) -> Result<(), VuoError> {
    ctx.transition(
        UpgradePhase::InitializingPrechecks,
        Severity::Info,
        &format!("Initializing prechecks for {target_version}"),
    );

    let query = ctx
        .api
        .create_precheck_query(&ctx.domain_id, target_version)
        .await?;
    let resource_ids = resource_map(&query.resources);
    ctx.info(&format!(
        "Precheck query {} returned {} resource(s) of {} type(s)",
        query.query_id,
        query.resources.len(),
        resource_ids.len()
    ));
    ctx.set_resource_ids(resource_ids);

    let run = ctx.api.start_precheck(&query, target_version).await?;
    ctx.transition(
        UpgradePhase::RunningPrechecks,
        Severity::Info,
        &format!("Precheck run {} started", run.id),
    );

    let status = monitor(ctx, &run.id).await?;
    let findings = Findings::from_status(&status);
    ctx.transition(
        UpgradePhase::PrechecksDone,
        Severity::Info,
        &format!(
            "Prechecks finished with status {}: {} error(s), {} warning(s)",
            status.status, findings.errors, findings.warnings
        ),
    );

    gate(ctx, &status, findings).await
}

/// Poll the run until it is terminal or the precheck envelope elapses.
async fn monitor(ctx: &RunContext, run_id: &str) -> Result<PrecheckStatus, VuoError> {
    let deadline = Deadline::after(ctx.timings.precheck_timeout);
    loop {
        ctx.poll_wait().await?;

        let status = ctx.api.precheck_status(run_id).await?;
        if TaskStatus::parse(&status.status).is_terminal() {
            return Ok(status);
        }

        if deadline.expired() {
            ctx.log(
                Severity::Error,
                &format!(
                    "Prechecks timed out after {} minutes (last status {})",
                    deadline.minutes(),
                    status.status
                ),
            );
            return Err(deadline.timeout("Prechecks"));
        }
    }
}

async fn gate(ctx: &RunContext, status: &PrecheckStatus, findings: Findings) -> Result<(), VuoError> {
    if findings.errors > 0 {
        return Err(VuoError::Validation(format!(
            "prechecks reported {} error(s) and {} warning(s)",
            findings.errors, findings.warnings
        )));
    }
    if let TaskStatus::Failed(remote) = TaskStatus::parse(&status.status) {
        return Err(VuoError::Validation(format!(
            "precheck run ended with status {remote}"
        )));
    }
    if findings.warnings == 0 {
        ctx.log(Severity::Success, "Prechecks passed without findings");
        return Ok(());
    }
    if ctx.ignore_alerts() {
        ctx.warn(&format!(
            "Continuing despite {} precheck warning(s): alerts are ignored for this domain",
            findings.warnings
        ));
        return Ok(());
    }

    ctx.enter_wait(&format!(
        "Prechecks reported {} warning(s); waiting for acknowledgment",
        findings.warnings
    ));
    let released_by = loop {
        ctx.sleep(ctx.timings.ack_poll_interval).await?;
        if ctx.take_acknowledgement() {
            break "Precheck warnings acknowledged";
        }
        if ctx.ignore_alerts() {
            break "Alerts are now ignored for this domain; continuing without acknowledgment";
        }
    };
    ctx.transition(
        UpgradePhase::AlertsWereAcknowledged,
        Severity::Info,
        released_by,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summaries(value: serde_json::Value) -> Vec<ValidationSummary> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_count_flat() {
        let s = summaries(json!([
            {"warningGapsCount": 2, "criticalGapsCount": 0}
        ]));
        assert_eq!(
            Findings::count(&s),
            Findings {
                errors: 0,
                warnings: 2
            }
        );
    }

    #[test]
    fn test_count_nested() {
        let s = summaries(json!([{
            "name": "domain",
            "errorValidationsCount": 1,
            "subResources": [
                {"warningValidationsCount": 3, "subResources": [{"criticalGapsCount": 2}]},
                {"warningGapsCount": 1}
            ]
        }]));
        assert_eq!(
            Findings::count(&s),
            Findings {
                errors: 3,
                warnings: 4
            }
        );
    }

    #[test]
    fn test_count_empty() {
        assert_eq!(Findings::count(&[]), Findings::default());
        let status: PrecheckStatus = serde_json::from_value(json!({"status": "COMPLETED"})).unwrap();
        assert_eq!(Findings::from_status(&status), Findings::default());
    }

    #[test]
    fn test_resource_map_groups_by_type() {
        let resources: Vec<PrecheckResource> = serde_json::from_value(json!([
            {"resourceId": "vc-1", "resourceType": "VCENTER"},
            {"resourceId": "nsx-1", "resourceType": "nsxt_manager"},
            {"resourceId": "cl-1", "resourceType": "CLUSTER"},
            {"resourceId": "cl-2", "resourceType": "CLUSTER"},
            {"resourceId": "cl-1", "resourceType": "CLUSTER"}
        ]))
        .unwrap();

        let map = resource_map(&resources);
        assert_eq!(map["VCENTER"], vec!["vc-1"]);
        assert_eq!(map["NSXT_MANAGER"], vec!["nsx-1"]);
        assert_eq!(map["CLUSTER"], vec!["cl-1", "cl-2"]);
    }
}
