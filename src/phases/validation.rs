//! Final validation phase.

use crate::api::types::{TaskStatus, ValidationTask};
use crate::error::VuoError;
use crate::model::Version;
use crate::orchestrator::context::{Deadline, RunContext};
use crate::state::{Severity, UpgradePhase};

pub async fn final_validation(ctx: &RunContext, target_version: &str) -> Result<(), VuoError> {
    ctx.transition(
        UpgradePhase::FinalValidation,
        Severity::Info,
        &format!("Running final validation for {target_version}"),
    );

    let mut task = ctx
        .api
        .submit_validation(&ctx.domain_id, target_version)
        .await?;
    let validation_id = task.id.clone();
    ctx.info(&format!("Validation {validation_id} submitted"));

    let deadline = Deadline::after(ctx.timings.validation_timeout);
    while !is_finished(&task) {
        if deadline.expired() {
            ctx.log(
                Severity::Error,
                &format!(
                    "Final validation timed out after {} minutes",
                    deadline.minutes()
                ),
            );
            return Err(deadline.timeout("Final validation"));
        }
        ctx.poll_wait().await?;
        task = ctx.api.validation_status(&validation_id).await?;
    }

    let execution = task.execution_status.as_deref().unwrap_or_default();
    let result = task
        .result_status
        .as_deref()
        .unwrap_or_default()
        .to_uppercase();
    if matches!(TaskStatus::parse(execution), TaskStatus::Failed(_))
        || matches!(result.as_str(), "FAILED" | "FAILURE" | "ERROR")
    {
        return Err(VuoError::Validation(format!(
            "final validation {validation_id} failed (execution {execution}, result {result})"
        )));
    }
    if result == "WARNING" {
        ctx.warn("Final validation completed with warnings");
    } else {
        ctx.info("Final validation passed");
    }

    verify_version(ctx, target_version).await;
    Ok(())
}

fn is_finished(task: &ValidationTask) -> bool {
    task.execution_status
        .as_deref()
        .is_some_and(|s| TaskStatus::parse(s).is_terminal())
}

/// Compare the domain's reported version with the target. Host upgrades
/// are skipped, so a mismatch is reported but never fails the run.
async fn verify_version(ctx: &RunContext, target_version: &str) {
    match ctx.api.current_version(&ctx.domain_id).await {
        Ok(Some(reported)) => {
            let matches = match (Version::parse(&reported), Version::parse(target_version)) {
                (Ok(a), Ok(b)) => a == b,
                _ => reported == target_version,
            };
            if matches {
                ctx.info(&format!("Domain reports version {reported}"));
            } else {
                ctx.warn(&format!(
                    "Domain reports version {reported}, expected {target_version}"
                ));
            }
        }
        Ok(None) => ctx.warn("Domain version could not be confirmed"),
        Err(e) => ctx.warn(&format!("Domain version could not be confirmed: {e}")),
    }
}
