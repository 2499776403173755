//! Version targeting phase.
//!
//! Selects the immediately next applicable release and records it as the
//! domain's target version on the remote side.

use tracing::info;

use crate::error::VuoError;
use crate::model::{Release, Version, select_next_release};
use crate::orchestrator::context::RunContext;
use crate::state::{Severity, UpgradePhase};

/// Resolve the release this run upgrades to.
pub async fn select_target(ctx: &RunContext) -> Result<Release, VuoError> {
    ctx.transition(
        UpgradePhase::VersionTargeting,
        Severity::Info,
        "Determining target version",
    );

    let raw = match ctx.api.current_version(&ctx.domain_id).await? {
        Some(raw) => raw,
        None => manager_version(ctx).await?,
    };
    let current = Version::parse(&raw)?;

    let releases = ctx.api.future_releases(&ctx.domain_id).await?;
    info!(
        domain = %ctx.domain_id,
        current = %current,
        candidates = releases.len(),
        "Evaluating future releases"
    );

    let release = select_next_release(&current, &releases)
        .cloned()
        .ok_or_else(|| {
            VuoError::NoApplicableRelease(format!(
                "no applicable release above {raw} among {} candidate(s)",
                releases.len()
            ))
        })?;

    ctx.set_target_version(&release.version);
    ctx.info(&format!(
        "Target version {} selected (current {raw})",
        release.version
    ));
    Ok(release)
}

/// Version of the SDDC Manager serving the domain, used when no installed
/// release is reported.
async fn manager_version(ctx: &RunContext) -> Result<String, VuoError> {
    let managers = ctx.api.list_sddc_managers().await?;
    let version = managers
        .into_iter()
        .find(|m| m.domain.as_ref().is_some_and(|d| d.id == ctx.domain_id))
        .and_then(|m| m.version)
        .ok_or_else(|| {
            VuoError::NoApplicableRelease(format!(
                "current version of domain {} is unknown",
                ctx.domain_id
            ))
        })?;
    ctx.info(&format!(
        "No installed release reported; using SDDC Manager version {version}"
    ));
    Ok(version)
}

/// Set the target version on the remote. Already-set is not an error.
pub async fn apply_target_version(ctx: &RunContext, release: &Release) -> Result<(), VuoError> {
    ctx.transition(
        UpgradePhase::SettingTargetVersion,
        Severity::Info,
        &format!("Setting target version {}", release.version),
    );

    match ctx
        .api
        .set_target_version(&ctx.domain_id, &release.version)
        .await
    {
        Ok(()) => ctx.info(&format!("Target version set to {}", release.version)),
        Err(e) if e.is_conflict_tolerable() => {
            ctx.info(&format!("Target version {} already set ({e})", release.version));
        }
        Err(e) => return Err(e),
    }
    Ok(())
}
