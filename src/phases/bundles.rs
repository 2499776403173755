//! Bundle download phase.
//!
//! Every bundle of the target release is downloaded concurrently. The phase
//! succeeds only when all of them report SUCCESSFUL.

use futures::future::join_all;
use tracing::debug;

use crate::api::types::DownloadStatus;
use crate::error::VuoError;
use crate::model::Release;
use crate::orchestrator::context::{Deadline, RunContext};
use crate::state::{Severity, UpgradePhase};

pub async fn download_all(ctx: &RunContext, release: &Release) -> Result<(), VuoError> {
    let bundle_ids = release.bundle_ids();
    ctx.transition(
        UpgradePhase::DownloadingBundles,
        Severity::Info,
        &format!(
            "Downloading {} bundle(s) for {}",
            bundle_ids.len(),
            release.version
        ),
    );

    if bundle_ids.is_empty() {
        ctx.info("Release lists no bundles to download");
        return Ok(());
    }

    let results = join_all(bundle_ids.iter().map(|id| download_one(ctx, id))).await;

    let mut failures = Vec::new();
    for (bundle_id, result) in bundle_ids.iter().zip(results) {
        match result {
            Ok(()) => {}
            Err(e @ VuoError::Cancelled(_)) => return Err(e),
            Err(e) => {
                ctx.log(
                    Severity::Error,
                    &format!("Bundle {bundle_id} download failed: {e}"),
                );
                failures.push(bundle_id.as_str());
            }
        }
    }

    if !failures.is_empty() {
        return Err(VuoError::Validation(format!(
            "{} of {} bundle download(s) failed: {}",
            failures.len(),
            bundle_ids.len(),
            failures.join(", ")
        )));
    }

    ctx.log(Severity::Success, "All bundles downloaded");
    Ok(())
}

async fn download_one(ctx: &RunContext, bundle_id: &str) -> Result<(), VuoError> {
    let bundle = ctx.api.get_bundle(bundle_id).await?;
    match bundle.download_status {
        DownloadStatus::Successful => {
            ctx.info(&format!("Bundle {bundle_id} already downloaded"));
            return Ok(());
        }
        DownloadStatus::Pending | DownloadStatus::InProgress => {
            ctx.info(&format!("Bundle {bundle_id} download already in progress"));
        }
        _ => match ctx.api.download_bundle(bundle_id).await {
            Ok(()) => ctx.info(&format!("Download of bundle {bundle_id} requested")),
            Err(e) if e.is_conflict_tolerable() => {
                ctx.info(&format!("Bundle {bundle_id} download already requested ({e})"));
            }
            Err(e) => return Err(e),
        },
    }

    let deadline = Deadline::after(ctx.timings.bundle_download_timeout);
    loop {
        ctx.poll_wait().await?;

        let bundle = ctx.api.get_bundle(bundle_id).await?;
        debug!(domain = %ctx.domain_id, bundle = bundle_id, status = ?bundle.download_status, "Polled bundle");
        match bundle.download_status {
            DownloadStatus::Successful => {
                ctx.info(&format!("Bundle {bundle_id} downloaded"));
                return Ok(());
            }
            DownloadStatus::Failed => {
                return Err(VuoError::Validation(format!(
                    "remote reported download of bundle {bundle_id} as FAILED"
                )));
            }
            _ => {}
        }

        if deadline.expired() {
            return Err(deadline.timeout(format!("Download of bundle {bundle_id}")));
        }
    }
}
