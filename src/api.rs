//! VCF automation API: HTTP client, token storage, and typed endpoints.

pub mod client;
pub mod token;
pub mod types;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

pub use client::ApiClient;
pub use token::{MemoryTokenStore, StoredToken, TokenStore};

use crate::error::VuoError;
use crate::model::Release;
use types::{
    Bundle, ClusterRecord, DomainRecord, HostRecord, Page, PrecheckQuery, PrecheckRun,
    PrecheckStatus, ReleaseRecord, SddcManagerRecord, UpgradableItem, UpgradeRequest, UpgradeTask,
    ValidationTask,
};

/// Typed operations against the VCF automation API.
///
/// The orchestrator and the refresh bridge depend only on this trait.
#[async_trait]
pub trait VcfApi: Send + Sync {
    async fn list_domains(&self) -> Result<Vec<DomainRecord>, VuoError>;

    async fn list_sddc_managers(&self) -> Result<Vec<SddcManagerRecord>, VuoError>;

    /// Version of the release currently installed on a domain.
    async fn current_version(&self, domain_id: &str) -> Result<Option<String>, VuoError>;

    async fn future_releases(&self, domain_id: &str) -> Result<Vec<Release>, VuoError>;

    async fn set_target_version(&self, domain_id: &str, version: &str) -> Result<(), VuoError>;

    async fn get_bundle(&self, bundle_id: &str) -> Result<Bundle, VuoError>;

    async fn download_bundle(&self, bundle_id: &str) -> Result<(), VuoError>;

    async fn create_precheck_query(
        &self,
        domain_id: &str,
        target_version: &str,
    ) -> Result<PrecheckQuery, VuoError>;

    async fn start_precheck(
        &self,
        query: &PrecheckQuery,
        target_version: &str,
    ) -> Result<PrecheckRun, VuoError>;

    async fn precheck_status(&self, run_id: &str) -> Result<PrecheckStatus, VuoError>;

    async fn list_upgradables(
        &self,
        domain_id: &str,
        target_version: &str,
    ) -> Result<Vec<UpgradableItem>, VuoError>;

    async fn submit_upgrade(&self, request: &UpgradeRequest) -> Result<UpgradeTask, VuoError>;

    async fn upgrade_status(&self, upgrade_id: &str) -> Result<UpgradeTask, VuoError>;

    async fn submit_validation(
        &self,
        domain_id: &str,
        target_version: &str,
    ) -> Result<ValidationTask, VuoError>;

    async fn validation_status(&self, validation_id: &str) -> Result<ValidationTask, VuoError>;

    async fn list_clusters(&self) -> Result<Vec<ClusterRecord>, VuoError>;

    async fn list_hosts(&self) -> Result<Vec<HostRecord>, VuoError>;
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, VuoError> {
    serde_json::from_value(value).map_err(|e| VuoError::Decode(e.to_string()))
}

fn elements<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, VuoError> {
    decode::<Page<T>>(value).map(|page| page.elements)
}

#[async_trait]
impl VcfApi for ApiClient {
    async fn list_domains(&self) -> Result<Vec<DomainRecord>, VuoError> {
        elements(self.get("/v1/domains", &[]).await?)
    }

    async fn list_sddc_managers(&self) -> Result<Vec<SddcManagerRecord>, VuoError> {
        elements(self.get("/v1/sddc-managers", &[]).await?)
    }

    async fn current_version(&self, domain_id: &str) -> Result<Option<String>, VuoError> {
        let releases: Vec<ReleaseRecord> =
            elements(self.get("/v1/releases", &[("domainId", domain_id)]).await?)?;
        Ok(releases.into_iter().next().map(|r| r.version))
    }

    async fn future_releases(&self, domain_id: &str) -> Result<Vec<Release>, VuoError> {
        let path = format!("/v1/releases/domains/{domain_id}/future-releases");
        elements(self.get(&path, &[]).await?)
    }

    async fn set_target_version(&self, domain_id: &str, version: &str) -> Result<(), VuoError> {
        let path = format!("/v1/releases/domains/{domain_id}");
        self.patch(&path, &json!({ "targetVersion": version }))
            .await?;
        Ok(())
    }

    async fn get_bundle(&self, bundle_id: &str) -> Result<Bundle, VuoError> {
        decode(self.get(&format!("/v1/bundles/{bundle_id}"), &[]).await?)
    }

    async fn download_bundle(&self, bundle_id: &str) -> Result<(), VuoError> {
        let body = json!({ "bundleDownloadSpec": { "downloadNow": true } });
        self.patch(&format!("/v1/bundles/{bundle_id}"), &body)
            .await?;
        Ok(())
    }

    async fn create_precheck_query(
        &self,
        domain_id: &str,
        target_version: &str,
    ) -> Result<PrecheckQuery, VuoError> {
        let body = json!({
            "checkSetType": "UPGRADE",
            "domains": [{ "domainId": domain_id }],
            "targetVersion": target_version,
        });
        decode(self.post("/v1/system/check-sets/queries", &body).await?)
    }

    async fn start_precheck(
        &self,
        query: &PrecheckQuery,
        target_version: &str,
    ) -> Result<PrecheckRun, VuoError> {
        let body = json!({
            "queryId": query.query_id,
            "resources": query.resources,
            "metadata": { "targetVersion": target_version },
        });
        decode(self.post("/v1/system/check-sets", &body).await?)
    }

    async fn precheck_status(&self, run_id: &str) -> Result<PrecheckStatus, VuoError> {
        decode(
            self.get(&format!("/v1/system/check-sets/{run_id}"), &[])
                .await?,
        )
    }

    async fn list_upgradables(
        &self,
        domain_id: &str,
        target_version: &str,
    ) -> Result<Vec<UpgradableItem>, VuoError> {
        let path = format!("/v1/upgradables/domains/{domain_id}");
        elements(
            self.get(&path, &[("targetVersion", target_version)])
                .await?,
        )
    }

    async fn submit_upgrade(&self, request: &UpgradeRequest) -> Result<UpgradeTask, VuoError> {
        let body = serde_json::to_value(request).map_err(|e| VuoError::Decode(e.to_string()))?;
        decode(self.post("/v1/upgrades", &body).await?)
    }

    async fn upgrade_status(&self, upgrade_id: &str) -> Result<UpgradeTask, VuoError> {
        decode(self.get(&format!("/v1/upgrades/{upgrade_id}"), &[]).await?)
    }

    async fn submit_validation(
        &self,
        domain_id: &str,
        target_version: &str,
    ) -> Result<ValidationTask, VuoError> {
        let path = format!("/v1/releases/domains/{domain_id}/validations");
        decode(
            self.post(&path, &json!({ "targetVersion": target_version }))
                .await?,
        )
    }

    async fn validation_status(&self, validation_id: &str) -> Result<ValidationTask, VuoError> {
        let path = format!("/v1/releases/domains/validations/{validation_id}");
        decode(self.get(&path, &[]).await?)
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterRecord>, VuoError> {
        elements(self.get("/v1/clusters", &[]).await?)
    }

    async fn list_hosts(&self) -> Result<Vec<HostRecord>, VuoError> {
        elements(self.get("/v1/hosts", &[]).await?)
    }
}
