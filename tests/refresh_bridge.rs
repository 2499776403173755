//! Refresh bridge over HTTP against a mocked VCF API.

use std::collections::HashSet;
use std::sync::Arc;

use secrecy::SecretString;
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vuo::model::UpdateStatus;
use vuo::refresh::CapacityLevel;
use vuo::{ApiClient, Config, MemoryTokenStore, RefreshCache, Refresher, UpgradeTimings, VcfApi};

fn config(base_url: &str) -> Config {
    Config {
        base_url: base_url.to_string(),
        username: "admin@local".to_string(),
        password: SecretString::from("secret"),
        request_timeout: 5,
        listen_port: 0,
        refresh_interval: 300,
        capacity_interval: 900,
        ignore_alerts_domains: HashSet::new(),
        timings: UpgradeTimings::default(),
    }
}

fn api(server: &MockServer) -> Arc<dyn VcfApi> {
    Arc::new(ApiClient::new(&config(&server.uri()), Arc::new(MemoryTokenStore::new())).unwrap())
}

async fn mount_get(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("Authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mock_vcf() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/tokens"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "token-1"})))
        .expect(1)
        .mount(&server)
        .await;

    mount_get(
        &server,
        "/v1/domains",
        json!({"elements": [
            {"id": "d-mgmt", "name": "mgmt", "status": "ACTIVE", "clusters": [{"id": "c-1"}]},
            {"id": "d-wld", "name": "wld01", "status": "ACTIVE"},
            {"id": "d-old", "name": "retired", "status": "ERROR"}
        ]}),
    )
    .await;
    mount_get(
        &server,
        "/v1/sddc-managers",
        json!({"elements": [
            {"id": "m-1", "fqdn": "sddc.local", "version": "5.2.0.0-24108943", "domain": {"id": "d-mgmt"}}
        ]}),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/v1/releases"))
        .and(query_param("domainId", "d-mgmt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"elements": [{"version": "5.2.0.0-24108943"}]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/releases"))
        .and(query_param("domainId", "d-wld"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"elements": []})))
        .mount(&server)
        .await;

    mount_get(
        &server,
        "/v1/releases/domains/d-mgmt/future-releases",
        json!({"elements": [
            {
                "version": "5.2.1.0",
                "applicabilityStatus": "APPLICABLE",
                "isApplicable": true,
                "minCompatibleVcfVersion": "5.2.0.0",
                "patchBundles": [{"bundleId": "b-1"}]
            },
            {
                "version": "5.3.0.0",
                "applicabilityStatus": "APPLICABLE",
                "isApplicable": true,
                "minCompatibleVcfVersion": "5.2.1.0"
            }
        ]}),
    )
    .await;
    mount_get(
        &server,
        "/v1/releases/domains/d-wld/future-releases",
        json!({"elements": []}),
    )
    .await;

    mount_get(
        &server,
        "/v1/clusters",
        json!({"elements": [{"id": "c-1", "name": "mgmt-cl01"}]}),
    )
    .await;
    mount_get(
        &server,
        "/v1/hosts",
        json!({"elements": [
            {
                "id": "h-1",
                "fqdn": "esx01.local",
                "cluster": {"id": "c-1"},
                "cpu": {"usedFrequencyMHz": 1000, "frequencyMHz": 4000},
                "memory": {"usedCapacityMB": 512, "totalCapacityMB": 2048},
                "storage": {"usedCapacityMB": 100, "totalCapacityMB": 1000}
            },
            {
                "id": "h-2",
                "fqdn": "esx02.local",
                "cluster": {"id": "c-1"},
                "cpu": {"usedFrequencyMHz": 500, "frequencyMHz": 4000},
                "memory": {"usedCapacityMB": 256, "totalCapacityMB": 2048}
            }
        ]}),
    )
    .await;
    server
}

#[tokio::test]
async fn test_refresh_summarizes_active_domains() {
    let server = mock_vcf().await;
    let snapshot = vuo::refresh(api(&server).as_ref()).await.unwrap();

    let ids: Vec<_> = snapshot.domains.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["d-mgmt", "d-wld"]);
    assert_eq!(snapshot.domains[0].prefix, "domain1");
    assert_eq!(snapshot.domains[1].prefix, "domain2");

    let mgmt = &snapshot.domain_updates["d-mgmt"];
    assert_eq!(mgmt.status, UpdateStatus::UpdatesAvailable);
    assert_eq!(mgmt.current_version.as_deref(), Some("5.2.0.0"));
    let next = mgmt.next_release.as_ref().unwrap();
    assert_eq!(next.version, "5.2.1.0");
    assert_eq!(next.bundle_ids, vec!["b-1".to_string()]);

    // No installed release and no manager: the version is unknown.
    let wld = &snapshot.domain_updates["d-wld"];
    assert_eq!(wld.status, UpdateStatus::Error);
    assert!(wld.error.is_some());
}

#[tokio::test]
async fn test_refresher_caches_updates_and_capacity() {
    let server = mock_vcf().await;
    let refresher = Refresher::new(api(&server), RefreshCache::default(), None);
    assert!(refresher.cache().updates().is_none());

    let first = refresher.refresh_updates().await.unwrap();
    let second = refresher.refresh_updates().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(refresher.cache().updates(), Some(second));

    let rows = refresher.refresh_capacity().await.unwrap();
    assert_eq!(refresher.cache().capacity().as_deref(), Some(rows.as_slice()));

    let levels: Vec<_> = rows.iter().map(|r| r.level).collect();
    assert_eq!(
        levels,
        vec![
            CapacityLevel::Domain,
            CapacityLevel::Cluster,
            CapacityLevel::Host,
            CapacityLevel::Host,
            CapacityLevel::Domain,
        ]
    );
    let domain = &rows[0];
    assert_eq!(domain.domain_id, "d-mgmt");
    assert!((domain.cpu.used - 1500.0).abs() < f64::EPSILON);
    assert!((domain.memory.total - 4096.0).abs() < f64::EPSILON);
    assert!((domain.storage.total - 1000.0).abs() < f64::EPSILON);
    assert_eq!(rows[3].name, "esx02.local");
    assert_eq!(rows[4].domain_id, "d-wld");
}

#[tokio::test]
async fn test_refresh_fails_when_domains_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/tokens"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "token-1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/domains"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let refresher = Refresher::new(api(&server), RefreshCache::default(), None);
    let err = refresher.refresh_updates().await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(refresher.cache().updates().is_none());
}
