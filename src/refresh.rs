//! Refresh bridge: periodic discovery of domains, update summaries and
//! capacity.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::VcfApi;
use crate::api::types::{ClusterRecord, DomainRecord, HostRecord, SddcManagerRecord};
use crate::error::VuoError;
use crate::metrics::Metrics;
use crate::model::{Domain, ManagerRef, Release, UpdateSummary, Version, select_next_release};

/// Result of one update refresh pass.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSnapshot {
    pub domains: Vec<Domain>,
    pub domain_updates: BTreeMap<String, UpdateSummary>,
}

/// Discover active domains and summarize the next available update of each.
///
/// A failing domain gets an `error` summary; the pass continues.
pub async fn refresh(api: &dyn VcfApi) -> Result<RefreshSnapshot, VuoError> {
    let records = api.list_domains().await?;
    let managers = api.list_sddc_managers().await.unwrap_or_else(|e| {
        warn!("Failed to list SDDC managers: {}", e);
        Vec::new()
    });

    let mut domains = discover(&records, &managers);
    let results = join_all(domains.iter().map(|d| evaluate(api, d))).await;

    let mut domain_updates = BTreeMap::new();
    for (domain, result) in domains.iter_mut().zip(results) {
        let summary = match result {
            Ok((current, next)) => {
                domain.current_version = Some(current);
                domain.next_release = next;
                domain.to_summary()
            }
            Err(e) => {
                warn!(domain = %domain.id, "Failed to refresh domain: {}", e);
                UpdateSummary::error(domain.current_version.clone(), e.to_string())
            }
        };
        domain_updates.insert(domain.id.clone(), summary);
    }

    Ok(RefreshSnapshot {
        domains,
        domain_updates,
    })
}

/// Active domains in API order with prefixes and manager references.
fn discover(records: &[DomainRecord], managers: &[SddcManagerRecord]) -> Vec<Domain> {
    let by_domain: HashMap<&str, &SddcManagerRecord> = managers
        .iter()
        .filter_map(|m| m.domain.as_ref().map(|d| (d.id.as_str(), m)))
        .collect();

    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| r.is_active())
        .filter(|r| seen.insert(r.id.as_str()))
        .enumerate()
        .map(|(index, record)| {
            let mut domain = Domain::from_record(record, index);
            domain.manager = by_domain.get(record.id.as_str()).map(|m| ManagerRef::from(*m));
            domain
        })
        .collect()
}

/// Current version (build suffix stripped) and next release of one domain.
async fn evaluate(
    api: &dyn VcfApi,
    domain: &Domain,
) -> Result<(String, Option<Release>), VuoError> {
    let (current, releases) = futures::join!(
        api.current_version(&domain.id),
        api.future_releases(&domain.id)
    );

    let raw = current?
        .or_else(|| domain.manager.as_ref().and_then(|m| m.version.clone()))
        .ok_or_else(|| {
            VuoError::Decode(format!("no current release reported for domain {}", domain.id))
        })?;
    let version = Version::parse(&raw)?;
    let releases = releases?;
    let next = select_next_release(&version, &releases).cloned();

    let current = raw.split('-').next().unwrap_or(&raw).trim().to_string();
    Ok((current, next))
}

/// Used/total pair of one utilization metric.
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct Metric {
    pub used: f64,
    pub total: f64,
}

impl Metric {
    fn add(self, other: Self) -> Self {
        Self {
            used: self.used + other.used,
            total: self.total + other.total,
        }
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CapacityLevel {
    Domain,
    Cluster,
    Host,
}

/// One flattened utilization row. CPU is in MHz, memory and storage in MB.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapacityRow {
    pub level: CapacityLevel,
    pub domain_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    pub name: String,
    pub cpu: Metric,
    pub memory: Metric,
    pub storage: Metric,
}

#[derive(Default, Clone, Copy)]
struct Usage {
    cpu: Metric,
    memory: Metric,
    storage: Metric,
}

impl Usage {
    fn of_host(host: &HostRecord) -> Self {
        let capacity = |c: Option<&crate::api::types::HostCapacity>| {
            c.map(|c| Metric {
                used: c.used_mb,
                total: c.total_mb,
            })
            .unwrap_or_default()
        };
        Self {
            cpu: host
                .cpu
                .as_ref()
                .map(|c| Metric {
                    used: c.used_mhz,
                    total: c.total_mhz,
                })
                .unwrap_or_default(),
            memory: capacity(host.memory.as_ref()),
            storage: capacity(host.storage.as_ref()),
        }
    }

    fn add(self, other: Self) -> Self {
        Self {
            cpu: self.cpu.add(other.cpu),
            memory: self.memory.add(other.memory),
            storage: self.storage.add(other.storage),
        }
    }
}

/// Utilization of active domains, their clusters and hosts, aggregated
/// bottom-up and flattened: each domain row is followed by its cluster
/// rows, each cluster row by its host rows.
pub async fn refresh_capacity(api: &dyn VcfApi) -> Result<Vec<CapacityRow>, VuoError> {
    let (domains, clusters, hosts) =
        futures::try_join!(api.list_domains(), api.list_clusters(), api.list_hosts())?;
    Ok(flatten_capacity(&domains, &clusters, &hosts))
}

fn flatten_capacity(
    domains: &[DomainRecord],
    clusters: &[ClusterRecord],
    hosts: &[HostRecord],
) -> Vec<CapacityRow> {
    let row = |level, domain_id: &str, cluster_id: Option<&str>, host_id: Option<&str>, name: &str, usage: Usage| CapacityRow {
        level,
        domain_id: domain_id.to_string(),
        cluster_id: cluster_id.map(ToString::to_string),
        host_id: host_id.map(ToString::to_string),
        name: name.to_string(),
        cpu: usage.cpu,
        memory: usage.memory,
        storage: usage.storage,
    };

    let mut rows = Vec::new();
    for domain in domains.iter().filter(|d| d.is_active()) {
        let domain_clusters: Vec<&ClusterRecord> = clusters
            .iter()
            .filter(|c| {
                c.domain.as_ref().is_some_and(|d| d.id == domain.id)
                    || domain.clusters.iter().any(|r| r.id == c.id)
            })
            .collect();

        let mut cluster_rows = Vec::new();
        let mut domain_usage = Usage::default();
        for cluster in &domain_clusters {
            let cluster_hosts: Vec<&HostRecord> = hosts
                .iter()
                .filter(|h| h.cluster.as_ref().is_some_and(|c| c.id == cluster.id))
                .collect();
            let usage = cluster_hosts
                .iter()
                .fold(Usage::default(), |acc, h| acc.add(Usage::of_host(h)));
            domain_usage = domain_usage.add(usage);

            let name = if cluster.name.is_empty() {
                &cluster.id
            } else {
                &cluster.name
            };
            cluster_rows.push(row(
                CapacityLevel::Cluster,
                &domain.id,
                Some(&cluster.id),
                None,
                name,
                usage,
            ));
            for host in cluster_hosts {
                cluster_rows.push(row(
                    CapacityLevel::Host,
                    &domain.id,
                    Some(&cluster.id),
                    Some(&host.id),
                    host.fqdn.as_deref().unwrap_or(&host.id),
                    Usage::of_host(host),
                ));
            }
        }

        rows.push(row(
            CapacityLevel::Domain,
            &domain.id,
            None,
            None,
            &domain.name,
            domain_usage,
        ));
        rows.extend(cluster_rows);
    }
    rows
}

/// Latest refresh results, shared with the HTTP surface.
#[derive(Clone, Default)]
pub struct RefreshCache {
    updates: Arc<RwLock<Option<RefreshSnapshot>>>,
    capacity: Arc<RwLock<Option<Vec<CapacityRow>>>>,
}

impl RefreshCache {
    pub fn updates(&self) -> Option<RefreshSnapshot> {
        self.updates.read().clone()
    }

    pub fn capacity(&self) -> Option<Vec<CapacityRow>> {
        self.capacity.read().clone()
    }

    pub fn has_updates(&self) -> bool {
        self.updates.read().is_some()
    }
}

/// Runs refresh passes, records their metrics and stores their results.
#[derive(Clone)]
pub struct Refresher {
    api: Arc<dyn VcfApi>,
    cache: RefreshCache,
    metrics: Option<Arc<Metrics>>,
}

impl Refresher {
    pub fn new(api: Arc<dyn VcfApi>, cache: RefreshCache, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            api,
            cache,
            metrics,
        }
    }

    pub const fn cache(&self) -> &RefreshCache {
        &self.cache
    }

    pub async fn refresh_updates(&self) -> Result<RefreshSnapshot, VuoError> {
        let started = Instant::now();
        let result = refresh(self.api.as_ref()).await;
        self.record("updates", result.is_ok(), started);
        let snapshot = result?;
        info!(
            domains = snapshot.domains.len(),
            "Refreshed domain update summaries"
        );
        *self.cache.updates.write() = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn refresh_capacity(&self) -> Result<Vec<CapacityRow>, VuoError> {
        let started = Instant::now();
        let result = refresh_capacity(self.api.as_ref()).await;
        self.record("capacity", result.is_ok(), started);
        let rows = result?;
        info!(rows = rows.len(), "Refreshed capacity");
        *self.cache.capacity.write() = Some(rows.clone());
        Ok(rows)
    }

    fn record(&self, kind: &str, ok: bool, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_refresh(kind, ok, started.elapsed().as_secs_f64());
        }
    }

    /// Refresh updates and capacity on their own intervals until cancelled.
    /// Failures are logged and retried on the next tick.
    pub async fn run(self, updates_every: Duration, capacity_every: Duration, cancel: CancellationToken) {
        let mut updates = tokio::time::interval(updates_every);
        let mut capacity = tokio::time::interval(capacity_every);
        updates.set_missed_tick_behavior(MissedTickBehavior::Delay);
        capacity.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Refresh loop stopped");
                    return;
                }
                _ = updates.tick() => {
                    if let Err(e) = self.refresh_updates().await {
                        report_failure("Update", &e);
                    }
                }
                _ = capacity.tick() => {
                    if let Err(e) = self.refresh_capacity().await {
                        report_failure("Capacity", &e);
                    }
                }
            }
        }
    }
}

/// Transient failures are retried on the next tick and only warned about.
fn report_failure(kind: &str, e: &VuoError) {
    if e.is_transient() {
        warn!("{} refresh failed, retrying next interval: {}", kind, e);
    } else {
        error!("{} refresh failed: {}", kind, e);
    }
}
