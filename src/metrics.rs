//! Prometheus metrics for vuo.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::state::UpgradePhase;

/// Labels for run-level metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DomainLabels {
    pub domain: String,
}

/// Labels for phase metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PhaseLabels {
    pub domain: String,
    pub phase: String,
}

/// Labels for refresh metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RefreshLabels {
    pub kind: String,
    pub result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RefreshKindLabels {
    pub kind: String,
}

pub struct Metrics {
    pub upgrade_started_total: Family<DomainLabels, Counter>,
    pub upgrade_completed_total: Family<DomainLabels, Counter>,
    pub upgrade_failed_total: Family<DomainLabels, Counter>,
    pub upgrade_phase_info: Family<PhaseLabels, Gauge>,
    pub phase_transition_total: Family<PhaseLabels, Counter>,
    pub phase_duration_seconds: Family<PhaseLabels, Histogram>,
    pub refresh_total: Family<RefreshLabels, Counter>,
    pub refresh_duration_seconds: Family<RefreshKindLabels, Histogram>,
    /// Phase each domain is in and when it was entered.
    current_phases: Mutex<HashMap<String, (UpgradePhase, Instant)>>,
}

const REFRESH_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Buckets for phase duration (1s to 4h): component upgrades run for hours.
const PHASE_DURATION_BUCKETS: &[f64] = &[
    1.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0, 14400.0,
];

impl Metrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let upgrade_started_total = Family::<DomainLabels, Counter>::default();
        registry.register(
            "vuo_upgrade_started",
            "Total number of upgrade runs started",
            upgrade_started_total.clone(),
        );

        let upgrade_completed_total = Family::<DomainLabels, Counter>::default();
        registry.register(
            "vuo_upgrade_completed",
            "Total number of upgrade runs that completed successfully",
            upgrade_completed_total.clone(),
        );

        let upgrade_failed_total = Family::<DomainLabels, Counter>::default();
        registry.register(
            "vuo_upgrade_failed",
            "Total number of upgrade runs that failed or were abandoned",
            upgrade_failed_total.clone(),
        );

        let upgrade_phase_info = Family::<PhaseLabels, Gauge>::default();
        registry.register(
            "vuo_upgrade_phase_info",
            "Current upgrade phase (1=active, 0=inactive)",
            upgrade_phase_info.clone(),
        );

        let phase_transition_total = Family::<PhaseLabels, Counter>::default();
        registry.register(
            "vuo_phase_transition",
            "Total number of phase transitions",
            phase_transition_total.clone(),
        );

        let phase_duration_seconds = Family::<PhaseLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(PHASE_DURATION_BUCKETS.iter().copied())
        });
        registry.register(
            "vuo_phase_duration_seconds",
            "Time spent in each upgrade phase in seconds",
            phase_duration_seconds.clone(),
        );

        let refresh_total = Family::<RefreshLabels, Counter>::default();
        registry.register(
            "vuo_refresh",
            "Total number of refresh passes",
            refresh_total.clone(),
        );

        let refresh_duration_seconds =
            Family::<RefreshKindLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(REFRESH_BUCKETS.iter().copied())
            });
        registry.register(
            "vuo_refresh_duration_seconds",
            "Duration of refresh passes in seconds",
            refresh_duration_seconds.clone(),
        );

        Self {
            upgrade_started_total,
            upgrade_completed_total,
            upgrade_failed_total,
            upgrade_phase_info,
            phase_transition_total,
            phase_duration_seconds,
            refresh_total,
            refresh_duration_seconds,
            current_phases: Mutex::new(HashMap::new()),
        }
    }

    fn domain(domain: &str) -> DomainLabels {
        DomainLabels {
            domain: domain.to_string(),
        }
    }

    fn phase(domain: &str, phase: UpgradePhase) -> PhaseLabels {
        PhaseLabels {
            domain: domain.to_string(),
            phase: phase.to_string(),
        }
    }

    pub fn record_started(&self, domain: &str) {
        self.upgrade_started_total
            .get_or_create(&Self::domain(domain))
            .inc();
    }

    pub fn record_completed(&self, domain: &str) {
        self.upgrade_completed_total
            .get_or_create(&Self::domain(domain))
            .inc();
    }

    pub fn record_failed(&self, domain: &str) {
        self.upgrade_failed_total
            .get_or_create(&Self::domain(domain))
            .inc();
    }

    /// Record a phase transition: observe the time spent in the previous
    /// phase and flip the phase gauge.
    pub fn record_transition(&self, domain: &str, phase: UpgradePhase) {
        let previous = self
            .current_phases
            .lock()
            .insert(domain.to_string(), (phase, Instant::now()));

        if let Some((prev, entered)) = previous {
            let labels = Self::phase(domain, prev);
            self.phase_duration_seconds
                .get_or_create(&labels)
                .observe(entered.elapsed().as_secs_f64());
            self.upgrade_phase_info.get_or_create(&labels).set(0);
        }

        let labels = Self::phase(domain, phase);
        self.upgrade_phase_info.get_or_create(&labels).set(1);
        self.phase_transition_total.get_or_create(&labels).inc();
    }

    pub fn record_refresh(&self, kind: &str, ok: bool, seconds: f64) {
        let result = if ok { "success" } else { "error" };
        self.refresh_total
            .get_or_create(&RefreshLabels {
                kind: kind.to_string(),
                result: result.to_string(),
            })
            .inc();
        self.refresh_duration_seconds
            .get_or_create(&RefreshKindLabels {
                kind: kind.to_string(),
            })
            .observe(seconds);
    }
}

/// Encode the registry as OpenMetrics text.
pub fn render(registry: &Registry) -> Result<String, std::fmt::Error> {
    let mut buf = String::new();
    encode(&mut buf, registry)?;
    Ok(buf)
}
