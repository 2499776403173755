//! vuo - VCF Upgrade Orchestrator.
//!
//! Drives management domain upgrades through the VCF automation API:
//! version targeting, bundle download, prechecks, component upgrades and
//! final validation. The library is embeddable; the `vuo` binary hosts it
//! behind an HTTP surface.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod phases;
pub mod refresh;
pub mod server;
pub mod state;
pub mod status;

pub use api::{ApiClient, MemoryTokenStore, StoredToken, TokenStore, VcfApi};
pub use config::{Config, UpgradeTimings};
pub use error::VuoError;
pub use orchestrator::Orchestrator;
pub use refresh::{RefreshCache, RefreshSnapshot, Refresher, refresh, refresh_capacity};
pub use state::{Severity, UpgradePhase, UpgradeState};
pub use status::{StatusEvent, StatusSink};
