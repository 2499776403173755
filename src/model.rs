//! Domain and release model.

pub mod domain;
pub mod release;
pub mod summary;
pub mod version;

pub use domain::{Domain, ManagerRef};
pub use release::{BomComponent, Release, select_next_release};
pub use summary::{NextRelease, UpdateStatus, UpdateSummary};
pub use version::Version;
