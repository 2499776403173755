pub mod bundles;
pub mod components;
pub mod prechecks;
pub mod targeting;
pub mod validation;
