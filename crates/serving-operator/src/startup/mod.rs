//! Startup utilities for the serving operator

mod crds;
mod instance;

pub use crds::{crd_yaml, ensure_crd_installed};
pub use instance::ensure_default_instance;
