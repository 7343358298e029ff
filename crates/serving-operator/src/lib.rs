//! Serving operator
//!
//! Installs Knative Serving from a release manifest and keeps it converged
//! with the `KnativeServing` resources in the cluster:
//!
//! - [`transform`] rewrites the manifest for an instance
//! - [`extension`] adapts it to the platform (OpenShift, Minikube)
//! - [`controller`] runs the reconcile stages and finalization
//! - [`startup`] installs the CRD and the default instance

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod controller_runner;
pub mod extension;
pub mod startup;
pub mod transform;

pub use config::{Cli, Commands, ConfigError, OperatorConfig};
pub use serving_common::{Error, Result};
