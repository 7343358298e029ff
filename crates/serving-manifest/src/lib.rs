//! Manifest engine for the serving operator
//!
//! A [`Manifest`] is an ordered set of untyped Kubernetes resources bound to a
//! [`ClusterClient`]. It can be filtered, transformed into a new manifest, and
//! applied or deleted idempotently:
//!
//! - apply creates missing objects and merges desired fields into existing
//!   ones, writing only when something changed
//! - RBAC roles are applied first, then bindings, then everything else
//! - deletion runs in reverse with RBAC last and only removes objects the
//!   operator created

#![deny(missing_docs)]

mod client;
#[cfg(any(test, feature = "testing"))]
mod fake;
mod kube_client;
mod manifest;
pub mod merge;
pub mod predicate;
mod resource;
mod source;

pub use client::ClusterClient;
#[cfg(any(test, feature = "testing"))]
pub use client::MockClusterClient;
#[cfg(any(test, feature = "testing"))]
pub use fake::{FakeCluster, Write};
pub use kube_client::KubeClusterClient;
pub use manifest::{ApplyFailure, Applied, Deleted, Manifest};
pub use resource::{Resource, ResourceKey};
pub use source::load_documents;
pub use serving_common::{Error, Result};
