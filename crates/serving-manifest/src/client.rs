//! Cluster access used by the manifest engine
//!
//! The trait speaks untyped [`Resource`]s so the same engine drives core
//! kinds, CRDs and platform-specific kinds alike. Absence is modelled in the
//! return type of [`ClusterClient::get`] and as [`Error::NotFound`] from
//! [`ClusterClient::delete`], never as a raw API error.
//!
//! [`Error::NotFound`]: serving_common::Error::NotFound

use async_trait::async_trait;
#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::resource::{Resource, ResourceKey};
use serving_common::Result;

/// Generic read/write access to cluster objects
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get(&self, key: &ResourceKey) -> Result<Option<Resource>>;

    /// Create an object, `Error::Conflict` if it already exists
    async fn create(&self, resource: &Resource) -> Result<()>;

    /// Replace an existing object
    async fn update(&self, resource: &Resource) -> Result<()>;

    /// Delete an object, `Error::NotFound` if it does not exist
    async fn delete(&self, key: &ResourceKey) -> Result<()>;

    /// List objects of a kind, optionally within one namespace
    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<String>,
    ) -> Result<Vec<Resource>>;

    /// Whether the API server serves this kind
    async fn kind_exists(&self, api_version: &str, kind: &str) -> Result<bool>;
}
