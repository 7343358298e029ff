//! Manifest: an ordered resource list bound to a cluster client

use std::path::Path;
use std::sync::Arc;

use serving_common::crd::ResourceRef;
use serving_common::{Error, Result, CREATED_BY_ANNOTATION, CREATED_BY_VALUE};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::client::ClusterClient;
use crate::merge::update_changed;
use crate::predicate::{is_rbac, is_role, is_role_binding};
use crate::resource::{Resource, ResourceKey};
use crate::source::load_documents;

/// Outcome of applying one resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The object did not exist and was created
    Created,
    /// The object existed and the merge changed it
    Updated,
    /// The object already matched, nothing was written
    Unchanged,
}

/// Outcome of deleting one resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deleted {
    /// The object was deleted
    Deleted,
    /// The object was already gone
    Absent,
    /// The object exists but was not created by the operator
    Skipped,
}

/// An `apply_all` that stopped part way
#[derive(Debug, Error)]
#[error("apply of {resource} failed: {error}")]
pub struct ApplyFailure {
    /// Resources applied before the failure
    pub applied: Vec<ResourceRef>,
    /// Resource that failed
    pub resource: ResourceKey,
    /// Underlying error
    #[source]
    pub error: Error,
}

impl From<ApplyFailure> for Error {
    fn from(failure: ApplyFailure) -> Self {
        Error::apply(failure.resource.to_string(), failure.error.to_string())
    }
}

/// Ordered resources plus the client they are applied with
#[derive(Clone)]
pub struct Manifest {
    resources: Vec<Resource>,
    client: Arc<dyn ClusterClient>,
}

impl std::fmt::Debug for Manifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manifest")
            .field("resources", &self.resources.len())
            .finish_non_exhaustive()
    }
}

impl Manifest {
    /// Bind resources to a client
    pub fn from_resources(resources: Vec<Resource>, client: Arc<dyn ClusterClient>) -> Self {
        Self { resources, client }
    }

    /// Load a manifest from a YAML file or directory
    pub fn from_path(path: &Path, recursive: bool, client: Arc<dyn ClusterClient>) -> Result<Self> {
        let resources = load_documents(path, recursive)?;
        info!(path = %path.display(), resources = resources.len(), "loaded manifest");
        Ok(Self::from_resources(resources, client))
    }

    /// Resources in manifest order
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// True when the manifest has no resources
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// The bound client
    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    /// A manifest holding only the matching resources
    pub fn filter(&self, predicate: impl Fn(&Resource) -> bool) -> Manifest {
        Manifest {
            resources: self
                .resources
                .iter()
                .filter(|r| predicate(r))
                .cloned()
                .collect(),
            client: self.client.clone(),
        }
    }

    /// Map every resource through `f`, failing on the first error
    ///
    /// The receiver is left untouched; callers swap in the result only when
    /// every resource transformed cleanly.
    pub fn transform(&self, mut f: impl FnMut(Resource) -> Result<Resource>) -> Result<Manifest> {
        let resources = self
            .resources
            .iter()
            .cloned()
            .map(&mut f)
            .collect::<Result<Vec<_>>>()?;
        Ok(Manifest {
            resources,
            client: self.client.clone(),
        })
    }

    /// Resources in apply order: roles, then bindings, then the rest
    pub fn apply_order(&self) -> Vec<&Resource> {
        let roles = self.resources.iter().filter(|r| is_role(r));
        let bindings = self.resources.iter().filter(|r| is_role_binding(r));
        let rest = self.resources.iter().filter(|r| !is_rbac(r));
        roles.chain(bindings).chain(rest).collect()
    }

    /// Resources in delete order: the reverse of apply order, RBAC last
    pub fn delete_order(&self) -> Vec<&Resource> {
        let mut order = self.apply_order();
        order.reverse();
        let (rbac, rest): (Vec<&Resource>, Vec<&Resource>) =
            order.into_iter().partition(|r| is_rbac(r));
        rest.into_iter().chain(rbac).collect()
    }

    /// Fetch the live object for a resource
    pub async fn get(&self, resource: &Resource) -> Result<Option<Resource>> {
        self.client.get(&resource.key()).await
    }

    /// Create or merge-update a single resource
    #[instrument(skip(self, resource), fields(resource = %resource))]
    pub async fn apply(&self, resource: &Resource) -> Result<Applied> {
        match self.client.get(&resource.key()).await? {
            None => {
                let mut created = resource.clone();
                created.set_annotation(CREATED_BY_ANNOTATION, CREATED_BY_VALUE);
                info!("creating");
                self.client.create(&created).await?;
                Ok(Applied::Created)
            }
            Some(mut live) => {
                if update_changed(resource.as_object(), live.as_object_mut()) {
                    info!("updating");
                    self.client.update(&live).await?;
                    Ok(Applied::Updated)
                } else {
                    debug!("unchanged");
                    Ok(Applied::Unchanged)
                }
            }
        }
    }

    /// Apply every resource in apply order, stopping at the first failure
    pub async fn apply_all(&self) -> std::result::Result<Vec<ResourceRef>, ApplyFailure> {
        let mut applied = Vec::with_capacity(self.resources.len());
        for resource in self.apply_order() {
            if let Err(error) = self.apply(resource).await {
                warn!(resource = %resource, %error, "apply failed");
                return Err(ApplyFailure {
                    applied,
                    resource: resource.key(),
                    error,
                });
            }
            applied.push(resource.to_ref());
        }
        Ok(applied)
    }

    /// Delete a single resource if the operator created it
    #[instrument(skip(self, resource), fields(resource = %resource))]
    pub async fn delete(&self, resource: &Resource) -> Result<Deleted> {
        let key = resource.key();
        let Some(live) = self.client.get(&key).await? else {
            debug!("already absent");
            return Ok(Deleted::Absent);
        };
        if live.annotation(CREATED_BY_ANNOTATION) != Some(CREATED_BY_VALUE) {
            debug!("not created by the operator, keeping");
            return Ok(Deleted::Skipped);
        }
        match self.client.delete(&key).await {
            Ok(()) => {
                info!("deleted");
                Ok(Deleted::Deleted)
            }
            Err(e) if e.is_not_found() => Ok(Deleted::Absent),
            Err(e) => Err(e),
        }
    }

    /// Delete every resource in delete order
    ///
    /// Non-RBAC resources are all attempted even if some fail. RBAC is only
    /// removed once everything else is gone; the first error is returned.
    pub async fn delete_all(&self) -> Result<()> {
        let order = self.delete_order();
        let (rest, rbac): (Vec<&Resource>, Vec<&Resource>) =
            order.into_iter().partition(|r| !is_rbac(r));

        for phase in [rest, rbac] {
            let mut first_error = None;
            for resource in phase {
                if let Err(e) = self.delete(resource).await {
                    warn!(resource = %resource, error = %e, "delete failed");
                    first_error.get_or_insert(e);
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        Ok(())
    }
}
