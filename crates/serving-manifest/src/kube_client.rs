//! [`ClusterClient`] backed by the Kubernetes API
//!
//! Kinds are resolved through API discovery once and cached; kinds that are
//! not served yet (e.g. a CRD installed by the same manifest) are looked up
//! again on the next call.

use async_trait::async_trait;
use dashmap::DashMap;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::discovery::{ApiResource, Discovery, Scope};
use kube::Client;
use tracing::{debug, trace};

use crate::client::ClusterClient;
use crate::resource::{parse_api_version, Resource, ResourceKey};
use serving_common::{Error, Result, FIELD_MANAGER};

/// Cluster client over `Api<DynamicObject>`
pub struct KubeClusterClient {
    client: Client,
    resolved: DashMap<(String, String), (ApiResource, Scope)>,
}

impl KubeClusterClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resolved: DashMap::new(),
        }
    }

    async fn resolve(&self, api_version: &str, kind: &str) -> Result<Option<(ApiResource, Scope)>> {
        let cache_key = (api_version.to_string(), kind.to_string());
        if let Some(hit) = self.resolved.get(&cache_key) {
            return Ok(Some(hit.value().clone()));
        }

        let (group, version) = parse_api_version(api_version);
        let discovery = Discovery::new(self.client.clone())
            .filter(&[group])
            .run()
            .await
            .map_err(|e| {
                Error::internal_with_context("discovery", format!("API discovery failed: {e}"))
            })?;

        for api_group in discovery.groups() {
            if api_group.name() != group {
                continue;
            }
            for (ar, caps) in api_group.versioned_resources(version) {
                if ar.kind == kind {
                    debug!(api_version, kind, plural = %ar.plural, "resolved kind");
                    let entry = (ar, caps.scope);
                    self.resolved.insert(cache_key, entry.clone());
                    return Ok(Some(entry));
                }
            }
        }

        trace!(api_version, kind, "kind not served");
        Ok(None)
    }

    async fn api_for(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>> {
        let (ar, scope) = self
            .resolve(api_version, kind)
            .await?
            .ok_or_else(|| Error::unknown_kind(api_version, kind))?;

        Ok(match (scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            (Scope::Namespaced, None) => Api::default_namespaced_with(self.client.clone(), &ar),
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &ar),
        })
    }
}

/// Translate API status codes into the engine's error vocabulary
fn map_api_error(err: kube::Error, key: &ResourceKey) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => {
            Error::not_found(key.kind.clone(), key.to_string())
        }
        kube::Error::Api(ae) if ae.code == 409 => {
            Error::conflict(key.kind.clone(), key.to_string(), ae.message)
        }
        other => Error::from(other),
    }
}

fn to_dynamic(resource: &Resource) -> Result<DynamicObject> {
    serde_json::from_value(resource.clone().into_value())
        .map_err(|e| Error::serialization_for_kind(resource.kind(), e.to_string()))
}

fn from_dynamic(obj: DynamicObject) -> Result<Resource> {
    Resource::from_value(serde_json::to_value(obj)?)
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Resource>> {
        let api = match self
            .api_for(&key.api_version, &key.kind, key.namespace.as_deref())
            .await
        {
            Ok(api) => api,
            Err(Error::UnknownKind { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        match api.get_opt(&key.name).await {
            Ok(Some(obj)) => from_dynamic(obj).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(map_api_error(e, key)),
        }
    }

    async fn create(&self, resource: &Resource) -> Result<()> {
        let key = resource.key();
        let api = self
            .api_for(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.create(&params, &to_dynamic(resource)?)
            .await
            .map_err(|e| map_api_error(e, &key))?;
        Ok(())
    }

    async fn update(&self, resource: &Resource) -> Result<()> {
        let key = resource.key();
        let api = self
            .api_for(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.replace(&key.name, &params, &to_dynamic(resource)?)
            .await
            .map_err(|e| map_api_error(e, &key))?;
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let api = self
            .api_for(&key.api_version, &key.kind, key.namespace.as_deref())
            .await
            .map_err(|e| match e {
                Error::UnknownKind { .. } => Error::not_found(key.kind.clone(), key.to_string()),
                other => other,
            })?;
        api.delete(&key.name, &DeleteParams::background())
            .await
            .map_err(|e| map_api_error(e, key))?;
        Ok(())
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<String>,
    ) -> Result<Vec<Resource>> {
        let (ar, scope) = self
            .resolve(api_version, kind)
            .await?
            .ok_or_else(|| Error::unknown_kind(api_version, kind))?;
        let api: Api<DynamicObject> = match (scope, namespace.as_deref()) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        };
        api.list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    async fn kind_exists(&self, api_version: &str, kind: &str) -> Result<bool> {
        Ok(self.resolve(api_version, kind).await?.is_some())
    }
}
