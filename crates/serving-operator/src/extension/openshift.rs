//! OpenShift support
//!
//! Detected by the presence of the `route.openshift.io` Route kind. Reads the
//! cluster ingress domain and service network from `config.openshift.io`,
//! mounts the service CA bundle into the controller, and creates the
//! ConfigMap the service-ca operator injects that bundle into.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::Resource as _;
use serde_json::{json, Value};
use serving_common::crd::KnativeServing;
use serving_common::{Error, Result};
use serving_manifest::{ClusterClient, Resource, ResourceKey};
use tracing::{debug, info};

use super::{outbound_ip_ranges, ExtensionBundle, InstallHook, PlatformExtension};
use crate::transform::{
    array_field, containers_mut, push_named, set_config_map_data, Transformer,
    CONTROLLER_DEPLOYMENT,
};

const ROUTE_API_VERSION: &str = "route.openshift.io/v1";
const CONFIG_API_VERSION: &str = "config.openshift.io/v1";
const CLUSTER_CONFIG_NAME: &str = "cluster";

/// ConfigMap the service-ca operator fills with the cluster CA bundle
pub const CA_BUNDLE_CONFIG_MAP: &str = "config-service-ca";

const INJECT_CABUNDLE_ANNOTATION: &str = "service.alpha.openshift.io/inject-cabundle";
const SERVICE_CA_VOLUME: &str = "service-ca";
const SERVICE_CA_MOUNT_PATH: &str = "/var/run/secrets/kubernetes.io/servicecerts";
const SERVICE_CA_FILE_ENV: &str = "SSL_CERT_FILE";

/// OpenShift platform extension
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenShift;

#[async_trait]
impl PlatformExtension for OpenShift {
    fn name(&self) -> &'static str {
        "openshift"
    }

    async fn detect(&self, cluster: &dyn ClusterClient) -> Result<Option<ExtensionBundle>> {
        if !cluster.kind_exists(ROUTE_API_VERSION, "Route").await? {
            return Ok(None);
        }

        let domain = cluster_config(cluster, "Ingress")
            .await?
            .and_then(|ingress| ingress.pointer("/spec/domain").and_then(Value::as_str).map(String::from))
            .unwrap_or_default();
        let service_network = cluster_config(cluster, "Network")
            .await?
            .map(|network| service_network(&network))
            .unwrap_or_default();
        info!(%domain, %service_network, "read OpenShift cluster configuration");

        Ok(Some(ExtensionBundle {
            transformers: vec![
                ingress_domain(domain),
                outbound_ip_ranges("openshift-egress", service_network),
                service_ca_bundle(),
            ],
            pre_install: vec![Arc::new(CaBundleConfigMap)],
            post_install: Vec::new(),
        }))
    }
}

async fn cluster_config(cluster: &dyn ClusterClient, kind: &str) -> Result<Option<Resource>> {
    let key = ResourceKey::new(CONFIG_API_VERSION, kind, None, CLUSTER_CONFIG_NAME);
    let found = cluster.get(&key).await?;
    if found.is_none() {
        debug!(kind, "no OpenShift cluster config");
    }
    Ok(found)
}

fn service_network(network: &Resource) -> String {
    network
        .pointer("/spec/serviceNetwork")
        .and_then(Value::as_array)
        .map(|cidrs| {
            cidrs
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default()
}

/// Serve routes under the cluster ingress domain
fn ingress_domain(domain: String) -> Transformer {
    let data = BTreeMap::from([(domain, String::new())]);
    Transformer::new("openshift-domain", move |mut resource| {
        if resource.kind() == "ConfigMap"
            && resource.name() == "config-domain"
            && data.keys().all(|d| !d.is_empty())
        {
            set_config_map_data(&mut resource, &data);
        }
        Ok(resource)
    })
}

/// Trust the service CA in the controller
fn service_ca_bundle() -> Transformer {
    Transformer::new("openshift-service-ca", |mut resource| {
        if resource.kind() != "Deployment" || resource.name() != CONTROLLER_DEPLOYMENT {
            return Ok(resource);
        }
        let Some(pod_spec) = resource.pod_spec_mut() else {
            return Ok(resource);
        };
        let volumes = array_field(pod_spec, "volumes");
        if volumes
            .iter()
            .any(|v| v.get("name").and_then(Value::as_str) == Some(SERVICE_CA_VOLUME))
        {
            return Ok(resource);
        }
        volumes.push(json!({
            "name": SERVICE_CA_VOLUME,
            "configMap": {"name": CA_BUNDLE_CONFIG_MAP}
        }));

        if let Some(first) = containers_mut(&mut resource).into_iter().next() {
            push_named(
                array_field(first, "volumeMounts"),
                json!({"name": SERVICE_CA_VOLUME, "mountPath": SERVICE_CA_MOUNT_PATH}),
            );
            push_named(
                array_field(first, "env"),
                json!({
                    "name": SERVICE_CA_FILE_ENV,
                    "value": format!("{SERVICE_CA_MOUNT_PATH}/service-ca.crt")
                }),
            );
        }
        Ok(resource)
    })
}

/// Creates the CA bundle ConfigMap next to the controller
struct CaBundleConfigMap;

#[async_trait]
impl InstallHook for CaBundleConfigMap {
    fn name(&self) -> &'static str {
        "ca-bundle-config-map"
    }

    async fn run(&self, instance: &KnativeServing, cluster: &dyn ClusterClient) -> Result<()> {
        let namespace = instance.target_namespace();
        let key = ResourceKey::new("v1", "ConfigMap", Some(&namespace), CA_BUNDLE_CONFIG_MAP);
        if cluster.get(&key).await?.is_some() {
            return Ok(());
        }

        let owner_references: Vec<_> = instance
            .controller_owner_ref(&())
            .filter(|_| instance.can_own_operand())
            .into_iter()
            .collect();
        let config_map = Resource::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": CA_BUNDLE_CONFIG_MAP,
                "namespace": namespace,
                "annotations": {INJECT_CABUNDLE_ANNOTATION: "true"},
                "ownerReferences": owner_references,
            }
        }))?;
        match cluster.create(&config_map).await {
            Ok(()) => {
                info!(namespace = %namespace, "created service CA bundle ConfigMap");
                Ok(())
            }
            Err(Error::Conflict { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
