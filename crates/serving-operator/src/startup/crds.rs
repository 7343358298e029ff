//! CRD installation
//!
//! The operator installs its own CRD on startup with server-side apply so the
//! schema always matches the running version.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use serving_common::crd::KnativeServing;
use serving_common::FIELD_MANAGER;

/// Ensure the KnativeServing CRD is installed and current
pub async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let name = KnativeServing::crd_name();

    tracing::info!(crd = name, "installing CRD");
    crds.patch(name, &params, &Patch::Apply(&KnativeServing::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", name, e))?;
    Ok(())
}

/// The KnativeServing CRD as YAML
pub fn crd_yaml() -> anyhow::Result<String> {
    serde_yaml::to_string(&KnativeServing::crd())
        .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {}", e))
}
