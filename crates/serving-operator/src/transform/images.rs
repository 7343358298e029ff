use serde_json::{json, Map, Value};
use serving_common::crd::Registry;
use serving_manifest::Resource;
use tracing::debug;

use super::{array_field, container_name, containers_mut, Transformer};

/// Placeholder in the default image template replaced by the container name
pub const NAME_PLACEHOLDER: &str = "${NAME}";

/// apiVersion of Knative's image caching resource
pub const CACHING_API_VERSION: &str = "caching.internal.knative.dev/v1alpha1";

/// Image for a container, `None` to keep the manifest's
///
/// A per-container override wins; otherwise the default template with
/// `${NAME}` substituted; otherwise nothing.
pub fn resolve_image(registry: &Registry, name: &str) -> Option<String> {
    if let Some(image) = registry.overrides.get(name).filter(|i| !i.is_empty()) {
        return Some(image.clone());
    }
    let templated = registry.default.replace(NAME_PLACEHOLDER, name);
    (!templated.is_empty()).then_some(templated)
}

/// Rewrite workload and caching images, and add pull secrets
pub fn image_registry(registry: &Registry) -> Transformer {
    let registry = registry.clone();
    Transformer::new("image-registry", move |mut resource| {
        let workload = matches!(resource.kind(), "Deployment" | "DaemonSet");
        let caching_image =
            resource.kind() == "Image" && resource.api_version() == CACHING_API_VERSION;

        if workload {
            rewrite_workload(&mut resource, &registry);
        } else if caching_image {
            rewrite_caching_image(&mut resource, &registry);
        }
        Ok(resource)
    })
}

fn rewrite_workload(resource: &mut Resource, registry: &Registry) {
    for container in containers_mut(resource) {
        let name = container_name(container).to_string();
        if let Some(image) = resolve_image(registry, &name) {
            debug!(container = %name, %image, "rewriting container image");
            container.insert("image".to_string(), Value::String(image));
        }
    }
    if let Some(pod_spec) = resource.pod_spec_mut() {
        add_pull_secrets(pod_spec, registry);
    }
}

fn rewrite_caching_image(resource: &mut Resource, registry: &Registry) {
    let name = resource.name().to_string();
    let spec = resource.spec_mut();
    if let Some(image) = resolve_image(registry, &name) {
        debug!(image_resource = %name, %image, "rewriting cached image");
        spec.insert("image".to_string(), Value::String(image));
    }
    add_pull_secrets(spec, registry);
    resource.remove("status");
}

/// Append configured pull secrets that are not already listed
fn add_pull_secrets(spec: &mut Map<String, Value>, registry: &Registry) {
    if registry.image_pull_secrets.is_empty() {
        return;
    }
    let secrets = array_field(spec, "imagePullSecrets");
    for secret in &registry.image_pull_secrets {
        let entry = json!({"name": secret.name});
        if !secrets.contains(&entry) {
            secrets.push(entry);
        }
    }
}
