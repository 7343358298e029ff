use serde_json::{json, Map, Value};
use serving_common::crd::{CustomCerts, CustomCertsKind};
use serving_common::Error;
use serving_manifest::Resource;

use super::{array_field, containers_mut, Transformer};

/// Deployment that receives custom certificates
pub const CONTROLLER_DEPLOYMENT: &str = "controller";

/// Where custom certificates are mounted
pub const CUSTOM_CERTS_MOUNT_PATH: &str = "/custom-certs";

const CUSTOM_CERTS_ENV: &str = "SSL_CERT_DIR";
const CUSTOM_CERTS_VOLUME_PREFIX: &str = "custom-certs-";

/// Mount a ConfigMap or Secret of CA certificates into the controller
///
/// The volume is named `custom-certs-<name>`, mounted at `/custom-certs` in
/// the first container, and `SSL_CERT_DIR` points at it.
pub fn custom_certs(certs: Option<CustomCerts>) -> Transformer {
    Transformer::new("custom-certs", move |mut resource| {
        let Some(certs) = certs.as_ref() else {
            return Ok(resource);
        };
        if certs.kind.is_empty() && certs.name.is_empty() {
            return Ok(resource);
        }
        if resource.kind() != "Deployment" || resource.name() != CONTROLLER_DEPLOYMENT {
            return Ok(resource);
        }
        configure(&mut resource, certs)?;
        Ok(resource)
    })
}

fn configure(resource: &mut Resource, certs: &CustomCerts) -> Result<(), Error> {
    let source = match certs.parsed_kind() {
        Some(CustomCertsKind::ConfigMap) => ("configMap", json!({"name": certs.name})),
        Some(CustomCertsKind::Secret) => ("secret", json!({"secretName": certs.name})),
        None => {
            return Err(Error::transform(
                "custom-certs",
                resource.to_string(),
                format!("Unknown CustomCerts type: {}", certs.kind),
            ))
        }
    };
    if certs.name.is_empty() {
        return Err(Error::transform(
            "custom-certs",
            resource.to_string(),
            format!("CustomCerts name for {} is required", certs.kind),
        ));
    }

    let volume_name = format!("{CUSTOM_CERTS_VOLUME_PREFIX}{}", certs.name);
    let mut volume = Map::new();
    volume.insert("name".to_string(), Value::String(volume_name.clone()));
    volume.insert(source.0.to_string(), source.1);

    if let Some(pod_spec) = resource.pod_spec_mut() {
        push_named(array_field(pod_spec, "volumes"), Value::Object(volume));
    }
    if let Some(first) = containers_mut(resource).into_iter().next() {
        push_named(
            array_field(first, "volumeMounts"),
            json!({"name": volume_name, "mountPath": CUSTOM_CERTS_MOUNT_PATH}),
        );
        push_named(
            array_field(first, "env"),
            json!({"name": CUSTOM_CERTS_ENV, "value": CUSTOM_CERTS_MOUNT_PATH}),
        );
    }
    Ok(())
}

/// Replace the entry with the same `name`, or append
pub(crate) fn push_named(items: &mut Vec<Value>, entry: Value) {
    let name = entry.get("name").cloned();
    match items.iter_mut().find(|item| item.get("name") == name.as_ref()) {
        Some(existing) => *existing = entry,
        None => items.push(entry),
    }
}
