use std::collections::BTreeMap;

use serde_json::Value;
use serving_common::crd::ResourceRequirements;

use super::{container_name, containers_mut, Transformer};

/// Replace container resources with the per-container overrides
///
/// Containers without an override keep whatever the manifest declares.
pub fn resource_requirements(overrides: &BTreeMap<String, ResourceRequirements>) -> Transformer {
    let overrides = overrides.clone();
    Transformer::new("resource-requirements", move |mut resource| {
        if resource.kind() != "Deployment" || overrides.is_empty() {
            return Ok(resource);
        }
        for container in containers_mut(&mut resource) {
            if let Some(requirements) = overrides.get(container_name(container)) {
                let value: Value = serde_json::to_value(requirements)?;
                container.insert("resources".to_string(), value);
            }
        }
        Ok(resource)
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::*;
    use super::*;
    use serde_json::json;

    fn overrides() -> BTreeMap<String, ResourceRequirements> {
        let mut requirements = ResourceRequirements::default();
        requirements.limits.insert("cpu".to_string(), "1".to_string());
        requirements
            .requests
            .insert("memory".to_string(), "100Mi".to_string());
        BTreeMap::from([("activator".to_string(), requirements)])
    }

    #[test]
    fn configured_container_is_replaced() {
        let out = resource_requirements(&overrides())
            .apply(deployment("activator", &["activator"]))
            .unwrap();
        assert_eq!(
            out.pointer("/spec/template/spec/containers/0/resources"),
            Some(&json!({"limits": {"cpu": "1"}, "requests": {"memory": "100Mi"}}))
        );
    }

    #[test]
    fn unconfigured_container_keeps_manifest_value() {
        let mut d = deployment("activator", &["activator", "istio-proxy"]);
        let sidecar = containers_mut(&mut d).into_iter().nth(1).unwrap();
        sidecar.insert("resources".to_string(), json!({"limits": {"cpu": "200m"}}));

        let out = resource_requirements(&overrides()).apply(d).unwrap();
        assert_eq!(
            out.pointer("/spec/template/spec/containers/1/resources"),
            Some(&json!({"limits": {"cpu": "200m"}}))
        );
        assert!(out
            .pointer("/spec/template/spec/containers/0/resources")
            .is_some());
    }

    #[test]
    fn no_overrides_no_change() {
        let d = deployment("webhook", &["webhook"]);
        let out = resource_requirements(&BTreeMap::new()).apply(d.clone()).unwrap();
        assert_eq!(out, d);
    }
}
