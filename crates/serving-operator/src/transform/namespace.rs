use serde_json::Value;

use super::Transformer;

/// Move namespaced resources into the target namespace
///
/// Cross-namespace references that must follow the operand are rewritten
/// too: ServiceAccount subjects of bindings, webhook service references and
/// APIService backends.
pub fn inject_namespace(namespace: &str) -> Transformer {
    let namespace = namespace.to_string();
    Transformer::new("namespace", move |mut resource| {
        if !resource.is_cluster_scoped() {
            resource.set_namespace(&namespace);
        }

        let kind = resource.kind().to_string();
        let target = Value::String(namespace.clone());
        let object = resource.as_object_mut();
        match kind.as_str() {
            "ClusterRoleBinding" | "RoleBinding" => {
                if let Some(subjects) = object.get_mut("subjects").and_then(Value::as_array_mut) {
                    for subject in subjects.iter_mut().filter_map(Value::as_object_mut) {
                        if subject.get("kind").and_then(Value::as_str) == Some("ServiceAccount") {
                            subject.insert("namespace".to_string(), target.clone());
                        }
                    }
                }
            }
            "MutatingWebhookConfiguration" | "ValidatingWebhookConfiguration" => {
                if let Some(webhooks) = object.get_mut("webhooks").and_then(Value::as_array_mut) {
                    for webhook in webhooks {
                        if let Some(service) = webhook
                            .pointer_mut("/clientConfig/service")
                            .and_then(Value::as_object_mut)
                        {
                            service.insert("namespace".to_string(), target.clone());
                        }
                    }
                }
            }
            "APIService" => {
                if let Some(service) = object
                    .get_mut("spec")
                    .and_then(|spec| spec.get_mut("service"))
                    .and_then(Value::as_object_mut)
                {
                    service.insert("namespace".to_string(), target);
                }
            }
            _ => {}
        }
        Ok(resource)
    })
}
