use std::collections::BTreeMap;

use serving_common::crd::{GatewayOverride, KnativeServing};

use super::Transformer;

const ISTIO_NETWORKING_GROUP: &str = "networking.istio.io";

/// Gateways that accept overrides
pub const KNOWN_GATEWAYS: [&str; 2] = ["knative-ingress-gateway", "cluster-local-gateway"];

/// Overwrite selector and servers of the known Istio gateways
///
/// Each field is replaced wholesale when the override sets it. Gateways with
/// other names pass through untouched.
pub fn gateway_overrides(instance: &KnativeServing) -> Transformer {
    let overrides: BTreeMap<&'static str, GatewayOverride> = KNOWN_GATEWAYS
        .iter()
        .filter_map(|name| {
            instance
                .gateway_override(name)
                .map(|o| (*name, o.clone()))
        })
        .collect();

    Transformer::new("gateway", move |mut resource| {
        if resource.kind() != "Gateway" || resource.group() != ISTIO_NETWORKING_GROUP {
            return Ok(resource);
        }
        let Some(gateway) = overrides.get(resource.name()).cloned() else {
            return Ok(resource);
        };

        let spec = resource.spec_mut();
        if !gateway.selector.is_empty() {
            spec.insert("selector".to_string(), serde_json::to_value(&gateway.selector)?);
        }
        if !gateway.servers.is_empty() {
            spec.insert("servers".to_string(), serde_json::to_value(&gateway.servers)?);
        }
        Ok(resource)
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::*;
    use super::*;
    use serde_json::json;
    use serving_common::crd::{GatewayPort, GatewayServer, KnativeServingSpec};
    use serving_manifest::Resource;

    fn gateway(name: &str) -> Resource {
        Resource::from_value(json!({
            "apiVersion": "networking.istio.io/v1alpha3",
            "kind": "Gateway",
            "metadata": {"name": name, "namespace": "knative-serving"},
            "spec": {
                "selector": {"istio": "ingressgateway"},
                "servers": [{"hosts": ["*"], "port": {"number": 80, "name": "http", "protocol": "HTTP"}}]
            }
        }))
        .unwrap()
    }

    #[test]
    fn selector_override_leaves_servers() {
        let ks = instance(KnativeServingSpec {
            knative_ingress_gateway: Some(GatewayOverride {
                selector: BTreeMap::from([("custom".to_string(), "gateway".to_string())]),
                servers: Vec::new(),
            }),
            ..Default::default()
        });
        let out = gateway_overrides(&ks)
            .apply(gateway("knative-ingress-gateway"))
            .unwrap();
        assert_eq!(out.pointer("/spec/selector"), Some(&json!({"custom": "gateway"})));
        assert_eq!(out.pointer("/spec/servers/0/port/number"), Some(&json!(80)));
    }

    #[test]
    fn servers_override_replaces_list() {
        let ks = instance(KnativeServingSpec {
            cluster_local_gateway: Some(GatewayOverride {
                selector: BTreeMap::new(),
                servers: vec![GatewayServer {
                    hosts: vec!["*.local".to_string()],
                    port: GatewayPort {
                        number: 8081,
                        name: "http".to_string(),
                        protocol: "HTTP".to_string(),
                    },
                }],
            }),
            ..Default::default()
        });
        let out = gateway_overrides(&ks)
            .apply(gateway("cluster-local-gateway"))
            .unwrap();
        assert_eq!(
            out.pointer("/spec/servers"),
            Some(&json!([{"hosts": ["*.local"], "port": {"number": 8081, "name": "http", "protocol": "HTTP"}}]))
        );
        assert_eq!(
            out.pointer("/spec/selector"),
            Some(&json!({"istio": "ingressgateway"}))
        );
    }

    #[test]
    fn unknown_gateways_and_missing_overrides_pass_through() {
        let ks = instance(KnativeServingSpec::default());
        let gw = gateway("knative-ingress-gateway");
        assert_eq!(gateway_overrides(&ks).apply(gw.clone()).unwrap(), gw);

        let other = gateway("istio-autogenerated-k8s-ingress");
        let ks = instance(KnativeServingSpec {
            knative_ingress_gateway: Some(GatewayOverride {
                selector: BTreeMap::from([("a".to_string(), "b".to_string())]),
                servers: Vec::new(),
            }),
            ..Default::default()
        });
        assert_eq!(gateway_overrides(&ks).apply(other.clone()).unwrap(), other);
    }
}
