//! Minikube support
//!
//! Detected by a Node named `minikube`. Sidecar egress interception is
//! limited to the minikube service range so pods can still reach the host.

use async_trait::async_trait;
use serving_common::Result;
use serving_manifest::{ClusterClient, ResourceKey};

use super::{outbound_ip_ranges, ExtensionBundle, PlatformExtension};

const MINIKUBE_NODE: &str = "minikube";
const MINIKUBE_SERVICE_RANGE: &str = "10.0.0.1/24";

/// Minikube platform extension
#[derive(Clone, Copy, Debug, Default)]
pub struct Minikube;

#[async_trait]
impl PlatformExtension for Minikube {
    fn name(&self) -> &'static str {
        "minikube"
    }

    async fn detect(&self, cluster: &dyn ClusterClient) -> Result<Option<ExtensionBundle>> {
        let node = ResourceKey::new("v1", "Node", None, MINIKUBE_NODE);
        if cluster.get(&node).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(ExtensionBundle {
            transformers: vec![outbound_ip_ranges(
                "minikube-egress",
                MINIKUBE_SERVICE_RANGE.to_string(),
            )],
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::test_fixtures::config_map;
    use serde_json::json;
    use serving_common::Error;
    use serving_manifest::{FakeCluster, MockClusterClient, Resource};

    #[tokio::test]
    async fn detects_minikube_node() {
        let cluster = FakeCluster::new();
        assert!(Minikube.detect(&cluster).await.unwrap().is_none());

        cluster.insert(
            Resource::from_value(json!({
                "apiVersion": "v1", "kind": "Node",
                "metadata": {"name": "minikube"}
            }))
            .unwrap(),
        );
        let bundle = Minikube.detect(&cluster).await.unwrap().unwrap();
        let out = bundle.transformers[0]
            .apply(config_map("config-network", json!({})))
            .unwrap();
        assert_eq!(out.data()["istio.sidecar.includeOutboundIPRanges"], "10.0.0.1/24");
    }

    #[tokio::test]
    async fn lookup_errors_abort_detection() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_get()
            .returning(|_| Err(Error::internal("connection refused")));
        assert!(Minikube.detect(&cluster).await.is_err());
    }
}
