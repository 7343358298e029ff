//! Resources orphaned by older releases

use serving_common::{Error, Result};
use serving_manifest::{ClusterClient, ResourceKey};
use tracing::{debug, info};

const ISTIO_NAMESPACE: &str = "istio-system";
const OLD_INGRESS_GATEWAY: &str = "knative-ingressgateway";
const OLD_CONTROLLER_CONFIG: &str = "config-controller";

/// Resources deleted on every pass, in order
pub fn obsolete_resources(namespace: &str) -> Vec<ResourceKey> {
    vec![
        ResourceKey::new("v1", "Service", Some(ISTIO_NAMESPACE), OLD_INGRESS_GATEWAY),
        ResourceKey::new("apps/v1", "Deployment", Some(ISTIO_NAMESPACE), OLD_INGRESS_GATEWAY),
        ResourceKey::new(
            "autoscaling/v1",
            "HorizontalPodAutoscaler",
            Some(ISTIO_NAMESPACE),
            OLD_INGRESS_GATEWAY,
        ),
        ResourceKey::new("v1", "ConfigMap", Some(namespace), OLD_CONTROLLER_CONFIG),
    ]
}

/// Delete every obsolete resource; absent ones are fine
pub async fn delete_obsolete(cluster: &dyn ClusterClient, namespace: &str) -> Result<()> {
    for key in obsolete_resources(namespace) {
        match cluster.delete(&key).await {
            Ok(()) => info!(resource = %key, "deleted obsolete resource"),
            Err(e) if e.is_not_found() => debug!(resource = %key, "obsolete resource absent"),
            Err(e) => return Err(Error::obsolete_cleanup(key.to_string(), e.to_string())),
        }
    }
    Ok(())
}
