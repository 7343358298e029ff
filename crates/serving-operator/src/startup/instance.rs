//! Default instance
//!
//! A cluster running the operator gets one KnativeServing instance without
//! anyone creating it. The operand namespace comes from the manifest's
//! Namespace resources, which are applied first.

use serving_common::crd::{KnativeServing, KnativeServingSpec};
use serving_common::Error;
use serving_manifest::predicate::by_kind;
use serving_manifest::Manifest;
use tracing::{debug, info};

use crate::controller::KubeClient;
use crate::transform::inject_namespace;

/// Create `namespace/name` unless it already exists
pub async fn ensure_default_instance(
    kube: &dyn KubeClient,
    manifest: &Manifest,
    namespace: &str,
    name: &str,
) -> Result<(), Error> {
    if kube.get_instance(namespace, name).await?.is_some() {
        debug!(namespace, name, "default instance exists");
        return Ok(());
    }

    let namespaces = manifest.filter(by_kind("Namespace"));
    let injected = inject_namespace(namespace);
    let namespaces = namespaces.transform(|r| injected.apply(r))?;
    for resource in namespaces.resources() {
        namespaces.apply(resource).await?;
    }

    let mut instance = KnativeServing::new(name, KnativeServingSpec::default());
    instance.metadata.namespace = Some(namespace.to_string());
    match kube.create_instance(&instance).await {
        Ok(()) => {
            info!(namespace, name, "created default instance");
            Ok(())
        }
        Err(Error::Conflict { .. }) => Ok(()),
        Err(Error::Kube {
            source: kube::Error::Api(ae),
        }) if ae.code == 409 => Ok(()),
        Err(e) => Err(e),
    }
}
