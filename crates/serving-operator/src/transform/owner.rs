use kube::Resource as _;
use serving_common::crd::KnativeServing;
use serving_common::{Error, Result};

use super::{array_field, Transformer};

/// Point every namespaced resource at the instance as its controller
///
/// Cluster-scoped resources are skipped: a namespaced owner is not a valid
/// owner for them and the garbage collector would treat the reference as
/// dangling. The same holds for every resource when the operand is installed
/// outside the instance's namespace.
pub fn inject_owner(instance: &KnativeServing) -> Result<Transformer> {
    let owner = instance.controller_owner_ref(&()).ok_or_else(|| {
        Error::validation_for_field(instance.key(), "metadata.uid", "instance has no uid yet")
    })?;
    let owner = serde_json::to_value(owner)?;
    let same_namespace = instance.can_own_operand();

    Ok(Transformer::new("owner", move |mut resource| {
        if !same_namespace || resource.is_cluster_scoped() {
            return Ok(resource);
        }
        let refs = array_field(resource.metadata_mut(), "ownerReferences");
        refs.retain(|existing| existing.get("uid") != owner.get("uid"));
        refs.push(owner.clone());
        Ok(resource)
    }))
}
