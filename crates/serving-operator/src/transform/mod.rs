//! Manifest transforms
//!
//! A [`Transformer`] rewrites one resource. The [`TransformPipeline`] folds
//! every resource through its transformers left to right; the first error
//! aborts the whole pipeline and nothing is committed.
//!
//! Built-in transformers run in this order:
//!
//! 1. owner reference to the instance
//! 2. target namespace
//! 3. image registry rewrite and pull secrets
//! 4. per-container resource requirements
//! 5. Istio gateway selector and servers
//! 6. `config-*` ConfigMap literals
//! 7. controller custom certificates
//!
//! Platform extensions append theirs after the built-ins.

mod certs;
mod configmap;
mod gateway;
mod images;
mod namespace;
mod owner;
mod resources;

use std::sync::Arc;

use serde_json::{Map, Value};
use serving_common::crd::KnativeServing;
use serving_common::{Error, Result};
use serving_manifest::{Manifest, Resource};

pub use certs::{custom_certs, CONTROLLER_DEPLOYMENT, CUSTOM_CERTS_MOUNT_PATH};
pub use configmap::{config_map_overrides, set_config_map_data};
pub use gateway::gateway_overrides;
pub use images::{image_registry, resolve_image};
pub use namespace::inject_namespace;
pub use owner::inject_owner;
pub use resources::resource_requirements;

pub(crate) use certs::push_named;

type TransformFn = dyn Fn(Resource) -> Result<Resource> + Send + Sync;

/// A named resource rewrite
#[derive(Clone)]
pub struct Transformer {
    name: &'static str,
    func: Arc<TransformFn>,
}

impl std::fmt::Debug for Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Transformer").field(&self.name).finish()
    }
}

impl Transformer {
    /// Wrap a function as a transformer
    pub fn new(
        name: &'static str,
        func: impl Fn(Resource) -> Result<Resource> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            func: Arc::new(func),
        }
    }

    /// Name used in logs and errors
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Rewrite one resource
    ///
    /// Errors that are not already transform errors are tagged with the
    /// transformer name and the resource.
    pub fn apply(&self, resource: Resource) -> Result<Resource> {
        let identity = resource.to_string();
        (self.func)(resource).map_err(|e| match e {
            e @ Error::Transform { .. } => e,
            other => Error::transform(self.name, identity, other.to_string()),
        })
    }
}

/// Ordered list of transformers applied to every resource
#[derive(Clone, Debug, Default)]
pub struct TransformPipeline {
    transformers: Vec<Transformer>,
}

impl TransformPipeline {
    /// An empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in transformers for an instance
    pub fn builtin(instance: &KnativeServing) -> Result<Self> {
        Ok(Self {
            transformers: vec![
                inject_owner(instance)?,
                inject_namespace(&instance.target_namespace()),
                image_registry(&instance.spec.registry),
                resource_requirements(&instance.spec.resources),
                gateway_overrides(instance),
                config_map_overrides(&instance.spec.config),
                custom_certs(instance.spec.controller_custom_certs.clone()),
            ],
        })
    }

    /// Append a transformer
    pub fn push(&mut self, transformer: Transformer) {
        self.transformers.push(transformer);
    }

    /// Append transformers, keeping their order
    pub fn extend(&mut self, transformers: impl IntoIterator<Item = Transformer>) {
        self.transformers.extend(transformers);
    }

    /// Transformer names in order
    pub fn names(&self) -> Vec<&'static str> {
        self.transformers.iter().map(Transformer::name).collect()
    }

    /// Run one resource through every transformer
    pub fn apply(&self, resource: Resource) -> Result<Resource> {
        self.transformers
            .iter()
            .try_fold(resource, |r, t| t.apply(r))
    }

    /// Transform a whole manifest into a new one
    pub fn run(&self, manifest: &Manifest) -> Result<Manifest> {
        manifest.transform(|r| self.apply(r))
    }
}

/// Containers of a workload's pod template
pub(crate) fn containers_mut(resource: &mut Resource) -> Vec<&mut Map<String, Value>> {
    resource
        .pod_spec_mut()
        .and_then(|spec| spec.get_mut("containers"))
        .and_then(Value::as_array_mut)
        .map(|items| items.iter_mut().filter_map(Value::as_object_mut).collect())
        .unwrap_or_default()
}

/// Name of a container object
pub(crate) fn container_name(container: &Map<String, Value>) -> &str {
    container
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Get or create an array field on an object
pub(crate) fn array_field<'a>(object: &'a mut Map<String, Value>, key: &str) -> &'a mut Vec<Value> {
    let slot = object
        .entry(key)
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(items) => items,
        _ => unreachable!("{key} was just set to an array"),
    }
}
