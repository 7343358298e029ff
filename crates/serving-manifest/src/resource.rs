//! Untyped resource envelope
//!
//! Manifest content is kept as JSON objects so fields the operator does not
//! know about round-trip untouched. Typed access goes through `k8s-openapi`
//! structs via [`Resource::to_typed`].

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serving_common::crd::ResourceRef;
use serving_common::{Error, Result};

/// Kinds that live outside any namespace
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "APIService",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "MutatingWebhookConfiguration",
    "Namespace",
    "PersistentVolume",
    "PriorityClass",
    "StorageClass",
    "ValidatingWebhookConfiguration",
];

/// Identity of a resource: apiVersion, kind, namespace and name
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    /// apiVersion, e.g. `apps/v1`
    pub api_version: String,
    /// Kind, e.g. `Deployment`
    pub kind: String,
    /// Namespace, `None` for cluster-scoped resources
    pub namespace: Option<String>,
    /// Name
    pub name: String,
}

impl ResourceKey {
    /// Build a key
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// Split apiVersion into (group, version); the core group is empty
    pub fn group_version(&self) -> (&str, &str) {
        parse_api_version(&self.api_version)
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Split an apiVersion into (group, version)
///
/// `"apps/v1"` becomes `("apps", "v1")`, `"v1"` becomes `("", "v1")`.
pub fn parse_api_version(api_version: &str) -> (&str, &str) {
    api_version.rsplit_once('/').unwrap_or(("", api_version))
}

/// True for kinds that are never namespaced
pub fn is_cluster_scoped_kind(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// A single Kubernetes object held as JSON
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Resource {
    object: Map<String, Value>,
}

impl Resource {
    /// Wrap a JSON object, requiring `apiVersion`, `kind` and `metadata.name`
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(object) = value else {
            return Err(Error::serialization("resource is not a JSON object"));
        };
        let resource = Self { object };
        if resource.api_version().is_empty() || resource.kind().is_empty() {
            return Err(Error::serialization(
                "resource is missing apiVersion or kind",
            ));
        }
        if resource.name().is_empty() {
            return Err(Error::serialization_for_kind(
                resource.kind(),
                "resource is missing metadata.name",
            ));
        }
        Ok(resource)
    }

    /// Serialize a typed object into a resource
    pub fn from_typed<T: Serialize>(obj: &T) -> Result<Self> {
        Self::from_value(serde_json::to_value(obj)?)
    }

    /// Deserialize into a typed object
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.object.clone()))
            .map_err(|e| Error::serialization_for_kind(self.kind(), e.to_string()))
    }

    /// apiVersion
    pub fn api_version(&self) -> &str {
        self.str_at(&["apiVersion"]).unwrap_or_default()
    }

    /// API group, empty for the core group
    pub fn group(&self) -> &str {
        parse_api_version(self.api_version()).0
    }

    /// kind
    pub fn kind(&self) -> &str {
        self.str_at(&["kind"]).unwrap_or_default()
    }

    /// metadata.name
    pub fn name(&self) -> &str {
        self.str_at(&["metadata", "name"]).unwrap_or_default()
    }

    /// metadata.namespace, `None` when unset or empty
    pub fn namespace(&self) -> Option<&str> {
        self.str_at(&["metadata", "namespace"])
            .filter(|ns| !ns.is_empty())
    }

    /// Set metadata.namespace
    pub fn set_namespace(&mut self, namespace: &str) {
        self.metadata_mut()
            .insert("namespace".to_string(), Value::String(namespace.to_string()));
    }

    /// Whether the kind is cluster-scoped
    pub fn is_cluster_scoped(&self) -> bool {
        is_cluster_scoped_kind(self.kind())
    }

    /// metadata.annotations as a map
    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.string_map_at(&["metadata", "annotations"])
    }

    /// A single annotation
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.str_at(&["metadata", "annotations", key])
    }

    /// Set an annotation, creating the map when needed
    pub fn set_annotation(&mut self, key: &str, value: &str) {
        object_field(self.metadata_mut(), "annotations")
            .insert(key.to_string(), Value::String(value.to_string()));
    }

    /// metadata.labels as a map
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map_at(&["metadata", "labels"])
    }

    /// The `data` map of a ConfigMap or Secret, created when missing
    pub fn data_mut(&mut self) -> &mut Map<String, Value> {
        object_field(&mut self.object, "data")
    }

    /// `data` as strings
    pub fn data(&self) -> BTreeMap<String, String> {
        self.string_map_at(&["data"])
    }

    /// The pod template spec of a workload (`spec.template.spec`)
    pub fn pod_spec_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.object
            .get_mut("spec")?
            .get_mut("template")?
            .get_mut("spec")?
            .as_object_mut()
    }

    /// The `spec` object, if present
    pub fn spec(&self) -> Option<&Map<String, Value>> {
        self.object.get("spec").and_then(Value::as_object)
    }

    /// The `spec` object, created when missing
    pub fn spec_mut(&mut self) -> &mut Map<String, Value> {
        object_field(&mut self.object, "spec")
    }

    /// Look up a value by JSON pointer, e.g. `/spec/replicas`
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        let path = pointer.strip_prefix('/')?;
        match path.split_once('/') {
            Some((head, tail)) => self.object.get(head)?.pointer(&format!("/{tail}")),
            None => self.object.get(path),
        }
    }

    /// Remove a top-level field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.object.remove(field)
    }

    /// The full object
    pub fn as_object(&self) -> &Map<String, Value> {
        &self.object
    }

    /// The full object, mutably
    pub fn as_object_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.object
    }

    /// Consume into a JSON value
    pub fn into_value(self) -> Value {
        Value::Object(self.object)
    }

    /// Identity of this resource
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(
            self.api_version(),
            self.kind(),
            self.namespace(),
            self.name(),
        )
    }

    /// Status reference for this resource
    pub fn to_ref(&self) -> ResourceRef {
        let (group, version) = parse_api_version(self.api_version());
        ResourceRef {
            group: group.to_string(),
            version: version.to_string(),
            kind: self.kind().to_string(),
            namespace: self.namespace().map(str::to_string),
            name: self.name().to_string(),
        }
    }

    /// The `metadata` object, created when missing
    pub fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        object_field(&mut self.object, "metadata")
    }

    fn value_at(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.object.get(*first)?, |v, seg| v.get(*seg))
    }

    fn str_at(&self, path: &[&str]) -> Option<&str> {
        self.value_at(path).and_then(Value::as_str)
    }

    fn string_map_at(&self, path: &[&str]) -> BTreeMap<String, String> {
        self.value_at(path)
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Get `parent[key]` as an object, replacing a missing or non-object value
pub(crate) fn object_field<'a>(
    parent: &'a mut Map<String, Value>,
    key: &str,
) -> &'a mut Map<String, Value> {
    let slot = parent
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("{key} was just set to an object"),
    }
}

impl TryFrom<Value> for Resource {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<Resource> for Value {
    fn from(resource: Resource) -> Self {
        resource.into_value()
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.key().fmt(f)
    }
}
