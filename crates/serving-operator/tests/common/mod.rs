//! Shared fixtures for reconcile integration tests
//!
//! [`FakeKube`] stands in for the API server's view of KnativeServing
//! resources; the manifest side uses `serving_manifest::FakeCluster`.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

use serving_common::crd::{KnativeServing, KnativeServingSpec, KnativeServingStatus};
use serving_common::Error;
use serving_manifest::{FakeCluster, Manifest, Resource};
use serving_operator::controller::{reconcile, Context, KubeClient};
use serving_operator::extension::ExtensionRegistry;

pub const NAMESPACE: &str = "knative-serving";

/// In-memory KnativeServing store
#[derive(Default)]
pub struct FakeKube {
    instances: Mutex<BTreeMap<(String, String), KnativeServing>>,
    status_writes: Mutex<usize>,
}

impl FakeKube {
    pub fn insert(&self, instance: KnativeServing) {
        let key = (
            instance.metadata.namespace.clone().unwrap_or_default(),
            instance.metadata.name.clone().unwrap_or_default(),
        );
        self.instances.lock().insert(key, instance);
    }

    pub fn instance(&self, namespace: &str, name: &str) -> KnativeServing {
        self.instances
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_else(|| panic!("instance {namespace}/{name} not stored"))
    }

    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.instances
            .lock()
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    pub fn status_writes(&self) -> usize {
        *self.status_writes.lock()
    }

    /// Simulate a spec edit: the API server bumps the generation
    pub fn edit(&self, namespace: &str, name: &str, f: impl FnOnce(&mut KnativeServingSpec)) {
        let mut instances = self.instances.lock();
        if let Some(instance) = instances.get_mut(&(namespace.to_string(), name.to_string())) {
            f(&mut instance.spec);
            instance.metadata.generation = Some(instance.metadata.generation.unwrap_or_default() + 1);
        }
    }

    /// Simulate `kubectl delete`: mark for deletion, finalizers keep it around
    pub fn mark_deleted(&self, namespace: &str, name: &str) {
        let mut instances = self.instances.lock();
        if let Some(instance) = instances.get_mut(&(namespace.to_string(), name.to_string())) {
            instance.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
    }

    fn update(&self, namespace: &str, name: &str, f: impl FnOnce(&mut KnativeServing)) -> Result<(), Error> {
        let mut instances = self.instances.lock();
        let instance = instances
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::not_found("KnativeServing", format!("{namespace}/{name}")))?;
        f(instance);
        Ok(())
    }
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &KnativeServingStatus,
    ) -> Result<(), Error> {
        *self.status_writes.lock() += 1;
        self.update(namespace, name, |ks| ks.status = Some(status.clone()))
    }

    async fn add_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<(), Error> {
        self.update(namespace, name, |ks| {
            let finalizers = ks.metadata.finalizers.get_or_insert_with(Vec::new);
            if !finalizers.iter().any(|f| f == finalizer) {
                finalizers.push(finalizer.to_string());
            }
        })
    }

    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let key = (namespace.to_string(), name.to_string());
        let mut instances = self.instances.lock();
        let Some(instance) = instances.get_mut(&key) else {
            return Ok(());
        };
        if let Some(finalizers) = instance.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != finalizer);
        }
        let released = instance.metadata.deletion_timestamp.is_some()
            && instance.metadata.finalizers.as_ref().map_or(true, Vec::is_empty);
        if released {
            instances.remove(&key);
        }
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<KnativeServing>, Error> {
        Ok(self.instances.lock().values().cloned().collect())
    }

    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<KnativeServing>, Error> {
        Ok(self
            .instances
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_instance(&self, instance: &KnativeServing) -> Result<(), Error> {
        self.insert(instance.clone());
        Ok(())
    }
}

/// A new instance as the API server would hand it out
pub fn instance(namespace: &str, name: &str, spec: KnativeServingSpec) -> KnativeServing {
    let mut ks = KnativeServing::new(name, spec);
    ks.metadata.namespace = Some(namespace.to_string());
    ks.metadata.uid = Some(format!("{namespace}-{name}-uid"));
    ks.metadata.generation = Some(1);
    ks
}

/// Write a release manifest into a temporary directory
pub fn release_dir(yaml: &str) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("serving.yaml"), yaml).expect("write manifest");
    dir
}

/// A trimmed release: RBAC, a ConfigMap and two Deployments
pub const RELEASE: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: knative-serving
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: knative-serving-admin
rules: []
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: knative-serving-controller-admin
subjects:
  - kind: ServiceAccount
    name: controller
    namespace: knative-serving
roleRef:
  kind: ClusterRole
  name: knative-serving-admin
  apiGroup: rbac.authorization.k8s.io
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: controller
  namespace: knative-serving
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: config-network
  namespace: knative-serving
data:
  ingress.class: istio.ingress.networking.knative.dev
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: activator
  namespace: knative-serving
spec:
  template:
    spec:
      containers:
        - name: activator
          image: gcr.io/knative-releases/activator
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: controller
  namespace: knative-serving
spec:
  template:
    spec:
      serviceAccountName: controller
      containers:
        - name: controller
          image: gcr.io/knative-releases/controller
"#;

/// Cluster, instance store and controller context over a release
pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub kube: Arc<FakeKube>,
    pub ctx: Arc<Context>,
    _dir: TempDir,
}

impl Harness {
    pub fn new(release: &str) -> Self {
        Self::with_extensions(release, ExtensionRegistry::new())
    }

    pub fn with_extensions(release: &str, extensions: ExtensionRegistry) -> Self {
        let dir = release_dir(release);
        let cluster = Arc::new(FakeCluster::new());
        let kube = Arc::new(FakeKube::default());
        let manifest =
            Manifest::from_path(dir.path(), false, cluster.clone()).expect("load manifest");
        let ctx = Context::builder(kube.clone(), manifest)
            .extensions(extensions)
            .version("0.13.0")
            .build();
        Self {
            cluster,
            kube,
            ctx: Arc::new(ctx),
            _dir: dir,
        }
    }

    /// Run one pass on the stored copy of an instance
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<kube::runtime::controller::Action, Error> {
        let instance = self.kube.instance(namespace, name);
        reconcile(Arc::new(instance), self.ctx.clone()).await
    }

    /// Report every Deployment in the cluster as available
    pub fn mark_deployments_available(&self) {
        for mut deployment in self
            .cluster
            .objects()
            .into_iter()
            .filter(|r| r.kind() == "Deployment")
        {
            deployment.as_object_mut().insert(
                "status".to_string(),
                json!({"conditions": [{"type": "Available", "status": "True"}]}),
            );
            self.cluster.insert(deployment);
        }
    }

    pub fn live(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Option<Resource> {
        self.cluster
            .object(&serving_manifest::ResourceKey::new(api_version, kind, namespace, name))
    }
}
