//! KnativeServing controller
//!
//! Each pass either finalizes an instance marked for deletion or runs the
//! fixed stage list in [`stages`] against a freshly transformed copy of the
//! base manifest. Retry and backoff belong to the controller runtime; a
//! failed pass returns its error and [`error_policy`] schedules the requeue.

mod finalize;
mod generation;
mod obsolete;
mod stages;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serving_common::crd::{KnativeServing, KnativeServingStatus};
use serving_common::{Error, FIELD_MANAGER};
use serving_manifest::Manifest;
use tracing::{error, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::extension::ExtensionRegistry;

pub use finalize::finalize;
pub use generation::{GenerationChange, GenerationTracker};
pub use obsolete::{delete_obsolete, obsolete_resources};
pub use stages::{run_stages, ReconcileState, Stage, STAGES};

/// Default delay before an unready or failed instance is reconciled again
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(5);

/// Operations on the KnativeServing resources themselves
///
/// Mocked in tests; [`KubeClientImpl`] talks to the API server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Replace the status subresource of an instance
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &KnativeServingStatus,
    ) -> Result<(), Error>;

    /// Add a finalizer unless already present
    async fn add_finalizer(&self, namespace: &str, name: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a finalizer, leaving any others in place
    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Every instance in every namespace
    async fn list_instances(&self) -> Result<Vec<KnativeServing>, Error>;

    /// Get an instance by namespace and name
    async fn get_instance(&self, namespace: &str, name: &str)
        -> Result<Option<KnativeServing>, Error>;

    /// Create an instance
    async fn create_instance(&self, instance: &KnativeServing) -> Result<(), Error>;
}

/// [`KubeClient`] backed by a kube-rs client
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<KnativeServing> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.api(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &KnativeServingStatus,
    ) -> Result<(), Error> {
        let status_patch = serde_json::json!({
            "status": status
        });
        self.api(namespace)
            .patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&status_patch),
            )
            .await?;
        Ok(())
    }

    async fn add_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let instance = self.api(namespace).get(name).await?;
        let mut finalizers = instance.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        self.patch_finalizers(namespace, name, finalizers).await
    }

    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let instance = match self.api(namespace).get_opt(name).await? {
            Some(instance) => instance,
            None => return Ok(()),
        };
        let finalizers: Vec<String> = instance
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();
        self.patch_finalizers(namespace, name, finalizers).await
    }

    async fn list_instances(&self) -> Result<Vec<KnativeServing>, Error> {
        let api: Api<KnativeServing> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KnativeServing>, Error> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create_instance(&self, instance: &KnativeServing) -> Result<(), Error> {
        let namespace = instance.namespace().unwrap_or_default();
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api(&namespace).create(&params, instance).await?;
        Ok(())
    }
}

/// Shared state for every reconcile pass
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(kube, manifest)
///     .extensions(ExtensionRegistry::with_defaults())
///     .build();
/// ```
pub struct Context {
    /// Client for the KnativeServing resources (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Base manifest as loaded at startup, before any transform
    pub manifest: Manifest,
    /// Platforms probed on every pass
    pub extensions: ExtensionRegistry,
    /// Last generation handled per instance
    pub generations: GenerationTracker,
    /// Version recorded in status after a successful install
    pub version: String,
    /// Delay before an unready or failed instance is looked at again
    pub requeue_after: Duration,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(kube: Arc<dyn KubeClient>, manifest: Manifest) -> ContextBuilder {
        ContextBuilder::new(kube, manifest)
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    kube: Arc<dyn KubeClient>,
    manifest: Manifest,
    extensions: ExtensionRegistry,
    version: String,
    requeue_after: Duration,
}

impl ContextBuilder {
    fn new(kube: Arc<dyn KubeClient>, manifest: Manifest) -> Self {
        Self {
            kube,
            manifest,
            extensions: ExtensionRegistry::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            requeue_after: DEFAULT_REQUEUE,
        }
    }

    /// Set the platform extensions probed on every pass
    pub fn extensions(mut self, extensions: ExtensionRegistry) -> Self {
        self.extensions = extensions;
        self
    }

    /// Override the version written to status
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Override the requeue delay
    pub fn requeue_after(mut self, delay: Duration) -> Self {
        self.requeue_after = delay;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self.kube,
            manifest: self.manifest,
            extensions: self.extensions,
            generations: GenerationTracker::new(),
            version: self.version,
            requeue_after: self.requeue_after,
        }
    }
}

/// Reconcile a KnativeServing instance
///
/// Instances marked for deletion are finalized. Everything else runs the
/// stage list; a ready instance waits for the next change, anything else is
/// polled again after the configured delay.
#[instrument(skip(instance, ctx), fields(instance = %instance.key()))]
pub async fn reconcile(instance: Arc<KnativeServing>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = instance.key();

    if instance.metadata.deletion_timestamp.is_some() {
        info!("instance is being deleted");
        finalize(&instance, &ctx).await?;
        ctx.generations.forget(&key);
        return Ok(Action::await_change());
    }

    let generation = instance.metadata.generation.unwrap_or_default();
    let change = ctx.generations.observe(&key, generation)?;
    info!(%change, generation, "reconciling instance");

    let state = ReconcileState::new((*instance).clone(), ctx.manifest.clone());
    let state = run_stages(state, &ctx).await?;

    if state.is_ready() {
        info!("instance is ready");
        Ok(Action::await_change())
    } else {
        Ok(Action::requeue(ctx.requeue_after))
    }
}

/// Error policy for the controller
///
/// Logs the error and requeues after the configured delay. No retry counter
/// is kept here.
pub fn error_policy(instance: Arc<KnativeServing>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        instance = %instance.key(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ctx.requeue_after)
}

/// Whether the instance carries the operator's finalizer
pub(crate) fn has_finalizer(instance: &KnativeServing) -> bool {
    instance
        .finalizers()
        .iter()
        .any(|f| f == serving_common::SERVING_FINALIZER)
}

/// Namespace and name used to address the instance
pub(crate) fn identity(instance: &KnativeServing) -> (String, String) {
    (instance.namespace().unwrap_or_default(), instance.name_any())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;
    use serving_common::SERVING_FINALIZER;
    use serving_manifest::{FakeCluster, Resource, ResourceKey};

    fn deployment(name: &str) -> Resource {
        Resource::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": "knative-serving"},
            "spec": {"template": {"spec": {"containers": [{"name": name, "image": "img"}]}}}
        }))
        .unwrap()
    }

    fn mark_available(cluster: &FakeCluster, name: &str) {
        let key = ResourceKey::new("apps/v1", "Deployment", Some("knative-serving"), name);
        let mut live = cluster.object(&key).unwrap();
        live.as_object_mut().insert(
            "status".to_string(),
            json!({"conditions": [{"type": "Available", "status": "True"}]}),
        );
        cluster.insert(live);
    }

    fn assert_send<T: Send>(_: T) {}

    #[test]
    fn reconcile_future_can_be_driven_by_the_controller() {
        let ctx = context(MockKubeClient::new(), Arc::new(FakeCluster::new()), Vec::new());
        let ctx = Arc::new(ctx);
        assert_send(reconcile(Arc::new(instance()), ctx.clone()));

        let mut deleting = instance();
        deleting.metadata.finalizers = Some(vec![SERVING_FINALIZER.to_string()]);
        assert_send(finalize(&deleting, &ctx));
    }

    /// Story: A new instance is installed, then becomes ready once its
    /// deployments report available
    #[tokio::test]
    async fn story_new_instance_installs_then_becomes_ready() {
        let capture = StatusCapture::default();
        let cluster = Arc::new(FakeCluster::new());
        let ctx = Arc::new(context(
            permissive_kube(&capture),
            cluster.clone(),
            vec![deployment("controller")],
        ));

        let action = reconcile(Arc::new(instance()), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(DEFAULT_REQUEUE));
        let status = capture.last().unwrap();
        assert!(status.is_installed());
        assert!(status.is_deploying());
        assert_eq!(status.version.as_deref(), Some("1.2.3"));
        assert_eq!(status.observed_generation, Some(1));

        mark_available(&cluster, "controller");
        let mut next = instance();
        next.metadata.finalizers = Some(vec![SERVING_FINALIZER.to_string()]);
        next.status = Some(status);
        let action = reconcile(Arc::new(next), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(capture.last().unwrap().is_ready());
    }

    #[tokio::test]
    async fn stale_generation_is_rejected_before_any_stage() {
        let kube = MockKubeClient::new();
        let cluster = Arc::new(FakeCluster::new());
        let ctx = Arc::new(context(kube, cluster.clone(), vec![deployment("controller")]));
        ctx.generations.observe("knative-serving/knative-serving", 3).unwrap();

        let mut old = instance();
        old.metadata.generation = Some(2);
        let err = reconcile(Arc::new(old), ctx).await.unwrap_err();
        assert!(matches!(err, Error::StaleGeneration { .. }));
        assert!(cluster.writes().is_empty());
    }

    #[test]
    fn error_policy_requeues_after_configured_delay() {
        let ctx = Arc::new(
            Context::builder(
                Arc::new(MockKubeClient::new()),
                Manifest::from_resources(Vec::new(), Arc::new(FakeCluster::new())),
            )
            .requeue_after(Duration::from_secs(30))
            .build(),
        );
        let action = error_policy(
            Arc::new(instance()),
            &Error::internal("boom"),
            ctx,
        );
        assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    }
}
