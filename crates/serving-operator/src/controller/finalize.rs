//! Cleanup when an instance is deleted
//!
//! Installed resources are shared by every instance in the cluster, so they
//! are only removed when the instance going away is the last live one.
//! CustomResourceDefinitions are never removed: deleting them would delete
//! every user resource of those kinds.

use serving_common::crd::KnativeServing;
use serving_common::{Result, SERVING_FINALIZER};
use serving_manifest::predicate::{by_kind, is_rbac, no_crds, none_of};
use serving_manifest::Resource;
use tracing::{debug, info};

use super::{has_finalizer, identity, Context};
use crate::transform::inject_namespace;

/// Finalize an instance marked for deletion
///
/// Deletes Deployments first, then everything else but RBAC, then RBAC, and
/// finally releases the instance by removing the operator's finalizer.
pub async fn finalize(instance: &KnativeServing, ctx: &Context) -> Result<()> {
    if !has_finalizer(instance) {
        debug!("finalizer not present, nothing to clean up");
        return Ok(());
    }

    let key = instance.key();
    let remaining: Vec<String> = ctx
        .kube
        .list_instances()
        .await?
        .iter()
        .filter(|other| other.metadata.deletion_timestamp.is_none() && other.key() != key)
        .map(KnativeServing::key)
        .collect();

    if remaining.is_empty() {
        delete_installed(instance, ctx).await?;
        info!("installed resources deleted");
    } else {
        info!(?remaining, "other instances remain, keeping installed resources");
    }

    let (namespace, name) = identity(instance);
    ctx.kube
        .remove_finalizer(&namespace, &name, SERVING_FINALIZER)
        .await?;
    info!("finalizer removed");
    Ok(())
}

async fn delete_installed(instance: &KnativeServing, ctx: &Context) -> Result<()> {
    let namespace = inject_namespace(&instance.target_namespace());
    let manifest = ctx
        .manifest
        .transform(|resource| namespace.apply(resource))?
        .filter(no_crds);

    let deployments = by_kind("Deployment");
    manifest.filter(&deployments).delete_all().await?;

    let neither: [&(dyn Fn(&Resource) -> bool + Sync); 2] = [&deployments, &is_rbac];
    manifest.filter(none_of(&neither)).delete_all().await?;

    manifest.filter(is_rbac).delete_all().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::test_support::*;
    use super::super::MockKubeClient;
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use serde_json::json;
    use serving_common::{CREATED_BY_ANNOTATION, CREATED_BY_VALUE};
    use serving_manifest::{FakeCluster, Write};

    fn res(api_version: &str, kind: &str, name: &str) -> Resource {
        Resource::from_value(json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": {"name": name, "namespace": "knative-serving"}
        }))
        .unwrap()
    }

    fn manifest_resources() -> Vec<Resource> {
        vec![
            res("rbac.authorization.k8s.io/v1", "ClusterRole", "knative-serving-admin"),
            res("rbac.authorization.k8s.io/v1", "ClusterRoleBinding", "knative-serving-controller-admin"),
            res("v1", "ServiceAccount", "controller"),
            res("apps/v1", "Deployment", "activator"),
            res("v1", "ConfigMap", "config-network"),
            res("apps/v1", "Deployment", "controller"),
            res("apiextensions.k8s.io/v1", "CustomResourceDefinition", "services.serving.knative.dev"),
        ]
    }

    fn installed_cluster() -> Arc<FakeCluster> {
        let cluster = Arc::new(FakeCluster::new());
        for mut resource in manifest_resources() {
            resource.set_annotation(CREATED_BY_ANNOTATION, CREATED_BY_VALUE);
            cluster.insert(resource);
        }
        cluster
    }

    fn deleting(mut instance: KnativeServing) -> KnativeServing {
        instance.metadata.finalizers = Some(vec![SERVING_FINALIZER.to_string()]);
        instance.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        instance
    }

    fn deleted_names(cluster: &FakeCluster) -> Vec<String> {
        cluster
            .writes()
            .into_iter()
            .map(|w| match w {
                Write::Delete(key) => key.name,
                other => panic!("unexpected write {other:?}"),
            })
            .collect()
    }

    /// Story: Deleting the only instance removes what the operator installed,
    /// deployments first and RBAC last, then releases the instance
    #[tokio::test]
    async fn story_last_instance_deletes_everything() {
        let cluster = installed_cluster();
        let target = deleting(instance());
        let listed = target.clone();

        let mut kube = MockKubeClient::new();
        kube.expect_list_instances()
            .returning(move || Ok(vec![listed.clone()]));
        kube.expect_remove_finalizer()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let ctx = context(kube, cluster.clone(), manifest_resources());

        finalize(&target, &ctx).await.unwrap();
        assert_eq!(
            deleted_names(&cluster),
            [
                "controller",
                "activator",
                "config-network",
                "controller",
                "knative-serving-controller-admin",
                "knative-serving-admin",
            ]
        );
        let left: Vec<_> = cluster.objects().iter().map(|r| r.kind().to_string()).collect();
        assert_eq!(left, ["CustomResourceDefinition"]);
    }

    /// Story: While another instance is live, deleting one only releases it
    #[tokio::test]
    async fn story_other_instance_keeps_resources() {
        let cluster = installed_cluster();
        let target = deleting(instance());
        let mut other = instance();
        other.metadata.namespace = Some("other".to_string());
        let listed = vec![target.clone(), other];

        let mut kube = MockKubeClient::new();
        kube.expect_list_instances()
            .returning(move || Ok(listed.clone()));
        kube.expect_remove_finalizer()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let ctx = context(kube, cluster.clone(), manifest_resources());

        finalize(&target, &ctx).await.unwrap();
        assert!(cluster.writes().is_empty());
    }

    #[tokio::test]
    async fn instance_without_our_finalizer_is_left_alone() {
        let mut target = deleting(instance());
        target.metadata.finalizers = Some(vec!["someone-else".to_string()]);
        let ctx = context(MockKubeClient::new(), installed_cluster(), manifest_resources());

        finalize(&target, &ctx).await.unwrap();
    }

    #[tokio::test]
    async fn delete_failure_keeps_the_finalizer() {
        let cluster = installed_cluster();
        cluster.fail_on(
            serving_manifest::ResourceKey::new(
                "apps/v1",
                "Deployment",
                Some("knative-serving"),
                "activator",
            ),
            "forbidden",
        );
        let target = deleting(instance());
        let listed = target.clone();

        let mut kube = MockKubeClient::new();
        kube.expect_list_instances()
            .returning(move || Ok(vec![listed.clone()]));
        kube.expect_remove_finalizer().never();
        let ctx = context(kube, cluster, manifest_resources());

        assert!(finalize(&target, &ctx).await.is_err());
    }
}
