//! Platform extensions
//!
//! A [`PlatformExtension`] inspects the live cluster and, when it applies,
//! contributes an [`ExtensionBundle`]: extra transformers plus hooks that run
//! before and after the manifest is applied. Detection runs every reconcile
//! so a platform change (e.g. OpenShift's cluster domain) is picked up
//! without a restart.

mod minikube;
mod openshift;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serving_common::crd::KnativeServing;
use serving_common::{Error, Result};
use serving_manifest::ClusterClient;
use tracing::{debug, info, instrument};

use crate::transform::{set_config_map_data, Transformer};

pub use minikube::Minikube;
pub use openshift::{OpenShift, CA_BUNDLE_CONFIG_MAP};

/// A side effect run around the manifest apply
#[async_trait]
pub trait InstallHook: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &'static str;

    /// Run the hook for an instance
    async fn run(&self, instance: &KnativeServing, cluster: &dyn ClusterClient) -> Result<()>;
}

/// What a detected platform contributes
#[derive(Clone, Default)]
pub struct ExtensionBundle {
    /// Appended to the built-in transformers
    pub transformers: Vec<Transformer>,
    /// Run before the manifest is applied
    pub pre_install: Vec<Arc<dyn InstallHook>>,
    /// Run after the manifest applied cleanly
    pub post_install: Vec<Arc<dyn InstallHook>>,
}

/// A platform the operator knows how to adapt to
#[async_trait]
pub trait PlatformExtension: Send + Sync {
    /// Platform name
    fn name(&self) -> &'static str;

    /// Inspect the cluster; `None` when the platform does not apply
    async fn detect(&self, cluster: &dyn ClusterClient) -> Result<Option<ExtensionBundle>>;
}

/// Platforms in registration order
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    platforms: Vec<Arc<dyn PlatformExtension>>,
}

impl ExtensionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// OpenShift, then Minikube
    pub fn with_defaults() -> Self {
        Self::new().register(OpenShift).register(Minikube)
    }

    /// Add a platform after the ones already registered
    pub fn register(mut self, platform: impl PlatformExtension + 'static) -> Self {
        self.platforms.push(Arc::new(platform));
        self
    }

    /// Registered platform names in order
    pub fn names(&self) -> Vec<&'static str> {
        self.platforms.iter().map(|p| p.name()).collect()
    }

    /// Run every detector in order; the first error aborts detection
    #[instrument(skip_all)]
    pub async fn detect(&self, cluster: &dyn ClusterClient) -> Result<Extensions> {
        let mut detected = Vec::new();
        for platform in &self.platforms {
            match platform.detect(cluster).await? {
                Some(bundle) => {
                    info!(platform = platform.name(), "platform detected");
                    detected.push((platform.name(), bundle));
                }
                None => debug!(platform = platform.name(), "platform not detected"),
            }
        }
        Ok(Extensions { detected })
    }
}

/// Bundles of the platforms detected on this cluster
#[derive(Clone, Default)]
pub struct Extensions {
    detected: Vec<(&'static str, ExtensionBundle)>,
}

impl Extensions {
    /// Detected platform names in order
    pub fn names(&self) -> Vec<&'static str> {
        self.detected.iter().map(|(name, _)| *name).collect()
    }

    /// All contributed transformers, in platform order
    pub fn transformers(&self) -> impl Iterator<Item = Transformer> + '_ {
        self.detected
            .iter()
            .flat_map(|(_, bundle)| bundle.transformers.iter().cloned())
    }

    /// Run every pre-install hook in platform order
    pub async fn pre_install(
        &self,
        instance: &KnativeServing,
        cluster: &dyn ClusterClient,
    ) -> Result<()> {
        self.run_hooks(instance, cluster, |b| &b.pre_install).await
    }

    /// Run every post-install hook in platform order
    pub async fn post_install(
        &self,
        instance: &KnativeServing,
        cluster: &dyn ClusterClient,
    ) -> Result<()> {
        self.run_hooks(instance, cluster, |b| &b.post_install).await
    }

    async fn run_hooks(
        &self,
        instance: &KnativeServing,
        cluster: &dyn ClusterClient,
        select: impl Fn(&ExtensionBundle) -> &Vec<Arc<dyn InstallHook>>,
    ) -> Result<()> {
        for (platform, bundle) in &self.detected {
            for hook in select(bundle) {
                debug!(platform, hook = hook.name(), "running install hook");
                hook.run(instance, cluster)
                    .await
                    .map_err(|e| Error::hook(*platform, hook.name(), e.to_string()))?;
            }
        }
        Ok(())
    }
}

const OUTBOUND_IP_RANGES_KEY: &str = "istio.sidecar.includeOutboundIPRanges";

/// Restrict sidecar egress interception on `config-network`
pub(crate) fn outbound_ip_ranges(name: &'static str, ranges: String) -> Transformer {
    let data = BTreeMap::from([(OUTBOUND_IP_RANGES_KEY.to_string(), ranges)]);
    Transformer::new(name, move |mut resource| {
        if resource.kind() == "ConfigMap"
            && resource.name() == "config-network"
            && data.values().all(|v| !v.is_empty())
        {
            set_config_map_data(&mut resource, &data);
        }
        Ok(resource)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use serving_manifest::{FakeCluster, Resource};

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl InstallHook for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, _: &KnativeServing, _: &dyn ClusterClient) -> Result<()> {
            self.log.lock().push(self.name.to_string());
            if self.fail {
                return Err(Error::internal("hook exploded"));
            }
            Ok(())
        }
    }

    struct Fixed {
        name: &'static str,
        bundle: Option<ExtensionBundle>,
    }

    #[async_trait]
    impl PlatformExtension for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn detect(&self, _: &dyn ClusterClient) -> Result<Option<ExtensionBundle>> {
            Ok(self.bundle.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl PlatformExtension for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn detect(&self, _: &dyn ClusterClient) -> Result<Option<ExtensionBundle>> {
            Err(Error::internal("discovery unavailable"))
        }
    }

    fn hook(name: &'static str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Arc<dyn InstallHook> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
            fail,
        })
    }

    fn instance() -> KnativeServing {
        KnativeServing::new("knative-serving", Default::default())
    }

    /// Story: Hooks run in registration order, pre before post
    #[tokio::test]
    async fn story_hooks_run_in_platform_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ExtensionRegistry::new()
            .register(Fixed {
                name: "first",
                bundle: Some(ExtensionBundle {
                    transformers: vec![Transformer::new("first-t", Ok)],
                    pre_install: vec![hook("first-pre", &log, false)],
                    post_install: vec![hook("first-post", &log, false)],
                }),
            })
            .register(Fixed {
                name: "absent",
                bundle: None,
            })
            .register(Fixed {
                name: "second",
                bundle: Some(ExtensionBundle {
                    transformers: vec![Transformer::new("second-t", Ok)],
                    pre_install: vec![hook("second-pre", &log, false)],
                    post_install: Vec::new(),
                }),
            });

        let cluster = FakeCluster::new();
        let extensions = registry.detect(&cluster).await.unwrap();
        assert_eq!(extensions.names(), ["first", "second"]);
        let names: Vec<_> = extensions.transformers().map(|t| t.name()).collect();
        assert_eq!(names, ["first-t", "second-t"]);

        extensions.pre_install(&instance(), &cluster).await.unwrap();
        extensions.post_install(&instance(), &cluster).await.unwrap();
        assert_eq!(*log.lock(), ["first-pre", "second-pre", "first-post"]);
    }

    /// Story: A failing hook stops the remaining hooks and names itself
    #[tokio::test]
    async fn story_failing_hook_aborts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ExtensionRegistry::new().register(Fixed {
            name: "platform",
            bundle: Some(ExtensionBundle {
                transformers: Vec::new(),
                pre_install: vec![hook("bad", &log, true), hook("never", &log, false)],
                post_install: Vec::new(),
            }),
        });
        let cluster = FakeCluster::new();
        let extensions = registry.detect(&cluster).await.unwrap();

        let err = extensions.pre_install(&instance(), &cluster).await.unwrap_err();
        match err {
            Error::Hook {
                extension, hook, ..
            } => {
                assert_eq!(extension, "platform");
                assert_eq!(hook, "bad");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(*log.lock(), ["bad"]);
    }

    #[tokio::test]
    async fn detector_error_aborts_detection() {
        let registry = ExtensionRegistry::new()
            .register(Broken)
            .register(Fixed {
                name: "later",
                bundle: Some(ExtensionBundle::default()),
            });
        assert!(registry.detect(&FakeCluster::new()).await.is_err());
    }

    #[test]
    fn default_registration_order() {
        assert_eq!(ExtensionRegistry::with_defaults().names(), ["openshift", "minikube"]);
    }

    #[test]
    fn outbound_ranges_only_touch_config_network() {
        let t = outbound_ip_ranges("egress", "10.0.0.1/24".to_string());
        let network = Resource::from_value(json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": {"name": "config-network", "namespace": "knative-serving"},
            "data": {"ingress.class": "istio"}
        }))
        .unwrap();
        let out = t.apply(network).unwrap();
        assert_eq!(out.data()[OUTBOUND_IP_RANGES_KEY], "10.0.0.1/24");
        assert_eq!(out.data()["ingress.class"], "istio");

        let skipped = outbound_ip_ranges("egress", String::new());
        let network = Resource::from_value(json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": {"name": "config-network"}
        }))
        .unwrap();
        assert_eq!(skipped.apply(network.clone()).unwrap(), network);
    }
}
