//! Reconcile stages
//!
//! A pass folds a [`ReconcileState`] through [`STAGES`] in order. Each stage
//! takes the state and returns it, or an error that ends the pass. Nothing
//! already applied is rolled back; the next pass converges from wherever
//! this one stopped.

use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use serving_common::crd::{KnativeServing, KnativeServingStatus};
use serving_common::{Error, Result, SERVING_FINALIZER};
use serving_manifest::predicate::by_kind;
use serving_manifest::Manifest;
use tracing::{debug, info, warn};

use super::{delete_obsolete, has_finalizer, identity, Context};
use crate::extension::Extensions;
use crate::transform::TransformPipeline;

/// One step of a reconcile pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Add the cleanup finalizer once
    EnsureFinalizer,
    /// Initialize and persist conditions on first sight
    InitStatus,
    /// Detect platforms and transform the base manifest
    Transform,
    /// Run hooks and apply the manifest
    Install,
    /// Check every Deployment in the manifest is available
    CheckDeployments,
    /// Remove resources left behind by older releases
    DeleteObsoleteResources,
}

/// Stages of a pass, in execution order
pub const STAGES: [Stage; 6] = [
    Stage::EnsureFinalizer,
    Stage::InitStatus,
    Stage::Transform,
    Stage::Install,
    Stage::CheckDeployments,
    Stage::DeleteObsoleteResources,
];

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EnsureFinalizer => "ensure-finalizer",
            Self::InitStatus => "init-status",
            Self::Transform => "transform",
            Self::Install => "install",
            Self::CheckDeployments => "check-deployments",
            Self::DeleteObsoleteResources => "delete-obsolete-resources",
        };
        f.write_str(name)
    }
}

/// Value threaded through the stages of one pass
pub struct ReconcileState {
    /// The instance, with status as updated so far
    pub instance: KnativeServing,
    /// Manifest for this pass; transformed by [`Stage::Transform`]
    pub manifest: Manifest,
    /// Platforms detected during [`Stage::Transform`]
    pub extensions: Extensions,
    persisted: Option<KnativeServingStatus>,
}

impl ReconcileState {
    /// Start a pass for an instance over the base manifest
    pub fn new(instance: KnativeServing, manifest: Manifest) -> Self {
        let persisted = instance.status.clone();
        Self {
            instance,
            manifest,
            extensions: Extensions::default(),
            persisted,
        }
    }

    /// Whether the instance reports Ready
    pub fn is_ready(&self) -> bool {
        self.instance
            .status
            .as_ref()
            .is_some_and(KnativeServingStatus::is_ready)
    }

    fn status_changed(&self) -> bool {
        let observed = self.persisted.as_ref().and_then(|s| s.observed_generation);
        self.instance.status != self.persisted || observed != self.instance.metadata.generation
    }
}

impl Stage {
    /// Run this stage
    pub async fn run(self, state: ReconcileState, ctx: &Context) -> Result<ReconcileState> {
        match self {
            Self::EnsureFinalizer => ensure_finalizer(state, ctx).await,
            Self::InitStatus => init_status(state, ctx).await,
            Self::Transform => transform(state, ctx).await,
            Self::Install => install(state, ctx).await,
            Self::CheckDeployments => check_deployments(state, ctx).await,
            Self::DeleteObsoleteResources => delete_obsolete_resources(state).await,
        }
    }
}

/// Run every stage in order and persist the resulting status if it changed
pub async fn run_stages(mut state: ReconcileState, ctx: &Context) -> Result<ReconcileState> {
    for stage in STAGES {
        debug!(%stage, "running stage");
        state = stage.run(state, ctx).await?;
    }
    if state.status_changed() {
        persist_status(&mut state, ctx).await?;
    }
    Ok(state)
}

async fn persist_status(state: &mut ReconcileState, ctx: &Context) -> Result<()> {
    let generation = state.instance.metadata.generation;
    let status = state.instance.status_mut();
    status.observed_generation = generation;
    let status = status.clone();

    let (namespace, name) = identity(&state.instance);
    ctx.kube.patch_status(&namespace, &name, &status).await?;
    state.persisted = Some(status);
    Ok(())
}

async fn ensure_finalizer(mut state: ReconcileState, ctx: &Context) -> Result<ReconcileState> {
    if has_finalizer(&state.instance) {
        return Ok(state);
    }
    let (namespace, name) = identity(&state.instance);
    ctx.kube
        .add_finalizer(&namespace, &name, SERVING_FINALIZER)
        .await?;
    state
        .instance
        .finalizers_mut()
        .push(SERVING_FINALIZER.to_string());
    debug!("finalizer added");
    Ok(state)
}

async fn init_status(mut state: ReconcileState, ctx: &Context) -> Result<ReconcileState> {
    let initialized = state
        .instance
        .status
        .as_ref()
        .is_some_and(|s| !s.conditions.is_empty());
    if initialized {
        return Ok(state);
    }
    state.instance.status_mut().initialize_conditions();
    persist_status(&mut state, ctx).await?;
    Ok(state)
}

async fn transform(mut state: ReconcileState, ctx: &Context) -> Result<ReconcileState> {
    let cluster = state.manifest.client().clone();
    state.extensions = match ctx.extensions.detect(cluster.as_ref()).await {
        Ok(extensions) => extensions,
        Err(e) => return fail_install(state, ctx, e).await,
    };

    let transformed = TransformPipeline::builtin(&state.instance).and_then(|mut pipeline| {
        pipeline.extend(state.extensions.transformers());
        pipeline.run(&state.manifest)
    });
    match transformed {
        Ok(manifest) => {
            debug!(resources = manifest.len(), "manifest transformed");
            state.manifest = manifest;
            Ok(state)
        }
        Err(e) => fail_install(state, ctx, e).await,
    }
}

async fn install(mut state: ReconcileState, ctx: &Context) -> Result<ReconcileState> {
    let deploying = state
        .instance
        .status
        .as_ref()
        .is_some_and(KnativeServingStatus::is_deploying);
    if deploying {
        debug!("installed and waiting on deployments, skipping apply");
        return Ok(state);
    }

    let cluster = state.manifest.client().clone();
    let pre = state
        .extensions
        .pre_install(&state.instance, cluster.as_ref())
        .await;
    if let Err(e) = pre {
        return fail_install(state, ctx, e).await;
    }

    match state.manifest.apply_all().await {
        Ok(applied) => state.instance.status_mut().resources = applied,
        Err(failure) => {
            state.instance.status_mut().resources = failure.applied.clone();
            return fail_install(state, ctx, failure.into()).await;
        }
    }

    let post = state
        .extensions
        .post_install(&state.instance, cluster.as_ref())
        .await;
    if let Err(e) = post {
        return fail_install(state, ctx, e).await;
    }

    let status = state.instance.status_mut();
    status.version = Some(ctx.version.clone());
    status.mark_install_succeeded();
    info!(
        version = %ctx.version,
        resources = status.resources.len(),
        "install succeeded"
    );
    Ok(state)
}

async fn fail_install(
    mut state: ReconcileState,
    ctx: &Context,
    error: Error,
) -> Result<ReconcileState> {
    warn!(error = %error, "install failed");
    state
        .instance
        .status_mut()
        .mark_install_failed(&error.to_string());
    persist_status(&mut state, ctx).await?;
    Err(error)
}

async fn check_deployments(mut state: ReconcileState, ctx: &Context) -> Result<ReconcileState> {
    let deployments = state.manifest.filter(by_kind("Deployment"));
    for resource in deployments.resources() {
        let live = deployments
            .get(resource)
            .await
            .and_then(|live| live.map(|l| l.to_typed::<Deployment>()).transpose());
        let available = match live {
            Ok(Some(deployment)) => is_available(&deployment),
            Ok(None) => false,
            Err(e) => {
                warn!(deployment = %resource, error = %e, "deployment check failed");
                state
                    .instance
                    .status_mut()
                    .mark_deployments_check_failed(&e.to_string());
                persist_status(&mut state, ctx).await?;
                return Err(e);
            }
        };
        if !available {
            debug!(deployment = %resource, "deployment not available yet");
            state.instance.status_mut().mark_deployments_not_ready();
            return Ok(state);
        }
    }
    state.instance.status_mut().mark_deployments_available();
    Ok(state)
}

fn is_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        })
}

async fn delete_obsolete_resources(state: ReconcileState) -> Result<ReconcileState> {
    let namespace = state.instance.target_namespace();
    delete_obsolete(state.manifest.client().as_ref(), &namespace).await?;
    Ok(state)
}
