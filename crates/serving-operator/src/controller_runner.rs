//! Controller runner

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use serving_common::crd::KnativeServing;

use crate::controller::{error_policy, reconcile, Context};

/// Watcher timeout (seconds), kept below the client read timeout so idle
/// watches are closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the KnativeServing controller until a shutdown signal
///
/// Deployments owned by an instance requeue it when their status changes.
pub async fn run_controller(client: Client, ctx: Arc<Context>) {
    let instances: Api<KnativeServing> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::all(client);

    tracing::info!("starting KnativeServing controller");

    Controller::new(instances, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .owns(
            deployments,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("KnativeServing"))
        .await;

    tracing::info!("controller stopped");
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
