// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! ConfigMap reconciler - propagates annotated ConfigMaps out of the source namespace.

use crate::constants::{reconcile::ERROR_REQUEUE_SECS, sync::SOURCE_NAMESPACE};
use crate::error::{ControllerError, Result};
use crate::metrics;
use crate::reconcilers::watch_deletions;
use crate::sync::configmaps::is_sync_enabled;
use crate::sync::{delete_copies_of, sync_configmap};
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    runtime::{controller::Action, watcher, Controller},
    Api, Client, ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct ConfigMapReconciler {
    client: Client,
}

impl ConfigMapReconciler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let configmaps: Api<ConfigMap> = Api::namespaced(self.client.clone(), SOURCE_NAMESPACE);
        let context = Arc::new(self);

        let controller = Controller::new(configmaps.clone(), watcher::Config::default())
            .run(reconcile, error_policy, context.clone())
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled ConfigMap: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            });
        let deletions = watch_deletions(configmaps, |configmap| {
            let ctx = context.clone();
            async move { ctx.source_deleted(&configmap.name_any()).await }
        });

        tokio::join!(controller, deletions);
        Ok(())
    }

    async fn source_deleted(&self, name: &str) {
        match delete_copies_of(&self.client, name).await {
            Ok(0) => debug!("ConfigMap {}/{} removed, no copies to clean up", SOURCE_NAMESPACE, name),
            Ok(n) => info!("ConfigMap {}/{} removed, deleted {} copies", SOURCE_NAMESPACE, name, n),
            Err(e) => error!("Failed to clean up copies of ConfigMap {}/{}: {}", SOURCE_NAMESPACE, name, e),
        }
    }
}

async fn reconcile(configmap: Arc<ConfigMap>, ctx: Arc<ConfigMapReconciler>) -> Result<Action> {
    metrics::increment_reconciliations("configmap");
    let name = configmap.name_any();

    if !is_sync_enabled(&configmap) {
        debug!("ConfigMap {} does not have sync annotation, skipping", name);
        return Ok(Action::await_change());
    }

    let synced = sync_configmap(&ctx.client, &configmap).await?;
    info!("Successfully synced ConfigMap {} to {} namespaces", name, synced);

    Ok(Action::await_change())
}

fn error_policy(
    _configmap: Arc<ConfigMap>,
    error: &ControllerError,
    _ctx: Arc<ConfigMapReconciler>,
) -> Action {
    error!("Reconciliation error: {}", error);
    metrics::increment_reconciliation_errors("configmap");
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_SECS))
}
