// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Namespace reconciler - converges the propagated ConfigMaps of a namespace
//! to the set of sources that target it.

use crate::constants::{reconcile::ERROR_REQUEUE_SECS, sync::SOURCE_NAMESPACE};
use crate::error::{ControllerError, Result};
use crate::metrics;
use crate::sync::configmaps::{copy_configmap_to_namespace, targets_namespace};
use crate::sync::{get_sync_sources, prune_namespace, source_reference};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    runtime::{controller::Action, Controller},
    Api, Client, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct NamespaceReconciler {
    client: Client,
}

impl NamespaceReconciler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let context = Arc::new(self);

        Controller::new(namespaces, WatcherConfig::default())
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled namespace: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }
}

async fn reconcile(namespace: Arc<Namespace>, ctx: Arc<NamespaceReconciler>) -> Result<Action> {
    metrics::increment_reconciliations("namespace");
    let name = namespace.name_any();

    if name == SOURCE_NAMESPACE {
        return Ok(Action::await_change());
    }
    if namespace.metadata.deletion_timestamp.is_some() {
        debug!("Namespace {} is terminating, skipping", name);
        return Ok(Action::await_change());
    }

    let sources = get_sync_sources(&ctx.client).await?;
    let wanted: Vec<_> = sources
        .iter()
        .filter(|source| targets_namespace(source, &namespace))
        .collect();

    let mut synced = 0;
    for source in &wanted {
        copy_configmap_to_namespace(&ctx.client, source, &name).await?;
        synced += 1;
    }

    let keep: Vec<String> = wanted
        .iter()
        .map(|source| source_reference(&source.name_any()))
        .collect();
    let pruned = prune_namespace(&ctx.client, &name, &keep).await?;

    info!(
        "Processed namespace {}: {} ConfigMaps synced, {} stale copies removed",
        name, synced, pruned
    );
    Ok(Action::await_change())
}

fn error_policy(
    _namespace: Arc<Namespace>,
    error: &ControllerError,
    _ctx: Arc<NamespaceReconciler>,
) -> Action {
    error!("Reconciliation error: {}", error);
    metrics::increment_reconciliation_errors("namespace");
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_SECS))
}
