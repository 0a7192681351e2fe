// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes reconcilers that react to watch events.

pub mod configmap;
pub mod gitrepository;
pub mod namespace;

pub use configmap::ConfigMapReconciler;
pub use gitrepository::GitRepositoryReconciler;
pub use namespace::NamespaceReconciler;

use futures::{pin_mut, StreamExt};
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api, Resource,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use tracing::warn;

/// Run `on_delete` for every object removed from the cluster.
///
/// The controller runtime only reconciles objects it still has in its cache,
/// so cleanup of deleted objects is driven from a plain watch.
pub(crate) async fn watch_deletions<K, F, Fut>(api: Api<K>, on_delete: F)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    F: Fn(K) -> Fut,
    Fut: Future<Output = ()>,
{
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    pin_mut!(stream);

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Delete(obj)) => on_delete(obj).await,
            Ok(_) => {}
            Err(e) => warn!("Error watching for deletions: {}", e),
        }
    }
}
