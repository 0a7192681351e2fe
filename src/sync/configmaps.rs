// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! ConfigMap listing, filtering, and copying utilities

use crate::constants::{sync, OPERATOR_NAME};
use crate::error::Result;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::{
    api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams},
    Api, Client, ResourceExt,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// What happened to a single target namespace during a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied,
    /// The target holds a ConfigMap of the same name that is not our copy
    Skipped,
}

fn annotation<'a>(annotations: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    annotations.get(key).map(String::as_str)
}

/// Annotation flags are compared case-insensitively against "true"
pub fn is_true(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

/// Split a comma separated annotation, trimming entries and dropping empties
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `sync-source` value identifying copies of the named source ConfigMap
pub fn source_reference(name: &str) -> String {
    format!("{}/{}", sync::SOURCE_NAMESPACE, name)
}

/// Check if a ConfigMap in the source namespace asks to be propagated
pub fn is_sync_enabled(configmap: &ConfigMap) -> bool {
    configmap.namespace().as_deref() == Some(sync::SOURCE_NAMESPACE)
        && is_true(annotation(configmap.annotations(), sync::CONFIGMAP))
}

/// Explicit target list of a source ConfigMap, if it carries one
pub fn explicit_targets(configmap: &ConfigMap) -> Option<Vec<String>> {
    annotation(configmap.annotations(), sync::CONFIGMAP_NAMESPACES).map(split_list)
}

/// Check if a namespace opted in to receive propagated ConfigMaps
pub fn is_sync_target(namespace: &Namespace) -> bool {
    namespace.name_any() != sync::SOURCE_NAMESPACE
        && is_true(annotation(namespace.annotations(), sync::TARGET))
}

/// Check if an opted-in namespace accepts the named ConfigMap through its allow list
pub fn accepts_configmap(namespace: &Namespace, configmap_name: &str) -> bool {
    if !is_sync_target(namespace) {
        return false;
    }

    match annotation(namespace.annotations(), sync::TARGET_CONFIGMAPS) {
        Some(filter) => split_list(filter).iter().any(|n| n == configmap_name),
        None => true,
    }
}

/// Decide whether `source` should be copied into `namespace`.
///
/// An explicit target list on the source wins; otherwise the namespace must
/// opt in and allow the ConfigMap by name.
pub fn targets_namespace(source: &ConfigMap, namespace: &Namespace) -> bool {
    let name = namespace.name_any();
    if name == sync::SOURCE_NAMESPACE {
        return false;
    }

    match explicit_targets(source) {
        Some(targets) => targets.iter().any(|t| *t == name),
        None => accepts_configmap(namespace, &source.name_any()),
    }
}

/// Check if a ConfigMap was created by propagation, optionally from a given source
pub fn is_copy(configmap: &ConfigMap, source: Option<&str>) -> bool {
    match (annotation(configmap.annotations(), sync::SOURCE), source) {
        (Some(existing), Some(expected)) => existing == expected,
        (Some(existing), None) => !existing.is_empty(),
        (None, _) => false,
    }
}

/// Build the copy of `source` placed in `target_namespace`
pub fn build_copy(source: &ConfigMap, target_namespace: &str) -> ConfigMap {
    let mut annotations: BTreeMap<String, String> = source
        .annotations()
        .iter()
        .filter(|(k, _)| !k.starts_with(sync::PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    annotations.insert(
        sync::SOURCE.to_string(),
        source_reference(&source.name_any()),
    );

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(source.name_any()),
            namespace: Some(target_namespace.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        data: source.data.clone(),
        binary_data: source.binary_data.clone(),
        immutable: None,
    }
}

/// Get all ConfigMaps in the source namespace that are marked for propagation
#[instrument(skip(client))]
pub async fn get_sync_sources(client: &Client) -> Result<Vec<ConfigMap>> {
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), sync::SOURCE_NAMESPACE);
    let list = configmaps.list(&ListParams::default()).await?;

    Ok(list.items.into_iter().filter(is_sync_enabled).collect())
}

/// Resolve the namespaces a source ConfigMap should be copied into
#[instrument(skip(client, source), fields(configmap = %source.name_any()))]
pub async fn get_target_namespaces(client: &Client, source: &ConfigMap) -> Result<Vec<String>> {
    if let Some(targets) = explicit_targets(source) {
        return Ok(targets
            .into_iter()
            .filter(|t| t != sync::SOURCE_NAMESPACE)
            .collect());
    }

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let list = namespaces.list(&ListParams::default()).await?;
    let name = source.name_any();

    Ok(list
        .items
        .iter()
        .filter(|ns| accepts_configmap(ns, &name))
        .map(ResourceExt::name_any)
        .collect())
}

/// Copy a source ConfigMap into a namespace, leaving foreign ConfigMaps alone
#[instrument(
    skip(client, source),
    fields(configmap = %source.name_any(), target = %target_namespace)
)]
pub async fn copy_configmap_to_namespace(
    client: &Client,
    source: &ConfigMap,
    target_namespace: &str,
) -> Result<SyncOutcome> {
    let name = source.name_any();
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), target_namespace);

    if let Some(existing) = configmaps.get_opt(&name).await? {
        if !is_copy(&existing, Some(&source_reference(&name))) {
            warn!(
                "ConfigMap {}/{} exists and is not a copy of {}, leaving it untouched",
                target_namespace,
                name,
                source_reference(&name)
            );
            return Ok(SyncOutcome::Skipped);
        }
    }

    let copy = build_copy(source, target_namespace);
    let pp = PatchParams::apply(OPERATOR_NAME).force();
    configmaps.patch(&name, &pp, &Patch::Apply(&copy)).await?;

    info!(
        "Synced ConfigMap {}/{} to namespace {}",
        sync::SOURCE_NAMESPACE,
        name,
        target_namespace
    );
    Ok(SyncOutcome::Applied)
}

/// Copy a source ConfigMap to every namespace it targets
pub async fn sync_configmap(client: &Client, source: &ConfigMap) -> Result<usize> {
    let targets = get_target_namespaces(client, source).await?;
    let mut applied = 0;

    for namespace in &targets {
        if copy_configmap_to_namespace(client, source, namespace).await? == SyncOutcome::Applied {
            applied += 1;
        }
    }

    debug!(
        "ConfigMap {} synced to {}/{} target namespaces",
        source.name_any(),
        applied,
        targets.len()
    );
    Ok(applied)
}

async fn delete_configmaps(client: &Client, copies: Vec<ConfigMap>) -> Result<usize> {
    let mut deleted = 0;

    for copy in copies {
        let namespace = copy.namespace().unwrap_or_default();
        let name = copy.name_any();
        let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);

        match configmaps.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                info!("Deleted synced ConfigMap {}/{}", namespace, name);
                deleted += 1;
            }
            Err(kube::Error::Api(err)) if err.code == 404 => {
                debug!("Synced ConfigMap {}/{} already gone", namespace, name);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(deleted)
}

/// Delete every copy of the named source ConfigMap across all namespaces
#[instrument(skip(client))]
pub async fn delete_copies_of(client: &Client, source_name: &str) -> Result<usize> {
    let configmaps: Api<ConfigMap> = Api::all(client.clone());
    let list = configmaps.list(&ListParams::default()).await?;
    let reference = source_reference(source_name);

    let copies = list
        .items
        .into_iter()
        .filter(|cm| is_copy(cm, Some(&reference)))
        .collect();
    delete_configmaps(client, copies).await
}

/// Delete copies in a namespace whose source is not in `keep`
#[instrument(skip(client, keep))]
pub async fn prune_namespace(client: &Client, namespace: &str, keep: &[String]) -> Result<usize> {
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let list = configmaps.list(&ListParams::default()).await?;

    let stale = list
        .items
        .into_iter()
        .filter(|cm| is_copy(cm, None))
        .filter(|cm| {
            annotation(cm.annotations(), sync::SOURCE)
                .is_some_and(|source| !keep.iter().any(|k| k == source))
        })
        .collect();
    delete_configmaps(client, stale).await
}
