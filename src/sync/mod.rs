// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! ConfigMap propagation from the source namespace into opted-in namespaces.

pub mod configmaps;

pub use configmaps::{
    delete_copies_of, get_sync_sources, prune_namespace, source_reference, sync_configmap,
    SyncOutcome,
};
