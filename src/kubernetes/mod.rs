// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery and the Secret-backed credential store.

pub mod crd;
pub mod secrets;

pub use crd::wait_for_gitrepository_crd;
pub use secrets::SecretStore;
