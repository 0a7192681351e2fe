// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Persistence boundary for token credentials.

use async_trait::async_trait;

use crate::error::{ControllerError, Result};
use crate::token::credential::{Credential, CredentialUpdate, SecretKey};

/// Authoritative storage of token credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch a credential, failing with a not-found error if it is absent
    async fn get(&self, key: &SecretKey) -> Result<Credential>;

    /// Create the credential, or merge `update` into the existing one.
    ///
    /// Does not check ownership; call [`CredentialStore::validate_ownership`] first.
    async fn upsert(&self, key: &SecretKey, update: &CredentialUpdate) -> Result<()>;

    /// Every credential carrying this controller's managed-by marker
    async fn list_managed(&self) -> Result<Vec<Credential>>;

    /// Check that writing a token for `repository_url` at `key` would not
    /// clobber a resource this controller does not own.
    async fn validate_ownership(&self, key: &SecretKey, repository_url: &str) -> Result<()> {
        match self.get(key).await {
            Ok(existing) => check_ownership(&existing, repository_url),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Ownership rule for an existing credential
pub fn check_ownership(existing: &Credential, repository_url: &str) -> Result<()> {
    if !existing.is_managed() {
        return Err(ControllerError::NotManaged(existing.key().to_string()));
    }

    match existing.repository_url.as_deref() {
        Some(recorded) if recorded != repository_url => Err(ControllerError::SourceConflict {
            key: existing.key().to_string(),
            existing: recorded.to_string(),
        }),
        _ => Ok(()),
    }
}
