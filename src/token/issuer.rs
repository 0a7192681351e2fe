// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::error::Result;
use crate::token::credential::IssuedToken;

/// Capability to mint short-lived credentials for a repository
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Reject repositories this controller must not issue tokens for
    fn validate_repository(&self, repository_url: &str) -> Result<()>;

    async fn issue_token(&self, repository_url: &str) -> Result<IssuedToken>;
}
