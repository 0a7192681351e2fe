// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! GitHub token lifecycle: credential model, storage and issuing boundaries,
//! and the refresh scheduler.

pub mod credential;
pub mod issuer;
pub mod refresh;
pub mod store;

pub use credential::{Credential, CredentialUpdate, IssuedToken, OwnerLink, SecretKey};
pub use issuer::TokenIssuer;
pub use refresh::{RefreshManager, RefreshSettings, TokenRefresher};
pub use store::CredentialStore;
