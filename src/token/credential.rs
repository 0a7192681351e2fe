// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Token credentials and the ownership and expiry rules applied to them.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::time::Duration;

use crate::constants::OPERATOR_NAME;
use crate::error::{ControllerError, Result};

/// Namespaced name of a credential, also the key of its refresh job
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretKey {
    pub namespace: String,
    pub name: String,
}

impl SecretKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Weak reference to the object that owns a credential.
///
/// Only used to let the API server garbage collect the credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerLink {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

/// A stored username/token pair plus the metadata this controller tracks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credential {
    pub namespace: String,
    pub name: String,
    pub username: Vec<u8>,
    pub password: Vec<u8>,
    pub managed_by: Option<String>,
    /// Raw expiry annotation, parsed on demand
    pub expires_at: Option<String>,
    pub repository_url: Option<String>,
    pub owner: Option<OwnerLink>,
}

impl Credential {
    pub fn key(&self) -> SecretKey {
        SecretKey::new(&self.namespace, &self.name)
    }

    /// True iff the managed-by marker names this controller
    pub fn is_managed(&self) -> bool {
        self.managed_by.as_deref() == Some(OPERATOR_NAME)
    }

    pub fn expiry(&self) -> Result<DateTime<Utc>> {
        let raw = self.expires_at.as_deref().ok_or_else(|| {
            ControllerError::ExpiryParse(format!("secret {} has no token expiry annotation", self.key()))
        })?;
        parse_expiry(raw).map_err(|e| {
            ControllerError::ExpiryParse(format!("secret {}: {}", self.key(), e))
        })
    }

    /// Whether the token expires within `lead_time` from `now`.
    ///
    /// Unmanaged credentials never need a refresh. An unreadable expiry is
    /// returned as an error; callers should read it as "needs refresh".
    pub fn needs_refresh_at(&self, lead_time: Duration, now: DateTime<Utc>) -> Result<bool> {
        if !self.is_managed() {
            return Ok(false);
        }
        let expiry = self.expiry()?;
        let lead = chrono::Duration::from_std(lead_time)
            .map_err(|e| ControllerError::ExpiryParse(e.to_string()))?;
        Ok(expiry - now < lead)
    }

    pub fn needs_refresh(&self, lead_time: Duration) -> Result<bool> {
        self.needs_refresh_at(lead_time, Utc::now())
    }
}

/// Fields written on every issuance or refresh
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialUpdate {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub repository_url: String,
    pub owner: Option<OwnerLink>,
}

/// A freshly minted token and the moment it stops being valid
#[derive(Clone, PartialEq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Wire format of the expiry annotation: RFC 3339, UTC, whole seconds
pub fn format_expiry(expires_at: DateTime<Utc>) -> String {
    expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_expiry(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc))
}
