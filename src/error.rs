// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid token expiry: {0}")]
    ExpiryParse(String),

    #[error("Secret {0} exists but is not managed by flux-extension-controller")]
    NotManaged(String),

    #[error("Secret {key} is managed by controller but for different repository: {existing}")]
    SourceConflict { key: String, existing: String },

    #[error("Invalid repository URL: {0}")]
    InvalidRepositoryUrl(String),

    #[error("GitHub API error: {0}")]
    GitHub(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to schedule token refresh: {0}")]
    Schedule(String),
}

impl ControllerError {
    /// True for errors meaning the requested object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            ControllerError::NotFound(_) => true,
            ControllerError::KubeError(kube::Error::Api(err)) => err.code == 404,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
