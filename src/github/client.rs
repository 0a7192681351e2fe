// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! GitHub App authentication and installation token issuing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{header, Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::GitHubConfig;
use crate::constants::{github, OPERATOR_NAME};
use crate::error::{ControllerError, Result};
use crate::token::{IssuedToken, TokenIssuer};

/// Claims of the JWT authenticating as the GitHub App itself
#[derive(Debug, Serialize, Deserialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct Installation {
    id: u64,
}

#[derive(Debug, Serialize)]
struct AccessTokenRequest<'a> {
    repositories: [&'a str; 1],
}

#[derive(Deserialize)]
struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Issues installation tokens scoped to a single repository
#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    config: GitHubConfig,
    encoding_key: EncodingKey,
}

impl GitHubClient {
    /// Build a client, loading the app private key from `config.private_key_path`
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let pem = std::fs::read(&config.private_key_path).map_err(|e| {
            ControllerError::GitHub(format!(
                "Failed to read private key file {}: {}",
                config.private_key_path, e
            ))
        })?;
        Self::from_pem(config, &pem)
    }

    pub fn from_pem(config: &GitHubConfig, pem: &[u8]) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(pem)
            .map_err(|e| ControllerError::GitHub(format!("Failed to parse private key: {}", e)))?;
        let http = Client::builder()
            .user_agent(OPERATOR_NAME)
            .timeout(Duration::from_secs(github::REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            config: config.clone(),
            encoding_key,
        })
    }

    fn app_jwt(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now,
            exp: now + github::JWT_LIFETIME_SECS,
            iss: self.config.app_id.to_string(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| ControllerError::GitHub(format!("Failed to sign app JWT: {}", e)))
    }

    fn request(&self, method: Method, path: &str, jwt: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.api_url.trim_end_matches('/'), path);
        self.http
            .request(method, url)
            .bearer_auth(jwt)
            .header(header::ACCEPT, github::ACCEPT)
            .header(github::API_VERSION_HEADER, github::API_VERSION)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ControllerError::GitHub(format!(
                "GitHub API returned {}: {}",
                status, body
            )));
        }
        Ok(response.json().await?)
    }

    async fn installation_id(&self, owner: &str, repo: &str, jwt: &str) -> Result<u64> {
        if self.config.installation_id != 0 {
            return Ok(self.config.installation_id);
        }

        let path = format!("/repos/{}/{}/installation", owner, repo);
        let installation: Installation = self.send(self.request(Method::GET, &path, jwt)).await?;
        debug!("Found installation {} for {}/{}", installation.id, owner, repo);
        Ok(installation.id)
    }
}

#[async_trait]
impl TokenIssuer for GitHubClient {
    fn validate_repository(&self, repository_url: &str) -> Result<()> {
        validate_repository_url(repository_url, &self.config.organization)
    }

    #[instrument(skip(self))]
    async fn issue_token(&self, repository_url: &str) -> Result<IssuedToken> {
        let (owner, repo) = parse_repository_url(repository_url)?;
        let jwt = self.app_jwt()?;
        let installation_id = self.installation_id(&owner, &repo, &jwt).await?;

        let path = format!("/app/installations/{}/access_tokens", installation_id);
        let request = self
            .request(Method::POST, &path, &jwt)
            .json(&AccessTokenRequest { repositories: [repo.as_str()] });
        let token: AccessToken = self.send(request).await?;

        info!(
            "Issued installation token for {}/{} expiring at {}",
            owner, repo, token.expires_at
        );
        Ok(IssuedToken {
            token: token.token,
            expires_at: token.expires_at,
        })
    }
}

fn repository_path(url: &Url) -> Result<(String, String)> {
    let mut segments = url
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some(owner), Some(repo)) => Ok((
            owner.to_string(),
            repo.trim_end_matches(".git").to_string(),
        )),
        _ => Err(ControllerError::InvalidRepositoryUrl(format!(
            "{}: invalid repository path",
            url
        ))),
    }
}

fn parse_url(repository_url: &str) -> Result<Url> {
    Url::parse(repository_url)
        .map_err(|e| ControllerError::InvalidRepositoryUrl(format!("{}: {}", repository_url, e)))
}

/// Extract owner and repository name, dropping a trailing `.git`
pub fn parse_repository_url(repository_url: &str) -> Result<(String, String)> {
    repository_path(&parse_url(repository_url)?)
}

/// Check the repository is hosted on github.com under `organization`
pub fn validate_repository_url(repository_url: &str, organization: &str) -> Result<()> {
    let url = parse_url(repository_url)?;

    if url.host_str() != Some(github::HOST) {
        return Err(ControllerError::InvalidRepositoryUrl(format!(
            "{}: repository must be hosted on {}",
            repository_url,
            github::HOST
        )));
    }

    let (owner, _) = repository_path(&url)?;
    if owner != organization {
        return Err(ControllerError::InvalidRepositoryUrl(format!(
            "repository must belong to organization {}, got {}",
            organization, owner
        )));
    }

    Ok(())
}
