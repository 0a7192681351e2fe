// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::constants::{refresh, server, sync};

/// Operator configuration loaded from a YAML file, overridden by environment variables
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub github: GitHubConfig,
    pub controller: ControllerConfig,
    pub token_refresh: TokenRefreshConfig,
    pub metrics: MetricsConfig,
    pub health_probe: HealthProbeConfig,
}

/// GitHub App credentials and target organization
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GitHubConfig {
    pub app_id: u64,
    /// Zero means the installation is looked up per repository
    pub installation_id: u64,
    pub private_key_path: String,
    pub organization: String,
    pub api_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            app_id: 0,
            installation_id: 0,
            private_key_path: String::new(),
            organization: String::new(),
            api_url: "https://api.github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Glob patterns (`*`, `?`, `[...]`) of namespaces whose GitRepositories are ignored
    pub excluded_namespaces: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            excluded_namespaces: vec![sync::SOURCE_NAMESPACE.to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TokenRefreshConfig {
    /// Interval between sweeps of all managed secrets
    #[serde(deserialize_with = "deserialize_duration")]
    pub refresh_interval: Duration,
    /// Expected lifetime of an installation token, informational
    #[serde(deserialize_with = "deserialize_duration")]
    pub token_lifetime: Duration,
}

impl Default for TokenRefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(refresh::SWEEP_INTERVAL_SECS),
            token_lifetime: Duration::from_secs(60 * 60),
        }
    }
}

/// Listen address of the Prometheus `/metrics` endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub address: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], server::METRICS_PORT)),
        }
    }
}

/// Listen address of the `/healthz` and `/readyz` probes
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthProbeConfig {
    pub address: SocketAddr,
}

impl Default for HealthProbeConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], server::HEALTH_PROBE_PORT)),
        }
    }
}

impl Config {
    /// Load configuration from `path` (if it exists) and the environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::from_yaml(&raw)?
        } else {
            Config::default()
        };

        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).context("Failed to unmarshal config")
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(app_id) = lookup("GITHUB_APP_ID") {
            self.github.app_id = app_id
                .parse()
                .with_context(|| format!("Invalid GITHUB_APP_ID: {}", app_id))?;
        }
        if let Some(installation_id) = lookup("GITHUB_INSTALLATION_ID") {
            self.github.installation_id = installation_id
                .parse()
                .with_context(|| format!("Invalid GITHUB_INSTALLATION_ID: {}", installation_id))?;
        }
        if let Some(path) = lookup("GITHUB_PRIVATE_KEY_PATH") {
            self.github.private_key_path = path;
        }
        if let Some(organization) = lookup("GITHUB_ORGANIZATION") {
            self.github.organization = organization;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.github.app_id == 0 {
            bail!("GitHub App ID is required");
        }
        if self.github.private_key_path.is_empty() {
            bail!("GitHub private key path is required");
        }
        if self.github.organization.is_empty() {
            bail!("GitHub organization is required");
        }
        if self.token_refresh.refresh_interval.is_zero() {
            bail!("tokenRefresh.refreshInterval must be greater than zero");
        }
        if self.metrics.address == self.health_probe.address {
            bail!(
                "metrics.address and healthProbe.address must differ, both are {}",
                self.metrics.address
            );
        }
        Ok(())
    }
}

/// Parse a duration such as `30s`, `50m`, `1h` or `1h30m`
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim().to_lowercase();
    let whole = Regex::new(r"^(\d+[smhd])+$")?;
    if !whole.is_match(&trimmed) {
        bail!(
            "Invalid duration format '{}': must be a sequence of <number><unit> where unit is s, m, h, or d",
            input
        );
    }

    let part = Regex::new(r"(?P<number>\d+)(?P<unit>[smhd])")?;
    let mut seconds: u64 = 0;
    for captures in part.captures_iter(&trimmed) {
        let number: u64 = captures["number"]
            .parse()
            .map_err(|e| anyhow!("Invalid duration number: {}", e))?;
        let factor = match &captures["unit"] {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            _ => 86400,
        };
        seconds = number
            .checked_mul(factor)
            .and_then(|part| seconds.checked_add(part))
            .ok_or_else(|| anyhow!("Invalid duration '{}': value is too large", input))?;
    }

    Ok(Duration::from_secs(seconds))
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}
