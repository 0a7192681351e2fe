// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Annotation keys written on token secrets
pub mod annotations {
    /// Marks a secret as owned by this controller
    pub const MANAGED_BY: &str = "flux-extension-controller.nrfcloud.com/managed-by";
    /// RFC 3339 timestamp at which the stored token stops being valid
    pub const TOKEN_EXPIRY: &str = "flux-extension-controller.nrfcloud.com/token-expiry";
    /// Repository URL the stored token grants access to
    pub const REPOSITORY_URL: &str = "flux-extension-controller.nrfcloud.com/repository-url";
}

/// Annotation keys driving ConfigMap propagation
pub mod sync {
    /// Prefix shared by every sync annotation; stripped from copies
    pub const PREFIX: &str = "flux-extension.nrfcloud.com/sync";
    /// On a ConfigMap in the source namespace: "true" to propagate it
    pub const CONFIGMAP: &str = "flux-extension.nrfcloud.com/sync-configmap";
    /// On a source ConfigMap: comma separated list of target namespaces
    pub const CONFIGMAP_NAMESPACES: &str = "flux-extension.nrfcloud.com/sync-configmap-namespaces";
    /// On a Namespace: "true" to receive propagated ConfigMaps
    pub const TARGET: &str = "flux-extension.nrfcloud.com/sync-target";
    /// On a Namespace: comma separated allow list of ConfigMap names
    pub const TARGET_CONFIGMAPS: &str = "flux-extension.nrfcloud.com/sync-target-configmaps";
    /// On a copy: `<source namespace>/<name>` of the ConfigMap it mirrors
    pub const SOURCE: &str = "flux-extension.nrfcloud.com/sync-source";
    /// Namespace holding the ConfigMaps to propagate
    pub const SOURCE_NAMESPACE: &str = "flux-system";
}

/// The value of the managed-by annotation, also used as field manager
pub const OPERATOR_NAME: &str = "flux-extension-controller";

/// Secret layout expected by Flux for HTTPS git credentials
pub mod secret {
    pub const TYPE: &str = "kubernetes.io/git-repository";
    pub const USERNAME_KEY: &str = "username";
    pub const PASSWORD_KEY: &str = "password";
    /// GitHub ignores the username for installation tokens
    pub const USERNAME: &str = "git";
}

/// Token refresh timing
pub mod refresh {
    /// Refresh this long before the token expires
    pub const LEAD_TIME_SECS: u64 = 5 * 60;
    /// Delay used when the refresh point has already passed
    pub const MIN_DELAY_SECS: u64 = 60;
    /// Default interval between sweeps of all managed secrets
    pub const SWEEP_INTERVAL_SECS: u64 = 50 * 60;
    /// Attempts for a secret write that hits a resourceVersion conflict
    pub const UPSERT_ATTEMPTS: usize = 3;
}

/// GitRepository reconciliation timing
pub mod reconcile {
    /// Requeue after a failed validation, issuance or secret write
    pub const RETRY_SECS: u64 = 5 * 60;
    /// Requeue after a successful reconciliation
    pub const RESYNC_SECS: u64 = 30 * 60;
    /// Requeue used by the error policy of every reconciler
    pub const ERROR_REQUEUE_SECS: u64 = 60;
}

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// GitHub App API access
pub mod github {
    /// Lifetime of the app JWT; GitHub caps it at ten minutes
    pub const JWT_LIFETIME_SECS: i64 = 10 * 60;
    pub const ACCEPT: &str = "application/vnd.github+json";
    pub const API_VERSION_HEADER: &str = "X-GitHub-Api-Version";
    pub const API_VERSION: &str = "2022-11-28";
    pub const HOST: &str = "github.com";
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
}

/// Default listen ports of the HTTP endpoints
pub mod server {
    pub const METRICS_PORT: u16 = 8080;
    pub const HEALTH_PROBE_PORT: u16 = 8081;
}
