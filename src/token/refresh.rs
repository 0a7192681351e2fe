// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Proactive refresh of installation tokens before they expire.
//!
//! Every tracked secret gets at most one timer. When it fires, a new token is
//! issued, written back and the timer is re-armed for the new expiry. Timer
//! state is never persisted: a periodic sweep over the stored expiry
//! annotations reschedules whatever was lost, e.g. across a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::TokenRefreshConfig;
use crate::constants::refresh::{LEAD_TIME_SECS, MIN_DELAY_SECS, SWEEP_INTERVAL_SECS};
use crate::error::{ControllerError, Result};
use crate::metrics;
use crate::token::credential::{CredentialUpdate, OwnerLink, SecretKey};
use crate::token::issuer::TokenIssuer;
use crate::token::store::CredentialStore;

/// Scheduling operations the GitRepository reconciler relies on
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn schedule(&self, key: &SecretKey, repository_url: &str) -> Result<()>;
    fn cancel(&self, key: &SecretKey);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    /// How long before expiry a refresh fires
    pub lead_time: Duration,
    /// Delay used when the refresh point has already passed
    pub min_delay: Duration,
    pub sweep_interval: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            lead_time: Duration::from_secs(LEAD_TIME_SECS),
            min_delay: Duration::from_secs(MIN_DELAY_SECS),
            sweep_interval: Duration::from_secs(SWEEP_INTERVAL_SECS),
        }
    }
}

impl RefreshSettings {
    /// Replace a zero sweep interval, which the periodic ticker cannot run on
    fn normalized(mut self) -> Self {
        if self.sweep_interval.is_zero() {
            warn!(
                "Token sweep interval must be greater than zero, using {}s",
                SWEEP_INTERVAL_SECS
            );
            self.sweep_interval = Duration::from_secs(SWEEP_INTERVAL_SECS);
        }
        self
    }
}

impl From<&TokenRefreshConfig> for RefreshSettings {
    fn from(config: &TokenRefreshConfig) -> Self {
        Self {
            sweep_interval: config.refresh_interval,
            ..Self::default()
        }
    }
}

/// An armed timer for one secret
struct RefreshJob {
    id: u64,
    repository_url: String,
    next_fire_at: DateTime<Utc>,
    cancel: CancellationToken,
    timer: JoinHandle<()>,
}

impl RefreshJob {
    /// Stop the timer. A refresh already in flight observes the
    /// cancellation between its stages.
    fn stop(&self) {
        self.cancel.cancel();
        // Firing jobs detach themselves, so a finished timer here means the task died
        if self.timer.is_finished() {
            warn!(job = self.id, "Refresh timer task exited without detaching its job");
        }
    }
}

/// What a fired timer needs to carry out one refresh cycle
#[derive(Debug, Clone)]
struct FireTarget {
    key: SecretKey,
    job_id: u64,
    repository_url: String,
    owner: Option<OwnerLink>,
}

enum FireOutcome {
    Refreshed(DateTime<Utc>),
    Cancelled,
    Failed {
        stage: &'static str,
        error: ControllerError,
    },
}

/// Schedules and executes token refreshes for managed secrets
#[derive(Clone)]
pub struct RefreshManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    issuer: Arc<dyn TokenIssuer>,
    settings: RefreshSettings,
    jobs: Mutex<HashMap<SecretKey, RefreshJob>>,
    next_job_id: AtomicU64,
}

impl RefreshManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        issuer: Arc<dyn TokenIssuer>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                issuer,
                settings: settings.normalized(),
                jobs: Mutex::new(HashMap::new()),
                next_job_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.inner.settings
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<SecretKey, RefreshJob>> {
        self.inner
            .jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// When the job for `key` is armed to fire, if one is scheduled
    pub fn next_refresh(&self, key: &SecretKey) -> Option<DateTime<Utc>> {
        self.jobs().get(key).map(|job| job.next_fire_at)
    }

    /// Refresh point for a token expiring at `expiry`, as seen at `now`
    pub fn next_fire_at(&self, expiry: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let settings = &self.inner.settings;
        let lead = chrono::Duration::from_std(settings.lead_time).unwrap_or(chrono::Duration::MAX);
        let min_delay =
            chrono::Duration::from_std(settings.min_delay).unwrap_or(chrono::Duration::zero());

        let next = expiry.checked_sub_signed(lead).unwrap_or(now);
        if next < now {
            now + min_delay
        } else {
            next
        }
    }

    /// Arm a refresh for the secret `key`, replacing any existing one.
    ///
    /// The secret must exist and carry a readable expiry annotation.
    #[instrument(skip(self), fields(secret = %key))]
    pub async fn schedule(&self, key: &SecretKey, repository_url: &str) -> Result<()> {
        {
            let mut jobs = self.jobs();
            if let Some(existing) = jobs.remove(key) {
                metrics::set_scheduled_refreshes(jobs.len());
                debug!(job = existing.id, "Replacing existing refresh job");
                existing.stop();
            }
        }

        let credential = self.inner.store.get(key).await.map_err(|e| {
            if e.is_not_found() {
                ControllerError::NotFound(format!("secret {} for refresh scheduling", key))
            } else {
                e
            }
        })?;
        let expiry = credential.expiry()?;

        let now = Utc::now();
        let next_fire_at = self.next_fire_at(expiry, now);
        let delay = (next_fire_at - now).to_std().unwrap_or_default();

        let target = FireTarget {
            key: key.clone(),
            job_id: self.inner.next_job_id.fetch_add(1, Ordering::Relaxed),
            repository_url: repository_url.to_string(),
            owner: credential.owner,
        };
        let cancel = CancellationToken::new();

        {
            let mut jobs = self.jobs();
            let timer = tokio::spawn(self.clone().run_timer(target.clone(), delay, cancel.clone()));
            let job = RefreshJob {
                id: target.job_id,
                repository_url: target.repository_url,
                next_fire_at,
                cancel,
                timer,
            };
            // A concurrent schedule for the same key may have won the race
            if let Some(previous) = jobs.insert(key.clone(), job) {
                previous.stop();
            }
            metrics::set_scheduled_refreshes(jobs.len());
        }

        info!(
            "Scheduled token refresh at {} (in {}s)",
            next_fire_at.to_rfc3339(),
            delay.as_secs()
        );
        Ok(())
    }

    /// Stop and forget the refresh job for `key`. No-op if none exists.
    pub fn cancel(&self, key: &SecretKey) {
        let mut jobs = self.jobs();
        if let Some(job) = jobs.remove(key) {
            metrics::set_scheduled_refreshes(jobs.len());
            job.stop();
            info!(secret = %key, "Cancelled token refresh");
        }
    }

    // Boxed so that schedule -> timer -> fire -> schedule is not an opaque type cycle
    fn run_timer(self, target: FireTarget, delay: Duration, cancel: CancellationToken) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(secret = %target.key, job = target.job_id, "Refresh job cancelled before firing");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            self.fire(&target, &cancel).await;
        })
    }

    /// One refresh cycle. Failures abandon the cycle without retrying; the
    /// periodic sweep or the next reconciliation picks the secret up again.
    #[instrument(skip(self, target, cancel), fields(secret = %target.key, repository = %target.repository_url))]
    async fn fire(&self, target: &FireTarget, cancel: &CancellationToken) {
        info!("Executing token refresh");

        let outcome = self.refresh(target, cancel).await;

        // The timer is spent whatever happened; only re-arm if nobody
        // cancelled or replaced this job in the meantime.
        let still_current = self.detach(&target.key, target.job_id);

        match outcome {
            FireOutcome::Refreshed(_) if !still_current => {
                metrics::increment_tokens_issued("refresh");
                info!("Token refreshed but job was cancelled or replaced, not re-arming");
            }
            FireOutcome::Refreshed(expires_at) => {
                metrics::increment_tokens_issued("refresh");
                info!(
                    "Token refresh completed successfully, new token expires at {}",
                    expires_at.to_rfc3339()
                );
                if let Err(e) = self.schedule(&target.key, &target.repository_url).await {
                    let e = ControllerError::Schedule(e.to_string());
                    error!("{}; secret stays unscheduled until the next sweep", e);
                }
            }
            FireOutcome::Cancelled => {
                debug!("Token refresh cancelled");
            }
            FireOutcome::Failed { stage, error } => {
                error!(stage, "Token refresh abandoned: {}", error);
                metrics::increment_refresh_failures(stage);
            }
        }
    }

    async fn refresh(&self, target: &FireTarget, cancel: &CancellationToken) -> FireOutcome {
        if let Err(error) = self.inner.issuer.validate_repository(&target.repository_url) {
            return FireOutcome::Failed {
                stage: "validate",
                error,
            };
        }
        if cancel.is_cancelled() {
            return FireOutcome::Cancelled;
        }

        let issued = tokio::select! {
            _ = cancel.cancelled() => return FireOutcome::Cancelled,
            issued = self.inner.issuer.issue_token(&target.repository_url) => issued,
        };
        let issued = match issued {
            Ok(issued) => issued,
            Err(error) => {
                return FireOutcome::Failed {
                    stage: "issue",
                    error,
                }
            }
        };
        if cancel.is_cancelled() {
            return FireOutcome::Cancelled;
        }

        let update = CredentialUpdate {
            token: issued.token,
            expires_at: issued.expires_at,
            repository_url: target.repository_url.clone(),
            owner: target.owner.clone(),
        };
        if let Err(error) = self.inner.store.upsert(&target.key, &update).await {
            return FireOutcome::Failed {
                stage: "store",
                error,
            };
        }

        FireOutcome::Refreshed(update.expires_at)
    }

    /// Remove the job for `key` if it is still the one identified by `job_id`
    fn detach(&self, key: &SecretKey, job_id: u64) -> bool {
        let mut jobs = self.jobs();
        match jobs.get(key) {
            Some(job) if job.id == job_id => {
                jobs.remove(key);
                metrics::set_scheduled_refreshes(jobs.len());
                true
            }
            _ => false,
        }
    }

    /// Schedule every managed secret that is about to expire and has no job.
    ///
    /// Entries that cannot be handled are logged and skipped.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<()> {
        let credentials = self.inner.store.list_managed().await?;
        let lead_time = self.inner.settings.lead_time;
        debug!("Checking {} managed secrets for expiring tokens", credentials.len());

        for credential in credentials {
            let key = credential.key();

            match credential.needs_refresh(lead_time) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(secret = %key, "Failed to check if secret needs refresh: {}", e);
                    continue;
                }
            }

            let Some(repository_url) = credential
                .repository_url
                .as_deref()
                .filter(|url| !url.is_empty())
            else {
                error!(secret = %key, "Secret missing repository URL annotation, skipping");
                continue;
            };

            if self.next_refresh(&key).is_some() {
                debug!(secret = %key, "Refresh already scheduled");
                continue;
            }

            if let Err(e) = self.schedule(&key, repository_url).await {
                error!(secret = %key, "Failed to schedule refresh for expiring token: {}", e);
            }
        }

        Ok(())
    }

    /// Run one sweep now, then keep sweeping in the background until
    /// `shutdown` is cancelled.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting token refresh manager");

        if let Err(e) = self.sweep().await {
            error!("Failed to check expiring tokens on startup: {}", e);
        }

        let manager = self.clone();
        let period = self.inner.settings.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Stopping periodic token sweep");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = manager.sweep().await {
                            error!("Failed to check expiring tokens: {}", e);
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Cancel every scheduled refresh
    pub fn stop(&self) {
        let jobs: Vec<(SecretKey, RefreshJob)> = self.jobs().drain().collect();
        metrics::set_scheduled_refreshes(0);
        info!("Stopping token refresh manager, cancelling {} jobs", jobs.len());
        for (key, job) in jobs {
            debug!(secret = %key, repository = %job.repository_url, "Cancelling refresh job");
            job.stop();
        }
    }
}

#[async_trait]
impl TokenRefresher for RefreshManager {
    async fn schedule(&self, key: &SecretKey, repository_url: &str) -> Result<()> {
        RefreshManager::schedule(self, key, repository_url).await
    }

    fn cancel(&self, key: &SecretKey) {
        RefreshManager::cancel(self, key)
    }
}
