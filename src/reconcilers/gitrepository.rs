// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! GitRepository reconciler - issues GitHub tokens into the referenced secret
//! and hands the secret over to the refresh manager.

use crate::config::Config;
use crate::constants::reconcile::{ERROR_REQUEUE_SECS, RESYNC_SECS, RETRY_SECS};
use crate::error::{ControllerError, Result};
use crate::metrics;
use crate::reconcilers::watch_deletions;
use crate::token::credential::format_expiry;
use crate::token::{CredentialStore, CredentialUpdate, SecretKey, TokenIssuer, TokenRefresher};
use crate::types::gitrepository::{set_condition, Condition, GitRepository};
use chrono::Utc;
use futures::StreamExt;
use kube::{
    api::{Patch, PatchParams},
    runtime::{controller::Action, watcher, Controller},
    Api, Client, ResourceExt,
};
use regex::Regex;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const READY: &str = "Ready";
const CONTROLLER: &str = "gitrepository";

/// Reasons reported on the Ready condition
pub mod reason {
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    pub const SECRET_VALIDATION_FAILED: &str = "SecretValidationFailed";
    pub const TOKEN_GENERATION_FAILED: &str = "TokenGenerationFailed";
    pub const SECRET_UPDATE_FAILED: &str = "SecretUpdateFailed";
    pub const TOKEN_CREATED: &str = "TokenCreated";
}

/// Namespace glob patterns supporting `*`, `?`, `[...]` classes and `\` escapes.
/// A malformed pattern falls back to an exact match.
#[derive(Debug, Clone)]
pub struct NamespaceFilter {
    patterns: Vec<(String, Option<Regex>)>,
}

impl NamespaceFilter {
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .map(|p| {
                let compiled = glob_to_regex(p);
                if compiled.is_none() {
                    warn!("Invalid namespace pattern {:?}, using exact match", p);
                }
                (p.clone(), compiled)
            })
            .collect();
        Self { patterns }
    }

    pub fn is_excluded(&self, namespace: &str) -> bool {
        self.patterns.iter().any(|(pattern, compiled)| match compiled {
            Some(re) => re.is_match(namespace),
            None => pattern == namespace,
        })
    }
}

fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => re.push_str(&glob_class(&mut chars)?),
            '\\' => re.push_str(&regex::escape(&chars.next()?.to_string())),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// Translate the body of a `[...]` class; `chars` starts after the `[`
fn glob_class(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let mut class = String::from("[");
    if chars.next_if_eq(&'^').is_some() {
        class.push('^');
    }

    let mut empty = true;
    loop {
        let lo = match chars.next()? {
            ']' if !empty => break,
            ']' | '-' => return None,
            '\\' => chars.next()?,
            c => c,
        };
        class.push_str(&regex::escape(&lo.to_string()));

        if chars.next_if_eq(&'-').is_some() {
            let hi = match chars.next()? {
                ']' | '-' => return None,
                '\\' => chars.next()?,
                c => c,
            };
            class.push('-');
            class.push_str(&regex::escape(&hi.to_string()));
        }
        empty = false;
    }

    class.push(']');
    Some(class)
}

pub struct GitRepositoryReconciler {
    client: Client,
    organization_prefix: String,
    excluded: NamespaceFilter,
    store: Arc<dyn CredentialStore>,
    issuer: Arc<dyn TokenIssuer>,
    refresher: Arc<dyn TokenRefresher>,
}

impl GitRepositoryReconciler {
    pub fn new(
        client: Client,
        config: &Config,
        store: Arc<dyn CredentialStore>,
        issuer: Arc<dyn TokenIssuer>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            client,
            organization_prefix: format!("https://github.com/{}/", config.github.organization),
            excluded: NamespaceFilter::new(&config.controller.excluded_namespaces),
            store,
            issuer,
            refresher,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let repositories: Api<GitRepository> = Api::all(self.client.clone());
        let context = Arc::new(self);

        let controller = Controller::new(repositories.clone(), watcher::Config::default())
            .run(reconcile, error_policy, context.clone())
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled GitRepository: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            });
        let deletions = watch_deletions(repositories, |repo| {
            let ctx = context.clone();
            async move { ctx.forget(&repo) }
        });

        tokio::join!(controller, deletions);
        Ok(())
    }

    /// Stop refreshing the token of a repository that went away
    fn forget(&self, repo: &GitRepository) {
        if let Some(secret) = repo.secret_name() {
            let key = SecretKey::new(repo.namespace().unwrap_or_default(), secret);
            info!("GitRepository {} removed, cancelling refresh of {}", repo.name_any(), key);
            self.refresher.cancel(&key);
        }
    }

    fn is_target_organization(&self, url: &str) -> bool {
        url.starts_with(&self.organization_prefix)
    }

    async fn update_ready(&self, repo: &GitRepository, status: &str, reason: &str, message: String) {
        let name = repo.name_any();
        let api: Api<GitRepository> =
            Api::namespaced(self.client.clone(), &repo.namespace().unwrap_or_default());

        let mut conditions = repo
            .status
            .as_ref()
            .and_then(|s| s.conditions.clone())
            .unwrap_or_default();
        set_condition(
            &mut conditions,
            Condition {
                condition_type: READY.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message,
                last_transition_time: format_expiry(Utc::now()),
                observed_generation: repo.metadata.generation,
            },
        );

        let patch = serde_json::json!({ "status": { "conditions": conditions } });
        if let Err(e) = api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            warn!("Failed to update status of GitRepository {}: {}", name, e);
        }
    }

    async fn fail(&self, repo: &GitRepository, reason: &str, err: ControllerError) -> Action {
        error!(reason, "Reconciling GitRepository {} failed: {}", repo.name_any(), err);
        metrics::increment_reconciliation_errors(CONTROLLER);
        self.update_ready(repo, "False", reason, err.to_string()).await;
        Action::requeue(Duration::from_secs(RETRY_SECS))
    }
}

#[instrument(skip(repo, ctx), fields(gitrepository = %format!("{}/{}", repo.namespace().unwrap_or_default(), repo.name_any())))]
async fn reconcile(repo: Arc<GitRepository>, ctx: Arc<GitRepositoryReconciler>) -> Result<Action> {
    metrics::increment_reconciliations(CONTROLLER);
    let name = repo.name_any();
    let namespace = repo.namespace().unwrap_or_default();
    let api: Api<GitRepository> = Api::namespaced(ctx.client.clone(), &namespace);

    let repo = match api.get_opt(&name).await? {
        Some(current) if !current.is_being_deleted() => current,
        _ => {
            ctx.forget(&repo);
            return Ok(Action::await_change());
        }
    };

    if ctx.excluded.is_excluded(&namespace) {
        debug!("Skipping GitRepository in excluded namespace {}", namespace);
        return Ok(Action::await_change());
    }

    let url = repo.spec.url.clone();
    if !ctx.is_target_organization(&url) {
        debug!("Skipping repository from different organization: {}", url);
        return Ok(Action::await_change());
    }

    if let Err(e) = ctx.issuer.validate_repository(&url) {
        return Ok(ctx.fail(&repo, reason::VALIDATION_FAILED, e).await);
    }

    if repo.uses_github_provider() {
        debug!("Flux authenticates {} natively, skipping", name);
        return Ok(Action::await_change());
    }

    let Some(secret_name) = repo.secret_name() else {
        debug!("GitRepository {} has no secretRef, skipping", name);
        return Ok(Action::await_change());
    };
    let key = SecretKey::new(&namespace, secret_name);

    if let Err(e) = ctx.store.validate_ownership(&key, &url).await {
        return Ok(ctx.fail(&repo, reason::SECRET_VALIDATION_FAILED, e).await);
    }

    let issued = match ctx.issuer.issue_token(&url).await {
        Ok(token) => token,
        Err(e) => return Ok(ctx.fail(&repo, reason::TOKEN_GENERATION_FAILED, e).await),
    };

    let update = CredentialUpdate {
        token: issued.token.clone(),
        expires_at: issued.expires_at,
        repository_url: url.clone(),
        owner: repo.owner_link(),
    };
    if let Err(e) = ctx.store.upsert(&key, &update).await {
        return Ok(ctx.fail(&repo, reason::SECRET_UPDATE_FAILED, e).await);
    }
    metrics::increment_tokens_issued("reconcile");

    if let Err(e) = ctx.refresher.schedule(&key, &url).await {
        error!("Failed to schedule token refresh for {}: {}", key, e);
    }

    ctx.update_ready(
        &repo,
        "True",
        reason::TOKEN_CREATED,
        format!(
            "GitHub token created and scheduled for refresh at {}",
            format_expiry(issued.expires_at)
        ),
    )
    .await;

    info!("Successfully reconciled GitRepository {}/{}", namespace, name);
    Ok(Action::requeue(Duration::from_secs(RESYNC_SECS)))
}

fn error_policy(
    _repo: Arc<GitRepository>,
    error: &ControllerError,
    _ctx: Arc<GitRepositoryReconciler>,
) -> Action {
    error!("Reconciliation error: {}", error);
    metrics::increment_reconciliation_errors(CONTROLLER);
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_SECS))
}
