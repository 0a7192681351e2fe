// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Token credentials stored as Flux git-repository Secrets

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::{
    api::{ListParams, ObjectMeta, PostParams},
    Api, Client, ResourceExt,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

use crate::constants::{annotations, refresh::UPSERT_ATTEMPTS, secret, OPERATOR_NAME};
use crate::error::{ControllerError, Result};
use crate::token::credential::format_expiry;
use crate::token::{Credential, CredentialStore, CredentialUpdate, OwnerLink, SecretKey};

/// [`CredentialStore`] backed by Kubernetes Secrets
#[derive(Clone)]
pub struct SecretStore {
    client: Client,
}

impl SecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl CredentialStore for SecretStore {
    #[instrument(skip(self), fields(secret = %key))]
    async fn get(&self, key: &SecretKey) -> Result<Credential> {
        self.secrets(&key.namespace)
            .get_opt(&key.name)
            .await?
            .map(|s| credential_from_secret(&s))
            .ok_or_else(|| ControllerError::NotFound(format!("secret {}", key)))
    }

    #[instrument(skip(self, update), fields(secret = %key))]
    async fn upsert(&self, key: &SecretKey, update: &CredentialUpdate) -> Result<()> {
        let secrets = self.secrets(&key.namespace);
        let pp = PostParams {
            field_manager: Some(OPERATOR_NAME.to_string()),
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match secrets.get_opt(&key.name).await? {
                None => secrets
                    .create(&pp, &new_secret(key, update))
                    .await
                    .map(|_| "Created"),
                Some(mut existing) => {
                    apply_update(&mut existing, update);
                    secrets
                        .replace(&key.name, &pp, &existing)
                        .await
                        .map(|_| "Updated")
                }
            };

            match result {
                Ok(op) => {
                    info!("{} secret {}", op, key);
                    return Ok(());
                }
                // Someone else wrote in between; re-read and merge again
                Err(kube::Error::Api(err)) if err.code == 409 && attempt < UPSERT_ATTEMPTS => {
                    debug!(attempt, "Conflict writing secret, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    #[instrument(skip(self))]
    async fn list_managed(&self) -> Result<Vec<Credential>> {
        let secrets: Api<Secret> = Api::all(self.client.clone());
        let secret_list = secrets.list(&ListParams::default()).await?;

        Ok(secret_list
            .items
            .iter()
            .map(credential_from_secret)
            .filter(Credential::is_managed)
            .collect())
    }
}

/// Read the credential view of a Secret
pub fn credential_from_secret(secret: &Secret) -> Credential {
    let data_value = |key: &str| {
        secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|v| v.0.clone())
            .unwrap_or_default()
    };
    let annotation = |key: &str| secret.annotations().get(key).cloned();

    let owner = secret
        .owner_references()
        .iter()
        .find(|r| r.controller == Some(true))
        .map(|r| OwnerLink {
            api_version: r.api_version.clone(),
            kind: r.kind.clone(),
            name: r.name.clone(),
            uid: r.uid.clone(),
        });

    Credential {
        namespace: secret.namespace().unwrap_or_default(),
        name: secret.name_any(),
        username: data_value(secret::USERNAME_KEY),
        password: data_value(secret::PASSWORD_KEY),
        managed_by: annotation(annotations::MANAGED_BY),
        expires_at: annotation(annotations::TOKEN_EXPIRY),
        repository_url: annotation(annotations::REPOSITORY_URL),
        owner,
    }
}

fn owner_reference(link: &OwnerLink) -> OwnerReference {
    OwnerReference {
        api_version: link.api_version.clone(),
        kind: link.kind.clone(),
        name: link.name.clone(),
        uid: link.uid.clone(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn new_secret(key: &SecretKey, update: &CredentialUpdate) -> Secret {
    let mut secret = Secret {
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            ..Default::default()
        },
        ..Default::default()
    };
    apply_update(&mut secret, update);
    secret
}

/// Merge the token fields into `secret`, leaving unrelated keys alone
fn apply_update(secret: &mut Secret, update: &CredentialUpdate) {
    // The type of an existing secret is immutable
    if secret.type_.is_none() {
        secret.type_ = Some(secret::TYPE.to_string());
    }

    let data = secret.data.get_or_insert_with(BTreeMap::new);
    data.insert(
        secret::USERNAME_KEY.to_string(),
        ByteString(secret::USERNAME.as_bytes().to_vec()),
    );
    data.insert(
        secret::PASSWORD_KEY.to_string(),
        ByteString(update.token.as_bytes().to_vec()),
    );

    let notes = secret.annotations_mut();
    notes.insert(annotations::MANAGED_BY.to_string(), OPERATOR_NAME.to_string());
    notes.insert(
        annotations::TOKEN_EXPIRY.to_string(),
        format_expiry(update.expires_at),
    );
    notes.insert(
        annotations::REPOSITORY_URL.to_string(),
        update.repository_url.clone(),
    );

    if let Some(owner) = &update.owner {
        let refs = secret.owner_references_mut();
        refs.retain(|r| r.controller != Some(true) && r.uid != owner.uid);
        refs.push(owner_reference(owner));
    }
}
