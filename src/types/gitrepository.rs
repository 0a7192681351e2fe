// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Read-only projection of the Flux `GitRepository` resource.
//!
//! Only the fields this controller consumes are modelled; unknown fields are
//! ignored on deserialization and never written back.

use kube::{CustomResource, Resource, ResourceExt};
use serde::{Deserialize, Serialize};

use crate::token::OwnerLink;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[kube(group = "source.toolkit.fluxcd.io", version = "v1", kind = "GitRepository")]
#[kube(namespaced)]
#[kube(status = "GitRepositoryStatus")]
#[serde(rename_all = "camelCase")]
pub struct GitRepositorySpec {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
pub struct LocalObjectReference {
    pub name: String,
}

impl GitRepository {
    /// Name of the secret Flux reads credentials from, if any
    pub fn secret_name(&self) -> Option<&str> {
        self.spec.secret_ref.as_ref().map(|r| r.name.as_str())
    }

    /// Flux authenticates natively when the provider is `github`
    pub fn uses_github_provider(&self) -> bool {
        self.spec.provider.as_deref() == Some("github")
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Owner link making this repository the controller of its token secret
    pub fn owner_link(&self) -> Option<OwnerLink> {
        let uid = self.metadata.uid.clone()?;
        Some(OwnerLink {
            api_version: GitRepository::api_version(&()).to_string(),
            kind: GitRepository::kind(&()).to_string(),
            name: self.name_any(),
            uid,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitRepositoryStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}

/// A `metav1.Condition` as found in Flux status blocks
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    pub reason: String,
    pub message: String,
    pub last_transition_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Replace the condition with the same type, or append it.
///
/// The transition time is kept when the status did not change.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn make_repo(secret_ref: Option<&str>, provider: Option<&str>) -> GitRepository {
        GitRepository {
            metadata: ObjectMeta {
                name: Some("app".to_string()),
                namespace: Some("team-a".to_string()),
                uid: Some("uid-1234".to_string()),
                ..Default::default()
            },
            spec: GitRepositorySpec {
                url: "https://github.com/testorg/app".to_string(),
                secret_ref: secret_ref.map(|name| LocalObjectReference {
                    name: name.to_string(),
                }),
                provider: provider.map(str::to_string),
            },
            status: None,
        }
    }

    fn make_condition(status: &str, reason: &str, time: &str) -> Condition {
        Condition {
            condition_type: "Ready".to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: String::new(),
            last_transition_time: time.to_string(),
            observed_generation: None,
        }
    }

    #[test]
    fn test_secret_name() {
        assert_eq!(make_repo(Some("app-auth"), None).secret_name(), Some("app-auth"));
        assert_eq!(make_repo(None, None).secret_name(), None);
    }

    #[test]
    fn test_uses_github_provider() {
        assert!(make_repo(None, Some("github")).uses_github_provider());
        assert!(!make_repo(None, Some("generic")).uses_github_provider());
        assert!(!make_repo(None, None).uses_github_provider());
    }

    #[test]
    fn test_owner_link() {
        let link = make_repo(None, None).owner_link().unwrap();
        assert_eq!(link.api_version, "source.toolkit.fluxcd.io/v1");
        assert_eq!(link.kind, "GitRepository");
        assert_eq!(link.name, "app");
        assert_eq!(link.uid, "uid-1234");
    }

    #[test]
    fn test_owner_link_requires_uid() {
        let mut repo = make_repo(None, None);
        repo.metadata.uid = None;
        assert!(repo.owner_link().is_none());
    }

    #[test]
    fn test_deserialize_ignores_unknown_fields() {
        let repo: GitRepository = serde_json::from_value(serde_json::json!({
            "apiVersion": "source.toolkit.fluxcd.io/v1",
            "kind": "GitRepository",
            "metadata": {"name": "app", "namespace": "team-a"},
            "spec": {
                "url": "https://github.com/testorg/app",
                "interval": "1m",
                "ref": {"branch": "main"},
                "secretRef": {"name": "app-auth"}
            },
            "status": {"artifact": {"path": "x"}}
        }))
        .unwrap();

        assert_eq!(repo.spec.url, "https://github.com/testorg/app");
        assert_eq!(repo.secret_name(), Some("app-auth"));
        assert!(repo.status.unwrap().conditions.is_none());
    }

    #[test]
    fn test_set_condition_appends() {
        let mut conditions = vec![];
        set_condition(&mut conditions, make_condition("True", "TokenCreated", "t1"));
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_set_condition_replaces_and_keeps_transition_time() {
        let mut conditions = vec![make_condition("True", "TokenCreated", "t1")];
        set_condition(&mut conditions, make_condition("True", "TokenCreated", "t2"));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, "t1");

        set_condition(&mut conditions, make_condition("False", "TokenGenerationFailed", "t3"));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "False");
        assert_eq!(conditions[0].last_transition_time, "t3");
    }
}
