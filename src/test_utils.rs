// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a mocked Kubernetes API plus in-memory fakes for the
//! credential store and token issuer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::{Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

use crate::constants::{secret, OPERATOR_NAME};
use crate::error::{ControllerError, Result};
use crate::token::credential::format_expiry;
use crate::token::{
    Credential, CredentialStore, CredentialUpdate, IssuedToken, SecretKey, TokenIssuer, TokenRefresher,
};

type ResponseQueue = VecDeque<(u16, String)>;

/// A request seen by [`MockService`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// A mock HTTP service that returns predefined responses based on request paths.
///
/// Several responses registered for the same method and path are served in
/// order; the last one keeps being served once the others are used up.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), ResponseQueue>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back((status, body.to_string()));
        self
    }

    /// Add a response for GET requests matching the path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    /// Add a response for POST requests matching the path
    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    pub fn on_put(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PUT", path, status, body)
    }

    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    pub fn on_delete(self, path: &str, status: u16, body: &str) -> Self {
        self.on("DELETE", path, status, body)
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    /// Every request received so far, in arrival order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests received with the given method
    pub fn requests_with_method(&self, method: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let mut responses = self.responses.lock().unwrap();

        let key = (method.to_string(), path.to_string());
        let key = if responses.contains_key(&key) {
            key
        } else {
            // Try prefix match for paths like /api/v1/namespaces/foo
            responses
                .keys()
                .filter(|(m, p)| m == method && path.starts_with(p.as_str()))
                .max_by_key(|(_, p)| p.len())
                .cloned()?
        };

        let queue = responses.get_mut(&key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let response = self.find_response(&method, &path);
        let requests = self.requests.clone();

        Box::pin(async move {
            let body = req
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            requests.lock().unwrap().push(RecordedRequest {
                method,
                path,
                body: String::from_utf8_lossy(&body).to_string(),
            });

            let (status, body) = response.unwrap_or_else(|| {
                // Default 404 for unmatched requests
                (404, not_found_json("object", "unknown"))
            });
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// Create a mock namespace JSON response
pub fn namespace_json(name: &str, annotations: &[(&str, &str)]) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "uid": format!("{}-uid", name),
            "annotations": annotation_map(annotations)
        }
    })
}

/// Create a mock ConfigMap JSON response
pub fn configmap_json(
    namespace: &str,
    name: &str,
    annotations: &[(&str, &str)],
    data: &[(&str, &str)],
) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "resourceVersion": "1",
            "annotations": annotation_map(annotations)
        },
        "data": annotation_map(data)
    })
}

/// Create a mock token Secret JSON response; `data` values are plain text
pub fn secret_json(
    namespace: &str,
    name: &str,
    annotations: &[(&str, &str)],
    data: &[(&str, &str)],
) -> serde_json::Value {
    let data: serde_json::Map<String, serde_json::Value> = data
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(base64_encode(v.as_bytes()))))
        .collect();
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": secret::TYPE,
        "metadata": {
            "name": name,
            "namespace": namespace,
            "resourceVersion": "7",
            "annotations": annotation_map(annotations)
        },
        "data": data
    })
}

/// Wrap items in a Kubernetes list response
pub fn list_json(kind: &str, items: Vec<serde_json::Value>) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": format!("{}List", kind),
        "metadata": {"resourceVersion": "1"},
        "items": items
    })
    .to_string()
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    status_json(404, "NotFound", &format!("{} \"{}\" not found", resource, name))
}

/// Create a 409 conflict response
pub fn conflict_json(resource: &str, name: &str) -> String {
    status_json(
        409,
        "Conflict",
        &format!("Operation cannot be fulfilled on {} \"{}\": the object has been modified", resource, name),
    )
}

fn status_json(code: u16, reason: &str, message: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
    .to_string()
}

fn annotation_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn base64_encode(input: &[u8]) -> String {
    // ByteString serializes as base64
    serde_json::to_value(k8s_openapi::ByteString(input.to_vec()))
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// A managed credential expiring at `expires_at`
pub fn managed_credential(
    namespace: &str,
    name: &str,
    repository_url: &str,
    expires_at: DateTime<Utc>,
) -> Credential {
    Credential {
        namespace: namespace.to_string(),
        name: name.to_string(),
        username: secret::USERNAME.as_bytes().to_vec(),
        password: b"old-token".to_vec(),
        managed_by: Some(OPERATOR_NAME.to_string()),
        expires_at: Some(format_expiry(expires_at)),
        repository_url: Some(repository_url.to_string()),
        owner: None,
    }
}

/// In-memory [`CredentialStore`]
#[derive(Default)]
pub struct MemoryStore {
    credentials: Mutex<BTreeMap<SecretKey, Credential>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    list_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, credential: Credential) {
        self.credentials
            .lock()
            .unwrap()
            .insert(credential.key(), credential);
    }

    pub fn remove(&self, key: &SecretKey) {
        self.credentials.lock().unwrap().remove(key);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn unavailable() -> ControllerError {
        ControllerError::KubeError(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "store unavailable".to_string(),
            reason: "ServiceUnavailable".to_string(),
            code: 503,
        }))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &SecretKey) -> Result<Credential> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.credentials
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(key.to_string()))
    }

    async fn upsert(&self, key: &SecretKey, update: &CredentialUpdate) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let mut credentials = self.credentials.lock().unwrap();
        let credential = credentials.entry(key.clone()).or_insert_with(|| Credential {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            ..Default::default()
        });
        credential.username = secret::USERNAME.as_bytes().to_vec();
        credential.password = update.token.as_bytes().to_vec();
        credential.managed_by = Some(OPERATOR_NAME.to_string());
        credential.expires_at = Some(format_expiry(update.expires_at));
        credential.repository_url = Some(update.repository_url.clone());
        if update.owner.is_some() {
            credential.owner = update.owner.clone();
        }
        Ok(())
    }

    async fn list_managed(&self) -> Result<Vec<Credential>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(self
            .credentials
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.is_managed())
            .cloned()
            .collect())
    }
}

/// Scriptable [`TokenIssuer`] counting its calls
#[derive(Default)]
pub struct FakeIssuer {
    validate_calls: AtomicUsize,
    issue_calls: AtomicUsize,
    fail_validation: AtomicBool,
    fail_issuance: AtomicBool,
    response: Mutex<Option<IssuedToken>>,
}

impl FakeIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return this token from every issuance; defaults to a token valid for an hour
    pub fn respond_with(&self, token: &str, expires_at: DateTime<Utc>) {
        *self.response.lock().unwrap() = Some(IssuedToken {
            token: token.to_string(),
            expires_at,
        });
    }

    pub fn fail_validation(&self, fail: bool) {
        self.fail_validation.store(fail, Ordering::SeqCst);
    }

    pub fn fail_issuance(&self, fail: bool) {
        self.fail_issuance.store(fail, Ordering::SeqCst);
    }

    pub fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    pub fn issue_calls(&self) -> usize {
        self.issue_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenIssuer for FakeIssuer {
    fn validate_repository(&self, repository_url: &str) -> Result<()> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_validation.load(Ordering::SeqCst) {
            return Err(ControllerError::InvalidRepositoryUrl(repository_url.to_string()));
        }
        Ok(())
    }

    async fn issue_token(&self, _repository_url: &str) -> Result<IssuedToken> {
        self.issue_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_issuance.load(Ordering::SeqCst) {
            return Err(ControllerError::GitHub("installation token request failed".to_string()));
        }
        Ok(self.response.lock().unwrap().clone().unwrap_or_else(|| IssuedToken {
            token: "fake-token".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }))
    }
}

/// [`TokenRefresher`] recording the keys it was asked to schedule and cancel
#[derive(Default)]
pub struct RecordingRefresher {
    scheduled: Mutex<Vec<(SecretKey, String)>>,
    cancelled: Mutex<Vec<SecretKey>>,
    fail: AtomicBool,
}

impl RecordingRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_scheduling(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn scheduled(&self) -> Vec<(SecretKey, String)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<SecretKey> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenRefresher for RecordingRefresher {
    async fn schedule(&self, key: &SecretKey, repository_url: &str) -> Result<()> {
        self.scheduled
            .lock()
            .unwrap()
            .push((key.clone(), repository_url.to_string()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(ControllerError::Schedule(format!("cannot schedule {}", key)));
        }
        Ok(())
    }

    fn cancel(&self, key: &SecretKey) {
        self.cancelled.lock().unwrap().push(key.clone());
    }
}
