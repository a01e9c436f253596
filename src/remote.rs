//! Remote cloud store boundary.
//!
//! The engine depends on, but does not implement, the user's cloud drive.
//! [`RemoteStore`] is the collaborator contract: list the remote entries,
//! download content by reference, upload content by id. The result of
//! `list_remote` plus downloaded content becomes the remote
//! [`crate::models::NoteListRecord`] input to the merge engine.
//!
//! [`HttpRemoteStore`] is the bundled implementation speaking JSON over
//! HTTP with bearer-token auth. Credential acquisition (OAuth flows etc.)
//! is external; the engine only reacts to auth failures.

use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::NoteError;

/// Well-known remote key under which the list record is stored.
pub const LIST_RECORD_KEY: &str = "notelist";

/// One entry in a remote listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Stable id (a note id, or [`LIST_RECORD_KEY`])
    pub id: String,
    /// Display name on the remote side
    pub name: String,
    /// Remote modification time, when the provider reports one
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    /// Content fingerprint, when the provider stores one
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// Errors crossing the remote boundary.
#[derive(Debug)]
pub enum RemoteError {
    /// Transient connectivity failure; the caller may retry with backoff
    Network(String),
    /// Credentials expired or rejected; never retried automatically
    Auth(String),
    /// The referenced entry does not exist remotely
    NotFound(String),
    /// The remote answered, but not in the shape we expect
    Protocol(String),
}

impl RemoteError {
    /// Whether this failure class is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }

    /// Whether this failure means credentials must be refreshed.
    pub fn is_auth(&self) -> bool {
        matches!(self, RemoteError::Auth(_))
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Network(msg) => write!(f, "Network error: {}", msg),
            RemoteError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            RemoteError::NotFound(msg) => write!(f, "Not found: {}", msg),
            RemoteError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<RemoteError> for NoteError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Network(msg) => NoteError::Network(msg),
            RemoteError::Auth(msg) => NoteError::AuthRequired(msg),
            RemoteError::NotFound(msg) => NoteError::NotFound(msg),
            RemoteError::Protocol(msg) => NoteError::Sync(msg),
        }
    }
}

/// Contract the engine holds against the user's cloud drive.
pub trait RemoteStore: Send + Sync {
    /// List every entry in the remote store.
    fn list_remote(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<RemoteEntry>, RemoteError>> + Send;

    /// Download the content behind a remote reference.
    fn download(
        &self,
        remote_ref: &str,
    ) -> impl std::future::Future<Output = Result<String, RemoteError>> + Send;

    /// Upload content under a stable id, returning the remote reference.
    fn upload(
        &self,
        id: &str,
        content: &str,
    ) -> impl std::future::Future<Output = Result<String, RemoteError>> + Send;

    /// Remove an entry from the remote store. Removing a missing entry is
    /// not an error.
    fn delete(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;
}

/// HTTP implementation of [`RemoteStore`].
///
/// Speaks a minimal files API: `GET /files` (JSON listing),
/// `GET /files/{id}` (content), `PUT /files/{id}` (content),
/// `DELETE /files/{id}`. All requests carry a bearer token that can be
/// swapped after an external credential refresh.
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    access_token: RwLock<String>,
}

impl HttpRemoteStore {
    /// Create a store client for `base_url` with an initial access token.
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: RwLock::new(access_token.into()),
        })
    }

    /// Replace the access token after an external credential refresh.
    pub fn set_access_token(&self, token: impl Into<String>) {
        let mut guard = self.access_token.write().unwrap_or_else(|e| e.into_inner());
        *guard = token.into();
    }

    fn token(&self) -> String {
        self.access_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/files/{}", self.base_url, urlencoding::encode(id))
    }

    fn map_status(status: StatusCode, context: &str) -> RemoteError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                RemoteError::Auth(format!("{} rejected with {}", context, status))
            }
            StatusCode::NOT_FOUND => RemoteError::NotFound(context.to_string()),
            s if s.is_server_error() => {
                RemoteError::Network(format!("{} failed with {}", context, s))
            }
            s => RemoteError::Protocol(format!("{} failed with {}", context, s)),
        }
    }
}

impl RemoteStore for HttpRemoteStore {
    async fn list_remote(&self) -> Result<Vec<RemoteEntry>, RemoteError> {
        let response = self
            .client
            .get(format!("{}/files", self.base_url))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), "listing"));
        }

        response
            .json::<Vec<RemoteEntry>>()
            .await
            .map_err(|e| RemoteError::Protocol(format!("failed to parse listing: {}", e)))
    }

    async fn download(&self, remote_ref: &str) -> Result<String, RemoteError> {
        let response = self
            .client
            .get(self.file_url(remote_ref))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), remote_ref));
        }

        response
            .text()
            .await
            .map_err(|e| RemoteError::Protocol(format!("failed to read {}: {}", remote_ref, e)))
    }

    async fn upload(&self, id: &str, content: &str) -> Result<String, RemoteError> {
        let response = self
            .client
            .put(self.file_url(id))
            .bearer_auth(self.token())
            .body(content.to_string())
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), id));
        }

        Ok(id.to_string())
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.file_url(id))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            s => Err(Self::map_status(s, id)),
        }
    }
}
