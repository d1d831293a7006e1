//! Port definitions for the query client.
//!
//! The session layer consumes a [`QueryClient`] and injects a
//! [`RequestInterceptor`] into it; the `transport` crate supplies the HTTP
//! implementation. Both sides exchange the plain request/response values
//! defined here, so interceptors can be tested without a network.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::entity::{Entity, Value};
use crate::query::{EntityKey, EntityQuery};

/// Named parameters of an action or function call.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Request / response values seen by interceptors
// ---------------------------------------------------------------------------

/// The HTTP verbs the query protocol uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// Queries, keyed lookups, functions and `$metadata`.
    Get,
    /// Inserts, actions and batch envelopes.
    Post,
    /// Partial updates.
    Patch,
    /// Deletes.
    Delete,
}

impl HttpMethod {
    /// The upper-case verb as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing request, after URL rendering and before it is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRequest {
    pub method: HttpMethod,
    pub url: String,
    headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl OutgoingRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a header, replacing any existing value under the same name
    /// (compared case-insensitively).
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .retain(|existing, _| !existing.eq_ignore_ascii_case(name));
        self.headers.insert(name.to_owned(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers
            .retain(|existing, _| !existing.eq_ignore_ascii_case(name));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Sets a query parameter, replacing any existing parameter of that name.
    ///
    /// Appended with `?` when the URL has no query string and `&` otherwise.
    /// `value` is inserted verbatim and must already be URL-safe.
    pub fn set_query_param(&mut self, name: &str, value: &str) {
        let mut pairs = self.query_pairs_without(name);
        pairs.push(format!("{name}={value}"));
        self.rebuild_query(&pairs);
    }

    /// Removes every query parameter named `name`.
    pub fn remove_query_param(&mut self, name: &str) {
        let pairs = self.query_pairs_without(name);
        self.rebuild_query(&pairs);
    }

    fn query_pairs_without(&self, name: &str) -> Vec<String> {
        let query = self.url.split_once('?').map_or("", |(_, query)| query);
        query
            .split('&')
            .filter(|pair| !pair.is_empty() && pair.split('=').next() != Some(name))
            .map(str::to_owned)
            .collect()
    }

    fn rebuild_query(&mut self, pairs: &[String]) {
        let base = self.url.split_once('?').map_or(self.url.as_str(), |(base, _)| base);
        self.url = if pairs.is_empty() {
            base.to_owned()
        } else {
            format!("{base}?{}", pairs.join("&"))
        };
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        let (_, query) = self.url.split_once('?')?;
        query.split('&').find_map(|pair| match pair.split_once('=') {
            Some((key, value)) if key == name => Some(value),
            _ => None,
        })
    }
}

/// A received response, before status classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingResponse {
    pub status: u16,
    /// URL of the request that produced this response.
    pub url: String,
    pub body: String,
}

impl IncomingResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether this is the response to a service schema (`$metadata`) fetch.
    pub fn is_metadata(&self) -> bool {
        let path = self.url.split(|c| c == '?' || c == '#').next().unwrap_or_default();
        path.trim_end_matches('/').ends_with("/$metadata")
    }
}

/// Hooks run around every request a query client issues.
///
/// Implementations must not fail the request: any state they cannot apply is
/// skipped for that request. Applying [`RequestInterceptor::before_send`]
/// twice to the same request must leave it as after one application.
pub trait RequestInterceptor: Send + Sync {
    /// Mutates `request` just before it is sent.
    fn before_send(&self, request: &mut OutgoingRequest);

    /// Observes every response, successful or not, before it is classified.
    fn after_receive(&self, response: &IncomingResponse);
}

// ---------------------------------------------------------------------------
// Batch operations
// ---------------------------------------------------------------------------

/// A mutation queued for submission inside a batch envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    Insert {
        set: String,
        entity: serde_json::Value,
    },
    Update {
        set: String,
        key: EntityKey,
        patch: serde_json::Value,
    },
    Delete {
        set: String,
        key: EntityKey,
    },
}

impl BatchOperation {
    pub fn method(&self) -> HttpMethod {
        match self {
            BatchOperation::Insert { .. } => HttpMethod::Post,
            BatchOperation::Update { .. } => HttpMethod::Patch,
            BatchOperation::Delete { .. } => HttpMethod::Delete,
        }
    }

    /// URL relative to the service root.
    pub fn relative_url(&self) -> String {
        match self {
            BatchOperation::Insert { set, .. } => set.clone(),
            BatchOperation::Update { set, key, .. } | BatchOperation::Delete { set, key } => {
                key.path(set)
            }
        }
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        match self {
            BatchOperation::Insert { entity, .. } => Some(entity),
            BatchOperation::Update { patch, .. } => Some(patch),
            BatchOperation::Delete { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error payload returned by the service (`{"error": {...}}`).
#[derive(Debug, Clone, PartialEq, Eq, Error, Deserialize)]
#[error("{message}")]
pub struct ServerError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub target: Option<String>,
    /// Individual failures when the service reports several at once.
    #[serde(default)]
    pub details: Vec<ServerError>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ServerError,
}

impl ServerError {
    /// Parses a protocol error body. Returns `None` for anything else.
    pub fn from_body(body: &str) -> Option<Self> {
        serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .map(|envelope| envelope.error)
    }

    /// The individual failures: `details` when present, otherwise `self`.
    pub fn failures(&self) -> Vec<ServerError> {
        if self.details.is_empty() {
            vec![self.clone()]
        } else {
            self.details.clone()
        }
    }
}

/// One failed sub-request of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Position of the operation in submission order.
    pub index: usize,
    pub status: u16,
    pub error: Option<ServerError>,
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error {
            Some(error) => write!(f, "#{} ({}): {}", self.index, self.status, error),
            None => write!(f, "#{} ({})", self.index, self.status),
        }
    }
}

/// Errors surfaced by a [`QueryClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The request could not be sent or the response could not be read.
    #[error("Transport failure: {message}")]
    Transport { message: String },

    /// The service answered with a non-success status.
    ///
    /// `message` is the service's error message when the body carried one,
    /// otherwise the raw body. Build with [`ClientError::status`].
    #[error("Request failed with status {status}: {message}")]
    Status {
        status: u16,
        message: String,
        body: String,
        error: Option<ServerError>,
    },

    /// The response body did not have the expected shape.
    #[error("Unexpected response: {message}")]
    Decode { message: String },

    /// At least one operation inside a batch failed. Every failure is kept.
    #[error("Batch failed: {} operation(s) rejected", .failures.len())]
    Batch { failures: Vec<BatchFailure> },
}

impl ClientError {
    /// Classifies a non-success response, parsing the service error body.
    pub fn status(status: u16, body: String) -> Self {
        let error = ServerError::from_body(&body);
        let message = match &error {
            Some(error) => error.message.clone(),
            None => body.clone(),
        };
        ClientError::Status {
            status,
            message,
            body,
            error,
        }
    }

    /// The parsed service error, when the failure carried one.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            ClientError::Status { error, .. } => error.as_ref(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Query client port
// ---------------------------------------------------------------------------

/// The query/update protocol client consumed by sessions and transactions.
///
/// Every request an implementation issues, including batch and metadata
/// requests, must pass through its configured [`RequestInterceptor`].
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Returns every entity the query selects, in service order.
    async fn find_entries(&self, query: &EntityQuery) -> Result<Vec<Entity>, ClientError>;

    /// Returns the first matching entity, or `None` when nothing matches.
    async fn find_entry(&self, query: &EntityQuery) -> Result<Option<Entity>, ClientError>;

    /// Creates an entity in `set` and returns it as stored by the service.
    async fn insert_entry(
        &self,
        set: &str,
        entity: serde_json::Value,
    ) -> Result<Entity, ClientError>;

    /// Applies `patch` to the entity at `key`, leaving other properties alone.
    async fn update_entry(
        &self,
        set: &str,
        key: &EntityKey,
        patch: serde_json::Value,
    ) -> Result<(), ClientError>;

    /// Deletes the entity at `key`.
    async fn delete_entry(&self, set: &str, key: &EntityKey) -> Result<(), ClientError>;

    /// Invokes an action at `path` (relative to the service root).
    ///
    /// A `{"value": ...}` result envelope is unwrapped; an empty response
    /// yields [`Value::Null`].
    async fn execute_action(&self, path: &str, parameters: Parameters)
        -> Result<Value, ClientError>;

    /// Invokes a function at `path`, unwrapping the result like actions.
    async fn execute_function(
        &self,
        path: &str,
        parameters: Parameters,
    ) -> Result<Value, ClientError>;

    /// Submits all operations as one atomic batch, returning one result per
    /// operation in submission order.
    async fn submit_batch(&self, operations: Vec<BatchOperation>)
        -> Result<Vec<Value>, ClientError>;

    /// Returns the service schema document.
    async fn fetch_metadata(&self) -> Result<Arc<str>, ClientError>;
}
