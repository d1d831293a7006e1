//! Top-level error type for the domain API client.
//!
//! [`DomainApiError`] is what session, transaction and batch operations
//! return. Component-level errors ([`PathError`] for entity navigation,
//! [`ClientError`] for the query client) are defined next to their
//! components and convert into it.
//!
//! Nothing here is retried automatically: every operation makes a single
//! attempt and surfaces the failure unchanged.

use thiserror::Error;

use crate::client::{ClientError, ServerError};
use crate::entity::PathError;

/// Errors returned by the session and transaction layer.
#[derive(Debug, Error)]
pub enum DomainApiError {
    /// Login was rejected or could not reach the service.
    ///
    /// `body` carries the raw response body when the service answered.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// What went wrong, e.g. the rejecting status.
        message: String,
        /// Raw login response body, when the service answered.
        body: Option<String>,
    },

    /// A transaction action (begin, end, change retrieval) failed.
    #[error("Transaction error: {message}")]
    Transaction {
        /// The failed action and reason.
        message: String,
        /// The query-client failure, absent when nothing was sent.
        #[source]
        source: Option<ClientError>,
    },

    /// A batch submission failed as a whole. No per-operation outcome is
    /// assumed; inspect `source` for whatever the transport reported.
    #[error("Batch of {operations} operation(s) failed")]
    Batch {
        /// Number of operations that were submitted together.
        operations: usize,
        /// The transport or per-operation failure.
        #[source]
        source: ClientError,
    },

    /// An operation failed with several independent errors, each preserved.
    ///
    /// Produced by adjustment-document creation; some sub-operations may
    /// already have taken effect.
    #[error("{operation} failed with {} error(s)", .failures.len())]
    Aggregate {
        /// The action that failed.
        operation: String,
        /// Every error the service reported, in the order it reported them.
        failures: Vec<ServerError>,
    },

    /// Entity path navigation failed.
    #[error(transparent)]
    Path(#[from] PathError),

    /// A query-client call failed outside any of the categories above.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Session configuration is invalid. Produced before any request is sent.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Why the configuration was refused.
        message: String,
    },
}

impl DomainApiError {
    pub(crate) fn transaction(message: impl Into<String>, source: ClientError) -> Self {
        DomainApiError::Transaction {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Wraps a failed transaction action.
    pub fn transaction_failed(action: &str, source: ClientError) -> Self {
        Self::transaction(format!("{action} failed: {source}"), source)
    }
}
