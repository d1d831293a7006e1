//! Errors raised while constructing the HTTP transport.
//!
//! Request-time failures are reported as [`domain::ClientError`]; this type
//! only covers setup, before any request is sent.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The service root is not an absolute `http`/`https` URL.
    #[error("Invalid service root '{url}': {reason}")]
    InvalidServiceRoot { url: String, reason: String },

    /// The underlying HTTP client could not be built (e.g. TLS backend setup).
    #[error("Failed to build HTTP client")]
    Build(#[source] reqwest::Error),
}
