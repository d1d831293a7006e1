//! HTTP infrastructure for the domain API client.
//!
//! Implements the [`domain::QueryClient`] trait over reqwest and provides the
//! login/logout side channel used by sessions.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** URL rendering, HTTP exchange, status classification,
//! batch envelope encoding and the metadata cache live here. The `session`
//! crate sees [`HttpTransport`] for construction and otherwise talks to
//! `dyn QueryClient`.
//!
//! Every request issued by an [`HttpQueryClient`], including batch and
//! `$metadata` requests, passes through its [`domain::RequestInterceptor`].
//! The side channel does not: it is addressed outside the query protocol.

mod batch;
mod client;
mod error;
mod transport;

pub use client::{HttpQueryClient, MetadataCache};
pub use error::TransportError;
pub use transport::{HttpTransport, HttpTransportConfig, SideChannel};
