//! Core types for the domain API client.
//!
//! This crate contains the value types, navigation logic and port traits
//! shared by the `transport` and `session` crates. It performs no I/O: the
//! `transport` crate implements [`QueryClient`] over HTTP, the `session` crate
//! implements [`RequestInterceptor`] over session state.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`TransactionId`, `AuthToken`) |
//! | [`types`] | `Credentials`, `RequestOptions`, `DataModel`, `ChangeKind` |
//! | [`entity`] | `Entity` / `Value` and path resolution |
//! | [`query`] | `EntityQuery` builder and `EntityKey` |
//! | [`client`] | `QueryClient` and `RequestInterceptor` ports, request values, `ClientError` |
//! | [`errors`] | Top-level `DomainApiError` |

pub mod client;
pub mod entity;
pub mod errors;
pub mod identifiers;
pub mod query;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use client::{
    BatchFailure, BatchOperation, ClientError, HttpMethod, IncomingResponse, OutgoingRequest,
    Parameters, QueryClient, RequestInterceptor, ServerError,
};
pub use entity::{Annotations, Entity, PathError, Value, ID_PROPERTY};
pub use errors::DomainApiError;
pub use identifiers::{AuthToken, TransactionId};
pub use query::{EntityKey, EntityQuery};
pub use types::{ChangeKind, Credentials, DataModel, RequestOptions, INCLUDE_ID, SKIP_NULLS};
