//! Session and transaction layer for the domain API client.
//!
//! A [`Session`] logs in once and hands out query clients that carry its
//! authorization token and [`domain::RequestOptions`] on every request.
//! Transactions ([`Transaction`], [`FrontEndTransaction`]) are begun from a
//! session and own a client that additionally carries their `TransactionId`.
//! [`BatchExecutor`] bundles deferred mutations into one atomic submission.
//!
//! ## Architectural Layer
//!
//! **Orchestration.** This crate sequences calls between the domain types in
//! [`domain`] and the HTTP infrastructure in [`transport`]. Transactions and
//! batches only see `dyn QueryClient`.
//!
//! ## Concurrency
//!
//! Session state (token, options, cached schema document) sits behind one
//! lock and is read by every client on each request. Distinct transactions of
//! one session may be driven concurrently. Concurrent logins or option
//! changes against the same session race: the last writer wins.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | `SessionConfig` |
//! | [`session`] | `Session`: login, close, transactions, scoped clients |
//! | [`interceptor`] | `SessionInterceptor`: request decoration |
//! | [`transaction`] | `Transaction`, `FrontEndTransaction`, `ChangeSet` |
//! | [`batch`] | `BatchExecutor` |

pub mod batch;
pub mod config;
pub mod interceptor;
pub mod session;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use batch::{BatchExecutor, BatchWriter};
pub use config::SessionConfig;
pub use interceptor::{SessionInterceptor, AUTHORIZATION_HEADER, OPTIONS_PARAM, TRANSACTION_ID_HEADER};
pub use session::Session;
pub use transaction::{ChangeSet, FrontEndTransaction, Transaction};

// Callers need these to drive a session without depending on `domain` directly.
pub use domain::{
    ChangeKind, Credentials, DataModel, DomainApiError, Entity, EntityKey, EntityQuery,
    QueryClient, RequestOptions, TransactionId, Value,
};
pub use transport::HttpTransportConfig;
