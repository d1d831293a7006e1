//! Newtype identifiers.
//!
//! Server-issued identifiers are distinct newtypes wrapping a `String`, so a
//! transaction id cannot be passed where a token is expected and vice versa.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id! {
    /// Server-issued identifier of a transaction returned by `BeginTransaction`.
    ///
    /// Opaque to the client. Sent back on every request scoped to the
    /// transaction as the `TransactionId` header.
    TransactionId
}

// ---------------------------------------------------------------------------
// Authorization token
// ---------------------------------------------------------------------------

/// Authorization token obtained from a successful login.
///
/// The raw value is only reachable through [`AuthToken::as_str`]; `Debug`
/// output is redacted so tokens never leak into logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wraps a raw token, returning `None` if it is empty or whitespace.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        if v.trim().is_empty() {
            None
        } else {
            Some(Self(v))
        }
    }

    /// Returns the raw token value for use in the `Authorization` header.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identifiers_are_rejected() {
        assert!(TransactionId::new("").is_none());
        assert!(AuthToken::new("  ").is_none());
    }

    #[test]
    fn auth_token_debug_is_redacted() {
        let token = AuthToken::new("secret-token").unwrap();
        let printed = format!("{token:?}");
        assert!(!printed.contains("secret-token"));
        assert_eq!(token.as_str(), "secret-token");
    }

    #[test]
    fn transaction_id_displays_raw_value() {
        let id = TransactionId::new("tx-42").unwrap();
        assert_eq!(id.to_string(), "tx-42");
    }
}
