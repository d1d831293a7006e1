//! Shared value types for the domain API client.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! behaviour: [`RequestOptions`] owns the flag set that shapes every response,
//! [`Credentials`] renders the login payload.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Login credentials. Created by the caller and consumed once by login.
///
/// Serialises to the login payload `{"app", "user", "pass", "ln"}`.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    #[serde(rename = "app")]
    application: String,
    #[serde(rename = "user")]
    user_name: String,
    #[serde(rename = "pass")]
    password: String,
    #[serde(rename = "ln")]
    language: String,
}

impl Credentials {
    /// Creates a credential set for `application`, signing in as `user_name`
    /// with messages in `language` (e.g. `"en"`).
    pub fn new(
        application: impl Into<String>,
        user_name: impl Into<String>,
        password: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            application: application.into(),
            user_name: user_name.into(),
            password: password.into(),
            language: language.into(),
        }
    }

    /// Application name the login is made for.
    pub fn application(&self) -> &str {
        &self.application
    }

    /// The user logging in.
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Language code for service messages, e.g. `en`.
    pub fn language(&self) -> &str {
        &self.language
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("application", &self.application)
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .field("language", &self.language)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Request options
// ---------------------------------------------------------------------------

/// Wire token for [`RequestOptions::skip_nulls`].
pub const SKIP_NULLS: &str = "skipnulls";

/// Wire token for [`RequestOptions::include_id`].
pub const INCLUDE_ID: &str = "includeid";

/// Flags sent with every request as the `options` query parameter.
///
/// Flags are stored as lowercase wire tokens in a sorted set, so the
/// serialised form is deterministic (alphabetical) and never contains a flag
/// that is not currently set. The set is open: [`RequestOptions::set`]
/// accepts any well-formed token, not only the two named accessors.
///
/// Deserialisation applies the same token rules and fails on a malformed flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RequestOptionsRepr")]
pub struct RequestOptions {
    flags: BTreeSet<String>,
}

#[derive(Deserialize)]
struct RequestOptionsRepr {
    #[serde(default)]
    flags: Vec<String>,
}

impl TryFrom<RequestOptionsRepr> for RequestOptions {
    type Error = String;

    fn try_from(repr: RequestOptionsRepr) -> Result<Self, Self::Error> {
        let flags = repr
            .flags
            .into_iter()
            .map(|flag| {
                let token = flag.to_ascii_lowercase();
                if is_valid_token(&token) {
                    Ok(token)
                } else {
                    Err(format!("malformed request option flag '{flag}'"))
                }
            })
            .collect::<Result<BTreeSet<_>, String>>()?;
        Ok(Self { flags })
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether null-valued properties are omitted from JSON results.
    pub fn skip_nulls(&self) -> bool {
        self.is_set(SKIP_NULLS)
    }

    pub fn set_skip_nulls(&mut self, enabled: bool) {
        self.set(SKIP_NULLS, enabled);
    }

    /// Whether the entity `Id` is always included in JSON results.
    pub fn include_id(&self) -> bool {
        self.is_set(INCLUDE_ID)
    }

    pub fn set_include_id(&mut self, enabled: bool) {
        self.set(INCLUDE_ID, enabled);
    }

    /// Returns `true` if `flag` (case-insensitive) is set.
    pub fn is_set(&self, flag: &str) -> bool {
        self.flags.contains(&flag.to_ascii_lowercase())
    }

    /// Sets or clears an arbitrary flag.
    ///
    /// Tokens must be non-empty ASCII alphanumerics or `_`; anything else
    /// could corrupt the comma-joined query value, so it is ignored and
    /// `false` is returned.
    pub fn set(&mut self, flag: &str, enabled: bool) -> bool {
        let token = flag.to_ascii_lowercase();
        if !is_valid_token(&token) {
            tracing::warn!(flag, "Ignoring malformed request option flag");
            return false;
        }
        if enabled {
            self.flags.insert(token);
        } else {
            self.flags.remove(&token);
        }
        true
    }

    /// Iterates over the set flags in serialisation order.
    pub fn flags(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Returns the comma-joined token list, or `None` when no flag is set.
    pub fn to_query_value(&self) -> Option<String> {
        if self.flags.is_empty() {
            None
        } else {
            Some(self.to_string())
        }
    }
}

impl std::fmt::Display for RequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for flag in &self.flags {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(flag)?;
            first = false;
        }
        Ok(())
    }
}

fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Data model a server-side transaction is opened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataModel {
    /// The shared back-end data model.
    Common,
    /// The front-end model: uncommitted edits, change tracking, adjustments.
    #[serde(rename = "frontend")]
    FrontEnd,
}

impl DataModel {
    /// Returns the value sent as the `model` action parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            DataModel::Common => "common",
            DataModel::FrontEnd => "frontend",
        }
    }
}

impl std::fmt::Display for DataModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of modification reported by the change-tracking feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// Parses a feed key case-insensitively. Unknown keys yield `None`.
    pub fn parse(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "insert" => Some(ChangeKind::Insert),
            "update" => Some(ChangeKind::Update),
            "delete" => Some(ChangeKind::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
