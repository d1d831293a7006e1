//! Session configuration.

use serde::Deserialize;
use transport::HttpTransportConfig;

/// Everything needed to open a [`crate::Session`].
///
/// Deserialisable so it can be embedded in an application's own config
/// file; HTTP settings are flattened next to `service_root`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Query service root, e.g. `https://mycompany.com/api/domain/odata/`.
    pub service_root: String,
    #[serde(flatten)]
    pub http: HttpTransportConfig,
}

impl SessionConfig {
    /// Default HTTP settings for `service_root`.
    pub fn new(service_root: impl Into<String>) -> Self {
        Self {
            service_root: service_root.into(),
            http: HttpTransportConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialises_with_http_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"service_root": "https://h/api/domain/odata/"}"#).unwrap();
        assert_eq!(config, SessionConfig::new("https://h/api/domain/odata/"));
        assert!(config.http.accept_invalid_certs);
    }

    #[test]
    fn http_settings_are_flattened() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"service_root": "https://h/odata/", "accept_invalid_certs": false, "timeout_secs": 30}"#,
        )
        .unwrap();
        assert!(!config.http.accept_invalid_certs);
        assert_eq!(config.http.timeout_secs, Some(30));
    }
}
