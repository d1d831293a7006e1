//! Shared fixtures for session integration tests.

#![allow(dead_code)]

use serde_json::json;
use session::{Credentials, Session, SessionConfig};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "tok-1";

/// A mock domain API service rooted at `/api/domain/odata/`.
pub struct MockDomainApi {
    pub server: MockServer,
}

impl MockDomainApi {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn service_root(&self) -> String {
        format!("{}/api/domain/odata/", self.server.uri())
    }

    /// Absolute path of a query-protocol resource.
    pub fn odata(resource: &str) -> String {
        format!("/api/domain/odata/{resource}")
    }

    pub fn session(&self) -> Session {
        Session::new(&SessionConfig::new(self.service_root())).expect("valid service root")
    }

    pub fn credentials() -> Credentials {
        Credentials::new("Samples", "admin", "secret", "en")
    }

    pub async fn mock_login(&self, token: &str) {
        Mock::given(method("POST"))
            .and(path("/api/domain/Login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": token })))
            .mount(&self.server)
            .await;
    }

    /// A session that has already logged in with [`TOKEN`].
    pub async fn logged_in_session(&self) -> Session {
        self.mock_login(TOKEN).await;
        let session = self.session();
        session
            .login(&Self::credentials())
            .await
            .expect("login succeeds");
        session
    }

    pub async fn mock_begin(&self, transaction_id: &str) {
        Mock::given(method("POST"))
            .and(path(Self::odata("BeginTransaction")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "@odata.context": "$metadata#Edm.String",
                "value": transaction_id
            })))
            .mount(&self.server)
            .await;
    }
}
