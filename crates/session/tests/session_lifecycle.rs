//! Login, request decoration and close against a mock service.

mod common;

use std::time::Duration;

use common::{MockDomainApi, TOKEN};
use serde_json::json;
use session::{DomainApiError, EntityQuery};
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn login_posts_credentials_to_the_login_endpoint() {
    let api = MockDomainApi::start().await;
    Mock::given(method("POST"))
        .and(path("/api/domain/Login"))
        .and(body_partial_json(json!({
            "app": "Samples",
            "user": "admin",
            "pass": "secret",
            "ln": "en"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "abc" })))
        .expect(1)
        .mount(&api.server)
        .await;

    let session = api.session();
    let token = session.login(&MockDomainApi::credentials()).await.unwrap();

    assert_eq!(token.as_str(), "abc");
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn every_request_after_login_carries_the_token() {
    let api = MockDomainApi::start().await;
    let session = api.logged_in_session().await;

    Mock::given(method("GET"))
        .and(path(MockDomainApi::odata("General_Products_Products")))
        .and(header("Authorization", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "Id": "7d1c3bb5-93e6-4b3a-9d27-7d4f6a2a3b11", "PartNumber": "P-1" }]
        })))
        .expect(1)
        .mount(&api.server)
        .await;

    let products = session
        .client()
        .find_entries(&EntityQuery::for_set("General_Products_Products").top(10))
        .await
        .unwrap();

    assert_eq!(products.len(), 1);
    assert_eq!(products[0].get("PartNumber").unwrap().as_str(), Some("P-1"));
}

#[tokio::test]
async fn rejected_login_reports_the_response_body() {
    let api = MockDomainApi::start().await;
    Mock::given(method("POST"))
        .and(path("/api/domain/Login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid user name or password"))
        .mount(&api.server)
        .await;

    let session = api.session();
    match session.login(&MockDomainApi::credentials()).await.unwrap_err() {
        DomainApiError::Authentication { body, .. } => {
            assert_eq!(body.as_deref(), Some("Invalid user name or password"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn failed_relogin_keeps_the_previous_token() {
    let api = MockDomainApi::start().await;
    Mock::given(method("POST"))
        .and(path("/api/domain/Login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": TOKEN })))
        .up_to_n_times(1)
        .mount(&api.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/domain/Login"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&api.server)
        .await;

    let session = api.session();
    session.login(&MockDomainApi::credentials()).await.unwrap();
    assert!(session.login(&MockDomainApi::credentials()).await.is_err());
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn request_options_are_sent_as_the_options_parameter() {
    let api = MockDomainApi::start().await;
    let session = api.logged_in_session().await;
    session.update_request_options(|options| options.set_skip_nulls(true));

    Mock::given(method("GET"))
        .and(path(MockDomainApi::odata("General_Products_Products")))
        .and(query_param("options", "skipnulls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .expect(1)
        .mount(&api.server)
        .await;

    let products = session
        .client()
        .find_entries(
            &EntityQuery::for_set("General_Products_Products").filter("PartNumber eq 'P-1'"),
        )
        .await
        .unwrap();
    assert!(products.is_empty());
}

#[tokio::test]
async fn close_logs_out_with_the_token() {
    let api = MockDomainApi::start().await;
    let session = api.logged_in_session().await;
    Mock::given(method("POST"))
        .and(path("/api/domain/Logout"))
        .and(header("Authorization", TOKEN))
        .and(body_json(json!({})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&api.server)
        .await;

    session.close().await;

    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn close_swallows_logout_failures() {
    let api = MockDomainApi::start().await;
    let session = api.logged_in_session().await;
    Mock::given(method("POST"))
        .and(path("/api/domain/Logout"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&api.server)
        .await;

    session.close().await;

    assert!(!session.is_authenticated());
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_a_logged_in_session_logs_out() {
    let api = MockDomainApi::start().await;
    let session = api.logged_in_session().await;
    Mock::given(method("POST"))
        .and(path("/api/domain/Logout"))
        .and(header("Authorization", TOKEN))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&api.server)
        .await;

    drop(session);

    let logged_out = async {
        loop {
            let requests = api.server.received_requests().await.unwrap();
            if requests.iter().any(|r| {
                r.url.path() == "/api/domain/Logout"
                    && r.headers
                        .get("Authorization")
                        .and_then(|v| v.to_str().ok())
                        == Some(TOKEN)
            }) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), logged_out)
        .await
        .expect("logout is sent after the session is dropped");
}

#[tokio::test]
async fn login_during_close_keeps_the_new_token() {
    let api = MockDomainApi::start().await;
    Mock::given(method("POST"))
        .and(path("/api/domain/Login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "tok-1" })))
        .up_to_n_times(1)
        .mount(&api.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/domain/Login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "tok-2" })))
        .mount(&api.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/domain/Logout"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&api.server)
        .await;
    Mock::given(method("GET"))
        .and(path(MockDomainApi::odata("General_Products_Products")))
        .and(header("Authorization", "tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .expect(1)
        .mount(&api.server)
        .await;

    let session = api.session();
    let credentials = MockDomainApi::credentials();
    session.login(&credentials).await.unwrap();

    let relogin = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.login(&credentials).await
    };
    let ((), token) = tokio::join!(session.close(), relogin);

    assert_eq!(token.unwrap().as_str(), "tok-2");
    assert!(session.is_authenticated());
    session
        .client()
        .find_entries(&EntityQuery::for_set("General_Products_Products"))
        .await
        .unwrap();
}

#[tokio::test]
async fn close_without_login_sends_nothing() {
    let api = MockDomainApi::start().await;
    let session = api.session();

    session.close().await;

    let requests = api.server.received_requests().await.unwrap();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn metadata_is_fetched_once_per_session() {
    let api = MockDomainApi::start().await;
    let session = api.logged_in_session().await;
    Mock::given(method("GET"))
        .and(path(MockDomainApi::odata("$metadata")))
        .respond_with(ResponseTemplate::new(200).set_body_string("<edmx:Edmx/>"))
        .expect(1)
        .mount(&api.server)
        .await;
    api.mock_begin("tx-1").await;

    let first = session.metadata().await.unwrap();
    let second = session.metadata().await.unwrap();
    assert_eq!(&*first, "<edmx:Edmx/>");
    assert_eq!(first, second);

    // Transaction clients share the session's document.
    let mut transaction = session
        .begin_transaction(session::DataModel::Common, false)
        .await
        .unwrap();
    let scoped = transaction.client().fetch_metadata().await.unwrap();
    assert_eq!(scoped, first);

    Mock::given(method("POST"))
        .and(path(MockDomainApi::odata("EndTransaction")))
        .respond_with(ResponseTemplate::new(204))
        .mount(&api.server)
        .await;
    transaction.rollback().await.unwrap();
}

#[tokio::test]
async fn metadata_fetched_in_a_transaction_is_shared_with_the_session() {
    let api = MockDomainApi::start().await;
    let session = api.logged_in_session().await;
    Mock::given(method("GET"))
        .and(path(MockDomainApi::odata("$metadata")))
        .respond_with(ResponseTemplate::new(200).set_body_string("<edmx:Edmx/>"))
        .expect(1)
        .mount(&api.server)
        .await;
    api.mock_begin("tx-1").await;
    Mock::given(method("POST"))
        .and(path(MockDomainApi::odata("EndTransaction")))
        .respond_with(ResponseTemplate::new(204))
        .mount(&api.server)
        .await;

    let mut transaction = session
        .begin_transaction(session::DataModel::Common, false)
        .await
        .unwrap();
    assert!(session.cached_metadata().is_none());

    let scoped = transaction.client().fetch_metadata().await.unwrap();
    assert_eq!(session.cached_metadata().as_deref(), Some("<edmx:Edmx/>"));

    let own = session.client().fetch_metadata().await.unwrap();
    assert_eq!(own, scoped);
    transaction.rollback().await.unwrap();
}
