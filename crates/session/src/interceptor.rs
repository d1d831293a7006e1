//! Request decoration: injects session and transaction state into every
//! outgoing request and captures the schema document from responses.

use std::sync::Arc;

use domain::{
    AuthToken, IncomingResponse, OutgoingRequest, RequestInterceptor, RequestOptions,
    TransactionId,
};
use parking_lot::RwLock;
use tracing::debug;
use transport::MetadataCache;

/// Query parameter carrying the serialised [`RequestOptions`].
pub const OPTIONS_PARAM: &str = "options";
pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const TRANSACTION_ID_HEADER: &str = "TransactionId";

/// Mutable per-session state read by every interceptor of the session.
///
/// Single writer lock: login/close and option updates take the write lock,
/// request decoration takes the read lock. Concurrent logins against one
/// session still race logically (last writer wins) but never tear.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) token: Option<AuthToken>,
    pub(crate) options: RequestOptions,
    /// Shared by every query client of the session.
    pub(crate) metadata: MetadataCache,
}

pub(crate) type SharedState = Arc<RwLock<SessionState>>;

/// The [`RequestInterceptor`] installed in every query client a session
/// creates, optionally bound to a transaction.
///
/// Decoration is a pure function of the current session state: headers and
/// the `options` parameter are set (or removed), never appended, so
/// re-decorating a retried request leaves it unchanged.
pub struct SessionInterceptor {
    state: SharedState,
    transaction_id: Option<TransactionId>,
}

impl SessionInterceptor {
    pub(crate) fn new(state: SharedState, transaction_id: Option<TransactionId>) -> Self {
        Self {
            state,
            transaction_id,
        }
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }
}

impl RequestInterceptor for SessionInterceptor {
    fn before_send(&self, request: &mut OutgoingRequest) {
        let (options, token) = {
            let state = self.state.read();
            (state.options.to_query_value(), state.token.clone())
        };

        match options {
            Some(options) => request.set_query_param(OPTIONS_PARAM, &options),
            None => request.remove_query_param(OPTIONS_PARAM),
        }
        match token {
            Some(token) => request.set_header(AUTHORIZATION_HEADER, token.as_str()),
            None => request.remove_header(AUTHORIZATION_HEADER),
        }
        match &self.transaction_id {
            Some(id) => request.set_header(TRANSACTION_ID_HEADER, id.as_str()),
            None => request.remove_header(TRANSACTION_ID_HEADER),
        }
    }

    fn after_receive(&self, response: &IncomingResponse) {
        if !response.is_success() || !response.is_metadata() {
            return;
        }
        let metadata = Arc::clone(&self.state.read().metadata);
        // Fails when the slot is already filled or a fetch is filling it.
        if metadata.set(Arc::from(response.body.as_str())).is_ok() {
            debug!(bytes = response.body.len(), "Caching service metadata");
        }
    }
}

#[cfg(test)]
mod tests {
    use domain::HttpMethod;

    use super::*;

    fn state(token: Option<&str>, skip_nulls: bool) -> SharedState {
        let mut options = RequestOptions::new();
        options.set_skip_nulls(skip_nulls);
        Arc::new(RwLock::new(SessionState {
            token: token.and_then(AuthToken::new),
            options,
            metadata: MetadataCache::default(),
        }))
    }

    fn get(url: &str) -> OutgoingRequest {
        OutgoingRequest::new(HttpMethod::Get, url)
    }

    #[test]
    fn injects_token_options_and_transaction() {
        let interceptor = SessionInterceptor::new(
            state(Some("tok"), true),
            TransactionId::new("tx-1"),
        );
        let mut request = get("https://h/odata/Products?$top=1");
        interceptor.before_send(&mut request);

        assert_eq!(request.url, "https://h/odata/Products?$top=1&options=skipnulls");
        assert_eq!(request.header("Authorization"), Some("tok"));
        assert_eq!(request.header("TransactionId"), Some("tx-1"));
    }

    #[test]
    fn leaves_request_clean_without_state() {
        let interceptor = SessionInterceptor::new(state(None, false), None);
        let mut request = get("https://h/odata/Products");
        interceptor.before_send(&mut request);

        assert_eq!(request.url, "https://h/odata/Products");
        assert_eq!(request.headers().count(), 0);
    }

    #[test]
    fn decoration_is_idempotent() {
        let interceptor = SessionInterceptor::new(
            state(Some("tok"), true),
            TransactionId::new("tx-1"),
        );
        let mut once = get("https://h/odata/Products");
        interceptor.before_send(&mut once);
        let mut twice = once.clone();
        interceptor.before_send(&mut twice);

        assert_eq!(once, twice);
        assert_eq!(twice.url.matches("options=").count(), 1);
    }

    #[test]
    fn redecoration_follows_current_state() {
        let shared = state(Some("tok"), true);
        let interceptor = SessionInterceptor::new(Arc::clone(&shared), None);
        let mut request = get("https://h/odata/Products");
        interceptor.before_send(&mut request);

        {
            let mut s = shared.write();
            s.options.set_skip_nulls(false);
            s.token = None;
        }
        interceptor.before_send(&mut request);

        assert_eq!(request.url, "https://h/odata/Products");
        assert_eq!(request.header("Authorization"), None);
    }

    #[test]
    fn caches_first_successful_metadata_only() {
        let shared = state(None, false);
        let interceptor = SessionInterceptor::new(Arc::clone(&shared), None);
        let response = |status, url: &str, body: &str| IncomingResponse {
            status,
            url: url.to_owned(),
            body: body.to_owned(),
        };

        interceptor.after_receive(&response(200, "https://h/odata/Products", "{}"));
        assert!(shared.read().metadata.get().is_none());

        interceptor.after_receive(&response(500, "https://h/odata/$metadata", "boom"));
        assert!(shared.read().metadata.get().is_none());

        interceptor.after_receive(&response(200, "https://h/odata/$metadata", "<first/>"));
        interceptor.after_receive(&response(200, "https://h/odata/$metadata", "<second/>"));
        assert_eq!(
            shared.read().metadata.get().map(|m| &**m),
            Some("<first/>")
        );
    }
}
