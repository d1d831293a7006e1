//! The authenticated session: login, logout, request options, and the
//! factory for transaction-scoped query clients.

use std::sync::Arc;

use domain::{
    AuthToken, Credentials, DataModel, DomainApiError, Parameters, QueryClient,
    RequestInterceptor, RequestOptions, TransactionId, Value,
};
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use transport::{HttpTransport, SideChannel};

use crate::batch::BatchExecutor;
use crate::config::SessionConfig;
use crate::interceptor::{SessionInterceptor, SessionState, SharedState};
use crate::transaction::{FrontEndTransaction, Transaction, BEGIN_TRANSACTION};

/// An authenticated connection to one domain API service.
///
/// Every query client the session hands out (its own, and one per
/// transaction) shares the session's token and [`RequestOptions`], so a
/// login or an option change affects all of them from the next request on.
///
/// Call [`Session::close`] when done. Dropping a session that still holds a
/// token spawns the same best-effort logout on the current tokio runtime.
pub struct Session {
    transport: HttpTransport,
    state: SharedState,
    client: Arc<dyn QueryClient>,
}

impl Session {
    /// Opens an unauthenticated session for `config.service_root`.
    pub fn new(config: &SessionConfig) -> Result<Self, DomainApiError> {
        let transport = HttpTransport::new(&config.service_root, &config.http).map_err(|e| {
            DomainApiError::Configuration {
                message: e.to_string(),
            }
        })?;
        Ok(Self::with_transport(transport))
    }

    /// Opens an unauthenticated session on an existing transport. Sessions
    /// built from clones of one transport share its connection pool.
    pub fn with_transport(transport: HttpTransport) -> Self {
        let state: SharedState = Arc::new(RwLock::new(SessionState::default()));
        let interceptor: Arc<dyn RequestInterceptor> =
            Arc::new(SessionInterceptor::new(Arc::clone(&state), None));
        let metadata = Arc::clone(&state.read().metadata);
        let client: Arc<dyn QueryClient> =
            Arc::new(transport.query_client(Some(interceptor), metadata));
        Self {
            transport,
            state,
            client,
        }
    }

    pub fn service_root(&self) -> &str {
        self.transport.service_root().as_str()
    }

    /// The session's own query client (no transaction bound).
    pub fn client(&self) -> &Arc<dyn QueryClient> {
        &self.client
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().token.is_some()
    }

    /// A snapshot of the options sent with every request.
    pub fn request_options(&self) -> RequestOptions {
        self.state.read().options.clone()
    }

    /// Mutates the options sent with every subsequent request of every
    /// client of this session.
    pub fn update_request_options<F>(&self, update: F)
    where
        F: FnOnce(&mut RequestOptions),
    {
        update(&mut self.state.write().options);
    }

    /// The schema document, if any client of this session has fetched it.
    pub fn cached_metadata(&self) -> Option<Arc<str>> {
        self.state.read().metadata.get().cloned()
    }

    /// Returns the schema document, fetching it once per session.
    pub async fn metadata(&self) -> Result<Arc<str>, DomainApiError> {
        Ok(self.client.fetch_metadata().await?)
    }

    /// Authenticates and stores the returned token for all later requests.
    ///
    /// On failure the previously stored token (if any) is left untouched.
    #[instrument(skip(self, credentials), fields(user = credentials.user_name(), app = credentials.application()))]
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthToken, DomainApiError> {
        let payload = serde_json::to_value(credentials).map_err(|e| {
            DomainApiError::Authentication {
                message: format!("cannot encode credentials: {e}"),
                body: None,
            }
        })?;

        let response = self
            .transport
            .post_side_channel(SideChannel::Login, Some(&payload), None)
            .await
            .map_err(|e| DomainApiError::Authentication {
                message: e.to_string(),
                body: None,
            })?;

        if !response.is_success() {
            warn!(status = response.status, "Login rejected");
            return Err(DomainApiError::Authentication {
                message: format!("login returned status {}", response.status),
                body: Some(response.body),
            });
        }

        let token = parse_token(&response.body).ok_or_else(|| DomainApiError::Authentication {
            message: "login response did not contain a token".to_owned(),
            body: Some(response.body.clone()),
        })?;
        self.state.write().token = Some(token.clone());
        info!("Logged in");
        Ok(token)
    }

    /// Ends the session on the server. Never fails: a logout error is logged
    /// and the local token is cleared regardless.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        let Some(token) = self.state.read().token.clone() else {
            debug!("Close without login; nothing to do");
            return;
        };
        logout(&self.transport, &token).await;

        let mut state = self.state.write();
        // A concurrent login may have replaced the token meanwhile.
        if state.token.as_ref() == Some(&token) {
            state.token = None;
        }
    }

    /// Begins a server-side transaction on `model`.
    ///
    /// [`DataModel::FrontEnd`] is refused without a request: front-end
    /// transactions end differently and report changes, so they are begun
    /// with [`Session::begin_front_end_transaction`].
    #[instrument(skip(self))]
    pub async fn begin_transaction(
        &self,
        model: DataModel,
        track_changes: bool,
    ) -> Result<Transaction, DomainApiError> {
        if model == DataModel::FrontEnd {
            return Err(DomainApiError::Transaction {
                message: "front-end transactions are begun with begin_front_end_transaction"
                    .to_owned(),
                source: None,
            });
        }
        let id = self.begin(model, track_changes).await?;
        let client = self.create_scoped_client(Some(id.clone()));
        Ok(Transaction::new(id, model, client))
    }

    /// Begins a transaction on the front-end model.
    #[instrument(skip(self))]
    pub async fn begin_front_end_transaction(
        &self,
        track_changes: bool,
    ) -> Result<FrontEndTransaction, DomainApiError> {
        let id = self.begin(DataModel::FrontEnd, track_changes).await?;
        let client = self.create_scoped_client(Some(id.clone()));
        Ok(FrontEndTransaction::new(id, track_changes, client))
    }

    /// A batch executor on the session's own client.
    pub fn batch(&self) -> BatchExecutor {
        BatchExecutor::new(Arc::clone(&self.client))
    }

    async fn begin(
        &self,
        model: DataModel,
        track_changes: bool,
    ) -> Result<TransactionId, DomainApiError> {
        let mut parameters = Parameters::new();
        parameters.insert("model".to_owned(), json!(model.as_str()));
        parameters.insert("trackChanges".to_owned(), json!(track_changes));

        let result = self
            .client
            .execute_action(BEGIN_TRANSACTION, parameters)
            .await
            .map_err(|e| DomainApiError::transaction_failed(BEGIN_TRANSACTION, e))?;

        let id = match &result {
            Value::String(raw) => TransactionId::new(raw.as_str()),
            _ => None,
        };
        let id = id.ok_or_else(|| DomainApiError::Transaction {
            message: format!("{BEGIN_TRANSACTION} returned no transaction id (got {result})"),
            source: None,
        })?;
        info!(transaction_id = %id, %model, track_changes, "Transaction begun");
        Ok(id)
    }

    /// Builds a query client decorated with this session's state and,
    /// optionally, a transaction id. The client shares the session's schema
    /// slot, so the document is fetched once whichever client asks first.
    pub(crate) fn create_scoped_client(
        &self,
        transaction_id: Option<TransactionId>,
    ) -> Arc<dyn QueryClient> {
        let metadata = Arc::clone(&self.state.read().metadata);
        let interceptor: Arc<dyn RequestInterceptor> = Arc::new(SessionInterceptor::new(
            Arc::clone(&self.state),
            transaction_id,
        ));
        Arc::new(self.transport.query_client(Some(interceptor), metadata))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(token) = self.state.write().token.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let transport = self.transport.clone();
                handle.spawn(async move { logout(&transport, &token).await });
            }
            Err(_) => warn!("Session dropped outside a tokio runtime; logout skipped"),
        }
    }
}

async fn logout(transport: &HttpTransport, token: &AuthToken) {
    match transport
        .post_side_channel(SideChannel::Logout, Some(&json!({})), Some(token))
        .await
    {
        Ok(response) if response.is_success() => info!("Logged out"),
        Ok(response) => warn!(status = response.status, "Logout rejected"),
        Err(error) => warn!(%error, "Logout failed"),
    }
}

/// Extracts the token from a login response body.
///
/// Accepts a JSON string or an object whose first field holds the token.
/// Anything else falls back to the text between the first two `:`-separated
/// fields with quotes and braces stripped.
fn parse_token(body: &str) -> Option<AuthToken> {
    let parsed = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::String(token)) => Some(token),
        Ok(serde_json::Value::Object(fields)) => fields
            .into_iter()
            .next()
            .and_then(|(_, value)| value.as_str().map(str::to_owned)),
        _ => None,
    };
    parsed
        .or_else(|| {
            body.split(':')
                .nth(1)
                .map(|raw| raw.trim().trim_matches(|c| c == '"' || c == '}').to_owned())
        })
        .and_then(AuthToken::new)
}
