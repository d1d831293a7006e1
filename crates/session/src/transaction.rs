//! Server-side transactions bound to a session.
//!
//! A transaction owns its server-issued id and a query client that sends the
//! id as the `TransactionId` header on every request. Both flavours share
//! construction and teardown; only [`FrontEndTransaction`] offers change
//! retrieval and adjustment documents, so those calls cannot be made on a
//! plain [`Transaction`] at all.
//!
//! Ending a transaction is explicit. Async teardown cannot run on drop, so a
//! transaction dropped without being ended is only reported with a warning;
//! the server keeps it open until its own timeout.

use std::collections::BTreeMap;
use std::sync::Arc;

use domain::{
    ChangeKind, DataModel, DomainApiError, Parameters, QueryClient, TransactionId, Value,
};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::batch::BatchExecutor;

pub(crate) const BEGIN_TRANSACTION: &str = "BeginTransaction";
const END_TRANSACTION: &str = "EndTransaction";
const END_FRONT_END_TRANSACTION: &str = "EndFrontEndTransaction";
const GET_CHANGES: &str = "GetChanges";
const CREATE_ADJUSTMENT_DOCUMENTS: &str = "CreateAdjustmentDocuments";

// ---------------------------------------------------------------------------
// Shared construction / teardown
// ---------------------------------------------------------------------------

struct TransactionCore {
    id: TransactionId,
    client: Arc<dyn QueryClient>,
    ended: bool,
}

impl TransactionCore {
    fn new(id: TransactionId, client: Arc<dyn QueryClient>) -> Self {
        Self {
            id,
            client,
            ended: false,
        }
    }

    /// Issues exactly one end call; never retried.
    async fn end(&mut self, action: &str, commit: bool) -> Result<TransactionId, DomainApiError> {
        if self.ended {
            return Err(DomainApiError::Transaction {
                message: format!("transaction {} has already been ended", self.id),
                source: None,
            });
        }

        let mut parameters = Parameters::new();
        parameters.insert("commit".to_owned(), json!(commit));
        self.client
            .execute_action(action, parameters)
            .await
            .map_err(|e| DomainApiError::transaction_failed(action, e))?;

        self.ended = true;
        info!(transaction_id = %self.id, commit, "Transaction ended");
        Ok(self.id.clone())
    }
}

impl Drop for TransactionCore {
    fn drop(&mut self) {
        if !self.ended {
            warn!(
                transaction_id = %self.id,
                "Transaction dropped without being ended; it stays open on the server"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A general server-side transaction without change tracking.
pub struct Transaction {
    core: TransactionCore,
    model: DataModel,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, model: DataModel, client: Arc<dyn QueryClient>) -> Self {
        Self {
            core: TransactionCore::new(id, client),
            model,
        }
    }

    pub fn id(&self) -> &TransactionId {
        &self.core.id
    }

    pub fn model(&self) -> DataModel {
        self.model
    }

    /// Query client whose every request carries this transaction's id.
    pub fn client(&self) -> &Arc<dyn QueryClient> {
        &self.core.client
    }

    /// A batch executor scoped to this transaction.
    pub fn batch(&self) -> BatchExecutor {
        BatchExecutor::new(Arc::clone(&self.core.client))
    }

    pub fn is_ended(&self) -> bool {
        self.core.ended
    }

    /// Ends the transaction, committing or discarding its changes.
    /// Returns the transaction id.
    #[instrument(skip(self), fields(transaction_id = %self.core.id))]
    pub async fn end(&mut self, commit: bool) -> Result<TransactionId, DomainApiError> {
        self.core.end(END_TRANSACTION, commit).await
    }

    pub async fn commit(&mut self) -> Result<TransactionId, DomainApiError> {
        self.end(true).await
    }

    pub async fn rollback(&mut self) -> Result<TransactionId, DomainApiError> {
        self.end(false).await
    }
}

// ---------------------------------------------------------------------------
// Front-end transaction
// ---------------------------------------------------------------------------

/// A front-end transaction: optionally tracks changes and can create
/// adjustment documents for records that are no longer editable.
pub struct FrontEndTransaction {
    core: TransactionCore,
    track_changes: bool,
}

impl FrontEndTransaction {
    pub(crate) fn new(id: TransactionId, track_changes: bool, client: Arc<dyn QueryClient>) -> Self {
        Self {
            core: TransactionCore::new(id, client),
            track_changes,
        }
    }

    pub fn id(&self) -> &TransactionId {
        &self.core.id
    }

    pub fn tracks_changes(&self) -> bool {
        self.track_changes
    }

    /// Query client whose every request carries this transaction's id.
    pub fn client(&self) -> &Arc<dyn QueryClient> {
        &self.core.client
    }

    pub fn batch(&self) -> BatchExecutor {
        BatchExecutor::new(Arc::clone(&self.core.client))
    }

    pub fn is_ended(&self) -> bool {
        self.core.ended
    }

    #[instrument(skip(self), fields(transaction_id = %self.core.id))]
    pub async fn end(&mut self, commit: bool) -> Result<TransactionId, DomainApiError> {
        self.core.end(END_FRONT_END_TRANSACTION, commit).await
    }

    pub async fn commit(&mut self) -> Result<TransactionId, DomainApiError> {
        self.end(true).await
    }

    pub async fn rollback(&mut self) -> Result<TransactionId, DomainApiError> {
        self.end(false).await
    }

    /// Returns the changes made since the previous call.
    ///
    /// This is a consuming read: the service forgets what it returned, so a
    /// second call only reports newer changes.
    #[instrument(skip(self), fields(transaction_id = %self.core.id))]
    pub async fn get_changes(&self) -> Result<ChangeSet, DomainApiError> {
        if !self.track_changes {
            return Err(DomainApiError::Transaction {
                message: format!("transaction {} was begun without change tracking", self.core.id),
                source: None,
            });
        }
        let feed = self
            .core
            .client
            .execute_function(GET_CHANGES, Parameters::new())
            .await
            .map_err(|e| DomainApiError::transaction_failed(GET_CHANGES, e))?;
        Ok(ChangeSet::from_feed(&feed))
    }

    /// Creates adjustment documents for released documents modified in this
    /// transaction. Does not commit or roll back.
    ///
    /// On failure every server-reported error is returned in
    /// [`DomainApiError::Aggregate`]. Some adjustment documents may already
    /// exist in a provisional state even then.
    #[instrument(skip(self), fields(transaction_id = %self.core.id))]
    pub async fn create_adjustment_documents(&self) -> Result<(), DomainApiError> {
        match self
            .core
            .client
            .execute_action(CREATE_ADJUSTMENT_DOCUMENTS, Parameters::new())
            .await
        {
            Ok(_) => Ok(()),
            Err(error) => match error.server_error() {
                Some(server) => {
                    let failures = server.failures();
                    warn!(failures = failures.len(), "Adjustment document creation failed");
                    Err(DomainApiError::Aggregate {
                        operation: CREATE_ADJUSTMENT_DOCUMENTS.to_owned(),
                        failures,
                    })
                }
                None => Err(DomainApiError::Client(error)),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Change feed
// ---------------------------------------------------------------------------

/// Changes reported by one [`FrontEndTransaction::get_changes`] call,
/// grouped by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: BTreeMap<ChangeKind, Vec<Value>>,
}

impl ChangeSet {
    /// Decodes the feed: a list of records keyed by change kind. String
    /// payloads holding JSON are parsed; unknown keys are skipped.
    pub fn from_feed(feed: &Value) -> Self {
        let records: Vec<&Value> = match feed {
            Value::List(items) => items.iter().collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        };

        let mut set = ChangeSet::default();
        for record in records {
            let Some(entity) = record.as_entity() else {
                debug!("Skipping non-record change feed entry");
                continue;
            };
            for (key, payload) in entity.properties() {
                match ChangeKind::parse(key) {
                    Some(kind) => set.changes.entry(kind).or_default().push(decode(payload)),
                    None => debug!(key, "Skipping unknown change feed key"),
                }
            }
        }
        set
    }

    pub fn get(&self, kind: ChangeKind) -> &[Value] {
        self.changes.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.values().all(Vec::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChangeKind, &[Value])> {
        self.changes.iter().map(|(k, v)| (*k, v.as_slice()))
    }
}

fn decode(payload: &Value) -> Value {
    match payload {
        Value::String(text) => serde_json::from_str::<serde_json::Value>(text)
            .map(Value::from)
            .unwrap_or_else(|_| payload.clone()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use domain::{ClientError, Entity};

    use super::*;
    use crate::testing::RecordingClient;

    fn id(raw: &str) -> TransactionId {
        TransactionId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn end_sends_commit_flag_once() {
        let client = Arc::new(RecordingClient::default());
        let mut tx = Transaction::new(id("tx-1"), DataModel::Common, client.clone());

        assert_eq!(tx.rollback().await.unwrap(), id("tx-1"));
        assert!(tx.is_ended());
        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "EndTransaction");
        assert_eq!(calls[0].1["commit"], json!(false));

        assert!(matches!(
            tx.commit().await,
            Err(DomainApiError::Transaction { .. })
        ));
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn front_end_transaction_ends_with_its_own_action() {
        let client = Arc::new(RecordingClient::default());
        let mut tx = FrontEndTransaction::new(id("fe-1"), false, client.clone());
        tx.commit().await.unwrap();
        assert_eq!(client.calls()[0].0, "EndFrontEndTransaction");
        assert_eq!(client.calls()[0].1["commit"], json!(true));
    }

    #[tokio::test]
    async fn failed_end_leaves_transaction_open() {
        let client = Arc::new(RecordingClient::with_responses([Err(
            ClientError::Transport {
                message: "reset".to_owned(),
            },
        )]));
        let mut tx = Transaction::new(id("tx-2"), DataModel::Common, client.clone());
        assert!(matches!(
            tx.commit().await,
            Err(DomainApiError::Transaction { source: Some(_), .. })
        ));
        assert!(!tx.is_ended());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn get_changes_requires_tracking() {
        let client = Arc::new(RecordingClient::default());
        let mut tx = FrontEndTransaction::new(id("fe-2"), false, client.clone());
        assert!(tx.get_changes().await.is_err());
        assert!(client.calls().is_empty());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn get_changes_groups_by_kind_and_parses_json_strings() {
        let feed = Value::List(vec![
            Value::Entity(
                Entity::new()
                    .with("update", r#"{"Crm_Sales_SalesOrders":["a"]}"#)
                    .with("insert", "not json"),
            ),
            Value::Entity(Entity::new().with("Delete", "[]").with("other", 1i64)),
        ]);
        let client = Arc::new(RecordingClient::with_responses([Ok(feed)]));
        let mut tx = FrontEndTransaction::new(id("fe-3"), true, client.clone());

        let changes = tx.get_changes().await.unwrap();
        assert_eq!(client.calls()[0].0, "GetChanges");

        let update = &changes.get(ChangeKind::Update)[0];
        assert!(update.resolve_path("Crm_Sales_SalesOrders").is_ok());
        assert_eq!(changes.get(ChangeKind::Insert)[0].as_str(), Some("not json"));
        assert_eq!(changes.get(ChangeKind::Delete).len(), 1);
        assert_eq!(changes.iter().count(), 3);
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn adjustment_failures_are_aggregated() {
        let body = r#"{"error":{"message":"2 documents failed","details":[
            {"code":"A1","message":"Order 1 is locked"},
            {"code":"A2","message":"Order 2 is locked"}]}}"#;
        let client = Arc::new(RecordingClient::with_responses([Err(ClientError::status(
            500,
            body.to_owned(),
        ))]));
        let mut tx = FrontEndTransaction::new(id("fe-4"), false, client.clone());

        match tx.create_adjustment_documents().await.unwrap_err() {
            DomainApiError::Aggregate { operation, failures } => {
                assert_eq!(operation, "CreateAdjustmentDocuments");
                let codes: Vec<_> = failures.iter().filter_map(|f| f.code.as_deref()).collect();
                assert_eq!(codes, ["A1", "A2"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!tx.is_ended());
        tx.rollback().await.unwrap();
    }

    #[test]
    fn empty_feed_is_empty() {
        assert!(ChangeSet::from_feed(&Value::Null).is_empty());
        assert!(ChangeSet::from_feed(&Value::List(vec![])).is_empty());
    }
}
