//! In-memory [`QueryClient`] for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    BatchOperation, ClientError, Entity, EntityKey, EntityQuery, Parameters, QueryClient, Value,
};
use parking_lot::Mutex;

/// Records action, function and batch calls; answers them from a queue of
/// canned results (or `Value::Null` once the queue is empty).
#[derive(Default)]
pub(crate) struct RecordingClient {
    calls: Mutex<Vec<(String, Parameters)>>,
    batches: Mutex<Vec<Vec<BatchOperation>>>,
    responses: Mutex<VecDeque<Result<Value, ClientError>>>,
    batch_error: Option<ClientError>,
}

impl RecordingClient {
    pub(crate) fn with_responses(
        responses: impl IntoIterator<Item = Result<Value, ClientError>>,
    ) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn failing_batches(error: ClientError) -> Self {
        Self {
            batch_error: Some(error),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, Parameters)> {
        self.calls.lock().clone()
    }

    pub(crate) fn batches(&self) -> Vec<Vec<BatchOperation>> {
        self.batches.lock().clone()
    }

    fn answer(&self, path: &str, parameters: Parameters) -> Result<Value, ClientError> {
        self.calls.lock().push((path.to_owned(), parameters));
        self.responses.lock().pop_front().unwrap_or(Ok(Value::Null))
    }
}

fn unsupported() -> ClientError {
    ClientError::Decode {
        message: "not supported by RecordingClient".to_owned(),
    }
}

#[async_trait]
impl QueryClient for RecordingClient {
    async fn find_entries(&self, _query: &EntityQuery) -> Result<Vec<Entity>, ClientError> {
        Err(unsupported())
    }

    async fn find_entry(&self, _query: &EntityQuery) -> Result<Option<Entity>, ClientError> {
        Err(unsupported())
    }

    async fn insert_entry(
        &self,
        _set: &str,
        _entity: serde_json::Value,
    ) -> Result<Entity, ClientError> {
        Err(unsupported())
    }

    async fn update_entry(
        &self,
        _set: &str,
        _key: &EntityKey,
        _patch: serde_json::Value,
    ) -> Result<(), ClientError> {
        Err(unsupported())
    }

    async fn delete_entry(&self, _set: &str, _key: &EntityKey) -> Result<(), ClientError> {
        Err(unsupported())
    }

    async fn execute_action(
        &self,
        path: &str,
        parameters: Parameters,
    ) -> Result<Value, ClientError> {
        self.answer(path, parameters)
    }

    async fn execute_function(
        &self,
        path: &str,
        parameters: Parameters,
    ) -> Result<Value, ClientError> {
        self.answer(path, parameters)
    }

    async fn submit_batch(
        &self,
        operations: Vec<BatchOperation>,
    ) -> Result<Vec<Value>, ClientError> {
        let count = operations.len();
        self.batches.lock().push(operations);
        match &self.batch_error {
            Some(error) => Err(error.clone()),
            None => Ok(vec![Value::Null; count]),
        }
    }

    async fn fetch_metadata(&self) -> Result<Arc<str>, ClientError> {
        Err(unsupported())
    }
}
