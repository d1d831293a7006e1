//! Deferred mutations submitted as one atomic batch.

use std::sync::Arc;

use domain::{BatchOperation, DomainApiError, EntityKey, QueryClient, Value};
use tracing::{debug, instrument};

type Deferred = Box<dyn FnOnce(&mut BatchWriter) + Send>;

/// Records the operations produced by deferred closures, in call order.
#[derive(Debug, Default)]
pub struct BatchWriter {
    operations: Vec<BatchOperation>,
}

impl BatchWriter {
    pub fn insert(&mut self, set: impl Into<String>, entity: serde_json::Value) {
        self.operations.push(BatchOperation::Insert {
            set: set.into(),
            entity,
        });
    }

    pub fn update(
        &mut self,
        set: impl Into<String>,
        key: impl Into<EntityKey>,
        patch: serde_json::Value,
    ) {
        self.operations.push(BatchOperation::Update {
            set: set.into(),
            key: key.into(),
            patch,
        });
    }

    pub fn delete(&mut self, set: impl Into<String>, key: impl Into<EntityKey>) {
        self.operations.push(BatchOperation::Delete {
            set: set.into(),
            key: key.into(),
        });
    }
}

/// Accumulates deferred mutations against one query client and submits them
/// as a single batch request.
///
/// Closures run in the order they were added, when [`BatchExecutor::execute`]
/// is called. Atomicity is provided by the service; a failed submission is
/// reported as one [`DomainApiError::Batch`] and no per-operation outcome is
/// assumed.
pub struct BatchExecutor {
    client: Arc<dyn QueryClient>,
    deferred: Vec<Deferred>,
}

impl BatchExecutor {
    pub fn new(client: Arc<dyn QueryClient>) -> Self {
        Self {
            client,
            deferred: Vec::new(),
        }
    }

    /// Queues a closure that writes one or more operations.
    pub fn add<F>(&mut self, operation: F) -> &mut Self
    where
        F: FnOnce(&mut BatchWriter) + Send + 'static,
    {
        self.deferred.push(Box::new(operation));
        self
    }

    /// Queues an update of `set(key)` with `patch`.
    pub fn update(
        &mut self,
        set: impl Into<String>,
        key: impl Into<EntityKey>,
        patch: serde_json::Value,
    ) -> &mut Self {
        let (set, key) = (set.into(), key.into());
        self.add(move |batch| batch.update(set, key, patch))
    }

    pub fn insert(&mut self, set: impl Into<String>, entity: serde_json::Value) -> &mut Self {
        let set = set.into();
        self.add(move |batch| batch.insert(set, entity))
    }

    pub fn delete(&mut self, set: impl Into<String>, key: impl Into<EntityKey>) -> &mut Self {
        let (set, key) = (set.into(), key.into());
        self.add(move |batch| batch.delete(set, key))
    }

    /// Number of queued closures (not operations: a closure may write several).
    pub fn len(&self) -> usize {
        self.deferred.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deferred.is_empty()
    }

    /// Runs every queued closure and submits the resulting operations as one
    /// batch. Returns one result per operation, in order.
    #[instrument(skip(self), fields(deferred = self.deferred.len()))]
    pub async fn execute(self) -> Result<Vec<Value>, DomainApiError> {
        let mut writer = BatchWriter::default();
        for operation in self.deferred {
            operation(&mut writer);
        }
        let operations = writer.operations;
        if operations.is_empty() {
            return Ok(Vec::new());
        }

        let count = operations.len();
        debug!(operations = count, "Submitting batch");
        self.client
            .submit_batch(operations)
            .await
            .map_err(|source| DomainApiError::Batch {
                operations: count,
                source,
            })
    }
}
