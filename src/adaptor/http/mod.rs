//! Firestore REST datastore.

mod connection;
mod rpc_error;
mod serializer;
mod token;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value as JsonValue};

use crate::adaptor::datastore::{
    Datastore, NativeSnapshot, NativeTransaction, NoopTokenProvider, SnapshotMetadata,
    TokenProviderArc, TransactionFn, WriteOperation,
};
use crate::adaptor::query::QueryDefinition;
use crate::error::{internal_error, invalid_argument, DbError, DbErrorCode, DbResult};
use crate::model::{DatabaseId, DocumentKey};

pub(crate) use connection::emulator_origin;
pub use connection::{Connection, ConnectionBuilder, RequestContext};
pub use rpc_error::map_http_error;
pub use serializer::JsonProtoSerializer;
pub use token::MetadataTokenProvider;

#[derive(Clone)]
pub struct HttpDatastore {
    connection: Connection,
    serializer: JsonProtoSerializer,
    auth_provider: TokenProviderArc,
    retry: RetrySettings,
}

#[derive(Clone)]
pub struct HttpDatastoreBuilder {
    database_id: DatabaseId,
    connection_builder: ConnectionBuilder,
    auth_provider: TokenProviderArc,
    retry: RetrySettings,
}

/// Backoff for transient request failures. `max_attempts` also bounds how
/// often an aborted transaction is replayed.
#[derive(Clone, Debug)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            multiplier: 1.5,
            max_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl RetrySettings {
    fn should_retry(&self, attempt: usize, error: &DbError, can_refresh_token: bool) -> bool {
        if attempt + 1 >= self.max_attempts {
            return false;
        }
        match &error.code {
            DbErrorCode::Unauthenticated => can_refresh_token,
            code => code.is_transient(),
        }
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

impl HttpDatastore {
    pub fn builder(database_id: DatabaseId) -> HttpDatastoreBuilder {
        HttpDatastoreBuilder::new(database_id)
    }

    pub fn database_id(&self) -> &DatabaseId {
        self.serializer.database_id()
    }

    async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> DbResult<T>
    where
        F: FnMut(RequestContext) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let mut attempt = 0usize;
        loop {
            let context = self.build_request_context().await?;
            match operation(context).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    let can_refresh = self.auth_provider.can_refresh();
                    if !self.retry.should_retry(attempt, &err, can_refresh) {
                        return Err(err);
                    }
                    if err.code == DbErrorCode::Unauthenticated {
                        self.auth_provider.invalidate_token();
                    }
                    let delay = self.retry.backoff_delay(attempt);
                    log::debug!(
                        "retrying request after {} ({}), attempt {} in {delay:?}",
                        err.code_str(),
                        err.message(),
                        attempt + 2
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn build_request_context(&self) -> DbResult<RequestContext> {
        Ok(RequestContext {
            auth_token: self.auth_provider.get_token().await?,
            request_timeout: Some(self.retry.request_timeout),
        })
    }

    async fn post(&self, path: &str, body: JsonValue) -> DbResult<JsonValue> {
        self.execute_with_retry(|context| {
            let body = &body;
            async move {
                self.connection
                    .invoke_json(Method::POST, path, Some(body), &context)
                    .await
            }
        })
        .await
    }

    fn snapshot(&self, key: DocumentKey, document: Option<&JsonValue>) -> DbResult<NativeSnapshot> {
        let data = match document {
            Some(document) => Some(self.serializer.decode_document_fields(document)?),
            None => None,
        };
        Ok(NativeSnapshot::new(key, data, SnapshotMetadata::default()))
    }

    async fn batch_get(
        &self,
        keys: &[DocumentKey],
        transaction: Option<&str>,
    ) -> DbResult<Vec<NativeSnapshot>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<String> = keys.iter().map(|key| self.serializer.document_name(key)).collect();
        let mut body = json!({ "documents": names });
        if let Some(transaction) = transaction {
            body["transaction"] = json!(transaction);
        }
        let response = self.post("documents:batchGet", body).await?;
        let entries = response
            .as_array()
            .ok_or_else(|| internal_error("Firestore batchGet response must be an array"))?;

        let mut by_name = std::collections::HashMap::new();
        for entry in entries {
            if let Some(found) = entry.get("found") {
                let name = found
                    .get("name")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| internal_error("batchGet document missing 'name'"))?;
                by_name.insert(name.to_string(), found.clone());
            }
        }

        keys.iter()
            .zip(names.iter())
            .map(|(key, name)| self.snapshot(key.clone(), by_name.get(name)))
            .collect()
    }

    async fn commit_writes(&self, writes: &[WriteOperation], transaction: Option<&str>) -> DbResult<()> {
        let encoded = writes
            .iter()
            .map(|write| self.serializer.encode_write(write))
            .collect::<DbResult<Vec<_>>>()?;
        let mut body = json!({ "writes": encoded });
        if let Some(transaction) = transaction {
            body["transaction"] = json!(transaction);
        }
        self.post("documents:commit", body).await.map(|_| ())
    }

    async fn begin_transaction(&self, retry_transaction: Option<&str>) -> DbResult<String> {
        let read_write = match retry_transaction {
            Some(previous) => json!({ "retryTransaction": previous }),
            None => json!({}),
        };
        let response = self
            .post(
                "documents:beginTransaction",
                json!({ "options": { "readWrite": read_write } }),
            )
            .await?;
        response
            .get("transaction")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| internal_error("beginTransaction response missing 'transaction'"))
    }

    async fn rollback(&self, transaction: &str) {
        if let Err(err) = self
            .post("documents:rollback", json!({ "transaction": transaction }))
            .await
        {
            log::warn!("failed to roll back transaction: {err}");
        }
    }
}

#[async_trait]
impl Datastore for HttpDatastore {
    async fn get_document(&self, key: &DocumentKey) -> DbResult<NativeSnapshot> {
        let doc_path = format!("documents/{}", key.path().url_encoded());
        let document = self
            .execute_with_retry(|context| {
                let doc_path = &doc_path;
                async move {
                    self.connection
                        .invoke_json_optional(Method::GET, doc_path, None, &context)
                        .await
                }
            })
            .await?;
        self.snapshot(key.clone(), document.as_ref())
    }

    async fn batch_get_documents(&self, keys: &[DocumentKey]) -> DbResult<Vec<NativeSnapshot>> {
        self.batch_get(keys, None).await
    }

    async fn run_query(&self, query: &QueryDefinition) -> DbResult<Vec<NativeSnapshot>> {
        let parent = query.parent_path();
        let request_path = if parent.is_empty() {
            "documents:runQuery".to_string()
        } else {
            format!("documents/{}:runQuery", parent.url_encoded())
        };
        let body = json!({ "structuredQuery": self.serializer.encode_structured_query(query)? });
        let response = self.post(&request_path, body).await?;

        let results = response
            .as_array()
            .ok_or_else(|| internal_error("Firestore runQuery response must be an array"))?;

        let mut snapshots = Vec::new();
        for entry in results {
            let Some(document) = entry.get("document") else {
                continue;
            };
            let name = document
                .get("name")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| internal_error("Firestore runQuery document missing 'name' field"))?;
            let key = self.serializer.parse_document_name(name)?;
            snapshots.push(self.snapshot(key, Some(document))?);
        }

        if query.limit_type() == crate::adaptor::query::LimitType::Last {
            snapshots.reverse();
        }
        Ok(snapshots)
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> DbResult<()> {
        if writes.is_empty() {
            return Ok(());
        }
        self.commit_writes(&writes, None).await
    }

    async fn run_transaction<'a>(&self, mut body: TransactionFn<'a>) -> DbResult<()> {
        let mut previous: Option<String> = None;
        let mut attempt = 0usize;
        loop {
            let id = self.begin_transaction(previous.as_deref()).await?;
            let transaction = Arc::new(HttpTransaction::new(self.clone(), id.clone()));

            let native: Arc<dyn NativeTransaction> = transaction.clone();
            let result = match body(native).await {
                Ok(()) => {
                    let writes = transaction.take_writes();
                    if writes.is_empty() {
                        // Read-only transactions still need to release their locks.
                        self.rollback(&id).await;
                        Ok(())
                    } else {
                        self.commit_writes(&writes, Some(&id)).await
                    }
                }
                // An aborted transaction is already released by the backend.
                Err(err) if err.code == DbErrorCode::Aborted => Err(err),
                Err(err) => {
                    self.rollback(&id).await;
                    Err(err)
                }
            };

            match result {
                Err(err) if err.code == DbErrorCode::Aborted && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.backoff_delay(attempt);
                    log::debug!(
                        "transaction aborted ({}), retrying attempt {} in {delay:?}",
                        err.message(),
                        attempt + 2
                    );
                    tokio::time::sleep(delay).await;
                    previous = Some(id);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

struct HttpTransaction {
    datastore: HttpDatastore,
    id: String,
    writes: Mutex<Vec<WriteOperation>>,
    has_writes: AtomicBool,
}

impl HttpTransaction {
    fn new(datastore: HttpDatastore, id: String) -> Self {
        Self {
            datastore,
            id,
            writes: Mutex::new(Vec::new()),
            has_writes: AtomicBool::new(false),
        }
    }

    fn take_writes(&self) -> Vec<WriteOperation> {
        std::mem::take(&mut *self.writes.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl NativeTransaction for HttpTransaction {
    async fn get(&self, key: &DocumentKey) -> DbResult<NativeSnapshot> {
        if self.has_writes.load(Ordering::SeqCst) {
            return Err(invalid_argument(
                "Transactions must perform all reads before any writes",
            ));
        }
        let mut snapshots = self
            .datastore
            .batch_get(std::slice::from_ref(key), Some(&self.id))
            .await?;
        snapshots
            .pop()
            .ok_or_else(|| internal_error("batchGet returned no result for a transactional read"))
    }

    fn write(&self, write: WriteOperation) -> DbResult<()> {
        self.has_writes.store(true, Ordering::SeqCst);
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(write);
        Ok(())
    }
}

impl HttpDatastoreBuilder {
    fn new(database_id: DatabaseId) -> Self {
        Self {
            connection_builder: Connection::builder(database_id.clone()),
            database_id,
            auth_provider: Arc::new(NoopTokenProvider),
            retry: RetrySettings::default(),
        }
    }

    pub fn with_auth_provider(mut self, provider: TokenProviderArc) -> Self {
        self.auth_provider = provider;
        self
    }

    pub fn with_retry_settings(mut self, settings: RetrySettings) -> Self {
        self.retry = settings;
        self
    }

    pub fn with_connection_builder(mut self, builder: ConnectionBuilder) -> Self {
        self.connection_builder = builder;
        self
    }

    pub fn build(self) -> DbResult<HttpDatastore> {
        Ok(HttpDatastore {
            connection: self.connection_builder.build()?,
            serializer: JsonProtoSerializer::new(self.database_id),
            auth_provider: self.auth_provider,
            retry: self.retry,
        })
    }
}
