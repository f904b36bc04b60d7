use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::adaptor::query::QueryDefinition;
use crate::adaptor::write::FieldTransform;
use crate::error::DbResult;
use crate::model::{DocumentKey, FieldPath};
use crate::value::MapValue;

/// Metadata reported alongside a native snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotMetadata {
    pub from_cache: bool,
    pub has_pending_writes: bool,
}

impl SnapshotMetadata {
    pub fn new(from_cache: bool, has_pending_writes: bool) -> Self {
        Self {
            from_cache,
            has_pending_writes,
        }
    }
}

/// A document as returned by a native datastore. `data` is `None` when the
/// document does not exist.
#[derive(Clone, Debug)]
pub struct NativeSnapshot {
    key: DocumentKey,
    data: Option<MapValue>,
    metadata: SnapshotMetadata,
}

impl NativeSnapshot {
    pub fn new(key: DocumentKey, data: Option<MapValue>, metadata: SnapshotMetadata) -> Self {
        Self {
            key,
            data,
            metadata,
        }
    }

    pub fn missing(key: DocumentKey) -> Self {
        Self::new(key, None, SnapshotMetadata::default())
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&MapValue> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<MapValue> {
        self.data
    }

    pub fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }
}

/// A single write in a commit.
///
/// `Set` with a mask is a merge: only masked paths are touched, and masked
/// paths missing from `data` are deleted. `Update` additionally requires the
/// document to exist.
#[derive(Clone, Debug)]
pub enum WriteOperation {
    Set {
        key: DocumentKey,
        data: MapValue,
        mask: Option<Vec<FieldPath>>,
        transforms: Vec<FieldTransform>,
    },
    Update {
        key: DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
        transforms: Vec<FieldTransform>,
    },
    Delete {
        key: DocumentKey,
    },
}

impl WriteOperation {
    pub fn key(&self) -> &DocumentKey {
        match self {
            WriteOperation::Set { key, .. }
            | WriteOperation::Update { key, .. }
            | WriteOperation::Delete { key } => key,
        }
    }
}

/// Body of a native transaction. It may be invoked several times when the
/// datastore retries on contention.
pub type TransactionFn<'a> =
    Box<dyn FnMut(Arc<dyn NativeTransaction>) -> BoxFuture<'a, DbResult<()>> + Send + 'a>;

/// Boxes a closure into a [`TransactionFn`].
pub fn transaction_fn<'a, F, Fut>(mut body: F) -> TransactionFn<'a>
where
    F: FnMut(Arc<dyn NativeTransaction>) -> Fut + Send + 'a,
    Fut: Future<Output = DbResult<()>> + Send + 'a,
{
    Box::new(move |transaction| body(transaction).boxed())
}

/// The native database client the typed helpers forward to.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    async fn get_document(&self, key: &DocumentKey) -> DbResult<NativeSnapshot>;

    /// Reads several documents, returning snapshots in request order.
    ///
    /// Clients without batch reads fall back to one read per key.
    async fn batch_get_documents(&self, keys: &[DocumentKey]) -> DbResult<Vec<NativeSnapshot>> {
        let mut snapshots = Vec::with_capacity(keys.len());
        for key in keys {
            snapshots.push(self.get_document(key).await?);
        }
        Ok(snapshots)
    }

    async fn run_query(&self, query: &QueryDefinition) -> DbResult<Vec<NativeSnapshot>>;

    /// Applies every write atomically.
    async fn commit(&self, writes: Vec<WriteOperation>) -> DbResult<()>;

    /// Runs `body` inside a read-write transaction and commits the writes it
    /// buffered. Contention retries happen here.
    async fn run_transaction<'a>(&self, body: TransactionFn<'a>) -> DbResult<()>;
}

/// Handle passed to a transaction body.
#[async_trait]
pub trait NativeTransaction: Send + Sync {
    /// Reads a document. Fails once the transaction has buffered a write.
    async fn get(&self, key: &DocumentKey) -> DbResult<NativeSnapshot>;

    /// Buffers a write until the transaction commits.
    fn write(&self, write: WriteOperation) -> DbResult<()>;

    fn set(
        &self,
        key: DocumentKey,
        data: MapValue,
        mask: Option<Vec<FieldPath>>,
        transforms: Vec<FieldTransform>,
    ) -> DbResult<()> {
        self.write(WriteOperation::Set {
            key,
            data,
            mask,
            transforms,
        })
    }

    fn update(
        &self,
        key: DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
        transforms: Vec<FieldTransform>,
    ) -> DbResult<()> {
        self.write(WriteOperation::Update {
            key,
            data,
            field_paths,
            transforms,
        })
    }

    fn delete(&self, key: DocumentKey) -> DbResult<()> {
        self.write(WriteOperation::Delete { key })
    }
}

/// Supplies bearer tokens for HTTP requests.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    async fn get_token(&self) -> DbResult<Option<String>>;
    fn invalidate_token(&self);

    /// Whether `get_token` can return a different token after
    /// `invalidate_token`. Rejected tokens are only retried when it can.
    fn can_refresh(&self) -> bool {
        true
    }
}

pub type TokenProviderArc = Arc<dyn TokenProvider>;

#[derive(Default, Clone)]
pub struct NoopTokenProvider;

#[async_trait]
impl TokenProvider for NoopTokenProvider {
    async fn get_token(&self) -> DbResult<Option<String>> {
        Ok(None)
    }

    fn invalidate_token(&self) {}

    fn can_refresh(&self) -> bool {
        false
    }
}

/// A fixed token, e.g. `owner` against the emulator or a pre-fetched OAuth
/// access token.
#[derive(Clone, Debug)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> DbResult<Option<String>> {
        Ok(Some(self.token.clone()))
    }

    fn invalidate_token(&self) {}

    fn can_refresh(&self) -> bool {
        false
    }
}
