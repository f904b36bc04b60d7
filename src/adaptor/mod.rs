//! Native database selection.
//!
//! The typed helpers never talk to a database directly. They ask for the
//! active [`Adaptor`], which wraps one native [`Datastore`] together with the
//! policy for reporting snapshot metadata. A process picks its adaptor from
//! the environment the first time [`adaptor`] is called; tests replace it with
//! [`inject_adaptor`].

pub mod datastore;
pub mod environment;
pub mod http;
pub mod memory;
mod options;
pub mod query;
pub mod write;

use std::env;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_lock::OnceCell;

use crate::error::{failed_precondition, invalid_argument, DbResult};
use crate::model::{DatabaseId, DocumentKey};

pub use datastore::{
    transaction_fn, Datastore, NativeSnapshot, NativeTransaction, NoopTokenProvider,
    SnapshotMetadata, StaticTokenProvider, TokenProvider, TokenProviderArc, TransactionFn,
    WriteOperation,
};
pub use environment::is_browser;
pub use http::{HttpDatastore, MetadataTokenProvider, RetrySettings};
pub use memory::InMemoryDatastore;
pub use options::AdaptorOptions;

/// Which kind of native client an adaptor wraps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdaptorKind {
    /// Administrative client. Does not report snapshot metadata.
    Server,
    /// End-user client.
    Browser,
    /// A rules-testing context or an in-memory store.
    Testing,
}

/// Snapshot metadata as exposed on typed documents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DocMeta {
    pub from_cache: bool,
    pub has_pending_writes: bool,
}

/// The active native database handle.
#[derive(Clone)]
pub struct Adaptor {
    kind: AdaptorKind,
    database_id: DatabaseId,
    datastore: Arc<dyn Datastore>,
}

impl fmt::Debug for Adaptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adaptor")
            .field("kind", &self.kind)
            .field("database_id", &self.database_id)
            .finish_non_exhaustive()
    }
}

impl Adaptor {
    pub fn new(kind: AdaptorKind, database_id: DatabaseId, datastore: Arc<dyn Datastore>) -> Self {
        Self {
            kind,
            database_id,
            datastore,
        }
    }

    /// Administrative REST client. Against the emulator it authenticates as
    /// `owner`; otherwise it uses `GOOGLE_OAUTH_ACCESS_TOKEN` or the compute
    /// metadata server.
    pub fn server(options: &AdaptorOptions) -> DbResult<Self> {
        let database_id = options.database_id();
        let mut connection = http::Connection::builder(database_id.clone());
        let auth: TokenProviderArc = match options.emulator_host.as_deref() {
            Some(host) => {
                connection = connection.with_emulator_host(host);
                Arc::new(StaticTokenProvider::new("owner"))
            }
            None => match env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
                Ok(token) if !token.is_empty() => Arc::new(StaticTokenProvider::new(token)),
                _ => Arc::new(MetadataTokenProvider::new(reqwest::Client::new())),
            },
        };
        let datastore = HttpDatastore::builder(database_id.clone())
            .with_connection_builder(connection)
            .with_auth_provider(auth)
            .build()?;
        Ok(Self::new(AdaptorKind::Server, database_id, Arc::new(datastore)))
    }

    /// End-user REST client keyed by the project's API key. `id_token`
    /// supplies the signed-in user's ID token when there is one.
    pub fn browser(options: &AdaptorOptions, id_token: Option<TokenProviderArc>) -> DbResult<Self> {
        let api_key = options
            .api_key
            .as_deref()
            .ok_or_else(|| invalid_argument("The browser adaptor requires an apiKey in the app config"))?;
        let database_id = options.database_id();
        let mut connection = http::Connection::builder(database_id.clone()).with_api_key(api_key);
        if let Some(host) = options.emulator_host.as_deref() {
            connection = connection.with_emulator_host(host);
        }
        let datastore = HttpDatastore::builder(database_id.clone())
            .with_connection_builder(connection)
            .with_auth_provider(id_token.unwrap_or_else(|| Arc::new(NoopTokenProvider)))
            .build()?;
        Ok(Self::new(AdaptorKind::Browser, database_id, Arc::new(datastore)))
    }

    pub fn kind(&self) -> AdaptorKind {
        self.kind
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    /// Full resource name of a document as the native client stores it.
    pub fn reference_value(&self, key: &DocumentKey) -> String {
        self.database_id.document_name(key.path())
    }

    /// Metadata to expose on a typed document, if this kind reports any.
    pub fn doc_meta(&self, snapshot: &NativeSnapshot) -> Option<DocMeta> {
        match self.kind {
            AdaptorKind::Server => None,
            AdaptorKind::Browser | AdaptorKind::Testing => {
                let metadata = snapshot.metadata();
                Some(DocMeta {
                    from_cache: metadata.from_cache,
                    has_pending_writes: metadata.has_pending_writes,
                })
            }
        }
    }
}

static INJECTED: RwLock<Option<Adaptor>> = RwLock::new(None);
static DEFAULT: OnceCell<Adaptor> = OnceCell::new();

/// The injected adaptor if there is one, otherwise the environment default.
/// The default is built on first use and reused afterwards.
pub async fn adaptor() -> DbResult<Adaptor> {
    let injected = INJECTED
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Some(injected) = injected {
        return Ok(injected);
    }

    DEFAULT
        .get_or_try_init(|| async { default_adaptor() })
        .await
        .cloned()
}

fn default_adaptor() -> DbResult<Adaptor> {
    let options = AdaptorOptions::from_env()?;
    let adaptor = if is_browser() {
        Adaptor::browser(&options, None)?
    } else {
        Adaptor::server(&options)?
    };
    log::debug!(
        "selected {:?} adaptor for {}",
        adaptor.kind(),
        adaptor.database_id().database_name()
    );
    Ok(adaptor)
}

/// Replaces the active adaptor. Not available in the browser environment.
pub fn inject_adaptor(adaptor: Adaptor) -> DbResult<()> {
    inject_into_slot(adaptor, is_browser())
}

fn inject_into_slot(adaptor: Adaptor, browser: bool) -> DbResult<()> {
    if browser {
        return Err(failed_precondition(
            "Injecting adaptor is not supported in the browser environment",
        ));
    }
    log::debug!("injecting {:?} adaptor", adaptor.kind());
    *INJECTED.write().unwrap_or_else(PoisonError::into_inner) = Some(adaptor);
    Ok(())
}

/// Drops the injected adaptor so [`adaptor`] falls back to the environment.
pub fn clear_injected_adaptor() {
    if INJECTED
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .is_some()
    {
        log::debug!("cleared injected adaptor");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbErrorCode;

    fn in_memory(kind: AdaptorKind) -> Adaptor {
        Adaptor::new(
            kind,
            DatabaseId::default_database("demo"),
            Arc::new(InMemoryDatastore::new()),
        )
    }

    #[test]
    fn injection_is_refused_in_browser_environment() {
        let err = inject_into_slot(in_memory(AdaptorKind::Testing), true).unwrap_err();
        assert_eq!(err.code, DbErrorCode::FailedPrecondition);
        assert_eq!(
            err.message(),
            "Injecting adaptor is not supported in the browser environment"
        );
    }

    #[test]
    fn only_server_adaptors_hide_metadata() {
        let key = DocumentKey::parse("users/a").unwrap();
        let snapshot = NativeSnapshot::new(key, None, SnapshotMetadata::new(true, false));
        assert_eq!(in_memory(AdaptorKind::Server).doc_meta(&snapshot), None);
        assert_eq!(
            in_memory(AdaptorKind::Browser).doc_meta(&snapshot),
            Some(DocMeta {
                from_cache: true,
                has_pending_writes: false
            })
        );
    }

    #[test]
    fn reference_values_are_full_resource_names() {
        let adaptor = in_memory(AdaptorKind::Testing);
        let key = DocumentKey::parse("users/a/posts/b").unwrap();
        assert_eq!(
            adaptor.reference_value(&key),
            "projects/demo/databases/(default)/documents/users/a/posts/b"
        );
    }

    #[test]
    fn browser_adaptor_requires_an_api_key() {
        let options = AdaptorOptions::new("demo");
        let err = Adaptor::browser(&options, None).unwrap_err();
        assert_eq!(err.code, DbErrorCode::InvalidArgument);
        let adaptor = Adaptor::browser(&options.with_api_key("key"), None).unwrap();
        assert_eq!(adaptor.kind(), AdaptorKind::Browser);
    }
}
