use serde::de::DeserializeOwned;

use crate::adaptor::adaptor;
use crate::api::doc::Doc;
use crate::api::reference::Ref;
use crate::error::DbResult;

/// Reads one document; `None` when it does not exist.
pub async fn get<T: DeserializeOwned>(reference: &Ref<T>) -> DbResult<Option<Doc<T>>> {
    let adaptor = adaptor().await?;
    let snapshot = adaptor.datastore().get_document(reference.key()).await?;
    Doc::from_snapshot(&adaptor, snapshot)
}

/// Reads several documents in one round trip. Results follow the order of
/// `references`, with `None` for missing documents.
pub async fn get_many<T: DeserializeOwned>(references: &[Ref<T>]) -> DbResult<Vec<Option<Doc<T>>>> {
    if references.is_empty() {
        return Ok(Vec::new());
    }
    let adaptor = adaptor().await?;
    let keys: Vec<_> = references.iter().map(|reference| reference.key().clone()).collect();
    adaptor
        .datastore()
        .batch_get_documents(&keys)
        .await?
        .into_iter()
        .map(|snapshot| Doc::from_snapshot(&adaptor, snapshot))
        .collect()
}
