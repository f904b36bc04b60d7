use serde::de::DeserializeOwned;

use crate::adaptor::{Adaptor, DocMeta, NativeSnapshot};
use crate::api::reference::Ref;
use crate::error::DbResult;
use crate::value::from_native_map;

/// A typed document read from the database.
#[derive(Clone, Debug, PartialEq)]
pub struct Doc<T> {
    pub reference: Ref<T>,
    pub data: T,
    /// Snapshot metadata, when the active adaptor reports it.
    pub meta: Option<DocMeta>,
}

impl<T: DeserializeOwned> Doc<T> {
    /// Decodes a native snapshot; `None` when the document does not exist.
    pub(crate) fn from_snapshot(adaptor: &Adaptor, snapshot: NativeSnapshot) -> DbResult<Option<Self>> {
        let meta = adaptor.doc_meta(&snapshot);
        let reference = Ref::from_key(snapshot.key().clone());
        let Some(fields) = snapshot.into_data() else {
            return Ok(None);
        };
        Ok(Some(Doc {
            reference,
            data: from_native_map(fields)?,
            meta,
        }))
    }
}
