use std::marker::PhantomData;

use serde::Serialize;

use crate::adaptor::write::{merge_operation, set_operation, update_operation};
use crate::adaptor::{adaptor, WriteOperation};
use crate::api::reference::{Collection, Ref};
use crate::error::{invalid_argument, resource_exhausted, DbResult};
use crate::model::{FieldPath, IntoFieldPath};
use crate::value::{to_native_map, to_native_value, Value};

const MAX_BATCH_WRITES: usize = 500;

/// Fields to change with [`update`].
///
/// Values may be [`FieldValue`](crate::FieldValue) sentinels, so counters and
/// arrays can be changed without reading them first.
pub struct UpdateData<T> {
    fields: Vec<(FieldPath, Value)>,
    _model: PhantomData<fn() -> T>,
}

impl<T> UpdateData<T> {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            _model: PhantomData,
        }
    }

    /// Sets the (possibly nested) field at `path`, e.g. `["address", "city"]`.
    pub fn field<V: Serialize>(mut self, path: impl IntoFieldPath, value: V) -> DbResult<Self> {
        let path = path.into_field_path()?;
        self.fields.push((path, to_native_value(&value)?));
        Ok(self)
    }

    /// Builds an update from a partial model. Every top level field the
    /// partial serializes replaces the stored field as a whole; `None`
    /// fields are left alone.
    pub fn from_partial<P: Serialize + ?Sized>(partial: &P) -> DbResult<Self> {
        let fields = to_native_map(partial)?
            .into_fields()
            .into_iter()
            .map(|(name, value)| Ok((FieldPath::new([name])?, value)))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Self {
            fields,
            _model: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<T> Default for UpdateData<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for UpdateData<T> {
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            _model: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for UpdateData<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateData").field("fields", &self.fields).finish()
    }
}

pub(crate) fn set_write<T: Serialize>(reference: &Ref<T>, data: &T) -> DbResult<WriteOperation> {
    set_operation(reference.key().clone(), to_native_map(data)?)
}

pub(crate) fn upset_write<T: Serialize>(reference: &Ref<T>, data: &T) -> DbResult<WriteOperation> {
    merge_operation(reference.key().clone(), to_native_map(data)?)
}

pub(crate) fn update_write<T>(reference: &Ref<T>, data: UpdateData<T>) -> DbResult<WriteOperation> {
    if data.is_empty() {
        return Err(invalid_argument(format!(
            "Update of {} must change at least one field",
            reference.path()
        )));
    }
    update_operation(reference.key().clone(), data.fields)
}

pub(crate) fn remove_write<T>(reference: &Ref<T>) -> WriteOperation {
    WriteOperation::Delete {
        key: reference.key().clone(),
    }
}

async fn commit_one(write: WriteOperation) -> DbResult<()> {
    adaptor().await?.datastore().commit(vec![write]).await
}

/// Overwrites the document with `data`, creating it if needed.
pub async fn set<T: Serialize>(reference: &Ref<T>, data: &T) -> DbResult<()> {
    commit_one(set_write(reference, data)?).await
}

/// Merges `data` into the document, creating it if needed. Fields not in
/// `data` are kept.
pub async fn upset<T: Serialize>(reference: &Ref<T>, data: &T) -> DbResult<()> {
    commit_one(upset_write(reference, data)?).await
}

/// Stores `data` under a new auto-generated id.
pub async fn add<T: Serialize>(collection: &Collection<T>, data: &T) -> DbResult<Ref<T>> {
    let reference = collection.new_ref()?;
    set(&reference, data).await?;
    Ok(reference)
}

/// Changes some fields of an existing document. Fails with `not-found` when
/// the document does not exist.
pub async fn update<T>(reference: &Ref<T>, data: UpdateData<T>) -> DbResult<()> {
    commit_one(update_write(reference, data)?).await
}

/// Deletes the document. Deleting a missing document succeeds.
pub async fn remove<T>(reference: &Ref<T>) -> DbResult<()> {
    commit_one(remove_write(reference)).await
}

/// Writes committed together with [`Batch::commit`].
#[derive(Clone, Debug, Default)]
pub struct Batch {
    writes: Vec<WriteOperation>,
}

/// Starts an empty write batch.
pub fn batch() -> Batch {
    Batch::default()
}

impl Batch {
    pub fn set<T: Serialize>(&mut self, reference: &Ref<T>, data: &T) -> DbResult<&mut Self> {
        self.push(set_write(reference, data)?)
    }

    pub fn upset<T: Serialize>(&mut self, reference: &Ref<T>, data: &T) -> DbResult<&mut Self> {
        self.push(upset_write(reference, data)?)
    }

    pub fn update<T>(&mut self, reference: &Ref<T>, data: UpdateData<T>) -> DbResult<&mut Self> {
        self.push(update_write(reference, data)?)
    }

    pub fn remove<T>(&mut self, reference: &Ref<T>) -> DbResult<&mut Self> {
        self.push(remove_write(reference))
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Applies every write atomically.
    pub async fn commit(self) -> DbResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        adaptor().await?.datastore().commit(self.writes).await
    }

    fn push(&mut self, write: WriteOperation) -> DbResult<&mut Self> {
        if self.writes.len() >= MAX_BATCH_WRITES {
            return Err(resource_exhausted(format!(
                "A batch holds at most {MAX_BATCH_WRITES} writes"
            )));
        }
        self.writes.push(write);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::reference::ref_from_path;
    use crate::error::DbErrorCode;
    use crate::value::FieldValue;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Counter {
        count: i64,
    }

    #[derive(Serialize)]
    struct PartialCounter {
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        count: FieldValue<i64>,
    }

    #[test]
    fn partial_updates_replace_top_level_fields() {
        let partial = PartialCounter {
            label: None,
            count: FieldValue::Increment(2),
        };
        let reference = ref_from_path::<Counter>("counters/a").unwrap();
        let write = update_write(&reference, UpdateData::from_partial(&partial).unwrap()).unwrap();
        match write {
            WriteOperation::Update {
                field_paths,
                transforms,
                ..
            } => {
                assert!(field_paths.is_empty());
                assert_eq!(transforms.len(), 1);
                assert_eq!(transforms[0].field_path().canonical_string(), "count");
            }
            other => panic!("unexpected write {other:?}"),
        }
    }

    #[test]
    fn empty_updates_are_rejected() {
        let reference = ref_from_path::<Counter>("counters/a").unwrap();
        let err = update_write(&reference, UpdateData::new()).unwrap_err();
        assert_eq!(err.code, DbErrorCode::InvalidArgument);
    }

    #[test]
    fn batches_are_capped() {
        let reference = ref_from_path::<Counter>("counters/a").unwrap();
        let mut batch = batch();
        for _ in 0..MAX_BATCH_WRITES {
            batch.set(&reference, &Counter { count: 1 }).unwrap();
        }
        let err = batch.remove(&reference).unwrap_err();
        assert_eq!(err.code, DbErrorCode::ResourceExhausted);
        assert_eq!(batch.len(), MAX_BATCH_WRITES);
    }
}
