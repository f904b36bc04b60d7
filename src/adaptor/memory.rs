use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::mem::discriminant;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::adaptor::datastore::{
    Datastore, NativeSnapshot, NativeTransaction, SnapshotMetadata, TransactionFn, WriteOperation,
};
use crate::adaptor::query::{Bound, FieldFilter, FilterOperator, OrderBy, OrderDirection, QueryDefinition, LimitType};
use crate::adaptor::write::{FieldTransform, TransformOperation};
use crate::error::{aborted, invalid_argument, not_found, DbResult};
use crate::model::{DocumentKey, Timestamp};
use crate::value::{MapValue, Value, ValueKind};

/// Attempts made before a contended transaction gives up.
const MAX_TRANSACTION_ATTEMPTS: usize = 5;

#[derive(Clone, Debug)]
struct StoredDocument {
    data: MapValue,
    version: u64,
}

#[derive(Default)]
struct Store {
    documents: BTreeMap<DocumentKey, StoredDocument>,
    version: u64,
}

impl Store {
    fn version_of(&self, key: &DocumentKey) -> Option<u64> {
        self.documents.get(key).map(|doc| doc.version)
    }

    fn snapshot(&self, key: &DocumentKey) -> NativeSnapshot {
        let data = self.documents.get(key).map(|doc| doc.data.clone());
        NativeSnapshot::new(key.clone(), data, SnapshotMetadata::default())
    }

    /// Applies `writes` all-or-nothing.
    fn apply(&mut self, writes: Vec<WriteOperation>) -> DbResult<()> {
        let commit_time = Timestamp::now();
        let version = self.version + 1;
        let mut staged = self.documents.clone();

        for write in writes {
            match write {
                WriteOperation::Set {
                    key,
                    data,
                    mask,
                    transforms,
                } => {
                    let mut fields = match mask {
                        Some(mask) => {
                            let mut fields = staged
                                .get(&key)
                                .map(|doc| doc.data.clone())
                                .unwrap_or_default();
                            for path in &mask {
                                match data.get_path(path) {
                                    Some(value) => fields.set_path(path, value.clone()),
                                    None => fields.remove_path(path),
                                }
                            }
                            fields
                        }
                        None => data,
                    };
                    apply_transforms(&mut fields, &transforms, commit_time);
                    staged.insert(key, StoredDocument { data: fields, version });
                }
                WriteOperation::Update {
                    key,
                    data,
                    field_paths,
                    transforms,
                } => {
                    let mut fields = staged
                        .get(&key)
                        .map(|doc| doc.data.clone())
                        .ok_or_else(|| {
                            not_found(format!(
                                "No document to update: {}",
                                key.path().canonical_string()
                            ))
                        })?;
                    for path in &field_paths {
                        match data.get_path(path) {
                            Some(value) => fields.set_path(path, value.clone()),
                            None => fields.remove_path(path),
                        }
                    }
                    apply_transforms(&mut fields, &transforms, commit_time);
                    staged.insert(key, StoredDocument { data: fields, version });
                }
                WriteOperation::Delete { key } => {
                    staged.remove(&key);
                }
            }
        }

        self.documents = staged;
        self.version = version;
        Ok(())
    }
}

/// A process-local datastore with the same write, query and transaction
/// semantics as the backend. Used by tests and by the testing adaptor.
#[derive(Clone, Default)]
pub struct InMemoryDatastore {
    store: Arc<Mutex<Store>>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every stored document.
    pub fn clear(&self) {
        self.lock().documents.clear();
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn get_document(&self, key: &DocumentKey) -> DbResult<NativeSnapshot> {
        Ok(self.lock().snapshot(key))
    }

    async fn batch_get_documents(&self, keys: &[DocumentKey]) -> DbResult<Vec<NativeSnapshot>> {
        let store = self.lock();
        Ok(keys.iter().map(|key| store.snapshot(key)).collect())
    }

    async fn run_query(&self, query: &QueryDefinition) -> DbResult<Vec<NativeSnapshot>> {
        let candidates: Vec<NativeSnapshot> = {
            let store = self.lock();
            store
                .documents
                .iter()
                .filter(|(key, _)| &key.collection_path() == query.collection_path())
                .map(|(key, doc)| {
                    NativeSnapshot::new(key.clone(), Some(doc.data.clone()), SnapshotMetadata::default())
                })
                .collect()
        };
        Ok(evaluate_query(candidates, query))
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> DbResult<()> {
        if writes.is_empty() {
            return Ok(());
        }
        self.lock().apply(writes)
    }

    async fn run_transaction<'a>(&self, mut body: TransactionFn<'a>) -> DbResult<()> {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let transaction = Arc::new(InMemoryTransaction::new(self.clone()));
            let native: Arc<dyn NativeTransaction> = transaction.clone();
            body(native).await?;

            let (reads, writes) = transaction.finish();
            let mut store = self.lock();
            let conflicted = reads
                .iter()
                .any(|(key, version)| store.version_of(key) != *version);
            if !conflicted {
                return store.apply(writes);
            }
            drop(store);
            log::debug!("in-memory transaction contended, attempt {attempt} of {MAX_TRANSACTION_ATTEMPTS}");
        }
        Err(aborted(format!(
            "Transaction failed after {MAX_TRANSACTION_ATTEMPTS} attempts due to contention"
        )))
    }
}

struct InMemoryTransaction {
    datastore: InMemoryDatastore,
    reads: Mutex<Vec<(DocumentKey, Option<u64>)>>,
    writes: Mutex<Vec<WriteOperation>>,
    has_writes: AtomicBool,
}

impl InMemoryTransaction {
    fn new(datastore: InMemoryDatastore) -> Self {
        Self {
            datastore,
            reads: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            has_writes: AtomicBool::new(false),
        }
    }

    fn finish(&self) -> (Vec<(DocumentKey, Option<u64>)>, Vec<WriteOperation>) {
        let reads = std::mem::take(&mut *self.reads.lock().unwrap_or_else(PoisonError::into_inner));
        let writes = std::mem::take(&mut *self.writes.lock().unwrap_or_else(PoisonError::into_inner));
        (reads, writes)
    }
}

#[async_trait]
impl NativeTransaction for InMemoryTransaction {
    async fn get(&self, key: &DocumentKey) -> DbResult<NativeSnapshot> {
        if self.has_writes.load(AtomicOrdering::SeqCst) {
            return Err(invalid_argument(
                "Transactions must perform all reads before any writes",
            ));
        }
        let (snapshot, version) = {
            let store = self.datastore.lock();
            (store.snapshot(key), store.version_of(key))
        };
        self.reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key.clone(), version));
        Ok(snapshot)
    }

    fn write(&self, write: WriteOperation) -> DbResult<()> {
        self.has_writes.store(true, AtomicOrdering::SeqCst);
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(write);
        Ok(())
    }
}

fn apply_transforms(fields: &mut MapValue, transforms: &[FieldTransform], commit_time: Timestamp) {
    for transform in transforms {
        let path = transform.field_path();
        let current = fields.get_path(path);
        let next = match transform.operation() {
            TransformOperation::ServerTimestamp => Value::from_timestamp(commit_time),
            TransformOperation::Increment(operand) => increment(current, operand),
            TransformOperation::ArrayUnion(elements) => {
                let mut values = existing_array(current);
                for element in elements {
                    if !values.iter().any(|value| value.loosely_equals(element)) {
                        values.push(element.clone());
                    }
                }
                Value::from_array(values)
            }
            TransformOperation::ArrayRemove(elements) => {
                let mut values = existing_array(current);
                values.retain(|value| !elements.iter().any(|element| element.loosely_equals(value)));
                Value::from_array(values)
            }
        };
        fields.set_path(path, next);
    }
}

fn increment(current: Option<&Value>, operand: &Value) -> Value {
    match (current.map(Value::kind), operand.kind()) {
        (Some(ValueKind::Integer(a)), ValueKind::Integer(b)) => Value::from_integer(a.saturating_add(*b)),
        (Some(ValueKind::Integer(a)), ValueKind::Double(b)) => Value::from_double(*a as f64 + b),
        (Some(ValueKind::Double(a)), ValueKind::Integer(b)) => Value::from_double(a + *b as f64),
        (Some(ValueKind::Double(a)), ValueKind::Double(b)) => Value::from_double(a + b),
        _ => operand.clone(),
    }
}

fn existing_array(current: Option<&Value>) -> Vec<Value> {
    match current.map(Value::kind) {
        Some(ValueKind::Array(values)) => values.clone(),
        _ => Vec::new(),
    }
}

/// Filters, orders, bounds and limits `documents` the way the backend
/// answers a structured query.
pub(crate) fn evaluate_query(documents: Vec<NativeSnapshot>, query: &QueryDefinition) -> Vec<NativeSnapshot> {
    let order_by = query.result_order_by();

    let mut results: Vec<NativeSnapshot> = documents
        .into_iter()
        .filter(NativeSnapshot::exists)
        .filter(|snapshot| query.filters().iter().all(|filter| matches_filter(snapshot, filter)))
        .filter(|snapshot| {
            order_by
                .iter()
                .all(|order| field_value(snapshot, order).is_some())
        })
        .collect();

    results.sort_by(|left, right| compare_snapshots(left, right, &order_by));

    if let Some(bound) = query.start_at() {
        results.retain(|snapshot| {
            let ordering = compare_to_bound(snapshot, bound, &order_by);
            ordering == Ordering::Greater || (ordering == Ordering::Equal && bound.inclusive())
        });
    }
    if let Some(bound) = query.end_at() {
        results.retain(|snapshot| {
            let ordering = compare_to_bound(snapshot, bound, &order_by);
            ordering == Ordering::Less || (ordering == Ordering::Equal && bound.inclusive())
        });
    }

    if let Some(limit) = query.limit() {
        let limit = limit as usize;
        if results.len() > limit {
            match query.limit_type() {
                LimitType::First => results.truncate(limit),
                LimitType::Last => {
                    results.drain(..results.len() - limit);
                }
            }
        }
    }
    results
}

fn field_value(snapshot: &NativeSnapshot, order: &OrderBy) -> Option<Value> {
    lookup(snapshot, order.field())
}

fn lookup(snapshot: &NativeSnapshot, field: &crate::model::FieldPath) -> Option<Value> {
    if field.is_document_id() {
        return Some(Value::from_reference(snapshot.key().clone()));
    }
    snapshot.data()?.get_path(field).cloned()
}

fn comparable(left: &Value, right: &Value) -> bool {
    match (left.kind(), right.kind()) {
        (
            ValueKind::Integer(_) | ValueKind::Double(_),
            ValueKind::Integer(_) | ValueKind::Double(_),
        ) => true,
        (a, b) => discriminant(a) == discriminant(b),
    }
}

fn matches_filter(snapshot: &NativeSnapshot, filter: &FieldFilter) -> bool {
    let Some(value) = lookup(snapshot, filter.field()) else {
        return false;
    };
    let operand = filter.value();
    let ordered = |accept: fn(Ordering) -> bool| comparable(&value, operand) && accept(value.compare(operand));
    match filter.operator() {
        FilterOperator::Equal => value.loosely_equals(operand),
        FilterOperator::NotEqual => !value.loosely_equals(operand),
        FilterOperator::LessThan => ordered(|o| o == Ordering::Less),
        FilterOperator::LessThanOrEqual => ordered(|o| o != Ordering::Greater),
        FilterOperator::GreaterThan => ordered(|o| o == Ordering::Greater),
        FilterOperator::GreaterThanOrEqual => ordered(|o| o != Ordering::Less),
        FilterOperator::ArrayContains => match value.kind() {
            ValueKind::Array(values) => values.iter().any(|item| item.loosely_equals(operand)),
            _ => false,
        },
        FilterOperator::ArrayContainsAny => match (value.kind(), operand.kind()) {
            (ValueKind::Array(values), ValueKind::Array(needles)) => values
                .iter()
                .any(|item| needles.iter().any(|needle| needle.loosely_equals(item))),
            _ => false,
        },
        FilterOperator::In => match operand.kind() {
            ValueKind::Array(needles) => needles.iter().any(|needle| needle.loosely_equals(&value)),
            _ => false,
        },
        FilterOperator::NotIn => match operand.kind() {
            ValueKind::Array(needles) => {
                !value.is_null() && !needles.iter().any(|needle| needle.loosely_equals(&value))
            }
            _ => false,
        },
    }
}

fn directed(ordering: Ordering, direction: OrderDirection) -> Ordering {
    match direction {
        OrderDirection::Ascending => ordering,
        OrderDirection::Descending => ordering.reverse(),
    }
}

fn compare_snapshots(left: &NativeSnapshot, right: &NativeSnapshot, order_by: &[OrderBy]) -> Ordering {
    for order in order_by {
        let left_value = field_value(left, order).unwrap_or_else(Value::null);
        let right_value = field_value(right, order).unwrap_or_else(Value::null);
        let ordering = directed(left_value.compare(&right_value), order.direction());
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Position of `snapshot` relative to a cursor, in result order.
fn compare_to_bound(snapshot: &NativeSnapshot, bound: &Bound, order_by: &[OrderBy]) -> Ordering {
    for (order, cursor) in order_by.iter().zip(bound.values()) {
        let value = field_value(snapshot, order).unwrap_or_else(Value::null);
        let ordering = directed(value.compare(cursor), order.direction());
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
