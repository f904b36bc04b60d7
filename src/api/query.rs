use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::adaptor::adaptor;
use crate::adaptor::query::{Bound, FieldFilter, LimitType, OrderBy, QueryDefinition};
use crate::api::doc::Doc;
use crate::api::reference::Collection;
use crate::error::{invalid_argument, DbResult};
use crate::model::{DocumentKey, FieldPath, IntoFieldPath, ResourcePath};
use crate::value::{to_native_value, Value, ValueKind};

pub use crate::adaptor::query::{FilterOperator, OrderDirection};

/// Field path addressing the document id. Filter and cursor values on it may
/// be plain ids; they are turned into references to the queried collection.
pub fn doc_id() -> FieldPath {
    FieldPath::document_id()
}

#[derive(Clone, Debug)]
struct Cursor {
    values: Vec<Value>,
    inclusive: bool,
}

/// Typed query constraints, run with [`query`].
///
/// ```
/// use typed_firestore::{FilterOperator, OrderDirection, Query};
///
/// let adults = Query::new()
///     .where_("age", FilterOperator::GreaterThanOrEqual, 18)?
///     .order_by("age", OrderDirection::Descending)?
///     .limit(10);
/// # Ok::<(), typed_firestore::DbError>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct Query {
    filters: Vec<(FieldPath, FilterOperator, Value)>,
    order_by: Vec<OrderBy>,
    limit: Option<(u32, LimitType)>,
    start: Option<Cursor>,
    end: Option<Cursor>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_<V: Serialize>(
        mut self,
        field: impl IntoFieldPath,
        operator: FilterOperator,
        value: V,
    ) -> DbResult<Self> {
        let field = field.into_field_path()?;
        self.filters.push((field, operator, to_native_value(&value)?));
        Ok(self)
    }

    pub fn order_by(mut self, field: impl IntoFieldPath, direction: OrderDirection) -> DbResult<Self> {
        self.order_by.push(OrderBy::new(field.into_field_path()?, direction));
        Ok(self)
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some((limit, LimitType::First));
        self
    }

    /// Keeps the last `limit` results. Requires an explicit `order_by`.
    pub fn limit_to_last(mut self, limit: u32) -> Self {
        self.limit = Some((limit, LimitType::Last));
        self
    }

    /// Starts at the given position in the order. A tuple positions on
    /// several order fields at once.
    pub fn start_at<V: Serialize>(mut self, position: V) -> DbResult<Self> {
        self.start = Some(cursor(&position, true)?);
        Ok(self)
    }

    pub fn start_after<V: Serialize>(mut self, position: V) -> DbResult<Self> {
        self.start = Some(cursor(&position, false)?);
        Ok(self)
    }

    pub fn end_at<V: Serialize>(mut self, position: V) -> DbResult<Self> {
        self.end = Some(cursor(&position, true)?);
        Ok(self)
    }

    pub fn end_before<V: Serialize>(mut self, position: V) -> DbResult<Self> {
        self.end = Some(cursor(&position, false)?);
        Ok(self)
    }

    /// Resolves the constraints against `collection` into a native query.
    pub(crate) fn into_definition(self, collection: &ResourcePath) -> DbResult<QueryDefinition> {
        let mut definition = QueryDefinition::new(collection.clone())?;
        for (field, operator, value) in self.filters {
            let value = if field.is_document_id() {
                id_values_to_references(collection, value)?
            } else {
                value
            };
            definition = definition.with_filter(FieldFilter::new(field, operator, value)?);
        }
        for order in self.order_by {
            definition = definition.with_order_by(order);
        }
        if let Some((limit, limit_type)) = self.limit {
            if limit_type == LimitType::Last && definition.explicit_order_by().is_empty() {
                return Err(invalid_argument(
                    "limit_to_last() queries require at least one order_by() clause",
                ));
            }
            definition = definition.with_limit(limit, limit_type);
        }

        let order = definition.result_order_by();
        if let Some(start) = self.start {
            definition = definition.with_start_at(bound(collection, &order, start)?);
        }
        if let Some(end) = self.end {
            definition = definition.with_end_at(bound(collection, &order, end)?);
        }
        Ok(definition)
    }
}

fn cursor<V: Serialize>(position: &V, inclusive: bool) -> DbResult<Cursor> {
    let values = match to_native_value(position)?.into_kind() {
        ValueKind::Array(values) => values,
        kind => vec![Value::from(kind)],
    };
    if values.is_empty() {
        return Err(invalid_argument("A query cursor needs at least one value"));
    }
    Ok(Cursor { values, inclusive })
}

fn bound(collection: &ResourcePath, order: &[OrderBy], cursor: Cursor) -> DbResult<Bound> {
    if cursor.values.len() > order.len() {
        return Err(invalid_argument(
            "Too many cursor values: a cursor can only position on the ordered fields",
        ));
    }
    let values = cursor
        .values
        .into_iter()
        .zip(order)
        .map(|(value, order)| {
            if order.field().is_document_id() {
                id_to_reference(collection, value)
            } else {
                Ok(value)
            }
        })
        .collect::<DbResult<Vec<_>>>()?;
    Ok(Bound::new(values, cursor.inclusive))
}

fn id_values_to_references(collection: &ResourcePath, value: Value) -> DbResult<Value> {
    match value.into_kind() {
        ValueKind::Array(values) => Ok(Value::from_array(
            values
                .into_iter()
                .map(|value| id_to_reference(collection, value))
                .collect::<DbResult<Vec<_>>>()?,
        )),
        kind => id_to_reference(collection, Value::from(kind)),
    }
}

fn id_to_reference(collection: &ResourcePath, value: Value) -> DbResult<Value> {
    match value.into_kind() {
        ValueKind::String(id) => {
            if id.contains('/') {
                return Err(invalid_argument(format!(
                    "Document id filters take a plain id, got '{id}'"
                )));
            }
            Ok(Value::from_reference(DocumentKey::from_path(collection.child(id))?))
        }
        kind @ ValueKind::Reference(_) => Ok(Value::from(kind)),
        _ => Err(invalid_argument(
            "Document id filters and cursors take document ids or references",
        )),
    }
}

/// Runs `constraints` against `collection`.
pub async fn query<T: DeserializeOwned>(collection: &Collection<T>, constraints: Query) -> DbResult<Vec<Doc<T>>> {
    let definition = constraints.into_definition(collection.path())?;
    let adaptor = adaptor().await?;
    let snapshots = adaptor.datastore().run_query(&definition).await?;
    let mut docs = Vec::with_capacity(snapshots.len());
    for snapshot in snapshots {
        if let Some(doc) = Doc::from_snapshot(&adaptor, snapshot)? {
            docs.push(doc);
        }
    }
    Ok(docs)
}

/// Every document of `collection`, in document id order.
pub async fn all<T: DeserializeOwned>(collection: &Collection<T>) -> DbResult<Vec<Doc<T>>> {
    query(collection, Query::new()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbErrorCode;

    fn users() -> ResourcePath {
        ResourcePath::parse("users").unwrap()
    }

    #[test]
    fn document_id_filters_become_references() {
        let definition = Query::new()
            .where_(doc_id(), FilterOperator::In, ["a", "b"])
            .unwrap()
            .into_definition(&users())
            .unwrap();
        let filter = &definition.filters()[0];
        assert_eq!(
            filter.value(),
            &Value::from_array(vec![
                Value::from_reference(DocumentKey::parse("users/a").unwrap()),
                Value::from_reference(DocumentKey::parse("users/b").unwrap()),
            ])
        );
    }

    #[test]
    fn cursors_follow_the_result_order() {
        let definition = Query::new()
            .order_by("age", OrderDirection::Ascending)
            .unwrap()
            .start_after((30, "sasha"))
            .unwrap()
            .into_definition(&users())
            .unwrap();
        let start = definition.start_at().unwrap();
        assert!(!start.inclusive());
        assert_eq!(
            start.values(),
            &[
                Value::from_integer(30),
                Value::from_reference(DocumentKey::parse("users/sasha").unwrap()),
            ]
        );
    }

    #[test]
    fn limit_to_last_needs_an_order() {
        let err = Query::new()
            .limit_to_last(2)
            .into_definition(&users())
            .unwrap_err();
        assert_eq!(err.code, DbErrorCode::InvalidArgument);
    }

    #[test]
    fn cursors_cannot_exceed_the_order() {
        let err = Query::new()
            .start_at((1, 2, 3))
            .unwrap()
            .into_definition(&users())
            .unwrap_err();
        assert_eq!(err.code, DbErrorCode::InvalidArgument);
    }
}
