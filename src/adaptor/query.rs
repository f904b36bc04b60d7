use crate::error::{invalid_argument, DbResult};
use crate::model::{FieldPath, ResourcePath};
use crate::value::{Value, ValueKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOperator {
    LessThan,
    LessThanOrEqual,
    Equal,
    NotEqual,
    GreaterThanOrEqual,
    GreaterThan,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::LessThan => "LESS_THAN",
            FilterOperator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            FilterOperator::Equal => "EQUAL",
            FilterOperator::NotEqual => "NOT_EQUAL",
            FilterOperator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            FilterOperator::GreaterThan => "GREATER_THAN",
            FilterOperator::ArrayContains => "ARRAY_CONTAINS",
            FilterOperator::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOT_IN",
        }
    }

    pub fn is_inequality(&self) -> bool {
        matches!(
            self,
            FilterOperator::LessThan
                | FilterOperator::LessThanOrEqual
                | FilterOperator::GreaterThan
                | FilterOperator::GreaterThanOrEqual
                | FilterOperator::NotEqual
                | FilterOperator::NotIn
        )
    }

    fn takes_array(&self) -> bool {
        matches!(
            self,
            FilterOperator::ArrayContainsAny | FilterOperator::In | FilterOperator::NotIn
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    field: FieldPath,
    operator: FilterOperator,
    value: Value,
}

impl FieldFilter {
    pub fn new(field: FieldPath, operator: FilterOperator, value: Value) -> DbResult<Self> {
        if value.contains_sentinel() {
            return Err(invalid_argument(
                "Field value sentinels cannot be used in query filters",
            ));
        }
        if operator.takes_array() {
            match value.kind() {
                ValueKind::Array(values) if !values.is_empty() => {}
                _ => {
                    return Err(invalid_argument(format!(
                        "'{}' filters require a non-empty array",
                        operator.as_str()
                    )))
                }
            }
        }
        Ok(Self {
            field,
            operator,
            value,
        })
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

impl OrderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Ascending => "ASCENDING",
            OrderDirection::Descending => "DESCENDING",
        }
    }

    fn flipped(self) -> Self {
        match self {
            OrderDirection::Ascending => OrderDirection::Descending,
            OrderDirection::Descending => OrderDirection::Ascending,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    field: FieldPath,
    direction: OrderDirection,
}

impl OrderBy {
    pub fn new(field: FieldPath, direction: OrderDirection) -> Self {
        Self { field, direction }
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }
}

/// A cursor position. `inclusive` is true for `start_at`/`end_at`.
#[derive(Clone, Debug, PartialEq)]
pub struct Bound {
    values: Vec<Value>,
    inclusive: bool,
}

impl Bound {
    pub fn new(values: Vec<Value>, inclusive: bool) -> Self {
        Self { values, inclusive }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn inclusive(&self) -> bool {
        self.inclusive
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LimitType {
    #[default]
    First,
    Last,
}

/// Native description of a collection query.
#[derive(Clone, Debug)]
pub struct QueryDefinition {
    collection: ResourcePath,
    filters: Vec<FieldFilter>,
    order_by: Vec<OrderBy>,
    limit: Option<u32>,
    limit_type: LimitType,
    start_at: Option<Bound>,
    end_at: Option<Bound>,
}

impl QueryDefinition {
    pub fn new(collection: ResourcePath) -> DbResult<Self> {
        if !collection.is_collection() {
            return Err(invalid_argument(format!(
                "'{}' is not a collection path",
                collection.canonical_string()
            )));
        }
        Ok(Self {
            collection,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            limit_type: LimitType::First,
            start_at: None,
            end_at: None,
        })
    }

    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn with_limit(mut self, limit: u32, limit_type: LimitType) -> Self {
        self.limit = Some(limit);
        self.limit_type = limit_type;
        self
    }

    pub fn with_start_at(mut self, bound: Bound) -> Self {
        self.start_at = Some(bound);
        self
    }

    pub fn with_end_at(mut self, bound: Bound) -> Self {
        self.end_at = Some(bound);
        self
    }

    pub fn collection_path(&self) -> &ResourcePath {
        &self.collection
    }

    pub fn collection_id(&self) -> &str {
        self.collection.last_segment().unwrap_or_default()
    }

    /// Document path the collection hangs off; empty for root collections.
    pub fn parent_path(&self) -> ResourcePath {
        self.collection.parent().unwrap_or_else(ResourcePath::root)
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn explicit_order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn limit_type(&self) -> LimitType {
        self.limit_type
    }

    pub fn start_at(&self) -> Option<&Bound> {
        self.start_at.as_ref()
    }

    pub fn end_at(&self) -> Option<&Bound> {
        self.end_at.as_ref()
    }

    /// Ordering of the results: explicit orders, then the first inequality
    /// field when nothing is ordered, then the document name.
    pub fn result_order_by(&self) -> Vec<OrderBy> {
        let mut order = self.order_by.clone();
        if order.is_empty() {
            if let Some(filter) = self.filters.iter().find(|f| f.operator().is_inequality()) {
                order.push(OrderBy::new(filter.field().clone(), OrderDirection::Ascending));
            }
        }
        if !order.iter().any(|o| o.field().is_document_id()) {
            let direction = order
                .last()
                .map(OrderBy::direction)
                .unwrap_or(OrderDirection::Ascending);
            order.push(OrderBy::new(FieldPath::document_id(), direction));
        }
        order
    }

    /// Ordering sent to the backend. `limit_to_last` runs the query in
    /// reverse and the results are flipped back afterwards.
    pub fn request_order_by(&self) -> Vec<OrderBy> {
        let order = self.result_order_by();
        match self.limit_type {
            LimitType::First => order,
            LimitType::Last => order
                .into_iter()
                .map(|o| OrderBy::new(o.field, o.direction.flipped()))
                .collect(),
        }
    }

    pub fn request_start_at(&self) -> Option<&Bound> {
        match self.limit_type {
            LimitType::First => self.start_at.as_ref(),
            LimitType::Last => self.end_at.as_ref(),
        }
    }

    pub fn request_end_at(&self) -> Option<&Bound> {
        match self.limit_type {
            LimitType::First => self.end_at.as_ref(),
            LimitType::Last => self.start_at.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> QueryDefinition {
        QueryDefinition::new(ResourcePath::parse("users").unwrap()).unwrap()
    }

    #[test]
    fn appends_document_name_ordering() {
        let order = definition().result_order_by();
        assert_eq!(order.len(), 1);
        assert!(order[0].field().is_document_id());
    }

    #[test]
    fn inequality_field_orders_first() {
        let query = definition().with_filter(
            FieldFilter::new(
                FieldPath::from_dot_separated("age").unwrap(),
                FilterOperator::GreaterThan,
                Value::from_integer(18),
            )
            .unwrap(),
        );
        let order = query.result_order_by();
        assert_eq!(order[0].field().canonical_string(), "age");
        assert!(order[1].field().is_document_id());
    }

    #[test]
    fn limit_to_last_flips_request_order_and_cursors() {
        let query = definition()
            .with_order_by(OrderBy::new(
                FieldPath::from_dot_separated("age").unwrap(),
                OrderDirection::Ascending,
            ))
            .with_limit(2, LimitType::Last)
            .with_start_at(Bound::new(vec![Value::from_integer(1)], true));
        let order = query.request_order_by();
        assert!(order
            .iter()
            .all(|o| o.direction() == OrderDirection::Descending));
        assert!(query.request_start_at().is_none());
        assert!(query.request_end_at().is_some());
    }

    #[test]
    fn in_filters_need_values() {
        let err = FieldFilter::new(
            FieldPath::from_dot_separated("tag").unwrap(),
            FilterOperator::In,
            Value::from_array(Vec::new()),
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn rejects_document_paths() {
        assert!(QueryDefinition::new(ResourcePath::parse("users/sasha").unwrap()).is_err());
    }
}
