use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::model::{DocumentKey, GeoPoint, Timestamp};
use crate::value::{Bytes, MapValue};

/// A native field value as stored by the database.
#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    kind: ValueKind,
}

/// Write-time sentinels. They never appear in read results.
#[derive(Clone, Debug, PartialEq)]
pub enum Sentinel {
    ServerTimestamp,
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
    Increment(Box<Value>),
    Delete,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Timestamp(Timestamp),
    String(String),
    Bytes(Bytes),
    Reference(DocumentKey),
    GeoPoint(GeoPoint),
    Array(Vec<Value>),
    Map(MapValue),
    Sentinel(Sentinel),
}

impl Value {
    pub fn null() -> Self {
        ValueKind::Null.into()
    }

    pub fn from_bool(value: bool) -> Self {
        ValueKind::Boolean(value).into()
    }

    pub fn from_integer(value: i64) -> Self {
        ValueKind::Integer(value).into()
    }

    pub fn from_double(value: f64) -> Self {
        ValueKind::Double(value).into()
    }

    pub fn from_timestamp(value: Timestamp) -> Self {
        ValueKind::Timestamp(value).into()
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        ValueKind::String(value.into()).into()
    }

    pub fn from_bytes(value: impl Into<Bytes>) -> Self {
        ValueKind::Bytes(value.into()).into()
    }

    pub fn from_reference(key: DocumentKey) -> Self {
        ValueKind::Reference(key).into()
    }

    pub fn from_geo_point(value: GeoPoint) -> Self {
        ValueKind::GeoPoint(value).into()
    }

    pub fn from_array(values: Vec<Value>) -> Self {
        ValueKind::Array(values).into()
    }

    pub fn from_map(map: impl Into<MapValue>) -> Self {
        ValueKind::Map(map.into()).into()
    }

    pub fn server_timestamp() -> Self {
        ValueKind::Sentinel(Sentinel::ServerTimestamp).into()
    }

    pub fn array_union(elements: Vec<Value>) -> Self {
        ValueKind::Sentinel(Sentinel::ArrayUnion(elements)).into()
    }

    pub fn array_remove(elements: Vec<Value>) -> Self {
        ValueKind::Sentinel(Sentinel::ArrayRemove(elements)).into()
    }

    pub fn increment(operand: Value) -> Self {
        ValueKind::Sentinel(Sentinel::Increment(Box::new(operand))).into()
    }

    pub fn delete_field() -> Self {
        ValueKind::Sentinel(Sentinel::Delete).into()
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn into_kind(self) -> ValueKind {
        self.kind
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ValueKind::Null)
    }

    pub fn as_map(&self) -> Option<&MapValue> {
        match &self.kind {
            ValueKind::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn contains_sentinel(&self) -> bool {
        match &self.kind {
            ValueKind::Sentinel(_) => true,
            ValueKind::Array(values) => values.iter().any(Value::contains_sentinel),
            ValueKind::Map(map) => map.fields().values().any(Value::contains_sentinel),
            _ => false,
        }
    }

    /// Total order across types, matching the backend's index ordering:
    /// null, booleans, numbers, timestamps, strings, bytes, references,
    /// geo points, arrays, maps.
    pub fn compare(&self, other: &Value) -> Ordering {
        let rank = type_rank(&self.kind).cmp(&type_rank(&other.kind));
        if rank != Ordering::Equal {
            return rank;
        }
        match (&self.kind, &other.kind) {
            (ValueKind::Boolean(a), ValueKind::Boolean(b)) => a.cmp(b),
            (ValueKind::Integer(a), ValueKind::Integer(b)) => a.cmp(b),
            (ValueKind::Double(a), ValueKind::Double(b)) => compare_doubles(*a, *b),
            (ValueKind::Integer(a), ValueKind::Double(b)) => compare_doubles(*a as f64, *b),
            (ValueKind::Double(a), ValueKind::Integer(b)) => compare_doubles(*a, *b as f64),
            (ValueKind::Timestamp(a), ValueKind::Timestamp(b)) => a.cmp(b),
            (ValueKind::String(a), ValueKind::String(b)) => a.cmp(b),
            (ValueKind::Bytes(a), ValueKind::Bytes(b)) => a.as_slice().cmp(b.as_slice()),
            (ValueKind::Reference(a), ValueKind::Reference(b)) => a.cmp(b),
            (ValueKind::GeoPoint(a), ValueKind::GeoPoint(b)) => {
                compare_doubles(a.latitude(), b.latitude())
                    .then(compare_doubles(a.longitude(), b.longitude()))
            }
            (ValueKind::Array(a), ValueKind::Array(b)) => {
                for (left, right) in a.iter().zip(b.iter()) {
                    let ordering = left.compare(right);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                a.len().cmp(&b.len())
            }
            (ValueKind::Map(a), ValueKind::Map(b)) => {
                for ((lk, lv), (rk, rv)) in a.fields().iter().zip(b.fields().iter()) {
                    let ordering = lk.cmp(rk).then_with(|| lv.compare(rv));
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                a.fields().len().cmp(&b.fields().len())
            }
            _ => Ordering::Equal,
        }
    }

    /// Equality used by queries and array transforms: numbers compare by
    /// value across integer/double.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (&self.kind, &other.kind) {
            (ValueKind::Double(a), ValueKind::Double(b)) if a.is_nan() && b.is_nan() => true,
            _ => {
                type_rank(&self.kind) == type_rank(&other.kind)
                    && self.compare(other) == Ordering::Equal
            }
        }
    }
}

impl From<ValueKind> for Value {
    fn from(kind: ValueKind) -> Self {
        Self { kind }
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Value::from_map(fields)
    }
}

fn type_rank(kind: &ValueKind) -> u8 {
    match kind {
        ValueKind::Null => 0,
        ValueKind::Boolean(_) => 1,
        ValueKind::Integer(_) | ValueKind::Double(_) => 2,
        ValueKind::Timestamp(_) => 3,
        ValueKind::String(_) => 4,
        ValueKind::Bytes(_) => 5,
        ValueKind::Reference(_) => 6,
        ValueKind::GeoPoint(_) => 7,
        ValueKind::Array(_) => 8,
        ValueKind::Map(_) => 9,
        ValueKind::Sentinel(_) => 10,
    }
}

// NaN sorts before every other number.
fn compare_doubles(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}
