use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::value::special::SENTINEL_MARKER;

/// A field that holds either a plain value or a write-time sentinel.
///
/// Reads always produce [`FieldValue::Value`]: the backend resolves sentinels
/// when it applies the write, so a server date comes back as the timestamp it
/// was resolved to.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use typed_firestore::{FieldValue, Timestamp};
///
/// #[derive(Serialize, Deserialize)]
/// struct Post {
///     text: String,
///     date: FieldValue<Timestamp>,
///     likes: FieldValue<i64>,
/// }
///
/// let post = Post {
///     text: "Hello!".into(),
///     date: FieldValue::ServerDate,
///     likes: FieldValue::Increment(1),
/// };
/// # let _ = post;
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue<T> {
    Value(T),
    /// The commit time of the write, assigned by the server.
    ServerDate,
    /// Adds the operand to the current numeric value (missing counts as 0).
    Increment(T),
    /// Appends the elements of the operand array that are not present yet.
    ArrayUnion(T),
    /// Removes every occurrence of the operand array's elements.
    ArrayRemove(T),
    /// Deletes the field. Only valid in updates and merges.
    Delete,
}

impl<T> FieldValue<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            FieldValue::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            FieldValue::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        !matches!(self, FieldValue::Value(_))
    }
}

impl<T> From<T> for FieldValue<T> {
    fn from(value: T) -> Self {
        FieldValue::Value(value)
    }
}

/// Shorthand for [`FieldValue::ServerDate`].
pub fn server_date<T>() -> FieldValue<T> {
    FieldValue::ServerDate
}

impl<T: Serialize> Serialize for FieldValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (op, operand) = match self {
            FieldValue::Value(value) => return value.serialize(serializer),
            FieldValue::ServerDate => ("serverDate", None),
            FieldValue::Increment(operand) => ("increment", Some(operand)),
            FieldValue::ArrayUnion(operand) => ("arrayUnion", Some(operand)),
            FieldValue::ArrayRemove(operand) => ("arrayRemove", Some(operand)),
            FieldValue::Delete => ("delete", None),
        };
        serializer.serialize_newtype_struct(SENTINEL_MARKER, &(op, operand))
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FieldValue<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(FieldValue::Value)
    }
}
