//! Turns native field maps into commit writes, pulling value sentinels out
//! into field transforms.

use std::collections::BTreeMap;

use crate::adaptor::datastore::WriteOperation;
use crate::error::{invalid_argument, DbResult};
use crate::model::{DocumentKey, FieldPath};
use crate::value::{MapValue, Sentinel, Value, ValueKind};

/// Describes a single field transform applied during a write.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldTransform {
    field_path: FieldPath,
    operation: TransformOperation,
}

impl FieldTransform {
    pub fn new(field_path: FieldPath, operation: TransformOperation) -> Self {
        Self {
            field_path,
            operation,
        }
    }

    pub fn field_path(&self) -> &FieldPath {
        &self.field_path
    }

    pub fn operation(&self) -> &TransformOperation {
        &self.operation
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransformOperation {
    ServerTimestamp,
    Increment(Value),
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Set,
    Merge,
    Update,
}

impl Mode {
    fn allows_delete(self) -> bool {
        !matches!(self, Mode::Set)
    }
}

struct Sanitized {
    transforms: Vec<FieldTransform>,
    deletes: Vec<FieldPath>,
}

/// Full overwrite of `key` with `data`.
pub fn set_operation(key: DocumentKey, data: MapValue) -> DbResult<WriteOperation> {
    let mut acc = Sanitized::new();
    let data = sanitize_map(data, &[], Mode::Set, &mut acc)?;
    Ok(WriteOperation::Set {
        key,
        data: MapValue::new(data),
        mask: None,
        transforms: acc.transforms,
    })
}

/// Merge of every field present in `data` into `key`, creating the document
/// when it does not exist.
pub fn merge_operation(key: DocumentKey, data: MapValue) -> DbResult<WriteOperation> {
    let mut acc = Sanitized::new();
    let data = sanitize_map(data, &[], Mode::Merge, &mut acc)?;
    let mut mask = Vec::new();
    collect_leaf_paths(&data, &mut Vec::new(), &mut mask)?;
    mask.extend(acc.deletes);
    Ok(WriteOperation::Set {
        key,
        data: MapValue::new(data),
        mask: Some(mask),
        transforms: acc.transforms,
    })
}

/// Partial update of an existing document. Each entry replaces the value at
/// its path; `Sentinel::Delete` removes it.
pub fn update_operation(
    key: DocumentKey,
    fields: Vec<(FieldPath, Value)>,
) -> DbResult<WriteOperation> {
    if fields.is_empty() {
        return Err(invalid_argument(
            "update requires at least one field/value pair",
        ));
    }
    ensure_disjoint(fields.iter().map(|(path, _)| path))?;

    let mut data = MapValue::default();
    let mut field_paths = Vec::new();
    let mut acc = Sanitized::new();
    for (path, value) in fields {
        match value.into_kind() {
            ValueKind::Sentinel(Sentinel::Delete) => field_paths.push(path),
            ValueKind::Sentinel(sentinel) => {
                acc.transforms.push(transform_from_sentinel(path, sentinel)?);
            }
            ValueKind::Map(map) => {
                let cleaned = sanitize_map(map, path.segments(), Mode::Update, &mut acc)?;
                data.set_path(&path, Value::from_map(cleaned));
                field_paths.push(path);
            }
            other => {
                let value = Value::from(other);
                assert_no_sentinel(&value, &path)?;
                data.set_path(&path, value);
                field_paths.push(path);
            }
        }
    }

    Ok(WriteOperation::Update {
        key,
        data,
        field_paths,
        transforms: acc.transforms,
    })
}

impl Sanitized {
    fn new() -> Self {
        Self {
            transforms: Vec::new(),
            deletes: Vec::new(),
        }
    }
}

fn sanitize_map(
    data: MapValue,
    parent: &[String],
    mode: Mode,
    acc: &mut Sanitized,
) -> DbResult<BTreeMap<String, Value>> {
    let mut cleaned = BTreeMap::new();
    for (key, value) in data.into_fields() {
        let mut segments = parent.to_vec();
        segments.push(key.clone());
        let field_path = FieldPath::new(segments.clone())?;
        match value.into_kind() {
            ValueKind::Sentinel(Sentinel::Delete) => {
                if mode != Mode::Merge {
                    let reason = if mode.allows_delete() {
                        "can only appear at the top level of update data"
                    } else {
                        "is only allowed in updates and merges"
                    };
                    return Err(invalid_argument(format!(
                        "Field delete at '{}' {reason}",
                        field_path.canonical_string()
                    )));
                }
                acc.deletes.push(field_path);
            }
            ValueKind::Sentinel(sentinel) => {
                acc.transforms
                    .push(transform_from_sentinel(field_path, sentinel)?);
            }
            ValueKind::Map(map) => {
                let was_empty = map.is_empty();
                let nested = sanitize_map(map, &segments, mode, acc)?;
                if was_empty || !nested.is_empty() {
                    cleaned.insert(key, Value::from_map(nested));
                }
            }
            other => {
                let value = Value::from(other);
                assert_no_sentinel(&value, &field_path)?;
                cleaned.insert(key, value);
            }
        }
    }
    Ok(cleaned)
}

fn transform_from_sentinel(field_path: FieldPath, sentinel: Sentinel) -> DbResult<FieldTransform> {
    let operation = match sentinel {
        Sentinel::ServerTimestamp => TransformOperation::ServerTimestamp,
        Sentinel::Increment(operand) => match operand.kind() {
            ValueKind::Integer(_) | ValueKind::Double(_) => TransformOperation::Increment(*operand),
            _ => {
                return Err(invalid_argument(format!(
                    "Increment at '{}' requires a numeric operand",
                    field_path.canonical_string()
                )))
            }
        },
        Sentinel::ArrayUnion(elements) => {
            for element in &elements {
                assert_no_sentinel(element, &field_path)?;
            }
            TransformOperation::ArrayUnion(elements)
        }
        Sentinel::ArrayRemove(elements) => {
            for element in &elements {
                assert_no_sentinel(element, &field_path)?;
            }
            TransformOperation::ArrayRemove(elements)
        }
        Sentinel::Delete => {
            return Err(invalid_argument(format!(
                "Field delete at '{}' cannot be used as a transform",
                field_path.canonical_string()
            )))
        }
    };
    Ok(FieldTransform::new(field_path, operation))
}

fn assert_no_sentinel(value: &Value, context: &FieldPath) -> DbResult<()> {
    if value.contains_sentinel() {
        return Err(invalid_argument(format!(
            "Field value sentinels cannot be used inside arrays (field '{}')",
            context.canonical_string()
        )));
    }
    Ok(())
}

fn collect_leaf_paths(
    data: &BTreeMap<String, Value>,
    prefix: &mut Vec<String>,
    out: &mut Vec<FieldPath>,
) -> DbResult<()> {
    for (key, value) in data {
        prefix.push(key.clone());
        match value.kind() {
            ValueKind::Map(map) if !map.is_empty() => {
                collect_leaf_paths(map.fields(), prefix, out)?;
            }
            _ => out.push(FieldPath::new(prefix.clone())?),
        }
        prefix.pop();
    }
    Ok(())
}

fn ensure_disjoint<'a>(paths: impl Iterator<Item = &'a FieldPath>) -> DbResult<()> {
    let mut sorted: Vec<&FieldPath> = paths.collect();
    sorted.sort();
    for pair in sorted.windows(2) {
        if pair[0].is_prefix_of(pair[1]) {
            return Err(invalid_argument(format!(
                "Field '{}' is updated together with its parent '{}'",
                pair[1].canonical_string(),
                pair[0].canonical_string()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DocumentKey {
        DocumentKey::parse("posts/p1").unwrap()
    }

    fn path(text: &str) -> FieldPath {
        FieldPath::from_dot_separated(text).unwrap()
    }

    fn map(entries: Vec<(&str, Value)>) -> MapValue {
        MapValue::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    #[test]
    fn set_moves_sentinels_into_transforms() {
        let write = set_operation(
            key(),
            map(vec![
                ("text", Value::from_string("hi")),
                ("date", Value::server_timestamp()),
            ]),
        )
        .unwrap();
        let WriteOperation::Set {
            data,
            mask,
            transforms,
            ..
        } = write
        else {
            panic!("expected set");
        };
        assert!(mask.is_none());
        assert!(data.get("date").is_none());
        assert_eq!(
            transforms,
            vec![FieldTransform::new(
                path("date"),
                TransformOperation::ServerTimestamp
            )]
        );
    }

    #[test]
    fn set_rejects_field_deletes() {
        let err = set_operation(key(), map(vec![("gone", Value::delete_field())])).unwrap_err();
        assert!(err.message().contains("updates and merges"));
    }

    #[test]
    fn merge_masks_leaves_and_deletes() {
        let write = merge_operation(
            key(),
            map(vec![
                (
                    "stats",
                    Value::from_map(map(vec![("views", Value::from_integer(3))])),
                ),
                ("draft", Value::delete_field()),
                ("likes", Value::increment(Value::from_integer(1))),
            ]),
        )
        .unwrap();
        let WriteOperation::Set {
            mask, transforms, ..
        } = write
        else {
            panic!("expected set");
        };
        assert_eq!(mask.unwrap(), vec![path("stats.views"), path("draft")]);
        assert_eq!(transforms.len(), 1);
    }

    #[test]
    fn update_replaces_whole_entries() {
        let write = update_operation(
            key(),
            vec![
                (
                    path("address"),
                    Value::from_map(map(vec![("city", Value::from_string("Oslo"))])),
                ),
                (path("nickname"), Value::delete_field()),
            ],
        )
        .unwrap();
        let WriteOperation::Update {
            data, field_paths, ..
        } = write
        else {
            panic!("expected update");
        };
        assert_eq!(field_paths, vec![path("address"), path("nickname")]);
        assert_eq!(
            data.get_path(&path("address.city")),
            Some(&Value::from_string("Oslo"))
        );
    }

    #[test]
    fn update_rejects_overlapping_paths() {
        let err = update_operation(
            key(),
            vec![
                (path("a"), Value::from_integer(1)),
                (path("a.b"), Value::from_integer(2)),
            ],
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn update_requires_fields() {
        assert!(update_operation(key(), Vec::new()).is_err());
    }

    #[test]
    fn increment_requires_numeric_operand() {
        let err = update_operation(
            key(),
            vec![(path("total"), Value::increment(Value::from_string("five")))],
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }
}
