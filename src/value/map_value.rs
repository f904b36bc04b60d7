use std::collections::BTreeMap;

use crate::model::FieldPath;
use crate::value::{Value, ValueKind};

/// Ordered field map: the body of a document or of a nested map value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapValue {
    fields: BTreeMap<String, Value>,
}

impl MapValue {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Looks up a nested field.
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        let mut current = self.fields.get(first)?;
        for segment in rest {
            current = match current.kind() {
                ValueKind::Map(child) => child.fields.get(segment)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Writes `value` at `path`, replacing non-map intermediates with maps.
    pub fn set_path(&mut self, path: &FieldPath, value: Value) {
        set_segments(&mut self.fields, path.segments(), value);
    }

    /// Removes the field at `path`. Missing intermediates are ignored.
    pub fn remove_path(&mut self, path: &FieldPath) {
        remove_segments(&mut self.fields, path.segments());
    }
}

impl From<BTreeMap<String, Value>> for MapValue {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self::new(fields)
    }
}

fn set_segments(fields: &mut BTreeMap<String, Value>, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        fields.insert(first.clone(), value);
        return;
    }

    let mut child = match fields.remove(first).map(Value::into_kind) {
        Some(ValueKind::Map(map)) => map.into_fields(),
        _ => BTreeMap::new(),
    };
    set_segments(&mut child, rest, value);
    fields.insert(first.clone(), Value::from_map(child));
}

fn remove_segments(fields: &mut BTreeMap<String, Value>, segments: &[String]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        fields.remove(first);
        return;
    }
    if let Some(ValueKind::Map(_)) = fields.get(first).map(Value::kind) {
        if let Some(ValueKind::Map(map)) = fields.remove(first).map(Value::into_kind) {
            let mut child = map.into_fields();
            remove_segments(&mut child, rest);
            fields.insert(first.clone(), Value::from_map(child));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_path_creates_intermediate_maps() {
        let mut map = MapValue::default();
        let path = FieldPath::from_dot_separated("address.city").unwrap();
        map.set_path(&path, Value::from_string("Berlin"));
        assert_eq!(map.get_path(&path), Some(&Value::from_string("Berlin")));
        assert!(map.get("address").unwrap().as_map().is_some());
    }

    #[test]
    fn remove_path_keeps_siblings() {
        let mut map = MapValue::default();
        map.set_path(&FieldPath::from_dot_separated("a.b").unwrap(), Value::from_integer(1));
        map.set_path(&FieldPath::from_dot_separated("a.c").unwrap(), Value::from_integer(2));
        map.remove_path(&FieldPath::from_dot_separated("a.b").unwrap());
        assert!(map.get_path(&FieldPath::from_dot_separated("a.b").unwrap()).is_none());
        assert_eq!(
            map.get_path(&FieldPath::from_dot_separated("a.c").unwrap()),
            Some(&Value::from_integer(2))
        );
    }
}
