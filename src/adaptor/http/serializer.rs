use std::collections::BTreeMap;
use std::str::FromStr;

use serde_json::{json, Map, Value as JsonValue};

use crate::adaptor::datastore::WriteOperation;
use crate::adaptor::query::{Bound, FieldFilter, FilterOperator, QueryDefinition};
use crate::adaptor::write::{FieldTransform, TransformOperation};
use crate::error::{internal_error, invalid_argument, DbResult};
use crate::model::{DatabaseId, DocumentKey, FieldPath, GeoPoint, Timestamp};
use crate::value::{Bytes, MapValue, Value, ValueKind};

/// Encodes native values and writes as Firestore REST JSON.
#[derive(Clone, Debug)]
pub struct JsonProtoSerializer {
    database_id: DatabaseId,
}

impl JsonProtoSerializer {
    pub fn new(database_id: DatabaseId) -> Self {
        Self { database_id }
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    pub fn document_name(&self, key: &DocumentKey) -> String {
        self.database_id.document_name(key.path())
    }

    /// Parses a document name returned by the backend for this database.
    pub fn parse_document_name(&self, name: &str) -> DbResult<DocumentKey> {
        let prefix = format!("{}/documents/", self.database_id.database_name());
        if !name.starts_with(&prefix) {
            return Err(internal_error(format!(
                "Unexpected document name '{name}' returned by Firestore"
            )));
        }
        DatabaseId::parse_document_name(name)
    }

    pub fn encode_write(&self, write: &WriteOperation) -> DbResult<JsonValue> {
        let encoded = match write {
            WriteOperation::Set {
                key,
                data,
                mask,
                transforms,
            } => {
                let mut object = self.update_write(key, data, transforms)?;
                if let Some(mask) = mask {
                    object.insert("updateMask".to_string(), encode_mask(mask));
                }
                JsonValue::Object(object)
            }
            WriteOperation::Update {
                key,
                data,
                field_paths,
                transforms,
            } => {
                let mut object = self.update_write(key, data, transforms)?;
                object.insert("updateMask".to_string(), encode_mask(field_paths));
                object.insert("currentDocument".to_string(), json!({ "exists": true }));
                JsonValue::Object(object)
            }
            WriteOperation::Delete { key } => json!({ "delete": self.document_name(key) }),
        };
        Ok(encoded)
    }

    fn update_write(
        &self,
        key: &DocumentKey,
        data: &MapValue,
        transforms: &[FieldTransform],
    ) -> DbResult<Map<String, JsonValue>> {
        let mut write = Map::new();
        write.insert(
            "update".to_string(),
            json!({
                "name": self.document_name(key),
                "fields": self.encode_map_fields(data)?,
            }),
        );
        if !transforms.is_empty() {
            let encoded = transforms
                .iter()
                .map(|transform| self.encode_transform(transform))
                .collect::<DbResult<Vec<_>>>()?;
            write.insert("updateTransforms".to_string(), JsonValue::Array(encoded));
        }
        Ok(write)
    }

    fn encode_transform(&self, transform: &FieldTransform) -> DbResult<JsonValue> {
        let field_path = transform.field_path().canonical_string();
        let encoded = match transform.operation() {
            TransformOperation::ServerTimestamp => json!({
                "fieldPath": field_path,
                "setToServerValue": "REQUEST_TIME"
            }),
            TransformOperation::Increment(operand) => json!({
                "fieldPath": field_path,
                "increment": self.encode_value(operand)?
            }),
            TransformOperation::ArrayUnion(elements) => json!({
                "fieldPath": field_path,
                "appendMissingElements": { "values": self.encode_values(elements)? }
            }),
            TransformOperation::ArrayRemove(elements) => json!({
                "fieldPath": field_path,
                "removeAllFromArray": { "values": self.encode_values(elements)? }
            }),
        };
        Ok(encoded)
    }

    pub fn encode_structured_query(&self, definition: &QueryDefinition) -> DbResult<JsonValue> {
        let mut structured = Map::new();
        structured.insert(
            "from".to_string(),
            json!([{ "collectionId": definition.collection_id(), "allDescendants": false }]),
        );

        let filters = definition
            .filters()
            .iter()
            .map(|filter| self.encode_filter(filter))
            .collect::<DbResult<Vec<_>>>()?;
        match filters.len() {
            0 => {}
            1 => {
                structured.insert("where".to_string(), filters.into_iter().next().unwrap_or_default());
            }
            _ => {
                structured.insert(
                    "where".to_string(),
                    json!({ "compositeFilter": { "op": "AND", "filters": filters } }),
                );
            }
        }

        let orders: Vec<_> = definition
            .request_order_by()
            .iter()
            .map(|order| {
                json!({
                    "field": { "fieldPath": order.field().canonical_string() },
                    "direction": order.direction().as_str(),
                })
            })
            .collect();
        structured.insert("orderBy".to_string(), JsonValue::Array(orders));

        if let Some(start) = definition.request_start_at() {
            structured.insert("startAt".to_string(), self.encode_cursor(start, start.inclusive())?);
        }
        if let Some(end) = definition.request_end_at() {
            structured.insert("endAt".to_string(), self.encode_cursor(end, !end.inclusive())?);
        }
        if let Some(limit) = definition.limit() {
            structured.insert("limit".to_string(), json!(limit));
        }

        Ok(JsonValue::Object(structured))
    }

    fn encode_filter(&self, filter: &FieldFilter) -> DbResult<JsonValue> {
        let field = json!({ "fieldPath": filter.field().canonical_string() });
        let unary = match (filter.operator(), filter.value().kind()) {
            (FilterOperator::Equal, ValueKind::Null) => Some("IS_NULL"),
            (FilterOperator::NotEqual, ValueKind::Null) => Some("IS_NOT_NULL"),
            (FilterOperator::Equal, ValueKind::Double(v)) if v.is_nan() => Some("IS_NAN"),
            (FilterOperator::NotEqual, ValueKind::Double(v)) if v.is_nan() => Some("IS_NOT_NAN"),
            _ => None,
        };
        if let Some(op) = unary {
            return Ok(json!({ "unaryFilter": { "field": field, "op": op } }));
        }
        Ok(json!({
            "fieldFilter": {
                "field": field,
                "op": filter.operator().as_str(),
                "value": self.encode_value(filter.value())?
            }
        }))
    }

    fn encode_cursor(&self, bound: &Bound, before: bool) -> DbResult<JsonValue> {
        Ok(json!({
            "values": self.encode_values(bound.values())?,
            "before": before,
        }))
    }

    pub fn encode_map_fields(&self, map: &MapValue) -> DbResult<JsonValue> {
        let mut fields = Map::new();
        for (key, value) in map.fields() {
            fields.insert(key.clone(), self.encode_value(value)?);
        }
        Ok(JsonValue::Object(fields))
    }

    fn encode_values(&self, values: &[Value]) -> DbResult<Vec<JsonValue>> {
        values.iter().map(|value| self.encode_value(value)).collect()
    }

    pub fn encode_value(&self, value: &Value) -> DbResult<JsonValue> {
        let encoded = match value.kind() {
            ValueKind::Null => json!({ "nullValue": JsonValue::Null }),
            ValueKind::Boolean(boolean) => json!({ "booleanValue": boolean }),
            ValueKind::Integer(integer) => json!({ "integerValue": integer.to_string() }),
            ValueKind::Double(double) => encode_double(*double),
            ValueKind::Timestamp(timestamp) => {
                json!({ "timestampValue": timestamp.to_rfc3339() })
            }
            ValueKind::String(string) => json!({ "stringValue": string }),
            ValueKind::Bytes(bytes) => json!({ "bytesValue": bytes.to_base64() }),
            ValueKind::Reference(key) => json!({ "referenceValue": self.document_name(key) }),
            ValueKind::GeoPoint(point) => json!({
                "geoPointValue": {
                    "latitude": point.latitude(),
                    "longitude": point.longitude(),
                }
            }),
            ValueKind::Array(values) => {
                json!({ "arrayValue": { "values": self.encode_values(values)? } })
            }
            ValueKind::Map(map) => json!({
                "mapValue": { "fields": self.encode_map_fields(map)? }
            }),
            ValueKind::Sentinel(_) => {
                return Err(invalid_argument(
                    "Field value sentinels must be sent as field transforms",
                ))
            }
        };
        Ok(encoded)
    }

    /// Decodes the `fields` of a REST document. Documents without fields
    /// decode to an empty map.
    pub fn decode_document_fields(&self, document: &JsonValue) -> DbResult<MapValue> {
        decode_map_value(document)
    }
}

// JSON has no NaN or infinities; the REST API takes them as strings.
fn encode_double(value: f64) -> JsonValue {
    if value.is_nan() {
        json!({ "doubleValue": "NaN" })
    } else if value.is_infinite() {
        let text = if value > 0.0 { "Infinity" } else { "-Infinity" };
        json!({ "doubleValue": text })
    } else {
        json!({ "doubleValue": value })
    }
}

fn decode_map_value(value: &JsonValue) -> DbResult<MapValue> {
    let object = value
        .as_object()
        .ok_or_else(|| internal_error("Expected object for map value"))?;
    let fields_object = match object.get("fields") {
        Some(fields) => fields
            .as_object()
            .ok_or_else(|| internal_error("Expected 'fields' to be an object"))?,
        None => return Ok(MapValue::default()),
    };

    let mut fields = BTreeMap::new();
    for (key, value) in fields_object {
        fields.insert(key.clone(), decode_value(value)?);
    }
    Ok(MapValue::new(fields))
}

fn decode_value(value: &JsonValue) -> DbResult<Value> {
    let object = value
        .as_object()
        .ok_or_else(|| internal_error("Expected Firestore value object"))?;
    if object.contains_key("nullValue") {
        return Ok(Value::null());
    }
    if let Some(bool_value) = object.get("booleanValue") {
        let value = bool_value
            .as_bool()
            .ok_or_else(|| internal_error("booleanValue must be bool"))?;
        return Ok(Value::from_bool(value));
    }
    if let Some(integer_value) = object.get("integerValue") {
        let parsed = match integer_value {
            JsonValue::String(value) => i64::from_str(value)
                .map_err(|err| internal_error(format!("Invalid integerValue: {err}")))?,
            JsonValue::Number(number) => number
                .as_i64()
                .ok_or_else(|| internal_error("Integer out of range"))?,
            _ => return Err(internal_error("integerValue must be a string or number")),
        };
        return Ok(Value::from_integer(parsed));
    }
    if let Some(double_value) = object.get("doubleValue") {
        let parsed = match double_value {
            JsonValue::Number(number) => number
                .as_f64()
                .ok_or_else(|| internal_error("Invalid doubleValue"))?,
            JsonValue::String(value) => value
                .parse::<f64>()
                .map_err(|err| internal_error(format!("Invalid doubleValue: {err}")))?,
            _ => return Err(internal_error("doubleValue must be a number or string")),
        };
        return Ok(Value::from_double(parsed));
    }
    if let Some(timestamp_value) = object.get("timestampValue") {
        let text = timestamp_value
            .as_str()
            .ok_or_else(|| internal_error("timestampValue must be string"))?;
        return Ok(Value::from_timestamp(Timestamp::parse_rfc3339(text)?));
    }
    if let Some(string_value) = object.get("stringValue") {
        let text = string_value
            .as_str()
            .ok_or_else(|| internal_error("stringValue must be string"))?;
        return Ok(Value::from_string(text));
    }
    if let Some(bytes_value) = object.get("bytesValue") {
        let text = bytes_value
            .as_str()
            .ok_or_else(|| internal_error("bytesValue must be base64 string"))?;
        let decoded = Bytes::from_base64(text)
            .map_err(|err| internal_error(format!("Invalid bytesValue: {err}")))?;
        return Ok(Value::from_bytes(decoded));
    }
    if let Some(reference_value) = object.get("referenceValue") {
        let name = reference_value
            .as_str()
            .ok_or_else(|| internal_error("referenceValue must be string"))?;
        return Ok(Value::from_reference(DatabaseId::parse_document_name(name)?));
    }
    if let Some(geo_point) = object.get("geoPointValue") {
        // Zero coordinates are omitted from the JSON.
        let latitude = geo_point
            .get("latitude")
            .and_then(JsonValue::as_f64)
            .unwrap_or(0.0);
        let longitude = geo_point
            .get("longitude")
            .and_then(JsonValue::as_f64)
            .unwrap_or(0.0);
        return Ok(Value::from_geo_point(GeoPoint::new(latitude, longitude)?));
    }
    if let Some(array_value) = object.get("arrayValue") {
        let decoded = match array_value.get("values").and_then(JsonValue::as_array) {
            Some(entries) => entries
                .iter()
                .map(decode_value)
                .collect::<DbResult<Vec<_>>>()?,
            None => Vec::new(),
        };
        return Ok(Value::from_array(decoded));
    }
    if let Some(map_value) = object.get("mapValue") {
        return Ok(Value::from_map(decode_map_value(map_value)?));
    }

    Err(internal_error("Unknown Firestore value type"))
}

/// Field mask entries in wire form.
fn encode_mask(paths: &[FieldPath]) -> JsonValue {
    let paths: Vec<String> = paths.iter().map(FieldPath::canonical_string).collect();
    json!({ "fieldPaths": paths })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptor::query::{LimitType, OrderBy, OrderDirection};
    use crate::model::ResourcePath;

    fn serializer() -> JsonProtoSerializer {
        JsonProtoSerializer::new(DatabaseId::default_database("demo"))
    }

    #[test]
    fn decodes_every_value_kind() {
        let document = json!({
            "name": "projects/demo/databases/(default)/documents/users/sasha",
            "fields": {
                "name": { "stringValue": "Sasha" },
                "age": { "integerValue": "42" },
                "score": { "doubleValue": 4.5 },
                "active": { "booleanValue": true },
                "nothing": { "nullValue": null },
                "joined": { "timestampValue": "2024-01-02T03:04:05.000000006Z" },
                "avatar": { "bytesValue": "AQID" },
                "friend": { "referenceValue": "projects/demo/databases/(default)/documents/users/kai" },
                "home": { "geoPointValue": { "latitude": 52.5 } },
                "tags": { "arrayValue": { "values": [{ "stringValue": "a" }] } },
                "empty": { "arrayValue": {} },
                "stats": { "mapValue": { "fields": { "views": { "integerValue": "3" } } } }
            }
        });
        let map = serializer().decode_document_fields(&document).unwrap();
        assert_eq!(map.get("age"), Some(&Value::from_integer(42)));
        assert_eq!(
            map.get("joined"),
            Some(&Value::from_timestamp(Timestamp::new(1_704_164_645, 6)))
        );
        assert_eq!(
            map.get("friend"),
            Some(&Value::from_reference(DocumentKey::parse("users/kai").unwrap()))
        );
        assert_eq!(
            map.get("home"),
            Some(&Value::from_geo_point(GeoPoint::new(52.5, 0.0).unwrap()))
        );
        assert_eq!(map.get("empty"), Some(&Value::from_array(Vec::new())));
        assert_eq!(
            map.get("avatar"),
            Some(&Value::from_bytes(vec![1u8, 2, 3]))
        );
    }

    #[test]
    fn update_writes_require_existing_document() {
        let write = WriteOperation::Update {
            key: DocumentKey::parse("users/sasha").unwrap(),
            data: MapValue::default(),
            field_paths: vec![FieldPath::from_dot_separated("nickname").unwrap()],
            transforms: vec![FieldTransform::new(
                FieldPath::from_dot_separated("visits").unwrap(),
                TransformOperation::Increment(Value::from_integer(1)),
            )],
        };
        let encoded = serializer().encode_write(&write).unwrap();
        assert_eq!(
            encoded,
            json!({
                "update": {
                    "name": "projects/demo/databases/(default)/documents/users/sasha",
                    "fields": {}
                },
                "updateMask": { "fieldPaths": ["nickname"] },
                "currentDocument": { "exists": true },
                "updateTransforms": [
                    { "fieldPath": "visits", "increment": { "integerValue": "1" } }
                ]
            })
        );
    }

    #[test]
    fn structured_query_with_filters_and_cursors() {
        let definition = QueryDefinition::new(ResourcePath::parse("users").unwrap())
            .unwrap()
            .with_filter(
                FieldFilter::new(
                    FieldPath::from_dot_separated("age").unwrap(),
                    FilterOperator::GreaterThanOrEqual,
                    Value::from_integer(18),
                )
                .unwrap(),
            )
            .with_filter(
                FieldFilter::new(
                    FieldPath::from_dot_separated("nickname").unwrap(),
                    FilterOperator::Equal,
                    Value::null(),
                )
                .unwrap(),
            )
            .with_order_by(OrderBy::new(
                FieldPath::from_dot_separated("age").unwrap(),
                OrderDirection::Descending,
            ))
            .with_start_at(Bound::new(vec![Value::from_integer(40)], false))
            .with_limit(10, LimitType::First);

        let encoded = serializer().encode_structured_query(&definition).unwrap();
        assert_eq!(
            encoded,
            json!({
                "from": [{ "collectionId": "users", "allDescendants": false }],
                "where": {
                    "compositeFilter": {
                        "op": "AND",
                        "filters": [
                            {
                                "fieldFilter": {
                                    "field": { "fieldPath": "age" },
                                    "op": "GREATER_THAN_OR_EQUAL",
                                    "value": { "integerValue": "18" }
                                }
                            },
                            {
                                "unaryFilter": {
                                    "field": { "fieldPath": "nickname" },
                                    "op": "IS_NULL"
                                }
                            }
                        ]
                    }
                },
                "orderBy": [
                    { "field": { "fieldPath": "age" }, "direction": "DESCENDING" },
                    { "field": { "fieldPath": "__name__" }, "direction": "DESCENDING" }
                ],
                "startAt": { "values": [{ "integerValue": "40" }], "before": false },
                "limit": 10
            })
        );
    }

    #[test]
    fn sentinels_cannot_be_encoded_as_values() {
        let err = serializer()
            .encode_value(&Value::server_timestamp())
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }
}
