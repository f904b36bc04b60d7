use std::collections::BTreeMap;

use serde::ser::{self, Serialize};

use crate::error::{invalid_argument, DbError, DbResult};
use crate::model::{DocumentKey, GeoPoint, Timestamp};
use crate::value::special::{GEO_POINT_MARKER, REFERENCE_MARKER, SENTINEL_MARKER, TIMESTAMP_MARKER};
use crate::value::{Bytes, MapValue, Value, ValueKind};

impl ser::Error for DbError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        invalid_argument(msg.to_string())
    }
}

/// Encodes a typed document into a native field map.
///
/// The top level must serialize as a struct or a map. `None` fields are left
/// out so that merges and updates do not clobber them.
pub fn to_native_map<T: Serialize + ?Sized>(value: &T) -> DbResult<MapValue> {
    match value.serialize(ValueSerializer)? {
        Some(encoded) => match encoded.into_kind() {
            ValueKind::Map(map) => Ok(map),
            other => Err(invalid_argument(format!(
                "Documents must serialize to a map, got {}",
                kind_name(&other)
            ))),
        },
        None => Err(invalid_argument("Documents cannot be empty options")),
    }
}

/// Encodes a single typed value. `None` becomes null.
pub fn to_native_value<T: Serialize + ?Sized>(value: &T) -> DbResult<Value> {
    Ok(value.serialize(ValueSerializer)?.unwrap_or_else(Value::null))
}

fn kind_name(kind: &ValueKind) -> &'static str {
    match kind {
        ValueKind::Null => "null",
        ValueKind::Boolean(_) => "a boolean",
        ValueKind::Integer(_) | ValueKind::Double(_) => "a number",
        ValueKind::Timestamp(_) => "a timestamp",
        ValueKind::String(_) => "a string",
        ValueKind::Bytes(_) => "bytes",
        ValueKind::Reference(_) => "a reference",
        ValueKind::GeoPoint(_) => "a geo point",
        ValueKind::Array(_) => "an array",
        ValueKind::Map(_) => "a map",
        ValueKind::Sentinel(_) => "a sentinel",
    }
}

/// `Ok(None)` marks an absent value (`Option::None`).
struct ValueSerializer;

type Encoded = Option<Value>;

impl ser::Serializer for ValueSerializer {
    type Ok = Encoded;
    type Error = DbError;
    type SerializeSeq = SeqSerializer;
    type SerializeTuple = SeqSerializer;
    type SerializeTupleStruct = SeqSerializer;
    type SerializeTupleVariant = VariantSerializer<SeqSerializer>;
    type SerializeMap = MapSerializer;
    type SerializeStruct = MapSerializer;
    type SerializeStructVariant = VariantSerializer<MapSerializer>;

    fn serialize_bool(self, v: bool) -> DbResult<Encoded> {
        Ok(Some(Value::from_bool(v)))
    }

    fn serialize_i8(self, v: i8) -> DbResult<Encoded> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i16(self, v: i16) -> DbResult<Encoded> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i32(self, v: i32) -> DbResult<Encoded> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i64(self, v: i64) -> DbResult<Encoded> {
        Ok(Some(Value::from_integer(v)))
    }

    fn serialize_u8(self, v: u8) -> DbResult<Encoded> {
        self.serialize_i64(v as i64)
    }

    fn serialize_u16(self, v: u16) -> DbResult<Encoded> {
        self.serialize_i64(v as i64)
    }

    fn serialize_u32(self, v: u32) -> DbResult<Encoded> {
        self.serialize_i64(v as i64)
    }

    fn serialize_u64(self, v: u64) -> DbResult<Encoded> {
        let v = i64::try_from(v)
            .map_err(|_| invalid_argument(format!("Integer {v} does not fit a 64-bit signed value")))?;
        self.serialize_i64(v)
    }

    fn serialize_f32(self, v: f32) -> DbResult<Encoded> {
        self.serialize_f64(v as f64)
    }

    fn serialize_f64(self, v: f64) -> DbResult<Encoded> {
        Ok(Some(Value::from_double(v)))
    }

    fn serialize_char(self, v: char) -> DbResult<Encoded> {
        Ok(Some(Value::from_string(v.to_string())))
    }

    fn serialize_str(self, v: &str) -> DbResult<Encoded> {
        Ok(Some(Value::from_string(v)))
    }

    fn serialize_bytes(self, v: &[u8]) -> DbResult<Encoded> {
        Ok(Some(Value::from_bytes(Bytes::from(v))))
    }

    fn serialize_none(self) -> DbResult<Encoded> {
        Ok(None)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> DbResult<Encoded> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> DbResult<Encoded> {
        Ok(Some(Value::null()))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> DbResult<Encoded> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> DbResult<Encoded> {
        self.serialize_str(variant)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> DbResult<Encoded> {
        let inner = to_native_value(value)?;
        match name {
            TIMESTAMP_MARKER => decode_timestamp_marker(inner).map(Some),
            GEO_POINT_MARKER => decode_geo_point_marker(inner).map(Some),
            REFERENCE_MARKER => decode_reference_marker(inner).map(Some),
            SENTINEL_MARKER => decode_sentinel_marker(inner).map(Some),
            _ => Ok(Some(inner)),
        }
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> DbResult<Encoded> {
        let inner = to_native_value(value)?;
        Ok(Some(Value::from_map(BTreeMap::from([(
            variant.to_string(),
            inner,
        )]))))
    }

    fn serialize_seq(self, len: Option<usize>) -> DbResult<SeqSerializer> {
        Ok(SeqSerializer {
            values: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> DbResult<SeqSerializer> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> DbResult<SeqSerializer> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> DbResult<VariantSerializer<SeqSerializer>> {
        Ok(VariantSerializer {
            variant,
            inner: self.serialize_seq(Some(len))?,
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> DbResult<MapSerializer> {
        Ok(MapSerializer::default())
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> DbResult<MapSerializer> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> DbResult<VariantSerializer<MapSerializer>> {
        Ok(VariantSerializer {
            variant,
            inner: MapSerializer::default(),
        })
    }
}

fn decode_timestamp_marker(inner: Value) -> DbResult<Value> {
    match inner.into_kind() {
        ValueKind::String(text) => Ok(Value::from_timestamp(Timestamp::parse_rfc3339(&text)?)),
        other => Err(invalid_argument(format!(
            "Timestamps must encode as text, got {}",
            kind_name(&other)
        ))),
    }
}

fn decode_geo_point_marker(inner: Value) -> DbResult<Value> {
    if let ValueKind::Array(values) = inner.kind() {
        if let [latitude, longitude] = values.as_slice() {
            if let (Some(latitude), Some(longitude)) = (as_f64(latitude), as_f64(longitude)) {
                return Ok(Value::from_geo_point(GeoPoint::new(latitude, longitude)?));
            }
        }
    }
    Err(invalid_argument("Geo points must encode as a [latitude, longitude] pair"))
}

fn decode_reference_marker(inner: Value) -> DbResult<Value> {
    match inner.into_kind() {
        ValueKind::String(path) => Ok(Value::from_reference(DocumentKey::parse(&path)?)),
        other => Err(invalid_argument(format!(
            "References must encode as a document path, got {}",
            kind_name(&other)
        ))),
    }
}

fn decode_sentinel_marker(inner: Value) -> DbResult<Value> {
    let ValueKind::Array(parts) = inner.into_kind() else {
        return Err(invalid_argument("Malformed field value sentinel"));
    };
    let mut parts = parts.into_iter();
    let op = match parts.next().map(Value::into_kind) {
        Some(ValueKind::String(op)) => op,
        _ => return Err(invalid_argument("Malformed field value sentinel")),
    };
    let operand = parts.next().unwrap_or_else(Value::null);

    match op.as_str() {
        "serverDate" => Ok(Value::server_timestamp()),
        "delete" => Ok(Value::delete_field()),
        "increment" => match operand.kind() {
            ValueKind::Integer(_) | ValueKind::Double(_) => Ok(Value::increment(operand)),
            other => Err(invalid_argument(format!(
                "Increment requires a numeric operand, got {}",
                kind_name(other)
            ))),
        },
        "arrayUnion" | "arrayRemove" => {
            let ValueKind::Array(elements) = operand.into_kind() else {
                return Err(invalid_argument(format!("{op} requires an array operand")));
            };
            if elements.iter().any(Value::contains_sentinel) {
                return Err(invalid_argument(format!(
                    "{op} elements cannot contain sentinels"
                )));
            }
            if op == "arrayUnion" {
                Ok(Value::array_union(elements))
            } else {
                Ok(Value::array_remove(elements))
            }
        }
        other => Err(invalid_argument(format!("Unknown field value sentinel '{other}'"))),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value.kind() {
        ValueKind::Double(v) => Some(*v),
        ValueKind::Integer(v) => Some(*v as f64),
        _ => None,
    }
}

struct SeqSerializer {
    values: Vec<Value>,
}

impl SeqSerializer {
    fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> DbResult<()> {
        let encoded = to_native_value(value)?;
        if encoded.contains_sentinel() {
            return Err(invalid_argument(
                "Field value sentinels cannot be used inside arrays",
            ));
        }
        self.values.push(encoded);
        Ok(())
    }
}

impl ser::SerializeSeq for SeqSerializer {
    type Ok = Encoded;
    type Error = DbError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> DbResult<()> {
        self.push(value)
    }

    fn end(self) -> DbResult<Encoded> {
        Ok(Some(Value::from_array(self.values)))
    }
}

impl ser::SerializeTuple for SeqSerializer {
    type Ok = Encoded;
    type Error = DbError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> DbResult<()> {
        // Sentinel operands travel inside a tuple, so no sentinel check here.
        self.values.push(to_native_value(value)?);
        Ok(())
    }

    fn end(self) -> DbResult<Encoded> {
        Ok(Some(Value::from_array(self.values)))
    }
}

impl ser::SerializeTupleStruct for SeqSerializer {
    type Ok = Encoded;
    type Error = DbError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> DbResult<()> {
        self.push(value)
    }

    fn end(self) -> DbResult<Encoded> {
        Ok(Some(Value::from_array(self.values)))
    }
}

#[derive(Default)]
struct MapSerializer {
    fields: BTreeMap<String, Value>,
    next_key: Option<String>,
}

impl MapSerializer {
    fn insert<T: Serialize + ?Sized>(&mut self, key: String, value: &T) -> DbResult<()> {
        if key.is_empty() {
            return Err(invalid_argument("Field names cannot be empty"));
        }
        if let Some(encoded) = value.serialize(ValueSerializer)? {
            self.fields.insert(key, encoded);
        }
        Ok(())
    }
}

impl ser::SerializeMap for MapSerializer {
    type Ok = Encoded;
    type Error = DbError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> DbResult<()> {
        self.next_key = Some(key.serialize(MapKeySerializer)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> DbResult<()> {
        let key = self
            .next_key
            .take()
            .ok_or_else(|| invalid_argument("Map value serialized before its key"))?;
        self.insert(key, value)
    }

    fn end(self) -> DbResult<Encoded> {
        Ok(Some(Value::from_map(self.fields)))
    }
}

impl ser::SerializeStruct for MapSerializer {
    type Ok = Encoded;
    type Error = DbError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> DbResult<()> {
        self.insert(key.to_string(), value)
    }

    fn end(self) -> DbResult<Encoded> {
        Ok(Some(Value::from_map(self.fields)))
    }
}

struct VariantSerializer<S> {
    variant: &'static str,
    inner: S,
}

impl<S> VariantSerializer<S> {
    fn wrap(variant: &'static str, inner: Encoded) -> Encoded {
        inner.map(|value| Value::from_map(BTreeMap::from([(variant.to_string(), value)])))
    }
}

impl ser::SerializeTupleVariant for VariantSerializer<SeqSerializer> {
    type Ok = Encoded;
    type Error = DbError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> DbResult<()> {
        self.inner.push(value)
    }

    fn end(self) -> DbResult<Encoded> {
        let inner = ser::SerializeSeq::end(self.inner)?;
        Ok(Self::wrap(self.variant, inner))
    }
}

impl ser::SerializeStructVariant for VariantSerializer<MapSerializer> {
    type Ok = Encoded;
    type Error = DbError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> DbResult<()> {
        self.inner.insert(key.to_string(), value)
    }

    fn end(self) -> DbResult<Encoded> {
        let inner = ser::SerializeMap::end(self.inner)?;
        Ok(Self::wrap(self.variant, inner))
    }
}

/// Map keys must be strings; integers and chars are stringified.
struct MapKeySerializer;

fn key_must_be_string() -> DbError {
    invalid_argument("Map keys must be strings")
}

impl ser::Serializer for MapKeySerializer {
    type Ok = String;
    type Error = DbError;
    type SerializeSeq = ser::Impossible<String, DbError>;
    type SerializeTuple = ser::Impossible<String, DbError>;
    type SerializeTupleStruct = ser::Impossible<String, DbError>;
    type SerializeTupleVariant = ser::Impossible<String, DbError>;
    type SerializeMap = ser::Impossible<String, DbError>;
    type SerializeStruct = ser::Impossible<String, DbError>;
    type SerializeStructVariant = ser::Impossible<String, DbError>;

    fn serialize_bool(self, _v: bool) -> DbResult<String> {
        Err(key_must_be_string())
    }

    fn serialize_i8(self, v: i8) -> DbResult<String> {
        Ok(v.to_string())
    }

    fn serialize_i16(self, v: i16) -> DbResult<String> {
        Ok(v.to_string())
    }

    fn serialize_i32(self, v: i32) -> DbResult<String> {
        Ok(v.to_string())
    }

    fn serialize_i64(self, v: i64) -> DbResult<String> {
        Ok(v.to_string())
    }

    fn serialize_u8(self, v: u8) -> DbResult<String> {
        Ok(v.to_string())
    }

    fn serialize_u16(self, v: u16) -> DbResult<String> {
        Ok(v.to_string())
    }

    fn serialize_u32(self, v: u32) -> DbResult<String> {
        Ok(v.to_string())
    }

    fn serialize_u64(self, v: u64) -> DbResult<String> {
        Ok(v.to_string())
    }

    fn serialize_f32(self, _v: f32) -> DbResult<String> {
        Err(key_must_be_string())
    }

    fn serialize_f64(self, _v: f64) -> DbResult<String> {
        Err(key_must_be_string())
    }

    fn serialize_char(self, v: char) -> DbResult<String> {
        Ok(v.to_string())
    }

    fn serialize_str(self, v: &str) -> DbResult<String> {
        Ok(v.to_string())
    }

    fn serialize_bytes(self, _v: &[u8]) -> DbResult<String> {
        Err(key_must_be_string())
    }

    fn serialize_none(self) -> DbResult<String> {
        Err(key_must_be_string())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, _value: &T) -> DbResult<String> {
        Err(key_must_be_string())
    }

    fn serialize_unit(self) -> DbResult<String> {
        Err(key_must_be_string())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> DbResult<String> {
        Err(key_must_be_string())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> DbResult<String> {
        Ok(variant.to_string())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> DbResult<String> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> DbResult<String> {
        Err(key_must_be_string())
    }

    fn serialize_seq(self, _len: Option<usize>) -> DbResult<Self::SerializeSeq> {
        Err(key_must_be_string())
    }

    fn serialize_tuple(self, _len: usize) -> DbResult<Self::SerializeTuple> {
        Err(key_must_be_string())
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> DbResult<Self::SerializeTupleStruct> {
        Err(key_must_be_string())
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> DbResult<Self::SerializeTupleVariant> {
        Err(key_must_be_string())
    }

    fn serialize_map(self, _len: Option<usize>) -> DbResult<Self::SerializeMap> {
        Err(key_must_be_string())
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> DbResult<Self::SerializeStruct> {
        Err(key_must_be_string())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> DbResult<Self::SerializeStructVariant> {
        Err(key_must_be_string())
    }
}
