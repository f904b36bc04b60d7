use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{self, DeserializeOwned, IntoDeserializer, Visitor};
use serde::forward_to_deserialize_any;

use crate::error::{data_loss, DbError, DbResult};
use crate::value::{MapValue, Value, ValueKind};

impl de::Error for DbError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        data_loss(msg.to_string())
    }
}

/// Decodes a native field map into a typed document.
pub fn from_native_map<T: DeserializeOwned>(map: MapValue) -> DbResult<T> {
    T::deserialize(ValueDeserializer::new(Value::from_map(map)))
}

/// Decodes a single native value.
pub fn from_native_value<T: DeserializeOwned>(value: Value) -> DbResult<T> {
    T::deserialize(ValueDeserializer::new(value))
}

/// Serde deserializer over an owned native value.
///
/// Timestamps and references are visited as strings (RFC 3339 text and the
/// document path), geo points as a `[latitude, longitude]` sequence.
pub struct ValueDeserializer {
    value: Value,
}

impl ValueDeserializer {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

impl<'de> IntoDeserializer<'de, DbError> for Value {
    type Deserializer = ValueDeserializer;

    fn into_deserializer(self) -> ValueDeserializer {
        ValueDeserializer::new(self)
    }
}

fn visit_values<'de, V, I>(values: I, visitor: V) -> DbResult<V::Value>
where
    V: Visitor<'de>,
    I: Iterator,
    I::Item: IntoDeserializer<'de, DbError>,
{
    let mut seq = SeqDeserializer::new(values);
    let out = visitor.visit_seq(&mut seq)?;
    seq.end()?;
    Ok(out)
}

impl<'de> de::Deserializer<'de> for ValueDeserializer {
    type Error = DbError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> DbResult<V::Value> {
        match self.value.into_kind() {
            ValueKind::Null => visitor.visit_unit(),
            ValueKind::Boolean(v) => visitor.visit_bool(v),
            ValueKind::Integer(v) => visitor.visit_i64(v),
            ValueKind::Double(v) => visitor.visit_f64(v),
            ValueKind::Timestamp(v) => visitor.visit_string(v.to_rfc3339()),
            ValueKind::String(v) => visitor.visit_string(v),
            ValueKind::Bytes(v) => visitor.visit_byte_buf(v.into_vec()),
            ValueKind::Reference(key) => visitor.visit_string(key.path().canonical_string()),
            ValueKind::GeoPoint(point) => {
                visit_values([point.latitude(), point.longitude()].into_iter(), visitor)
            }
            ValueKind::Array(values) => visit_values(values.into_iter(), visitor),
            ValueKind::Map(map) => {
                let mut access = MapDeserializer::new(map.into_fields().into_iter());
                let out = visitor.visit_map(&mut access)?;
                access.end()?;
                Ok(out)
            }
            ValueKind::Sentinel(_) => Err(data_loss(
                "Read results cannot contain field value sentinels",
            )),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> DbResult<V::Value> {
        if self.value.is_null() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> DbResult<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> DbResult<V::Value> {
        match self.value.into_kind() {
            ValueKind::String(variant) => visitor.visit_enum(EnumDeserializer {
                variant,
                value: None,
            }),
            ValueKind::Map(map) if map.fields().len() == 1 => {
                let Some((variant, value)) = map.into_fields().into_iter().next() else {
                    return Err(data_loss("Expected a single-entry map for an enum"));
                };
                visitor.visit_enum(EnumDeserializer {
                    variant,
                    value: Some(value),
                })
            }
            _ => Err(data_loss(
                "Enums must be stored as a string or a single-entry map",
            )),
        }
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> DbResult<V::Value> {
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map struct
        identifier
    }
}

struct EnumDeserializer {
    variant: String,
    value: Option<Value>,
}

impl<'de> de::EnumAccess<'de> for EnumDeserializer {
    type Error = DbError;
    type Variant = VariantDeserializer;

    fn variant_seed<V: de::DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> DbResult<(V::Value, VariantDeserializer)> {
        let variant = seed.deserialize(self.variant.into_deserializer())?;
        Ok((variant, VariantDeserializer { value: self.value }))
    }
}

struct VariantDeserializer {
    value: Option<Value>,
}

impl VariantDeserializer {
    fn content(self) -> DbResult<ValueDeserializer> {
        self.value
            .map(ValueDeserializer::new)
            .ok_or_else(|| data_loss("Enum variant is missing its content"))
    }
}

impl<'de> de::VariantAccess<'de> for VariantDeserializer {
    type Error = DbError;

    fn unit_variant(self) -> DbResult<()> {
        match self.value {
            None => Ok(()),
            Some(value) if value.is_null() => Ok(()),
            Some(_) => Err(data_loss("Unit variants cannot carry content")),
        }
    }

    fn newtype_variant_seed<T: de::DeserializeSeed<'de>>(self, seed: T) -> DbResult<T::Value> {
        seed.deserialize(self.content()?)
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> DbResult<V::Value> {
        de::Deserializer::deserialize_seq(self.content()?, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> DbResult<V::Value> {
        de::Deserializer::deserialize_map(self.content()?, visitor)
    }
}
