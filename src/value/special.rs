//! Serde impls for the native scalar types that have no serde data model
//! counterpart. Each one goes through a newtype struct whose name is a marker
//! recognised by the native serializer/deserializer. Other formats (e.g.
//! `serde_json`) just see the inner value.

use serde::de::{self, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::{DatabaseId, DocumentKey, GeoPoint, Timestamp};

pub(crate) const TIMESTAMP_MARKER: &str = "$__typed_firestore_timestamp";
pub(crate) const GEO_POINT_MARKER: &str = "$__typed_firestore_geo_point";
pub(crate) const REFERENCE_MARKER: &str = "$__typed_firestore_reference";
pub(crate) const SENTINEL_MARKER: &str = "$__typed_firestore_sentinel";

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(TIMESTAMP_MARKER, &self.to_rfc3339())
    }
}

struct TimestampVisitor;

impl<'de> Visitor<'de> for TimestampVisitor {
    type Value = Timestamp;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a timestamp")
    }

    fn visit_newtype_struct<D: Deserializer<'de>>(self, d: D) -> Result<Timestamp, D::Error> {
        let text = String::deserialize(d)?;
        self.visit_str(&text)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Timestamp, E> {
        Timestamp::parse_rfc3339(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_newtype_struct(TIMESTAMP_MARKER, TimestampVisitor)
    }
}

struct LatLng(f64, f64);

impl Serialize for LatLng {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.0)?;
        tuple.serialize_element(&self.1)?;
        tuple.end()
    }
}

impl Serialize for GeoPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(
            GEO_POINT_MARKER,
            &LatLng(self.latitude(), self.longitude()),
        )
    }
}

struct GeoPointVisitor;

impl<'de> Visitor<'de> for GeoPointVisitor {
    type Value = GeoPoint;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a [latitude, longitude] pair")
    }

    fn visit_newtype_struct<D: Deserializer<'de>>(self, d: D) -> Result<GeoPoint, D::Error> {
        let (latitude, longitude) = <(f64, f64)>::deserialize(d)?;
        GeoPoint::new(latitude, longitude).map_err(de::Error::custom)
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<GeoPoint, A::Error> {
        let latitude: f64 = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let longitude: f64 = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        GeoPoint::new(latitude, longitude).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for GeoPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_newtype_struct(GEO_POINT_MARKER, GeoPointVisitor)
    }
}

/// Serializes a document key as a native reference.
pub(crate) fn serialize_reference<S: Serializer>(
    key: &DocumentKey,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_newtype_struct(REFERENCE_MARKER, &key.path().canonical_string())
}

struct ReferenceVisitor;

impl<'de> Visitor<'de> for ReferenceVisitor {
    type Value = DocumentKey;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a document reference")
    }

    fn visit_newtype_struct<D: Deserializer<'de>>(self, d: D) -> Result<DocumentKey, D::Error> {
        let text = String::deserialize(d)?;
        self.visit_str(&text)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<DocumentKey, E> {
        let parsed = if v.starts_with("projects/") {
            DatabaseId::parse_document_name(v)
        } else {
            DocumentKey::parse(v)
        };
        parsed.map_err(E::custom)
    }
}

pub(crate) fn deserialize_reference<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DocumentKey, D::Error> {
    deserializer.deserialize_newtype_struct(REFERENCE_MARKER, ReferenceVisitor)
}

/// `#[serde(with = "typed_firestore::timestamp_serde")]` for
/// `chrono::DateTime<Utc>` fields, so they are stored as native timestamps
/// instead of strings.
pub mod timestamp_serde {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::model::Timestamp;

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        Timestamp::from_datetime(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        Timestamp::deserialize(deserializer).map(|timestamp| timestamp.to_datetime())
    }

    /// Same as the parent module for `Option<DateTime<Utc>>`.
    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(datetime) => serializer.serialize_some(&Timestamp::from_datetime(*datetime)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<Timestamp>::deserialize(deserializer)
                .map(|timestamp| timestamp.map(|t| t.to_datetime()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_formats_see_plain_inner_values() {
        let json = serde_json::to_value(Timestamp::new(0, 0)).unwrap();
        assert_eq!(json, serde_json::json!("1970-01-01T00:00:00.000000000Z"));

        let back: Timestamp = serde_json::from_value(json).unwrap();
        assert_eq!(back, Timestamp::new(0, 0));

        let point: GeoPoint = serde_json::from_value(serde_json::json!([1.5, 2.5])).unwrap();
        assert_eq!(point.longitude(), 2.5);
    }
}
