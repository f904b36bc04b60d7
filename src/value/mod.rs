mod bytes;
mod de;
mod field_value;
mod map_value;
mod ser;
pub(crate) mod special;
#[allow(clippy::module_inception)]
mod value;

pub use bytes::Bytes;
pub use de::{from_native_map, from_native_value, ValueDeserializer};
pub use field_value::{server_date, FieldValue};
pub use map_value::MapValue;
pub use ser::{to_native_map, to_native_value};
pub use special::timestamp_serde;
pub use value::{Sentinel, Value, ValueKind};
