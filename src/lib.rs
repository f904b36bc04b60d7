//! Typed collections, references, reads, writes and transactions over Cloud
//! Firestore.
//!
//! Document models are plain serde types. The helpers in this crate encode
//! them into native field maps, forward the call to the active [`adaptor`]
//! and decode what comes back:
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use typed_firestore::{collection, get, set, update, FieldValue, UpdateData};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Counter {
//!     count: FieldValue<i64>,
//! }
//!
//! # async fn run() -> typed_firestore::DbResult<()> {
//! let counters = collection::<Counter>("counters")?;
//! let counter = counters.doc_ref("visits")?;
//! set(&counter, &Counter { count: FieldValue::Value(0) }).await?;
//! update(&counter, UpdateData::new().field("count", FieldValue::<i64>::Increment(1))?).await?;
//! let visits = get(&counter).await?.and_then(|doc| doc.data.count.into_value());
//! assert_eq!(visits, Some(1));
//! # Ok(())
//! # }
//! ```
//!
//! Server processes talk to the Firestore REST API (or the emulator named by
//! `FIRESTORE_EMULATOR_HOST`). Processes forced into the browser environment
//! use the end-user client instead. Tests inject a rules-testing context or an
//! in-memory store through [`testing`].

pub mod adaptor;
mod api;
pub mod error;
pub mod model;
pub mod testing;
pub mod value;

#[cfg(test)]
mod test_support;

pub use adaptor::DocMeta;
pub use api::{
    add, all, batch, collection, doc_id, doc_ref, get, get_many, query, ref_from_path, remove,
    set, subcollection, transaction, update, upset, Batch, Collection, Doc, FilterOperator,
    OrderDirection, Query, Ref, TransactionRead, TransactionWrite, UpdateData,
};
pub use error::{DbError, DbErrorCode, DbResult};
pub use model::{FieldPath, GeoPoint, Timestamp};
pub use value::{server_date, timestamp_serde, Bytes, FieldValue};
