//! Typed helpers over the active adaptor.

mod doc;
mod query;
mod read;
mod reference;
mod transaction;
mod write;

pub use doc::Doc;
pub use query::{all, doc_id, query, FilterOperator, OrderDirection, Query};
pub use read::{get, get_many};
pub use reference::{collection, doc_ref, ref_from_path, subcollection, Collection, Ref};
pub use transaction::{transaction, TransactionRead, TransactionWrite};
pub use write::{add, batch, remove, set, update, upset, Batch, UpdateData};
