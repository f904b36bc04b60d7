use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::adaptor::{adaptor, transaction_fn, Adaptor, NativeTransaction};
use crate::api::doc::Doc;
use crate::api::reference::Ref;
use crate::api::write::{remove_write, set_write, update_write, upset_write, UpdateData};
use crate::error::{internal_error, DbError, DbResult};

/// Read phase handle of [`transaction`].
pub struct TransactionRead {
    native: Arc<dyn NativeTransaction>,
    adaptor: Adaptor,
}

impl TransactionRead {
    /// Reads a document inside the transaction; `None` when it is missing.
    pub async fn get<T: DeserializeOwned>(&self, reference: &Ref<T>) -> DbResult<Option<Doc<T>>> {
        let snapshot = self.native.get(reference.key()).await?;
        Doc::from_snapshot(&self.adaptor, snapshot)
    }
}

/// Write phase handle of [`transaction`]. `data` is what the read phase
/// returned; the writes are buffered and committed with the transaction.
pub struct TransactionWrite<R> {
    pub data: R,
    native: Arc<dyn NativeTransaction>,
}

impl<R> TransactionWrite<R> {
    pub fn set<T: Serialize>(&self, reference: &Ref<T>, data: &T) -> DbResult<()> {
        self.native.write(set_write(reference, data)?)
    }

    pub fn upset<T: Serialize>(&self, reference: &Ref<T>, data: &T) -> DbResult<()> {
        self.native.write(upset_write(reference, data)?)
    }

    pub fn update<T>(&self, reference: &Ref<T>, data: UpdateData<T>) -> DbResult<()> {
        self.native.write(update_write(reference, data)?)
    }

    pub fn remove<T>(&self, reference: &Ref<T>) -> DbResult<()> {
        self.native.write(remove_write(reference))
    }
}

/// Runs `read` then `write` in one database transaction and returns what
/// `write` returned.
///
/// When the database retries the transaction because of contention both
/// phases run again, so they must not have side effects outside the
/// transaction.
pub async fn transaction<R, W, RF, RFut, WF, WFut>(read: RF, write: WF) -> DbResult<W>
where
    RF: Fn(TransactionRead) -> RFut + Send + Sync,
    RFut: Future<Output = DbResult<R>> + Send,
    WF: Fn(TransactionWrite<R>) -> WFut + Send + Sync,
    WFut: Future<Output = DbResult<W>> + Send,
    R: Send,
    W: Send,
{
    let adaptor = adaptor().await?;
    let outcome: Mutex<Option<W>> = Mutex::new(None);

    let body = transaction_fn(|native: Arc<dyn NativeTransaction>| {
        let reader = TransactionRead {
            native: native.clone(),
            adaptor: adaptor.clone(),
        };
        let (read, write, outcome) = (&read, &write, &outcome);
        async move {
            let data = read(reader).await?;
            let value = write(TransactionWrite { data, native }).await?;
            *outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
            Ok::<(), DbError>(())
        }
    });
    adaptor.datastore().run_transaction(body).await?;

    outcome
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .ok_or_else(|| internal_error("Transaction committed without running its write phase"))
}
