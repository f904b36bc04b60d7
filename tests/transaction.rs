mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use typed_firestore::{
    collection, get, set, transaction, DbError, DbErrorCode, DbResult, Ref, TransactionRead,
    TransactionWrite, UpdateData,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Counter {
    count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    optional: Option<bool>,
}

fn counter(count: i64) -> Counter {
    Counter {
        count,
        optional: None,
    }
}

async fn read_count(tx: TransactionRead, counter: &Ref<Counter>) -> DbResult<i64> {
    let doc = tx.get(counter).await?;
    Ok(doc.map(|doc| doc.data.count).unwrap_or_default())
}

/// Increments the counter, yielding between the read and the write so that
/// concurrent callers interleave. `reads` counts read phase runs.
async fn plus_one(reference: &Ref<Counter>, use_update: bool, reads: &AtomicUsize) -> DbResult<i64> {
    transaction(
        |tx| async move {
            reads.fetch_add(1, Ordering::SeqCst);
            let count = read_count(tx, reference).await?;
            tokio::task::yield_now().await;
            Ok::<i64, DbError>(count)
        },
        |tx: TransactionWrite<i64>| async move {
            let next = tx.data + 1;
            if use_update {
                tx.update(reference, UpdateData::new().field("count", next)?)?;
            } else {
                tx.set(reference, &counter(next))?;
            }
            Ok::<i64, DbError>(next)
        },
    )
    .await
}

async fn new_counter(start: Counter) -> Ref<Counter> {
    let reference = collection::<Counter>("counters").unwrap().new_ref().unwrap();
    set(&reference, &start).await.unwrap();
    reference
}

#[tokio::test]
async fn concurrent_transactions_all_apply() {
    common::setup();
    let reference = new_counter(counter(0)).await;
    let reads = AtomicUsize::new(0);

    let (a, b, c) = tokio::join!(
        plus_one(&reference, false, &reads),
        plus_one(&reference, true, &reads),
        plus_one(&reference, false, &reads),
    );
    let mut results = vec![a.unwrap(), b.unwrap(), c.unwrap()];
    results.sort_unstable();
    assert_eq!(results, vec![1, 2, 3]);

    // Conflicting commits replay their read phase.
    assert!(reads.load(Ordering::SeqCst) > 3);

    let doc = get(&reference).await.unwrap().unwrap();
    assert_eq!(doc.data.count, 3);
}

#[tokio::test]
async fn write_phase_can_upset() {
    common::setup();
    let reference = new_counter(Counter {
        count: 0,
        optional: Some(true),
    })
    .await;

    #[derive(Serialize)]
    struct CountOnly {
        count: i64,
    }
    transaction(
        |tx| read_count(tx, &reference),
        |tx: TransactionWrite<i64>| {
            let reference = reference.cast::<CountOnly>();
            async move { tx.upset(&reference, &CountOnly { count: tx.data + 1 }) }
        },
    )
    .await
    .unwrap();

    let doc = get(&reference).await.unwrap().unwrap();
    assert_eq!(doc.data.count, 1);
    assert_eq!(doc.data.optional, Some(true));
}

#[tokio::test]
async fn write_phase_can_remove() {
    common::setup();
    let reference = new_counter(counter(5)).await;

    let removed = transaction(
        |tx| read_count(tx, &reference),
        |tx: TransactionWrite<i64>| {
            let reference = reference.clone();
            async move {
                tx.remove(&reference)?;
                Ok::<i64, DbError>(tx.data)
            }
        },
    )
    .await
    .unwrap();

    assert_eq!(removed, 5);
    assert!(get(&reference).await.unwrap().is_none());
}

#[tokio::test]
async fn read_phase_errors_abort_the_transaction() {
    common::setup();
    let reference = new_counter(counter(1)).await;

    let err = transaction(
        |_tx: TransactionRead| async { Err::<i64, _>(DbError::new(DbErrorCode::FailedPrecondition, "nope")) },
        |tx: TransactionWrite<i64>| {
            let reference = reference.clone();
            async move { tx.set(&reference, &counter(100)) }
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.code, DbErrorCode::FailedPrecondition);
    assert_eq!(get(&reference).await.unwrap().unwrap().data.count, 1);
}
