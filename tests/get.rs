mod common;

use serde::{Deserialize, Serialize};
use typed_firestore::{
    all, batch, collection, doc_id, get, get_many, query, subcollection, FilterOperator,
    OrderDirection, Query,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Book {
    title: String,
    year: i64,
}

#[tokio::test]
async fn missing_documents_read_as_none() {
    common::setup();
    let books = collection::<Book>("books").unwrap();
    let missing = books.new_ref().unwrap();
    assert!(get(&missing).await.unwrap().is_none());
}

#[tokio::test]
async fn get_many_keeps_the_requested_order() {
    common::setup();
    let books = collection::<Book>("books").unwrap();
    let first = books.new_ref().unwrap();
    let second = books.new_ref().unwrap();
    let missing = books.new_ref().unwrap();

    let mut writes = batch();
    writes
        .set(&first, &Book { title: "Dune".into(), year: 1965 })
        .unwrap()
        .set(&second, &Book { title: "Solaris".into(), year: 1961 })
        .unwrap();
    writes.commit().await.unwrap();

    let docs = get_many(&[second.clone(), missing, first.clone()]).await.unwrap();
    assert_eq!(docs.len(), 3);
    assert_eq!(docs[0].as_ref().map(|doc| doc.data.title.as_str()), Some("Solaris"));
    assert!(docs[1].is_none());
    assert_eq!(docs[2].as_ref().map(|doc| doc.reference.clone()), Some(first));
    assert!(docs[0].as_ref().unwrap().meta.is_some());
}

#[tokio::test]
async fn queries_filter_and_order_typed_documents() {
    common::setup();
    let shelves = collection::<()>("shelves").unwrap();
    let shelf = shelves.new_ref().unwrap();
    let books = subcollection::<Book, _>(&shelf, "books").unwrap();
    for (id, title, year) in [("a", "Roadside Picnic", 1972), ("b", "Hard to Be a God", 1964), ("c", "Monday Begins on Saturday", 1965)] {
        typed_firestore::set(&books.doc_ref(id).unwrap(), &Book { title: title.into(), year })
            .await
            .unwrap();
    }

    let sixties = query(
        &books,
        Query::new()
            .where_("year", FilterOperator::LessThan, 1970)
            .unwrap()
            .order_by("year", OrderDirection::Descending)
            .unwrap(),
    )
    .await
    .unwrap();
    let titles: Vec<&str> = sixties.iter().map(|doc| doc.data.title.as_str()).collect();
    assert_eq!(titles, vec!["Monday Begins on Saturday", "Hard to Be a God"]);

    let by_id = query(&books, Query::new().where_(doc_id(), FilterOperator::Equal, "c").unwrap())
        .await
        .unwrap();
    assert_eq!(by_id.len(), 1);
    assert_eq!(by_id[0].reference.id(), "c");

    let last = query(
        &books,
        Query::new()
            .order_by("year", OrderDirection::Ascending)
            .unwrap()
            .limit_to_last(1),
    )
    .await
    .unwrap();
    assert_eq!(last[0].data.year, 1972);

    assert_eq!(all(&books).await.unwrap().len(), 3);
}
