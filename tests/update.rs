mod common;

use serde::{Deserialize, Serialize};
use typed_firestore::{collection, get, remove, set, update, DbErrorCode, FieldValue, UpdateData};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Address {
    city: String,
    street: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    visits: i64,
    tags: Vec<String>,
    address: Address,
    bio: Option<String>,
}

fn profile() -> Profile {
    Profile {
        name: "Sasha".into(),
        visits: 1,
        tags: vec!["rust".into()],
        address: Address {
            city: "Barcelona".into(),
            street: Some("Rambla".into()),
        },
        bio: Some("Hi".into()),
    }
}

#[tokio::test]
async fn updates_change_only_the_given_fields() {
    common::setup();
    let profiles = collection::<Profile>("profiles").unwrap();
    let reference = profiles.new_ref().unwrap();
    set(&reference, &profile()).await.unwrap();

    update(
        &reference,
        UpdateData::new()
            .field(["address", "city"], "Porto")
            .unwrap()
            .field("visits", FieldValue::<i64>::Increment(2))
            .unwrap()
            .field("tags", FieldValue::ArrayUnion(vec!["serde", "rust"]))
            .unwrap()
            .field("bio", FieldValue::<String>::Delete)
            .unwrap(),
    )
    .await
    .unwrap();

    let data = get(&reference).await.unwrap().unwrap().data;
    assert_eq!(data.name, "Sasha");
    assert_eq!(data.visits, 3);
    assert_eq!(data.tags, vec!["rust".to_string(), "serde".to_string()]);
    assert_eq!(data.address.city, "Porto");
    assert_eq!(data.address.street.as_deref(), Some("Rambla"));
    assert_eq!(data.bio, None);
}

#[tokio::test]
async fn partial_updates_replace_whole_top_level_fields() {
    common::setup();
    let profiles = collection::<Profile>("profiles").unwrap();
    let reference = profiles.new_ref().unwrap();
    set(&reference, &profile()).await.unwrap();

    #[derive(Serialize)]
    struct Move {
        address: Address,
    }
    let partial = Move {
        address: Address {
            city: "Lisbon".into(),
            street: None,
        },
    };
    update(&reference, UpdateData::from_partial(&partial).unwrap()).await.unwrap();

    let data = get(&reference).await.unwrap().unwrap().data;
    assert_eq!(data.address, partial.address);
    assert_eq!(data.visits, 1);
}

#[tokio::test]
async fn updating_a_missing_document_fails() {
    common::setup();
    let profiles = collection::<Profile>("profiles").unwrap();
    let reference = profiles.new_ref().unwrap();
    let err = update(&reference, UpdateData::new().field("visits", 1).unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.code, DbErrorCode::NotFound);
}

#[tokio::test]
async fn removing_documents() {
    common::setup();
    let profiles = collection::<Profile>("profiles").unwrap();
    let reference = profiles.new_ref().unwrap();
    set(&reference, &profile()).await.unwrap();
    remove(&reference).await.unwrap();
    assert!(get(&reference).await.unwrap().is_none());

    // Removing again is not an error.
    remove(&reference).await.unwrap();
}
