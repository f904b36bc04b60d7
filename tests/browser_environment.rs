use std::sync::Arc;

use typed_firestore::adaptor::{inject_adaptor, is_browser, Adaptor, AdaptorKind, InMemoryDatastore};
use typed_firestore::model::DatabaseId;
use typed_firestore::DbErrorCode;

// The only test in this binary: it forces the browser environment for the
// whole process.
#[test]
fn injecting_in_the_browser_environment_fails() {
    std::env::set_var("FIREBASE_ENV_FORCE", "browser");
    assert!(is_browser());

    let err = inject_adaptor(Adaptor::new(
        AdaptorKind::Testing,
        DatabaseId::default_database("demo"),
        Arc::new(InMemoryDatastore::new()),
    ))
    .unwrap_err();
    assert_eq!(err.code, DbErrorCode::FailedPrecondition);
    assert_eq!(
        err.message(),
        "Injecting adaptor is not supported in the browser environment"
    );
}
