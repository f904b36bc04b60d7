use std::sync::Once;

use typed_firestore::testing::inject_in_memory_adaptor;

static INJECT: Once = Once::new();

/// Points the typed API at one in-memory store shared by every test of the
/// binary. Tests use fresh auto-ids, so they do not see each other's data.
pub fn setup() {
    INJECT.call_once(|| {
        inject_in_memory_adaptor("typed-firestore-tests").expect("inject in-memory adaptor");
    });
}
