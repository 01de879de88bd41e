//! Fuzz target for Git pack file parsing.
//!
//! Tests that the pack parser handles arbitrary input without panicking and
//! stores nothing when it fails.

#![no_main]

use knot_storage::ObjectStore;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let store = ObjectStore::new();

    if knot_git::PackParser::new(data).parse(&store).is_err() {
        assert!(store.is_empty().unwrap_or(true));
    }
});
