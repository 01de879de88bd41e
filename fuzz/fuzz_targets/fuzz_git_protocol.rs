//! Fuzz target for the smart HTTP request handlers.
//!
//! Feeds arbitrary bodies to upload-pack and receive-pack against an empty
//! repository.

#![no_main]

use knot_storage::RepoStore;
use knot_types::Repository;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = knot_git::ReceiveRequest::parse(data);
    let _ = knot_git::WantHave::parse(&mut &data[..]);

    let store = RepoStore::new();
    let repo = store.open(&Repository::new("fuzz", "fuzz"));

    let mut output = Vec::new();
    let _ = knot_git::upload_pack(&mut &data[..], &mut output, &repo);

    output.clear();
    let _ = knot_git::receive_pack(data, &mut output, &repo, "fuzz");
});
