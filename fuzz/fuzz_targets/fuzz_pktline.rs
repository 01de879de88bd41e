//! Fuzz target for Git pkt-line parsing.
//!
//! Both the streaming reader and the slice splitter must reject malformed
//! input with an error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut reader = knot_git::PktLineReader::new(data);

    // Every iteration consumes at least four bytes, so this terminates.
    while let Ok(Some(_)) = reader.read() {}

    let _ = knot_git::parse_pkt_lines(data);
});
