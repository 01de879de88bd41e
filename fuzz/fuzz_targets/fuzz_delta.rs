//! Fuzz target for delta application.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    base: Vec<u8>,
    delta: Vec<u8>,
}

fuzz_target!(|input: Input| {
    if let Ok(result) = knot_git::apply_delta(&input.base, &input.delta) {
        let parsed = knot_git::parse_delta(&input.delta).map(|d| d.result_size);
        assert_eq!(parsed.ok(), Some(result.len()));
    }
});
