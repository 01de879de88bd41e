//! Git protocol implementation for Knot.
//!
//! This crate implements pkt-line framing, the pack file format, delta
//! decoding and the smart HTTP protocol, enabling standard git clients to
//! push to and fetch from Knot repositories.

mod delta;
mod error;
mod pack;
mod pktline;
mod protocol;

pub use delta::{apply_delta, parse_delta, Delta, DeltaInstruction};
pub use error::GitError;
pub use pack::{create_packfile, extract_packfile, PackBuilder, PackParser, PACK_SIGNATURE, PACK_VERSION};
pub use pktline::{
    create_flush_pkt, create_pkt_line, parse_pkt_lines, split_pkt, Band, PktLine, PktLineReader,
    PktLineWriter, SideBand, MAX_PKT_PAYLOAD, SIDEBAND_64K_MAX, SIDEBAND_MAX,
};
pub use protocol::{
    advertise_refs, capabilities, objects_to_send, receive_pack, receive_pack_with, upload_pack,
    Command, FetchOutcome, PushOptions, ReceiveReport, ReceiveRequest, RefStatus, RefUpdate,
    Service, WantHave, DEFAULT_AGENT, DEFAULT_MAX_PUSH_COMMITS,
};

/// Result type for git protocol operations.
pub type Result<T> = std::result::Result<T, GitError>;
