//! Git pkt-line format implementation.
//!
//! The pkt-line format is used for all git protocol communication.
//! Each line is prefixed with a 4-character hex length that counts the
//! prefix itself; `0000`, `0001` and `0002` are special packets.

use crate::{GitError, Result};
use std::io::{Read, Write};

/// Largest payload a single pkt-line can carry.
pub const MAX_PKT_PAYLOAD: usize = 65516;

/// Largest value of the length field.
const MAX_PKT_LEN: usize = MAX_PKT_PAYLOAD + 4;

/// Largest data chunk per `side-band-64k` packet (one byte goes to the band).
pub const SIDEBAND_64K_MAX: usize = 65515;

/// Largest data chunk per `side-band` packet.
pub const SIDEBAND_MAX: usize = 999;

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Vec<u8>),
    /// Flush packet (0000).
    Flush,
    /// Delimiter packet (0001).
    Delimiter,
    /// Response-end packet (0002).
    ResponseEnd,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }

    /// Creates a data packet from bytes.
    pub fn from_bytes(b: impl Into<Vec<u8>>) -> Self {
        Self::Data(b.into())
    }

    /// Encodes the packet to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Data(data) => create_pkt_line(data),
            Self::Flush => Ok(b"0000".to_vec()),
            Self::Delimiter => Ok(b"0001".to_vec()),
            Self::ResponseEnd => Ok(b"0002".to_vec()),
        }
    }

    /// Returns true if this is a flush packet.
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }

    /// Returns the data content, or None for special packets.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the data as a string, trimming one trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.strip_suffix('\n').unwrap_or(s))
    }
}

/// Frames one payload as a pkt-line.
pub fn create_pkt_line(payload: impl AsRef<[u8]>) -> Result<Vec<u8>> {
    let payload = payload.as_ref();
    if payload.len() > MAX_PKT_PAYLOAD {
        return Err(GitError::MalformedRequest(format!(
            "pkt-line payload of {} bytes exceeds {}",
            payload.len(),
            MAX_PKT_PAYLOAD
        )));
    }
    let mut line = format!("{:04x}", payload.len() + 4).into_bytes();
    line.extend_from_slice(payload);
    Ok(line)
}

/// The flush packet.
pub fn create_flush_pkt() -> Vec<u8> {
    b"0000".to_vec()
}

/// Decodes every pkt-line in `buffer`, eliding flush and delimiter packets.
///
/// Payloads are returned verbatim, newline included. A `PACK` signature
/// where a length is expected ends the pkt-line section.
pub fn parse_pkt_lines(buffer: &[u8]) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut rest = buffer;
    while !rest.is_empty() && !rest.starts_with(b"PACK") {
        let (pkt, tail) = split_pkt(rest)?;
        rest = tail;
        if let PktLine::Data(data) = pkt {
            let line = String::from_utf8(data)
                .map_err(|_| GitError::MalformedRequest("pkt-line is not utf-8".to_string()))?;
            lines.push(line);
        }
    }
    Ok(lines)
}

/// Decodes the pkt-line at the head of `buffer`, returning it and the rest.
pub fn split_pkt(buffer: &[u8]) -> Result<(PktLine, &[u8])> {
    let header: &[u8; 4] = buffer
        .get(..4)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| GitError::MalformedRequest("truncated pkt-line length".to_string()))?;

    match parse_length(header)? {
        0 => Ok((PktLine::Flush, &buffer[4..])),
        1 => Ok((PktLine::Delimiter, &buffer[4..])),
        2 => Ok((PktLine::ResponseEnd, &buffer[4..])),
        len => {
            let payload = buffer.get(4..len).ok_or_else(|| {
                GitError::MalformedRequest(format!(
                    "pkt-line declares {} bytes but only {} remain",
                    len,
                    buffer.len()
                ))
            })?;
            Ok((PktLine::Data(payload.to_vec()), &buffer[len..]))
        }
    }
}

/// Parses a length field, rejecting `0003` and anything above `fff0`.
fn parse_length(header: &[u8; 4]) -> Result<usize> {
    if !header.iter().all(u8::is_ascii_hexdigit) {
        return Err(GitError::MalformedRequest(format!(
            "invalid pkt-line length {:?}",
            String::from_utf8_lossy(header)
        )));
    }
    let text = std::str::from_utf8(header)
        .map_err(|_| GitError::MalformedRequest("invalid pkt-line length".to_string()))?;
    let len = usize::from_str_radix(text, 16)
        .map_err(|_| GitError::MalformedRequest(format!("invalid pkt-line length {:?}", text)))?;

    if len == 3 || len > MAX_PKT_LEN {
        return Err(GitError::MalformedRequest(format!(
            "pkt-line length {:04x} out of range",
            len
        )));
    }
    Ok(len)
}

/// Side-band variant negotiated with the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideBand {
    /// `side-band`: 1000-byte packets.
    Basic,
    /// `side-band-64k`: full-size packets.
    Large,
}

impl SideBand {
    /// Picks the variant a client asked for, preferring `side-band-64k`.
    pub fn from_capabilities<'a>(caps: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let mut found = None;
        for cap in caps {
            match cap {
                "side-band-64k" => return Some(Self::Large),
                "side-band" => found = Some(Self::Basic),
                _ => {}
            }
        }
        found
    }

    /// Data bytes per packet.
    pub fn max_data(self) -> usize {
        match self {
            Self::Basic => SIDEBAND_MAX,
            Self::Large => SIDEBAND_64K_MAX,
        }
    }
}

/// Side-band channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Band {
    /// Pack data or report-status.
    Data = 1,
    /// Progress messages shown by the client.
    Progress = 2,
    /// Fatal error message.
    Error = 3,
}

/// Reader for pkt-line format.
pub struct PktLineReader<R> {
    reader: R,
}

impl<R: Read> PktLineReader<R> {
    /// Creates a new pkt-line reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next packet. `Ok(None)` on a clean end of input.
    pub fn read(&mut self) -> Result<Option<PktLine>> {
        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            match self.reader.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(GitError::MalformedRequest(
                        "truncated pkt-line length".to_string(),
                    ))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        match parse_length(&header)? {
            0 => Ok(Some(PktLine::Flush)),
            1 => Ok(Some(PktLine::Delimiter)),
            2 => Ok(Some(PktLine::ResponseEnd)),
            len => {
                let mut data = vec![0u8; len - 4];
                self.reader.read_exact(&mut data).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        GitError::MalformedRequest("truncated pkt-line payload".to_string())
                    } else {
                        e.into()
                    }
                })?;
                Ok(Some(PktLine::Data(data)))
            }
        }
    }

    /// Reads all packets until a flush packet.
    pub fn read_until_flush(&mut self) -> Result<Vec<PktLine>> {
        let mut packets = Vec::new();
        loop {
            match self.read()? {
                Some(PktLine::Flush) | None => break,
                Some(pkt) => packets.push(pkt),
            }
        }
        Ok(packets)
    }

    /// Returns a mutable reference to the inner reader.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consumes the reader and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writer for pkt-line format.
pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: Write> PktLineWriter<W> {
    /// Creates a new pkt-line writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a packet.
    pub fn write(&mut self, pkt: &PktLine) -> Result<()> {
        self.writer.write_all(&pkt.encode()?)?;
        Ok(())
    }

    /// Writes a data line.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(&create_pkt_line(data)?)?;
        Ok(())
    }

    /// Writes a string line (with newline).
    pub fn write_line(&mut self, s: &str) -> Result<()> {
        let mut data = s.as_bytes().to_vec();
        if !s.ends_with('\n') {
            data.push(b'\n');
        }
        self.write_data(&data)
    }

    /// Writes `data` on a side-band channel, split into as many packets as
    /// the variant requires.
    pub fn write_sideband(&mut self, band: Band, data: &[u8], variant: SideBand) -> Result<()> {
        let mut packet = Vec::with_capacity(variant.max_data() + 1);
        for chunk in data.chunks(variant.max_data()) {
            packet.clear();
            packet.push(band as u8);
            packet.extend_from_slice(chunk);
            self.write_data(&packet)?;
        }
        Ok(())
    }

    /// Writes a flush packet.
    pub fn flush_pkt(&mut self) -> Result<()> {
        self.write(&PktLine::Flush)
    }

    /// Writes raw bytes with no framing.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn pkt_lines_roundtrip(lines in prop::collection::vec("[ -~]{0,200}\n?", 0..20)) {
            let mut buf = Vec::new();
            for line in &lines {
                buf.extend(create_pkt_line(line).unwrap());
            }
            prop_assert_eq!(parse_pkt_lines(&buf).unwrap(), lines);
        }

        #[test]
        fn parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = parse_pkt_lines(&data);
            let mut reader = PktLineReader::new(std::io::Cursor::new(data));
            while let Ok(Some(_)) = reader.read() {}
        }
    }
}
