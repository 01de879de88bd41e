//! Git delta decoding.
//!
//! A delta is two size varints (base, result) followed by instructions.
//! An opcode with the high bit set copies a range of the base; bits 0-3
//! select offset bytes and bits 4-6 select size bytes, with size 0 meaning
//! 0x10000. Opcodes 1-127 insert that many literal bytes. Opcode 0 is
//! reserved.

use crate::{GitError, Result};

/// One delta instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaInstruction<'a> {
    /// Copy `len` bytes of the base starting at `offset`.
    Copy { offset: usize, len: usize },
    /// Append literal bytes.
    Insert(&'a [u8]),
}

/// A parsed delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<'a> {
    /// Size the base object must have.
    pub base_size: usize,
    /// Size of the reconstructed object.
    pub result_size: usize,
    /// Instructions in order.
    pub instructions: Vec<DeltaInstruction<'a>>,
}

fn corrupt(msg: impl Into<String>) -> GitError {
    GitError::CorruptPack(format!("bad delta: {}", msg.into()))
}

/// Reads a little-endian base-128 size.
fn read_size(data: &[u8], pos: &mut usize) -> Result<usize> {
    let mut size = 0usize;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(*pos).ok_or_else(|| corrupt("truncated size"))?;
        *pos += 1;
        if shift > 56 {
            return Err(corrupt("size varint too long"));
        }
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(size);
        }
    }
}

/// Parses a delta without applying it.
pub fn parse_delta(delta: &[u8]) -> Result<Delta<'_>> {
    let mut pos = 0;
    let base_size = read_size(delta, &mut pos)?;
    let result_size = read_size(delta, &mut pos)?;

    let mut instructions = Vec::new();
    while pos < delta.len() {
        let opcode = delta[pos];
        pos += 1;

        if opcode & 0x80 != 0 {
            let mut next = |present: bool| -> Result<usize> {
                if !present {
                    return Ok(0);
                }
                let byte = *delta.get(pos).ok_or_else(|| corrupt("truncated copy"))?;
                pos += 1;
                Ok(byte as usize)
            };

            let mut offset = 0usize;
            for i in 0..4 {
                offset |= next(opcode & (1 << i) != 0)? << (8 * i);
            }
            let mut len = 0usize;
            for i in 0..3 {
                len |= next(opcode & (1 << (4 + i)) != 0)? << (8 * i);
            }
            if len == 0 {
                len = 0x10000;
            }
            instructions.push(DeltaInstruction::Copy { offset, len });
        } else if opcode != 0 {
            let len = opcode as usize;
            let data = delta
                .get(pos..pos + len)
                .ok_or_else(|| corrupt("truncated insert"))?;
            pos += len;
            instructions.push(DeltaInstruction::Insert(data));
        } else {
            return Err(corrupt("reserved opcode 0"));
        }
    }

    Ok(Delta {
        base_size,
        result_size,
        instructions,
    })
}

/// Largest up-front allocation made from a size declared in a delta.
const MAX_PREALLOC: usize = 1 << 20;

/// Reconstructs an object from its base and a delta.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let delta = parse_delta(delta)?;
    if delta.base_size != base.len() {
        return Err(corrupt(format!(
            "base is {} bytes, delta expects {}",
            base.len(),
            delta.base_size
        )));
    }

    let mut out = Vec::with_capacity(delta.result_size.min(MAX_PREALLOC));
    for instruction in &delta.instructions {
        match *instruction {
            DeltaInstruction::Copy { offset, len } => {
                let range = offset
                    .checked_add(len)
                    .and_then(|end| base.get(offset..end))
                    .ok_or_else(|| corrupt("copy outside base"))?;
                out.extend_from_slice(range);
            }
            DeltaInstruction::Insert(data) => out.extend_from_slice(data),
        }
        if out.len() > delta.result_size {
            return Err(corrupt("result overruns declared size"));
        }
    }

    if out.len() != delta.result_size {
        return Err(corrupt(format!(
            "result is {} bytes, delta declares {}",
            out.len(),
            delta.result_size
        )));
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Encodes a size varint.
    pub fn size(mut n: usize, out: &mut Vec<u8>) {
        loop {
            let byte = (n & 0x7f) as u8;
            n >>= 7;
            if n == 0 {
                out.push(byte);
                return;
            }
            out.push(byte | 0x80);
        }
    }

    /// Encodes a copy instruction with all offset and size bytes present.
    pub fn copy(offset: u32, len: u32, out: &mut Vec<u8>) {
        out.push(0x80 | 0x0f | 0x70);
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes()[..3]);
    }

    /// Encodes an insert instruction.
    pub fn insert(data: &[u8], out: &mut Vec<u8>) {
        for chunk in data.chunks(127) {
            out.push(chunk.len() as u8);
            out.extend_from_slice(chunk);
        }
    }

    /// Delta that keeps the first `keep` bytes of `base` and appends `tail`.
    pub fn prefix_delta(base: &[u8], keep: usize, tail: &[u8]) -> Vec<u8> {
        let mut delta = Vec::new();
        size(base.len(), &mut delta);
        size(keep + tail.len(), &mut delta);
        if keep > 0 {
            copy(0, keep as u32, &mut delta);
        }
        insert(tail, &mut delta);
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_copy_and_insert() {
        let base = b"hello world";
        let delta = prefix_delta(base, 6, b"rust");
        assert_eq!(apply_delta(base, &delta).unwrap(), b"hello rust");
    }

    #[test]
    fn test_sparse_copy_encoding() {
        // Copy with only offset byte 0 and size byte 0 present: 0x80|0x01|0x10.
        let base = b"0123456789";
        let delta = [10, 4, 0x91, 3, 4];
        assert_eq!(apply_delta(base, &delta).unwrap(), b"3456");
    }

    #[test]
    fn test_copy_size_zero_means_64k() {
        let base = vec![b'a'; 0x10000];
        let mut delta = Vec::new();
        size(base.len(), &mut delta);
        size(base.len(), &mut delta);
        delta.push(0x80);
        assert_eq!(apply_delta(&base, &delta).unwrap(), base);

        let parsed = parse_delta(&delta).unwrap();
        assert_eq!(parsed.instructions, vec![DeltaInstruction::Copy { offset: 0, len: 0x10000 }]);
    }

    #[test]
    fn test_base_size_mismatch() {
        let delta = prefix_delta(b"abc", 1, b"");
        assert!(matches!(apply_delta(b"abcd", &delta), Err(GitError::CorruptPack(_))));
    }

    #[test]
    fn test_result_size_mismatch() {
        let mut delta = Vec::new();
        size(3, &mut delta);
        size(10, &mut delta);
        insert(b"xy", &mut delta);
        assert!(apply_delta(b"abc", &delta).is_err());
    }

    #[test]
    fn test_huge_declared_result_size() {
        let mut delta = Vec::new();
        size(3, &mut delta);
        size(1 << 62, &mut delta);
        copy(0, 3, &mut delta);
        assert!(matches!(apply_delta(b"abc", &delta), Err(GitError::CorruptPack(_))));
    }

    #[test]
    fn test_copy_out_of_bounds() {
        let mut delta = Vec::new();
        size(3, &mut delta);
        size(5, &mut delta);
        copy(1, 5, &mut delta);
        assert!(apply_delta(b"abc", &delta).is_err());
    }

    #[test]
    fn test_reserved_opcode() {
        assert!(parse_delta(&[1, 1, 0]).is_err());
    }

    #[test]
    fn test_truncated() {
        assert!(parse_delta(&[]).is_err());
        assert!(parse_delta(&[0x80]).is_err());
        assert!(parse_delta(&[1, 5, 5, b'a']).is_err());
        assert!(parse_delta(&[1, 1, 0x81]).is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn apply_never_panics(
            base in prop::collection::vec(any::<u8>(), 0..256),
            delta in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let _ = apply_delta(&base, &delta);
        }

        #[test]
        fn prefix_delta_applies(
            base in prop::collection::vec(any::<u8>(), 1..512),
            tail in prop::collection::vec(any::<u8>(), 0..300),
            keep_frac in 0.0f64..=1.0,
        ) {
            let keep = ((base.len() as f64) * keep_frac) as usize;
            let delta = super::test_support::prefix_delta(&base, keep, &tail);
            let mut expected = base[..keep].to_vec();
            expected.extend_from_slice(&tail);
            prop_assert_eq!(apply_delta(&base, &delta).unwrap(), expected);
        }
    }
}
