//! Git pack file format implementation.
//!
//! Pack files are the format used by git for efficient object transfer.
//! See: https://git-scm.com/docs/pack-format
//!
//! Packs are always written with full objects. Incoming packs may carry
//! `OFS_DELTA` and `REF_DELTA` entries, which are resolved before anything
//! reaches the store.

use crate::delta::apply_delta;
use crate::{GitError, Result};
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use knot_storage::{GitObject, ObjectId, ObjectStore, ObjectType};
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::io::Write;

/// Magic bytes at the start of a pack file.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Pack file version we support.
pub const PACK_VERSION: u32 = 2;

const HEADER_LEN: usize = 12;
const TRAILER_LEN: usize = 20;
const OFS_DELTA: u8 = 6;
const REF_DELTA: u8 = 7;

fn corrupt(msg: impl Into<String>) -> GitError {
    GitError::CorruptPack(msg.into())
}

/// Builds a pack file from a set of objects.
pub struct PackBuilder {
    objects: Vec<GitObject>,
    seen: HashSet<ObjectId>,
    level: Compression,
}

impl PackBuilder {
    /// Creates a new pack builder.
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            seen: HashSet::new(),
            level: Compression::default(),
        }
    }

    /// Sets the zlib level of pack entries.
    pub fn with_compression(mut self, level: Compression) -> Self {
        self.level = level;
        self
    }

    /// Adds an object to the pack. Objects already added are skipped.
    pub fn add(&mut self, object: GitObject) {
        if self.seen.insert(object.id) {
            self.objects.push(object);
        }
    }

    /// Adds an object from the store by ID.
    pub fn add_from_store(&mut self, store: &ObjectStore, id: &ObjectId) -> Result<()> {
        if self.seen.contains(id) {
            return Ok(());
        }
        let object = store
            .get_object(id)?
            .ok_or_else(|| GitError::ObjectNotFound(id.to_hex()))?;
        self.add(object);
        Ok(())
    }

    /// Number of objects queued.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Builds the pack file.
    pub fn build(self) -> Result<Vec<u8>> {
        let mut pack = Vec::new();

        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        let count = u32::try_from(self.objects.len())
            .map_err(|_| corrupt("too many objects for one pack"))?;
        pack.extend_from_slice(&count.to_be_bytes());

        for object in &self.objects {
            write_entry_header(&mut pack, object.object_type.pack_type(), object.data.len());
            let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
            encoder.write_all(&object.data)?;
            pack.extend_from_slice(&encoder.finish()?);
        }

        let checksum = Sha1::digest(&pack);
        pack.extend_from_slice(&checksum);

        tracing::debug!(objects = self.objects.len(), bytes = pack.len(), "built pack");
        Ok(pack)
    }
}

impl Default for PackBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes the type+size header: `MSB | type(3) | size(4)`, then 7-bit groups.
pub(crate) fn write_entry_header(pack: &mut Vec<u8>, type_code: u8, size: usize) {
    let mut byte = (type_code << 4) | (size & 0x0f) as u8;
    let mut rest = size >> 4;
    while rest > 0 {
        pack.push(byte | 0x80);
        byte = (rest & 0x7f) as u8;
        rest >>= 7;
    }
    pack.push(byte);
}

/// Encodes every object in `oids` (duplicates collapsed) as a pack.
pub fn create_packfile<'a>(
    store: &ObjectStore,
    oids: impl IntoIterator<Item = &'a ObjectId>,
) -> Result<Vec<u8>> {
    let mut builder = PackBuilder::new();
    for id in oids {
        builder.add_from_store(store, id)?;
    }
    builder.build()
}

/// Decodes a pack and stores its objects, returning their ids in pack order.
///
/// Nothing is written unless the whole pack decodes.
pub fn extract_packfile(store: &ObjectStore, pack: &[u8]) -> Result<Vec<ObjectId>> {
    PackParser::new(pack).parse(store)
}

/// Entry as read from the pack, before delta resolution.
enum RawEntry {
    Full(GitObject),
    OfsDelta { base_offset: usize, delta: Vec<u8> },
    RefDelta { base: ObjectId, delta: Vec<u8> },
}

/// Parses a pack file and extracts objects.
pub struct PackParser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PackParser<'a> {
    /// Creates a new pack parser.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Decodes and stores every object.
    pub fn parse(&mut self, store: &ObjectStore) -> Result<Vec<ObjectId>> {
        let objects = self.decode(store)?;
        let mut ids = Vec::with_capacity(objects.len());
        for object in objects {
            ids.push(store.put(object)?);
        }
        tracing::debug!(objects = ids.len(), "pack extracted");
        Ok(ids)
    }

    /// Decodes every object without writing. `store` only supplies bases
    /// for `REF_DELTA` entries whose base is not in the pack.
    pub fn decode(&mut self, store: &ObjectStore) -> Result<Vec<GitObject>> {
        let count = self.read_header()?;
        let body_end = self.data.len() - TRAILER_LEN;

        let mut entries = Vec::with_capacity(count.min(1024));
        let mut index_by_offset = HashMap::new();
        for _ in 0..count {
            let offset = self.pos;
            let entry = self.read_entry(offset, body_end)?;
            index_by_offset.insert(offset, entries.len());
            entries.push(entry);
        }
        if self.pos != body_end {
            return Err(corrupt(format!(
                "{} trailing bytes after last object",
                body_end - self.pos
            )));
        }

        resolve(entries, &index_by_offset, store)
    }

    /// Validates size, magic, version and checksum; returns the object count.
    fn read_header(&mut self) -> Result<usize> {
        if self.data.len() < HEADER_LEN + TRAILER_LEN {
            return Err(corrupt("pack too small"));
        }
        if &self.data[0..4] != PACK_SIGNATURE {
            return Err(corrupt("invalid signature"));
        }
        let version = u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]]);
        if version != PACK_VERSION {
            return Err(corrupt(format!("unsupported version: {}", version)));
        }

        let checksum_start = self.data.len() - TRAILER_LEN;
        let computed = Sha1::digest(&self.data[..checksum_start]);
        if computed.as_slice() != &self.data[checksum_start..] {
            return Err(corrupt("checksum mismatch"));
        }

        self.pos = HEADER_LEN;
        Ok(u32::from_be_bytes([self.data[8], self.data[9], self.data[10], self.data[11]]) as usize)
    }

    fn next_byte(&mut self, end: usize) -> Result<u8> {
        if self.pos >= end {
            return Err(corrupt("unexpected end of pack"));
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn read_entry(&mut self, offset: usize, end: usize) -> Result<RawEntry> {
        let first = self.next_byte(end)?;
        let type_code = (first >> 4) & 0x07;
        let mut size = (first & 0x0f) as usize;
        let mut shift = 4u32;
        let mut byte = first;
        while byte & 0x80 != 0 {
            byte = self.next_byte(end)?;
            if shift > 57 {
                return Err(corrupt("entry size overflows"));
            }
            size |= ((byte & 0x7f) as usize) << shift;
            shift += 7;
        }

        match type_code {
            OFS_DELTA => {
                let mut byte = self.next_byte(end)?;
                let mut distance = (byte & 0x7f) as usize;
                while byte & 0x80 != 0 {
                    byte = self.next_byte(end)?;
                    distance = distance
                        .checked_add(1)
                        .and_then(|d| d.checked_mul(128))
                        .map(|d| d | (byte & 0x7f) as usize)
                        .ok_or_else(|| corrupt("delta offset overflows"))?;
                }
                let base_offset = offset
                    .checked_sub(distance)
                    .filter(|base| *base >= HEADER_LEN && distance > 0)
                    .ok_or_else(|| corrupt(format!("delta at {} points before pack start", offset)))?;
                let delta = self.inflate(size, end)?;
                Ok(RawEntry::OfsDelta { base_offset, delta })
            }
            REF_DELTA => {
                let base_end = self.pos + ObjectId::LEN;
                if base_end > end {
                    return Err(corrupt("truncated delta base id"));
                }
                let base = ObjectId::from_slice(&self.data[self.pos..base_end])?;
                self.pos = base_end;
                let delta = self.inflate(size, end)?;
                Ok(RawEntry::RefDelta { base, delta })
            }
            code => {
                let object_type = ObjectType::from_pack_type(code)
                    .map_err(|_| corrupt(format!("unknown object type {} at {}", code, offset)))?;
                let data = self.inflate(size, end)?;
                Ok(RawEntry::Full(GitObject::new(object_type, data)))
            }
        }
    }

    /// Inflates one zlib stream that must produce exactly `expected` bytes,
    /// advancing past exactly the compressed bytes it consumed.
    fn inflate(&mut self, expected: usize, end: usize) -> Result<Vec<u8>> {
        let input = &self.data[self.pos..end];
        let mut decoder = Decompress::new(true);
        let mut out = Vec::with_capacity(expected.min(1 << 20));

        loop {
            if out.capacity() - out.len() < 256 {
                out.reserve(out.capacity().max(4096));
            }
            let (in_before, out_before) = (decoder.total_in(), decoder.total_out());
            let status = decoder
                .decompress_vec(&input[in_before as usize..], &mut out, FlushDecompress::None)
                .map_err(|e| corrupt(format!("zlib error at {}: {}", self.pos, e)))?;
            if out.len() > expected {
                return Err(corrupt(format!("object at {} inflates past {} bytes", self.pos, expected)));
            }
            match status {
                Status::StreamEnd => break,
                _ if decoder.total_in() == in_before && decoder.total_out() == out_before => {
                    return Err(corrupt(format!("truncated zlib stream at {}", self.pos)));
                }
                _ => {}
            }
        }

        if out.len() != expected {
            return Err(corrupt(format!(
                "object at {} is {} bytes, header says {}",
                self.pos,
                out.len(),
                expected
            )));
        }
        self.pos += decoder.total_in() as usize;
        Ok(out)
    }
}

/// Resolves delta entries until everything is a full object.
fn resolve(
    entries: Vec<RawEntry>,
    index_by_offset: &HashMap<usize, usize>,
    store: &ObjectStore,
) -> Result<Vec<GitObject>> {
    let mut resolved: Vec<Option<GitObject>> = Vec::with_capacity(entries.len());
    let mut pending = Vec::new();
    let mut index_by_id = HashMap::new();

    for (index, entry) in entries.into_iter().enumerate() {
        match entry {
            RawEntry::Full(object) => {
                index_by_id.insert(object.id, index);
                resolved.push(Some(object));
            }
            delta => {
                resolved.push(None);
                pending.push((index, delta));
            }
        }
    }

    // Ofs bases always precede their deltas, so most packs settle in one pass;
    // ref deltas may name a base that appears later.
    while !pending.is_empty() {
        let before = pending.len();
        let mut still_pending = Vec::new();

        for (index, entry) in pending {
            let base = match &entry {
                RawEntry::OfsDelta { base_offset, .. } => {
                    let base_index = index_by_offset.get(base_offset).ok_or_else(|| {
                        corrupt(format!("delta base offset {} is not an entry", base_offset))
                    })?;
                    resolved[*base_index].clone()
                }
                RawEntry::RefDelta { base, .. } => match index_by_id.get(base) {
                    Some(base_index) => resolved[*base_index].clone(),
                    None => store.get_object(base)?,
                },
                RawEntry::Full(_) => None,
            };

            let Some(base) = base else {
                still_pending.push((index, entry));
                continue;
            };
            let delta = match &entry {
                RawEntry::OfsDelta { delta, .. } | RawEntry::RefDelta { delta, .. } => delta,
                RawEntry::Full(_) => continue,
            };
            let object = GitObject::new(base.object_type, apply_delta(&base.data, delta)?);
            index_by_id.insert(object.id, index);
            resolved[index] = Some(object);
        }

        if still_pending.len() == before {
            let missing: Vec<String> = still_pending
                .iter()
                .filter_map(|(_, entry)| match entry {
                    RawEntry::RefDelta { base, .. } => Some(base.to_hex()),
                    _ => None,
                })
                .collect();
            return Err(corrupt(format!(
                "{} deltas with unresolvable bases {:?}",
                still_pending.len(),
                missing
            )));
        }
        pending = still_pending;
    }

    resolved
        .into_iter()
        .map(|object| object.ok_or_else(|| corrupt("unresolved entry")))
        .collect()
}
