//! Parsed views of tree, commit and tag objects.
//!
//! These are pure functions over object content (the bytes after the
//! `"<type> <size>\0"` header). They do no I/O.

use crate::{ObjectId, ObjectType, Result, StorageError};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashSet;

/// What a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Subdirectory (mode `40000`).
    Tree,
    /// Regular file, executable or symlink.
    Blob,
    /// Submodule commit (mode `160000`). Never followed.
    Gitlink,
}

impl EntryKind {
    fn from_mode(mode: &str) -> Result<Self> {
        if mode.is_empty() || !mode.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            return Err(StorageError::Parse(format!("invalid tree entry mode: {:?}", mode)));
        }
        match mode {
            "40000" | "040000" => Ok(Self::Tree),
            "160000" => Ok(Self::Gitlink),
            m if m.starts_with("10") || m.starts_with("12") => Ok(Self::Blob),
            m => Err(StorageError::Parse(format!("unsupported tree entry mode: {}", m))),
        }
    }
}

/// One entry of a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// File mode as written in the tree (e.g. `100644`, `40000`).
    pub mode: String,
    /// Path segment. Git stores raw bytes, not necessarily UTF-8.
    pub name: Vec<u8>,
    /// Entry kind derived from the mode.
    pub kind: EntryKind,
    /// Target object.
    pub id: ObjectId,
}

impl TreeEntry {
    /// Creates an entry.
    pub fn new(mode: impl Into<String>, name: impl Into<Vec<u8>>, kind: EntryKind, id: ObjectId) -> Self {
        Self {
            mode: mode.into(),
            name: name.into(),
            kind,
            id,
        }
    }

    /// Name for display, with invalid UTF-8 replaced.
    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    /// Object type of the target, `None` for gitlinks.
    pub fn object_type(&self) -> Option<ObjectType> {
        match self.kind {
            EntryKind::Tree => Some(ObjectType::Tree),
            EntryKind::Blob => Some(ObjectType::Blob),
            EntryKind::Gitlink => None,
        }
    }
}

/// Parses the binary tree layout: repeated `<mode> SP <name> NUL <20-byte id>`.
pub fn parse_tree(content: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut names = HashSet::new();
    let mut rest = content;

    while !rest.is_empty() {
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| StorageError::Parse("tree entry missing mode separator".to_string()))?;
        let mode = std::str::from_utf8(&rest[..space])
            .map_err(|_| StorageError::Parse("tree entry mode is not ascii".to_string()))?;
        let kind = EntryKind::from_mode(mode)?;
        rest = &rest[space + 1..];

        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| StorageError::Parse("tree entry missing name terminator".to_string()))?;
        let name = &rest[..nul];
        if name.is_empty() || name.contains(&b'/') {
            return Err(StorageError::Parse(format!(
                "invalid tree entry name: {:?}",
                String::from_utf8_lossy(name)
            )));
        }
        rest = &rest[nul + 1..];

        if rest.len() < ObjectId::LEN {
            return Err(StorageError::Parse("tree entry id truncated".to_string()));
        }
        let id = ObjectId::from_slice(&rest[..ObjectId::LEN])?;
        rest = &rest[ObjectId::LEN..];

        if !names.insert(name) {
            return Err(StorageError::Parse(format!(
                "duplicate tree entry: {}",
                String::from_utf8_lossy(name)
            )));
        }
        entries.push(TreeEntry::new(mode, name, kind, id));
    }

    Ok(entries)
}

/// Orders entries the way git does: trees compare as if their name ended in `/`.
fn tree_order(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    let key = |e: &TreeEntry| {
        let mut k = e.name.clone();
        if e.kind == EntryKind::Tree {
            k.push(b'/');
        }
        k
    };
    key(a).cmp(&key(b))
}

/// Serializes entries into canonical tree content.
pub fn encode_tree(entries: &[TreeEntry]) -> Vec<u8> {
    let mut sorted: Vec<&TreeEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| tree_order(a, b));

    let mut data = Vec::new();
    for entry in sorted {
        data.extend_from_slice(entry.mode.as_bytes());
        data.push(b' ');
        data.extend_from_slice(&entry.name);
        data.push(0);
        data.extend_from_slice(entry.id.as_bytes());
    }
    data
}

/// Parsed view of a commit object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Root tree.
    pub tree: ObjectId,
    /// Parents in header order. Empty for a root commit.
    pub parents: Vec<ObjectId>,
    /// Author identity line, lossily decoded when not UTF-8.
    pub author: String,
    /// Committer identity line, lossily decoded when not UTF-8.
    pub committer: String,
    /// Everything after the blank line.
    pub message: String,
}

impl Commit {
    /// First line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// True for merge commits.
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// Splits object content into header lines and message.
fn split_headers(content: &[u8]) -> (&[u8], &[u8]) {
    match content.windows(2).position(|w| w == b"\n\n") {
        Some(pos) => (&content[..pos], &content[pos + 2..]),
        None => (content.strip_suffix(b"\n").unwrap_or(content), &[]),
    }
}

/// Iterates `(key, value)` header pairs, skipping continuation lines.
///
/// Keys are ASCII. Values stay raw: identity lines may be in the encoding
/// named by an `encoding` header.
fn header_fields<'a>(headers: &'a [u8]) -> impl Iterator<Item = Result<(&'a str, &'a [u8])>> + 'a {
    headers
        .split(|&b| b == b'\n')
        .filter(|line| !line.starts_with(b" ") && !line.is_empty())
        .map(|line| {
            let space = line.iter().position(|&b| b == b' ').ok_or_else(|| {
                StorageError::Parse(format!(
                    "malformed header line: {:?}",
                    String::from_utf8_lossy(line)
                ))
            })?;
            let key = std::str::from_utf8(&line[..space])
                .ok()
                .filter(|key| key.is_ascii())
                .ok_or_else(|| StorageError::Parse("header key is not ascii".to_string()))?;
            Ok((key, &line[space + 1..]))
        })
}

fn header_str<'a>(value: &'a [u8], field: &str) -> Result<&'a str> {
    std::str::from_utf8(value)
        .map_err(|_| StorageError::Parse(format!("{} header is not ascii", field)))
}

fn header_id(value: &[u8], field: &str) -> Result<ObjectId> {
    let value = header_str(value, field)?;
    ObjectId::from_hex(value)
        .map_err(|_| StorageError::Parse(format!("invalid {} id: {:?}", field, value)))
}

fn lossy(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

/// Parses commit content.
pub fn parse_commit(content: &[u8]) -> Result<Commit> {
    let (headers, message) = split_headers(content);

    let mut tree = None;
    let mut parents = Vec::new();
    let mut author = None;
    let mut committer = None;

    for (index, field) in header_fields(headers).enumerate() {
        let (key, value) = field?;
        match key {
            "tree" => {
                if index != 0 || tree.is_some() {
                    return Err(StorageError::Parse("tree header must come first".to_string()));
                }
                tree = Some(header_id(value, "tree")?);
            }
            "parent" => parents.push(header_id(value, "parent")?),
            "author" => {
                if author.replace(lossy(value)).is_some() {
                    return Err(StorageError::Parse("duplicate author header".to_string()));
                }
            }
            "committer" => {
                if committer.replace(lossy(value)).is_some() {
                    return Err(StorageError::Parse("duplicate committer header".to_string()));
                }
            }
            // gpgsig, encoding, mergetag and friends
            _ => {}
        }
    }

    Ok(Commit {
        tree: tree.ok_or_else(|| StorageError::Parse("commit has no tree".to_string()))?,
        parents,
        author: author.ok_or_else(|| StorageError::Parse("commit has no author".to_string()))?,
        committer: committer
            .ok_or_else(|| StorageError::Parse("commit has no committer".to_string()))?,
        message: String::from_utf8_lossy(message).into_owned(),
    })
}

/// Parsed view of an annotated tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Tagged object.
    pub object: ObjectId,
    /// Type of the tagged object.
    pub kind: ObjectType,
    /// Tag name.
    pub name: String,
    /// Tagger identity line, absent on very old tags.
    pub tagger: Option<String>,
    /// Tag message.
    pub message: String,
}

/// Parses tag content.
pub fn parse_tag(content: &[u8]) -> Result<Tag> {
    let (headers, message) = split_headers(content);

    let mut object = None;
    let mut kind = None;
    let mut name = None;
    let mut tagger = None;

    for field in header_fields(headers) {
        let (key, value) = field?;
        match key {
            "object" => object = Some(header_id(value, "object")?),
            "type" => {
                let value = header_str(value, "type")?;
                kind = Some(
                    ObjectType::parse(value)
                        .map_err(|_| StorageError::Parse(format!("invalid tag type: {}", value)))?,
                )
            }
            "tag" => name = Some(lossy(value)),
            "tagger" => tagger = Some(lossy(value)),
            _ => {}
        }
    }

    Ok(Tag {
        object: object.ok_or_else(|| StorageError::Parse("tag has no object".to_string()))?,
        kind: kind.ok_or_else(|| StorageError::Parse("tag has no type".to_string()))?,
        name: name.ok_or_else(|| StorageError::Parse("tag has no name".to_string()))?,
        tagger,
        message: String::from_utf8_lossy(message).into_owned(),
    })
}
