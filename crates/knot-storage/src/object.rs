//! Git object identifiers, kinds and envelopes.

use crate::parse::{encode_tree, TreeEntry};
use crate::{Result, StorageError};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

/// A 20-byte SHA-1 object identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl ObjectId {
    /// The all-zero id. Git uses it on the wire to mean "no object":
    /// the old side of a create, the new side of a delete.
    pub const ZERO: ObjectId = ObjectId([0u8; 20]);

    /// Length of the raw id in bytes.
    pub const LEN: usize = 20;

    /// Length of the hex form.
    pub const HEX_LEN: usize = 40;

    /// Creates an ObjectId from raw bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Creates an ObjectId from a 20-byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 20] = bytes.try_into().map_err(|_| {
            StorageError::InvalidObject(format!("invalid raw object id length: {}", bytes.len()))
        })?;
        Ok(Self(raw))
    }

    /// Creates an ObjectId from a hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != Self::HEX_LEN {
            return Err(StorageError::InvalidObject(format!(
                "invalid object id length: {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|e| StorageError::InvalidObject(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// True for the all-zero sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Computes the SHA-1 hash of data with a git object header.
    pub fn hash_object(object_type: ObjectType, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(object_type.header(data.len()).as_bytes());
        hasher.update(data);
        Self(hasher.finalize().into())
    }
}

impl FromStr for ObjectId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Git object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    /// Commit object.
    Commit,
    /// Annotated tag.
    Tag,
    /// Directory listing.
    Tree,
    /// File content.
    Blob,
}

impl ObjectType {
    /// Returns the string representation used in git.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }

    /// Parses an object type from a string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(Self::Blob),
            "tree" => Ok(Self::Tree),
            "commit" => Ok(Self::Commit),
            "tag" => Ok(Self::Tag),
            _ => Err(StorageError::InvalidObject(format!(
                "unknown object type: {}",
                s
            ))),
        }
    }

    /// The loose-object header `"<type> <size>\0"`.
    pub fn header(&self, size: usize) -> String {
        format!("{} {}\0", self.as_str(), size)
    }

    /// Returns the type code used in pack files.
    pub fn pack_type(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }

    /// Parses an object type from a pack file type code.
    pub fn from_pack_type(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::Commit),
            2 => Ok(Self::Tree),
            3 => Ok(Self::Blob),
            4 => Ok(Self::Tag),
            _ => Err(StorageError::InvalidObject(format!(
                "unknown pack type: {}",
                code
            ))),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A git object (blob, tree, commit, or tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitObject {
    /// The object's unique identifier (SHA-1 hash).
    pub id: ObjectId,
    /// The type of object.
    pub object_type: ObjectType,
    /// The raw object data (uncompressed, without header).
    pub data: Bytes,
}

impl GitObject {
    /// Creates a new git object, computing its ID from the data.
    pub fn new(object_type: ObjectType, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let id = ObjectId::hash_object(object_type, &data);
        Self {
            id,
            object_type,
            data,
        }
    }

    /// Creates a blob object from file content.
    pub fn blob(content: impl Into<Bytes>) -> Self {
        Self::new(ObjectType::Blob, content)
    }

    /// Creates a tree object from entries, sorted the way git sorts them.
    pub fn tree(entries: &[TreeEntry]) -> Self {
        Self::new(ObjectType::Tree, encode_tree(entries))
    }

    /// Creates a commit object.
    ///
    /// `author` and `committer` are full identity lines such as
    /// `Alice <alice@example.com> 1700000000 +0000`.
    pub fn commit(
        tree_id: &ObjectId,
        parents: &[ObjectId],
        author: &str,
        committer: &str,
        message: &str,
    ) -> Self {
        let mut content = format!("tree {}\n", tree_id);
        for parent in parents {
            content.push_str(&format!("parent {}\n", parent));
        }
        content.push_str(&format!("author {}\n", author));
        content.push_str(&format!("committer {}\n", committer));
        content.push_str(&format!("\n{}", message));
        Self::new(ObjectType::Commit, content.into_bytes())
    }

    /// Creates an annotated tag object.
    pub fn tag(target: &ObjectId, target_type: ObjectType, name: &str, tagger: &str, message: &str) -> Self {
        let content = format!(
            "object {}\ntype {}\ntag {}\ntagger {}\n\n{}",
            target, target_type, name, tagger, message
        );
        Self::new(ObjectType::Tag, content.into_bytes())
    }

    /// Returns the size of the object data.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Recomputes the id from type and content.
    pub fn verify(&self) -> Result<()> {
        let computed = ObjectId::hash_object(self.object_type, &self.data);
        if computed != self.id {
            return Err(StorageError::Integrity(format!(
                "object claims id {} but hashes to {}",
                self.id, computed
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::EntryKind;

    #[test]
    fn test_object_id_hex_roundtrip() {
        let hex = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        let id = ObjectId::from_hex(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
        assert_eq!(hex.parse::<ObjectId>().unwrap(), id);
    }

    #[test]
    fn test_blob_hash() {
        // Same id `git hash-object` prints for "hello\n".
        let obj = GitObject::blob(b"hello\n".to_vec());
        assert_eq!(obj.id.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn test_empty_blob_and_tree_hashes() {
        assert_eq!(
            GitObject::blob(Vec::new()).id.to_hex(),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
        assert_eq!(
            GitObject::tree(&[]).id.to_hex(),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
        );
    }

    #[test]
    fn test_zero_id() {
        assert!(ObjectId::ZERO.is_zero());
        assert_eq!(ObjectId::ZERO.to_hex(), "0".repeat(40));
        assert!(!ObjectId::from_bytes([1u8; 20]).is_zero());
    }

    #[test]
    fn test_from_slice() {
        let id = ObjectId::from_slice(&[7u8; 20]).unwrap();
        assert_eq!(*id.as_bytes(), [7u8; 20]);
        assert!(ObjectId::from_slice(&[7u8; 19]).is_err());
    }

    #[test]
    fn test_object_id_invalid_hex() {
        assert!(ObjectId::from_hex("abc").is_err());
        assert!(ObjectId::from_hex("a94a8fe5ccb19ba61c4c0873d391e987982fbbd3ff").is_err());
        assert!(ObjectId::from_hex(&"z".repeat(40)).is_err());
    }

    #[test]
    fn test_object_id_debug_display() {
        let id = ObjectId::from_bytes([0u8; 20]);
        assert_eq!(format!("{}", id), "0".repeat(40));
        assert!(format!("{:?}", id).starts_with("ObjectId("));
    }

    #[test]
    fn test_object_type_roundtrips() {
        for ot in [
            ObjectType::Blob,
            ObjectType::Tree,
            ObjectType::Commit,
            ObjectType::Tag,
        ] {
            assert_eq!(ObjectType::parse(ot.as_str()).unwrap(), ot);
            assert_eq!(ObjectType::from_pack_type(ot.pack_type()).unwrap(), ot);
        }
        assert!(ObjectType::parse("invalid").is_err());
        assert!(ObjectType::from_pack_type(0).is_err());
        assert!(ObjectType::from_pack_type(6).is_err());
    }

    #[test]
    fn test_header() {
        assert_eq!(ObjectType::Blob.header(4), "blob 4\0");
        assert_eq!(ObjectType::Commit.header(0), "commit 0\0");
    }

    #[test]
    fn test_git_object_commit_layout() {
        let tree_id = ObjectId::from_bytes([1u8; 20]);
        let parents = vec![ObjectId::from_bytes([2u8; 20]), ObjectId::from_bytes([3u8; 20])];
        let author = "Alice <alice@example.com> 1234567890 +0000";

        let obj = GitObject::commit(&tree_id, &parents, author, author, "Merge");

        assert_eq!(obj.object_type, ObjectType::Commit);
        let content = String::from_utf8_lossy(&obj.data);
        assert!(content.starts_with(&format!("tree {}\n", tree_id)));
        assert!(content.contains(&format!("parent {}\n", parents[0])));
        assert!(content.contains(&format!("parent {}\n", parents[1])));
        assert!(content.ends_with("\n\nMerge"));
    }

    #[test]
    fn test_git_object_tree_sorted() {
        let blob = GitObject::blob(b"x".to_vec());
        let tree = GitObject::tree(&[
            TreeEntry::new("100644", "b.txt", EntryKind::Blob, blob.id),
            TreeEntry::new("100644", "a.txt", EntryKind::Blob, blob.id),
        ]);
        let a = tree.data.windows(5).position(|w| w == b"a.txt").unwrap();
        let b = tree.data.windows(5).position(|w| w == b"b.txt").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let mut obj = GitObject::blob(b"data".to_vec());
        assert!(obj.verify().is_ok());

        obj.data = Bytes::from_static(b"other");
        assert!(matches!(obj.verify(), Err(StorageError::Integrity(_))));
    }

    #[test]
    fn test_object_id_serialization() {
        let id = ObjectId::from_bytes([0xab; 20]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(20)));
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
