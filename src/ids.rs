//! Identifiers used throughout the tree: node, blob, and upload-session ids,
//! plus the deterministic shard rule (§3) that fans them out on disk.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node's identity. Stable for the lifetime of the node, including through
/// trash (`<id>.T.<ts>`) and revisioning (`<id>.REV.<ts>`) - those just
/// rename the on-disk directory, they don't mint a new id.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NodeId(Uuid);

/// A blob's identity. Typically the id of the upload that produced it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BlobId(Uuid);

/// A transient upload session's identity.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct UploadId(Uuid);

macro_rules! uuid_id {
    ($t:ident) => {
        impl $t {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $t {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $t {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }
    };
}

uuid_id!(NodeId);
uuid_id!(BlobId);
uuid_id!(UploadId);

/// A sentinel parent id used on space-root nodes, which have no parent node
/// of their own (§3, `parentid`).
pub const ROOT_SENTINEL: &str = "root";

/// Deterministic fan-out of an id's hex digits into four nested shard
/// directories, e.g. `2222xxxx...` -> `2/2/2/2`.
///
/// This gives us `16^4 = 65536` leaf directories, each with at most a
/// handful of nodes even at millions-of-objects scale, keeping every
/// directory listing fast regardless of backend.
pub fn shard(id: &NodeId) -> [char; 4] {
    shard_hex(&id.as_uuid().simple().to_string())
}

pub fn shard_blob(id: &BlobId) -> [char; 4] {
    shard_hex(&id.as_uuid().simple().to_string())
}

fn shard_hex(hex: &str) -> [char; 4] {
    let mut chars = hex.chars();
    [
        chars.next().expect("uuid hex is non-empty"),
        chars.next().expect("uuid hex has >= 2 chars"),
        chars.next().expect("uuid hex has >= 3 chars"),
        chars.next().expect("uuid hex has >= 4 chars"),
    ]
}

/// Joins a shard into the `a/b/c/d` path fragment used under `nodes/` and
/// `blobs/`.
pub fn shard_path(shard: [char; 4]) -> camino::Utf8PathBuf {
    let mut p = camino::Utf8PathBuf::new();
    for c in shard {
        p.push(c.to_string());
    }
    p
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shard_is_deterministic() {
        let id = NodeId::new();
        assert_eq!(shard(&id), shard(&id));
    }

    #[test]
    fn round_trip() {
        let id = NodeId::new();
        let s = id.to_string();
        let parsed: NodeId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }
}
