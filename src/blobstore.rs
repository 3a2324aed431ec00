//! The blob store (§4.1, component A): an opaque byte store keyed by blob
//! id, outside the node tree.
//!
//! No deduplication, no in-memory caching contract - the filesystem (or,
//! for tests, a `HashMap`) is the cache.

mod fs;
mod memory;

use std::io::Read;

use camino::Utf8Path;

use crate::error::Result;
use crate::ids::BlobId;

pub use self::fs::FsBlobStore;
pub use memory::MemoryBlobStore;

pub trait BlobStore: Send + Sync {
    /// Writes `size` bytes from `reader` as the blob `id`. Implementations
    /// must leave no partial blob visible under `id` if this fails partway
    /// through (§4.5's "naming is the last step that makes a mutation
    /// visible" applies here too).
    fn upload(&self, id: &BlobId, reader: &mut dyn Read, size: u64) -> Result<()>;

    /// An optional fast path for a store whose blobs live on the same
    /// filesystem as `from`: move `from` into place as blob `id` instead
    /// of a full read-and-copy. Returns `Ok(true)` if it did so, `Ok(false)`
    /// if this store has no such fast path (the caller must fall back to
    /// `upload`). The default implementation always falls back.
    fn upload_by_rename(&self, _id: &BlobId, _from: &Utf8Path) -> Result<bool> {
        Ok(false)
    }

    /// Opens the blob `id` for reading. Fails with `not-found` if it
    /// doesn't exist.
    fn download(&self, id: &BlobId) -> Result<Box<dyn Read + Send>>;

    /// Removes the blob `id`. Not an error if it's already gone (purge may
    /// race a previous, interrupted purge).
    fn delete(&self, id: &BlobId) -> Result<()>;

    /// Free space available at the store's root, if the implementation can
    /// report one (a `MemoryBlobStore` can't).
    fn available_size(&self) -> Result<Option<u64>>;
}
