//! The metadata backend (§4.2, component B): read/write/list/remove named
//! attributes on a path, with an atomic multi-set.
//!
//! Per the design note in §9 ("dynamic dispatch over multiple metadata
//! backends is a single small capability set"), we model this as a trait
//! chosen once at startup, not sprinkled through the rest of the engine.
//! The real filesystem backend (user xattrs) is the primary implementation;
//! the sidecar backend is the fallback for filesystems that don't support
//! them.

mod sidecar;
mod xattr_backend;

use std::collections::BTreeMap;

use camino::Utf8Path;

use crate::error::{Result, not_found};

pub use sidecar::SidecarBackend;
pub use xattr_backend::XattrBackend;

pub type Attrs = BTreeMap<String, Vec<u8>>;

/// The five operations of §4.2, plus `all`/`get_int64` conveniences that
/// every caller needs and that would otherwise be reimplemented at every
/// call site.
pub trait MetadataBackend: Send + Sync {
    /// All attributes set on `path`.
    fn all(&self, path: &Utf8Path) -> Result<Attrs>;

    /// A single attribute's raw bytes. Fails with `not-found` if `path`
    /// doesn't exist, and a distinct `not-found` (naming the key) if the
    /// attribute itself isn't set (§4.2: "`get` on a missing key fails with
    /// `no-attribute`").
    fn get(&self, path: &Utf8Path, key: &str) -> Result<Vec<u8>>;

    /// The keys set on `path`, without their values.
    fn list(&self, path: &Utf8Path) -> Result<Vec<String>>;

    /// Sets a single attribute.
    fn set(&self, path: &Utf8Path, key: &str, val: &[u8]) -> Result<()>;

    /// Sets several attributes at once. When `take_lock` is true, this is
    /// atomic with respect to other writers on the same path (§4.2): we
    /// take an advisory lock, merge into the current state, and write back.
    fn set_multiple(&self, path: &Utf8Path, attrs: &Attrs, take_lock: bool) -> Result<()>;

    /// Removes a single attribute. Not an error if it was already absent.
    fn remove(&self, path: &Utf8Path, key: &str) -> Result<()>;

    /// Moves a path's attributes from `old` to `new` (following a node
    /// rename/trash/restore).
    fn rename(&self, old: &Utf8Path, new: &Utf8Path) -> Result<()>;

    /// Drops every attribute associated with `path` (following a node's
    /// final removal).
    fn purge(&self, path: &Utf8Path) -> Result<()>;
}

/// `get`, parsed as a decimal i64 - used for `treesize`, `quota`, and other
/// numeric xattrs.
pub fn get_int64(backend: &dyn MetadataBackend, path: &Utf8Path, key: &str) -> Result<i64> {
    let raw = backend.get(path, key)?;
    let s = String::from_utf8(raw)
        .map_err(|_| crate::error::internal(format!("{key} on {path} isn't valid UTF-8")))?;
    s.trim()
        .parse::<i64>()
        .map_err(|_| crate::error::internal(format!("{key} on {path} isn't an integer: {s}")))
}

/// A one-shot whole-tree migration from one metadata backend to another
/// (§4.2: "migration from one form to the other is a one-shot whole-tree
/// conversion driven by the migrator"). Copies every attribute on every
/// path, leaving the source backend untouched.
pub fn migrate(
    from: &dyn MetadataBackend,
    to: &dyn MetadataBackend,
    paths: impl IntoIterator<Item = impl AsRef<Utf8Path>>,
) -> Result<()> {
    for path in paths {
        let path = path.as_ref();
        let attrs = match from.all(path) {
            Ok(attrs) => attrs,
            Err(e) if e.kind() == "not-found" => continue,
            Err(e) => return Err(e),
        };
        if !attrs.is_empty() {
            to.set_multiple(path, &attrs, true)?;
        }
    }
    Ok(())
}

pub(crate) fn missing_attribute(path: &Utf8Path, key: &str) -> crate::error::StorageError {
    not_found(format!("attribute {key} on {path}"))
}
