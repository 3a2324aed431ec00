//! Node (§4.3, component C): the in-memory handle for one on-disk node
//! directory. Computes its own internal path, reads and writes its own
//! xattrs, and resolves parent/child/owner/permission/lock state.

use std::sync::Arc;

use camino::Utf8PathBuf;
use jiff::Timestamp;
use tracing::*;

use crate::context::Context;
use crate::error::{Result, already_exists, bad_request, internal, locked};
use crate::grant::{Capabilities, GrantSet, Principal};
use crate::ids::{NodeId, ROOT_SENTINEL, shard, shard_path};
use crate::lock::LockRecord;
use crate::metadata::get_int64;

/// The xattr keys a node carries (§3). Centralized here so every other
/// component spells a key the same way.
pub mod keys {
    pub const PARENT_ID: &str = "parentid";
    pub const NAME: &str = "name";
    pub const TYPE: &str = "type";
    pub const OWNER_ID: &str = "owner.id";
    pub const OWNER_IDP: &str = "owner.idp";
    pub const OWNER_TYPE: &str = "owner.type";
    pub const BLOB_ID: &str = "blobid";
    pub const BLOB_SIZE: &str = "blobsize";
    pub const CHECKSUM_SHA1: &str = "checksum.sha1";
    pub const CHECKSUM_MD5: &str = "checksum.md5";
    pub const CHECKSUM_ADLER32: &str = "checksum.adler32";
    pub const MTIME: &str = "mtime";
    pub const TMTIME: &str = "tmtime";
    pub const TREE_SIZE: &str = "treesize";
    pub const PROPAGATION: &str = "propagation";
    pub const QUOTA: &str = "quota";
    pub const REFERENCE: &str = "reference";
    pub const TRASH_ORIGIN: &str = "trashorigin";
    pub const SPACE_NAME: &str = "space.name";
    pub const SPACE_DESCRIPTION: &str = "space.description";
    pub const SPACE_IMAGE: &str = "space.image";
    pub const SPACE_README: &str = "space.readme";
    pub const LOCK: &str = "lock";
    pub const PROCESSING: &str = "processing";
}

/// `§3: quota` sentinel values.
pub use crate::config::{QUOTA_UNCALCULATED, QUOTA_UNKNOWN, QUOTA_UNLIMITED};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeType {
    File,
    Directory,
    Reference,
}

impl NodeType {
    fn as_str(self) -> &'static str {
        match self {
            NodeType::File => "file",
            NodeType::Directory => "directory",
            NodeType::Reference => "reference",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(NodeType::File),
            "directory" => Ok(NodeType::Directory),
            "reference" => Ok(NodeType::Reference),
            other => Err(bad_request(format!("unknown node type {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Owner {
    pub id: String,
    pub idp: String,
    pub kind: String,
}

/// The public descriptor assembled from a node's xattrs (§4.3
/// `as_resource_info`). Front-end wire encoding is out of scope; this is
/// the data a front-end would serialize.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub id: NodeId,
    pub name: String,
    pub node_type: NodeType,
    pub size: u64,
    pub owner: Owner,
    pub etag: String,
    pub permissions: Capabilities,
    pub path: camino::Utf8PathBuf,
}

/// Which on-disk directory a `Node` handle names: the live node, a
/// trashed one, or a historical revision. All three share the node's
/// shard directory (I2, I3 of invariants).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Variant {
    Live,
    Trashed(String),
    Revision(String),
}

impl Variant {
    fn suffix(&self) -> String {
        match self {
            Variant::Live => String::new(),
            Variant::Trashed(ts) => format!(".T.{ts}"),
            Variant::Revision(ts) => format!(".REV.{ts}"),
        }
    }
}

#[derive(Clone)]
pub struct Node {
    ctx: Arc<Context>,
    id: NodeId,
    variant: Variant,
}

impl Node {
    pub fn live(ctx: Arc<Context>, id: NodeId) -> Self {
        Self {
            ctx,
            id,
            variant: Variant::Live,
        }
    }

    pub fn with_variant(ctx: Arc<Context>, id: NodeId, variant: Variant) -> Self {
        Self { ctx, id, variant }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    pub fn ctx(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// The directory holding this node's own directory (its shard dir
    /// under `nodes/`), used both to compute `internal_path` and to place
    /// sibling trash/revision entries (§3: "colocated in the same shard").
    pub fn shard_dir(&self) -> Utf8PathBuf {
        self.ctx.nodes_root().join(shard_path(shard(&self.id)))
    }

    /// `§4.3: computes internal_path from id and shard rule`.
    pub fn internal_path(&self) -> Utf8PathBuf {
        self.shard_dir()
            .join(format!("{}{}", self.id, self.variant.suffix()))
    }

    /// A sibling path for this node with the given variant, e.g. to name
    /// a new revision or trash entry.
    pub fn sibling_path(&self, variant: &Variant) -> Utf8PathBuf {
        self.shard_dir().join(format!("{}{}", self.id, variant.suffix()))
    }

    pub fn exists(&self) -> bool {
        self.internal_path().is_dir()
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.ctx.metadata.get(&self.internal_path(), key)
    }

    fn get_string(&self, key: &str) -> Result<String> {
        String::from_utf8(self.get(key)?)
            .map_err(|_| internal(format!("{key} on {} isn't valid UTF-8", self.id)))
    }

    fn get_int64(&self, key: &str) -> Result<i64> {
        get_int64(self.ctx.metadata.as_ref(), &self.internal_path(), key)
    }

    fn set(&self, key: &str, val: &[u8]) -> Result<()> {
        self.ctx.metadata.set(&self.internal_path(), key, val)
    }

    pub fn name(&self) -> Result<String> {
        self.get_string(keys::NAME)
    }

    pub fn node_type(&self) -> Result<NodeType> {
        NodeType::parse(&self.get_string(keys::TYPE)?)
    }

    pub fn is_dir(&self) -> Result<bool> {
        Ok(self.node_type()? == NodeType::Directory)
    }

    /// A pending asynchronous-upload marker is present (§4.8 "marks the
    /// live node with a processing status attribute").
    pub fn is_processing(&self) -> Result<bool> {
        match self.get(keys::PROCESSING) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == "not-found" => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn parent_id(&self) -> Result<Option<NodeId>> {
        let raw = self.get_string(keys::PARENT_ID)?;
        if raw == ROOT_SENTINEL {
            Ok(None)
        } else {
            raw.parse()
                .map(Some)
                .map_err(|_| internal(format!("parentid {raw:?} on {} isn't a uuid", self.id)))
        }
    }

    /// `§4.3: resolve parent()`.
    pub fn parent(&self) -> Result<Option<Node>> {
        Ok(self
            .parent_id()?
            .map(|id| Node::live(Arc::clone(&self.ctx), id)))
    }

    /// `§4.3: resolve child(name) via the child symlink`.
    pub fn child(&self, name: &str) -> Result<Option<Node>> {
        let link = self.internal_path().join(name);
        let target = match std::fs::read_link(&link) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(internal(format!("reading child symlink {link}: {e}"))),
        };
        let id_component = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| internal(format!("child symlink {link} has no file name")))?;
        let id: NodeId = id_component
            .parse()
            .map_err(|_| internal(format!("child symlink {link} targets non-uuid {id_component:?}")))?;
        Ok(Some(Node::live(Arc::clone(&self.ctx), id)))
    }

    /// Creates the child symlink `<child_name> -> ../../../../../<shard>/<id>`
    /// (§3). Atomic via the underlying `symlink(2)`, which fails with
    /// `EEXIST` if the name is already taken.
    pub fn add_child_symlink(&self, name: &str, child: &Node) -> Result<()> {
        let link = self.internal_path().join(name);
        let target = relative_symlink_target(&self.internal_path(), &child.internal_path())?;
        match std::os::unix::fs::symlink(&target, &link) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(already_exists(format!("child {name:?} of {}", self.id)))
            }
            Err(e) => Err(internal(format!("creating child symlink {link}: {e}"))),
        }
    }

    pub fn remove_child_symlink(&self, name: &str) -> Result<()> {
        let link = self.internal_path().join(name);
        match std::fs::remove_file(&link) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(internal(format!("removing child symlink {link}: {e}"))),
        }
    }

    /// Atomically moves a child symlink from this node to `new_parent`
    /// under `new_name`, used by `tree::move` (§4.5).
    pub fn rename_child_symlink(
        &self,
        old_name: &str,
        new_parent: &Node,
        new_name: &str,
    ) -> Result<()> {
        let old = self.internal_path().join(old_name);
        let new = new_parent.internal_path().join(new_name);
        std::fs::rename(&old, &new)
            .map_err(|e| internal(format!("renaming child symlink {old} to {new}: {e}")))
    }

    pub fn owner(&self) -> Result<Owner> {
        Ok(Owner {
            id: self.get_string(keys::OWNER_ID)?,
            idp: self.get_string(keys::OWNER_IDP)?,
            kind: self.get_string(keys::OWNER_TYPE)?,
        })
    }

    pub fn blob_id(&self) -> Result<Option<crate::ids::BlobId>> {
        match self.get_string(keys::BLOB_ID) {
            Ok(s) if s.is_empty() => Ok(None),
            Ok(s) => s
                .parse()
                .map(Some)
                .map_err(|_| internal(format!("blobid {s:?} on {} isn't a uuid", self.id))),
            Err(e) if e.kind() == "not-found" => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn blob_size(&self) -> Result<u64> {
        match self.get_int64(keys::BLOB_SIZE) {
            Ok(n) => Ok(n.max(0) as u64),
            Err(e) if e.kind() == "not-found" => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn checksums(&self) -> Result<Option<crate::hashing::Checksums>> {
        if self.get(keys::CHECKSUM_SHA1).is_err() {
            return Ok(None);
        }
        let sha1: [u8; 20] = self
            .get(keys::CHECKSUM_SHA1)?
            .try_into()
            .map_err(|_| internal("checksum.sha1 isn't 20 bytes"))?;
        let md5 = self.get(keys::CHECKSUM_MD5)?;
        let adler32 = u32::from_be_bytes(
            self.get(keys::CHECKSUM_ADLER32)?
                .try_into()
                .map_err(|_| internal("checksum.adler32 isn't 4 bytes"))?,
        );
        Ok(Some(crate::hashing::Checksums { sha1, md5, adler32 }))
    }

    pub fn set_checksums(&self, checksums: &crate::hashing::Checksums) -> Result<()> {
        self.set(keys::CHECKSUM_SHA1, &checksums.sha1)?;
        self.set(keys::CHECKSUM_MD5, &checksums.md5)?;
        self.set(keys::CHECKSUM_ADLER32, &checksums.adler32.to_be_bytes())
    }

    /// The modification time used to order revisions (§4.8 step 3: "set
    /// its mtime to the previous mtime").
    pub fn mtime(&self) -> Result<Option<Timestamp>> {
        match self.get_string(keys::MTIME) {
            Ok(s) => s
                .parse()
                .map(Some)
                .map_err(|_| internal(format!("mtime {s:?} on {} isn't rfc3339", self.id))),
            Err(e) if e.kind() == "not-found" => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn set_mtime(&self, t: Timestamp) -> Result<()> {
        self.set(keys::MTIME, t.to_string().as_bytes())
    }

    pub fn tmtime(&self) -> Result<Option<Timestamp>> {
        match self.get_string(keys::TMTIME) {
            Ok(s) => s
                .parse()
                .map(Some)
                .map_err(|_| internal(format!("tmtime {s:?} on {} isn't rfc3339", self.id))),
            Err(e) if e.kind() == "not-found" => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn set_tmtime(&self, t: Timestamp) -> Result<()> {
        self.set(keys::TMTIME, t.to_string().as_bytes())
    }

    pub fn tree_size(&self) -> Result<i64> {
        match self.get_int64(keys::TREE_SIZE) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == "not-found" => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn set_tree_size(&self, size: i64) -> Result<()> {
        self.set(keys::TREE_SIZE, size.to_string().as_bytes())
    }

    /// `§3: propagation == "1" marks a propagation terminator`.
    pub fn is_propagation_terminator(&self) -> Result<bool> {
        match self.get_string(keys::PROPAGATION) {
            Ok(s) => Ok(s == "1"),
            Err(e) if e.kind() == "not-found" => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn mark_propagation_terminator(&self) -> Result<()> {
        self.set(keys::PROPAGATION, b"1")
    }

    pub fn quota(&self) -> Result<i64> {
        match self.get_int64(keys::QUOTA) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == "not-found" => Ok(QUOTA_UNCALCULATED),
            Err(e) => Err(e),
        }
    }

    pub fn set_quota(&self, quota: i64) -> Result<()> {
        self.set(keys::QUOTA, quota.to_string().as_bytes())
    }

    /// `§4.3: encode/decode grants` - every grant set on this node,
    /// keyed by principal.
    pub fn grants(&self) -> Result<GrantSet> {
        let mut grants = GrantSet::new();
        for key in self.ctx.metadata.list(&self.internal_path())? {
            let Some(principal) = Principal::from_xattr_key(&key) else {
                continue;
            };
            let bytes = self.get(&key)?;
            grants.insert(principal, Capabilities::from_bytes(&bytes)?);
        }
        Ok(grants)
    }

    pub fn grant(&self, principal: &Principal) -> Result<Option<Capabilities>> {
        match self.get(&principal.xattr_key()) {
            Ok(bytes) => Ok(Some(Capabilities::from_bytes(&bytes)?)),
            Err(e) if e.kind() == "not-found" => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn set_grant(&self, principal: &Principal, caps: Capabilities) -> Result<()> {
        self.set(&principal.xattr_key(), &caps.to_bytes())
    }

    pub fn remove_grant(&self, principal: &Principal) -> Result<()> {
        self.ctx
            .metadata
            .remove(&self.internal_path(), &principal.xattr_key())
    }

    /// `§4.3: read/write lock record`.
    pub fn lock(&self) -> Result<Option<LockRecord>> {
        match self.get(keys::LOCK) {
            Ok(bytes) => Ok(Some(LockRecord::from_bytes(&bytes)?)),
            Err(e) if e.kind() == "not-found" => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn set_lock(&self, record: &LockRecord) -> Result<()> {
        self.set(keys::LOCK, &record.to_bytes()?)?;
        std::fs::write(self.lock_file_path(), &record.lock_id)
            .map_err(|e| internal(format!("writing lock file for {}: {e}", self.id)))
    }

    pub fn unlock(&self) -> Result<()> {
        self.ctx.metadata.remove(&self.internal_path(), keys::LOCK)?;
        match std::fs::remove_file(self.lock_file_path()) {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    fn lock_file_path(&self) -> Utf8PathBuf {
        self.internal_path().join(".lock")
    }

    /// `§4.3: check_lock(ctx)` - fails with `locked` if a lock record is
    /// present and the caller does not carry the matching lock-id. An
    /// expired lock is treated as absent (§10.5).
    pub fn check_lock(&self, carried_lock_id: Option<&str>, now: Timestamp) -> Result<()> {
        let Some(record) = self.lock()? else {
            return Ok(());
        };
        if record.is_expired(now) {
            debug!("Lock {} on {} expired, treating as absent", record.lock_id, self.id);
            return Ok(());
        }
        if record.satisfied_by(carried_lock_id) {
            return Ok(());
        }
        Err(locked(format!("{} is locked by {}", self.id, record.owner)))
    }

    /// `§4.3: find_storage_space_root()` - walks parents up to a node
    /// marked `propagation="1"`.
    pub fn find_storage_space_root(&self) -> Result<Node> {
        let mut current = self.clone();
        loop {
            if current.is_propagation_terminator()? {
                return Ok(current);
            }
            match current.parent()? {
                Some(parent) => current = parent,
                None => return Ok(current),
            }
        }
    }

    pub fn set_metadata(&self, key: &str, val: &[u8]) -> Result<()> {
        self.set(key, val)
    }

    /// `§4.3: set_xattrs(map, take_lock)` - write-through to backend B.
    pub fn set_xattrs(&self, attrs: &crate::metadata::Attrs, take_lock: bool) -> Result<()> {
        self.ctx
            .metadata
            .set_multiple(&self.internal_path(), attrs, take_lock)
    }

    /// `§4.3: as_resource_info` - assembles the public resource
    /// descriptor. `path` is the caller-resolved space-relative path
    /// (Lookup's job, not Node's), threaded through for convenience.
    pub fn as_resource_info(
        &self,
        permissions: Capabilities,
        path: camino::Utf8PathBuf,
    ) -> Result<ResourceInfo> {
        let size = match self.node_type()? {
            NodeType::Directory => self.tree_size()?.max(0) as u64,
            _ => self.blob_size()?,
        };
        Ok(ResourceInfo {
            id: self.id,
            name: self.name()?,
            node_type: self.node_type()?,
            size,
            owner: self.owner()?,
            etag: self.etag()?,
            permissions,
            path,
        })
    }

    /// `§4.3: compute etag from (id, tmtime or mtime)`.
    pub fn etag(&self) -> Result<String> {
        let stamp = match self.tmtime()? {
            Some(t) => t,
            None => self.mtime()?.unwrap_or(Timestamp::UNIX_EPOCH),
        };
        Ok(format!("{:x}-{}", self.id.as_uuid().as_u128(), stamp.as_second()))
    }
}

/// Computes the relative symlink target from one node's internal path to
/// another's, both nested `SHARD_DEPTH + 1` levels under `nodes/` (four
/// shard components plus the id directory itself).
fn relative_symlink_target(from: &camino::Utf8Path, to: &camino::Utf8Path) -> Result<Utf8PathBuf> {
    let from_depth = from.components().count();
    let to_components: Vec<_> = to.components().collect();
    let shared_depth = to_components.len().saturating_sub(5);
    let mut rel = Utf8PathBuf::new();
    for _ in 0..(from_depth - shared_depth) {
        rel.push("..");
    }
    for c in &to_components[shared_depth..] {
        rel.push(c.as_str());
    }
    Ok(rel)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blobstore::MemoryBlobStore;
    use crate::metadata::SidecarBackend;
    use std::sync::Arc;

    fn test_ctx() -> (tempfile::TempDir, Arc<Context>) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        std::fs::create_dir_all(root.join("nodes")).unwrap();
        let ctx = Context::new(root, Arc::new(SidecarBackend::new()), Arc::new(MemoryBlobStore::new()));
        (dir, ctx)
    }

    fn make_live_node(ctx: &Arc<Context>, name: &str, ty: NodeType) -> Node {
        let node = Node::live(Arc::clone(ctx), NodeId::new());
        std::fs::create_dir_all(node.internal_path()).unwrap();
        node.set(keys::NAME, name.as_bytes()).unwrap();
        node.set(keys::TYPE, ty.as_str().as_bytes()).unwrap();
        node.set(keys::PARENT_ID, ROOT_SENTINEL.as_bytes()).unwrap();
        node.set(keys::OWNER_ID, b"alice").unwrap();
        node.set(keys::OWNER_IDP, b"idp").unwrap();
        node.set(keys::OWNER_TYPE, b"user").unwrap();
        node
    }

    #[test]
    fn reads_back_basic_attributes() {
        let (_dir, ctx) = test_ctx();
        let node = make_live_node(&ctx, "a.txt", NodeType::File);
        assert_eq!(node.name().unwrap(), "a.txt");
        assert_eq!(node.node_type().unwrap(), NodeType::File);
        assert!(node.parent_id().unwrap().is_none());
        assert_eq!(node.owner().unwrap().id, "alice");
    }

    #[test]
    fn child_symlink_round_trips() {
        let (_dir, ctx) = test_ctx();
        let parent = make_live_node(&ctx, "dir", NodeType::Directory);
        let child = make_live_node(&ctx, "child.txt", NodeType::File);

        parent.add_child_symlink("child.txt", &child).unwrap();
        let resolved = parent.child("child.txt").unwrap().unwrap();
        assert_eq!(resolved.id(), child.id());
        assert!(parent.child("missing").unwrap().is_none());

        assert!(matches!(
            parent.add_child_symlink("child.txt", &child),
            Err(e) if e.kind() == "already-exists"
        ));
    }

    #[test]
    fn grants_round_trip() {
        let (_dir, ctx) = test_ctx();
        let node = make_live_node(&ctx, "dir", NodeType::Directory);
        let alice = Principal::User("alice".to_string());
        node.set_grant(&alice, Capabilities::STAT | Capabilities::DELETE).unwrap();

        let grants = node.grants().unwrap();
        assert_eq!(grants.len(), 1);
        assert!(grants[&alice].contains(Capabilities::STAT));

        node.remove_grant(&alice).unwrap();
        assert!(node.grants().unwrap().is_empty());
    }

    #[test]
    fn lock_round_trips_and_expires() {
        let (_dir, ctx) = test_ctx();
        let node = make_live_node(&ctx, "f", NodeType::File);
        let now: Timestamp = "2024-06-01T00:00:00Z".parse().unwrap();
        let future: Timestamp = "2024-06-02T00:00:00Z".parse().unwrap();

        assert!(node.check_lock(None, now).is_ok());

        let record = LockRecord::new(crate::lock::LockKind::Exclusive, "alice", "abc", Some(future));
        node.set_lock(&record).unwrap();

        assert!(node.check_lock(None, now).is_err());
        assert!(node.check_lock(Some("abc"), now).is_ok());

        let past_expiry: Timestamp = "2024-05-01T00:00:00Z".parse().unwrap();
        let record = LockRecord::new(crate::lock::LockKind::Exclusive, "alice", "abc", Some(past_expiry));
        node.set_lock(&record).unwrap();
        assert!(node.check_lock(None, now).is_ok());
    }

    #[test]
    fn finds_propagation_terminator() {
        let (_dir, ctx) = test_ctx();
        let root = make_live_node(&ctx, "space", NodeType::Directory);
        root.mark_propagation_terminator().unwrap();
        root.set(keys::PARENT_ID, ROOT_SENTINEL.as_bytes()).unwrap();

        let child = make_live_node(&ctx, "sub", NodeType::Directory);
        child.set(keys::PARENT_ID, root.id().to_string().as_bytes()).unwrap();
        root.add_child_symlink("sub", &child).unwrap();

        assert_eq!(child.find_storage_space_root().unwrap().id(), root.id());
    }
}
