//! Tree (§4.5, component E): structural operations on nodes - create,
//! move, delete-to-trash, purge, restore, list, and propagation.

use std::io::Read;
use std::sync::Arc;

use camino::Utf8PathBuf;
use jiff::Timestamp;
use tracing::*;

use crate::context::Context;
use crate::error::{Result, already_exists, internal, not_found};
use crate::ids::BlobId;
use crate::node::{Node, NodeType, Owner, Variant, keys};

/// `§4.5: create_dir(node)` - creates the on-disk directory, writes the
/// core xattrs, and wires the parent's child symlink. Fails with
/// `already-exists` if the child symlink already exists (I1, scenario 6).
pub fn create_dir(parent: &Node, name: &str, owner: Owner, is_space_root: bool) -> Result<Node> {
    let node = Node::live(Arc::clone(parent.ctx()), crate::ids::NodeId::new());
    std::fs::create_dir_all(node.internal_path())
        .map_err(|e| internal(format!("creating node dir for {name:?}: {e}")))?;

    let result = (|| -> Result<()> {
        node.set_metadata(keys::NAME, name.as_bytes())?;
        node.set_metadata(keys::TYPE, b"directory")?;
        node.set_metadata(keys::PARENT_ID, parent.id().to_string().as_bytes())?;
        node.set_metadata(keys::OWNER_ID, owner.id.as_bytes())?;
        node.set_metadata(keys::OWNER_IDP, owner.idp.as_bytes())?;
        node.set_metadata(keys::OWNER_TYPE, owner.kind.as_bytes())?;
        if is_space_root {
            node.mark_propagation_terminator()?;
        }
        // The symlink flip is the last step that makes this visible
        // (§4.5's failure semantics): if it fails, the node directory we
        // just made is an orphan, garbage but invisible.
        parent.add_child_symlink(name, &node)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_dir_all(node.internal_path());
        return Err(e);
    }
    debug!("create_dir {} ({})", name, node.id());
    Ok(node)
}

/// `§4.5: touch_file(node)` - creates a file node directory with an
/// empty `blobid`.
pub fn touch_file(parent: &Node, name: &str, owner: Owner) -> Result<Node> {
    let node = Node::live(Arc::clone(parent.ctx()), crate::ids::NodeId::new());
    std::fs::create_dir_all(node.internal_path())
        .map_err(|e| internal(format!("creating node dir for {name:?}: {e}")))?;

    let result = (|| -> Result<()> {
        node.set_metadata(keys::NAME, name.as_bytes())?;
        node.set_metadata(keys::TYPE, b"file")?;
        node.set_metadata(keys::PARENT_ID, parent.id().to_string().as_bytes())?;
        node.set_metadata(keys::OWNER_ID, owner.id.as_bytes())?;
        node.set_metadata(keys::OWNER_IDP, owner.idp.as_bytes())?;
        node.set_metadata(keys::OWNER_TYPE, owner.kind.as_bytes())?;
        node.set_metadata(keys::BLOB_ID, b"")?;
        node.set_metadata(keys::BLOB_SIZE, b"0")?;
        parent.add_child_symlink(name, &node)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_dir_all(node.internal_path());
        return Err(e);
    }
    debug!("touch_file {} ({})", name, node.id());
    Ok(node)
}

/// `§4.5: move(src, dst)` - atomic rename of the child symlink from the
/// old parent to the new one; updates `parentid`/`name`; propagates size
/// changes to both sides.
pub fn move_node(node: &Node, new_parent: &Node, new_name: &str) -> Result<()> {
    let old_parent = node
        .parent()?
        .ok_or_else(|| internal(format!("{} has no parent to move from", node.id())))?;
    let old_name = node.name()?;

    if new_parent.child(new_name)?.is_some() {
        return Err(already_exists(format!("{new_name:?} in {}", new_parent.id())));
    }

    old_parent.rename_child_symlink(&old_name, new_parent, new_name)?;
    node.set_metadata(keys::PARENT_ID, new_parent.id().to_string().as_bytes())?;
    node.set_metadata(keys::NAME, new_name.as_bytes())?;

    let size = match node.node_type()? {
        NodeType::Directory => node.tree_size()?,
        _ => node.blob_size()? as i64,
    };
    propagate(&old_parent, -size)?;
    propagate(new_parent, size)?;
    debug!("move {} -> {}/{new_name}", node.id(), new_parent.id());
    Ok(())
}

/// `§4.5: delete(node)` - renames the node directory in place to
/// `<id>.T.<now>`, records `trashorigin`, and replaces the parent's child
/// symlink with a trash-index entry.
pub fn delete(node: &Node, logical_path: &camino::Utf8Path) -> Result<()> {
    let parent = node
        .parent()?
        .ok_or_else(|| internal(format!("{} has no parent to delete from", node.id())))?;
    let name = node.name()?;
    let space = node.find_storage_space_root()?;

    let ts = now().to_string();
    let trashed_path = node.sibling_path(&Variant::Trashed(ts.clone()));

    std::fs::rename(node.internal_path(), &trashed_path)
        .map_err(|e| internal(format!("trashing {}: {e}", node.id())))?;
    let _ = std::fs::remove_file(node.internal_path().join(".lock"));

    let trashed = Node::with_variant(Arc::clone(node.ctx()), node.id(), Variant::Trashed(ts));
    trashed.set_metadata(keys::TRASH_ORIGIN, logical_path.as_str().as_bytes())?;

    parent.remove_child_symlink(&name)?;

    let trash_index_dir = trash_index_dir(node.ctx(), space.id());
    std::fs::create_dir_all(&trash_index_dir)
        .map_err(|e| internal(format!("creating trash index dir: {e}")))?;
    let rel_target = relative_path(&trash_index_dir, &trashed.internal_path());
    std::os::unix::fs::symlink(&rel_target, trash_index_dir.join(node.id().to_string()))
        .map_err(|e| internal(format!("indexing trashed node {}: {e}", node.id())))?;

    let size = match node.node_type()? {
        NodeType::Directory => node.tree_size()?,
        _ => node.blob_size()? as i64,
    };
    propagate(&parent, -size)?;
    debug!("delete {} ({})", logical_path, node.id());
    Ok(())
}

/// `§4.5: purge(space_id, node_id, rel_path)` - removes the trashed node
/// directory and every blob it (and its revisions) reference.
pub fn purge(trashed: &Node) -> Result<()> {
    let dir = trashed.internal_path();
    for entry in read_revision_siblings(trashed)? {
        if let Ok(Some(blob_id)) = entry.blob_id() {
            trashed.ctx().blobs.delete(&blob_id)?;
        }
        crate::file_util::remove_dir_all_tolerant(entry.internal_path())
            .map_err(|e| internal(format!("purging revision {}: {e}", entry.id())))?;
    }
    if let Some(blob_id) = trashed.blob_id()? {
        trashed.ctx().blobs.delete(&blob_id)?;
    }
    // Tolerant of a concurrent purge having already won this race (§9:
    // trash/restore error paths are hard failures except where another
    // purge legitimately beat us to the same node).
    crate::file_util::remove_dir_all_tolerant(&dir).map_err(|e| internal(format!("purging {dir}: {e}")))?;

    if let Variant::Trashed(_) = trashed.variant() {
        let space = trashed.find_storage_space_root().unwrap_or_else(|_| trashed.clone());
        let _ = std::fs::remove_file(trash_index_dir(trashed.ctx(), space.id()).join(trashed.id().to_string()));
    }
    debug!("purge {}", trashed.id());
    Ok(())
}

/// `§4.5: restore(space_id, node_id, rel_path, target_node)` - reverses
/// delete. Without an explicit target, restores at `trashorigin`.
pub fn restore(trashed: &Node, target_parent: &Node, target_name: &str) -> Result<Node> {
    if target_parent.child(target_name)?.is_some() {
        return Err(already_exists(format!(
            "{target_name:?} in {}",
            target_parent.id()
        )));
    }

    let live_path = trashed.sibling_path(&Variant::Live);
    std::fs::rename(trashed.internal_path(), &live_path)
        .map_err(|e| internal(format!("restoring {}: {e}", trashed.id())))?;

    let restored = Node::live(Arc::clone(trashed.ctx()), trashed.id());
    restored.set_metadata(keys::PARENT_ID, target_parent.id().to_string().as_bytes())?;
    restored.set_metadata(keys::NAME, target_name.as_bytes())?;
    restored.ctx().metadata.remove(&restored.internal_path(), keys::TRASH_ORIGIN)?;
    target_parent.add_child_symlink(target_name, &restored)?;

    let space = restored.find_storage_space_root()?;
    let _ = std::fs::remove_file(trash_index_dir(restored.ctx(), space.id()).join(restored.id().to_string()));

    let size = match restored.node_type()? {
        NodeType::Directory => restored.tree_size()?,
        _ => restored.blob_size()? as i64,
    };
    propagate(target_parent, size)?;
    debug!("restore {} -> {}/{target_name}", restored.id(), target_parent.id());
    Ok(restored)
}

/// `§4.5: list_folder(node)` - children that fail to read are skipped
/// and logged, never propagated as a hard error (§7).
pub fn list_folder(node: &Node) -> Result<Vec<Node>> {
    let dir = node.internal_path();
    let entries = std::fs::read_dir(&dir).map_err(|e| internal(format!("listing {dir}: {e}")))?;

    let mut children = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                error!("skipping unreadable entry in {dir}: {e}");
                continue;
            }
        };
        let Ok(name) = entry.file_name().into_string() else {
            error!("skipping non-UTF-8 entry in {dir}");
            continue;
        };
        if name == ".lock" {
            continue;
        }
        match node.child(&name) {
            Ok(Some(child)) => children.push(child),
            Ok(None) => {}
            Err(e) => {
                error!("skipping unreadable child {name:?} of {}: {e}", node.id());
                continue;
            }
        }
    }
    Ok(children)
}

/// `§4.5: propagate(node, size_diff)` - walks ancestors, updating
/// `tmtime`/`treesize`, stopping (inclusive) at the first
/// `propagation="1"` ancestor. Best-effort: an error on one ancestor is
/// logged and the walk continues (I3, §7).
pub fn propagate(node: &Node, size_diff: i64) -> Result<()> {
    let mut current = node.clone();
    let now = now();
    loop {
        if let Err(e) = update_one(&current, size_diff, now) {
            error!("propagation stalled at {}: {e}", current.id());
        }
        if current.is_propagation_terminator().unwrap_or(true) {
            break;
        }
        match current.parent() {
            Ok(Some(parent)) => current = parent,
            Ok(None) => break,
            Err(e) => {
                error!("propagation: couldn't resolve parent of {}: {e}", current.id());
                break;
            }
        }
    }
    Ok(())
}

fn update_one(node: &Node, size_diff: i64, now: Timestamp) -> Result<()> {
    node.set_tmtime(now)?;
    let current = node.tree_size()?;
    node.set_tree_size(current + size_diff)
}

pub fn write_blob(node: &Node, blob_id: &BlobId, reader: &mut dyn Read, size: u64) -> Result<()> {
    node.ctx().blobs.upload(blob_id, reader, size)
}

/// Promotes an on-disk file directly into the blob store by rename,
/// skipping a full read-and-copy when the store supports it (§4.5's
/// "symlink flip is the last atomic step" framing applies to blob
/// promotion too). Returns `false` if the store has no rename fast path,
/// in which case the caller should fall back to `write_blob`.
pub fn write_blob_by_rename(node: &Node, blob_id: &BlobId, from: &camino::Utf8Path) -> Result<bool> {
    node.ctx().blobs.upload_by_rename(blob_id, from)
}

pub fn read_blob(node: &Node) -> Result<Box<dyn Read + Send>> {
    let blob_id = node
        .blob_id()?
        .ok_or_else(|| not_found(format!("no blob on node {}", node.id())))?;
    node.ctx().blobs.download(&blob_id)
}

pub fn delete_blob(node: &Node, blob_id: &BlobId) -> Result<()> {
    node.ctx().blobs.delete(blob_id)
}

fn trash_index_dir(ctx: &Arc<Context>, space_id: crate::ids::NodeId) -> Utf8PathBuf {
    ctx.spaces_root()
        .join(space_id.to_string())
        .join("trash")
        .join(crate::ids::shard_path(crate::ids::shard(&space_id)))
}

fn relative_path(from_dir: &camino::Utf8Path, to: &camino::Utf8Path) -> Utf8PathBuf {
    let up = "../".repeat(from_dir.components().count());
    let mut rel = Utf8PathBuf::from(up.trim_end_matches('/'));
    for c in to.components() {
        rel.push(c.as_str());
    }
    rel
}

/// Revisions colocated with a node share its shard directory and the
/// `<id>.REV.<ts>` naming (I2); this scans for them when purging, since
/// purge must also remove "the blob(s) of the node and all its
/// revisions" (§4.5).
fn read_revision_siblings(node: &Node) -> Result<Vec<Node>> {
    let prefix = format!("{}.REV.", node.id());
    let mut revisions = Vec::new();
    for entry in std::fs::read_dir(node.shard_dir())
        .map_err(|e| internal(format!("scanning {} for revisions: {e}", node.shard_dir())))?
    {
        let entry = entry.map_err(|e| internal(format!("reading shard dir entry: {e}")))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if let Some(ts) = name.strip_prefix(&prefix) {
            revisions.push(Node::with_variant(
                Arc::clone(node.ctx()),
                node.id(),
                Variant::Revision(ts.to_string()),
            ));
        }
    }
    Ok(revisions)
}

fn now() -> Timestamp {
    Timestamp::now()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blobstore::MemoryBlobStore;
    use crate::metadata::SidecarBackend;

    fn test_ctx() -> (tempfile::TempDir, Arc<Context>) {
        let dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        std::fs::create_dir_all(root.join("nodes")).unwrap();
        let ctx = Context::new(root, Arc::new(SidecarBackend::new()), Arc::new(MemoryBlobStore::new()));
        (dir, ctx)
    }

    fn owner() -> Owner {
        Owner {
            id: "alice".into(),
            idp: "idp".into(),
            kind: "user".into(),
        }
    }

    fn space_root(ctx: &Arc<Context>) -> Node {
        let root = Node::live(Arc::clone(ctx), crate::ids::NodeId::new());
        std::fs::create_dir_all(root.internal_path()).unwrap();
        root.set_metadata(keys::NAME, b"").unwrap();
        root.set_metadata(keys::TYPE, b"directory").unwrap();
        root.set_metadata(keys::PARENT_ID, crate::ids::ROOT_SENTINEL.as_bytes())
            .unwrap();
        root.set_metadata(keys::OWNER_ID, b"alice").unwrap();
        root.set_metadata(keys::OWNER_IDP, b"idp").unwrap();
        root.set_metadata(keys::OWNER_TYPE, b"user").unwrap();
        root.mark_propagation_terminator().unwrap();
        root
    }

    #[test]
    fn create_dir_rejects_duplicate_name() {
        let (_dir, ctx) = test_ctx();
        let root = space_root(&ctx);
        create_dir(&root, "shared", owner(), false).unwrap();
        assert!(matches!(
            create_dir(&root, "shared", owner(), false),
            Err(e) if e.kind() == "already-exists"
        ));
        assert_eq!(list_folder(&root).unwrap().len(), 1);
    }

    #[test]
    fn delete_and_restore_round_trip() {
        let (_dir, ctx) = test_ctx();
        let root = space_root(&ctx);
        let d = create_dir(&root, "d", owner(), false).unwrap();
        let f = touch_file(&d, "f", owner()).unwrap();

        delete(&f, camino::Utf8Path::new("/d/f")).unwrap();
        assert!(list_folder(&d).unwrap().is_empty());

        let trashed_path = f.sibling_path(&Variant::Trashed(
            trash_ts_from_dir(&d).expect("a trashed sibling exists"),
        ));
        let trashed = Node::with_variant(
            Arc::clone(&ctx),
            f.id(),
            Variant::Trashed(trash_ts_from_dir(&d).unwrap()),
        );
        assert!(trashed_path.is_dir());

        let restored = restore(&trashed, &d, "f").unwrap();
        assert_eq!(restored.id(), f.id());
        assert_eq!(list_folder(&d).unwrap().len(), 1);
    }

    /// Test helper: finds the `.T.<ts>` suffix of whatever trashed sibling
    /// sits in `parent`'s shard directory (there's exactly one in these
    /// tests).
    fn trash_ts_from_dir(node: &Node) -> Option<String> {
        for entry in std::fs::read_dir(node.shard_dir()).ok()? {
            let entry = entry.ok()?;
            let name = entry.file_name().into_string().ok()?;
            if let Some((_, ts)) = name.split_once(".T.") {
                return Some(ts.to_string());
            }
        }
        None
    }

    #[test]
    fn propagation_stops_at_space_root() {
        let (_dir, ctx) = test_ctx();
        let root = space_root(&ctx);
        let a = create_dir(&root, "a", owner(), false).unwrap();
        let b = create_dir(&a, "b", owner(), false).unwrap();

        propagate(&b, 42).unwrap();
        assert_eq!(a.tree_size().unwrap(), 42);
        assert_eq!(root.tree_size().unwrap(), 42);
    }
}
