//! Lookup (§4.4, component D): resolves references - by id, by path, or
//! by a `(resource_id, path)` pair - to `Node`s.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::context::Context;
use crate::error::{Result, not_found};
use crate::ids::NodeId;
use crate::node::Node;

/// A reference as accepted by `node_from_resource` (§4.4): either a bare
/// path relative to a space root, an id, or an id with a path relative to
/// it.
pub enum Reference<'a> {
    Path(&'a Utf8Path),
    Id(NodeId),
    IdAndPath(NodeId, &'a Utf8Path),
}

/// `§4.4: node_from_id(id)` - reads the node at `nodes/<shard>/<id>`.
/// Fails with `not-found` if the directory doesn't exist.
pub fn node_from_id(ctx: &Arc<Context>, id: NodeId) -> Result<Node> {
    let node = Node::live(Arc::clone(ctx), id);
    if !node.exists() {
        return Err(not_found(format!("node {id}")));
    }
    Ok(node)
}

/// `§4.4: node_from_path(path)` - starts at `space_root`, splits `path` on
/// `/`, walks child by child. An intermediate segment that doesn't exist
/// fails `not-found` on that segment; the final segment may be missing
/// and is returned as a phantom node (`exists() == false`) so callers can
/// check "does this name already exist" before creating it.
pub fn node_from_path(space_root: &Node, path: &Utf8Path) -> Result<Node> {
    let mut current = space_root.clone();
    let segments: Vec<&str> = path
        .as_str()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    if segments.is_empty() {
        return Ok(current);
    }

    for (i, segment) in segments.iter().enumerate() {
        let is_last = i == segments.len() - 1;
        match current.child(segment)? {
            Some(child) => current = child,
            None if is_last => return Ok(phantom_child(&current, segment)),
            None => {
                return Err(not_found(format!(
                    "path segment {segment:?} of {path} under {}",
                    space_root.id()
                )));
            }
        }
    }
    Ok(current)
}

/// Builds a handle for a name that does not yet exist under `parent`: a
/// fresh id, no on-disk directory. `exists()` on it is `false`; Tree's
/// create operations are responsible for materializing it.
fn phantom_child(parent: &Node, name: &str) -> Node {
    let _ = name; // the phantom doesn't carry a name until Tree writes it
    Node::live(Arc::clone(parent.ctx()), NodeId::new())
}

/// `§4.4: node_from_resource(ref)`.
pub fn node_from_resource(
    ctx: &Arc<Context>,
    space_root: &Node,
    reference: Reference<'_>,
) -> Result<Node> {
    match reference {
        Reference::Path(path) => node_from_path(space_root, path),
        Reference::Id(id) => node_from_id(ctx, id),
        Reference::IdAndPath(id, path) => {
            let base = node_from_id(ctx, id)?;
            node_from_path(&base, path)
        }
    }
}

/// `§4.4: path(node)` - the inverse of `node_from_path`: walks parents to
/// the storage-space root, joining names in reverse.
pub fn path(node: &Node) -> Result<Utf8PathBuf> {
    let mut names = Vec::new();
    let mut current = node.clone();
    loop {
        if current.is_propagation_terminator()? {
            break;
        }
        names.push(current.name()?);
        match current.parent()? {
            Some(parent) => current = parent,
            None => break,
        }
    }
    names.reverse();
    let mut p = Utf8PathBuf::from("/");
    for name in names {
        p.push(name);
    }
    Ok(p)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blobstore::MemoryBlobStore;
    use crate::context::Context;
    use crate::metadata::SidecarBackend;
    use crate::node::keys;

    fn test_ctx() -> (tempfile::TempDir, Arc<Context>) {
        let dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        std::fs::create_dir_all(root.join("nodes")).unwrap();
        let ctx = Context::new(root, Arc::new(SidecarBackend::new()), Arc::new(MemoryBlobStore::new()));
        (dir, ctx)
    }

    fn mkdir(ctx: &Arc<Context>, parent: &Node, name: &str) -> Node {
        let node = Node::live(Arc::clone(ctx), NodeId::new());
        std::fs::create_dir_all(node.internal_path()).unwrap();
        node.set_metadata(keys::NAME, name.as_bytes()).unwrap();
        node.set_metadata(keys::TYPE, b"directory").unwrap();
        node.set_metadata(keys::PARENT_ID, parent.id().to_string().as_bytes())
            .unwrap();
        parent.add_child_symlink(name, &node).unwrap();
        node
    }

    #[test]
    fn walks_nested_paths_and_finds_phantom_leaf() {
        let (_dir, ctx) = test_ctx();
        let root = Node::live(Arc::clone(&ctx), NodeId::new());
        std::fs::create_dir_all(root.internal_path()).unwrap();
        root.set_metadata(keys::NAME, b"").unwrap();
        root.set_metadata(keys::TYPE, b"directory").unwrap();
        root.set_metadata(keys::PARENT_ID, crate::ids::ROOT_SENTINEL.as_bytes())
            .unwrap();
        root.mark_propagation_terminator().unwrap();

        let sub = mkdir(&ctx, &root, "a");

        let found = node_from_path(&root, Utf8Path::new("a")).unwrap();
        assert_eq!(found.id(), sub.id());

        let phantom = node_from_path(&root, Utf8Path::new("a/new.txt")).unwrap();
        assert!(!phantom.exists());

        assert!(node_from_path(&root, Utf8Path::new("missing/new.txt")).is_err());
    }

    #[test]
    fn path_rebuilds_from_root() {
        let (_dir, ctx) = test_ctx();
        let root = Node::live(Arc::clone(&ctx), NodeId::new());
        std::fs::create_dir_all(root.internal_path()).unwrap();
        root.set_metadata(keys::NAME, b"").unwrap();
        root.set_metadata(keys::TYPE, b"directory").unwrap();
        root.set_metadata(keys::PARENT_ID, crate::ids::ROOT_SENTINEL.as_bytes())
            .unwrap();
        root.mark_propagation_terminator().unwrap();

        let a = mkdir(&ctx, &root, "a");
        let b = mkdir(&ctx, &a, "b");

        assert_eq!(path(&b).unwrap(), Utf8PathBuf::from("/a/b"));
    }
}
