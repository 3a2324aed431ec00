//! Recycle (§4.9, component I): list/restore/purge trashed items, per
//! space. Thin orchestration over Tree (§4.5) plus the capability checks
//! §4.9 requires on top.

use std::sync::Arc;

use camino::Utf8Path;
use tracing::*;

use crate::context::Context;
use crate::error::{Result, internal, not_found, permission_denied};
use crate::grant::{CallerIdentity, Capabilities};
use crate::ids::NodeId;
use crate::node::{Node, Variant};
use crate::permissions;
use crate::tree;

#[derive(Debug, Clone)]
pub struct RecycleItem {
    pub id: NodeId,
    pub original_path: String,
    pub node_type: crate::node::NodeType,
}

/// `§4.9: list(space, key, rel)` - with `key=""` and `rel="/"`, enumerates
/// the space's trash index; otherwise resolves the trashed node by `key`
/// and lists its (still in-place) children.
pub fn list(
    caller: &CallerIdentity,
    space_root: &Node,
    key: &str,
    rel: &Utf8Path,
) -> Result<Vec<RecycleItem>> {
    if !permissions::has_permission(caller, space_root, Capabilities::LIST_RECYCLE)? {
        return Err(permission_denied(format!(
            "{} lacks list_recycle on space {}",
            caller.user_id,
            space_root.id()
        )));
    }

    if key.is_empty() && rel.as_str() == "/" {
        return list_trash_index(space_root);
    }

    let id: NodeId = key
        .parse()
        .map_err(|_| crate::error::bad_request(format!("invalid recycle key {key:?}")))?;
    let trashed = find_trashed(space_root.ctx(), space_root.id(), id)?;
    let dir = trashed.internal_path();
    let mut items = Vec::new();
    for entry in std::fs::read_dir(&dir).map_err(|e| internal(format!("listing {dir}: {e}")))? {
        let Ok(entry) = entry else { continue };
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name == ".lock" {
            continue;
        }
        match trashed.child(&name) {
            Ok(Some(child)) => match describe(&child) {
                Ok(item) => items.push(item),
                Err(e) => error!("skipping unreadable trashed child {name:?}: {e}"),
            },
            Ok(None) => {}
            Err(e) => error!("skipping unreadable trashed child {name:?}: {e}"),
        }
    }
    Ok(items)
}

fn list_trash_index(space_root: &Node) -> Result<Vec<RecycleItem>> {
    let dir = space_root
        .ctx()
        .spaces_root()
        .join(space_root.id().to_string())
        .join("trash");
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut items = Vec::new();
    for shard_entry in walk_shard_tree(&dir)? {
        let Ok(id) = shard_entry
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .parse::<NodeId>()
        else {
            continue;
        };
        match find_trashed(space_root.ctx(), space_root.id(), id) {
            Ok(trashed) => match describe(&trashed) {
                Ok(item) => items.push(item),
                Err(e) => error!("skipping unreadable trash entry {id}: {e}"),
            },
            Err(e) => error!("skipping dangling trash index entry {id}: {e}"),
        }
    }
    Ok(items)
}

/// Walks the four-level shard tree under a trash index directory,
/// returning every leaf symlink found.
fn walk_shard_tree(dir: &Utf8Path) -> Result<Vec<camino::Utf8PathBuf>> {
    let mut leaves = Vec::new();
    let mut stack = vec![(dir.to_path_buf(), 0)];
    while let Some((d, depth)) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&d) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let Ok(path) = camino::Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            if depth < 4 {
                stack.push((path, depth + 1));
            } else {
                leaves.push(path);
            }
        }
    }
    Ok(leaves)
}

fn describe(trashed: &Node) -> Result<RecycleItem> {
    let origin = trashed.ctx().metadata.get(&trashed.internal_path(), crate::node::keys::TRASH_ORIGIN)?;
    Ok(RecycleItem {
        id: trashed.id(),
        original_path: String::from_utf8(origin)
            .map_err(|_| internal("trashorigin isn't valid UTF-8"))?,
        node_type: trashed.node_type()?,
    })
}

fn find_trashed(ctx: &Arc<Context>, space_id: NodeId, id: NodeId) -> Result<Node> {
    let shard_dir = ctx.nodes_root().join(crate::ids::shard_path(crate::ids::shard(&id)));
    let prefix = format!("{id}.T.");
    let entry = std::fs::read_dir(&shard_dir)
        .map_err(|e| internal(format!("scanning {shard_dir}: {e}")))?
        .filter_map(|e| e.ok())
        .find(|e| {
            e.file_name()
                .into_string()
                .map(|n| n.starts_with(&prefix))
                .unwrap_or(false)
        })
        .ok_or_else(|| not_found(format!("trashed node {id} in space {space_id}")))?;
    let ts = entry
        .file_name()
        .into_string()
        .unwrap()
        .strip_prefix(&prefix)
        .unwrap()
        .to_string();
    Ok(Node::with_variant(Arc::clone(ctx), id, Variant::Trashed(ts)))
}

/// `§4.9: restore` - delegates to Tree, after checking `restore_recycle_item`
/// and `initiate_file_upload` on the destination's parent (a restore is a
/// write at the destination).
pub fn restore(
    caller: &CallerIdentity,
    space_root: &Node,
    id: NodeId,
    target_parent: &Node,
    target_name: &str,
) -> Result<Node> {
    if !permissions::has_permission(caller, space_root, Capabilities::RESTORE_RECYCLE_ITEM)? {
        return Err(permission_denied(format!(
            "{} lacks restore_recycle_item on space {}",
            caller.user_id,
            space_root.id()
        )));
    }
    if !permissions::has_permission(caller, target_parent, Capabilities::INITIATE_FILE_UPLOAD)? {
        return Err(permission_denied(format!(
            "{} lacks initiate_file_upload on restore destination {}",
            caller.user_id,
            target_parent.id()
        )));
    }
    let trashed = find_trashed(space_root.ctx(), space_root.id(), id)?;
    tree::restore(&trashed, target_parent, target_name)
}

/// `§4.9: purge` - delegates to Tree, after checking `purge_recycle`.
pub fn purge(caller: &CallerIdentity, space_root: &Node, id: NodeId) -> Result<()> {
    if !permissions::has_permission(caller, space_root, Capabilities::PURGE_RECYCLE)? {
        return Err(permission_denied(format!(
            "{} lacks purge_recycle on space {}",
            caller.user_id,
            space_root.id()
        )));
    }
    let trashed = find_trashed(space_root.ctx(), space_root.id(), id)?;
    tree::purge(&trashed)
}

/// `§4.9: empty(space)` - removes the entire trash subtree for a space.
pub fn empty(caller: &CallerIdentity, space_root: &Node) -> Result<()> {
    if !permissions::has_permission(caller, space_root, Capabilities::PURGE_RECYCLE)? {
        return Err(permission_denied(format!(
            "{} lacks purge_recycle on space {}",
            caller.user_id,
            space_root.id()
        )));
    }
    for item in list_trash_index(space_root)? {
        if let Err(e) = purge(caller, space_root, item.id) {
            error!("emptying trash: failed to purge {}: {e}", item.id);
        }
    }
    Ok(())
}
