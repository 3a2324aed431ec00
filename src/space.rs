//! Space manager (§4.7, component G): create, list, update, and delete
//! storage spaces, and the `spaces/<type>/<space_id>` symlink index.

use std::sync::Arc;

use camino::Utf8PathBuf;
use tracing::*;

use crate::context::Context;
use crate::error::{Result, already_exists, internal, not_found, permission_denied};
use crate::grant::{CallerIdentity, Capabilities, Principal};
use crate::ids::NodeId;
use crate::node::{Node, Owner, Variant, keys};
use crate::permissions;

#[derive(Debug, Clone)]
pub struct SpaceDescriptor {
    pub id: NodeId,
    pub name: String,
    pub space_type: String,
    pub owner: Owner,
    pub quota: i64,
}

/// `§4.7: create` - mints `space_id = node_id` of the new space root,
/// creates it via Tree's `create_dir`, writes space attributes,
/// materializes the type index symlink, and grants the owner full
/// capabilities.
pub fn create(
    ctx: &Arc<Context>,
    space_type: &str,
    name: &str,
    owner: Owner,
    description: Option<&str>,
    quota: Option<i64>,
) -> Result<Node> {
    let node = Node::live(Arc::clone(ctx), NodeId::new());
    std::fs::create_dir_all(node.internal_path())
        .map_err(|e| internal(format!("creating space root dir: {e}")))?;

    node.set_metadata(keys::NAME, name.as_bytes())?;
    node.set_metadata(keys::TYPE, b"directory")?;
    node.set_metadata(keys::PARENT_ID, crate::ids::ROOT_SENTINEL.as_bytes())?;
    node.set_metadata(keys::OWNER_ID, owner.id.as_bytes())?;
    node.set_metadata(keys::OWNER_IDP, owner.idp.as_bytes())?;
    node.set_metadata(keys::OWNER_TYPE, owner.kind.as_bytes())?;
    node.mark_propagation_terminator()?;
    node.set_metadata(keys::SPACE_NAME, name.as_bytes())?;
    if let Some(description) = description {
        node.set_metadata(keys::SPACE_DESCRIPTION, description.as_bytes())?;
    }
    node.set_quota(quota.unwrap_or(crate::node::QUOTA_UNLIMITED))?;

    let type_index_dir = ctx.spaces_root().join(space_type);
    std::fs::create_dir_all(&type_index_dir)
        .map_err(|e| internal(format!("creating space type index: {e}")))?;
    let link = type_index_dir.join(node.id().to_string());
    let target = relative_target_from(&type_index_dir, &node.internal_path());
    std::os::unix::fs::symlink(&target, &link)
        .map_err(|e| internal(format!("indexing space {}: {e}", node.id())))?;

    node.set_grant(&Principal::User(owner.id.clone()), Capabilities::owner())?;

    info!("Created space {} ({space_type}/{name})", node.id());
    Ok(node)
}

/// `§4.7: list(filters)` - globs the type index (or every type), reads
/// each target node, and applies a `stat` filter unless the caller holds
/// `list_all_spaces`.
pub fn list(
    ctx: &Arc<Context>,
    caller: &CallerIdentity,
    space_type: Option<&str>,
    can_list_all: bool,
) -> Result<Vec<SpaceDescriptor>> {
    let mut descriptors = Vec::new();
    let type_dirs: Vec<Utf8PathBuf> = match space_type {
        Some(t) => vec![ctx.spaces_root().join(t)],
        None => std::fs::read_dir(ctx.spaces_root())
            .map_err(|e| internal(format!("listing space types: {e}")))?
            .filter_map(|e| e.ok())
            .filter_map(|e| Utf8PathBuf::from_path_buf(e.path()).ok())
            .collect(),
    };

    for type_dir in type_dirs {
        let Ok(entries) = std::fs::read_dir(&type_dir) else {
            continue;
        };
        let space_type = type_dir
            .file_name()
            .unwrap_or_default()
            .to_string();
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let Ok(id) = entry
                .file_name()
                .into_string()
                .unwrap_or_default()
                .parse::<NodeId>()
            else {
                continue;
            };
            let node = Node::live(Arc::clone(ctx), id);
            if !node.exists() {
                error!("skipping space {id} whose root node is missing");
                continue;
            }
            if !can_list_all
                && !permissions::has_permission(caller, &node, Capabilities::STAT)
                    .unwrap_or(false)
            {
                continue;
            }
            match describe(&node, &space_type) {
                Ok(d) => descriptors.push(d),
                Err(e) => error!("skipping unreadable space {id}: {e}"),
            }
        }
    }
    Ok(descriptors)
}

fn describe(node: &Node, space_type: &str) -> Result<SpaceDescriptor> {
    Ok(SpaceDescriptor {
        id: node.id(),
        name: node.name()?,
        space_type: space_type.to_string(),
        owner: node.owner()?,
        quota: node.quota()?,
    })
}

/// `§4.7: update` - name/description changes require manager
/// (owner-equivalent) capability; other attribute updates require editor
/// capability. We fold both into a single required-capability parameter
/// so callers state which gate applies.
pub fn update(
    caller: &CallerIdentity,
    node: &Node,
    required: Capabilities,
    attrs: crate::metadata::Attrs,
) -> Result<()> {
    if !permissions::has_permission(caller, node, required)? {
        return Err(permission_denied(format!(
            "{} lacks required capability to update space {}",
            caller.user_id,
            node.id()
        )));
    }
    node.set_xattrs(&attrs, true)
}

/// `§4.7: delete` - soft-delete renames the space root in place with
/// `.T.<ts>` and drops the index symlink; `purge=true` requires a prior
/// soft-delete, then removes the whole subtree and its blobs.
pub fn delete(node: &Node, space_type: &str, purge: bool) -> Result<()> {
    let type_link = node.ctx().spaces_root().join(space_type).join(node.id().to_string());

    if !purge {
        let ts = jiff::Timestamp::now().to_string();
        let trashed_path = node.sibling_path(&Variant::Trashed(ts));
        std::fs::rename(node.internal_path(), &trashed_path)
            .map_err(|e| internal(format!("soft-deleting space {}: {e}", node.id())))?;
        let _ = std::fs::remove_file(&type_link);
        return Ok(());
    }

    if node.exists() {
        return Err(already_exists(format!(
            "space {} must be soft-deleted before purge",
            node.id()
        )));
    }

    let dir = node.shard_dir();
    let prefix = format!("{}.T.", node.id());
    let trashed_dir = std::fs::read_dir(&dir)
        .map_err(|e| internal(format!("scanning {dir} for soft-deleted space: {e}")))?
        .filter_map(|e| e.ok())
        .find(|e| {
            e.file_name()
                .into_string()
                .map(|n| n.starts_with(&prefix))
                .unwrap_or(false)
        })
        .ok_or_else(|| not_found(format!("no soft-deleted space {}", node.id())))?;

    std::fs::remove_dir_all(trashed_dir.path())
        .map_err(|e| internal(format!("purging space {}: {e}", node.id())))?;
    let _ = std::fs::remove_file(&type_link);
    Ok(())
}

fn relative_target_from(index_dir: &camino::Utf8Path, node_dir: &camino::Utf8Path) -> Utf8PathBuf {
    let up = "../".repeat(index_dir.components().count());
    let mut rel = Utf8PathBuf::from(up.trim_end_matches('/'));
    for c in node_dir.components() {
        rel.push(c.as_str());
    }
    rel
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
        std::fs::create_dir_all(root.join("spaces")).unwrap();
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

    #[test]
    fn create_then_list_by_owner() {
        let (_dir, ctx) = test_ctx();
        let node = create(&ctx, "personal", "alice's files", owner(), None, None).unwrap();

        let caller = CallerIdentity::new("alice", vec![]);
        let spaces = list(&ctx, &caller, Some("personal"), false).unwrap();
        assert_eq!(spaces.len(), 1);
        assert_eq!(spaces[0].id, node.id());
        assert_eq!(spaces[0].name, "alice's files");
    }

    #[test]
    fn list_hides_spaces_without_stat() {
        let (_dir, ctx) = test_ctx();
        create(&ctx, "personal", "alice's files", owner(), None, None).unwrap();

        let caller = CallerIdentity::new("bob", vec![]);
        assert!(list(&ctx, &caller, Some("personal"), false).unwrap().is_empty());
        assert_eq!(list(&ctx, &caller, Some("personal"), true).unwrap().len(), 1);
    }

    #[test]
    fn soft_delete_then_purge() {
        let (_dir, ctx) = test_ctx();
        let node = create(&ctx, "personal", "alice's files", owner(), None, None).unwrap();
        let id = node.id();

        delete(&node, "personal", false).unwrap();
        assert!(!Node::live(Arc::clone(&ctx), id).exists());
        assert!(!ctx.spaces_root().join("personal").join(id.to_string()).exists());

        delete(&Node::live(Arc::clone(&ctx), id), "personal", true).unwrap();
    }
}
