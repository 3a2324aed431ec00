//! Permissions (§4.6, component F): assembles an effective capability set
//! for (caller, node) by folding grants up the ancestor chain.

use bitflags::bitflags;

use crate::error::Result;
use crate::grant::{CallerIdentity, Capabilities, Principal};
use crate::node::Node;

bitflags! {
    /// Space-level capabilities not naturally modeled as a per-node grant
    /// (§4.6: "an external space-level capability check... for operations
    /// that are not naturally modeled as node grants").
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
    pub struct SpaceCapabilities: u32 {
        const LIST_ALL_SPACES  = 1 << 0;
        const CREATE_SPACE     = 1 << 1;
        const SET_SPACE_QUOTA  = 1 << 2;
        const DELETE_ALL_SPACES = 1 << 3;
    }
}

/// `§4.6: assemble_permissions(ctx, node)`.
///
/// 1. Walk from `node` up to the space root, collecting grants keyed on
///    the caller's user id and each of their group ids.
/// 2. Union the capability bits from every collected grant.
/// 3. If the caller is the node's owner, the full owner set applies
///    regardless of explicit grants.
pub fn assemble_permissions(caller: &CallerIdentity, node: &Node) -> Result<Capabilities> {
    if node.owner()?.id == caller.user_id {
        return Ok(Capabilities::owner());
    }

    let wanted: Vec<Principal> = std::iter::once(Principal::User(caller.user_id.clone()))
        .chain(caller.groups.iter().cloned().map(Principal::Group))
        .collect();

    let mut caps = Capabilities::empty();
    let mut current = node.clone();
    loop {
        let grants = current.grants()?;
        for principal in &wanted {
            if let Some(grant) = grants.get(principal) {
                caps |= *grant;
            }
        }
        if current.is_propagation_terminator()? {
            break;
        }
        match current.parent()? {
            Some(parent) => current = parent,
            None => break,
        }
    }
    Ok(caps)
}

/// `§4.6: has_permission(ctx, node, predicate)`.
pub fn has_permission(
    caller: &CallerIdentity,
    node: &Node,
    predicate: Capabilities,
) -> Result<bool> {
    Ok(assemble_permissions(caller, node)?.contains(predicate))
}

/// The external space-level capability check (§9 Open Question (b)):
/// when an operation is gated by both an external space capability and a
/// per-node grant, the external capability *overrides* the per-node
/// check - if the caller carries it, the per-node grant doesn't need to
/// be consulted at all.
pub fn external_capability_overrides(
    external: SpaceCapabilities,
    required: SpaceCapabilities,
) -> bool {
    external.contains(required)
}
