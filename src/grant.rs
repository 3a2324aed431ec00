//! Grants: per-principal access-control entries stored as node xattrs
//! (§3: `grant.u:<user>`, `grant.g:<group>`), and the capability set they
//! (and the assembled permission result) carry (§4.6).

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;

use crate::error::{Result, bad_request};

bitflags! {
    /// The capability bits a grant (or an assembled permission set) can
    /// carry. One bit per capability named in §4.6.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
    pub struct Capabilities: u32 {
        const STAT                  = 1 << 0;
        const LIST_CONTAINER        = 1 << 1;
        const CREATE_CONTAINER      = 1 << 2;
        const INITIATE_FILE_UPLOAD  = 1 << 3;
        const INITIATE_FILE_DOWNLOAD = 1 << 4;
        const MOVE                  = 1 << 5;
        const DELETE                = 1 << 6;
        const LIST_RECYCLE          = 1 << 7;
        const PURGE_RECYCLE         = 1 << 8;
        const RESTORE_RECYCLE_ITEM  = 1 << 9;
        const LIST_FILE_VERSIONS    = 1 << 10;
        const RESTORE_FILE_VERSION  = 1 << 11;
        const GET_QUOTA             = 1 << 12;
        const ADD_GRANT             = 1 << 13;
        const REMOVE_GRANT          = 1 << 14;
        const UPDATE_GRANT          = 1 << 15;
        const LIST_GRANTS           = 1 << 16;
        const GET_PATH              = 1 << 17;
    }
}

impl Capabilities {
    /// The set an owner always has on their own nodes, regardless of
    /// explicit grants (§4.6 step 3).
    pub fn owner() -> Self {
        Self::all()
    }

    /// Encodes as a compact big-endian integer, the xattr value's payload.
    pub fn to_bytes(self) -> [u8; 4] {
        self.bits().to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| bad_request("grant record isn't 4 bytes"))?;
        Ok(Self::from_bits_truncate(u32::from_be_bytes(arr)))
    }
}

/// The principal a grant (or the caller assembling permissions) is keyed
/// on: a user or a group, each identified by an opaque id string.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum Principal {
    User(String),
    Group(String),
}

impl Principal {
    /// The xattr key this principal's grant is stored under (§3).
    pub fn xattr_key(&self) -> String {
        match self {
            Principal::User(id) => format!("grant.u:{id}"),
            Principal::Group(id) => format!("grant.g:{id}"),
        }
    }

    /// Parses a `grant.u:<id>` / `grant.g:<id>` xattr key back into a
    /// principal, or `None` if `key` isn't a grant key at all.
    pub fn from_xattr_key(key: &str) -> Option<Self> {
        let rest = key.strip_prefix("grant.")?;
        let (kind, id) = rest.split_once(':')?;
        match kind {
            "u" => Some(Principal::User(id.to_string())),
            "g" => Some(Principal::Group(id.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User(id) => write!(f, "user:{id}"),
            Principal::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// The identity of the caller driving an operation: their own user id plus
/// the groups they belong to, used to fold grants during permission
/// assembly (§4.6 step 1).
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user_id: String,
    pub groups: Vec<String>,
}

impl CallerIdentity {
    pub fn new(user_id: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            groups,
        }
    }

    /// Every grant key (on any node) that could apply to this caller.
    pub fn matching_keys(&self) -> Vec<String> {
        let mut keys = vec![Principal::User(self.user_id.clone()).xattr_key()];
        keys.extend(
            self.groups
                .iter()
                .map(|g| Principal::Group(g.clone()).xattr_key()),
        );
        keys
    }
}

/// All grants set directly on one node, keyed by principal.
pub type GrantSet = BTreeMap<Principal, Capabilities>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_capability_bytes() {
        let caps = Capabilities::STAT | Capabilities::DELETE;
        let bytes = caps.to_bytes();
        assert_eq!(Capabilities::from_bytes(&bytes).unwrap(), caps);
    }

    #[test]
    fn parses_grant_keys() {
        assert_eq!(
            Principal::from_xattr_key("grant.u:alice"),
            Some(Principal::User("alice".to_string()))
        );
        assert_eq!(
            Principal::from_xattr_key("grant.g:eng"),
            Some(Principal::Group("eng".to_string()))
        );
        assert_eq!(Principal::from_xattr_key("name"), None);
    }

    #[test]
    fn owner_has_every_capability() {
        assert!(Capabilities::owner().contains(Capabilities::PURGE_RECYCLE));
    }
}
