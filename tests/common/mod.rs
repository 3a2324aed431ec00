//! Shared fixtures for the integration tests: an isolated engine context
//! backed by a real temp directory (for the node/shard layout) but a
//! `SidecarBackend` + `MemoryBlobStore` pair, so the tests don't depend on
//! the host filesystem actually supporting user xattrs.

use std::sync::Arc;

use camino::Utf8PathBuf;
use decomposedfs::blobstore::MemoryBlobStore;
use decomposedfs::context::Context;
use decomposedfs::grant::CallerIdentity;
use decomposedfs::metadata::SidecarBackend;
use decomposedfs::node::Owner;

pub fn test_context() -> (tempfile::TempDir, Arc<Context>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::try_from(dir.path().to_owned()).expect("utf8 tempdir");
    for sub in ["nodes", "spaces", "blobs", "uploads"] {
        std::fs::create_dir_all(root.join(sub)).unwrap();
    }
    let ctx = Context::new(root, Arc::new(SidecarBackend::new()), Arc::new(MemoryBlobStore::new()));
    (dir, ctx)
}

pub fn owner(id: &str) -> Owner {
    Owner {
        id: id.to_string(),
        idp: "idp".to_string(),
        kind: "user".to_string(),
    }
}

pub fn caller(id: &str) -> CallerIdentity {
    CallerIdentity::new(id, vec![])
}

pub fn caller_with_groups(id: &str, groups: &[&str]) -> CallerIdentity {
    CallerIdentity::new(id, groups.iter().map(|g| g.to_string()).collect())
}
