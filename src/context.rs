//! The engine's process-wide state (§9: "the only process-wide state is
//! the filesystem itself and the small registry of configured backends
//! created at startup and torn down at shutdown. No hidden singletons.").
//!
//! Every component (Node, Lookup, Tree, Permissions, Space manager, Upload
//! pipeline, Recycle) holds an `Arc<Context>` rather than reaching for
//! globals.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::*;

use crate::blobstore::{BlobStore, FsBlobStore};
use crate::config::Configuration;
use crate::error::{Result, internal};
use crate::metadata::{MetadataBackend, SidecarBackend, XattrBackend};

pub struct Context {
    pub root: Utf8PathBuf,
    pub metadata: Arc<dyn MetadataBackend>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Context {
    /// Builds a context from a fully-specified metadata/blob backend pair -
    /// the seam tests hook into to run against a `MemoryBlobStore` and a
    /// bare `SidecarBackend` without touching real xattrs.
    pub fn new(
        root: impl Into<Utf8PathBuf>,
        metadata: Arc<dyn MetadataBackend>,
        blobs: Arc<dyn BlobStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            root: root.into(),
            metadata,
            blobs,
        })
    }

    /// Opens (creating if necessary) the engine rooted at `config.root`,
    /// probing whether the underlying filesystem supports user extended
    /// attributes and falling back to the sidecar backend if not (§4.2,
    /// §9's design note (a)... well, (the metadata-backend note)).
    pub fn open(config: &Configuration) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.root)
            .map_err(|e| internal(format!("creating storage root {}: {e}", config.root)))?;
        for sub in ["nodes", "spaces", "blobs", "uploads"] {
            std::fs::create_dir_all(config.root.join(sub))
                .map_err(|e| internal(format!("creating {sub}/ under {}: {e}", config.root)))?;
        }

        let metadata: Arc<dyn MetadataBackend> = if xattrs_supported(&config.root) {
            info!("Using xattrs for metadata under {}", config.root);
            Arc::new(XattrBackend::new(config.xattr_namespace.clone()))
        } else {
            warn!(
                "Filesystem at {} doesn't support user xattrs; falling back to sidecar files",
                config.root
            );
            Arc::new(SidecarBackend::new())
        };

        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::open(&config.root)?);

        Ok(Self::new(config.root.clone(), metadata, blobs))
    }

    pub fn nodes_root(&self) -> Utf8PathBuf {
        self.root.join("nodes")
    }

    pub fn spaces_root(&self) -> Utf8PathBuf {
        self.root.join("spaces")
    }

    pub fn uploads_root(&self) -> Utf8PathBuf {
        self.root.join("uploads")
    }
}

/// Probes xattr support by writing and removing a throwaway attribute on
/// the storage root.
fn xattrs_supported(root: &Utf8Path) -> bool {
    const PROBE: &str = "user.decomposedfs.probe";
    match xattr::set(root, PROBE, b"1") {
        Ok(()) => {
            let _ = xattr::remove(root, PROBE);
            true
        }
        Err(_) => false,
    }
}
