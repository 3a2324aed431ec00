//! The default blob store implementation: plain files under
//! `<root>/blobs/<shard>/<id>` (§6).

use std::fs::File;
use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::*;

use super::BlobStore;
use crate::error::{Result, internal, not_found};
use crate::file_util::{move_opened, safe_copy_to_file};
use crate::ids::{BlobId, shard_blob, shard_path};

pub struct FsBlobStore {
    root: Utf8PathBuf,
}

impl FsBlobStore {
    /// Opens the blob store rooted at `<root>/blobs`, creating it if
    /// necessary.
    pub fn open(root: &Utf8Path) -> Result<Self> {
        let root = root.join("blobs");
        std::fs::create_dir_all(&root)
            .map_err(|e| internal(format!("creating blob store at {root}: {e}")))?;
        Ok(Self { root })
    }

    fn path(&self, id: &BlobId) -> Utf8PathBuf {
        self.root.join(shard_path(shard_blob(id))).join(id.to_string())
    }
}

impl BlobStore for FsBlobStore {
    fn upload(&self, id: &BlobId, reader: &mut dyn Read, size: u64) -> Result<()> {
        let path = self.path(id);
        std::fs::create_dir_all(path.parent().expect("blob path has a shard parent"))
            .map_err(|e| internal(format!("creating shard dir for blob {id}: {e}")))?;

        let written = safe_copy_to_file(reader, &path)?;
        if written != size {
            // Clean up: a short blob is worse than a missing one.
            let _ = std::fs::remove_file(&path);
            return Err(internal(format!(
                "blob {id} expected {size} bytes, wrote {written}"
            )));
        }
        trace!("Uploaded blob {id} ({size} bytes) to {path}");
        Ok(())
    }

    fn upload_by_rename(&self, id: &BlobId, from: &Utf8Path) -> Result<bool> {
        let path = self.path(id);
        std::fs::create_dir_all(path.parent().expect("blob path has a shard parent"))
            .map_err(|e| internal(format!("creating shard dir for blob {id}: {e}")))?;

        let fh = File::open(from).map_err(|e| internal(format!("opening {from}: {e}")))?;
        move_opened(from, fh, &path)?;
        trace!("Promoted {from} to blob {id} at {path}");
        Ok(true)
    }

    fn download(&self, id: &BlobId) -> Result<Box<dyn Read + Send>> {
        let path = self.path(id);
        let fh = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                not_found(format!("blob {id}"))
            } else {
                internal(format!("opening blob {id} at {path}: {e}"))
            }
        })?;
        Ok(Box::new(fh))
    }

    fn delete(&self, id: &BlobId) -> Result<()> {
        let path = self.path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted blob {id}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(internal(format!("deleting blob {id} at {path}: {e}"))),
        }
    }

    fn available_size(&self) -> Result<Option<u64>> {
        // No portable stdlib statvfs; callers that need a real number can
        // shell out or add a platform-specific crate. Reporting "unknown"
        // here is consistent with the `-2` quota sentinel (§3).
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_a_blob() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        let store = FsBlobStore::open(&root).unwrap();

        let id = BlobId::new();
        store.upload(&id, &mut &b"hello world"[..], 11).unwrap();

        let mut got = Vec::new();
        store.download(&id).unwrap().read_to_end(&mut got).unwrap();
        assert_eq!(got, b"hello world");

        store.delete(&id).unwrap();
        assert!(store.download(&id).is_err());
    }

    #[test]
    fn rejects_short_write() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        let store = FsBlobStore::open(&root).unwrap();

        let id = BlobId::new();
        assert!(store.upload(&id, &mut &b"short"[..], 100).is_err());
        assert!(store.download(&id).is_err());
    }
}
