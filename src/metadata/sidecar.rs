//! A `<path>.mpk` msgpack sidecar file, used when the filesystem doesn't
//! support user extended attributes (§4.2).

use std::fs::{self, File};
use std::io::Cursor;

use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;

use super::{Attrs, MetadataBackend, missing_attribute};
use crate::error::{Result, internal, not_found};
use crate::file_util::safe_copy_to_file;

pub struct SidecarBackend;

impl SidecarBackend {
    pub fn new() -> Self {
        Self
    }

    fn sidecar_path(path: &Utf8Path) -> Utf8PathBuf {
        let mut s = path.as_str().to_string();
        s.push_str(".mpk");
        Utf8PathBuf::from(s)
    }

    fn read(path: &Utf8Path) -> Result<Attrs> {
        let sidecar = Self::sidecar_path(path);
        match fs::read(&sidecar) {
            Ok(bytes) if bytes.is_empty() => Ok(Attrs::new()),
            Ok(bytes) => rmp_serde::from_slice(&bytes)
                .map_err(|e| internal(format!("corrupt sidecar {sidecar}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Attrs::new()),
            Err(e) => Err(internal(format!("reading {sidecar}: {e}"))),
        }
    }

    fn write(path: &Utf8Path, attrs: &Attrs) -> Result<()> {
        let sidecar = Self::sidecar_path(path);
        let bytes = rmp_serde::to_vec(attrs)
            .map_err(|e| internal(format!("encoding sidecar {sidecar}: {e}")))?;
        safe_copy_to_file(Cursor::new(bytes), &sidecar)?;
        Ok(())
    }
}

impl Default for SidecarBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataBackend for SidecarBackend {
    fn all(&self, path: &Utf8Path) -> Result<Attrs> {
        if !path.exists() {
            return Err(not_found(format!("{path}")));
        }
        Self::read(path)
    }

    fn get(&self, path: &Utf8Path, key: &str) -> Result<Vec<u8>> {
        self.all(path)?
            .get(key)
            .cloned()
            .ok_or_else(|| missing_attribute(path, key))
    }

    fn list(&self, path: &Utf8Path) -> Result<Vec<String>> {
        Ok(self.all(path)?.into_keys().collect())
    }

    fn set(&self, path: &Utf8Path, key: &str, val: &[u8]) -> Result<()> {
        let mut attrs = self.all(path)?;
        attrs.insert(key.to_string(), val.to_vec());
        Self::write(path, &attrs)
    }

    fn set_multiple(&self, path: &Utf8Path, attrs: &Attrs, take_lock: bool) -> Result<()> {
        if !path.exists() {
            return Err(not_found(format!("{path}")));
        }
        let sidecar = Self::sidecar_path(path);
        if take_lock {
            let lock_fh = File::options()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&sidecar)
                .map_err(|e| internal(format!("opening {sidecar} to lock: {e}")))?;
            lock_fh
                .lock_exclusive()
                .map_err(|e| internal(format!("locking {sidecar}: {e}")))?;
            let mut current = Self::read(path)?;
            current.extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
            let result = Self::write(path, &current);
            let _ = lock_fh.unlock();
            result
        } else {
            let mut current = Self::read(path)?;
            current.extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
            Self::write(path, &current)
        }
    }

    fn remove(&self, path: &Utf8Path, key: &str) -> Result<()> {
        let mut attrs = self.all(path)?;
        attrs.remove(key);
        Self::write(path, &attrs)
    }

    fn rename(&self, old: &Utf8Path, new: &Utf8Path) -> Result<()> {
        let old_sidecar = Self::sidecar_path(old);
        let new_sidecar = Self::sidecar_path(new);
        match fs::rename(&old_sidecar, &new_sidecar) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(internal(format!(
                "renaming sidecar {old_sidecar} to {new_sidecar}: {e}"
            ))),
        }
    }

    fn purge(&self, path: &Utf8Path) -> Result<()> {
        match fs::remove_file(Self::sidecar_path(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(internal(format!("purging sidecar for {path}: {e}"))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let node = Utf8PathBuf::try_from(dir.path().join("node")).unwrap();
        fs::create_dir(&node).unwrap();

        let backend = SidecarBackend::new();
        backend.set(&node, "name", b"foo.txt").unwrap();
        backend.set(&node, "type", b"file").unwrap();

        assert_eq!(backend.get(&node, "name").unwrap(), b"foo.txt");
        let mut keys = backend.list(&node).unwrap();
        keys.sort();
        assert_eq!(keys, vec!["name".to_string(), "type".to_string()]);

        backend.remove(&node, "type").unwrap();
        assert!(backend.get(&node, "type").is_err());
    }
}
