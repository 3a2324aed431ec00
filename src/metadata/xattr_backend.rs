//! Real `user.*` extended attributes (the primary metadata backend).

use std::fs::File;

use camino::Utf8Path;
use fs2::FileExt;

use super::{Attrs, MetadataBackend, missing_attribute};
use crate::error::{Result, internal, not_found};

pub struct XattrBackend {
    namespace: String,
}

impl XattrBackend {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{key}", self.namespace)
    }

    fn strip_namespace<'a>(&self, full: &'a str) -> Option<&'a str> {
        full.strip_prefix(&self.namespace)
    }

    fn check_path(&self, path: &Utf8Path) -> Result<()> {
        if path.exists() {
            Ok(())
        } else {
            Err(not_found(format!("{path}")))
        }
    }
}

impl MetadataBackend for XattrBackend {
    fn all(&self, path: &Utf8Path) -> Result<Attrs> {
        self.check_path(path)?;
        let mut attrs = Attrs::new();
        for name in xattr::list(path).map_err(|e| internal(format!("listing {path}: {e}")))? {
            let name = name.to_string_lossy();
            if let Some(key) = self.strip_namespace(&name) {
                if let Some(val) = xattr::get(path, name.as_ref())
                    .map_err(|e| internal(format!("reading {name} on {path}: {e}")))?
                {
                    attrs.insert(key.to_string(), val);
                }
            }
        }
        Ok(attrs)
    }

    fn get(&self, path: &Utf8Path, key: &str) -> Result<Vec<u8>> {
        self.check_path(path)?;
        xattr::get(path, self.namespaced(key))
            .map_err(|e| internal(format!("reading {key} on {path}: {e}")))?
            .ok_or_else(|| missing_attribute(path, key))
    }

    fn list(&self, path: &Utf8Path) -> Result<Vec<String>> {
        Ok(self.all(path)?.into_keys().collect())
    }

    fn set(&self, path: &Utf8Path, key: &str, val: &[u8]) -> Result<()> {
        self.check_path(path)?;
        xattr::set(path, self.namespaced(key), val)
            .map_err(|e| internal(format!("writing {key} on {path}: {e}")))
    }

    fn set_multiple(&self, path: &Utf8Path, attrs: &Attrs, take_lock: bool) -> Result<()> {
        self.check_path(path)?;
        if take_lock {
            let lock_fh =
                File::open(path).map_err(|e| internal(format!("opening {path} to lock: {e}")))?;
            lock_fh
                .lock_exclusive()
                .map_err(|e| internal(format!("locking {path}: {e}")))?;
            let result = self.write_all(path, attrs);
            let _ = lock_fh.unlock();
            result
        } else {
            self.write_all(path, attrs)
        }
    }

    fn remove(&self, path: &Utf8Path, key: &str) -> Result<()> {
        match xattr::remove(path, self.namespaced(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(internal(format!("removing {key} on {path}: {e}"))),
        }
    }

    fn rename(&self, old: &Utf8Path, new: &Utf8Path) -> Result<()> {
        // Xattrs live on the inode, not a separate file, so there's nothing
        // to move here: the caller renames the node directory itself and
        // the attributes come along for free.
        let _ = (old, new);
        Ok(())
    }

    fn purge(&self, path: &Utf8Path) -> Result<()> {
        // Same story: purging the node directory purges its xattrs.
        let _ = path;
        Ok(())
    }
}

impl XattrBackend {
    fn write_all(&self, path: &Utf8Path, attrs: &Attrs) -> Result<()> {
        for (key, val) in attrs {
            self.set(path, key, val)?;
        }
        Ok(())
    }
}
