//! An in-memory blob store. Great for testing the tree and upload pipeline
//! without touching the filesystem.

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::sync::Mutex;

use super::BlobStore;
use crate::error::{Result, internal, not_found};
use crate::ids::BlobId;

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<BlobId, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn upload(&self, id: &BlobId, reader: &mut dyn Read, size: u64) -> Result<()> {
        let mut buf = Vec::new();
        let written = io::copy(reader, &mut buf).map_err(|e| internal(e.to_string()))? as u64;
        if written != size {
            return Err(internal(format!(
                "blob {id} expected {size} bytes, wrote {written}"
            )));
        }
        self.blobs.lock().unwrap().insert(*id, buf);
        Ok(())
    }

    fn download(&self, id: &BlobId) -> Result<Box<dyn Read + Send>> {
        let blobs = self.blobs.lock().unwrap();
        let bytes = blobs.get(id).ok_or_else(|| not_found(format!("blob {id}")))?;
        Ok(Box::new(Cursor::new(bytes.clone())))
    }

    fn delete(&self, id: &BlobId) -> Result<()> {
        self.blobs.lock().unwrap().remove(id);
        Ok(())
    }

    fn available_size(&self) -> Result<Option<u64>> {
        Ok(None)
    }
}
