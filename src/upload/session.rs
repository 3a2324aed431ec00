//! The persisted upload-session record (§3 "Upload session"): a
//! transient metadata blob living at `uploads/<upload_id>.mpk`, alongside
//! the in-progress bytes at `uploads/<upload_id>` (§6).

use std::io::Cursor;

use camino::Utf8PathBuf;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::{Result, internal};
use crate::file_util::safe_copy_to_file;
use crate::hashing::ChecksumAlgorithm;
use crate::ids::{NodeId, UploadId};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum UploadState {
    Initiated,
    Receiving,
    Finalizing,
    Finalized,
    Rejected,
    Terminated,
}

/// The target an upload session writes to: a space, a parent node to
/// create under (if the target doesn't exist yet), and a filename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTarget {
    pub space_id: NodeId,
    pub parent_id: NodeId,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preconditions {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_unmodified_since: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: UploadId,
    pub target: UploadTarget,
    pub declared_size: u64,
    pub size_deferred: bool,
    pub bytes_received: u64,
    pub client_checksum: Option<(ChecksumAlgorithmRecord, Vec<u8>)>,
    pub mtime_override: Option<Timestamp>,
    pub preconditions: Preconditions,
    pub executant: String,
    pub space_owner: String,
    pub lock_id: Option<String>,
    pub state: UploadState,
    pub expires_at: Option<Timestamp>,
}

/// `ChecksumAlgorithm` doesn't derive `Serialize`/`Deserialize` (it's a
/// plain copy-type enum in the hashing module); this is its persisted
/// twin.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChecksumAlgorithmRecord {
    Sha1,
    Md5,
    Adler32,
}

impl From<ChecksumAlgorithm> for ChecksumAlgorithmRecord {
    fn from(a: ChecksumAlgorithm) -> Self {
        match a {
            ChecksumAlgorithm::Sha1 => ChecksumAlgorithmRecord::Sha1,
            ChecksumAlgorithm::Md5 => ChecksumAlgorithmRecord::Md5,
            ChecksumAlgorithm::Adler32 => ChecksumAlgorithmRecord::Adler32,
        }
    }
}

impl From<ChecksumAlgorithmRecord> for ChecksumAlgorithm {
    fn from(a: ChecksumAlgorithmRecord) -> Self {
        match a {
            ChecksumAlgorithmRecord::Sha1 => ChecksumAlgorithm::Sha1,
            ChecksumAlgorithmRecord::Md5 => ChecksumAlgorithm::Md5,
            ChecksumAlgorithmRecord::Adler32 => ChecksumAlgorithm::Adler32,
        }
    }
}

impl UploadSession {
    pub fn bytes_path(uploads_root: &camino::Utf8Path, id: UploadId) -> Utf8PathBuf {
        uploads_root.join(id.to_string())
    }

    pub fn record_path(uploads_root: &camino::Utf8Path, id: UploadId) -> Utf8PathBuf {
        uploads_root.join(format!("{id}.mpk"))
    }

    pub fn save(&self, uploads_root: &camino::Utf8Path) -> Result<()> {
        let bytes = rmp_serde::to_vec(self)
            .map_err(|e| internal(format!("encoding upload session {}: {e}", self.id)))?;
        safe_copy_to_file(Cursor::new(bytes), &Self::record_path(uploads_root, self.id))?;
        Ok(())
    }

    pub fn load(uploads_root: &camino::Utf8Path, id: UploadId) -> Result<Self> {
        let bytes = std::fs::read(Self::record_path(uploads_root, id))
            .map_err(|e| internal(format!("reading upload session {id}: {e}")))?;
        rmp_serde::from_slice(&bytes)
            .map_err(|e| internal(format!("decoding upload session {id}: {e}")))
    }

    pub fn delete(uploads_root: &camino::Utf8Path, id: UploadId) -> Result<()> {
        let _ = std::fs::remove_file(Self::bytes_path(uploads_root, id));
        let _ = std::fs::remove_file(Self::record_path(uploads_root, id));
        Ok(())
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}
