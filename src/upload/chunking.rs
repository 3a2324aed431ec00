//! Legacy chunking-v1 assembly (§4.8 "Legacy chunking"): a filename of
//! the form `<name>-chunking-<transfer-id>-<total>-<index>` names one
//! chunk of a larger upload; chunks are assembled in a scratch file once
//! all `total` of them have arrived, and this detail never leaks past
//! the pipeline.

use std::io::Write;

use camino::Utf8PathBuf;
use tracing::*;

use crate::error::{Result, bad_request, internal, partial_content};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChunkName {
    pub base_name: String,
    pub transfer_id: String,
    pub total: u32,
    pub index: u32,
}

impl ChunkName {
    /// Parses `<name>-chunking-<transfer-id>-<total>-<index>`, returning
    /// `None` if `name` doesn't match the pattern.
    pub fn parse(name: &str) -> Option<Self> {
        let (base_name, rest) = name.split_once("-chunking-")?;
        let mut parts = rest.rsplitn(3, '-');
        let index: u32 = parts.next()?.parse().ok()?;
        let total: u32 = parts.next()?.parse().ok()?;
        let transfer_id = parts.next()?.to_string();
        Some(ChunkName {
            base_name: base_name.to_string(),
            transfer_id,
            total,
            index,
        })
    }
}

fn scratch_dir(uploads_root: &camino::Utf8Path, transfer_id: &str) -> Utf8PathBuf {
    uploads_root.join("chunking").join(transfer_id)
}

/// Stores one chunk's bytes, and, once every chunk of its transfer has
/// arrived, concatenates them into a scratch file and returns its path
/// and total size so the caller can feed it into the ordinary
/// initiate/write_chunk/finish pipeline under `base_name`.
///
/// Returns `partial-content` while chunks are still missing, matching
/// §7: "caller should continue." Rejects with `bad-request` if a single
/// chunk exceeds `max_chunk_bytes` (§10.3), before it's ever written to
/// the scratch directory.
pub fn assemble_if_chunked(
    uploads_root: &camino::Utf8Path,
    filename: &str,
    bytes: &[u8],
    max_chunk_bytes: u64,
) -> Result<Option<(String, Utf8PathBuf, u64)>> {
    let Some(chunk) = ChunkName::parse(filename) else {
        return Ok(None);
    };

    if bytes.len() as u64 > max_chunk_bytes {
        return Err(bad_request(format!(
            "chunk {} of transfer {} is {}B, over the {max_chunk_bytes}B limit",
            chunk.index,
            chunk.transfer_id,
            bytes.len()
        )));
    }

    let dir = scratch_dir(uploads_root, &chunk.transfer_id);
    std::fs::create_dir_all(&dir).map_err(|e| internal(format!("creating chunk scratch dir: {e}")))?;
    std::fs::write(dir.join(chunk.index.to_string()), bytes)
        .map_err(|e| internal(format!("writing chunk {}: {e}", chunk.index)))?;

    let present = std::fs::read_dir(&dir)
        .map_err(|e| internal(format!("listing chunk dir {dir}: {e}")))?
        .count() as u32;
    if present < chunk.total {
        trace!(
            "chunk {}/{} of transfer {} stored, waiting for the rest",
            chunk.index, chunk.total, chunk.transfer_id
        );
        return Err(partial_content(format!(
            "{}/{} chunks of transfer {} received",
            present, chunk.total, chunk.transfer_id
        )));
    }

    let assembled_path = dir.join("assembled");
    let mut out = std::fs::File::create(&assembled_path)
        .map_err(|e| internal(format!("creating assembled file: {e}")))?;
    let mut total_size = 0u64;
    for index in 0..chunk.total {
        let part = std::fs::read(dir.join(index.to_string()))
            .map_err(|e| internal(format!("reading chunk {index}: {e}")))?;
        total_size += part.len() as u64;
        out.write_all(&part)
            .map_err(|e| internal(format!("assembling chunk {index}: {e}")))?;
    }
    debug!(
        "assembled {} chunks ({total_size}B) for transfer {} -> {}",
        chunk.total, chunk.transfer_id, chunk.base_name
    );
    Ok(Some((chunk.base_name, assembled_path, total_size)))
}
