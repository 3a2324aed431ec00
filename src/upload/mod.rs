//! Upload pipeline (§4.8, component H): the resumable two-phase protocol -
//! initiate, one or more chunk writes, finalize - with triple-checksum
//! verification and quota enforcement.
//!
//! Asynchronous post-processing (§9: "model it as a message passed to a
//! worker") is a plain channel plus a caller-driven consumer loop, not a
//! thread we spin up ourselves - consistent with "no hidden singletons."

mod chunking;
pub mod session;

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};

use jiff::Timestamp;
use tracing::*;

use crate::context::Context;
use crate::error::{Result, aborted, bad_request, checksum_mismatch, insufficient_storage, internal, precondition_failed};
use crate::grant::{CallerIdentity, Capabilities};
use crate::hashing::{Checksums, HashingReader};
use crate::ids::{BlobId, UploadId};
use crate::node::{Node, Owner, Variant, QUOTA_UNCALCULATED, QUOTA_UNKNOWN, QUOTA_UNLIMITED, keys};
use crate::permissions;
use crate::tree;

pub use chunking::assemble_if_chunked;
pub use session::{Preconditions, UploadSession, UploadState, UploadTarget};

/// Headers accompanying `initiate` (§4.8 step 3-4).
#[derive(Debug, Clone, Default)]
pub struct UploadHeaders {
    pub checksum: Option<String>,
    pub mtime: Option<Timestamp>,
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_unmodified_since: Option<Timestamp>,
    pub lock_id: Option<String>,
}

/// `§4.8: Initiate(ref, length, headers)`.
///
/// `existing` is the already-resolved target node, if any (Lookup's job).
/// `parent` is its parent (or the parent it would be created under).
pub fn initiate(
    caller: &CallerIdentity,
    parent: &Node,
    existing: Option<&Node>,
    filename: &str,
    declared_size: u64,
    size_deferred: bool,
    headers: UploadHeaders,
) -> Result<UploadSession> {
    if let Some(target) = existing {
        if target.is_dir()? {
            return Err(precondition_failed(format!("{filename:?} is a directory")));
        }
        if !permissions::has_permission(caller, target, Capabilities::INITIATE_FILE_UPLOAD)? {
            return Err(crate::error::permission_denied(format!(
                "{} lacks initiate_file_upload on {filename:?}",
                caller.user_id
            )));
        }
        target.check_lock(headers.lock_id.as_deref(), Timestamp::now())?;
    } else if !permissions::has_permission(caller, parent, Capabilities::INITIATE_FILE_UPLOAD)? {
        return Err(crate::error::permission_denied(format!(
            "{} lacks initiate_file_upload on parent of {filename:?}",
            caller.user_id
        )));
    }

    if headers.if_none_match.as_deref() == Some("*") && existing.is_some() {
        return Err(aborted(format!("{filename:?} already exists")));
    }

    let space = parent.find_storage_space_root()?;
    check_quota(&space, declared_size, existing)?;

    let client_checksum = match &headers.checksum {
        Some(raw) => {
            let (algo, bytes) = Checksums::parse_client_checksum(raw)
                .ok_or_else(|| bad_request(format!("unrecognized checksum header {raw:?}")))?;
            Some((algo.into(), bytes))
        }
        None => None,
    };

    let target = UploadTarget {
        space_id: space.id(),
        parent_id: parent.id(),
        filename: filename.to_string(),
    };
    let session = UploadSession {
        id: UploadId::new(),
        target,
        declared_size,
        size_deferred,
        bytes_received: 0,
        client_checksum,
        mtime_override: headers.mtime,
        preconditions: Preconditions {
            if_match: headers.if_match,
            if_none_match: headers.if_none_match,
            if_unmodified_since: headers.if_unmodified_since,
        },
        executant: caller.user_id.clone(),
        space_owner: space.owner()?.id,
        lock_id: headers.lock_id,
        state: UploadState::Initiated,
        expires_at: None,
    };
    session.save(&parent.ctx().uploads_root())?;
    debug!("initiate upload {} for {filename:?} ({declared_size}B)", session.id);
    Ok(session)
}

fn check_quota(space: &Node, declared_size: u64, existing: Option<&Node>) -> Result<()> {
    let quota = space.quota()?;
    if quota == QUOTA_UNLIMITED || quota == QUOTA_UNCALCULATED || quota == QUOTA_UNKNOWN {
        return Ok(());
    }
    let existing_size = existing.map(|n| n.blob_size()).transpose()?.unwrap_or(0);
    let projected = space.tree_size()? + declared_size as i64 - existing_size as i64;
    if projected > quota {
        return Err(insufficient_storage(format!(
            "space {} quota {quota} would be exceeded by {projected}",
            space.id()
        )));
    }
    Ok(())
}

/// `§4.8: Write_chunk(upload_id, offset, reader)`. Strict sequential
/// append: `offset` must equal the session's current `bytes_received`.
pub fn write_chunk(
    ctx: &Arc<Context>,
    upload_id: UploadId,
    offset: u64,
    reader: &mut dyn Read,
) -> Result<u64> {
    let uploads_root = ctx.uploads_root();
    let mut session = UploadSession::load(&uploads_root, upload_id)?;
    if offset != session.bytes_received {
        return Err(precondition_failed(format!(
            "chunk offset {offset} doesn't match session offset {}",
            session.bytes_received
        )));
    }

    let bytes_path = UploadSession::bytes_path(&uploads_root, upload_id);
    let mut fh = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&bytes_path)
        .map_err(|e| internal(format!("opening upload bytes {bytes_path}: {e}")))?;

    let written = std::io::copy(reader, &mut fh).map_err(|e| internal(e.to_string()))?;
    session.bytes_received += written;
    session.state = UploadState::Receiving;
    session.save(&uploads_root)?;
    Ok(written)
}

/// The outcome communicated to the asynchronous post-processing worker
/// (§9).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PostProcessOutcome {
    Continue,
    Abort,
    Delete,
}

pub type PostProcessSender = Sender<(UploadId, PostProcessOutcome)>;
pub type PostProcessReceiver = Receiver<(UploadId, PostProcessOutcome)>;

/// A channel pair for the asynchronous post-processing path. The caller
/// owns the consumer loop (`recv()` + `finish_async_step`); we supply no
/// background thread of our own.
pub fn post_process_channel() -> (PostProcessSender, PostProcessReceiver) {
    channel()
}

/// `§4.8: Finish(upload_id)`, synchronous variant (steps 1-7 run inline).
pub fn finish(
    ctx: &Arc<Context>,
    upload_id: UploadId,
    parent: &Node,
    existing: Option<&Node>,
    async_tx: Option<&PostProcessSender>,
) -> Result<Node> {
    let uploads_root = ctx.uploads_root();
    let mut session = UploadSession::load(&uploads_root, upload_id)?;

    if let Err(e) = check_preconditions(&session.preconditions, existing) {
        warn!("upload {upload_id} rejected at finalize: {e}");
        return reject_with(ctx, &mut session, e);
    }

    session.state = UploadState::Finalizing;
    session.save(&uploads_root)?;

    // Step 1: stream the bytes through the tee hasher, confirming length.
    let bytes_path = UploadSession::bytes_path(&uploads_root, upload_id);
    let fh = std::fs::File::open(&bytes_path)
        .map_err(|e| internal(format!("opening upload bytes {bytes_path}: {e}")))?;
    let mut hasher = HashingReader::new(fh);
    let mut sink = std::io::sink();
    std::io::copy(&mut hasher, &mut sink).map_err(|e| internal(e.to_string()))?;
    let (checksums, total_len, _) = hasher.finalize();
    if total_len != session.declared_size {
        return reject(ctx, &mut session, format!(
            "upload {upload_id} wrote {total_len}B, declared {}",
            session.declared_size
        ));
    }

    // Step 2: verify the client-declared checksum, if any.
    if let Some((algo, expected)) = &session.client_checksum {
        if !checksums.matches((*algo).into(), expected) {
            return reject(ctx, &mut session, format!("checksum mismatch on upload {upload_id}"));
        }
    }

    // Step 3: materialize a revision of the previous blob, if any.
    let target = match existing {
        Some(node) => node.clone(),
        None => tree::touch_file(
            parent,
            &session.target.filename,
            Owner {
                id: session.executant.clone(),
                idp: String::new(),
                kind: "user".to_string(),
            },
        )?,
    };

    let prev_blob_id = target.blob_id()?;
    let prev_size = target.blob_size()?;
    if let Some(prev_blob) = prev_blob_id {
        let prev_mtime = target.mtime()?.unwrap_or(Timestamp::now());
        let revision = Node::with_variant(
            Arc::clone(ctx),
            target.id(),
            Variant::Revision(prev_mtime.to_string()),
        );
        std::fs::create_dir_all(revision.internal_path())
            .map_err(|e| internal(format!("creating revision dir: {e}")))?;
        revision.set_metadata(keys::BLOB_ID, prev_blob.to_string().as_bytes())?;
        revision.set_metadata(keys::BLOB_SIZE, prev_size.to_string().as_bytes())?;
        if let Some(prev_checksums) = target.checksums()? {
            revision.set_checksums(&prev_checksums)?;
        }
        revision.set_mtime(prev_mtime)?;
    }

    // Step 4: allocate and promote the new blob (the upload id is reused).
    // `uploads/<id>` and `blobs/<shard>/<id>` are typically on the same
    // filesystem, so prefer a rename over a full read-and-copy.
    let blob_id = BlobId::from(upload_id.as_uuid());
    let bytes_path2 = UploadSession::bytes_path(&uploads_root, upload_id);
    if !tree::write_blob_by_rename(&target, &blob_id, &bytes_path2)? {
        let mut fh = std::fs::File::open(&bytes_path2)
            .map_err(|e| internal(format!("reopening upload bytes: {e}")))?;
        tree::write_blob(&target, &blob_id, &mut fh, total_len)?;
    }

    // Step 5: atomically update the live node's xattrs.
    target.set_metadata(keys::BLOB_ID, blob_id.to_string().as_bytes())?;
    target.set_metadata(keys::BLOB_SIZE, total_len.to_string().as_bytes())?;
    target.set_checksums(&checksums)?;
    target.set_mtime(session.mtime_override.unwrap_or_else(Timestamp::now))?;

    // Step 6: propagate the size delta.
    tree::propagate(parent, total_len as i64 - prev_size as i64)?;

    // Step 7: drop the session.
    UploadSession::delete(&uploads_root, upload_id)?;

    if let Some(tx) = async_tx {
        let _ = tx.send((upload_id, PostProcessOutcome::Continue));
    }

    info!("finalized upload {upload_id} -> {} ({total_len}B)", target.id());
    Ok(target)
}

fn reject(ctx: &Arc<Context>, session: &mut UploadSession, reason: String) -> Result<Node> {
    warn!("{reason}");
    reject_with(ctx, session, checksum_mismatch(reason))
}

/// Transitions the session to REJECTED and deletes it, returning `err`
/// unchanged - the target node is left as-is (§4.8 REJECTED: "the target
/// node is unchanged").
fn reject_with(ctx: &Arc<Context>, session: &mut UploadSession, err: crate::error::StorageError) -> Result<Node> {
    session.state = UploadState::Rejected;
    let uploads_root = ctx.uploads_root();
    let _ = session.save(&uploads_root);
    UploadSession::delete(&uploads_root, session.id)?;
    Err(err)
}

/// `§4.8 Finish step 3`: re-evaluates the preconditions captured at
/// initiate against the target's current state, since it may have
/// changed between initiate and finish.
fn check_preconditions(preconditions: &Preconditions, existing: Option<&Node>) -> Result<()> {
    if let Some(expected) = &preconditions.if_match {
        match existing {
            Some(node) if &node.etag()? == expected => {}
            _ => return Err(precondition_failed(format!("if-match {expected:?} no longer holds"))),
        }
    }
    if preconditions.if_none_match.as_deref() == Some("*") && existing.is_some() {
        return Err(precondition_failed("if-none-match \"*\" but target now exists".to_string()));
    }
    if let Some(since) = preconditions.if_unmodified_since {
        if let Some(node) = existing {
            if let Some(mtime) = node.mtime()? {
                if mtime > since {
                    return Err(precondition_failed(format!(
                        "target modified at {mtime}, after if-unmodified-since {since}"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Marks a session terminated regardless of its current state (§4.8
/// "any state -> terminate -> TERMINATED").
pub fn terminate(ctx: &Arc<Context>, upload_id: UploadId) -> Result<()> {
    UploadSession::delete(&ctx.uploads_root(), upload_id)
}

/// The supplemented maintenance routine (§10.5): terminates every upload
/// session whose `expires_at` has passed. A plain function, invoked by
/// whatever scheduler the caller already runs - not a thread we start
/// ourselves.
pub fn sweep_expired(ctx: &Arc<Context>, now: Timestamp) -> Result<usize> {
    let uploads_root = ctx.uploads_root();
    let mut swept = 0;
    let entries = match std::fs::read_dir(&uploads_root) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(internal(format!("scanning {uploads_root}: {e}"))),
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let Some(id_str) = name.strip_suffix(".mpk") else {
            continue;
        };
        let Ok(id) = id_str.parse::<UploadId>() else {
            continue;
        };
        match UploadSession::load(&uploads_root, id) {
            Ok(session) if session.is_expired(now) => {
                debug!("sweeping expired upload session {id}");
                UploadSession::delete(&uploads_root, id)?;
                swept += 1;
            }
            Ok(_) => {}
            Err(e) => error!("couldn't read upload session {id} during sweep: {e}"),
        }
    }
    Ok(swept)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blobstore::MemoryBlobStore;
    use crate::metadata::SidecarBackend;
    use crate::node::Owner;

    fn test_ctx() -> (tempfile::TempDir, Arc<Context>) {
        let dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        std::fs::create_dir_all(root.join("nodes")).unwrap();
        std::fs::create_dir_all(root.join("uploads")).unwrap();
        let ctx = Context::new(root, Arc::new(SidecarBackend::new()), Arc::new(MemoryBlobStore::new()));
        (dir, ctx)
    }

    fn owner() -> Owner {
        Owner {
            id: "alice".into(),
            idp: "idp".into(),
            kind: "user".into(),
        }
    }

    fn space_root(ctx: &Arc<Context>) -> Node {
        let root = crate::space::create(ctx, "personal", "space", owner(), None, None).unwrap();
        root
    }

    #[test]
    fn scenario_1_upload_then_overwrite_then_revision() {
        let (_dir, ctx) = test_ctx();
        let space = space_root(&ctx);
        let caller = CallerIdentity::new("alice", vec![]);

        let session = initiate(&caller, &space, None, "a.txt", 5, false, UploadHeaders::default()).unwrap();
        write_chunk(&ctx, session.id, 0, &mut &b"hello"[..]).unwrap();
        let node = finish(&ctx, session.id, &space, None, None).unwrap();
        assert_eq!(node.blob_size().unwrap(), 5);

        let session2 = initiate(&caller, &space, Some(&node), "a.txt", 6, false, UploadHeaders::default()).unwrap();
        write_chunk(&ctx, session2.id, 0, &mut &b"world!"[..]).unwrap();
        finish(&ctx, session2.id, &space, Some(&node), None).unwrap();
        assert_eq!(node.blob_size().unwrap(), 6);

        let revisions: Vec<_> = std::fs::read_dir(node.shard_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().into_string().unwrap().contains(".REV."))
            .collect();
        assert_eq!(revisions.len(), 1);
    }

    #[test]
    fn scenario_4_checksum_mismatch_rejects() {
        let (_dir, ctx) = test_ctx();
        let space = space_root(&ctx);
        let caller = CallerIdentity::new("alice", vec![]);

        let headers = UploadHeaders {
            checksum: Some("sha1 0000000000000000000000000000000000000000".to_string()),
            ..Default::default()
        };
        let session = initiate(&caller, &space, None, "b.txt", 10, false, headers).unwrap();
        write_chunk(&ctx, session.id, 0, &mut &b"0123456789"[..]).unwrap();
        let result = finish(&ctx, session.id, &space, None, None);
        assert!(matches!(result, Err(e) if e.kind() == "checksum-mismatch"));
        assert!(!UploadSession::record_path(&ctx.uploads_root(), session.id).exists());
    }

    #[test]
    fn scenario_3_quota_enforcement() {
        let (_dir, ctx) = test_ctx();
        let space = crate::space::create(&ctx, "personal", "space", owner(), None, Some(2000)).unwrap();
        let caller = CallerIdentity::new("alice", vec![]);

        let session = initiate(&caller, &space, None, "x", 1800, false, UploadHeaders::default()).unwrap();
        write_chunk(&ctx, session.id, 0, &mut vec![0u8; 1800].as_slice()).unwrap();
        let x = finish(&ctx, session.id, &space, None, None).unwrap();

        let result = initiate(&caller, &space, None, "y", 300, false, UploadHeaders::default());
        assert!(matches!(result, Err(e) if e.kind() == "insufficient-storage"));

        let session = initiate(&caller, &space, Some(&x), "x", 2000, false, UploadHeaders::default()).unwrap();
        write_chunk(&ctx, session.id, 0, &mut vec![0u8; 2000].as_slice()).unwrap();
        finish(&ctx, session.id, &space, Some(&x), None).unwrap();
        assert_eq!(space.tree_size().unwrap(), 2000);
    }
}
