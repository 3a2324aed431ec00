//! End-to-end coverage of the six concrete scenarios worked through in
//! design (upload/overwrite/revision, trash round-trip, quota enforcement,
//! checksum rejection, grant inheritance, and duplicate-create rejection),
//! driven entirely through the public API the way a front-end would.

mod common;

use camino::Utf8Path;
use decomposedfs::grant::{Capabilities, Principal};
use decomposedfs::node::NodeType;
use decomposedfs::upload::UploadHeaders;
use decomposedfs::{permissions, recycle, space, tree};

#[test]
fn upload_then_overwrite_then_revision() {
    let (_dir, ctx) = common::test_context();
    let caller = common::caller("alice");
    let root = space::create(&ctx, "personal", "alice-space", common::owner("alice"), None, None).unwrap();

    let headers = UploadHeaders::default();
    let session = decomposedfs::upload::initiate(&caller, &root, None, "a.txt", 5, false, headers).unwrap();
    decomposedfs::upload::write_chunk(&ctx, session.id, 0, &mut &b"hello"[..]).unwrap();
    let file = decomposedfs::upload::finish(&ctx, session.id, &root, None, None).unwrap();
    assert_eq!(file.blob_size().unwrap(), 5);
    assert_eq!(root.tree_size().unwrap(), 5);

    // Overwrite with a longer body; the old blob becomes a revision.
    let existing = root.child("a.txt").unwrap();
    let headers = UploadHeaders::default();
    let session =
        decomposedfs::upload::initiate(&caller, &root, existing.as_ref(), "a.txt", 11, false, headers).unwrap();
    decomposedfs::upload::write_chunk(&ctx, session.id, 0, &mut &b"hello world"[..]).unwrap();
    let file = decomposedfs::upload::finish(&ctx, session.id, &root, existing.as_ref(), None).unwrap();
    assert_eq!(file.blob_size().unwrap(), 11);
    assert_eq!(root.tree_size().unwrap(), 11);

    let revision_dir = file.shard_dir().join(format!("{}.REV.", file.id()));
    let has_revision = std::fs::read_dir(file.shard_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().starts_with(&format!("{}.REV.", file.id())));
    assert!(has_revision, "expected a revision directory under {revision_dir}");
}

#[test]
fn delete_list_restore_purge_round_trip() {
    let (_dir, ctx) = common::test_context();
    let caller = common::caller("alice");
    let root = space::create(&ctx, "personal", "alice-space", common::owner("alice"), None, None).unwrap();
    let dir = tree::create_dir(&root, "docs", common::owner("alice"), false).unwrap();

    tree::delete(&dir, Utf8Path::new("/docs")).unwrap();
    assert!(root.child("docs").unwrap().is_none());

    let trashed = recycle::list(&caller, &root, "", Utf8Path::new("/")).unwrap();
    assert_eq!(trashed.len(), 1);
    assert_eq!(trashed[0].original_path, "/docs");
    assert_eq!(trashed[0].node_type, NodeType::Directory);

    let restored = recycle::restore(&caller, &root, trashed[0].id, &root, "docs-restored").unwrap();
    assert_eq!(restored.name().unwrap(), "docs-restored");
    assert!(root.child("docs-restored").unwrap().is_some());

    tree::delete(&restored, Utf8Path::new("/docs-restored")).unwrap();
    let trashed_again = recycle::list(&caller, &root, "", Utf8Path::new("/")).unwrap();
    assert_eq!(trashed_again.len(), 1);
    recycle::purge(&caller, &root, trashed_again[0].id).unwrap();
    assert!(recycle::list(&caller, &root, "", Utf8Path::new("/")).unwrap().is_empty());
}

#[test]
fn purge_of_an_uploaded_file_deletes_its_blob() {
    let (_dir, ctx) = common::test_context();
    let caller = common::caller("alice");
    let root = space::create(&ctx, "personal", "alice-space", common::owner("alice"), None, None).unwrap();

    let headers = UploadHeaders::default();
    let session = decomposedfs::upload::initiate(&caller, &root, None, "purge-me.bin", 5, false, headers).unwrap();
    decomposedfs::upload::write_chunk(&ctx, session.id, 0, &mut &b"hello"[..]).unwrap();
    let file = decomposedfs::upload::finish(&ctx, session.id, &root, None, None).unwrap();
    let blob_id = file.blob_id().unwrap().expect("finalized file has a blob");
    assert!(ctx.blobs.download(&blob_id).is_ok());

    tree::delete(&file, Utf8Path::new("/purge-me.bin")).unwrap();
    let trashed = recycle::list(&caller, &root, "", Utf8Path::new("/")).unwrap();
    assert_eq!(trashed.len(), 1);
    recycle::purge(&caller, &root, trashed[0].id).unwrap();

    let err = ctx.blobs.download(&blob_id).unwrap_err();
    assert_eq!(err.kind(), "not-found");
}

#[test]
fn quota_enforcement_rejects_oversized_upload() {
    let (_dir, ctx) = common::test_context();
    let caller = common::caller("alice");
    let root = space::create(&ctx, "personal", "alice-space", common::owner("alice"), None, Some(10)).unwrap();

    let headers = UploadHeaders::default();
    let err = decomposedfs::upload::initiate(&caller, &root, None, "big.bin", 11, false, headers).unwrap_err();
    assert_eq!(err.kind(), "insufficient-storage");

    // Exactly at quota succeeds.
    let headers = UploadHeaders::default();
    let session = decomposedfs::upload::initiate(&caller, &root, None, "ok.bin", 10, false, headers).unwrap();
    decomposedfs::upload::write_chunk(&ctx, session.id, 0, &mut &b"0123456789"[..]).unwrap();
    decomposedfs::upload::finish(&ctx, session.id, &root, None, None).unwrap();
    assert_eq!(root.tree_size().unwrap(), 10);
}

#[test]
fn checksum_mismatch_rejects_the_upload() {
    let (_dir, ctx) = common::test_context();
    let caller = common::caller("alice");
    let root = space::create(&ctx, "personal", "alice-space", common::owner("alice"), None, None).unwrap();

    let bogus_sha1 = data_encoding::HEXLOWER.encode(&[0u8; 20]);
    let headers = UploadHeaders {
        checksum: Some(format!("sha1 {bogus_sha1}")),
        ..Default::default()
    };
    let session = decomposedfs::upload::initiate(&caller, &root, None, "a.txt", 5, false, headers).unwrap();
    decomposedfs::upload::write_chunk(&ctx, session.id, 0, &mut &b"hello"[..]).unwrap();
    let err = decomposedfs::upload::finish(&ctx, session.id, &root, None, None).unwrap_err();
    assert_eq!(err.kind(), "checksum-mismatch");

    // The upload session is gone and no file was created.
    assert!(root.child("a.txt").unwrap().is_none());
}

#[test]
fn grant_inheritance_from_an_ancestor_folder() {
    let (_dir, ctx) = common::test_context();
    let root = space::create(&ctx, "personal", "alice-space", common::owner("alice"), None, None).unwrap();
    let shared = tree::create_dir(&root, "shared", common::owner("alice"), false).unwrap();
    let nested = tree::create_dir(&shared, "nested", common::owner("alice"), false).unwrap();

    let bob = common::caller("bob");
    assert!(!permissions::has_permission(&bob, &nested, Capabilities::STAT).unwrap());

    shared
        .set_grant(&Principal::User("bob".to_string()), Capabilities::STAT | Capabilities::LIST_CONTAINER)
        .unwrap();

    assert!(permissions::has_permission(&bob, &nested, Capabilities::STAT).unwrap());
    assert!(!permissions::has_permission(&bob, &nested, Capabilities::DELETE).unwrap());

    // Grants don't cross a nested space boundary.
    let other_space = space::create(&ctx, "personal", "other", common::owner("carol"), None, None).unwrap();
    assert!(!permissions::has_permission(&bob, &other_space, Capabilities::STAT).unwrap());
}

#[test]
fn created_nodes_land_four_shard_levels_deep() {
    let (dir, ctx) = common::test_context();
    let root = space::create(&ctx, "personal", "alice-space", common::owner("alice"), None, None).unwrap();
    tree::create_dir(&root, "docs", common::owner("alice"), false).unwrap();

    let nodes_root = dir.path().join("nodes");
    let node_dirs: Vec<_> = walkdir::WalkDir::new(&nodes_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| {
            e.path()
                .strip_prefix(&nodes_root)
                .map(|rel| rel.components().count() == 5)
                .unwrap_or(false)
        })
        .collect();
    // One shard leaf per node created so far (the space root and "docs").
    assert_eq!(node_dirs.len(), 2);
}

#[test]
fn duplicate_directory_creation_is_rejected() {
    let (_dir, ctx) = common::test_context();
    let root = space::create(&ctx, "personal", "alice-space", common::owner("alice"), None, None).unwrap();
    tree::create_dir(&root, "docs", common::owner("alice"), false).unwrap();

    let err = tree::create_dir(&root, "docs", common::owner("alice"), false).unwrap_err();
    assert_eq!(err.kind(), "already-exists");

    // Exactly one child survives.
    assert_eq!(tree::list_folder(&root).unwrap().len(), 1);
}
