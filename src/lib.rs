//! A POSIX-backed, content-addressed storage engine for a sync-and-share
//! service's back end (see `SPEC_FULL.md` in the repo root for the full
//! component breakdown).
//!
//! Three orthogonal primitives make up the node tree: a content-addressed
//! [`blobstore`], a tree of per-object directories ([`node`], [`tree`]),
//! and extended-attribute [`metadata`]. [`upload`] is the resumable,
//! chunked ingestion pipeline that produces new revisions atomically.
//! [`permissions`] and [`space`] provide the grant/quota model those
//! mutate under, [`lookup`] resolves references into [`node::Node`]s, and
//! [`recycle`] is the trash bin surfaced over [`tree`].

pub mod blobstore;
pub mod config;
pub mod context;
pub mod error;
pub mod file_util;
pub mod grant;
pub mod hashing;
pub mod ids;
pub mod lock;
pub mod lookup;
pub mod metadata;
pub mod node;
pub mod permissions;
pub mod recycle;
pub mod space;
pub mod tree;
pub mod upload;
