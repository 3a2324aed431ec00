//! Engine-wide configuration (§10.3): storage root, xattr namespace,
//! default quota, and upload-session expiry, loaded from
//! `~/.config/decomposedfs.toml`.

use std::{fs, io};

use anyhow::{Context, Result, anyhow};
use camino::Utf8PathBuf;
use serde_derive::Deserialize;

/// Sentinel quota values (§3): uncalculated, unknown, unlimited.
pub const QUOTA_UNCALCULATED: i64 = -1;
pub const QUOTA_UNKNOWN: i64 = -2;
pub const QUOTA_UNLIMITED: i64 = -3;

#[inline]
fn default_xattr_namespace() -> String {
    "user.decomposedfs.".to_string()
}

#[inline]
fn default_upload_expiry_seconds() -> i64 {
    24 * 60 * 60
}

#[inline]
fn default_space_quota() -> i64 {
    QUOTA_UNLIMITED
}

#[inline]
fn default_max_chunk_bytes() -> u64 {
    64 * 1024 * 1024
}

#[derive(Debug, Deserialize)]
pub struct Configuration {
    /// Where `nodes/`, `spaces/`, `blobs/`, and `uploads/` live.
    pub root: Utf8PathBuf,

    /// Prefix applied to every extended-attribute key (§6).
    #[serde(default = "default_xattr_namespace")]
    pub xattr_namespace: String,

    /// Default quota for newly created spaces that don't specify one.
    #[serde(default = "default_space_quota")]
    pub default_space_quota: i64,

    /// How long an upload session may sit idle before the sweeper (§5) may
    /// terminate it.
    #[serde(default = "default_upload_expiry_seconds")]
    pub upload_expiry_seconds: i64,

    /// Largest single chunk the legacy v1 assembler (§4.8 "Legacy
    /// chunking") accepts before rejecting the upload outright.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: u64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("./storage"),
            xattr_namespace: default_xattr_namespace(),
            default_space_quota: default_space_quota(),
            upload_expiry_seconds: default_upload_expiry_seconds(),
            max_chunk_bytes: default_max_chunk_bytes(),
        }
    }
}

pub fn load() -> Result<Configuration> {
    let mut confpath: Utf8PathBuf = home::home_dir()
        .ok_or_else(|| anyhow!("Can't find home directory"))?
        .try_into()
        .context("Home directory isn't UTF-8")?;
    confpath.extend([".config", "decomposedfs.toml"]);
    let s = match fs::read_to_string(&confpath) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Configuration::default()),
        found => found,
    }
    .with_context(|| format!("Couldn't open {confpath}"))?;
    let conf = toml::from_str(&s).with_context(|| format!("Couldn't parse {confpath}"))?;
    Ok(conf)
}
