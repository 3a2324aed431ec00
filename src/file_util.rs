//! Small filesystem helpers shared by the blob store and upload pipeline.

use std::fs::File;
use std::io::{self, prelude::*};
use std::path::Path;

use camino::Utf8Path;
use tracing::*;

use crate::error::{Result, internal};

#[cfg(unix)]
pub fn move_opened(from: &Utf8Path, from_fh: File, to: &Utf8Path) -> Result<()> {
    // POSIX lets us rename opened files. Neat!
    match std::fs::rename(from, to) {
        Ok(()) => {
            debug!("Renamed {from} to {to}");
            Ok(())
        }
        // Once stabilized: e.kind() == ErrorKind::CrossesDevices
        Err(e) if e.raw_os_error() == Some(18) /* EXDEV */ => {
            move_by_copy(from, from_fh, to)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(windows)]
pub fn move_opened(from: &Utf8Path, from_fh: File, to: &Utf8Path) -> Result<()> {
    // On Windows, we can't move an open file. Boo, Windows.
    move_by_copy(from, from_fh, to)
}

fn move_by_copy(from: &Utf8Path, mut from_fh: File, to: &Utf8Path) -> Result<()> {
    from_fh.seek(io::SeekFrom::Start(0))?;
    safe_copy_to_file(from_fh, to)?;
    std::fs::remove_file(from)?;
    debug!("Moved {from} to {to} by copy");
    Ok(())
}

/// Copies the reader to a new file at `to + ".part"`, then renames to `to`.
///
/// This guarantees that `to` never contains a partial file: a crash or
/// error midway through leaves only the `.part` file behind.
pub fn safe_copy_to_file<R: Read>(mut from: R, to: &Utf8Path) -> Result<u64> {
    let to_part = to.with_extension(match to.extension() {
        Some(ext) => format!("{ext}.part"),
        None => "part".to_string(),
    });

    let mut to_fh = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&to_part)
        .map_err(|e| internal(format!("couldn't open {to_part}: {e}")))?;

    let copied = io::copy(&mut from, &mut to_fh)
        .map_err(|e| internal(format!("couldn't write {to_part}: {e}")))?;
    drop(from);

    to_fh
        .sync_all()
        .map_err(|e| internal(format!("couldn't sync {to_part}: {e}")))?;
    drop(to_fh);

    std::fs::rename(&to_part, to)
        .map_err(|e| internal(format!("couldn't rename {to_part} to {to}: {e}")))?;
    Ok(copied)
}

/// Recursively removes a directory tree, treating "already gone" as success
/// (callers frequently race a concurrent purge).
pub fn remove_dir_all_tolerant(path: impl AsRef<Path>) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
