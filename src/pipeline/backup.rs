// src/pipeline/backup.rs

//! Backup and atomic replacement of the archive on disk
//!
//! The original archive is copied aside before anything is read into
//! memory. The rewritten archive is written to a temporary file in the
//! destination directory, synced, then renamed over the original, so a
//! reader sees either the old archive or the complete new one.

use crate::archive::{zip_io_error, Archive, WriteOptions};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Restrict a correlation token to characters safe in file names
///
/// Anything outside `[A-Za-z0-9_-]` becomes `_`. An empty token is rejected.
pub fn sanitize_token(token: &str) -> Result<String> {
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::InvalidInput(
            "correlation token must not be empty".to_string(),
        ));
    }
    Ok(token
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Backup location: `<archive-name>.<token>.<UTC timestamp>.bak`
pub fn backup_path(
    archive: &Path,
    token: &str,
    backup_dir: Option<&Path>,
    now: DateTime<Utc>,
) -> PathBuf {
    let name = format!(
        "{}.{}.{}.bak",
        file_name(archive),
        token,
        now.format("%Y%m%dT%H%M%S%.3fZ")
    );
    match backup_dir {
        Some(dir) => dir.join(name),
        None => archive.with_file_name(name),
    }
}

/// Copy the archive to its backup location
pub fn create_backup(archive: &Path, token: &str, backup_dir: Option<&Path>) -> Result<PathBuf> {
    let dest = backup_path(archive, token, backup_dir, Utc::now());

    if let Some(dir) = backup_dir {
        fs::create_dir_all(dir).map_err(|e| Error::write(dir, e))?;
    }

    fs::copy(archive, &dest).map_err(|e| Error::write(&dest, e))?;
    File::open(&dest)
        .and_then(|f| f.sync_all())
        .map_err(|e| Error::write(&dest, e))?;

    info!("Backed up {} to {}", archive.display(), dest.display());
    Ok(dest)
}

/// Remove a backup after a successful run
pub fn remove_backup(backup: &Path) -> Result<()> {
    fs::remove_file(backup).map_err(|e| Error::write(backup, e))?;
    debug!("Removed backup {}", backup.display());
    Ok(())
}

/// Serialize `archive` and atomically replace `dest` with it
///
/// The temporary file lives next to `dest` so the final rename never
/// crosses filesystems. On any error the temporary file is removed and
/// `dest` is left untouched.
pub fn replace_atomic(
    archive: &Archive,
    dest: &Path,
    token: &str,
    options: &WriteOptions,
) -> Result<()> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let prefix = format!(".{}.{}.", file_name(dest), token);
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| Error::write(dir, e))?;
    let tmp_path = tmp.path().to_path_buf();

    archive
        .write_to(tmp.as_file_mut(), options)
        .map_err(|e| Error::write(&tmp_path, zip_io_error(e)))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::write(&tmp_path, e))?;

    // Temp files are created 0600; carry over the original mode
    if let Ok(metadata) = fs::metadata(dest) {
        fs::set_permissions(&tmp_path, metadata.permissions())
            .map_err(|e| Error::write(&tmp_path, e))?;
    }

    tmp.persist(dest).map_err(|e| Error::write(dest, e.error))?;

    // Persist the rename itself; not every filesystem supports this
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }

    debug!("Replaced {} atomically", dest.display());
    Ok(())
}
