//! Atomic artifact files.
//!
//! Content goes to a temporary file in the destination directory, is synced,
//! then renamed over the target. The temporary file is removed if anything
//! fails before the rename, so readers never observe a partial artifact.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::Result;

/// Write `path` atomically with the bytes produced by `fill`.
pub fn write_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let temp = NamedTempFile::new_in(dir)?;
    let mut writer = BufWriter::new(temp);
    fill(&mut writer)?;
    writer.flush()?;

    let temp = writer.into_inner().map_err(|e| e.into_error())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    log::debug!("wrote {}", path.display());
    Ok(())
}

/// Write a byte buffer atomically.
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    write_atomic(path, |w| {
        w.write_all(bytes)?;
        Ok(())
    })
}

/// Lowercase hex SHA-256 of a buffer.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Path of the checksum file written beside an artifact.
pub fn checksum_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".sha256sum");
    path.with_file_name(name)
}

/// Write `<artifact>.sha256sum` in `sha256sum` format: `<hex>  <file name>`.
pub fn write_checksum(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let line = format!("{}  {}\n", sha256_hex(bytes), file_name);

    let sum_path = checksum_path(path);
    write_bytes(&sum_path, line.as_bytes())?;
    Ok(sum_path)
}

/// Remove and recreate a directory.
pub fn recreate_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::create_dir_all(dir)?;
    Ok(())
}
