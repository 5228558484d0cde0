//! Utility functions for cache storage

use sha1::{Digest, Sha1};
use std::io;
use std::path::Path;
use uuid::Uuid;

/// Lowercase hex SHA-1 of a body
pub fn content_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha1::digest(bytes))
}

/// Best-effort file extension from the body's magic bytes
pub fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
}

/// Content-addressed file name: `<sha1>[.<ext>]`
pub fn body_file_name(bytes: &[u8]) -> String {
    let digest = content_digest(bytes);
    match sniff_extension(bytes) {
        Some(ext) => format!("{}.{}", digest, ext),
        None => digest,
    }
}

/// Write a file atomically (unique temp file in the same directory + rename)
pub async fn write_file_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let temp_path = path.with_file_name(format!("{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    if let Err(e) = tokio::fs::write(&temp_path, data).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

/// Delete `*.tmp` files left behind by an interrupted write
pub async fn remove_stray_temp_files(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "tmp") {
            if tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
    }
    Ok(removed)
}
