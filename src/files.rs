//! On-disk helpers shared by request bodies and the uploader.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};
use tokio::fs::{File, OpenOptions};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A file that is deleted when dropped unless it has been kept.
///
/// Used for request bodies streamed to disk and for uploads being written, so
/// that a failed or cancelled transfer never leaves a partial file behind.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    keep: bool,
}

impl TempFile {
    /// Create a new, uniquely named file under `dir`.
    pub async fn create_in(dir: &Path, prefix: &str) -> io::Result<(Self, File)> {
        tokio::fs::create_dir_all(dir).await?;
        loop {
            let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = dir.join(format!("{prefix}-{}-{n}.tmp", std::process::id()));
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((Self::guard(path), file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Take ownership of an existing path.
    pub(crate) fn guard(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop tracking the file so that it survives the guard.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }

    /// Move the file to `dest` and keep it there.
    pub async fn persist(self, dest: &Path) -> io::Result<PathBuf> {
        if tokio::fs::rename(&self.path, dest).await.is_err() {
            // Different filesystem: fall back to copying.
            tokio::fs::copy(&self.path, dest).await?;
            tokio::fs::remove_file(&self.path).await?;
        }
        self.keep();
        Ok(dest.to_path_buf())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temporary file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temporary file {}: {e}", self.path.display()),
        }
    }
}

/// Create `name` under `dir`, or the first free `stem-N.ext` variant.
///
/// Creation uses `create_new`, so two concurrent callers asking for the same
/// name always end up with different files.
pub async fn create_unique(dir: &Path, name: &str) -> io::Result<(TempFile, File)> {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    let mut n = 0u32;
    loop {
        let candidate = match (n, ext) {
            (0, _) => name.to_string(),
            (n, Some(ext)) => format!("{stem}-{n}.{ext}"),
            (n, None) => format!("{stem}-{n}"),
        };
        let path = dir.join(&candidate);
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((TempFile::guard(path), file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Guess a media type from a file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "epub" => "application/epub+zip",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}
