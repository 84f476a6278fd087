//! Directory listing for the watched photo library.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Extensions (lowercase, without dot) the frame picks up.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "heic"];

/// Return `true` if `path` has a supported image extension, ignoring case.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.iter().any(|e| *e == ext)
        })
}

/// A photo as observed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskPhoto {
    pub path: PathBuf,
    /// Local modification time.
    pub modified: NaiveDateTime,
    pub size_bytes: u64,
}

impl DiskPhoto {
    pub fn stat(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        let modified = meta
            .modified()
            .map(|t| DateTime::<Local>::from(t).naive_local())
            .unwrap_or_else(|_| Local::now().naive_local());
        Ok(Self {
            path: path.to_path_buf(),
            modified,
            size_bytes: meta.len(),
        })
    }
}

/// The single flat directory photos are synced into.
#[derive(Debug, Clone)]
pub struct PhotoLibrary {
    root: PathBuf,
}

impl PhotoLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory if it does not exist yet.
    pub fn ensure_exists(&self) -> io::Result<()> {
        if !self.root.is_dir() {
            info!(path = %self.root.display(), "creating photo library directory");
        }
        fs::create_dir_all(&self.root)
    }

    /// Enumerate the images directly inside the library, sorted by path.
    ///
    /// # Errors
    /// Fails when the directory itself cannot be read. Entries that vanish
    /// while listing are skipped.
    pub fn list(&self) -> io::Result<Vec<DiskPhoto>> {
        // Surface a missing/unreadable root instead of reporting an empty library.
        fs::read_dir(&self.root)?;

        let mut out = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .flatten()
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_supported_image(path) {
                continue;
            }
            match DiskPhoto::stat(path) {
                Ok(photo) => out.push(photo),
                Err(err) => debug!(path = %path.display(), "skipping unreadable entry: {err}"),
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    /// Remove a photo from the medium. A file that is already gone is not an error.
    pub fn delete(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => {
                info!(path = %path.display(), "delete: removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "delete: source vanished; skipping");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
