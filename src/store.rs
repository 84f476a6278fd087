//! Durable storage for the rotation history and the selected color mode.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::color_mode::ColorMode;
use crate::error::PersistenceError;
use crate::rotation::RotationState;

/// Pretty-print `value` as JSON and replace `path` atomically.
///
/// The document goes to a sibling temp file which is fsynced before being
/// renamed over the destination, so a crash leaves either the old or the new
/// record on disk.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let io_err = |source: io::Error| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let body = serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = temp_sibling(path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(&body)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(err) = result {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(err));
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read `path`, treating a missing file as `None`.
fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// The rotation history record.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted rotation, or the empty rotation when there is none.
    ///
    /// An unreadable or non-JSON record is logged and replaced by the empty
    /// rotation; the next save overwrites it.
    pub fn load(&self) -> RotationState {
        let bytes = match read_optional(&self.path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!(path = %self.path.display(), "no rotation history yet; starting fresh");
                return RotationState::default();
            }
            Err(err) => {
                warn!(path = %self.path.display(), "failed to read rotation history: {err}");
                return RotationState::default();
            }
        };
        match serde_json::from_slice::<RotationState>(&bytes) {
            Ok(mut state) => {
                state.repair();
                info!(
                    shown = state.shown.len(),
                    pending = state.pending.len(),
                    current = ?state.current,
                    "loaded rotation history"
                );
                state
            }
            Err(err) => {
                warn!(path = %self.path.display(), "discarding unreadable rotation history: {err}");
                RotationState::default()
            }
        }
    }

    pub fn save(&self, state: &RotationState) -> Result<(), PersistenceError> {
        write_json_atomic(&self.path, state)?;
        debug!(path = %self.path.display(), "rotation history saved");
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ColorModeRecord {
    color_mode: ColorMode,
}

/// The color mode record, kept apart from the rotation history.
#[derive(Debug, Clone)]
pub struct ColorModeStore {
    path: PathBuf,
    default: ColorMode,
}

impl ColorModeStore {
    pub fn new(path: impl Into<PathBuf>, default: ColorMode) -> Self {
        Self {
            path: path.into(),
            default,
        }
    }

    pub fn default_mode(&self) -> ColorMode {
        self.default
    }

    /// The persisted mode, falling back to the configured default.
    pub fn load(&self) -> ColorMode {
        let bytes = match read_optional(&self.path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return self.default,
            Err(err) => {
                warn!(path = %self.path.display(), "failed to read color mode: {err}");
                return self.default;
            }
        };
        match serde_json::from_slice::<ColorModeRecord>(&bytes) {
            Ok(record) => {
                info!(mode = %record.color_mode, "loaded color mode");
                record.color_mode
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    default = %self.default,
                    "invalid color mode record, using default: {err}"
                );
                self.default
            }
        }
    }

    pub fn save(&self, mode: ColorMode) -> Result<(), PersistenceError> {
        write_json_atomic(&self.path, &ColorModeRecord { color_mode: mode })?;
        debug!(path = %self.path.display(), %mode, "color mode saved");
        Ok(())
    }
}
