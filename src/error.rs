use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a display sink.
///
/// The variants carry the classification the retry policy needs; callers never
/// inspect error text to decide whether a write is worth repeating.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The panel or its bus is still busy with a previous refresh.
    #[error("display bus busy")]
    Busy,

    /// SPI/I2C/GPIO transport failed mid-transfer.
    #[error("display transport failure: {0}")]
    Transport(String),

    /// The device endpoint vanished or could not be claimed.
    #[error("display endpoint unavailable: {0}")]
    Endpoint(String),

    /// The sink refused the frame (wrong geometry, unsupported format, ...).
    #[error("display rejected frame: {0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SinkError {
    /// Whether repeating the same write has a reasonable chance to succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Busy | Self::Transport(_) | Self::Endpoint(_) => true,
            Self::Rejected(_) => false,
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
        }
    }
}

/// A durable write of frame state could not complete.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode state for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a photo did not reach the panel.
#[derive(Debug, Error)]
pub enum DisplayError {
    /// Decoding or transforming the source image failed.
    #[error("failed to prepare {path}: {reason:#}")]
    Prepare { path: PathBuf, reason: anyhow::Error },

    /// The sink failed permanently or exhausted its retries.
    #[error("display sink failed: {0}")]
    Sink(#[from] SinkError),
}
