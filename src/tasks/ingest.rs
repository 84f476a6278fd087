use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::{FrameCommand, PhotoCreated};

/// Files that arrived since the last lull, oldest first.
#[derive(Debug, Default)]
pub struct IngestBurst {
    paths: Vec<PathBuf>,
}

/// The decision taken when a burst settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstFlush {
    /// Last arrival; shown immediately.
    pub display: PathBuf,
    /// Everything before it, queued for the regular rotation.
    pub enqueue: Vec<PathBuf>,
}

impl IngestBurst {
    /// Record an arrival. A repeated path counts as arriving again.
    pub fn push(&mut self, path: PathBuf) {
        self.paths.retain(|p| *p != path);
        self.paths.push(path);
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn take(&mut self) -> Option<BurstFlush> {
        let mut paths = std::mem::take(&mut self.paths);
        let display = paths.pop()?;
        Some(BurstFlush {
            display,
            enqueue: paths,
        })
    }
}

/// Debounce creation events and hand each settled burst to the frame task.
///
/// The quiet period restarts on every arrival.
pub async fn run(
    quiet_period: Duration,
    mut from_watcher: Receiver<PhotoCreated>,
    to_frame: Sender<FrameCommand>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut burst = IngestBurst::default();
    let quiet = time::sleep(quiet_period);
    tokio::pin!(quiet);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting ingest task");
                break;
            }
            created = from_watcher.recv() => match created {
                Some(PhotoCreated(path)) => {
                    debug!(path = %path.display(), pending = burst.len() + 1, "ingest: buffered");
                    burst.push(path);
                    quiet.as_mut().reset(Instant::now() + quiet_period);
                }
                None => {
                    info!("watcher channel closed; flushing and exiting ingest task");
                    flush(&mut burst, &to_frame).await;
                    break;
                }
            },
            () = &mut quiet, if !burst.is_empty() => {
                if !flush(&mut burst, &to_frame).await {
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn flush(burst: &mut IngestBurst, to_frame: &Sender<FrameCommand>) -> bool {
    let Some(BurstFlush {
        display: shown,
        enqueue,
    }) = burst.take()
    else {
        return true;
    };
    info!(
        display = %shown.display(),
        queued = enqueue.len(),
        "ingest: burst settled"
    );
    for path in enqueue {
        if to_frame.send(FrameCommand::Enqueue(path)).await.is_err() {
            return false;
        }
    }
    to_frame.send(FrameCommand::DisplayNew(shown)).await.is_ok()
}
