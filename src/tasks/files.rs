use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc::{self, Sender};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::events::PhotoCreated;
use crate::library::{PhotoLibrary, is_supported_image};

const INITIAL_RESTART_DELAY: Duration = Duration::from_secs(1);
const MAX_RESTART_DELAY: Duration = Duration::from_secs(60);
const LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

enum WatchExit {
    Cancelled,
    ReceiverGone,
}

/// Image paths that just appeared in the library.
///
/// Files renamed into the directory count as created: sync tools usually
/// write a temporary name first.
pub fn created_images(event: &Event) -> Vec<PathBuf> {
    let is_creation = matches!(
        event.kind,
        EventKind::Create(CreateKind::File | CreateKind::Any)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    );
    if !is_creation {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|p| is_supported_image(p) && !p.is_dir())
        .cloned()
        .collect()
}

/// Watch the library and restart the watcher whenever it dies.
#[instrument(skip_all, fields(root = %library.root().display()))]
pub async fn run(
    library: PhotoLibrary,
    to_ingest: Sender<PhotoCreated>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut delay = INITIAL_RESTART_DELAY;
    loop {
        match watch(&library, &to_ingest, &cancel).await {
            Ok(WatchExit::Cancelled) => {
                info!("cancel received; exiting files task");
                break;
            }
            Ok(WatchExit::ReceiverGone) => {
                info!("ingest channel closed; exiting files task");
                break;
            }
            Err(err) => {
                warn!(
                    "file watcher stopped: {err:#}; restarting in {}s",
                    delay.as_secs()
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = time::sleep(delay) => {}
                }
                delay = (delay * 2).min(MAX_RESTART_DELAY);
            }
        }
    }
    Ok(())
}

async fn watch(
    library: &PhotoLibrary,
    to_ingest: &Sender<PhotoCreated>,
    cancel: &CancellationToken,
) -> Result<WatchExit> {
    library
        .ensure_exists()
        .with_context(|| format!("failed to create {}", library.root().display()))?;

    // Bridge notify callback -> async channel
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Result<Event>>(128);
    let mut watcher = recommended_watcher(move |res| {
        let _ = watch_tx.blocking_send(res);
    })?;
    watcher
        .watch(library.root(), RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", library.root().display()))?;
    info!("file watcher started");

    let mut liveness = time::interval(LIVENESS_INTERVAL);
    liveness.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(WatchExit::Cancelled),

            _ = liveness.tick() => {
                if !library.root().is_dir() {
                    return Err(anyhow!("photo library directory disappeared"));
                }
            }

            res = watch_rx.recv() => match res {
                Some(Ok(event)) => {
                    debug!(kind = ?event.kind, paths = ?event.paths, "notify event");
                    for path in created_images(&event) {
                        info!(path = %path.display(), "fs: new photo");
                        if to_ingest.send(PhotoCreated(path)).await.is_err() {
                            return Ok(WatchExit::ReceiverGone);
                        }
                    }
                }
                Some(Err(err)) => {
                    error!("watch error: {err}");
                    return Err(err.into());
                }
                None => return Err(anyhow!("watcher event channel closed")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, RemoveKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn creates_and_renames_in_are_reported() {
        let created = event(EventKind::Create(CreateKind::File), "/photos/a.jpg");
        let moved_in = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            "/photos/b.HEIC",
        );
        assert_eq!(created_images(&created), vec![PathBuf::from("/photos/a.jpg")]);
        assert_eq!(created_images(&moved_in), vec![PathBuf::from("/photos/b.HEIC")]);
    }

    #[test]
    fn other_events_and_non_images_are_ignored() {
        let removed = event(EventKind::Remove(RemoveKind::File), "/photos/a.jpg");
        let accessed = event(EventKind::Access(AccessKind::Any), "/photos/a.jpg");
        let text = event(EventKind::Create(CreateKind::File), "/photos/notes.txt");
        let moved_out = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            "/photos/a.jpg",
        );
        assert!(created_images(&removed).is_empty());
        assert!(created_images(&accessed).is_empty());
        assert!(created_images(&text).is_empty());
        assert!(created_images(&moved_out).is_empty());
    }
}
