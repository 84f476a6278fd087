//! Orchestrates rotation state, the image pipeline and the display sink.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use image::RgbImage;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, error, info, warn};

use crate::color_mode::ColorMode;
use crate::config::Configuration;
use crate::display::{DisplayKind, DisplaySink};
use crate::error::{DisplayError, PersistenceError, SinkError};
use crate::library::{DiskPhoto, PhotoLibrary};
use crate::processing;
use crate::retry::RetryPolicy;
use crate::rotation::{Direction, PhotoRecord, ReconcileReport, RotationState};
use crate::schedule::DailySchedule;
use crate::store::{ColorModeStore, HistoryStore};

/// What a display-producing operation ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The photo reached the panel.
    Displayed(PathBuf),
    /// The photo became current but could not be shown.
    DisplayFailed(PathBuf),
    /// Nothing to step to; state is unchanged.
    NothingToShow,
}

impl FrameOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Displayed(p) | Self::DisplayFailed(p) => Some(p),
            Self::NothingToShow => None,
        }
    }
}

/// Knobs the controller takes from the configuration.
#[derive(Debug, Clone)]
pub struct FrameSettings {
    pub max_photos: usize,
    pub retry: RetryPolicy,
    pub shuffle_seed: Option<u64>,
}

impl FrameSettings {
    pub fn from_config(cfg: &Configuration) -> Self {
        Self {
            max_photos: cfg.max_photos,
            retry: cfg.display_retry.policy(),
            shuffle_seed: cfg.shuffle_seed,
        }
    }
}

struct FrameState {
    rotation: RotationState,
    color_mode: ColorMode,
    rng: StdRng,
}

/// Single owner of the rotation and the panel.
///
/// Every operation holds one lock across mutate, display and persist, so
/// operations never interleave.
pub struct FrameController {
    state: Mutex<FrameState>,
    history: HistoryStore,
    color_store: ColorModeStore,
    library: PhotoLibrary,
    sink: Arc<dyn DisplaySink>,
    kind: DisplayKind,
    resolution: (u32, u32),
    retry: RetryPolicy,
    max_photos: usize,
}

impl FrameController {
    /// Load persisted state and bind to `sink`. Blocking.
    pub fn new(
        library: PhotoLibrary,
        history: HistoryStore,
        color_store: ColorModeStore,
        sink: Arc<dyn DisplaySink>,
        settings: FrameSettings,
    ) -> Self {
        let rotation = history.load();
        let color_mode = color_store.load();
        let rng = match settings.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let resolution = sink.resolution();
        let kind = DisplayKind::detect(sink.descriptor(), resolution);
        info!(
            width = resolution.0,
            height = resolution.1,
            ?kind,
            %color_mode,
            "frame controller ready"
        );
        Self {
            state: Mutex::new(FrameState {
                rotation,
                color_mode,
                rng,
            }),
            history,
            color_store,
            library,
            sink,
            kind,
            resolution,
            retry: settings.retry,
            max_photos: settings.max_photos,
        }
    }

    pub fn display_kind(&self) -> DisplayKind {
        self.kind
    }

    pub fn library(&self) -> &PhotoLibrary {
        &self.library
    }

    pub async fn snapshot(&self) -> RotationState {
        self.state.lock().await.rotation.clone()
    }

    pub async fn current(&self) -> Option<PathBuf> {
        self.state.lock().await.rotation.current.clone()
    }

    pub async fn last_change(&self) -> Option<NaiveDateTime> {
        self.state.lock().await.rotation.last_change
    }

    pub async fn color_mode(&self) -> ColorMode {
        self.state.lock().await.color_mode
    }

    /// First display after boot.
    ///
    /// An empty library shows nothing. Otherwise a due daily change wins,
    /// then re-showing the persisted `current`, then picking a fresh photo.
    pub async fn startup(
        &self,
        schedule: &DailySchedule,
        now: NaiveDateTime,
    ) -> Result<FrameOutcome, PersistenceError> {
        let disk = match self.library.list() {
            Ok(disk) => disk,
            Err(err) => {
                warn!(root = %self.library.root().display(), "cannot list photo library: {err}");
                Vec::new()
            }
        };
        if disk.is_empty() {
            info!("photo library is empty; waiting for uploads");
            return Ok(FrameOutcome::NothingToShow);
        }

        let mut st = self.state.lock().await;
        if schedule.is_due(st.rotation.last_change, now) {
            info!("time for daily photo change");
            return self.scheduled_change(&mut st, now).await;
        }
        match st.rotation.current.clone() {
            Some(current) => {
                info!(path = %current.display(), "displaying current photo after startup");
                let outcome = self.show_photo(&mut st, &current).await;
                self.history.save(&st.rotation)?;
                Ok(outcome)
            }
            None => {
                info!("no current photo, selecting one");
                self.scheduled_change(&mut st, now).await
            }
        }
    }

    /// Step forward. The queue is reconciled first only when it ran dry.
    pub async fn go_next(&self) -> Result<FrameOutcome, PersistenceError> {
        let mut st = self.state.lock().await;
        if st.rotation.pending.is_empty() {
            self.reconcile(&mut st);
        }
        self.step(&mut st, Direction::Forward).await
    }

    pub async fn go_previous(&self) -> Result<FrameOutcome, PersistenceError> {
        let mut st = self.state.lock().await;
        self.step(&mut st, Direction::Backward).await
    }

    /// Daily rotation: reconcile with the directory, then step forward.
    ///
    /// When only `current` is left it is shown again. The change is stamped
    /// either way so it is not retried until the next day.
    pub async fn change_on_schedule(
        &self,
        now: NaiveDateTime,
    ) -> Result<FrameOutcome, PersistenceError> {
        let mut st = self.state.lock().await;
        self.scheduled_change(&mut st, now).await
    }

    /// Show a newly arrived photo right away, outside the rotation order.
    pub async fn display_immediate(&self, path: &Path) -> Result<FrameOutcome, PersistenceError> {
        let photo = match DiskPhoto::stat(path) {
            Ok(photo) => photo,
            Err(err) => {
                warn!(path = %path.display(), "new photo vanished before display: {err}");
                return Ok(FrameOutcome::NothingToShow);
            }
        };
        info!(path = %path.display(), "displaying new photo immediately");
        let mut st = self.state.lock().await;
        let record = PhotoRecord::new(Local::now().naive_local(), photo.size_bytes);
        st.rotation.promote_immediate(path, record);
        let outcome = self.show_photo(&mut st, path).await;
        self.history.save(&st.rotation)?;
        Ok(outcome)
    }

    /// Queue a newly arrived photo for the regular rotation.
    pub async fn enqueue(&self, path: &Path) -> Result<bool, PersistenceError> {
        let photo = match DiskPhoto::stat(path) {
            Ok(photo) => photo,
            Err(err) => {
                warn!(path = %path.display(), "new photo vanished before queueing: {err}");
                return Ok(false);
            }
        };
        let mut st = self.state.lock().await;
        let record = PhotoRecord::new(Local::now().naive_local(), photo.size_bytes);
        if !st.rotation.enqueue(path, record) {
            debug!(path = %path.display(), "already tracked; not queued");
            return Ok(false);
        }
        info!(path = %path.display(), "added to queue for daily rotation");
        self.history.save(&st.rotation)?;
        Ok(true)
    }

    /// Advance to the next color mode and re-render the current photo.
    pub async fn cycle_color_mode(&self) -> Result<ColorMode, PersistenceError> {
        let mut st = self.state.lock().await;
        let mode = st.color_mode.next();
        self.switch_color_mode(&mut st, mode).await
    }

    /// Return to vendor defaults and re-render the current photo.
    pub async fn reset_color_mode(&self) -> Result<ColorMode, PersistenceError> {
        let mut st = self.state.lock().await;
        self.switch_color_mode(&mut st, ColorMode::Pimoroni).await
    }

    /// Reconcile against the directory outside of a scheduled change.
    pub async fn refresh(&self) -> Result<ReconcileReport, PersistenceError> {
        let mut st = self.state.lock().await;
        let report = self.reconcile(&mut st);
        self.history.save(&st.rotation)?;
        Ok(report)
    }

    /// Delete the oldest photos beyond the configured ceiling.
    pub async fn cleanup_storage(&self) -> Result<Vec<PathBuf>, PersistenceError> {
        let disk = match self.library.list() {
            Ok(disk) => disk,
            Err(err) => {
                warn!("storage cleanup skipped, cannot list library: {err}");
                return Ok(Vec::new());
            }
        };
        info!(
            count = disk.len(),
            max = self.max_photos,
            "storage check"
        );
        let mut st = self.state.lock().await;
        let evicted = st
            .rotation
            .evict_oldest(&disk, self.max_photos, |p| self.library.delete(p));
        if !evicted.is_empty() {
            info!(deleted = evicted.len(), "storage cleanup complete");
        }
        self.history.save(&st.rotation)?;
        Ok(evicted)
    }

    /// Persist everything; used on shutdown.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let st = self.state.lock().await;
        self.history.save(&st.rotation)?;
        self.color_store.save(st.color_mode)
    }

    /// Render `path` in the current color mode without touching the rotation.
    pub async fn render(&self, path: &Path) -> Result<RgbImage, DisplayError> {
        let mode = self.state.lock().await.color_mode;
        self.render_frame(path, mode).await
    }

    async fn scheduled_change(
        &self,
        st: &mut FrameState,
        now: NaiveDateTime,
    ) -> Result<FrameOutcome, PersistenceError> {
        self.reconcile(st);
        st.rotation.last_change = Some(now);
        let outcome = match st.rotation.advance(Direction::Forward) {
            Some(next) => self.show_photo(st, &next).await,
            None => match st.rotation.current.clone() {
                Some(current) => {
                    info!(path = %current.display(), "only the current photo is left; showing it again");
                    self.show_photo(st, &current).await
                }
                None => {
                    warn!("no photos available for scheduled change");
                    FrameOutcome::NothingToShow
                }
            },
        };
        self.history.save(&st.rotation)?;
        info!(
            shown = st.rotation.shown.len(),
            pending = st.rotation.pending.len(),
            "scheduled change complete"
        );
        Ok(outcome)
    }

    async fn step(
        &self,
        st: &mut FrameState,
        direction: Direction,
    ) -> Result<FrameOutcome, PersistenceError> {
        let Some(path) = st.rotation.advance(direction) else {
            match direction {
                Direction::Forward => info!("no more photos available"),
                Direction::Backward => info!("no previous photos available"),
            }
            return Ok(FrameOutcome::NothingToShow);
        };
        let outcome = self.show_photo(st, &path).await;
        self.history.save(&st.rotation)?;
        Ok(outcome)
    }

    async fn switch_color_mode(
        &self,
        st: &mut FrameState,
        mode: ColorMode,
    ) -> Result<ColorMode, PersistenceError> {
        st.color_mode = mode;
        info!(%mode, saturation = mode.saturation(), "color mode changed");
        let saved = self.color_store.save(mode);
        if let Some(current) = st.rotation.current.clone() {
            self.show_photo(st, &current).await;
            self.history.save(&st.rotation)?;
        }
        saved.map(|()| mode)
    }

    fn reconcile(&self, st: &mut FrameState) -> ReconcileReport {
        match self.library.list() {
            Ok(disk) => {
                let FrameState { rotation, rng, .. } = st;
                rotation.reconcile_with_disk(&disk, rng)
            }
            Err(err) => {
                warn!(root = %self.library.root().display(), "reconcile skipped, cannot list library: {err}");
                ReconcileReport::default()
            }
        }
    }

    /// Render and present `path`; bump its display count on success.
    ///
    /// Failures are logged and reported through the outcome; the rotation
    /// keeps `path` as current either way.
    async fn show_photo(&self, st: &mut FrameState, path: &Path) -> FrameOutcome {
        match self.present(path, st.color_mode).await {
            Ok(()) => {
                st.rotation.record_displayed(path);
                info!(path = %path.display(), "displayed");
                FrameOutcome::Displayed(path.to_path_buf())
            }
            Err(err) => {
                error!(path = %path.display(), "error displaying photo: {err}");
                FrameOutcome::DisplayFailed(path.to_path_buf())
            }
        }
    }

    async fn render_frame(&self, path: &Path, mode: ColorMode) -> Result<RgbImage, DisplayError> {
        let owned = path.to_path_buf();
        let (resolution, kind) = (self.resolution, self.kind);
        task::spawn_blocking(move || processing::render_photo(&owned, resolution, mode, kind))
            .await
            .map_err(|err| DisplayError::Prepare {
                path: path.to_path_buf(),
                reason: anyhow::anyhow!("render worker failed: {err}"),
            })?
            .map_err(|reason| DisplayError::Prepare {
                path: path.to_path_buf(),
                reason,
            })
    }

    async fn present(&self, path: &Path, mode: ColorMode) -> Result<(), DisplayError> {
        let frame = Arc::new(self.render_frame(path, mode).await?);
        let saturation = mode.saturation();
        self.retry
            .run(
                |attempt| {
                    let sink = Arc::clone(&self.sink);
                    let frame = Arc::clone(&frame);
                    async move {
                        debug!(attempt, saturation, "display: writing frame");
                        task::spawn_blocking(move || {
                            sink.set_image(&frame, Some(saturation))?;
                            sink.present()
                        })
                        .await
                        .map_err(|err| SinkError::Rejected(format!("display worker failed: {err}")))?
                    }
                },
                SinkError::is_transient,
            )
            .await?;
        Ok(())
    }
}
