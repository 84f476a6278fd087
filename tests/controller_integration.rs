use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use eink_photo_frame::color_mode::ColorMode;
use eink_photo_frame::controller::{FrameController, FrameOutcome, FrameSettings};
use eink_photo_frame::display::{DisplayKind, DisplaySink};
use eink_photo_frame::error::SinkError;
use eink_photo_frame::library::PhotoLibrary;
use eink_photo_frame::retry::RetryPolicy;
use eink_photo_frame::schedule::DailySchedule;
use eink_photo_frame::store::{ColorModeStore, HistoryStore};
use image::{Rgb, RgbImage};
use tempfile::{TempDir, tempdir};

const PANEL: (u32, u32) = (32, 24);

/// Records every frame and fails `present` according to a script.
#[derive(Default)]
struct RecordingSink {
    staged: Mutex<Vec<Option<f32>>>,
    presented: Mutex<usize>,
    present_attempts: Mutex<usize>,
    failures: Mutex<VecDeque<SinkError>>,
}

impl RecordingSink {
    fn fail_next(&self, err: SinkError) {
        self.failures.lock().unwrap().push_back(err);
    }

    fn presented(&self) -> usize {
        *self.presented.lock().unwrap()
    }

    fn attempts(&self) -> usize {
        *self.present_attempts.lock().unwrap()
    }

    fn saturations(&self) -> Vec<Option<f32>> {
        self.staged.lock().unwrap().clone()
    }
}

impl DisplaySink for RecordingSink {
    fn resolution(&self) -> (u32, u32) {
        PANEL
    }

    fn descriptor(&self) -> &str {
        "inky-impression-spectra"
    }

    fn set_image(&self, frame: &RgbImage, saturation: Option<f32>) -> Result<(), SinkError> {
        assert_eq!(frame.dimensions(), PANEL);
        self.staged.lock().unwrap().push(saturation);
        Ok(())
    }

    fn present(&self) -> Result<(), SinkError> {
        *self.present_attempts.lock().unwrap() += 1;
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        *self.presented.lock().unwrap() += 1;
        Ok(())
    }
}

struct Harness {
    dir: TempDir,
    sink: Arc<RecordingSink>,
}

impl Harness {
    fn new(photos: &[&str]) -> Self {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("photos")).unwrap();
        let harness = Self {
            dir,
            sink: Arc::new(RecordingSink::default()),
        };
        for (i, name) in photos.iter().enumerate() {
            harness.add_photo(name, i as u8);
        }
        harness
    }

    fn library(&self) -> PathBuf {
        self.dir.path().join("photos")
    }

    fn add_photo(&self, name: &str, shade: u8) -> PathBuf {
        let path = self.library().join(name);
        RgbImage::from_pixel(48, 36, Rgb([shade.wrapping_mul(40), 120, 200]))
            .save(&path)
            .unwrap();
        path
    }

    fn history_path(&self) -> PathBuf {
        self.dir.path().join("state").join("history.json")
    }

    fn color_path(&self) -> PathBuf {
        self.dir.path().join("state").join("color_mode.json")
    }

    fn controller(&self, max_photos: usize) -> FrameController {
        let sink: Arc<dyn DisplaySink> = Arc::clone(&self.sink) as Arc<dyn DisplaySink>;
        FrameController::new(
            PhotoLibrary::new(self.library()),
            HistoryStore::new(self.history_path()),
            ColorModeStore::new(self.color_path(), ColorMode::Pimoroni),
            sink,
            FrameSettings {
                max_photos,
                retry: RetryPolicy::new(3, Duration::from_millis(1)),
                shuffle_seed: Some(42),
            },
        )
    }
}

fn at(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 1)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn displayed(outcome: FrameOutcome) -> PathBuf {
    match outcome {
        FrameOutcome::Displayed(path) => path,
        other => panic!("expected a displayed photo, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_library_shows_nothing() {
    let h = Harness::new(&[]);
    let controller = h.controller(100);
    let outcome = controller
        .startup(&DailySchedule::new(6), at(9))
        .await
        .unwrap();
    assert_eq!(outcome, FrameOutcome::NothingToShow);
    assert_eq!(h.sink.attempts(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_boot_picks_a_photo_and_persists() {
    let h = Harness::new(&["a.png", "b.png", "c.png"]);
    let controller = h.controller(100);
    assert_eq!(controller.display_kind(), DisplayKind::SixColor);

    let shown = displayed(
        controller
            .startup(&DailySchedule::new(6), at(9))
            .await
            .unwrap(),
    );
    assert_eq!(controller.current().await, Some(shown.clone()));
    assert_eq!(controller.last_change().await, Some(at(9)));
    assert_eq!(h.sink.presented(), 1);

    let state = controller.snapshot().await;
    assert_eq!(state.pending.len(), 2);
    assert_eq!(state.metadata[&shown].displayed_count, 1);

    let persisted = HistoryStore::new(h.history_path()).load();
    assert_eq!(persisted.current, Some(shown));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_reshows_current_when_not_due() {
    let h = Harness::new(&["a.png", "b.png", "c.png"]);
    let first = {
        let controller = h.controller(100);
        displayed(
            controller
                .startup(&DailySchedule::new(6), at(9))
                .await
                .unwrap(),
        )
    };

    let controller = h.controller(100);
    let again = displayed(
        controller
            .startup(&DailySchedule::new(6), at(15))
            .await
            .unwrap(),
    );
    assert_eq!(again, first);
    assert_eq!(controller.last_change().await, Some(at(9)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn next_then_previous_returns_to_start() {
    let h = Harness::new(&["a.png", "b.png", "c.png", "d.png"]);
    let controller = h.controller(100);
    let first = displayed(
        controller
            .startup(&DailySchedule::new(6), at(9))
            .await
            .unwrap(),
    );

    let second = displayed(controller.go_next().await.unwrap());
    assert_ne!(second, first);
    let back = displayed(controller.go_previous().await.unwrap());
    assert_eq!(back, first);

    let state = controller.snapshot().await;
    assert_eq!(state.pending.front(), Some(&second));
    state.check_invariants().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn previous_at_the_start_is_a_no_op() {
    let h = Harness::new(&["a.png", "b.png"]);
    let controller = h.controller(100);
    controller
        .startup(&DailySchedule::new(6), at(9))
        .await
        .unwrap();
    let before = controller.snapshot().await;

    assert_eq!(
        controller.go_previous().await.unwrap(),
        FrameOutcome::NothingToShow
    );
    assert_eq!(controller.snapshot().await, before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_upload_is_shown_immediately() {
    let h = Harness::new(&["a.png", "b.png"]);
    let controller = h.controller(100);
    let first = displayed(
        controller
            .startup(&DailySchedule::new(6), at(9))
            .await
            .unwrap(),
    );

    let fresh = h.add_photo("fresh.png", 7);
    let shown = displayed(controller.display_immediate(&fresh).await.unwrap());
    assert_eq!(shown, fresh);

    let state = controller.snapshot().await;
    assert_eq!(state.current, Some(fresh.clone()));
    assert_eq!(state.shown.last(), Some(&first));
    assert!(state.metadata.contains_key(&fresh));
    state.check_invariants().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn vanished_upload_is_ignored() {
    let h = Harness::new(&["a.png"]);
    let controller = h.controller(100);
    let ghost = h.library().join("ghost.png");
    assert_eq!(
        controller.display_immediate(&ghost).await.unwrap(),
        FrameOutcome::NothingToShow
    );
    assert!(!controller.enqueue(&ghost).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn enqueue_appends_once() {
    let h = Harness::new(&["a.png", "b.png"]);
    let controller = h.controller(100);
    controller
        .startup(&DailySchedule::new(6), at(9))
        .await
        .unwrap();

    let extra = h.add_photo("extra.png", 3);
    assert!(controller.enqueue(&extra).await.unwrap());
    assert!(!controller.enqueue(&extra).await.unwrap());

    let state = controller.snapshot().await;
    assert_eq!(state.pending.back(), Some(&extra));
    assert_eq!(HistoryStore::new(h.history_path()).load(), state);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_failures_are_retried() {
    let h = Harness::new(&["a.png", "b.png"]);
    let controller = h.controller(100);
    h.sink.fail_next(SinkError::Busy);
    h.sink.fail_next(SinkError::Transport("spi timeout".into()));

    let outcome = controller
        .startup(&DailySchedule::new(6), at(9))
        .await
        .unwrap();
    assert!(matches!(outcome, FrameOutcome::Displayed(_)));
    assert_eq!(h.sink.attempts(), 3);
    assert_eq!(h.sink.presented(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fatal_failure_still_advances() {
    let h = Harness::new(&["a.png", "b.png", "c.png"]);
    let controller = h.controller(100);
    let first = displayed(
        controller
            .startup(&DailySchedule::new(6), at(9))
            .await
            .unwrap(),
    );

    h.sink.fail_next(SinkError::Rejected("bad frame".into()));
    let attempts_before = h.sink.attempts();
    let outcome = controller.go_next().await.unwrap();
    let FrameOutcome::DisplayFailed(failed) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(h.sink.attempts(), attempts_before + 1);

    let state = controller.snapshot().await;
    assert_eq!(state.current, Some(failed.clone()));
    assert_eq!(state.shown.last(), Some(&first));
    assert_eq!(state.metadata[&failed].displayed_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retries_are_bounded() {
    let h = Harness::new(&["a.png"]);
    let controller = h.controller(100);
    for _ in 0..5 {
        h.sink.fail_next(SinkError::Endpoint("/dev/spidev0.0".into()));
    }
    let outcome = controller
        .startup(&DailySchedule::new(6), at(9))
        .await
        .unwrap();
    assert!(matches!(outcome, FrameOutcome::DisplayFailed(_)));
    assert_eq!(h.sink.attempts(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn color_modes_cycle_and_rerender() {
    let h = Harness::new(&["a.png", "b.png"]);
    let controller = h.controller(100);
    controller
        .startup(&DailySchedule::new(6), at(9))
        .await
        .unwrap();
    assert_eq!(controller.color_mode().await, ColorMode::Pimoroni);

    assert_eq!(
        controller.cycle_color_mode().await.unwrap(),
        ColorMode::SpectraPalette
    );
    assert_eq!(
        controller.cycle_color_mode().await.unwrap(),
        ColorMode::WarmthBoost
    );
    assert_eq!(
        ColorModeStore::new(h.color_path(), ColorMode::Pimoroni).load(),
        ColorMode::WarmthBoost
    );
    assert_eq!(
        controller.reset_color_mode().await.unwrap(),
        ColorMode::Pimoroni
    );

    assert_eq!(
        h.sink.saturations(),
        vec![Some(0.5), Some(0.5), Some(0.3), Some(0.5)]
    );
    assert_eq!(h.sink.presented(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn color_mode_change_without_current_only_persists() {
    let h = Harness::new(&[]);
    let controller = h.controller(100);
    assert_eq!(
        controller.cycle_color_mode().await.unwrap(),
        ColorMode::SpectraPalette
    );
    assert_eq!(h.sink.attempts(), 0);
    assert_eq!(
        ColorModeStore::new(h.color_path(), ColorMode::Pimoroni).load(),
        ColorMode::SpectraPalette
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cleanup_deletes_oldest_beyond_the_ceiling() {
    let h = Harness::new(&["a.png", "b.png", "c.png", "d.png", "e.png"]);
    let controller = h.controller(2);
    controller
        .startup(&DailySchedule::new(6), at(9))
        .await
        .unwrap();
    let newest = h.add_photo("zz.png", 5);
    displayed(controller.display_immediate(&newest).await.unwrap());

    let evicted = controller.cleanup_storage().await.unwrap();
    assert_eq!(evicted.len(), 4);
    assert!(!evicted.contains(&newest));
    for path in &evicted {
        assert!(!path.exists(), "{} survived cleanup", path.display());
    }

    let state = controller.snapshot().await;
    assert_eq!(state.current, Some(newest));
    assert_eq!(state.tracked_len(), 2);
    assert_eq!(state.metadata.len(), 2);
    state.check_invariants().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cleanup_never_deletes_the_current_photo() {
    let h = Harness::new(&["a.png", "b.png", "c.png", "d.png", "e.png"]);
    let controller = h.controller(1);
    let current = displayed(
        controller
            .startup(&DailySchedule::new(6), at(9))
            .await
            .unwrap(),
    );

    let evicted = controller.cleanup_storage().await.unwrap();
    assert!((3..=4).contains(&evicted.len()));
    assert!(!evicted.contains(&current));
    assert!(current.exists());
    assert_eq!(controller.snapshot().await.tracked_len(), 5 - evicted.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refresh_picks_up_deleted_and_new_files() {
    let h = Harness::new(&["a.png", "b.png", "c.png"]);
    let controller = h.controller(100);
    let current = displayed(
        controller
            .startup(&DailySchedule::new(6), at(9))
            .await
            .unwrap(),
    );

    let victim = controller
        .snapshot()
        .await
        .pending
        .front()
        .cloned()
        .unwrap();
    std::fs::remove_file(&victim).unwrap();
    let added = h.add_photo("z.png", 9);

    let report = controller.refresh().await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.added, 1);

    let state = controller.snapshot().await;
    assert_eq!(state.current, Some(current));
    assert!(!state.pending.contains(&victim));
    assert_eq!(state.pending.back(), Some(&added));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn flush_writes_both_records() {
    let h = Harness::new(&["a.png"]);
    let controller = h.controller(100);
    controller.flush().await.unwrap();
    assert!(h.history_path().exists());
    assert!(h.color_path().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn render_uses_panel_geometry() {
    let h = Harness::new(&["a.png"]);
    let controller = h.controller(100);
    let frame = controller
        .render(&h.library().join("a.png"))
        .await
        .unwrap();
    assert_eq!(frame.dimensions(), PANEL);
    assert!(controller.render(Path::new("/nonexistent.png")).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_photo_library_completes_the_daily_change() {
    let h = Harness::new(&["only.png"]);
    let controller = h.controller(100);
    let schedule = DailySchedule::new(6);
    let only = displayed(controller.startup(&schedule, at(9)).await.unwrap());

    let next_day = NaiveDate::from_ymd_opt(2025, 6, 2)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    assert!(schedule.is_due(controller.last_change().await, next_day));
    let again = displayed(controller.change_on_schedule(next_day).await.unwrap());
    assert_eq!(again, only);
    assert_eq!(controller.last_change().await, Some(next_day));

    let a_minute_later = next_day + chrono::Duration::minutes(1);
    assert!(!schedule.is_due(controller.last_change().await, a_minute_later));
    assert_eq!(h.sink.presented(), 2);
    assert_eq!(
        HistoryStore::new(h.history_path()).load().last_change,
        Some(next_day)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduled_change_without_photos_is_stamped() {
    let h = Harness::new(&[]);
    let controller = h.controller(100);
    assert_eq!(
        controller.change_on_schedule(at(9)).await.unwrap(),
        FrameOutcome::NothingToShow
    );
    assert_eq!(controller.last_change().await, Some(at(9)));
    assert!(!DailySchedule::new(6).is_due(controller.last_change().await, at(10)));
}
