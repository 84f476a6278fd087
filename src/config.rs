use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::color_mode::ColorMode;
use crate::retry::RetryPolicy;
use crate::tasks::buttons::KeyMap;

const DEFAULT_HISTORY_PATH: &str = "/var/lib/photo-frame/history.json";
const DEFAULT_COLOR_MODE_PATH: &str = "/var/lib/photo-frame/color-mode.json";
const DEFAULT_PREVIEW_OUTPUT_PATH: &str = "/run/photo-frame/frame.png";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Directory watched (non-recursively) for photos.
    pub photo_library_path: PathBuf,
    /// Rotation history record.
    pub history_path: PathBuf,
    /// Color mode record.
    pub color_mode_path: PathBuf,
    /// Color mode used until one has been persisted.
    pub default_color_mode: ColorMode,
    /// Local hour after which the daily rotation happens.
    pub change_hour: u32,
    /// Library size above which the oldest photos are deleted.
    pub max_photos: usize,
    /// Lull after the last file-creation event before an upload burst is processed.
    #[serde(with = "humantime_serde")]
    pub ingest_quiet_period: Duration,
    /// Polling loop interval.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How often the rotation is reconciled against the directory.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// How often the storage ceiling is enforced.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    pub display_retry: DisplayRetryConfig,
    pub display: DisplayConfig,
    pub buttons: ButtonConfig,
    /// Optional deterministic seed for queue shuffles.
    pub shuffle_seed: Option<u64>,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        serde_yaml::from_str(&s)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.photo_library_path.as_os_str().is_empty(),
            "photo-library-path must not be empty"
        );
        ensure!(
            self.history_path.file_name().is_some(),
            "history-path must include a file name"
        );
        ensure!(
            self.color_mode_path.file_name().is_some(),
            "color-mode-path must include a file name"
        );
        ensure!(
            self.change_hour < 24,
            "change-hour must be between 0 and 23"
        );
        ensure!(self.max_photos > 0, "max-photos must be greater than zero");
        ensure!(
            !self.ingest_quiet_period.is_zero(),
            "ingest-quiet-period must be positive"
        );
        ensure!(!self.poll_interval.is_zero(), "poll-interval must be positive");
        ensure!(
            !self.refresh_interval.is_zero(),
            "refresh-interval must be positive"
        );
        ensure!(
            !self.cleanup_interval.is_zero(),
            "cleanup-interval must be positive"
        );
        self.display_retry
            .validate()
            .context("invalid display-retry configuration")?;
        self.display
            .validate()
            .context("invalid display configuration")?;
        KeyMap::from_config(&self.buttons).context("invalid buttons configuration")?;
        Ok(self)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            photo_library_path: PathBuf::new(),
            history_path: PathBuf::from(DEFAULT_HISTORY_PATH),
            color_mode_path: PathBuf::from(DEFAULT_COLOR_MODE_PATH),
            default_color_mode: ColorMode::SpectraPalette,
            change_hour: 5,
            max_photos: 1000,
            ingest_quiet_period: Duration::from_secs(3),
            poll_interval: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(6 * 60 * 60),
            display_retry: DisplayRetryConfig::default(),
            display: DisplayConfig::default(),
            buttons: ButtonConfig::default(),
            shuffle_seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct DisplayRetryConfig {
    pub attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
}

impl DisplayRetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, self.base_delay)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.attempts >= 1, "display-retry.attempts must be >= 1");
        Ok(())
    }
}

impl Default for DisplayRetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Geometry and identity of the preview sink.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    /// Driver descriptor used to infer the panel's color gamut.
    pub descriptor: String,
    pub output_path: PathBuf,
}

impl DisplayConfig {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.width > 0 && self.height > 0,
            "display.width and display.height must be positive"
        );
        ensure!(
            self.output_path.file_name().is_some(),
            "display.output-path must include a file name"
        );
        Ok(())
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 480,
            descriptor: "inky_e673".to_string(),
            output_path: PathBuf::from(DEFAULT_PREVIEW_OUTPUT_PATH),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ButtonConfig {
    pub enabled: bool,
    /// evdev device; auto-detected from the key codes when omitted.
    pub device_path: Option<PathBuf>,
    pub next: String,
    pub previous: String,
    pub cycle_color_mode: String,
    pub reset_color_mode: String,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_path: None,
            next: "KEY_A".to_string(),
            previous: "KEY_B".to_string(),
            cycle_color_mode: "KEY_C".to_string(),
            reset_color_mode: "KEY_D".to_string(),
        }
    }
}
