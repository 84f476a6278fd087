use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use evdev::{Device, EventSummary, KeyCode};
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ButtonConfig;
use crate::events::{ButtonEvent, FrameCommand};

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ButtonTaskError {
    #[error("unknown key code: {0}")]
    UnknownKey(String),
}

/// Busy flag shared by all buttons.
///
/// A press is accepted only while no earlier press is being handled; the
/// rest are dropped, not queued.
#[derive(Debug, Clone, Default)]
pub struct ButtonGate {
    busy: Arc<AtomicBool>,
}

impl ButtonGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Clears the busy flag when dropped.
#[derive(Debug)]
pub struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Key codes bound to each button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMap {
    next: KeyCode,
    previous: KeyCode,
    cycle_color_mode: KeyCode,
    reset_color_mode: KeyCode,
}

impl KeyMap {
    pub fn from_config(cfg: &ButtonConfig) -> Result<Self> {
        Ok(Self {
            next: parse_key(&cfg.next)?,
            previous: parse_key(&cfg.previous)?,
            cycle_color_mode: parse_key(&cfg.cycle_color_mode)?,
            reset_color_mode: parse_key(&cfg.reset_color_mode)?,
        })
    }

    pub fn event_for(&self, key: KeyCode) -> Option<ButtonEvent> {
        match key {
            k if k == self.next => Some(ButtonEvent::Next),
            k if k == self.previous => Some(ButtonEvent::Previous),
            k if k == self.cycle_color_mode => Some(ButtonEvent::CycleColorMode),
            k if k == self.reset_color_mode => Some(ButtonEvent::ResetColorMode),
            _ => None,
        }
    }

    fn keys(&self) -> [KeyCode; 4] {
        [
            self.next,
            self.previous,
            self.cycle_color_mode,
            self.reset_color_mode,
        ]
    }
}

fn parse_key(code: &str) -> Result<KeyCode> {
    KeyCode::from_str(code).map_err(|_| ButtonTaskError::UnknownKey(code.to_string()).into())
}

/// Forward a press to the frame task unless another press is in flight.
pub fn dispatch(gate: &ButtonGate, to_frame: &Sender<FrameCommand>, event: ButtonEvent) -> bool {
    let Some(guard) = gate.try_acquire() else {
        debug!(?event, "button ignored; operation in progress");
        return false;
    };
    info!(?event, "button pressed");
    match to_frame.try_send(FrameCommand::Button {
        event,
        guard: Some(guard),
    }) {
        Ok(()) => true,
        Err(err) => {
            warn!(?event, "dropping button press: {err}");
            false
        }
    }
}

/// Read key-down events from the gpio-keys device and turn them into commands.
pub async fn run(
    cfg: ButtonConfig,
    gate: ButtonGate,
    to_frame: Sender<FrameCommand>,
    cancel: CancellationToken,
) -> Result<()> {
    if !cfg.enabled {
        info!("button task disabled via configuration");
        return Ok(());
    }
    let keymap = KeyMap::from_config(&cfg)?;

    let device = tokio::select! {
        device = open_button_device(&cfg, &keymap) => device,
        _ = cancel.cancelled() => {
            info!("shutdown requested before button device was ready");
            return Ok(());
        }
    };
    let mut stream = device.into_event_stream().context("event stream")?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("button task shutting down");
                break;
            }
            event = stream.next_event() => {
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        warn!("input stream error: {err}");
                        continue;
                    }
                };
                if let EventSummary::Key(_, key, 1) = event.destructure() {
                    if let Some(button) = keymap.event_for(key) {
                        dispatch(&gate, &to_frame, button);
                    }
                }
            }
        }
    }
    Ok(())
}

async fn open_button_device(cfg: &ButtonConfig, keymap: &KeyMap) -> Device {
    let mut delay = INITIAL_RETRY_DELAY;
    loop {
        match try_open_device(cfg, keymap) {
            Ok(device) => return device,
            Err(err) => {
                warn!(
                    "button input device unavailable: {err:?}; retrying in {}s",
                    delay.as_secs()
                );
                time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
            }
        }
    }
}

fn try_open_device(cfg: &ButtonConfig, keymap: &KeyMap) -> Result<Device> {
    if let Some(path) = cfg.device_path.as_ref() {
        return Device::open(path).with_context(|| format!("open {}", path.display()));
    }
    for (path, device) in evdev::enumerate() {
        let supports_all = device
            .supported_keys()
            .is_some_and(|keys| keymap.keys().iter().all(|k| keys.contains(*k)));
        if supports_all {
            info!(device = %path.display(), "using button input device");
            return Ok(device);
        }
    }
    Err(anyhow!("no input device advertises the configured button keys"))
}
