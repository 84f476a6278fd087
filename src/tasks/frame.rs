use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use tokio::sync::mpsc::Receiver;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Configuration;
use crate::controller::FrameController;
use crate::error::PersistenceError;
use crate::events::{ButtonEvent, FrameCommand};
use crate::schedule::{DailySchedule, Every};

/// Cadence of the polling loop and its maintenance jobs.
#[derive(Debug, Clone, Copy)]
pub struct FrameTimers {
    pub poll_interval: Duration,
    pub refresh_interval: Duration,
    pub cleanup_interval: Duration,
    pub schedule: DailySchedule,
}

impl FrameTimers {
    pub fn from_config(cfg: &Configuration) -> Self {
        Self {
            poll_interval: cfg.poll_interval,
            refresh_interval: cfg.refresh_interval,
            cleanup_interval: cfg.cleanup_interval,
            schedule: DailySchedule::new(cfg.change_hour),
        }
    }
}

/// Runs every controller operation, one at a time: commands from the
/// buttons and the ingest gate, plus the periodic daily-change and
/// maintenance checks.
pub async fn run(
    controller: Arc<FrameController>,
    mut commands: Receiver<FrameCommand>,
    timers: FrameTimers,
    cancel: CancellationToken,
) -> Result<()> {
    info!(
        change_hour = timers.schedule.change_hour(),
        poll = %humantime::format_duration(timers.poll_interval),
        refresh = %humantime::format_duration(timers.refresh_interval),
        cleanup = %humantime::format_duration(timers.cleanup_interval),
        "frame loop starting"
    );
    let now = Local::now().naive_local();
    report("startup", controller.startup(&timers.schedule, now).await);

    let mut ticker = time::interval(timers.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let started = Instant::now();
    let mut refresh = Every::starting_at(timers.refresh_interval, started);
    let mut cleanup = Every::starting_at(timers.cleanup_interval, started);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting frame task");
                break;
            }
            cmd = commands.recv() => match cmd {
                Some(cmd) => handle_command(&controller, cmd).await,
                None => {
                    info!("command channel closed; exiting frame task");
                    break;
                }
            },
            _ = ticker.tick() => {
                maintenance(&controller, &timers, &mut refresh, &mut cleanup).await;
            }
        }
    }
    Ok(())
}

pub async fn handle_command(controller: &FrameController, cmd: FrameCommand) {
    match cmd {
        FrameCommand::Button { event, guard } => {
            match event {
                ButtonEvent::Next => report("next", controller.go_next().await),
                ButtonEvent::Previous => report("previous", controller.go_previous().await),
                ButtonEvent::CycleColorMode => {
                    report("cycle color mode", controller.cycle_color_mode().await)
                }
                ButtonEvent::ResetColorMode => {
                    report("reset color mode", controller.reset_color_mode().await)
                }
            }
            drop(guard);
        }
        FrameCommand::DisplayNew(path) => {
            report("display new photo", controller.display_immediate(&path).await)
        }
        FrameCommand::Enqueue(path) => report("enqueue", controller.enqueue(&path).await),
    }
}

async fn maintenance(
    controller: &FrameController,
    timers: &FrameTimers,
    refresh: &mut Every,
    cleanup: &mut Every,
) {
    let now = Local::now().naive_local();
    if timers.schedule.is_due(controller.last_change().await, now) {
        info!("time for daily photo change");
        report("scheduled change", controller.change_on_schedule(now).await);
    }
    let tick = Instant::now();
    if refresh.tick(tick) {
        report("refresh", controller.refresh().await);
    }
    if cleanup.tick(tick) {
        info!("running periodic storage cleanup");
        report("storage cleanup", controller.cleanup_storage().await);
    }
}

fn report<T: Debug>(operation: &str, result: Result<T, PersistenceError>) {
    match result {
        Ok(outcome) => debug!(operation, ?outcome, "frame operation finished"),
        Err(err) => error!(operation, "state not persisted: {err}"),
    }
}
