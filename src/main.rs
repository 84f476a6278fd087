use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use eink_photo_frame::color_mode::ColorMode;
use eink_photo_frame::config::Configuration;
use eink_photo_frame::controller::{FrameController, FrameSettings};
use eink_photo_frame::display::{DisplayKind, DisplaySink, PngSink};
use eink_photo_frame::events::{FrameCommand, PhotoCreated};
use eink_photo_frame::library::PhotoLibrary;
use eink_photo_frame::processing;
use eink_photo_frame::store::{ColorModeStore, HistoryStore};
use eink_photo_frame::tasks;

#[derive(Debug, Parser)]
#[command(
    name = "photo-frame",
    version,
    about = "e-paper photo frame slideshow controller"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Deterministic RNG seed for queue shuffles (overrides shuffle-seed)
    #[arg(long = "shuffle-seed", value_name = "SEED")]
    shuffle_seed: Option<u64>,

    /// Render a single image into the display output and exit
    #[arg(long = "render", value_name = "IMAGE")]
    render: Option<PathBuf>,

    /// Color mode for --render (defaults to the persisted mode)
    #[arg(long = "color-mode", value_name = "MODE", value_parser = parse_color_mode)]
    color_mode: Option<ColorMode>,
}

fn parse_color_mode(s: &str) -> Result<ColorMode, String> {
    ColorMode::ALL
        .into_iter()
        .find(|m| m.as_str() == s)
        .ok_or_else(|| format!("expected one of pimoroni, spectra_palette, warmth_boost; got {s}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // init tracing (RUST_LOG controls level, default = info)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let Args {
        config,
        shuffle_seed,
        render,
        color_mode,
    } = Args::parse();

    let mut cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?
        .validated()
        .context("invalid configuration values")?;
    if shuffle_seed.is_some() {
        cfg.shuffle_seed = shuffle_seed;
    }
    tracing::info!(
        "Loaded configuration from {}:\n{:#?}",
        config.display(),
        cfg
    );

    let sink: Arc<dyn DisplaySink> = Arc::new(PngSink::new(
        cfg.display.output_path.clone(),
        (cfg.display.width, cfg.display.height),
        cfg.display.descriptor.clone(),
    ));

    if let Some(image) = render {
        let mode = color_mode
            .unwrap_or_else(|| ColorModeStore::new(&cfg.color_mode_path, cfg.default_color_mode).load());
        return render_once(sink.as_ref(), &image, mode).await;
    }

    let library = PhotoLibrary::new(cfg.photo_library_path.clone());
    library
        .ensure_exists()
        .with_context(|| format!("failed to create {}", library.root().display()))?;
    tracing::info!(
        change_hour = cfg.change_hour,
        max_photos = cfg.max_photos,
        library = %library.root().display(),
        "photo frame starting"
    );

    let controller = Arc::new(FrameController::new(
        library.clone(),
        HistoryStore::new(cfg.history_path.clone()),
        ColorModeStore::new(cfg.color_mode_path.clone(), cfg.default_color_mode),
        Arc::clone(&sink),
        FrameSettings::from_config(&cfg),
    ));

    // Channels (small/bounded)
    let (created_tx, created_rx) = mpsc::channel::<PhotoCreated>(128); // Files -> Ingest
    let (command_tx, command_rx) = mpsc::channel::<FrameCommand>(32); // Ingest/Buttons -> Frame

    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = sigterm.recv() => {
                            tracing::info!("SIGTERM received; initiating shutdown");
                            cancel.cancel();
                        }
                    }
                }
                Err(err) => tracing::warn!("failed to register SIGTERM handler: {err}"),
            }
        });
    }

    let mut tasks = JoinSet::new();

    // Files
    tasks.spawn({
        let library = library.clone();
        let cancel = cancel.clone();
        async move {
            tasks::files::run(library, created_tx, cancel)
                .await
                .context("files task failed")
        }
    });

    // Ingest
    tasks.spawn({
        let to_frame = command_tx.clone();
        let cancel = cancel.clone();
        let quiet = cfg.ingest_quiet_period;
        async move {
            tasks::ingest::run(quiet, created_rx, to_frame, cancel)
                .await
                .context("ingest task failed")
        }
    });

    // Buttons
    tasks.spawn({
        let buttons = cfg.buttons.clone();
        let to_frame = command_tx.clone();
        let cancel = cancel.clone();
        async move {
            tasks::buttons::run(buttons, tasks::buttons::ButtonGate::new(), to_frame, cancel)
                .await
                .context("button task failed")
        }
    });
    drop(command_tx);

    // Frame
    tasks.spawn({
        let controller = Arc::clone(&controller);
        let timers = tasks::frame::FrameTimers::from_config(&cfg);
        let cancel = cancel.clone();
        async move {
            tasks::frame::run(controller, command_rx, timers, cancel)
                .await
                .context("frame task failed")
        }
    });

    // Drain JoinSet; a failing task takes the others down with it
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("task error: {e:?}");
                cancel.cancel();
            }
            Err(e) => {
                tracing::error!("join error: {e}");
                cancel.cancel();
            }
        }
    }

    if let Err(err) = controller.flush().await {
        tracing::error!("final save failed: {err}");
    }
    if let Err(err) = sink.release() {
        tracing::warn!("failed to release display: {err}");
    }
    tracing::info!("photo frame stopped");
    Ok(())
}

async fn render_once(sink: &dyn DisplaySink, image: &Path, mode: ColorMode) -> Result<()> {
    let resolution = sink.resolution();
    let kind = DisplayKind::detect(sink.descriptor(), resolution);
    let path = image.to_path_buf();
    let frame =
        tokio::task::spawn_blocking(move || processing::render_photo(&path, resolution, mode, kind))
            .await
            .context("render worker failed")??;
    sink.set_image(&frame, Some(mode.saturation()))
        .context("display rejected frame")?;
    sink.present().context("display present failed")?;
    tracing::info!(image = %image.display(), %mode, ?kind, "rendered");
    Ok(())
}
