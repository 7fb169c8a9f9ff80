//! motion_watchd - motion watch daemon
//!
//! This daemon:
//! 1. Captures frames from the configured device on a background thread
//! 2. Evaluates each new frame against a decaying background model
//! 3. Saves, classifies and announces debounced motion events
//! 4. Serves the dashboard API (recent events, live config, snapshot)

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use motion_watch::{
    api::{ApiConfig, ApiServer, ApiState},
    dispatch::{DiscordNotifier, JsonLinesBroadcaster, TelegramNotifier},
    ingest::ProducerConfig,
    run_pipeline, EventDistributor, EventHistory, FeedBuilder, FrameSource, JpegFrameStore,
    MotionEvaluator, MotionEvents, SharedSettings, WatchConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "MOTION_CONFIG")]
    config: Option<PathBuf>,
    /// Capture device, overriding the config file.
    #[arg(long)]
    device: Option<String>,
    /// Do not start the dashboard API.
    #[arg(long)]
    no_web: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = WatchConfig::load_from(args.config.as_deref())?;
    if let Some(device) = args.device {
        cfg.camera.device = device;
    }
    if args.no_web {
        cfg.web.enabled = false;
    }

    let settings = SharedSettings::new(cfg.settings.clone());
    let history = EventHistory::default();

    let source = Arc::new(FrameSource::new(
        cfg.camera.clone(),
        ProducerConfig {
            retry_delay: cfg.retry_delay,
            ..ProducerConfig::default()
        },
    ));
    source.start()?;

    let api_handle = if cfg.web.enabled {
        let api_config = ApiConfig {
            addr: cfg.web.addr.clone(),
            frame_dir: cfg.frame_dir.clone(),
        };
        let state = ApiState {
            settings: settings.clone(),
            history: history.clone(),
            source: Some(source.clone()),
        };
        Some(ApiServer::new(api_config, state).spawn()?)
    } else {
        None
    };

    let evaluator = MotionEvaluator::new(
        settings.clone(),
        cfg.frame_dir.clone(),
        Box::new(JpegFrameStore::default()),
    );
    let feed = FeedBuilder::new().producer(source.clone()).build()?;

    let mut distributor = EventDistributor::new(
        settings,
        cfg.frame_dir.clone(),
        Box::new(JpegFrameStore::default()),
        history,
    )
    .with_notifier(Box::new(TelegramNotifier::from_settings(&cfg.notify)))
    .with_notifier(Box::new(DiscordNotifier::from_settings(&cfg.notify)));
    if let Some(path) = &cfg.events_log {
        distributor = distributor.with_broadcaster(Box::new(JsonLinesBroadcaster::new(path)));
    }

    log::info!(
        "motion_watchd running: device={} frames={} sensitivity={} min_area={} min_frames={} cooldown={}s",
        cfg.camera.device,
        cfg.frame_dir.display(),
        cfg.settings.detector.sensitivity,
        cfg.settings.detector.min_area,
        cfg.settings.detector.min_motion_frames,
        cfg.settings.detector.cooldown_seconds
    );

    let driver = std::thread::Builder::new()
        .name("motion-driver".to_string())
        .spawn(move || run_pipeline(MotionEvents::new(feed, evaluator), &distributor))?;

    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("motion_watchd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping capture...");

    source.stop();
    match driver.join() {
        Ok(stats) => log::info!(
            "motion pipeline finished: events={} dispatched={} dropped={}",
            stats.events,
            stats.dispatched,
            stats.dropped
        ),
        Err(_) => log::error!("motion pipeline thread panicked"),
    }
    let capture = source.stats();
    log::info!(
        "capture stats: frames={} reconnects={} device={}",
        capture.frames_captured,
        capture.reconnects,
        capture.device
    );
    if let Some(handle) = api_handle {
        handle.stop()?;
    }
    Ok(())
}
