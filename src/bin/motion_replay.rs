//! motion_replay - run the motion pipeline over a directory of still images

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use motion_watch::{
    dispatch::JsonLinesBroadcaster, run_pipeline, DeviceConfig, EventDistributor, EventHistory,
    FeedBuilder, JpegFrameStore, LiveSettings, MotionEvaluator, MotionEvents, SharedSettings,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory of JPEG/PNG frames, replayed in file-name order.
    #[arg(long)]
    input: PathBuf,
    /// Where motion frames are written.
    #[arg(long, default_value = "replay_frames")]
    out: PathBuf,
    /// Per-pixel difference threshold.
    #[arg(long, default_value_t = 25)]
    sensitivity: u8,
    /// Minimum changed-region area in pixels.
    #[arg(long, default_value_t = 500)]
    min_area: u32,
    /// Consecutive motion frames required before an event.
    #[arg(long, default_value_t = 3)]
    min_motion_frames: u32,
    /// Seconds between events. Replays run faster than real time, so this defaults to 0.
    #[arg(long, default_value_t = 0.0)]
    cooldown: f64,
    /// Background decay weight (0 freezes the background at the first frame).
    #[arg(long, default_value_t = 0.5)]
    background_weight: f32,
    /// Append event summaries to this JSON lines file.
    #[arg(long)]
    events_log: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut live = LiveSettings::default();
    live.detector.sensitivity = args.sensitivity;
    live.detector.min_area = args.min_area;
    live.detector.min_motion_frames = args.min_motion_frames;
    live.detector.cooldown_seconds = args.cooldown;
    live.detector.background_weight = args.background_weight;
    live.detector.persist_mode = true;
    live.detector.validate()?;
    let settings = SharedSettings::new(live);

    let feed = FeedBuilder::new()
        .device(DeviceConfig::with_device(args.input.display().to_string()))
        .build()?;
    let evaluator = MotionEvaluator::new(
        settings.clone(),
        args.out.clone(),
        Box::new(JpegFrameStore::default()),
    );
    let history = EventHistory::default();
    let mut distributor = EventDistributor::new(
        settings,
        args.out.clone(),
        Box::new(JpegFrameStore::default()),
        history.clone(),
    );
    if let Some(path) = &args.events_log {
        distributor = distributor.with_broadcaster(Box::new(JsonLinesBroadcaster::new(path)));
    }

    let stats = run_pipeline(MotionEvents::new(feed, evaluator), &distributor);
    log::info!(
        "replay finished: events={} dispatched={} dropped={}",
        stats.events,
        stats.dispatched,
        stats.dropped
    );

    let mut events = history.recent();
    events.reverse();
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}
