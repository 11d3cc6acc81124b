//! Facetrack Agent - face-tracking gimbal daemon
//!
//! Wires the tracking pipeline to the real world:
//! - polls the detection feed file written by the perception pipeline
//! - appends every record to the CSV audit log
//! - drives the pan/tilt/arm gimbal until Ctrl-C, then parks it

use anyhow::Result;
use clap::Parser;
use nalgebra::Vector2;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use facetrack_core::{
    run_ingest, ActuatorConfig, ActuatorStateMachine, ConflictConfig, ControlConfig, CsvAuditLog,
    FrameGeometry, HistoryConfig, Identity, LoopConfig, TrackerLoop, TrackingPipeline,
};
use facetrack_env::{FilePollSource, LoggingServoBus, TokioContext, TrackerContext};

#[derive(Parser, Debug)]
#[command(name = "facetrack-agent", about = "Face-tracking gimbal daemon")]
struct Args {
    /// Detection feed file written by the perception pipeline
    #[arg(long, default_value = "tmp/face_detection_feed.json")]
    feed: PathBuf,

    /// CSV audit log (recreated on startup)
    #[arg(long, default_value = "tmp/face_info_log.csv")]
    audit_log: PathBuf,

    /// File holding the target gallery id, re-read every tick
    #[arg(long, default_value = "tmp/target_identity")]
    target_config: PathBuf,

    /// Default gallery id when the target config is unreadable
    #[arg(long, default_value_t = 1)]
    default_gallery_id: u32,

    /// Tracking tick interval in milliseconds
    #[arg(long, default_value_t = 20)]
    tick_ms: u64,

    /// Camera frame width in pixels
    #[arg(long, default_value_t = 640)]
    frame_width: u32,

    /// Camera frame height in pixels
    #[arg(long, default_value_t = 360)]
    frame_height: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let frame = FrameGeometry {
        width: args.frame_width,
        height: args.frame_height,
    };

    let config = LoopConfig {
        tick_interval: Duration::from_millis(args.tick_ms),
        poll_interval: Duration::from_millis(100),
        frame,
        control: ControlConfig {
            frame_center: frame.center(),
            deadzone: Vector2::new(60.0, 40.0),
            ..ControlConfig::default()
        },
        target_config_path: args.target_config.clone(),
        default_identity: Identity::Gallery(args.default_gallery_id),
    };

    if let Some(dir) = args.audit_log.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let audit = CsvAuditLog::create(&args.audit_log)?;

    let context = TokioContext::shared();
    let pipeline: facetrack_core::SharedPipeline = Arc::new(parking_lot::Mutex::new(TrackingPipeline::new(
        HistoryConfig::default(),
        ConflictConfig::default(),
        frame,
        Box::new(audit),
    )));

    let shutdown = Arc::new(AtomicBool::new(false));

    // Ingestion producer
    let source = FilePollSource::new(&args.feed);
    context.spawn(
        "ingest",
        run_ingest(
            context.clone(),
            source,
            pipeline.clone(),
            frame,
            config.poll_interval,
            shutdown.clone(),
        ),
    );

    // Shutdown watcher: Ctrl-C flips the flag; the loop observes it
    // between iterations and parks the gimbal before exiting.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                return;
            }
            info!("shutdown signal received");
            shutdown.store(true, Ordering::Relaxed);
        });
    }

    let actuator = ActuatorStateMachine::new(ActuatorConfig::default(), LoggingServoBus);
    let tracker = TrackerLoop::new(context, pipeline, actuator, config, shutdown);

    info!(feed = %args.feed.display(), audit = %args.audit_log.display(), "facetrack agent starting");
    tracker.run().await;
    info!("gimbal parked, exiting");
    Ok(())
}
