//! Tracking loop - orchestrates ingestion, selection, and actuation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       TrackerLoop                           │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │              Context: TrackerContext                 │   │
//! │  │  • now() → arrival times, prune deadlines            │   │
//! │  │  • sleep() → tick cadence                            │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                              │                              │
//! │  ┌─────────┐ ┌──────────┐ ┌──────────┐ ┌───────────────┐    │
//! │  │ HISTORY │ │ CONFLICT │ │ SELECTOR │ │   ACTUATOR    │    │
//! │  │ Buffer  │ │ Resolver │ │          │ │ State Machine │    │
//! │  └─────────┘ └──────────┘ └──────────┘ └───────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ingestion runs as an independent producer task ([`run_ingest`]) feeding
//! the shared [`TrackingPipeline`]; the loop itself is a single logical
//! thread of control. The only blocking points are the bounded feed poll
//! and the inter-tick sleep. Shutdown is observed between iterations only
//! and always runs the neutral-return sequence before the loop exits.

use crate::actuator::ActuatorStateMachine;
use crate::conflict::{ConflictConfig, ConflictResolver};
use crate::control::{compute_deltas, ControlConfig};
use crate::history::{AuditSink, HistoryBuffer, HistoryConfig, HistoryError};
use crate::record::{DetectionRecord, FrameGeometry, Identity};
use crate::selector::TargetSelector;

use facetrack_env::{DetectionSource, ServoBus, TrackerContext};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the tracking loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Tick cadence (default: 20ms, budget ≤ 50ms)
    pub tick_interval: Duration,

    /// Feed poll cadence for the ingestion task (default: 100ms)
    pub poll_interval: Duration,

    /// Camera frame dimensions
    pub frame: FrameGeometry,

    /// Control law parameters
    pub control: ControlConfig,

    /// File holding the configured target gallery id, re-read every tick
    pub target_config_path: PathBuf,

    /// Identity tracked when the config file is missing or unparsable
    pub default_identity: Identity,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(20),
            poll_interval: Duration::from_millis(100),
            frame: FrameGeometry::default(),
            control: ControlConfig::default(),
            target_config_path: PathBuf::from("tmp/target_identity"),
            default_identity: Identity::Gallery(1),
        }
    }
}

/// History + resolver + selector behind one lock.
///
/// Shared between the ingestion producer and the tracking loop; both
/// critical sections are short and never held across an await point.
pub struct TrackingPipeline {
    history: HistoryBuffer,
    resolver: ConflictResolver,
    selector: TargetSelector,
}

impl TrackingPipeline {
    pub fn new(
        history_config: HistoryConfig,
        conflict_config: ConflictConfig,
        frame: FrameGeometry,
        sink: Box<dyn AuditSink>,
    ) -> Self {
        Self {
            history: HistoryBuffer::new(history_config, sink),
            resolver: ConflictResolver::new(conflict_config, frame.center()),
            selector: TargetSelector::new(),
        }
    }

    /// Feeds one record through the resolver window and into the history
    /// (and its audit log). Every record is appended, including ones the
    /// selector will later skip.
    pub fn ingest(
        &mut self,
        now: Duration,
        wall: std::time::SystemTime,
        record: DetectionRecord,
    ) -> Result<(), HistoryError> {
        self.resolver.observe(now, &record);
        self.history.append(now, wall, record)
    }

    /// Time-triggered prune passthrough.
    pub fn maybe_prune(&mut self, now: Duration) -> Result<usize, HistoryError> {
        self.history.maybe_prune(now)
    }

    /// Freshest unconsumed record for `identity`, if any.
    pub fn poll_target(&mut self, identity: Identity) -> Option<DetectionRecord> {
        self.selector.select(&self.history, &self.resolver, identity)
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }
}

/// Pipeline handle shared between the ingestion task and the loop.
pub type SharedPipeline = Arc<Mutex<TrackingPipeline>>;

/// Ingestion producer: polls the detection source, normalizes frames into
/// records, and feeds the shared pipeline until shutdown.
pub async fn run_ingest<Ctx, Src>(
    ctx: Arc<Ctx>,
    mut source: Src,
    pipeline: SharedPipeline,
    frame: FrameGeometry,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
) where
    Ctx: TrackerContext,
    Src: DetectionSource,
{
    info!("ingestion task started");
    while !shutdown.load(Ordering::Relaxed) {
        match source.poll().await {
            Ok(frames) => {
                let now = ctx.now();
                let wall = ctx.system_time();
                let mut pipeline = pipeline.lock();
                for frame_raw in frames {
                    match DetectionRecord::from_frame(&frame_raw, frame, now) {
                        Some(record) => {
                            if let Err(e) = pipeline.ingest(now, wall, record) {
                                warn!(error = %e, "audit append failed");
                            }
                        }
                        None => {
                            debug!(offset = frame_raw.buffer_offset, "frame without detection, skipped");
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "feed poll failed"),
        }
        ctx.sleep(poll_interval).await;
    }
    info!("ingestion task stopped");
}

/// The fixed-cadence tracking loop.
pub struct TrackerLoop<Ctx, B>
where
    Ctx: TrackerContext,
    B: ServoBus,
{
    context: Arc<Ctx>,
    pipeline: SharedPipeline,
    actuator: ActuatorStateMachine<B>,
    config: LoopConfig,
    shutdown: Arc<AtomicBool>,
    tick_count: u64,
}

impl<Ctx, B> TrackerLoop<Ctx, B>
where
    Ctx: TrackerContext,
    B: ServoBus,
{
    pub fn new(
        context: Arc<Ctx>,
        pipeline: SharedPipeline,
        actuator: ActuatorStateMachine<B>,
        config: LoopConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            context,
            pipeline,
            actuator,
            config,
            shutdown,
            tick_count: 0,
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn actuator(&self) -> &ActuatorStateMachine<B> {
        &self.actuator
    }

    /// Re-reads the configured target identity. Missing or unparsable
    /// config falls back to the default identity ("no data yet", never
    /// fatal).
    fn resolve_target_identity(&self) -> Identity {
        match std::fs::read_to_string(&self.config.target_config_path) {
            Ok(content) => match content.trim().parse::<u32>() {
                Ok(id) => Identity::Gallery(id),
                Err(e) => {
                    warn!(
                        path = %self.config.target_config_path.display(),
                        error = %e,
                        "unparsable target config, using default identity"
                    );
                    self.config.default_identity
                }
            },
            Err(_) => self.config.default_identity,
        }
    }

    /// One loop iteration: re-resolve the identity, prune on cadence,
    /// pull the freshest unconsumed record, and drive the actuator.
    /// Without a new target the last commanded position holds - there is
    /// deliberately no re-centering.
    pub fn tick(&mut self) {
        self.tick_count += 1;
        let identity = self.resolve_target_identity();
        let now = self.context.now();

        let target = {
            let mut pipeline = self.pipeline.lock();
            if let Err(e) = pipeline.maybe_prune(now) {
                warn!(error = %e, "prune failed");
            }
            pipeline.poll_target(identity)
        };

        if let Some(record) = target {
            // The selector guarantees a position; a record without one
            // must never reach the control law.
            if let Some(position) = record.position {
                let deltas = compute_deltas(&self.config.control, position);
                self.actuator.apply(deltas);
            }
        }
    }

    /// Runs until shutdown, then interpolates to neutral and returns the
    /// actuator for inspection.
    pub async fn run(mut self) -> ActuatorStateMachine<B> {
        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            "tracking loop started"
        );

        while !self.shutdown.load(Ordering::Relaxed) {
            self.tick();
            self.context.sleep(self.config.tick_interval).await;
        }

        self.actuator.begin_neutral_return();
        while self.actuator.neutral_step() {
            self.context.sleep(self.config.tick_interval).await;
        }
        info!(ticks = self.tick_count, "tracking loop stopped");
        self.actuator
    }
}
