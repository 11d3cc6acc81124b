//! Facetrack Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam between the tracking engines and
//! the outside world. Everything the core logic touches that is not pure
//! computation goes through a trait defined here:
//!
//! - Time (`now()`, `sleep()`) via [`TrackerContext`]
//! - The detection feed via [`DetectionSource`] (file polling and any
//!   publish/subscribe transport both reduce to "a sequence of detection
//!   frames, possibly late, duplicated, or out of order")
//! - The physical gimbal via [`ServoBus`] (per-joint angle writes)
//!
//! # Example
//!
//! ```ignore
//! use facetrack_env::{TrackerContext, DetectionSource};
//!
//! async fn ingest_loop<Ctx: TrackerContext, Src: DetectionSource>(
//!     ctx: &Ctx,
//!     src: &mut Src,
//! ) {
//!     loop {
//!         let frames = src.poll().await.unwrap_or_default();
//!         handle_frames(frames);
//!         ctx.sleep(Duration::from_millis(100)).await;
//!     }
//! }
//! ```

mod context;
mod error;
mod servo;
mod source;
mod tokio_impl;

pub use context::TrackerContext;
pub use error::EnvError;
pub use servo::{Joint, LoggingServoBus, ServoBus};
pub use source::{DetectionSource, FilePollSource, RawBBox, RawFrame, RawObject, RawTag};
pub use tokio_impl::TokioContext;
