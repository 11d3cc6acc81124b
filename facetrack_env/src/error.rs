//! Error types for the facetrack environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Detection feed could not be read or parsed
    #[error("Feed error: {0}")]
    FeedError(String),

    /// A servo write was rejected by the bus/driver
    #[error("Servo error on {joint}: {reason}")]
    ServoError { joint: String, reason: String },
}

impl EnvError {
    /// Creates a feed error.
    pub fn feed(msg: impl Into<String>) -> Self {
        Self::FeedError(msg.into())
    }

    /// Creates a servo error.
    pub fn servo(joint: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::ServoError {
            joint: joint.to_string(),
            reason: reason.into(),
        }
    }
}
