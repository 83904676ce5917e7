//! Error types for RoboBus
//!
//! This module defines the error type shared by the bus, agent and scheduler
//! layers. Uses `thiserror` for ergonomic error handling with automatic
//! `Display` and `Error` trait implementations.

use thiserror::Error;

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for RoboBus operations.
#[derive(Error, Debug)]
pub enum RoboError {
    /// Configuration errors (missing queue wiring, invalid config values, incomplete builders)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A consumer received a command type it does not know how to process
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A dispatched command failed, was rejected, or its worker panicked
    #[error("Worker error: {0}")]
    Worker(String),

    /// Agent lifecycle misuse (e.g. activating twice)
    #[error("Agent error: {0}")]
    Agent(String),

    /// A message could not be delivered to its target reference
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// The scheduler no longer accepts work
    #[error("Scheduler error: scheduler is shut down")]
    SchedulerShutdown,

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RoboError {
    /// Returns `true` if the error ends a consumer loop for good.
    ///
    /// Configuration and command errors are never retried; neither are worker
    /// failures, which stop the loop that dispatched them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RoboError::Config(_)
                | RoboError::UnknownCommand(_)
                | RoboError::Worker(_)
                | RoboError::Agent(_)
        )
    }
}

/// A specialized `Result` type for RoboBus operations.
pub type Result<T> = std::result::Result<T, RoboError>;
