//! Configuration type definitions for RoboBus
//!
//! This module defines all configuration structs used by the bus, agent and
//! scheduler layers. All types implement serde traits for JSON serialization
//! and have sensible defaults.

use serde::{Deserialize, Serialize};

use crate::agent::{DEFAULT_ACTIVITY_CAPACITY, DEFAULT_WORKER_THREADS};
use crate::bus::DEFAULT_AWAIT_TIMEOUT;
use crate::scheduler::{DEFAULT_NUMBER_OF_THREADS, DEFAULT_THREAD_NAME, TERMINATION_TIMEOUT};

/// Main configuration struct for RoboBus
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging output configuration
    pub logging: LoggingConfig,
    /// Transfer bus queue configuration
    pub bus: BusConfig,
    /// Agent and consumer worker configuration
    pub agent: AgentConfig,
    /// Scheduler timer pool configuration
    pub scheduler: SchedulerConfig,
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, coloured output.
    Pretty,
    /// Compact `[LEVEL] target message {fields}` lines.
    #[default]
    Component,
    /// Structured JSON lines.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Default filter level when `RUST_LOG` is unset.
    pub level: String,
    /// Optional file to append logs to (JSON format only).
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
        }
    }
}

// ============================================================================
// Bus Configuration
// ============================================================================

/// Transfer bus queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bounded wait, in milliseconds, between re-checks of the queue's
    /// `active` flag while a caller is blocked in `take()` or `peek()`.
    pub await_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            await_timeout_ms: DEFAULT_AWAIT_TIMEOUT.as_millis() as u64,
        }
    }
}

// ============================================================================
// Agent Configuration
// ============================================================================

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Number of activity records an agent keeps.
    pub activity_capacity: usize,
    /// Worker threads in each consumer's private worker pool.
    pub worker_threads: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            activity_capacity: DEFAULT_ACTIVITY_CAPACITY,
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }
}

// ============================================================================
// Scheduler Configuration
// ============================================================================

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Timer pool worker threads.
    pub threads: usize,
    /// How long `shutdown()` waits for running tasks, in seconds.
    pub termination_timeout_secs: u64,
    /// Name given to timer pool threads.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_NUMBER_OF_THREADS,
            termination_timeout_secs: TERMINATION_TIMEOUT.as_secs(),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}
