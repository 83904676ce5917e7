//! Unit-side contracts: message targets and lifecycle states.
//!
//! A [`RoboReference`] is anything that can be handed a message. A
//! [`RoboUnit`] is a reference that lives in this process and can process a
//! message synchronously; the scheduler uses that to skip the generic send
//! path (see [`crate::scheduler::deliver_message`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A handle that accepts messages of type `T`.
pub trait RoboReference<T>: Send + Sync {
    /// Identifier of the target, used in logs.
    fn id(&self) -> &str;

    /// Generic delivery path (queueing, marshalling, network).
    fn send_message(&self, message: T) -> Result<()>;

    /// Returns the in-process unit behind this reference, if there is one.
    fn as_unit(&self) -> Option<&dyn RoboUnit<T>> {
        None
    }
}

/// A same-process unit that can process a message on the caller's thread.
pub trait RoboUnit<T>: RoboReference<T> {
    fn on_message(&self, message: T);
}

/// Lifecycle of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Starting,
    Started,
    Stopping,
    Stopped,
    ShuttingDown,
    Shutdown,
    Failed,
}

impl LifecycleState {
    /// Numeric id of the state, stable across releases.
    pub fn state_id(&self) -> u8 {
        match self {
            LifecycleState::Uninitialized => 0,
            LifecycleState::Initialized => 1,
            LifecycleState::Starting => 2,
            LifecycleState::Started => 3,
            LifecycleState::Stopping => 4,
            LifecycleState::Stopped => 5,
            LifecycleState::ShuttingDown => 6,
            LifecycleState::Shutdown => 7,
            LifecycleState::Failed => 8,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "Uninitialized",
            LifecycleState::Initialized => "Initialized",
            LifecycleState::Starting => "Starting",
            LifecycleState::Started => "Started",
            LifecycleState::Stopping => "Stopping",
            LifecycleState::Stopped => "Stopped",
            LifecycleState::ShuttingDown => "Shutting Down",
            LifecycleState::Shutdown => "Shutdown",
            LifecycleState::Failed => "Failed",
        }
    }

    /// Returns `true` for states in which a unit processes messages.
    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Started)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
