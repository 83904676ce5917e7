//! Message types for the RoboBus transfer queue
//!
//! This module defines the command type that units exchange over a
//! [`TransferBusQueue`](super::TransferBusQueue) and the [`BusMessage`] trait
//! that gives the queue its ordering key.

use serde::{Deserialize, Serialize};

/// Priority assigned to commands that do not ask for one.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Anything that can travel over a transfer bus queue.
///
/// Lower priority values are more urgent. Items with equal priority are
/// delivered in arrival order.
pub trait BusMessage {
    /// The ordering key of this message.
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// Called once when a consumer takes this message off the queue.
    ///
    /// Messages that carry a completion latch or waiter list can release it
    /// here.
    fn on_taken(&self) {}
}

/// A command sent from a producer unit to a consumer unit.
///
/// `K` is the command type tag (usually a small enum) and `P` the payload.
/// Commands are immutable once built; ownership moves from the producer to
/// the queue and on to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command<K, P> {
    kind: K,
    payload: P,
    priority: i32,
}

impl<K, P> Command<K, P> {
    /// Creates a command with [`DEFAULT_PRIORITY`].
    ///
    /// # Example
    /// ```
    /// use robobus::bus::message::{BusMessage, Command, DEFAULT_PRIORITY};
    ///
    /// let cmd = Command::new("move", 100u32);
    /// assert_eq!(cmd.priority(), DEFAULT_PRIORITY);
    /// assert_eq!(*cmd.payload(), 100);
    /// ```
    pub fn new(kind: K, payload: P) -> Self {
        Self {
            kind,
            payload,
            priority: DEFAULT_PRIORITY,
        }
    }

    /// Sets the priority (builder pattern). Lower is more urgent.
    ///
    /// # Example
    /// ```
    /// use robobus::bus::message::{BusMessage, Command};
    ///
    /// let cmd = Command::new("stop", ()).with_priority(-10);
    /// assert_eq!(cmd.priority(), -10);
    /// ```
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// The command type tag.
    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// The command payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Consumes the command, returning its type tag and payload.
    pub fn into_parts(self) -> (K, P) {
        (self.kind, self.payload)
    }
}

impl<K, P> BusMessage for Command<K, P> {
    fn priority(&self) -> i32 {
        self.priority
    }
}
