//! Closure-backed producer half of an agent.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::AgentProducer;
use crate::bus::TransferBusQueue;
use crate::error::Result;

/// Producer that owns a bus queue and fills it from a closure.
///
/// The closure runs once on the agent's executor. A one-shot producer
/// transfers its commands and returns; a continuous one loops (polling a
/// sensor, reading a socket) until the queue is deactivated.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use robobus::agent::{AgentProducer, QueueProducer};
/// use robobus::bus::{Command, TransferBusQueue};
///
/// let queue: Arc<TransferBusQueue<Command<&str, u32>>> = Arc::new(TransferBusQueue::new());
/// let mut producer = QueueProducer::new("sensor", queue, |queue| {
///     queue.transfer(Command::new("distance", 42u32));
///     Ok(())
/// });
/// producer.run().unwrap();
/// assert_eq!(producer.queue().size(), 1);
/// ```
pub struct QueueProducer<T, F> {
    name: String,
    queue: Arc<TransferBusQueue<T>>,
    produce: F,
}

impl<T, F> QueueProducer<T, F>
where
    T: Send + Sync + 'static,
    F: FnMut(&TransferBusQueue<T>) -> Result<()> + Send + 'static,
{
    pub fn new(name: &str, queue: Arc<TransferBusQueue<T>>, produce: F) -> Self {
        Self {
            name: name.to_string(),
            queue,
            produce,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T, F> AgentProducer<T> for QueueProducer<T, F>
where
    T: Send + Sync + 'static,
    F: FnMut(&TransferBusQueue<T>) -> Result<()> + Send + 'static,
{
    fn queue(&self) -> Arc<TransferBusQueue<T>> {
        Arc::clone(&self.queue)
    }

    fn run(&mut self) -> Result<()> {
        debug!(producer = %self.name, "producer started");
        (self.produce)(&self.queue)
    }
}

impl<T, F> fmt::Debug for QueueProducer<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueProducer")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
