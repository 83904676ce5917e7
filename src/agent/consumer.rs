//! The consumer loop shared by every agent consumer.
//!
//! A [`QueueConsumer`] peeks before it takes: the loop keeps running while
//! the consumer is active and the queue still has (or will get) a command,
//! and exits cleanly once the queue is deactivated and drained instead of
//! blocking forever. Every command is dispatched to a private worker pool
//! and awaited; a rejected command, a processing error or a panicked worker
//! ends the loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Runtime;
use tracing::{debug, error, info};

use super::AgentConsumer;
use crate::bus::{BusMessage, TransferBusQueue};
use crate::config::AgentConfig;
use crate::error::{Result, RoboError};

/// Worker threads in a consumer's private pool unless configured otherwise.
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// Processes commands taken off a bus queue.
///
/// Return `Ok(true)` when the command was handled, `Ok(false)` when it was
/// not. A command of a type the processor does not understand should be
/// reported as [`RoboError::UnknownCommand`].
#[async_trait]
pub trait CommandProcessor<T: Send + 'static>: Send + Sync + 'static {
    async fn process(&self, command: T) -> Result<bool>;
}

/// Consumer half of an agent: drains a [`TransferBusQueue`] into a
/// [`CommandProcessor`].
pub struct QueueConsumer<T, P> {
    name: String,
    active: Arc<AtomicBool>,
    queue: Option<Arc<TransferBusQueue<T>>>,
    processor: Arc<P>,
    worker_threads: usize,
}

impl<T, P> QueueConsumer<T, P>
where
    T: BusMessage + Clone + Send + 'static,
    P: CommandProcessor<T>,
{
    /// Creates an active consumer with [`DEFAULT_WORKER_THREADS`] workers.
    pub fn new(name: &str, processor: P) -> Self {
        Self {
            name: name.to_string(),
            active: Arc::new(AtomicBool::new(true)),
            queue: None,
            processor: Arc::new(processor),
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }

    /// Creates a consumer sized from the `agent` config section.
    pub fn from_config(name: &str, processor: P, config: &AgentConfig) -> Self {
        Self::new(name, processor).with_worker_threads(config.worker_threads)
    }

    /// Sets the size of the private worker pool (builder pattern).
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads.max(1);
        self
    }

    /// Shares an externally owned `active` flag (builder pattern).
    ///
    /// Units that own several consumers use one flag to stop them all. The
    /// flag is checked between commands only: a consumer blocked waiting
    /// for the next command handles that command before it stops. Deactivate
    /// the queue as well to release a consumer that is waiting.
    pub fn with_active_flag(mut self, active: Arc<AtomicBool>) -> Self {
        self.active = active;
        self
    }

    /// The flag this consumer's loop checks before every command.
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn worker_pool(&self) -> Result<Runtime> {
        let pool = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.worker_threads)
            .thread_name(format!("{}-worker", self.name))
            .enable_all()
            .build()?;
        Ok(pool)
    }

    fn drain(&self, queue: &TransferBusQueue<T>, workers: &Runtime) -> Result<u64> {
        let mut processed = 0u64;
        while self.active.load(Ordering::SeqCst) && queue.peek().is_some() {
            let Some(command) = queue.take() else {
                break;
            };
            let processor = Arc::clone(&self.processor);
            let task = workers.spawn(async move { processor.process(command).await });
            match workers.block_on(task) {
                Ok(Ok(true)) => {
                    processed += 1;
                    debug!(consumer = %self.name, processed, "command processed");
                }
                Ok(Ok(false)) => {
                    return Err(RoboError::Worker(format!(
                        "consumer '{}' could not process a command",
                        self.name
                    )));
                }
                Ok(Err(e)) => return Err(e),
                Err(join_err) => {
                    return Err(RoboError::Worker(format!(
                        "consumer '{}' worker failed: {}",
                        self.name, join_err
                    )));
                }
            }
        }
        Ok(processed)
    }
}

impl<T, P> AgentConsumer<T> for QueueConsumer<T, P>
where
    T: BusMessage + Clone + Send + 'static,
    P: CommandProcessor<T>,
{
    fn set_queue(&mut self, queue: Arc<TransferBusQueue<T>>) {
        debug!(consumer = %self.name, "queue wired");
        self.queue = Some(queue);
    }

    fn run(&mut self) -> Result<()> {
        let queue = self.queue.clone().ok_or_else(|| {
            RoboError::Config(format!("consumer '{}' has no queue wired", self.name))
        })?;
        let workers = self.worker_pool()?;
        info!(consumer = %self.name, workers = self.worker_threads, "consumer loop started");

        let outcome = self.drain(&queue, &workers);
        workers.shutdown_background();

        match outcome {
            Ok(processed) => {
                info!(consumer = %self.name, processed, "consumer loop finished");
                Ok(())
            }
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                queue.deactivate();
                error!(consumer = %self.name, error = %e, "consumer loop failed");
                Err(e)
            }
        }
    }
}

impl<T, P> fmt::Debug for QueueConsumer<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("name", &self.name)
            .field("active", &self.active.load(Ordering::SeqCst))
            .field("wired", &self.queue.is_some())
            .field("worker_threads", &self.worker_threads)
            .finish()
    }
}
