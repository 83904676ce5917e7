//! Agent module - producer/consumer pairing around one bus queue
//!
//! An agent binds exactly one producer and one consumer to the producer's
//! [`TransferBusQueue`] and runs both as long-lived blocking tasks on a
//! shared executor. It keeps a short [`ActivityLog`] of its state changes.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────── GenericAgent ────────────────┐
//!                    │                                              │
//! sensor / socket ──>│ AgentProducer ──> TransferBusQueue ──> AgentConsumer ──> worker pool
//!                    │                                              │
//!                    └──────────── ActivityLog (ACTIVE, ...) ───────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use robobus::agent::{AgentState, CommandProcessor, GenericAgent, QueueConsumer, QueueProducer};
//! use robobus::bus::{Command, TransferBusQueue};
//! use robobus::error::Result;
//!
//! struct Motors;
//!
//! #[async_trait]
//! impl CommandProcessor<Command<&'static str, i32>> for Motors {
//!     async fn process(&self, _command: Command<&'static str, i32>) -> Result<bool> {
//!         Ok(true)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let queue = Arc::new(TransferBusQueue::new());
//!     let producer = QueueProducer::new("sensor", queue, |queue| {
//!         queue.transfer(Command::new("forward", 10));
//!         queue.deactivate();
//!         Ok(())
//!     });
//!
//!     let agent = GenericAgent::builder()
//!         .name("drive")
//!         .executor(tokio::runtime::Handle::current())
//!         .producer(producer)
//!         .consumer(QueueConsumer::new("motors", Motors))
//!         .build()
//!         .unwrap();
//!
//!     let status = agent.activate().unwrap();
//!     assert_eq!(status.state, AgentState::Active);
//!     agent.join().await.unwrap();
//! }
//! ```

pub mod cache;
pub mod consumer;
pub mod producer;

pub use cache::{ActivityLog, DEFAULT_ACTIVITY_CAPACITY};
pub use consumer::{CommandProcessor, QueueConsumer, DEFAULT_WORKER_THREADS};
pub use producer::QueueProducer;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::{BusMessage, TransferBusQueue};
use crate::config::AgentConfig;
use crate::error::{Result, RoboError};
use crate::unit::LifecycleState;

// ============================================================================
// Producer / Consumer contracts
// ============================================================================

/// The producing half of an agent. Owns the queue the pair shares.
pub trait AgentProducer<T>: Send + 'static {
    /// The queue this producer transfers into.
    fn queue(&self) -> Arc<TransferBusQueue<T>>;

    /// Produce commands. One-shot producers return after transferring;
    /// continuous ones loop until told to stop.
    fn run(&mut self) -> Result<()>;
}

/// The consuming half of an agent.
pub trait AgentConsumer<T>: Send + 'static {
    /// Wires the producer's queue. Called once, before activation.
    fn set_queue(&mut self, queue: Arc<TransferBusQueue<T>>);

    /// Consume commands until the queue is deactivated and drained, or a
    /// command fails.
    fn run(&mut self) -> Result<()>;
}

// ============================================================================
// Agent state
// ============================================================================

/// State of an agent as seen by its owning unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Built, not yet activated.
    Inactive,
    /// Producer and consumer submitted to the executor.
    Active,
    /// The producer or consumer ended with a fatal error or panicked.
    Failed,
    /// The queue was deactivated by the owner, or a task ended with a
    /// non-fatal error.
    Stopped,
}

impl AgentState {
    /// Record written to the activity log on entering this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Inactive => "INACTIVE",
            AgentState::Active => "ACTIVE",
            AgentState::Failed => "FAILED",
            AgentState::Stopped => "STOPPED",
        }
    }

    /// The owning unit's lifecycle state for this agent state.
    pub fn lifecycle(&self) -> LifecycleState {
        match self {
            AgentState::Inactive => LifecycleState::Initialized,
            AgentState::Active => LifecycleState::Started,
            AgentState::Failed => LifecycleState::Failed,
            AgentState::Stopped => LifecycleState::Stopped,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => AgentState::Active,
            2 => AgentState::Failed,
            3 => AgentState::Stopped,
            _ => AgentState::Inactive,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            AgentState::Inactive => 0,
            AgentState::Active => 1,
            AgentState::Failed => 2,
            AgentState::Stopped => 3,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot returned by [`GenericAgent::activate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub state: AgentState,
    pub timestamp: DateTime<Utc>,
}

struct AgentShared {
    name: String,
    state: AtomicU8,
    /// Producer/consumer tasks that have not returned yet.
    running: AtomicUsize,
    activity: Mutex<ActivityLog<String>>,
}

impl AgentShared {
    fn state(&self) -> AgentState {
        AgentState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn record(&self, state: AgentState) -> AgentStatus {
        self.state.store(state.as_u8(), Ordering::SeqCst);
        self.activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(state.as_str().to_string());
        AgentStatus {
            name: self.name.clone(),
            state,
            timestamp: Utc::now(),
        }
    }

    /// Moves `from` to `to`; returns `false` if the agent was elsewhere.
    fn transition(&self, from: AgentState, to: AgentState) -> bool {
        let swapped = self
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if swapped {
            self.activity
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(to.as_str().to_string());
        }
        swapped
    }

    /// Fatal errors move the agent to `Failed`; anything else stops it.
    fn fail(&self, role: &str, reason: &str, fatal: bool) {
        if fatal {
            error!(agent = %self.name, role, reason, "agent task failed");
            if self.state() != AgentState::Failed {
                self.record(AgentState::Failed);
            }
        } else {
            warn!(agent = %self.name, role, reason, "agent task ended early");
            self.transition(AgentState::Active, AgentState::Stopped);
        }
    }
}

/// Runs one half of the agent.
///
/// When the task errors or panics the shared queue is deactivated, so the
/// other half drains what is buffered and returns instead of waiting on a
/// partner that is gone.
fn run_task<T: BusMessage>(
    role: &'static str,
    shared: &AgentShared,
    queue: &TransferBusQueue<T>,
    task: impl FnOnce() -> Result<()>,
) {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(())) => info!(agent = %shared.name, role, "agent task finished"),
        Ok(Err(e)) => {
            shared.fail(role, &e.to_string(), e.is_fatal());
            queue.deactivate();
        }
        Err(_) => {
            shared.fail(role, "task panicked", true);
            queue.deactivate();
        }
    }
    shared.running.fetch_sub(1, Ordering::SeqCst);
}

// ============================================================================
// GenericAgent
// ============================================================================

type AgentTasks<T> = (Box<dyn AgentProducer<T>>, Box<dyn AgentConsumer<T>>);

/// A bound producer + consumer pair sharing one bus queue and executor.
pub struct GenericAgent<T> {
    executor: Handle,
    queue: Arc<TransferBusQueue<T>>,
    tasks: Mutex<Option<AgentTasks<T>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<AgentShared>,
}

impl<T: BusMessage + Send + 'static> GenericAgent<T> {
    /// Starts building an agent.
    pub fn builder() -> AgentBuilder<T> {
        AgentBuilder::new()
    }

    /// Submits the producer and the consumer to the executor as two
    /// independent blocking tasks and records `ACTIVE`.
    ///
    /// An agent can be activated once; later calls fail with
    /// [`RoboError::Agent`].
    pub fn activate(&self) -> Result<AgentStatus> {
        let (mut producer, mut consumer) = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                RoboError::Agent(format!("agent '{}' was already activated", self.name()))
            })?;

        self.shared.running.store(2, Ordering::SeqCst);
        let status = self.shared.record(AgentState::Active);

        let producer_shared = Arc::clone(&self.shared);
        let producer_queue = Arc::clone(&self.queue);
        let producer_task = self.executor.spawn_blocking(move || {
            run_task("producer", &producer_shared, &producer_queue, || producer.run());
        });
        let consumer_shared = Arc::clone(&self.shared);
        let consumer_queue = Arc::clone(&self.queue);
        let consumer_task = self.executor.spawn_blocking(move || {
            run_task("consumer", &consumer_shared, &consumer_queue, || consumer.run());
        });
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([producer_task, consumer_task]);

        info!(agent = %self.name(), activity = ?self.activity(), "agent active");
        Ok(status)
    }

    /// Deactivates the shared queue so the consumer drains it and exits.
    ///
    /// Records `STOPPED` unless the agent already failed.
    pub fn deactivate(&self) {
        self.queue.deactivate();
        if self.shared.transition(AgentState::Active, AgentState::Stopped) {
            info!(agent = %self.name(), "agent stopped");
        }
    }

    /// Waits for both tasks to end.
    pub async fn join(&self) -> Result<()> {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            handle
                .await
                .map_err(|e| RoboError::Agent(format!("agent '{}' task aborted: {}", self.name(), e)))?;
        }
        Ok(())
    }

    /// Returns `true` once activated and both tasks have ended.
    pub fn is_finished(&self) -> bool {
        self.shared.state() != AgentState::Inactive
            && self.shared.running.load(Ordering::SeqCst) == 0
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> AgentState {
        self.shared.state()
    }

    /// The queue shared by the producer and consumer.
    pub fn queue(&self) -> Arc<TransferBusQueue<T>> {
        Arc::clone(&self.queue)
    }

    /// Activity records, oldest first.
    pub fn activity(&self) -> Vec<String> {
        self.shared
            .activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }
}

impl<T> fmt::Debug for GenericAgent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericAgent")
            .field("name", &self.shared.name)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// AgentBuilder
// ============================================================================

/// Builder for [`GenericAgent`]. Wires the consumer to the producer's queue.
pub struct AgentBuilder<T> {
    name: Option<String>,
    executor: Option<Handle>,
    producer: Option<Box<dyn AgentProducer<T>>>,
    consumer: Option<Box<dyn AgentConsumer<T>>>,
    activity_capacity: usize,
}

impl<T: BusMessage + Send + 'static> AgentBuilder<T> {
    pub fn new() -> Self {
        Self {
            name: None,
            executor: None,
            producer: None,
            consumer: None,
            activity_capacity: DEFAULT_ACTIVITY_CAPACITY,
        }
    }

    /// Applies the `agent` config section.
    pub fn config(mut self, config: &AgentConfig) -> Self {
        self.activity_capacity = config.activity_capacity;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Executor the producer and consumer run on. May be shared between
    /// agents; its owner shuts it down.
    pub fn executor(mut self, executor: Handle) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn producer(mut self, producer: impl AgentProducer<T>) -> Self {
        self.producer = Some(Box::new(producer));
        self
    }

    pub fn consumer(mut self, consumer: impl AgentConsumer<T>) -> Self {
        self.consumer = Some(Box::new(consumer));
        self
    }

    pub fn activity_capacity(mut self, capacity: usize) -> Self {
        self.activity_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<GenericAgent<T>> {
        let executor = self
            .executor
            .ok_or_else(|| RoboError::Config("agent needs an executor".to_string()))?;
        let producer = self
            .producer
            .ok_or_else(|| RoboError::Config("agent needs a producer".to_string()))?;
        let mut consumer = self
            .consumer
            .ok_or_else(|| RoboError::Config("agent needs a consumer".to_string()))?;

        let queue = producer.queue();
        consumer.set_queue(Arc::clone(&queue));

        let shared = Arc::new(AgentShared {
            name: self.name.unwrap_or_else(|| "agent".to_string()),
            state: AtomicU8::new(AgentState::Inactive.as_u8()),
            running: AtomicUsize::new(0),
            activity: Mutex::new(ActivityLog::with_capacity(self.activity_capacity)),
        });

        Ok(GenericAgent {
            executor,
            queue,
            tasks: Mutex::new(Some((producer, consumer))),
            handles: Mutex::new(Vec::new()),
            shared,
        })
    }
}

impl<T: BusMessage + Send + 'static> Default for AgentBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
