//! Scheduler module - timer-driven message delivery
//!
//! A [`Scheduler`] delivers a message to a [`RoboReference`] a fixed or
//! unbounded number of times at a fixed period, and runs one-off work on its
//! own thread pool. [`DefaultScheduler`] owns a small multi-thread tokio
//! runtime used as the timer pool; every registered schedule is one task on
//! that runtime, so firings of the same schedule never overlap.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use robobus::error::Result;
//! use robobus::scheduler::{DefaultScheduler, ScheduleContext, Scheduler};
//! use robobus::unit::RoboReference;
//!
//! #[derive(Default)]
//! struct Beeper(AtomicU32);
//!
//! impl RoboReference<&'static str> for Beeper {
//!     fn id(&self) -> &str {
//!         "beeper"
//!     }
//!     fn send_message(&self, _message: &'static str) -> Result<()> {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         Ok(())
//!     }
//! }
//!
//! let scheduler = DefaultScheduler::new(2).unwrap();
//! let beeper = Arc::new(Beeper::default());
//! let target: Arc<dyn RoboReference<&'static str>> = beeper.clone();
//! let handle = scheduler
//!     .schedule(
//!         target,
//!         "beep",
//!         Duration::ZERO,
//!         Duration::from_millis(5),
//!         3,
//!         Some(Box::new(|ctx: &ScheduleContext| println!("{} done", ctx.target_id()))),
//!     )
//!     .unwrap();
//!
//! while !handle.is_done() {
//!     std::thread::sleep(Duration::from_millis(5));
//! }
//! assert_eq!(beeper.0.load(Ordering::SeqCst), 3);
//! scheduler.shutdown();
//! ```

pub mod wrapper;

pub use wrapper::{
    FinalInvocationListener, ScheduleContext, ScheduleHandle, ScheduleState,
    ScheduledMessageWrapper,
};

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, trace};

use crate::config::SchedulerConfig;
use crate::error::{Result, RoboError};
use crate::log_component;
use crate::unit::RoboReference;

/// Timer pool size unless configured otherwise.
pub const DEFAULT_NUMBER_OF_THREADS: usize = 2;

/// How long [`Scheduler::shutdown`] waits for running work.
pub const TERMINATION_TIMEOUT: Duration = Duration::from_secs(4);

/// Name prefix of timer pool threads.
pub const DEFAULT_THREAD_NAME: &str = "robo-scheduler";

/// Delivers `message` to `target`.
///
/// A target that is an in-process [`RoboUnit`](crate::unit::RoboUnit)
/// gets the message synchronously on the calling thread through
/// `on_message`; anything else goes through `send_message`.
pub fn deliver_message<T>(target: &dyn RoboReference<T>, message: T) -> Result<()> {
    match target.as_unit() {
        Some(unit) => {
            trace!(target_id = target.id(), "direct dispatch");
            unit.on_message(message);
            Ok(())
        }
        None => target.send_message(message),
    }
}

// ============================================================================
// Scheduler trait
// ============================================================================

/// Timer-driven delivery and one-off work.
///
/// Delays and periods are [`Duration`]s. Methods are generic over the
/// message and closure types, so take schedulers as `&impl Scheduler` or
/// by concrete type.
pub trait Scheduler: Send + Sync {
    /// Delivers `message` to `target` `invocations` times, first after
    /// `delay`, then every `period`. After the last firing `listener` runs
    /// once and the schedule completes.
    fn schedule<T>(
        &self,
        target: Arc<dyn RoboReference<T>>,
        message: T,
        delay: Duration,
        period: Duration,
        invocations: u32,
        listener: Option<Box<dyn FinalInvocationListener>>,
    ) -> Result<ScheduleHandle>
    where
        T: Clone + Send + 'static;

    /// Delivers `message` to `target` every `period` until the returned
    /// handle is cancelled.
    fn schedule_unbounded<T>(
        &self,
        target: Arc<dyn RoboReference<T>>,
        message: T,
        delay: Duration,
        period: Duration,
    ) -> Result<ScheduleHandle>
    where
        T: Clone + Send + 'static;

    /// Runs `task` once after `delay`.
    fn schedule_once<F>(&self, task: F, delay: Duration) -> Result<ScheduleHandle>
    where
        F: FnOnce() + Send + 'static;

    /// Runs `task` every `period` after `delay` until cancelled.
    fn schedule_at_fixed_rate<F>(
        &self,
        task: F,
        delay: Duration,
        period: Duration,
    ) -> Result<ScheduleHandle>
    where
        F: FnMut() + Send + 'static;

    /// Runs `task` on the scheduler's pool as soon as possible.
    fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static;

    /// Runs `task` on the scheduler's pool and hands back its result.
    fn submit<F, R>(&self, task: F) -> Result<Submission<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static;

    /// Stops accepting work, cancels every outstanding schedule and
    /// releases the pool.
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;
}

// ============================================================================
// Submission
// ============================================================================

/// Pending result of [`Scheduler::submit`].
#[derive(Debug)]
pub struct Submission<R> {
    result: oneshot::Receiver<R>,
}

impl<R> Submission<R> {
    /// Blocks the current thread until the task is done.
    ///
    /// Must not be called from inside an async context; use
    /// [`join`](Self::join) there.
    pub fn wait(self) -> Result<R> {
        self.result.blocking_recv().map_err(|_| Self::lost())
    }

    /// Waits for the task without blocking the executor.
    pub async fn join(self) -> Result<R> {
        self.result.await.map_err(|_| Self::lost())
    }

    fn lost() -> RoboError {
        RoboError::Worker("submitted task panicked or was dropped".to_string())
    }
}

// ============================================================================
// DefaultScheduler
// ============================================================================

/// [`Scheduler`] backed by its own fixed-size tokio runtime.
pub struct DefaultScheduler {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    accepting: AtomicBool,
    schedules: Mutex<Vec<ScheduleHandle>>,
    termination_timeout: Duration,
}

impl DefaultScheduler {
    /// Creates a scheduler with `threads` timer threads (at least one).
    pub fn new(threads: usize) -> Result<Self> {
        Self::build(threads, DEFAULT_THREAD_NAME, TERMINATION_TIMEOUT)
    }

    /// Creates a scheduler from the `scheduler` config section.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        Self::build(
            config.threads,
            &config.thread_name,
            Duration::from_secs(config.termination_timeout_secs),
        )
    }

    fn build(threads: usize, thread_name: &str, termination_timeout: Duration) -> Result<Self> {
        let threads = threads.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name(thread_name)
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        log_component!(info, "scheduler", "scheduler started", threads = threads);

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            accepting: AtomicBool::new(true),
            schedules: Mutex::new(Vec::new()),
            termination_timeout,
        })
    }

    fn schedules(&self) -> MutexGuard<'_, Vec<ScheduleHandle>> {
        self.schedules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of schedules that are neither completed nor cancelled.
    pub fn outstanding(&self) -> usize {
        self.schedules().iter().filter(|h| !h.is_done()).count()
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RoboError::SchedulerShutdown)
        }
    }

    fn register(&self, handle: &ScheduleHandle) -> Result<()> {
        let mut schedules = self.schedules();
        self.ensure_accepting()?;
        schedules.retain(|h| !h.is_done());
        schedules.push(handle.clone());
        Ok(())
    }

    /// Drives `tick` every `period` after `delay` until it returns `false`
    /// or `handle` is cancelled.
    fn spawn_periodic<F>(
        &self,
        handle: ScheduleHandle,
        delay: Duration,
        period: Duration,
        mut tick: F,
    ) -> Result<ScheduleHandle>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        if period.is_zero() {
            return Err(RoboError::Config(
                "schedule period must be greater than zero".to_string(),
            ));
        }
        self.register(&handle)?;

        let task = self.handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                ticker.tick().await;
                if !tick() {
                    break;
                }
            }
        });
        handle.attach(task.abort_handle());
        Ok(handle)
    }

    fn schedule_wrapper<T>(
        &self,
        target: Arc<dyn RoboReference<T>>,
        message: T,
        delay: Duration,
        period: Duration,
        invocations: Option<u32>,
        listener: Option<Box<dyn FinalInvocationListener>>,
    ) -> Result<ScheduleHandle>
    where
        T: Clone + Send + 'static,
    {
        let handle = ScheduleHandle::new();
        log_component!(
            debug,
            "scheduler",
            "schedule registered",
            schedule_id = handle.id(),
            target_id = target.id(),
            period_ms = period.as_millis() as u64,
        );
        let mut wrapper =
            ScheduledMessageWrapper::new(target, message, invocations, listener, handle.clone());
        self.spawn_periodic(handle, delay, period, move || wrapper.fire())
    }

    fn stop_runtime(runtime: Runtime, termination_timeout: Duration) {
        // A runtime cannot block on its own shutdown from inside an async context.
        if Handle::try_current().is_ok() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(termination_timeout);
        }
    }
}

impl Scheduler for DefaultScheduler {
    fn schedule<T>(
        &self,
        target: Arc<dyn RoboReference<T>>,
        message: T,
        delay: Duration,
        period: Duration,
        invocations: u32,
        listener: Option<Box<dyn FinalInvocationListener>>,
    ) -> Result<ScheduleHandle>
    where
        T: Clone + Send + 'static,
    {
        if invocations == 0 {
            return Err(RoboError::Config(
                "invocation count must be greater than zero".to_string(),
            ));
        }
        self.schedule_wrapper(target, message, delay, period, Some(invocations), listener)
    }

    fn schedule_unbounded<T>(
        &self,
        target: Arc<dyn RoboReference<T>>,
        message: T,
        delay: Duration,
        period: Duration,
    ) -> Result<ScheduleHandle>
    where
        T: Clone + Send + 'static,
    {
        self.schedule_wrapper(target, message, delay, period, None, None)
    }

    fn schedule_once<F>(&self, task: F, delay: Duration) -> Result<ScheduleHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = ScheduleHandle::new();
        self.register(&handle)?;

        let own = handle.clone();
        let spawned = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if own.is_done() {
                return;
            }
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                error!(schedule_id = %own.id(), "delayed task panicked");
                own.cancel();
            } else {
                own.complete();
            }
        });
        handle.attach(spawned.abort_handle());
        Ok(handle)
    }

    fn schedule_at_fixed_rate<F>(
        &self,
        mut task: F,
        delay: Duration,
        period: Duration,
    ) -> Result<ScheduleHandle>
    where
        F: FnMut() + Send + 'static,
    {
        let handle = ScheduleHandle::new();
        let own = handle.clone();
        self.spawn_periodic(handle, delay, period, move || {
            if own.is_done() {
                return false;
            }
            if panic::catch_unwind(AssertUnwindSafe(&mut task)).is_err() {
                error!(schedule_id = %own.id(), "periodic task panicked, cancelling");
                own.cancel();
                return false;
            }
            true
        })
    }

    fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_accepting()?;
        self.handle.spawn_blocking(move || {
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                error!("executed task panicked");
            }
        });
        Ok(())
    }

    fn submit<F, R>(&self, task: F) -> Result<Submission<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_accepting()?;
        let (tx, rx) = oneshot::channel();
        self.handle.spawn_blocking(move || {
            // The caller may have dropped the submission.
            let _ = tx.send(task());
        });
        Ok(Submission { result: rx })
    }

    fn shutdown(&self) {
        let outstanding = {
            let mut schedules = self.schedules();
            self.accepting.store(false, Ordering::SeqCst);
            std::mem::take(&mut *schedules)
        };
        let cancelled = outstanding.iter().filter(|h| h.cancel()).count();

        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            Self::stop_runtime(runtime, self.termination_timeout);
            log_component!(info, "scheduler", "scheduler shut down", cancelled = cancelled);
        }
    }

    fn is_shutdown(&self) -> bool {
        !self.accepting.load(Ordering::SeqCst)
    }
}

impl Drop for DefaultScheduler {
    fn drop(&mut self) {
        let runtime = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            for handle in self.schedules.get_mut().unwrap_or_else(PoisonError::into_inner).iter() {
                handle.cancel();
            }
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for DefaultScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultScheduler")
            .field("outstanding", &self.outstanding())
            .field("shutdown", &self.is_shutdown())
            .field("termination_timeout", &self.termination_timeout)
            .finish()
    }
}
