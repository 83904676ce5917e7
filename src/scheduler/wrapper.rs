//! One registered periodic delivery and its cancellation handle.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::deliver_message;
use crate::unit::RoboReference;

// ============================================================================
// Schedule state and handle
// ============================================================================

/// Lifecycle of one scheduled invocation.
///
/// `Scheduled -> Completed` when the invocation count is exhausted, or
/// `Scheduled -> Cancelled` on external cancellation, shutdown or a
/// panicking firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    Scheduled,
    Completed,
    Cancelled,
}

impl ScheduleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ScheduleState::Completed,
            2 => ScheduleState::Cancelled,
            _ => ScheduleState::Scheduled,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ScheduleState::Scheduled => 0,
            ScheduleState::Completed => 1,
            ScheduleState::Cancelled => 2,
        }
    }
}

struct HandleShared {
    state: AtomicU8,
    task: Mutex<Option<AbortHandle>>,
}

/// Cancellation handle of a scheduled invocation. Cheap to clone.
#[derive(Clone)]
pub struct ScheduleHandle {
    id: String,
    shared: Arc<HandleShared>,
}

impl ScheduleHandle {
    /// Creates a handle in `Scheduled` state, not yet bound to a timer task.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string()[..8].to_string(),
            shared: Arc::new(HandleShared {
                state: AtomicU8::new(ScheduleState::Scheduled.as_u8()),
                task: Mutex::new(None),
            }),
        }
    }

    /// Binds the timer task so cancellation can stop it between firings.
    pub(crate) fn attach(&self, task: AbortHandle) {
        if self.is_done() {
            task.abort();
            return;
        }
        *self.shared.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    fn finish(&self, to: ScheduleState) -> bool {
        self.shared
            .state
            .compare_exchange(
                ScheduleState::Scheduled.as_u8(),
                to.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Marks the invocation completed. Called from the timer task itself,
    /// which then returns instead of aborting.
    pub(crate) fn complete(&self) -> bool {
        self.finish(ScheduleState::Completed)
    }

    /// Stops future firings. An in-flight firing is allowed to finish.
    ///
    /// Returns `false` if the invocation had already completed or was
    /// cancelled before.
    pub fn cancel(&self) -> bool {
        if !self.finish(ScheduleState::Cancelled) {
            return false;
        }
        if let Some(task) = self
            .shared
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        debug!(schedule_id = %self.id, "schedule cancelled");
        true
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ScheduleState {
        ScheduleState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Returns `true` once completed or cancelled.
    pub fn is_done(&self) -> bool {
        self.state() != ScheduleState::Scheduled
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == ScheduleState::Cancelled
    }
}

impl Default for ScheduleHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScheduleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Completion listener
// ============================================================================

/// What a completion listener is told about the schedule that just ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleContext {
    schedule_id: String,
    target_id: String,
    invocations: Option<u32>,
    fired: u64,
}

impl ScheduleContext {
    pub fn schedule_id(&self) -> &str {
        &self.schedule_id
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Requested invocation count, `None` for unbounded schedules.
    pub fn invocations(&self) -> Option<u32> {
        self.invocations
    }

    /// Firings that have run so far.
    pub fn fired(&self) -> u64 {
        self.fired
    }
}

/// Called once after the final invocation of a counted schedule.
pub trait FinalInvocationListener: Send + 'static {
    fn on_final_invocation(&self, context: &ScheduleContext);
}

impl<F> FinalInvocationListener for F
where
    F: Fn(&ScheduleContext) + Send + 'static,
{
    fn on_final_invocation(&self, context: &ScheduleContext) {
        self(context)
    }
}

// ============================================================================
// ScheduledMessageWrapper
// ============================================================================

/// The body of one scheduled invocation: delivers a copy of its message to
/// its target on every firing and counts down.
///
/// Only the timer task that owns the wrapper mutates it.
pub struct ScheduledMessageWrapper<T> {
    target: Arc<dyn RoboReference<T>>,
    message: T,
    remaining: Option<u32>,
    listener: Option<Box<dyn FinalInvocationListener>>,
    handle: ScheduleHandle,
    context: ScheduleContext,
}

impl<T: Clone + Send + 'static> ScheduledMessageWrapper<T> {
    /// `invocations` of `None` makes the wrapper fire until cancelled.
    pub fn new(
        target: Arc<dyn RoboReference<T>>,
        message: T,
        invocations: Option<u32>,
        listener: Option<Box<dyn FinalInvocationListener>>,
        handle: ScheduleHandle,
    ) -> Self {
        let context = ScheduleContext {
            schedule_id: handle.id().to_string(),
            target_id: target.id().to_string(),
            invocations,
            fired: 0,
        };
        Self {
            target,
            message,
            remaining: invocations,
            listener,
            handle,
            context,
        }
    }

    /// Runs one firing. Returns `true` while more firings are due.
    ///
    /// The counter is decremented and compared to zero before the listener
    /// runs and the handle is completed, so the firing that reaches zero is
    /// the last one even if the timer ticks again.
    pub fn fire(&mut self) -> bool {
        if self.handle.is_done() {
            return false;
        }

        let message = self.message.clone();
        let target = self.target.as_ref();
        match panic::catch_unwind(AssertUnwindSafe(|| deliver_message(target, message))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(schedule_id = %self.context.schedule_id, target_id = %self.context.target_id, error = %e, "scheduled delivery failed");
            }
            Err(_) => {
                error!(schedule_id = %self.context.schedule_id, target_id = %self.context.target_id, "scheduled delivery panicked, cancelling");
                self.handle.cancel();
                return false;
            }
        }
        self.context.fired += 1;

        let Some(remaining) = self.remaining.as_mut() else {
            return true;
        };
        *remaining = remaining.saturating_sub(1);
        if *remaining > 0 {
            return true;
        }

        if let Some(listener) = self.listener.take() {
            let context = &self.context;
            if panic::catch_unwind(AssertUnwindSafe(|| listener.on_final_invocation(context)))
                .is_err()
            {
                error!(schedule_id = %self.context.schedule_id, "final invocation listener panicked");
            }
        }
        self.handle.complete();
        debug!(schedule_id = %self.context.schedule_id, fired = self.context.fired, "schedule completed");
        false
    }

    /// Remaining firings, `None` for unbounded schedules.
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn handle(&self) -> &ScheduleHandle {
        &self.handle
    }

    pub fn context(&self) -> &ScheduleContext {
        &self.context
    }
}

impl<T> fmt::Debug for ScheduledMessageWrapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledMessageWrapper")
            .field("context", &self.context)
            .field("remaining", &self.remaining)
            .field("listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}
