//! Task results, handles and the failure guard every task runs under.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

/// Result returned by scheduled task bodies.
pub type TaskResult = Result<(), TaskError>;

/// Failure reported by a task body.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task ran on a thread that does not own the cells it touches
    #[error("Not on owner thread")]
    WrongThread,

    #[error("World error: {0}")]
    World(#[from] crate::core::Error),

    #[error("{0}")]
    Failed(String),
}

impl TaskError {
    /// Generic failure with a message
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }
}

/// Handle to a submitted task, used for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub(crate) u64);

impl TaskHandle {
    /// Numeric id of the task
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Cancellation state shared between a handle and its timer/job.
#[derive(Debug, Default)]
pub(crate) struct TaskControl {
    cancelled: AtomicBool,
    timer: Mutex<Option<tokio::task::AbortHandle>>,
}

impl TaskControl {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Stop future invocations. A running invocation is left alone.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }

    pub(crate) fn set_timer(&self, timer: tokio::task::AbortHandle) {
        let mut slot = self.timer.lock();
        if self.is_cancelled() {
            timer.abort();
        } else {
            *slot = Some(timer);
        }
    }
}

/// Where a task runs, for log messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Owner,
    Async,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Owner => write!(f, "owner"),
            TaskKind::Async => write!(f, "async"),
        }
    }
}

/// Scheduler counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks that returned `Ok`
    pub completed: u64,
    /// Tasks that returned an error other than `WrongThread`
    pub failed: u64,
    /// Tasks that panicked
    pub panicked: u64,
    /// `WrongThread` failures, reported or not
    pub wrong_thread: u64,
    /// `WrongThread` failures that were not logged
    pub wrong_thread_suppressed: u64,
    /// Submissions parked until an owner became available
    pub deferred: u64,
}

/// Runs task bodies, catching and logging every failure.
///
/// Nothing a task does escapes into the loop that called it. `WrongThread`
/// is logged once per guard; every other failure is logged each time.
#[derive(Debug, Default)]
pub(crate) struct TaskGuard {
    wrong_thread_reported: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    wrong_thread: AtomicU64,
    wrong_thread_suppressed: AtomicU64,
    pub(crate) deferred: AtomicU64,
}

impl TaskGuard {
    pub(crate) fn run<F>(&self, kind: TaskKind, task: F)
    where
        F: FnOnce() -> TaskResult,
    {
        match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(Ok(())) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(TaskError::WrongThread)) => {
                self.wrong_thread.fetch_add(1, Ordering::Relaxed);
                if !self.wrong_thread_reported.swap(true, Ordering::AcqRel) {
                    log::warn!(
                        "Error in {} task: not on owner thread (further reports suppressed)",
                        kind
                    );
                } else {
                    self.wrong_thread_suppressed.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(Err(e)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("Error in {} task: {}", kind, e);
            }
            Err(payload) => {
                self.panicked.fetch_add(1, Ordering::Relaxed);
                log::error!("{} task panicked: {}", kind, panic_message(payload.as_ref()));
            }
        }
    }

    pub(crate) fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            wrong_thread: self.wrong_thread.load(Ordering::Relaxed),
            wrong_thread_suppressed: self.wrong_thread_suppressed.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_counts_completed() {
        let guard = TaskGuard::default();
        guard.run(TaskKind::Async, || Ok(()));
        assert_eq!(guard.stats().completed, 1);
    }

    #[test]
    fn test_wrong_thread_reported_once() {
        let guard = TaskGuard::default();
        for _ in 0..5 {
            guard.run(TaskKind::Owner, || Err(TaskError::WrongThread));
        }
        let stats = guard.stats();
        assert_eq!(stats.wrong_thread, 5);
        assert_eq!(stats.wrong_thread_suppressed, 4);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_other_failures_always_counted() {
        let guard = TaskGuard::default();
        guard.run(TaskKind::Owner, || Err(TaskError::failed("boom")));
        guard.run(TaskKind::Owner, || Err(TaskError::failed("boom")));
        assert_eq!(guard.stats().failed, 2);
        assert_eq!(guard.stats().wrong_thread_suppressed, 0);
    }

    #[test]
    fn test_panic_is_contained() {
        let guard = TaskGuard::default();
        guard.run(TaskKind::Async, || panic!("task exploded"));
        guard.run(TaskKind::Async, || Ok(()));
        let stats = guard.stats();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_cancel_aborts_nothing_when_no_timer() {
        let control = TaskControl::default();
        assert!(!control.is_cancelled());
        control.cancel();
        assert!(control.is_cancelled());
    }
}
