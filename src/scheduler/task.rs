//! Periodic task bookkeeping.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::error::TaskError;

/// Outcome of one task execution.
pub type TaskResult = std::result::Result<(), TaskError>;

/// A task callback.
///
/// Receives the scheduler's context for the duration of one execution.
pub type Callback<C> = Box<dyn for<'a> FnMut(&'a mut C) -> BoxFuture<'a, TaskResult> + Send>;

/// A named periodic job.
pub struct Task<C> {
    name: String,
    interval: Duration,
    callback: Callback<C>,
    last_run: Option<Instant>,
    next_run: Instant,
    runs: u64,
    failures: u64,
    last_error: Option<String>,
}

impl<C> Task<C> {
    /// Creates a task that is due at `first_run`.
    pub(crate) fn new(
        name: String,
        interval: Duration,
        callback: Callback<C>,
        first_run: Instant,
    ) -> Self {
        Self {
            name,
            interval,
            callback,
            last_run: None,
            next_run: first_run,
            runs: 0,
            failures: 0,
            last_error: None,
        }
    }

    /// Returns the task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the interval between executions.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns when the task is due next.
    #[must_use]
    pub const fn next_run(&self) -> Instant {
        self.next_run
    }

    /// Returns true if the task should run at `now`.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_run
    }

    /// Runs the callback once.
    ///
    /// The schedule moves to `now + interval` before the callback runs, so
    /// a failure never makes the task due again early and a stall is caught
    /// up with a single execution. A panicking callback is reported as a
    /// failure.
    pub(crate) async fn execute(&mut self, context: &mut C, now: Instant) -> TaskResult {
        self.last_run = Some(now);
        self.next_run = now + self.interval;
        self.runs += 1;

        let callback = &mut self.callback;
        let result = AssertUnwindSafe(async move { callback(context).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(panic_error(payload.as_ref())));
        match &result {
            Ok(()) => self.last_error = None,
            Err(e) => {
                self.failures += 1;
                self.last_error = Some(e.to_string());
            }
        }
        result
    }

    /// Returns a status snapshot as seen at `now`.
    #[must_use]
    pub fn status(&self, now: Instant) -> TaskStatus {
        TaskStatus {
            name: self.name.clone(),
            interval: self.interval,
            last_run: self.last_run,
            next_run: self.next_run,
            overdue: now > self.next_run,
            runs: self.runs,
            failures: self.failures,
            last_error: self.last_error.clone(),
        }
    }
}

/// Turns a panic payload into a task error.
fn panic_error(payload: &(dyn Any + Send)) -> TaskError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown payload".to_owned());
    TaskError::from(format!("task panicked: {message}"))
}

impl<C> fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("last_run", &self.last_run)
            .field("next_run", &self.next_run)
            .field("runs", &self.runs)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

/// Health snapshot of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    /// Task name.
    pub name: String,
    /// Interval between executions.
    pub interval: Duration,
    /// Start of the last execution.
    pub last_run: Option<Instant>,
    /// When the task is due next.
    pub next_run: Instant,
    /// True if `next_run` had already passed when the snapshot was taken.
    pub overdue: bool,
    /// Number of executions.
    pub runs: u64,
    /// Number of failed executions.
    pub failures: u64,
    /// Message of the last failure, cleared by a successful run.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed<F>(callback: F) -> Callback<u32>
    where
        F: for<'a> FnMut(&'a mut u32) -> BoxFuture<'a, TaskResult> + Send + 'static,
    {
        Box::new(callback)
    }

    fn task(interval: Duration, fail: bool, now: Instant) -> Task<u32> {
        let callback = boxed(move |calls| {
            Box::pin(async move {
                *calls += 1;
                if fail {
                    Err(TaskError::from("meter unreachable"))
                } else {
                    Ok(())
                }
            })
        });
        Task::new("meter".into(), interval, callback, now)
    }

    #[tokio::test]
    async fn test_execute_advances_schedule() {
        let start = Instant::now();
        let mut calls = 0;
        let mut task = task(Duration::from_secs(5), false, start);
        assert!(task.is_due(start));

        task.execute(&mut calls, start).await.unwrap();

        assert_eq!(calls, 1);
        assert_eq!(task.next_run(), start + Duration::from_secs(5));
        assert!(!task.is_due(start + Duration::from_millis(4999)));
        assert!(task.is_due(start + Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_schedule_advances() {
        let start = Instant::now();
        let mut calls = 0;
        let mut task = task(Duration::from_secs(5), true, start);

        assert!(task.execute(&mut calls, start).await.is_err());

        let status = task.status(start);
        assert_eq!(status.last_run, Some(start));
        assert_eq!(status.next_run, start + Duration::from_secs(5));
        assert_eq!(status.failures, 1);
        assert_eq!(status.last_error.as_deref(), Some("meter unreachable"));
        assert!(!status.overdue);
    }

    #[tokio::test]
    async fn test_panic_is_recorded_as_failure() {
        let start = Instant::now();
        let mut calls = 0;
        let mut task = Task::new(
            "meter".into(),
            Duration::from_secs(5),
            boxed(|calls| {
                Box::pin(async move {
                    *calls += 1;
                    let registers: Vec<u16> = Vec::new();
                    let _ = registers[0];
                    Ok(())
                })
            }),
            start,
        );

        let err = task.execute(&mut calls, start).await.unwrap_err();

        assert!(err.to_string().starts_with("task panicked: index out of bounds"));
        let status = task.status(start);
        assert_eq!(status.failures, 1);
        assert_eq!(status.next_run, start + Duration::from_secs(5));
    }

    #[test]
    fn test_overdue_is_strict() {
        let start = Instant::now();
        let task = task(Duration::from_secs(1), false, start);
        assert!(!task.status(start).overdue);
        assert!(task.status(start + Duration::from_millis(1)).overdue);
    }
}
