//! Sequential periodic task scheduler.
//!
//! The [`Scheduler`] owns a context (usually a
//! [`ReadCoordinator`](crate::coordinator::ReadCoordinator)) and a list of
//! [`Task`]s. Each tick it runs every due task in registration order and
//! awaits each callback to completion before starting the next, so no two
//! callbacks ever touch the context at the same time.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use meterpoll::{Scheduler, TaskResult};
//!
//! # async fn example() -> meterpoll::Result<()> {
//! let mut scheduler = Scheduler::new(0_u64);
//! scheduler.register("heartbeat", Duration::from_secs(1), |beats| {
//!     Box::pin(async move {
//!         *beats += 1;
//!         TaskResult::Ok(())
//!     })
//! })?;
//!
//! let handle = scheduler.handle();
//! tokio::spawn(async move { scheduler.run().await });
//! tokio::time::sleep(Duration::from_secs(5)).await;
//! handle.stop();
//! # Ok(())
//! # }
//! ```

mod task;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, Subscription};

pub use task::{Callback, Task, TaskResult, TaskStatus};

/// Default pause between two ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Longest accepted task interval.
pub const MAX_TASK_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Configuration for the scheduler loop.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Pause after each sweep of the task list.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

impl SchedulerConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tick interval.
    #[must_use]
    pub const fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "tick interval must be positive".into(),
            });
        }
        Ok(())
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Names of the executed tasks, in execution order.
    pub executed: Vec<String>,
    /// Names of the tasks whose callback failed.
    pub failed: Vec<String>,
}

impl TickSummary {
    /// Returns true if no task was due.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.executed.is_empty()
    }
}

/// Runs periodic tasks one at a time.
pub struct Scheduler<C> {
    context: C,
    tasks: Vec<Task<C>>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    dispatcher: EventDispatcher,
    stop_requested: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    snapshot: watch::Sender<Vec<TaskStatus>>,
}

impl<C: Send> Scheduler<C> {
    /// Creates a scheduler with default settings and the Tokio clock.
    #[must_use]
    pub fn new(context: C) -> Self {
        let (snapshot, _) = watch::channel(Vec::new());
        Self {
            context,
            tasks: Vec::new(),
            config: SchedulerConfig::default(),
            clock: Arc::new(SystemClock),
            dispatcher: EventDispatcher::default(),
            stop_requested: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            snapshot,
        }
    }

    /// Creates a scheduler with custom configuration and clock.
    pub fn with_config(
        context: C,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            ..Self::new(context)
        })
    }

    /// Registers a periodic task.
    ///
    /// The task is due immediately. Fails if the name is taken or the
    /// interval is zero or longer than [`MAX_TASK_INTERVAL`]; the scheduler
    /// stays usable either way.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        callback: F,
    ) -> Result<()>
    where
        F: for<'a> FnMut(&'a mut C) -> BoxFuture<'a, TaskResult> + Send + 'static,
    {
        let name = name.into();

        if interval.is_zero() {
            tracing::error!("refusing task {}: interval must be positive", name);
            return Err(Error::InvalidInterval { name });
        }
        if interval > MAX_TASK_INTERVAL {
            tracing::error!("refusing task {}: interval {:?} is too long", name, interval);
            return Err(Error::InvalidInterval { name });
        }
        if self.tasks.iter().any(|task| task.name() == name) {
            tracing::error!("refusing task {}: name already registered", name);
            return Err(Error::DuplicateTask { name });
        }

        tracing::info!("registered task {} every {:?}", name, interval);
        self.tasks
            .push(Task::new(name, interval, Box::new(callback), self.clock.now()));
        self.publish();
        Ok(())
    }

    /// Runs every due task once, in registration order.
    ///
    /// A failing callback is logged and does not affect the other tasks.
    pub async fn tick(&mut self) -> TickSummary {
        let mut summary = TickSummary::default();

        for task in &mut self.tasks {
            let now = self.clock.now();
            if !task.is_due(now) {
                continue;
            }

            tracing::debug!("running task {}", task.name());
            let result = task.execute(&mut self.context, now).await;
            summary.executed.push(task.name().to_owned());

            match result {
                Ok(()) => {
                    self.dispatcher.dispatch(Event::TaskCompleted {
                        name: task.name().to_owned(),
                    });
                }
                Err(e) => {
                    tracing::error!("task {} failed: {}", task.name(), e);
                    summary.failed.push(task.name().to_owned());
                    self.dispatcher.dispatch(Event::TaskFailed {
                        name: task.name().to_owned(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if !summary.is_idle() {
            self.publish();
        }
        summary
    }

    /// Ticks until [`stop`](Self::stop) is requested.
    ///
    /// Always completes the tick in progress before returning.
    pub async fn run(&mut self) {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("scheduler started with {} tasks", self.tasks.len());

        loop {
            self.tick().await;
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            self.clock.sleep(self.config.tick_interval).await;
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("scheduler stopped");
    }

    /// Requests the run loop to exit after the current tick.
    pub fn stop(&self) {
        request_stop(&self.stop_requested);
    }

    /// Returns true while [`run`](Self::run) is looping.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the status of every task, in registration order.
    #[must_use]
    pub fn status(&self) -> Vec<TaskStatus> {
        let now = self.clock.now();
        self.tasks.iter().map(|task| task.status(now)).collect()
    }

    /// Returns a handle that can stop and observe the scheduler from
    /// elsewhere while [`run`](Self::run) holds it.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            stop_requested: Arc::clone(&self.stop_requested),
            running: Arc::clone(&self.running),
            snapshot: self.snapshot.subscribe(),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Subscribes to task outcomes.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe()
    }

    /// Returns the registered tasks.
    #[must_use]
    pub fn tasks(&self) -> &[Task<C>] {
        &self.tasks
    }

    /// Returns the context.
    #[must_use]
    pub const fn context(&self) -> &C {
        &self.context
    }

    /// Returns the context mutably.
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Consumes the scheduler and returns its context.
    pub fn into_context(self) -> C {
        self.context
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.status());
    }
}

fn request_stop(flag: &AtomicBool) {
    if !flag.swap(true, Ordering::SeqCst) {
        tracing::info!("scheduler stop requested");
    }
}

/// Remote control for a running [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    stop_requested: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    snapshot: watch::Receiver<Vec<TaskStatus>>,
    clock: Arc<dyn Clock>,
}

impl SchedulerHandle {
    /// Requests the run loop to exit after the current tick. Idempotent.
    pub fn stop(&self) {
        request_stop(&self.stop_requested);
    }

    /// Returns true while the scheduler is looping.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the task status as of the last tick.
    ///
    /// `overdue` is evaluated against the current time.
    #[must_use]
    pub fn status(&self) -> Vec<TaskStatus> {
        let now = self.clock.now();
        self.snapshot
            .borrow()
            .iter()
            .cloned()
            .map(|mut status| {
                status.overdue = now > status.next_run;
                status
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TaskError;
    use crate::event::EventKind;

    #[derive(Default)]
    struct Recorder {
        log: Vec<&'static str>,
    }

    fn scheduler() -> (Scheduler<Recorder>, ManualClock) {
        let clock = ManualClock::new();
        let scheduler = Scheduler::with_config(
            Recorder::default(),
            SchedulerConfig::default(),
            Arc::new(clock.clone()),
        )
        .unwrap();
        (scheduler, clock)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn noop(_: &mut Recorder) -> BoxFuture<'_, TaskResult> {
        Box::pin(async { Ok(()) })
    }

    #[tokio::test]
    async fn test_due_tasks_run_in_registration_order() {
        let (mut scheduler, _clock) = scheduler();
        scheduler
            .register("a", secs(1), |rec| {
                Box::pin(async move {
                    rec.log.push("a");
                    Ok(())
                })
            })
            .unwrap();
        scheduler
            .register("b", secs(60), |rec| {
                Box::pin(async move {
                    rec.log.push("b");
                    Ok(())
                })
            })
            .unwrap();

        let summary = scheduler.tick().await;

        assert_eq!(summary.executed, ["a", "b"]);
        assert_eq!(scheduler.context().log, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_tasks() {
        let (mut scheduler, clock) = scheduler();
        let mut events = scheduler.subscribe();
        scheduler
            .register("a", secs(1), |rec| {
                Box::pin(async move {
                    rec.log.push("a");
                    Err(TaskError::from("meter 20 unreachable"))
                })
            })
            .unwrap();
        scheduler
            .register("b", secs(1), |rec| {
                Box::pin(async move {
                    rec.log.push("b");
                    Ok(())
                })
            })
            .unwrap();

        let start = clock.now();
        let summary = scheduler.tick().await;
        assert_eq!(summary.executed, ["a", "b"]);
        assert_eq!(summary.failed, ["a"]);

        let status = scheduler.status();
        assert_eq!(status[0].last_run, Some(start));
        assert_eq!(status[0].next_run, start + secs(1));
        assert_eq!(status[0].failures, 1);

        // Not due again before its interval
        clock.advance(Duration::from_millis(999));
        assert!(scheduler.tick().await.is_idle());

        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv())
            .map(|e| e.kind())
            .collect();
        assert_eq!(kinds, [EventKind::TaskFailed, EventKind::TaskCompleted]);
    }

    #[tokio::test]
    async fn test_panic_does_not_stop_other_tasks() {
        let (mut scheduler, _clock) = scheduler();
        let mut events = scheduler.subscribe();
        scheduler
            .register("a", secs(1), |rec| {
                Box::pin(async move {
                    rec.log.push("a");
                    let registers: Vec<u16> = Vec::new();
                    let _ = registers[0];
                    Ok(())
                })
            })
            .unwrap();
        scheduler
            .register("b", secs(1), |rec| {
                Box::pin(async move {
                    rec.log.push("b");
                    Ok(())
                })
            })
            .unwrap();

        let summary = scheduler.tick().await;

        assert_eq!(summary.executed, ["a", "b"]);
        assert_eq!(summary.failed, ["a"]);
        assert_eq!(scheduler.context().log, ["a", "b"]);
        let status = scheduler.status();
        assert_eq!(status[0].failures, 1);
        assert!(status[0].last_error.as_deref().unwrap().starts_with("task panicked"));
        assert_eq!(status[1].failures, 0);

        match events.try_recv() {
            Some(Event::TaskFailed { name, message }) => {
                assert_eq!(name, "a");
                assert!(message.starts_with("task panicked"));
            }
            other => panic!("expected TaskFailed, got {other:?}"),
        }
        assert!(matches!(events.try_recv(), Some(Event::TaskCompleted { name }) if name == "b"));
    }

    #[tokio::test]
    async fn test_stall_runs_once() {
        let (mut scheduler, clock) = scheduler();
        scheduler
            .register("a", secs(1), |rec| {
                Box::pin(async move {
                    rec.log.push("a");
                    Ok(())
                })
            })
            .unwrap();
        scheduler.tick().await;

        clock.advance(secs(10));
        let summary = scheduler.tick().await;
        assert_eq!(summary.executed.len(), 1);
        assert!(scheduler.tick().await.is_idle());
        assert_eq!(scheduler.context().log.len(), 2);
        assert_eq!(scheduler.status()[0].next_run, clock.now() + secs(1));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_bad_intervals() {
        let (mut scheduler, _clock) = scheduler();
        scheduler.register("a", secs(1), noop).unwrap();
        assert!(matches!(
            scheduler.register("a", secs(5), noop),
            Err(Error::DuplicateTask { .. })
        ));
        assert!(matches!(
            scheduler.register("b", Duration::ZERO, noop),
            Err(Error::InvalidInterval { .. })
        ));
        assert!(matches!(
            scheduler.register("c", Duration::MAX, noop),
            Err(Error::InvalidInterval { .. })
        ));
        scheduler.register("d", MAX_TASK_INTERVAL, noop).unwrap();
        assert_eq!(scheduler.tasks().len(), 2);

        // The longest accepted interval still schedules without overflow
        let summary = scheduler.tick().await;
        assert_eq!(summary.executed, ["a", "d"]);
        assert_eq!(scheduler.status()[0].interval, secs(1));
    }

    #[tokio::test]
    async fn test_overdue_reported_at_call_time() {
        let (mut scheduler, clock) = scheduler();
        scheduler
            .register("a", secs(5), |_| Box::pin(async { Ok(()) }))
            .unwrap();
        let handle = scheduler.handle();

        scheduler.tick().await;
        assert!(!handle.status()[0].overdue);

        clock.advance(secs(6));
        assert!(handle.status()[0].overdue);
        assert!(scheduler.status()[0].overdue);
    }

    #[tokio::test]
    async fn test_handle_stops_run_loop() {
        let (mut scheduler, clock) = scheduler();
        scheduler
            .register("a", secs(1), |rec| {
                Box::pin(async move {
                    rec.log.push("a");
                    Ok(())
                })
            })
            .unwrap();
        let handle = scheduler.handle();

        // Stop requested before the loop starts: exactly one tick runs
        handle.stop();
        handle.stop();
        scheduler.run().await;

        assert!(!handle.is_running());
        assert_eq!(scheduler.context().log, ["a"]);
        assert_eq!(clock.now(), scheduler.status()[0].last_run.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_system_clock() {
        let mut scheduler = Scheduler::new(Recorder::default());
        scheduler
            .register("a", Duration::from_millis(100), |rec| {
                Box::pin(async move {
                    rec.log.push("a");
                    Ok(())
                })
            })
            .unwrap();
        let handle = scheduler.handle();

        let runner = tokio::spawn(async move {
            scheduler.run().await;
            scheduler
        });
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert!(handle.is_running());
        handle.stop();

        let scheduler = runner.await.unwrap();
        assert_eq!(scheduler.context().log.len(), 5);
        assert_eq!(handle.status()[0].runs, 5);
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let config = SchedulerConfig::new().tick_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
