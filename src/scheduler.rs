//! Trickle scheduler: one task per tick, one tick per delay.
//!
//! A [`TaskEngine`] owns a dedicated worker thread that sleeps for the
//! configured delay, pops the highest-priority task from its
//! [`SharedQueue`] and runs it through the [`Executor`]. An empty queue runs
//! the [`IdleHandler`] instead and parks the engine (`Ready`) until
//! [`TaskEngine::add`] wakes it. Failures and panics are counted and passed
//! to the [`ErrorHandler`]; neither ever ends the loop.

use crate::error::{Error, Result};
use crate::queue::{PriorityQueue, SharedQueue};
use crate::utils::lock;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

pub const DEFAULT_TICK_DELAY: Duration = Duration::from_millis(250);

/// Runs one task. Returned tasks are fed back through [`TaskEngine::add`].
pub trait Executor<T>: Send + Sync {
    fn execute(&self, task: &T) -> Result<Vec<T>>;
}

/// Gatekeeper for [`TaskEngine::add`]; may rewrite the task, veto it
/// (`None`), or reshape the queue it is about to join.
pub trait AdmissionFilter<T>: Send + Sync {
    fn admit(&self, task: T, queue: &mut PriorityQueue<T>) -> Option<T>;
}

/// Decides what happens to a failed task. A returned task is re-added.
pub trait ErrorHandler<T>: Send + Sync {
    fn on_error(&self, task: T, error: &Error) -> Option<T>;
}

pub trait IdleHandler: Send + Sync {
    fn on_idle(&self);
}

/// The pluggable behaviour of a [`TaskEngine`]. Only the executor is
/// required.
pub struct TaskHooks<T> {
    executor: Arc<dyn Executor<T>>,
    admission: Option<Arc<dyn AdmissionFilter<T>>>,
    error_handler: Option<Arc<dyn ErrorHandler<T>>>,
    idle_handler: Option<Arc<dyn IdleHandler>>,
}

impl<T> TaskHooks<T> {
    pub fn new(executor: Arc<dyn Executor<T>>) -> Self {
        Self {
            executor,
            admission: None,
            error_handler: None,
            idle_handler: None,
        }
    }

    pub fn admission(mut self, filter: Arc<dyn AdmissionFilter<T>>) -> Self {
        self.admission = Some(filter);
        self
    }

    pub fn on_error(mut self, handler: Arc<dyn ErrorHandler<T>>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn on_idle(mut self, handler: Arc<dyn IdleHandler>) -> Self {
        self.idle_handler = Some(handler);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    /// Started with nothing to do; parked until a task arrives.
    Ready,
    /// Started with work pending; the tick timer is armed.
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Executed,
    Idle,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub executed: u64,
    pub idle: u64,
    pub errors: u64,
    pub queued: usize,
}

#[derive(Default)]
struct Counters {
    executed: AtomicU64,
    idle: AtomicU64,
    errors: AtomicU64,
}

struct Control {
    state: EngineState,
    stop_requested: bool,
    worker: Option<JoinHandle<()>>,
}

struct Inner<T> {
    queue: SharedQueue<T>,
    hooks: TaskHooks<T>,
    delay: Duration,
    control: Mutex<Control>,
    wake: Condvar,
    counters: Counters,
}

pub struct TaskEngine<T: Send + 'static> {
    inner: Arc<Inner<T>>,
    name: String,
}

impl<T: Send + 'static> TaskEngine<T> {
    pub fn new(name: impl Into<String>, queue: SharedQueue<T>, delay: Duration, hooks: TaskHooks<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                hooks,
                delay,
                control: Mutex::new(Control {
                    state: EngineState::Stopped,
                    stop_requested: false,
                    worker: None,
                }),
                wake: Condvar::new(),
                counters: Counters::default(),
            }),
            name: name.into(),
        }
    }

    pub fn queue(&self) -> &SharedQueue<T> {
        &self.inner.queue
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    pub fn state(&self) -> EngineState {
        lock(&self.inner.control).state
    }

    pub fn is_running(&self) -> bool {
        self.state() != EngineState::Stopped
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> EngineStats {
        self.inner.stats()
    }

    /// Offers `task` to the admission filter and queues whatever it lets
    /// through. Wakes a parked engine. Returns whether a task was queued.
    pub fn add(&self, task: T) -> bool {
        self.inner.add(task)
    }

    /// Runs one tick on the calling thread.
    pub fn tick(&self) -> TickOutcome {
        self.inner.tick()
    }

    /// Ticks on the calling thread until the queue is empty or `max_ticks`
    /// tasks have run. Returns the number of executed and failed ticks.
    pub fn drain(&self, max_ticks: usize) -> usize {
        let mut ticks = 0;
        while ticks < max_ticks {
            match self.tick() {
                TickOutcome::Idle => break,
                TickOutcome::Executed | TickOutcome::Failed => ticks += 1,
            }
        }
        ticks
    }

    pub fn start(&self) -> Result<()> {
        let mut control = lock(&self.inner.control);
        if control.state != EngineState::Stopped {
            return Ok(());
        }
        if let Some(previous) = control.worker.take() {
            if previous.join().is_err() {
                warn!("Previous {} worker panicked", self.name);
            }
        }

        let inner = Arc::clone(&self.inner);
        let worker = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || inner.run())?;

        // The worker blocks on `control` until this guard is released.
        control.stop_requested = false;
        control.state = if self.is_empty() {
            EngineState::Ready
        } else {
            EngineState::Running
        };
        control.worker = Some(worker);
        debug!("Started {} ({:?} delay)", self.name, self.inner.delay);
        Ok(())
    }

    /// Stops the timer. A task already executing runs to completion first.
    pub fn stop(&self) {
        let worker = {
            let mut control = lock(&self.inner.control);
            if control.state == EngineState::Stopped && control.worker.is_none() {
                return;
            }
            control.stop_requested = true;
            control.state = EngineState::Stopped;
            self.inner.wake.notify_all();
            control.worker.take()
        };

        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                warn!("{} worker panicked during shutdown", self.name);
            }
        }
        debug!("Stopped {}", self.name);
    }
}

impl<T: Send + 'static> Drop for TaskEngine<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: Send + 'static> fmt::Debug for TaskEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEngine")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T: Send + 'static> Inner<T> {
    fn stats(&self) -> EngineStats {
        EngineStats {
            executed: self.counters.executed.load(Ordering::Relaxed),
            idle: self.counters.idle.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            queued: lock(&self.queue).len(),
        }
    }

    fn add(&self, task: T) -> bool {
        {
            let mut queue = lock(&self.queue);
            let task = match &self.hooks.admission {
                Some(filter) => match filter.admit(task, &mut queue) {
                    Some(task) => task,
                    None => return false,
                },
                None => task,
            };
            queue.enqueue(task);
        }

        let mut control = lock(&self.control);
        if control.state == EngineState::Ready {
            control.state = EngineState::Running;
            self.wake.notify_all();
        }
        true
    }

    fn tick(&self) -> TickOutcome {
        let next = {
            let mut queue = lock(&self.queue);
            if queue.is_empty() {
                None
            } else {
                queue.dequeue().ok()
            }
        };

        let Some(task) = next else {
            self.counters.idle.fetch_add(1, Ordering::Relaxed);
            if let Some(handler) = &self.hooks.idle_handler {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler.on_idle())) {
                    error!("Idle handler panicked: {}", panic_message(payload.as_ref()));
                }
            }
            self.park_if_empty();
            return TickOutcome::Idle;
        };

        let result = catch_unwind(AssertUnwindSafe(|| self.hooks.executor.execute(&task)))
            .unwrap_or_else(|payload| Err(Error::TaskPanicked(panic_message(payload.as_ref()))));

        match result {
            Ok(follow_ups) => {
                self.counters.executed.fetch_add(1, Ordering::Relaxed);
                for task in follow_ups {
                    self.add(task);
                }
                TickOutcome::Executed
            }
            Err(err) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                trace!("Task failed: {}", err);
                if let Some(handler) = &self.hooks.error_handler {
                    match catch_unwind(AssertUnwindSafe(|| handler.on_error(task, &err))) {
                        Ok(Some(retry)) => {
                            self.add(retry);
                        }
                        Ok(None) => {}
                        Err(payload) => {
                            error!("Error handler panicked: {}", panic_message(payload.as_ref()));
                        }
                    }
                }
                TickOutcome::Failed
            }
        }
    }

    /// The emptiness check happens under `control`: an `add` that lands
    /// before it keeps the engine running, one that lands after it finds
    /// `Ready` and wakes the worker.
    fn park_if_empty(&self) {
        let mut control = lock(&self.control);
        if control.state == EngineState::Running && lock(&self.queue).is_empty() {
            control.state = EngineState::Ready;
        }
    }

    fn run(&self) {
        let mut control = lock(&self.control);
        let mut deadline = Instant::now() + self.delay;
        loop {
            if control.stop_requested {
                return;
            }
            match control.state {
                EngineState::Stopped => return,
                EngineState::Ready => {
                    control = self
                        .wake
                        .wait(control)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    deadline = Instant::now() + self.delay;
                }
                EngineState::Running => {
                    let now = Instant::now();
                    if now < deadline {
                        control = self
                            .wake
                            .wait_timeout(control, deadline - now)
                            .map(|(guard, _)| guard)
                            .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                        continue;
                    }
                    drop(control);
                    self.tick();
                    control = lock(&self.control);
                    deadline = Instant::now() + self.delay;
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collect(Mutex<Vec<u32>>);

    impl Executor<u32> for Collect {
        fn execute(&self, task: &u32) -> Result<Vec<u32>> {
            lock(&self.0).push(*task);
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_panic_message() {
        let payload = catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }

    #[test]
    fn test_tick_runs_highest_first() {
        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        let engine = TaskEngine::new(
            "test-engine",
            PriorityQueue::new(|a: &u32, b: &u32| a > b).shared(),
            DEFAULT_TICK_DELAY,
            TaskHooks::new(collect.clone()),
        );
        for n in [3, 9, 1, 5] {
            assert!(engine.add(n));
        }
        assert_eq!(engine.drain(10), 4);
        assert_eq!(*lock(&collect.0), vec![9, 5, 3, 1]);
        assert_eq!(engine.tick(), TickOutcome::Idle);
        let stats = engine.stats();
        assert_eq!((stats.executed, stats.idle, stats.errors, stats.queued), (4, 1, 0, 0));
    }

    #[test]
    fn test_state_transitions() {
        let engine = TaskEngine::new(
            "test-engine",
            PriorityQueue::new(|a: &u32, b: &u32| a > b).shared(),
            Duration::from_secs(60),
            TaskHooks::new(Arc::new(Collect(Mutex::new(Vec::new())))),
        );
        assert_eq!(engine.state(), EngineState::Stopped);
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        engine.add(1);
        assert_eq!(engine.state(), EngineState::Running);
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_task_added_while_parking_keeps_engine_running() {
        let engine = TaskEngine::new(
            "test-engine",
            PriorityQueue::new(|a: &u32, b: &u32| a > b).shared(),
            Duration::from_secs(60),
            TaskHooks::new(Arc::new(Collect(Mutex::new(Vec::new())))),
        );
        let inner = Arc::clone(&engine.inner);

        // The last task just ran and the queue is empty
        let mut control = lock(&inner.control);
        control.state = EngineState::Running;
        let parker = {
            let inner = Arc::clone(&inner);
            thread::spawn(move || inner.park_if_empty())
        };
        thread::sleep(Duration::from_millis(50));

        // A producer enqueues while the worker is deciding whether to park
        lock(&inner.queue).enqueue(7);
        drop(control);
        parker.join().unwrap();

        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.len(), 1);
    }
}
