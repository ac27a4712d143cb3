use catalog_tracker::queue::PriorityQueue;
use catalog_tracker::scheduler::{
    AdmissionFilter, EngineState, ErrorHandler, Executor, IdleHandler, TaskEngine, TaskHooks,
    TickOutcome,
};
use catalog_tracker::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
struct Job {
    name: &'static str,
    weight: u32,
    attempts: u32,
}

fn job(name: &'static str, weight: u32) -> Job {
    Job {
        name,
        weight,
        attempts: 0,
    }
}

fn queue() -> PriorityQueue<Job> {
    PriorityQueue::new(|a: &Job, b: &Job| a.weight > b.weight)
}

/// Records every job; fails `flaky` jobs and panics on `bomb`.
#[derive(Default)]
struct Worker {
    seen: Mutex<Vec<&'static str>>,
}

impl Executor<Job> for Worker {
    fn execute(&self, task: &Job) -> Result<Vec<Job>> {
        self.seen.lock().unwrap().push(task.name);
        match task.name {
            "flaky" if task.attempts < 2 => Err(Error::Other("not yet".to_string())),
            "bomb" => panic!("bomb went off"),
            "parent" => Ok(vec![job("child", 1)]),
            _ => Ok(Vec::new()),
        }
    }
}

struct Retry;

impl ErrorHandler<Job> for Retry {
    fn on_error(&self, mut task: Job, _error: &Error) -> Option<Job> {
        if task.attempts >= 3 {
            return None;
        }
        task.attempts += 1;
        Some(task)
    }
}

#[derive(Default)]
struct IdleCounter(AtomicUsize);

impl IdleHandler for IdleCounter {
    fn on_idle(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Drops jobs named `skip` and keeps one job per name.
struct Dedupe;

impl AdmissionFilter<Job> for Dedupe {
    fn admit(&self, task: Job, queue: &mut PriorityQueue<Job>) -> Option<Job> {
        if task.name == "skip" || queue.contains(|queued| queued.name == task.name) {
            return None;
        }
        Some(task)
    }
}

fn engine_with(worker: Arc<Worker>, hooks: impl FnOnce(TaskHooks<Job>) -> TaskHooks<Job>) -> TaskEngine<Job> {
    TaskEngine::new(
        "test-engine",
        queue().shared(),
        Duration::from_millis(5),
        hooks(TaskHooks::<Job>::new(worker)),
    )
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn test_one_task_per_tick_in_priority_order() {
    let worker = Arc::new(Worker::default());
    let engine = engine_with(worker.clone(), |h| h);
    engine.add(job("low", 1));
    engine.add(job("high", 9));
    engine.add(job("mid", 5));

    assert_eq!(engine.tick(), TickOutcome::Executed);
    assert_eq!(*worker.seen.lock().unwrap(), vec!["high"]);
    assert_eq!(engine.len(), 2);

    assert_eq!(engine.drain(10), 2);
    assert_eq!(*worker.seen.lock().unwrap(), vec!["high", "mid", "low"]);
}

#[test]
fn test_follow_up_tasks_are_queued() {
    let worker = Arc::new(Worker::default());
    let engine = engine_with(worker.clone(), |h| h);
    engine.add(job("parent", 3));
    engine.drain(10);
    assert_eq!(*worker.seen.lock().unwrap(), vec!["parent", "child"]);
}

#[test]
fn test_error_handler_requeues() {
    let worker = Arc::new(Worker::default());
    let engine = engine_with(worker.clone(), |h| h.on_error(Arc::new(Retry)));
    engine.add(job("flaky", 1));

    assert_eq!(engine.tick(), TickOutcome::Failed);
    assert_eq!(engine.tick(), TickOutcome::Failed);
    assert_eq!(engine.tick(), TickOutcome::Executed);
    assert_eq!(engine.tick(), TickOutcome::Idle);

    let stats = engine.stats();
    assert_eq!((stats.executed, stats.errors), (1, 2));
}

#[test]
fn test_failure_without_handler_drops_task() {
    let worker = Arc::new(Worker::default());
    let engine = engine_with(worker, |h| h);
    engine.add(job("flaky", 1));
    assert_eq!(engine.tick(), TickOutcome::Failed);
    assert!(engine.is_empty());
}

#[test]
fn test_panic_is_contained() {
    let worker = Arc::new(Worker::default());
    let engine = engine_with(worker.clone(), |h| h);
    engine.add(job("bomb", 9));
    engine.add(job("after", 1));

    assert_eq!(engine.tick(), TickOutcome::Failed);
    assert_eq!(engine.tick(), TickOutcome::Executed);
    assert_eq!(*worker.seen.lock().unwrap(), vec!["bomb", "after"]);
    assert_eq!(engine.stats().errors, 1);
}

#[test]
fn test_admission_filter_vetoes() {
    let worker = Arc::new(Worker::default());
    let engine = engine_with(worker, |h| h.admission(Arc::new(Dedupe)));
    assert!(engine.add(job("a", 1)));
    assert!(!engine.add(job("a", 5)));
    assert!(!engine.add(job("skip", 5)));
    assert_eq!(engine.len(), 1);
}

#[test]
fn test_idle_handler_runs_on_empty_queue() {
    let worker = Arc::new(Worker::default());
    let idle = Arc::new(IdleCounter::default());
    let engine = engine_with(worker, |h| h.on_idle(idle.clone()));

    assert_eq!(engine.tick(), TickOutcome::Idle);
    assert_eq!(idle.0.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats().idle, 1);
}

#[test]
fn test_background_worker_drains_and_parks() {
    let worker = Arc::new(Worker::default());
    let idle = Arc::new(IdleCounter::default());
    let engine = engine_with(worker.clone(), |h| h.on_idle(idle.clone()));

    engine.start().unwrap();
    assert_eq!(engine.state(), EngineState::Ready);
    engine.stop();

    // Queued while stopped so both are waiting when the timer first fires
    engine.add(job("one", 1));
    engine.add(job("two", 2));
    engine.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        engine.state() == EngineState::Ready && worker.seen.lock().unwrap().len() == 2
    }));
    assert_eq!(*worker.seen.lock().unwrap(), vec!["two", "one"]);
    let idles = idle.0.load(Ordering::SeqCst);
    assert!(idles >= 1);

    // Parked: no further idle ticks without new work
    thread::sleep(Duration::from_millis(50));
    assert_eq!(idle.0.load(Ordering::SeqCst), idles);

    engine.add(job("three", 3));
    assert!(wait_until(Duration::from_secs(5), || worker.seen.lock().unwrap().len() == 3));

    engine.stop();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(!engine.is_running());
}

#[test]
fn test_stop_keeps_pending_tasks() {
    let worker = Arc::new(Worker::default());
    let engine = TaskEngine::new(
        "slow-engine",
        queue().shared(),
        Duration::from_secs(60),
        TaskHooks::new(worker.clone() as Arc<dyn Executor<Job>>),
    );
    engine.start().unwrap();
    engine.add(job("pending", 1));
    engine.stop();

    assert!(worker.seen.lock().unwrap().is_empty());
    assert_eq!(engine.len(), 1);

    // Restartable
    engine.start().unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    engine.stop();
}
