//! Single-worker task scheduler.
//!
//! Tasks run one at a time, in the order they were scheduled, on a
//! dedicated thread. Two locks guard the scheduler:
//!
//! - the queue lock protects the pending tasks and the scheduler flags;
//! - the execution barrier is held by the worker while a task runs and by
//!   a caller between [`TaskScheduler::suspend`] and [`TaskScheduler::resume`].
//!
//! Lock order is always barrier then queue. The worker gives up the queue
//! lock before waiting on the barrier and while a task runs, so tasks can
//! be scheduled or cancelled during a long execution. A caller waiting in
//! `suspend` is announced in the queue state first; the worker does not
//! start another task until that caller has been served.
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Identifier of a scheduled task.
pub type TaskId = u32;

/// Returned when a task could not be scheduled.
pub const INVALID_TASK_ID: TaskId = 0;

/// Largest id handed out before the counter wraps back to 1.
pub const MAX_TASK_ID: TaskId = i32::MAX as TaskId;

type Action = Box<dyn FnOnce() + Send + 'static>;

struct TaskItem {
    id: TaskId,
    name: String,
    action: Action,
}

struct QueueState {
    tasks: VecDeque<TaskItem>,
    running: bool,
    locked_out: bool,
    pending_suspends: usize,
    next_id: TaskId,
    max_id: TaskId,
    executing: TaskId,
}

impl QueueState {
    fn take_id(&mut self) -> TaskId {
        let id = self.next_id;
        self.next_id = if id >= self.max_id { 1 } else { id + 1 };
        id
    }
}

/// Binary lock that can be released from a different call than the one
/// that acquired it.
struct ExecutionBarrier {
    held: Mutex<bool>,
    released: Condvar,
}

impl ExecutionBarrier {
    fn new() -> Self {
        Self {
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
    }

    fn release(&self) {
        *self.held.lock() = false;
        self.released.notify_all();
    }

    fn guard(&self) -> BarrierGuard<'_> {
        self.acquire();
        BarrierGuard(self)
    }
}

struct BarrierGuard<'a>(&'a ExecutionBarrier);

impl Drop for BarrierGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

struct Shared {
    queue: Mutex<QueueState>,
    wake: Condvar,
    barrier: ExecutionBarrier,
}

/// FIFO scheduler backed by one worker thread.
///
/// Every method takes `&self`; share the scheduler through an `Arc`.
/// Dropping the scheduler stops it.
pub struct TaskScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Create a stopped scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_task_id(MAX_TASK_ID)
    }

    pub(crate) fn with_max_task_id(max_id: TaskId) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState {
                    tasks: VecDeque::new(),
                    running: false,
                    locked_out: false,
                    pending_suspends: 0,
                    next_id: 1,
                    max_id: max_id.max(1),
                    executing: INVALID_TASK_ID,
                }),
                wake: Condvar::new(),
                barrier: ExecutionBarrier::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker thread. Returns false if the scheduler was already
    /// running or the thread could not be spawned.
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("Scheduler already running");
            return false;
        }

        self.shared.queue.lock().running = true;
        let shared = self.shared.clone();
        match thread::Builder::new()
            .name("rssecmanager-scheduler".to_string())
            .spawn(move || run_worker(shared))
        {
            Ok(handle) => {
                *worker = Some(handle);
                info!("Scheduler started");
                true
            }
            Err(e) => {
                error!("Failed to spawn scheduler thread: {}", e);
                self.shared.queue.lock().running = false;
                false
            }
        }
    }

    /// Append a task to the queue.
    ///
    /// Returns [`INVALID_TASK_ID`] when the scheduler is stopped or
    /// suspended; the action is dropped without running.
    #[doc(alias = "enqueue")]
    pub fn schedule<F>(&self, name: impl Into<String>, action: F) -> TaskId
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let mut queue = self.shared.queue.lock();
        if !queue.running {
            warn!("Scheduler not running, rejecting task '{}'", name);
            return INVALID_TASK_ID;
        }
        if queue.locked_out {
            warn!("Scheduler suspended, rejecting task '{}'", name);
            return INVALID_TASK_ID;
        }

        let id = queue.take_id();
        trace!("Scheduled task {} '{}'", id, name);
        queue.tasks.push_back(TaskItem {
            id,
            name,
            action: Box::new(action),
        });
        self.shared.wake.notify_one();
        id
    }

    /// Remove a queued task. Returns false for the invalid id, unknown ids
    /// and the task currently executing.
    pub fn cancel(&self, id: TaskId) -> bool {
        if id == INVALID_TASK_ID {
            return false;
        }

        let mut queue = self.shared.queue.lock();
        if queue.executing == id {
            debug!("Task {} is executing and cannot be cancelled", id);
            return false;
        }
        let Some(pos) = queue.tasks.iter().position(|t| t.id == id) else {
            debug!("Task {} not found", id);
            return false;
        };
        let removed = queue.tasks.remove(pos);
        drop(queue);

        if let Some(task) = removed {
            debug!("Cancelled task {} '{}'", task.id, task.name);
        }
        true
    }

    /// Drop every queued task without running it.
    ///
    /// The executing task, if any, is unaffected.
    #[doc(alias = "remove_all")]
    pub fn drain_all(&self) {
        let mut queue = self.shared.queue.lock();
        if !queue.locked_out {
            warn!("Draining tasks while the scheduler is not suspended");
        }
        let drained = std::mem::take(&mut queue.tasks);
        drop(queue);

        if !drained.is_empty() {
            debug!("Drained {} queued tasks", drained.len());
        }
    }

    /// Take the execution barrier and reject further scheduling.
    ///
    /// Blocks until the executing task, if any, has returned. No task
    /// starts until [`resume`](Self::resume). Must not be called from a
    /// task, nor twice without an intervening `resume`.
    pub fn suspend(&self) {
        self.shared.queue.lock().pending_suspends += 1;
        self.shared.barrier.acquire();
        let mut queue = self.shared.queue.lock();
        queue.pending_suspends -= 1;
        queue.locked_out = true;
        drop(queue);
        debug!("Scheduler suspended");
    }

    /// Release the execution barrier taken by [`suspend`](Self::suspend).
    ///
    /// Ignored unless the scheduler is suspended; a barrier held by the
    /// worker or by [`stop`](Self::stop) is never released here.
    pub fn resume(&self) {
        let mut queue = self.shared.queue.lock();
        if !queue.locked_out {
            warn!("Resume called on a scheduler that is not suspended");
            return;
        }
        queue.locked_out = false;
        drop(queue);

        self.shared.barrier.release();
        self.shared.wake.notify_one();
        debug!("Scheduler resumed");
    }

    /// Stop the worker, dropping queued tasks, and wait for it to exit.
    ///
    /// Scheduling is refused and the queue emptied before anything else, so
    /// only the task in progress still runs. Calling `stop` from inside a
    /// task stops the scheduler without waiting for the worker.
    pub fn stop(&self) {
        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            return;
        };

        let (drained, suspended) = {
            let mut queue = self.shared.queue.lock();
            queue.running = false;
            let suspended = std::mem::replace(&mut queue.locked_out, false);
            (std::mem::take(&mut queue.tasks), suspended)
        };
        self.shared.wake.notify_all();
        if !drained.is_empty() {
            debug!("Dropped {} queued tasks on stop", drained.len());
        }
        drop(drained);

        if handle.thread().id() == thread::current().id() {
            warn!("Scheduler stopped from one of its own tasks");
            return;
        }

        if suspended {
            warn!("Stopping a suspended scheduler");
            self.shared.barrier.release();
        }

        // Waits out the task in progress. Held without the locked-out flag,
        // which `resume` checks before releasing.
        drop(self.shared.barrier.guard());

        if handle.join().is_err() {
            error!("Scheduler thread panicked");
        }
        info!("Scheduler stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.queue.lock().running
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.shared.queue.lock().locked_out
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the task currently executing, or [`INVALID_TASK_ID`].
    #[must_use]
    pub fn current_task(&self) -> TaskId {
        self.shared.queue.lock().executing
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.shared.queue.lock();
        f.debug_struct("TaskScheduler")
            .field("running", &queue.running)
            .field("suspended", &queue.locked_out)
            .field("queued", &queue.tasks.len())
            .field("executing", &queue.executing)
            .finish()
    }
}

fn run_worker(shared: Arc<Shared>) {
    let mut queue = shared.queue.lock();
    while queue.running {
        if queue.tasks.is_empty() || queue.locked_out || queue.pending_suspends > 0 {
            shared.wake.wait(&mut queue);
            continue;
        }

        let barrier = MutexGuard::unlocked(&mut queue, || shared.barrier.guard());
        if !queue.running {
            break;
        }
        if queue.locked_out || queue.pending_suspends > 0 {
            drop(barrier);
            continue;
        }
        let Some(task) = queue.tasks.pop_front() else {
            continue;
        };
        queue.executing = task.id;
        MutexGuard::unlocked(&mut queue, || execute(task));
        queue.executing = INVALID_TASK_ID;
        drop(barrier);
    }
    trace!("Scheduler worker exiting");
}

fn execute(task: TaskItem) {
    let TaskItem { id, name, action } = task;
    trace!("Executing task {} '{}'", id, name);
    if panic::catch_unwind(AssertUnwindSafe(action)).is_err() {
        error!("Task {} '{}' panicked", id, name);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{TaskScheduler, INVALID_TASK_ID};

    const WAIT: Duration = Duration::from_secs(5);

    /// Schedule a task that reports it started, then waits to be released.
    fn schedule_blocker(scheduler: &TaskScheduler) -> (u32, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let id = scheduler.schedule("blocker", move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        (id, started_rx, release_tx)
    }

    fn flush(scheduler: &TaskScheduler) {
        let (tx, rx) = mpsc::channel();
        assert_ne!(scheduler.schedule("flush", move || tx.send(()).unwrap()), INVALID_TASK_ID);
        rx.recv_timeout(WAIT).expect("flush task did not run");
    }

    #[test]
    fn rejects_tasks_when_not_started() {
        let scheduler = TaskScheduler::new();
        assert_eq!(scheduler.schedule("early", || {}), INVALID_TASK_ID);
        assert!(scheduler.is_empty());
        assert!(!scheduler.is_running());
    }

    #[test]
    fn start_twice_is_refused() {
        let scheduler = TaskScheduler::new();
        assert!(scheduler.start());
        assert!(!scheduler.start());
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn tasks_run_in_fifo_order() {
        let scheduler = TaskScheduler::new();
        scheduler.start();
        let (_, started, release) = schedule_blocker(&scheduler);
        started.recv_timeout(WAIT).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            scheduler.schedule(format!("task-{}", i), move || order.lock().unwrap().push(i));
        }
        assert_eq!(scheduler.len(), 5);

        release.send(()).unwrap();
        flush(&scheduler);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn ids_wrap_and_skip_invalid() {
        let scheduler = TaskScheduler::with_max_task_id(3);
        scheduler.start();
        let (_, started, release) = schedule_blocker(&scheduler);
        started.recv_timeout(WAIT).unwrap();

        let ids: Vec<_> = (0..4).map(|_| scheduler.schedule("noop", || {})).collect();
        assert_eq!(ids, vec![2, 3, 1, 2]);
        release.send(()).unwrap();
    }

    #[test]
    fn cancel_executing_task_fails_and_queued_task_never_runs() {
        let scheduler = TaskScheduler::new();
        scheduler.start();
        let (blocker, started, release) = schedule_blocker(&scheduler);
        started.recv_timeout(WAIT).unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let queued = scheduler.schedule("cancelled", move || flag.store(true, Ordering::SeqCst));

        assert_eq!(scheduler.current_task(), blocker);
        assert!(!scheduler.cancel(blocker));
        assert!(scheduler.cancel(queued));
        assert!(!scheduler.cancel(queued));
        assert!(!scheduler.cancel(INVALID_TASK_ID));

        release.send(()).unwrap();
        flush(&scheduler);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn suspend_waits_for_executing_task() {
        let scheduler = TaskScheduler::new();
        scheduler.start();

        let done = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = mpsc::channel();
        let flag = done.clone();
        scheduler.schedule("slow", move || {
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
        });
        started_rx.recv_timeout(WAIT).unwrap();

        scheduler.suspend();
        assert!(done.load(Ordering::SeqCst));
        assert!(scheduler.is_suspended());

        let before = scheduler.len();
        assert_eq!(scheduler.schedule("rejected", || {}), INVALID_TASK_ID);
        assert_eq!(scheduler.len(), before);

        scheduler.resume();
        assert!(!scheduler.is_suspended());
        flush(&scheduler);
    }

    #[test]
    fn no_task_starts_while_suspended() {
        let scheduler = Arc::new(TaskScheduler::new());
        scheduler.start();
        let (_, started, release) = schedule_blocker(&scheduler);
        started.recv_timeout(WAIT).unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler.schedule("counted", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (suspended_tx, suspended_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let suspender = {
            let scheduler = scheduler.clone();
            thread::spawn(move || {
                scheduler.suspend();
                suspended_tx.send(()).unwrap();
                resume_rx.recv().unwrap();
                scheduler.resume();
            })
        };

        wait_until("pending suspend", || scheduler.shared.queue.lock().pending_suspends == 1);
        release.send(()).unwrap();
        suspended_rx.recv_timeout(WAIT).unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        resume_tx.send(()).unwrap();
        suspender.join().unwrap();
        flush(&scheduler);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drain_all_discards_queued_tasks() {
        let scheduler = TaskScheduler::new();
        scheduler.start();
        let (_, started, release) = schedule_blocker(&scheduler);
        started.recv_timeout(WAIT).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = ran.clone();
            scheduler.schedule("drained", move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        scheduler.drain_all();
        assert!(scheduler.is_empty());

        release.send(()).unwrap();
        flush(&scheduler);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let scheduler = TaskScheduler::new();
        scheduler.start();
        scheduler.schedule("boom", || panic!("task failure"));
        flush(&scheduler);
        assert!(scheduler.is_running());
    }

    #[test]
    fn stop_releases_suspended_scheduler_and_drops_queue() {
        let scheduler = TaskScheduler::new();
        scheduler.start();
        let (_, started, release) = schedule_blocker(&scheduler);
        started.recv_timeout(WAIT).unwrap();
        release.send(()).unwrap();

        scheduler.suspend();
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(!scheduler.is_suspended());
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.schedule("after-stop", || {}), INVALID_TASK_ID);
    }

    fn counting_tasks(scheduler: &TaskScheduler, count: usize) -> Arc<AtomicUsize> {
        let runs = Arc::new(AtomicUsize::new(0));
        for i in 0..count {
            let runs = runs.clone();
            let id = scheduler.schedule(format!("counted-{}", i), move || {
                thread::sleep(Duration::from_millis(20));
                runs.fetch_add(1, Ordering::SeqCst);
            });
            assert_ne!(id, INVALID_TASK_ID);
        }
        runs
    }

    fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + WAIT;
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn suspend_returns_before_next_queued_task() {
        let scheduler = Arc::new(TaskScheduler::new());
        scheduler.start();
        let (_, started, release) = schedule_blocker(&scheduler);
        started.recv_timeout(WAIT).unwrap();
        let runs = counting_tasks(&scheduler, 3);

        let (suspended_tx, suspended_rx) = mpsc::channel();
        let suspender = {
            let scheduler = scheduler.clone();
            thread::spawn(move || {
                scheduler.suspend();
                suspended_tx.send(()).unwrap();
            })
        };
        wait_until("pending suspend", || scheduler.shared.queue.lock().pending_suspends == 1);

        release.send(()).unwrap();
        suspended_rx.recv_timeout(WAIT).unwrap();
        suspender.join().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.len(), 3);

        scheduler.resume();
        flush(&scheduler);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stop_drops_tasks_queued_behind_running_task() {
        let scheduler = Arc::new(TaskScheduler::new());
        scheduler.start();
        let (_, started, release) = schedule_blocker(&scheduler);
        started.recv_timeout(WAIT).unwrap();
        let runs = counting_tasks(&scheduler, 3);

        let stopper = {
            let scheduler = scheduler.clone();
            thread::spawn(move || scheduler.stop())
        };
        wait_until("stop", || !scheduler.is_running());
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.schedule("late", || {}), INVALID_TASK_ID);

        release.send(()).unwrap();
        stopper.join().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn resume_cannot_release_barrier_it_does_not_own() {
        let scheduler = TaskScheduler::new();
        scheduler.start();

        let exclusive = scheduler.shared.barrier.guard();
        scheduler.resume();
        assert!(*scheduler.shared.barrier.held.lock());

        let runs = counting_tasks(&scheduler, 1);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        drop(exclusive);
        flush(&scheduler);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_resume_after_stop_is_ignored() {
        let scheduler = TaskScheduler::new();
        scheduler.start();
        scheduler.suspend();
        scheduler.stop();

        scheduler.resume();
        assert!(!scheduler.is_suspended());
        assert!(!*scheduler.shared.barrier.held.lock());
    }

    #[test]
    fn stop_from_task_does_not_deadlock() {
        let scheduler = Arc::new(TaskScheduler::new());
        scheduler.start();
        let (tx, rx) = mpsc::channel();
        let inner = scheduler.clone();
        scheduler.schedule("self-stop", move || {
            inner.stop();
            tx.send(inner.is_running()).unwrap();
        });
        assert!(!rx.recv_timeout(WAIT).unwrap());
    }
}
