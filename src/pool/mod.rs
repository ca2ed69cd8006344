//! Worker pool and transaction substrate.
//!
//! A transaction is a unit of work with a four-state lifecycle:
//! PENDING -> STARTED -> {DONE, SKIPPED, ABORTED}. The pool owns a fixed
//! set of worker threads, each with its own mutex-guarded FIFO queue.
//! Work staged on the pool's shared queue is split round-robin across the
//! workers by `pre_distribute_work`; workers never steal from each other,
//! so the mapping from transaction to worker is deterministic.
//!
//! Cancellation is cooperative: `stop` raises every worker's terminator
//! flag, and long-running transactions poll it via
//! [`WorkerContext::terminate_on_request`], which surfaces an abort. A
//! transaction that aborts (or panics) is recorded and its siblings keep
//! running; transactions still queued when the pool stops are recorded as
//! skipped. A completed transaction is dropped as soon as its final state
//! is recorded.


use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::Scope;

use thiserror::Error;

/// Reason a transaction did not run to completion.
#[derive(Debug, Clone, Error)]
#[error("transaction aborted: {reason}")]
pub struct Abort {
    pub reason: String,
}

impl Abort {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    Started,
    Done,
    Skipped,
    Aborted,
}

/// Per-worker cancellation flag polled by long-running transactions.
#[derive(Debug, Clone, Default)]
pub struct Terminator {
    flag: Arc<AtomicBool>,
}

impl Terminator {
    /// Request termination of the owning worker's current transaction.
    pub fn terminate(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Checkpoint for inner loops: raises an abort once termination has
    /// been requested.
    pub fn terminate_on_request(&self) -> Result<(), Abort> {
        if self.is_requested() {
            Err(Abort::new("termination requested"))
        } else {
            Ok(())
        }
    }
}

/// Execution context handed to a transaction: the worker identity and its
/// terminator.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub worker_id: usize,
    pub terminator: Terminator,
}

impl WorkerContext {
    /// Context for running transactions on the calling thread (the
    /// single-threaded path).
    pub fn inline() -> Self {
        Self {
            worker_id: 0,
            terminator: Terminator::default(),
        }
    }

    pub fn terminate_on_request(&self) -> Result<(), Abort> {
        self.terminator.terminate_on_request()
    }
}

/// A schedulable unit of work.
pub trait Transaction: Send {
    fn execute(&mut self, ctx: &WorkerContext) -> Result<(), Abort>;
}

type Job<'scope> = Box<dyn Transaction + Send + 'scope>;

/// Completion counters, one increment per finished transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub done: usize,
    pub aborted: usize,
    pub skipped: usize,
}

struct WorkerShared<'scope> {
    queue: Mutex<VecDeque<Job<'scope>>>,
    cv: Condvar,
    terminator: Terminator,
}

struct PoolShared<'scope> {
    workers: Vec<Arc<WorkerShared<'scope>>>,
    started: AtomicBool,
    shutdown: AtomicBool,
    state: Mutex<PoolState>,
    idle_cv: Condvar,
}

struct PoolState {
    outstanding: usize,
    stats: PoolStats,
}

/// Fixed-size worker pool over scoped threads.
pub struct ThreadPool<'scope> {
    shared: Arc<PoolShared<'scope>>,
    pending: Mutex<VecDeque<Job<'scope>>>,
    next_worker: Mutex<usize>,
}

impl<'scope> ThreadPool<'scope> {
    /// Spawn `num_threads` workers inside the given thread scope.
    pub fn new<'env>(scope: &'scope Scope<'scope, 'env>, num_threads: usize) -> Self {
        assert!(num_threads > 0, "the pool needs at least one worker");

        let workers: Vec<Arc<WorkerShared<'scope>>> = (0..num_threads)
            .map(|_| {
                Arc::new(WorkerShared {
                    queue: Mutex::new(VecDeque::new()),
                    cv: Condvar::new(),
                    terminator: Terminator::default(),
                })
            })
            .collect();

        let shared = Arc::new(PoolShared {
            workers,
            started: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            state: Mutex::new(PoolState {
                outstanding: 0,
                stats: PoolStats::default(),
            }),
            idle_cv: Condvar::new(),
        });

        for worker_id in 0..num_threads {
            let pool = Arc::clone(&shared);
            let me = Arc::clone(&shared.workers[worker_id]);
            scope.spawn(move || worker_loop(pool, me, worker_id));
        }

        Self {
            shared,
            pending: Mutex::new(VecDeque::new()),
            next_worker: Mutex::new(0),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.shared.workers.len()
    }

    /// Stage a transaction on the pool's shared queue (state: PENDING).
    pub fn push_back(&self, transaction: Job<'scope>) {
        self.pending.lock().unwrap().push_back(transaction);
        self.shared.state.lock().unwrap().outstanding += 1;
    }

    /// Stage a whole schedule at once.
    pub fn push_schedule(&self, schedule: Vec<Job<'scope>>) {
        let mut pending = self.pending.lock().unwrap();
        let mut state = self.shared.state.lock().unwrap();
        state.outstanding += schedule.len();
        pending.extend(schedule);
    }

    /// Split the shared queue round-robin across the worker queues.
    pub fn pre_distribute_work(&self) {
        let mut pending = self.pending.lock().unwrap();
        let mut next = self.next_worker.lock().unwrap();
        while let Some(job) = pending.pop_front() {
            let worker = &self.shared.workers[*next];
            worker.queue.lock().unwrap().push_back(job);
            *next = (*next + 1) % self.shared.workers.len();
        }
    }

    /// Release the workers. Anything still on the shared queue is
    /// distributed first.
    pub fn start(&self) {
        self.pre_distribute_work();
        self.shared.started.store(true, Ordering::SeqCst);
        for worker in &self.shared.workers {
            worker.cv.notify_all();
        }
    }

    /// Block until every queued transaction has reached a final state.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while state.outstanding > 0 {
            state = self.shared.idle_cv.wait(state).unwrap();
        }
        // The next batch waits for the next start().
        self.shared.started.store(false, Ordering::SeqCst);
    }

    /// Skip everything still queued without disturbing the transactions
    /// already running.
    pub fn flush(&self) {
        let mut skipped = 0usize;
        {
            let mut pending = self.pending.lock().unwrap();
            skipped += pending.len();
            pending.clear();
        }
        for worker in &self.shared.workers {
            let mut queue = worker.queue.lock().unwrap();
            skipped += queue.len();
            queue.clear();
        }

        let mut state = self.shared.state.lock().unwrap();
        state.stats.skipped += skipped;
        state.outstanding = state.outstanding.saturating_sub(skipped);
        if state.outstanding == 0 {
            self.shared.idle_cv.notify_all();
        }
    }

    /// Cooperatively cancel: raise every worker's terminator and skip
    /// everything still queued.
    pub fn stop(&self) {
        for worker in &self.shared.workers {
            worker.terminator.terminate();
        }
        self.flush();
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.state.lock().unwrap().stats
    }
}

impl Drop for ThreadPool<'_> {
    fn drop(&mut self) {
        self.stop();
        self.shared.shutdown.store(true, Ordering::SeqCst);
        for worker in &self.shared.workers {
            worker.cv.notify_all();
        }
    }
}

fn worker_loop<'scope>(
    pool: Arc<PoolShared<'scope>>,
    me: Arc<WorkerShared<'scope>>,
    worker_id: usize,
) {
    let ctx = WorkerContext {
        worker_id,
        terminator: me.terminator.clone(),
    };

    loop {
        let job = {
            let mut queue = me.queue.lock().unwrap();
            loop {
                if pool.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if pool.started.load(Ordering::SeqCst)
                    && let Some(job) = queue.pop_front()
                {
                    break job;
                }
                queue = me.cv.wait(queue).unwrap();
            }
        };

        let state = run_transaction(job, &ctx);

        let mut pool_state = pool.state.lock().unwrap();
        match state {
            TransactionState::Done => pool_state.stats.done += 1,
            TransactionState::Aborted => pool_state.stats.aborted += 1,
            _ => {}
        }
        pool_state.outstanding -= 1;
        if pool_state.outstanding == 0 {
            pool.idle_cv.notify_all();
        }
    }
}

/// Run one transaction through STARTED to its final state. Panics are
/// contained and reported as aborts; the transaction is dropped before the
/// state is recorded.
fn run_transaction(mut job: Job<'_>, ctx: &WorkerContext) -> TransactionState {
    let result = catch_unwind(AssertUnwindSafe(|| job.execute(ctx)));
    drop(job);

    match result {
        Ok(Ok(())) => TransactionState::Done,
        Ok(Err(abort)) => {
            tracing::warn!(worker = ctx.worker_id, reason = %abort.reason, "transaction aborted");
            TransactionState::Aborted
        }
        Err(_) => {
            tracing::warn!(worker = ctx.worker_id, "transaction panicked");
            TransactionState::Aborted
        }
    }
}

/// Execute a schedule on the calling thread, used when a single worker is
/// requested. Outcome accounting matches the pooled path.
pub fn execute_inline<'a>(schedule: Vec<Box<dyn Transaction + Send + 'a>>) -> PoolStats {
    let ctx = WorkerContext::inline();
    let mut stats = PoolStats::default();
    for job in schedule {
        match run_transaction(job, &ctx) {
            TransactionState::Done => stats.done += 1,
            TransactionState::Aborted => stats.aborted += 1,
            _ => {}
        }
    }
    stats
}
