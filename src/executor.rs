//! Execution contexts that run watch callbacks and async operations.
//!
//! The store never invokes callbacks inline. It hands them to an
//! [`ExecutionContext`], which must run them in submission order on a
//! thread other than the caller's.
//!
//! Both contexts keep a single worker for their whole lifetime. `start` and
//! `stop` only open and close the queue, so jobs scheduled before a stop are
//! still drained ahead of anything scheduled after the next start.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// A unit of work scheduled on an execution context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs scheduled jobs eventually and in FIFO order.
pub trait ExecutionContext: Send + Sync {
    /// Begin accepting and running jobs. Calling twice is a no-op.
    fn start(&self);

    /// Stop accepting jobs. Calling twice is a no-op.
    ///
    /// Never blocks: jobs already queued still run.
    fn stop(&self);

    /// Queue a job. Never blocks on the job itself and never fails to the
    /// caller; jobs scheduled while stopped are dropped.
    fn schedule(&self, job: Job);

    /// True when called from inside a job running on this context.
    fn is_worker_thread(&self) -> bool {
        false
    }
}

fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("scheduled callback panicked");
    }
}

struct Worker {
    sender: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
    thread_id: ThreadId,
}

#[derive(Default)]
struct SerialState {
    worker: Option<Worker>,
    accepting: bool,
}

/// Default context: one dedicated worker thread draining a FIFO queue.
///
/// The thread is spawned on the first `start` and joined on drop.
#[derive(Default)]
pub struct SerialExecutor {
    state: Mutex<SerialState>,
}

impl SerialExecutor {
    /// A stopped executor; no thread exists until [`start`](ExecutionContext::start).
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether jobs are currently accepted.
    pub fn is_running(&self) -> bool {
        self.state.lock().accepting
    }
}

fn spawn_worker() -> std::io::Result<Worker> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
    let handle = thread::Builder::new()
        .name("univrs-coord-executor".to_string())
        .spawn(move || {
            while let Some(job) = receiver.blocking_recv() {
                run_job(job);
            }
        })?;
    Ok(Worker {
        sender,
        thread_id: handle.thread().id(),
        handle,
    })
}

impl ExecutionContext for SerialExecutor {
    fn start(&self) {
        let mut state = self.state.lock();
        if state.accepting {
            return;
        }
        if state.worker.is_none() {
            match spawn_worker() {
                Ok(worker) => state.worker = Some(worker),
                Err(e) => {
                    error!("failed to spawn executor thread: {}", e);
                    return;
                }
            }
        }
        state.accepting = true;
        info!("serial executor started");
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        if state.accepting {
            state.accepting = false;
            info!("serial executor stopped");
        }
    }

    fn schedule(&self, job: Job) {
        let state = self.state.lock();
        match state.worker.as_ref() {
            Some(worker) if state.accepting => {
                if worker.sender.send(job).is_err() {
                    warn!("executor queue closed, dropping job");
                }
            }
            _ => warn!("executor not running, dropping job"),
        }
    }

    fn is_worker_thread(&self) -> bool {
        self.state
            .lock()
            .worker
            .as_ref()
            .is_some_and(|w| w.thread_id == thread::current().id())
    }
}

impl Drop for SerialExecutor {
    fn drop(&mut self) {
        let Some(worker) = self.state.get_mut().worker.take() else {
            return;
        };
        // Closing the channel lets the worker finish what is queued, then exit.
        drop(worker.sender);
        if thread::current().id() != worker.thread_id && worker.handle.join().is_err() {
            error!("executor thread terminated abnormally");
        }
    }
}

#[derive(Default)]
struct TokioState {
    sender: Option<mpsc::UnboundedSender<Job>>,
    accepting: bool,
}

/// Context that drains its FIFO queue from a task on an existing tokio runtime.
///
/// Jobs run on a runtime worker, so they must not block for long. The drain
/// task is spawned on the first `start` and ends once the executor is dropped
/// and its queue is empty.
pub struct TokioExecutor {
    handle: Handle,
    state: Mutex<TokioState>,
    running_on: Arc<Mutex<Option<ThreadId>>>,
}

impl TokioExecutor {
    /// A stopped executor whose drain task will run on `handle`.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            state: Mutex::new(TokioState::default()),
            running_on: Arc::new(Mutex::new(None)),
        }
    }

    /// Use the runtime of the calling task.
    ///
    /// Panics if called outside a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Whether jobs are currently accepted.
    pub fn is_running(&self) -> bool {
        self.state.lock().accepting
    }
}

impl ExecutionContext for TokioExecutor {
    fn start(&self) {
        let mut state = self.state.lock();
        if state.accepting {
            return;
        }
        if state.sender.is_none() {
            let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
            let running_on = self.running_on.clone();
            self.handle.spawn(async move {
                while let Some(job) = rx.recv().await {
                    *running_on.lock() = Some(thread::current().id());
                    run_job(job);
                    *running_on.lock() = None;
                }
            });
            state.sender = Some(tx);
        }
        state.accepting = true;
        info!("tokio executor started");
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        if state.accepting {
            state.accepting = false;
            info!("tokio executor stopped");
        }
    }

    fn schedule(&self, job: Job) {
        let state = self.state.lock();
        match state.sender.as_ref() {
            Some(tx) if state.accepting => {
                if tx.send(job).is_err() {
                    warn!("executor queue closed, dropping job");
                }
            }
            _ => warn!("executor not running, dropping job"),
        }
    }

    fn is_worker_thread(&self) -> bool {
        *self.running_on.lock() == Some(thread::current().id())
    }
}
