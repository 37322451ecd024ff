//! Fixed-size worker pool consuming a shared FIFO of tasks.
//!
//! Mirrors the classic `Arc<Pool>` + `Mutex` + `Condvar` pattern: the pool
//! handle and every detached worker thread hold a strong reference to the
//! same `Pool`, so the last one to drop it frees the queue. Shutdown is
//! cooperative-now: in-flight tasks finish, queued-but-unstarted tasks may be
//! discarded.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// A single, parameterless unit of work.
type Task = Box<dyn FnOnce() + Send>;

/// Error returned by [`WorkerPool::add_task`] when the queue is at capacity.
#[derive(Debug, thiserror::Error)]
#[error("worker pool queue is full (capacity {capacity})")]
pub struct QueueFull {
    capacity: usize,
}

struct Shared {
    mutex: Mutex<State>,
    condvar: Condvar,
    capacity: usize,
}

struct State {
    tasks: VecDeque<Task>,
    closed: bool,
}

/// A fixed-size pool of OS threads draining a shared, bounded FIFO task
/// queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `thread_count` workers sharing a queue bounded at `capacity`
    /// entries. `capacity` bounds the shed-on-full behavior recommended for
    /// production use: an unbounded queue is a DoS vector under load.
    pub fn new(thread_count: usize, capacity: usize) -> Self {
        assert!(thread_count > 0, "worker pool requires at least one thread");

        let shared = Arc::new(Shared {
            mutex: Mutex::new(State {
                tasks: VecDeque::new(),
                closed: false,
            }),
            condvar: Condvar::new(),
            capacity,
        });

        let workers = (0..thread_count)
            .map(|i| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("scatterweb-worker-{i}"))
                    .spawn(move || Self::run(shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { shared, workers }
    }

    fn run(shared: Arc<Shared>) {
        loop {
            let mut state = shared.mutex.lock().unwrap();
            loop {
                if let Some(task) = state.tasks.pop_front() {
                    drop(state);
                    task();
                    break;
                } else if state.closed {
                    return;
                } else {
                    state = shared.condvar.wait(state).unwrap();
                }
            }
        }
    }

    /// Enqueues `task` and wakes one waiting worker. Rejected once the queue
    /// is closed (shutdown in progress) or at capacity.
    pub fn add_task<F>(&self, task: F) -> Result<(), QueueFull>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.mutex.lock().unwrap();
        if state.closed || state.tasks.len() >= self.shared.capacity {
            return Err(QueueFull {
                capacity: self.shared.capacity,
            });
        }
        state.tasks.push_back(Box::new(task));
        drop(state);
        self.shared.condvar.notify_one();
        Ok(())
    }

    /// Number of tasks currently queued (not counting in-flight work).
    pub fn queue_len(&self) -> usize {
        self.shared.mutex.lock().unwrap().tasks.len()
    }

    /// Signals shutdown: rejects new tasks, wakes every worker, and blocks
    /// until they've all exited. In-flight tasks run to completion; any
    /// still-queued tasks are discarded.
    pub fn shutdown(mut self) {
        {
            let mut state = self.shared.mutex.lock().unwrap();
            state.closed = true;
        }
        self.shared.condvar.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let mut state = self.shared.mutex.lock().unwrap();
        state.closed = true;
        drop(state);
        self.shared.condvar.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
