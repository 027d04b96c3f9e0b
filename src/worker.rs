//! Thread-bound FIFO executor. Mirrors `original_source/src/worker.cpp`'s
//! condvar-guarded pending queue: `post` never runs the closure inline, and
//! the run loop swaps the pending batch out from under the lock so user work
//! never executes while the lock is held (allowing re-entrant `post` from a
//! running closure without deadlocking).

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
    thread::{self, JoinHandle},
};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Abstraction over "something `post`-able", so `Strand` can be tested
/// against a recording fake the way `original_source/test/mocks.h`'s mock
/// `worker_interface` drives `strand_tests.cpp`.
pub trait WorkerLike: Send + Sync {
    fn post(&self, job: Job);
}

struct Shared {
    pending: Mutex<VecDeque<Job>>,
    condvar: Condvar,
    stopped: Mutex<bool>,
}

impl WorkerLike for Shared {
    fn post(&self, job: Job) {
        self.pending.lock().unwrap().push_back(job);
        self.condvar.notify_all();
    }
}

/// A cheap, cloneable, `Send + Sync` reference to a running [`Worker`]. This
/// is what gets posted into from inside a running job (re-entrant `post`)
/// and what a [`Strand`](crate::strand::Strand) holds onto.
#[derive(Clone)]
pub struct WorkerHandle(Arc<Shared>);

impl WorkerLike for WorkerHandle {
    fn post(&self, job: Job) {
        self.0.post(job);
    }
}

/// Single background thread draining posted closures in arrival order.
pub struct Worker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn start() -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            stopped: Mutex::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("worker".into())
            .spawn(move || Self::run(&worker_shared))
            .expect("failed to spawn worker thread");

        Self { shared, handle: Some(handle) }
    }

    fn run(shared: &Shared) {
        loop {
            let batch = {
                let mut pending = shared.pending.lock().unwrap();
                while pending.is_empty() && !*shared.stopped.lock().unwrap() {
                    pending = shared.condvar.wait(pending).unwrap();
                }
                if pending.is_empty() {
                    // Stopped with nothing left to drain.
                    return;
                }
                std::mem::take(&mut *pending)
            };

            for job in batch {
                job();
            }

            if *shared.stopped.lock().unwrap() {
                return;
            }
        }
    }

    /// A cloneable handle usable from any thread, including from inside a
    /// job running on this very worker.
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle(Arc::clone(&self.shared))
    }

    /// Signals the worker thread to stop after draining whatever batch it
    /// currently holds. Work posted after `stop` is not guaranteed to run.
    pub fn stop(&mut self) {
        *self.shared.stopped.lock().unwrap() = true;
        self.shared.condvar.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl WorkerLike for Worker {
    fn post(&self, job: Job) {
        self.shared.post(job);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, time::Duration};

    use super::*;

    #[test]
    fn runs_posted_jobs_in_fifo_order() {
        let mut worker = Worker::start();
        let (tx, rx) = mpsc::channel();

        for i in 0..10 {
            let tx = tx.clone();
            worker.post(Box::new(move || tx.send(i).unwrap()));
        }

        for expected in 0..10 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), expected);
        }
        worker.stop();
    }

    #[test]
    fn post_is_reentrant_from_a_running_job() {
        let worker = Worker::start();
        let handle = worker.handle();
        let (tx, rx) = mpsc::channel();

        let inner_handle = handle.clone();
        let inner_tx = tx.clone();
        handle.post(Box::new(move || {
            tx.send("outer").unwrap();
            inner_handle.post(Box::new(move || inner_tx.send("inner").unwrap()));
        }));

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "outer");
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "inner");
    }

    #[test]
    fn stop_prevents_the_thread_from_hanging_around() {
        let mut worker = Worker::start();
        worker.post(Box::new(|| {}));
        worker.stop();
    }
}
