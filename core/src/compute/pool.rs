use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use super::TaskHandle;
use crate::error::CoreError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of worker threads executing boxed jobs in submission order.
///
/// Workers share one job queue. Dropping the pool closes the queue, lets the
/// workers finish what was already submitted and joins them.
pub struct TaskPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// Spawn `threads` workers (at least one).
    pub fn new(threads: usize) -> Result<Self, CoreError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let threads = threads.max(1);
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = Arc::clone(&receiver);
            let worker = std::thread::Builder::new()
                .name(format!("meridian-task-{index}"))
                .spawn(move || worker_loop(receiver))
                .map_err(|e| CoreError::ThreadSpawn(e.to_string()))?;
            workers.push(worker);
        }

        log::debug!("TaskPool started with {threads} worker(s)");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job and return a handle to its result.
    ///
    /// A job that panics drops its result sender; its handle then reports
    /// finished without a value.
    pub fn spawn<T, F>(&self, job: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let boxed: Job = Box::new(move || {
            // The handle may have been dropped; the result is then discarded.
            let _ = tx.send(job());
        });

        if let Some(sender) = &self.sender
            && sender.send(boxed).is_err()
        {
            log::error!("TaskPool queue closed; job dropped");
        }
        TaskHandle::new(rx)
    }
}

fn worker_loop(receiver: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = {
            let guard = receiver.lock();
            guard.recv()
        };
        match job {
            Ok(job) => {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                    log::error!("TaskPool job panicked");
                }
            }
            Err(_) => break,
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("TaskPool worker panicked during shutdown");
            }
        }
    }
}
