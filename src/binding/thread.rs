//! Named worker threads serving accepted connections.
//!
//! Each job is one connection: a worker runs it from `accept` until the client
//! goes away, so the pool size caps the number of connections served at once.
//! Further connections wait in the queue.
use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
};

use log::{debug, info, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

type Queue = Arc<Mutex<mpsc::Receiver<Job>>>;

#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Worker>,
    queue: Option<mpsc::Sender<Job>>,
    busy: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawns `size` workers (at least one), named `syncwire-worker-<n>`.
    pub fn new(size: usize) -> io::Result<Self> {
        let size = size.max(1);
        let (queue, jobs) = mpsc::channel();
        let jobs = Arc::new(Mutex::new(jobs));
        let busy = Arc::new(AtomicUsize::new(0));

        let workers = (0..size)
            .map(|id| Worker::spawn(id, Arc::clone(&jobs), Arc::clone(&busy)))
            .collect::<io::Result<Vec<_>>>()?;
        debug!("started {size} workers");

        Ok(Self {
            workers,
            queue: Some(queue),
            busy,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Jobs running right now.
    pub fn active(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let sent = self.queue.as_ref().map(|queue| queue.send(Box::new(job)));
        if !matches!(sent, Some(Ok(()))) {
            warn!("worker pool is shut down, dropping connection");
        }
    }

    /// Stops taking jobs and waits for the queued and running ones to finish.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        drop(self.queue.take());

        let busy = self.active();
        if busy > 0 {
            info!("waiting for {busy} connections to finish");
        }
        for worker in self.workers.drain(..) {
            if worker.thread.join().is_err() {
                warn!("worker {} died", worker.id);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join();
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn spawn(id: usize, jobs: Queue, busy: Arc<AtomicUsize>) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("syncwire-worker-{id}"))
            .spawn(move || serve(id, &jobs, &busy))?;
        Ok(Self { id, thread })
    }
}

fn serve(id: usize, jobs: &Mutex<mpsc::Receiver<Job>>, busy: &AtomicUsize) {
    loop {
        let next = jobs.lock().unwrap_or_else(PoisonError::into_inner).recv();
        let Ok(job) = next else {
            debug!("worker {id} stopping");
            return;
        };

        busy.fetch_add(1, Ordering::SeqCst);
        // A panicking handler costs its connection, not the worker.
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            warn!("worker {id}: connection handler panicked");
        }
        busy.fetch_sub(1, Ordering::SeqCst);
    }
}
