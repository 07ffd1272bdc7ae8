//! Serial confinement queue.
//!
//! Every context owns one of these: a dedicated worker thread that holds the
//! context's mutable state and executes submitted closures strictly in
//! order. `perform_wait` blocks the calling thread until the closure has
//! run; `perform` suspends the calling task instead. Cross-queue access to
//! the state is impossible by construction.

use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::oneshot;

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

pub(crate) struct SerialQueue<S: Send + 'static> {
    sender: Option<UnboundedSender<Job<S>>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl<S: Send + 'static> SerialQueue<S> {
    /// Spawn the worker thread owning `state`.
    pub fn new(label: &str, mut state: S) -> Self {
        let (sender, mut receiver) = unbounded_channel::<Job<S>>();
        let worker = std::thread::Builder::new()
            .name(format!("strata-context-{}", label))
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    job(&mut state);
                }
            })
            .expect("failed to spawn context queue thread");
        SerialQueue {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    fn submit(&self, job: Job<S>) {
        self.sender
            .as_ref()
            .expect("context queue already shut down")
            .send(job)
            .expect("context queue thread terminated");
    }

    /// Run `work` on the confinement queue, blocking the caller until it
    /// completes.
    pub fn perform_wait<R, F>(&self, work: F) -> R
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        self.submit(Box::new(move |state| {
            let _ = tx.send(work(state));
        }));
        rx.recv().expect("context queue dropped a reply")
    }

    /// Run `work` on the confinement queue, suspending the calling task until
    /// it completes.
    pub async fn perform<R, F>(&self, work: F) -> R
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move |state| {
            let _ = tx.send(work(state));
        }));
        rx.await.expect("context queue dropped a reply")
    }

    /// Enqueue `work` without waiting for it. Used for cross-context merge
    /// delivery, which must never block the notifying queue.
    pub fn perform_detached<F>(&self, work: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.submit(Box::new(work));
    }
}

impl<S: Send + 'static> Drop for SerialQueue<S> {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain remaining jobs and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
