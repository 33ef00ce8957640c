use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

pub fn spawn_thread<F, T>(name: &str, f: F) -> thread::JoinHandle<T>
where
    F: FnOnce() -> T,
    F: Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(f)
        .unwrap()
}

/// A worker thread paired with a channel that disconnects when the worker's
/// closure returns, so shutdown can wait for it with a deadline.
pub struct WorkerHandle {
    name: String,
    handle: thread::JoinHandle<()>,
    done: Receiver<()>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to `timeout` for the worker to finish. Returns false and
    /// leaves the thread detached if it is still running afterwards.
    pub fn join_within(self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => {
                let _ = self.handle.join();
                true
            }
            Ok(()) | Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

pub fn spawn_worker<F>(name: &str, f: F) -> WorkerHandle
where
    F: FnOnce(),
    F: Send + 'static,
{
    let (done_tx, done_rx) = bounded::<()>(0);
    let handle = spawn_thread(name, move || {
        // Moved in so it drops, and disconnects `done`, when `f` returns.
        let _done_tx = done_tx;
        f();
    });
    WorkerHandle {
        name: name.to_owned(),
        handle,
        done: done_rx,
    }
}
