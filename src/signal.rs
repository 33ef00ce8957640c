use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::errors::*;

/// Cooperative cancellation token shared between an event source and its
/// worker threads. Firing is sticky: once signalled, every clone observes
/// it forever.
#[derive(Clone)]
pub struct Waiter {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Waiter {
    pub fn new() -> Waiter {
        Waiter {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn signal(&self) {
        let (fired, condvar) = &*self.inner;
        *fired.lock().unwrap() = true;
        condvar.notify_all();
    }

    /// Fails with `Interrupted` once the signal has fired.
    pub fn poll(&self) -> Result<()> {
        let (fired, _) = &*self.inner;
        if *fired.lock().unwrap() {
            bail!(ErrorKind::Interrupted);
        }
        Ok(())
    }

    /// Sleep for `timeout`, waking early if the signal fires. Returns true
    /// when it did.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (fired, condvar) = &*self.inner;
        let guard = fired.lock().unwrap();
        if *guard {
            return true;
        }
        let (guard, _) = condvar.wait_timeout(guard, timeout).unwrap();
        *guard
    }
}

impl Default for Waiter {
    fn default() -> Waiter {
        Waiter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::spawn_thread;
    use std::time::Instant;

    #[test]
    fn test_poll_before_and_after_signal() {
        let waiter = Waiter::new();
        assert!(waiter.poll().is_ok());
        waiter.signal();
        assert!(waiter.poll().is_err());
    }

    #[test]
    fn test_wait_wakes_on_signal() {
        let waiter = Waiter::new();
        let remote = waiter.clone();
        let start = Instant::now();
        spawn_thread("signaller", move || remote.signal());
        assert!(waiter.wait(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn test_wait_times_out() {
        let waiter = Waiter::new();
        assert!(!waiter.wait(Duration::from_millis(10)));
    }
}
