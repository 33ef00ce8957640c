use std::time::{Duration, Instant};

/// Tracks a deadline relative to its construction.
pub struct TimeoutTrigger {
    start: Instant,
    timeout: Duration,
}

impl TimeoutTrigger {
    pub fn new(timeout: Duration) -> TimeoutTrigger {
        TimeoutTrigger {
            start: Instant::now(),
            timeout,
        }
    }

    pub fn expired(&self) -> bool {
        self.start.elapsed() >= self.timeout
    }

    /// Time left before the deadline, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_timeout() {
        let timeout = TimeoutTrigger::new(Duration::from_millis(50));
        assert!(!timeout.expired());
        sleep(Duration::from_millis(50));
        assert!(timeout.expired());
        assert_eq!(timeout.remaining(), Duration::from_secs(0));
    }
}
