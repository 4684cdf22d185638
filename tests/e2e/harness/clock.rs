use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Controllable time in Unix milliseconds.
///
/// Passed to `DbvcRepo::with_time_provider()` so commit, stash and reflog
/// timestamps are deterministic.
#[derive(Clone)]
pub struct MockClock {
    current: Arc<AtomicI64>,
}

impl MockClock {
    /// Starts at 2024-01-01T00:00:00Z.
    pub fn new() -> Self {
        Self::at(1_704_067_200_000)
    }

    /// Starts at the given time.
    pub fn at(millis: i64) -> Self {
        Self {
            current: Arc::new(AtomicI64::new(millis)),
        }
    }

    /// Creates a time provider function suitable for passing to DbvcRepo.
    pub fn as_provider(&self) -> impl Fn() -> i64 + Send + Sync + 'static {
        let current = self.current.clone();
        move || current.load(Ordering::SeqCst)
    }

    pub fn now(&self) -> i64 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn advance(&self, duration: Duration) {
        self.current
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn advance_days(&self, days: u64) {
        self.advance(Duration::from_secs(days * 86_400));
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}
