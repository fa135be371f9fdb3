use std::time::Duration;

use tokio::time::Instant;

/// Rate limits progress lines to one per wall clock interval
#[derive(Debug, Clone)]
pub struct ProgressLogger {
    interval: Duration,
    started: Instant,
    last: Instant,
}

impl ProgressLogger {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval,
            started: now,
            last: now,
        }
    }

    /// True at most once per interval; resets the window when it fires
    pub fn should_log(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Elapsed time rendered as `1h 2m 3s`
    pub fn elapsed_display(&self) -> String {
        let secs = self.elapsed().as_secs();
        let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        if h > 0 {
            format!("{h}h {m}m {s}s")
        } else if m > 0 {
            format!("{m}m {s}s")
        } else {
            format!("{s}s")
        }
    }
}

impl Default for ProgressLogger {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}
