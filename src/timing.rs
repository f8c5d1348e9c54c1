//! Pipeline timing utilities.

use std::time::{Duration, Instant};

/// Measures how long a pipeline (or one of its phases) took.
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    /// Start a new timer with the given phase name.
    pub fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Finish the timer and print the elapsed time.
    pub fn finish(self) {
        let elapsed = self.elapsed();
        tracing::info!(phase = %self.name, secs = elapsed.as_secs_f64(), "phase finished");
        println!("  [{}] {}", format_duration(elapsed), self.name);
    }
}

/// `12.3s` below a minute, `4.5m` above.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs >= 60.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}s", secs)
    }
}
