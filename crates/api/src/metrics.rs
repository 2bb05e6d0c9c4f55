use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,
    no_match_requests: AtomicUsize,
    frames_emitted: AtomicUsize,

    // Timing (in microseconds)
    submits: AtomicUsize,
    total_submit_time_us: AtomicU64,
    total_first_frame_time_us: AtomicU64,
    first_frames: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            no_match_requests: AtomicUsize::new(0),
            frames_emitted: AtomicUsize::new(0),
            submits: AtomicUsize::new(0),
            total_submit_time_us: AtomicU64::new(0),
            total_first_frame_time_us: AtomicU64::new(0),
            first_frames: AtomicUsize::new(0),
        })
    }

    /// Counts a finished request. A stream that ends without its final frame
    /// is a failure.
    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_no_match(&self) {
        self.no_match_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Retrieval plus opening the generation stream.
    pub fn record_submit(&self, duration: Duration) {
        self.submits.fetch_add(1, Ordering::Relaxed);
        self.total_submit_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_frame(&self, since_start: Duration, first: bool) {
        self.frames_emitted.fetch_add(1, Ordering::Relaxed);
        if first {
            self.first_frames.fetch_add(1, Ordering::Relaxed);
            self.total_first_frame_time_us
                .fetch_add(since_start.as_micros() as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            no_match_requests: self.no_match_requests.load(Ordering::Relaxed),
            frames_emitted: self.frames_emitted.load(Ordering::Relaxed),
            avg_submit_time_ms: avg_time_ms(&self.total_submit_time_us, &self.submits),
            avg_first_frame_time_ms: avg_time_ms(
                &self.total_first_frame_time_us,
                &self.first_frames,
            ),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub no_match_requests: usize,
    pub frames_emitted: usize,
    pub avg_submit_time_ms: f64,
    pub avg_first_frame_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.record_request(true);
        metrics.record_request(false);
        metrics.record_no_match();
        metrics.record_frame(Duration::from_millis(4), true);
        metrics.record_frame(Duration::from_millis(9), false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.no_match_requests, 1);
        assert_eq!(snapshot.frames_emitted, 2);
        assert_eq!(snapshot.avg_first_frame_time_ms, 4.0);
    }

    #[test]
    fn test_submit_average_ignores_rejected_requests() {
        let metrics = Metrics::new();
        metrics.record_request(false); // rejected before submit
        metrics.record_submit(Duration::from_millis(6));
        metrics.record_submit(Duration::from_millis(2));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.avg_submit_time_ms, 4.0);
    }

    #[test]
    fn test_empty_averages_are_zero() {
        let snapshot = Metrics::new().snapshot();
        assert_eq!(snapshot.avg_submit_time_ms, 0.0);
        assert_eq!(snapshot.avg_first_frame_time_ms, 0.0);
    }
}
