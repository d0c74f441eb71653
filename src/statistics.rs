//! Process-wide message counters for one benchmark run.
//!
//! Counters are plain atomics incremented with relaxed ordering from any
//! adapter thread. The start and stop instants are written only by the
//! coordinator and sit behind a mutex that is never touched on the hot path.

use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared statistics of a benchmark run.
///
/// # Examples
///
/// ```
/// use netbench::BenchmarkStatistics;
///
/// let stats = BenchmarkStatistics::new();
/// stats.start_benchmark();
/// stats.add_client_sent();
/// stats.add_client_received();
/// let duration = stats.stop_benchmark().unwrap();
///
/// let snapshot = stats.snapshot();
/// assert_eq!(snapshot.messages_client_sent, 1);
/// assert_eq!(snapshot.duration, duration);
/// ```
#[derive(Debug, Default)]
pub struct BenchmarkStatistics {
    messages_client_sent: AtomicU64,
    messages_client_received: AtomicU64,
    messages_server_sent: AtomicU64,
    messages_server_received: AtomicU64,
    errors: AtomicU64,
    timing: Mutex<Timing>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Timing {
    start: Option<Instant>,
    stop: Option<Instant>,
}

/// Point-in-time copy of the statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub messages_client_sent: u64,
    pub messages_client_received: u64,
    pub messages_server_sent: u64,
    pub messages_server_received: u64,
    pub errors: u64,
    pub duration: Duration,
}

impl BenchmarkStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroes every counter and forgets both instants.
    ///
    /// Must not run while workers of a previous run are still counting; the
    /// coordinator only calls it before the peers of a new run exist.
    pub fn reset(&self) {
        self.messages_client_sent.store(0, Ordering::Relaxed);
        self.messages_client_received.store(0, Ordering::Relaxed);
        self.messages_server_sent.store(0, Ordering::Relaxed);
        self.messages_server_received.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        *self.timing.lock() = Timing::default();
    }

    pub fn start_benchmark(&self) {
        *self.timing.lock() = Timing {
            start: Some(Instant::now()),
            stop: None,
        };
    }

    /// Records the stop instant and returns the measured duration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lifecycle`] if the benchmark was never started.
    pub fn stop_benchmark(&self) -> Result<Duration> {
        let mut timing = self.timing.lock();
        let start = timing.start.ok_or_else(|| {
            Error::Lifecycle("stop_benchmark called before start_benchmark".to_string())
        })?;
        let stop = Instant::now();
        timing.stop = Some(stop);
        Ok(stop.duration_since(start))
    }

    /// Elapsed run time: final once stopped, live while running, zero before.
    pub fn duration(&self) -> Duration {
        let timing = *self.timing.lock();
        match (timing.start, timing.stop) {
            (Some(start), Some(stop)) => stop.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    #[inline]
    pub fn add_client_sent(&self) {
        self.messages_client_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_client_received(&self) {
        self.messages_client_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_server_sent(&self) {
        self.messages_server_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_server_received(&self) {
        self.messages_server_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_client_sent(&self) -> u64 {
        self.messages_client_sent.load(Ordering::Relaxed)
    }

    pub fn messages_client_received(&self) -> u64 {
        self.messages_client_received.load(Ordering::Relaxed)
    }

    pub fn messages_server_sent(&self) -> u64 {
        self.messages_server_sent.load(Ordering::Relaxed)
    }

    pub fn messages_server_received(&self) -> u64 {
        self.messages_server_received.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            messages_client_sent: self.messages_client_sent(),
            messages_client_received: self.messages_client_received(),
            messages_server_sent: self.messages_server_sent(),
            messages_server_received: self.messages_server_received(),
            errors: self.errors(),
            duration: self.duration(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_reset_yields_zero_snapshot() {
        let stats = BenchmarkStatistics::new();
        stats.start_benchmark();
        stats.add_client_sent();
        stats.add_server_received();
        stats.add_error();
        stats.stop_benchmark().unwrap();

        stats.reset();

        assert_eq!(stats.snapshot(), StatisticsSnapshot::default());
        assert_eq!(stats.snapshot().duration, Duration::ZERO);
    }

    #[test]
    fn test_stop_before_start_is_an_error() {
        let stats = BenchmarkStatistics::new();
        assert!(matches!(stats.stop_benchmark(), Err(Error::Lifecycle(_))));
    }

    #[test]
    fn test_duration_measures_run() {
        let stats = BenchmarkStatistics::new();
        stats.start_benchmark();
        thread::sleep(Duration::from_millis(20));
        let duration = stats.stop_benchmark().unwrap();

        assert!(duration >= Duration::from_millis(20));
        assert_eq!(stats.duration(), duration);
        // Stopped duration stays frozen
        thread::sleep(Duration::from_millis(5));
        assert_eq!(stats.duration(), duration);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        const THREADS: usize = 8;
        const INCREMENTS: usize = 10_000;

        let stats = Arc::new(BenchmarkStatistics::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..INCREMENTS {
                        stats.add_client_sent();
                        stats.add_server_received();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let expected = (THREADS * INCREMENTS) as u64;
        assert_eq!(stats.messages_client_sent(), expected);
        assert_eq!(stats.messages_server_received(), expected);
    }
}
