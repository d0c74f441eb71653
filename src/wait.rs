//! Bounded polling of peer state.
//!
//! Peers from different transports share no synchronization primitive, so the
//! orchestration side observes them by re-checking a predicate on a fixed
//! interval. Each poll sleeps on the tokio timer and therefore yields.

use std::time::Duration;
use tokio::time::{self, Instant};

/// Default interval between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polling interval and optional upper bound for a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    /// `None` waits until the condition holds, however long that takes
    pub timeout: Option<Duration>,
}

impl WaitOptions {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::new(None)
    }
}

/// A bounded wait expired before every peer satisfied the condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stall {
    /// Positions of the peers still failing the predicate
    pub pending: Vec<usize>,
    pub waited: Duration,
}

/// Waits until `predicate` holds for every element of `peers`.
///
/// Returns immediately for an empty slice. With a timeout, returns the
/// indices of the peers that never satisfied the predicate.
///
/// # Examples
///
/// ```
/// use netbench::wait::{wait_for_all, WaitOptions};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let flags = [AtomicBool::new(true), AtomicBool::new(false)];
/// let options = WaitOptions::new(Some(Duration::from_millis(30)));
///
/// let stall = wait_for_all(&flags, |f| f.load(Ordering::Relaxed), options)
///     .await
///     .unwrap_err();
/// assert_eq!(stall.pending, vec![1]);
/// # }
/// ```
pub async fn wait_for_all<T, F>(peers: &[T], predicate: F, options: WaitOptions) -> Result<(), Stall>
where
    F: Fn(&T) -> bool,
{
    let started = Instant::now();
    // Peers that already passed are not polled again
    let mut pending: Vec<usize> = (0..peers.len()).collect();

    loop {
        pending.retain(|&i| !predicate(&peers[i]));
        if pending.is_empty() {
            return Ok(());
        }

        let waited = started.elapsed();
        if let Some(timeout) = options.timeout {
            if waited >= timeout {
                return Err(Stall { pending, waited });
            }
        }

        time::sleep(options.poll_interval).await;
    }
}

/// Waits until a single condition holds.
pub async fn wait_until<F>(predicate: F, options: WaitOptions) -> Result<(), Stall>
where
    F: Fn() -> bool,
{
    wait_for_all(&[()], |_| predicate(), options).await
}
