//! State lent by the coordinator to every peer of a run.

use crate::config::BenchmarkSetup;
use crate::phase::PhaseView;
use crate::statistics::BenchmarkStatistics;
use std::sync::Arc;

/// Frozen setup, read-only phase and shared counters for one run.
///
/// The `record_*` helpers only count while the run phase is `Running`, so
/// adapters do not need to repeat the phase check. Traffic that arrives after
/// the coordinator has left `Running` is silently ignored.
///
/// # Examples
///
/// ```
/// use netbench::{BenchmarkContext, BenchmarkSetup, BenchmarkStatistics, PhaseController, RunPhase};
/// use std::sync::Arc;
///
/// let phase = PhaseController::new();
/// let stats = Arc::new(BenchmarkStatistics::new());
/// let ctx = BenchmarkContext::new(Arc::new(BenchmarkSetup::new()), phase.view(), stats.clone());
///
/// assert!(!ctx.record_client_received());
/// phase.set(RunPhase::Running);
/// assert!(ctx.record_client_received());
/// assert_eq!(stats.messages_client_received(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct BenchmarkContext {
    setup: Arc<BenchmarkSetup>,
    phase: PhaseView,
    statistics: Arc<BenchmarkStatistics>,
}

impl BenchmarkContext {
    pub fn new(
        setup: Arc<BenchmarkSetup>,
        phase: PhaseView,
        statistics: Arc<BenchmarkStatistics>,
    ) -> Self {
        Self {
            setup,
            phase,
            statistics,
        }
    }

    pub fn setup(&self) -> &BenchmarkSetup {
        &self.setup
    }

    pub fn phase(&self) -> &PhaseView {
        &self.phase
    }

    pub fn statistics(&self) -> &Arc<BenchmarkStatistics> {
        &self.statistics
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.phase.is_running()
    }

    /// Counts a request sent by a client. Returns whether it was counted.
    #[inline]
    pub fn record_client_sent(&self) -> bool {
        self.count_if_running(BenchmarkStatistics::add_client_sent)
    }

    /// Counts an echo reply received by a client. A `true` result means the
    /// client should send the next request to keep its window full.
    #[inline]
    pub fn record_client_received(&self) -> bool {
        self.count_if_running(BenchmarkStatistics::add_client_received)
    }

    /// Counts a request received by the server. A `true` result means the
    /// server should echo it.
    #[inline]
    pub fn record_server_received(&self) -> bool {
        self.count_if_running(BenchmarkStatistics::add_server_received)
    }

    #[inline]
    pub fn record_server_sent(&self) -> bool {
        self.count_if_running(BenchmarkStatistics::add_server_sent)
    }

    /// Counts an error regardless of phase; errors qualify the whole run.
    #[inline]
    pub fn record_error(&self) {
        self.statistics.add_error();
    }

    #[inline]
    fn count_if_running(&self, add: fn(&BenchmarkStatistics)) -> bool {
        if self.phase.is_running() {
            add(&self.statistics);
            true
        } else {
            false
        }
    }
}
