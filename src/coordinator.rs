use crate::config::BenchmarkSetup;
use crate::context::BenchmarkContext;
use crate::driver::{BenchmarkDriver, CleanupReport, TeardownStep};
use crate::phase::{PhaseController, RunPhase};
use crate::report::BenchmarkReport;
use crate::statistics::BenchmarkStatistics;
use crate::transport::Transport;
use crate::{Error, Result};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// Lifecycle events emitted by the coordinator.
///
/// # Examples
///
/// ```
/// use netbench::{PhaseEvent, RunPhase};
///
/// let event = PhaseEvent::PhaseChanged { from: RunPhase::Idle, to: RunPhase::Preparing };
/// match event {
///     PhaseEvent::PhaseChanged { to, .. } => assert_eq!(to, RunPhase::Preparing),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEvent {
    /// The run phase changed.
    PhaseChanged { from: RunPhase, to: RunPhase },
    /// Connecting finished; `connected` may be lower than `requested` when
    /// stragglers were dropped.
    ClientsConnected { connected: usize, requested: usize },
    /// The timed run finished after `duration`.
    RunCompleted { duration: Duration },
    /// A teardown step failed; later steps still ran.
    TeardownFailed { step: TeardownStep, message: String },
}

/// Receives [`PhaseEvent`]s from a coordinator.
///
/// Implemented for every `Fn(PhaseEvent) + Send + Sync` closure.
///
/// # Examples
///
/// ```
/// use netbench::{PhaseCallback, PhaseEvent};
///
/// struct Printer;
///
/// impl PhaseCallback for Printer {
///     fn on_event(&self, event: PhaseEvent) {
///         println!("{:?}", event);
///     }
/// }
/// ```
pub trait PhaseCallback: Send + Sync {
    fn on_event(&self, event: PhaseEvent);
}

impl<F> PhaseCallback for F
where
    F: Fn(PhaseEvent) + Send + Sync,
{
    fn on_event(&self, event: PhaseEvent) {
        self(event)
    }
}

type CallbackRef = Arc<dyn PhaseCallback>;

/// Runs benchmarks of one transport and owns their statistics.
///
/// The coordinator is the only writer of the run phase. It lends the
/// statistics and a read-only phase view to every peer through a
/// [`BenchmarkContext`], and walks the driver through
/// prepare, run and cleanup in strict order.
///
/// # Examples
///
/// ```no_run
/// use netbench::transports::TcpTransport;
/// use netbench::{BenchmarkCoordinator, BenchmarkSetup};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let setup = BenchmarkSetup::new()
///     .with_clients(10)
///     .with_duration(Duration::from_secs(5));
///
/// let mut coordinator = BenchmarkCoordinator::new(Arc::new(TcpTransport::new()), setup)?;
/// let report = coordinator.run().await?;
/// println!("{:.0} msg/s", report.message_throughput);
/// # Ok(())
/// # }
/// ```
pub struct BenchmarkCoordinator {
    transport: Arc<dyn Transport>,
    setup: Arc<BenchmarkSetup>,
    statistics: Arc<BenchmarkStatistics>,
    phase: PhaseController,
    driver: Option<BenchmarkDriver>,
    callback: Option<CallbackRef>,
    clients_connected: usize,
    /// Set once the current run has been stopped and its duration fixed.
    stopped: bool,
}

impl BenchmarkCoordinator {
    /// Creates a coordinator with a frozen copy of `setup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the setup fails validation.
    pub fn new(transport: Arc<dyn Transport>, setup: BenchmarkSetup) -> Result<Self> {
        setup.validate()?;
        Ok(Self {
            transport,
            setup: Arc::new(setup),
            statistics: Arc::new(BenchmarkStatistics::new()),
            phase: PhaseController::new(),
            driver: None,
            callback: None,
            clients_connected: 0,
            stopped: false,
        })
    }

    pub fn with_callback<C: PhaseCallback + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    fn notify(&self, event: PhaseEvent) {
        if let Some(callback) = &self.callback {
            callback.on_event(event);
        }
    }

    pub fn setup(&self) -> &BenchmarkSetup {
        &self.setup
    }

    pub fn phase(&self) -> RunPhase {
        self.phase.get()
    }

    pub fn statistics(&self) -> &Arc<BenchmarkStatistics> {
        &self.statistics
    }

    /// Driver of the current run, present from prepare until cleanup.
    pub fn driver(&self) -> Option<&BenchmarkDriver> {
        self.driver.as_ref()
    }

    /// A context bound to this coordinator's statistics and phase.
    pub fn context(&self) -> BenchmarkContext {
        BenchmarkContext::new(
            Arc::clone(&self.setup),
            self.phase.view(),
            Arc::clone(&self.statistics),
        )
    }

    fn transition(&self, to: RunPhase) {
        let from = self.phase.set(to);
        info!("{}: {} -> {}", self.transport.name(), from, to);
        self.notify(PhaseEvent::PhaseChanged { from, to });
    }

    fn expect_phase(&self, allowed: &[RunPhase], expected: &str) -> Result<RunPhase> {
        let actual = self.phase.get();
        if allowed.contains(&actual) {
            Ok(actual)
        } else {
            Err(Error::Phase {
                expected: expected.to_string(),
                actual,
            })
        }
    }

    /// Resets the statistics and brings a server and all clients up.
    ///
    /// # Errors
    ///
    /// Fails if a previous run was not cleaned up, or with the first error of
    /// any preparation step. Peers created so far are kept so that
    /// [`cleanup_benchmark`](Self::cleanup_benchmark) can release them.
    pub async fn prepare_benchmark(&mut self) -> Result<()> {
        let current = self.expect_phase(&[RunPhase::Idle, RunPhase::CleanedUp], "idle or cleaned up")?;
        if current == RunPhase::CleanedUp {
            self.transition(RunPhase::Idle);
        }

        info!(
            "Preparing {} benchmark with {} clients",
            self.transport.name(),
            self.setup.clients
        );
        // No peer of this run exists yet, so nothing can race the reset
        self.statistics.reset();
        self.clients_connected = 0;
        self.stopped = false;
        self.transition(RunPhase::Preparing);

        let ctx = self.context();
        let driver = self
            .driver
            .insert(BenchmarkDriver::new(Arc::clone(&self.transport), ctx));
        driver.initialize()?;
        driver.start_server().await?;
        driver.start_clients()?;
        driver.connect_clients().await?;

        self.clients_connected = driver.clients().len();
        self.notify(PhaseEvent::ClientsConnected {
            connected: self.clients_connected,
            requested: self.setup.clients,
        });
        Ok(())
    }

    /// Starts counting and tells every client to fill its message window.
    pub fn start_benchmark(&mut self) -> Result<()> {
        self.expect_phase(&[RunPhase::Preparing], "preparing")?;
        let driver = self
            .driver
            .as_ref()
            .ok_or_else(|| Error::Lifecycle("benchmark was not prepared".to_string()))?;

        self.statistics.start_benchmark();
        self.transition(RunPhase::Running);
        driver.start_benchmark();
        Ok(())
    }

    /// Stops counting. Connections stay up until cleanup.
    pub fn stop_benchmark(&mut self) -> Result<Duration> {
        self.expect_phase(&[RunPhase::Running], "running")?;

        // Leave Running first so late replies are rejected by every worker
        self.transition(RunPhase::Stopping);
        if let Some(driver) = &self.driver {
            driver.stop_benchmark();
        }
        let duration = self.statistics.stop_benchmark()?;
        self.stopped = true;

        self.notify(PhaseEvent::RunCompleted { duration });
        Ok(duration)
    }

    /// Runs traffic for the configured duration.
    pub async fn run_timed_benchmark(&mut self) -> Result<Duration> {
        info!(
            "Running {} benchmark for {:?}",
            self.transport.name(),
            self.setup.duration
        );
        self.start_benchmark()?;
        time::sleep(self.setup.duration).await;
        self.stop_benchmark()
    }

    /// Tears the run down completely.
    ///
    /// Every step runs even if earlier ones fail. Failures are logged, added
    /// to the error counter and returned in the [`CleanupReport`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Phase`] only when there is nothing to clean up.
    pub async fn cleanup_benchmark(&mut self) -> Result<CleanupReport> {
        if self.phase.get() == RunPhase::Running {
            if let Err(e) = self.stop_benchmark() {
                warn!("Stopping benchmark before cleanup failed: {}", e);
            }
        }

        let Some(mut driver) = self.driver.take() else {
            return Err(Error::Phase {
                expected: "prepared".to_string(),
                actual: self.phase.get(),
            });
        };

        info!("Cleaning up {} benchmark", self.transport.name());
        let report = driver.teardown().await;
        for (step, e) in &report.failures {
            self.statistics.add_error();
            self.notify(PhaseEvent::TeardownFailed {
                step: *step,
                message: e.to_string(),
            });
        }

        self.transition(RunPhase::CleanedUp);
        Ok(report)
    }

    /// Derives the report from the final statistics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Phase`] unless the run has been stopped. A run that
    /// was prepared and cleaned up without ever running has no report.
    pub fn report(&self) -> Result<BenchmarkReport> {
        let actual = self.expect_phase(&[RunPhase::Stopping, RunPhase::CleanedUp], "stopped")?;
        if !self.stopped {
            return Err(Error::Phase {
                expected: "stopped run".to_string(),
                actual,
            });
        }
        Ok(BenchmarkReport::new(
            self.transport.name(),
            &self.setup,
            self.clients_connected,
            self.statistics.snapshot(),
        ))
    }

    /// Prepares, runs and cleans up one benchmark.
    ///
    /// Cleanup always happens, also when preparing or running failed; the
    /// report is taken before cleanup so teardown failures do not count
    /// against the measurement.
    pub async fn run(&mut self) -> Result<BenchmarkReport> {
        let outcome = match self.prepare_benchmark().await {
            Ok(()) => match self.run_timed_benchmark().await {
                Ok(_) => self.report(),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            error!("{} benchmark failed: {}", self.transport.name(), e);
        }

        if self.driver.is_some() {
            match self.cleanup_benchmark().await {
                Ok(report) if !report.is_clean() => {
                    warn!("{} teardown step(s) failed", report.failures.len());
                }
                Ok(_) => {}
                Err(e) => warn!("Cleanup failed: {}", e),
            }
        }

        outcome
    }
}
