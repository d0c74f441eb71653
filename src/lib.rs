//! netbench - echo benchmarks across interchangeable network transports
//!
//! This library runs the same echo workload over different transports and
//! reports comparable throughput and latency numbers. A coordinator walks a
//! server and N clients through prepare, a timed run and cleanup, while the
//! peers count their traffic into shared lock-free statistics.
//!
//! # Features
//!
//! - Transport-agnostic lifecycle with bounded waits and full teardown
//! - Lock-free counters that only count while the run is live
//! - TCP, UDP and in-process loopback transports
//! - JSON reports
//! - Asynchronous orchestration using tokio
//!
//! # Examples
//!
//! ```
//! use netbench::transports::LoopbackTransport;
//! use netbench::{BenchmarkCoordinator, BenchmarkSetup};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> netbench::Result<()> {
//! let setup = BenchmarkSetup::new()
//!     .with_clients(2)
//!     .with_duration(Duration::from_millis(200))
//!     .with_tick_rate(0, 1000);
//!
//! let mut coordinator = BenchmarkCoordinator::new(Arc::new(LoopbackTransport::new()), setup)?;
//! let report = coordinator.run().await?;
//! assert!(report.messages_client_received <= report.messages_client_sent);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod phase;
pub mod report;
pub mod statistics;
pub mod transport;
pub mod transports;
pub mod wait;

pub use config::{BenchmarkSetup, ConnectPolicy, Transmission};
pub use context::BenchmarkContext;
pub use coordinator::{BenchmarkCoordinator, PhaseCallback, PhaseEvent};
pub use driver::{BenchmarkDriver, CleanupReport, TeardownStep};
pub use error::{Error, Result};
pub use phase::{PhaseController, PhaseView, RunPhase};
pub use report::{BenchmarkReport, RunInfo};
pub use statistics::{BenchmarkStatistics, StatisticsSnapshot};
pub use transport::{BenchmarkClient, BenchmarkServer, TickMode, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
