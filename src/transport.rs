//! Contract between the benchmark core and a transport implementation.
//!
//! A transport provides a [`Transport`] factory that creates one
//! [`BenchmarkServer`] and any number of [`BenchmarkClient`]s for a run. The
//! core never looks inside a peer: it calls the lifecycle methods below and
//! polls the boolean state accessors until they reach the expected value.
//!
//! All methods take `&self` and must return promptly. Anything that takes
//! time (binding, connecting, flushing) happens on the peer's own threads or
//! tasks, and completion is published through the state accessors.

use crate::context::BenchmarkContext;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// Who drives a peer's processing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    /// Peers run their own threads or tasks
    SelfDriven,
    /// The driver ticks every peer from one shared update loop
    External,
}

/// Factory for the peers of one transport.
///
/// # Examples
///
/// ```
/// use netbench::transports::LoopbackTransport;
/// use netbench::{TickMode, Transport};
///
/// let transport = LoopbackTransport::new();
/// assert_eq!(transport.name(), "loopback");
/// assert_eq!(transport.tick_mode(), TickMode::External);
/// ```
pub trait Transport: Send + Sync {
    /// Short name used in logs and reports
    fn name(&self) -> &'static str;

    fn tick_mode(&self) -> TickMode {
        TickMode::SelfDriven
    }

    /// Creates the server of a run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) when the setup asks for
    /// something the transport cannot do, such as an unsupported transmission.
    fn create_server(&self, ctx: BenchmarkContext) -> Result<Arc<dyn BenchmarkServer>>;

    /// Creates client `id` of a run. No network activity happens yet.
    fn create_client(&self, id: usize, ctx: BenchmarkContext) -> Result<Arc<dyn BenchmarkClient>>;
}

/// Echo server side of a transport.
pub trait BenchmarkServer: Send + Sync {
    /// Begins listening. Must not block until the listener is ready.
    fn start_server(&self) -> Result<()>;

    /// True once the server accepts clients
    fn is_started(&self) -> bool;

    /// One processing step, for [`TickMode::External`] transports.
    fn tick(&self, _elapsed: Duration) {}

    /// Asks the server loop to finish; the loop exits on its own.
    fn stop_server(&self) -> Result<()>;

    /// True once the server loop has exited
    fn is_stopped(&self) -> bool;

    /// Releases transport resources. Calling it again is a no-op.
    fn dispose(&self) -> Result<()>;
}

/// Echo client side of a transport.
///
/// While the run phase is `Running`, a client that receives an echo reply
/// sends the next request right away, so each client keeps exactly
/// `parallel_messages` requests in flight.
pub trait BenchmarkClient: Send + Sync {
    fn id(&self) -> usize;

    /// Starts the client's own processing (threads, tasks, sockets).
    fn start_client(&self) -> Result<()>;

    /// Begins the connection attempt. Must not block until connected.
    fn connect_client(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// One processing step, for [`TickMode::External`] transports.
    fn tick(&self, _elapsed: Duration) {}

    /// Sends the initial window of `parallel_messages` requests.
    fn start_benchmark(&self);

    /// Stops echoing further replies; the connection stays open.
    fn stop_benchmark(&self);

    fn disconnect_client(&self) -> Result<()>;

    /// Stops the client's processing loop.
    fn stop_client(&self) -> Result<()>;

    /// Releases transport resources. Calling it again is a no-op.
    fn dispose(&self) -> Result<()>;

    fn is_disposed(&self) -> bool;
}
