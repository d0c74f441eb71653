use crate::{Error, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delivery guarantee requested from the transport.
///
/// Adapters that cannot honour the requested mode refuse to construct their
/// peers, which aborts the benchmark before any traffic is sent.
///
/// # Examples
///
/// ```
/// use netbench::{BenchmarkSetup, Transmission};
///
/// let setup = BenchmarkSetup::new().with_transmission(Transmission::Unreliable);
/// assert_eq!(setup.transmission, Transmission::Unreliable);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transmission {
    /// Every message is delivered, retransmitted if necessary
    Reliable,
    /// Messages may be dropped by the network
    Unreliable,
}

impl std::fmt::Display for Transmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transmission::Reliable => f.write_str("Reliable"),
            Transmission::Unreliable => f.write_str("Unreliable"),
        }
    }
}

/// What to do with clients that never report a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectPolicy {
    /// Abort the whole benchmark with a stall error naming the clients
    FailFast,
    /// Continue with the clients that did connect and report the shortfall
    Proceed,
}

/// Configuration of one benchmark run.
///
/// The coordinator snapshots this value when it is created; changing the
/// original afterwards has no effect on the run.
///
/// # Examples
///
/// ```
/// use netbench::{BenchmarkSetup, Transmission};
/// use std::time::Duration;
///
/// let setup = BenchmarkSetup::new()
///     .with_clients(10)
///     .with_duration(Duration::from_secs(5))
///     .with_message_size(64)
///     .with_parallel_messages(4)
///     .with_transmission(Transmission::Reliable);
///
/// assert!(setup.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkSetup {
    /// Number of clients
    pub clients: usize,

    /// Length of the measured run phase
    pub duration: Duration,

    /// Payload size of every message in bytes
    pub message_size: usize,

    /// Requested delivery guarantee
    pub transmission: Transmission,

    /// Server loop rate in ticks per second (0 = never sleep)
    pub server_tick_rate: u32,

    /// Client loop rate in ticks per second (0 = never sleep)
    pub client_tick_rate: u32,

    /// Echo requests each client keeps in flight
    pub parallel_messages: usize,

    /// Server address
    pub address: String,

    /// Server port (0 lets the server pick one)
    pub port: u16,

    /// Upper bound for clients to connect, `None` waits forever
    pub connect_timeout: Option<Duration>,

    /// Upper bound for peers to start, stop or dispose, `None` waits forever
    pub dispose_timeout: Option<Duration>,

    /// Handling of clients that do not connect within `connect_timeout`
    pub connect_policy: ConnectPolicy,
}

impl Default for BenchmarkSetup {
    fn default() -> Self {
        Self {
            clients: 100,
            duration: Duration::from_secs(10),
            message_size: 32,
            transmission: Transmission::Reliable,
            server_tick_rate: 60,
            client_tick_rate: 60,
            parallel_messages: 1,
            address: "127.0.0.1".to_string(),
            port: 3333,
            connect_timeout: Some(Duration::from_secs(30)),
            dispose_timeout: Some(Duration::from_secs(10)),
            connect_policy: ConnectPolicy::FailFast,
        }
    }
}

impl BenchmarkSetup {
    /// Creates a setup with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clients(mut self, clients: usize) -> Self {
        self.clients = clients;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_message_size(mut self, size: usize) -> Self {
        self.message_size = size;
        self
    }

    pub fn with_transmission(mut self, transmission: Transmission) -> Self {
        self.transmission = transmission;
        self
    }

    /// Sets both server and client tick rates.
    pub fn with_tick_rate(mut self, server: u32, client: u32) -> Self {
        self.server_tick_rate = server;
        self.client_tick_rate = client;
        self
    }

    pub fn with_parallel_messages(mut self, parallel: usize) -> Self {
        self.parallel_messages = parallel;
        self
    }

    /// Sets the address and port clients connect to and the server binds.
    ///
    /// # Examples
    ///
    /// ```
    /// use netbench::BenchmarkSetup;
    ///
    /// let setup = BenchmarkSetup::new().with_endpoint("::1", 4000);
    /// assert_eq!(setup.endpoint(), "[::1]:4000");
    /// ```
    pub fn with_endpoint(mut self, address: impl Into<String>, port: u16) -> Self {
        self.address = address.into();
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_dispose_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dispose_timeout = timeout;
        self
    }

    pub fn with_connect_policy(mut self, policy: ConnectPolicy) -> Self {
        self.connect_policy = policy;
        self
    }

    /// Checks the values that would make a run meaningless.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the client count, message size,
    /// parallel message count or duration is zero.
    pub fn validate(&self) -> Result<()> {
        if self.clients == 0 {
            return Err(Error::Config("At least one client is required".to_string()));
        }
        if self.message_size == 0 {
            return Err(Error::Config("Message size must be positive".to_string()));
        }
        if self.parallel_messages == 0 {
            return Err(Error::Config(
                "Parallel messages must be positive".to_string(),
            ));
        }
        if self.duration.is_zero() {
            return Err(Error::Config("Duration must be positive".to_string()));
        }
        Ok(())
    }

    /// `host:port` form of the configured endpoint, bracketing IPv6 literals.
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    pub fn server_tick_interval(&self) -> Duration {
        tick_interval(self.server_tick_rate)
    }

    pub fn client_tick_interval(&self) -> Duration {
        tick_interval(self.client_tick_rate)
    }

    /// Builds a message payload of `message_size` random bytes.
    pub fn message(&self) -> Vec<u8> {
        let mut message = vec![0u8; self.message_size];
        rand::thread_rng().fill_bytes(&mut message);
        message
    }
}

fn tick_interval(rate: u32) -> Duration {
    if rate == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(1) / rate
    }
}
