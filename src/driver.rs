//! Transport-agnostic sequencing of one server and its clients.
//!
//! The driver knows nothing about how bytes move. It creates peers through the
//! [`Transport`] factory, calls their lifecycle methods in a fixed order and
//! waits on their observable state between steps.

use crate::config::ConnectPolicy;
use crate::context::BenchmarkContext;
use crate::transport::{BenchmarkClient, BenchmarkServer, TickMode, Transport};
use crate::wait::{wait_for_all, wait_until, Stall, WaitOptions};
use crate::{Error, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// One step of the teardown sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeardownStep {
    DisconnectClients,
    StopClients,
    DisposeClients,
    StopServer,
    DisposeServer,
}

impl TeardownStep {
    /// Clients go down before the server, so a client's disconnect error is
    /// never masked by the server vanishing underneath it.
    pub const ORDER: [TeardownStep; 5] = [
        TeardownStep::DisconnectClients,
        TeardownStep::StopClients,
        TeardownStep::DisposeClients,
        TeardownStep::StopServer,
        TeardownStep::DisposeServer,
    ];
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeardownStep::DisconnectClients => "disconnect clients",
            TeardownStep::StopClients => "stop clients",
            TeardownStep::DisposeClients => "dispose clients",
            TeardownStep::StopServer => "stop server",
            TeardownStep::DisposeServer => "dispose server",
        };
        f.write_str(name)
    }
}

/// Failures collected while tearing a run down.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub failures: Vec<(TeardownStep, Error)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Ticker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives the peers of one run through their lifecycle.
pub struct BenchmarkDriver {
    transport: Arc<dyn Transport>,
    ctx: BenchmarkContext,
    server: Option<Arc<dyn BenchmarkServer>>,
    clients: Vec<Arc<dyn BenchmarkClient>>,
    stragglers: Vec<Arc<dyn BenchmarkClient>>,
    ticker: Option<Ticker>,
}

impl BenchmarkDriver {
    pub fn new(transport: Arc<dyn Transport>, ctx: BenchmarkContext) -> Self {
        Self {
            transport,
            ctx,
            server: None,
            clients: Vec::new(),
            stragglers: Vec::new(),
            ticker: None,
        }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Clients taking part in the measurement
    pub fn clients(&self) -> &[Arc<dyn BenchmarkClient>] {
        &self.clients
    }

    /// Clients that never connected under [`ConnectPolicy::Proceed`]
    pub fn stragglers(&self) -> &[Arc<dyn BenchmarkClient>] {
        &self.stragglers
    }

    pub fn server(&self) -> Option<&Arc<dyn BenchmarkServer>> {
        self.server.as_ref()
    }

    fn wait_options(&self) -> WaitOptions {
        WaitOptions::new(self.ctx.setup().dispose_timeout)
    }

    fn all_clients(&self) -> impl Iterator<Item = &Arc<dyn BenchmarkClient>> {
        self.clients.iter().chain(self.stragglers.iter())
    }

    /// Creates the server. Clients are created by [`start_clients`](Self::start_clients).
    pub fn initialize(&mut self) -> Result<()> {
        let server = self.transport.create_server(self.ctx.clone())?;
        self.server = Some(server);
        self.clients.clear();
        self.stragglers.clear();
        debug!("{} server created", self.transport.name());
        Ok(())
    }

    pub async fn start_server(&mut self) -> Result<()> {
        let server = self
            .server
            .clone()
            .ok_or_else(|| Error::Lifecycle("start_server called before initialize".to_string()))?;

        server.start_server()?;
        wait_until(|| server.is_started(), self.wait_options())
            .await
            .map_err(|stall| stall_error("starting server", stall, |_| "server".to_string()))?;

        info!("{} server started", self.transport.name());
        Ok(())
    }

    /// Constructs all clients without touching the network.
    pub fn start_clients(&mut self) -> Result<()> {
        let count = self.ctx.setup().clients;
        let mut clients = Vec::with_capacity(count);
        for id in 0..count {
            clients.push(self.transport.create_client(id, self.ctx.clone())?);
        }
        self.clients = clients;

        if self.transport.tick_mode() == TickMode::External {
            self.spawn_ticker();
        }
        debug!("{} clients created", count);
        Ok(())
    }

    fn spawn_ticker(&mut self) {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let server = self.server.clone();
        let clients = self.clients.clone();
        let interval = self.ctx.setup().client_tick_interval();

        let handle = tokio::spawn(async move {
            let mut last = Instant::now();
            while !loop_token.is_cancelled() {
                let now = Instant::now();
                let elapsed = now.duration_since(last);
                last = now;

                if let Some(server) = &server {
                    server.tick(elapsed);
                }
                for client in &clients {
                    client.tick(elapsed);
                }

                if interval.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::select! {
                        _ = loop_token.cancelled() => break,
                        _ = time::sleep(interval) => {}
                    }
                }
            }
        });

        self.ticker = Some(Ticker { token, handle });
    }

    async fn stop_ticker(&mut self) -> Result<()> {
        if let Some(ticker) = self.ticker.take() {
            ticker.token.cancel();
            ticker
                .handle
                .await
                .map_err(|e| Error::Teardown(format!("tick loop failed: {}", e)))?;
        }
        Ok(())
    }

    /// Starts and connects every client, then waits for all of them.
    ///
    /// # Errors
    ///
    /// With [`ConnectPolicy::FailFast`], returns [`Error::Stall`] naming the
    /// clients that did not connect within the connect timeout. With
    /// [`ConnectPolicy::Proceed`], only fails when no client connected.
    pub async fn connect_clients(&mut self) -> Result<()> {
        for client in &self.clients {
            client.start_client()?;
            client.connect_client()?;
        }

        let setup = self.ctx.setup();
        let options = WaitOptions::new(setup.connect_timeout);
        let policy = setup.connect_policy;

        let stall = match wait_for_all(&self.clients, |c| c.is_connected(), options).await {
            Ok(()) => {
                info!("All {} clients connected", self.clients.len());
                return Ok(());
            }
            Err(stall) => stall,
        };

        if policy == ConnectPolicy::FailFast || stall.pending.len() == self.clients.len() {
            let clients = &self.clients;
            return Err(stall_error("connecting clients", stall, |i| {
                format!("client {}", clients[i].id())
            }));
        }

        // Proceed with the reduced set; stragglers are still torn down later
        let (connected, stragglers): (Vec<_>, Vec<_>) = self
            .clients
            .drain(..)
            .enumerate()
            .partition(|(i, _)| !stall.pending.contains(i));
        self.clients = connected.into_iter().map(|(_, c)| c).collect();
        self.stragglers = stragglers.into_iter().map(|(_, c)| c).collect();

        warn!(
            "{} of {} clients failed to connect within {:?}, continuing without them",
            self.stragglers.len(),
            self.clients.len() + self.stragglers.len(),
            stall.waited
        );
        Ok(())
    }

    /// Fans out the start signal; does not wait for any message.
    pub fn start_benchmark(&self) {
        for client in &self.clients {
            client.start_benchmark();
        }
    }

    pub fn stop_benchmark(&self) {
        for client in &self.clients {
            client.stop_benchmark();
        }
    }

    pub async fn disconnect_clients(&mut self) -> Result<()> {
        visit_all(self.all_clients(), TeardownStep::DisconnectClients, |c| {
            c.disconnect_client()
        })
    }

    pub async fn stop_clients(&mut self) -> Result<()> {
        visit_all(self.all_clients(), TeardownStep::StopClients, |c| c.stop_client())
    }

    pub async fn dispose_clients(&mut self) -> Result<()> {
        let result = visit_all(self.all_clients(), TeardownStep::DisposeClients, |c| c.dispose());

        let everyone: Vec<_> = self.all_clients().cloned().collect();
        wait_for_all(&everyone, |c| c.is_disposed(), self.wait_options())
            .await
            .map_err(|stall| {
                stall_error("disposing clients", stall, |i| format!("client {}", everyone[i].id()))
            })?;

        result
    }

    pub async fn stop_server(&mut self) -> Result<()> {
        let Some(server) = self.server.clone() else {
            return Ok(());
        };

        server.stop_server()?;
        wait_until(|| server.is_stopped(), self.wait_options())
            .await
            .map_err(|stall| stall_error("stopping server", stall, |_| "server".to_string()))
    }

    pub async fn dispose_server(&mut self) -> Result<()> {
        let ticker = self.stop_ticker().await;
        let disposed = match &self.server {
            Some(server) => server.dispose(),
            None => Ok(()),
        };
        ticker.and(disposed)
    }

    /// Runs every teardown step in [`TeardownStep::ORDER`], whatever happens
    /// in the earlier ones, then drops all peers.
    pub async fn teardown(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for step in TeardownStep::ORDER {
            let result = match step {
                TeardownStep::DisconnectClients => self.disconnect_clients().await,
                TeardownStep::StopClients => self.stop_clients().await,
                TeardownStep::DisposeClients => self.dispose_clients().await,
                TeardownStep::StopServer => self.stop_server().await,
                TeardownStep::DisposeServer => self.dispose_server().await,
            };
            if let Err(e) = result {
                error!("Teardown step '{}' failed: {}", step, e);
                report.failures.push((step, e));
            }
        }

        self.clients.clear();
        self.stragglers.clear();
        self.server = None;
        report
    }
}

/// Applies `op` to every client and returns the first error, if any.
fn visit_all<'a, I, F>(clients: I, step: TeardownStep, op: F) -> Result<()>
where
    I: Iterator<Item = &'a Arc<dyn BenchmarkClient>>,
    F: Fn(&Arc<dyn BenchmarkClient>) -> Result<()>,
{
    let mut first = None;
    for client in clients {
        if let Err(e) = op(client) {
            warn!("{} failed for client {}: {}", step, client.id(), e);
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

fn stall_error(phase: &str, stall: Stall, name: impl Fn(usize) -> String) -> Error {
    Error::Stall {
        phase: phase.to_string(),
        pending: stall.pending.iter().map(|&i| name(i)).collect(),
        waited: stall.waited,
    }
}

impl Drop for BenchmarkDriver {
    // A driver dropped without teardown must not leave its tick loop behind
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.token.cancel();
            ticker.handle.abort();
        }
    }
}
