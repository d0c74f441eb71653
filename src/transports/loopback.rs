//! In-process echo transport without any network.
//!
//! Peers exchange tokens over unbounded channels and only make progress when
//! the driver ticks them, which models libraries that expect the host to run
//! one shared update loop. Latency is bounded by the tick interval alone.

use crate::context::BenchmarkContext;
use crate::transport::{BenchmarkClient, BenchmarkServer, TickMode, Transport};
use crate::{Error, Result};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

enum Request {
    Connect {
        id: usize,
        reply: UnboundedSender<Reply>,
    },
    Message {
        id: usize,
    },
    Disconnect {
        id: usize,
    },
}

enum Reply {
    Accepted,
    Message,
}

/// Where clients find the server's inbox.
#[derive(Default)]
struct Switchboard {
    server: Mutex<Option<UnboundedSender<Request>>>,
}

/// Zero-latency in-process transport.
#[derive(Default)]
pub struct LoopbackTransport {
    switchboard: Arc<Switchboard>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for LoopbackTransport {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn tick_mode(&self) -> TickMode {
        TickMode::External
    }

    fn create_server(&self, ctx: BenchmarkContext) -> Result<Arc<dyn BenchmarkServer>> {
        Ok(Arc::new(LoopbackServer {
            ctx,
            switchboard: Arc::clone(&self.switchboard),
            inbox: Mutex::new(None),
            clients: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }))
    }

    fn create_client(&self, id: usize, ctx: BenchmarkContext) -> Result<Arc<dyn BenchmarkClient>> {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        Ok(Arc::new(LoopbackClient {
            id,
            ctx,
            switchboard: Arc::clone(&self.switchboard),
            reply_tx,
            replies: Mutex::new(reply_rx),
            server: Mutex::new(None),
            connected: AtomicBool::new(false),
            benchmarking: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }))
    }
}

struct LoopbackServer {
    ctx: BenchmarkContext,
    switchboard: Arc<Switchboard>,
    inbox: Mutex<Option<UnboundedReceiver<Request>>>,
    clients: Mutex<HashMap<usize, UnboundedSender<Reply>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    disposed: AtomicBool,
}

impl BenchmarkServer for LoopbackServer {
    fn start_server(&self) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbox.lock() = Some(rx);
        *self.switchboard.server.lock() = Some(tx);
        self.stopped.store(false, Ordering::Release);
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn tick(&self, _elapsed: Duration) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let mut inbox = self.inbox.lock();
        let Some(inbox) = inbox.as_mut() else {
            return;
        };

        let mut clients = self.clients.lock();
        while let Ok(request) = inbox.try_recv() {
            match request {
                Request::Connect { id, reply } => {
                    let _ = reply.send(Reply::Accepted);
                    clients.insert(id, reply);
                }
                Request::Message { id } => {
                    if self.ctx.record_server_received() {
                        if let Some(reply) = clients.get(&id) {
                            if reply.send(Reply::Message).is_ok() {
                                self.ctx.record_server_sent();
                            }
                        }
                    }
                }
                Request::Disconnect { id } => {
                    clients.remove(&id);
                    debug!("Loopback client {} disconnected", id);
                }
            }
        }
    }

    fn stop_server(&self) -> Result<()> {
        self.switchboard.server.lock().take();
        self.stopped.store(true, Ordering::Release);
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn dispose(&self) -> Result<()> {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.inbox.lock().take();
            self.clients.lock().clear();
        }
        Ok(())
    }
}

struct LoopbackClient {
    id: usize,
    ctx: BenchmarkContext,
    switchboard: Arc<Switchboard>,
    reply_tx: UnboundedSender<Reply>,
    replies: Mutex<UnboundedReceiver<Reply>>,
    server: Mutex<Option<UnboundedSender<Request>>>,
    connected: AtomicBool,
    benchmarking: AtomicBool,
    disposed: AtomicBool,
}

impl LoopbackClient {
    fn send_message(&self) {
        if let Some(server) = self.server.lock().as_ref() {
            if server.send(Request::Message { id: self.id }).is_ok() {
                self.ctx.record_client_sent();
            }
        }
    }
}

impl BenchmarkClient for LoopbackClient {
    fn id(&self) -> usize {
        self.id
    }

    fn start_client(&self) -> Result<()> {
        self.disposed.store(false, Ordering::Release);
        Ok(())
    }

    fn connect_client(&self) -> Result<()> {
        let server = self
            .switchboard
            .server
            .lock()
            .clone()
            .ok_or_else(|| Error::Connection("No loopback server is running".to_string()))?;

        server
            .send(Request::Connect {
                id: self.id,
                reply: self.reply_tx.clone(),
            })
            .map_err(|_| Error::Connection("Loopback server went away".to_string()))?;
        *self.server.lock() = Some(server);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn tick(&self, _elapsed: Duration) {
        let mut replies = self.replies.lock();
        while let Ok(reply) = replies.try_recv() {
            match reply {
                Reply::Accepted => self.connected.store(true, Ordering::Release),
                Reply::Message => {
                    if self.benchmarking.load(Ordering::Acquire) && self.ctx.record_client_received()
                    {
                        self.send_message();
                    }
                }
            }
        }
    }

    fn start_benchmark(&self) {
        self.benchmarking.store(true, Ordering::Release);
        for _ in 0..self.ctx.setup().parallel_messages {
            self.send_message();
        }
    }

    fn stop_benchmark(&self) {
        self.benchmarking.store(false, Ordering::Release);
    }

    fn disconnect_client(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(server) = self.server.lock().take() {
            let _ = server.send(Request::Disconnect { id: self.id });
        }
        Ok(())
    }

    fn stop_client(&self) -> Result<()> {
        self.benchmarking.store(false, Ordering::Release);
        Ok(())
    }

    fn dispose(&self) -> Result<()> {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.server.lock().take();
        }
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchmarkSetup;
    use crate::phase::{PhaseController, RunPhase};
    use crate::statistics::BenchmarkStatistics;

    fn context(phase: &PhaseController) -> BenchmarkContext {
        BenchmarkContext::new(
            Arc::new(BenchmarkSetup::new().with_parallel_messages(3)),
            phase.view(),
            Arc::new(BenchmarkStatistics::new()),
        )
    }

    #[test]
    fn test_connect_requires_server() {
        let phase = PhaseController::new();
        let transport = LoopbackTransport::new();
        let client = transport.create_client(0, context(&phase)).unwrap();
        assert!(matches!(client.connect_client(), Err(Error::Connection(_))));
    }

    #[test]
    fn test_manual_ticks_complete_round_trip() {
        let phase = PhaseController::new();
        let ctx = context(&phase);
        let stats = Arc::clone(ctx.statistics());
        let transport = LoopbackTransport::new();
        let server = transport.create_server(ctx.clone()).unwrap();
        let client = transport.create_client(0, ctx).unwrap();

        server.start_server().unwrap();
        client.connect_client().unwrap();
        server.tick(Duration::ZERO);
        client.tick(Duration::ZERO);
        assert!(client.is_connected());

        phase.set(RunPhase::Running);
        client.start_benchmark();
        server.tick(Duration::ZERO);
        client.tick(Duration::ZERO);

        let snapshot = stats.snapshot();
        // 3 initial requests plus 3 re-sends after the echoes
        assert_eq!(snapshot.messages_client_sent, 6);
        assert_eq!(snapshot.messages_server_received, 3);
        assert_eq!(snapshot.messages_client_received, 3);
    }

    #[test]
    fn test_dispose_twice_is_harmless() {
        let phase = PhaseController::new();
        let transport = LoopbackTransport::new();
        let client = transport.create_client(0, context(&phase)).unwrap();
        client.dispose().unwrap();
        client.dispose().unwrap();
        assert!(client.is_disposed());
    }
}
