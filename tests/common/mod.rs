// Mock transport shared by the integration tests.
// Peers record every lifecycle call in a shared log and never touch the network.

#![allow(dead_code)]

use netbench::{BenchmarkClient, BenchmarkContext, BenchmarkServer, Error, Result, Transport};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Knobs for how mock peers misbehave
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Clients that never report a connection
    pub unconnected: Vec<usize>,
    /// Every client fails to disconnect
    pub fail_disconnect: bool,
    /// Server never reports being started
    pub server_never_starts: bool,
}

pub struct MockTransport {
    pub log: CallLog,
    behavior: MockBehavior,
    clients: Mutex<Vec<Arc<MockClient>>>,
}

impl MockTransport {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            behavior,
            clients: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Index of the first call equal to `call`
    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn clients(&self) -> Vec<Arc<MockClient>> {
        self.clients.lock().unwrap().clone()
    }

    /// Simulates one complete echo round trip on every client.
    pub fn inject_round_trips(&self) {
        for client in self.clients() {
            client.round_trip();
        }
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn create_server(&self, _ctx: BenchmarkContext) -> Result<Arc<dyn BenchmarkServer>> {
        self.log.lock().unwrap().push("create_server".to_string());
        Ok(Arc::new(MockServer {
            log: Arc::clone(&self.log),
            never_starts: self.behavior.server_never_starts,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }))
    }

    fn create_client(&self, id: usize, ctx: BenchmarkContext) -> Result<Arc<dyn BenchmarkClient>> {
        let client = Arc::new(MockClient {
            id,
            ctx,
            log: Arc::clone(&self.log),
            connects: !self.behavior.unconnected.contains(&id),
            fail_disconnect: self.behavior.fail_disconnect,
            connected: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            dispose_calls: AtomicUsize::new(0),
        });
        self.clients.lock().unwrap().push(Arc::clone(&client));
        Ok(client)
    }
}

pub struct MockServer {
    log: CallLog,
    never_starts: bool,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl BenchmarkServer for MockServer {
    fn start_server(&self) -> Result<()> {
        self.log.lock().unwrap().push("start_server".to_string());
        if !self.never_starts {
            self.started.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn stop_server(&self) -> Result<()> {
        self.log.lock().unwrap().push("stop_server".to_string());
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn dispose(&self) -> Result<()> {
        self.log.lock().unwrap().push("dispose_server".to_string());
        Ok(())
    }
}

pub struct MockClient {
    id: usize,
    ctx: BenchmarkContext,
    log: CallLog,
    connects: bool,
    fail_disconnect: bool,
    connected: AtomicBool,
    disposed: AtomicBool,
    pub dispose_calls: AtomicUsize,
}

impl MockClient {
    fn record(&self, call: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{} {}", call, self.id));
    }

    pub fn round_trip(&self) {
        self.ctx.record_client_sent();
        if self.ctx.record_server_received() {
            self.ctx.record_server_sent();
        }
        self.ctx.record_client_received();
    }
}

impl BenchmarkClient for MockClient {
    fn id(&self) -> usize {
        self.id
    }

    fn start_client(&self) -> Result<()> {
        self.record("start_client");
        Ok(())
    }

    fn connect_client(&self) -> Result<()> {
        self.record("connect_client");
        if self.connects {
            self.connected.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn start_benchmark(&self) {
        self.record("start_benchmark");
        for _ in 0..self.ctx.setup().parallel_messages {
            self.ctx.record_client_sent();
        }
    }

    fn stop_benchmark(&self) {
        self.record("stop_benchmark");
    }

    fn disconnect_client(&self) -> Result<()> {
        self.record("disconnect_client");
        if self.fail_disconnect {
            return Err(Error::Connection(format!(
                "client {} lost its connection",
                self.id
            )));
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop_client(&self) -> Result<()> {
        self.record("stop_client");
        Ok(())
    }

    fn dispose(&self) -> Result<()> {
        self.dispose_calls.fetch_add(1, Ordering::SeqCst);
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.record("dispose_client");
        }
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}
