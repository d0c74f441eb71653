//! Unreliable echo transport over UDP.
//!
//! Every peer owns a nonblocking socket and a dedicated thread that wakes up
//! at the configured tick rate, drains its socket and answers what it found.
//! Datagrams follow the format in [`datagram`](super::datagram); lost
//! datagrams are never retransmitted, so a client's window shrinks with every
//! loss.

use super::datagram::{create_packet, parse_packet, PacketHeader, PacketKind};
use super::{local_any, resolve_endpoint, BoundAddress};
use crate::config::Transmission;
use crate::context::BenchmarkContext;
use crate::transport::{BenchmarkClient, BenchmarkServer, Transport};
use crate::{Error, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Largest payload of an IPv4 UDP datagram
const MAX_DATAGRAM: usize = 65_507;
const RECONNECT_INTERVAL: Duration = Duration::from_millis(100);

/// Echo transport over UDP datagrams.
#[derive(Default)]
pub struct UdpTransport {
    bound: BoundAddress,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_setup(ctx: &BenchmarkContext) -> Result<()> {
    let setup = ctx.setup();
    if setup.transmission != Transmission::Unreliable {
        return Err(Error::Config(format!(
            "UDP cannot provide {} transmission",
            setup.transmission
        )));
    }
    if setup.message_size + PacketHeader::SIZE > MAX_DATAGRAM {
        return Err(Error::Config(format!(
            "Message size {} does not fit into one datagram",
            setup.message_size
        )));
    }
    Ok(())
}

impl Transport for UdpTransport {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn create_server(&self, ctx: BenchmarkContext) -> Result<Arc<dyn BenchmarkServer>> {
        check_setup(&ctx)?;
        Ok(Arc::new(UdpServer {
            ctx,
            bound: self.bound.clone(),
            worker: Worker::default(),
        }))
    }

    fn create_client(&self, id: usize, ctx: BenchmarkContext) -> Result<Arc<dyn BenchmarkClient>> {
        check_setup(&ctx)?;
        let wire_id = u32::try_from(id).map_err(|_| {
            Error::Config(format!("UDP client id {} does not fit the datagram header", id))
        })?;
        Ok(Arc::new(UdpClient {
            id,
            wire_id,
            ctx,
            bound: self.bound.clone(),
            worker: Worker::default(),
            commands: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// Thread of one peer plus the flags used to steer it.
#[derive(Default)]
struct Worker {
    thread: Mutex<Option<JoinHandle<()>>>,
    stop: Arc<AtomicBool>,
    disposed: AtomicBool,
}

impl Worker {
    fn spawn<F>(&self, name: String, body: F) -> Result<()>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new().name(name).spawn(move || body(stop))?;
        *self.thread.lock() = Some(handle);
        Ok(())
    }

    fn is_spawned(&self) -> bool {
        self.thread.lock().is_some()
    }

    fn is_running(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Returns false if the worker was already disposed.
    fn dispose(&self) -> bool {
        self.request_stop();
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire) && !self.is_running()
    }
}

fn pause(interval: Duration) {
    if interval.is_zero() {
        thread::yield_now();
    } else {
        thread::sleep(interval);
    }
}

/// Counts a socket error if the run cares about it.
fn report_socket_error(ctx: &BenchmarkContext, peer: &str, e: &io::Error) {
    if ctx.phase().is_active() {
        warn!("{}: socket error: {}", peer, e);
        ctx.record_error();
    } else {
        debug!("{}: socket error after the run: {}", peer, e);
    }
}

struct UdpServer {
    ctx: BenchmarkContext,
    bound: BoundAddress,
    worker: Worker,
}

impl BenchmarkServer for UdpServer {
    fn start_server(&self) -> Result<()> {
        let addr = resolve_endpoint(self.ctx.setup())?;
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local = socket.local_addr()?;
        self.bound.set(local);
        info!("UDP server listening on {}", local);

        let ctx = self.ctx.clone();
        self.worker
            .spawn("udp-server".to_string(), move |stop| serve(socket, ctx, stop))
    }

    fn is_started(&self) -> bool {
        self.worker.is_spawned()
    }

    fn stop_server(&self) -> Result<()> {
        self.worker.request_stop();
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        !self.worker.is_running()
    }

    fn dispose(&self) -> Result<()> {
        if self.worker.dispose() {
            self.bound.clear();
        }
        Ok(())
    }
}

fn serve(socket: UdpSocket, ctx: BenchmarkContext, stop: Arc<AtomicBool>) {
    let interval = ctx.setup().server_tick_interval();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut peers: HashMap<u32, SocketAddr> = HashMap::new();

    while !stop.load(Ordering::Acquire) {
        loop {
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    let Some((header, payload)) = parse_packet(&buf[..len]) else {
                        debug!("Ignoring foreign datagram from {}", from);
                        continue;
                    };
                    handle_request(&socket, &ctx, &mut peers, header, payload, from);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    report_socket_error(&ctx, "UDP server", &e);
                    break;
                }
            }
        }
        pause(interval);
    }
    debug!("UDP server exited with {} peer(s) attached", peers.len());
}

fn handle_request(
    socket: &UdpSocket,
    ctx: &BenchmarkContext,
    peers: &mut HashMap<u32, SocketAddr>,
    header: PacketHeader,
    payload: &[u8],
    from: SocketAddr,
) {
    match header.kind {
        PacketKind::Connect => {
            peers.insert(header.client_id, from);
            let accept = create_packet(PacketKind::Accept, header.client_id, 0, &[]);
            if let Err(e) = socket.send_to(&accept, from) {
                report_socket_error(ctx, "UDP server", &e);
            }
        }
        PacketKind::Message => {
            if !ctx.record_server_received() {
                return;
            }
            let reply = create_packet(PacketKind::Message, header.client_id, header.sequence, payload);
            match socket.send_to(&reply, from) {
                Ok(_) => {
                    ctx.record_server_sent();
                }
                Err(e) => report_socket_error(ctx, "UDP server", &e),
            }
        }
        PacketKind::Disconnect => {
            peers.remove(&header.client_id);
        }
        PacketKind::Accept => debug!("Unexpected accept from {}", from),
    }
}

#[derive(Debug)]
enum Command {
    Connect,
    StartBenchmark,
    StopBenchmark,
    Disconnect,
}

struct UdpClient {
    id: usize,
    wire_id: u32,
    ctx: BenchmarkContext,
    bound: BoundAddress,
    worker: Worker,
    commands: Mutex<Option<UnboundedSender<Command>>>,
    connected: Arc<AtomicBool>,
}

impl UdpClient {
    fn send(&self, command: Command) -> Result<()> {
        let commands = self.commands.lock();
        let commands = commands
            .as_ref()
            .ok_or_else(|| Error::Lifecycle(format!("UDP client {} was not started", self.id)))?;
        commands
            .send(command)
            .map_err(|_| Error::Lifecycle(format!("UDP client {} is no longer running", self.id)))
    }
}

impl BenchmarkClient for UdpClient {
    fn id(&self) -> usize {
        self.id
    }

    fn start_client(&self) -> Result<()> {
        let server = self.bound.resolve(self.ctx.setup())?;
        let socket = UdpSocket::bind(local_any(&server))?;
        socket.set_nonblocking(true)?;

        let (tx, rx) = mpsc::unbounded_channel();
        *self.commands.lock() = Some(tx);

        let session = ClientSession {
            id: self.id,
            wire_id: self.wire_id,
            socket,
            server,
            ctx: self.ctx.clone(),
            connected: Arc::clone(&self.connected),
            message: self.ctx.setup().message(),
            sequence: 0,
        };
        self.worker
            .spawn(format!("udp-client-{}", self.id), move |stop| {
                session.run(rx, stop)
            })
    }

    fn connect_client(&self) -> Result<()> {
        self.send(Command::Connect)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn start_benchmark(&self) {
        if let Err(e) = self.send(Command::StartBenchmark) {
            debug!("{}", e);
        }
    }

    fn stop_benchmark(&self) {
        if let Err(e) = self.send(Command::StopBenchmark) {
            debug!("{}", e);
        }
    }

    fn disconnect_client(&self) -> Result<()> {
        if !self.worker.is_running() {
            return Ok(());
        }
        self.send(Command::Disconnect)
    }

    fn stop_client(&self) -> Result<()> {
        self.worker.request_stop();
        Ok(())
    }

    fn dispose(&self) -> Result<()> {
        if self.worker.dispose() {
            self.commands.lock().take();
        }
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.worker.is_disposed()
    }
}

/// State owned by a client thread.
struct ClientSession {
    id: usize,
    wire_id: u32,
    socket: UdpSocket,
    server: SocketAddr,
    ctx: BenchmarkContext,
    connected: Arc<AtomicBool>,
    message: Vec<u8>,
    sequence: u64,
}

impl ClientSession {
    fn run(mut self, mut commands: UnboundedReceiver<Command>, stop: Arc<AtomicBool>) {
        let interval = self.ctx.setup().client_tick_interval();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut connecting = false;
        let mut last_attempt: Option<Instant> = None;
        let mut benchmarking = false;

        while !stop.load(Ordering::Acquire) {
            while let Ok(command) = commands.try_recv() {
                match command {
                    Command::Connect => connecting = true,
                    Command::StartBenchmark => {
                        benchmarking = true;
                        for _ in 0..self.ctx.setup().parallel_messages {
                            self.send_message();
                        }
                    }
                    Command::StopBenchmark => benchmarking = false,
                    Command::Disconnect => {
                        connecting = false;
                        benchmarking = false;
                        if self.connected.swap(false, Ordering::AcqRel) {
                            self.send_control(PacketKind::Disconnect);
                        }
                    }
                }
            }

            let connected = self.connected.load(Ordering::Acquire);
            if connecting && !connected && last_attempt.map_or(true, |t| t.elapsed() >= RECONNECT_INTERVAL) {
                self.send_control(PacketKind::Connect);
                last_attempt = Some(Instant::now());
            }

            loop {
                match self.socket.recv_from(&mut buf) {
                    Ok((len, _)) => {
                        let Some((header, _payload)) = parse_packet(&buf[..len]) else {
                            continue;
                        };
                        if header.client_id != self.wire_id {
                            continue;
                        }
                        match header.kind {
                            PacketKind::Accept if connecting => {
                                connecting = false;
                                self.connected.store(true, Ordering::Release);
                                debug!("UDP client {} connected to {}", self.id, self.server);
                            }
                            PacketKind::Message => {
                                if benchmarking && self.ctx.record_client_received() {
                                    self.send_message();
                                }
                            }
                            _ => {}
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        report_socket_error(&self.ctx, &format!("UDP client {}", self.id), &e);
                        break;
                    }
                }
            }

            pause(interval);
        }

        self.connected.store(false, Ordering::Release);
    }

    fn send_message(&mut self) {
        let packet = create_packet(PacketKind::Message, self.wire_id, self.sequence, &self.message);
        match self.socket.send_to(&packet, self.server) {
            Ok(_) => {
                self.sequence += 1;
                self.ctx.record_client_sent();
            }
            Err(e) => report_socket_error(&self.ctx, &format!("UDP client {}", self.id), &e),
        }
    }

    fn send_control(&self, kind: PacketKind) {
        let packet = create_packet(kind, self.wire_id, 0, &[]);
        if let Err(e) = self.socket.send_to(&packet, self.server) {
            debug!("UDP client {} could not send {:?}: {}", self.id, kind, e);
        }
    }
}
