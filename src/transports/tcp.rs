//! Reliable echo transport over TCP.
//!
//! The server accepts connections on a tokio task and serves every
//! connection on a task of its own. Messages are fixed-size frames of
//! `message_size` bytes, so both sides count complete frames by byte totals.
//! Each connection writes from a separate task fed by a queue, so a full
//! in-flight window never leaves both ends blocked on writes.

use super::{resolve_endpoint, runtime, BoundAddress};
use crate::config::Transmission;
use crate::context::BenchmarkContext;
use crate::transport::{BenchmarkClient, BenchmarkServer, Transport};
use crate::{Error, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

const RECONNECT_INTERVAL: Duration = Duration::from_millis(100);
const MIN_READ_BUFFER: usize = 16 * 1024;

/// Echo transport over TCP streams.
#[derive(Default)]
pub struct TcpTransport {
    bound: BoundAddress,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

fn require_reliable(ctx: &BenchmarkContext) -> Result<()> {
    if ctx.setup().transmission == Transmission::Reliable {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "TCP cannot provide {} transmission",
            ctx.setup().transmission
        )))
    }
}

impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn create_server(&self, ctx: BenchmarkContext) -> Result<Arc<dyn BenchmarkServer>> {
        require_reliable(&ctx)?;
        Ok(Arc::new(TcpServer {
            ctx,
            bound: self.bound.clone(),
            token: CancellationToken::new(),
            accept_task: Mutex::new(None),
            connections: Arc::new(AtomicUsize::new(0)),
            disposed: AtomicBool::new(false),
        }))
    }

    fn create_client(&self, id: usize, ctx: BenchmarkContext) -> Result<Arc<dyn BenchmarkClient>> {
        require_reliable(&ctx)?;
        Ok(Arc::new(TcpClient {
            id,
            ctx,
            bound: self.bound.clone(),
            token: CancellationToken::new(),
            commands: Mutex::new(None),
            task: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            disposed: AtomicBool::new(false),
        }))
    }
}

/// Reports a failure of a connection task.
///
/// Failures outside preparing and running are teardown noise.
fn report_failure(ctx: &BenchmarkContext, peer: &str, e: &Error) {
    if ctx.phase().is_active() {
        warn!("{} failed: {}", peer, e);
        ctx.record_error();
    } else {
        debug!("{} closed with: {}", peer, e);
    }
}

fn read_buffer_size(message_size: usize) -> usize {
    message_size.max(MIN_READ_BUFFER)
}

struct TcpServer {
    ctx: BenchmarkContext,
    bound: BoundAddress,
    token: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    connections: Arc<AtomicUsize>,
    disposed: AtomicBool,
}

impl BenchmarkServer for TcpServer {
    fn start_server(&self) -> Result<()> {
        let handle = runtime("TCP server")?;
        let _guard = handle.enter();

        let addr = resolve_endpoint(self.ctx.setup())?;
        let std_listener = std::net::TcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let local = std_listener.local_addr()?;
        let listener = TcpListener::from_std(std_listener)?;

        self.bound.set(local);
        info!("TCP server listening on {}", local);

        let task = handle.spawn(accept_loop(
            listener,
            self.ctx.clone(),
            self.token.clone(),
            Arc::clone(&self.connections),
        ));
        *self.accept_task.lock() = Some(task);
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.accept_task.lock().is_some()
    }

    fn stop_server(&self) -> Result<()> {
        self.token.cancel();
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        let accepting = self
            .accept_task
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished());
        !accepting && self.connections.load(Ordering::Acquire) == 0
    }

    fn dispose(&self) -> Result<()> {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.token.cancel();
            self.bound.clear();
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: BenchmarkContext,
    token: CancellationToken,
    connections: Arc<AtomicUsize>,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    connections.fetch_add(1, Ordering::AcqRel);

                    let ctx = ctx.clone();
                    let token = token.clone();
                    let connections = Arc::clone(&connections);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, &ctx, &token).await {
                            report_failure(&ctx, &format!("Connection from {}", peer), &e);
                        }
                        connections.fetch_sub(1, Ordering::AcqRel);
                    });
                }
                Err(e) => report_failure(&ctx, "TCP accept", &Error::from(e)),
            },
        }
    }
    debug!("TCP accept loop exited");
}

async fn serve_connection(
    stream: TcpStream,
    ctx: &BenchmarkContext,
    token: &CancellationToken,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let size = ctx.setup().message_size;
    let (mut reader, writer) = stream.into_split();
    let (echoes, queue) = mpsc::unbounded_channel();
    let connection = token.child_token();

    let sent_ctx = ctx.clone();
    let writer = tokio::spawn(write_frames(
        writer,
        ctx.setup().message(),
        queue,
        connection.clone(),
        move || {
            sent_ctx.record_server_sent();
        },
    ));

    let mut buf = vec![0u8; read_buffer_size(size)];
    let mut pending = 0usize;
    let read = async {
        loop {
            let n = tokio::select! {
                _ = connection.cancelled() => break,
                read = reader.read(&mut buf) => read?,
            };
            if n == 0 {
                break;
            }

            pending += n;
            while pending >= size {
                pending -= size;
                if ctx.record_server_received() {
                    let _ = echoes.send(());
                }
            }
        }
        Ok::<(), Error>(())
    }
    .await;

    connection.cancel();
    drop(echoes);
    let written = join_writer(writer).await;
    read.and(written)
}

/// Writes one frame per queued request until the queue closes or the
/// connection is cancelled.
async fn write_frames<F>(
    mut writer: OwnedWriteHalf,
    message: Vec<u8>,
    mut queue: UnboundedReceiver<()>,
    connection: CancellationToken,
    on_sent: F,
) -> Result<()>
where
    F: Fn() + Send + 'static,
{
    let result = async {
        loop {
            tokio::select! {
                _ = connection.cancelled() => break,
                next = queue.recv() => if next.is_none() {
                    break;
                },
            }
            tokio::select! {
                _ = connection.cancelled() => break,
                written = writer.write_all(&message) => written?,
            }
            on_sent();
        }
        Ok::<(), Error>(())
    }
    .await;

    if result.is_err() {
        connection.cancel();
    }
    let _ = writer.shutdown().await;
    result
}

async fn join_writer(writer: JoinHandle<Result<()>>) -> Result<()> {
    writer
        .await
        .map_err(|e| Error::Connection(format!("writer task failed: {}", e)))?
}

#[derive(Debug)]
enum Command {
    StartBenchmark,
    StopBenchmark,
    Disconnect,
}

struct TcpClient {
    id: usize,
    ctx: BenchmarkContext,
    bound: BoundAddress,
    token: CancellationToken,
    commands: Mutex<Option<UnboundedSender<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
    disposed: AtomicBool,
}

impl TcpClient {
    fn send(&self, command: Command) {
        if let Some(commands) = self.commands.lock().as_ref() {
            if commands.send(command).is_err() {
                debug!("Client {} is no longer running", self.id);
            }
        }
    }

    fn task_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }
}

impl BenchmarkClient for TcpClient {
    fn id(&self) -> usize {
        self.id
    }

    fn start_client(&self) -> Result<()> {
        Ok(())
    }

    fn connect_client(&self) -> Result<()> {
        let handle = runtime("TCP client")?;
        let addr = self.bound.resolve(self.ctx.setup())?;
        let (tx, rx) = mpsc::unbounded_channel();

        let task = handle.spawn(run_client(
            self.id,
            addr,
            self.ctx.clone(),
            rx,
            Arc::clone(&self.connected),
            self.token.clone(),
        ));
        *self.commands.lock() = Some(tx);
        *self.task.lock() = Some(task);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn start_benchmark(&self) {
        self.send(Command::StartBenchmark);
    }

    fn stop_benchmark(&self) {
        self.send(Command::StopBenchmark);
    }

    fn disconnect_client(&self) -> Result<()> {
        self.send(Command::Disconnect);
        Ok(())
    }

    fn stop_client(&self) -> Result<()> {
        self.token.cancel();
        Ok(())
    }

    fn dispose(&self) -> Result<()> {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.token.cancel();
            self.commands.lock().take();
        }
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire) && !self.task_running()
    }
}

async fn run_client(
    id: usize,
    addr: SocketAddr,
    ctx: BenchmarkContext,
    commands: UnboundedReceiver<Command>,
    connected: Arc<AtomicBool>,
    token: CancellationToken,
) {
    if let Err(e) = client_session(id, addr, &ctx, commands, &connected, &token).await {
        report_failure(&ctx, &format!("Client {}", id), &e);
    }
    connected.store(false, Ordering::Release);
}

async fn connect_with_retry(
    id: usize,
    addr: SocketAddr,
    token: &CancellationToken,
) -> Option<TcpStream> {
    loop {
        tokio::select! {
            _ = token.cancelled() => return None,
            attempt = TcpStream::connect(addr) => match attempt {
                Ok(stream) => return Some(stream),
                Err(e) => debug!("Client {} cannot reach {} yet: {}", id, addr, e),
            }
        }
        tokio::select! {
            _ = token.cancelled() => return None,
            _ = time::sleep(RECONNECT_INTERVAL) => {}
        }
    }
}

async fn client_session(
    id: usize,
    addr: SocketAddr,
    ctx: &BenchmarkContext,
    mut commands: UnboundedReceiver<Command>,
    connected: &AtomicBool,
    token: &CancellationToken,
) -> Result<()> {
    let Some(stream) = connect_with_retry(id, addr, token).await else {
        return Ok(());
    };
    stream.set_nodelay(true)?;
    connected.store(true, Ordering::Release);
    debug!("Client {} connected to {}", id, addr);

    let size = ctx.setup().message_size;
    let (mut reader, writer) = stream.into_split();
    let (sends, queue) = mpsc::unbounded_channel();
    let connection = token.child_token();

    let sent_ctx = ctx.clone();
    let writer = tokio::spawn(write_frames(
        writer,
        ctx.setup().message(),
        queue,
        connection.clone(),
        move || {
            sent_ctx.record_client_sent();
        },
    ));

    let mut buf = vec![0u8; read_buffer_size(size)];
    let mut pending = 0usize;
    let mut benchmarking = false;
    let read = async {
        loop {
            tokio::select! {
                _ = connection.cancelled() => break,
                command = commands.recv() => match command {
                    Some(Command::StartBenchmark) => {
                        benchmarking = true;
                        for _ in 0..ctx.setup().parallel_messages {
                            let _ = sends.send(());
                        }
                    }
                    Some(Command::StopBenchmark) => benchmarking = false,
                    Some(Command::Disconnect) | None => break,
                },
                read = reader.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Err(Error::Connection(format!(
                            "server closed the connection of client {}",
                            id
                        )));
                    }
                    pending += n;
                    while pending >= size {
                        pending -= size;
                        if benchmarking && ctx.record_client_received() {
                            let _ = sends.send(());
                        }
                    }
                }
            }
        }
        Ok::<(), Error>(())
    }
    .await;

    connected.store(false, Ordering::Release);
    connection.cancel();
    drop(sends);
    let written = join_writer(writer).await;
    read.and(written)
}
