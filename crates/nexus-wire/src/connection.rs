//! Connection lifecycle: connect with retry, teardown, and background tasks.
//!
//! A [`Connection`] owns the live [`PacketTransport`] and every background
//! task it spawns. The task registry belongs to the instance, so unrelated
//! connections never share threads of execution.

use crate::assembler::Utf8Assembler;
use crate::codec::{DEFAULT_PACKET_SIZE, PacketCodec};
use crate::error::{Result, WireError};
use crate::transport::{FragmentStream, PacketTransport, Step, StepReader, Transport, fragment_stream};
use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::sync::{Arc, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default delay between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Name of the task spawned by [`Connection::start`].
pub const CONNECTION_TASK: &str = "Connection task";

/// Connection settings shared by both ends out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Packet size in bytes.
    pub packet_size: usize,
    /// How long to wait after a refused connection before trying again.
    pub retry_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live stream.
    Disconnected,
    /// A connect loop is running.
    Connecting,
    /// A live stream is available.
    Connected,
    /// [`Connection::stop`] is tearing everything down.
    Stopping,
}

/// Opens the underlying byte stream.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The stream type produced on success.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Makes one connection attempt.
    async fn connect(&self) -> io::Result<Self::Stream>;

    /// Human-readable endpoint, used in logs.
    fn endpoint(&self) -> String;
}

/// Connects to a TCP host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    /// Creates a connector for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct TaskEntry {
    name: String,
    handle: JoinHandle<()>,
}

type Slot<S> = Arc<Mutex<Option<PacketTransport<S>>>>;

struct Shared<C: Connector> {
    connector: C,
    config: ConnectionConfig,
    transport: Slot<C::Stream>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    // Cancelled on disconnect to wake any in-flight read; replaced on connect.
    teardown: std::sync::Mutex<CancellationToken>,
    tasks: std::sync::Mutex<Vec<TaskEntry>>,
}

/// Manages one connection and the background tasks that serve it.
///
/// `Connection` is cheap to clone; clones share the same stream, state, and
/// task registry. It implements [`Transport`], so a client can send and
/// receive through it without touching the socket.
///
/// # Examples
///
/// ```no_run
/// use nexus_wire::{Connection, ConnectionConfig, TcpConnector, Transport};
///
/// # async fn example() -> nexus_wire::Result<()> {
/// let mut connection = Connection::new(
///     TcpConnector::new("localhost", 50006),
///     ConnectionConfig::default(),
/// )?;
/// connection.start();
/// connection.wait_connected().await?;
///
/// connection.send_message("{\"prompt\": \"hi\"}").await?;
/// let reply = connection.receive_text().await?;
/// println!("{}", reply);
///
/// connection.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Connection<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for Connection<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.shared.connector.endpoint())
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .field("tasks", &self.task_count())
            .finish()
    }
}

impl<C: Connector> Connection<C> {
    /// Creates a disconnected manager.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidPacketSize`] if the packet size is zero.
    pub fn new(connector: C, config: ConnectionConfig) -> Result<Self> {
        PacketCodec::new(config.packet_size)?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            shared: Arc::new(Shared {
                connector,
                config,
                transport: Arc::new(Mutex::new(None)),
                state,
                shutdown: CancellationToken::new(),
                teardown: std::sync::Mutex::new(CancellationToken::new()),
                tasks: std::sync::Mutex::new(Vec::new()),
            }),
        })
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Returns true if a live stream is available.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Returns the connection settings.
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Returns the connector.
    pub fn connector(&self) -> &C {
        &self.shared.connector
    }

    /// Returns how many spawned tasks have not been joined yet.
    pub fn task_count(&self) -> usize {
        self.lock_tasks().len()
    }

    /// Establishes the stream, retrying refused connections until success
    /// or [`Connection::stop`].
    ///
    /// Blocks the calling task while it retries, so it is normally run in
    /// the background through [`Connection::start`].
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Stopped`] if the manager is stopped while
    /// waiting, or [`WireError::Io`] for failures other than a refusal.
    pub async fn connect(&self) -> Result<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(WireError::Stopped);
        }
        if self.shared.transport.lock().await.is_some() {
            debug!("Already connected to {}", self.shared.connector.endpoint());
            self.set_state(ConnectionState::Connected);
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        let endpoint = self.shared.connector.endpoint();
        let delay = self.shared.config.retry_delay;

        loop {
            let attempt = tokio::select! {
                result = self.shared.connector.connect() => result,
                _ = self.shared.shutdown.cancelled() => return Err(WireError::Stopped),
            };

            match attempt {
                Ok(stream) => {
                    let transport = PacketTransport::new(stream, self.shared.config.packet_size)?;
                    return self.install(transport, &endpoint).await;
                }
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    warn!(
                        "Connection to {} refused. Retrying in {:?}...",
                        endpoint, delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shared.shutdown.cancelled() => return Err(WireError::Stopped),
                    }
                }
                Err(e) => {
                    error!("Failed to connect to {}: {}", endpoint, e);
                    self.set_state(ConnectionState::Disconnected);
                    return Err(WireError::Io(e));
                }
            }
        }
    }

    // Stores a freshly opened stream unless stop() or a concurrent connect
    // got there first. The slot lock is held across the check and the store.
    async fn install(
        &self,
        transport: PacketTransport<C::Stream>,
        endpoint: &str,
    ) -> Result<()> {
        let mut slot = self.shared.transport.lock().await;

        if self.shared.shutdown.is_cancelled() {
            drop(slot);
            close_stream(transport).await;
            debug!("Discarded stream to {} opened during stop", endpoint);
            return Err(WireError::Stopped);
        }
        if slot.is_some() {
            drop(slot);
            close_stream(transport).await;
            debug!("Discarded duplicate stream to {}", endpoint);
            self.set_state(ConnectionState::Connected);
            return Ok(());
        }

        *self.lock_teardown() = CancellationToken::new();
        *slot = Some(transport);
        drop(slot);
        self.set_state(ConnectionState::Connected);
        info!("Connected to {}", endpoint);
        Ok(())
    }

    /// Closes the stream. Calling it while disconnected does nothing.
    ///
    /// A read in flight on another task ends with
    /// [`WireError::ConnectionClosed`].
    pub async fn disconnect(&self) {
        self.lock_teardown().cancel();

        let previous = self.shared.transport.lock().await.take();
        match previous {
            Some(transport) => {
                close_stream(transport).await;
                info!("Disconnected from {}", self.shared.connector.endpoint());
            }
            None => debug!("Disconnect requested while not connected"),
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Disconnects, then connects again on the calling task.
    ///
    /// No new background task is spawned.
    pub async fn reconnect(&self) -> Result<()> {
        info!("Reconnecting to {}", self.shared.connector.endpoint());
        self.disconnect().await;
        self.connect().await
    }

    /// Spawns the background task that runs [`Connection::connect`] and
    /// returns immediately.
    ///
    /// Must be called from within a Tokio runtime. Does nothing once the
    /// manager has been stopped.
    pub fn start(&self) {
        if self.shared.shutdown.is_cancelled() {
            warn!("Connection already stopped; not starting");
            return;
        }

        self.set_state(ConnectionState::Connecting);
        let connection = self.clone();
        self.spawn_task(CONNECTION_TASK, async move {
            match connection.connect().await {
                Ok(()) => {}
                Err(WireError::Stopped) => debug!("Connect loop stopped"),
                Err(e) => error!("Connection task failed: {}", e),
            }
        });
    }

    /// Spawns a named task and records it so [`Connection::stop`] joins it.
    pub fn spawn_task<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!("Spawning task {}", name);
        let handle = tokio::spawn(task);
        self.lock_tasks().push(TaskEntry { name, handle });
    }

    /// Waits until a pending connect finishes.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Stopped`] if the manager is stopping, or
    /// [`WireError::NotConnected`] if the connect loop gave up or was never
    /// started.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.shared.state.subscribe();
        let state = *rx
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map_err(|_| WireError::Stopped)?;

        match state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Stopping => Err(WireError::Stopped),
            _ => Err(WireError::NotConnected),
        }
    }

    /// Disconnects and joins every task this manager spawned, in spawn
    /// order.
    ///
    /// Tasks that already finished are joined without waiting. Returns only
    /// after all of them are done.
    pub async fn stop(&self) {
        self.shared.state.send_replace(ConnectionState::Stopping);
        self.shared.shutdown.cancel();
        self.disconnect().await;

        info!("Stopping connection tasks...");
        loop {
            let batch = std::mem::take(&mut *self.lock_tasks());
            if batch.is_empty() {
                break;
            }

            let total = batch.len();
            for (index, TaskEntry { name, handle }) in batch.into_iter().enumerate() {
                info!("{} of {} Stopping task {}", index + 1, total, name);
                if handle.is_finished() {
                    debug!("Task {} not running", name);
                }
                match handle.await {
                    Ok(()) => {}
                    Err(e) if e.is_panic() => warn!("Task {} panicked", name),
                    Err(e) => warn!("Task {} did not complete: {}", name, e),
                }
                info!("Stopped task {}...", name);
            }
        }
        info!("All tasks stopped");

        self.shared.state.send_replace(ConnectionState::Disconnected);
    }

    fn set_state(&self, next: ConnectionState) {
        self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Stopping || *state == next {
                return false;
            }
            debug!("Connection state {:?} -> {:?}", state, next);
            *state = next;
            true
        });
    }

    fn lock_teardown(&self) -> MutexGuard<'_, CancellationToken> {
        self.shared
            .teardown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<TaskEntry>> {
        self.shared
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn close_stream<S>(transport: PacketTransport<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut stream = transport.into_inner();
    if let Err(e) = stream.shutdown().await {
        debug!("Error while shutting down stream: {}", e);
    }
}

/// Reads from the live transport, holding it for the whole message.
struct LiveReader<S> {
    slot: Slot<S>,
    guard: Option<OwnedMutexGuard<Option<PacketTransport<S>>>>,
    teardown: CancellationToken,
}

#[async_trait]
impl<S> StepReader for LiveReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn next_step(&mut self, asm: &mut Utf8Assembler) -> Result<Step> {
        if self.guard.is_none() {
            let slot = Arc::clone(&self.slot);
            let guard = tokio::select! {
                guard = slot.lock_owned() => guard,
                _ = self.teardown.cancelled() => return Err(WireError::ConnectionClosed),
            };
            self.guard = Some(guard);
        }

        let transport = self
            .guard
            .as_deref_mut()
            .and_then(Option::as_mut)
            .ok_or(WireError::NotConnected)?;

        tokio::select! {
            step = transport.read_step(asm) => step,
            _ = self.teardown.cancelled() => {
                warn!("Connection closed while receiving");
                Err(WireError::ConnectionClosed)
            }
        }
    }
}

#[async_trait]
impl<C: Connector> Transport for Connection<C> {
    async fn send_message(&mut self, text: &str) -> Result<()> {
        let mut slot = self.shared.transport.lock().await;
        let transport = slot.as_mut().ok_or_else(|| {
            warn!("Cannot send: not connected to {}", self.shared.connector.endpoint());
            WireError::NotConnected
        })?;
        transport.send_message(text).await
    }

    fn receive_message(&mut self) -> FragmentStream<'_> {
        let teardown = self.lock_teardown().clone();
        fragment_stream(LiveReader {
            slot: Arc::clone(&self.shared.transport),
            guard: None,
            teardown,
        })
    }
}
