//! Listener lifecycle and accept loop shared by both forwarders

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::relay::relay;
use crate::error::{ForwardError, Result};
use crate::net::{free_port, LOCALHOST};
use crate::transport::Connector;

/// Delay before accepting again after a failed accept
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Statistics for a listener
#[derive(Debug, Clone, Default)]
pub struct ForwardStats {
    /// Total connections dispatched
    pub connection_count: u64,
    /// Connections currently being forwarded
    pub active_connections: u64,
    /// Total bytes sent (client -> remote)
    pub bytes_sent: u64,
    /// Total bytes received (remote -> client)
    pub bytes_received: u64,
}

/// Invoked synchronously for every accepted connection before dispatch.
///
/// The hook takes ownership of the stream and hands it back to let the
/// connection through. On error the stream stays with the hook, which
/// decides when to close it; the accept loop keeps running.
pub trait ConnectHook: Send + Sync + 'static {
    fn on_connect(&self, stream: TcpStream) -> Result<TcpStream>;
}

impl<F> ConnectHook for F
where
    F: Fn(TcpStream) -> Result<TcpStream> + Send + Sync + 'static,
{
    fn on_connect(&self, stream: TcpStream) -> Result<TcpStream> {
        self(stream)
    }
}

/// Source of inbound connections for the accept loop
#[async_trait]
trait Incoming: Send + Sync + 'static {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Incoming for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

struct AcceptTask {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// A local listener that forwards every accepted connection through `C`
pub struct Listener<C: Connector> {
    connector: Arc<C>,
    port: AtomicU16,
    /// Set once by `close`, never reset
    closing: Arc<AtomicBool>,
    hook: Option<Arc<dyn ConnectHook>>,
    max_connections: Option<usize>,
    stats: Arc<RwLock<ForwardStats>>,
    /// Present exactly between a successful start and close
    accept: Mutex<Option<AcceptTask>>,
}

impl<C: Connector> Listener<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            port: AtomicU16::new(0),
            closing: Arc::new(AtomicBool::new(false)),
            hook: None,
            max_connections: None,
            stats: Arc::new(RwLock::new(ForwardStats::default())),
            accept: Mutex::new(None),
        }
    }

    /// Cap the number of connections forwarded at once.
    ///
    /// Unbounded by default, and 0 also means unbounded. When the cap is
    /// reached the accept loop stops accepting until a forwarded connection
    /// finishes.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = (max > 0).then_some(max);
        self
    }

    /// Install the connection-accepted hook, replacing any previous one.
    /// Takes effect on the next `start`.
    pub fn on_client_connect(&mut self, hook: impl ConnectHook) {
        self.hook = Some(Arc::new(hook));
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Bind the wildcard address on `port` (a free port when 0) and start
    /// accepting in the background.
    pub async fn start(&self, port: u16) -> Result<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(ForwardError::Closed);
        }
        if self.accept.lock().is_some() {
            return Err(ForwardError::AlreadyStarted(self.port()));
        }

        let port = if port == 0 { free_port()? } else { port };
        let addr = format!("{}:{}", LOCALHOST, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ForwardError::Bind {
                addr: addr.clone(),
                source,
            })?;

        let mut slot = self.accept.lock();
        if slot.is_some() {
            return Err(ForwardError::AlreadyStarted(self.port()));
        }
        if self.closing.load(Ordering::SeqCst) {
            return Err(ForwardError::Closed);
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        let accept_loop = AcceptLoop {
            listener,
            connector: self.connector.clone(),
            closing: self.closing.clone(),
            hook: self.hook.clone(),
            limit: self.max_connections.map(|n| Arc::new(Semaphore::new(n))),
            stats: self.stats.clone(),
        };
        let task = tokio::spawn(accept_loop.run(stop_rx));

        self.port.store(port, Ordering::SeqCst);
        *slot = Some(AcceptTask { stop_tx, task });

        info!(
            "Listening on {} -> {}",
            addr,
            self.connector.target()
        );
        Ok(())
    }

    /// Port in use; 0 before a successful start
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ForwardStats {
        self.stats.read().clone()
    }

    /// Stop accepting and release the listening socket.
    ///
    /// Idempotent. Connections already being forwarded are not tracked and
    /// run until their peers disconnect.
    pub async fn close(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        let accept = self.accept.lock().take();
        let Some(AcceptTask { stop_tx, task }) = accept else {
            return Ok(());
        };

        // Full or closed both mean the loop is already on its way out
        let _ = stop_tx.try_send(());
        drop(stop_tx);

        if let Err(e) = task.await {
            if e.is_panic() {
                error!("Accept loop on port {} panicked", self.port());
            }
        }
        debug!("Listener on port {} closed", self.port());
        Ok(())
    }
}

impl<C: Connector> Drop for Listener<C> {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(accept) = self.accept.get_mut().take() {
            accept.task.abort();
        }
    }
}

struct AcceptLoop<C: Connector, L = TcpListener> {
    listener: L,
    connector: Arc<C>,
    closing: Arc<AtomicBool>,
    hook: Option<Arc<dyn ConnectHook>>,
    limit: Option<Arc<Semaphore>>,
    stats: Arc<RwLock<ForwardStats>>,
}

impl<C: Connector, L: Incoming> AcceptLoop<C, L> {
    async fn run(self, mut stop_rx: mpsc::Receiver<()>) {
        loop {
            let permit = match &self.limit {
                Some(limit) => tokio::select! {
                    _ = stop_rx.recv() => break,
                    permit = limit.clone().acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                },
                None => None,
            };

            tokio::select! {
                _ = stop_rx.recv() => break,

                accept_result = self.listener.accept() => match accept_result {
                    Ok((stream, peer_addr)) => {
                        if self.closing.load(Ordering::SeqCst) {
                            break;
                        }
                        self.dispatch(stream, peer_addr, permit);
                    }
                    Err(e) => {
                        if self.closing.load(Ordering::SeqCst) {
                            break;
                        }
                        error!("Accept error: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
        }

        debug!("Accept loop for {} exited", self.connector.target());
    }

    fn dispatch(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        let stream = match &self.hook {
            Some(hook) => match hook.on_connect(stream) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Connection from {} rejected: {}", peer_addr, e);
                    return;
                }
            },
            None => stream,
        };

        debug!("Accepted connection from {}", peer_addr);
        {
            let mut s = self.stats.write();
            s.connection_count += 1;
            s.active_connections += 1;
        }

        let connector = self.connector.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            let _permit = permit;
            forward_connection(connector.as_ref(), stream, peer_addr, stats.clone()).await;

            let mut s = stats.write();
            s.active_connections = s.active_connections.saturating_sub(1);
        });
    }
}

async fn forward_connection<C: Connector>(
    connector: &C,
    inbound: TcpStream,
    peer_addr: SocketAddr,
    stats: Arc<RwLock<ForwardStats>>,
) {
    let outbound = match connector.connect().await {
        Ok(outbound) => outbound,
        Err(e) => {
            error!(
                "Failed to forward connection from {} to {}: {}",
                peer_addr,
                connector.target(),
                e
            );
            return;
        }
    };

    info!("successfully forwarding connection to `{}`", connector.target());
    if let Err(e) = relay(inbound, outbound, stats).await {
        error!("Relay for {} ended with error: {}", peer_addr, e);
    }
}
