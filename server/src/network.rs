//! UDP transport: datagram receive loop, bounded worker pool, response
//! sender task, and per-client snapshot suppression.

use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{CommandKind, Request, Response, ResponseCode, MAX_DATAGRAM_SIZE};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::interval;

use crate::auth::{AuthGateway, SESSION_TTL};
use crate::commands::{Dispatcher, Output};
use crate::error::Result;
use crate::interaction::Interaction;
use crate::persist::Backend;

pub const WORKER_POOL_SIZE: usize = 10;
pub const JOB_QUEUE_CAPACITY: usize = 64;
/// Idle receive timeout; hitting it is logged and the loop keeps listening.
pub const RECEIVE_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
pub const VIEW_TTL: Duration = Duration::from_secs(900);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Raw datagrams handed from the receive loop to the worker pool
#[derive(Debug)]
pub enum InboundMessage {
    Datagram { bytes: Vec<u8>, addr: SocketAddr },
}

/// Encoded responses queued for the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    Reply { bytes: Vec<u8>, addr: SocketAddr },
}

#[derive(Debug)]
struct ClientView {
    version: u64,
    last_seen: Instant,
}

/// Last collection version each client address has received.
///
/// A query from a client whose view matches the current version is answered
/// with the `Unchanged` sentinel instead of a full snapshot. Entries idle
/// past the TTL are evicted by the sweep task.
pub struct Views {
    clients: HashMap<SocketAddr, ClientView>,
    ttl: Duration,
}

impl Views {
    pub fn new(ttl: Duration) -> Self {
        Views {
            clients: HashMap::new(),
            ttl,
        }
    }

    pub fn is_current(&self, addr: SocketAddr, version: u64) -> bool {
        self.clients
            .get(&addr)
            .map(|view| view.version == version)
            .unwrap_or(false)
    }

    pub fn record(&mut self, addr: SocketAddr, version: u64) {
        self.clients.insert(
            addr,
            ClientView {
                version,
                last_seen: Instant::now(),
            },
        );
    }

    pub fn sweep(&mut self) -> Vec<SocketAddr> {
        let ttl = self.ttl;
        let stale: Vec<SocketAddr> = self
            .clients
            .iter()
            .filter(|(_, view)| view.last_seen.elapsed() > ttl)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &stale {
            self.clients.remove(addr);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Everything one request needs: cloned into each pool worker.
#[derive(Clone)]
struct Pipeline {
    dispatcher: Dispatcher,
    auth: AuthGateway,
    interaction: Interaction,
    views: Arc<RwLock<Views>>,
    out_tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Pipeline {
    /// Decode, authorize, execute, encode. Malformed datagrams are dropped
    /// without a response; the client's own retry must cover that case.
    async fn process(&self, bytes: Vec<u8>, addr: SocketAddr) {
        let request: Request = match deserialize(&bytes) {
            Ok(request) => request,
            Err(e) => {
                warn!("dropping malformed datagram from {}: {}", addr, e);
                return;
            }
        };
        debug!("{} from {}", request.kind.name(), addr);

        let response = self.handle(request, addr).await;

        match serialize(&response) {
            Ok(bytes) => {
                if let Err(e) = self.out_tx.send(OutboundMessage::Reply { bytes, addr }) {
                    error!("failed to queue response for {}: {}", addr, e);
                }
            }
            Err(e) => error!("failed to encode response for {}: {}", addr, e),
        }
    }

    async fn handle(&self, request: Request, addr: SocketAddr) -> Response {
        match request.kind {
            CommandKind::Register | CommandKind::Login => self.handle_auth(request, addr).await,
            _ => self.handle_command(request, addr).await,
        }
    }

    async fn handle_auth(&self, request: Request, addr: SocketAddr) -> Response {
        let credentials = match &request.credentials {
            Some(credentials) => credentials,
            None => {
                let mut response = Response::new(ResponseCode::Error);
                response.body = "credentials required".to_string();
                return response;
            }
        };

        let attempt = match request.kind {
            CommandKind::Register => self.auth.register(credentials).await,
            _ => self.auth.login(credentials).await,
        };

        match attempt {
            Ok(token) => {
                let mut response = Response::new(ResponseCode::Ok);
                response.body = format!("authenticated as {}", credentials.username);
                response.token = Some(token);
                let (version, snapshot) = self.interaction.versioned_snapshot().await;
                response.snapshot = Some(snapshot);
                self.views.write().await.record(addr, version);
                response
            }
            Err(e) => {
                warn!("{} from {} failed: {}", request.kind.name(), addr, e);
                let mut response = Response::new(ResponseCode::Error);
                response.body = e.to_string();
                response
            }
        }
    }

    async fn handle_command(&self, request: Request, addr: SocketAddr) -> Response {
        let username = match self.auth.authenticate(request.token).await {
            Ok(username) => username,
            Err(e) => {
                warn!("unauthorized {} from {}: {}", request.kind.name(), addr, e);
                let mut response = Response::new(ResponseCode::Error);
                response.body = e.to_string();
                return response;
            }
        };
        info!("{} executing {}", username, request.kind.name());

        let descriptor = request.kind.descriptor();
        let mut out = Output::new();
        let outcome = self
            .dispatcher
            .dispatch(
                request.kind,
                request.argument.as_deref(),
                request.worker,
                &mut out,
            )
            .await;

        match outcome {
            Ok(()) => {
                let version = self.interaction.version().await;
                let suppressed =
                    descriptor.query_class && self.views.read().await.is_current(addr, version);

                let code = if suppressed {
                    ResponseCode::Unchanged
                } else {
                    ResponseCode::Ok
                };
                let mut response = Response::new(code);
                let (body, body_args) = out.drain();
                response.body = body;
                response.body_args = body_args;

                if !suppressed {
                    let (version, snapshot) = self.interaction.versioned_snapshot().await;
                    response.snapshot = Some(snapshot);
                    self.views.write().await.record(addr, version);
                }
                response
            }
            Err(e) => {
                info!("{} from {} failed: {}", request.kind.name(), addr, e);
                let mut response = Response::new(ResponseCode::Error);
                response.body = e.to_string();
                response
            }
        }
    }
}

/// The transport server: owns the datagram socket and the task set around
/// it (receiver, pool workers, sender, sweeper).
pub struct Server {
    socket: Arc<UdpSocket>,
    pipeline: Pipeline,
    interaction: Interaction,
    backend: Arc<dyn Backend>,
    job_tx: mpsc::Sender<InboundMessage>,
    job_rx: Option<mpsc::Receiver<InboundMessage>>,
    out_rx: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
}

impl Server {
    pub async fn new(
        addr: &str,
        interaction: Interaction,
        backend: Arc<dyn Backend>,
    ) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("server listening on {}", socket.local_addr()?);

        let (job_tx, job_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let auth = AuthGateway::new(Arc::clone(&backend), SESSION_TTL);
        let dispatcher = Dispatcher::new(interaction.clone(), Arc::clone(&backend));
        let pipeline = Pipeline {
            dispatcher,
            auth,
            interaction: interaction.clone(),
            views: Arc::new(RwLock::new(Views::new(VIEW_TTL))),
            out_tx,
        };

        Ok(Server {
            socket,
            pipeline,
            interaction,
            backend,
            job_tx,
            job_rx: Some(job_rx),
            out_rx: Some(out_rx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Spawns the task that blocks on datagram receive and feeds the job
    /// queue. Receive errors never terminate the loop.
    fn spawn_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let job_tx = self.job_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match tokio::time::timeout(RECEIVE_IDLE_TIMEOUT, socket.recv_from(&mut buffer))
                    .await
                {
                    Err(_) => {
                        info!(
                            "no requests for {}s, still listening",
                            RECEIVE_IDLE_TIMEOUT.as_secs()
                        );
                    }
                    Ok(Ok((len, addr))) => {
                        if len >= buffer.len() {
                            // A datagram at the buffer limit was truncated by
                            // the socket and cannot decode; treat as malformed.
                            warn!("dropping oversized datagram from {}", addr);
                            continue;
                        }
                        let message = InboundMessage::Datagram {
                            bytes: buffer[..len].to_vec(),
                            addr,
                        };
                        if job_tx.send(message).await.is_err() {
                            error!("job queue closed, receiver stopping");
                            break;
                        }
                    }
                    Ok(Err(e)) => {
                        error!("error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns the fixed pool of request workers. Each job runs its whole
    /// decode/authorize/execute/encode pipeline to completion independently;
    /// there is no ordering guarantee across requests.
    fn spawn_workers(&mut self) {
        let job_rx = match self.job_rx.take() {
            Some(job_rx) => job_rx,
            None => return,
        };
        let shared_rx = Arc::new(Mutex::new(job_rx));

        for worker_id in 0..WORKER_POOL_SIZE {
            let shared_rx = Arc::clone(&shared_rx);
            let pipeline = self.pipeline.clone();

            tokio::spawn(async move {
                loop {
                    let message = {
                        let mut job_rx = shared_rx.lock().await;
                        job_rx.recv().await
                    };
                    match message {
                        Some(InboundMessage::Datagram { bytes, addr }) => {
                            pipeline.process(bytes, addr).await;
                        }
                        None => break,
                    }
                }
                debug!("request worker {} stopped", worker_id);
            });
        }
    }

    /// Spawns the task draining the outgoing response queue.
    fn spawn_sender(&mut self) {
        let out_rx = match self.out_rx.take() {
            Some(out_rx) => out_rx,
            None => return,
        };
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            let mut out_rx = out_rx;
            while let Some(OutboundMessage::Reply { bytes, addr }) = out_rx.recv().await {
                if let Err(e) = socket.send_to(&bytes, addr).await {
                    error!("failed to send response to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns the task evicting idle client views and expired sessions.
    fn spawn_sweeper(&self) {
        let views = Arc::clone(&self.pipeline.views);
        let auth = self.pipeline.auth.clone();

        tokio::spawn(async move {
            let mut ticker = interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let stale = {
                    let mut views = views.write().await;
                    views.sweep()
                };
                if !stale.is_empty() {
                    debug!("evicted {} idle client views", stale.len());
                }
                let expired = auth.sweep().await;
                if expired > 0 {
                    debug!("evicted {} expired sessions", expired);
                }
            }
        });
    }

    async fn flush(&self) {
        let snapshot = self.interaction.snapshot().await;
        match self.backend.save_collection(&snapshot) {
            Ok(()) => info!("collection saved ({} workers)", snapshot.len()),
            Err(e) => error!("final flush failed: {}", e),
        }
    }

    /// Runs the server until interrupted; a final synchronous flush runs
    /// under the same collection lock as in-flight workers.
    pub async fn run(&mut self) -> Result<()> {
        self.spawn_receiver();
        self.spawn_workers();
        self.spawn_sender();
        self.spawn_sweeper();

        info!("server started");

        tokio::signal::ctrl_c().await?;
        info!("interrupt received, shutting down");
        self.flush().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn test_views_track_per_client_versions() {
        let mut views = Views::new(VIEW_TTL);
        let first = addr(4000);
        let second = addr(4001);

        assert!(!views.is_current(first, 1));

        views.record(first, 1);
        assert!(views.is_current(first, 1));
        assert!(!views.is_current(first, 2));
        // A second client has its own view
        assert!(!views.is_current(second, 1));

        views.record(first, 2);
        assert!(views.is_current(first, 2));
        assert_eq!(views.len(), 1);
    }

    #[test]
    fn test_views_sweep_evicts_idle_entries() {
        let mut views = Views::new(Duration::from_secs(0));
        views.record(addr(4000), 1);
        std::thread::sleep(Duration::from_millis(5));

        let stale = views.sweep();
        assert_eq!(stale, vec![addr(4000)]);
        assert!(views.is_empty());
    }

    #[test]
    fn test_inbound_message_carries_datagram() {
        let message = InboundMessage::Datagram {
            bytes: vec![1, 2, 3],
            addr: addr(5000),
        };
        match message {
            InboundMessage::Datagram { bytes, addr: a } => {
                assert_eq!(bytes, vec![1, 2, 3]);
                assert_eq!(a, addr(5000));
            }
        }
    }

    #[test]
    fn test_outbound_message_carries_reply() {
        let message = OutboundMessage::Reply {
            bytes: vec![9],
            addr: addr(5001),
        };
        match message {
            OutboundMessage::Reply { bytes, addr: a } => {
                assert_eq!(bytes, vec![9]);
                assert_eq!(a, addr(5001));
            }
        }
    }
}
