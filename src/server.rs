//! WebSocket server: accept loop, per-connection pump, idle reset timer.
//!
//! Each accepted connection gets a [`Session`] registered in the hub and a
//! task running a `select!` pump between the socket's inbound frames and the
//! session's outbound queue. All command logic lives in the [`Router`]; the
//! server only moves frames.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::hub::Hub;
use crate::identity::IdentityStore;
use crate::router::{Outcome, Router};
use crate::session::Session;
use crate::store::{ProjectConfig, Storage, StoreError};

/// Floor for the autosave cooldown regardless of configuration.
const AUTOSAVE_COOLDOWN_FLOOR: Duration = Duration::from_secs(60);
/// Margin subtracted from the client autosave interval, so a slightly-early
/// client request still wins the window.
const AUTOSAVE_COOLDOWN_MARGIN: Duration = Duration::from_secs(30);
/// How often the idle timer checks for inactivity.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind a listening socket: {0}")]
    Bind(std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    /// First port to try; bumped on `AddrInUse` until one binds.
    pub port: u16,
    /// Reset all projects after this much inactivity. `None` disables.
    pub reset_delay: Option<Duration>,
    /// Interval at which clients are told to autosave versions.
    pub auto_save_interval: Duration,
    pub projects: Vec<ProjectConfig>,
    pub identity: IdentityStore,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            reset_delay: Some(Duration::from_secs(1800)),
            auto_save_interval: Duration::from_secs(600),
            projects: Vec::new(),
            identity: IdentityStore::default(),
        }
    }
}

impl ServerConfig {
    /// Server-side gate between granted autosaves: a margin under the client
    /// interval, floored so misconfigured clients cannot spin saves.
    pub fn autosave_cooldown(&self) -> Duration {
        self.auto_save_interval
            .saturating_sub(AUTOSAVE_COOLDOWN_MARGIN)
            .max(AUTOSAVE_COOLDOWN_FLOOR)
    }
}

/// The relay server. Owns the router; `run` consumes it.
pub struct RelayServer {
    config: ServerConfig,
    router: Arc<Router>,
}

impl RelayServer {
    /// Load all configured projects and wire up the shared state.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let storage = Storage::new(config.projects.clone())?;
        let hub = Arc::new(Hub::new(&storage.project_ids()));
        let router = Arc::new(Router::new(
            hub,
            Arc::new(Mutex::new(storage)),
            config.identity.clone(),
            config.autosave_cooldown(),
        ));
        Ok(Self { config, router })
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Bind and serve until the process is stopped.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = bind_with_retry(&self.config.host, self.config.port).await?;
        let addr = listener.local_addr().map_err(ServerError::Bind)?;
        log::info!("Listening on ws://{addr}");

        let last_activity = Arc::new(Mutex::new(Instant::now()));

        if let Some(delay) = self.config.reset_delay {
            tokio::spawn(idle_reset_loop(
                self.router.clone(),
                last_activity.clone(),
                delay,
            ));
        }

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    log::warn!("Failed to accept connection: {err}");
                    continue;
                }
            };
            log::info!("Connection from {peer}");
            tokio::spawn(handle_connection(
                self.router.clone(),
                last_activity.clone(),
                stream,
            ));
        }
    }
}

/// Bind the first free port at or above `port`.
async fn bind_with_retry(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let mut port = port;
    loop {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse && port < u16::MAX => {
                log::warn!("Port {port} is in use, trying {}", port + 1);
                port += 1;
            }
            Err(err) => return Err(ServerError::Bind(err)),
        }
    }
}

/// Reset the whole server once no frame has arrived for `delay`.
async fn idle_reset_loop(router: Arc<Router>, last_activity: Arc<Mutex<Instant>>, delay: Duration) {
    let mut ticker = tokio::time::interval(IDLE_CHECK_INTERVAL);
    loop {
        ticker.tick().await;
        let mut last = last_activity.lock().await;
        if last.elapsed() >= delay {
            *last = Instant::now();
            drop(last);
            router.reset_all().await;
        }
    }
}

/// One connection, from handshake to cleanup.
async fn handle_connection(
    router: Arc<Router>,
    last_activity: Arc<Mutex<Instant>>,
    stream: TcpStream,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            log::warn!("WebSocket handshake failed: {err}");
            return;
        }
    };

    let client = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let hub = router.hub().clone();
    hub.register(Session::new(client, tx)).await;
    log::debug!("Client {client} connected");

    let (mut sink, mut inbound) = ws.split();

    loop {
        tokio::select! {
            queued = rx.recv() => {
                // The hub holds the sender, so the queue only closes when
                // the session is removed.
                let Some(raw) = queued else { break };
                if sink.send(Message::Text(raw.into())).await.is_err() {
                    break;
                }
            }
            frame = inbound.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        *last_activity.lock().await = Instant::now();
                        if router.dispatch(client, text.as_str()).await == Outcome::Close {
                            // Flush queued frames (the logout ack among
                            // them), then close the transport.
                            while let Ok(raw) = rx.try_recv() {
                                if sink.send(Message::Text(raw.into())).await.is_err() {
                                    break;
                                }
                            }
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        log::debug!("Client {client} read error: {err}");
                        break;
                    }
                }
            }
        }
    }

    // Disconnect is an implicit logout: peers learn the user left even when
    // no `logout` frame was ever sent.
    hub.unsubscribe_all(client).await;
    let session = hub.remove(client).await;
    if let Some(name) = session.and_then(|session| session.user_name) {
        hub.broadcast_to_all(Some(&name), None, &crate::protocol::logout_frame())
            .await;
        hub.broadcast_users().await;
    }
    log::debug!("Client {client} disconnected");
}
