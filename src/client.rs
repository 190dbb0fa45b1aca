//! WebSocket client for connecting to a relay server.
//!
//! Thin typed wrapper used by tools and integration tests: one task writes
//! queued frames to the socket, one task parses inbound frames into
//! [`ServerEvent`]s delivered over a channel.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{ChangeSet, ProjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

/// Client-side connection failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Not connected")]
    NotConnected,
    #[error("Connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Frames from the server, decoded for the application.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Our `login` was accepted; the server assigned us this id.
    LoggedIn { client_id: Option<Uuid> },
    /// Roster of currently logged-in users.
    Users(Vec<String>),
    /// Projects we may load.
    Projects(Vec<Value>),
    /// Full snapshot after a `dataset` request.
    Dataset { project: ProjectId, dataset: Value },
    /// A change batch committed on a project we subscribe to.
    ProjectChange {
        project: ProjectId,
        revision: String,
        user_name: Option<String>,
        changes: Value,
    },
    /// The project was reset; drop local state and reload.
    Reset { project: ProjectId },
    /// A user logged out (ours carries no name).
    LoggedOut { user_name: Option<String> },
    /// We won the autosave window.
    AutoSaveGranted { project: ProjectId },
    /// Lazily-loaded version content.
    VersionContent {
        project: ProjectId,
        version_id: Value,
        content: Value,
    },
    /// A command of ours was rejected.
    Rejected { command: String, error: String },
    /// The server could not parse something we sent.
    ProtocolError { message: String },
    Disconnected,
    /// A frame this client version does not know.
    Unknown(Value),
}

/// A relay client connection.
pub struct RelayClient {
    server_url: String,
    state: Arc<RwLock<ClientState>>,
    outgoing_tx: Option<mpsc::UnboundedSender<String>>,
    event_rx: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
}

impl RelayClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ClientState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver. Can only be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.event_rx.take()
    }

    pub async fn state(&self) -> ClientState {
        *self.state.read().await
    }

    /// Connect and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        *self.state.write().await = ClientState::Connecting;

        let (ws, _) = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok(connected) => connected,
            Err(err) => {
                *self.state.write().await = ClientState::Disconnected;
                return Err(err.into());
            }
        };
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(raw) = out_rx.recv().await {
                if sink.send(Message::Text(raw.into())).await.is_err() {
                    return;
                }
            }
            // Queue closed: the client was dropped. Tell the server, so it
            // treats us as disconnected rather than silently idle.
            let _ = sink.send(Message::Close(None)).await;
        });

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                            let _ = event_tx.send(decode_event(value));
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *state.write().await = ClientState::Disconnected;
            let _ = event_tx.send(ServerEvent::Disconnected);
        });

        *self.state.write().await = ClientState::Connected;
        Ok(())
    }

    // -- commands -----------------------------------------------------------

    pub fn login(&self, login: &str, password: &str) -> Result<(), ClientError> {
        self.send(json!({ "command": "login", "login": login, "password": password }))
    }

    pub fn logout(&self) -> Result<(), ClientError> {
        self.send(json!({ "command": "logout" }))
    }

    pub fn request_projects(&self) -> Result<(), ClientError> {
        self.send(json!({ "command": "projects" }))
    }

    /// Request the full dataset; this also subscribes us to the project.
    pub fn load_project(&self, project: ProjectId) -> Result<(), ClientError> {
        self.send(json!({ "command": "dataset", "project": project }))
    }

    pub fn reset_project(&self, project: ProjectId) -> Result<(), ClientError> {
        self.send(json!({ "command": "reset", "project": project }))
    }

    pub fn send_changes(
        &self,
        project: ProjectId,
        changes: &ChangeSet,
        local_revision: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut frame = json!({
            "command": "projectChange",
            "project": project,
            "changes": changes,
        });
        if let Some(local) = local_revision {
            frame["localRevision"] = json!(local);
        }
        self.send(frame)
    }

    pub fn request_autosave(&self, project: ProjectId) -> Result<(), ClientError> {
        self.send(json!({ "command": "requestVersionAutoSave", "project": project }))
    }

    pub fn load_version_content(
        &self,
        project: ProjectId,
        version_id: &Value,
    ) -> Result<(), ClientError> {
        self.send(json!({
            "command": "loadVersionContent",
            "project": project,
            "versionId": version_id,
        }))
    }

    /// Queue a raw frame. Available for tests probing edge cases.
    pub fn send(&self, frame: Value) -> Result<(), ClientError> {
        let tx = self.outgoing_tx.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(frame.to_string())
            .map_err(|_| ClientError::NotConnected)
    }
}

fn decode_event(frame: Value) -> ServerEvent {
    let command = frame["command"].as_str().unwrap_or_default();

    if let Some(error) = frame["error"].as_str() {
        return ServerEvent::Rejected {
            command: command.to_string(),
            error: error.to_string(),
        };
    }

    let project = || frame["project"].as_u64().unwrap_or_default();
    match command {
        "login" => ServerEvent::LoggedIn {
            client_id: frame["clientId"]
                .as_str()
                .and_then(|raw| Uuid::parse_str(raw).ok()),
        },
        "users" => ServerEvent::Users(
            frame["users"]
                .as_array()
                .map(|users| {
                    users
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        ),
        "projects" => ServerEvent::Projects(
            frame["projects"].as_array().cloned().unwrap_or_default(),
        ),
        "dataset" => ServerEvent::Dataset {
            project: project(),
            dataset: frame["dataset"].clone(),
        },
        "projectChange" => ServerEvent::ProjectChange {
            project: project(),
            revision: frame["revision"].as_str().unwrap_or_default().to_string(),
            user_name: frame["userName"].as_str().map(str::to_string),
            changes: frame["changes"].clone(),
        },
        "reset" => ServerEvent::Reset { project: project() },
        "logout" => ServerEvent::LoggedOut {
            user_name: frame["userName"].as_str().map(str::to_string),
        },
        "versionAutoSaveOK" => ServerEvent::AutoSaveGranted { project: project() },
        "loadVersionContent" => ServerEvent::VersionContent {
            project: project(),
            version_id: frame["versionId"].clone(),
            content: frame["content"].clone(),
        },
        "error" => ServerEvent::ProtocolError {
            message: frame["message"].as_str().unwrap_or_default().to_string(),
        },
        _ => ServerEvent::Unknown(frame),
    }
}
