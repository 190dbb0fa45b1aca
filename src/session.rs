//! Per-connection session state.
//!
//! A [`Session`] is created when the transport connection opens and destroyed
//! when it closes. It is owned by the [`Hub`](crate::hub::Hub) session
//! registry; the connection task only holds the `client_id`.

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ProjectId;

/// State for one connected client.
pub struct Session {
    /// Server-assigned, process-unique, immutable.
    pub client_id: Uuid,
    /// Set by a successful `login`, cleared by logout.
    pub user_name: Option<String>,
    /// At most one subscribed project at any time.
    pub subscribed: Option<ProjectId>,
    /// Outbound frame queue, drained by the connection's writer half.
    tx: mpsc::UnboundedSender<String>,
}

impl Session {
    pub fn new(client_id: Uuid, tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            client_id,
            user_name: None,
            subscribed: None,
            tx,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_name.is_some()
    }

    /// Queue one frame for delivery. A send error only means the connection
    /// is already tearing down; the frame is dropped.
    pub fn send(&self, frame: &Value) {
        let raw = frame.to_string();
        log::debug!(">>> {raw}, to: {:?}", self.user_name);
        let _ = self.tx.send(raw);
    }
}
