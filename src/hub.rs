//! Connection hub: session registry, project subscriptions, revision log
//! and broadcast fan-out.
//!
//! Lock order is `projects` before `sessions`; any method taking both takes
//! them in that order. Sends are unbounded-channel pushes, so broadcasting
//! while holding either lock never blocks on a slow client.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::protocol::{self, ChangeSet, ProjectId};
use crate::session::Session;

/// One committed change batch in a project's revision log.
#[derive(Debug, Clone)]
pub struct RevisionRecord {
    /// Server-assigned, strictly increasing per project: `server-1`, ...
    pub revision: String,
    /// The client's own revision marker, echoed verbatim.
    pub local_revision: Option<String>,
    /// Originating connection.
    pub client: Uuid,
    pub changes: ChangeSet,
}

/// Per-project collaboration state.
#[derive(Debug, Default)]
struct ProjectState {
    subscribers: HashSet<Uuid>,
    revision_seq: u64,
    revisions: Vec<RevisionRecord>,
    autosave_last: Option<Instant>,
}

impl ProjectState {
    /// Back to just-started: empty log, sequence reseeded.
    fn reset(&mut self) {
        self.revision_seq = 0;
        self.revisions.clear();
        self.autosave_last = None;
    }
}

/// Shared state connecting all live sessions.
pub struct Hub {
    projects: Mutex<HashMap<ProjectId, ProjectState>>,
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl Hub {
    pub fn new(project_ids: &[ProjectId]) -> Self {
        let projects = project_ids
            .iter()
            .map(|id| (*id, ProjectState::default()))
            .collect();
        Self {
            projects: Mutex::new(projects),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    // -- session registry ---------------------------------------------------

    pub async fn register(&self, session: Session) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.client_id, session);
    }

    pub async fn remove(&self, client: Uuid) -> Option<Session> {
        self.sessions.write().await.remove(&client)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn send_to(&self, client: Uuid, frame: &Value) {
        if let Some(session) = self.sessions.read().await.get(&client) {
            session.send(frame);
        }
    }

    pub async fn set_user_name(&self, client: Uuid, name: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(&client) {
            session.user_name = Some(name.to_string());
        }
    }

    /// Clear and return the session's user name, if it had one.
    pub async fn clear_user_name(&self, client: Uuid) -> Option<String> {
        self.sessions
            .write()
            .await
            .get_mut(&client)
            .and_then(|session| session.user_name.take())
    }

    pub async fn user_name(&self, client: Uuid) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(&client)
            .and_then(|session| session.user_name.clone())
    }

    pub async fn is_authenticated(&self, client: Uuid) -> bool {
        self.sessions
            .read()
            .await
            .get(&client)
            .is_some_and(Session::is_authenticated)
    }

    /// Names of all logged-in users, sorted for stable `users` frames.
    pub async fn authenticated_users(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut users: Vec<String> = sessions
            .values()
            .filter_map(|session| session.user_name.clone())
            .collect();
        users.sort();
        users
    }

    // -- subscriptions ------------------------------------------------------

    /// Subscribe `client` to `project`, leaving any previous subscription.
    /// A session is subscribed to at most one project.
    pub async fn subscribe(&self, client: Uuid, project: ProjectId) {
        let mut projects = self.projects.lock().await;
        for state in projects.values_mut() {
            state.subscribers.remove(&client);
        }
        if let Some(state) = projects.get_mut(&project) {
            state.subscribers.insert(client);
        }
        drop(projects);

        if let Some(session) = self.sessions.write().await.get_mut(&client) {
            session.subscribed = Some(project);
        }
    }

    pub async fn unsubscribe_all(&self, client: Uuid) {
        let mut projects = self.projects.lock().await;
        for state in projects.values_mut() {
            state.subscribers.remove(&client);
        }
        drop(projects);

        if let Some(session) = self.sessions.write().await.get_mut(&client) {
            session.subscribed = None;
        }
    }

    pub async fn is_subscribed(&self, client: Uuid, project: ProjectId) -> bool {
        self.projects
            .lock()
            .await
            .get(&project)
            .is_some_and(|state| state.subscribers.contains(&client))
    }

    // -- broadcast ----------------------------------------------------------

    /// Send `frame` to every logged-in session except `exclude`, with the
    /// sender's `userName` attached when known. Sessions that have not
    /// authenticated yet receive no broadcast traffic at all.
    pub async fn broadcast_to_all(
        &self,
        from_name: Option<&str>,
        exclude: Option<Uuid>,
        frame: &Value,
    ) {
        let frame = with_user_name(frame, from_name);
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            if session.is_authenticated() && Some(session.client_id) != exclude {
                session.send(&frame);
            }
        }
    }

    /// Send `frame` to every subscriber of `project` except `exclude`.
    pub async fn broadcast_to_subscribers(
        &self,
        from_name: Option<&str>,
        exclude: Option<Uuid>,
        project: ProjectId,
        frame: &Value,
    ) {
        let projects = self.projects.lock().await;
        let Some(state) = projects.get(&project) else {
            return;
        };
        let frame = with_user_name(frame, from_name);
        let sessions = self.sessions.read().await;
        for client in &state.subscribers {
            if Some(*client) != exclude {
                if let Some(session) = sessions.get(client) {
                    session.send(&frame);
                }
            }
        }
    }

    /// Send the current `users` roster to every session.
    pub async fn broadcast_users(&self) {
        let users = self.authenticated_users().await;
        self.broadcast_to_all(None, None, &protocol::users_frame(&users))
            .await;
    }

    /// Append a reconciled batch to the project's revision log and fan it
    /// out to subscribers, atomically: the lock is held across sequence
    /// bump, log append and send, so broadcast order always matches
    /// revision order.
    ///
    /// The sender is included when the batch created new records (it needs
    /// the permanent ids), excluded otherwise.
    pub async fn commit_and_broadcast(
        &self,
        project: ProjectId,
        sender: Uuid,
        sender_name: Option<&str>,
        local_revision: Option<&str>,
        changes: &ChangeSet,
        include_sender: bool,
    ) -> String {
        let mut projects = self.projects.lock().await;
        let Some(state) = projects.get_mut(&project) else {
            return String::new();
        };

        state.revision_seq += 1;
        let revision = format!("server-{}", state.revision_seq);
        state.revisions.push(RevisionRecord {
            revision: revision.clone(),
            local_revision: local_revision.map(str::to_string),
            client: sender,
            changes: changes.clone(),
        });

        let frame = protocol::project_change_frame(
            project,
            &revision,
            local_revision,
            sender,
            changes,
        );
        let frame = with_user_name(&frame, sender_name);

        let sessions = self.sessions.read().await;
        for client in &state.subscribers {
            if include_sender || *client != sender {
                if let Some(session) = sessions.get(client) {
                    session.send(&frame);
                }
            }
        }

        revision
    }

    // -- project lifecycle --------------------------------------------------

    /// Drop the revision log and reseed the sequence for one project.
    /// Subscriptions survive; the data reload happens in the store.
    pub async fn reset_project(&self, project: ProjectId) {
        if let Some(state) = self.projects.lock().await.get_mut(&project) {
            state.reset();
        }
    }

    pub async fn reset_all_projects(&self) {
        for state in self.projects.lock().await.values_mut() {
            state.reset();
        }
    }

    /// Grant the autosave slot if the cooldown has elapsed (or never ran).
    /// At most one subscriber per project wins each autosave window.
    pub async fn request_autosave(&self, project: ProjectId, cooldown: Duration) -> bool {
        let mut projects = self.projects.lock().await;
        let Some(state) = projects.get_mut(&project) else {
            return false;
        };
        let due = state
            .autosave_last
            .is_none_or(|last| last.elapsed() >= cooldown);
        if due {
            state.autosave_last = Some(Instant::now());
        }
        due
    }

    #[cfg(test)]
    pub async fn revisions(&self, project: ProjectId) -> Vec<RevisionRecord> {
        self.projects
            .lock()
            .await
            .get(&project)
            .map(|state| state.revisions.clone())
            .unwrap_or_default()
    }
}

/// Clone `frame` with the sender's `userName` attached, when known.
fn with_user_name(frame: &Value, name: Option<&str>) -> Value {
    let mut frame = frame.clone();
    if let (Some(name), Some(object)) = (name, frame.as_object_mut()) {
        object.insert("userName".to_string(), Value::String(name.to_string()));
    }
    frame
}
