//! Command dispatch: guard chain plus one handler per command.
//!
//! Every inbound frame passes the same gauntlet before its handler runs:
//!
//! 1. authentication — everything but `login` needs a logged-in session
//! 2. project presence — project-scoped commands must carry `project`
//! 3. authorization — the user's group must grant that project
//! 4. subscription — mutating commands need the project loaded first
//!    (`dataset` is exempt: it *is* the subscribing action)
//!
//! Guard rejections answer only the offending client with a `{command,
//! error}` envelope; they never terminate the connection.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Duration;
use uuid::Uuid;

use crate::hub::Hub;
use crate::identity::IdentityStore;
use crate::protocol::{self, ChangeSet, ProjectId, Request};
use crate::store::{Storage, StoreError};

const ERR_AUTH: &str = "Authentication required";
const ERR_PROJECT_ID: &str = "Project id is required";
const ERR_SUBSCRIPTION: &str = "Subscription to project is required. Load project first";
const ERR_CREDENTIALS: &str = "Wrong username/password";
const ERR_INTERNAL: &str = "Internal server error";

/// What the connection loop should do after a frame is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// Drain the outbound queue, then close the transport.
    Close,
}

/// Stateless command dispatcher shared by all connections.
pub struct Router {
    hub: Arc<Hub>,
    storage: Arc<Mutex<Storage>>,
    identity: IdentityStore,
    autosave_cooldown: Duration,
}

impl Router {
    pub fn new(
        hub: Arc<Hub>,
        storage: Arc<Mutex<Storage>>,
        identity: IdentityStore,
        autosave_cooldown: Duration,
    ) -> Self {
        Self {
            hub,
            storage,
            identity,
            autosave_cooldown,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Handle one inbound text frame from `client`.
    pub async fn dispatch(&self, client: Uuid, raw: &str) -> Outcome {
        log::debug!("<<< {raw}");

        let request = match Request::parse(raw) {
            Ok(request) => request,
            Err(err) => {
                self.hub
                    .send_to(client, &protocol::error_frame(&err.to_string()))
                    .await;
                return Outcome::Continue;
            }
        };

        // Unknown commands are accepted and dropped so older servers stay
        // compatible with newer clients.
        if matches!(request, Request::Unknown) {
            return Outcome::Continue;
        }

        if let Request::Login { login, password } = request {
            self.handle_login(client, login, password).await;
            return Outcome::Continue;
        }

        let command = request.command();

        if !self.hub.is_authenticated(client).await {
            self.hub
                .send_to(client, &protocol::command_error(command, ERR_AUTH))
                .await;
            return Outcome::Continue;
        }

        let project = match request.project_scope() {
            Some(None) => {
                self.hub
                    .send_to(client, &protocol::command_error(command, ERR_PROJECT_ID))
                    .await;
                return Outcome::Continue;
            }
            Some(Some(project)) => {
                let name = self.hub.user_name(client).await.unwrap_or_default();
                if !self.identity.is_authorized(&name, project) {
                    let error = format!("Authorization required for project {project}");
                    self.hub
                        .send_to(
                            client,
                            &protocol::command_project_error(command, project, &error),
                        )
                        .await;
                    return Outcome::Continue;
                }
                if request.requires_subscription()
                    && !self.hub.is_subscribed(client, project).await
                {
                    self.hub
                        .send_to(
                            client,
                            &protocol::command_project_error(command, project, ERR_SUBSCRIPTION),
                        )
                        .await;
                    return Outcome::Continue;
                }
                Some(project)
            }
            None => None,
        };

        match (request, project) {
            (Request::Logout, None) => return self.handle_logout(client).await,
            (Request::Projects, None) => self.handle_projects(client).await,
            (Request::Dataset { .. }, Some(project)) => {
                self.handle_dataset(client, project).await
            }
            (Request::Reset { .. }, Some(project)) => self.handle_reset(client, project).await,
            (
                Request::ProjectChange {
                    changes,
                    local_revision,
                    ..
                },
                Some(project),
            ) => {
                self.handle_project_change(client, project, changes, local_revision)
                    .await
            }
            (Request::RequestVersionAutoSave { .. }, Some(project)) => {
                self.handle_autosave(client, project).await
            }
            (Request::LoadVersionContent { version_id, .. }, Some(project)) => {
                self.handle_version_content(client, project, version_id).await
            }
            _ => unreachable!("guard chain binds a project id iff the command is project-scoped"),
        }

        Outcome::Continue
    }

    /// Full-server reset, driven by the idle timer. Every project reloads
    /// from its source; subscribers get the fresh dataset and a `reset`
    /// telling them to drop local state.
    pub async fn reset_all(&self) {
        let mut storage = self.storage.lock().await;
        let ids = storage.project_ids();
        if let Err(err) = storage.reset_all() {
            log::error!("Full reset failed: {err}");
            return;
        }
        self.hub.reset_all_projects().await;
        for id in ids {
            if let Ok(snapshot) = storage.snapshot(id) {
                self.hub
                    .broadcast_to_subscribers(None, None, id, &protocol::dataset_frame(id, snapshot))
                    .await;
            }
            self.hub
                .broadcast_to_subscribers(None, None, id, &protocol::reset_frame(id))
                .await;
        }
        drop(storage);
        log::info!("Server data reset to initial state");
    }

    // -- handlers -----------------------------------------------------------

    async fn handle_login(
        &self,
        client: Uuid,
        login: Option<serde_json::Value>,
        password: Option<serde_json::Value>,
    ) {
        // A non-string login is a failed login, not a malformed frame.
        let name = login.as_ref().and_then(|value| value.as_str()).unwrap_or("");
        let password = password
            .as_ref()
            .and_then(|value| value.as_str())
            .unwrap_or("");

        if !self.identity.authenticate(name, password) {
            log::info!("Rejected login for {name:?}");
            self.hub
                .send_to(client, &protocol::command_error("login", ERR_CREDENTIALS))
                .await;
            return;
        }

        log::info!("User {name} logged in as client {client}");
        self.hub.set_user_name(client, name).await;
        self.hub.send_to(client, &protocol::login_ok(client)).await;
        self.hub.broadcast_users().await;
    }

    async fn handle_logout(&self, client: Uuid) -> Outcome {
        let name = self.hub.user_name(client).await;
        log::info!("User {name:?} logged out");

        self.hub.unsubscribe_all(client).await;
        self.hub
            .broadcast_to_all(name.as_deref(), Some(client), &protocol::logout_frame())
            .await;
        self.hub.clear_user_name(client).await;
        self.hub.broadcast_users().await;
        self.hub.send_to(client, &protocol::logout_frame()).await;
        Outcome::Close
    }

    async fn handle_projects(&self, client: Uuid) {
        let name = self.hub.user_name(client).await.unwrap_or_default();
        let accessible = self.identity.accessible(&name);
        let projects = self.storage.lock().await.metadata(accessible);
        self.hub
            .send_to(client, &protocol::projects_frame(projects))
            .await;
    }

    /// Snapshot and subscribe under one storage lock, so a concurrent
    /// `projectChange` can never land between the two.
    async fn handle_dataset(&self, client: Uuid, project: ProjectId) {
        let storage = self.storage.lock().await;
        let snapshot = match storage.snapshot(project) {
            Ok(snapshot) => snapshot,
            Err(err @ StoreError::ProjectNotFound(_)) => {
                drop(storage);
                self.hub
                    .send_to(
                        client,
                        &protocol::command_error("dataset", &err.to_string()),
                    )
                    .await;
                return;
            }
            Err(err) => {
                drop(storage);
                self.internal_error(client, "dataset", err).await;
                return;
            }
        };
        self.hub.subscribe(client, project).await;
        drop(storage);

        self.hub
            .send_to(client, &protocol::dataset_frame(project, snapshot))
            .await;
    }

    /// Reload one project from its source. All subscribers, the originator
    /// included, get the fresh dataset followed by the `reset` notice.
    async fn handle_reset(&self, client: Uuid, project: ProjectId) {
        let name = self.hub.user_name(client).await;

        let mut storage = self.storage.lock().await;
        let snapshot = match storage.reset(project).and_then(|()| storage.snapshot(project)) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                drop(storage);
                self.internal_error(client, "reset", err).await;
                return;
            }
        };
        self.hub.reset_project(project).await;
        self.hub
            .broadcast_to_subscribers(None, None, project, &protocol::dataset_frame(project, snapshot))
            .await;
        self.hub
            .broadcast_to_subscribers(name.as_deref(), None, project, &protocol::reset_frame(project))
            .await;
    }

    async fn handle_project_change(
        &self,
        client: Uuid,
        project: ProjectId,
        changes: Option<ChangeSet>,
        local_revision: Option<String>,
    ) {
        let Some(mut changes) = changes else {
            self.hub
                .send_to(
                    client,
                    &protocol::command_project_error(
                        "projectChange",
                        project,
                        "Changes are required",
                    ),
                )
                .await;
            return;
        };

        let name = self.hub.user_name(client).await;

        // The storage lock is held across reconcile and commit: revision
        // order must equal apply order.
        let mut storage = self.storage.lock().await;
        let has_new_records = match storage.apply_changes(project, &mut changes) {
            Ok(has_new) => has_new,
            Err(err) => {
                drop(storage);
                self.internal_error(client, "projectChange", err).await;
                return;
            }
        };
        let revision = self
            .hub
            .commit_and_broadcast(
                project,
                client,
                name.as_deref(),
                local_revision.as_deref(),
                &changes,
                has_new_records,
            )
            .await;
        drop(storage);

        log::debug!(
            "Committed {revision} on project {project} (new records: {has_new_records})"
        );
    }

    /// Grant is answered with `versionAutoSaveOK`; a denied request gets
    /// nothing so that exactly one subscriber per window takes the save.
    async fn handle_autosave(&self, client: Uuid, project: ProjectId) {
        if self
            .hub
            .request_autosave(project, self.autosave_cooldown)
            .await
        {
            self.hub
                .send_to(client, &protocol::version_autosave_ok(project))
                .await;
        }
    }

    async fn handle_version_content(
        &self,
        client: Uuid,
        project: ProjectId,
        version_id: Option<serde_json::Value>,
    ) {
        let Some(version_id) = version_id else {
            self.hub
                .send_to(
                    client,
                    &protocol::command_project_error(
                        "loadVersionContent",
                        project,
                        "Version id is required",
                    ),
                )
                .await;
            return;
        };

        let content = self.storage.lock().await.version_content(project, &version_id);
        match content {
            Ok(content) => {
                self.hub
                    .send_to(
                        client,
                        &protocol::version_content_frame(project, &version_id, content),
                    )
                    .await;
            }
            Err(err @ StoreError::VersionNotFound(_)) => {
                self.hub
                    .send_to(
                        client,
                        &protocol::command_project_error(
                            "loadVersionContent",
                            project,
                            &err.to_string(),
                        ),
                    )
                    .await;
            }
            Err(err) => self.internal_error(client, "loadVersionContent", err).await,
        }
    }

    async fn internal_error(&self, client: Uuid, command: &str, err: StoreError) {
        log::error!("Command {command} failed for client {client}: {err}");
        self.hub
            .send_to(client, &protocol::command_error(command, ERR_INTERNAL))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::store::ProjectConfig;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    fn sample_source() -> Value {
        json!({
            "project": { "calendar": "general" },
            "tasks": { "rows": [{ "id": 1, "name": "Launch" }] },
            "resources": { "rows": [{ "id": 1, "name": "Celia" }] },
            "versions": { "rows": [
                { "id": "v1", "name": "Baseline", "content": { "tasks": [] } }
            ]}
        })
    }

    fn router() -> Router {
        let storage = Storage::new(vec![
            ProjectConfig::inline(1, "SaaS", sample_source()),
            ProjectConfig::inline(2, "Website", sample_source()),
            ProjectConfig::inline(3, "Backend", sample_source()),
        ])
        .unwrap();
        let hub = Arc::new(Hub::new(&[1, 2, 3]));
        Router::new(
            hub,
            Arc::new(Mutex::new(storage)),
            IdentityStore::default(),
            Duration::from_secs(60),
        )
    }

    async fn connect(router: &Router) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        router.hub().register(Session::new(id, tx)).await;
        (id, rx)
    }

    async fn login(router: &Router, client: Uuid, rx: &mut mpsc::UnboundedReceiver<String>, name: &str) {
        router
            .dispatch(
                client,
                &json!({ "command": "login", "login": name, "password": name }).to_string(),
            )
            .await;
        assert_eq!(recv(rx)["command"], "login");
        assert_eq!(recv(rx)["command"], "users");
    }

    async fn load(router: &Router, client: Uuid, rx: &mut mpsc::UnboundedReceiver<String>, project: u64) {
        router
            .dispatch(client, &json!({ "command": "dataset", "project": project }).to_string())
            .await;
        assert_eq!(recv(rx)["command"], "dataset");
    }

    fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().expect("expected a frame")).unwrap()
    }

    fn assert_silent(rx: &mut mpsc::UnboundedReceiver<String>) {
        assert!(rx.try_recv().is_err(), "expected no frame");
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error_envelope() {
        let router = router();
        let (client, mut rx) = connect(&router).await;
        router.dispatch(client, "{ not json").await;
        let frame = recv(&mut rx);
        assert_eq!(frame["command"], "error");
        assert!(frame["message"].as_str().unwrap().contains("Malformed"));
    }

    #[tokio::test]
    async fn test_unknown_command_is_ignored() {
        let router = router();
        let (client, mut rx) = connect(&router).await;
        let outcome = router
            .dispatch(client, r#"{"command":"teleport","to":"mars"}"#)
            .await;
        assert_eq!(outcome, Outcome::Continue);
        assert_silent(&mut rx);
    }

    #[tokio::test]
    async fn test_commands_require_authentication() {
        let router = router();
        let (client, mut rx) = connect(&router).await;
        router.dispatch(client, r#"{"command":"projects"}"#).await;
        let frame = recv(&mut rx);
        assert_eq!(frame["command"], "projects");
        assert_eq!(frame["error"], "Authentication required");
    }

    #[tokio::test]
    async fn test_login_success_echoes_client_id_and_users() {
        let router = router();
        let (client, mut rx) = connect(&router).await;
        router
            .dispatch(
                client,
                r#"{"command":"login","login":"alex","password":"alex"}"#,
            )
            .await;

        let frame = recv(&mut rx);
        assert_eq!(frame["command"], "login");
        assert_eq!(frame["clientId"], json!(client));
        let users = recv(&mut rx);
        assert_eq!(users["users"], json!(["alex"]));
        assert_silent(&mut rx);
    }

    #[tokio::test]
    async fn test_login_wrong_password_rejected() {
        let router = router();
        let (client, mut rx) = connect(&router).await;
        router
            .dispatch(
                client,
                r#"{"command":"login","login":"alex","password":"nope"}"#,
            )
            .await;
        assert_eq!(recv(&mut rx)["error"], "Wrong username/password");
        assert!(!router.hub().is_authenticated(client).await);
    }

    #[tokio::test]
    async fn test_login_non_string_name_rejected() {
        let router = router();
        let (client, mut rx) = connect(&router).await;
        router
            .dispatch(client, r#"{"command":"login","login":42,"password":""}"#)
            .await;
        assert_eq!(recv(&mut rx)["error"], "Wrong username/password");
    }

    #[tokio::test]
    async fn test_anonymous_login_gets_guest_access() {
        let router = router();
        let (client, mut rx) = connect(&router).await;
        login(&router, client, &mut rx, "stranger").await;

        router.dispatch(client, r#"{"command":"projects"}"#).await;
        let frame = recv(&mut rx);
        assert_eq!(frame["projects"], json!([{ "id": 1, "name": "SaaS" }]));
    }

    #[tokio::test]
    async fn test_projects_lists_only_accessible() {
        let router = router();
        let (client, mut rx) = connect(&router).await;
        login(&router, client, &mut rx, "alex").await;

        router.dispatch(client, r#"{"command":"projects"}"#).await;
        let frame = recv(&mut rx);
        assert_eq!(
            frame["projects"],
            json!([{ "id": 1, "name": "SaaS" }, { "id": 2, "name": "Website" }])
        );
    }

    #[tokio::test]
    async fn test_project_id_required() {
        let router = router();
        let (client, mut rx) = connect(&router).await;
        login(&router, client, &mut rx, "alex").await;

        router.dispatch(client, r#"{"command":"dataset"}"#).await;
        let frame = recv(&mut rx);
        assert_eq!(frame["error"], "Project id is required");
    }

    #[tokio::test]
    async fn test_unauthorized_project_rejected() {
        let router = router();
        let (client, mut rx) = connect(&router).await;
        login(&router, client, &mut rx, "alex").await;

        router
            .dispatch(client, r#"{"command":"dataset","project":3}"#)
            .await;
        let frame = recv(&mut rx);
        assert!(frame["error"]
            .as_str()
            .unwrap()
            .starts_with("Authorization required"));
    }

    #[tokio::test]
    async fn test_subscription_required_before_changes() {
        let router = router();
        let (client, mut rx) = connect(&router).await;
        login(&router, client, &mut rx, "alex").await;

        router
            .dispatch(
                client,
                r#"{"command":"projectChange","project":1,"changes":{}}"#,
            )
            .await;
        let frame = recv(&mut rx);
        assert_eq!(
            frame["error"],
            "Subscription to project is required. Load project first"
        );
    }

    #[tokio::test]
    async fn test_dataset_subscribes_and_snapshots() {
        let router = router();
        let (client, mut rx) = connect(&router).await;
        login(&router, client, &mut rx, "alex").await;

        router
            .dispatch(client, r#"{"command":"dataset","project":1}"#)
            .await;
        let frame = recv(&mut rx);
        assert_eq!(frame["command"], "dataset");
        assert_eq!(frame["project"], 1);
        assert_eq!(frame["dataset"]["tasksData"][0]["name"], "Launch");
        assert!(
            frame["dataset"]["versionsData"][0].get("content").is_none(),
            "version content is lazy"
        );
        assert!(router.hub().is_subscribed(client, 1).await);
    }

    #[tokio::test]
    async fn test_change_with_new_records_fans_out_to_everyone() {
        let router = router();
        let (a, mut rx_a) = connect(&router).await;
        let (b, mut rx_b) = connect(&router).await;
        login(&router, a, &mut rx_a, "alex").await;
        login(&router, b, &mut rx_b, "ben").await;
        let _ = rx_a.try_recv(); // ben's users broadcast
        load(&router, a, &mut rx_a, 1).await;
        load(&router, b, &mut rx_b, 1).await;

        router
            .dispatch(
                a,
                &json!({
                    "command": "projectChange",
                    "project": 1,
                    "localRevision": "local-1",
                    "changes": {
                        "tasks": { "added": [{ "$PhantomId": "p1", "name": "New task" }] }
                    }
                })
                .to_string(),
            )
            .await;

        // Originator gets the echo with permanent ids.
        let echo = recv(&mut rx_a);
        assert_eq!(echo["command"], "projectChange");
        assert_eq!(echo["revision"], "server-1");
        assert_eq!(echo["localRevision"], "local-1");
        assert_eq!(echo["client"], json!(a));
        let added = &echo["changes"]["tasks"]["added"][0];
        assert!(added["id"].is_u64());
        assert_eq!(added["$PhantomId"], "p1");

        // Peer gets the same batch with the sender's name attached.
        let peer = recv(&mut rx_b);
        assert_eq!(peer["revision"], "server-1");
        assert_eq!(peer["userName"], "alex");
    }

    #[tokio::test]
    async fn test_update_only_change_skips_originator() {
        let router = router();
        let (a, mut rx_a) = connect(&router).await;
        let (b, mut rx_b) = connect(&router).await;
        login(&router, a, &mut rx_a, "alex").await;
        login(&router, b, &mut rx_b, "ben").await;
        let _ = rx_a.try_recv();
        load(&router, a, &mut rx_a, 1).await;
        load(&router, b, &mut rx_b, 1).await;

        router
            .dispatch(
                a,
                &json!({
                    "command": "projectChange",
                    "project": 1,
                    "changes": { "tasks": { "updated": [{ "id": 1, "percentDone": 40 }] } }
                })
                .to_string(),
            )
            .await;

        assert_silent(&mut rx_a);
        assert_eq!(recv(&mut rx_b)["command"], "projectChange");
    }

    #[tokio::test]
    async fn test_non_subscriber_does_not_receive_changes() {
        let router = router();
        let (a, mut rx_a) = connect(&router).await;
        let (b, mut rx_b) = connect(&router).await;
        login(&router, a, &mut rx_a, "alex").await;
        login(&router, b, &mut rx_b, "ben").await;
        let _ = rx_a.try_recv();
        load(&router, a, &mut rx_a, 1).await;
        load(&router, b, &mut rx_b, 2).await;

        router
            .dispatch(
                a,
                &json!({
                    "command": "projectChange",
                    "project": 1,
                    "changes": { "tasks": { "added": [{ "$PhantomId": "p1" }] } }
                })
                .to_string(),
            )
            .await;

        assert_eq!(recv(&mut rx_a)["command"], "projectChange");
        assert_silent(&mut rx_b);
    }

    #[tokio::test]
    async fn test_reset_reloads_and_broadcasts() {
        let router = router();
        let (a, mut rx_a) = connect(&router).await;
        let (b, mut rx_b) = connect(&router).await;
        login(&router, a, &mut rx_a, "alex").await;
        login(&router, b, &mut rx_b, "ben").await;
        let _ = rx_a.try_recv();
        load(&router, a, &mut rx_a, 1).await;
        load(&router, b, &mut rx_b, 1).await;

        router
            .dispatch(
                a,
                &json!({
                    "command": "projectChange",
                    "project": 1,
                    "changes": { "tasks": { "removed": [{ "id": 1 }] } }
                })
                .to_string(),
            )
            .await;
        let _ = rx_b.try_recv();

        router
            .dispatch(a, r#"{"command":"reset","project":1}"#)
            .await;
        // Fresh dataset first, then the reset notice.
        let dataset = recv(&mut rx_a);
        assert_eq!(dataset["command"], "dataset");
        assert_eq!(dataset["dataset"]["tasksData"][0]["name"], "Launch");
        let frame = recv(&mut rx_a);
        assert_eq!(frame["command"], "reset");
        assert_eq!(frame["project"], 1);
        assert_eq!(recv(&mut rx_b)["command"], "dataset");
        assert_eq!(recv(&mut rx_b)["command"], "reset");

        // Reloading yields the pristine dataset and a fresh revision seq.
        load(&router, a, &mut rx_a, 1).await;
        router
            .dispatch(
                a,
                &json!({
                    "command": "projectChange",
                    "project": 1,
                    "changes": { "tasks": { "added": [{ "$PhantomId": "p1" }] } }
                })
                .to_string(),
            )
            .await;
        assert_eq!(recv(&mut rx_a)["revision"], "server-1");
    }

    #[tokio::test]
    async fn test_autosave_grants_one_subscriber() {
        let router = router();
        let (a, mut rx_a) = connect(&router).await;
        let (b, mut rx_b) = connect(&router).await;
        login(&router, a, &mut rx_a, "alex").await;
        login(&router, b, &mut rx_b, "ben").await;
        let _ = rx_a.try_recv();
        load(&router, a, &mut rx_a, 1).await;
        load(&router, b, &mut rx_b, 1).await;

        router
            .dispatch(a, r#"{"command":"requestVersionAutoSave","project":1}"#)
            .await;
        router
            .dispatch(b, r#"{"command":"requestVersionAutoSave","project":1}"#)
            .await;

        let frame = recv(&mut rx_a);
        assert_eq!(frame["command"], "versionAutoSaveOK");
        assert_silent(&mut rx_b);
    }

    #[tokio::test]
    async fn test_load_version_content() {
        let router = router();
        let (client, mut rx) = connect(&router).await;
        login(&router, client, &mut rx, "alex").await;
        load(&router, client, &mut rx, 1).await;

        router
            .dispatch(
                client,
                r#"{"command":"loadVersionContent","project":1,"versionId":"v1"}"#,
            )
            .await;
        let frame = recv(&mut rx);
        assert_eq!(frame["command"], "loadVersionContent");
        assert_eq!(frame["versionId"], "v1");
        assert_eq!(frame["content"], json!({ "tasks": [] }));

        router
            .dispatch(
                client,
                r#"{"command":"loadVersionContent","project":1,"versionId":"nope"}"#,
            )
            .await;
        assert!(recv(&mut rx)["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_logout_closes_and_notifies_peers() {
        let router = router();
        let (a, mut rx_a) = connect(&router).await;
        let (b, mut rx_b) = connect(&router).await;
        login(&router, a, &mut rx_a, "alex").await;
        login(&router, b, &mut rx_b, "ben").await;
        let _ = rx_a.try_recv();

        let outcome = router.dispatch(a, r#"{"command":"logout"}"#).await;
        assert_eq!(outcome, Outcome::Close);

        let notice = recv(&mut rx_b);
        assert_eq!(notice["command"], "logout");
        assert_eq!(notice["userName"], "alex");
        let roster = recv(&mut rx_b);
        assert_eq!(roster["users"], json!(["ben"]));
    }

    #[tokio::test]
    async fn test_full_reset_broadcasts_per_project() {
        let router = router();
        let (a, mut rx_a) = connect(&router).await;
        login(&router, a, &mut rx_a, "alex").await;
        load(&router, a, &mut rx_a, 2).await;

        router.reset_all().await;
        let dataset = recv(&mut rx_a);
        assert_eq!(dataset["command"], "dataset");
        assert_eq!(dataset["project"], 2);
        let frame = recv(&mut rx_a);
        assert_eq!(frame["command"], "reset");
        assert_eq!(frame["project"], 2);
        assert_silent(&mut rx_a);
    }
}
