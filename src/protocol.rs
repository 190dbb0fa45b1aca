//! JSON wire protocol for the schedule relay.
//!
//! Every frame, inbound and outbound, is a flat JSON object tagged by a
//! `command` field:
//!
//! ```text
//! { "command": "projectChange", "project": 1, "changes": { ... } }
//! ```
//!
//! Inbound frames deserialize into the closed [`Request`] enum; commands the
//! server does not know collapse into [`Request::Unknown`] and are silently
//! ignored. Outbound frames are built as `serde_json::Value` objects so the
//! broadcaster can attach the sender's `userName` to the envelope before
//! fan-out.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Projects are identified by small numeric ids assigned in configuration.
pub type ProjectId = u64;

/// A single schedule record: open-shaped plain JSON data.
///
/// Records deliberately stay schemaless — clients own the field set; the
/// server only interprets `id`, the phantom-id markers and the per-category
/// link fields declared on [`Category`].
pub type Record = Map<String, Value>;

/// Client-assigned temporary id field on freshly created records.
pub const PHANTOM_ID_FIELD: &str = "$PhantomId";
/// Client-assigned temporary parent link on freshly created tree records.
pub const PHANTOM_PARENT_ID_FIELD: &str = "$PhantomParentId";
/// Prefix shared by all phantom-marker fields.
pub const PHANTOM_FIELD_PREFIX: &str = "$Phantom";

/// Entity categories a project data store manages.
///
/// The set is closed: reconciliation iterates it in this order so that
/// records added earlier in a batch can be link targets of records added
/// later (tasks before dependencies, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Tasks,
    Resources,
    Dependencies,
    Assignments,
    Calendars,
    Versions,
    Changelogs,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Tasks,
        Category::Resources,
        Category::Dependencies,
        Category::Assignments,
        Category::Calendars,
        Category::Versions,
        Category::Changelogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tasks => "tasks",
            Category::Resources => "resources",
            Category::Dependencies => "dependencies",
            Category::Assignments => "assignments",
            Category::Calendars => "calendars",
            Category::Versions => "versions",
            Category::Changelogs => "changelogs",
        }
    }

    /// Key this category uses inside a `dataset` snapshot.
    pub fn dataset_key(&self) -> &'static str {
        match self {
            Category::Tasks => "tasksData",
            Category::Resources => "resourcesData",
            Category::Dependencies => "dependenciesData",
            Category::Assignments => "assignmentsData",
            Category::Calendars => "calendarsData",
            Category::Versions => "versionsData",
            Category::Changelogs => "changelogsData",
        }
    }

    /// Fields on records of this category that reference other records and
    /// therefore participate in phantom-id substitution.
    pub fn link_fields(&self) -> &'static [&'static str] {
        match self {
            Category::Tasks => &["parentId"],
            Category::Dependencies => &["fromTask", "toTask", "fromEvent", "toEvent"],
            Category::Assignments => &["event", "resource", "eventId", "resourceId"],
            _ => &[],
        }
    }

    /// Server-internal lazily-loaded fields, stripped from snapshots and
    /// echoed records; fetched only via `loadVersionContent`.
    pub fn lazy_fields(&self) -> &'static [&'static str] {
        match self {
            Category::Versions => &["content"],
            _ => &[],
        }
    }

    /// Whether records of this category form a parent/child tree.
    pub fn is_tree(&self) -> bool {
        matches!(self, Category::Tasks)
    }
}

/// Added/updated/removed record lists for one category.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreChanges {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<Record>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated: Vec<Record>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<Record>,
}

impl StoreChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// One change batch, keyed by entity category.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChangeSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<StoreChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<StoreChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<StoreChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignments: Option<StoreChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendars: Option<StoreChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<StoreChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelogs: Option<StoreChanges>,
}

impl ChangeSet {
    pub fn get(&self, category: Category) -> Option<&StoreChanges> {
        match category {
            Category::Tasks => self.tasks.as_ref(),
            Category::Resources => self.resources.as_ref(),
            Category::Dependencies => self.dependencies.as_ref(),
            Category::Assignments => self.assignments.as_ref(),
            Category::Calendars => self.calendars.as_ref(),
            Category::Versions => self.versions.as_ref(),
            Category::Changelogs => self.changelogs.as_ref(),
        }
    }

    pub fn get_mut(&mut self, category: Category) -> Option<&mut StoreChanges> {
        match category {
            Category::Tasks => self.tasks.as_mut(),
            Category::Resources => self.resources.as_mut(),
            Category::Dependencies => self.dependencies.as_mut(),
            Category::Assignments => self.assignments.as_mut(),
            Category::Calendars => self.calendars.as_mut(),
            Category::Versions => self.versions.as_mut(),
            Category::Changelogs => self.changelogs.as_mut(),
        }
    }

    pub fn set(&mut self, category: Category, changes: StoreChanges) {
        match category {
            Category::Tasks => self.tasks = Some(changes),
            Category::Resources => self.resources = Some(changes),
            Category::Dependencies => self.dependencies = Some(changes),
            Category::Assignments => self.assignments = Some(changes),
            Category::Calendars => self.calendars = Some(changes),
            Category::Versions => self.versions = Some(changes),
            Category::Changelogs => self.changelogs = Some(changes),
        }
    }
}

/// Every command a client may send.
///
/// Internally tagged on `command`; payload fields are `Option` so that the
/// guard chain — not the deserializer — reports a missing `project` field
/// with the proper `{command, error}` envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
pub enum Request {
    /// Authenticate the connection. `login`/`password` stay untyped: a
    /// non-string login is a *failed login*, not a protocol error.
    #[serde(rename = "login")]
    Login {
        login: Option<Value>,
        password: Option<Value>,
    },
    #[serde(rename = "logout")]
    Logout,
    #[serde(rename = "projects")]
    Projects,
    #[serde(rename = "reset")]
    Reset { project: Option<ProjectId> },
    #[serde(rename = "dataset")]
    Dataset { project: Option<ProjectId> },
    #[serde(rename = "projectChange")]
    ProjectChange {
        project: Option<ProjectId>,
        changes: Option<ChangeSet>,
        #[serde(rename = "localRevision")]
        local_revision: Option<String>,
    },
    #[serde(rename = "requestVersionAutoSave")]
    RequestVersionAutoSave { project: Option<ProjectId> },
    #[serde(rename = "loadVersionContent")]
    LoadVersionContent {
        project: Option<ProjectId>,
        #[serde(rename = "versionId")]
        version_id: Option<Value>,
    },
    /// Any command name the server does not know. Accepted and ignored.
    #[serde(other)]
    Unknown,
}

impl Request {
    /// Parse one inbound text frame.
    pub fn parse(raw: &str) -> Result<Request, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The command name, echoed back in error envelopes.
    pub fn command(&self) -> &'static str {
        match self {
            Request::Login { .. } => "login",
            Request::Logout => "logout",
            Request::Projects => "projects",
            Request::Reset { .. } => "reset",
            Request::Dataset { .. } => "dataset",
            Request::ProjectChange { .. } => "projectChange",
            Request::RequestVersionAutoSave { .. } => "requestVersionAutoSave",
            Request::LoadVersionContent { .. } => "loadVersionContent",
            Request::Unknown => "unknown",
        }
    }

    /// `Some(project field)` for project-scoped commands, `None` otherwise.
    pub fn project_scope(&self) -> Option<Option<ProjectId>> {
        match self {
            Request::Reset { project }
            | Request::Dataset { project }
            | Request::ProjectChange { project, .. }
            | Request::RequestVersionAutoSave { project }
            | Request::LoadVersionContent { project, .. } => Some(*project),
            _ => None,
        }
    }

    /// Project-scoped commands require an active subscription, except
    /// `dataset` which *is* the subscribing action.
    pub fn requires_subscription(&self) -> bool {
        !matches!(self, Request::Dataset { .. }) && self.project_scope().is_some()
    }
}

/// Protocol-level failures: the frame could not be understood at all.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Outbound frame builders
// ---------------------------------------------------------------------------

/// `{command:"error", message}` — sent for unparsable or crashing input.
pub fn error_frame(message: &str) -> Value {
    json!({ "command": "error", "message": message })
}

/// `{command, error}` — guard rejections and per-command failures.
pub fn command_error(command: &str, error: &str) -> Value {
    json!({ "command": command, "error": error })
}

/// `{command, project, error}` — subscription guard rejections.
pub fn command_project_error(command: &str, project: ProjectId, error: &str) -> Value {
    json!({ "command": command, "project": project, "error": error })
}

pub fn login_ok(client_id: Uuid) -> Value {
    json!({ "command": "login", "clientId": client_id })
}

pub fn users_frame(users: &[String]) -> Value {
    json!({ "command": "users", "users": users })
}

pub fn projects_frame(projects: Vec<Value>) -> Value {
    json!({ "command": "projects", "projects": projects })
}

pub fn dataset_frame(project: ProjectId, dataset: Value) -> Value {
    json!({ "command": "dataset", "project": project, "dataset": dataset })
}

pub fn reset_frame(project: ProjectId) -> Value {
    json!({ "command": "reset", "project": project })
}

pub fn logout_frame() -> Value {
    json!({ "command": "logout" })
}

pub fn version_autosave_ok(project: ProjectId) -> Value {
    json!({ "command": "versionAutoSaveOK", "project": project })
}

pub fn version_content_frame(project: ProjectId, version_id: &Value, content: Value) -> Value {
    json!({
        "command": "loadVersionContent",
        "project": project,
        "versionId": version_id,
        "content": content,
    })
}

/// The reconciled-batch broadcast: permanent ids, server revision and the
/// originating client, so every peer can match it to its optimistic state.
pub fn project_change_frame(
    project: ProjectId,
    revision: &str,
    local_revision: Option<&str>,
    client: Uuid,
    changes: &ChangeSet,
) -> Value {
    let mut frame = json!({
        "command": "projectChange",
        "project": project,
        "revision": revision,
        "client": client,
        "changes": changes,
    });
    if let Some(local) = local_revision {
        frame["localRevision"] = json!(local);
    }
    frame
}
