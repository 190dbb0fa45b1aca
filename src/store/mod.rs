//! In-memory data store emulating the backend the relay fronts.
//!
//! ```text
//! Storage
//!   ├── IdGenerator          — one counter, permanent ids for all categories
//!   └── Project (per id)
//!         └── ProjectData
//!               ├── tasks (tree)   ┐
//!               ├── resources      │ RecordStore per category
//!               ├── ...            ┘
//!               └── meta
//! ```
//!
//! The relay core only depends on the narrow contract here (snapshot,
//! generate-id, apply-changeset, reset, version content); a real backend
//! would implement the same surface against a database.

pub mod project;

use std::path::PathBuf;

use serde_json::{json, Value};

use crate::protocol::{ChangeSet, ProjectId};
use crate::reconcile::Reconciler;

pub use project::{Project, ProjectConfig, ProjectData, ProjectSource, RecordStore};

/// Data store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Project {0} not found")]
    ProjectNotFound(ProjectId),
    #[error("Version {0} not found")]
    VersionNotFound(String),
    #[error("Failed to read project source {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid project source {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Permanent-id generator shared by all categories of all projects.
///
/// Seeded above the sample datasets' id range so generated ids never collide
/// with seeded ones.
#[derive(Debug)]
pub struct IdGenerator {
    counter: u64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self { counter: 100 }
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }
}

/// All projects plus the id generator.
#[derive(Debug)]
pub struct Storage {
    projects: Vec<Project>,
    ids: IdGenerator,
}

impl Storage {
    /// Load every configured project from its source.
    pub fn new(configs: Vec<ProjectConfig>) -> Result<Self, StoreError> {
        let projects = configs
            .into_iter()
            .map(Project::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            projects,
            ids: IdGenerator::new(),
        })
    }

    pub fn project(&self, id: ProjectId) -> Result<&Project, StoreError> {
        self.projects
            .iter()
            .find(|project| project.id == id)
            .ok_or(StoreError::ProjectNotFound(id))
    }

    fn project_mut(&mut self, id: ProjectId) -> Result<&mut Project, StoreError> {
        self.projects
            .iter_mut()
            .find(|project| project.id == id)
            .ok_or(StoreError::ProjectNotFound(id))
    }

    pub fn project_ids(&self) -> Vec<ProjectId> {
        self.projects.iter().map(|project| project.id).collect()
    }

    /// `{id, name}` pairs for the given accessible ids, in storage order.
    pub fn metadata(&self, ids: &[ProjectId]) -> Vec<Value> {
        self.projects
            .iter()
            .filter(|project| ids.contains(&project.id))
            .map(|project| json!({ "id": project.id, "name": project.name }))
            .collect()
    }

    /// Full dataset snapshot for one project.
    pub fn snapshot(&self, id: ProjectId) -> Result<Value, StoreError> {
        Ok(self.project(id)?.data.dataset())
    }

    /// Reload one project from its source. Identity is untouched.
    pub fn reset(&mut self, id: ProjectId) -> Result<(), StoreError> {
        self.project_mut(id)?.load()
    }

    /// Reload every project from its source.
    pub fn reset_all(&mut self) -> Result<(), StoreError> {
        for project in &mut self.projects {
            project.load()?;
        }
        Ok(())
    }

    /// Reconcile a change batch against one project and apply it.
    ///
    /// The batch is rewritten in place (permanent ids substituted, phantom
    /// links resolved, lazy fields stripped); returns `true` when at least
    /// one phantom id was resolved in this pass.
    pub fn apply_changes(
        &mut self,
        id: ProjectId,
        changes: &mut ChangeSet,
    ) -> Result<bool, StoreError> {
        let Storage { projects, ids } = self;
        let project = projects
            .iter_mut()
            .find(|project| project.id == id)
            .ok_or(StoreError::ProjectNotFound(id))?;
        let mut reconciler = Reconciler::new();
        Ok(reconciler.run(&mut project.data, ids, changes))
    }

    /// Fetch the lazily-loaded content of a saved version.
    pub fn version_content(
        &self,
        project: ProjectId,
        version_id: &Value,
    ) -> Result<Value, StoreError> {
        self.project(project)?
            .data
            .version_content(version_id)
            .ok_or_else(|| StoreError::VersionNotFound(version_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn sample_source() -> Value {
        json!({
            "project": { "calendar": "general" },
            "tasks": { "rows": [{ "id": 1, "name": "Launch" }] },
            "resources": { "rows": [{ "id": 1, "name": "Celia" }] },
            "versions": { "rows": [{ "id": "v1", "name": "Baseline", "content": { "x": 1 } }] }
        })
    }

    fn storage() -> Storage {
        Storage::new(vec![
            ProjectConfig::inline(1, "SaaS", sample_source()),
            ProjectConfig::inline(2, "Website", sample_source()),
        ])
        .unwrap()
    }

    #[test]
    fn test_id_generator_is_monotonic() {
        let mut ids = IdGenerator::new();
        let first = ids.next_id();
        assert_eq!(first, 101);
        assert!(ids.next_id() > first);
    }

    #[test]
    fn test_metadata_filters_by_accessible_ids() {
        let storage = storage();
        let meta = storage.metadata(&[2]);
        assert_eq!(meta, vec![json!({ "id": 2, "name": "Website" })]);
        assert_eq!(storage.metadata(&[1, 2]).len(), 2);
    }

    #[test]
    fn test_unknown_project_errors() {
        let storage = storage();
        assert!(matches!(
            storage.snapshot(9),
            Err(StoreError::ProjectNotFound(9))
        ));
    }

    #[test]
    fn test_apply_changes_assigns_ids_and_flags_new_records() {
        let mut storage = storage();
        let mut changes: ChangeSet = serde_json::from_value(json!({
            "tasks": { "added": [{ "$PhantomId": "p1", "name": "New task" }] }
        }))
        .unwrap();

        let has_new = storage.apply_changes(1, &mut changes).unwrap();
        assert!(has_new);

        let added = &changes.tasks.as_ref().unwrap().added[0];
        assert!(added["id"].is_u64());
        assert_eq!(added["$PhantomId"], "p1", "phantom id echoed to the client");

        let id = added["id"].clone();
        assert!(storage.project(1).unwrap().data.tasks.contains(&id));
    }

    #[test]
    fn test_apply_changes_without_new_records() {
        let mut storage = storage();
        let mut changes: ChangeSet = serde_json::from_value(json!({
            "tasks": { "updated": [{ "id": 1, "percentDone": 80 }] }
        }))
        .unwrap();
        let has_new = storage.apply_changes(1, &mut changes).unwrap();
        assert!(!has_new);
    }

    #[test]
    fn test_reset_restores_single_project() {
        let mut storage = storage();
        let mut changes: ChangeSet = serde_json::from_value(json!({
            "tasks": { "removed": [{ "id": 1 }] }
        }))
        .unwrap();
        storage.apply_changes(1, &mut changes).unwrap();
        storage.apply_changes(2, &mut changes.clone()).unwrap();
        assert!(storage.project(1).unwrap().data.tasks.is_empty());

        storage.reset(1).unwrap();
        assert_eq!(storage.project(1).unwrap().data.tasks.len(), 1);
        // Project 2 untouched by a single-project reset.
        assert!(storage.project(2).unwrap().data.tasks.is_empty());
    }

    #[test]
    fn test_version_content_lookup() {
        let storage = storage();
        assert_eq!(
            storage.version_content(1, &json!("v1")).unwrap(),
            json!({ "x": 1 })
        );
        assert!(matches!(
            storage.version_content(1, &json!("nope")),
            Err(StoreError::VersionNotFound(_))
        ));
    }

    #[test]
    fn test_load_from_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", sample_source()).unwrap();

        let storage = Storage::new(vec![ProjectConfig::file(
            7,
            "OnDisk",
            file.path(),
        )])
        .unwrap();
        assert_eq!(storage.project(7).unwrap().data.tasks.len(), 1);
    }
}
