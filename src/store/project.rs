//! In-memory project data: per-category record stores and snapshots.
//!
//! A project's records live in flat [`RecordStore`]s keyed by category; the
//! task store additionally materializes a parent/child tree for snapshots.
//! Records are open-shaped JSON objects — the store interprets only `id`,
//! `parentId` and the lazily-loaded fields declared on the category.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::protocol::{
    Category, ProjectId, Record, PHANTOM_FIELD_PREFIX, PHANTOM_ID_FIELD,
};
use crate::store::StoreError;

/// Flat record store for one entity category.
#[derive(Debug, Clone)]
pub struct RecordStore {
    category: Category,
    records: Vec<Record>,
}

impl RecordStore {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            records: Vec::new(),
        }
    }

    pub fn with_records(category: Category, records: Vec<Record>) -> Self {
        Self { category, records }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Find a record by id. Ids may be numbers or strings; they are compared
    /// by JSON value equality.
    pub fn get(&self, id: &Value) -> Option<&Record> {
        self.records.iter().find(|rec| rec.get("id") == Some(id))
    }

    pub fn get_mut(&mut self, id: &Value) -> Option<&mut Record> {
        self.records
            .iter_mut()
            .find(|rec| rec.get("id") == Some(id))
    }

    pub fn contains(&self, id: &Value) -> bool {
        self.get(id).is_some()
    }

    /// Apply one reconciled changeset: append added records (minus phantom
    /// markers), merge updated fields into existing records, drop removed
    /// ids. Updates referencing unknown ids are ignored here — the
    /// reconciler has already logged them.
    pub fn apply(&mut self, changes: &crate::protocol::StoreChanges) {
        for rec in &changes.added {
            let mut rec = rec.clone();
            rec.remove(PHANTOM_ID_FIELD);
            self.records.push(rec);
        }
        for rec in &changes.updated {
            let Some(id) = rec.get("id").cloned() else {
                continue;
            };
            if let Some(existing) = self.get_mut(&id) {
                for (key, value) in rec {
                    if key != "id" && !key.starts_with(PHANTOM_FIELD_PREFIX) {
                        existing.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        for rec in &changes.removed {
            if let Some(id) = rec.get("id") {
                self.records.retain(|r| r.get("id") != Some(id));
            }
        }
    }

    /// Snapshot for a `dataset` frame: lazily-loaded fields stripped, tree
    /// categories nested via `parentId` → `children`.
    pub fn snapshot(&self) -> Value {
        let rows: Vec<Record> = self
            .records
            .iter()
            .map(|rec| {
                let mut rec = rec.clone();
                for field in self.category.lazy_fields() {
                    rec.remove(*field);
                }
                rec
            })
            .collect();

        if self.category.is_tree() {
            Value::Array(build_tree(rows))
        } else {
            Value::Array(rows.into_iter().map(Value::Object).collect())
        }
    }
}

fn id_key(id: &Value) -> String {
    id.to_string()
}

/// Nest flat records into roots with `children` arrays.
fn build_tree(rows: Vec<Record>) -> Vec<Value> {
    let mut pending: HashMap<String, Vec<Record>> = HashMap::new();
    let mut roots: Vec<Record> = Vec::new();

    for rec in rows {
        match rec.get("parentId") {
            Some(parent) if !parent.is_null() => {
                pending.entry(id_key(parent)).or_default().push(rec);
            }
            _ => roots.push(rec),
        }
    }

    let tree = roots
        .into_iter()
        .map(|rec| attach_children(rec, &mut pending))
        .collect();

    if !pending.is_empty() {
        log::warn!(
            "Dropped {} orphaned tree records with missing parents",
            pending.values().map(Vec::len).sum::<usize>()
        );
    }

    tree
}

fn attach_children(mut rec: Record, pending: &mut HashMap<String, Vec<Record>>) -> Value {
    if let Some(key) = rec.get("id").map(id_key) {
        if let Some(kids) = pending.remove(&key) {
            let kids: Vec<Value> = kids
                .into_iter()
                .map(|kid| attach_children(kid, pending))
                .collect();
            rec.insert("children".to_string(), Value::Array(kids));
        }
    }
    Value::Object(rec)
}

/// All record stores of one project plus its opaque metadata.
#[derive(Debug, Clone)]
pub struct ProjectData {
    pub tasks: RecordStore,
    pub resources: RecordStore,
    pub dependencies: RecordStore,
    pub assignments: RecordStore,
    pub calendars: RecordStore,
    pub versions: RecordStore,
    pub changelogs: RecordStore,
    /// Opaque project metadata from the source (`startDate`, `calendar`, …).
    pub meta: Value,
}

impl ProjectData {
    pub fn empty() -> Self {
        Self {
            tasks: RecordStore::new(Category::Tasks),
            resources: RecordStore::new(Category::Resources),
            dependencies: RecordStore::new(Category::Dependencies),
            assignments: RecordStore::new(Category::Assignments),
            calendars: RecordStore::new(Category::Calendars),
            versions: RecordStore::new(Category::Versions),
            changelogs: RecordStore::new(Category::Changelogs),
            meta: Value::Null,
        }
    }

    /// Build from a source document of shape
    /// `{ tasks: { rows: [...] }, ..., project: { ... } }`.
    ///
    /// Missing sections yield empty stores; `changelogs` always starts empty
    /// regardless of the source.
    pub fn from_value(value: &Value) -> Self {
        let rows = |key: &str| -> Vec<Record> {
            value
                .get(key)
                .and_then(|section| section.get("rows"))
                .and_then(Value::as_array)
                .map(|rows| {
                    rows.iter()
                        .filter_map(|row| row.as_object().cloned())
                        .collect()
                })
                .unwrap_or_default()
        };

        Self {
            tasks: RecordStore::with_records(Category::Tasks, rows("tasks")),
            resources: RecordStore::with_records(Category::Resources, rows("resources")),
            dependencies: RecordStore::with_records(Category::Dependencies, rows("dependencies")),
            assignments: RecordStore::with_records(Category::Assignments, rows("assignments")),
            calendars: RecordStore::with_records(Category::Calendars, rows("calendars")),
            versions: RecordStore::with_records(Category::Versions, rows("versions")),
            changelogs: RecordStore::new(Category::Changelogs),
            meta: value.get("project").cloned().unwrap_or(Value::Null),
        }
    }

    pub fn store(&self, category: Category) -> &RecordStore {
        match category {
            Category::Tasks => &self.tasks,
            Category::Resources => &self.resources,
            Category::Dependencies => &self.dependencies,
            Category::Assignments => &self.assignments,
            Category::Calendars => &self.calendars,
            Category::Versions => &self.versions,
            Category::Changelogs => &self.changelogs,
        }
    }

    pub fn store_mut(&mut self, category: Category) -> &mut RecordStore {
        match category {
            Category::Tasks => &mut self.tasks,
            Category::Resources => &mut self.resources,
            Category::Dependencies => &mut self.dependencies,
            Category::Assignments => &mut self.assignments,
            Category::Calendars => &mut self.calendars,
            Category::Versions => &mut self.versions,
            Category::Changelogs => &mut self.changelogs,
        }
    }

    /// Full dataset snapshot, keyed the way clients expect it.
    pub fn dataset(&self) -> Value {
        let mut out = serde_json::Map::new();
        for category in Category::ALL {
            out.insert(
                category.dataset_key().to_string(),
                self.store(category).snapshot(),
            );
        }
        out.insert("project".to_string(), self.meta.clone());
        Value::Object(out)
    }

    /// Lazily-loaded content of a saved version, fetched by explicit request
    /// only. `None` if the version does not exist.
    pub fn version_content(&self, version_id: &Value) -> Option<Value> {
        self.versions
            .get(version_id)
            .map(|rec| rec.get("content").cloned().unwrap_or(Value::Null))
    }
}

/// Where a project's dataset comes from.
#[derive(Debug, Clone)]
pub enum ProjectSource {
    /// JSON document on disk, re-read on every load/reset.
    File(PathBuf),
    /// Inline JSON document; reset restores this pristine copy.
    Inline(Value),
}

/// Static configuration for one project.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub id: ProjectId,
    pub name: String,
    pub source: ProjectSource,
}

impl ProjectConfig {
    pub fn file(id: ProjectId, name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.to_string(),
            source: ProjectSource::File(path.into()),
        }
    }

    pub fn inline(id: ProjectId, name: &str, value: Value) -> Self {
        Self {
            id,
            name: name.to_string(),
            source: ProjectSource::Inline(value),
        }
    }
}

/// A live project: immutable identity plus reloadable data.
///
/// `reset` replaces the data, never the identity.
#[derive(Debug)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    source: ProjectSource,
    pub data: ProjectData,
}

impl Project {
    pub fn new(config: ProjectConfig) -> Result<Self, StoreError> {
        let mut project = Self {
            id: config.id,
            name: config.name,
            source: config.source,
            data: ProjectData::empty(),
        };
        project.load()?;
        Ok(project)
    }

    /// (Re-)read the dataset from the project's source.
    pub fn load(&mut self) -> Result<(), StoreError> {
        let value = match &self.source {
            ProjectSource::File(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
            ProjectSource::Inline(value) => value.clone(),
        };
        self.data = ProjectData::from_value(&value);
        Ok(())
    }
}
