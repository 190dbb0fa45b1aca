//! Phantom-id reconciliation: client temp ids → server permanent ids.
//!
//! Clients create records optimistically under `$PhantomId` markers. One
//! [`Reconciler`] lives for exactly one `projectChange` batch: it assigns
//! permanent ids to added records, rewrites links that still point at
//! phantom ids (including cross-category links — tasks are processed before
//! dependencies, see [`Category::ALL`]), resolves `$PhantomParentId`, and
//! applies the result to the project's stores.
//!
//! Resubmission safety: a phantom id that is already mapped in this pass is
//! *not* issued a second permanent id — the record is re-tagged as an update
//! of the id it already got.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::protocol::{
    Category, ChangeSet, Record, StoreChanges, PHANTOM_FIELD_PREFIX, PHANTOM_ID_FIELD,
    PHANTOM_PARENT_ID_FIELD,
};
use crate::store::{IdGenerator, ProjectData};

/// One reconciliation pass over a change batch.
pub struct Reconciler {
    /// phantom id → permanent id, scoped to this batch.
    map: HashMap<String, u64>,
    /// Every permanent id assigned in this pass. An update targeting one of
    /// these is valid even though the record is not in the store yet — the
    /// added records of the same batch land first.
    issued: HashSet<u64>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            issued: HashSet::new(),
        }
    }

    fn issued_this_pass(&self, id: &Value) -> bool {
        id.as_u64().is_some_and(|id| self.issued.contains(&id))
    }

    /// Resolve phantom ids in `changes`, apply the batch to `data`.
    ///
    /// Returns `true` iff at least one phantom id was resolved — the caller
    /// uses this to decide whether the originator must be included in the
    /// broadcast (it needs the permanent ids it does not have yet).
    pub fn run(
        &mut self,
        data: &mut ProjectData,
        ids: &mut IdGenerator,
        changes: &mut ChangeSet,
    ) -> bool {
        for category in Category::ALL {
            if let Some(store_changes) = changes.get_mut(category) {
                self.reconcile_store(category, data, ids, store_changes);
            }
        }
        !self.map.is_empty()
    }

    fn reconcile_store(
        &mut self,
        category: Category,
        data: &mut ProjectData,
        ids: &mut IdGenerator,
        changes: &mut StoreChanges,
    ) {
        // Added first: every record either gets a fresh permanent id, or —
        // if its phantom id was already resolved in this pass — is re-tagged
        // as an update of the id it already owns.
        let mut index = 0;
        while index < changes.added.len() {
            let record = &mut changes.added[index];
            let phantom = record
                .get(PHANTOM_ID_FIELD)
                .and_then(Value::as_str)
                .map(str::to_string);

            let already_assigned = phantom
                .as_deref()
                .and_then(|p| self.map.get(p))
                .copied();

            if let Some(id) = already_assigned {
                record.insert("id".to_string(), Value::from(id));
                record.remove(PHANTOM_ID_FIELD);
                self.resolve_record(category, record);
                let record = changes.added.remove(index);
                changes.updated.push(record);
                continue;
            }

            let id = ids.next_id();
            record.insert("id".to_string(), Value::from(id));
            self.issued.insert(id);
            if let Some(phantom) = phantom {
                // Keep the marker on the echoed record: the originating
                // client matches permanent ids back by phantom id.
                self.map.insert(phantom, id);
            }
            self.resolve_record(category, record);
            index += 1;
        }

        // Updated records must already exist; an unknown id means the client
        // and server diverged, which is a skip, not a fatal error.
        changes.updated.retain_mut(|record| {
            self.resolve_record(category, record);
            match record.get("id") {
                Some(id) if data.store(category).contains(id) || self.issued_this_pass(id) => {
                    true
                }
                Some(id) => {
                    log::warn!(
                        "Update for unknown record {id} in store '{}', skipping",
                        category.as_str()
                    );
                    false
                }
                None => {
                    log::warn!(
                        "Update without id in store '{}', skipping",
                        category.as_str()
                    );
                    false
                }
            }
        });

        data.store_mut(category).apply(changes);

        // Lazily-loaded fields never travel implicitly.
        for field in category.lazy_fields() {
            for record in changes.added.iter_mut().chain(changes.updated.iter_mut()) {
                record.remove(*field);
            }
        }
    }

    /// Resolve the phantom parent link and all declared link fields.
    fn resolve_record(&self, category: Category, record: &mut Record) {
        if let Some(parent) = record.remove(PHANTOM_PARENT_ID_FIELD) {
            // The phantom parent field is dropped after resolution either
            // way; an unmapped value means the parent was not part of this
            // batch and the client will re-send a real parentId.
            if let Some(id) = parent.as_str().and_then(|p| self.map.get(p)) {
                record.insert("parentId".to_string(), Value::from(*id));
            }
        }

        for field in category.link_fields() {
            if let Some(value) = record.get_mut(*field) {
                self.substitute(value);
            }
        }
    }

    /// Rewrite one link value: a mapped phantom string becomes the permanent
    /// id; nested plain objects are walked, arrays are not (they hold
    /// independent records, not links), phantom-marker keys are not links.
    fn substitute(&self, value: &mut Value) {
        match value {
            Value::String(s) => {
                if let Some(id) = self.map.get(s.as_str()) {
                    *value = Value::from(*id);
                }
            }
            Value::Object(fields) => {
                for (key, nested) in fields {
                    if !key.starts_with(PHANTOM_FIELD_PREFIX) {
                        self.substitute(nested);
                    }
                }
            }
            _ => {}
        }
    }
}
