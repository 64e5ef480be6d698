//! Mutation service: Create/Get/Update (no-mask and field-mask
//! modes)/Delete.
//!
//! Generic over any `model::Entity` so the same handler shape serves
//! `ResultRecord` (the RPC surface) and `ExecutionRecord` (records
//! are written by the same storage path even though no RPC method
//! exposes them directly).

use crate::error::{ArchiveError, ArchiveResult};
use crate::model::Entity;
use crate::name::Name;
use crate::storage::{Row, StorageAdapter};
use crate::{encoding, name};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// A dot-separated field mask, e.g. `["annotations", "annotations.team"]`.
pub type UpdateMask = Vec<String>;

pub struct MutationService<S: StorageAdapter> {
    storage: Arc<S>,
}

impl<S: StorageAdapter> MutationService<S> {
    pub fn new(storage: Arc<S>) -> Self {
        MutationService { storage }
    }

    /// Create a Result under `parent`. Mints `id`, `name`, `created_time`,
    /// and the initial `etag`; encodes and inserts.
    pub async fn create_result(
        &self,
        parent: &str,
        annotations: crate::model::Annotations,
    ) -> ArchiveResult<crate::model::ResultRecord> {
        let id = Uuid::new_v4().to_string();
        let name = Name::for_result(parent, &id)?;
        let record = crate::model::ResultRecord {
            name: name.clone(),
            id: id.clone(),
            created_time: Utc::now(),
            annotations,
            etag: new_etag(),
            extra: Default::default(),
        };
        let blob = encoding::encode(&record)?;
        let row = Row {
            parent: parent.to_string(),
            result_id: id.clone(),
            id,
            name,
            data: blob,
            etag: record.etag.clone(),
        };
        match self.storage.insert(row).await {
            Ok(()) => Ok(record),
            // Defensive: ids are server-minted UUIDs, a collision should
            // never happen in practice.
            Err(e) => Err(e),
        }
    }

    /// Creates a Record under an existing Result (internal path; no RPC
    /// method surfaces it directly).
    pub async fn create_record(
        &self,
        result_name: &Name,
        data: crate::model::Data,
    ) -> ArchiveResult<crate::model::ExecutionRecord> {
        let id = Uuid::new_v4().to_string();
        let record_name = Name::for_record(result_name, &id)?;
        let record = crate::model::ExecutionRecord {
            name: record_name.clone(),
            id: id.clone(),
            data,
            etag: new_etag(),
            extra: Default::default(),
        };
        let (parent, result_id) = name::Name::parse_result(result_name.as_str())?;
        let blob = encoding::encode(&record)?;
        let row = Row {
            parent,
            result_id,
            id,
            name: record_name,
            data: blob,
            etag: record.etag.clone(),
        };
        self.storage.insert(row).await?;
        Ok(record)
    }

    /// Simple lookup by full name. If the adapter surprisingly returns
    /// more than one row for the same name, logs a warning and returns the
    /// first — names are unique by construction, this branch is purely
    /// defensive.
    pub async fn get<T: Entity>(&self, name: &Name) -> ArchiveResult<T> {
        let mut rows = self.storage.get_by_name(name).await?;
        if rows.is_empty() {
            return Err(ArchiveError::NotFound(name.to_string()));
        }
        if rows.len() > 1 {
            warn!(%name, count = rows.len(), "storage returned multiple rows for one name");
        }
        let row = rows.remove(0);
        encoding::decode(&row.data)
    }

    /// Update without a field mask: the supplied value wholesale
    /// replaces the stored one, then immutability is checked against the
    /// prior stored record.
    pub async fn update_no_mask<T: Entity>(
        &self,
        name: &Name,
        replacement: T,
        expected_etag: Option<&str>,
    ) -> ArchiveResult<T> {
        let prior: T = self.get(name).await?;
        if !replacement.immutable_fields_match(&prior) {
            return Err(ArchiveError::invalid_argument(
                "update would change an immutable field (name, id, or created_time)",
            ));
        }
        self.write_merged(name, replacement, expected_etag).await
    }

    /// Update with a field mask: each mask path is validated against the
    /// entity's known schema (unknown -> not-found, preserving prior
    /// wire-compat behaviour), then copied from `partial` into a clone of
    /// the stored record before the immutability check.
    pub async fn update_with_mask<T: Entity>(
        &self,
        name: &Name,
        partial: T,
        mask: &UpdateMask,
        expected_etag: Option<&str>,
    ) -> ArchiveResult<T> {
        let prior: T = self.get(name).await?;
        let known_roots = T::known_mask_roots();

        let prior_value = serde_json::to_value(&prior).map_err(|e| {
            ArchiveError::internal(format!("failed to project stored record to JSON: {e}"))
        })?;
        let partial_value = serde_json::to_value(&partial).map_err(|e| {
            ArchiveError::internal(format!("failed to project update payload to JSON: {e}"))
        })?;

        let mut merged_value = prior_value;
        for path in mask {
            let root = path.split('.').next().unwrap_or("");
            if !known_roots.contains(&root) {
                return Err(ArchiveError::not_found(format!(
                    "unknown field mask path: {path:?}"
                )));
            }
            let source = get_by_dotted(&partial_value, path).unwrap_or(&Value::Null);
            set_by_dotted(&mut merged_value, path, source.clone());
        }

        let merged: T = serde_json::from_value(merged_value)
            .map_err(|e| ArchiveError::internal(format!("field mask merge type mismatch: {e}")))?;

        if !merged.immutable_fields_match(&prior) {
            return Err(ArchiveError::invalid_argument(
                "update would change an immutable field (name, id, or created_time)",
            ));
        }

        self.write_merged(name, merged, expected_etag).await
    }

    async fn write_merged<T: Entity>(
        &self,
        name: &Name,
        mut merged: T,
        expected_etag: Option<&str>,
    ) -> ArchiveResult<T> {
        let new_etag = new_etag();
        merged.set_etag(new_etag.clone());
        let blob = encoding::encode(&merged)?;
        self.storage
            .update_blob(name, &blob, &new_etag, expected_etag)
            .await?;
        Ok(merged)
    }

    /// Deletes the row named `name`. Zero rows affected is not-found.
    pub async fn delete(&self, name: &Name, expected_etag: Option<&str>) -> ArchiveResult<()> {
        if let Some(etag) = expected_etag.filter(|e| !e.is_empty()) {
            let rows = self.storage.get_by_name(name).await?;
            match rows.first() {
                Some(row) if row.etag != etag => {
                    return Err(ArchiveError::FailedPrecondition(format!(
                        "etag mismatch for {name}"
                    )));
                }
                None => return Err(ArchiveError::NotFound(name.to_string())),
                _ => {}
            }
        }
        let affected = self.storage.delete_by_name(name).await?;
        if affected == 0 {
            return Err(ArchiveError::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Deletes a Result and cascades to its Records in one critical
    /// section.
    pub async fn delete_result_cascading(
        &self,
        name: &Name,
        expected_etag: Option<&str>,
    ) -> ArchiveResult<()> {
        if let Some(etag) = expected_etag.filter(|e| !e.is_empty()) {
            let rows = self.storage.get_by_name(name).await?;
            match rows.first() {
                Some(row) if row.etag != etag => {
                    return Err(ArchiveError::FailedPrecondition(format!(
                        "etag mismatch for {name}"
                    )));
                }
                None => return Err(ArchiveError::NotFound(name.to_string())),
                _ => {}
            }
        }
        let affected = self.storage.delete_with_children(name).await?;
        if affected == 0 {
            return Err(ArchiveError::NotFound(name.to_string()));
        }
        Ok(())
    }
}

fn new_etag() -> String {
    Uuid::new_v4().to_string()
}

fn get_by_dotted<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn set_by_dotted(value: &mut Value, path: &str, new_value: Value) {
    let mut current = value;
    let segments: Vec<&str> = path.split('.').collect();
    for segment in &segments[..segments.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        current = current
            .as_object_mut()
            .expect("just ensured object")
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    if let Some(last) = segments.last() {
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        current
            .as_object_mut()
            .expect("just ensured object")
            .insert(last.to_string(), new_value);
    }
}
