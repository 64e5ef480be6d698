//! Storage adapter: a minimal row-oriented contract
//! against a relational store keyed by `(parent, name)`. Payloads are
//! opaque byte blobs — the adapter never inspects `data`.

pub mod memory;
pub mod sqlite;

use crate::error::ArchiveResult;
use crate::name::Name;
use async_trait::async_trait;

/// A single stored row, matching the persisted schema:
/// `(parent, result_id, id, name, data, etag)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub parent: String,
    pub result_id: String,
    pub id: String,
    pub name: Name,
    pub data: Vec<u8>,
    pub etag: String,
}

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Fails with already-exists if `row.name` is already present.
    async fn insert(&self, row: Row) -> ArchiveResult<()>;

    /// Lookup by exact name. Returns every row matching `name`; callers
    /// should treat more than one as a defensive, logged anomaly (names
    /// are unique by construction) rather than an error.
    async fn get_by_name(&self, name: &Name) -> ArchiveResult<Vec<Row>>;

    /// Fails with not-found if no row named `name` exists; fails with
    /// failed-precondition if `expected_etag` is `Some` and does not
    /// match the row's current etag.
    async fn update_blob(
        &self,
        name: &Name,
        blob: &[u8],
        new_etag: &str,
        expected_etag: Option<&str>,
    ) -> ArchiveResult<()>;

    /// Deletes the row named exactly `name`. Returns the number of rows
    /// affected (0 or 1).
    async fn delete_by_name(&self, name: &Name) -> ArchiveResult<u64>;

    /// Deletes `name` and every row whose name is a strict extension of
    /// it (i.e. `<name>/records/...`), in one critical section, so a
    /// Result delete cascades to its Records atomically from the
    /// client's perspective. Returns total rows affected.
    async fn delete_with_children(&self, name: &Name) -> ArchiveResult<u64>;

    /// Rows with name > `after` (or from the beginning if `after` is
    /// `None`), up to `limit`, ascending by name.
    async fn scan(&self, after: Option<&Name>, limit: usize) -> ArchiveResult<Vec<Row>>;

    /// Rows with name >= `start`, up to `limit`, ascending by name. Used
    /// to resume a paginated request: the token names the first
    /// candidate of the new page, not the last of the previous one.
    async fn scan_inclusive(&self, start: &Name, limit: usize) -> ArchiveResult<Vec<Row>>;
}
