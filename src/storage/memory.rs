//! An in-memory `StorageAdapter` backed by a `BTreeMap`, used by unit
//! tests to exercise the pagination engine and mutation service without
//! spinning up a database file. Name ordering falls out of `BTreeMap`'s
//! key ordering by construction.

use super::{Row, StorageAdapter};
use crate::error::{ArchiveError, ArchiveResult};
use crate::name::Name;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryAdapter {
    rows: RwLock<BTreeMap<Name, Row>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn insert(&self, row: Row) -> ArchiveResult<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&row.name) {
            return Err(ArchiveError::AlreadyExists(row.name.into_string()));
        }
        rows.insert(row.name.clone(), row);
        Ok(())
    }

    async fn get_by_name(&self, name: &Name) -> ArchiveResult<Vec<Row>> {
        let rows = self.rows.read().await;
        Ok(rows.get(name).cloned().into_iter().collect())
    }

    async fn update_blob(
        &self,
        name: &Name,
        blob: &[u8],
        new_etag: &str,
        expected_etag: Option<&str>,
    ) -> ArchiveResult<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(name)
            .ok_or_else(|| ArchiveError::NotFound(name.to_string()))?;
        if let Some(expected) = expected_etag {
            if !expected.is_empty() && expected != row.etag {
                return Err(ArchiveError::FailedPrecondition(format!(
                    "etag mismatch for {name}"
                )));
            }
        }
        row.data = blob.to_vec();
        row.etag = new_etag.to_string();
        Ok(())
    }

    async fn delete_by_name(&self, name: &Name) -> ArchiveResult<u64> {
        let mut rows = self.rows.write().await;
        Ok(if rows.remove(name).is_some() { 1 } else { 0 })
    }

    async fn delete_with_children(&self, name: &Name) -> ArchiveResult<u64> {
        let mut rows = self.rows.write().await;
        let prefix = format!("{name}/records/");
        let doomed: Vec<Name> = rows
            .keys()
            .filter(|candidate| candidate.as_str() == name.as_str() || {
                candidate.as_str().starts_with(&prefix)
            })
            .cloned()
            .collect();
        let count = doomed.len() as u64;
        for victim in doomed {
            rows.remove(&victim);
        }
        Ok(count)
    }

    async fn scan(&self, after: Option<&Name>, limit: usize) -> ArchiveResult<Vec<Row>> {
        let rows = self.rows.read().await;
        let iter = rows.range(..);
        let filtered = iter.filter(|(name, _)| match after {
            Some(after) => *name > after,
            None => true,
        });
        Ok(filtered.take(limit).map(|(_, row)| row.clone()).collect())
    }

    async fn scan_inclusive(&self, start: &Name, limit: usize) -> ArchiveResult<Vec<Row>> {
        let rows = self.rows.read().await;
        Ok(rows
            .range(start.clone()..)
            .take(limit)
            .map(|(_, row)| row.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str) -> Row {
        Row {
            parent: "ns".to_string(),
            result_id: "r".to_string(),
            id: "r".to_string(),
            name: Name::new(name),
            data: vec![],
            etag: "e0".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_then_get() {
        let store = MemoryAdapter::new();
        store.insert(row("ns/results/a")).await.unwrap();
        let found = store.get_by_name(&Name::new("ns/results/a")).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = MemoryAdapter::new();
        store.insert(row("ns/results/a")).await.unwrap();
        let err = store.insert(row("ns/results/a")).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn update_enforces_etag() {
        let store = MemoryAdapter::new();
        store.insert(row("ns/results/a")).await.unwrap();
        let name = Name::new("ns/results/a");
        let err = store
            .update_blob(&name, b"x", "e1", Some("wrong"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::FailedPrecondition);

        store
            .update_blob(&name, b"x", "e1", Some("e0"))
            .await
            .unwrap();
        let found = &store.get_by_name(&name).await.unwrap()[0];
        assert_eq!(found.etag, "e1");
    }

    #[tokio::test]
    async fn scan_is_ascending_and_excludes_cursor() {
        let store = MemoryAdapter::new();
        for n in ["a", "b", "c"] {
            store.insert(row(&format!("ns/results/{n}"))).await.unwrap();
        }
        let page = store.scan(None, 10).await.unwrap();
        let names: Vec<_> = page.iter().map(|r| r.name.to_string()).collect();
        assert_eq!(names, vec!["ns/results/a", "ns/results/b", "ns/results/c"]);

        let after_a = store
            .scan(Some(&Name::new("ns/results/a")), 10)
            .await
            .unwrap();
        assert_eq!(after_a.len(), 2);
    }

    #[tokio::test]
    async fn delete_with_children_cascades() {
        let store = MemoryAdapter::new();
        store.insert(row("ns/results/a")).await.unwrap();
        store.insert(row("ns/results/a/records/1")).await.unwrap();
        store.insert(row("ns/results/a/records/2")).await.unwrap();
        store.insert(row("ns/results/b")).await.unwrap();

        let affected = store
            .delete_with_children(&Name::new("ns/results/a"))
            .await
            .unwrap();
        assert_eq!(affected, 3);
        assert!(store
            .get_by_name(&Name::new("ns/results/b"))
            .await
            .unwrap()
            .len()
            == 1);
    }
}
