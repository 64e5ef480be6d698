//! Turso-backed `StorageAdapter`: builds a local database with
//! `Builder::new_local`, issues parameterized `turso::Value` queries,
//! walks `turso::Rows` with `.next().await`.
//!
//! One table, no tree/prefix abstraction, so it holds a single
//! `Connection` behind a `tokio::sync::Mutex` rather than a
//! multi-connection pool with a separate writer gate — turso serializes
//! writers at the engine level anyway, and the single table here has no
//! concurrent-reader workload worth a pool (see DESIGN.md).

use super::{Row, StorageAdapter};
use crate::error::{ArchiveError, ArchiveResult};
use crate::name::Name;
use async_trait::async_trait;
use tokio::sync::Mutex;
use turso::{Builder, Connection, Value};

pub struct SqliteAdapter {
    conn: Mutex<Connection>,
}

impl SqliteAdapter {
    /// Opens (and, if needed, creates) the database at `path`. Pass
    /// `":memory:"` for an ephemeral database.
    pub async fn open(path: &str) -> ArchiveResult<Self> {
        let database = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ArchiveError::internal(format!("failed to open database: {e}")))?;
        let conn = database
            .connect()
            .map_err(|e| ArchiveError::internal(format!("failed to connect: {e}")))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS rows (
                parent TEXT NOT NULL,
                result_id TEXT NOT NULL,
                id TEXT NOT NULL,
                name TEXT NOT NULL UNIQUE,
                data BLOB NOT NULL,
                etag TEXT NOT NULL
            )",
            (),
        )
        .await?;
        conn.execute("CREATE INDEX IF NOT EXISTS rows_name_idx ON rows(name)", ())
            .await?;
        Ok(SqliteAdapter {
            conn: Mutex::new(conn),
        })
    }

    fn row_from_query(row: &turso::Row) -> ArchiveResult<Row> {
        let text_at = |idx: usize| -> ArchiveResult<String> {
            match row.get_value(idx) {
                Ok(Value::Text(s)) => Ok(s),
                other => Err(ArchiveError::internal(format!(
                    "unexpected column type at index {idx}: {other:?}"
                ))),
            }
        };
        let blob_at = |idx: usize| -> ArchiveResult<Vec<u8>> {
            match row.get_value(idx) {
                Ok(Value::Blob(b)) => Ok(b),
                other => Err(ArchiveError::internal(format!(
                    "unexpected column type at index {idx}: {other:?}"
                ))),
            }
        };
        Ok(Row {
            parent: text_at(0)?,
            result_id: text_at(1)?,
            id: text_at(2)?,
            name: Name::new(text_at(3)?),
            data: blob_at(4)?,
            etag: text_at(5)?,
        })
    }
}

const SELECT_COLUMNS: &str = "parent, result_id, id, name, data, etag";

#[async_trait]
impl StorageAdapter for SqliteAdapter {
    async fn insert(&self, row: Row) -> ArchiveResult<()> {
        let conn = self.conn.lock().await;
        let result = conn
            .execute(
                "INSERT INTO rows (parent, result_id, id, name, data, etag) VALUES (?, ?, ?, ?, ?, ?)",
                (
                    Value::Text(row.parent.clone()),
                    Value::Text(row.result_id.clone()),
                    Value::Text(row.id.clone()),
                    Value::Text(row.name.to_string()),
                    Value::Blob(row.data.clone()),
                    Value::Text(row.etag.clone()),
                ),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(ArchiveError::AlreadyExists(row.name.into_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_by_name(&self, name: &Name) -> ArchiveResult<Vec<Row>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM rows WHERE name = ?"),
                (Value::Text(name.to_string()),),
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::row_from_query(&row)?);
        }
        Ok(out)
    }

    async fn update_blob(
        &self,
        name: &Name,
        blob: &[u8],
        new_etag: &str,
        expected_etag: Option<&str>,
    ) -> ArchiveResult<()> {
        let conn = self.conn.lock().await;
        if let Some(expected) = expected_etag.filter(|e| !e.is_empty()) {
            let mut rows = conn
                .query(
                    "SELECT etag FROM rows WHERE name = ?",
                    (Value::Text(name.to_string()),),
                )
                .await?;
            let current = match rows.next().await? {
                Some(row) => match row.get_value(0) {
                    Ok(Value::Text(etag)) => etag,
                    _ => return Err(ArchiveError::internal("etag column had unexpected type")),
                },
                None => return Err(ArchiveError::NotFound(name.to_string())),
            };
            if current != expected {
                return Err(ArchiveError::FailedPrecondition(format!(
                    "etag mismatch for {name}"
                )));
            }
        }
        let affected = conn
            .execute(
                "UPDATE rows SET data = ?, etag = ? WHERE name = ?",
                (
                    Value::Blob(blob.to_vec()),
                    Value::Text(new_etag.to_string()),
                    Value::Text(name.to_string()),
                ),
            )
            .await?;
        if affected == 0 {
            return Err(ArchiveError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn delete_by_name(&self, name: &Name) -> ArchiveResult<u64> {
        let conn = self.conn.lock().await;
        let affected = conn
            .execute(
                "DELETE FROM rows WHERE name = ?",
                (Value::Text(name.to_string()),),
            )
            .await?;
        Ok(affected)
    }

    async fn delete_with_children(&self, name: &Name) -> ArchiveResult<u64> {
        let conn = self.conn.lock().await;
        // Children live at `<name>/records/...`; bound the range with the
        // next byte after '/' (ASCII '0') rather than a LIKE pattern, so a
        // literal `_` or `%` in a record id can't be misread as a wildcard.
        let lower = format!("{name}/records/");
        let upper = format!("{name}/records0");
        let affected = conn
            .execute(
                "DELETE FROM rows WHERE name = ? OR (name >= ? AND name < ?)",
                (
                    Value::Text(name.to_string()),
                    Value::Text(lower),
                    Value::Text(upper),
                ),
            )
            .await?;
        Ok(affected)
    }

    async fn scan(&self, after: Option<&Name>, limit: usize) -> ArchiveResult<Vec<Row>> {
        let conn = self.conn.lock().await;
        let limit = limit as i64;
        let mut rows = match after {
            Some(after) => {
                conn.query(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM rows WHERE name > ? ORDER BY name ASC LIMIT ?"
                    ),
                    (Value::Text(after.to_string()), Value::Integer(limit)),
                )
                .await?
            }
            None => {
                conn.query(
                    &format!("SELECT {SELECT_COLUMNS} FROM rows ORDER BY name ASC LIMIT ?"),
                    (Value::Integer(limit),),
                )
                .await?
            }
        };
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::row_from_query(&row)?);
        }
        Ok(out)
    }

    async fn scan_inclusive(&self, start: &Name, limit: usize) -> ArchiveResult<Vec<Row>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM rows WHERE name >= ? ORDER BY name ASC LIMIT ?"
                ),
                (Value::Text(start.to_string()), Value::Integer(limit as i64)),
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::row_from_query(&row)?);
        }
        Ok(out)
    }
}

fn is_unique_violation(e: &turso::Error) -> bool {
    e.to_string().to_lowercase().contains("unique")
}
