//! SQLite database for blob attribute storage.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use common::blob::{BlobAttributes, BlobId, BlobMetrics};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row,
};

use crate::error::{ObjectBlobStoreError, Result};

/// Attributes row as read back from SQLite.
#[derive(Debug, Clone)]
pub(crate) struct AttributesRow {
    pub blob_id: String,
    pub created_at: i64,
    pub attributes: BlobAttributes,
}

impl AttributesRow {
    pub fn id(&self) -> BlobId {
        BlobId::with_created(self.blob_id.clone(), from_millis(self.created_at))
    }
}

/// One page of the id listing
#[derive(Debug, Clone)]
pub(crate) struct IdRow {
    pub rowid: i64,
    pub blob_id: String,
    pub created_at: i64,
}

impl IdRow {
    pub fn id(&self) -> BlobId {
        BlobId::with_created(self.blob_id.clone(), from_millis(self.created_at))
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// SQLite database connection pool.
#[derive(Debug, Clone)]
pub(crate) struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection from a file path.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Create an in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Insert or replace the attributes of a blob.
    pub async fn upsert_attributes(
        &self,
        blob_id: &str,
        attributes: &BlobAttributes,
    ) -> Result<()> {
        let headers = serde_json::to_string(&attributes.headers).map_err(|source| {
            ObjectBlobStoreError::CorruptAttributes {
                blob_id: blob_id.to_string(),
                source,
            }
        })?;
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO blob_attributes
                (blob_id, headers, sha1, size, deleted, deleted_reason, deleted_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(blob_id) DO UPDATE SET
                headers = excluded.headers,
                sha1 = excluded.sha1,
                size = excluded.size,
                deleted = excluded.deleted,
                deleted_reason = excluded.deleted_reason,
                deleted_at = excluded.deleted_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(blob_id)
        .bind(headers)
        .bind(attributes.metrics.sha1.as_deref())
        .bind(attributes.metrics.content_size as i64)
        .bind(attributes.deleted)
        .bind(attributes.deleted_reason.as_deref())
        .bind(attributes.deleted_at.map(|at| at.timestamp_millis()))
        .bind(attributes.metrics.created.timestamp_millis())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_attributes(&self, blob_id: &str) -> Result<Option<AttributesRow>> {
        let row = sqlx::query(
            r#"
            SELECT blob_id, headers, sha1, size, deleted, deleted_reason, deleted_at, created_at
            FROM blob_attributes
            WHERE blob_id = ?
            "#,
        )
        .bind(blob_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| parse_row(&r)).transpose()
    }

    pub async fn has_attributes(&self, blob_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM blob_attributes WHERE blob_id = ?")
            .bind(blob_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Flag a live blob as deleted. False when the row is missing
    ///  or already flagged.
    pub async fn mark_deleted(&self, blob_id: &str, reason: &str) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            UPDATE blob_attributes
            SET deleted = 1, deleted_reason = ?, deleted_at = ?, updated_at = ?
            WHERE blob_id = ? AND deleted = 0
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(now)
        .bind(blob_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear_deleted(&self, blob_id: &str) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            UPDATE blob_attributes
            SET deleted = 0, deleted_reason = NULL, deleted_at = NULL, updated_at = ?
            WHERE blob_id = ? AND deleted = 1
            "#,
        )
        .bind(now)
        .bind(blob_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_attributes(&self, blob_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blob_attributes WHERE blob_id = ?")
            .bind(blob_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Keyset page of ids in insertion order, starting after `after_rowid`.
    ///  `updated_since` is a millisecond timestamp lower bound.
    pub async fn page_blob_ids(
        &self,
        after_rowid: i64,
        updated_since: Option<i64>,
        limit: i64,
    ) -> Result<Vec<IdRow>> {
        let rows = sqlx::query(
            r#"
            SELECT rowid AS row_id, blob_id, created_at
            FROM blob_attributes
            WHERE rowid > ? AND updated_at >= ?
            ORDER BY rowid
            LIMIT ?
            "#,
        )
        .bind(after_rowid)
        .bind(updated_since.unwrap_or(i64::MIN))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| IdRow {
                rowid: r.get("row_id"),
                blob_id: r.get("blob_id"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    /// Force the update stamp, used to age rows
    #[cfg(test)]
    pub async fn set_updated_at(&self, blob_id: &str, updated_at: i64) -> Result<()> {
        sqlx::query("UPDATE blob_attributes SET updated_at = ? WHERE blob_id = ?")
            .bind(updated_at)
            .bind(blob_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM blob_attributes")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    /// Close every pooled connection, checkpointing the WAL
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_row(r: &SqliteRow) -> Result<AttributesRow> {
    let blob_id: String = r.get("blob_id");
    let headers: String = r.get("headers");
    let headers: BTreeMap<String, String> =
        serde_json::from_str(&headers).map_err(|source| ObjectBlobStoreError::CorruptAttributes {
            blob_id: blob_id.clone(),
            source,
        })?;
    let created_at: i64 = r.get("created_at");
    let size: i64 = r.get("size");
    let deleted_at: Option<i64> = r.get("deleted_at");

    let attributes = BlobAttributes {
        headers,
        metrics: BlobMetrics {
            created: from_millis(created_at),
            sha1: r.get("sha1"),
            content_size: size.max(0) as u64,
        },
        deleted: r.get::<i32, _>("deleted") != 0,
        deleted_reason: r.get("deleted_reason"),
        deleted_at: deleted_at.map(from_millis),
    };

    Ok(AttributesRow {
        blob_id,
        created_at,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::blob::BLOB_NAME_HEADER;

    fn attributes(name: &str) -> BlobAttributes {
        let mut headers = BTreeMap::new();
        headers.insert(BLOB_NAME_HEADER.to_string(), name.to_string());
        BlobAttributes::new(headers, BlobMetrics::for_content(b"hello"))
    }

    #[tokio::test]
    async fn test_attributes_persist() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_attributes("abc", &attributes("a.txt")).await.unwrap();

        let row = db.get_attributes("abc").await.unwrap().unwrap();
        assert_eq!(row.attributes.blob_name(), Some("a.txt"));
        assert_eq!(row.attributes.metrics.content_size, 5);
        assert_eq!(
            row.attributes.metrics.sha1.as_deref(),
            Some("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d")
        );
        assert!(!row.attributes.deleted);
        assert!(db.get_attributes("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_flags() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_attributes("abc", &attributes("a.txt")).await.unwrap();

        assert!(db.mark_deleted("abc", "cleanup").await.unwrap());
        assert!(!db.mark_deleted("abc", "again").await.unwrap());
        let row = db.get_attributes("abc").await.unwrap().unwrap();
        assert!(row.attributes.deleted);
        assert_eq!(row.attributes.deleted_reason.as_deref(), Some("cleanup"));
        assert!(row.attributes.deleted_at.is_some());

        assert!(db.clear_deleted("abc").await.unwrap());
        assert!(!db.clear_deleted("abc").await.unwrap());
        assert!(!db.get_attributes("abc").await.unwrap().unwrap().attributes.deleted);
    }

    #[tokio::test]
    async fn test_paging_and_updated_filter() {
        let db = Database::in_memory().await.unwrap();
        for id in ["a", "b", "c"] {
            db.upsert_attributes(id, &attributes(id)).await.unwrap();
        }
        db.set_updated_at("a", 0).await.unwrap();

        let first = db.page_blob_ids(0, None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let rest = db.page_blob_ids(first[1].rowid, None, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].blob_id, "c");

        let recent = db.page_blob_ids(0, Some(1), 10).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|r| r.blob_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
