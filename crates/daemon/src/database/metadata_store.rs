use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use common::blob::BlobId;
use common::content::{
    Asset, BlobRef, ContentError, Continuation, MetadataStore, Repository, RepositoryKind,
};

use crate::database::Database;

fn backend(err: impl Into<anyhow::Error>) -> ContentError {
    ContentError::Backend(err.into())
}

fn repository_from_row(row: &SqliteRow) -> Result<Repository, ContentError> {
    let kind: String = row.get("kind");
    Ok(Repository {
        name: row.get("name"),
        format: row.get("format"),
        kind: kind
            .parse::<RepositoryKind>()
            .map_err(|e| backend(anyhow::anyhow!(e)))?,
        blob_store_name: row.get("blob_store_name"),
        started: row.get::<i64, _>("started") != 0,
    })
}

fn asset_from_row(row: &SqliteRow) -> Result<Asset, ContentError> {
    let checksums: String = row.get("checksums");
    let checksums: BTreeMap<String, String> = serde_json::from_str(&checksums).map_err(backend)?;
    let blob_created: Option<DateTime<chrono::Utc>> = row
        .get::<Option<i64>, _>("blob_created")
        .and_then(DateTime::from_timestamp_millis);
    let blob_store: Option<String> = row.get("blob_store");
    let blob_id: Option<String> = row.get("blob_id");

    let blob_ref = match (blob_store, blob_id) {
        (Some(store), Some(id)) => {
            let id = match blob_created {
                Some(created) => BlobId::with_created(id, created),
                None => BlobId::new(id),
            };
            Some(BlobRef::new(store, id))
        }
        _ => None,
    };

    Ok(Asset {
        repository: row.get("repository"),
        path: row.get("path"),
        blob_ref,
        checksums,
        blob_created,
    })
}

const ASSET_COLUMNS: &str = "repository, path, blob_store, blob_id, blob_created, checksums";

#[async_trait]
impl MetadataStore for Database {
    async fn repository(&self, name: &str) -> Result<Option<Repository>, ContentError> {
        let row = sqlx::query(
            r#"
            SELECT name, format, kind, blob_store_name, started
            FROM repositories
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&**self)
        .await
        .map_err(backend)?;

        row.as_ref().map(repository_from_row).transpose()
    }

    async fn repositories(&self) -> Result<Vec<Repository>, ContentError> {
        let rows = sqlx::query(
            r#"
            SELECT name, format, kind, blob_store_name, started
            FROM repositories
            ORDER BY name
            "#,
        )
        .fetch_all(&**self)
        .await
        .map_err(backend)?;

        rows.iter().map(repository_from_row).collect()
    }

    async fn repositories_for_blob_store(
        &self,
        blob_store: &str,
    ) -> Result<Vec<Repository>, ContentError> {
        let rows = sqlx::query(
            r#"
            SELECT name, format, kind, blob_store_name, started
            FROM repositories
            WHERE blob_store_name = ?
            ORDER BY name
            "#,
        )
        .bind(blob_store)
        .fetch_all(&**self)
        .await
        .map_err(backend)?;

        rows.iter().map(repository_from_row).collect()
    }

    async fn save_repository(&self, repository: Repository) -> Result<(), ContentError> {
        sqlx::query(
            r#"
            INSERT INTO repositories (name, format, kind, blob_store_name, started)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                format = excluded.format,
                kind = excluded.kind,
                blob_store_name = excluded.blob_store_name,
                started = excluded.started
            "#,
        )
        .bind(&repository.name)
        .bind(&repository.format)
        .bind(repository.kind.to_string())
        .bind(repository.blob_store_name.as_deref())
        .bind(repository.started)
        .execute(&**self)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn browse_assets(
        &self,
        repository: &str,
        limit: usize,
        token: Option<&str>,
    ) -> Result<Continuation<Asset>, ContentError> {
        // one extra row tells whether another page exists
        let fetch = i64::try_from(limit).unwrap_or(i64::MAX).saturating_add(1);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ASSET_COLUMNS}
            FROM assets
            WHERE repository = ? AND (? IS NULL OR path > ?)
            ORDER BY path
            LIMIT ?
            "#
        ))
        .bind(repository)
        .bind(token)
        .bind(token)
        .bind(fetch)
        .fetch_all(&**self)
        .await
        .map_err(backend)?;

        let mut items = rows
            .iter()
            .map(asset_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let next_token = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|asset| asset.path.clone())
        } else {
            None
        };

        Ok(Continuation { items, next_token })
    }

    async fn find_asset(
        &self,
        repository: &str,
        path: &str,
    ) -> Result<Option<Asset>, ContentError> {
        let row = sqlx::query(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE repository = ? AND path = ?"
        ))
        .bind(repository)
        .bind(path)
        .fetch_optional(&**self)
        .await
        .map_err(backend)?;

        row.as_ref().map(asset_from_row).transpose()
    }

    async fn find_asset_by_blob_ref(
        &self,
        repository: &str,
        blob_ref: &BlobRef,
    ) -> Result<Option<Asset>, ContentError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {ASSET_COLUMNS}
            FROM assets
            WHERE repository = ? AND blob_store = ? AND blob_id = ?
            LIMIT 1
            "#
        ))
        .bind(repository)
        .bind(&blob_ref.store)
        .bind(blob_ref.blob_id.as_str())
        .fetch_optional(&**self)
        .await
        .map_err(backend)?;

        row.as_ref().map(asset_from_row).transpose()
    }

    async fn save_asset(&self, asset: Asset) -> Result<(), ContentError> {
        let checksums = serde_json::to_string(&asset.checksums).map_err(backend)?;
        let (blob_store, blob_id) = match &asset.blob_ref {
            Some(blob_ref) => (
                Some(blob_ref.store.as_str()),
                Some(blob_ref.blob_id.as_str()),
            ),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO assets (repository, path, blob_store, blob_id, blob_created, checksums)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(repository, path) DO UPDATE SET
                blob_store = excluded.blob_store,
                blob_id = excluded.blob_id,
                blob_created = excluded.blob_created,
                checksums = excluded.checksums
            "#,
        )
        .bind(&asset.repository)
        .bind(&asset.path)
        .bind(blob_store)
        .bind(blob_id)
        .bind(asset.blob_created.map(|created| created.timestamp_millis()))
        .bind(checksums)
        .execute(&**self)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn delete_asset(&self, repository: &str, path: &str) -> Result<bool, ContentError> {
        let result = sqlx::query("DELETE FROM assets WHERE repository = ? AND path = ?")
            .bind(repository)
            .bind(path)
            .execute(&**self)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::content::find_asset_by_name;

    fn asset(path: &str, blob: &str) -> Asset {
        Asset::new("raw-hosted", path).with_blob(
            BlobRef::new("default", BlobId::with_created(blob, chrono::Utc::now())),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d",
        )
    }

    #[tokio::test]
    async fn test_repositories_round_trip_through_sql() {
        let db = Database::in_memory().await.unwrap();
        db.save_repository(Repository::hosted("raw-hosted", "raw", "default"))
            .await
            .unwrap();
        db.save_repository(Repository {
            name: "group".to_string(),
            format: "raw".to_string(),
            kind: RepositoryKind::Group,
            blob_store_name: None,
            started: false,
        })
        .await
        .unwrap();

        let repo = db.repository("raw-hosted").await.unwrap().unwrap();
        assert_eq!(repo, Repository::hosted("raw-hosted", "raw", "default"));
        assert_eq!(db.repositories().await.unwrap().len(), 2);

        let backed = db.repositories_for_blob_store("default").await.unwrap();
        assert_eq!(backed.len(), 1);
        assert_eq!(backed[0].name, "raw-hosted");
    }

    #[tokio::test]
    async fn test_browse_pages_in_path_order() {
        let db = Database::in_memory().await.unwrap();
        for (i, path) in ["c.txt", "a.txt", "b/x.txt", "d.txt", "e.txt"].iter().enumerate() {
            db.save_asset(asset(path, &format!("blob-{i}"))).await.unwrap();
        }
        db.save_asset(Asset::new("other", "a.txt")).await.unwrap();

        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0;
        loop {
            let page = db
                .browse_assets("raw-hosted", 2, token.as_deref())
                .await
                .unwrap();
            pages += 1;
            seen.extend(page.items.iter().map(|a| a.path.clone()));
            if page.is_last() {
                break;
            }
            token = page.next_token;
        }

        assert_eq!(pages, 3);
        assert_eq!(seen, vec!["a.txt", "b/x.txt", "c.txt", "d.txt", "e.txt"]);
    }

    #[tokio::test]
    async fn test_browse_with_unbounded_page_size() {
        let db = Database::in_memory().await.unwrap();
        db.save_asset(asset("a.txt", "blob-a")).await.unwrap();
        db.save_asset(asset("b.txt", "blob-b")).await.unwrap();

        let page = db.browse_assets("raw-hosted", usize::MAX, None).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.is_last());
    }

    #[tokio::test]
    async fn test_asset_lookup_by_path_and_blob_ref() {
        let db = Database::in_memory().await.unwrap();
        let saved = asset("/dir/a.txt", "blob-a");
        db.save_asset(saved.clone()).await.unwrap();

        let found = db.find_asset("raw-hosted", "/dir/a.txt").await.unwrap().unwrap();
        assert_eq!(found.blob_ref, saved.blob_ref);
        assert_eq!(found.sha1(), saved.sha1());
        assert!(found.blob_created.is_some());

        let by_name = find_asset_by_name(&db, "raw-hosted", "dir/a.txt")
            .await
            .unwrap();
        assert!(by_name.is_some());

        let blob_ref = saved.blob_ref.clone().unwrap();
        let by_ref = db
            .find_asset_by_blob_ref("raw-hosted", &blob_ref)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_ref.path, "/dir/a.txt");

        assert!(db.delete_asset("raw-hosted", "/dir/a.txt").await.unwrap());
        assert!(!db.delete_asset("raw-hosted", "/dir/a.txt").await.unwrap());
        assert!(db
            .find_asset_by_blob_ref("raw-hosted", &blob_ref)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_asset_without_blob_ref() {
        let db = Database::in_memory().await.unwrap();
        db.save_asset(Asset::new("raw-hosted", "placeholder"))
            .await
            .unwrap();

        let found = db
            .find_asset("raw-hosted", "placeholder")
            .await
            .unwrap()
            .unwrap();
        assert!(found.blob_ref.is_none());
        assert!(found.checksums.is_empty());
    }
}
