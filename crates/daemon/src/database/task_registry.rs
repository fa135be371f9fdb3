use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::Row;

use common::task::{TaskInfo, TaskRegistry, TaskRegistryError};

use crate::database::Database;

fn backend(err: impl Into<anyhow::Error>) -> TaskRegistryError {
    TaskRegistryError::Backend(err.into())
}

impl Database {
    /// Record a task as running until [`Database::finish_task`]
    pub async fn start_task(&self, task: &TaskInfo) -> Result<(), TaskRegistryError> {
        let params = serde_json::to_string(&task.params).map_err(backend)?;
        sqlx::query(
            r#"
            INSERT INTO running_tasks (id, type_id, name, params, started_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.type_id)
        .bind(&task.name)
        .bind(params)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&**self)
        .await
        .map_err(backend)?;
        Ok(())
    }

    pub async fn finish_task(&self, id: &str) -> Result<bool, TaskRegistryError> {
        let result = sqlx::query("DELETE FROM running_tasks WHERE id = ?")
            .bind(id)
            .execute(&**self)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a repository move as begun; cleared by [`Database::complete_move`]
    pub async fn begin_move(
        &self,
        repository: &str,
        source: &str,
        target: &str,
    ) -> Result<(), TaskRegistryError> {
        sqlx::query(
            r#"
            INSERT INTO repository_moves (repository, source_blob_store, target_blob_store, started_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(repository) DO UPDATE SET
                source_blob_store = excluded.source_blob_store,
                target_blob_store = excluded.target_blob_store,
                started_at = excluded.started_at
            "#,
        )
        .bind(repository)
        .bind(source)
        .bind(target)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&**self)
        .await
        .map_err(backend)?;
        Ok(())
    }

    pub async fn complete_move(&self, repository: &str) -> Result<bool, TaskRegistryError> {
        let result = sqlx::query("DELETE FROM repository_moves WHERE repository = ?")
            .bind(repository)
            .execute(&**self)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TaskRegistry for Database {
    async fn running_tasks(&self, type_ids: &[&str]) -> Result<Vec<TaskInfo>, TaskRegistryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, type_id, name, params
            FROM running_tasks
            ORDER BY started_at
            "#,
        )
        .fetch_all(&**self)
        .await
        .map_err(backend)?;

        let mut tasks = Vec::new();
        for row in rows {
            let type_id: String = row.get("type_id");
            if !type_ids.contains(&type_id.as_str()) {
                continue;
            }
            let params: String = row.get("params");
            let params: BTreeMap<String, String> = serde_json::from_str(&params).map_err(backend)?;
            tasks.push(TaskInfo {
                id: row.get("id"),
                type_id,
                name: row.get("name"),
                params,
            });
        }
        Ok(tasks)
    }

    async fn unfinished_moves(&self, blob_store: &str) -> Result<Vec<String>, TaskRegistryError> {
        let rows = sqlx::query(
            r#"
            SELECT repository
            FROM repository_moves
            WHERE source_blob_store = ? OR target_blob_store = ?
            ORDER BY repository
            "#,
        )
        .bind(blob_store)
        .bind(blob_store)
        .fetch_all(&**self)
        .await
        .map_err(backend)?;

        Ok(rows.iter().map(|row| row.get("repository")).collect())
    }
}
