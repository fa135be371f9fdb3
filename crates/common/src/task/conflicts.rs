use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::TaskInfo;

pub const REPOSITORY_MOVE_TYPE_ID: &str = "repository.move";
pub const MOVE_SOURCE_PARAM: &str = "moveInitialBlobstore";
pub const MOVE_TARGET_PARAM: &str = "moveTargetBlobstore";

#[derive(thiserror::Error, Debug)]
pub enum TaskRegistryError {
    #[error("task registry backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum TaskConflictError {
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Registry(#[from] TaskRegistryError),
}

/// Read-only view of the host's task runner, consulted before
///  a job starts. Nothing here takes a lock.
#[async_trait]
pub trait TaskRegistry: Send + Sync + Debug {
    /// Tasks currently running whose type is one of `type_ids`
    async fn running_tasks(&self, type_ids: &[&str]) -> Result<Vec<TaskInfo>, TaskRegistryError>;

    /// Repositories with a move that started but never completed
    ///  and involves `blob_store` as source or target
    async fn unfinished_moves(&self, blob_store: &str) -> Result<Vec<String>, TaskRegistryError>;
}

/// Fail when a repository move is running against, or was left
///  half done on, the given blob store
pub async fn check_move_conflicts(
    registry: &dyn TaskRegistry,
    blob_store: &str,
) -> Result<(), TaskConflictError> {
    let running = registry.running_tasks(&[REPOSITORY_MOVE_TYPE_ID]).await?;
    let conflicting: Vec<&TaskInfo> = running
        .iter()
        .filter(|task| {
            task.param(MOVE_SOURCE_PARAM) == Some(blob_store)
                || task.param(MOVE_TARGET_PARAM) == Some(blob_store)
        })
        .collect();
    if !conflicting.is_empty() {
        let names: Vec<&str> = conflicting.iter().map(|t| t.name.as_str()).collect();
        return Err(TaskConflictError::Conflict(format!(
            "blob store '{}' is in use by running repository move task(s): {}",
            blob_store,
            names.join(", ")
        )));
    }

    let unfinished = registry.unfinished_moves(blob_store).await?;
    if !unfinished.is_empty() {
        return Err(TaskConflictError::Conflict(format!(
            "blob store '{}' has unfinished repository moves for: {}",
            blob_store,
            unfinished.join(", ")
        )));
    }
    Ok(())
}

/// In-memory task registry
#[derive(Debug, Clone, Default)]
pub struct MemoryTaskRegistry {
    inner: Arc<RwLock<MemoryTaskRegistryInner>>,
}

#[derive(Debug, Default)]
struct MemoryTaskRegistryInner {
    running: BTreeMap<String, TaskInfo>,
    /// repository -> blob stores of an interrupted move
    unfinished_moves: BTreeMap<String, (String, String)>,
}

impl MemoryTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, task: TaskInfo) {
        self.inner.write().running.insert(task.id.clone(), task);
    }

    pub fn finish(&self, id: &str) {
        self.inner.write().running.remove(id);
    }

    pub fn record_unfinished_move(&self, repository: &str, source: &str, target: &str) {
        self.inner.write().unfinished_moves.insert(
            repository.to_string(),
            (source.to_string(), target.to_string()),
        );
    }
}

#[async_trait]
impl TaskRegistry for MemoryTaskRegistry {
    async fn running_tasks(&self, type_ids: &[&str]) -> Result<Vec<TaskInfo>, TaskRegistryError> {
        Ok(self
            .inner
            .read()
            .running
            .values()
            .filter(|task| type_ids.contains(&task.type_id.as_str()))
            .cloned()
            .collect())
    }

    async fn unfinished_moves(&self, blob_store: &str) -> Result<Vec<String>, TaskRegistryError> {
        Ok(self
            .inner
            .read()
            .unfinished_moves
            .iter()
            .filter(|(_, (source, target))| source == blob_store || target == blob_store)
            .map(|(repo, _)| repo.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_conflict_when_idle() {
        let registry = MemoryTaskRegistry::new();
        check_move_conflicts(&registry, "default").await.unwrap();
    }

    #[tokio::test]
    async fn test_running_move_conflicts() {
        let registry = MemoryTaskRegistry::new();
        let task = TaskInfo::new(REPOSITORY_MOVE_TYPE_ID, "move raw")
            .with_param(MOVE_SOURCE_PARAM, "other")
            .with_param(MOVE_TARGET_PARAM, "default");
        let id = task.id.clone();
        registry.start(task);

        let err = check_move_conflicts(&registry, "default").await.unwrap_err();
        assert!(matches!(err, TaskConflictError::Conflict(_)));
        // unrelated store is fine
        check_move_conflicts(&registry, "third").await.unwrap();

        registry.finish(&id);
        check_move_conflicts(&registry, "default").await.unwrap();
    }

    #[tokio::test]
    async fn test_unfinished_move_conflicts() {
        let registry = MemoryTaskRegistry::new();
        registry.record_unfinished_move("raw-hosted", "default", "s3");

        assert!(check_move_conflicts(&registry, "s3").await.is_err());
        assert!(check_move_conflicts(&registry, "elsewhere").await.is_ok());
    }

    #[tokio::test]
    async fn test_other_task_types_ignored() {
        let registry = MemoryTaskRegistry::new();
        registry.start(
            TaskInfo::new("blobstore.compact", "compact").with_param(MOVE_SOURCE_PARAM, "default"),
        );
        check_move_conflicts(&registry, "default").await.unwrap();
    }
}
