use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

mod conflicts;
mod progress;

pub use conflicts::{
    check_move_conflicts, MemoryTaskRegistry, TaskConflictError, TaskRegistry, TaskRegistryError,
    MOVE_SOURCE_PARAM, MOVE_TARGET_PARAM, REPOSITORY_MOVE_TYPE_ID,
};
pub use progress::ProgressLogger;
pub use tokio_util::sync::CancellationToken;

/// Prepended to log lines of jobs that make no changes
pub const DRY_RUN_PREFIX: &str = "[DRY RUN] ";

pub fn dry_run_prefix(dry_run: bool) -> &'static str {
    if dry_run {
        DRY_RUN_PREFIX
    } else {
        ""
    }
}

/// A task known to the host task runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub type_id: String,
    pub name: String,
    pub params: BTreeMap<String, String>,
}

impl TaskInfo {
    pub fn new(type_id: &str, name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            type_id: type_id.to_string(),
            name: name.to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}
