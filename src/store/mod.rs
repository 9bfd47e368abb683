// store/mod.rs — Task repository with JSON snapshot persistence.
//
// The store owns every task, hands out monotonically increasing ids, and
// mirrors the full collection to `{data_dir}/tasks.json` after each
// mutation. One async mutex spans "mutate in memory + rewrite the file" so
// concurrent REST handlers cannot interleave map updates or file writes.
//
// Snapshot format: a JSON object keyed by decimal string ids, each value a
// `{"id", "description", "completed"}` record. The outer key is
// authoritative on load; the inner `id` is validated against it and kept in
// the written form so older snapshot files stay interchangeable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

// ─── Types ────────────────────────────────────────────────────────────────────

/// One to-do item. Plain value — description validation (non-empty) is the
/// REST boundary's job, and `id` is never changed after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub description: String,
    pub completed: bool,
}

impl Task {
    pub fn new(id: u64, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            completed: false,
        }
    }
}

/// Errors returned by the task store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(u64),
    #[error("task file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("task file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not serialize task snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

struct StoreState {
    tasks: BTreeMap<u64, Task>,
    next_id: u64,
}

// ─── TaskStore ────────────────────────────────────────────────────────────────

pub struct TaskStore {
    state: Mutex<StoreState>,
    path: PathBuf,
}

impl TaskStore {
    /// Open the store backed by `path`, loading any existing snapshot.
    ///
    /// A missing file is the normal first run and yields an empty store. A
    /// file that exists but does not parse — or whose records disagree with
    /// their keys — fails construction with [`StoreError::Corrupt`] instead
    /// of starting empty, so a damaged snapshot is never overwritten by the
    /// next mutation before an operator can look at it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => parse_snapshot(&path, &contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no task file yet — starting empty");
                StoreState {
                    tasks: BTreeMap::new(),
                    next_id: 1,
                }
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        debug!(
            path = %path.display(),
            tasks = state.tasks.len(),
            next_id = state.next_id,
            "task store opened"
        );

        Ok(Self {
            state: Mutex::new(state),
            path,
        })
    }

    /// Path of the backing snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a task with the next id and persist the collection.
    ///
    /// Description validity is the caller's responsibility; the store accepts
    /// whatever it is given.
    pub async fn create(&self, description: &str) -> Result<Task, StoreError> {
        let mut state = self.state.lock().await;
        let task = Task::new(state.next_id, description);
        state.next_id += 1;
        state.tasks.insert(task.id, task.clone());
        self.persist(&state).await?;
        Ok(task)
    }

    /// Fetch a task by id.
    pub async fn get(&self, id: u64) -> Result<Task, StoreError> {
        let state = self.state.lock().await;
        state.tasks.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    /// Replace a task's description and persist.
    pub async fn update_description(
        &self,
        id: u64,
        description: &str,
    ) -> Result<Task, StoreError> {
        let mut state = self.state.lock().await;
        let task = state.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        task.description = description.to_string();
        let task = task.clone();
        self.persist(&state).await?;
        Ok(task)
    }

    /// Replace a task's completion flag and persist.
    pub async fn set_completed(&self, id: u64, completed: bool) -> Result<Task, StoreError> {
        let mut state = self.state.lock().await;
        let task = state.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        task.completed = completed;
        let task = task.clone();
        self.persist(&state).await?;
        Ok(task)
    }

    /// Delete a task by id and persist. The id is never handed out again.
    pub async fn delete(&self, id: u64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.tasks.remove(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        self.persist(&state).await
    }

    /// Snapshot copy of every task, in ascending id order.
    pub async fn list(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        state.tasks.values().cloned().collect()
    }

    /// Write the current collection out unconditionally.
    ///
    /// Mutations already persist as they happen; this exists for the
    /// graceful-shutdown path, where the caller decides whether a failure is
    /// worth more than a warning.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let state = self.state.lock().await;
        self.persist(&state).await
    }

    /// Rewrite the snapshot file from `state`. Atomic: serialize to a `.tmp`
    /// sibling, then rename over the real file to prevent partial reads.
    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let snapshot: BTreeMap<String, &Task> = state
            .tasks
            .iter()
            .map(|(id, task)| (id.to_string(), task))
            .collect();
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

// ─── Snapshot parsing ─────────────────────────────────────────────────────────

fn parse_snapshot(path: &Path, contents: &str) -> Result<StoreState, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let raw: BTreeMap<String, Task> =
        serde_json::from_str(contents).map_err(|e| corrupt(e.to_string()))?;

    let mut tasks = BTreeMap::new();
    for (key, task) in raw {
        let id: u64 = key
            .parse()
            .map_err(|_| corrupt(format!("non-numeric task key {key:?}")))?;
        if id == 0 {
            return Err(corrupt("task id 0 is not a valid id".to_string()));
        }
        if task.id != id {
            return Err(corrupt(format!(
                "task under key {id} carries mismatched id {}",
                task.id
            )));
        }
        tasks.insert(id, task);
    }

    // BTreeMap keeps ids sorted, so the last key is the maximum.
    let next_id = tasks.keys().next_back().map_or(1, |max| max + 1);

    Ok(StoreState { tasks, next_id })
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> TaskStore {
        TaskStore::open(dir.path().join("tasks.json")).await.unwrap()
    }

    #[tokio::test]
    async fn ids_are_unique_and_strictly_increasing() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let mut last = 0;
        for i in 0..5 {
            let task = store.create(&format!("task {i}")).await.unwrap();
            assert!(task.id > last);
            last = task.id;
        }
    }

    #[tokio::test]
    async fn get_after_create_returns_exact_task() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let created = store.create("buy milk").await.unwrap();
        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.description, "buy milk");
        assert!(!fetched.completed);
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let task = store.create("ephemeral").await.unwrap();
        store.delete(task.id).await.unwrap();
        assert!(matches!(
            store.get(task.id).await,
            Err(StoreError::NotFound(id)) if id == task.id
        ));
    }

    #[tokio::test]
    async fn delete_unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        assert!(matches!(store.delete(42).await, Err(StoreError::NotFound(42))));
    }

    #[tokio::test]
    async fn completing_a_task_leaves_description_alone() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let task = store.create("walk dog").await.unwrap();
        let updated = store.set_completed(task.id, true).await.unwrap();
        assert!(updated.completed);
        assert_eq!(updated.description, "walk dog");

        let fetched = store.get(task.id).await.unwrap();
        assert!(fetched.completed);
        assert_eq!(fetched.description, "walk dog");
    }

    #[tokio::test]
    async fn update_description_keeps_completion_flag() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let task = store.create("old text").await.unwrap();
        store.set_completed(task.id, true).await.unwrap();
        let updated = store.update_description(task.id, "new text").await.unwrap();
        assert_eq!(updated.description, "new text");
        assert!(updated.completed);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_a_fresh_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");

        let store = TaskStore::open(&path).await.unwrap();
        store.create("one").await.unwrap();
        let two = store.create("two").await.unwrap();
        store.set_completed(two.id, true).await.unwrap();
        let before = store.list().await;
        drop(store);

        let reopened = TaskStore::open(&path).await.unwrap();
        assert_eq!(reopened.list().await, before);
    }

    #[tokio::test]
    async fn next_id_is_one_past_the_maximum_loaded_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        let snapshot = serde_json::json!({
            "1": {"id": 1, "description": "a", "completed": false},
            "3": {"id": 3, "description": "b", "completed": true},
            "5": {"id": 5, "description": "c", "completed": false},
        });
        std::fs::write(&path, snapshot.to_string()).unwrap();

        let store = TaskStore::open(&path).await.unwrap();
        let task = store.create("d").await.unwrap();
        assert_eq!(task.id, 6);
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        assert!(store.list().await.is_empty());
        assert_eq!(store.create("first").await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn malformed_file_fails_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "{ this is not json").unwrap();

        assert!(matches!(
            TaskStore::open(&path).await,
            Err(StoreError::Corrupt { .. })
        ));
        // The damaged file must still be there for the operator.
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "{ this is not json"
        );
    }

    #[tokio::test]
    async fn mismatched_inner_id_fails_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        let snapshot = serde_json::json!({
            "1": {"id": 2, "description": "liar", "completed": false},
        });
        std::fs::write(&path, snapshot.to_string()).unwrap();

        assert!(matches!(
            TaskStore::open(&path).await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn deleted_ids_are_never_reused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");

        let store = TaskStore::open(&path).await.unwrap();
        let a = store.create("a").await.unwrap();
        let b = store.create("b").await.unwrap();
        store.delete(b.id).await.unwrap();
        let c = store.create("c").await.unwrap();
        assert_eq!(c.id, 3);
        store.delete(a.id).await.unwrap();
        drop(store);

        // After a restart next_id comes from the surviving maximum.
        let reopened = TaskStore::open(&path).await.unwrap();
        let d = reopened.create("d").await.unwrap();
        assert_eq!(d.id, 4);
    }

    #[tokio::test]
    async fn crud_scenario() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let milk = store.create("buy milk").await.unwrap();
        assert_eq!(milk.id, 1);
        assert!(!milk.completed);

        let dog = store.create("walk dog").await.unwrap();
        assert_eq!(dog.id, 2);

        store.set_completed(1, true).await.unwrap();

        let all = store.list().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, 1);
        assert!(all[0].completed);
        assert_eq!(all[1].id, 2);
        assert!(!all[1].completed);

        store.delete(2).await.unwrap();
        assert!(matches!(store.get(2).await, Err(StoreError::NotFound(2))));
    }

    #[tokio::test]
    async fn snapshot_keys_match_record_ids_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");

        let store = TaskStore::open(&path).await.unwrap();
        store.create("on disk").await.unwrap();
        drop(store);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let obj = raw.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert_eq!(obj["1"]["id"], 1);
        assert_eq!(obj["1"]["description"], "on disk");
        assert_eq!(obj["1"]["completed"], false);
    }
}
