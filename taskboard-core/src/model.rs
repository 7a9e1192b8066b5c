//! Board document model.
//!
//! A [`Board`] is the single unit of persistence and broadcast. It is never
//! patched in place by replication: every mutation in [`crate::ops`]
//! produces a complete replacement value.
//!
//! Serialized shape (identical in the durable store, the local cache and
//! the relay payload):
//! ```text
//! {
//!   "tasks":       { "<task-id>": { "id", "content", "priority", "tag"? } },
//!   "columns":     { "<column-id>": { "id", "title", "taskIds": [..] } },
//!   "columnOrder": [ "<column-id>", .. ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::BoardError;

/// Identifier of the column that counts as "finished".
pub const TERMINAL_COLUMN: &str = "done";

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// A single card on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub content: String,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            priority: Priority::default(),
            tag: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// An ordered list of task references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub title: String,
    #[serde(rename = "taskIds", default)]
    pub task_ids: Vec<String>,
}

impl Column {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            task_ids: Vec::new(),
        }
    }
}

/// The full kanban state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Board {
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
    #[serde(default)]
    pub columns: BTreeMap<String, Column>,
    #[serde(rename = "columnOrder", default)]
    pub column_order: Vec<String>,
}

impl Board {
    /// Empty board: no tasks, no columns.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Default structure written when no persisted document exists.
    pub fn seed() -> Self {
        let tasks = [
            Task::new("task-1", "Design System")
                .with_priority(Priority::High)
                .with_tag("Design"),
            Task::new("task-2", "Auth Integration")
                .with_priority(Priority::High)
                .with_tag("Backend"),
            Task::new("task-3", "Animation Polish")
                .with_priority(Priority::Medium)
                .with_tag("Frontend"),
            Task::new("task-4", "Testing")
                .with_priority(Priority::Low)
                .with_tag("QA"),
        ];

        let mut todo = Column::new("todo", "To Do");
        todo.task_ids = tasks.iter().map(|t| t.id.clone()).collect();

        let columns = [
            todo,
            Column::new("in-progress", "In Progress"),
            Column::new(TERMINAL_COLUMN, "Done"),
        ];

        Self {
            column_order: columns.iter().map(|c| c.id.clone()).collect(),
            tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
            columns: columns.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    /// Check the structural invariants.
    ///
    /// - every referenced task id exists in `tasks`
    /// - a task id is referenced by at most one column (and at most once)
    /// - `column_order` is a permutation of the keys of `columns`
    /// - ids stored inside tasks and columns match their map keys
    pub fn validate(&self) -> Result<(), BoardError> {
        for (key, task) in &self.tasks {
            if key != &task.id {
                return Err(BoardError::Invariant(format!(
                    "task stored under '{key}' has id '{}'",
                    task.id
                )));
            }
        }

        let mut referenced: HashSet<&str> = HashSet::new();
        for (key, column) in &self.columns {
            if key != &column.id {
                return Err(BoardError::Invariant(format!(
                    "column stored under '{key}' has id '{}'",
                    column.id
                )));
            }
            for task_id in &column.task_ids {
                if !self.tasks.contains_key(task_id) {
                    return Err(BoardError::Invariant(format!(
                        "column '{key}' references missing task '{task_id}'"
                    )));
                }
                if !referenced.insert(task_id.as_str()) {
                    return Err(BoardError::Invariant(format!(
                        "task '{task_id}' is referenced more than once"
                    )));
                }
            }
        }

        let mut ordered: HashSet<&str> = HashSet::new();
        for column_id in &self.column_order {
            if !self.columns.contains_key(column_id) {
                return Err(BoardError::Invariant(format!(
                    "column order references missing column '{column_id}'"
                )));
            }
            if !ordered.insert(column_id.as_str()) {
                return Err(BoardError::Invariant(format!(
                    "column '{column_id}' appears twice in column order"
                )));
            }
        }
        if ordered.len() != self.columns.len() {
            return Err(BoardError::Invariant(format!(
                "column order lists {} of {} columns",
                ordered.len(),
                self.columns.len()
            )));
        }

        Ok(())
    }

    /// Column currently holding `task_id`, if any.
    pub fn column_of(&self, task_id: &str) -> Option<&Column> {
        self.columns
            .values()
            .find(|c| c.task_ids.iter().any(|id| id == task_id))
    }

    /// Tasks of a column in display order.
    pub fn tasks_in(&self, column_id: &str) -> Vec<&Task> {
        self.columns
            .get(column_id)
            .map(|c| c.task_ids.iter().filter_map(|id| self.tasks.get(id)).collect())
            .unwrap_or_default()
    }

    /// Columns in display order.
    pub fn ordered_columns(&self) -> impl Iterator<Item = &Column> {
        self.column_order.iter().filter_map(|id| self.columns.get(id))
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Serialize to the JSON document shape.
    pub fn to_json(&self) -> Result<Vec<u8>, BoardError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a JSON document and check its invariants.
    pub fn from_json(bytes: &[u8]) -> Result<Self, BoardError> {
        let board: Board = serde_json::from_slice(bytes)?;
        board.validate()?;
        Ok(board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_is_valid() {
        let board = Board::seed();
        board.validate().unwrap();
        assert_eq!(board.task_count(), 4);
        assert_eq!(board.column_order, vec!["todo", "in-progress", "done"]);
        assert_eq!(board.columns["todo"].task_ids.len(), 4);
    }

    #[test]
    fn test_json_field_names() {
        let board = Board::seed();
        let json: serde_json::Value = serde_json::from_slice(&board.to_json().unwrap()).unwrap();

        assert!(json.get("columnOrder").is_some());
        assert!(json["columns"]["todo"].get("taskIds").is_some());
        assert_eq!(json["tasks"]["task-1"]["priority"], "High");
        assert_eq!(json["tasks"]["task-1"]["tag"], "Design");
    }

    #[test]
    fn test_untagged_task_omits_tag() {
        let task = Task::new("t", "no tag");
        let json = serde_json::to_string(&task).unwrap();
        assert!(!json.contains("tag"));

        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.tag, None);
        assert_eq!(parsed.priority, Priority::Medium);
    }

    #[test]
    fn test_from_json_rejects_dangling_reference() {
        let raw = br#"{
            "tasks": {},
            "columns": { "todo": { "id": "todo", "title": "To Do", "taskIds": ["ghost"] } },
            "columnOrder": ["todo"]
        }"#;
        let err = Board::from_json(raw).unwrap_err();
        assert!(matches!(err, BoardError::Invariant(_)));
    }

    #[test]
    fn test_validate_duplicate_reference() {
        let mut board = Board::seed();
        board
            .columns
            .get_mut("done")
            .unwrap()
            .task_ids
            .push("task-1".into());
        assert!(board.validate().is_err());
    }

    #[test]
    fn test_validate_column_order_permutation() {
        let mut board = Board::seed();
        board.column_order.pop();
        assert!(board.validate().is_err());

        let mut board = Board::seed();
        board.column_order.push("todo".into());
        assert!(board.validate().is_err());

        let mut board = Board::seed();
        board.column_order.push("ghost".into());
        assert!(board.validate().is_err());
    }

    #[test]
    fn test_validate_key_mismatch() {
        let mut board = Board::seed();
        let task = board.tasks.remove("task-4").unwrap();
        board.tasks.insert("task-9".into(), task);
        assert!(board.validate().is_err());
    }

    #[test]
    fn test_from_json_garbage() {
        assert!(matches!(
            Board::from_json(b"not json"),
            Err(BoardError::Malformed(_))
        ));
    }

    #[test]
    fn test_tasks_in_and_column_of() {
        let board = Board::seed();
        let contents: Vec<&str> = board.tasks_in("todo").iter().map(|t| t.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["Design System", "Auth Integration", "Animation Polish", "Testing"]
        );
        assert_eq!(board.column_of("task-2").unwrap().id, "todo");
        assert!(board.column_of("missing").is_none());
        assert!(board.tasks_in("missing").is_empty());
    }
}
