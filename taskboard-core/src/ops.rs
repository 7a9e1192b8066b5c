//! Pure board transformations.
//!
//! Each operation reads `&Board` and returns the next `Board`. An operation
//! that has nothing to do returns a value equal to its input; callers use
//! that equality to skip replication.

use crate::error::BoardError;
use crate::ids::{IdGenerator, TagPool};
use crate::model::{Board, Column, Task};

/// Draws allowed per new id before giving up on the generator.
const MAX_ID_DRAWS: usize = 64;

/// Draw ids until one is not `taken`.
fn fresh_id(
    kind: &'static str,
    mut draw: impl FnMut() -> String,
    taken: impl Fn(&str) -> bool,
) -> Result<String, BoardError> {
    for _ in 0..MAX_ID_DRAWS {
        let id = draw();
        if !taken(&id) {
            return Ok(id);
        }
        log::debug!("{kind} id {id} already on the board, drawing another");
    }
    Err(BoardError::IdsExhausted(kind, MAX_ID_DRAWS))
}

/// A drag of one task from `(source_column, source_index)` to
/// `(dest_column, dest_index)`.
///
/// `dest_index` is interpreted against the destination list *after* the
/// task has been removed from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMove {
    pub task_id: String,
    pub source_column: String,
    pub source_index: usize,
    pub dest_column: String,
    pub dest_index: usize,
}

impl TaskMove {
    pub fn new(
        task_id: impl Into<String>,
        source_column: impl Into<String>,
        source_index: usize,
        dest_column: impl Into<String>,
        dest_index: usize,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            source_column: source_column.into(),
            source_index,
            dest_column: dest_column.into(),
            dest_index,
        }
    }

    /// Dropping onto the exact slot it was picked up from.
    pub fn is_noop(&self) -> bool {
        self.source_column == self.dest_column && self.source_index == self.dest_index
    }

    /// True when the move carries the task into `terminal` from elsewhere.
    pub fn enters(&self, terminal: &str) -> bool {
        self.dest_column == terminal && self.source_column != terminal
    }
}

impl Board {
    /// Append a new task to the end of `column_id`.
    ///
    /// Whitespace-only content leaves the board unchanged.
    pub fn add_task(
        &self,
        column_id: &str,
        content: &str,
        ids: &mut dyn IdGenerator,
        tags: &mut TagPool,
    ) -> Result<Board, BoardError> {
        if content.trim().is_empty() {
            return Ok(self.clone());
        }
        if !self.columns.contains_key(column_id) {
            return Err(BoardError::UnknownColumn(column_id.to_string()));
        }

        let id = fresh_id(
            "task",
            || ids.task_id(),
            |id| self.tasks.contains_key(id) || self.column_of(id).is_some(),
        )?;
        let mut next = self.clone();
        let mut task = Task::new(id.clone(), content);
        task.tag = tags.next_tag();
        next.tasks.insert(id.clone(), task);
        if let Some(column) = next.columns.get_mut(column_id) {
            column.task_ids.push(id);
        }
        Ok(next)
    }

    /// Remove a task. Absent ids leave the board unchanged.
    ///
    /// The id is stripped from `column_id` and from any other column that
    /// still references it.
    pub fn delete_task(&self, task_id: &str, column_id: &str) -> Board {
        if !self.tasks.contains_key(task_id) {
            return self.clone();
        }

        let mut next = self.clone();
        next.tasks.remove(task_id);
        if let Some(column) = next.columns.get_mut(column_id) {
            column.task_ids.retain(|id| id != task_id);
        }
        if next.column_of(task_id).is_some() {
            log::debug!("task {task_id} was not in column {column_id}, stripping stale reference");
            for column in next.columns.values_mut() {
                column.task_ids.retain(|id| id != task_id);
            }
        }
        next
    }

    /// Replace a task's content. Other fields are untouched.
    pub fn update_task(&self, task_id: &str, new_content: &str) -> Board {
        match self.tasks.get(task_id) {
            Some(task) if !new_content.trim().is_empty() && task.content != new_content => {
                let mut next = self.clone();
                if let Some(task) = next.tasks.get_mut(task_id) {
                    task.content = new_content.to_string();
                }
                next
            }
            _ => self.clone(),
        }
    }

    /// Append an empty column titled `New List <n>`.
    pub fn add_column(&self, ids: &mut dyn IdGenerator) -> Result<Board, BoardError> {
        let id = fresh_id(
            "column",
            || ids.column_id(),
            |id| self.columns.contains_key(id) || self.column_order.iter().any(|c| c == id),
        )?;
        let mut next = self.clone();
        let title = format!("New List {}", self.columns.len() + 1);
        next.columns.insert(id.clone(), Column::new(id.clone(), title));
        next.column_order.push(id);
        Ok(next)
    }

    pub fn rename_column(&self, column_id: &str, title: &str) -> Board {
        match self.columns.get(column_id) {
            Some(column) if !title.trim().is_empty() && column.title != title => {
                let mut next = self.clone();
                if let Some(column) = next.columns.get_mut(column_id) {
                    column.title = title.to_string();
                }
                next
            }
            _ => self.clone(),
        }
    }

    /// Remove a column and every task it holds.
    pub fn delete_column(&self, column_id: &str) -> Board {
        let mut next = self.clone();
        let Some(column) = next.columns.remove(column_id) else {
            return next;
        };
        next.column_order.retain(|id| id != column_id);
        for task_id in &column.task_ids {
            next.tasks.remove(task_id);
        }
        next
    }

    /// Reorder within a column or move across columns.
    pub fn move_task(&self, mv: &TaskMove) -> Result<Board, BoardError> {
        if mv.is_noop() {
            return Ok(self.clone());
        }

        let source = self.columns.get(&mv.source_column).ok_or_else(|| {
            BoardError::ConsistencyViolation(format!(
                "source column '{}' does not exist",
                mv.source_column
            ))
        })?;
        if !self.columns.contains_key(&mv.dest_column) {
            return Err(BoardError::ConsistencyViolation(format!(
                "destination column '{}' does not exist",
                mv.dest_column
            )));
        }
        match source.task_ids.get(mv.source_index) {
            Some(id) if *id == mv.task_id => {}
            Some(id) => {
                return Err(BoardError::ConsistencyViolation(format!(
                    "expected '{}' at {}[{}], found '{id}'",
                    mv.task_id, mv.source_column, mv.source_index
                )));
            }
            None => {
                return Err(BoardError::ConsistencyViolation(format!(
                    "index {} out of range for column '{}' ({} tasks)",
                    mv.source_index,
                    mv.source_column,
                    source.task_ids.len()
                )));
            }
        }

        let mut next = self.clone();
        let moved = match next.columns.get_mut(&mv.source_column) {
            Some(column) => column.task_ids.remove(mv.source_index),
            None => return Ok(self.clone()),
        };
        if let Some(dest) = next.columns.get_mut(&mv.dest_column) {
            let at = mv.dest_index.min(dest.task_ids.len());
            dest.task_ids.insert(at, moved);
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;

    fn two_task_board() -> Board {
        let mut board = Board::seed();
        board.tasks.retain(|id, _| id == "task-1" || id == "task-2");
        board.columns.get_mut("todo").unwrap().task_ids = vec!["task-1".into(), "task-2".into()];
        board
    }

    #[test]
    fn test_add_task_appends_with_defaults() {
        let board = Board::seed();
        let mut ids = SequentialIds::with_prefix("x-");
        let mut tags = TagPool::new(["Bug"]);

        let next = board.add_task("in-progress", "Write docs", &mut ids, &mut tags).unwrap();
        next.validate().unwrap();

        assert_eq!(next.columns["in-progress"].task_ids, vec!["x-task-1"]);
        assert_eq!(next.task_count(), 5);
        let task = &next.tasks["x-task-1"];
        assert_eq!(task.content, "Write docs");
        assert_eq!(task.priority, crate::Priority::Medium);
        assert_eq!(task.tag.as_deref(), Some("Bug"));
    }

    #[test]
    fn test_add_task_blank_is_noop() {
        let board = Board::seed();
        let mut ids = SequentialIds::with_prefix("x-");
        let mut tags = TagPool::default();

        let next = board.add_task("todo", "   ", &mut ids, &mut tags).unwrap();
        assert_eq!(next, board);
        let next = board.add_task("todo", "", &mut ids, &mut tags).unwrap();
        assert_eq!(next, board);
    }

    #[test]
    fn test_add_task_skips_ids_already_on_board() {
        // an unprefixed generator starts at task-1, which the seed board uses
        let board = Board::seed();
        let mut ids = SequentialIds::new();
        let mut tags = TagPool::default();

        let next = board.add_task("done", "X", &mut ids, &mut tags).unwrap();
        next.validate().unwrap();

        assert_eq!(next.task_count(), 5);
        assert_eq!(next.tasks["task-1"], board.tasks["task-1"]);
        assert_eq!(next.columns["todo"].task_ids, board.columns["todo"].task_ids);
        assert_eq!(next.columns["done"].task_ids, vec!["task-5"]);
        assert_eq!(next.tasks["task-5"].content, "X");
    }

    #[test]
    fn test_add_column_skips_ids_already_on_board() {
        let mut ids = SequentialIds::new();
        let mut board = Board::seed();
        board.columns.insert("col-1".into(), Column::new("col-1", "Taken"));
        board.column_order.push("col-1".into());

        let next = board.add_column(&mut ids).unwrap();
        next.validate().unwrap();
        assert_eq!(next.columns["col-1"].title, "Taken");
        assert_eq!(next.column_order.last().map(String::as_str), Some("col-2"));
    }

    struct StuckIds;

    impl IdGenerator for StuckIds {
        fn task_id(&mut self) -> String {
            "task-1".into()
        }

        fn column_id(&mut self) -> String {
            "todo".into()
        }
    }

    #[test]
    fn test_stuck_generator_is_an_error() {
        let board = Board::seed();
        let err = board
            .add_task("todo", "X", &mut StuckIds, &mut TagPool::default())
            .unwrap_err();
        assert_eq!(err, BoardError::IdsExhausted("task", MAX_ID_DRAWS));
        assert!(matches!(
            board.add_column(&mut StuckIds),
            Err(BoardError::IdsExhausted("column", _))
        ));
    }

    #[test]
    fn test_add_task_unknown_column() {
        let board = Board::seed();
        let mut ids = SequentialIds::with_prefix("x-");
        let err = board
            .add_task("nope", "content", &mut ids, &mut TagPool::default())
            .unwrap_err();
        assert_eq!(err, BoardError::UnknownColumn("nope".into()));
    }

    #[test]
    fn test_delete_task() {
        let board = Board::seed();
        let next = board.delete_task("task-2", "todo");
        next.validate().unwrap();
        assert!(!next.tasks.contains_key("task-2"));
        assert_eq!(next.columns["todo"].task_ids, vec!["task-1", "task-3", "task-4"]);
    }

    #[test]
    fn test_delete_task_absent_is_identity() {
        let board = Board::seed();
        assert_eq!(board.delete_task("ghost", "todo"), board);
        let once = board.delete_task("task-1", "todo");
        assert_eq!(once.delete_task("task-1", "todo"), once);
    }

    #[test]
    fn test_delete_task_stale_column() {
        // caller names the wrong column; the reference must still disappear
        let board = Board::seed();
        let next = board.delete_task("task-3", "done");
        next.validate().unwrap();
        assert!(!next.columns["todo"].task_ids.contains(&"task-3".to_string()));
    }

    #[test]
    fn test_update_task_content_only() {
        let board = Board::seed();
        let next = board.update_task("task-1", "Design Tokens");
        let task = &next.tasks["task-1"];
        assert_eq!(task.content, "Design Tokens");
        assert_eq!(task.priority, crate::Priority::High);
        assert_eq!(task.tag.as_deref(), Some("Design"));
        assert_eq!(next.columns, board.columns);
    }

    #[test]
    fn test_update_task_noops() {
        let board = Board::seed();
        assert_eq!(board.update_task("ghost", "x"), board);
        assert_eq!(board.update_task("task-1", "  "), board);
        assert_eq!(board.update_task("task-1", "Design System"), board);
    }

    #[test]
    fn test_add_column_twice() {
        let mut board = Board::empty();
        board.columns.insert("todo".into(), Column::new("todo", "To Do"));
        board.column_order.push("todo".into());

        let mut ids = SequentialIds::new();
        let next = board
            .add_column(&mut ids)
            .and_then(|b| b.add_column(&mut ids))
            .unwrap();
        next.validate().unwrap();

        assert_eq!(next.column_order.len(), 3);
        assert_eq!(next.column_order[0], "todo");
        assert_ne!(next.column_order[1], next.column_order[2]);
        assert_eq!(next.columns[&next.column_order[1]].title, "New List 2");
        assert_eq!(next.columns[&next.column_order[2]].title, "New List 3");
        assert!(next.columns[&next.column_order[2]].task_ids.is_empty());
    }

    #[test]
    fn test_rename_column() {
        let board = Board::seed();
        let next = board.rename_column("todo", "Backlog");
        assert_eq!(next.columns["todo"].title, "Backlog");
        assert_eq!(board.rename_column("todo", " "), board);
        assert_eq!(board.rename_column("ghost", "x"), board);
    }

    #[test]
    fn test_delete_column_cascades() {
        let board = Board::seed();
        let next = board.delete_column("todo");
        next.validate().unwrap();
        assert_eq!(next.task_count(), 0);
        assert_eq!(next.column_order, vec!["in-progress", "done"]);
        assert_eq!(board.delete_column("ghost"), board);
    }

    #[test]
    fn test_move_across_columns() {
        let board = two_task_board();
        let next = board
            .move_task(&TaskMove::new("task-1", "todo", 0, "done", 0))
            .unwrap();
        next.validate().unwrap();
        assert_eq!(next.columns["todo"].task_ids, vec!["task-2"]);
        assert_eq!(next.columns["done"].task_ids, vec!["task-1"]);
    }

    #[test]
    fn test_move_within_column_past_itself() {
        let board = Board::seed();
        // [1,2,3,4] -> take 1 from 0, insert at 2 of [2,3,4] -> [2,3,1,4]
        let next = board
            .move_task(&TaskMove::new("task-1", "todo", 0, "todo", 2))
            .unwrap();
        assert_eq!(
            next.columns["todo"].task_ids,
            vec!["task-2", "task-3", "task-1", "task-4"]
        );

        // move last to front
        let next = board
            .move_task(&TaskMove::new("task-4", "todo", 3, "todo", 0))
            .unwrap();
        assert_eq!(
            next.columns["todo"].task_ids,
            vec!["task-4", "task-1", "task-2", "task-3"]
        );
    }

    #[test]
    fn test_move_same_slot_noop() {
        let board = Board::seed();
        let next = board
            .move_task(&TaskMove::new("task-2", "todo", 1, "todo", 1))
            .unwrap();
        assert_eq!(next, board);
    }

    #[test]
    fn test_move_dest_index_clamped() {
        let board = Board::seed();
        let next = board
            .move_task(&TaskMove::new("task-1", "todo", 0, "done", 99))
            .unwrap();
        assert_eq!(next.columns["done"].task_ids, vec!["task-1"]);
    }

    #[test]
    fn test_move_consistency_violations() {
        let board = Board::seed();

        let mismatch = board.move_task(&TaskMove::new("task-1", "todo", 1, "done", 0));
        assert!(matches!(mismatch, Err(BoardError::ConsistencyViolation(_))));

        let out_of_range = board.move_task(&TaskMove::new("task-1", "todo", 9, "done", 0));
        assert!(matches!(out_of_range, Err(BoardError::ConsistencyViolation(_))));

        let no_source = board.move_task(&TaskMove::new("task-1", "ghost", 0, "done", 0));
        assert!(matches!(no_source, Err(BoardError::ConsistencyViolation(_))));

        let no_dest = board.move_task(&TaskMove::new("task-1", "todo", 0, "ghost", 0));
        assert!(matches!(no_dest, Err(BoardError::ConsistencyViolation(_))));
    }

    #[test]
    fn test_move_enters_terminal() {
        assert!(TaskMove::new("t", "todo", 0, "done", 0).enters("done"));
        assert!(!TaskMove::new("t", "done", 0, "done", 1).enters("done"));
        assert!(!TaskMove::new("t", "done", 0, "todo", 0).enters("done"));
    }
}
