//! Read-only views over a board: search filter and summary.

use crate::model::{Board, Priority, Task};

/// Per-column task counts and high-priority work, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardSummary {
    pub total_tasks: usize,
    pub columns: Vec<(String, usize)>,
    pub high_priority: Vec<String>,
}

impl std::fmt::Display for BoardSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} total tasks", self.total_tasks)?;
        if !self.columns.is_empty() {
            let breakdown: Vec<String> = self
                .columns
                .iter()
                .map(|(title, count)| format!("{title}: {count}"))
                .collect();
            write!(f, " ({})", breakdown.join(", "))?;
        }
        Ok(())
    }
}

impl Board {
    /// Tasks whose content or tag contains `query` (case-insensitive),
    /// grouped by column id in display order. An empty query matches all.
    pub fn search(&self, query: &str) -> Vec<(&str, Vec<&Task>)> {
        let needle = query.trim().to_lowercase();
        self.ordered_columns()
            .map(|column| {
                let hits = column
                    .task_ids
                    .iter()
                    .filter_map(|id| self.tasks.get(id))
                    .filter(|task| needle.is_empty() || matches(task, &needle))
                    .collect();
                (column.id.as_str(), hits)
            })
            .collect()
    }

    pub fn summary(&self) -> BoardSummary {
        let columns = self
            .ordered_columns()
            .map(|c| (c.title.clone(), c.task_ids.len()))
            .collect();

        // column order first so the list reads like the board
        let high_priority = self
            .ordered_columns()
            .flat_map(|c| c.task_ids.iter())
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.priority == Priority::High)
            .map(|t| t.content.clone())
            .collect();

        BoardSummary {
            total_tasks: self.tasks.len(),
            columns,
            high_priority,
        }
    }
}

fn matches(task: &Task, needle: &str) -> bool {
    task.content.to_lowercase().contains(needle)
        || task
            .tag
            .as_deref()
            .is_some_and(|tag| tag.to_lowercase().contains(needle))
}
