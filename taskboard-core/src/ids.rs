//! Id and tag sources injected into board mutations.

use uuid::Uuid;

/// Source of fresh task and column ids.
///
/// Every id returned must be distinct from every id previously returned
/// by the same generator.
pub trait IdGenerator: Send {
    fn task_id(&mut self) -> String;
    fn column_id(&mut self) -> String;
}

/// Random ids: `task-<uuid>` / `col-<uuid>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn task_id(&mut self) -> String {
        format!("task-{}", Uuid::new_v4())
    }

    fn column_id(&mut self) -> String {
        format!("col-{}", Uuid::new_v4())
    }
}

/// Deterministic ids: `<prefix>task-<n>` / `<prefix>col-<n>`.
#[derive(Debug, Clone, Default)]
pub struct SequentialIds {
    prefix: String,
    next: u64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix keeps generators of different clients from colliding.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
        }
    }

    fn bump(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}

impl IdGenerator for SequentialIds {
    fn task_id(&mut self) -> String {
        let n = self.bump();
        format!("{}task-{n}", self.prefix)
    }

    fn column_id(&mut self) -> String {
        let n = self.bump();
        format!("{}col-{n}", self.prefix)
    }
}

/// Tags assigned to new tasks, handed out round-robin.
#[derive(Debug, Clone)]
pub struct TagPool {
    tags: Vec<String>,
    cursor: usize,
}

impl TagPool {
    pub const DEFAULT_TAGS: [&'static str; 4] = ["Frontend", "Backend", "Design", "Bug"];

    /// Build a pool from `tags`. Blank entries are dropped; if nothing is
    /// left the pool uses [`DEFAULT_TAGS`](Self::DEFAULT_TAGS).
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tags: Vec<String> = tags
            .into_iter()
            .map(Into::into)
            .filter(|t: &String| !t.trim().is_empty())
            .collect();
        if tags.is_empty() {
            log::warn!("Empty tag pool, using default tags");
            tags = Self::DEFAULT_TAGS.iter().map(|t| t.to_string()).collect();
        }
        Self { tags, cursor: 0 }
    }

    pub fn next_tag(&mut self) -> Option<String> {
        let tag = self.tags.get(self.cursor % self.tags.len()).cloned();
        self.cursor = self.cursor.wrapping_add(1);
        tag
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

impl Default for TagPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TAGS)
    }
}
