//! Device-local fallback copy of the last known board.
//!
//! One key, overwrite semantics, no history.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use taskboard_core::Board;

use super::StoreError;

/// Cache key holding the JSON-serialized board.
pub const CACHE_KEY: &str = "boardData";

pub trait LocalCache: Send + Sync {
    /// Last saved board, or `None` if nothing was ever saved.
    fn load(&self) -> Result<Option<Board>, StoreError>;

    /// Overwrite the cached board.
    fn save(&self, board: &Board) -> Result<(), StoreError>;
}

/// File-backed cache: `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    /// Cache under the default key in `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_key(dir, CACHE_KEY)
    }

    pub fn with_key(dir: impl AsRef<Path>, key: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{key}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the cached board, if any.
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl LocalCache for FileCache {
    fn load(&self) -> Result<Option<Board>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Board::from_json(&bytes)?))
    }

    fn save(&self, board: &Board) -> Result<(), StoreError> {
        let json = board
            .to_json()
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        // rename is atomic, so a crash never leaves a half-written cache
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory cache. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    slot: Arc<Mutex<Option<Board>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache pre-filled with `board`.
    pub fn with_board(board: Board) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(board))),
        }
    }

    /// Current contents, without going through the trait.
    pub fn get(&self) -> Option<Board> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl LocalCache for MemoryCache {
    fn load(&self) -> Result<Option<Board>, StoreError> {
        Ok(self.get())
    }

    fn save(&self, board: &Board) -> Result<(), StoreError> {
        *self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(board.clone());
        Ok(())
    }
}
