//! Board persistence: the durable Board Store and the device-local cache.
//!
//! Architecture:
//! ```text
//! ┌──────────────────┐  write(board)   ┌──────────────────────────────┐
//! │ BoardController  │ ──────────────► │ BoardStore                   │
//! │                  │ ◄────────────── │  RocksBoardStore / Memory    │
//! └────────┬─────────┘  StoreEvent     │  CF "boards"   — LZ4 JSON    │
//!          │            (subscribers)  │  CF "metadata" — bincode     │
//!          │ save(board)               └──────────────────────────────┘
//!          ▼
//! ┌──────────────────┐
//! │ LocalCache       │  one key, last snapshot only
//! └──────────────────┘
//! ```
//!
//! Stores are synchronous; the controller runs writes off its event loop.

pub mod cache;
pub mod memory;
pub mod rocks;

pub use cache::{FileCache, LocalCache, MemoryCache, CACHE_KEY};
pub use memory::{Availability, MemoryBoardStore};
pub use rocks::{BoardMetadata, RocksBoardStore, StoreConfig};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use taskboard_core::{Board, BoardError};

/// Storage errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Board document not found
    NotFound(String),
    SerializationError(String),
    DeserializationError(String),
    CompressionError(String),
    IoError(String),
    /// Store cannot be reached right now
    Unavailable,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(id) => write!(f, "Board not found: {id}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::IoError(e) => write!(f, "I/O error: {e}"),
            StoreError::Unavailable => write!(f, "Store unavailable"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::IoError(e.to_string())
    }
}

impl From<BoardError> for StoreError {
    fn from(e: BoardError) -> Self {
        StoreError::DeserializationError(e.to_string())
    }
}

/// What a store subscriber is told.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// The persisted document, after any write (including the subscriber's own)
    Snapshot(Board),
    /// No document is persisted under this id
    Missing,
    /// Reading or watching the document failed
    Failed(StoreError),
}

/// Subscriber callback.
pub type Listener = Box<dyn Fn(StoreEvent) + Send + Sync>;

/// Durable, multi-client board document store.
///
/// One document per board, addressed by a fixed id. Writes replace the
/// whole document.
pub trait BoardStore: Send + Sync {
    fn read(&self, board_id: &str) -> Result<Option<Board>, StoreError>;

    fn write(&self, board_id: &str, board: &Board) -> Result<(), StoreError>;

    /// Register `listener`. It is called once right away with the current
    /// state, then after every write to `board_id`, until the returned
    /// [`Subscription`] is dropped.
    fn subscribe(&self, board_id: &str, listener: Listener) -> Subscription;
}

/// Registry of store subscribers, keyed by board id.
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    inner: Mutex<HashMap<String, HashMap<u64, Arc<Listener>>>>,
}

impl Listeners {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<u64, Arc<Listener>>>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a listener. It is not called until the next [`notify`](Self::notify).
    pub fn register(self: &Arc<Self>, board_id: &str, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .entry(board_id.to_string())
            .or_default()
            .insert(id, Arc::new(listener));
        Subscription {
            id,
            board_id: board_id.to_string(),
            listeners: Arc::downgrade(self),
        }
    }

    /// Call every listener of `board_id` with `event`.
    pub fn notify(&self, board_id: &str, event: &StoreEvent) {
        // snapshot the callbacks so a listener may subscribe or unsubscribe
        let targets: Vec<Arc<Listener>> = self
            .lock()
            .get(board_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        for listener in targets {
            listener(event.clone());
        }
    }

    /// Call a single listener.
    pub fn notify_one(&self, subscription: &Subscription, event: StoreEvent) {
        let target = self
            .lock()
            .get(&subscription.board_id)
            .and_then(|m| m.get(&subscription.id).cloned());
        if let Some(listener) = target {
            listener(event);
        }
    }

    pub fn count(&self, board_id: &str) -> usize {
        self.lock().get(board_id).map_or(0, HashMap::len)
    }

    fn remove(&self, board_id: &str, id: u64) {
        let mut inner = self.lock();
        if let Some(m) = inner.get_mut(board_id) {
            m.remove(&id);
            if m.is_empty() {
                inner.remove(board_id);
            }
        }
    }
}

/// Handle to a store subscription. Dropping it unregisters the listener.
pub struct Subscription {
    id: u64,
    board_id: String,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    /// Unregister now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(&self.board_id, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("board_id", &self.board_id)
            .finish()
    }
}
