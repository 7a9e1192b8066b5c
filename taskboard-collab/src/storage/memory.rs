//! In-process Board Store with failure injection.
//!
//! Shares the subscriber semantics of the RocksDB store, so controllers can
//! be exercised against an unreachable, slow, or flaky store without a
//! database on disk.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use taskboard_core::Board;

use super::{BoardStore, Listener, Listeners, StoreError, StoreEvent, Subscription};

/// How the store currently behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Availability {
    /// Normal operation
    #[default]
    Online,
    /// Requests fail and subscribers hear nothing until the store is back
    /// online, at which point they receive the current document.
    Stalled,
    /// Requests fail and subscribers are told so right away
    Failing,
    /// Reads and subscriptions work; writes are refused
    ReadOnly,
}

#[derive(Default)]
struct State {
    docs: HashMap<String, Board>,
    availability: Availability,
    /// Board ids subscribed to while stalled
    withheld: HashSet<String>,
}

/// In-memory board store.
#[derive(Default)]
pub struct MemoryBoardStore {
    state: Mutex<State>,
    listeners: Arc<Listeners>,
    writes: AtomicU64,
    /// Orders each document change with the notify that announces it
    write_lock: Mutex<()>,
}

impl MemoryBoardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store already holding `board` under `board_id`.
    pub fn with_board(board_id: &str, board: Board) -> Self {
        let store = Self::new();
        store.lock().docs.insert(board_id.to_string(), board);
        store
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn serialized(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Change availability. Going back online delivers the current
    /// document to every subscription that was withheld while stalled.
    pub fn set_availability(&self, availability: Availability) {
        let _guard = self.serialized();
        let released: Vec<(String, StoreEvent)> = {
            let mut state = self.lock();
            state.availability = availability;
            if availability != Availability::Online {
                return;
            }
            let withheld: Vec<String> = state.withheld.drain().collect();
            withheld
                .into_iter()
                .map(|id| {
                    let event = match state.docs.get(&id) {
                        Some(board) => StoreEvent::Snapshot(board.clone()),
                        None => StoreEvent::Missing,
                    };
                    (id, event)
                })
                .collect()
        };
        for (board_id, event) in released {
            log::debug!("Store back online, releasing {board_id}");
            self.listeners.notify(&board_id, &event);
        }
    }

    pub fn availability(&self) -> Availability {
        self.lock().availability
    }

    /// Document as stored, regardless of availability.
    pub fn peek(&self, board_id: &str) -> Option<Board> {
        self.lock().docs.get(board_id).cloned()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self, board_id: &str) -> usize {
        self.listeners.count(board_id)
    }
}

impl BoardStore for MemoryBoardStore {
    fn read(&self, board_id: &str) -> Result<Option<Board>, StoreError> {
        let state = self.lock();
        match state.availability {
            Availability::Online | Availability::ReadOnly => Ok(state.docs.get(board_id).cloned()),
            Availability::Stalled | Availability::Failing => Err(StoreError::Unavailable),
        }
    }

    fn write(&self, board_id: &str, board: &Board) -> Result<(), StoreError> {
        let _guard = self.serialized();
        {
            let mut state = self.lock();
            if state.availability != Availability::Online {
                return Err(StoreError::Unavailable);
            }
            state.docs.insert(board_id.to_string(), board.clone());
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .notify(board_id, &StoreEvent::Snapshot(board.clone()));
        Ok(())
    }

    fn subscribe(&self, board_id: &str, listener: Listener) -> Subscription {
        let subscription = self.listeners.register(board_id, listener);
        let _guard = self.serialized();
        let initial = {
            let mut state = self.lock();
            match state.availability {
                Availability::Online | Availability::ReadOnly => Some(match state.docs.get(board_id) {
                    Some(board) => StoreEvent::Snapshot(board.clone()),
                    None => StoreEvent::Missing,
                }),
                Availability::Failing => Some(StoreEvent::Failed(StoreError::Unavailable)),
                Availability::Stalled => {
                    state.withheld.insert(board_id.to_string());
                    None
                }
            }
        };
        if let Some(event) = initial {
            self.listeners.notify_one(&subscription, event);
        }
        subscription
    }
}
