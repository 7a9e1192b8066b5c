//! Board Controller: the single owner of a client's board.
//!
//! ```text
//!   intent ──► ops ──► Board' ──┬─► in-memory state
//!                               ├─► LocalCache::save
//!                               ├─► RelayChannel::publish
//!                               └─► writer task ──► BoardStore::write
//!
//!   BoardStore listener ──┐
//!                         ├─► inbound queue ──► process_next / drain_inbound
//!   RelayClient reader  ──┘                     (wholesale replacement)
//! ```
//!
//! Conflicts between clients are settled by whichever full document lands
//! last. There is no merge step.
//!
//! A client's own writes echo back through the store subscription. Echoes
//! of writes that have since been superseded locally are dropped, so a
//! client never rolls back its own edits.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use taskboard_core::{
    Board, BoardError, IdGenerator, TagPool, TaskMove, UuidIds, TERMINAL_COLUMN,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::client::{Detached, RelayChannel, RelayClient};
use crate::protocol::{PeerInfo, ProtocolError};
use crate::storage::{BoardStore, LocalCache, StoreError, StoreEvent, Subscription};

/// Message fed into the controller from an asynchronous source.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Store(StoreEvent),
    Relay(Board),
}

/// Producer side of the controller's inbound queue.
pub type InboundSender = mpsc::UnboundedSender<Inbound>;

/// Startup state of the durable store connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Waiting for the first store event
    Connecting,
    /// Board reflects the durable store
    Synced,
    /// Store did not answer in time; showing the locally cached board
    LocalFallback,
}

/// Where a wholesale replacement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceSource {
    Cache,
    Seed,
    Store,
    Relay,
}

/// Notifications for the view layer.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    /// A task was moved into the terminal column from another column
    EnteredTerminalColumn { task_id: String },
    /// The board was replaced by a snapshot from elsewhere
    Replaced { source: ReplaceSource },
    StateChanged(SyncState),
    /// An intent was refused; the board is unchanged
    Rejected { reason: String },
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Store document id
    pub board_id: String,
    /// Relay room
    pub room: String,
    /// How long startup waits for the store before falling back
    pub store_timeout: Duration,
    /// Column whose entry raises `EnteredTerminalColumn`
    pub terminal_column: String,
    /// Tags handed out to new tasks
    pub tags: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            board_id: "main-board".to_string(),
            room: "main-board".to_string(),
            store_timeout: Duration::from_millis(1500),
            terminal_column: TERMINAL_COLUMN.to_string(),
            tags: TagPool::DEFAULT_TAGS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl SyncConfig {
    /// Short store timeout for tests.
    pub fn for_testing() -> Self {
        Self {
            store_timeout: Duration::from_millis(100),
            ..Self::default()
        }
    }
}

/// Controller errors.
#[derive(Debug, Clone)]
pub enum SyncError {
    /// The intent conflicts with the current board
    Board(BoardError),
    Store(StoreError),
    Relay(ProtocolError),
    /// Inbound queue or store writer is gone
    Closed,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Board(e) => write!(f, "Board error: {e}"),
            SyncError::Store(e) => write!(f, "Store error: {e}"),
            SyncError::Relay(e) => write!(f, "Relay error: {e}"),
            SyncError::Closed => write!(f, "Controller channel closed"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<BoardError> for SyncError {
    fn from(e: BoardError) -> Self {
        SyncError::Board(e)
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Store(e)
    }
}

impl From<ProtocolError> for SyncError {
    fn from(e: ProtocolError) -> Self {
        SyncError::Relay(e)
    }
}

type WriteAck = oneshot::Sender<Result<(), StoreError>>;

enum WriteCmd {
    Put { board: Board, ack: Option<WriteAck> },
    Flush(oneshot::Sender<()>),
}

/// Applies queued writes one at a time so a client's own writes reach the
/// store in the order they were made. Boards whose write failed are sent
/// back on `failed` since their echo will never arrive.
async fn run_writer(
    store: Arc<dyn BoardStore>,
    board_id: String,
    mut rx: mpsc::UnboundedReceiver<WriteCmd>,
    failed: mpsc::UnboundedSender<Board>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriteCmd::Put { board, ack } => {
                let store = store.clone();
                let id = board_id.clone();
                let written = board.clone();
                let result =
                    match tokio::task::spawn_blocking(move || store.write(&id, &written)).await {
                        Ok(result) => result,
                        Err(e) => {
                            log::error!("Store write task for {board_id} aborted: {e}");
                            Err(StoreError::Unavailable)
                        }
                    };
                match &result {
                    Ok(()) => log::debug!("Persisted board {board_id}"),
                    Err(e) => {
                        log::error!("Store write for {board_id} failed: {e}");
                        let _ = failed.send(board);
                    }
                }
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
            WriteCmd::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    log::debug!("Store writer for {board_id} stopped");
}

/// Owns one client's board and replicates every change.
///
/// Intents run to completion one at a time. Inbound snapshots are queued
/// and applied by [`process_next`](Self::process_next) or
/// [`drain_inbound`](Self::drain_inbound).
pub struct BoardController {
    board: Board,
    state: SyncState,
    config: SyncConfig,
    store: Arc<dyn BoardStore>,
    cache: Box<dyn LocalCache>,
    relay: Arc<dyn RelayChannel>,
    ids: Box<dyn IdGenerator>,
    tags: TagPool,
    inbound_tx: InboundSender,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    events_tx: mpsc::UnboundedSender<BoardEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<BoardEvent>>,
    writer_tx: mpsc::UnboundedSender<WriteCmd>,
    failed_rx: mpsc::UnboundedReceiver<Board>,
    /// Boards handed to the writer whose store echo has not been seen yet,
    /// oldest first
    pending: VecDeque<Board>,
    subscription: Option<Subscription>,
}

impl BoardController {
    /// Create a detached controller showing an empty board.
    ///
    /// Must be called from within a Tokio runtime: the store writer task is
    /// spawned here.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn BoardStore>,
        cache: Box<dyn LocalCache>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (failed_tx, failed_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(
            store.clone(),
            config.board_id.clone(),
            writer_rx,
            failed_tx,
        ));

        Self {
            board: Board::empty(),
            state: SyncState::Connecting,
            tags: TagPool::new(config.tags.clone()),
            config,
            store,
            cache,
            relay: Arc::new(Detached),
            ids: Box::new(UuidIds),
            inbound_tx,
            inbound_rx,
            events_tx,
            events_rx: Some(events_rx),
            writer_tx,
            failed_rx,
            pending: VecDeque::new(),
            subscription: None,
        }
    }

    /// Replace the id generator.
    pub fn with_ids(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    /// Publish future changes on `relay`.
    pub fn attach_relay(&mut self, relay: Arc<dyn RelayChannel>) {
        self.relay = relay;
    }

    /// Connect a [`RelayClient`] to `server_url` in the configured room and
    /// attach it.
    pub async fn join_relay(
        &mut self,
        peer: PeerInfo,
        server_url: impl Into<String>,
    ) -> Result<(), SyncError> {
        let client = RelayClient::connect(
            peer,
            self.config.room.clone(),
            server_url,
            self.inbound_tx.clone(),
        )
        .await?;
        self.attach_relay(Arc::new(client));
        Ok(())
    }

    /// Run the startup sequence.
    ///
    /// Shows the cached board, subscribes to the store, then waits up to
    /// `store_timeout` for the first store event:
    /// - snapshot: adopt it, `Synced`
    /// - no document: write [`Board::seed`] to the store, `Synced` once the
    ///   write succeeds, `LocalFallback` if it fails
    /// - error or timeout: keep the cached board (or the seed board if the
    ///   cache is empty), `LocalFallback`
    ///
    /// A later store snapshot still moves the controller to `Synced`.
    pub async fn connect(&mut self) -> Result<SyncState, SyncError> {
        let cached = match self.cache.load() {
            Ok(cached) => cached,
            Err(e) => {
                log::warn!("Ignoring unreadable local cache: {e}");
                None
            }
        };
        let has_cache = cached.is_some();
        if let Some(board) = cached {
            self.replace(board, ReplaceSource::Cache);
        }

        let tx = self.inbound_tx.clone();
        let subscription = self.store.subscribe(
            &self.config.board_id,
            Box::new(move |event| {
                let _ = tx.send(Inbound::Store(event));
            }),
        );
        self.subscription = Some(subscription);
        self.set_state(SyncState::Connecting);

        let deadline = Instant::now() + self.config.store_timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, self.inbound_rx.recv()).await;
            match next {
                Err(_) => {
                    log::warn!(
                        "Store silent for {:?}, falling back to local copy",
                        self.config.store_timeout
                    );
                    self.fall_back(has_cache);
                    break;
                }
                Ok(None) => return Err(SyncError::Closed),
                Ok(Some(Inbound::Relay(board))) => {
                    self.accept(board, ReplaceSource::Relay);
                }
                Ok(Some(Inbound::Store(StoreEvent::Snapshot(board)))) => {
                    if self.accept(board, ReplaceSource::Store) {
                        self.set_state(SyncState::Synced);
                    } else {
                        self.fall_back(has_cache);
                    }
                    break;
                }
                Ok(Some(Inbound::Store(StoreEvent::Missing))) => {
                    log::info!("No board {} in store, seeding", self.config.board_id);
                    self.replace(Board::seed(), ReplaceSource::Seed);
                    match self.persist_acked().await {
                        Ok(()) => self.set_state(SyncState::Synced),
                        Err(e) => {
                            log::warn!("Seeding board {} failed: {e}", self.config.board_id);
                            self.set_state(SyncState::LocalFallback);
                        }
                    }
                    break;
                }
                Ok(Some(Inbound::Store(StoreEvent::Failed(e)))) => {
                    log::warn!("Store subscription failed: {e}");
                    self.fall_back(has_cache);
                    break;
                }
            }
        }
        Ok(self.state)
    }

    fn fall_back(&mut self, has_cache: bool) {
        if !has_cache {
            self.replace(Board::seed(), ReplaceSource::Seed);
        }
        self.set_state(SyncState::LocalFallback);
    }

    /// Wait for one inbound message and apply it. Returns whether the board
    /// changed.
    pub async fn process_next(&mut self) -> Result<bool, SyncError> {
        match self.inbound_rx.recv().await {
            Some(inbound) => Ok(self.apply_inbound(inbound)),
            None => Err(SyncError::Closed),
        }
    }

    /// Apply everything already queued without waiting. Returns the number
    /// of messages processed.
    pub fn drain_inbound(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(inbound) = self.inbound_rx.try_recv() {
            self.apply_inbound(inbound);
            processed += 1;
        }
        processed
    }

    fn apply_inbound(&mut self, inbound: Inbound) -> bool {
        let before = self.board.clone();
        match inbound {
            Inbound::Relay(board) => {
                self.accept(board, ReplaceSource::Relay);
            }
            Inbound::Store(StoreEvent::Snapshot(board)) => {
                if self.is_stale_echo(&board) {
                    log::debug!("Dropping echo of a superseded local write");
                    self.set_state(SyncState::Synced);
                } else if self.accept(board, ReplaceSource::Store) {
                    self.set_state(SyncState::Synced);
                }
            }
            Inbound::Store(StoreEvent::Missing) => {
                log::info!(
                    "Board {} missing from store, persisting current board",
                    self.config.board_id
                );
                self.persist();
                self.set_state(SyncState::Synced);
            }
            Inbound::Store(StoreEvent::Failed(e)) => {
                log::warn!("Store reported failure: {e}");
            }
        }
        self.board != before
    }

    /// True when `board` is this client's own write and a newer local write
    /// is still on its way to the store. Settles every pending write up to
    /// and including the echoed one.
    fn is_stale_echo(&mut self, board: &Board) -> bool {
        while let Ok(failed) = self.failed_rx.try_recv() {
            if let Some(pos) = self.pending.iter().position(|b| *b == failed) {
                self.pending.remove(pos);
            }
        }
        match self.pending.iter().position(|b| b == board) {
            Some(pos) => {
                self.pending.drain(..=pos);
                !self.pending.is_empty()
            }
            None => false,
        }
    }

    /// Take over an inbound snapshot if it is a valid board.
    fn accept(&mut self, board: Board, source: ReplaceSource) -> bool {
        if let Err(e) = board.validate() {
            log::warn!("Dropping invalid {source:?} snapshot: {e}");
            return false;
        }
        self.replace(board, source);
        true
    }

    fn replace(&mut self, board: Board, source: ReplaceSource) {
        if let Err(e) = self.cache.save(&board) {
            log::warn!("Local cache write failed: {e}");
        }
        if board != self.board {
            log::debug!("Board replaced from {source:?}");
            self.board = board;
            self.emit(BoardEvent::Replaced { source });
        }
    }

    // ── Intents ──────────────────────────────────────────────

    /// Append a task to `column_id`. Whitespace-only content is ignored.
    pub fn add_task(&mut self, column_id: &str, content: &str) -> Result<bool, SyncError> {
        let next = self
            .board
            .add_task(column_id, content, &mut *self.ids, &mut self.tags);
        match next {
            Ok(next) => Ok(self.commit(next)),
            Err(e) => Err(self.reject(e)),
        }
    }

    pub fn delete_task(&mut self, task_id: &str, column_id: &str) -> bool {
        let next = self.board.delete_task(task_id, column_id);
        self.commit(next)
    }

    pub fn update_task(&mut self, task_id: &str, new_content: &str) -> bool {
        let next = self.board.update_task(task_id, new_content);
        self.commit(next)
    }

    pub fn add_column(&mut self) -> Result<bool, SyncError> {
        match self.board.add_column(&mut *self.ids) {
            Ok(next) => Ok(self.commit(next)),
            Err(e) => Err(self.reject(e)),
        }
    }

    pub fn rename_column(&mut self, column_id: &str, title: &str) -> bool {
        let next = self.board.rename_column(column_id, title);
        self.commit(next)
    }

    pub fn delete_column(&mut self, column_id: &str) -> bool {
        let next = self.board.delete_column(column_id);
        self.commit(next)
    }

    /// Drag a task. A move that disagrees with the current board is
    /// refused and leaves it untouched.
    pub fn move_task(&mut self, mv: &TaskMove) -> Result<bool, SyncError> {
        let next = match self.board.move_task(mv) {
            Ok(next) => next,
            Err(e) => return Err(self.reject(e)),
        };
        let changed = self.commit(next);
        if changed && mv.enters(&self.config.terminal_column) {
            log::info!("Task {} completed", mv.task_id);
            self.emit(BoardEvent::EnteredTerminalColumn {
                task_id: mv.task_id.clone(),
            });
        }
        Ok(changed)
    }

    fn reject(&mut self, error: BoardError) -> SyncError {
        log::warn!("Rejected intent: {error}");
        self.emit(BoardEvent::Rejected {
            reason: error.to_string(),
        });
        SyncError::Board(error)
    }

    /// Replicate `next` unless it equals the current board.
    fn commit(&mut self, next: Board) -> bool {
        if next == self.board {
            return false;
        }
        debug_assert!(
            next.validate().is_ok(),
            "intent produced an invalid board: {:?}",
            next.validate()
        );
        self.board = next;
        if let Err(e) = self.cache.save(&self.board) {
            log::warn!("Local cache write failed: {e}");
        }
        if let Err(e) = self.relay.publish(&self.board) {
            log::debug!("Relay publish dropped: {e}");
        }
        self.persist();
        true
    }

    fn persist(&mut self) {
        self.queue_write(None);
    }

    /// Queue the current board and wait for the store's answer.
    async fn persist_acked(&mut self) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.queue_write(Some(tx));
        rx.await.map_err(|_| SyncError::Closed)??;
        Ok(())
    }

    fn queue_write(&mut self, ack: Option<WriteAck>) {
        let board = self.board.clone();
        self.pending.push_back(board.clone());
        if self.writer_tx.send(WriteCmd::Put { board, ack }).is_err() {
            log::error!("Store writer stopped, board {} not persisted", self.config.board_id);
            self.pending.pop_back();
        }
    }

    /// Wait until every store write queued so far has been attempted.
    pub async fn flush(&self) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.writer_tx
            .send(WriteCmd::Flush(tx))
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    fn set_state(&mut self, state: SyncState) {
        if self.state != state {
            log::info!("Board {}: {:?} → {state:?}", self.config.board_id, self.state);
            self.state = state;
            self.emit(BoardEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: BoardEvent) {
        let _ = self.events_tx.send(event);
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Event stream for the view. Only the first call returns it.
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<BoardEvent>> {
        self.events_rx.take()
    }

    /// Handle for feeding snapshots into the inbound queue.
    pub fn inbound_sender(&self) -> InboundSender {
        self.inbound_tx.clone()
    }

    /// Stop listening to the store.
    pub fn unsubscribe(&mut self) {
        self.subscription = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Availability, MemoryBoardStore, MemoryCache};
    use std::sync::Mutex;
    use taskboard_core::SequentialIds;

    #[derive(Default)]
    struct RecordingRelay {
        sent: Mutex<Vec<Board>>,
    }

    impl RelayChannel for RecordingRelay {
        fn publish(&self, board: &Board) -> Result<(), ProtocolError> {
            self.sent.lock().unwrap().push(board.clone());
            Ok(())
        }
    }

    struct Harness {
        ctl: BoardController,
        store: Arc<MemoryBoardStore>,
        cache: MemoryCache,
        relay: Arc<RecordingRelay>,
        events: mpsc::UnboundedReceiver<BoardEvent>,
    }

    fn harness(store: MemoryBoardStore, cache: MemoryCache) -> Harness {
        let store = Arc::new(store);
        let relay = Arc::new(RecordingRelay::default());
        let mut ctl = BoardController::new(
            SyncConfig::for_testing(),
            store.clone(),
            Box::new(cache.clone()),
        )
        .with_ids(SequentialIds::with_prefix("t-"));
        ctl.attach_relay(relay.clone());
        let events = ctl.take_event_rx().unwrap();
        Harness {
            ctl,
            store,
            cache,
            relay,
            events,
        }
    }

    fn drain_events(rx: &mut mpsc::UnboundedReceiver<BoardEvent>) -> Vec<BoardEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    async fn synced() -> Harness {
        let mut h = harness(
            MemoryBoardStore::with_board("main-board", Board::seed()),
            MemoryCache::new(),
        );
        assert_eq!(h.ctl.connect().await.unwrap(), SyncState::Synced);
        drain_events(&mut h.events);
        h
    }

    #[tokio::test]
    async fn test_connect_adopts_store_snapshot() {
        let stored = Board::seed().rename_column("todo", "Backlog");
        let mut h = harness(
            MemoryBoardStore::with_board("main-board", stored.clone()),
            MemoryCache::with_board(Board::seed()),
        );

        assert_eq!(h.ctl.connect().await.unwrap(), SyncState::Synced);
        assert_eq!(h.ctl.board(), &stored);
        assert_eq!(h.cache.get(), Some(stored));
        assert_eq!(h.store.subscriber_count("main-board"), 1);

        let events = drain_events(&mut h.events);
        assert!(events.contains(&BoardEvent::StateChanged(SyncState::Synced)));
    }

    #[tokio::test]
    async fn test_connect_seeds_missing_document() {
        let mut h = harness(MemoryBoardStore::new(), MemoryCache::new());

        assert_eq!(h.ctl.connect().await.unwrap(), SyncState::Synced);
        assert_eq!(h.ctl.board(), &Board::seed());

        h.ctl.flush().await.unwrap();
        assert_eq!(h.store.peek("main-board"), Some(Board::seed()));
        assert!(drain_events(&mut h.events).contains(&BoardEvent::Replaced {
            source: ReplaceSource::Seed
        }));
    }

    #[tokio::test]
    async fn test_connect_failing_store_uses_cache() {
        let cached = Board::seed().delete_column("done");
        let store = MemoryBoardStore::with_board("main-board", Board::seed());
        store.set_availability(Availability::Failing);
        let mut h = harness(store, MemoryCache::with_board(cached.clone()));

        assert_eq!(h.ctl.connect().await.unwrap(), SyncState::LocalFallback);
        assert_eq!(h.ctl.board(), &cached);
    }

    #[tokio::test]
    async fn test_timeout_then_late_snapshot() {
        let store = MemoryBoardStore::with_board("main-board", Board::seed());
        store.set_availability(Availability::Stalled);
        let mut h = harness(store, MemoryCache::new());

        let started = Instant::now();
        assert_eq!(h.ctl.connect().await.unwrap(), SyncState::LocalFallback);
        assert!(started.elapsed() >= Duration::from_millis(100));
        // empty cache falls back to the seed board
        assert_eq!(h.ctl.board(), &Board::seed());

        assert!(h.ctl.add_column().unwrap());
        assert_ne!(h.ctl.board(), &Board::seed());
        // the write is attempted while the store is still stalled
        h.ctl.flush().await.unwrap();

        h.store.set_availability(Availability::Online);
        assert!(h.ctl.process_next().await.unwrap());
        assert_eq!(h.ctl.state(), SyncState::Synced);
        // late data wins over fallback edits
        assert_eq!(h.ctl.board(), &Board::seed());

        let events = drain_events(&mut h.events);
        assert!(events.contains(&BoardEvent::StateChanged(SyncState::LocalFallback)));
        assert_eq!(
            events.last(),
            Some(&BoardEvent::StateChanged(SyncState::Synced))
        );
    }

    #[tokio::test]
    async fn test_blank_add_task_is_not_replicated() {
        let mut h = synced().await;
        assert!(!h.ctl.add_task("todo", "   ").unwrap());
        assert_eq!(h.ctl.board(), &Board::seed());
        assert!(h.relay.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_task_replicates() {
        let mut h = synced().await;
        assert!(h.ctl.add_task("in-progress", "Write docs").unwrap());

        let board = h.ctl.board().clone();
        assert_eq!(board.tasks["t-task-1"].content, "Write docs");
        assert_eq!(board.tasks["t-task-1"].tag.as_deref(), Some("Frontend"));
        assert_eq!(h.cache.get(), Some(board.clone()));
        assert_eq!(*h.relay.sent.lock().unwrap(), vec![board.clone()]);

        h.ctl.flush().await.unwrap();
        assert_eq!(h.store.peek("main-board"), Some(board.clone()));

        // own write comes back through the subscription
        h.ctl.drain_inbound();
        assert_eq!(h.ctl.board(), &board);
    }

    #[tokio::test]
    async fn test_move_into_done_signals_completion() {
        let mut h = synced().await;
        let mv = TaskMove::new("task-1", "todo", 0, "done", 0);
        assert!(h.ctl.move_task(&mv).unwrap());

        assert_eq!(h.ctl.board().columns["done"].task_ids, vec!["task-1"]);
        let events = drain_events(&mut h.events);
        assert_eq!(
            events,
            vec![BoardEvent::EnteredTerminalColumn {
                task_id: "task-1".into()
            }]
        );

        // reordering inside done is not a new completion
        h.ctl.add_task("done", "Ship").unwrap();
        let mv = TaskMove::new("task-1", "done", 0, "done", 1);
        assert!(h.ctl.move_task(&mv).unwrap());
        assert!(drain_events(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_noop_move_short_circuits() {
        let mut h = synced().await;
        let mv = TaskMove::new("task-2", "todo", 1, "todo", 1);
        assert!(!h.ctl.move_task(&mv).unwrap());
        assert!(h.relay.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inconsistent_move_is_rejected() {
        let mut h = synced().await;
        let mv = TaskMove::new("task-2", "todo", 0, "done", 0);

        let err = h.ctl.move_task(&mv).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Board(BoardError::ConsistencyViolation(_))
        ));
        assert_eq!(h.ctl.board(), &Board::seed());
        assert!(h.relay.sent.lock().unwrap().is_empty());
        assert!(matches!(
            drain_events(&mut h.events).as_slice(),
            [BoardEvent::Rejected { .. }]
        ));
    }

    #[tokio::test]
    async fn test_store_failure_keeps_optimistic_state() {
        let mut h = synced().await;
        h.store.set_availability(Availability::Failing);

        assert!(h.ctl.delete_column("todo"));
        h.ctl.flush().await.unwrap();

        assert_eq!(h.ctl.board().task_count(), 0);
        assert_eq!(h.cache.get().unwrap().task_count(), 0);
        assert_eq!(h.store.peek("main-board"), Some(Board::seed()));
        assert_eq!(h.relay.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_inbound_is_dropped() {
        let mut h = synced().await;
        let mut broken = Board::seed();
        broken.tasks.remove("task-1");

        h.ctl.inbound_sender().send(Inbound::Relay(broken)).unwrap();
        assert!(!h.ctl.process_next().await.unwrap());
        assert_eq!(h.ctl.board(), &Board::seed());
    }

    #[tokio::test]
    async fn test_relay_snapshot_replaces_board() {
        let mut h = synced().await;
        let remote = Board::seed().delete_task("task-4", "todo");

        h.ctl
            .inbound_sender()
            .send(Inbound::Relay(remote.clone()))
            .unwrap();
        assert_eq!(h.ctl.drain_inbound(), 1);
        assert_eq!(h.ctl.board(), &remote);
        assert_eq!(h.cache.get(), Some(remote));
        assert_eq!(
            drain_events(&mut h.events),
            vec![BoardEvent::Replaced {
                source: ReplaceSource::Relay
            }]
        );
        // inbound snapshots are not re-broadcast
        assert!(h.relay.sent.lock().unwrap().is_empty());
    }

    fn contents(board: &Board) -> Vec<String> {
        let mut contents: Vec<String> = board.tasks.values().map(|t| t.content.clone()).collect();
        contents.sort();
        contents
    }

    #[tokio::test]
    async fn test_echo_of_superseded_write_is_dropped() {
        let mut h = synced().await;

        assert!(h.ctl.add_task("todo", "A").unwrap());
        h.ctl.flush().await.unwrap();
        // echo of A is queued, B is not written yet
        assert!(h.ctl.add_task("todo", "B").unwrap());
        h.ctl.drain_inbound();
        assert!(h.ctl.board().tasks.values().any(|t| t.content == "B"));

        assert!(h.ctl.add_task("todo", "C").unwrap());
        h.ctl.flush().await.unwrap();
        h.ctl.drain_inbound();

        let board = h.ctl.board().clone();
        for content in ["A", "B", "C"] {
            assert!(contents(&board).contains(&content.to_string()), "{content} lost");
        }
        assert_eq!(h.store.peek("main-board"), Some(board));
        assert!(!drain_events(&mut h.events).contains(&BoardEvent::Replaced {
            source: ReplaceSource::Store
        }));
    }

    #[tokio::test]
    async fn test_foreign_snapshot_wins_over_pending_write() {
        let mut h = synced().await;
        assert!(h.ctl.add_task("todo", "Mine").unwrap());

        let foreign = Board::seed().rename_column("done", "Shipped");
        h.ctl
            .inbound_sender()
            .send(Inbound::Store(StoreEvent::Snapshot(foreign.clone())))
            .unwrap();
        assert_eq!(h.ctl.drain_inbound(), 1);
        assert_eq!(h.ctl.board(), &foreign);

        // the echo of the last own write still settles the board
        h.ctl.flush().await.unwrap();
        h.ctl.drain_inbound();
        assert_eq!(Some(h.ctl.board().clone()), h.store.peek("main-board"));
    }

    #[tokio::test]
    async fn test_unprefixed_ids_do_not_clobber_seed_tasks() {
        let store = Arc::new(MemoryBoardStore::with_board("main-board", Board::seed()));
        let mut ctl = BoardController::new(
            SyncConfig::for_testing(),
            store.clone(),
            Box::new(MemoryCache::new()),
        )
        .with_ids(SequentialIds::new());
        ctl.connect().await.unwrap();

        assert!(ctl.add_task("done", "X").unwrap());
        assert!(ctl.add_column().unwrap());
        ctl.board().validate().unwrap();
        assert_eq!(ctl.board().tasks["task-1"], Board::seed().tasks["task-1"]);
        assert_eq!(ctl.board().task_count(), 5);

        ctl.flush().await.unwrap();
        store.peek("main-board").unwrap().validate().unwrap();
    }

    #[tokio::test]
    async fn test_failed_seed_write_falls_back() {
        let store = MemoryBoardStore::new();
        store.set_availability(Availability::ReadOnly);
        let mut h = harness(store, MemoryCache::new());

        assert_eq!(h.ctl.connect().await.unwrap(), SyncState::LocalFallback);
        assert_eq!(h.ctl.board(), &Board::seed());
        assert_eq!(h.store.peek("main-board"), None);

        // a later successful write brings the controller back in sync
        h.store.set_availability(Availability::Online);
        assert!(h.ctl.rename_column("todo", "Backlog"));
        h.ctl.flush().await.unwrap();
        assert!(!h.ctl.process_next().await.unwrap());
        assert_eq!(h.ctl.state(), SyncState::Synced);
        assert_eq!(h.store.peek("main-board").as_ref(), Some(h.ctl.board()));
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let mut h = synced().await;
        h.ctl.unsubscribe();
        assert_eq!(h.store.subscriber_count("main-board"), 0);
    }

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.board_id, "main-board");
        assert_eq!(config.store_timeout, Duration::from_millis(1500));
        assert_eq!(config.terminal_column, "done");
        assert_eq!(config.tags.len(), 4);
    }
}
