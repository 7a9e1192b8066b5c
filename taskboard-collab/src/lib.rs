//! # taskboard-collab — Board replication for the collaborative task board
//!
//! Keeps every client's board converging on the same document. The durable
//! store is the source of truth; the relay is a latency shortcut in front of
//! it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   TaskUpdate    ┌─────────────┐   TaskUpdated   ┌─────────────────┐
//! │ BoardController │ ──────────────► │ RelayServer │ ──────────────► │ BoardController │
//! │ (client A)      │   WebSocket     │ (rooms)     │                 │ (client B)      │
//! └────────┬────────┘                 └─────────────┘                 └────────┬────────┘
//!          │ write / subscribe                                                 │
//!          ▼                                                                   ▼
//!   ┌─────────────────────────────────────────────────────────────────────────────┐
//!   │ BoardStore (one document per board, last write wins)                        │
//!   └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary relay envelope (bincode) carrying JSON boards
//! - [`broadcast`] — Room-based fan-out
//! - [`server`] — WebSocket relay server
//! - [`client`] — Relay channel: WebSocket relay client
//! - [`storage`] — Board stores (RocksDB, in-memory) and the local cache
//! - [`sync`] — Board controller: intents, replication, startup fallback

pub mod broadcast;
pub mod client;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod sync;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager};
pub use client::{ConnectionState, Detached, RelayChannel, RelayClient};
pub use protocol::{MessageKind, PeerInfo, ProtocolError, RelayMessage};
pub use server::{RelayConfig, RelayServer, RelayStats};
pub use storage::{
    Availability, BoardMetadata, BoardStore, FileCache, LocalCache, MemoryBoardStore,
    MemoryCache, RocksBoardStore, StoreConfig, StoreError, StoreEvent, Subscription,
};
pub use sync::{
    BoardController, BoardEvent, Inbound, InboundSender, ReplaceSource, SyncConfig, SyncError,
    SyncState,
};
