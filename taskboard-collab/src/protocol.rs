//! Binary relay protocol.
//!
//! Wire format (bincode-encoded envelope):
//! ```text
//! ┌──────────┬───────────┬──────────────┬──────────────────────┐
//! │ kind     │ peer_id   │ room         │ payload              │
//! │ 1 byte   │ 16 bytes  │ len + utf-8  │ len + JSON Board     │
//! └──────────┴───────────┴──────────────┴──────────────────────┘
//! ```
//!
//! The payload of `TaskUpdate` / `TaskUpdated` is the full board document
//! in its JSON shape, so the relay forwards it untouched. There are no
//! acknowledgements and no sequence numbers.

use serde::{Deserialize, Serialize};
use taskboard_core::Board;
use uuid::Uuid;

/// Message kinds for the relay protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// Join a broadcast group (client → server)
    JoinRoom = 1,
    /// Full board snapshot to fan out (client → server)
    TaskUpdate = 2,
    /// Full board snapshot from another peer (server → client)
    TaskUpdated = 3,
    /// Heartbeat ping
    Ping = 4,
    /// Heartbeat pong
    Pong = 5,
}

/// Peer identity, opaque to the relay beyond logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerInfo {
    pub peer_id: Uuid,
    pub name: String,
}

impl PeerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Create with explicit peer_id (for testing)
    pub fn with_id(peer_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            peer_id,
            name: name.into(),
        }
    }
}

/// Top-level relay message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayMessage {
    pub kind: MessageKind,
    pub peer_id: Uuid,
    /// Logical room; empty for heartbeats
    pub room: String,
    pub payload: Vec<u8>,
}

impl RelayMessage {
    /// Create a join request for `room`.
    pub fn join_room(peer_id: Uuid, room: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::JoinRoom,
            peer_id,
            room: room.into(),
            payload: Vec::new(),
        }
    }

    /// Create an outbound board snapshot.
    pub fn task_update(
        peer_id: Uuid,
        room: impl Into<String>,
        board: &Board,
    ) -> Result<Self, ProtocolError> {
        let payload = board
            .to_json()
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::TaskUpdate,
            peer_id,
            room: room.into(),
            payload,
        })
    }

    /// Re-stamp an inbound `TaskUpdate` for delivery to the other peers.
    ///
    /// The originating peer id is kept so receivers can ignore echoes.
    pub fn task_updated(update: &RelayMessage) -> Self {
        Self {
            kind: MessageKind::TaskUpdated,
            peer_id: update.peer_id,
            room: update.room.clone(),
            payload: update.payload.clone(),
        }
    }

    /// Create a ping message.
    pub fn ping(peer_id: Uuid) -> Self {
        Self {
            kind: MessageKind::Ping,
            peer_id,
            room: String::new(),
            payload: Vec::new(),
        }
    }

    /// Create a pong message.
    pub fn pong(peer_id: Uuid) -> Self {
        Self {
            kind: MessageKind::Pong,
            peer_id,
            room: String::new(),
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Parse and validate the board carried by an update.
    pub fn board(&self) -> Result<Board, ProtocolError> {
        if !matches!(self.kind, MessageKind::TaskUpdate | MessageKind::TaskUpdated) {
            return Err(ProtocolError::InvalidMessageType);
        }
        Board::from_json(&self.payload).map_err(|e| ProtocolError::InvalidBoard(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    InvalidBoard(String),
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::InvalidBoard(e) => write!(f, "Invalid board payload: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_update_carries_board() {
        let peer = Uuid::new_v4();
        let board = Board::seed();

        let msg = RelayMessage::task_update(peer, "main-board", &board).unwrap();
        let decoded = RelayMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.kind, MessageKind::TaskUpdate);
        assert_eq!(decoded.peer_id, peer);
        assert_eq!(decoded.room, "main-board");
        assert_eq!(decoded.board().unwrap(), board);
    }

    #[test]
    fn test_task_updated_keeps_origin() {
        let peer = Uuid::new_v4();
        let update = RelayMessage::task_update(peer, "r", &Board::seed()).unwrap();
        let relayed = RelayMessage::task_updated(&update);

        assert_eq!(relayed.kind, MessageKind::TaskUpdated);
        assert_eq!(relayed.peer_id, peer);
        assert_eq!(relayed.room, "r");
        assert_eq!(relayed.payload, update.payload);
    }

    #[test]
    fn test_join_room_roundtrip() {
        let peer = Uuid::new_v4();
        let msg = RelayMessage::join_room(peer, "room-7");
        let decoded = RelayMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_board_on_wrong_kind() {
        let msg = RelayMessage::ping(Uuid::new_v4());
        assert!(matches!(msg.board(), Err(ProtocolError::InvalidMessageType)));
    }

    #[test]
    fn test_board_rejects_broken_invariants() {
        let mut msg = RelayMessage::task_update(Uuid::new_v4(), "r", &Board::seed()).unwrap();
        msg.payload = br#"{"tasks":{},"columns":{},"columnOrder":["ghost"]}"#.to_vec();
        assert!(matches!(msg.board(), Err(ProtocolError::InvalidBoard(_))));
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(RelayMessage::decode(&garbage).is_err());
    }

    #[test]
    fn test_message_kind_values() {
        assert_eq!(MessageKind::JoinRoom as u8, 1);
        assert_eq!(MessageKind::TaskUpdate as u8, 2);
        assert_eq!(MessageKind::TaskUpdated as u8, 3);
        assert_eq!(MessageKind::Ping as u8, 4);
        assert_eq!(MessageKind::Pong as u8, 5);
    }

    #[test]
    fn test_peer_info_with_id() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let info = PeerInfo::with_id(id, "Test");
        assert_eq!(info.peer_id, id);
        assert_eq!(info.name, "Test");
    }
}
