//! Relay channel: WebSocket client for the relay server.
//!
//! Provides:
//! - Connection lifecycle (connect, join room, disconnect detection)
//! - Non-blocking publish of full board snapshots
//! - Forwarding of peers' snapshots into the controller's inbound queue
//!
//! Delivery is best-effort and at-most-once. A snapshot published while
//! the socket is down is dropped; the durable store converges clients
//! anyway.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use taskboard_core::Board;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{MessageKind, PeerInfo, ProtocolError, RelayMessage};
use crate::sync::{Inbound, InboundSender};

/// Outgoing frames buffered between `publish` and the socket writer.
const OUTGOING_CAPACITY: usize = 256;

/// Broadcast link to the other sessions of the same room.
///
/// `publish` must return immediately; it never waits on the network.
pub trait RelayChannel: Send + Sync {
    fn publish(&self, board: &Board) -> Result<(), ProtocolError>;
}

/// A relay that reaches zero peers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

impl RelayChannel for Detached {
    fn publish(&self, _board: &Board) -> Result<(), ProtocolError> {
        log::trace!("Detached relay: snapshot not sent");
        Ok(())
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// WebSocket relay client for one room.
pub struct RelayClient {
    peer_info: PeerInfo,
    room: String,
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: mpsc::Sender<Vec<u8>>,
}

impl RelayClient {
    /// Connect to `server_url`, join `room`, and start forwarding peers'
    /// snapshots to `inbound`.
    ///
    /// Spawns one writer task and one reader task.
    pub async fn connect(
        peer_info: PeerInfo,
        room: impl Into<String>,
        server_url: impl Into<String>,
        inbound: InboundSender,
    ) -> Result<Self, ProtocolError> {
        let room = room.into();
        let server_url = server_url.into();
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));

        let (ws_stream, _) = tokio_tungstenite::connect_async(&server_url)
            .await
            .map_err(|e| {
                log::warn!("Relay connect to {server_url} failed: {e}");
                ProtocolError::ConnectionClosed
            })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let join = RelayMessage::join_room(peer_info.peer_id, room.clone()).encode()?;
        ws_writer
            .send(Message::Binary(join.into()))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        // Writer task: forward outgoing channel to WebSocket
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Vec<u8>>(OUTGOING_CAPACITY);
        tokio::spawn(async move {
            while let Some(data) = outgoing_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        *state.write().await = ConnectionState::Connected;
        log::info!("Joined relay room {room} at {server_url} as {}", peer_info.name);

        // Reader task: feed peers' snapshots into the inbound queue
        let reader_state = state.clone();
        let own_id = peer_info.peer_id;
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        let relay_msg = match RelayMessage::decode(&bytes) {
                            Ok(m) => m,
                            Err(e) => {
                                log::warn!("Dropping undecodable relay frame: {e}");
                                continue;
                            }
                        };
                        // Skip our own messages
                        if relay_msg.peer_id == own_id {
                            continue;
                        }
                        match relay_msg.kind {
                            MessageKind::TaskUpdated => match relay_msg.board() {
                                Ok(board) => {
                                    if inbound.send(Inbound::Relay(board)).is_err() {
                                        log::debug!("Inbound queue closed, stopping relay reader");
                                        break;
                                    }
                                }
                                Err(e) => {
                                    log::warn!("Dropping relayed board from {}: {e}", relay_msg.peer_id);
                                }
                            },
                            MessageKind::Pong => log::trace!("Relay pong"),
                            other => log::debug!("Ignoring relay message {other:?}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *reader_state.write().await = ConnectionState::Disconnected;
            log::info!("Relay connection lost");
        });

        Ok(Self {
            peer_info,
            room,
            server_url,
            state,
            outgoing_tx,
        })
    }

    /// Queue a heartbeat ping.
    pub fn ping(&self) -> Result<(), ProtocolError> {
        let encoded = RelayMessage::ping(self.peer_info.peer_id).encode()?;
        self.outgoing_tx
            .try_send(encoded)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn peer_info(&self) -> &PeerInfo {
        &self.peer_info
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

impl RelayChannel for RelayClient {
    fn publish(&self, board: &Board) -> Result<(), ProtocolError> {
        let msg = RelayMessage::task_update(self.peer_info.peer_id, self.room.clone(), board)?;
        let encoded = msg.encode()?;
        self.outgoing_tx.try_send(encoded).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProtocolError::Timeout,
            mpsc::error::TrySendError::Closed(_) => ProtocolError::ConnectionClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_publish_is_ok() {
        assert!(Detached.publish(&Board::seed()).is_ok());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = RelayClient::connect(
            PeerInfo::new("Alice"),
            "main-board",
            format!("ws://127.0.0.1:{port}"),
            tx,
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[test]
    fn test_connection_state_values() {
        assert_ne!(ConnectionState::Disconnected, ConnectionState::Connected);
        assert_ne!(ConnectionState::Connecting, ConnectionState::Connected);
    }
}
