//! WebSocket relay server with room-based fan-out.
//!
//! Architecture:
//! ```text
//! Client A ──┐  TaskUpdate                  TaskUpdated  ┌──► Client B
//!             ├──────────► Room ("main-board") ──────────┤
//! Client C ──┘            BroadcastGroup                 └──► Client C
//! ```
//!
//! The relay is a latency shortcut, not a source of truth: it holds no
//! board state, persists nothing, and forwards each snapshot at most once
//! to every other member of the sender's room.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, RoomManager};
use crate::protocol::{MessageKind, PeerInfo, RelayMessage};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum peers per room
    pub max_peers_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3001".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub relayed_updates: u64,
    pub rejected_joins: u64,
    pub active_rooms: usize,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Room membership of one connection.
struct Membership {
    room: String,
    group: Arc<BroadcastGroup>,
    rx: broadcast::Receiver<Arc<Vec<u8>>>,
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let rooms = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            config,
            rooms,
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        log::info!("Relay listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Arc<RoomManager>,
        stats: Arc<RwLock<RelayStats>>,
        config: RelayConfig,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut peer_id: Option<Uuid> = None;
        let mut membership: Option<Membership> = None;

        let result: Result<(), BoxError> = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                let bytes: Vec<u8> = data.into();
                                let relay_msg = match RelayMessage::decode(&bytes) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        log::warn!("Failed to decode message from {addr}: {e}");
                                        continue;
                                    }
                                };
                                {
                                    let mut s = stats.write().await;
                                    s.total_messages += 1;
                                    s.total_bytes += bytes.len() as u64;
                                }
                                peer_id = Some(relay_msg.peer_id);

                                match relay_msg.kind {
                                    MessageKind::JoinRoom => {
                                        if let Some(old) = membership.take() {
                                            Self::leave(&rooms, old, relay_msg.peer_id).await;
                                        }
                                        let info = PeerInfo::with_id(relay_msg.peer_id, addr.to_string());
                                        let group = rooms.get_or_create(&relay_msg.room).await;
                                        match group.try_add_peer(info, config.max_peers_per_room).await {
                                            Some(rx) => {
                                                log::info!("Peer {} joined room {}", relay_msg.peer_id, relay_msg.room);
                                                membership = Some(Membership {
                                                    room: relay_msg.room.clone(),
                                                    group,
                                                    rx,
                                                });
                                            }
                                            None => {
                                                log::warn!(
                                                    "Room {} is full, rejecting peer {}",
                                                    relay_msg.room,
                                                    relay_msg.peer_id
                                                );
                                                stats.write().await.rejected_joins += 1;
                                                rooms.remove_if_empty(&relay_msg.room).await;
                                            }
                                        }
                                        stats.write().await.active_rooms = rooms.room_count().await;
                                    }

                                    MessageKind::TaskUpdate => {
                                        let Some(m) = &membership else {
                                            log::debug!("TaskUpdate from {addr} before joining a room, dropped");
                                            continue;
                                        };
                                        if relay_msg.room != m.room {
                                            log::debug!(
                                                "TaskUpdate for room {} from peer in {}, dropped",
                                                relay_msg.room,
                                                m.room
                                            );
                                            continue;
                                        }
                                        let relayed = RelayMessage::task_updated(&relay_msg);
                                        let receivers = m.group.broadcast(&relayed)?;
                                        stats.write().await.relayed_updates += 1;
                                        log::debug!(
                                            "Relayed board from {} to {} receivers in {}",
                                            relay_msg.peer_id,
                                            receivers.saturating_sub(1),
                                            m.room
                                        );
                                    }

                                    MessageKind::Ping => {
                                        let pong = RelayMessage::pong(relay_msg.peer_id);
                                        ws_sender.send(Message::Binary(pong.encode()?.into())).await?;
                                    }

                                    other => {
                                        log::debug!("Unhandled message kind from {addr}: {other:?}");
                                    }
                                }
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    frame = async {
                        match membership.as_mut() {
                            Some(m) => m.rx.recv().await,
                            // Not in a room yet — wait forever
                            None => std::future::pending().await,
                        }
                    } => {
                        match frame {
                            Ok(data) => {
                                // Don't echo back to sender
                                if let Ok(msg) = RelayMessage::decode(&data) {
                                    if Some(msg.peer_id) == peer_id {
                                        continue;
                                    }
                                }
                                ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log::warn!("Peer {peer_id:?} lagged by {n} snapshots");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        if let (Some(pid), Some(m)) = (peer_id, membership.take()) {
            Self::leave(&rooms, m, pid).await;
        }
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_rooms = rooms.room_count().await;
        }

        result
    }

    async fn leave(rooms: &RoomManager, membership: Membership, peer_id: Uuid) {
        membership.group.remove_peer(&peer_id).await;
        drop(membership.rx);
        if rooms.remove_if_empty(&membership.room).await {
            log::info!("Room {} removed (empty)", membership.room);
        }
    }

    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }
}
