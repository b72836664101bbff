//! A minimal game client: it connects, logs in, keeps track of what the server tells it about
//!  the world and its own player, and can chat.

use crate::protocol::game::{McpeMessage, McpeMovePlayer, McpePlayStatus};
use crate::protocol::Packet;
use crate::transport::config::RakNetConfig;
use crate::transport::end_point::EndPoint;
use crate::transport::packet_handler::PacketHandler;
use crate::transport::reliability::Reliability;
use crate::transport::session::Session;
use crate::world::chunk_column::ChunkColumn;
use crate::world::level_info::LevelInfo;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_CHAT_SOURCE: &str = "Nicke";

/// the level version a client assumes for the server's world
const LEVEL_VERSION: i32 = 19133;

/// Everything the client learned from the server so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientState {
    pub connected: bool,
    pub disconnected: bool,
    pub logged_in: bool,
    pub spawned: bool,
    pub entity_id: Option<i32>,
    pub spawn: Option<(i32, i32, i32)>,
    pub level_info: LevelInfo,
    /// coordinates of all chunk columns received, in order of arrival
    pub chunks: Vec<(i32, i32)>,
    /// (source, message)
    pub chat: Vec<(String, String)>,
}

pub struct ClientHandler {
    state: watch::Sender<ClientState>,
}

impl Default for ClientHandler {
    fn default() -> Self {
        ClientHandler {
            state: watch::channel(ClientState::default()).0,
        }
    }
}

impl ClientHandler {
    pub fn state(&self) -> ClientState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// updates the state from a packet, returning the packets to send in response
    fn handle(&self, packet: Packet) -> Vec<Packet> {
        let mut replies = Vec::new();

        self.state.send_modify(|state| match packet {
            Packet::McpePlayStatus(status) => {
                match status.status {
                    McpePlayStatus::LOGIN_SUCCESS => {
                        info!("logged in");
                        state.logged_in = true;
                    }
                    McpePlayStatus::PLAYER_SPAWN => {
                        info!("spawned");
                        state.spawned = true;
                    }
                    other => warn!("login failed with status {}", other),
                }
            }
            Packet::McpeStartGame(start) => {
                info!("starting game: entity id {}, game type {}, spawn at {}/{}/{}", start.entity_id, start.gamemode, start.spawn_x, start.spawn_y, start.spawn_z);
                state.entity_id = Some(start.entity_id);
                state.spawn = Some((start.spawn_x, start.spawn_y, start.spawn_z));
                state.level_info = LevelInfo {
                    level_name: "Default".to_string(),
                    version: LEVEL_VERSION,
                    game_type: start.gamemode,
                    random_seed: start.seed as i64,
                    spawn_x: start.spawn_x,
                    spawn_y: start.spawn_y,
                    spawn_z: start.spawn_z,
                    ..LevelInfo::default()
                };
            }
            Packet::McpeSetSpawnPosition(spawn) => {
                debug!("spawn position is {}/{}/{}", spawn.x, spawn.y, spawn.z);
                state.spawn = Some((spawn.x, spawn.y as i32, spawn.z));
                state.level_info.spawn_x = spawn.x;
                state.level_info.spawn_y = spawn.y as i32;
                state.level_info.spawn_z = spawn.z;
            }
            Packet::McpeFullChunkData(data) => {
                match ChunkColumn::from_bytes(&data.chunk_data) {
                    Ok(chunk) => {
                        info!("received chunk {}/{}", chunk.x, chunk.z);
                        state.chunks.push((chunk.x, chunk.z));
                    }
                    Err(e) => warn!("dropping malformed chunk data: {}", e),
                }
            }
            Packet::McpeMovePlayer(moved) => {
                trace!("entity {} moved to {}/{}/{}", moved.entity_id, moved.x, moved.y, moved.z);
                replies.push(Packet::McpeMovePlayer(McpeMovePlayer {
                    entity_id: state.entity_id.unwrap_or(moved.entity_id),
                    x: moved.x,
                    y: moved.y + 10.0,
                    z: moved.z,
                    yaw: 91.0,
                    pitch: 28.0,
                    body_yaw: 91.0,
                }));
            }
            Packet::McpeMessage(message) => {
                info!("<{}> {}", message.source, message.message);
                state.chat.push((message.source, message.message));
            }
            Packet::McpeDisconnect(disconnect) => {
                info!("server disconnected: {}", disconnect.message);
            }
            Packet::McpeTileEvent(event) => {
                debug!("tile event at {}/{}/{}: {} {}", event.x, event.y, event.z, event.case1, event.case2);
            }
            Packet::McpeAddEntity(entity) => {
                debug!("entity {} of type {} added at {}/{}/{}", entity.entity_id, entity.entity_type, entity.x, entity.y, entity.z);
            }
            Packet::McpeSetEntityData(data) => {
                debug!("{} bytes of metadata for entity {}", data.metadata.len(), data.entity_id);
            }
            other => {
                debug!("ignoring packet {:#04x}", other.id());
            }
        });
        replies
    }
}

#[async_trait]
impl PacketHandler for ClientHandler {
    async fn on_connected(&self, session: Arc<Session>) {
        info!("connected to {:?}", session.peer_addr());
        self.state.send_modify(|s| s.connected = true);
    }

    async fn on_packet(&self, session: Arc<Session>, packet: Packet) {
        let replies = self.handle(packet);
        if !replies.is_empty() {
            if let Err(e) = session.send_packets(&replies, Reliability::ReliableOrdered).await {
                warn!("could not reply to {:?}: {}", session.peer_addr(), e);
            }
        }
    }

    async fn on_disconnected(&self, peer_addr: SocketAddr) {
        info!("disconnected from {:?}", peer_addr);
        self.state.send_modify(|s| s.disconnected = true);
    }
}

pub struct Client {
    server_addr: SocketAddr,
    end_point: Arc<EndPoint>,
    handler: Arc<ClientHandler>,
    chat_source: String,
    recv_loop_handle: JoinHandle<()>,
}

impl Drop for Client {
    fn drop(&mut self) {
        self.recv_loop_handle.abort();
    }
}

impl Client {
    /// Connects to a server, returning once the connection is established. This fails if the
    ///  server does not complete the handshake within the session timeout.
    pub async fn connect(config: RakNetConfig, server_addr: SocketAddr) -> anyhow::Result<Client> {
        let connect_timeout = config.session_timeout;
        let handler = Arc::new(ClientHandler::default());
        let end_point = Arc::new(EndPoint::new_client(config, server_addr, handler.clone()).await?);

        let ep = end_point.clone();
        let recv_loop_handle = tokio::spawn(async move { ep.recv_loop().await });

        let client = Client {
            server_addr,
            end_point,
            handler,
            chat_source: DEFAULT_CHAT_SOURCE.to_string(),
            recv_loop_handle,
        };

        let mut state = client.handler.subscribe();
        client.end_point.connect().await?;

        let connected = timeout(connect_timeout, state.wait_for(|s| s.connected || s.disconnected)).await
            .map_err(|_| anyhow!("connecting to {:?} timed out", server_addr))?
            .map(|s| s.connected)?;
        if !connected {
            bail!("handshake with {:?} failed", server_addr);
        }
        Ok(client)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.end_point.local_addr()
    }

    pub fn state(&self) -> ClientState {
        self.handler.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.handler.subscribe()
    }

    pub fn set_chat_source(&mut self, chat_source: impl Into<String>) {
        self.chat_source = chat_source.into();
    }

    pub async fn send_chat(&self, message: &str) -> anyhow::Result<()> {
        let session = match self.end_point.session(self.server_addr).await {
            Some(s) => s,
            None => bail!("not connected to {:?}", self.server_addr),
        };
        let packet = Packet::McpeMessage(McpeMessage { source: self.chat_source.clone(), message: message.to_string() });
        session.send_packet(&packet, Reliability::ReliableOrdered).await?;
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.end_point.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::game::{McpeFullChunkData, McpeSetSpawnPosition, McpeStartGame, McpeTileEvent};
    use bytes::Bytes;
    use rstest::rstest;

    fn start_game() -> Packet {
        Packet::McpeStartGame(McpeStartGame {
            seed: 1234,
            generator: 1,
            gamemode: 1,
            entity_id: 77,
            spawn_x: 8,
            spawn_y: 6,
            spawn_z: -8,
            x: 8.0,
            y: 6.0,
            z: -8.0,
        })
    }

    fn move_player(entity_id: i32) -> Packet {
        Packet::McpeMovePlayer(McpeMovePlayer { entity_id, x: 1.0, y: 64.0, z: 2.0, yaw: 0.0, pitch: 0.0, body_yaw: 0.0 })
    }

    #[test]
    fn test_start_game() {
        let handler = ClientHandler::default();
        assert!(handler.handle(start_game()).is_empty());

        let state = handler.state();
        assert_eq!(state.entity_id, Some(77));
        assert_eq!(state.spawn, Some((8, 6, -8)));
        assert_eq!(state.level_info.level_name, "Default");
        assert_eq!(state.level_info.version, 19133);
        assert_eq!(state.level_info.game_type, 1);
        assert_eq!(state.level_info.random_seed, 1234);
    }

    #[test]
    fn test_set_spawn_position() {
        let handler = ClientHandler::default();
        handler.handle(start_game());
        handler.handle(Packet::McpeSetSpawnPosition(McpeSetSpawnPosition { x: 100, z: 200, y: 70 }));

        let state = handler.state();
        assert_eq!(state.spawn, Some((100, 70, 200)));
        assert_eq!((state.level_info.spawn_x, state.level_info.spawn_y, state.level_info.spawn_z), (100, 70, 200));
    }

    #[rstest]
    #[case::before_start_game(false, 5)]
    #[case::after_start_game(true, 77)]
    fn test_move_player_is_answered(#[case] started: bool, #[case] expected_entity_id: i32) {
        let handler = ClientHandler::default();
        if started {
            handler.handle(start_game());
        }

        assert_eq!(handler.handle(move_player(5)), vec![Packet::McpeMovePlayer(McpeMovePlayer {
            entity_id: expected_entity_id,
            x: 1.0,
            y: 74.0,
            z: 2.0,
            yaw: 91.0,
            pitch: 28.0,
            body_yaw: 91.0,
        })]);
    }

    #[test]
    fn test_chunks() {
        let handler = ClientHandler::default();
        handler.handle(Packet::McpeFullChunkData(McpeFullChunkData { chunk_data: ChunkColumn::new(3, -4).to_bytes() }));
        handler.handle(Packet::McpeFullChunkData(McpeFullChunkData { chunk_data: Bytes::from_static(b"garbage") }));
        handler.handle(Packet::McpeFullChunkData(McpeFullChunkData { chunk_data: ChunkColumn::new(0, 0).to_bytes() }));

        assert_eq!(handler.state().chunks, vec![(3, -4), (0, 0)]);
    }

    #[rstest]
    #[case::login_success(McpePlayStatus::LOGIN_SUCCESS, true, false)]
    #[case::spawn(McpePlayStatus::PLAYER_SPAWN, false, true)]
    #[case::failed(McpePlayStatus::LOGIN_FAILED_CLIENT, false, false)]
    fn test_play_status(#[case] status: i32, #[case] logged_in: bool, #[case] spawned: bool) {
        let handler = ClientHandler::default();
        handler.handle(Packet::McpePlayStatus(McpePlayStatus { status }));
        let state = handler.state();
        assert_eq!((state.logged_in, state.spawned), (logged_in, spawned));
    }

    #[test]
    fn test_chat_and_ignored_packets() {
        let handler = ClientHandler::default();
        let mut state = handler.subscribe();

        assert!(handler.handle(Packet::McpeMessage(McpeMessage { source: "server".to_string(), message: "hi".to_string() })).is_empty());
        assert!(handler.handle(Packet::McpeTileEvent(McpeTileEvent { x: 1, y: 2, z: 3, case1: 0, case2: 1 })).is_empty());
        assert!(handler.handle(Packet::Unknown { id: 0xfe, payload: Bytes::new() }).is_empty());

        assert!(state.has_changed().unwrap());
        assert_eq!(state.borrow_and_update().chat, vec![("server".to_string(), "hi".to_string())]);
    }
}
