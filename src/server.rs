//! A minimal game server: it accepts logins, sends the world around the spawn point and echoes
//!  chat messages. There is no world simulation.

use crate::protocol::game::{McpeDisconnect, McpeFullChunkData, McpeLogin, McpeMessage, McpePlayStatus, McpeSetSpawnPosition, McpeStartGame, MCPE_PROTOCOL_VERSION};
use crate::protocol::Packet;
use crate::transport::config::RakNetConfig;
use crate::transport::end_point::EndPoint;
use crate::transport::packet_handler::PacketHandler;
use crate::transport::reliability::Reliability;
use crate::transport::session::Session;
use crate::world::level_info::LevelInfo;
use crate::world::WorldProvider;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// chunk columns are sent for this many columns in each direction around the spawn column
pub const DEFAULT_VIEW_RADIUS: i32 = 1;

const FLAT_GENERATOR: i32 = 2;

pub struct ServerHandler<W: WorldProvider> {
    world: W,
    level_info: LevelInfo,
    view_radius: i32,
    next_entity_id: AtomicI32,
}

impl<W: WorldProvider> ServerHandler<W> {
    pub fn new(world: W, level_info: LevelInfo, view_radius: i32) -> ServerHandler<W> {
        ServerHandler {
            world,
            level_info,
            view_radius,
            next_entity_id: AtomicI32::new(1),
        }
    }

    /// Everything a client needs after logging in: the login result, the game settings, its
    ///  spawn position and the chunks around it, and the signal to spawn
    fn login_sequence(&self) -> Vec<Packet> {
        let spawn = self.world.spawn_point();
        let (spawn_x, spawn_y, spawn_z) = (spawn.x.floor() as i32, spawn.y.floor() as i32, spawn.z.floor() as i32);

        let mut result = vec![
            Packet::McpePlayStatus(McpePlayStatus { status: McpePlayStatus::LOGIN_SUCCESS }),
            Packet::McpeStartGame(McpeStartGame {
                seed: self.level_info.random_seed as i32,
                generator: FLAT_GENERATOR,
                gamemode: self.level_info.game_type,
                entity_id: self.next_entity_id.fetch_add(1, Ordering::Relaxed),
                spawn_x,
                spawn_y,
                spawn_z,
                x: spawn.x,
                y: spawn.y,
                z: spawn.z,
            }),
            Packet::McpeSetSpawnPosition(McpeSetSpawnPosition {
                x: spawn_x,
                z: spawn_z,
                y: spawn_y.clamp(0, u8::MAX as i32) as u8,
            }),
        ];

        let (chunk_x, chunk_z) = (spawn_x >> 4, spawn_z >> 4);
        for x in chunk_x - self.view_radius..=chunk_x + self.view_radius {
            for z in chunk_z - self.view_radius..=chunk_z + self.view_radius {
                match self.world.get_chunk(x, z) {
                    Ok(chunk) => result.push(Packet::McpeFullChunkData(McpeFullChunkData { chunk_data: chunk.to_bytes() })),
                    Err(e) => warn!("could not load chunk {}/{}: {}", x, z, e),
                }
            }
        }

        result.push(Packet::McpePlayStatus(McpePlayStatus { status: McpePlayStatus::PLAYER_SPAWN }));
        result
    }

    async fn on_login(&self, session: &Session, login: McpeLogin) {
        info!("login from {:?}: {} (client id {}, protocol {})", session.peer_addr(), login.username, login.client_id, login.protocol);

        if login.protocol != MCPE_PROTOCOL_VERSION {
            warn!("{:?} uses protocol {}, expected {} - rejecting", session.peer_addr(), login.protocol, MCPE_PROTOCOL_VERSION);
            let status = if login.protocol < MCPE_PROTOCOL_VERSION {
                McpePlayStatus::LOGIN_FAILED_CLIENT
            }
            else {
                McpePlayStatus::LOGIN_FAILED_SERVER
            };
            let rejection = [
                Packet::McpePlayStatus(McpePlayStatus { status }),
                Packet::McpeDisconnect(McpeDisconnect { message: "unsupported protocol version".to_string() }),
            ];
            if let Err(e) = session.send_packets(&rejection, Reliability::ReliableOrdered).await {
                debug!("could not send login rejection to {:?}: {}", session.peer_addr(), e);
            }
            return;
        }

        if let Err(e) = session.send_packets(&self.login_sequence(), Reliability::ReliableOrdered).await {
            warn!("could not send login sequence to {:?}: {}", session.peer_addr(), e);
        }
    }
}

#[async_trait]
impl<W: WorldProvider> PacketHandler for ServerHandler<W> {
    async fn on_connected(&self, session: Arc<Session>) {
        info!("{:?} connected", session.peer_addr());
    }

    async fn on_packet(&self, session: Arc<Session>, packet: Packet) {
        match packet {
            Packet::McpeLogin(login) => self.on_login(&session, login).await,
            Packet::McpeMessage(message) => {
                info!("<{}> {}", message.source, message.message);
                let echo = Packet::McpeMessage(McpeMessage { source: message.source, message: message.message });
                if let Err(e) = session.send_packet(&echo, Reliability::ReliableOrdered).await {
                    debug!("could not echo chat to {:?}: {}", session.peer_addr(), e);
                }
            }
            Packet::McpeMovePlayer(moved) => {
                trace!("{:?} moved to {}/{}/{}", session.peer_addr(), moved.x, moved.y, moved.z);
            }
            other => {
                debug!("ignoring packet {:#04x} from {:?}", other.id(), session.peer_addr());
            }
        }
    }

    async fn on_disconnected(&self, peer_addr: SocketAddr) {
        info!("{:?} disconnected", peer_addr);
    }
}

pub struct Server {
    end_point: Arc<EndPoint>,
    recv_loop_handle: JoinHandle<()>,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.recv_loop_handle.abort();
    }
}

impl Server {
    pub async fn start<W: WorldProvider>(config: RakNetConfig, world: W, level_info: LevelInfo) -> anyhow::Result<Server> {
        let handler = Arc::new(ServerHandler::new(world, level_info, DEFAULT_VIEW_RADIUS));
        let end_point = Arc::new(EndPoint::new_server(config, handler).await?);

        let ep = end_point.clone();
        let recv_loop_handle = tokio::spawn(async move { ep.recv_loop().await });

        info!("server listening on {:?}", end_point.local_addr());
        Ok(Server { end_point, recv_loop_handle })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.end_point.local_addr()
    }

    pub async fn num_sessions(&self) -> usize {
        self.end_point.num_sessions().await
    }

    pub async fn shutdown(&self) {
        self.end_point.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::datagram::IncomingDatagram;
    use crate::transport::receive_stream::ReceiveStream;
    use crate::transport::send_pipeline::test_support::RecordingSendSocket;
    use crate::transport::send_pipeline::SendPipeline;
    use crate::world::chunk_column::ChunkColumn;
    use crate::world::providers::FlatlandWorldProvider;
    use crate::client::Client;
    use crate::world::providers::CachingWorldProvider;
    use crate::world::{MockWorldProvider, SpawnPoint};
    use anyhow::anyhow;
    use std::time::Duration;
    use rstest::rstest;
    use tokio::time::Instant;

    fn login(protocol: i32) -> Packet {
        Packet::McpeLogin(McpeLogin {
            username: "Client12".to_string(),
            protocol,
            protocol2: protocol,
            client_id: 12345,
            login_data: "nothing".to_string(),
        })
    }

    fn session(socket: &Arc<RecordingSendSocket>) -> Arc<Session> {
        Arc::new(Session::new_server(
            Arc::new(RakNetConfig::default_server(SocketAddr::from(([127, 0, 0, 1], 19132)))),
            Arc::new(SendPipeline::new(Arc::new(socket.clone()))),
            SocketAddr::from(([127, 0, 0, 1], 51000)),
            1447,
        ))
    }

    /// plays the sent datagrams into a receive stream, as the client would
    fn received_packets(socket: &RecordingSendSocket) -> Vec<Packet> {
        let mut receive_stream = ReceiveStream::new(&RakNetConfig::default_client());
        let mut result = Vec::new();
        for (_, buf) in socket.take() {
            if let IncomingDatagram::Data(datagram) = IncomingDatagram::decode(&buf).unwrap() {
                for payload in receive_stream.on_datagram(datagram, Instant::now()).payloads {
                    result.push(Packet::decode(&payload).unwrap());
                }
            }
        }
        result
    }

    fn level_info() -> LevelInfo {
        LevelInfo {
            level_name: "flat".to_string(),
            random_seed: 99,
            game_type: 1,
            ..LevelInfo::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_sequence() {
        let socket = Arc::new(RecordingSendSocket::default());
        let handler = ServerHandler::new(FlatlandWorldProvider, level_info(), 1);

        handler.on_packet(session(&socket), login(MCPE_PROTOCOL_VERSION)).await;
        let packets = received_packets(&socket);

        assert_eq!(packets.len(), 3 + 9 + 1);
        assert_eq!(packets[0], Packet::McpePlayStatus(McpePlayStatus { status: McpePlayStatus::LOGIN_SUCCESS }));
        match &packets[1] {
            Packet::McpeStartGame(start) => {
                assert_eq!(start.seed, 99);
                assert_eq!(start.gamemode, 1);
                assert_eq!(start.entity_id, 1);
                assert_eq!((start.spawn_x, start.spawn_y, start.spawn_z), (8, 6, 8));
            }
            other => panic!("expected start game, got {:?}", other),
        }
        assert_eq!(packets[2], Packet::McpeSetSpawnPosition(McpeSetSpawnPosition { x: 8, z: 8, y: 6 }));

        let chunks = packets[3..12].iter()
            .map(|p| match p {
                Packet::McpeFullChunkData(data) => {
                    let chunk = ChunkColumn::from_bytes(&data.chunk_data).unwrap();
                    (chunk.x, chunk.z)
                }
                other => panic!("expected chunk, got {:?}", other),
            })
            .collect::<Vec<_>>();
        assert_eq!(chunks, vec![(-1, -1), (-1, 0), (-1, 1), (0, -1), (0, 0), (0, 1), (1, -1), (1, 0), (1, 1)]);

        assert_eq!(packets[12], Packet::McpePlayStatus(McpePlayStatus { status: McpePlayStatus::PLAYER_SPAWN }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entity_ids_are_unique() {
        let handler = ServerHandler::new(FlatlandWorldProvider, level_info(), 0);

        let mut entity_ids = Vec::new();
        for _ in 0..2 {
            let socket = Arc::new(RecordingSendSocket::default());
            handler.on_packet(session(&socket), login(MCPE_PROTOCOL_VERSION)).await;
            entity_ids.extend(received_packets(&socket).into_iter()
                .filter_map(|p| match p {
                    Packet::McpeStartGame(start) => Some(start.entity_id),
                    _ => None,
                }));
        }
        assert_eq!(entity_ids, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_chunks_are_skipped() {
        let mut world = MockWorldProvider::new();
        world.expect_spawn_point()
            .return_const(SpawnPoint { x: 0.0, y: 64.0, z: 0.0 });
        world.expect_get_chunk()
            .returning(|x, z| if x == 0 && z == 0 {
                Err(anyhow!("corrupt"))
            }
            else {
                Ok(ChunkColumn::new(x, z))
            });

        let socket = Arc::new(RecordingSendSocket::default());
        let handler = ServerHandler::new(world, level_info(), 1);
        handler.on_packet(session(&socket), login(MCPE_PROTOCOL_VERSION)).await;

        let num_chunks = received_packets(&socket).iter()
            .filter(|p| matches!(p, Packet::McpeFullChunkData(_)))
            .count();
        assert_eq!(num_chunks, 8);
    }

    #[rstest]
    #[case::outdated_client(MCPE_PROTOCOL_VERSION - 1, McpePlayStatus::LOGIN_FAILED_CLIENT)]
    #[case::outdated_server(MCPE_PROTOCOL_VERSION + 1, McpePlayStatus::LOGIN_FAILED_SERVER)]
    #[tokio::test(start_paused = true)]
    async fn test_login_with_wrong_protocol(#[case] protocol: i32, #[case] expected_status: i32) {
        let socket = Arc::new(RecordingSendSocket::default());
        let handler = ServerHandler::new(FlatlandWorldProvider, level_info(), 1);

        handler.on_packet(session(&socket), login(protocol)).await;
        let packets = received_packets(&socket);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0], Packet::McpePlayStatus(McpePlayStatus { status: expected_status }));
        assert!(matches!(&packets[1], Packet::McpeDisconnect(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_is_echoed() {
        let socket = Arc::new(RecordingSendSocket::default());
        let handler = ServerHandler::new(FlatlandWorldProvider, level_info(), 1);

        let chat = Packet::McpeMessage(McpeMessage { source: "Nicke".to_string(), message: "hello".to_string() });
        handler.on_packet(session(&socket), chat.clone()).await;
        assert_eq!(received_packets(&socket), vec![chat]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_client_joins_server_over_loopback() {
        let config = RakNetConfig::default_server(SocketAddr::from(([127, 0, 0, 1], 0)));
        let server = Server::start(config, CachingWorldProvider::new(FlatlandWorldProvider), level_info()).await.unwrap();

        let mut client_config = RakNetConfig::default_client();
        client_config.bind_addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let client = Client::connect(client_config, server.local_addr()).await.unwrap();

        let mut state = client.subscribe();
        // the chunks overflow the socket buffer in a single burst, so this includes a few resends
        tokio::time::timeout(Duration::from_secs(20), state.wait_for(|s| s.spawned && s.chunks.len() == 9)).await
            .unwrap()
            .unwrap();
        assert_eq!(client.state().entity_id, Some(1));
        assert_eq!(client.state().spawn, Some((8, 6, 8)));
        assert_eq!(client.state().level_info.random_seed, 99);

        client.send_chat("hello").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| !s.chat.is_empty())).await
            .unwrap()
            .unwrap();
        assert_eq!(client.state().chat, vec![("Nicke".to_string(), "hello".to_string())]);
        assert_eq!(server.num_sessions().await, 1);

        client.disconnect().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while server.num_sessions().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }).await.unwrap();

        server.shutdown().await;
    }
}
