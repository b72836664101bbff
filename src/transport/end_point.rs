use crate::protocol::Packet;
use crate::transport::config::RakNetConfig;
use crate::transport::datagram_header::DatagramHeader;
use crate::transport::handshake::{OfflineReply, OfflineResponder};
use crate::transport::packet_handler::PacketHandler;
use crate::transport::send_pipeline::SendPipeline;
use crate::transport::session::{Session, SessionEvent};
use anyhow::bail;
use rustc_hash::FxHashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};

/// UDP payloads are read into a buffer of this size. Anything bigger than the negotiated MTU is
///  rejected further down the line anyway.
const RECEIVE_BUFFER_SIZE: usize = 65_536;

enum Role {
    Client { server_addr: SocketAddr },
    Server { responder: OfflineResponder },
}

/// EndPoint is the place where all other parts of the protocol come together: It owns the
///  UdpSocket and the sessions, routes incoming traffic to the offline handshake or to the
///  session it belongs to, and passes application level packets on to the [PacketHandler].
///
/// A client end point has (at most) a single session with the server it connects to, a server
///  end point has a session per client, keyed by the client's address.
pub struct EndPoint {
    config: Arc<RakNetConfig>,
    role: Role,
    receive_socket: Arc<UdpSocket>,
    send_pipeline: Arc<SendPipeline>,
    sessions: RwLock<FxHashMap<SocketAddr, Arc<Session>>>,
    packet_handler: Arc<dyn PacketHandler>,
    closed_sender: mpsc::Sender<SocketAddr>,
    closed_receiver: Mutex<mpsc::Receiver<SocketAddr>>,
    shutdown: watch::Sender<bool>,
}

impl EndPoint {
    pub async fn new_server(config: RakNetConfig, packet_handler: Arc<dyn PacketHandler>) -> anyhow::Result<EndPoint> {
        let responder = OfflineResponder::new(&config, rand::random());
        info!("server guid is {}", responder.server_guid());
        Self::new(config, Role::Server { responder }, packet_handler).await
    }

    pub async fn new_client(config: RakNetConfig, server_addr: SocketAddr, packet_handler: Arc<dyn PacketHandler>) -> anyhow::Result<EndPoint> {
        Self::new(config, Role::Client { server_addr }, packet_handler).await
    }

    async fn new(config: RakNetConfig, role: Role, packet_handler: Arc<dyn PacketHandler>) -> anyhow::Result<EndPoint> {
        config.validate()?;

        let receive_socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        info!("bound socket to {:?}", receive_socket.local_addr()?);

        let (closed_sender, closed_receiver) = mpsc::channel(16);
        let (shutdown, _) = watch::channel(false);
        Ok(EndPoint {
            config: Arc::new(config),
            role,
            send_pipeline: Arc::new(SendPipeline::new(Arc::new(receive_socket.clone()))),
            receive_socket,
            sessions: Default::default(),
            packet_handler,
            closed_sender,
            closed_receiver: Mutex::new(closed_receiver),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.send_pipeline.local_addr()
    }

    pub async fn session(&self, peer_addr: SocketAddr) -> Option<Arc<Session>> {
        self.sessions.read().await
            .get(&peer_addr)
            .cloned()
    }

    pub async fn num_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Starts the handshake with the server. The session is returned right away, the
    ///  [PacketHandler] is notified when the connection is established.
    pub async fn connect(&self) -> anyhow::Result<Arc<Session>> {
        let server_addr = match &self.role {
            Role::Client { server_addr } => *server_addr,
            Role::Server { .. } => bail!("a server end point does not connect"),
        };
        if self.session(server_addr).await.is_some() {
            bail!("already connected or connecting to {:?}", server_addr);
        }

        info!("connecting to {:?}", server_addr);
        let session = Arc::new(Session::new_client(self.config.clone(), self.send_pipeline.clone(), server_addr, rand::random()));
        session.spawn_active_loop(self.closed_sender.clone());
        self.sessions.write().await
            .insert(server_addr, session.clone());

        session.start_handshake().await;
        Ok(session)
    }

    /// Stops the receive loop and closes all sessions
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.shutdown.send_replace(true);

        let sessions = self.sessions.write().await
            .drain()
            .collect::<Vec<_>>();
        for (peer_addr, session) in sessions {
            session.close().await;
            self.packet_handler.on_disconnected(peer_addr).await;
        }
    }

    /// The receive loop: it runs until [EndPoint::shutdown] is called, surviving malformed
    ///  input and socket errors
    pub async fn recv_loop(&self) {
        info!("starting receive loop");

        let mut shutdown = self.shutdown.subscribe();
        let mut closed_receiver = self.closed_receiver.lock().await;

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            select! {
                received = Self::receive(&self.receive_socket) => {
                    let (buf, from) = match received {
                        Ok(x) => x,
                        Err(e) => {
                            error!("socket error: {}", e);
                            continue;
                        }
                    };

                    let span = span!(Level::TRACE, "datagram_received", peer = ?from);
                    self.on_received(from, &buf).instrument(span).await;
                }
                Some(peer_addr) = closed_receiver.recv() => {
                    debug!("session with {:?} closed by its timer", peer_addr);
                    self.remove_session(peer_addr).await;
                }
                _ = shutdown.changed() => {}
            }
        }
        info!("receive loop stopped");
    }

    async fn receive(socket: &UdpSocket) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
        let (num_read, from) = socket.recv_from(&mut buf).await?;
        buf.truncate(num_read);
        Ok((buf, from))
    }

    async fn on_received(&self, from: SocketAddr, buf: &[u8]) {
        trace!("received {} bytes from {:?}", buf.len(), from);

        let first_byte = match buf.first() {
            Some(&b) => b,
            None => {
                debug!("empty UDP packet from {:?} - dropping", from);
                return;
            }
        };

        if DatagramHeader::is_datagram_flags(first_byte) {
            match self.session(from).await {
                Some(session) => {
                    let events = session.on_datagram(buf).await;
                    self.dispatch(&session, events).await;
                }
                None => debug!("datagram from {:?} without a session - dropping", from),
            }
            return;
        }

        let packet = match Packet::decode(buf) {
            Ok(p) => p,
            Err(e) => {
                warn!("dropping malformed offline message from {:?}: {}", from, e);
                return;
            }
        };
        if !packet.is_offline() {
            debug!("message {:#04x} from {:?} is not valid outside a datagram - dropping", packet.id(), from);
            return;
        }

        match &self.role {
            Role::Client { server_addr } => {
                if from != *server_addr {
                    debug!("offline message from {:?}, which is not the server - dropping", from);
                    return;
                }
                match self.session(from).await {
                    Some(session) => {
                        let events = session.on_offline_packet(packet).await;
                        self.dispatch(&session, events).await;
                    }
                    None => debug!("offline message from {:?} while not connecting - dropping", from),
                }
            }
            Role::Server { responder } => {
                match responder.on_packet(&packet, from) {
                    OfflineReply::Reply(reply) => {
                        self.send_offline(from, &reply).await;
                    }
                    OfflineReply::OpenSession { reply, mtu_size, client_guid } => {
                        self.open_session(from, mtu_size, client_guid).await;
                        self.send_offline(from, &reply).await;
                    }
                    OfflineReply::Ignore => {}
                }
            }
        }
    }

    async fn send_offline(&self, to: SocketAddr, packet: &Packet) {
        match packet.encode() {
            Ok(buf) => self.send_pipeline.do_send_packet(to, &buf).await,
            Err(e) => warn!("could not encode offline reply {:#04x} to {:?}: {}", packet.id(), to, e),
        }
    }

    async fn open_session(&self, client_addr: SocketAddr, mtu_size: u16, client_guid: u64) {
        info!("opening session with {:?} (guid {}, MTU {})", client_addr, client_guid, mtu_size);

        let session = Arc::new(Session::new_server(self.config.clone(), self.send_pipeline.clone(), client_addr, mtu_size));
        session.spawn_active_loop(self.closed_sender.clone());

        let previous = self.sessions.write().await
            .insert(client_addr, session);
        if let Some(previous) = previous {
            debug!("client {:?} reconnected, discarding previous session", client_addr);
            previous.close().await;
            self.packet_handler.on_disconnected(client_addr).await;
        }
    }

    async fn dispatch(&self, session: &Arc<Session>, events: Vec<SessionEvent>) {
        for event in events {
            match event {
                SessionEvent::Connected => self.packet_handler.on_connected(session.clone()).await,
                SessionEvent::Packet(packet) => self.packet_handler.on_packet(session.clone(), packet).await,
                SessionEvent::Closed => self.remove_session(session.peer_addr()).await,
            }
        }
    }

    async fn remove_session(&self, peer_addr: SocketAddr) {
        let removed = self.sessions.write().await
            .remove(&peer_addr);
        if let Some(session) = removed {
            session.close().await;
            self.packet_handler.on_disconnected(peer_addr).await;
        }
    }
}
