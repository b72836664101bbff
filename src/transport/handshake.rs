//! The connection handshake, as pure state machines: they consume packets and return the
//!  actions the session has to perform, without doing any I/O themselves.
//!
//! ```ascii
//! client                                        server
//!   | -- UnconnectedPing ------------------------> |
//!   | <------------------------ UnconnectedPong -- |
//!   | -- OpenConnectionRequest1 (padded to MTU) -> |
//!   | <------------------- OpenConnectionReply1 -- |
//!   | -- OpenConnectionRequest2 -----------------> |     session is created here
//!   | <------------------- OpenConnectionReply2 -- |
//!   | == ConnectionRequest =====================> |     '==' means framed in datagrams
//!   | <================ ConnectionRequestAccepted == |
//!   | == NewIncomingConnection =================> |
//!   | == McpeLogin =============================> |
//! ```

use crate::protocol::connected::{default_system_addresses, ConnectionRequest, ConnectionRequestAccepted, NewIncomingConnection};
use crate::protocol::game::McpeLogin;
use crate::protocol::unconnected::{OpenConnectionReply1, OpenConnectionReply2, OpenConnectionRequest1, OpenConnectionRequest2, UnconnectedPing, UnconnectedPong};
use crate::protocol::Packet;
use crate::transport::config::{LoginConfig, RakNetConfig};
use crate::transport::reliability::Reliability;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionState {
    Idle,
    PingSent,
    Open1Sent,
    Open2Sent,
    ConnectionRequestSent,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ServerHandshakeState {
    AwaitingConnectionRequest,
    AwaitingNewIncomingConnection,
    Connected,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeAction {
    /// send without datagram framing
    SendOffline(Packet),
    /// send through the session's send stream
    SendFramed(Packet, Reliability),
    SetMtu(u16),
    StartKeepAlive,
    Connected,
}

pub struct ClientHandshake {
    state: ConnectionState,
    server_addr: SocketAddr,
    client_guid: u64,
    protocol_version: u8,
    mtu_size: u16,
    max_mtu_size: u16,
    login: LoginConfig,
}

impl ClientHandshake {
    pub fn new(config: &RakNetConfig, server_addr: SocketAddr, client_guid: u64) -> ClientHandshake {
        ClientHandshake {
            state: ConnectionState::Idle,
            server_addr,
            client_guid,
            protocol_version: config.raknet_protocol_version,
            mtu_size: config.mtu_size,
            max_mtu_size: config.max_mtu_size,
            login: config.login.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn mtu_size(&self) -> u16 {
        self.mtu_size
    }

    pub fn start(&mut self, ping_id: u64) -> Vec<HandshakeAction> {
        if self.state != ConnectionState::Idle {
            warn!("handshake with {:?} already started, state is {:?}", self.server_addr, self.state);
            return vec![];
        }
        self.state = ConnectionState::PingSent;
        vec![HandshakeAction::SendOffline(Packet::UnconnectedPing(UnconnectedPing { ping_id }))]
    }

    /// `time` is the local timestamp (millis) that goes into time fields of outgoing messages
    pub fn on_packet(&mut self, packet: &Packet, time: u64) -> Vec<HandshakeAction> {
        match (self.state, packet) {
            (ConnectionState::PingSent, Packet::UnconnectedPong(pong)) => {
                debug!("server {:?} is '{}'", self.server_addr, pong.server_name);
                self.state = ConnectionState::Open1Sent;
                vec![HandshakeAction::SendOffline(Packet::OpenConnectionRequest1(OpenConnectionRequest1 {
                    protocol_version: self.protocol_version,
                    mtu_size: self.mtu_size,
                }))]
            }
            (ConnectionState::Open1Sent, Packet::OpenConnectionReply1(reply)) => {
                self.mtu_size = self.clamp_mtu(reply.mtu_size.min(self.mtu_size));
                self.state = ConnectionState::Open2Sent;
                vec![HandshakeAction::SendOffline(Packet::OpenConnectionRequest2(OpenConnectionRequest2 {
                    server_address: self.server_addr,
                    mtu_size: self.mtu_size,
                    client_guid: self.client_guid,
                }))]
            }
            (ConnectionState::Open2Sent, Packet::OpenConnectionReply2(reply)) => {
                self.mtu_size = self.clamp_mtu(reply.mtu_size);
                self.state = ConnectionState::ConnectionRequestSent;
                vec![
                    HandshakeAction::SetMtu(self.mtu_size),
                    HandshakeAction::SendFramed(Packet::ConnectionRequest(ConnectionRequest {
                        client_guid: self.client_guid,
                        request_time: time,
                        use_security: false,
                    }), Reliability::Reliable),
                ]
            }
            (ConnectionState::ConnectionRequestSent, Packet::ConnectionRequestAccepted(accepted)) => {
                info!("connection to {:?} accepted, MTU is {}", self.server_addr, self.mtu_size);
                self.state = ConnectionState::Connected;
                vec![
                    HandshakeAction::SendFramed(Packet::NewIncomingConnection(NewIncomingConnection {
                        server_address: self.server_addr,
                        system_addresses: default_system_addresses(),
                        request_time: accepted.accepted_time,
                        accepted_time: time,
                    }), Reliability::Reliable),
                    HandshakeAction::StartKeepAlive,
                    HandshakeAction::SendFramed(Packet::McpeLogin(McpeLogin {
                        username: self.login.username.clone(),
                        protocol: self.login.protocol,
                        protocol2: self.login.protocol,
                        client_id: self.login.client_id,
                        login_data: self.login.login_data.clone(),
                    }), Reliability::ReliableOrdered),
                    HandshakeAction::Connected,
                ]
            }
            (state, packet) => {
                debug!("ignoring packet {:#04x} from {:?} in handshake state {:?}", packet.id(), self.server_addr, state);
                vec![]
            }
        }
    }

    fn clamp_mtu(&self, mtu_size: u16) -> u16 {
        mtu_size.clamp(RakNetConfig::MIN_MTU_SIZE, self.max_mtu_size)
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

/// The part of the server's handshake that happens inside a session, i.e. after the client's
///  second open connection request
pub struct ServerHandshake {
    state: ServerHandshakeState,
    client_addr: SocketAddr,
}

impl ServerHandshake {
    pub fn new(client_addr: SocketAddr) -> ServerHandshake {
        ServerHandshake {
            state: ServerHandshakeState::AwaitingConnectionRequest,
            client_addr,
        }
    }

    pub fn state(&self) -> ServerHandshakeState {
        self.state
    }

    pub fn on_packet(&mut self, packet: &Packet, time: u64) -> Vec<HandshakeAction> {
        match (self.state, packet) {
            (ServerHandshakeState::AwaitingConnectionRequest, Packet::ConnectionRequest(request)) => {
                debug!("connection request from {:?} (guid {})", self.client_addr, request.client_guid);
                self.state = ServerHandshakeState::AwaitingNewIncomingConnection;
                vec![HandshakeAction::SendFramed(Packet::ConnectionRequestAccepted(ConnectionRequestAccepted {
                    client_address: self.client_addr,
                    system_index: 0,
                    system_addresses: default_system_addresses(),
                    request_time: request.request_time,
                    accepted_time: time,
                }), Reliability::Reliable)]
            }
            (ServerHandshakeState::AwaitingNewIncomingConnection, Packet::NewIncomingConnection(_)) => {
                info!("client {:?} connected", self.client_addr);
                self.state = ServerHandshakeState::Connected;
                vec![HandshakeAction::Connected]
            }
            (state, packet) => {
                debug!("ignoring packet {:#04x} from {:?} in handshake state {:?}", packet.id(), self.client_addr, state);
                vec![]
            }
        }
    }

    pub fn close(&mut self) {
        self.state = ServerHandshakeState::Closed;
    }
}

/// The handshake of a session, depending on which side of the connection it is on
pub enum Handshake {
    Client(ClientHandshake),
    Server(ServerHandshake),
}

impl Handshake {
    pub fn on_packet(&mut self, packet: &Packet, time: u64) -> Vec<HandshakeAction> {
        match self {
            Handshake::Client(h) => h.on_packet(packet, time),
            Handshake::Server(h) => h.on_packet(packet, time),
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Handshake::Client(h) => h.state() == ConnectionState::Connected,
            Handshake::Server(h) => h.state() == ServerHandshakeState::Connected,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Handshake::Client(h) => h.state() == ConnectionState::Closed,
            Handshake::Server(h) => h.state() == ServerHandshakeState::Closed,
        }
    }

    /// whether the peer may legitimately send datagrams in the current state
    pub fn accepts_datagrams(&self) -> bool {
        match self {
            Handshake::Client(h) => matches!(h.state(), ConnectionState::ConnectionRequestSent | ConnectionState::Connected),
            Handshake::Server(h) => h.state() != ServerHandshakeState::Closed,
        }
    }

    pub fn close(&mut self) {
        match self {
            Handshake::Client(h) => h.close(),
            Handshake::Server(h) => h.close(),
        }
    }
}

/// what a server does with an offline message
#[derive(Debug, Clone, PartialEq)]
pub enum OfflineReply {
    Reply(Packet),
    /// reply, and create a session for the sender
    OpenSession { reply: Packet, mtu_size: u16, client_guid: u64 },
    Ignore,
}

/// Answers the offline part of the handshake on the server side. This part is stateless: a
///  session only exists after the second open connection request.
pub struct OfflineResponder {
    server_guid: u64,
    server_name: String,
    protocol_version: u8,
    max_mtu_size: u16,
}

impl OfflineResponder {
    pub fn new(config: &RakNetConfig, server_guid: u64) -> OfflineResponder {
        OfflineResponder {
            server_guid,
            server_name: config.server_name.clone(),
            protocol_version: config.raknet_protocol_version,
            max_mtu_size: config.max_mtu_size,
        }
    }

    pub fn server_guid(&self) -> u64 {
        self.server_guid
    }

    pub fn on_packet(&self, packet: &Packet, from: SocketAddr) -> OfflineReply {
        match packet {
            Packet::UnconnectedPing(ping) => OfflineReply::Reply(Packet::UnconnectedPong(UnconnectedPong {
                ping_id: ping.ping_id,
                server_guid: self.server_guid,
                server_name: self.server_name.clone(),
            })),
            Packet::OpenConnectionRequest1(request) => {
                if request.protocol_version != self.protocol_version {
                    warn!("{:?} requested protocol version {}, expected {} - ignoring", from, request.protocol_version, self.protocol_version);
                    return OfflineReply::Ignore;
                }
                OfflineReply::Reply(Packet::OpenConnectionReply1(OpenConnectionReply1 {
                    server_guid: self.server_guid,
                    use_security: false,
                    mtu_size: self.clamp_mtu(request.mtu_size),
                }))
            }
            Packet::OpenConnectionRequest2(request) => {
                let mtu_size = self.clamp_mtu(request.mtu_size);
                OfflineReply::OpenSession {
                    reply: Packet::OpenConnectionReply2(OpenConnectionReply2 {
                        server_guid: self.server_guid,
                        client_address: from,
                        mtu_size,
                        use_encryption: false,
                    }),
                    mtu_size,
                    client_guid: request.client_guid,
                }
            }
            other => {
                debug!("ignoring offline packet {:#04x} from {:?}", other.id(), from);
                OfflineReply::Ignore
            }
        }
    }

    fn clamp_mtu(&self, mtu_size: u16) -> u16 {
        mtu_size.clamp(RakNetConfig::MIN_MTU_SIZE, self.max_mtu_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::connected::ConnectedPing;
    use crate::protocol::game::McpeMessage;
    use rstest::rstest;

    fn server_addr() -> SocketAddr {
        SocketAddr::from(([192, 168, 0, 10], 19132))
    }

    fn client_addr() -> SocketAddr {
        SocketAddr::from(([192, 168, 0, 20], 51000))
    }

    fn pong() -> Packet {
        Packet::UnconnectedPong(UnconnectedPong { ping_id: 1, server_guid: 77, server_name: "MCPE;Test".to_string() })
    }

    fn reply1(mtu_size: u16) -> Packet {
        Packet::OpenConnectionReply1(OpenConnectionReply1 { server_guid: 77, use_security: false, mtu_size })
    }

    fn reply2(mtu_size: u16) -> Packet {
        Packet::OpenConnectionReply2(OpenConnectionReply2 { server_guid: 77, client_address: client_addr(), mtu_size, use_encryption: false })
    }

    fn accepted() -> Packet {
        Packet::ConnectionRequestAccepted(ConnectionRequestAccepted {
            client_address: client_addr(),
            system_index: 0,
            system_addresses: default_system_addresses(),
            request_time: 100,
            accepted_time: 200,
        })
    }

    #[test]
    fn test_client_happy_path() {
        let mut handshake = ClientHandshake::new(&RakNetConfig::default_client(), server_addr(), 4711);
        assert_eq!(handshake.state(), ConnectionState::Idle);

        assert_eq!(handshake.start(1), vec![HandshakeAction::SendOffline(Packet::UnconnectedPing(UnconnectedPing { ping_id: 1 }))]);
        assert_eq!(handshake.state(), ConnectionState::PingSent);

        assert_eq!(handshake.on_packet(&pong(), 10), vec![HandshakeAction::SendOffline(Packet::OpenConnectionRequest1(OpenConnectionRequest1 {
            protocol_version: 5,
            mtu_size: 1447,
        }))]);
        assert_eq!(handshake.state(), ConnectionState::Open1Sent);

        assert_eq!(handshake.on_packet(&reply1(1447), 20), vec![HandshakeAction::SendOffline(Packet::OpenConnectionRequest2(OpenConnectionRequest2 {
            server_address: server_addr(),
            mtu_size: 1447,
            client_guid: 4711,
        }))]);
        assert_eq!(handshake.state(), ConnectionState::Open2Sent);

        assert_eq!(handshake.on_packet(&reply2(1447), 30), vec![
            HandshakeAction::SetMtu(1447),
            HandshakeAction::SendFramed(Packet::ConnectionRequest(ConnectionRequest { client_guid: 4711, request_time: 30, use_security: false }), Reliability::Reliable),
        ]);
        assert_eq!(handshake.state(), ConnectionState::ConnectionRequestSent);

        let actions = handshake.on_packet(&accepted(), 40);
        assert_eq!(handshake.state(), ConnectionState::Connected);
        assert_eq!(actions.len(), 4);
        assert!(matches!(&actions[0], HandshakeAction::SendFramed(Packet::NewIncomingConnection(nic), Reliability::Reliable) if nic.server_address == server_addr()));
        assert_eq!(actions[1], HandshakeAction::StartKeepAlive);
        assert_eq!(actions[2], HandshakeAction::SendFramed(Packet::McpeLogin(McpeLogin {
            username: "Client12".to_string(),
            protocol: 20,
            protocol2: 20,
            client_id: 12345,
            login_data: "nothing".to_string(),
        }), Reliability::ReliableOrdered));
        assert_eq!(actions[3], HandshakeAction::Connected);
    }

    #[rstest]
    #[case::server_smaller(1200, 1200)]
    #[case::server_bigger(1492, 1447)]
    #[case::server_absurd(10, RakNetConfig::MIN_MTU_SIZE)]
    fn test_client_mtu_negotiation(#[case] server_mtu: u16, #[case] expected: u16) {
        let mut handshake = ClientHandshake::new(&RakNetConfig::default_client(), server_addr(), 4711);
        handshake.start(1);
        handshake.on_packet(&pong(), 0);
        handshake.on_packet(&reply1(server_mtu), 0);
        assert_eq!(handshake.mtu_size(), expected);
    }

    #[rstest]
    #[case::reply1_before_pong(vec![reply1(1447)], ConnectionState::PingSent)]
    #[case::accepted_too_early(vec![pong(), accepted()], ConnectionState::Open1Sent)]
    #[case::repeated_pong(vec![pong(), pong()], ConnectionState::Open1Sent)]
    #[case::game_packet(vec![Packet::McpeMessage(McpeMessage { source: "a".to_string(), message: "b".to_string() })], ConnectionState::PingSent)]
    #[case::connected_ping(vec![Packet::ConnectedPing(ConnectedPing { send_ping_time: 1 })], ConnectionState::PingSent)]
    fn test_client_ignores_out_of_order(#[case] packets: Vec<Packet>, #[case] expected_state: ConnectionState) {
        let mut handshake = ClientHandshake::new(&RakNetConfig::default_client(), server_addr(), 4711);
        handshake.start(1);
        let mut last_actions = vec![];
        for packet in &packets {
            last_actions = handshake.on_packet(packet, 0);
        }
        assert!(last_actions.is_empty());
        assert_eq!(handshake.state(), expected_state);
    }

    #[test]
    fn test_client_start_twice() {
        let mut handshake = ClientHandshake::new(&RakNetConfig::default_client(), server_addr(), 4711);
        assert_eq!(handshake.start(1).len(), 1);
        assert!(handshake.start(1).is_empty());
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut handshake = ClientHandshake::new(&RakNetConfig::default_client(), server_addr(), 4711);
        handshake.start(1);
        handshake.close();
        assert!(handshake.on_packet(&pong(), 0).is_empty());
        assert_eq!(handshake.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_server_handshake() {
        let mut handshake = ServerHandshake::new(client_addr());

        assert!(handshake.on_packet(&Packet::NewIncomingConnection(NewIncomingConnection {
            server_address: server_addr(),
            system_addresses: default_system_addresses(),
            request_time: 0,
            accepted_time: 0,
        }), 0).is_empty());

        let actions = handshake.on_packet(&Packet::ConnectionRequest(ConnectionRequest { client_guid: 4711, request_time: 33, use_security: false }), 44);
        assert_eq!(actions, vec![HandshakeAction::SendFramed(Packet::ConnectionRequestAccepted(ConnectionRequestAccepted {
            client_address: client_addr(),
            system_index: 0,
            system_addresses: default_system_addresses(),
            request_time: 33,
            accepted_time: 44,
        }), Reliability::Reliable)]);
        assert_eq!(handshake.state(), ServerHandshakeState::AwaitingNewIncomingConnection);

        let actions = handshake.on_packet(&Packet::NewIncomingConnection(NewIncomingConnection {
            server_address: server_addr(),
            system_addresses: default_system_addresses(),
            request_time: 44,
            accepted_time: 55,
        }), 60);
        assert_eq!(actions, vec![HandshakeAction::Connected]);
        assert_eq!(handshake.state(), ServerHandshakeState::Connected);
    }

    #[test]
    fn test_offline_responder() {
        let mut config = RakNetConfig::default_server(server_addr());
        config.server_name = "MCPE;Test".to_string();
        let responder = OfflineResponder::new(&config, 77);

        assert_eq!(
            responder.on_packet(&Packet::UnconnectedPing(UnconnectedPing { ping_id: 5 }), client_addr()),
            OfflineReply::Reply(Packet::UnconnectedPong(UnconnectedPong { ping_id: 5, server_guid: 77, server_name: "MCPE;Test".to_string() }))
        );
        assert_eq!(
            responder.on_packet(&Packet::OpenConnectionRequest1(OpenConnectionRequest1 { protocol_version: 5, mtu_size: 9000 }), client_addr()),
            OfflineReply::Reply(reply1(1492))
        );
        assert_eq!(
            responder.on_packet(&Packet::OpenConnectionRequest1(OpenConnectionRequest1 { protocol_version: 6, mtu_size: 1447 }), client_addr()),
            OfflineReply::Ignore
        );
        assert_eq!(
            responder.on_packet(&Packet::OpenConnectionRequest2(OpenConnectionRequest2 { server_address: server_addr(), mtu_size: 1400, client_guid: 4711 }), client_addr()),
            OfflineReply::OpenSession { reply: reply2(1400), mtu_size: 1400, client_guid: 4711 }
        );
        assert_eq!(responder.on_packet(&pong(), client_addr()), OfflineReply::Ignore);
    }
}
