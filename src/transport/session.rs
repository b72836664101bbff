use crate::error::TransportError;
use crate::protocol::connected::{ConnectedPing, ConnectedPong};
use crate::protocol::Packet;
use crate::transport::config::RakNetConfig;
use crate::transport::datagram::{AckList, Datagram, IncomingDatagram};
use crate::transport::handshake::{ClientHandshake, Handshake, HandshakeAction, ServerHandshake};
use crate::transport::receive_stream::ReceiveStream;
use crate::transport::reliability::Reliability;
use crate::transport::send_pipeline::SendPipeline;
use crate::transport::send_stream::{OutgoingMessage, SendStream, SendStreamConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// What happened in a session as a result of incoming traffic, to be passed on to the
///  application after the session lock is released
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Packet(Packet),
    Closed,
}

struct SessionInner {
    peer_addr: SocketAddr,
    config: Arc<RakNetConfig>,
    send_pipeline: Arc<SendPipeline>,
    handshake: Handshake,
    send_stream: SendStream,
    receive_stream: ReceiveStream,
    /// reference point for the millisecond timestamps in pings and connection requests
    epoch: Instant,
    last_activity: Instant,
    /// `Some` once keep-alive is started
    last_keep_alive: Option<Instant>,
    /// client handshake steps waiting for the settle delay
    deferred_actions: Vec<HandshakeAction>,
    closed: bool,
}

impl SessionInner {
    fn time_millis(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_millis() as u64
    }

    async fn send_framed(&mut self, packet: &Packet, reliability: Reliability, now: Instant) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::SessionClosed(self.peer_addr));
        }
        trace!("sending packet {:#04x} to {:?} as {:?}", packet.id(), self.peer_addr, reliability);
        let payload = packet.encode()?;
        self.send_stream.send_message(OutgoingMessage::new(payload, reliability), now).await
    }

    /// Performs handshake actions right away, or parks them in `deferred_actions` if they have
    ///  to wait for the settle delay. [Session] sleeps through that delay without holding the
    ///  session lock.
    async fn execute(&mut self, actions: Vec<HandshakeAction>, events: &mut Vec<SessionEvent>) -> Result<(), TransportError> {
        if actions.is_empty() {
            return Ok(());
        }
        if matches!(self.handshake, Handshake::Client(_)) && !self.config.handshake_settle_delay.is_zero() {
            self.deferred_actions.extend(actions);
            return Ok(());
        }
        self.perform(actions, events).await
    }

    fn take_deferred_actions(&mut self) -> Vec<HandshakeAction> {
        std::mem::take(&mut self.deferred_actions)
    }

    async fn perform(&mut self, actions: Vec<HandshakeAction>, events: &mut Vec<SessionEvent>) -> Result<(), TransportError> {
        for action in actions {
            match action {
                HandshakeAction::SendOffline(packet) => {
                    trace!("sending offline packet {:#04x} to {:?}", packet.id(), self.peer_addr);
                    let buf = packet.encode()?;
                    self.send_pipeline.do_send_packet(self.peer_addr, &buf).await;
                }
                HandshakeAction::SendFramed(packet, reliability) => {
                    self.send_framed(&packet, reliability, Instant::now()).await?;
                }
                HandshakeAction::SetMtu(mtu_size) => {
                    debug!("MTU for {:?} is {}", self.peer_addr, mtu_size);
                    self.send_stream.set_mtu_size(mtu_size);
                }
                HandshakeAction::StartKeepAlive => {
                    self.last_keep_alive = Some(Instant::now());
                }
                HandshakeAction::Connected => {
                    events.push(SessionEvent::Connected);
                }
            }
        }
        Ok(())
    }

    async fn on_offline_packet(&mut self, packet: Packet, now: Instant) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.closed {
            debug!("session with {:?} is closed - ignoring offline packet {:#04x}", self.peer_addr, packet.id());
            return events;
        }
        self.last_activity = now;

        let actions = self.handshake.on_packet(&packet, self.time_millis(now));
        if let Err(e) = self.execute(actions, &mut events).await {
            warn!("handshake with {:?} failed: {}", self.peer_addr, e);
        }
        events
    }

    async fn on_datagram(&mut self, buf: &[u8], now: Instant) -> Vec<SessionEvent> {
        if self.closed {
            debug!("session with {:?} is closed - ignoring datagram", self.peer_addr);
            return Vec::new();
        }

        let datagram = match IncomingDatagram::decode(buf) {
            Ok(d) => d,
            Err(e) => {
                warn!("dropping datagram from {:?}: {}", self.peer_addr, e);
                return Vec::new();
            }
        };
        if !self.handshake.accepts_datagrams() {
            debug!("datagram from {:?} before the handshake allows it - dropping", self.peer_addr);
            return Vec::new();
        }
        self.last_activity = now;

        match datagram {
            IncomingDatagram::Ack(acks) => {
                trace!("ACK from {:?}: {:?}", self.peer_addr, acks.ranges());
                self.send_stream.on_ack(&acks);
                Vec::new()
            }
            IncomingDatagram::Nak(naks) => {
                debug!("NAK from {:?}: {:?}", self.peer_addr, naks.ranges());
                self.send_stream.on_nak(&naks, now).await;
                Vec::new()
            }
            IncomingDatagram::Data(datagram) => self.on_data_datagram(datagram, now).await,
        }
    }

    async fn on_data_datagram(&mut self, datagram: Datagram, now: Instant) -> Vec<SessionEvent> {
        let sequence_number = datagram.sequence_number();
        let received = self.receive_stream.on_datagram(datagram, now);

        if received.needs_ack {
            self.send_pipeline.do_send_packet(self.peer_addr, &AckList::single(sequence_number).encode_ack()).await;
        }
        if !received.nak.is_empty() {
            self.send_pipeline.do_send_packet(self.peer_addr, &received.nak.encode_nak()).await;
        }

        let mut events = Vec::new();
        for payload in received.payloads {
            let packet = match Packet::decode(&payload) {
                Ok(p) => p,
                Err(e) => {
                    warn!("dropping malformed packet from {:?}: {}", self.peer_addr, e);
                    continue;
                }
            };
            let time = self.time_millis(now);

            match packet {
                Packet::ConnectedPing(ping) => {
                    let pong = Packet::ConnectedPong(ConnectedPong { send_ping_time: ping.send_ping_time, send_pong_time: time });
                    if let Err(e) = self.send_framed(&pong, Reliability::Unreliable, now).await {
                        debug!("could not answer ping from {:?}: {}", self.peer_addr, e);
                    }
                }
                Packet::ConnectedPong(pong) => {
                    trace!("round trip to {:?}: {} ms", self.peer_addr, time.saturating_sub(pong.send_ping_time));
                }
                Packet::ConnectionRequest(_) | Packet::ConnectionRequestAccepted(_) | Packet::NewIncomingConnection(_) => {
                    let actions = self.handshake.on_packet(&packet, time);
                    if let Err(e) = self.execute(actions, &mut events).await {
                        warn!("handshake with {:?} failed: {}", self.peer_addr, e);
                    }
                }
                Packet::DisconnectionNotification => {
                    info!("{:?} disconnected", self.peer_addr);
                    self.close();
                    events.push(SessionEvent::Closed);
                    break;
                }
                packet if packet.is_offline() => {
                    debug!("offline packet {:#04x} framed in a datagram from {:?} - dropping", packet.id(), self.peer_addr);
                }
                packet => {
                    if self.handshake.is_connected() {
                        events.push(SessionEvent::Packet(packet));
                    }
                    else {
                        debug!("packet {:#04x} from {:?} before connection is established - dropping", packet.id(), self.peer_addr);
                    }
                }
            }
        }
        events
    }

    /// periodic housekeeping, returns `false` if the session is (now) closed
    async fn on_tick(&mut self, now: Instant) -> bool {
        if self.closed {
            return false;
        }
        if now.saturating_duration_since(self.last_activity) >= self.config.session_timeout {
            warn!("{}", TransportError::SessionTimeout(self.peer_addr));
            self.close();
            return false;
        }

        self.send_stream.resend_expired(now).await;

        let evicted = self.receive_stream.evict_expired_splits(now);
        if evicted.num_reliable > 0 {
            // their fragments were acknowledged, so the peer is not going to resend them
            warn!("{} reliable split messages from {:?} timed out incomplete - closing the session", evicted.num_reliable, self.peer_addr);
            self.close();
            return false;
        }
        if evicted.num_unreliable > 0 {
            debug!("discarded {} incomplete split messages from {:?}", evicted.num_unreliable, self.peer_addr);
        }

        if let Some(last_keep_alive) = self.last_keep_alive {
            if now.saturating_duration_since(last_keep_alive) >= self.config.keep_alive_interval {
                self.last_keep_alive = Some(now);
                let ping = Packet::ConnectedPing(ConnectedPing { send_ping_time: self.time_millis(now) });
                if let Err(e) = self.send_framed(&ping, Reliability::Unreliable, now).await {
                    debug!("could not send keep-alive to {:?}: {}", self.peer_addr, e);
                }
            }
        }
        true
    }

    fn close(&mut self) {
        self.closed = true;
        self.handshake.close();
        self.send_stream.clear();
        self.receive_stream.clear();
        self.last_keep_alive = None;
    }
}

/// The state of a connection with a single peer. All mutable state is behind a single lock
///  that is shared between the receive path and the session's timer task.
pub struct Session {
    peer_addr: SocketAddr,
    config: Arc<RakNetConfig>,
    inner: Arc<Mutex<SessionInner>>,
    active_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.abort_active_loop();
    }
}

impl Session {
    /// a client's session with the server it connects to, starting with the handshake
    pub fn new_client(config: Arc<RakNetConfig>, send_pipeline: Arc<SendPipeline>, server_addr: SocketAddr, client_guid: u64) -> Session {
        let handshake = Handshake::Client(ClientHandshake::new(&config, server_addr, client_guid));
        let mtu_size = config.mtu_size;
        Self::new(config, send_pipeline, server_addr, handshake, mtu_size)
    }

    /// a server's session with a client that completed the offline part of the handshake
    pub fn new_server(config: Arc<RakNetConfig>, send_pipeline: Arc<SendPipeline>, client_addr: SocketAddr, mtu_size: u16) -> Session {
        Self::new(config, send_pipeline, client_addr, Handshake::Server(ServerHandshake::new(client_addr)), mtu_size)
    }

    fn new(config: Arc<RakNetConfig>, send_pipeline: Arc<SendPipeline>, peer_addr: SocketAddr, handshake: Handshake, mtu_size: u16) -> Session {
        let now = Instant::now();
        let inner = SessionInner {
            peer_addr,
            config: config.clone(),
            send_pipeline: send_pipeline.clone(),
            handshake,
            send_stream: SendStream::new(SendStreamConfig::from(config.as_ref()), send_pipeline, peer_addr, mtu_size),
            receive_stream: ReceiveStream::new(&config),
            epoch: now,
            last_activity: now,
            last_keep_alive: None,
            deferred_actions: Vec::new(),
            closed: false,
        };

        Session {
            peer_addr,
            config,
            inner: Arc::new(Mutex::new(inner)),
            active_handle: Default::default(),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn is_connected(&self) -> bool {
        let inner = self.inner.lock().await;
        !inner.closed && inner.handshake.is_connected()
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    pub async fn mtu_size(&self) -> u16 {
        self.inner.lock().await.send_stream.mtu_size()
    }

    /// Starts the periodic housekeeping. When the session times out, its peer address is sent
    ///  to `on_closed`.
    pub fn spawn_active_loop(&self, on_closed: mpsc::Sender<SocketAddr>) {
        let mut active_handle = match self.active_handle.lock() {
            Ok(h) => h,
            Err(e) => e.into_inner(),
        };
        if active_handle.is_some() {
            warn!("active loop already spawned");
            return;
        }
        *active_handle = Some(tokio::spawn(Self::do_loop(self.config.clone(), self.peer_addr, self.inner.clone(), on_closed)));
    }

    fn abort_active_loop(&self) {
        let mut active_handle = match self.active_handle.lock() {
            Ok(h) => h,
            Err(e) => e.into_inner(),
        };
        if let Some(handle) = active_handle.take() {
            handle.abort();
        }
    }

    /// Active loop - this runs until the session is closed, or until it is aborted
    async fn do_loop(config: Arc<RakNetConfig>, peer_addr: SocketAddr, inner: Arc<Mutex<SessionInner>>, on_closed: mpsc::Sender<SocketAddr>) {
        let mut tick_interval = interval(config.tick_interval);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick_interval.tick().await;
            let is_alive = inner.lock().await
                .on_tick(Instant::now()).await;
            if !is_alive {
                break;
            }
        }

        if on_closed.send(peer_addr).await.is_err() {
            debug!("end point is gone, not reporting closed session with {:?}", peer_addr);
        }
    }

    /// Performs handshake actions that were parked for the settle delay. The lock is not held
    ///  while waiting.
    async fn settle_and_perform(&self, actions: Vec<HandshakeAction>, events: &mut Vec<SessionEvent>) {
        if actions.is_empty() {
            return;
        }
        sleep(self.config.handshake_settle_delay).await;

        let mut inner = self.inner.lock().await;
        if inner.closed {
            debug!("session with {:?} was closed during the handshake settle delay", self.peer_addr);
            return;
        }
        if let Err(e) = inner.perform(actions, events).await {
            warn!("handshake with {:?} failed: {}", self.peer_addr, e);
        }
    }

    /// Sends the first handshake message. This is a no-op for server sessions.
    pub async fn start_handshake(&self) {
        let deferred = {
            let mut inner = self.inner.lock().await;
            let ping_id = inner.time_millis(Instant::now());
            let actions = match &mut inner.handshake {
                Handshake::Client(h) => h.start(ping_id),
                Handshake::Server(_) => return,
            };
            let mut events = Vec::new();
            if let Err(e) = inner.execute(actions, &mut events).await {
                warn!("handshake with {:?} failed: {}", self.peer_addr, e);
            }
            inner.take_deferred_actions()
        };
        self.settle_and_perform(deferred, &mut Vec::new()).await;
    }

    /// handles an unframed message from the peer, i.e. a reply during the offline part of the
    ///  client handshake
    pub async fn on_offline_packet(&self, packet: Packet) -> Vec<SessionEvent> {
        let (mut events, deferred) = {
            let mut inner = self.inner.lock().await;
            let events = inner.on_offline_packet(packet, Instant::now()).await;
            (events, inner.take_deferred_actions())
        };
        self.settle_and_perform(deferred, &mut events).await;
        events
    }

    pub async fn on_datagram(&self, buf: &[u8]) -> Vec<SessionEvent> {
        let (mut events, deferred) = {
            let mut inner = self.inner.lock().await;
            let events = inner.on_datagram(buf, Instant::now()).await;
            (events, inner.take_deferred_actions())
        };
        self.settle_and_perform(deferred, &mut events).await;
        events
    }

    pub async fn send_packet(&self, packet: &Packet, reliability: Reliability) -> Result<(), TransportError> {
        self.inner.lock().await
            .send_framed(packet, reliability, Instant::now()).await
    }

    /// sends several packets at once, allowing them to share datagrams
    pub async fn send_packets(&self, packets: &[Packet], reliability: Reliability) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(TransportError::SessionClosed(self.peer_addr));
        }
        let messages = packets.iter()
            .map(|p| p.encode().map(|payload| OutgoingMessage::new(payload, reliability)))
            .collect::<Result<Vec<_>, _>>()?;
        inner.send_stream.send_messages(messages, Instant::now()).await
    }

    /// Closes the session, notifying the peer if the connection was established. All
    ///  subsequent sends fail with [TransportError::SessionClosed].
    pub async fn close(&self) {
        {
            let mut inner = self.inner.lock().await;
            if !inner.closed {
                if inner.handshake.is_connected() {
                    if let Err(e) = inner.send_framed(&Packet::DisconnectionNotification, Reliability::Reliable, Instant::now()).await {
                        debug!("could not notify {:?} of disconnect: {}", self.peer_addr, e);
                    }
                }
                info!("closing session with {:?}", self.peer_addr);
                inner.close();
            }
        }
        self.abort_active_loop();
    }
}
