use crate::protocol::game::MCPE_PROTOCOL_VERSION;
use crate::protocol::UDP_HEADER_OVERHEAD;
use crate::transport::connected_message::ConnectedMessage;
use crate::transport::datagram_header::DatagramHeader;
use crate::transport::reliability::Reliability;
use crate::util::buf_ext::MAX_STRING_LEN;
use anyhow::bail;
use std::net::SocketAddr;
use std::time::Duration;

pub struct RakNetConfig {
    /// The local address the UDP socket is bound to. Clients typically use an ephemeral port
    ///  (`0.0.0.0:0`), servers the well-known port (19132 for Minecraft PE).
    pub bind_addr: SocketAddr,

    /// This is the MTU a client proposes during the handshake (and the MTU a server assumes
    ///  before negotiation). It refers to the whole IP packet, so the usable UDP payload is
    ///  [UDP_HEADER_OVERHEAD] bytes smaller.
    ///
    /// The proposal is transported implicitly by padding the first handshake request to exactly
    ///  this size, so a value that is too big for some hop on the route results in the handshake
    ///  being silently dropped.
    pub mtu_size: u16,

    /// This is the upper bound for negotiated MTUs: servers cap the client's proposal at this
    ///  value, and clients cap whatever the server replies.
    pub max_mtu_size: u16,

    /// RakNet protocol version sent in the first handshake request. Servers reject (i.e. ignore)
    ///  requests for other versions.
    pub raknet_protocol_version: u8,

    /// Frequency of the per-session housekeeping: resending unacknowledged datagrams, sending
    ///  keep-alive pings, evicting stale split buffers and detecting session timeouts. This
    ///  is the granularity of all other timeouts.
    pub tick_interval: Duration,

    /// Once connected, a client sends a connected ping at this interval to keep the session
    ///  alive.
    pub keep_alive_interval: Duration,

    /// A datagram that contains reliable messages and was not acknowledged after this time is
    ///  resent (with the same sequence number).
    pub resend_timeout: Duration,

    /// A session with no incoming traffic for this long is closed.
    pub session_timeout: Duration,

    /// Fragments of a split message that is not completed within this time (measured from the
    ///  most recent fragment) are discarded.
    pub split_reassembly_timeout: Duration,

    /// Delay before each outgoing step of the client handshake. Some servers drop a request
    ///  that arrives immediately after the previous reply. Zero disables the delay.
    pub handshake_settle_delay: Duration,

    /// Upper bound for the announced number of fragments of a single split message. Fragments
    ///  announcing more than this are treated as malformed.
    pub max_split_count: u32,

    /// Maximum number of split messages being reassembled concurrently per session. A fragment
    ///  starting another split message beyond this number is refused without acknowledging it,
    ///  so the peer resends it later.
    pub max_concurrent_splits: usize,

    /// Maximum number of unacknowledged datagrams retained per session for resending. Beyond
    ///  this, the oldest retained datagram is given up on.
    pub max_retained_datagrams: usize,

    /// Maximum number of out-of-order messages held back per ordering channel, waiting for
    ///  the gap to be filled. Messages beyond this are refused without acknowledging them, so
    ///  the peer resends them once the gap is closed.
    pub max_held_ordered_messages: usize,

    /// Servers announce this name in their unconnected pong, e.g.
    ///  `MCPE;Minecraft Server;20;0.10.0;0;20`
    pub server_name: String,

    /// what a client sends as its login once connected
    pub login: LoginConfig,
}

#[derive(Clone, Debug)]
pub struct LoginConfig {
    pub username: String,
    pub client_id: i32,
    pub protocol: i32,
    pub login_data: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        LoginConfig {
            username: "Client12".to_string(),
            client_id: 12345,
            protocol: MCPE_PROTOCOL_VERSION,
            login_data: "nothing".to_string(),
        }
    }
}

impl RakNetConfig {
    pub const DEFAULT_MTU_SIZE: u16 = 1447;
    pub const DEFAULT_PORT: u16 = 19132;
    /// NB: this must be big enough for the handshake request 1 (see [crate::protocol::unconnected::OpenConnectionRequest1])
    pub const MIN_MTU_SIZE: u16 = 400;

    pub fn default_client() -> RakNetConfig {
        RakNetConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            mtu_size: Self::DEFAULT_MTU_SIZE,
            max_mtu_size: 1492,
            raknet_protocol_version: 5,
            tick_interval: Duration::from_millis(100),
            keep_alive_interval: Duration::from_millis(5000),
            resend_timeout: Duration::from_millis(1000),
            session_timeout: Duration::from_secs(10),
            split_reassembly_timeout: Duration::from_secs(10),
            handshake_settle_delay: Duration::from_millis(50),
            max_split_count: 1024,
            max_concurrent_splits: 64,
            max_retained_datagrams: 4096,
            max_held_ordered_messages: 1024,
            server_name: "MCPE;Minecraft Server;20;0.10.0;0;20".to_string(),
            login: LoginConfig::default(),
        }
    }

    pub fn default_server(bind_addr: SocketAddr) -> RakNetConfig {
        RakNetConfig {
            bind_addr,
            handshake_settle_delay: Duration::ZERO,
            ..Self::default_client()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mtu_size < Self::MIN_MTU_SIZE {
            bail!("MTU size {} is too small, minimum is {}", self.mtu_size, Self::MIN_MTU_SIZE);
        }
        if self.max_mtu_size < self.mtu_size {
            bail!("max MTU size {} is smaller than MTU size {}", self.max_mtu_size, self.mtu_size);
        }
        if self.tick_interval.is_zero() {
            bail!("tick interval must be positive");
        }
        if self.resend_timeout < self.tick_interval {
            bail!("resend timeout must not be shorter than the tick interval");
        }
        if self.session_timeout <= self.keep_alive_interval {
            bail!("session timeout must be longer than the keep-alive interval");
        }
        if self.max_split_count < 2 {
            bail!("max split count must allow for at least two fragments");
        }
        if self.max_concurrent_splits == 0 || self.max_retained_datagrams == 0 || self.max_held_ordered_messages == 0 {
            bail!("buffer limits must be positive");
        }
        if self.server_name.len() > MAX_STRING_LEN {
            bail!("server name of {} bytes is too long for the unconnected pong", self.server_name.len());
        }
        Ok(())
    }

    /// Restricts an MTU received from a peer to the range this configuration supports
    pub fn clamp_mtu(&self, mtu_size: u16) -> u16 {
        mtu_size.clamp(Self::MIN_MTU_SIZE, self.max_mtu_size)
    }

    /// the maximum encoded size of a single datagram for a given MTU
    pub fn max_datagram_len(mtu_size: u16) -> usize {
        mtu_size.saturating_sub(UDP_HEADER_OVERHEAD) as usize
    }

    /// the maximum size of a payload that can be sent in a single datagram without splitting
    pub fn max_unsplit_payload_len(mtu_size: u16, reliability: Reliability) -> usize {
        Self::max_datagram_len(mtu_size) - DatagramHeader::DATA_HEADER_LEN - ConnectedMessage::header_len(reliability, false)
    }

    pub fn max_fragment_len(mtu_size: u16, reliability: Reliability) -> usize {
        Self::max_datagram_len(mtu_size) - DatagramHeader::DATA_HEADER_LEN - ConnectedMessage::header_len(reliability, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RakNetConfig::default_client().validate().is_ok());
        assert!(RakNetConfig::default_server(SocketAddr::from(([0, 0, 0, 0], RakNetConfig::DEFAULT_PORT))).validate().is_ok());
    }

    #[rstest]
    #[case::mtu_too_small(|c: &mut RakNetConfig| c.mtu_size = 100)]
    #[case::max_mtu_below_mtu(|c: &mut RakNetConfig| c.max_mtu_size = 1000)]
    #[case::zero_tick(|c: &mut RakNetConfig| c.tick_interval = Duration::ZERO)]
    #[case::resend_below_tick(|c: &mut RakNetConfig| c.resend_timeout = Duration::from_millis(10))]
    #[case::session_timeout_below_keep_alive(|c: &mut RakNetConfig| c.session_timeout = Duration::from_secs(1))]
    #[case::split_count(|c: &mut RakNetConfig| c.max_split_count = 1)]
    #[case::no_retained_datagrams(|c: &mut RakNetConfig| c.max_retained_datagrams = 0)]
    #[case::server_name_too_long(|c: &mut RakNetConfig| c.server_name = "x".repeat(70_000))]
    fn test_invalid(#[case] modify: fn(&mut RakNetConfig)) {
        let mut config = RakNetConfig::default_client();
        modify(&mut config);
        assert!(config.validate().is_err());
    }

    #[rstest]
    #[case::below(10, RakNetConfig::MIN_MTU_SIZE)]
    #[case::inside(1200, 1200)]
    #[case::above(9000, 1492)]
    fn test_clamp_mtu(#[case] mtu_size: u16, #[case] expected: u16) {
        assert_eq!(RakNetConfig::default_client().clamp_mtu(mtu_size), expected);
    }

    #[test]
    fn test_payload_budget() {
        assert_eq!(RakNetConfig::max_datagram_len(1447), 1419);
        assert_eq!(RakNetConfig::max_unsplit_payload_len(1447, Reliability::ReliableOrdered), 1419 - 4 - 10);
        assert_eq!(RakNetConfig::max_fragment_len(1447, Reliability::ReliableOrdered), 1419 - 4 - 20);
    }
}
