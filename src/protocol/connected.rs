//! Connection control messages, sent framed inside datagrams once the offline part of the
//!  handshake is done.

use crate::error::MalformedPacket;
use crate::util::buf_ext::{BufExt, BufMutExt};
use bytes::{Buf, BufMut, BytesMut};
use std::net::{Ipv4Addr, SocketAddr};

/// number of 'internal addresses' a peer announces during the handshake
pub const NUM_SYSTEM_ADDRESSES: usize = 10;

/// system addresses are padding as far as this implementation is concerned
pub fn default_system_addresses() -> Vec<SocketAddr> {
    let mut result = vec![SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)); NUM_SYSTEM_ADDRESSES];
    result[0] = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    result
}

/// Reads addresses until only the two trailing timestamps are left. Peers differ in how many
///  system addresses they send.
fn deser_system_addresses(buf: &mut impl Buf) -> Result<Vec<SocketAddr>, MalformedPacket> {
    let mut result = Vec::new();
    while buf.remaining() > 16 {
        result.push(buf.try_read_address()?);
    }
    Ok(result)
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectedPing {
    pub send_ping_time: u64,
}

impl ConnectedPing {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u64(self.send_ping_time);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        Ok(ConnectedPing { send_ping_time: buf.try_read_u64()? })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectedPong {
    pub send_ping_time: u64,
    pub send_pong_time: u64,
}

impl ConnectedPong {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u64(self.send_ping_time);
        buf.put_u64(self.send_pong_time);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        Ok(ConnectedPong {
            send_ping_time: buf.try_read_u64()?,
            send_pong_time: buf.try_read_u64()?,
        })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectionRequest {
    pub client_guid: u64,
    pub request_time: u64,
    pub use_security: bool,
}

impl ConnectionRequest {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u64(self.client_guid);
        buf.put_u64(self.request_time);
        buf.put_u8(self.use_security as u8);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        Ok(ConnectionRequest {
            client_guid: buf.try_read_u64()?,
            request_time: buf.try_read_u64()?,
            use_security: buf.try_read_u8()? != 0,
        })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectionRequestAccepted {
    pub client_address: SocketAddr,
    pub system_index: u16,
    pub system_addresses: Vec<SocketAddr>,
    pub request_time: u64,
    pub accepted_time: u64,
}

impl ConnectionRequestAccepted {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_address(&self.client_address);
        buf.put_u16(self.system_index);
        for addr in &self.system_addresses {
            buf.put_address(addr);
        }
        buf.put_u64(self.request_time);
        buf.put_u64(self.accepted_time);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        let client_address = buf.try_read_address()?;
        let system_index = buf.try_read_u16()?;
        let system_addresses = deser_system_addresses(buf)?;
        Ok(ConnectionRequestAccepted {
            client_address,
            system_index,
            system_addresses,
            request_time: buf.try_read_u64()?,
            accepted_time: buf.try_read_u64()?,
        })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewIncomingConnection {
    pub server_address: SocketAddr,
    pub system_addresses: Vec<SocketAddr>,
    pub request_time: u64,
    pub accepted_time: u64,
}

impl NewIncomingConnection {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_address(&self.server_address);
        for addr in &self.system_addresses {
            buf.put_address(addr);
        }
        buf.put_u64(self.request_time);
        buf.put_u64(self.accepted_time);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        let server_address = buf.try_read_address()?;
        let system_addresses = deser_system_addresses(buf)?;
        Ok(NewIncomingConnection {
            server_address,
            system_addresses,
            request_time: buf.try_read_u64()?,
            accepted_time: buf.try_read_u64()?,
        })
    }
}
