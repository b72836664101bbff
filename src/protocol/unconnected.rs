//! Offline messages: discovery and the first two handshake round trips. All of them carry the
//!  offline magic.

use crate::error::MalformedPacket;
use crate::protocol::UDP_HEADER_OVERHEAD;
use crate::util::buf_ext::{BufExt, BufMutExt};
use bytes::{Buf, BufMut, BytesMut};
use std::net::SocketAddr;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UnconnectedPing {
    pub ping_id: u64,
}

impl UnconnectedPing {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u64(self.ping_id);
        buf.put_magic();
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        let ping_id = buf.try_read_u64()?;
        buf.try_read_magic()?;
        Ok(UnconnectedPing { ping_id })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UnconnectedPong {
    pub ping_id: u64,
    pub server_guid: u64,
    pub server_name: String,
}

impl UnconnectedPong {
    pub fn ser(&self, buf: &mut BytesMut) -> Result<(), MalformedPacket> {
        buf.put_u64(self.ping_id);
        buf.put_u64(self.server_guid);
        buf.put_magic();
        buf.put_string(&self.server_name)
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        let ping_id = buf.try_read_u64()?;
        let server_guid = buf.try_read_u64()?;
        buf.try_read_magic()?;
        let server_name = buf.try_read_string()?;
        Ok(UnconnectedPong { ping_id, server_guid, server_name })
    }
}

/// The client's MTU candidate is not a field of its own: the message is padded with zeroes so
///  that the whole IP packet has exactly that size, and the receiver derives the MTU from the
///  length it actually received.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OpenConnectionRequest1 {
    pub protocol_version: u8,
    pub mtu_size: u16,
}

impl OpenConnectionRequest1 {
    /// message id, magic and protocol version
    const UNPADDED_LEN: usize = 1 + 16 + 1;

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_magic();
        buf.put_u8(self.protocol_version);

        let padding = (self.mtu_size as usize)
            .saturating_sub(UDP_HEADER_OVERHEAD as usize + Self::UNPADDED_LEN);
        buf.put_bytes(0, padding);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        let total_len = 1 + buf.remaining();
        buf.try_read_magic()?;
        let protocol_version = buf.try_read_u8()?;
        buf.advance(buf.remaining());

        let mtu_size = u16::try_from(total_len + UDP_HEADER_OVERHEAD as usize)
            .map_err(|_| MalformedPacket::invalid("mtu size", total_len as u64))?;
        Ok(OpenConnectionRequest1 { protocol_version, mtu_size })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OpenConnectionReply1 {
    pub server_guid: u64,
    pub use_security: bool,
    pub mtu_size: u16,
}

impl OpenConnectionReply1 {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_magic();
        buf.put_u64(self.server_guid);
        buf.put_u8(self.use_security as u8);
        buf.put_u16(self.mtu_size);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        buf.try_read_magic()?;
        Ok(OpenConnectionReply1 {
            server_guid: buf.try_read_u64()?,
            use_security: buf.try_read_u8()? != 0,
            mtu_size: buf.try_read_u16()?,
        })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OpenConnectionRequest2 {
    pub server_address: SocketAddr,
    pub mtu_size: u16,
    pub client_guid: u64,
}

impl OpenConnectionRequest2 {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_magic();
        buf.put_address(&self.server_address);
        buf.put_u16(self.mtu_size);
        buf.put_u64(self.client_guid);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        buf.try_read_magic()?;
        Ok(OpenConnectionRequest2 {
            server_address: buf.try_read_address()?,
            mtu_size: buf.try_read_u16()?,
            client_guid: buf.try_read_u64()?,
        })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OpenConnectionReply2 {
    pub server_guid: u64,
    pub client_address: SocketAddr,
    pub mtu_size: u16,
    pub use_encryption: bool,
}

impl OpenConnectionReply2 {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_magic();
        buf.put_u64(self.server_guid);
        buf.put_address(&self.client_address);
        buf.put_u16(self.mtu_size);
        buf.put_u8(self.use_encryption as u8);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        buf.try_read_magic()?;
        Ok(OpenConnectionReply2 {
            server_guid: buf.try_read_u64()?,
            client_address: buf.try_read_address()?,
            mtu_size: buf.try_read_u16()?,
            use_encryption: buf.try_read_u8()? != 0,
        })
    }
}
