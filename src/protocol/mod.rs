pub mod unconnected;
pub mod connected;
pub mod game;

use crate::error::MalformedPacket;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use connected::*;
use game::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::debug;
use unconnected::*;

pub const OFFLINE_MAGIC: [u8; 16] = [0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78];

/// IPv4 + UDP header size. MTU values on the wire refer to the whole IP packet, so this is the
///  difference between an MTU and the UDP payload it allows.
pub const UDP_HEADER_OVERHEAD: u16 = 20 + 8;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MessageId {
    ConnectedPing = 0x00,
    UnconnectedPing = 0x01,
    ConnectedPong = 0x03,
    OpenConnectionRequest1 = 0x05,
    OpenConnectionReply1 = 0x06,
    OpenConnectionRequest2 = 0x07,
    OpenConnectionReply2 = 0x08,
    ConnectionRequest = 0x09,
    ConnectionRequestAccepted = 0x10,
    NewIncomingConnection = 0x13,
    DisconnectionNotification = 0x15,
    UnconnectedPong = 0x1c,

    McpeLogin = 0x82,
    McpePlayStatus = 0x83,
    McpeDisconnect = 0x84,
    McpeMessage = 0x85,
    McpeStartGame = 0x87,
    McpeAddEntity = 0x8c,
    McpeMovePlayer = 0x95,
    McpeTileEvent = 0x9b,
    McpeSetEntityData = 0xa7,
    McpeSetSpawnPosition = 0xab,
    McpeFullChunkData = 0xba,
}

/// A complete packet, i.e. a message id and the corresponding body. Packets with an id that is
///  not modelled here are passed through as [Packet::Unknown].
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    ConnectedPing(ConnectedPing),
    UnconnectedPing(UnconnectedPing),
    ConnectedPong(ConnectedPong),
    OpenConnectionRequest1(OpenConnectionRequest1),
    OpenConnectionReply1(OpenConnectionReply1),
    OpenConnectionRequest2(OpenConnectionRequest2),
    OpenConnectionReply2(OpenConnectionReply2),
    ConnectionRequest(ConnectionRequest),
    ConnectionRequestAccepted(ConnectionRequestAccepted),
    NewIncomingConnection(NewIncomingConnection),
    DisconnectionNotification,
    UnconnectedPong(UnconnectedPong),

    McpeLogin(McpeLogin),
    McpePlayStatus(McpePlayStatus),
    McpeDisconnect(McpeDisconnect),
    McpeMessage(McpeMessage),
    McpeStartGame(McpeStartGame),
    McpeAddEntity(McpeAddEntity),
    McpeMovePlayer(McpeMovePlayer),
    McpeTileEvent(McpeTileEvent),
    McpeSetEntityData(McpeSetEntityData),
    McpeSetSpawnPosition(McpeSetSpawnPosition),
    McpeFullChunkData(McpeFullChunkData),

    Unknown { id: u8, payload: Bytes },
}

impl Packet {
    pub fn id(&self) -> u8 {
        let id = match self {
            Packet::ConnectedPing(_) => MessageId::ConnectedPing,
            Packet::UnconnectedPing(_) => MessageId::UnconnectedPing,
            Packet::ConnectedPong(_) => MessageId::ConnectedPong,
            Packet::OpenConnectionRequest1(_) => MessageId::OpenConnectionRequest1,
            Packet::OpenConnectionReply1(_) => MessageId::OpenConnectionReply1,
            Packet::OpenConnectionRequest2(_) => MessageId::OpenConnectionRequest2,
            Packet::OpenConnectionReply2(_) => MessageId::OpenConnectionReply2,
            Packet::ConnectionRequest(_) => MessageId::ConnectionRequest,
            Packet::ConnectionRequestAccepted(_) => MessageId::ConnectionRequestAccepted,
            Packet::NewIncomingConnection(_) => MessageId::NewIncomingConnection,
            Packet::DisconnectionNotification => MessageId::DisconnectionNotification,
            Packet::UnconnectedPong(_) => MessageId::UnconnectedPong,
            Packet::McpeLogin(_) => MessageId::McpeLogin,
            Packet::McpePlayStatus(_) => MessageId::McpePlayStatus,
            Packet::McpeDisconnect(_) => MessageId::McpeDisconnect,
            Packet::McpeMessage(_) => MessageId::McpeMessage,
            Packet::McpeStartGame(_) => MessageId::McpeStartGame,
            Packet::McpeAddEntity(_) => MessageId::McpeAddEntity,
            Packet::McpeMovePlayer(_) => MessageId::McpeMovePlayer,
            Packet::McpeTileEvent(_) => MessageId::McpeTileEvent,
            Packet::McpeSetEntityData(_) => MessageId::McpeSetEntityData,
            Packet::McpeSetSpawnPosition(_) => MessageId::McpeSetSpawnPosition,
            Packet::McpeFullChunkData(_) => MessageId::McpeFullChunkData,
            Packet::Unknown { id, .. } => return *id,
        };
        id.into()
    }

    /// Fails only for a packet that has no valid encoding, i.e. a string field that does not
    ///  fit its length prefix
    pub fn encode(&self) -> Result<Bytes, MalformedPacket> {
        let mut buf = BytesMut::new();
        buf.put_u8(self.id());

        match self {
            Packet::ConnectedPing(p) => p.ser(&mut buf),
            Packet::UnconnectedPing(p) => p.ser(&mut buf),
            Packet::ConnectedPong(p) => p.ser(&mut buf),
            Packet::OpenConnectionRequest1(p) => p.ser(&mut buf),
            Packet::OpenConnectionReply1(p) => p.ser(&mut buf),
            Packet::OpenConnectionRequest2(p) => p.ser(&mut buf),
            Packet::OpenConnectionReply2(p) => p.ser(&mut buf),
            Packet::ConnectionRequest(p) => p.ser(&mut buf),
            Packet::ConnectionRequestAccepted(p) => p.ser(&mut buf),
            Packet::NewIncomingConnection(p) => p.ser(&mut buf),
            Packet::DisconnectionNotification => {}
            Packet::UnconnectedPong(p) => p.ser(&mut buf)?,
            Packet::McpeLogin(p) => p.ser(&mut buf)?,
            Packet::McpePlayStatus(p) => p.ser(&mut buf),
            Packet::McpeDisconnect(p) => p.ser(&mut buf)?,
            Packet::McpeMessage(p) => p.ser(&mut buf)?,
            Packet::McpeStartGame(p) => p.ser(&mut buf),
            Packet::McpeAddEntity(p) => p.ser(&mut buf),
            Packet::McpeMovePlayer(p) => p.ser(&mut buf),
            Packet::McpeTileEvent(p) => p.ser(&mut buf),
            Packet::McpeSetEntityData(p) => p.ser(&mut buf),
            Packet::McpeSetSpawnPosition(p) => p.ser(&mut buf),
            Packet::McpeFullChunkData(p) => p.ser(&mut buf),
            Packet::Unknown { payload, .. } => buf.put_slice(payload),
        }
        Ok(buf.freeze())
    }

    /// Decodes a complete packet, starting with its message id. Truncated or otherwise invalid
    ///  input is reported as [MalformedPacket], an unknown id is not an error.
    pub fn decode(raw: &[u8]) -> Result<Packet, MalformedPacket> {
        let mut buf = raw;
        if !buf.has_remaining() {
            return Err(MalformedPacket::Empty);
        }
        let raw_id = buf.get_u8();

        let id = match MessageId::try_from(raw_id) {
            Ok(id) => id,
            Err(_) => return Ok(Packet::Unknown { id: raw_id, payload: Bytes::copy_from_slice(buf) }),
        };

        let buf = &mut buf;
        let packet = match id {
            MessageId::ConnectedPing => Packet::ConnectedPing(ConnectedPing::deser(buf)?),
            MessageId::UnconnectedPing => Packet::UnconnectedPing(UnconnectedPing::deser(buf)?),
            MessageId::ConnectedPong => Packet::ConnectedPong(ConnectedPong::deser(buf)?),
            MessageId::OpenConnectionRequest1 => Packet::OpenConnectionRequest1(OpenConnectionRequest1::deser(buf)?),
            MessageId::OpenConnectionReply1 => Packet::OpenConnectionReply1(OpenConnectionReply1::deser(buf)?),
            MessageId::OpenConnectionRequest2 => Packet::OpenConnectionRequest2(OpenConnectionRequest2::deser(buf)?),
            MessageId::OpenConnectionReply2 => Packet::OpenConnectionReply2(OpenConnectionReply2::deser(buf)?),
            MessageId::ConnectionRequest => Packet::ConnectionRequest(ConnectionRequest::deser(buf)?),
            MessageId::ConnectionRequestAccepted => Packet::ConnectionRequestAccepted(ConnectionRequestAccepted::deser(buf)?),
            MessageId::NewIncomingConnection => Packet::NewIncomingConnection(NewIncomingConnection::deser(buf)?),
            MessageId::DisconnectionNotification => Packet::DisconnectionNotification,
            MessageId::UnconnectedPong => Packet::UnconnectedPong(UnconnectedPong::deser(buf)?),
            MessageId::McpeLogin => Packet::McpeLogin(McpeLogin::deser(buf)?),
            MessageId::McpePlayStatus => Packet::McpePlayStatus(McpePlayStatus::deser(buf)?),
            MessageId::McpeDisconnect => Packet::McpeDisconnect(McpeDisconnect::deser(buf)?),
            MessageId::McpeMessage => Packet::McpeMessage(McpeMessage::deser(buf)?),
            MessageId::McpeStartGame => Packet::McpeStartGame(McpeStartGame::deser(buf)?),
            MessageId::McpeAddEntity => Packet::McpeAddEntity(McpeAddEntity::deser(buf)?),
            MessageId::McpeMovePlayer => Packet::McpeMovePlayer(McpeMovePlayer::deser(buf)?),
            MessageId::McpeTileEvent => Packet::McpeTileEvent(McpeTileEvent::deser(buf)?),
            MessageId::McpeSetEntityData => Packet::McpeSetEntityData(McpeSetEntityData::deser(buf)?),
            MessageId::McpeSetSpawnPosition => Packet::McpeSetSpawnPosition(McpeSetSpawnPosition::deser(buf)?),
            MessageId::McpeFullChunkData => Packet::McpeFullChunkData(McpeFullChunkData::deser(buf)?),
        };
        if buf.has_remaining() {
            debug!("{} unread bytes after packet {:#04x}", buf.remaining(), raw_id);
        }
        Ok(packet)
    }

    /// messages that are exchanged outside a session, i.e. without datagram framing
    pub fn is_offline(&self) -> bool {
        matches!(self,
            Packet::UnconnectedPing(_)
            | Packet::UnconnectedPong(_)
            | Packet::OpenConnectionRequest1(_)
            | Packet::OpenConnectionReply1(_)
            | Packet::OpenConnectionRequest2(_)
            | Packet::OpenConnectionReply2(_))
    }
}
