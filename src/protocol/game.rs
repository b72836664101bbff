//! Game packets (Minecraft PE 0.10, network protocol 20). Only the packets the client and server
//!  in this crate actually send or look at are modelled, everything else decodes as
//!  [crate::protocol::Packet::Unknown].

use crate::error::MalformedPacket;
use crate::util::buf_ext::{BufExt, BufMutExt};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const MCPE_PROTOCOL_VERSION: i32 = 20;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct McpeLogin {
    pub username: String,
    pub protocol: i32,
    pub protocol2: i32,
    pub client_id: i32,
    pub login_data: String,
}

impl McpeLogin {
    pub fn ser(&self, buf: &mut BytesMut) -> Result<(), MalformedPacket> {
        buf.put_string(&self.username)?;
        buf.put_i32(self.protocol);
        buf.put_i32(self.protocol2);
        buf.put_i32(self.client_id);
        buf.put_string(&self.login_data)
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        Ok(McpeLogin {
            username: buf.try_read_string()?,
            protocol: buf.try_read_i32()?,
            protocol2: buf.try_read_i32()?,
            client_id: buf.try_read_i32()?,
            login_data: buf.try_read_string()?,
        })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct McpePlayStatus {
    pub status: i32,
}

impl McpePlayStatus {
    pub const LOGIN_SUCCESS: i32 = 0;
    pub const LOGIN_FAILED_CLIENT: i32 = 1;
    pub const LOGIN_FAILED_SERVER: i32 = 2;
    pub const PLAYER_SPAWN: i32 = 3;

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_i32(self.status);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        Ok(McpePlayStatus { status: buf.try_read_i32()? })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct McpeDisconnect {
    pub message: String,
}

impl McpeDisconnect {
    pub fn ser(&self, buf: &mut BytesMut) -> Result<(), MalformedPacket> {
        buf.put_string(&self.message)
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        Ok(McpeDisconnect { message: buf.try_read_string()? })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct McpeMessage {
    pub source: String,
    pub message: String,
}

impl McpeMessage {
    pub fn ser(&self, buf: &mut BytesMut) -> Result<(), MalformedPacket> {
        buf.put_string(&self.source)?;
        buf.put_string(&self.message)
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        Ok(McpeMessage {
            source: buf.try_read_string()?,
            message: buf.try_read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct McpeStartGame {
    pub seed: i32,
    pub generator: i32,
    pub gamemode: i32,
    pub entity_id: i32,
    pub spawn_x: i32,
    pub spawn_y: i32,
    pub spawn_z: i32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl McpeStartGame {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_i32(self.seed);
        buf.put_i32(self.generator);
        buf.put_i32(self.gamemode);
        buf.put_i32(self.entity_id);
        buf.put_i32(self.spawn_x);
        buf.put_i32(self.spawn_y);
        buf.put_i32(self.spawn_z);
        buf.put_f32(self.x);
        buf.put_f32(self.y);
        buf.put_f32(self.z);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        Ok(McpeStartGame {
            seed: buf.try_read_i32()?,
            generator: buf.try_read_i32()?,
            gamemode: buf.try_read_i32()?,
            entity_id: buf.try_read_i32()?,
            spawn_x: buf.try_read_i32()?,
            spawn_y: buf.try_read_i32()?,
            spawn_z: buf.try_read_i32()?,
            x: buf.try_read_f32()?,
            y: buf.try_read_f32()?,
            z: buf.try_read_f32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct McpeAddEntity {
    pub entity_id: i32,
    pub entity_type: u8,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub did: i32,
    pub velocity_x: i16,
    pub velocity_y: i16,
    pub velocity_z: i16,
}

impl McpeAddEntity {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_i32(self.entity_id);
        buf.put_u8(self.entity_type);
        buf.put_f32(self.x);
        buf.put_f32(self.y);
        buf.put_f32(self.z);
        buf.put_i32(self.did);
        buf.put_i16(self.velocity_x);
        buf.put_i16(self.velocity_y);
        buf.put_i16(self.velocity_z);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        Ok(McpeAddEntity {
            entity_id: buf.try_read_i32()?,
            entity_type: buf.try_read_u8()?,
            x: buf.try_read_f32()?,
            y: buf.try_read_f32()?,
            z: buf.try_read_f32()?,
            did: buf.try_read_i32()?,
            velocity_x: buf.try_read_i16()?,
            velocity_y: buf.try_read_i16()?,
            velocity_z: buf.try_read_i16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct McpeMovePlayer {
    pub entity_id: i32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub body_yaw: f32,
}

impl McpeMovePlayer {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_i32(self.entity_id);
        buf.put_f32(self.x);
        buf.put_f32(self.y);
        buf.put_f32(self.z);
        buf.put_f32(self.yaw);
        buf.put_f32(self.pitch);
        buf.put_f32(self.body_yaw);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        Ok(McpeMovePlayer {
            entity_id: buf.try_read_i32()?,
            x: buf.try_read_f32()?,
            y: buf.try_read_f32()?,
            z: buf.try_read_f32()?,
            yaw: buf.try_read_f32()?,
            pitch: buf.try_read_f32()?,
            body_yaw: buf.try_read_f32()?,
        })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct McpeTileEvent {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub case1: i32,
    pub case2: i32,
}

impl McpeTileEvent {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_i32(self.x);
        buf.put_i32(self.y);
        buf.put_i32(self.z);
        buf.put_i32(self.case1);
        buf.put_i32(self.case2);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        Ok(McpeTileEvent {
            x: buf.try_read_i32()?,
            y: buf.try_read_i32()?,
            z: buf.try_read_i32()?,
            case1: buf.try_read_i32()?,
            case2: buf.try_read_i32()?,
        })
    }
}

/// Entity metadata is passed through as raw bytes, it runs to the end of the packet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct McpeSetEntityData {
    pub entity_id: i32,
    pub metadata: Bytes,
}

impl McpeSetEntityData {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_i32(self.entity_id);
        buf.put_slice(&self.metadata);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        let entity_id = buf.try_read_i32()?;
        let metadata = buf.copy_to_bytes(buf.remaining());
        Ok(McpeSetEntityData { entity_id, metadata })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct McpeSetSpawnPosition {
    pub x: i32,
    pub z: i32,
    pub y: u8,
}

impl McpeSetSpawnPosition {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_i32(self.x);
        buf.put_i32(self.z);
        buf.put_u8(self.y);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        Ok(McpeSetSpawnPosition {
            x: buf.try_read_i32()?,
            z: buf.try_read_i32()?,
            y: buf.try_read_u8()?,
        })
    }
}

/// serialized [crate::world::chunk_column::ChunkColumn], see [crate::world::chunk_column::ChunkColumn::to_bytes]
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct McpeFullChunkData {
    pub chunk_data: Bytes,
}

impl McpeFullChunkData {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_byte_array(&self.chunk_data);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Self, MalformedPacket> {
        Ok(McpeFullChunkData { chunk_data: buf.try_read_byte_array()? })
    }
}
