use crate::error::MalformedPacket;
use crate::util::buf_ext::BufExt;
use bytes::{BufMut, Bytes, BytesMut};

pub const CHUNK_WIDTH: usize = 16;
pub const CHUNK_HEIGHT: usize = 128;

const NUM_BLOCKS: usize = CHUNK_WIDTH * CHUNK_HEIGHT * CHUNK_WIDTH;
const NUM_BIOMES: usize = CHUNK_WIDTH * CHUNK_WIDTH;

/// biome ids above this are not known to the client and replaced by 0
pub const MAX_BIOME_ID: u8 = 22;

/// 4 bit values, two per byte, low nibble first
#[derive(Clone, Debug, Eq, PartialEq)]
struct NibbleArray(Vec<u8>);

impl NibbleArray {
    fn new(len: usize) -> NibbleArray {
        NibbleArray(vec![0; len / 2])
    }

    fn get(&self, index: usize) -> u8 {
        let b = self.0[index / 2];
        if index % 2 == 0 {
            b & 0x0f
        }
        else {
            b >> 4
        }
    }

    fn set(&mut self, index: usize, value: u8) {
        let b = &mut self.0[index / 2];
        if index % 2 == 0 {
            *b = (*b & 0xf0) | (value & 0x0f);
        }
        else {
            *b = (*b & 0x0f) | ((value & 0x0f) << 4);
        }
    }

    fn fill(&mut self, value: u8) {
        let value = value & 0x0f;
        self.0.fill(value | (value << 4));
    }
}

/// A 16 x 128 x 16 column of blocks, together with per-block metadata and light levels and a
///  biome per (x, z) position.
///
/// Coordinates are relative to the column and must be in range (`x`, `z` < 16, `y` < 128),
///  they are used as array indexes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChunkColumn {
    pub x: i32,
    pub z: i32,
    blocks: Vec<u8>,
    metadata: NibbleArray,
    block_light: NibbleArray,
    sky_light: NibbleArray,
    biomes: Vec<u8>,
}

impl ChunkColumn {
    /// serialized size: coordinates, blocks, three nibble arrays and biomes
    pub const ENCODED_LEN: usize = 8 + NUM_BLOCKS + 3 * (NUM_BLOCKS / 2) + NUM_BIOMES;

    pub fn new(x: i32, z: i32) -> ChunkColumn {
        ChunkColumn {
            x,
            z,
            blocks: vec![0; NUM_BLOCKS],
            metadata: NibbleArray::new(NUM_BLOCKS),
            block_light: NibbleArray::new(NUM_BLOCKS),
            sky_light: NibbleArray::new(NUM_BLOCKS),
            biomes: vec![0; NUM_BIOMES],
        }
    }

    fn index(x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < CHUNK_WIDTH && y < CHUNK_HEIGHT && z < CHUNK_WIDTH);
        (x * CHUNK_WIDTH * CHUNK_HEIGHT) + (z * CHUNK_HEIGHT) + y
    }

    pub fn block(&self, x: usize, y: usize, z: usize) -> u8 {
        self.blocks[Self::index(x, y, z)]
    }

    pub fn set_block(&mut self, x: usize, y: usize, z: usize, block_id: u8) {
        self.blocks[Self::index(x, y, z)] = block_id;
    }

    pub fn metadata(&self, x: usize, y: usize, z: usize) -> u8 {
        self.metadata.get(Self::index(x, y, z))
    }

    pub fn set_metadata(&mut self, x: usize, y: usize, z: usize, value: u8) {
        self.metadata.set(Self::index(x, y, z), value);
    }

    pub fn block_light(&self, x: usize, y: usize, z: usize) -> u8 {
        self.block_light.get(Self::index(x, y, z))
    }

    pub fn set_block_light(&mut self, x: usize, y: usize, z: usize, value: u8) {
        self.block_light.set(Self::index(x, y, z), value);
    }

    pub fn sky_light(&self, x: usize, y: usize, z: usize) -> u8 {
        self.sky_light.get(Self::index(x, y, z))
    }

    pub fn set_sky_light(&mut self, x: usize, y: usize, z: usize, value: u8) {
        self.sky_light.set(Self::index(x, y, z), value);
    }

    pub fn fill_sky_light(&mut self, value: u8) {
        self.sky_light.fill(value);
    }

    pub fn biome(&self, x: usize, z: usize) -> u8 {
        self.biomes[z * CHUNK_WIDTH + x]
    }

    pub fn set_biome(&mut self, x: usize, z: usize, biome_id: u8) {
        self.biomes[z * CHUNK_WIDTH + x] = sanitize_biome(biome_id);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_LEN);
        buf.put_i32(self.x);
        buf.put_i32(self.z);
        buf.put_slice(&self.blocks);
        buf.put_slice(&self.metadata.0);
        buf.put_slice(&self.block_light.0);
        buf.put_slice(&self.sky_light.0);
        buf.put_slice(&self.biomes);
        buf.freeze()
    }

    pub fn from_bytes(mut buf: &[u8]) -> Result<ChunkColumn, MalformedPacket> {
        if buf.len() != Self::ENCODED_LEN {
            return Err(MalformedPacket::invalid("chunk data length", buf.len() as u64));
        }

        let x = buf.try_read_i32()?;
        let z = buf.try_read_i32()?;
        let blocks = buf.try_read_bytes(NUM_BLOCKS)?.to_vec();
        let metadata = NibbleArray(buf.try_read_bytes(NUM_BLOCKS / 2)?.to_vec());
        let block_light = NibbleArray(buf.try_read_bytes(NUM_BLOCKS / 2)?.to_vec());
        let sky_light = NibbleArray(buf.try_read_bytes(NUM_BLOCKS / 2)?.to_vec());
        let biomes = buf.try_read_bytes(NUM_BIOMES)?
            .iter()
            .map(|&b| sanitize_biome(b))
            .collect();

        Ok(ChunkColumn {
            x,
            z,
            blocks,
            metadata,
            block_light,
            sky_light,
            biomes,
        })
    }
}

fn sanitize_biome(biome_id: u8) -> u8 {
    if biome_id > MAX_BIOME_ID {
        0
    }
    else {
        biome_id
    }
}
