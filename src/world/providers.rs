use crate::world::chunk_column::{ChunkColumn, CHUNK_HEIGHT, CHUNK_WIDTH};
use crate::world::{SpawnPoint, WorldProvider};
use rustc_hash::FxHashMap;
use std::sync::Mutex;
use tracing::{debug, trace};

pub const BEDROCK: u8 = 7;
pub const DIRT: u8 = 3;
pub const GRASS: u8 = 2;

const PLAINS_BIOME: u8 = 1;

/// Generates an endless flat world: bedrock, two layers of dirt and grass on top
#[derive(Default)]
pub struct FlatlandWorldProvider;

impl FlatlandWorldProvider {
    /// the y coordinate of the first air block
    pub const SURFACE_HEIGHT: usize = 4;
}

impl WorldProvider for FlatlandWorldProvider {
    fn get_chunk(&self, x: i32, z: i32) -> anyhow::Result<ChunkColumn> {
        trace!("generating flat chunk {}/{}", x, z);

        let mut chunk = ChunkColumn::new(x, z);
        for bx in 0..CHUNK_WIDTH {
            for bz in 0..CHUNK_WIDTH {
                chunk.set_block(bx, 0, bz, BEDROCK);
                chunk.set_block(bx, 1, bz, DIRT);
                chunk.set_block(bx, 2, bz, DIRT);
                chunk.set_block(bx, 3, bz, GRASS);
                for y in Self::SURFACE_HEIGHT..CHUNK_HEIGHT {
                    chunk.set_sky_light(bx, y, bz, 15);
                }
                chunk.set_biome(bx, bz, PLAINS_BIOME);
            }
        }
        Ok(chunk)
    }

    fn spawn_point(&self) -> SpawnPoint {
        // +2 for the player's head
        SpawnPoint {
            x: 8.0,
            y: (Self::SURFACE_HEIGHT + 2).min(CHUNK_HEIGHT - 1) as f32,
            z: 8.0,
        }
    }
}

/// Memoizes the chunks of another provider. Nothing is ever evicted.
pub struct CachingWorldProvider<P: WorldProvider> {
    inner: P,
    cache: Mutex<FxHashMap<(i32, i32), ChunkColumn>>,
}

impl<P: WorldProvider> CachingWorldProvider<P> {
    pub fn new(inner: P) -> CachingWorldProvider<P> {
        CachingWorldProvider {
            inner,
            cache: Default::default(),
        }
    }

    pub fn num_cached(&self) -> usize {
        match self.cache.lock() {
            Ok(cache) => cache.len(),
            Err(e) => e.into_inner().len(),
        }
    }
}

impl<P: WorldProvider> WorldProvider for CachingWorldProvider<P> {
    fn get_chunk(&self, x: i32, z: i32) -> anyhow::Result<ChunkColumn> {
        let mut cache = match self.cache.lock() {
            Ok(cache) => cache,
            Err(e) => e.into_inner(),
        };

        if let Some(chunk) = cache.get(&(x, z)) {
            return Ok(chunk.clone());
        }

        debug!("chunk {}/{} not cached, loading", x, z);
        let chunk = self.inner.get_chunk(x, z)?;
        cache.insert((x, z), chunk.clone());
        Ok(chunk)
    }

    fn spawn_point(&self) -> SpawnPoint {
        self.inner.spawn_point()
    }
}
