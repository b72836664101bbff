//! The world as far as the network layer is concerned: chunk columns to send to clients, and
//!  a spawn point. Loading persisted worlds is not part of this crate, there is a flat world
//!  generator and a memoizing wrapper around any provider.

pub mod chunk_column;
pub mod level_info;
pub mod providers;

use chunk_column::ChunkColumn;
#[cfg(test)] use mockall::automock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[cfg_attr(test, automock)]
pub trait WorldProvider: Send + Sync + 'static {
    /// `x` and `z` are chunk coordinates, i.e. block coordinates divided by 16
    fn get_chunk(&self, x: i32, z: i32) -> anyhow::Result<ChunkColumn>;

    fn spawn_point(&self) -> SpawnPoint;
}
