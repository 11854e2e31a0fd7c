//! Dynamic-obstacle variant of the navmesh pipeline: compressed per-tile
//! layers, temporary cylindrical obstacles and incremental rebuilds that
//! hot-swap tiles into a live [`walkway_nav::NavMesh`].

mod cache;
mod codec;
mod layer;

#[cfg(test)]
mod obstacle_tests;

pub use cache::{Obstacle, ObstacleRef, ObstacleState, TileCache, TileCacheParams};
pub use codec::{Lz4Codec, NullCodec, TileCodec};
pub use layer::{LAYER_MAGIC, LAYER_VERSION, TileCacheLayer};
