//! Navigation mesh construction: voxelization, filtering, region
//! partitioning, contour tracing and polygon mesh generation.
//!
//! The pipeline turns raw triangle geometry into a [`PolyMesh`] and
//! [`PolyMeshDetail`] ready for tile serialization.

mod compact;
mod config;
mod contour;
mod detail;
mod filter;
mod heightfield;
mod pipeline;
mod polymesh;
mod rasterize;
mod region;
mod volume;

pub use compact::{
    BORDER_REGION, CompactCell, CompactHeightfield, CompactSpan, DIR_OFFSET_X, DIR_OFFSET_Z,
    MAX_LAYERS, NOT_CONNECTED,
};
pub use config::{BuildConfig, PartitionKind};
pub use contour::{AREA_BORDER_FLAG, BORDER_VERTEX_FLAG, CONTOUR_REG_MASK, Contour, ContourSet};
pub use detail::{DETAIL_EDGE_BOUNDARY, PolyMeshDetail};
pub use filter::{
    filter_ledge_spans, filter_low_hanging_walkable_obstacles, filter_walkable_low_height_spans,
};
pub use heightfield::{Heightfield, MAX_SPAN_HEIGHT, NULL_AREA, Span, WALKABLE_AREA};
pub use pipeline::{BuildArtifacts, BuildPipeline, InputMesh};
pub use polymesh::{BORDER_EDGE, MAX_VERTS_PER_POLY, MESH_NULL_IDX, PolyMesh};
pub use rasterize::{
    clear_unwalkable_triangles, mark_walkable_triangles, rasterize_triangle, rasterize_triangles,
};
pub use region::{
    build_distance_field, build_layer_regions, build_regions, build_regions_monotone,
    build_regions_watershed,
};
pub use volume::{MAX_SHAPE_VOLUME_VERTS, ShapeVolume, ShapeVolumeKind, ShapeVolumeSet};
