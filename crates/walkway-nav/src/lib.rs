//! Runtime navigation mesh: tile serialization, the tiled polygon graph,
//! reachability groups, traverse links and the query engine.

mod builder;
mod disjoint_set;
mod format;
mod groups;
mod mesh;
mod node_pool;
mod query;
mod status;
mod tile;
mod traverse;

#[cfg(test)]
mod scenario_tests;

pub use builder::{OffMeshConnectionDef, TileBuildParams, build_tile_data};
pub use disjoint_set::DisjointSet;
pub use format::{
    CACHE_SET_MAGIC, CACHE_SET_VERSION, NAVMESH_MAGIC, NAVMESH_SET_MAGIC, NAVMESH_SET_VERSION,
    NAVMESH_VERSION, decode_tile_data, load_nav_mesh, save_nav_mesh,
};
pub use groups::{
    FIRST_USABLE_POLY_GROUP, MIN_POLY_GROUP_COUNT, NULL_POLY_GROUP, STRAY_POLY_GROUP,
    TraversalCaps, TraversalClass, build_poly_groups, build_traversal_tables, is_group_reachable,
    traversal_table_size,
};
pub use mesh::{NavMesh, NavMeshParams};
pub use node_pool::{NULL_NODE, Node, NodeFlags, NodePool, NodeQueue};
pub use query::{NavMeshQuery, RaycastHit, SlicedState};
pub use status::{Status, StatusDetail};
pub use tile::{
    BvNode, Link, MeshTile, NULL_LINK, NULL_TRAVERSE_TYPE, OffMeshConnection, Poly, PolyDetail,
    PolyType, TileHeader,
};
pub use traverse::{
    LineOfSight, TraverseTable, TraverseTypeDef, connect_traverse_links,
    quantize_traverse_distance,
};

use bitflags::bitflags;

/// Maximum vertices per navigation polygon.
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Number of bits in a [`PolyRef`] addressing the polygon within its tile.
pub const POLY_BITS: u32 = 16;
/// Number of bits addressing the tile.
pub const TILE_BITS: u32 = 10;
/// Number of bits carrying the tile salt.
pub const SALT_BITS: u32 = 6;

const POLY_MASK: u32 = (1 << POLY_BITS) - 1;
const TILE_MASK: u32 = (1 << TILE_BITS) - 1;
const SALT_MASK: u32 = (1 << SALT_BITS) - 1;

/// Packed, generation-checked reference to a polygon.
///
/// Layout: `salt | tile id | poly index`. Tile ids are 1-based so that a
/// fully-zero reference is never valid. A stale reference (salt mismatch
/// after tile removal) resolves to "no tile" instead of dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyRef(u32);

impl PolyRef {
    /// The null reference.
    pub const NULL: PolyRef = PolyRef(0);

    /// Wraps a raw id.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Packs salt, 1-based tile id and polygon index.
    pub const fn encode(salt: u32, tile_id: u32, poly: u32) -> Self {
        Self(
            ((salt & SALT_MASK) << (POLY_BITS + TILE_BITS))
                | ((tile_id & TILE_MASK) << POLY_BITS)
                | (poly & POLY_MASK),
        )
    }

    /// Raw id.
    pub const fn id(&self) -> u32 {
        self.0
    }

    /// True for the null reference.
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Salt component.
    pub const fn salt(&self) -> u32 {
        (self.0 >> (POLY_BITS + TILE_BITS)) & SALT_MASK
    }

    /// 1-based tile id component.
    pub const fn tile_id(&self) -> u32 {
        (self.0 >> POLY_BITS) & TILE_MASK
    }

    /// Polygon index component.
    pub const fn poly(&self) -> u32 {
        self.0 & POLY_MASK
    }
}

bitflags! {
    /// Polygon ability flags matched against query filters.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct PolyFlags: u16 {
        /// Plain walking.
        const WALK = 0x01;
        /// Swimming through water areas.
        const SWIM = 0x02;
        /// Opening a door on the way.
        const DOOR = 0x04;
        /// Jump/traverse actions.
        const JUMP = 0x08;
        /// Temporarily blocked (tile-cache obstacles toggle this).
        const DISABLED = 0x10;
        /// Everything.
        const ALL = 0xffff;
    }
}

/// Filter applied to every polygon a query may enter.
#[derive(Debug, Clone)]
pub struct QueryFilter {
    /// A polygon must share at least one of these flags.
    pub include_flags: PolyFlags,
    /// A polygon must share none of these flags.
    pub exclude_flags: PolyFlags,
    /// Traversal cost multiplier per area id.
    pub area_cost: [f32; 64],
    /// Movement-capability class index selecting the traversal table.
    pub capability: u8,
    /// The capability class itself; traverse links whose type the class
    /// cannot perform are skipped during search. `None` allows every link.
    pub traversal: Option<TraversalClass>,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            include_flags: PolyFlags::ALL,
            exclude_flags: PolyFlags::DISABLED,
            area_cost: [1.0; 64],
            capability: 0,
            traversal: None,
        }
    }
}

impl QueryFilter {
    /// Whether the filter lets a query enter the polygon.
    #[inline]
    pub fn passes(&self, poly: &Poly) -> bool {
        poly.flags.intersects(self.include_flags) && !poly.flags.intersects(self.exclude_flags)
    }

    /// Whether the filter lets a query take a link.
    #[inline]
    pub fn passes_link(&self, link: &Link) -> bool {
        if !link.is_traverse() {
            return true;
        }
        match &self.traversal {
            Some(class) => class.can_traverse(link.traverse_type),
            None => true,
        }
    }

    /// Cost of moving between two points across a polygon.
    #[inline]
    pub fn cost(&self, from: glam::Vec3, to: glam::Vec3, area: u8) -> f32 {
        from.distance(to) * self.area_cost[(area & 0x3f) as usize]
    }
}
