//! Tile-resident data structures of the navigation mesh.

use glam::Vec3;

use crate::{MAX_VERTS_PER_POLY, PolyFlags, PolyRef};

/// Marker for the end of a link list.
pub const NULL_LINK: u32 = 0xffff_ffff;

/// Traverse type of a plain (non-traverse) link.
pub const NULL_TRAVERSE_TYPE: u8 = 0xff;

/// Polygon kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum PolyType {
    /// Regular walkable polygon.
    #[default]
    Ground = 0,
    /// Two-vertex off-mesh connection polygon.
    OffMeshConnection = 1,
}

/// One directed edge of the polygon graph.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Link {
    /// Polygon this link leads to.
    pub target: PolyRef,
    /// Next link of the owning polygon, [`NULL_LINK`] terminated.
    pub next: u32,
    /// Edge index on the owning polygon.
    pub edge: u8,
    /// Border side for cross-tile links, `0xff` for internal ones.
    pub side: u8,
    /// Sub-edge range start for cross-tile links (0-255 along the edge).
    pub bmin: u8,
    /// Sub-edge range end for cross-tile links.
    pub bmax: u8,
    /// Traverse action type, [`NULL_TRAVERSE_TYPE`] for walk links.
    pub traverse_type: u8,
    /// Quantized traverse distance bucket.
    pub traverse_dist: u8,
    /// Index of the opposite-direction traverse link, [`NULL_LINK`] if
    /// there is none.
    pub reverse_link: u32,
}

impl Link {
    /// A plain walk link.
    pub fn new(target: PolyRef, edge: u8, side: u8) -> Self {
        Self {
            target,
            next: NULL_LINK,
            edge,
            side,
            bmin: 0,
            bmax: 255,
            traverse_type: NULL_TRAVERSE_TYPE,
            traverse_dist: 0,
            reverse_link: NULL_LINK,
        }
    }

    /// Whether this is a jump/climb traverse link.
    pub fn is_traverse(&self) -> bool {
        self.traverse_type != NULL_TRAVERSE_TYPE
    }
}

/// One navigation polygon.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Poly {
    /// Head of the link list, [`NULL_LINK`] terminated.
    pub first_link: u32,
    /// Vertex indices into the tile vertex array.
    pub verts: [u16; MAX_VERTS_PER_POLY],
    /// Neighbor table: 0 none, `0x8000 | side` tile border, else poly
    /// index + 1 within the tile.
    pub neighbors: [u16; MAX_VERTS_PER_POLY],
    /// Ability flags.
    pub flags: PolyFlags,
    /// Number of used vertices.
    pub vert_count: u8,
    /// Area id.
    pub area: u8,
    /// Polygon kind.
    pub poly_type: PolyType,
    /// Reachability group, assigned by the reachability builder.
    pub group_id: u16,
}

impl Poly {
    /// Creates an empty polygon.
    pub fn new(area: u8, poly_type: PolyType, flags: PolyFlags) -> Self {
        Self {
            first_link: NULL_LINK,
            verts: [0; MAX_VERTS_PER_POLY],
            neighbors: [0; MAX_VERTS_PER_POLY],
            flags,
            vert_count: 0,
            area,
            poly_type,
            group_id: 0,
        }
    }
}

/// Detail sub-mesh record of one polygon.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyDetail {
    /// First extra vertex in the tile detail vertex array.
    pub vert_base: u32,
    /// First triangle in the tile detail triangle array.
    pub tri_base: u32,
    /// Number of extra vertices.
    pub vert_count: u8,
    /// Number of triangles.
    pub tri_count: u8,
}

/// Quantized bounding-volume tree node.
///
/// `i >= 0` is a leaf holding a polygon index; `i < 0` is an internal node
/// whose negated value is the escape index for skip traversal.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BvNode {
    /// Quantized minimum bounds.
    pub bmin: [u16; 3],
    /// Quantized maximum bounds.
    pub bmax: [u16; 3],
    /// Leaf polygon index or negated escape index.
    pub i: i32,
}

/// Author-placed point-to-point connection record.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct OffMeshConnection {
    /// Start and end positions.
    pub pos: [Vec3; 2],
    /// Reference position used for agent alignment when entering.
    pub ref_pos: Vec3,
    /// Endpoint search radius.
    pub radius: f32,
    /// Yaw the agent faces while traversing.
    pub yaw: f32,
    /// Index of the connection polygon inside the owning tile.
    pub poly: u16,
    /// Ability flags.
    pub flags: PolyFlags,
    /// 8-way border code of the end point, `0xff` when inside the tile.
    pub side: u8,
    /// Area id.
    pub area: u8,
    /// Whether the connection can be traversed both ways.
    pub bidirectional: bool,
    /// Jump/traverse action type.
    pub jump_type: u8,
    /// Host-defined id.
    pub user_id: u32,
}

/// Decoded per-tile header.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TileHeader {
    /// Tile grid position.
    pub x: i32,
    /// Tile grid position.
    pub y: i32,
    /// Vertical layer.
    pub layer: i32,
    /// Host-defined id.
    pub user_id: u32,
    /// Number of polygons (off-mesh connection polys included).
    pub poly_count: i32,
    /// Number of vertices.
    pub vert_count: i32,
    /// Link capacity the tile was sized for.
    pub max_link_count: i32,
    /// Number of detail sub-meshes.
    pub detail_mesh_count: i32,
    /// Number of extra detail vertices.
    pub detail_vert_count: i32,
    /// Number of detail triangles.
    pub detail_tri_count: i32,
    /// Number of BV-tree nodes.
    pub bv_node_count: i32,
    /// Number of off-mesh connection records.
    pub off_mesh_con_count: i32,
    /// Index of the first off-mesh connection polygon.
    pub off_mesh_base: i32,
    /// Agent clearance the tile was built with, world units.
    pub walkable_height: f32,
    /// Agent radius, world units.
    pub walkable_radius: f32,
    /// Agent climb, world units.
    pub walkable_climb: f32,
    /// Tile bounds.
    pub bmin: Vec3,
    /// Tile bounds.
    pub bmax: Vec3,
    /// Quantization factor of the BV-tree.
    pub bv_quant_factor: f32,
}

/// One resident tile of the navigation mesh.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct MeshTile {
    /// Generation counter baked into refs handed out for this slot.
    pub salt: u32,
    /// Decoded header; `None` for an empty slot.
    pub header: Option<TileHeader>,
    /// Polygons.
    pub polys: Vec<Poly>,
    /// Vertices.
    pub verts: Vec<Vec3>,
    /// Link pool; lists are threaded through `Link::next`.
    pub links: Vec<Link>,
    /// Detail sub-mesh table.
    pub detail_meshes: Vec<PolyDetail>,
    /// Extra detail vertices.
    pub detail_verts: Vec<Vec3>,
    /// Detail triangles with edge flags.
    pub detail_tris: Vec<[u8; 4]>,
    /// BV-tree nodes.
    pub bv_tree: Vec<BvNode>,
    /// Off-mesh connection records.
    pub off_mesh_cons: Vec<OffMeshConnection>,
    /// The serialized blob this tile was decoded from.
    pub data: Vec<u8>,
}

impl MeshTile {
    /// Appends a link to a polygon's list and returns its index.
    pub fn add_link(&mut self, poly: usize, link: Link) -> u32 {
        let idx = self.links.len() as u32;
        let mut link = link;
        link.next = self.polys[poly].first_link;
        self.links.push(link);
        self.polys[poly].first_link = idx;
        idx
    }

    /// Iterates the link indices of a polygon.
    pub fn poly_links(&self, poly: usize) -> PolyLinkIter<'_> {
        PolyLinkIter {
            tile: self,
            cur: self.polys[poly].first_link,
        }
    }

    /// World-space vertices of one polygon.
    pub fn poly_vertices(&self, poly: &Poly) -> Vec<Vec3> {
        poly.verts[..poly.vert_count as usize]
            .iter()
            .map(|&v| self.verts[v as usize])
            .collect()
    }

    /// Centroid of one polygon.
    pub fn poly_center(&self, poly: &Poly) -> Vec3 {
        let n = poly.vert_count as usize;
        let mut c = Vec3::ZERO;
        for &v in &poly.verts[..n] {
            c += self.verts[v as usize];
        }
        c / n.max(1) as f32
    }
}

/// Iterator over a polygon's link indices.
pub struct PolyLinkIter<'a> {
    tile: &'a MeshTile,
    cur: u32,
}

impl Iterator for PolyLinkIter<'_> {
    type Item = (u32, Link);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == NULL_LINK {
            return None;
        }
        let idx = self.cur;
        let link = self.tile.links[idx as usize];
        self.cur = link.next;
        Some((idx, link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_list_threading() {
        let mut tile = MeshTile {
            polys: vec![Poly::new(0, PolyType::Ground, PolyFlags::WALK)],
            ..Default::default()
        };
        let a = tile.add_link(0, Link::new(PolyRef::new(10), 0, 0xff));
        let b = tile.add_link(0, Link::new(PolyRef::new(20), 1, 0xff));
        assert_eq!(tile.polys[0].first_link, b);
        let targets: Vec<u32> = tile.poly_links(0).map(|(_, l)| l.target.id()).collect();
        assert_eq!(targets, vec![20, 10]);
        assert_eq!(tile.links[a as usize].next, NULL_LINK);
    }

    #[test]
    fn test_poly_center() {
        let tile = MeshTile {
            verts: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(2.0, 0.0, 0.0),
                Vec3::new(2.0, 0.0, 2.0),
                Vec3::new(0.0, 0.0, 2.0),
            ],
            ..Default::default()
        };
        let mut poly = Poly::new(0, PolyType::Ground, PolyFlags::WALK);
        poly.verts[..4].copy_from_slice(&[0, 1, 2, 3]);
        poly.vert_count = 4;
        assert_eq!(tile.poly_center(&poly), Vec3::new(1.0, 0.0, 1.0));
    }
}
