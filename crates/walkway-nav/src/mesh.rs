//! The tiled navigation mesh: a salted tile arena plus the link wiring
//! that stitches tiles into one graph.

use glam::Vec3;
use std::collections::HashMap;

use walkway_common::{opposite_side, overlap_quant_bounds};

use crate::format::decode_tile_data;
use crate::status::{Status, StatusDetail};
use crate::tile::{Link, MeshTile, NULL_LINK, PolyType};
use crate::{PolyRef, QueryFilter, TILE_BITS};

/// Offsets from a tile to its neighbor for each 8-way side code.
const SIDE_OFFSET: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Global layout parameters of a tiled mesh.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshParams {
    /// World-space origin of the tile grid.
    pub origin: Vec3,
    /// Width of one tile along x.
    pub tile_width: f32,
    /// Depth of one tile along z.
    pub tile_height: f32,
    /// Number of tile slots.
    pub max_tiles: i32,
    /// Upper bound on polygons per tile.
    pub max_polys: i32,
}

/// Tiled polygon graph with reachability annotations.
#[derive(Debug)]
pub struct NavMesh {
    params: NavMeshParams,
    tiles: Vec<MeshTile>,
    pos_lookup: HashMap<(i32, i32, i32), usize>,
    free_slots: Vec<usize>,
    poly_group_count: u16,
    traversal_tables: Vec<Vec<u32>>,
    traversal_table_size: usize,
}

impl NavMesh {
    /// Creates an empty mesh.
    pub fn new(params: NavMeshParams) -> Result<Self, Status> {
        if params.max_tiles <= 0 || params.max_tiles > (1 << TILE_BITS) {
            return Err(Status::failure(StatusDetail::InvalidParam));
        }
        if params.tile_width <= 0.0 || params.tile_height <= 0.0 {
            return Err(Status::failure(StatusDetail::InvalidParam));
        }
        let max_tiles = params.max_tiles as usize;
        let mut tiles = Vec::with_capacity(max_tiles);
        for _ in 0..max_tiles {
            tiles.push(MeshTile {
                salt: 1,
                ..Default::default()
            });
        }
        Ok(Self {
            params,
            tiles,
            pos_lookup: HashMap::new(),
            free_slots: (0..max_tiles).rev().collect(),
            poly_group_count: 0,
            traversal_tables: Vec::new(),
            traversal_table_size: 0,
        })
    }

    /// Layout parameters.
    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    /// Number of tile slots.
    pub fn max_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Tile grid cell containing a world position.
    pub fn calc_tile_loc(&self, pos: Vec3) -> (i32, i32) {
        (
            ((pos.x - self.params.origin.x) / self.params.tile_width).floor() as i32,
            ((pos.z - self.params.origin.z) / self.params.tile_height).floor() as i32,
        )
    }

    /// Resident tiles with their base refs.
    pub fn resident_tiles(&self) -> impl Iterator<Item = (PolyRef, &MeshTile)> {
        self.tiles.iter().enumerate().filter_map(|(i, t)| {
            t.header
                .as_ref()
                .map(|_| (PolyRef::encode(t.salt, i as u32 + 1, 0), t))
        })
    }

    /// Base reference of a tile slot (poly index zero).
    pub fn tile_ref(&self, tile_idx: usize) -> PolyRef {
        PolyRef::encode(self.tiles[tile_idx].salt, tile_idx as u32 + 1, 0)
    }

    /// Shared access to a tile slot.
    pub fn tile(&self, tile_idx: usize) -> Option<&MeshTile> {
        let tile = self.tiles.get(tile_idx)?;
        tile.header.as_ref().map(|_| tile)
    }

    /// Tile at a grid location.
    pub fn tile_at(&self, x: i32, y: i32, layer: i32) -> Option<usize> {
        self.pos_lookup.get(&(x, y, layer)).copied()
    }

    /// Every resident layer at a grid location.
    pub fn tiles_at(&self, x: i32, y: i32) -> Vec<usize> {
        let mut out = Vec::new();
        for (&(tx, ty, _), &idx) in &self.pos_lookup {
            if tx == x && ty == y {
                out.push(idx);
            }
        }
        out
    }

    /// Resolves a reference to tile and polygon indices, failing safely on
    /// stale salts and out-of-range ids.
    pub fn resolve(&self, r: PolyRef) -> Option<(usize, usize)> {
        if r.is_null() {
            return None;
        }
        let tile_id = r.tile_id();
        if tile_id == 0 {
            return None;
        }
        let tile_idx = (tile_id - 1) as usize;
        let tile = self.tiles.get(tile_idx)?;
        if tile.salt != r.salt() || tile.header.is_none() {
            return None;
        }
        let poly_idx = r.poly() as usize;
        if poly_idx >= tile.polys.len() {
            return None;
        }
        Some((tile_idx, poly_idx))
    }

    /// Whether a reference is live.
    pub fn is_valid_poly_ref(&self, r: PolyRef) -> bool {
        self.resolve(r).is_some()
    }

    /// Tile and polygon for a reference.
    pub fn get_tile_and_poly(&self, r: PolyRef) -> Option<(&MeshTile, &crate::tile::Poly)> {
        let (t, p) = self.resolve(r)?;
        let tile = &self.tiles[t];
        Some((tile, &tile.polys[p]))
    }

    /// Sets the ability flags of one polygon.
    pub fn set_poly_flags(&mut self, r: PolyRef, flags: crate::PolyFlags) -> Status {
        match self.resolve(r) {
            Some((t, p)) => {
                self.tiles[t].polys[p].flags = flags;
                Status::success()
            }
            None => Status::failure(StatusDetail::InvalidParam),
        }
    }

    /// Ability flags of one polygon.
    pub fn poly_flags(&self, r: PolyRef) -> Result<crate::PolyFlags, Status> {
        self.get_tile_and_poly(r)
            .map(|(_, p)| p.flags)
            .ok_or(Status::failure(StatusDetail::InvalidParam))
    }

    /// Adds a serialized tile to the mesh and wires its links.
    pub fn add_tile(&mut self, data: Vec<u8>) -> Result<PolyRef, Status> {
        if data.len() >= 8 {
            let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
            if magic != crate::format::NAVMESH_MAGIC {
                return Err(Status::failure(StatusDetail::WrongMagic));
            }
            if version != crate::format::NAVMESH_VERSION {
                return Err(Status::failure(StatusDetail::WrongVersion));
            }
        }
        let decoded =
            decode_tile_data(&data).map_err(|_| Status::failure(StatusDetail::InvalidParam))?;
        let header = decoded.header.clone().expect("decoded tile has a header");

        if header.poly_count > self.params.max_polys {
            return Err(Status::failure(StatusDetail::InvalidParam));
        }
        let loc = (header.x, header.y, header.layer);
        if self.pos_lookup.contains_key(&loc) {
            return Err(Status::failure(StatusDetail::AlreadyExists));
        }
        let Some(slot) = self.free_slots.pop() else {
            return Err(Status::failure(StatusDetail::OutOfTiles));
        };

        let salt = self.tiles[slot].salt;
        self.tiles[slot] = MeshTile { salt, ..decoded };
        self.pos_lookup.insert(loc, slot);

        self.connect_int_links(slot);
        self.base_off_mesh_links(slot);
        // Connections whose end point stays inside this tile.
        self.connect_ext_off_mesh_links(slot, slot, 0xff);

        // Stitch to neighbors on all 8 sides.
        for side in 0..8u8 {
            let (dx, dz) = SIDE_OFFSET[side as usize];
            let neighbors: Vec<usize> = self
                .pos_lookup
                .iter()
                .filter(|&(&(tx, ty, _), _)| tx == header.x + dx && ty == header.y + dz)
                .map(|(_, &idx)| idx)
                .collect();
            for n in neighbors {
                self.connect_ext_links(slot, n, side);
                self.connect_ext_links(n, slot, opposite_side(side));
                self.connect_ext_off_mesh_links(slot, n, side);
                self.connect_ext_off_mesh_links(n, slot, opposite_side(side));
            }
        }

        Ok(self.tile_ref(slot))
    }

    /// Removes a tile, invalidating every reference into it. Returns the
    /// original blob.
    pub fn remove_tile(&mut self, r: PolyRef) -> Result<Vec<u8>, Status> {
        let tile_id = r.tile_id();
        if tile_id == 0 {
            return Err(Status::failure(StatusDetail::InvalidParam));
        }
        let tile_idx = (tile_id - 1) as usize;
        if tile_idx >= self.tiles.len()
            || self.tiles[tile_idx].salt != r.salt()
            || self.tiles[tile_idx].header.is_none()
        {
            return Err(Status::failure(StatusDetail::InvalidParam));
        }

        // Drop cross-tile links pointing into the removed tile.
        let removed_tile_id = tile_idx as u32 + 1;
        for other in 0..self.tiles.len() {
            if other == tile_idx || self.tiles[other].header.is_none() {
                continue;
            }
            Self::unlink_tile_refs(&mut self.tiles[other], removed_tile_id);
        }

        let header = self.tiles[tile_idx].header.clone().unwrap();
        self.pos_lookup
            .remove(&(header.x, header.y, header.layer));

        let old = std::mem::take(&mut self.tiles[tile_idx]);
        self.tiles[tile_idx].salt = (old.salt + 1) & ((1 << crate::SALT_BITS) - 1);
        if self.tiles[tile_idx].salt == 0 {
            self.tiles[tile_idx].salt = 1;
        }
        self.free_slots.push(tile_idx);
        Ok(old.data)
    }

    fn unlink_tile_refs(tile: &mut MeshTile, target_tile_id: u32) {
        for p in 0..tile.polys.len() {
            let mut cur = tile.polys[p].first_link;
            let mut prev = NULL_LINK;
            while cur != NULL_LINK {
                let link = tile.links[cur as usize];
                if link.target.tile_id() == target_tile_id {
                    if prev == NULL_LINK {
                        tile.polys[p].first_link = link.next;
                    } else {
                        tile.links[prev as usize].next = link.next;
                    }
                } else {
                    prev = cur;
                }
                cur = link.next;
            }
        }
    }

    fn connect_int_links(&mut self, tile_idx: usize) {
        let salt = self.tiles[tile_idx].salt;
        let tile_id = tile_idx as u32 + 1;
        let poly_count = self.tiles[tile_idx].polys.len();
        for p in 0..poly_count {
            let poly = self.tiles[tile_idx].polys[p].clone();
            if poly.poly_type == PolyType::OffMeshConnection {
                continue;
            }
            for j in (0..poly.vert_count as usize).rev() {
                let nei = poly.neighbors[j];
                if nei == 0 || nei & 0x8000 != 0 {
                    continue;
                }
                let target = PolyRef::encode(salt, tile_id, (nei - 1) as u32);
                self.tiles[tile_idx].add_link(p, Link::new(target, j as u8, 0xff));
            }
        }
    }

    fn base_off_mesh_links(&mut self, tile_idx: usize) {
        let salt = self.tiles[tile_idx].salt;
        let tile_id = tile_idx as u32 + 1;
        let con_count = self.tiles[tile_idx].off_mesh_cons.len();

        for c in 0..con_count {
            let con = self.tiles[tile_idx].off_mesh_cons[c].clone();
            let con_poly = con.poly as usize;
            let half_extents = Vec3::new(con.radius, self.default_climb(tile_idx), con.radius);

            let Some((land_poly, nearest)) =
                self.nearest_poly_in_tile(tile_idx, con.pos[0], half_extents)
            else {
                continue;
            };
            // Reject when the landing point is farther than the radius.
            if walkway_common::dist_sqr_2d(nearest, con.pos[0]) > con.radius * con.radius {
                continue;
            }

            // Snap the connection start vertex onto the mesh.
            let v0 = self.tiles[tile_idx].polys[con_poly].verts[0] as usize;
            self.tiles[tile_idx].verts[v0] = nearest;

            let con_ref = PolyRef::encode(salt, tile_id, con_poly as u32);
            let land_ref = PolyRef::encode(salt, tile_id, land_poly as u32);
            self.tiles[tile_idx]
                .add_link(con_poly, Link::new(land_ref, 0, 0xff));
            self.tiles[tile_idx]
                .add_link(land_poly, Link::new(con_ref, 0xff, 0xff));
        }
    }

    fn default_climb(&self, tile_idx: usize) -> f32 {
        self.tiles[tile_idx]
            .header
            .as_ref()
            .map(|h| h.walkable_climb)
            .unwrap_or(0.5)
    }

    /// Connects border-portal edges from `tile_idx` toward `target_idx`.
    fn connect_ext_links(&mut self, tile_idx: usize, target_idx: usize, side: u8) {
        if side & 1 != 0 {
            // Diagonal sides carry no portal edges.
            return;
        }
        let climb = self.default_climb(tile_idx);
        let target_salt = self.tiles[target_idx].salt;
        let target_id = target_idx as u32 + 1;

        let poly_count = self.tiles[tile_idx].polys.len();
        for p in 0..poly_count {
            let poly = self.tiles[tile_idx].polys[p].clone();
            if poly.poly_type == PolyType::OffMeshConnection {
                continue;
            }
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                if poly.neighbors[j] != 0x8000 | side as u16 {
                    continue;
                }
                let va = self.tiles[tile_idx].verts[poly.verts[j] as usize];
                let vb = self.tiles[tile_idx].verts[poly.verts[(j + 1) % nv] as usize];

                // Collect overlapping portal edges on the opposite side of
                // the target tile.
                let matches =
                    self.find_connecting_edges(target_idx, va, vb, opposite_side(side), climb);
                for (tp, tmin, tmax) in matches {
                    let target = PolyRef::encode(target_salt, target_id, tp as u32);
                    let mut link = Link::new(target, j as u8, side);
                    link.bmin = (tmin * 255.0) as u8;
                    link.bmax = (tmax * 255.0).min(255.0) as u8;
                    self.tiles[tile_idx].add_link(p, link);
                }
            }
        }
    }

    /// Portal edges of `tile_idx` on `side` overlapping the segment
    /// (va, vb). Returns (poly index, overlap range on (va, vb)).
    fn find_connecting_edges(
        &self,
        tile_idx: usize,
        va: Vec3,
        vb: Vec3,
        side: u8,
        climb: f32,
    ) -> Vec<(usize, f32, f32)> {
        let tile = &self.tiles[tile_idx];
        let along_x = side == 2 || side == 6; // Edge runs along the x axis.
        let (amin, amax) = slab_interval(va, vb, along_x);
        let ay = (va.y + vb.y) * 0.5;

        let mut out = Vec::new();
        for (p, poly) in tile.polys.iter().enumerate() {
            if poly.poly_type == PolyType::OffMeshConnection {
                continue;
            }
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                if poly.neighbors[j] != 0x8000 | side as u16 {
                    continue;
                }
                let ua = tile.verts[poly.verts[j] as usize];
                let ub = tile.verts[poly.verts[(j + 1) % nv] as usize];
                let (bmin, bmax) = slab_interval(ua, ub, along_x);
                let by = (ua.y + ub.y) * 0.5;

                let omin = amin.max(bmin);
                let omax = amax.min(bmax);
                if omin >= omax {
                    continue;
                }
                if (ay - by).abs() > climb.max(0.5) {
                    continue;
                }
                // Parametric overlap range on the querying edge.
                let denom = (amax - amin).max(1e-6);
                let tmin = ((omin - amin) / denom).clamp(0.0, 1.0);
                let tmax = ((omax - amin) / denom).clamp(0.0, 1.0);
                out.push((p, tmin, tmax));
                break;
            }
        }
        out
    }

    /// Links off-mesh connections of `tile_idx` whose end point lands in
    /// `target_idx`.
    fn connect_ext_off_mesh_links(&mut self, tile_idx: usize, target_idx: usize, side: u8) {
        let con_count = self.tiles[tile_idx].off_mesh_cons.len();
        let salt = self.tiles[tile_idx].salt;
        let tile_id = tile_idx as u32 + 1;
        let target_salt = self.tiles[target_idx].salt;
        let target_id = target_idx as u32 + 1;

        for c in 0..con_count {
            let con = self.tiles[tile_idx].off_mesh_cons[c].clone();
            if con.side != side {
                continue;
            }
            let climb = self.default_climb(target_idx);
            let half_extents = Vec3::new(con.radius, climb, con.radius);
            let Some((land_poly, nearest)) =
                self.nearest_poly_in_tile(target_idx, con.pos[1], half_extents)
            else {
                continue;
            };
            if walkway_common::dist_sqr_2d(nearest, con.pos[1]) > con.radius * con.radius {
                continue;
            }

            // Snap the end vertex.
            let con_poly = con.poly as usize;
            let v1 = self.tiles[tile_idx].polys[con_poly].verts[1] as usize;
            self.tiles[tile_idx].verts[v1] = nearest;

            let land_ref = PolyRef::encode(target_salt, target_id, land_poly as u32);
            let con_ref = PolyRef::encode(salt, tile_id, con_poly as u32);
            self.tiles[tile_idx]
                .add_link(con_poly, Link::new(land_ref, 1, side));
            if con.bidirectional {
                let back_side = if side == 0xff { 0xff } else { opposite_side(side) };
                self.tiles[target_idx]
                    .add_link(land_poly, Link::new(con_ref, 0xff, back_side));
            }
        }
    }

    /// Nearest polygon to a point within a tile, brute force over the
    /// tile's ground polygons.
    pub fn nearest_poly_in_tile(
        &self,
        tile_idx: usize,
        center: Vec3,
        half_extents: Vec3,
    ) -> Option<(usize, Vec3)> {
        let qmin = center - half_extents;
        let qmax = center + half_extents;

        let mut best: Option<(usize, Vec3, f32)> = None;
        for p in self.query_polygons_in_tile(tile_idx, qmin, qmax) {
            let (closest, _) = self.closest_point_on_poly_in_tile(tile_idx, p, center);
            let d = (closest - center).length_squared();
            if best.map(|(_, _, bd)| d < bd).unwrap_or(true) {
                best = Some((p, closest, d));
            }
        }
        best.map(|(p, c, _)| (p, c))
    }

    /// Polygons of a tile overlapping a box, walking the BV-tree with its
    /// escape indices.
    pub fn query_polygons_in_tile(&self, tile_idx: usize, qmin: Vec3, qmax: Vec3) -> Vec<usize> {
        let tile = &self.tiles[tile_idx];
        let Some(header) = tile.header.as_ref() else {
            return Vec::new();
        };
        let mut out = Vec::new();

        if !tile.bv_tree.is_empty() {
            let factor = header.bv_quant_factor;
            let quantize = |v: Vec3| -> [u16; 3] {
                [
                    (((v.x - header.bmin.x) * factor).clamp(0.0, 65535.0)) as u16,
                    (((v.y - header.bmin.y) * factor).clamp(0.0, 65535.0)) as u16,
                    (((v.z - header.bmin.z) * factor).clamp(0.0, 65535.0)) as u16,
                ]
            };
            let qbmin = quantize(qmin.max(header.bmin));
            let qbmax = quantize(qmax.min(header.bmax));

            let mut i = 0usize;
            while i < tile.bv_tree.len() {
                let node = tile.bv_tree[i];
                let overlap = overlap_quant_bounds(qbmin, qbmax, node.bmin, node.bmax);
                let is_leaf = node.i >= 0;
                if is_leaf && overlap {
                    out.push(node.i as usize);
                }
                if overlap || is_leaf {
                    i += 1;
                } else {
                    i += (-node.i) as usize;
                }
            }
        } else {
            for (p, poly) in tile.polys.iter().enumerate() {
                if poly.poly_type == PolyType::OffMeshConnection {
                    continue;
                }
                let mut pmin = Vec3::splat(f32::MAX);
                let mut pmax = Vec3::splat(f32::MIN);
                for &v in &poly.verts[..poly.vert_count as usize] {
                    let v = tile.verts[v as usize];
                    pmin = pmin.min(v);
                    pmax = pmax.max(v);
                }
                if walkway_common::overlap_bounds(qmin, qmax, pmin, pmax) {
                    out.push(p);
                }
            }
        }
        out
    }

    /// Closest point on a polygon plus whether the position projects onto
    /// it from above.
    pub fn closest_point_on_poly_in_tile(
        &self,
        tile_idx: usize,
        poly_idx: usize,
        pos: Vec3,
    ) -> (Vec3, bool) {
        let tile = &self.tiles[tile_idx];
        let poly = &tile.polys[poly_idx];

        if poly.poly_type == PolyType::OffMeshConnection {
            let v0 = tile.verts[poly.verts[0] as usize];
            let v1 = tile.verts[poly.verts[1] as usize];
            let (_, t) = walkway_common::dist_pt_seg_sqr_2d(pos, v0, v1);
            return (v0.lerp(v1, t), false);
        }

        let verts = tile.poly_vertices(poly);
        if walkway_common::point_in_poly_2d(pos, &verts) {
            let y = self
                .poly_height_in_tile(tile_idx, poly_idx, pos)
                .unwrap_or(pos.y);
            return (Vec3::new(pos.x, y, pos.z), true);
        }

        // Closest boundary point.
        let mut best = verts[0];
        let mut best_d = f32::MAX;
        let n = verts.len();
        for i in 0..n {
            let a = verts[i];
            let b = verts[(i + 1) % n];
            let (d, t) = walkway_common::dist_pt_seg_sqr_2d(pos, a, b);
            if d < best_d {
                best_d = d;
                best = a.lerp(b, t);
            }
        }
        (best, false)
    }

    /// Height of the detail surface under a position.
    pub fn poly_height_in_tile(&self, tile_idx: usize, poly_idx: usize, pos: Vec3) -> Option<f32> {
        let tile = &self.tiles[tile_idx];
        let poly = &tile.polys[poly_idx];
        if poly.poly_type == PolyType::OffMeshConnection {
            return None;
        }
        let detail = tile.detail_meshes.get(poly_idx)?;

        for t in 0..detail.tri_count as usize {
            let tri = tile.detail_tris[detail.tri_base as usize + t];
            let mut v = [Vec3::ZERO; 3];
            for k in 0..3 {
                let idx = tri[k] as usize;
                v[k] = if idx < poly.vert_count as usize {
                    tile.verts[poly.verts[idx] as usize]
                } else {
                    tile.detail_verts
                        [detail.vert_base as usize + idx - poly.vert_count as usize]
                };
            }
            if let Some(h) = walkway_common::closest_height_on_triangle(pos, v[0], v[1], v[2]) {
                return Some(h);
            }
        }

        // Fall back to the closest vertex height when the point sits on an
        // edge the triangle tests miss.
        let verts = tile.poly_vertices(poly);
        verts
            .iter()
            .min_by(|a, b| {
                walkway_common::dist_sqr_2d(**a, pos)
                    .partial_cmp(&walkway_common::dist_sqr_2d(**b, pos))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|v| v.y)
    }

    /// Nearest polygon across every tile overlapping the search box.
    pub fn find_nearest_poly(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> (Status, PolyRef, Vec3) {
        let qmin = center - half_extents;
        let qmax = center + half_extents;

        let (min_tx, min_tz) = self.calc_tile_loc(qmin);
        let (max_tx, max_tz) = self.calc_tile_loc(qmax);

        let mut best: Option<(PolyRef, Vec3, f32)> = None;
        for tz in min_tz..=max_tz {
            for tx in min_tx..=max_tx {
                for tile_idx in self.tiles_at(tx, tz) {
                    let salt = self.tiles[tile_idx].salt;
                    for p in self.query_polygons_in_tile(tile_idx, qmin, qmax) {
                        let poly = &self.tiles[tile_idx].polys[p];
                        if !filter.passes(poly) {
                            continue;
                        }
                        if self.is_stray_group(poly.group_id) {
                            continue;
                        }
                        let (closest, _) = self.closest_point_on_poly_in_tile(tile_idx, p, center);
                        let d = (closest - center).length_squared();
                        if best.map(|(_, _, bd)| d < bd).unwrap_or(true) {
                            let r = PolyRef::encode(salt, tile_idx as u32 + 1, p as u32);
                            best = Some((r, closest, d));
                        }
                    }
                }
            }
        }

        match best {
            Some((r, closest, _)) => (Status::success(), r, closest),
            None => (
                Status::failure(StatusDetail::NotFound),
                PolyRef::NULL,
                center,
            ),
        }
    }

    fn is_stray_group(&self, group: u16) -> bool {
        self.poly_group_count > 0 && group == crate::groups::STRAY_POLY_GROUP
    }

    /// Number of reachability groups, zero before the builder ran.
    pub fn poly_group_count(&self) -> u16 {
        self.poly_group_count
    }

    /// One bit-matrix per movement-capability class.
    pub fn traversal_tables(&self) -> &[Vec<u32>] {
        &self.traversal_tables
    }

    /// Words per traversal table.
    pub fn traversal_table_size(&self) -> usize {
        self.traversal_table_size
    }

    /// Installs reachability results (used by the builder and the loader).
    pub fn set_traversal_tables(
        &mut self,
        group_count: u16,
        tables: Vec<Vec<u32>>,
        table_size: usize,
    ) {
        self.poly_group_count = group_count;
        self.traversal_tables = tables;
        self.traversal_table_size = table_size;
    }

    /// Mutable tile access for graph-maintenance passes.
    pub(crate) fn tile_mut(&mut self, tile_idx: usize) -> &mut MeshTile {
        &mut self.tiles[tile_idx]
    }
}

/// Interval of a portal edge along the axis it runs on.
fn slab_interval(a: Vec3, b: Vec3, along_x: bool) -> (f32, f32) {
    if along_x {
        (a.x.min(b.x), a.x.max(b.x))
    } else {
        (a.z.min(b.z), a.z.max(b.z))
    }
}
