//! Tile serialization: packs a polygon mesh, detail mesh, off-mesh
//! connections and a bounding-volume tree into one self-contained blob.

use byteorder::{LittleEndian, WriteBytesExt};
use glam::Vec3;
use walkway_build::{BORDER_EDGE, MESH_NULL_IDX, PolyMesh, PolyMeshDetail};
use walkway_common::{Error, Result, classify_point_off_bounds};

use crate::format::{NAVMESH_MAGIC, NAVMESH_VERSION};
use crate::{MAX_VERTS_PER_POLY, PolyFlags};

/// Input definition of one off-mesh connection.
#[derive(Debug, Clone)]
pub struct OffMeshConnectionDef {
    /// Start position; the connection is stored on the tile containing it.
    pub start: Vec3,
    /// End position.
    pub end: Vec3,
    /// Reference position for agent alignment.
    pub ref_pos: Vec3,
    /// Endpoint search radius.
    pub radius: f32,
    /// Yaw the agent faces while traversing.
    pub yaw: f32,
    /// Whether both directions are allowed.
    pub bidirectional: bool,
    /// Jump/traverse action type.
    pub jump_type: u8,
    /// Area id.
    pub area: u8,
    /// Ability flags.
    pub flags: PolyFlags,
    /// Host-defined id.
    pub user_id: u32,
}

/// Everything needed to serialize one tile.
#[derive(Debug)]
pub struct TileBuildParams<'a> {
    /// Source polygon mesh.
    pub polymesh: &'a PolyMesh,
    /// Optional detail mesh; a flat fan triangulation is emitted without it.
    pub detail: Option<&'a PolyMeshDetail>,
    /// Off-mesh connections that may touch this tile.
    pub off_mesh_cons: &'a [OffMeshConnectionDef],
    /// Per-polygon ability flags, parallel to the polymesh polygons.
    pub poly_flags: &'a [PolyFlags],
    /// Tile grid position.
    pub tile_x: i32,
    /// Tile grid position.
    pub tile_y: i32,
    /// Vertical layer.
    pub tile_layer: i32,
    /// Host-defined id.
    pub user_id: u32,
    /// Agent clearance, world units.
    pub walkable_height: f32,
    /// Agent radius, world units.
    pub walkable_radius: f32,
    /// Agent climb, world units.
    pub walkable_climb: f32,
    /// Whether to build the BV-tree.
    pub build_bv_tree: bool,
}

struct BvItem {
    bmin: [u16; 3],
    bmax: [u16; 3],
    poly: i32,
}

/// Serializes a tile into an opaque blob.
///
/// Fails with [`Error::SerializationLimit`] when the vertex count or the
/// verts-per-poly cap is exceeded; previously built tiles are unaffected.
pub fn build_tile_data(params: &TileBuildParams<'_>) -> Result<Vec<u8>> {
    let pmesh = params.polymesh;
    let nvp = pmesh.nvp;
    if nvp > MAX_VERTS_PER_POLY {
        return Err(Error::SerializationLimit(format!(
            "verts per poly {nvp} exceeds cap {MAX_VERTS_PER_POLY}"
        )));
    }
    let poly_count = pmesh.poly_count();
    if poly_count == 0 || pmesh.verts.is_empty() {
        return Err(Error::InvalidMesh("empty polygon mesh".to_string()));
    }

    let bmin = pmesh.bmin;
    let bmax = pmesh.bmax;
    let cs = pmesh.cs;
    let ch = pmesh.ch;

    // Classify off-mesh connections; only those whose start point is inside
    // this tile are stored. The end point's 8-way border code lets
    // neighboring tiles find landing connections.
    let mut con_class: Vec<(u8, u8)> = Vec::with_capacity(params.off_mesh_cons.len());
    let mut stored_con_count = 0usize;
    {
        // Tight height bounds for culling, padded by the climb height.
        let mut hmin = f32::MAX;
        let mut hmax = f32::MIN;
        if let Some(detail) = params.detail {
            for v in &detail.verts {
                hmin = hmin.min(v.y);
                hmax = hmax.max(v.y);
            }
        } else {
            for v in &pmesh.verts {
                let y = bmin.y + v[1] as f32 * ch;
                hmin = hmin.min(y);
                hmax = hmax.max(y);
            }
        }
        hmin -= params.walkable_climb;
        hmax += params.walkable_climb;
        let mut cb_min = bmin;
        let mut cb_max = bmax;
        cb_min.y = hmin;
        cb_max.y = hmax;

        for con in params.off_mesh_cons {
            let start_side = classify_point_off_bounds(con.start, cb_min, cb_max);
            let mut start_side = start_side;
            if start_side == 0xff && (con.start.y < cb_min.y || con.start.y > cb_max.y) {
                start_side = 0;
            }
            let end_side = classify_point_off_bounds(con.end, cb_min, cb_max);
            if start_side == 0xff {
                stored_con_count += 1;
            }
            con_class.push((start_side, end_side));
        }
    }

    let tot_vert_count = pmesh.verts.len() + stored_con_count * 2;
    if tot_vert_count >= 0xffff {
        return Err(Error::SerializationLimit(format!(
            "tile vertex count {tot_vert_count} exceeds the index range"
        )));
    }
    let tot_poly_count = poly_count + stored_con_count;

    // Upper bound on links: one per edge, two per portal edge, plus the
    // off-mesh connection fan.
    let mut edge_count = 0usize;
    let mut portal_count = 0usize;
    for p in 0..poly_count {
        let nv = pmesh.poly_vert_count(p);
        edge_count += nv;
        for &nei in pmesh.poly_neighbors(p).iter().take(nv) {
            if nei & BORDER_EDGE != 0 && nei & 0xf != 0xf {
                portal_count += 1;
            }
        }
    }
    let max_link_count = edge_count + portal_count * 2 + stored_con_count * 4;

    // Detail accounting.
    let mut detail_vert_count = 0usize;
    let mut detail_tri_count = 0usize;
    if let Some(detail) = params.detail {
        detail_tri_count = detail.tris.len();
        for p in 0..poly_count {
            let nv = pmesh.poly_vert_count(p);
            detail_vert_count += detail.meshes[p][1] as usize - nv;
        }
    } else {
        for p in 0..poly_count {
            detail_tri_count += pmesh.poly_vert_count(p) - 2;
        }
    }

    // BV-tree over the base polygons.
    let quant_factor = 1.0 / cs;
    let mut bv_nodes: Vec<BvItem> = Vec::new();
    let bv_tree = if params.build_bv_tree {
        for p in 0..poly_count {
            let nv = pmesh.poly_vert_count(p);
            let mut item = BvItem {
                bmin: [0xffff; 3],
                bmax: [0; 3],
                poly: p as i32,
            };
            // Bounds over the detail surface when present; quantized with
            // the horizontal factor on every axis.
            let (mut vmin, mut vmax) = (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN));
            if let Some(detail) = params.detail {
                let m = detail.meshes[p];
                for vi in 0..m[1] as usize {
                    let v = detail.verts[m[0] as usize + vi];
                    vmin = vmin.min(v);
                    vmax = vmax.max(v);
                }
            } else {
                for &vi in pmesh.poly_verts(p).iter().take(nv) {
                    let v = pmesh.verts[vi as usize];
                    let w = Vec3::new(
                        bmin.x + v[0] as f32 * cs,
                        bmin.y + v[1] as f32 * ch,
                        bmin.z + v[2] as f32 * cs,
                    );
                    vmin = vmin.min(w);
                    vmax = vmax.max(w);
                }
            }
            for a in 0..3 {
                item.bmin[a] = (((vmin[a] - bmin[a]) * quant_factor).clamp(0.0, 65535.0)) as u16;
                item.bmax[a] = (((vmax[a] - bmin[a]) * quant_factor).clamp(0.0, 65535.0)) as u16;
            }
            bv_nodes.push(item);
        }
        let mut tree = Vec::with_capacity(poly_count * 2);
        subdivide(&mut bv_nodes, 0, poly_count, &mut tree);
        tree
    } else {
        Vec::new()
    };

    // Serialize.
    let mut buf: Vec<u8> = Vec::new();
    buf.write_u32::<LittleEndian>(NAVMESH_MAGIC)?;
    buf.write_u32::<LittleEndian>(NAVMESH_VERSION)?;
    buf.write_i32::<LittleEndian>(params.tile_x)?;
    buf.write_i32::<LittleEndian>(params.tile_y)?;
    buf.write_i32::<LittleEndian>(params.tile_layer)?;
    buf.write_u32::<LittleEndian>(params.user_id)?;
    buf.write_i32::<LittleEndian>(tot_poly_count as i32)?;
    buf.write_i32::<LittleEndian>(tot_vert_count as i32)?;
    buf.write_i32::<LittleEndian>(max_link_count as i32)?;
    buf.write_i32::<LittleEndian>(poly_count as i32)?;
    buf.write_i32::<LittleEndian>(detail_vert_count as i32)?;
    buf.write_i32::<LittleEndian>(detail_tri_count as i32)?;
    buf.write_i32::<LittleEndian>(bv_tree.len() as i32)?;
    buf.write_i32::<LittleEndian>(stored_con_count as i32)?;
    buf.write_i32::<LittleEndian>(poly_count as i32)?; // off-mesh base
    buf.write_f32::<LittleEndian>(params.walkable_height)?;
    buf.write_f32::<LittleEndian>(params.walkable_radius)?;
    buf.write_f32::<LittleEndian>(params.walkable_climb)?;
    for a in 0..3 {
        buf.write_f32::<LittleEndian>(bmin[a])?;
    }
    for a in 0..3 {
        buf.write_f32::<LittleEndian>(bmax[a])?;
    }
    buf.write_f32::<LittleEndian>(quant_factor)?;

    // Vertices: mesh verts dequantized to world units, then the stored
    // off-mesh endpoints verbatim.
    for v in &pmesh.verts {
        buf.write_f32::<LittleEndian>(bmin.x + v[0] as f32 * cs)?;
        buf.write_f32::<LittleEndian>(bmin.y + v[1] as f32 * ch)?;
        buf.write_f32::<LittleEndian>(bmin.z + v[2] as f32 * cs)?;
    }
    for (i, con) in params.off_mesh_cons.iter().enumerate() {
        if con_class[i].0 != 0xff {
            continue;
        }
        for p in [con.start, con.end] {
            buf.write_f32::<LittleEndian>(p.x)?;
            buf.write_f32::<LittleEndian>(p.y)?;
            buf.write_f32::<LittleEndian>(p.z)?;
        }
    }

    // Base polygons.
    for p in 0..poly_count {
        let nv = pmesh.poly_vert_count(p);
        let verts = pmesh.poly_verts(p);
        let neis = pmesh.poly_neighbors(p);
        for j in 0..MAX_VERTS_PER_POLY {
            let v = if j < nv { verts[j] } else { MESH_NULL_IDX };
            buf.write_u16::<LittleEndian>(if v == MESH_NULL_IDX { 0 } else { v })?;
        }
        for j in 0..MAX_VERTS_PER_POLY {
            let raw = if j < nv { neis[j] } else { MESH_NULL_IDX };
            let encoded = if raw == MESH_NULL_IDX {
                0
            } else if raw & BORDER_EDGE != 0 {
                // Tile border edge: convert the grid direction into the
                // 8-way side code used at runtime.
                let side = match raw & 0xf {
                    0 => 4, // -x
                    1 => 2, // +z
                    2 => 0, // +x
                    _ => 6, // -z
                };
                0x8000 | side
            } else {
                raw + 1
            };
            buf.write_u16::<LittleEndian>(encoded)?;
        }
        let flags = params
            .poly_flags
            .get(p)
            .copied()
            .unwrap_or(PolyFlags::WALK);
        buf.write_u16::<LittleEndian>(flags.bits())?;
        buf.write_u8(nv as u8)?;
        buf.write_u8(pmesh.areas[p] & 0x3f)?;
        // Reachability group; zero until the reachability builder runs.
        buf.write_u16::<LittleEndian>(0)?;
    }
    // Off-mesh connection polygons.
    let mut con_vert = pmesh.verts.len() as u16;
    for (i, con) in params.off_mesh_cons.iter().enumerate() {
        if con_class[i].0 != 0xff {
            continue;
        }
        for j in 0..MAX_VERTS_PER_POLY {
            let v = match j {
                0 => con_vert,
                1 => con_vert + 1,
                _ => 0,
            };
            buf.write_u16::<LittleEndian>(v)?;
        }
        for _ in 0..MAX_VERTS_PER_POLY {
            buf.write_u16::<LittleEndian>(0)?;
        }
        buf.write_u16::<LittleEndian>(con.flags.bits())?;
        buf.write_u8(2)?;
        buf.write_u8((con.area & 0x3f) | (1 << 6))?;
        buf.write_u16::<LittleEndian>(0)?;
        con_vert += 2;
    }

    // Detail sub-meshes.
    if let Some(detail) = params.detail {
        let mut vbase = 0u32;
        for p in 0..poly_count {
            let nv = pmesh.poly_vert_count(p);
            let m = detail.meshes[p];
            let extra = m[1] - nv as u32;
            buf.write_u32::<LittleEndian>(vbase)?;
            buf.write_u32::<LittleEndian>(m[2])?;
            buf.write_u8(extra as u8)?;
            buf.write_u8(m[3] as u8)?;
            buf.write_u16::<LittleEndian>(0)?; // padding
            vbase += extra;
        }
        for p in 0..poly_count {
            let nv = pmesh.poly_vert_count(p);
            let m = detail.meshes[p];
            for vi in nv..m[1] as usize {
                let v = detail.verts[m[0] as usize + vi];
                buf.write_f32::<LittleEndian>(v.x)?;
                buf.write_f32::<LittleEndian>(v.y)?;
                buf.write_f32::<LittleEndian>(v.z)?;
            }
        }
        for t in &detail.tris {
            buf.write_u8(t[0])?;
            buf.write_u8(t[1])?;
            buf.write_u8(t[2])?;
            buf.write_u8(t[3])?;
        }
    } else {
        // Fan triangulation over the base polygons.
        let mut tbase = 0u32;
        for p in 0..poly_count {
            let nv = pmesh.poly_vert_count(p);
            buf.write_u32::<LittleEndian>(0)?;
            buf.write_u32::<LittleEndian>(tbase)?;
            buf.write_u8(0)?;
            buf.write_u8((nv - 2) as u8)?;
            buf.write_u16::<LittleEndian>(0)?;
            tbase += (nv - 2) as u32;
        }
        for p in 0..poly_count {
            let nv = pmesh.poly_vert_count(p);
            for j in 1..nv - 1 {
                buf.write_u8(0)?;
                buf.write_u8(j as u8)?;
                buf.write_u8((j + 1) as u8)?;
                buf.write_u8(if j == nv - 2 { 1 << 4 } else { 0 })?;
            }
        }
    }

    // BV-tree.
    for node in &bv_tree {
        for a in 0..3 {
            buf.write_u16::<LittleEndian>(node.bmin[a])?;
        }
        for a in 0..3 {
            buf.write_u16::<LittleEndian>(node.bmax[a])?;
        }
        buf.write_i32::<LittleEndian>(node.i)?;
    }

    // Off-mesh connection records.
    let mut con_poly = poly_count as u16;
    for (i, con) in params.off_mesh_cons.iter().enumerate() {
        if con_class[i].0 != 0xff {
            continue;
        }
        for p in [con.start, con.end] {
            buf.write_f32::<LittleEndian>(p.x)?;
            buf.write_f32::<LittleEndian>(p.y)?;
            buf.write_f32::<LittleEndian>(p.z)?;
        }
        buf.write_f32::<LittleEndian>(con.ref_pos.x)?;
        buf.write_f32::<LittleEndian>(con.ref_pos.y)?;
        buf.write_f32::<LittleEndian>(con.ref_pos.z)?;
        buf.write_f32::<LittleEndian>(con.radius)?;
        buf.write_f32::<LittleEndian>(con.yaw)?;
        buf.write_u16::<LittleEndian>(con_poly)?;
        buf.write_u16::<LittleEndian>(con.flags.bits())?;
        buf.write_u8(con_class[i].1)?;
        buf.write_u8(con.area & 0x3f)?;
        buf.write_u8(con.bidirectional as u8)?;
        buf.write_u8(con.jump_type)?;
        buf.write_u32::<LittleEndian>(con.user_id)?;
        con_poly += 1;
    }

    Ok(buf)
}

/// Decoded BV node for the serializer output.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeNode {
    pub bmin: [u16; 3],
    pub bmax: [u16; 3],
    pub i: i32,
}

fn subdivide(items: &mut [BvItem], imin: usize, imax: usize, nodes: &mut Vec<TreeNode>) {
    let inum = imax - imin;
    let icur = nodes.len();

    if inum == 1 {
        let it = &items[imin];
        nodes.push(TreeNode {
            bmin: it.bmin,
            bmax: it.bmax,
            i: it.poly,
        });
        return;
    }

    // Union bounds of the slice.
    let mut bmin = [0xffffu16; 3];
    let mut bmax = [0u16; 3];
    for it in &items[imin..imax] {
        for a in 0..3 {
            bmin[a] = bmin[a].min(it.bmin[a]);
            bmax[a] = bmax[a].max(it.bmax[a]);
        }
    }

    // Median split over the longest axis.
    let extents = [
        bmax[0] as i32 - bmin[0] as i32,
        bmax[1] as i32 - bmin[1] as i32,
        bmax[2] as i32 - bmin[2] as i32,
    ];
    let axis = if extents[0] >= extents[1] && extents[0] >= extents[2] {
        0
    } else if extents[1] >= extents[2] {
        1
    } else {
        2
    };
    items[imin..imax].sort_by_key(|it| it.bmin[axis]);
    let isplit = imin + inum / 2;

    nodes.push(TreeNode {
        bmin,
        bmax,
        i: 0,
    });
    subdivide(items, imin, isplit, nodes);
    subdivide(items, isplit, imax, nodes);

    // Escape index: number of nodes in this subtree, negated.
    let iescape = (nodes.len() - icur) as i32;
    nodes[icur].i = -iescape;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use walkway_build::{
        BuildConfig, BuildPipeline, InputMesh, ShapeVolumeSet,
    };
    use walkway_common::BuildContext;

    pub(crate) fn floor_tile_data() -> Vec<u8> {
        let mut cfg = BuildConfig {
            cs: 0.5,
            ch: 0.25,
            walkable_height: 4,
            walkable_climb: 2,
            walkable_radius: 0,
            min_region_area: 2,
            merge_region_area: 10,
            detail_sample_dist: 2.0,
            detail_sample_max_error: 0.5,
            ..Default::default()
        };
        cfg.calc_grid_size(Vec3::new(0.0, -1.0, 0.0), Vec3::new(8.0, 3.0, 8.0));
        let pipeline = BuildPipeline::new(cfg);
        let mut ctx = BuildContext::new();
        let input = InputMesh {
            verts: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(8.0, 0.0, 0.0),
                Vec3::new(8.0, 0.0, 8.0),
                Vec3::new(0.0, 0.0, 8.0),
            ],
            tris: vec![[0, 2, 1], [0, 3, 2]],
            areas: Vec::new(),
        };
        let artifacts = pipeline
            .build(&mut ctx, &input, &ShapeVolumeSet::default())
            .unwrap();

        let flags = vec![PolyFlags::WALK; artifacts.polymesh.poly_count()];
        let params = TileBuildParams {
            polymesh: &artifacts.polymesh,
            detail: Some(&artifacts.detail),
            off_mesh_cons: &[],
            poly_flags: &flags,
            tile_x: 0,
            tile_y: 0,
            tile_layer: 0,
            user_id: 0,
            walkable_height: 1.0,
            walkable_radius: 0.25,
            walkable_climb: 0.5,
            build_bv_tree: true,
        };
        build_tile_data(&params).unwrap()
    }

    #[test]
    fn test_tile_data_has_magic_and_version() {
        let data = floor_tile_data();
        assert_eq!(&data[0..4], &NAVMESH_MAGIC.to_le_bytes());
        assert_eq!(&data[4..8], &NAVMESH_VERSION.to_le_bytes());
    }

    #[test]
    fn test_round_trip_counts() {
        let data = floor_tile_data();
        let tile = crate::format::decode_tile_data(&data).unwrap();
        let header = tile.header.as_ref().unwrap();
        assert_eq!(tile.polys.len(), header.poly_count as usize);
        assert_eq!(tile.verts.len(), header.vert_count as usize);
        assert_eq!(tile.bv_tree.len(), header.bv_node_count as usize);
        assert!(header.poly_count > 0);
        assert!(header.bv_node_count > 0);
    }

    #[test]
    fn test_bv_tree_covers_every_poly() {
        let data = floor_tile_data();
        let tile = crate::format::decode_tile_data(&data).unwrap();
        let mut covered = vec![false; tile.polys.len()];
        for node in &tile.bv_tree {
            if node.i >= 0 {
                covered[node.i as usize] = true;
            }
        }
        assert!(covered.iter().all(|&c| c), "BV-tree leaf missing for a poly");
    }

    #[test]
    fn test_escape_indices_skip_consistently() {
        let data = floor_tile_data();
        let tile = crate::format::decode_tile_data(&data).unwrap();
        // Walking the tree with maximal skips must land exactly at the end.
        let mut i = 0usize;
        while i < tile.bv_tree.len() {
            let node = tile.bv_tree[i];
            if node.i >= 0 {
                i += 1;
            } else {
                i += (-node.i) as usize;
            }
        }
        assert_eq!(i, tile.bv_tree.len());
    }
}
