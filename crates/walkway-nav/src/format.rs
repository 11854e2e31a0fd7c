//! Binary decode of tile blobs and the persisted tile-set format.
//!
//! Every structure is read and written field by field in little-endian
//! order; the magic tag and version are checked before anything else is
//! decoded.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use std::io::Cursor;
use walkway_common::{Error, Result};

use crate::groups::MIN_POLY_GROUP_COUNT;
use crate::mesh::{NavMesh, NavMeshParams};
use crate::tile::{
    BvNode, MeshTile, NULL_LINK, OffMeshConnection, Poly, PolyDetail, PolyType, TileHeader,
};
use crate::{MAX_VERTS_PER_POLY, PolyFlags};

/// Magic tag of a serialized tile blob.
pub const NAVMESH_MAGIC: u32 = u32::from_le_bytes(*b"WNAV");
/// Version of the tile blob layout.
pub const NAVMESH_VERSION: u32 = 1;

/// Magic tag of a persisted tile set.
pub const NAVMESH_SET_MAGIC: u32 = u32::from_le_bytes(*b"MSET");
/// Version of the tile-set layout.
pub const NAVMESH_SET_VERSION: u32 = 1;

/// Magic tag of a persisted tile-cache set.
pub const CACHE_SET_MAGIC: u32 = u32::from_le_bytes(*b"TSET");
/// Version of the tile-cache-set layout.
pub const CACHE_SET_VERSION: u32 = 1;

/// Byte size of the fixed tile header.
pub(crate) const TILE_HEADER_SIZE: usize = 100;
/// Byte size of one serialized polygon record.
pub(crate) const POLY_RECORD_SIZE: usize = 30;

fn read_vec3(cursor: &mut Cursor<&[u8]>) -> Result<Vec3> {
    Ok(Vec3::new(
        cursor.read_f32::<LittleEndian>()?,
        cursor.read_f32::<LittleEndian>()?,
        cursor.read_f32::<LittleEndian>()?,
    ))
}

/// Decodes one tile blob into a resident tile.
///
/// Links are not stored in the blob; they are wired when the tile is added
/// to a mesh.
pub fn decode_tile_data(data: &[u8]) -> Result<MeshTile> {
    let mut cursor = Cursor::new(data);

    let magic = cursor.read_u32::<LittleEndian>()?;
    if magic != NAVMESH_MAGIC {
        return Err(Error::InvalidMesh("tile data has wrong magic".to_string()));
    }
    let version = cursor.read_u32::<LittleEndian>()?;
    if version != NAVMESH_VERSION {
        return Err(Error::InvalidMesh(format!(
            "unsupported tile version {version}"
        )));
    }

    let x = cursor.read_i32::<LittleEndian>()?;
    let y = cursor.read_i32::<LittleEndian>()?;
    let layer = cursor.read_i32::<LittleEndian>()?;
    let user_id = cursor.read_u32::<LittleEndian>()?;
    let poly_count = cursor.read_i32::<LittleEndian>()?;
    let vert_count = cursor.read_i32::<LittleEndian>()?;
    let max_link_count = cursor.read_i32::<LittleEndian>()?;
    let detail_mesh_count = cursor.read_i32::<LittleEndian>()?;
    let detail_vert_count = cursor.read_i32::<LittleEndian>()?;
    let detail_tri_count = cursor.read_i32::<LittleEndian>()?;
    let bv_node_count = cursor.read_i32::<LittleEndian>()?;
    let off_mesh_con_count = cursor.read_i32::<LittleEndian>()?;
    let off_mesh_base = cursor.read_i32::<LittleEndian>()?;
    let walkable_height = cursor.read_f32::<LittleEndian>()?;
    let walkable_radius = cursor.read_f32::<LittleEndian>()?;
    let walkable_climb = cursor.read_f32::<LittleEndian>()?;
    let bmin = read_vec3(&mut cursor)?;
    let bmax = read_vec3(&mut cursor)?;
    let bv_quant_factor = cursor.read_f32::<LittleEndian>()?;

    if poly_count <= 0 || vert_count <= 0 {
        return Err(Error::InvalidMesh("tile data has no polygons".to_string()));
    }

    let mut tile = MeshTile {
        header: Some(TileHeader {
            x,
            y,
            layer,
            user_id,
            poly_count,
            vert_count,
            max_link_count,
            detail_mesh_count,
            detail_vert_count,
            detail_tri_count,
            bv_node_count,
            off_mesh_con_count,
            off_mesh_base,
            walkable_height,
            walkable_radius,
            walkable_climb,
            bmin,
            bmax,
            bv_quant_factor,
        }),
        data: data.to_vec(),
        ..Default::default()
    };

    for _ in 0..vert_count {
        tile.verts.push(read_vec3(&mut cursor)?);
    }

    for _ in 0..poly_count {
        let mut verts = [0u16; MAX_VERTS_PER_POLY];
        for v in verts.iter_mut() {
            *v = cursor.read_u16::<LittleEndian>()?;
        }
        let mut neighbors = [0u16; MAX_VERTS_PER_POLY];
        for n in neighbors.iter_mut() {
            *n = cursor.read_u16::<LittleEndian>()?;
        }
        let flags = PolyFlags::from_bits_truncate(cursor.read_u16::<LittleEndian>()?);
        let vert_count = cursor.read_u8()?;
        let area_and_type = cursor.read_u8()?;
        let group_id = cursor.read_u16::<LittleEndian>()?;

        let poly_type = if area_and_type >> 6 == 1 {
            PolyType::OffMeshConnection
        } else {
            PolyType::Ground
        };
        let mut poly = Poly::new(area_and_type & 0x3f, poly_type, flags);
        poly.verts = verts;
        poly.neighbors = neighbors;
        poly.vert_count = vert_count;
        poly.first_link = NULL_LINK;
        poly.group_id = group_id;
        tile.polys.push(poly);
    }

    for _ in 0..detail_mesh_count {
        let vert_base = cursor.read_u32::<LittleEndian>()?;
        let tri_base = cursor.read_u32::<LittleEndian>()?;
        let vert_count = cursor.read_u8()?;
        let tri_count = cursor.read_u8()?;
        cursor.read_u16::<LittleEndian>()?; // padding
        tile.detail_meshes.push(PolyDetail {
            vert_base,
            tri_base,
            vert_count,
            tri_count,
        });
    }
    for _ in 0..detail_vert_count {
        tile.detail_verts.push(read_vec3(&mut cursor)?);
    }
    for _ in 0..detail_tri_count {
        let mut t = [0u8; 4];
        for b in t.iter_mut() {
            *b = cursor.read_u8()?;
        }
        tile.detail_tris.push(t);
    }

    for _ in 0..bv_node_count {
        let mut bmin = [0u16; 3];
        let mut bmax = [0u16; 3];
        for v in bmin.iter_mut() {
            *v = cursor.read_u16::<LittleEndian>()?;
        }
        for v in bmax.iter_mut() {
            *v = cursor.read_u16::<LittleEndian>()?;
        }
        let i = cursor.read_i32::<LittleEndian>()?;
        tile.bv_tree.push(BvNode { bmin, bmax, i });
    }

    for _ in 0..off_mesh_con_count {
        let start = read_vec3(&mut cursor)?;
        let end = read_vec3(&mut cursor)?;
        let ref_pos = read_vec3(&mut cursor)?;
        let radius = cursor.read_f32::<LittleEndian>()?;
        let yaw = cursor.read_f32::<LittleEndian>()?;
        let poly = cursor.read_u16::<LittleEndian>()?;
        let flags = PolyFlags::from_bits_truncate(cursor.read_u16::<LittleEndian>()?);
        let side = cursor.read_u8()?;
        let area = cursor.read_u8()?;
        let bidirectional = cursor.read_u8()? != 0;
        let jump_type = cursor.read_u8()?;
        let user_id = cursor.read_u32::<LittleEndian>()?;
        tile.off_mesh_cons.push(OffMeshConnection {
            pos: [start, end],
            ref_pos,
            radius,
            yaw,
            poly,
            flags,
            side,
            area,
            bidirectional,
            jump_type,
            user_id,
        });
    }

    Ok(tile)
}

/// Copies runtime polygon state (flags, area, reachability group) back
/// into a tile blob so it survives persistence.
pub(crate) fn patch_tile_runtime_state(data: &mut [u8], tile: &MeshTile) {
    let vert_count = tile.verts.len();
    let base = TILE_HEADER_SIZE + vert_count * 12;
    for (p, poly) in tile.polys.iter().enumerate() {
        let rec = base + p * POLY_RECORD_SIZE;
        data[rec + 24..rec + 26].copy_from_slice(&poly.flags.bits().to_le_bytes());
        data[rec + 27] = (poly.area & 0x3f) | ((poly.poly_type as u8) << 6);
        data[rec + 28..rec + 30].copy_from_slice(&poly.group_id.to_le_bytes());
    }
}

/// Persists a navigation mesh: header, tiles and (when present) one
/// traversal table per movement-capability class.
pub fn save_nav_mesh(mesh: &NavMesh) -> Result<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::new();

    let tiles: Vec<_> = mesh.resident_tiles().collect();
    let params = mesh.params();

    buf.write_u32::<LittleEndian>(NAVMESH_SET_MAGIC)?;
    buf.write_u32::<LittleEndian>(NAVMESH_SET_VERSION)?;
    buf.write_i32::<LittleEndian>(tiles.len() as i32)?;
    for a in 0..3 {
        buf.write_f32::<LittleEndian>(params.origin[a])?;
    }
    buf.write_f32::<LittleEndian>(params.tile_width)?;
    buf.write_f32::<LittleEndian>(params.tile_height)?;
    buf.write_i32::<LittleEndian>(params.max_tiles)?;
    buf.write_i32::<LittleEndian>(params.max_polys)?;
    buf.write_i32::<LittleEndian>(mesh.poly_group_count() as i32)?;
    buf.write_i32::<LittleEndian>(mesh.traversal_tables().len() as i32)?;
    buf.write_i32::<LittleEndian>(mesh.traversal_table_size() as i32)?;

    for (tile_ref, tile) in &tiles {
        let mut data = tile.data.clone();
        patch_tile_runtime_state(&mut data, tile);
        buf.write_u32::<LittleEndian>(tile_ref.id())?;
        buf.write_u32::<LittleEndian>(data.len() as u32)?;
        buf.extend_from_slice(&data);
    }

    if mesh.poly_group_count() >= MIN_POLY_GROUP_COUNT {
        for table in mesh.traversal_tables() {
            for &word in table {
                buf.write_u32::<LittleEndian>(word)?;
            }
        }
    }

    Ok(buf)
}

/// Loads a navigation mesh persisted by [`save_nav_mesh`].
pub fn load_nav_mesh(data: &[u8]) -> Result<NavMesh> {
    let mut cursor = Cursor::new(data);

    let magic = cursor.read_u32::<LittleEndian>()?;
    if magic != NAVMESH_SET_MAGIC {
        return Err(Error::InvalidMesh("tile set has wrong magic".to_string()));
    }
    let version = cursor.read_u32::<LittleEndian>()?;
    if version != NAVMESH_SET_VERSION {
        return Err(Error::InvalidMesh(format!(
            "unsupported tile set version {version}"
        )));
    }

    let tile_count = cursor.read_i32::<LittleEndian>()?;
    let origin = read_vec3(&mut cursor)?;
    let tile_width = cursor.read_f32::<LittleEndian>()?;
    let tile_height = cursor.read_f32::<LittleEndian>()?;
    let max_tiles = cursor.read_i32::<LittleEndian>()?;
    let max_polys = cursor.read_i32::<LittleEndian>()?;
    let poly_group_count = cursor.read_i32::<LittleEndian>()?;
    let table_count = cursor.read_i32::<LittleEndian>()?;
    let table_size = cursor.read_i32::<LittleEndian>()?;

    let params = NavMeshParams {
        origin,
        tile_width,
        tile_height,
        max_tiles,
        max_polys,
    };
    let mut mesh = NavMesh::new(params)
        .map_err(|s| Error::InvalidMesh(format!("invalid mesh params: {s:?}")))?;

    for _ in 0..tile_count {
        let _tile_ref = cursor.read_u32::<LittleEndian>()?;
        let size = cursor.read_u32::<LittleEndian>()? as usize;
        let pos = cursor.position() as usize;
        if pos + size > data.len() {
            return Err(Error::InvalidMesh("truncated tile set".to_string()));
        }
        let blob = data[pos..pos + size].to_vec();
        mesh.add_tile(blob)
            .map_err(|s| Error::InvalidMesh(format!("failed to add tile: {s:?}")))?;
        cursor.set_position((pos + size) as u64);
    }

    if poly_group_count >= MIN_POLY_GROUP_COUNT as i32 {
        let mut tables = Vec::with_capacity(table_count as usize);
        for _ in 0..table_count {
            let mut table = Vec::with_capacity(table_size as usize);
            for _ in 0..table_size {
                table.push(cursor.read_u32::<LittleEndian>()?);
            }
            tables.push(table);
        }
        mesh.set_traversal_tables(poly_group_count as u16, tables, table_size as usize);
    } else {
        mesh.set_traversal_tables(poly_group_count.max(0) as u16, Vec::new(), 0);
    }

    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_wrong_magic() {
        let data = vec![0u8; 128];
        assert!(decode_tile_data(&data).is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_version() {
        let mut data = Vec::new();
        data.extend_from_slice(&NAVMESH_MAGIC.to_le_bytes());
        data.extend_from_slice(&999u32.to_le_bytes());
        data.resize(128, 0);
        assert!(decode_tile_data(&data).is_err());
    }

    #[test]
    fn test_header_size_matches_layout() {
        // 6 leading words, 9 count words, 3 walkable floats, 2 bounds
        // vectors and the quantization factor.
        let expected = 6 * 4 + 9 * 4 + 3 * 4 + 2 * 12 + 4;
        assert_eq!(TILE_HEADER_SIZE, expected);
    }
}
