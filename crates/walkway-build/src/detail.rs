//! Detail mesh: per-polygon re-triangulation against the compact
//! heightfield to recover sub-cell height accuracy.

use glam::Vec3;
use walkway_common::{BuildContext, Error, Result, TimerCategory};

use crate::compact::CompactHeightfield;
use crate::polymesh::{MESH_NULL_IDX, PolyMesh};

/// Detail-triangle edge flag: the edge lies on the polygon boundary.
pub const DETAIL_EDGE_BOUNDARY: u8 = 0x1;

/// Per-polygon detail triangulation.
///
/// For each polygon, `meshes` stores `[vert_base, vert_count, tri_base,
/// tri_count]`. The first vertices of every sub-mesh are the polygon
/// corners in order; samples added for height accuracy follow.
#[derive(Debug, Clone, Default)]
pub struct PolyMeshDetail {
    /// Sub-mesh table, one entry per polygon.
    pub meshes: Vec<[u32; 4]>,
    /// World-space vertices of all sub-meshes.
    pub verts: Vec<Vec3>,
    /// Triangles: three local vertex indices plus edge flags.
    pub tris: Vec<[u8; 4]>,
}

impl PolyMeshDetail {
    /// Builds the detail mesh for every polygon of the mesh.
    pub fn build(
        ctx: &mut BuildContext,
        pmesh: &PolyMesh,
        chf: &CompactHeightfield,
        sample_dist: f32,
        sample_max_error: f32,
    ) -> Result<Self> {
        ctx.start_timer(TimerCategory::DetailMesh);

        let mut detail = PolyMeshDetail::default();
        let cs = pmesh.cs;
        let ch = pmesh.ch;
        let orig = pmesh.bmin;

        for p in 0..pmesh.poly_count() {
            let nv = pmesh.poly_vert_count(p);
            if nv < 3 {
                return Err(Error::BuildFailed(format!(
                    "polygon {p} has fewer than three vertices"
                )));
            }

            // Polygon corners in world units.
            let mut poly_verts: Vec<Vec3> = Vec::with_capacity(nv);
            for &vi in pmesh.poly_verts(p).iter().take(nv) {
                debug_assert!(vi != MESH_NULL_IDX);
                let v = pmesh.verts[vi as usize];
                poly_verts.push(Vec3::new(
                    orig.x + v[0] as f32 * cs,
                    orig.y + v[1] as f32 * ch,
                    orig.z + v[2] as f32 * cs,
                ));
            }

            // Snap corner heights to the heightfield.
            for v in poly_verts.iter_mut() {
                if let Some(h) = sample_height(chf, *v) {
                    v.y = h;
                }
            }

            let (verts, tris) =
                build_poly_detail(chf, &poly_verts, sample_dist, sample_max_error);

            let vert_base = detail.verts.len() as u32;
            let tri_base = detail.tris.len() as u32;
            detail.meshes.push([
                vert_base,
                verts.len() as u32,
                tri_base,
                tris.len() as u32,
            ]);
            detail.verts.extend_from_slice(&verts);
            detail.tris.extend_from_slice(&tris);
        }

        ctx.stop_timer(TimerCategory::DetailMesh);
        ctx.log_info(
            "detail",
            format!(
                "{} detail vertices, {} triangles",
                detail.verts.len(),
                detail.tris.len()
            ),
        );
        Ok(detail)
    }

    /// World-space height at `pos` inside polygon `poly`, if covered.
    pub fn height_at(&self, poly: usize, pos: Vec3) -> Option<f32> {
        let m = self.meshes.get(poly)?;
        let vb = m[0] as usize;
        let tb = m[2] as usize;
        for t in 0..m[3] as usize {
            let tri = self.tris[tb + t];
            let a = self.verts[vb + tri[0] as usize];
            let b = self.verts[vb + tri[1] as usize];
            let c = self.verts[vb + tri[2] as usize];
            if let Some(h) = walkway_common::closest_height_on_triangle(pos, a, b, c) {
                return Some(h);
            }
        }
        None
    }
}

/// Samples the heightfield at a world position, searching outward from the
/// containing cell.
fn sample_height(chf: &CompactHeightfield, pos: Vec3) -> Option<f32> {
    let ix = ((pos.x - chf.bmin.x) / chf.cs).floor() as i32;
    let iz = ((pos.z - chf.bmin.z) / chf.cs).floor() as i32;

    let mut best: Option<f32> = None;
    for radius in 0..3i32 {
        for dz in -radius..=radius {
            for dx in -radius..=radius {
                if dx.abs().max(dz.abs()) != radius {
                    continue;
                }
                let x = ix + dx;
                let z = iz + dz;
                if x < 0 || z < 0 || x >= chf.width || z >= chf.height {
                    continue;
                }
                let cell = chf.cells[(x + z * chf.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let y = chf.bmin.y + chf.spans[i as usize].y as f32 * chf.ch;
                    let better = match best {
                        Some(b) => (y - pos.y).abs() < (b - pos.y).abs(),
                        None => true,
                    };
                    if better {
                        best = Some(y);
                    }
                }
            }
        }
        if best.is_some() && radius >= 1 {
            break;
        }
    }
    best
}

/// Triangulates one polygon with added interior samples.
fn build_poly_detail(
    chf: &CompactHeightfield,
    poly: &[Vec3],
    sample_dist: f32,
    sample_max_error: f32,
) -> (Vec<Vec3>, Vec<[u8; 4]>) {
    let nv = poly.len();
    let mut verts: Vec<Vec3> = poly.to_vec();

    // Fan triangulation of the convex hull.
    let mut tris: Vec<[u8; 4]> = Vec::new();
    for i in 1..nv - 1 {
        tris.push([0, i as u8, (i + 1) as u8, 0]);
    }

    if sample_dist > 0.0 {
        // Sample the interior on a regular grid.
        let mut bmin = poly[0];
        let mut bmax = poly[0];
        for v in poly.iter().skip(1) {
            bmin = bmin.min(*v);
            bmax = bmax.max(*v);
        }
        let x0 = (bmin.x / sample_dist).floor() as i32;
        let x1 = (bmax.x / sample_dist).ceil() as i32;
        let z0 = (bmin.z / sample_dist).floor() as i32;
        let z1 = (bmax.z / sample_dist).ceil() as i32;

        let mut samples: Vec<Vec3> = Vec::new();
        for z in z0..z1 {
            for x in x0..x1 {
                let p = Vec3::new(x as f32 * sample_dist, (bmin.y + bmax.y) * 0.5, z as f32 * sample_dist);
                if !walkway_common::point_in_poly_2d(p, poly) {
                    continue;
                }
                if let Some(h) = sample_height(chf, p) {
                    samples.push(Vec3::new(p.x, h, p.z));
                }
            }
        }

        // Insert the worst-error sample until all are within tolerance.
        let max_verts = 127usize;
        while verts.len() < max_verts {
            let mut worst: Option<(usize, f32)> = None;
            for (si, s) in samples.iter().enumerate() {
                let err = height_error(&verts, &tris, *s);
                if err > sample_max_error {
                    let better = worst.map(|(_, e)| err > e).unwrap_or(true);
                    if better {
                        worst = Some((si, err));
                    }
                }
            }
            let Some((si, _)) = worst else {
                break;
            };
            let s = samples.swap_remove(si);
            insert_point(&mut verts, &mut tris, s);
        }
    }

    // Flag edges on the polygon boundary: both endpoints are consecutive
    // hull corners.
    for tri in tris.iter_mut() {
        let mut flags = 0u8;
        for e in 0..3 {
            let a = tri[e] as usize;
            let b = tri[(e + 1) % 3] as usize;
            let on_hull = a < nv && b < nv && ((a + 1) % nv == b || (b + 1) % nv == a);
            if on_hull {
                flags |= DETAIL_EDGE_BOUNDARY << (e * 2);
            }
        }
        tri[3] = flags;
    }

    (verts, tris)
}

fn height_error(verts: &[Vec3], tris: &[[u8; 4]], s: Vec3) -> f32 {
    for tri in tris {
        let a = verts[tri[0] as usize];
        let b = verts[tri[1] as usize];
        let c = verts[tri[2] as usize];
        if let Some(h) = walkway_common::closest_height_on_triangle(s, a, b, c) {
            return (h - s.y).abs();
        }
    }
    0.0
}

fn insert_point(verts: &mut Vec<Vec3>, tris: &mut Vec<[u8; 4]>, s: Vec3) {
    // Split the triangle containing the sample into three.
    for ti in 0..tris.len() {
        let tri = tris[ti];
        let a = verts[tri[0] as usize];
        let b = verts[tri[1] as usize];
        let c = verts[tri[2] as usize];
        if walkway_common::closest_height_on_triangle(s, a, b, c).is_some() {
            let ni = verts.len() as u8;
            verts.push(s);
            tris.swap_remove(ti);
            tris.push([tri[0], tri[1], ni, 0]);
            tris.push([tri[1], tri[2], ni, 0]);
            tris.push([tri[2], tri[0], ni, 0]);
            return;
        }
    }
    // Sample sits exactly on an edge shared by rounding; drop it.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::{Heightfield, WALKABLE_AREA};
    use crate::region::build_regions_watershed;
    use crate::contour::ContourSet;

    fn build_all(size: i32) -> (PolyMesh, PolyMeshDetail) {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 20.0, size as f32),
            1.0,
            0.5,
        )
        .unwrap();
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1).unwrap();
            }
        }
        let mut ctx = BuildContext::new();
        let mut chf = CompactHeightfield::build(&mut ctx, &hf, 2, 1).unwrap();
        build_regions_watershed(&mut ctx, &mut chf, 0, 2, 10).unwrap();
        let cset = ContourSet::build(&mut ctx, &chf, 1.3, 12).unwrap();
        let pmesh = PolyMesh::build(&mut ctx, &cset, 6).unwrap();
        let detail = PolyMeshDetail::build(&mut ctx, &pmesh, &chf, 2.0, 0.5).unwrap();
        (pmesh, detail)
    }

    #[test]
    fn test_detail_mesh_covers_every_poly() {
        let (pmesh, detail) = build_all(8);
        assert_eq!(detail.meshes.len(), pmesh.poly_count());
        for m in &detail.meshes {
            assert!(m[1] >= 3, "sub-mesh with fewer than 3 vertices");
            assert!(m[3] >= 1, "sub-mesh without triangles");
        }
    }

    #[test]
    fn test_detail_first_verts_match_poly_corners() {
        let (pmesh, detail) = build_all(6);
        for p in 0..pmesh.poly_count() {
            let nv = pmesh.poly_vert_count(p);
            let m = detail.meshes[p];
            assert!(m[1] as usize >= nv);
            for (j, &vi) in pmesh.poly_verts(p).iter().take(nv).enumerate() {
                let pv = pmesh.verts[vi as usize];
                let dv = detail.verts[m[0] as usize + j];
                let wx = pmesh.bmin.x + pv[0] as f32 * pmesh.cs;
                let wz = pmesh.bmin.z + pv[2] as f32 * pmesh.cs;
                assert!((dv.x - wx).abs() < 1e-4);
                assert!((dv.z - wz).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_height_query_on_flat_plate() {
        let (pmesh, detail) = build_all(8);
        // The plate floor sits at span top 2 with ch 0.5 => world y 1.0.
        for p in 0..pmesh.poly_count() {
            let nv = pmesh.poly_vert_count(p);
            let mut center = Vec3::ZERO;
            for &vi in pmesh.poly_verts(p).iter().take(nv) {
                let v = pmesh.verts[vi as usize];
                center += Vec3::new(
                    pmesh.bmin.x + v[0] as f32 * pmesh.cs,
                    0.0,
                    pmesh.bmin.z + v[2] as f32 * pmesh.cs,
                );
            }
            center /= nv as f32;
            if let Some(h) = detail.height_at(p, center) {
                assert!((h - 1.0).abs() < 0.51, "height {h} too far from 1.0");
            }
        }
    }
}
