//! Convex polygon mesh built from simplified contours.

use std::collections::HashMap;

use glam::Vec3;
use walkway_common::{BuildContext, Error, Result, TimerCategory};

use crate::contour::ContourSet;

/// Hard cap on vertices per polygon.
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Marker for an unused vertex/neighbor slot.
pub const MESH_NULL_IDX: u16 = 0xffff;

/// Neighbor flag marking a tile-border edge; the low bits carry the side.
pub const BORDER_EDGE: u16 = 0x8000;

/// Polygon mesh: welded vertices plus fixed-stride polygon records.
///
/// Each polygon occupies `2 * nvp` entries in `polys`: `nvp` vertex indices
/// (padded with [`MESH_NULL_IDX`]) followed by `nvp` neighbor entries
/// (polygon index, [`BORDER_EDGE`]`|side` on tile borders, or
/// [`MESH_NULL_IDX`] for a wall).
#[derive(Debug, Clone)]
pub struct PolyMesh {
    /// Welded vertices in cell units.
    pub verts: Vec<[u16; 3]>,
    /// Polygon vertex/neighbor records, `2 * nvp` entries per polygon.
    pub polys: Vec<u16>,
    /// Source region per polygon.
    pub regs: Vec<u16>,
    /// Flags per polygon, free for the caller.
    pub flags: Vec<u16>,
    /// Area id per polygon.
    pub areas: Vec<u8>,
    /// Vertex cap this mesh was built with.
    pub nvp: usize,
    /// Minimum bounds.
    pub bmin: Vec3,
    /// Maximum bounds.
    pub bmax: Vec3,
    /// Horizontal cell size.
    pub cs: f32,
    /// Vertical cell size.
    pub ch: f32,
    /// Border band the source tile was built with.
    pub border_size: i32,
}

impl PolyMesh {
    /// Number of polygons in the mesh.
    pub fn poly_count(&self) -> usize {
        if self.nvp == 0 {
            0
        } else {
            self.polys.len() / (self.nvp * 2)
        }
    }

    /// Vertex indices of one polygon.
    pub fn poly_verts(&self, poly: usize) -> &[u16] {
        let base = poly * self.nvp * 2;
        &self.polys[base..base + self.nvp]
    }

    /// Neighbor entries of one polygon.
    pub fn poly_neighbors(&self, poly: usize) -> &[u16] {
        let base = poly * self.nvp * 2;
        &self.polys[base + self.nvp..base + self.nvp * 2]
    }

    /// Number of used vertices in one polygon.
    pub fn poly_vert_count(&self, poly: usize) -> usize {
        self.poly_verts(poly)
            .iter()
            .take_while(|&&v| v != MESH_NULL_IDX)
            .count()
    }

    /// Builds the polygon mesh from a contour set.
    pub fn build(ctx: &mut BuildContext, cset: &ContourSet, nvp: usize) -> Result<Self> {
        if nvp < 3 || nvp > MAX_VERTS_PER_POLY {
            return Err(Error::InvalidMesh(format!(
                "verts per poly {nvp} out of range"
            )));
        }
        ctx.start_timer(TimerCategory::PolyMesh);

        let mut mesh = PolyMesh {
            verts: Vec::new(),
            polys: Vec::new(),
            regs: Vec::new(),
            flags: Vec::new(),
            areas: Vec::new(),
            nvp,
            bmin: cset.bmin,
            bmax: cset.bmax,
            cs: cset.cs,
            ch: cset.ch,
            border_size: cset.border_size,
        };

        let mut vert_lookup: HashMap<(u16, u16), Vec<u16>> = HashMap::new();

        for contour in &cset.contours {
            let n = contour.verts.len();
            if n < 3 {
                continue;
            }

            // Triangulate the contour outline.
            let mut indices: Vec<usize> = (0..n).collect();
            let tris = triangulate(&contour.verts, &mut indices).ok_or_else(|| {
                ctx.log_error(
                    "polymesh",
                    format!("failed to triangulate contour for region {}", contour.reg),
                );
                Error::BuildFailed(format!(
                    "failed to triangulate contour for region {}",
                    contour.reg
                ))
            })?;

            // Weld contour vertices into the mesh vertex pool.
            let mut contour_to_mesh = vec![0u16; n];
            for (i, v) in contour.verts.iter().enumerate() {
                contour_to_mesh[i] = add_vertex(
                    &mut mesh.verts,
                    &mut vert_lookup,
                    v[0] as u16,
                    v[1] as u16,
                    v[2] as u16,
                )?;
            }

            // Start with triangles, then merge greedily into n-gons.
            let mut polys: Vec<Vec<u16>> = tris
                .iter()
                .map(|t| {
                    vec![
                        contour_to_mesh[t[0]],
                        contour_to_mesh[t[1]],
                        contour_to_mesh[t[2]],
                    ]
                })
                .collect();

            if nvp > 3 {
                loop {
                    let mut best_value = 0i64;
                    let mut best_pair: Option<(usize, usize, usize, usize)> = None;
                    for a in 0..polys.len() {
                        for b in a + 1..polys.len() {
                            if let Some((value, ea, eb)) =
                                poly_merge_value(&polys[a], &polys[b], &mesh.verts, nvp)
                            {
                                if value > best_value {
                                    best_value = value;
                                    best_pair = Some((a, b, ea, eb));
                                }
                            }
                        }
                    }
                    let Some((a, b, ea, eb)) = best_pair else {
                        break;
                    };
                    let merged = merge_polys(&polys[a], &polys[b], ea, eb);
                    polys[a] = merged;
                    polys.remove(b);
                }
            }

            for poly in polys {
                if poly.len() > nvp {
                    ctx.stop_timer(TimerCategory::PolyMesh);
                    ctx.log_error(
                        "polymesh",
                        format!("polygon exceeds vertex cap in region {}", contour.reg),
                    );
                    return Err(Error::BuildFailed(format!(
                        "polygon exceeds vertex cap in region {}",
                        contour.reg
                    )));
                }
                let base = mesh.polys.len();
                mesh.polys.resize(base + nvp * 2, MESH_NULL_IDX);
                for (j, &v) in poly.iter().enumerate() {
                    mesh.polys[base + j] = v;
                }
                mesh.regs.push(contour.reg);
                mesh.flags.push(0);
                mesh.areas.push(contour.area);
            }
        }

        if mesh.verts.len() >= MESH_NULL_IDX as usize {
            ctx.stop_timer(TimerCategory::PolyMesh);
            return Err(Error::SerializationLimit(format!(
                "too many vertices in poly mesh: {}",
                mesh.verts.len()
            )));
        }

        build_adjacency(&mut mesh)?;
        mark_border_edges(&mut mesh, cset);

        ctx.stop_timer(TimerCategory::PolyMesh);
        ctx.log_info(
            "polymesh",
            format!(
                "{} polygons over {} vertices",
                mesh.poly_count(),
                mesh.verts.len()
            ),
        );
        Ok(mesh)
    }
}

fn add_vertex(
    verts: &mut Vec<[u16; 3]>,
    lookup: &mut HashMap<(u16, u16), Vec<u16>>,
    x: u16,
    y: u16,
    z: u16,
) -> Result<u16> {
    let bucket = lookup.entry((x, z)).or_default();
    for &i in bucket.iter() {
        let v = verts[i as usize];
        // Merge with nearly coincident vertices differing only in height.
        if (v[1] as i32 - y as i32).abs() <= 2 {
            return Ok(i);
        }
    }
    if verts.len() >= MESH_NULL_IDX as usize {
        return Err(Error::SerializationLimit(
            "vertex count exceeds index range".to_string(),
        ));
    }
    let idx = verts.len() as u16;
    verts.push([x, y, z]);
    bucket.push(idx);
    Ok(idx)
}

#[inline]
fn area2(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> i64 {
    (b[0] as i64 - a[0] as i64) * (c[2] as i64 - a[2] as i64)
        - (c[0] as i64 - a[0] as i64) * (b[2] as i64 - a[2] as i64)
}

fn left(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    area2(a, b, c) < 0
}

fn left_on(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    area2(a, b, c) <= 0
}

fn collinear(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    area2(a, b, c) == 0
}

fn between(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[2] <= c[2] && c[2] <= b[2]) || (a[2] >= c[2] && c[2] >= b[2])
    }
}

fn intersect_prop(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4], d: &[i32; 4]) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

fn intersect(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4], d: &[i32; 4]) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

fn diagonalie(i: usize, j: usize, verts: &[[i32; 4]], indices: &[usize]) -> bool {
    let n = indices.len();
    let d0 = &verts[indices[i]];
    let d1 = &verts[indices[j]];
    for k in 0..n {
        let k1 = (k + 1) % n;
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = &verts[indices[k]];
        let p1 = &verts[indices[k1]];
        if (d0[0] == p0[0] && d0[2] == p0[2])
            || (d1[0] == p0[0] && d1[2] == p0[2])
            || (d0[0] == p1[0] && d0[2] == p1[2])
            || (d1[0] == p1[0] && d1[2] == p1[2])
        {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

fn in_cone(i: usize, j: usize, verts: &[[i32; 4]], indices: &[usize]) -> bool {
    let n = indices.len();
    let pi = &verts[indices[i]];
    let pj = &verts[indices[j]];
    let pi1 = &verts[indices[(i + 1) % n]];
    let pin1 = &verts[indices[(i + n - 1) % n]];

    if left_on(pin1, pi, pi1) {
        left(pi, pj, pin1) && left(pj, pi, pi1)
    } else {
        !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
    }
}

fn diagonal(i: usize, j: usize, verts: &[[i32; 4]], indices: &[usize]) -> bool {
    in_cone(i, j, verts, indices) && diagonalie(i, j, verts, indices)
}

/// Ear-clipping triangulation of a simple polygon. Returns index triples
/// into the original vertex order, or `None` when the outline is too
/// degenerate to clip.
fn triangulate(verts: &[[i32; 4]], indices: &mut Vec<usize>) -> Option<Vec<[usize; 3]>> {
    let mut tris = Vec::new();

    while indices.len() > 3 {
        let n = indices.len();
        // Pick the ear with the shortest clipped diagonal.
        let mut best: Option<(usize, i64)> = None;
        for i in 0..n {
            if !diagonal(i, (i + 2) % n, verts, indices) {
                continue;
            }
            let p0 = &verts[indices[i]];
            let p2 = &verts[indices[(i + 2) % n]];
            let dx = (p2[0] - p0[0]) as i64;
            let dz = (p2[2] - p0[2]) as i64;
            let len = dx * dx + dz * dz;
            if best.map(|(_, l)| len < l).unwrap_or(true) {
                best = Some((i, len));
            }
        }

        let Some((i, _)) = best else {
            // The remaining outline has no ear; the contour self-crosses.
            return None;
        };

        let i1 = (i + 1) % n;
        tris.push([indices[i], indices[i1], indices[(i + 2) % n]]);
        indices.remove(i1);
    }

    tris.push([indices[0], indices[1], indices[2]]);
    Some(tris)
}

/// Evaluates merging two polygons over a shared edge.
///
/// Returns the squared length of the shared edge plus the edge positions in
/// either polygon, or `None` when no legal merge exists.
fn poly_merge_value(
    pa: &[u16],
    pb: &[u16],
    verts: &[[u16; 3]],
    nvp: usize,
) -> Option<(i64, usize, usize)> {
    let na = pa.len();
    let nb = pb.len();
    if na + nb - 2 > nvp {
        return None;
    }

    // Find the shared edge.
    let mut ea = None;
    let mut eb = None;
    for i in 0..na {
        let va0 = pa[i];
        let va1 = pa[(i + 1) % na];
        for j in 0..nb {
            let vb0 = pb[j];
            let vb1 = pb[(j + 1) % nb];
            if va0 == vb1 && va1 == vb0 {
                ea = Some(i);
                eb = Some(j);
            }
        }
    }
    let (ea, eb) = (ea?, eb?);

    // Convexity at both junction corners.
    let get = |p: &[u16], i: usize| -> [i32; 4] {
        let v = verts[p[i] as usize];
        [v[0] as i32, v[1] as i32, v[2] as i32, 0]
    };

    let va = get(pa, (ea + na - 1) % na);
    let vb = get(pa, ea);
    let vc = get(pb, (eb + 2) % nb);
    if !left(&va, &vb, &vc) {
        return None;
    }

    let va = get(pb, (eb + nb - 1) % nb);
    let vb = get(pb, eb);
    let vc = get(pa, (ea + 2) % na);
    if !left(&va, &vb, &vc) {
        return None;
    }

    let va = get(pa, ea);
    let vb = get(pa, (ea + 1) % na);
    let dx = (va[0] - vb[0]) as i64;
    let dz = (va[2] - vb[2]) as i64;
    Some((dx * dx + dz * dz, ea, eb))
}

fn merge_polys(pa: &[u16], pb: &[u16], ea: usize, eb: usize) -> Vec<u16> {
    let na = pa.len();
    let nb = pb.len();
    let mut merged = Vec::with_capacity(na + nb - 2);
    for i in 0..na - 1 {
        merged.push(pa[(ea + 1 + i) % na]);
    }
    for i in 0..nb - 1 {
        merged.push(pb[(eb + 1 + i) % nb]);
    }
    merged
}

fn build_adjacency(mesh: &mut PolyMesh) -> Result<()> {
    let nvp = mesh.nvp;
    let poly_count = mesh.poly_count();

    // Edge map keyed on the ordered vertex pair.
    let mut edges: HashMap<(u16, u16), (usize, usize)> = HashMap::new();
    for p in 0..poly_count {
        let nv = mesh.poly_vert_count(p);
        for j in 0..nv {
            let v0 = mesh.polys[p * nvp * 2 + j];
            let v1 = mesh.polys[p * nvp * 2 + (j + 1) % nv];
            let key = (v0.min(v1), v0.max(v1));
            if let Some(&(op, oj)) = edges.get(&key) {
                // Matched the other side of the edge.
                mesh.polys[p * nvp * 2 + nvp + j] = op as u16;
                mesh.polys[op * nvp * 2 + nvp + oj] = p as u16;
            } else {
                edges.insert(key, (p, j));
            }
        }
    }
    Ok(())
}

fn mark_border_edges(mesh: &mut PolyMesh, cset: &ContourSet) {
    let nvp = mesh.nvp;
    let w = cset.width as u16;
    let h = cset.height as u16;

    for p in 0..mesh.poly_count() {
        let nv = mesh.poly_vert_count(p);
        for j in 0..nv {
            if mesh.polys[p * nvp * 2 + nvp + j] != MESH_NULL_IDX {
                continue;
            }
            let v0 = mesh.verts[mesh.polys[p * nvp * 2 + j] as usize];
            let v1 = mesh.verts[mesh.polys[p * nvp * 2 + (j + 1) % nv] as usize];

            let side = if v0[0] == 0 && v1[0] == 0 {
                Some(0u16)
            } else if v0[2] == h && v1[2] == h {
                Some(1)
            } else if v0[0] == w && v1[0] == w {
                Some(2)
            } else if v0[2] == 0 && v1[2] == 0 {
                Some(3)
            } else {
                None
            };
            if let Some(side) = side {
                mesh.polys[p * nvp * 2 + nvp + j] = BORDER_EDGE | side;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact::CompactHeightfield;
    use crate::heightfield::{Heightfield, WALKABLE_AREA};
    use crate::region::build_regions_watershed;

    fn build_mesh(size: i32) -> PolyMesh {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 20.0, size as f32),
            1.0,
            1.0,
        )
        .unwrap();
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 1, WALKABLE_AREA, 1).unwrap();
            }
        }
        let mut ctx = BuildContext::new();
        let mut chf = CompactHeightfield::build(&mut ctx, &hf, 2, 1).unwrap();
        build_regions_watershed(&mut ctx, &mut chf, 0, 2, 10).unwrap();
        let cset = ContourSet::build(&mut ctx, &chf, 1.3, 12).unwrap();
        PolyMesh::build(&mut ctx, &cset, MAX_VERTS_PER_POLY).unwrap()
    }

    #[test]
    fn test_flat_plate_produces_polys() {
        let mesh = build_mesh(8);
        assert!(mesh.poly_count() >= 1);
        assert!(mesh.verts.len() >= 4);
        for p in 0..mesh.poly_count() {
            let nv = mesh.poly_vert_count(p);
            assert!((3..=MAX_VERTS_PER_POLY).contains(&nv));
        }
    }

    #[test]
    fn test_adjacency_is_symmetric() {
        let mesh = build_mesh(10);
        let nvp = mesh.nvp;
        for p in 0..mesh.poly_count() {
            let nv = mesh.poly_vert_count(p);
            for j in 0..nv {
                let n = mesh.polys[p * nvp * 2 + nvp + j];
                if n == MESH_NULL_IDX || n & BORDER_EDGE != 0 {
                    continue;
                }
                let np = n as usize;
                let back = mesh
                    .poly_neighbors(np)
                    .iter()
                    .any(|&nn| nn as usize == p);
                assert!(back, "poly {np} does not link back to {p}");
            }
        }
    }

    #[test]
    fn test_rejects_bad_vertex_cap() {
        let mut ctx = BuildContext::new();
        let cset = ContourSet {
            contours: Vec::new(),
            bmin: Vec3::ZERO,
            bmax: Vec3::ONE,
            cs: 1.0,
            ch: 1.0,
            width: 1,
            height: 1,
            border_size: 0,
        };
        assert!(PolyMesh::build(&mut ctx, &cset, 2).is_err());
        assert!(PolyMesh::build(&mut ctx, &cset, 7).is_err());
    }

    #[test]
    fn test_triangulate_square() {
        // Contour winding: clockwise seen from above.
        let verts = vec![
            [0, 0, 0, 0],
            [0, 0, 4, 0],
            [4, 0, 4, 0],
            [4, 0, 0, 0],
        ];
        let mut indices: Vec<usize> = (0..4).collect();
        let tris = triangulate(&verts, &mut indices).unwrap();
        assert_eq!(tris.len(), 2);
    }

    #[test]
    fn test_merge_two_triangles_into_quad() {
        let verts: Vec<[u16; 3]> = vec![[0, 0, 0], [0, 0, 4], [4, 0, 4], [4, 0, 0]];
        let pa = vec![0u16, 1, 2];
        let pb = vec![0u16, 2, 3];
        let (val, ea, eb) = poly_merge_value(&pa, &pb, &verts, 6).unwrap();
        assert!(val > 0);
        let merged = merge_polys(&pa, &pb, ea, eb);
        assert_eq!(merged.len(), 4);
    }
}
