//! Region boundary tracing and simplification.

use glam::Vec3;
use walkway_common::{BuildContext, Error, Result, TimerCategory};

use crate::compact::{
    BORDER_REGION, CompactHeightfield, CompactSpan, DIR_OFFSET_X, DIR_OFFSET_Z, NOT_CONNECTED,
};
use crate::heightfield::NULL_AREA;

/// Vertex flag: the vertex borders another region.
pub const CONTOUR_REG_MASK: u32 = 0xffff;
/// Vertex flag: the edge crosses an area boundary.
pub const AREA_BORDER_FLAG: u32 = 0x20000;
/// Vertex flag: the vertex sits on a border region edge.
pub const BORDER_VERTEX_FLAG: u32 = 0x10000;

/// One traced region boundary.
#[derive(Debug, Clone)]
pub struct Contour {
    /// Simplified vertices: x, y, z in cell units plus the neighbor tag.
    pub verts: Vec<[i32; 4]>,
    /// Raw, unsimplified vertices kept for diagnostics.
    pub rverts: Vec<[i32; 4]>,
    /// Region the contour encloses.
    pub reg: u16,
    /// Area of the region.
    pub area: u8,
}

/// All contours of a build run.
#[derive(Debug)]
pub struct ContourSet {
    /// Traced contours.
    pub contours: Vec<Contour>,
    /// Minimum bounds.
    pub bmin: Vec3,
    /// Maximum bounds.
    pub bmax: Vec3,
    /// Horizontal cell size.
    pub cs: f32,
    /// Vertical cell size.
    pub ch: f32,
    /// Grid width covered by the set.
    pub width: i32,
    /// Grid height covered by the set.
    pub height: i32,
    /// Border band baked into the coordinates.
    pub border_size: i32,
}

impl ContourSet {
    /// Traces every region of the compact heightfield into a simplified
    /// contour.
    pub fn build(
        ctx: &mut BuildContext,
        chf: &CompactHeightfield,
        max_error: f32,
        max_edge_len: i32,
    ) -> Result<Self> {
        ctx.start_timer(TimerCategory::Contours);

        let w = chf.width;
        let h = chf.height;
        let border = chf.border_size;

        let mut cset = ContourSet {
            contours: Vec::new(),
            bmin: chf.bmin,
            bmax: chf.bmax,
            cs: chf.cs,
            ch: chf.ch,
            width: w - border * 2,
            height: h - border * 2,
            border_size: border,
        };

        // Mark boundary edges: bit per direction where the neighbor has a
        // different region.
        let mut flags = vec![0u8; chf.span_count];
        for z in 0..h {
            for x in 0..w {
                let cell = chf.cells[(x + z * w) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    let span = chf.spans[i];
                    if span.reg == 0 || span.reg & BORDER_REGION != 0 {
                        continue;
                    }
                    let mut res = 0u8;
                    for dir in 0..4 {
                        let nreg = chf
                            .neighbor_span(x, z, &span, dir)
                            .map(|n| chf.spans[n].reg)
                            .unwrap_or(0);
                        if nreg == span.reg {
                            res |= 1 << dir;
                        }
                    }
                    // Flip so set bits mean "boundary here".
                    flags[i] = res ^ 0x0f;
                }
            }
        }

        for z in 0..h {
            for x in 0..w {
                let cell = chf.cells[(x + z * w) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    if flags[i] == 0 || flags[i] == 0x0f {
                        flags[i] = 0;
                        continue;
                    }
                    let reg = chf.spans[i].reg;
                    if reg == 0 || reg & BORDER_REGION != 0 {
                        continue;
                    }
                    let area = chf.areas[i];

                    let raw = walk_contour(chf, x, z, i, &mut flags);
                    if raw.len() < 3 {
                        continue;
                    }

                    let mut simplified = simplify_contour(&raw, max_error, max_edge_len);
                    remove_degenerate_segments(&mut simplified);

                    if simplified.len() >= 3 {
                        let mut raw = raw;
                        // Strip the border offset so tile coordinates start
                        // at the walkable area.
                        if border > 0 {
                            for v in simplified.iter_mut().chain(raw.iter_mut()) {
                                v[0] -= border;
                                v[2] -= border;
                            }
                        }
                        cset.contours.push(Contour {
                            verts: simplified,
                            rverts: raw,
                            reg,
                            area,
                        });
                    }
                }
            }
        }

        // A region that traced into fewer than three vertices would leave a
        // hole in the mesh; that is a build failure, not a warning.
        if cset.contours.is_empty() && chf.max_regions > 0 {
            ctx.stop_timer(TimerCategory::Contours);
            ctx.log_error("contours", "no contours produced from regions");
            return Err(Error::BuildFailed(
                "no contours produced from regions".to_string(),
            ));
        }

        ctx.stop_timer(TimerCategory::Contours);
        ctx.log_info("contours", format!("{} contours", cset.contours.len()));
        Ok(cset)
    }
}

/// Height of the corner between a span and its neighbors in `dir`.
fn corner_height(
    chf: &CompactHeightfield,
    x: i32,
    z: i32,
    i: usize,
    dir: usize,
    is_border_vertex: &mut bool,
) -> i32 {
    let span = chf.spans[i];
    let mut height = span.y as i32;
    let dirp = (dir + 1) & 0x3;

    let mut regs = [0u32; 4];
    regs[0] = span.reg as u32 | ((chf.areas[i] as u32) << 16);

    if let Some(n) = chf.neighbor_span(x, z, &span, dir) {
        let nspan = chf.spans[n];
        height = height.max(nspan.y as i32);
        regs[1] = nspan.reg as u32 | ((chf.areas[n] as u32) << 16);
        let nx = x + DIR_OFFSET_X[dir];
        let nz = z + DIR_OFFSET_Z[dir];
        if let Some(nn) = chf.neighbor_span(nx, nz, &nspan, dirp) {
            let nnspan = chf.spans[nn];
            height = height.max(nnspan.y as i32);
            regs[2] = nnspan.reg as u32 | ((chf.areas[nn] as u32) << 16);
        }
    }
    if let Some(n) = chf.neighbor_span(x, z, &span, dirp) {
        let nspan = chf.spans[n];
        height = height.max(nspan.y as i32);
        regs[3] = nspan.reg as u32 | ((chf.areas[n] as u32) << 16);
        let nx = x + DIR_OFFSET_X[dirp];
        let nz = z + DIR_OFFSET_Z[dirp];
        if let Some(nn) = chf.neighbor_span(nx, nz, &nspan, dir) {
            let nnspan = chf.spans[nn];
            height = height.max(nnspan.y as i32);
            regs[2] = nnspan.reg as u32 | ((chf.areas[nn] as u32) << 16);
        }
    }

    // The vertex is a border vertex when exactly two of the surrounding
    // regions are border regions crossing diagonally.
    for j in 0..4 {
        let a = regs[j];
        let b = regs[(j + 1) & 0x3];
        let c = regs[(j + 2) & 0x3];
        let d = regs[(j + 3) & 0x3];
        let two_same_exterior =
            (a & b & BORDER_REGION as u32) != 0 && a == b;
        let two_interior = c != 0 && d != 0;
        if two_same_exterior && two_interior {
            *is_border_vertex = true;
            break;
        }
    }

    height
}

/// Walks the boundary of a region starting from a flagged span.
fn walk_contour(
    chf: &CompactHeightfield,
    mut x: i32,
    mut z: i32,
    mut i: usize,
    flags: &mut [u8],
) -> Vec<[i32; 4]> {
    let mut points: Vec<[i32; 4]> = Vec::new();

    // Pick the first flagged direction as the start edge.
    let mut dir = 0usize;
    while flags[i] & (1 << dir) == 0 {
        dir += 1;
    }
    let start_i = i;
    let start_dir = dir;

    let max_iter = chf.span_count * 4;
    for _ in 0..max_iter {
        if flags[i] & (1 << dir) != 0 {
            // Emit a vertex at the corner of this edge.
            let mut is_border_vertex = false;
            let span = chf.spans[i];
            let py = corner_height(chf, x, z, i, dir, &mut is_border_vertex);
            let mut px = x;
            let mut pz = z;
            match dir {
                0 => pz += 1,
                1 => {
                    px += 1;
                    pz += 1;
                }
                2 => px += 1,
                _ => {}
            }

            let mut r = chf
                .neighbor_span(x, z, &span, dir)
                .map(|n| chf.spans[n].reg as u32)
                .unwrap_or(0);
            if is_border_vertex {
                r |= BORDER_VERTEX_FLAG;
            }
            if let Some(n) = chf.neighbor_span(x, z, &span, dir) {
                if chf.areas[n] != chf.areas[i] {
                    r |= AREA_BORDER_FLAG;
                }
            }
            points.push([px, py, pz, r as i32]);

            flags[i] &= !(1 << dir);
            dir = (dir + 1) & 0x3;
        } else {
            let span = chf.spans[i];
            let ni = if span.con[dir] != NOT_CONNECTED {
                chf.neighbor_span(x, z, &span, dir)
            } else {
                None
            };
            let Some(ni) = ni else {
                // Should not happen: an unflagged edge must be connected.
                break;
            };
            x += DIR_OFFSET_X[dir];
            z += DIR_OFFSET_Z[dir];
            i = ni;
            dir = (dir + 3) & 0x3;
        }

        if i == start_i && dir == start_dir {
            break;
        }
    }

    points
}

/// Simplifies a raw contour within `max_error` and splits long edges.
fn simplify_contour(points: &[[i32; 4]], max_error: f32, max_edge_len: i32) -> Vec<[i32; 4]> {
    // Does the contour touch more than one neighbor region?
    let has_connections = points
        .iter()
        .any(|p| (p[3] as u32 & CONTOUR_REG_MASK) != 0);

    let mut simplified: Vec<[i32; 4]> = Vec::new();

    if has_connections {
        // Keep vertices where the neighbor region changes.
        let n = points.len();
        for i in 0..n {
            let ii = (i + 1) % n;
            let different_regs =
                (points[i][3] as u32 & CONTOUR_REG_MASK) != (points[ii][3] as u32 & CONTOUR_REG_MASK);
            let area_border = (points[i][3] as u32 & AREA_BORDER_FLAG)
                != (points[ii][3] as u32 & AREA_BORDER_FLAG);
            if different_regs || area_border {
                simplified.push([points[i][0], points[i][1], points[i][2], i as i32]);
            }
        }
    }

    if simplified.is_empty() {
        // Closed loop around one region: seed with the lower-left and
        // upper-right vertices so the loop cannot collapse.
        let mut llx = points[0][0];
        let mut lly = points[0][1];
        let mut llz = points[0][2];
        let mut lli = 0usize;
        let mut urx = points[0][0];
        let mut ury = points[0][1];
        let mut urz = points[0][2];
        let mut uri = 0usize;
        for (i, p) in points.iter().enumerate() {
            if p[0] < llx || (p[0] == llx && p[2] < llz) {
                llx = p[0];
                lly = p[1];
                llz = p[2];
                lli = i;
            }
            if p[0] > urx || (p[0] == urx && p[2] > urz) {
                urx = p[0];
                ury = p[1];
                urz = p[2];
                uri = i;
            }
        }
        simplified.push([llx, lly, llz, lli as i32]);
        simplified.push([urx, ury, urz, uri as i32]);
    }

    // Add points until every raw vertex is within max_error of the
    // simplified outline.
    let pn = points.len();
    let mut i = 0usize;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();
        let ax = simplified[i][0];
        let az = simplified[i][2];
        let ai = simplified[i][3] as usize;
        let bx = simplified[ii][0];
        let bz = simplified[ii][2];
        let bi = simplified[ii][3] as usize;

        // Traverse raw segment in lexicographic direction for determinism.
        let (mut ci, endi) = if bx > ax || (bx == ax && bz > az) {
            ((ai + 1) % pn, bi)
        } else {
            ((bi + 1) % pn, ai)
        };

        let mut max_dev = 0.0f32;
        let mut max_i: Option<usize> = None;

        // Only outer (unconnected) edges are tessellated; edges shared with
        // another region must keep matching vertices on both sides.
        if (points[ci][3] as u32 & CONTOUR_REG_MASK) != 0 {
            i += 1;
            continue;
        }
        while ci != endi {
            let d = dist_pt_seg_2d(
                points[ci][0] as f32,
                points[ci][2] as f32,
                ax as f32,
                az as f32,
                bx as f32,
                bz as f32,
            );
            if d > max_dev {
                max_dev = d;
                max_i = Some(ci);
            }
            ci = (ci + 1) % pn;
        }

        if let Some(mi) = max_i {
            if max_dev > max_error * max_error {
                simplified.insert(
                    i + 1,
                    [points[mi][0], points[mi][1], points[mi][2], mi as i32],
                );
                continue;
            }
        }
        i += 1;
    }

    // Split edges longer than max_edge_len.
    if max_edge_len > 0 {
        let mut i = 0usize;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();
            let ax = simplified[i][0];
            let az = simplified[i][2];
            let ai = simplified[i][3] as usize;
            let bx = simplified[ii][0];
            let bz = simplified[ii][2];
            let bi = simplified[ii][3] as usize;

            let dx = bx - ax;
            let dz = bz - az;
            if dx * dx + dz * dz > max_edge_len * max_edge_len {
                let n = if bi < ai { bi + pn - ai } else { bi - ai };
                if n > 1 {
                    let mi = if bx > ax || (bx == ax && bz > az) {
                        (ai + n / 2) % pn
                    } else {
                        (ai + (n + 1) / 2) % pn
                    };
                    simplified.insert(
                        i + 1,
                        [points[mi][0], points[mi][1], points[mi][2], mi as i32],
                    );
                    continue;
                }
            }
            i += 1;
        }
    }

    // Rewrite the index slot with the neighbor tag of the matching raw point.
    for v in simplified.iter_mut() {
        let ai = (v[3] as usize + 1) % pn;
        let bi = v[3] as usize;
        v[3] = ((points[ai][3] as u32 & (CONTOUR_REG_MASK | AREA_BORDER_FLAG))
            | (points[bi][3] as u32 & BORDER_VERTEX_FLAG)) as i32;
    }

    simplified
}

fn dist_pt_seg_2d(px: f32, pz: f32, ax: f32, az: f32, bx: f32, bz: f32) -> f32 {
    let dx = bx - ax;
    let dz = bz - az;
    let d = dx * dx + dz * dz;
    let mut t = dx * (px - ax) + dz * (pz - az);
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);
    let rx = ax + t * dx - px;
    let rz = az + t * dz - pz;
    rx * rx + rz * rz
}

fn remove_degenerate_segments(simplified: &mut Vec<[i32; 4]>) {
    let mut i = 0usize;
    while i < simplified.len() {
        let ni = (i + 1) % simplified.len();
        if simplified[i][0] == simplified[ni][0] && simplified[i][2] == simplified[ni][2] {
            simplified.remove(ni);
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::{Heightfield, WALKABLE_AREA};
    use crate::region::build_regions_watershed;

    fn contoured(size: i32) -> ContourSet {
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
        ContourSet::build(&mut ctx, &chf, 1.3, 12).unwrap()
    }

    #[test]
    fn test_flat_field_traces_one_contour() {
        let cset = contoured(8);
        assert_eq!(cset.contours.len(), 1);
        let c = &cset.contours[0];
        assert!(c.verts.len() >= 4);
        assert_eq!(c.area, WALKABLE_AREA);
    }

    #[test]
    fn test_contour_is_closed_square() {
        let cset = contoured(6);
        let c = &cset.contours[0];
        // The outline of a 6x6 plate must span the full grid.
        let min_x = c.verts.iter().map(|v| v[0]).min().unwrap();
        let max_x = c.verts.iter().map(|v| v[0]).max().unwrap();
        let min_z = c.verts.iter().map(|v| v[2]).min().unwrap();
        let max_z = c.verts.iter().map(|v| v[2]).max().unwrap();
        assert_eq!((min_x, min_z), (0, 0));
        assert_eq!((max_x, max_z), (6, 6));
    }

    #[test]
    fn test_hole_produces_inner_boundary() {
        // A plate with an unwalkable hole in the middle produces a contour
        // whose raw outline is longer than the plain square's.
        let size = 9;
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
                let area = if x == 4 && z == 4 { NULL_AREA } else { WALKABLE_AREA };
                hf.add_span(x, z, 0, 1, area, 1).unwrap();
            }
        }
        let mut ctx = BuildContext::new();
        let mut chf = CompactHeightfield::build(&mut ctx, &hf, 2, 1).unwrap();
        build_regions_watershed(&mut ctx, &mut chf, 0, 2, 10).unwrap();
        let cset = ContourSet::build(&mut ctx, &chf, 1.3, 12).unwrap();

        assert!(!cset.contours.is_empty());
        let total_raw: usize = cset.contours.iter().map(|c| c.rverts.len()).sum();
        let plain = contoured(9);
        let plain_raw: usize = plain.contours.iter().map(|c| c.rverts.len()).sum();
        assert!(total_raw > plain_raw);
    }
}
