//! Triangle rasterization into the heightfield.

use glam::Vec3;
use walkway_common::{BuildContext, Result, TimerCategory};

use crate::config::BuildConfig;
use crate::heightfield::{Heightfield, MAX_SPAN_HEIGHT, NULL_AREA, WALKABLE_AREA};

/// Marks triangles whose slope is walkable.
///
/// A triangle is walkable when the y component of its unit normal is at
/// least the cosine of the walkable slope angle. Already-assigned area ids
/// are kept; only `NULL_AREA` entries are promoted.
pub fn mark_walkable_triangles(
    walkable_slope_angle: f32,
    verts: &[Vec3],
    tris: &[[u32; 3]],
    areas: &mut [u8],
) {
    let threshold = walkable_slope_angle.to_radians().cos();
    for (i, tri) in tris.iter().enumerate() {
        if areas[i] != NULL_AREA {
            continue;
        }
        if let Some(normal) = triangle_normal(verts, tri) {
            if normal.y > threshold {
                areas[i] = WALKABLE_AREA;
            }
        }
    }
}

/// Clears the area of triangles whose slope is too steep.
pub fn clear_unwalkable_triangles(
    walkable_slope_angle: f32,
    verts: &[Vec3],
    tris: &[[u32; 3]],
    areas: &mut [u8],
) {
    let threshold = walkable_slope_angle.to_radians().cos();
    for (i, tri) in tris.iter().enumerate() {
        if let Some(normal) = triangle_normal(verts, tri) {
            if normal.y <= threshold {
                areas[i] = NULL_AREA;
            }
        }
    }
}

fn triangle_normal(verts: &[Vec3], tri: &[u32; 3]) -> Option<Vec3> {
    let v0 = verts[tri[0] as usize];
    let v1 = verts[tri[1] as usize];
    let v2 = verts[tri[2] as usize];
    let cross = (v1 - v0).cross(v2 - v0);
    if cross.length_squared() < f32::EPSILON {
        None
    } else {
        Some(cross.normalize())
    }
}

/// Rasterizes a triangle soup into the heightfield.
///
/// `areas` carries one area id per triangle, typically produced by
/// [`mark_walkable_triangles`].
pub fn rasterize_triangles(
    ctx: &mut BuildContext,
    hf: &mut Heightfield,
    cfg: &BuildConfig,
    verts: &[Vec3],
    tris: &[[u32; 3]],
    areas: &[u8],
) -> Result<()> {
    ctx.start_timer(TimerCategory::Rasterization);

    for (i, tri) in tris.iter().enumerate() {
        let v0 = verts[tri[0] as usize];
        let v1 = verts[tri[1] as usize];
        let v2 = verts[tri[2] as usize];
        rasterize_triangle(hf, v0, v1, v2, areas[i], cfg.walkable_climb)?;
    }

    ctx.stop_timer(TimerCategory::Rasterization);
    ctx.log_info(
        "rasterize",
        format!("rasterized {} triangles", tris.len()),
    );
    Ok(())
}

/// Rasterizes one triangle by clipping it to every cell it touches.
pub fn rasterize_triangle(
    hf: &mut Heightfield,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    area: u8,
    flag_merge_threshold: i32,
) -> Result<()> {
    let tmin = v0.min(v1).min(v2);
    let tmax = v0.max(v1).max(v2);

    // Triangle fully outside the grid.
    if !walkway_common::overlap_bounds(tmin, tmax, hf.bmin, hf.bmax) {
        return Ok(());
    }

    let inv_cs = 1.0 / hf.cs;
    let inv_ch = 1.0 / hf.ch;
    let by = hf.bmax.y - hf.bmin.y;

    let z0 = (((tmin.z - hf.bmin.z) * inv_cs) as i32).clamp(-1, hf.height - 1);
    let z1 = (((tmax.z - hf.bmin.z) * inv_cs) as i32).clamp(0, hf.height - 1);

    // Clip the triangle into horizontal rows, then each row into cells.
    let mut input = [Vec3::ZERO; 7 * 2];
    let mut row = [Vec3::ZERO; 7 * 2];
    let mut left = [Vec3::ZERO; 7 * 2];
    let mut remainder = [Vec3::ZERO; 7 * 2];

    input[0] = v0;
    input[1] = v1;
    input[2] = v2;
    let mut nv_in = 3usize;

    for z in z0..=z1 {
        let cell_z = hf.bmin.z + z as f32 * hf.cs;
        let (nv_row, nv_rem) = divide_poly(
            &input[..nv_in],
            &mut row,
            &mut remainder,
            cell_z + hf.cs,
            Axis::Z,
        );
        input[..nv_rem].copy_from_slice(&remainder[..nv_rem]);
        nv_in = nv_rem;
        if nv_row < 3 || z < 0 {
            continue;
        }

        let mut min_x = row[0].x;
        let mut max_x = row[0].x;
        for v in row.iter().take(nv_row).skip(1) {
            min_x = min_x.min(v.x);
            max_x = max_x.max(v.x);
        }
        let x0 = (((min_x - hf.bmin.x) * inv_cs) as i32).clamp(-1, hf.width - 1);
        let x1 = (((max_x - hf.bmin.x) * inv_cs) as i32).clamp(0, hf.width - 1);

        let mut row_poly = [Vec3::ZERO; 7 * 2];
        row_poly[..nv_row].copy_from_slice(&row[..nv_row]);
        let mut nv_row_in = nv_row;

        for x in x0..=x1 {
            let cell_x = hf.bmin.x + x as f32 * hf.cs;
            let (nv_cell, nv_rem) = divide_poly(
                &row_poly[..nv_row_in],
                &mut left,
                &mut remainder,
                cell_x + hf.cs,
                Axis::X,
            );
            row_poly[..nv_rem].copy_from_slice(&remainder[..nv_rem]);
            nv_row_in = nv_rem;
            if nv_cell < 3 || x < 0 {
                continue;
            }

            // Span extents of the clipped cell polygon.
            let mut smin = left[0].y;
            let mut smax = left[0].y;
            for v in left.iter().take(nv_cell).skip(1) {
                smin = smin.min(v.y);
                smax = smax.max(v.y);
            }
            smin -= hf.bmin.y;
            smax -= hf.bmin.y;
            if smax < 0.0 || smin > by {
                continue;
            }
            let smin = smin.max(0.0);
            let smax = smax.min(by);

            let ismin = ((smin * inv_ch).floor() as i32).clamp(0, MAX_SPAN_HEIGHT) as u16;
            let ismax = ((smax * inv_ch).ceil() as i32)
                .clamp(ismin as i32 + 1, MAX_SPAN_HEIGHT) as u16;

            hf.add_span(x, z, ismin, ismax, area, flag_merge_threshold)?;
        }
    }

    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum Axis {
    X,
    Z,
}

/// Splits a convex polygon along an axis-aligned plane.
///
/// Returns the vertex counts of the polygon below the plane (`out_a`) and
/// the remainder above it (`out_b`).
fn divide_poly(
    poly: &[Vec3],
    out_a: &mut [Vec3],
    out_b: &mut [Vec3],
    offset: f32,
    axis: Axis,
) -> (usize, usize) {
    let coord = |v: &Vec3| match axis {
        Axis::X => v.x,
        Axis::Z => v.z,
    };

    let n = poly.len();
    let mut d = [0.0f32; 14];
    for (i, v) in poly.iter().enumerate() {
        d[i] = offset - coord(v);
    }

    let mut na = 0usize;
    let mut nb = 0usize;
    let mut j = n - 1;
    for i in 0..n {
        let same_side = (d[i] >= 0.0) == (d[j] >= 0.0);
        if !same_side {
            let s = d[j] / (d[j] - d[i]);
            let v = poly[j] + (poly[i] - poly[j]) * s;
            out_a[na] = v;
            na += 1;
            out_b[nb] = v;
            nb += 1;
            if d[i] > 0.0 {
                out_a[na] = poly[i];
                na += 1;
            } else if d[i] < 0.0 {
                out_b[nb] = poly[i];
                nb += 1;
            }
        } else {
            if d[i] >= 0.0 {
                out_a[na] = poly[i];
                na += 1;
                if d[i] != 0.0 {
                    j = i;
                    continue;
                }
            }
            out_b[nb] = poly[i];
            nb += 1;
        }
        j = i;
    }

    (na, nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_quad() -> (Vec<Vec3>, Vec<[u32; 3]>) {
        let verts = vec![
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(4.0, 1.0, 0.0),
            Vec3::new(4.0, 1.0, 4.0),
            Vec3::new(0.0, 1.0, 4.0),
        ];
        let tris = vec![[0, 1, 2], [0, 2, 3]];
        (verts, tris)
    }

    #[test]
    fn test_mark_walkable_triangles_flat() {
        let (verts, tris) = flat_quad();
        let mut areas = vec![NULL_AREA; tris.len()];
        mark_walkable_triangles(45.0, &verts, &tris, &mut areas);
        assert!(areas.iter().all(|&a| a == WALKABLE_AREA));
    }

    #[test]
    fn test_mark_walkable_triangles_steep() {
        // A vertical wall must stay unwalkable.
        let verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(4.0, 4.0, 0.0),
        ];
        let tris = vec![[0, 1, 2]];
        let mut areas = vec![NULL_AREA; 1];
        mark_walkable_triangles(45.0, &verts, &tris, &mut areas);
        assert_eq!(areas[0], NULL_AREA);
    }

    #[test]
    fn test_rasterize_covers_expected_cells() {
        let mut hf = Heightfield::new(
            4,
            4,
            Vec3::ZERO,
            Vec3::new(4.0, 10.0, 4.0),
            1.0,
            0.5,
        )
        .unwrap();
        let (verts, tris) = flat_quad();
        let mut ctx = BuildContext::new();
        let cfg = BuildConfig {
            width: 4,
            height: 4,
            cs: 1.0,
            ch: 0.5,
            bmin: Vec3::ZERO,
            bmax: Vec3::new(4.0, 10.0, 4.0),
            ..Default::default()
        };
        let areas = vec![WALKABLE_AREA; tris.len()];
        rasterize_triangles(&mut ctx, &mut hf, &cfg, &verts, &tris, &areas).unwrap();

        for z in 0..4 {
            for x in 0..4 {
                let spans: Vec<_> = hf.column_spans(x, z).collect();
                assert_eq!(spans.len(), 1, "cell ({x}, {z}) missing span");
                assert_eq!(spans[0].1.area, WALKABLE_AREA);
            }
        }
    }

    #[test]
    fn test_rasterize_outside_bounds_is_noop() {
        let mut hf =
            Heightfield::new(4, 4, Vec3::ZERO, Vec3::new(4.0, 10.0, 4.0), 1.0, 0.5).unwrap();
        rasterize_triangle(
            &mut hf,
            Vec3::new(10.0, 0.0, 10.0),
            Vec3::new(12.0, 0.0, 10.0),
            Vec3::new(11.0, 0.0, 12.0),
            WALKABLE_AREA,
            1,
        )
        .unwrap();
        assert_eq!(hf.walkable_span_count(), 0);
    }
}
