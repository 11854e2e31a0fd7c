//! Small geometry helpers used across the build pipeline and the query engine.

use glam::Vec3;

/// Cross product of two 2D vectors on the XZ plane.
#[inline]
pub fn cross_2d(x1: f32, z1: f32, x2: f32, z2: f32) -> f32 {
    x1 * z2 - z1 * x2
}

/// Dot product of two 2D vectors on the XZ plane.
#[inline]
pub fn dot_2d(x1: f32, z1: f32, x2: f32, z2: f32) -> f32 {
    x1 * x2 + z1 * z2
}

/// Squares a value.
#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T {
    x * x
}

/// Next power of two greater than or equal to `x`.
#[inline]
pub fn next_pow2(x: u32) -> u32 {
    if x == 0 {
        return 1;
    }
    let mut n = x - 1;
    n |= n >> 1;
    n |= n >> 2;
    n |= n >> 4;
    n |= n >> 8;
    n |= n >> 16;
    n + 1
}

/// Integer log base 2.
#[inline]
pub fn ilog2(x: u32) -> u32 {
    if x == 0 { 0 } else { 31 - x.leading_zeros() }
}

/// Aligns a byte count to a 4-byte boundary.
#[inline]
pub fn align4(x: usize) -> usize {
    (x + 3) & !3
}

/// Squared distance between two points on the XZ plane.
#[inline]
pub fn dist_sqr_2d(a: Vec3, b: Vec3) -> f32 {
    sqr(b.x - a.x) + sqr(b.z - a.z)
}

/// Signed area of the triangle (a, b, c) projected onto the XZ plane.
/// Positive when the triangle winds counter-clockwise seen from above.
#[inline]
pub fn tri_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let abx = b.x - a.x;
    let abz = b.z - a.z;
    let acx = c.x - a.x;
    let acz = c.z - a.z;
    acx * abz - abx * acz
}

/// Tests whether two axis-aligned bounds overlap.
#[inline]
pub fn overlap_bounds(amin: Vec3, amax: Vec3, bmin: Vec3, bmax: Vec3) -> bool {
    amin.x <= bmax.x
        && amax.x >= bmin.x
        && amin.y <= bmax.y
        && amax.y >= bmin.y
        && amin.z <= bmax.z
        && amax.z >= bmin.z
}

/// Tests whether two quantized bounds overlap.
#[inline]
pub fn overlap_quant_bounds(amin: [u16; 3], amax: [u16; 3], bmin: [u16; 3], bmax: [u16; 3]) -> bool {
    !(amin[0] > bmax[0]
        || amax[0] < bmin[0]
        || amin[1] > bmax[1]
        || amax[1] < bmin[1]
        || amin[2] > bmax[2]
        || amax[2] < bmin[2])
}

/// Squared distance from `p` to the segment (`a`, `b`) on the XZ plane.
/// Also returns the parametric position of the closest point on the segment.
pub fn dist_pt_seg_sqr_2d(p: Vec3, a: Vec3, b: Vec3) -> (f32, f32) {
    let bx = b.x - a.x;
    let bz = b.z - a.z;
    let dx = p.x - a.x;
    let dz = p.z - a.z;
    let d = bx * bx + bz * bz;
    let mut t = bx * dx + bz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);
    let rx = a.x + t * bx - p.x;
    let rz = a.z + t * bz - p.z;
    (rx * rx + rz * rz, t)
}

/// Tests whether a point lies inside a polygon on the XZ plane.
/// Vertices are consecutive `Vec3`s; works for convex and concave rings.
pub fn point_in_poly_2d(p: Vec3, verts: &[Vec3]) -> bool {
    let n = verts.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > p.z) != (vj.z > p.z))
            && (p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Closest point on the triangle (a, b, c) to `p`.
pub fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Height of the triangle (a, b, c) at the XZ position of `p`, if `p`
/// projects inside the triangle.
pub fn closest_height_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < EPS {
        return None;
    }

    let mut u = v1.z * v2.x - v1.x * v2.z;
    let mut v = v0.x * v2.z - v0.z * v2.x;
    let denom = if denom < 0.0 {
        u = -u;
        v = -v;
        -denom
    } else {
        denom
    };

    if u >= 0.0 && v >= 0.0 && (u + v) <= denom {
        Some(a.y + (v0.y * u + v1.y * v) / denom)
    } else {
        None
    }
}

/// Intersects the segment (p, q) with a convex polygon on the XZ plane.
/// Returns the entry/exit parameters and the edge index crossed at each.
///
/// The polygon winds the way contours are traced (clockwise seen from
/// above with +x right and +z up); interior points lie on the negative
/// cross-product side of every edge.
pub fn intersect_seg_poly_2d(p: Vec3, q: Vec3, verts: &[Vec3]) -> Option<(f32, f32, i32, i32)> {
    const EPS: f32 = 0.000_001;
    let mut tmin = 0.0_f32;
    let mut tmax = 1.0_f32;
    let mut seg_min = -1_i32;
    let mut seg_max = -1_i32;

    let dir = q - p;
    let n = verts.len();
    let mut j = n - 1;
    for i in 0..n {
        let edge = verts[i] - verts[j];
        let diff = p - verts[j];
        let ne = cross_2d(edge.x, edge.z, diff.x, diff.z);
        let de = cross_2d(dir.x, dir.z, edge.x, edge.z);
        if de.abs() < EPS {
            // Segment runs parallel to this edge.
            if ne > 0.0 {
                return None;
            }
            j = i;
            continue;
        }
        let t = ne / de;
        if de > 0.0 {
            if t > tmin {
                tmin = t;
                seg_min = j as i32;
                if tmin > tmax {
                    return None;
                }
            }
        } else if t < tmax {
            tmax = t;
            seg_max = j as i32;
            if tmax < tmin {
                return None;
            }
        }
        j = i;
    }

    Some((tmin, tmax, seg_min, seg_max))
}

/// Classifies a point against an AABB with an 8-way border code.
///
/// Bit 0 = +x, bit 1 = +z, bit 2 = -x, bit 3 = -z. `0xff` means the point is
/// inside the bounds on the XZ plane. Used to decide which neighboring tiles
/// an off-mesh connection endpoint can land in.
pub fn classify_point_off_bounds(p: Vec3, bmin: Vec3, bmax: Vec3) -> u8 {
    const XP: u8 = 1 << 0;
    const ZP: u8 = 1 << 1;
    const XM: u8 = 1 << 2;
    const ZM: u8 = 1 << 3;

    let mut out_code = 0u8;
    if p.x >= bmax.x {
        out_code |= XP;
    }
    if p.z >= bmax.z {
        out_code |= ZP;
    }
    if p.x < bmin.x {
        out_code |= XM;
    }
    if p.z < bmin.z {
        out_code |= ZM;
    }

    match out_code {
        XP => 0,
        XP | ZP => 1,
        ZP => 2,
        XM | ZP => 3,
        XM => 4,
        XM | ZM => 5,
        ZM => 6,
        XP | ZM => 7,
        _ => 0xff,
    }
}

/// Converts a side index (0-7) back to the opposite side.
#[inline]
pub fn opposite_side(side: u8) -> u8 {
    (side + 4) & 0x7
}

/// Random-ish but deterministic point ordering helper: returns true when the
/// two XZ positions are equal within `eps`.
#[inline]
pub fn equal_2d(a: Vec3, b: Vec3, eps: f32) -> bool {
    (a.x - b.x).abs() < eps && (a.z - b.z).abs() < eps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_pow2() {
        assert_eq!(next_pow2(0), 1);
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(3), 4);
        assert_eq!(next_pow2(64), 64);
        assert_eq!(next_pow2(65), 128);
    }

    #[test]
    fn test_align4() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(5), 8);
    }

    #[test]
    fn test_point_in_poly() {
        let square = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 4.0),
            Vec3::new(0.0, 0.0, 4.0),
        ];
        assert!(point_in_poly_2d(Vec3::new(2.0, 0.0, 2.0), &square));
        assert!(!point_in_poly_2d(Vec3::new(5.0, 0.0, 2.0), &square));
    }

    #[test]
    fn test_closest_point_on_triangle_inside() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(4.0, 0.0, 0.0);
        let c = Vec3::new(0.0, 0.0, 4.0);
        let p = Vec3::new(1.0, 3.0, 1.0);
        let q = closest_point_on_triangle(p, a, b, c);
        assert!((q - Vec3::new(1.0, 0.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_closest_height_on_triangle() {
        use approx::assert_relative_eq;

        let a = Vec3::new(0.0, 1.0, 0.0);
        let b = Vec3::new(4.0, 1.0, 0.0);
        let c = Vec3::new(0.0, 1.0, 4.0);
        let h = closest_height_on_triangle(Vec3::new(1.0, 7.0, 1.0), a, b, c).unwrap();
        assert_relative_eq!(h, 1.0, epsilon = 1e-5);
        assert!(closest_height_on_triangle(Vec3::new(5.0, 0.0, 5.0), a, b, c).is_none());
    }

    #[test]
    fn test_classify_point_off_bounds() {
        let bmin = Vec3::new(0.0, 0.0, 0.0);
        let bmax = Vec3::new(10.0, 10.0, 10.0);
        assert_eq!(classify_point_off_bounds(Vec3::new(5.0, 5.0, 5.0), bmin, bmax), 0xff);
        assert_eq!(classify_point_off_bounds(Vec3::new(11.0, 5.0, 5.0), bmin, bmax), 0);
        assert_eq!(classify_point_off_bounds(Vec3::new(-1.0, 5.0, 5.0), bmin, bmax), 4);
        assert_eq!(classify_point_off_bounds(Vec3::new(11.0, 5.0, 11.0), bmin, bmax), 1);
        assert_eq!(classify_point_off_bounds(Vec3::new(5.0, 5.0, -1.0), bmin, bmax), 6);
    }

    #[test]
    fn test_opposite_side() {
        assert_eq!(opposite_side(0), 4);
        assert_eq!(opposite_side(6), 2);
        assert_eq!(opposite_side(7), 3);
    }
}
