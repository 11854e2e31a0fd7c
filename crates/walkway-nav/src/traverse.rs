//! Traverse-link connector: finds jump/climb connections between polygon
//! islands separated by a gap and injects directed graph edges for them.

use glam::Vec3;

use crate::mesh::NavMesh;
use crate::status::Status;
use crate::tile::{Link, NULL_LINK, PolyType};
use crate::PolyRef;

/// One row of the traverse-type configuration table.
///
/// All ranges are closed. A candidate pair matches when its horizontal
/// distance, signed elevation delta and slope fall inside every range; the
/// overlap requirement only applies above its trigger elevation.
#[derive(Debug, Clone)]
pub struct TraverseTypeDef {
    /// Discrete action type stamped on created links.
    pub traverse_type: u8,
    /// Minimum horizontal gap, world units.
    pub min_dist: f32,
    /// Maximum horizontal gap, world units.
    pub max_dist: f32,
    /// Minimum signed elevation delta (landing minus base).
    pub min_elev: f32,
    /// Maximum signed elevation delta.
    pub max_elev: f32,
    /// Minimum slope of the jump arc, degrees.
    pub min_slope: f32,
    /// Maximum slope, degrees.
    pub max_slope: f32,
    /// Required footprint overlap ratio (0 disables the check).
    pub overlap_ratio: f32,
    /// Elevation above which the overlap requirement triggers.
    pub overlap_elev: f32,
}

/// Ordered traverse-type table shared by build and query phases.
#[derive(Debug, Clone, Default)]
pub struct TraverseTable {
    /// Candidate entries; the tightest matching distance range wins.
    pub types: Vec<TraverseTypeDef>,
}

impl TraverseTable {
    /// Best-matching entry for a candidate pair, preferring the tightest
    /// distance range.
    pub fn best_match(&self, dist: f32, elev: f32, slope: f32) -> Option<&TraverseTypeDef> {
        self.types
            .iter()
            .filter(|d| {
                dist >= d.min_dist
                    && dist <= d.max_dist
                    && elev >= d.min_elev
                    && elev <= d.max_elev
                    && slope >= d.min_slope
                    && slope <= d.max_slope
            })
            .min_by(|a, b| {
                (a.max_dist - a.min_dist)
                    .partial_cmp(&(b.max_dist - b.min_dist))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

/// Line-of-sight collaborator supplied by the geometry source.
pub trait LineOfSight {
    /// Casts a ray through the source geometry. Returns the hit fraction,
    /// or `None` when the segment is clear.
    fn raycast(&self, src: Vec3, dst: Vec3) -> Option<f32>;
}

/// Quantizes a traverse distance into an 8-bit bucket against the table's
/// largest range.
pub fn quantize_traverse_distance(dist: f32, max_dist: f32) -> u8 {
    if max_dist <= 0.0 {
        return 0;
    }
    ((dist / max_dist) * 255.0).clamp(0.0, 255.0) as u8
}

struct CandidateEdge {
    tile: usize,
    poly: usize,
    edge: u8,
    mid: Vec3,
    normal: Vec3,
    va: Vec3,
    vb: Vec3,
    group: u16,
}

/// Scans every open polygon edge pair across a gap and creates traverse
/// links for pairs that satisfy the table, footprint-overlap and two-sided
/// line-of-sight constraints.
///
/// Returns the number of bidirectional links created. Both directions are
/// created together, with reverse-link indices stitched so the opposite
/// link is an O(1) lookup.
pub fn connect_traverse_links(
    mesh: &mut NavMesh,
    table: &TraverseTable,
    los: &dyn LineOfSight,
    walkable_radius: f32,
) -> Result<usize, Status> {
    let max_table_dist = table
        .types
        .iter()
        .map(|d| d.max_dist)
        .fold(0.0f32, f32::max);
    if table.types.is_empty() {
        return Ok(0);
    }

    // Collect open boundary edges: no internal neighbor, no portal code.
    let mut candidates: Vec<CandidateEdge> = Vec::new();
    for t in 0..mesh.max_tiles() {
        let Some(tile) = mesh.tile(t) else { continue };
        for (p, poly) in tile.polys.iter().enumerate() {
            if poly.poly_type != PolyType::Ground {
                continue;
            }
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                if poly.neighbors[j] != 0 {
                    continue;
                }
                // Edges already carrying a cross-tile link are not open.
                let has_edge_link = tile
                    .poly_links(p)
                    .any(|(_, l)| l.edge == j as u8 && !l.is_traverse());
                if has_edge_link {
                    continue;
                }
                let va = tile.verts[poly.verts[j] as usize];
                let vb = tile.verts[poly.verts[(j + 1) % nv] as usize];
                let dir = vb - va;
                let normal = Vec3::new(-dir.z, 0.0, dir.x).normalize_or_zero();
                candidates.push(CandidateEdge {
                    tile: t,
                    poly: p,
                    edge: j as u8,
                    mid: (va + vb) * 0.5,
                    normal,
                    va,
                    vb,
                    group: poly.group_id,
                });
            }
        }
    }

    let mut created = 0usize;
    for i in 0..candidates.len() {
        for k in i + 1..candidates.len() {
            let (a, b) = (&candidates[i], &candidates[k]);
            if a.tile == b.tile && a.poly == b.poly {
                continue;
            }
            // Traverse links bridge separate islands; same-group pairs
            // already reach each other by walking.
            if a.group != 0 && a.group == b.group {
                continue;
            }

            let delta = b.mid - a.mid;
            let horiz = (delta.x * delta.x + delta.z * delta.z).sqrt();
            if horiz < 1e-3 || horiz > max_table_dist {
                continue;
            }
            // Both edges must face each other across the gap.
            if a.normal.dot(delta) <= 0.0 || b.normal.dot(-delta) <= 0.0 {
                continue;
            }

            let elev = delta.y;
            let slope = elev.abs().atan2(horiz).to_degrees();
            let Some(def) = table.best_match(horiz, elev, slope) else {
                continue;
            };

            // Footprint overlap above the trigger elevation.
            if def.overlap_ratio > 0.0 && elev.abs() > def.overlap_elev {
                let overlap = edge_overlap_ratio(a, b);
                if overlap < def.overlap_ratio {
                    continue;
                }
            }

            // Two-sided line of sight, offset outward by the walkable
            // radius so ledge overhang does not block the ray.
            let sa = a.mid + a.normal * walkable_radius + Vec3::Y * 0.1;
            let sb = b.mid + b.normal * walkable_radius + Vec3::Y * 0.1;
            if los.raycast(sa, sb).is_some() || los.raycast(sb, sa).is_some() {
                continue;
            }

            let dist_bucket = quantize_traverse_distance(horiz, max_table_dist);

            let ref_a = PolyRef::encode(
                mesh.tile(a.tile).unwrap().salt,
                a.tile as u32 + 1,
                a.poly as u32,
            );
            let ref_b = PolyRef::encode(
                mesh.tile(b.tile).unwrap().salt,
                b.tile as u32 + 1,
                b.poly as u32,
            );

            let mut fwd = Link::new(ref_b, a.edge, 0xff);
            fwd.traverse_type = def.traverse_type;
            fwd.traverse_dist = dist_bucket;
            let fwd_idx = mesh.tile_mut(a.tile).add_link(a.poly, fwd);

            let mut back = Link::new(ref_a, b.edge, 0xff);
            back.traverse_type = def.traverse_type;
            back.traverse_dist = dist_bucket;
            back.reverse_link = fwd_idx;
            let back_idx = mesh.tile_mut(b.tile).add_link(b.poly, back);

            mesh.tile_mut(a.tile).links[fwd_idx as usize].reverse_link = back_idx;
            created += 1;
        }
    }

    Ok(created)
}

/// Projection overlap of edge `b` onto edge `a`, as a fraction of the
/// shorter edge.
fn edge_overlap_ratio(a: &CandidateEdge, b: &CandidateEdge) -> f32 {
    let axis = (a.vb - a.va).normalize_or_zero();
    let project = |v: Vec3| axis.dot(v - a.va);

    let (a0, a1) = (0.0f32, project(a.vb));
    let (mut b0, mut b1) = (project(b.va), project(b.vb));
    if b0 > b1 {
        std::mem::swap(&mut b0, &mut b1);
    }
    let (lo, hi) = (a0.min(a1), a0.max(a1));
    let overlap = (hi.min(b1) - lo.max(b0)).max(0.0);
    let shorter = (a1 - a0).abs().min(b1 - b0).max(1e-6);
    overlap / shorter
}

/// Checks the reverse-link symmetry invariant over the whole mesh: a link
/// with a set reverse index points to a link targeting the original
/// polygon with the same traverse type.
pub fn verify_reverse_links(mesh: &NavMesh) -> bool {
    for t in 0..mesh.max_tiles() {
        let Some(tile) = mesh.tile(t) else { continue };
        for p in 0..tile.polys.len() {
            for (_, link) in tile.poly_links(p) {
                if !link.is_traverse() || link.reverse_link == NULL_LINK {
                    continue;
                }
                let Some((t2, p2)) = mesh.resolve(link.target) else {
                    return false;
                };
                let Some(target_tile) = mesh.tile(t2) else {
                    return false;
                };
                let Some(rev) = target_tile.links.get(link.reverse_link as usize) else {
                    return false;
                };
                let Some((rt, rp)) = mesh.resolve(rev.target) else {
                    return false;
                };
                if rt != t || rp != p || rev.traverse_type != link.traverse_type {
                    return false;
                }
                // The reverse link must hang off the polygon the forward
                // link targets.
                let owned = target_tile
                    .poly_links(p2)
                    .any(|(i, _)| i == link.reverse_link);
                if !owned {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_match_prefers_tightest_range() {
        let table = TraverseTable {
            types: vec![
                TraverseTypeDef {
                    traverse_type: 1,
                    min_dist: 0.0,
                    max_dist: 200.0,
                    min_elev: -50.0,
                    max_elev: 50.0,
                    min_slope: 0.0,
                    max_slope: 90.0,
                    overlap_ratio: 0.0,
                    overlap_elev: 0.0,
                },
                TraverseTypeDef {
                    traverse_type: 2,
                    min_dist: 40.0,
                    max_dist: 120.0,
                    min_elev: 0.0,
                    max_elev: 10.0,
                    min_slope: 0.0,
                    max_slope: 45.0,
                    overlap_ratio: 0.0,
                    overlap_elev: 0.0,
                },
            ],
        };
        let m = table.best_match(50.0, 5.0, 6.0).unwrap();
        assert_eq!(m.traverse_type, 2);
        // Outside the tight entry, the broad one still matches.
        let m = table.best_match(150.0, 5.0, 2.0).unwrap();
        assert_eq!(m.traverse_type, 1);
    }

    #[test]
    fn test_no_match_outside_ranges() {
        let table = TraverseTable {
            types: vec![TraverseTypeDef {
                traverse_type: 1,
                min_dist: 40.0,
                max_dist: 120.0,
                min_elev: 0.0,
                max_elev: 10.0,
                min_slope: 0.0,
                max_slope: 45.0,
                overlap_ratio: 0.0,
                overlap_elev: 0.0,
            }],
        };
        assert!(table.best_match(30.0, 5.0, 6.0).is_none());
        assert!(table.best_match(50.0, 20.0, 6.0).is_none());
    }

    #[test]
    fn test_quantize_traverse_distance() {
        assert_eq!(quantize_traverse_distance(0.0, 100.0), 0);
        assert_eq!(quantize_traverse_distance(100.0, 100.0), 255);
        let mid = quantize_traverse_distance(50.0, 100.0);
        assert!((126..=128).contains(&mid));
    }
}
