//! Per-agent path corridor: the polygon window an agent walks along.

use glam::Vec3;
use walkway_nav::{NavMeshQuery, PolyRef, PolyType, QueryFilter};

/// Corridor over the current path of one agent.
#[derive(Debug, Clone, Default)]
pub struct PathCorridor {
    pos: Vec3,
    target: Vec3,
    path: Vec<PolyRef>,
}

impl PathCorridor {
    /// Creates an empty corridor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the corridor to a single polygon.
    pub fn reset(&mut self, r: PolyRef, pos: Vec3) {
        self.pos = pos;
        self.target = pos;
        self.path.clear();
        if !r.is_null() {
            self.path.push(r);
        }
    }

    /// Installs a fresh path toward `target`.
    pub fn set_corridor(&mut self, target: Vec3, path: &[PolyRef]) {
        self.target = target;
        self.path = path.to_vec();
    }

    /// Current position on the corridor.
    pub fn pos(&self) -> Vec3 {
        self.pos
    }

    /// Corridor target position.
    pub fn target(&self) -> Vec3 {
        self.target
    }

    /// Remaining polygon window.
    pub fn path(&self) -> &[PolyRef] {
        &self.path
    }

    /// First polygon of the window.
    pub fn first_poly(&self) -> PolyRef {
        self.path.first().copied().unwrap_or(PolyRef::NULL)
    }

    /// Last polygon of the window.
    pub fn last_poly(&self) -> PolyRef {
        self.path.last().copied().unwrap_or(PolyRef::NULL)
    }

    /// Steering corners toward the target: the next few portal midpoints
    /// plus the target itself once the window ends there.
    pub fn find_corners(
        &self,
        query: &NavMeshQuery<'_>,
        max_corners: usize,
    ) -> Vec<Vec3> {
        let mut corners = Vec::new();
        if self.path.is_empty() || max_corners == 0 {
            return corners;
        }

        for window in self.path.windows(2) {
            if corners.len() + 1 >= max_corners {
                break;
            }
            let mid = portal_mid(query, window[0], window[1], self.pos);
            corners.push(mid);
        }
        corners.push(self.target);
        corners.truncate(max_corners);
        corners
    }

    /// Moves along the corridor, dropping polygons that fall behind the
    /// new position. Returns the constrained position.
    pub fn move_position(
        &mut self,
        new_pos: Vec3,
        query: &NavMeshQuery<'_>,
        _filter: &QueryFilter,
    ) -> Vec3 {
        if self.path.is_empty() {
            self.pos = new_pos;
            return new_pos;
        }

        // Find the nearest polygon of the window that the new position
        // projects onto, preferring the front.
        let mut keep_from = 0usize;
        let mut best_pos = None;
        for (i, &r) in self.path.iter().enumerate().take(8) {
            if let Ok((closest, over)) = query.closest_point_on_poly(r, new_pos) {
                if over {
                    keep_from = i;
                    best_pos = Some(closest);
                    break;
                }
                if best_pos.is_none() {
                    best_pos = Some(closest);
                }
            }
        }
        self.path.drain(..keep_from);
        self.pos = best_pos.unwrap_or(new_pos);
        self.pos.x = new_pos.x;
        self.pos.z = new_pos.z;
        self.pos
    }

    /// When the corridor's next polygon is an off-mesh connection and the
    /// position is inside its trigger radius, teleports to the far
    /// endpoint and consumes the connection. Returns the far endpoint when
    /// a hop happened.
    pub fn move_over_offmesh_connection(&mut self, query: &NavMeshQuery<'_>) -> Option<Vec3> {
        if self.path.len() < 2 {
            return None;
        }
        let next = self.path[1];
        let (tile, poly) = query.mesh().get_tile_and_poly(next)?;
        if poly.poly_type != PolyType::OffMeshConnection {
            return None;
        }
        let start = tile.verts[poly.verts[0] as usize];
        let end = tile.verts[poly.verts[1] as usize];
        let trigger = tile
            .off_mesh_cons
            .iter()
            .find(|c| c.poly as u32 == next.poly())
            .map(|c| c.radius)
            .unwrap_or(0.5);
        if walkway_common::dist_sqr_2d(self.pos, start) > trigger * trigger {
            return None;
        }

        // Consume the start poly and the connection itself.
        self.path.drain(..2);
        self.pos = end;
        Some(end)
    }

    /// Whether the window start is still a live polygon.
    pub fn is_valid(&self, query: &NavMeshQuery<'_>) -> bool {
        match self.path.first() {
            Some(&r) => query.mesh().is_valid_poly_ref(r),
            None => false,
        }
    }

    /// Drops polygons invalidated by a tile change, keeping the valid
    /// prefix. Returns whether anything was trimmed.
    pub fn trim_invalid_path(&mut self, query: &NavMeshQuery<'_>) -> bool {
        let valid_len = self
            .path
            .iter()
            .take_while(|&&r| query.mesh().is_valid_poly_ref(r))
            .count();
        if valid_len == self.path.len() {
            return false;
        }
        self.path.truncate(valid_len);
        true
    }
}

fn portal_mid(query: &NavMeshQuery<'_>, from: PolyRef, to: PolyRef, fallback: Vec3) -> Vec3 {
    let mesh = query.mesh();
    let (Some((ft, fp)), Some((tt, tp))) = (mesh.resolve(from), mesh.resolve(to)) else {
        return fallback;
    };
    let ftile = mesh.tile(ft).unwrap();
    let ttile = mesh.tile(tt).unwrap();
    let fpoly = &ftile.polys[fp];
    let tpoly = &ttile.polys[tp];

    if tpoly.poly_type == PolyType::OffMeshConnection {
        return ttile.verts[tpoly.verts[0] as usize];
    }

    for (_, link) in ftile.poly_links(fp) {
        if link.target != to || link.edge == 0xff {
            continue;
        }
        let nv = fpoly.vert_count as usize;
        let j = link.edge as usize;
        if j < nv {
            let va = ftile.verts[fpoly.verts[j] as usize];
            let vb = ftile.verts[fpoly.verts[(j + 1) % nv] as usize];
            return (va + vb) * 0.5;
        }
    }
    ttile.poly_center(tpoly)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_and_accessors() {
        let mut corridor = PathCorridor::new();
        let r = PolyRef::new(42);
        corridor.reset(r, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(corridor.first_poly(), r);
        assert_eq!(corridor.last_poly(), r);
        assert_eq!(corridor.pos(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_set_corridor_replaces_window() {
        let mut corridor = PathCorridor::new();
        corridor.reset(PolyRef::new(1), Vec3::ZERO);
        let path = [PolyRef::new(1), PolyRef::new(2), PolyRef::new(3)];
        corridor.set_corridor(Vec3::new(5.0, 0.0, 5.0), &path);
        assert_eq!(corridor.path().len(), 3);
        assert_eq!(corridor.target(), Vec3::new(5.0, 0.0, 5.0));
    }
}
