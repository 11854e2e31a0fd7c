//! Runtime graph queries: nearest polygon, synchronous and time-sliced
//! pathfinding, navmesh raycasts and bounded neighborhood gathering.
//!
//! The synchronous `find_path` drives the same state machine as the sliced
//! API, so a fully-stepped sliced search and a synchronous call produce the
//! same polygon path by construction.

use glam::Vec3;

use walkway_common::intersect_seg_poly_2d;

use crate::groups::{FIRST_USABLE_POLY_GROUP, STRAY_POLY_GROUP, is_group_reachable};
use crate::mesh::NavMesh;
use crate::node_pool::{NULL_NODE, NodeFlags, NodeIndex, NodePool, NodeQueue};
use crate::status::{Status, StatusDetail};
use crate::tile::PolyType;
use crate::{PolyRef, QueryFilter};

const HEURISTIC_SCALE: f32 = 0.999;

/// Result of a navmesh raycast.
#[derive(Debug, Clone)]
pub struct RaycastHit {
    /// Hit fraction along the segment; 1.0 means no hit.
    pub t: f32,
    /// Normal of the wall that was hit, zero when nothing was hit.
    pub normal: Vec3,
    /// Polygons visited along the ray.
    pub path: Vec<PolyRef>,
}

/// Persistent state of a sliced pathfind between `update` calls.
#[derive(Debug, Clone)]
pub struct SlicedState {
    status: Status,
    start_ref: PolyRef,
    end_ref: PolyRef,
    end_pos: Vec3,
    filter: QueryFilter,
    last_best: NodeIndex,
    last_best_cost: f32,
    end_node: NodeIndex,
}

/// Query interface over a navigation mesh.
///
/// Holds the node pool and open list; topology-mutating operations on the
/// mesh must not be interleaved with an in-flight sliced query.
pub struct NavMeshQuery<'a> {
    mesh: &'a NavMesh,
    pool: NodePool,
    open: NodeQueue,
    sliced: Option<SlicedState>,
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a query context with the given node budget.
    pub fn new(mesh: &'a NavMesh, max_nodes: usize) -> Self {
        Self {
            mesh,
            pool: NodePool::new(max_nodes.max(16)),
            open: NodeQueue::new(),
            sliced: None,
        }
    }

    /// The mesh this query reads.
    pub fn mesh(&self) -> &NavMesh {
        self.mesh
    }

    /// Nearest polygon within a box around `center`.
    pub fn find_nearest_poly(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> (Status, PolyRef, Vec3) {
        self.mesh.find_nearest_poly(center, half_extents, filter)
    }

    /// Closest point on a polygon, with whether the position is over it.
    pub fn closest_point_on_poly(&self, r: PolyRef, pos: Vec3) -> Result<(Vec3, bool), Status> {
        let (t, p) = self
            .mesh
            .resolve(r)
            .ok_or(Status::failure(StatusDetail::InvalidParam))?;
        Ok(self.mesh.closest_point_on_poly_in_tile(t, p, pos))
    }

    /// Detail-mesh height under a position on a polygon.
    pub fn get_poly_height(&self, r: PolyRef, pos: Vec3) -> Result<f32, Status> {
        let (t, p) = self
            .mesh
            .resolve(r)
            .ok_or(Status::failure(StatusDetail::InvalidParam))?;
        self.mesh
            .poly_height_in_tile(t, p, pos)
            .ok_or(Status::failure(StatusDetail::NotFound))
    }

    fn endpoint_group(&self, r: PolyRef) -> Option<u16> {
        self.mesh.get_tile_and_poly(r).map(|(_, p)| p.group_id)
    }

    /// Checks the traversal table before any search is attempted.
    ///
    /// Returns `None` when the search may proceed, or the status to return
    /// immediately.
    fn reachability_short_circuit(
        &self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        filter: &QueryFilter,
    ) -> Option<Status> {
        let group_count = self.mesh.poly_group_count();
        if group_count == 0 {
            return None;
        }
        let ga = self.endpoint_group(start_ref)?;
        let gb = self.endpoint_group(end_ref)?;

        // Stray polygons are excluded from path search outright.
        if ga == STRAY_POLY_GROUP || gb == STRAY_POLY_GROUP {
            return Some(Status::failure(StatusDetail::Unreachable));
        }
        if ga < FIRST_USABLE_POLY_GROUP || gb < FIRST_USABLE_POLY_GROUP {
            return None;
        }

        let tables = self.mesh.traversal_tables();
        if tables.is_empty() {
            return None;
        }
        let table = tables.get(filter.capability as usize)?;
        if !is_group_reachable(table, group_count, ga, gb) {
            return Some(Status::failure(StatusDetail::Unreachable));
        }
        None
    }

    /// Synchronous shortest-path search.
    ///
    /// Consults the traversal table first: when the destination group is
    /// unreachable under the filter's capability class, no search runs and
    /// an unreachable failure returns immediately. A partial status means
    /// the path ends at the closest reachable polygon instead of the goal.
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
    ) -> (Status, Vec<PolyRef>) {
        let status = self.init_sliced_find_path(start_ref, end_ref, start_pos, end_pos, filter);
        if !status.is_in_progress() {
            if status.is_success() {
                return self.finalize_sliced_find_path();
            }
            return (status, Vec::new());
        }
        loop {
            let (status, _) = self.update_sliced_find_path(usize::MAX);
            if !status.is_in_progress() {
                break;
            }
        }
        self.finalize_sliced_find_path()
    }

    /// Starts a sliced pathfind, invalidating any prior slice.
    pub fn init_sliced_find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
    ) -> Status {
        self.sliced = None;

        let valid_start = self
            .mesh
            .get_tile_and_poly(start_ref)
            .map(|(_, p)| filter.passes(p))
            .unwrap_or(false);
        let valid_end = self
            .mesh
            .get_tile_and_poly(end_ref)
            .map(|(_, p)| filter.passes(p))
            .unwrap_or(false);
        if !valid_start || !valid_end {
            return Status::failure(StatusDetail::InvalidParam);
        }

        if let Some(status) = self.reachability_short_circuit(start_ref, end_ref, filter) {
            return status;
        }

        self.pool.clear();
        self.open.clear();

        if start_ref == end_ref {
            let idx = self.pool.get(start_ref).expect("fresh pool has room");
            self.pool.node_mut(idx).pos = start_pos;
            self.sliced = Some(SlicedState {
                status: Status::success(),
                start_ref,
                end_ref,
                end_pos,
                filter: filter.clone(),
                last_best: idx,
                last_best_cost: 0.0,
                end_node: idx,
            });
            return Status::success();
        }

        let idx = self.pool.get(start_ref).expect("fresh pool has room");
        {
            let node = self.pool.node_mut(idx);
            node.pos = start_pos;
            node.cost = 0.0;
            node.total = start_pos.distance(end_pos) * HEURISTIC_SCALE;
            node.flags.insert(NodeFlags::OPEN);
        }
        self.open.push(self.pool.node(idx).total, idx);

        self.sliced = Some(SlicedState {
            status: Status::in_progress(),
            start_ref,
            end_ref,
            end_pos,
            filter: filter.clone(),
            last_best: idx,
            last_best_cost: start_pos.distance(end_pos),
            end_node: NULL_NODE,
        });
        Status::in_progress()
    }

    /// Runs up to `max_iter` node expansions of the current slice.
    /// Returns the status and the number of expansions performed.
    pub fn update_sliced_find_path(&mut self, max_iter: usize) -> (Status, usize) {
        let Some(mut state) = self.sliced.take() else {
            return (Status::failure(StatusDetail::InvalidParam), 0);
        };
        if !state.status.is_in_progress() {
            let status = state.status;
            self.sliced = Some(state);
            return (status, 0);
        }

        let mut iters = 0usize;
        while iters < max_iter {
            let Some(best_idx) = self.open.pop() else {
                // Exhausted the reachable set without touching the goal.
                state.status = Status::partial();
                break;
            };
            // Skip stale duplicate heap entries.
            if self.pool.node(best_idx).flags.contains(NodeFlags::CLOSED) {
                continue;
            }
            iters += 1;

            {
                let node = self.pool.node_mut(best_idx);
                node.flags.remove(NodeFlags::OPEN);
                node.flags.insert(NodeFlags::CLOSED);
            }

            let best_ref = self.pool.node(best_idx).id;
            if best_ref == state.end_ref {
                state.end_node = best_idx;
                state.status = Status::success();
                break;
            }

            let Some((tile_idx, poly_idx)) = self.mesh.resolve(best_ref) else {
                // The tile under this node went away; treat the node as a
                // dead end rather than failing the query.
                continue;
            };
            let tile = self.mesh.tile(tile_idx).expect("resolved tile is resident");
            let best_pos = self.pool.node(best_idx).pos;
            let best_cost = self.pool.node(best_idx).cost;
            let area = tile.polys[poly_idx].area;

            let links: Vec<_> = tile.poly_links(poly_idx).map(|(_, l)| l).collect();
            for link in links {
                let neighbor_ref = link.target;
                if neighbor_ref.is_null() || neighbor_ref == best_ref {
                    continue;
                }
                if !state.filter.passes_link(&link) {
                    continue;
                }
                let Some((nt, np)) = self.mesh.resolve(neighbor_ref) else {
                    continue;
                };
                let ntile = self.mesh.tile(nt).expect("resolved tile is resident");
                let npoly = &ntile.polys[np];
                if !state.filter.passes(npoly) {
                    continue;
                }

                let neighbor_pos = self.portal_point(best_ref, neighbor_ref, best_pos);
                let cost = best_cost + state.filter.cost(best_pos, neighbor_pos, area);

                let Some(nidx) = self.pool.get(neighbor_ref) else {
                    state.status = Status::partial().with_detail(StatusDetail::OutOfNodes);
                    continue;
                };
                let node = self.pool.node(nidx);
                if node.flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                if node.flags.contains(NodeFlags::OPEN) && cost >= node.cost {
                    continue;
                }

                let heuristic = if neighbor_ref == state.end_ref {
                    0.0
                } else {
                    neighbor_pos.distance(state.end_pos) * HEURISTIC_SCALE
                };
                let total = cost + heuristic;

                {
                    let node = self.pool.node_mut(nidx);
                    node.parent = best_idx;
                    node.pos = neighbor_pos;
                    node.cost = cost;
                    node.total = total;
                    node.flags.insert(NodeFlags::OPEN);
                }
                self.open.modify(total, nidx);

                if heuristic < state.last_best_cost {
                    state.last_best_cost = heuristic;
                    state.last_best = nidx;
                }
            }
        }

        if state.status.is_in_progress() && self.open.is_empty() {
            state.status = Status::partial();
        }

        let status = state.status;
        self.sliced = Some(state);
        (status, iters)
    }

    /// Finishes the slice and returns the polygon path.
    pub fn finalize_sliced_find_path(&mut self) -> (Status, Vec<PolyRef>) {
        let Some(state) = self.sliced.take() else {
            return (Status::failure(StatusDetail::InvalidParam), Vec::new());
        };
        if state.status.is_in_progress() {
            // Finalizing early yields the best partial path so far.
            let path = self.pool.trace_path(state.last_best);
            return (Status::partial(), path);
        }
        if state.status.is_failure() {
            return (state.status, Vec::new());
        }

        let end = if state.end_node != NULL_NODE {
            state.end_node
        } else {
            state.last_best
        };
        let path = self.pool.trace_path(end);
        let mut status = state.status;
        if state.end_node == NULL_NODE && state.start_ref != state.end_ref {
            status = status.with_partial();
        }
        (status, path)
    }

    /// Midpoint of the portal into `to`, or the entry position of an
    /// off-mesh/traverse hop.
    fn portal_point(&self, from: PolyRef, to: PolyRef, from_pos: Vec3) -> Vec3 {
        let Some((ft, fp)) = self.mesh.resolve(from) else {
            return from_pos;
        };
        let Some((tt, tp)) = self.mesh.resolve(to) else {
            return from_pos;
        };
        let ftile = self.mesh.tile(ft).unwrap();
        let ttile = self.mesh.tile(tt).unwrap();
        let tpoly = &ttile.polys[tp];

        // Hops land on the target's entry vertex or center.
        if tpoly.poly_type == PolyType::OffMeshConnection {
            return ttile.verts[tpoly.verts[0] as usize];
        }
        let fpoly = &ftile.polys[fp];
        if fpoly.poly_type == PolyType::OffMeshConnection {
            return ttile.poly_center(tpoly);
        }

        for (_, link) in ftile.poly_links(fp) {
            if link.target != to {
                continue;
            }
            if link.is_traverse() {
                return ttile.poly_center(tpoly);
            }
            if link.edge == 0xff {
                return ttile.poly_center(tpoly);
            }
            let nv = fpoly.vert_count as usize;
            let j = link.edge as usize;
            let va = ftile.verts[fpoly.verts[j] as usize];
            let vb = ftile.verts[fpoly.verts[(j + 1) % nv] as usize];
            // Cross-tile links carry the overlap sub-range.
            if link.side != 0xff && (link.bmin != 0 || link.bmax != 255) {
                let s = 1.0 / 255.0;
                let tmin = link.bmin as f32 * s;
                let tmax = link.bmax as f32 * s;
                let a = va.lerp(vb, tmin);
                let b = va.lerp(vb, tmax);
                return (a + b) * 0.5;
            }
            return (va + vb) * 0.5;
        }
        ttile.poly_center(tpoly)
    }

    /// Walks the polygon graph along a segment. Returns hit fraction 1.0
    /// when the end position is reached without hitting a wall.
    pub fn raycast(
        &self,
        start_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
    ) -> (Status, RaycastHit) {
        let mut hit = RaycastHit {
            t: 0.0,
            normal: Vec3::ZERO,
            path: Vec::new(),
        };
        let Some((mut tile_idx, mut poly_idx)) = self.mesh.resolve(start_ref) else {
            return (Status::failure(StatusDetail::InvalidParam), hit);
        };
        let mut cur_ref = start_ref;

        loop {
            let tile = self.mesh.tile(tile_idx).expect("resolved tile is resident");
            let poly = &tile.polys[poly_idx];
            let verts = tile.poly_vertices(poly);

            let Some((_, tmax, _, seg_max)) = intersect_seg_poly_2d(start_pos, end_pos, &verts)
            else {
                // Start point is off the polygon; nothing is hit.
                return (Status::success(), hit);
            };
            hit.path.push(cur_ref);

            if seg_max == -1 {
                // The end point is inside this polygon.
                hit.t = 1.0;
                return (Status::success(), hit);
            }

            // Follow a link crossing the exit edge.
            let mut next: Option<PolyRef> = None;
            for (_, link) in tile.poly_links(poly_idx) {
                if link.edge as i32 != seg_max || link.is_traverse() {
                    continue;
                }
                let Some((nt, np)) = self.mesh.resolve(link.target) else {
                    continue;
                };
                let ntile = self.mesh.tile(nt).unwrap();
                if ntile.polys[np].poly_type != PolyType::Ground {
                    continue;
                }
                if !filter.passes(&ntile.polys[np]) {
                    continue;
                }
                next = Some(link.target);
                break;
            }

            match next {
                Some(r) => {
                    let (nt, np) = self.mesh.resolve(r).unwrap();
                    cur_ref = r;
                    tile_idx = nt;
                    poly_idx = np;
                }
                None => {
                    // Hit the wall at the exit edge.
                    hit.t = tmax;
                    let j = seg_max as usize;
                    let nv = verts.len();
                    let va = verts[j];
                    let vb = verts[(j + 1) % nv];
                    let edge = vb - va;
                    hit.normal = Vec3::new(edge.z, 0.0, -edge.x).normalize_or_zero();
                    return (Status::success(), hit);
                }
            }
        }
    }

    /// Gathers polygons reachable within a circle, Dijkstra-ordered.
    /// Truncates silently at `max_result`.
    pub fn find_polys_around_circle(
        &mut self,
        start_ref: PolyRef,
        center: Vec3,
        radius: f32,
        filter: &QueryFilter,
        max_result: usize,
    ) -> (Status, Vec<PolyRef>) {
        self.gather(start_ref, filter, max_result, |portal| {
            walkway_common::dist_sqr_2d(portal, center) <= radius * radius
        })
    }

    /// Gathers polygons reachable within a convex shape.
    pub fn find_polys_around_shape(
        &mut self,
        start_ref: PolyRef,
        shape: &[Vec3],
        filter: &QueryFilter,
        max_result: usize,
    ) -> (Status, Vec<PolyRef>) {
        let shape = shape.to_vec();
        self.gather(start_ref, filter, max_result, move |portal| {
            walkway_common::point_in_poly_2d(portal, &shape)
        })
    }

    /// Breadth-limited local neighborhood around a position.
    pub fn find_local_neighbourhood(
        &mut self,
        start_ref: PolyRef,
        center: Vec3,
        radius: f32,
        filter: &QueryFilter,
        max_result: usize,
    ) -> (Status, Vec<PolyRef>) {
        self.find_polys_around_circle(start_ref, center, radius, filter, max_result)
    }

    fn gather<F: Fn(Vec3) -> bool>(
        &mut self,
        start_ref: PolyRef,
        filter: &QueryFilter,
        max_result: usize,
        include_portal: F,
    ) -> (Status, Vec<PolyRef>) {
        if self.mesh.resolve(start_ref).is_none() {
            return (Status::failure(StatusDetail::InvalidParam), Vec::new());
        }
        // Gathering tears down any in-flight slice state.
        self.sliced = None;
        self.pool.clear();
        self.open.clear();

        let mut result = Vec::new();
        let mut truncated = false;

        let idx = self.pool.get(start_ref).expect("fresh pool has room");
        self.pool.node_mut(idx).flags.insert(NodeFlags::OPEN);
        self.open.push(0.0, idx);
        result.push(start_ref);

        while let Some(cur) = self.open.pop() {
            if self.pool.node(cur).flags.contains(NodeFlags::CLOSED) {
                continue;
            }
            {
                let node = self.pool.node_mut(cur);
                node.flags.remove(NodeFlags::OPEN);
                node.flags.insert(NodeFlags::CLOSED);
            }
            let cur_ref = self.pool.node(cur).id;
            let cur_cost = self.pool.node(cur).cost;
            let cur_pos = self.pool.node(cur).pos;
            let Some((t, p)) = self.mesh.resolve(cur_ref) else {
                continue;
            };
            let tile = self.mesh.tile(t).unwrap();

            let links: Vec<_> = tile.poly_links(p).map(|(_, l)| l).collect();
            for link in links {
                if !filter.passes_link(&link) {
                    continue;
                }
                let Some((nt, np)) = self.mesh.resolve(link.target) else {
                    continue;
                };
                let ntile = self.mesh.tile(nt).unwrap();
                if !filter.passes(&ntile.polys[np]) {
                    continue;
                }
                let portal = self.portal_point(cur_ref, link.target, cur_pos);
                if !include_portal(portal) {
                    continue;
                }
                let Some(nidx) = self.pool.get(link.target) else {
                    truncated = true;
                    continue;
                };
                if self.pool.node(nidx).flags.contains(NodeFlags::CLOSED)
                    || self.pool.node(nidx).flags.contains(NodeFlags::OPEN)
                {
                    continue;
                }
                if result.len() >= max_result {
                    truncated = true;
                    continue;
                }
                result.push(link.target);
                {
                    let node = self.pool.node_mut(nidx);
                    node.pos = portal;
                    node.cost = cur_cost + 1.0;
                    node.flags.insert(NodeFlags::OPEN);
                }
                self.open.push(cur_cost + 1.0, nidx);
            }
        }

        let status = if truncated {
            Status::success()
                .with_partial()
                .with_detail(StatusDetail::BufferTooSmall)
        } else {
            Status::success()
        };
        (status, result)
    }

    /// Distance from a position to the nearest wall reachable within
    /// `radius`, with the wall normal.
    pub fn find_distance_to_wall(
        &mut self,
        start_ref: PolyRef,
        center: Vec3,
        radius: f32,
        filter: &QueryFilter,
    ) -> (Status, f32, Vec3) {
        if self.mesh.resolve(start_ref).is_none() {
            return (Status::failure(StatusDetail::InvalidParam), 0.0, Vec3::ZERO);
        }
        self.sliced = None;
        self.pool.clear();
        self.open.clear();

        let mut best_dist_sqr = radius * radius;
        let mut best_normal = Vec3::ZERO;

        let idx = self.pool.get(start_ref).expect("fresh pool has room");
        self.pool.node_mut(idx).flags.insert(NodeFlags::OPEN);
        self.open.push(0.0, idx);

        while let Some(cur) = self.open.pop() {
            if self.pool.node(cur).flags.contains(NodeFlags::CLOSED) {
                continue;
            }
            {
                let node = self.pool.node_mut(cur);
                node.flags.remove(NodeFlags::OPEN);
                node.flags.insert(NodeFlags::CLOSED);
            }
            let cur_ref = self.pool.node(cur).id;
            let Some((t, p)) = self.mesh.resolve(cur_ref) else {
                continue;
            };
            let tile = self.mesh.tile(t).unwrap();
            let poly = &tile.polys[p];
            let nv = poly.vert_count as usize;
            let verts = tile.poly_vertices(poly);

            for j in 0..nv {
                // Wall edge: no passable link across it.
                let mut passable = false;
                for (_, link) in tile.poly_links(p) {
                    if link.edge as usize != j || link.is_traverse() {
                        continue;
                    }
                    if let Some((nt2, np2)) = self.mesh.resolve(link.target) {
                        let ntile = self.mesh.tile(nt2).unwrap();
                        if ntile.polys[np2].poly_type == PolyType::Ground
                            && filter.passes(&ntile.polys[np2])
                        {
                            passable = true;
                            break;
                        }
                    }
                }
                let va = verts[j];
                let vb = verts[(j + 1) % nv];
                if passable {
                    // Expand across the portal when it is near enough.
                    let (d, _) = walkway_common::dist_pt_seg_sqr_2d(center, va, vb);
                    if d > best_dist_sqr {
                        continue;
                    }
                    for (_, link) in tile.poly_links(p) {
                        if link.edge as usize != j || link.is_traverse() {
                            continue;
                        }
                        if self.mesh.resolve(link.target).is_some() {
                            if let Some(nidx) = self.pool.get(link.target) {
                                let node = self.pool.node(nidx);
                                if !node.flags.contains(NodeFlags::CLOSED)
                                    && !node.flags.contains(NodeFlags::OPEN)
                                {
                                    self.pool.node_mut(nidx).flags.insert(NodeFlags::OPEN);
                                    self.open.push(d, nidx);
                                }
                            }
                        }
                    }
                    continue;
                }

                let (d, t_seg) = walkway_common::dist_pt_seg_sqr_2d(center, va, vb);
                if d < best_dist_sqr {
                    best_dist_sqr = d;
                    let closest = va.lerp(vb, t_seg);
                    best_normal = Vec3::new(center.x - closest.x, 0.0, center.z - closest.z)
                        .normalize_or_zero();
                }
            }
        }

        (Status::success(), best_dist_sqr.sqrt(), best_normal)
    }
}
