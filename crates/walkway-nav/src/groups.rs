//! Reachability builder: partitions the polygon graph into groups with a
//! union-find and bakes per-capability-class traversal tables.

use std::collections::HashMap;

use crate::disjoint_set::DisjointSet;
use crate::mesh::NavMesh;
use crate::status::{Status, StatusDetail};
use crate::tile::{NULL_TRAVERSE_TYPE, PolyType};

/// Group id of polygons that have not been assigned yet.
pub const NULL_POLY_GROUP: u16 = 0;
/// Reserved group for polygons with no links at all. Stray polygons are
/// excluded from path search entirely, not merely isolated.
pub const STRAY_POLY_GROUP: u16 = 1;
/// First group id handed to real islands.
pub const FIRST_USABLE_POLY_GROUP: u16 = 2;
/// Below this many groups no traversal tables are built; every query can
/// answer reachability trivially.
pub const MIN_POLY_GROUP_COUNT: u16 = 3;
/// Hard cap on group ids.
pub const MAX_POLY_GROUP_COUNT: usize = 0xffff;

/// One movement-capability class.
#[derive(Debug, Clone)]
pub struct TraversalClass {
    /// Bit per traverse type this class can perform.
    pub traverse_type_mask: u64,
    /// Bit per off-mesh jump type this class can use.
    pub jump_type_mask: u64,
}

impl TraversalClass {
    /// Whether the class can take a traverse link of the given type.
    pub fn can_traverse(&self, traverse_type: u8) -> bool {
        traverse_type != NULL_TRAVERSE_TYPE
            && traverse_type < 64
            && self.traverse_type_mask & (1 << traverse_type) != 0
    }

    /// Whether the class can use an off-mesh connection of the given jump
    /// type.
    pub fn can_jump(&self, jump_type: u8) -> bool {
        jump_type < 64 && self.jump_type_mask & (1 << jump_type) != 0
    }
}

/// The movement-capability classes of one build, one traversal table each.
#[derive(Debug, Clone)]
pub struct TraversalCaps {
    /// Classes in table order.
    pub classes: Vec<TraversalClass>,
}

impl Default for TraversalCaps {
    fn default() -> Self {
        // One class that can do everything.
        Self {
            classes: vec![TraversalClass {
                traverse_type_mask: u64::MAX,
                jump_type_mask: u64::MAX,
            }],
        }
    }
}

/// Words per traversal table for a group count.
pub fn traversal_table_size(group_count: u16) -> usize {
    let gc = group_count as usize;
    gc.div_ceil(32) * gc
}

/// Word/bit cell of the (a, b) pair.
#[inline]
fn table_cell(group_count: u16, a: u16, b: u16) -> (usize, u32) {
    let words_per_row = (group_count as usize).div_ceil(32);
    (
        a as usize * words_per_row + (b as usize) / 32,
        1u32 << (b & 31),
    )
}

/// O(1) reachability lookup against a baked table.
pub fn is_group_reachable(table: &[u32], group_count: u16, a: u16, b: u16) -> bool {
    if a == b {
        return true;
    }
    if a >= group_count || b >= group_count {
        return false;
    }
    let (cell, bit) = table_cell(group_count, a, b);
    table.get(cell).is_some_and(|w| w & bit != 0)
}

#[derive(Clone, Copy, PartialEq)]
enum EdgeKind {
    Direct,
    Traverse(u8),
    OffMesh(u8),
}

struct GraphSnapshot {
    /// Node key is (tile index, poly index).
    nodes: Vec<(usize, usize)>,
    index: HashMap<(usize, usize), usize>,
    edges: Vec<Vec<(usize, EdgeKind)>>,
    is_off_mesh: Vec<bool>,
    jump_type: Vec<u8>,
    has_links: Vec<bool>,
}

fn snapshot(mesh: &NavMesh) -> GraphSnapshot {
    let mut snap = GraphSnapshot {
        nodes: Vec::new(),
        index: HashMap::new(),
        edges: Vec::new(),
        is_off_mesh: Vec::new(),
        jump_type: Vec::new(),
        has_links: Vec::new(),
    };

    for t in 0..mesh.max_tiles() {
        let Some(tile) = mesh.tile(t) else { continue };
        for p in 0..tile.polys.len() {
            let id = snap.nodes.len();
            snap.nodes.push((t, p));
            snap.index.insert((t, p), id);
            snap.edges.push(Vec::new());
            let off_mesh = tile.polys[p].poly_type == PolyType::OffMeshConnection;
            snap.is_off_mesh.push(off_mesh);
            snap.jump_type.push(if off_mesh {
                tile.off_mesh_cons
                    .iter()
                    .find(|c| c.poly as usize == p)
                    .map(|c| c.jump_type)
                    .unwrap_or(0)
            } else {
                0
            });
            snap.has_links.push(false);
        }
    }

    for t in 0..mesh.max_tiles() {
        let Some(tile) = mesh.tile(t) else { continue };
        for p in 0..tile.polys.len() {
            let from = snap.index[&(t, p)];
            for (_, link) in tile.poly_links(p) {
                // A link whose endpoint tile is gone counts as unreachable,
                // never as an error.
                let Some((t2, p2)) = mesh.resolve(link.target) else {
                    continue;
                };
                let to = snap.index[&(t2, p2)];
                snap.has_links[from] = true;
                snap.has_links[to] = true;

                // Off-mesh hops take the jump type of whichever endpoint is
                // the connection polygon.
                let kind = if link.is_traverse() {
                    EdgeKind::Traverse(link.traverse_type)
                } else if snap.is_off_mesh[from] {
                    EdgeKind::OffMesh(snap.jump_type[from])
                } else if snap.is_off_mesh[to] {
                    EdgeKind::OffMesh(snap.jump_type[to])
                } else {
                    EdgeKind::Direct
                };
                snap.edges[from].push((to, kind));
            }
        }
    }

    snap
}

/// Assigns every polygon a reachability group.
///
/// Islands are flooded across direct links only; traverse links and
/// off-mesh connections never merge islands here, so the later
/// per-capability union pass stays order-independent of the base pass.
/// Polygons without any link land in the reserved stray group.
pub fn build_poly_groups(mesh: &mut NavMesh) -> Result<DisjointSet, Status> {
    let snap = snapshot(mesh);
    let n = snap.nodes.len();

    let mut set = DisjointSet::new(FIRST_USABLE_POLY_GROUP as usize, MAX_POLY_GROUP_COUNT);
    let mut group_of = vec![NULL_POLY_GROUP; n];

    for start in 0..n {
        if group_of[start] != NULL_POLY_GROUP {
            continue;
        }
        if !snap.has_links[start] {
            group_of[start] = STRAY_POLY_GROUP;
            continue;
        }
        // Off-mesh connection polygons get their own singleton group so an
        // off-mesh bridge can never silently merge two islands.
        if snap.is_off_mesh[start] {
            let id = set
                .insert_new()
                .ok_or(Status::failure(StatusDetail::OutOfNodes))?;
            group_of[start] = id;
            continue;
        }

        let id = set
            .insert_new()
            .ok_or(Status::failure(StatusDetail::OutOfNodes))?;
        let mut stack = vec![start];
        group_of[start] = id;
        while let Some(cur) = stack.pop() {
            for &(next, kind) in &snap.edges[cur] {
                if kind != EdgeKind::Direct {
                    continue;
                }
                if snap.is_off_mesh[next] || group_of[next] != NULL_POLY_GROUP {
                    continue;
                }
                group_of[next] = id;
                stack.push(next);
            }
        }
    }

    // Flatten to roots and write back into the polys. Roots are already
    // dense here because the flood allocates ids in visit order.
    for (i, &(t, p)) in snap.nodes.iter().enumerate() {
        let root = if group_of[i] >= FIRST_USABLE_POLY_GROUP {
            set.find(group_of[i])
        } else {
            group_of[i]
        };
        mesh.tile_mut(t).polys[p].group_id = root;
    }

    Ok(set)
}

/// Builds one traversal table per capability class.
///
/// Must run after [`build_poly_groups`]; the returned set from that call is
/// the base partition. Off-mesh and traverse bridges are unioned only here,
/// per class, strictly after the direct-link pass.
pub fn build_traversal_tables(
    mesh: &mut NavMesh,
    base: &DisjointSet,
    caps: &TraversalCaps,
) -> Result<(), Status> {
    let group_count = base.len() as u16;

    if group_count < MIN_POLY_GROUP_COUNT {
        mesh.set_traversal_tables(group_count, Vec::new(), 0);
        return Ok(());
    }

    let snap = snapshot(mesh);
    let group_at = |mesh: &NavMesh, i: usize| -> u16 {
        let (t, p) = snap.nodes[i];
        mesh.tile(t).map(|tile| tile.polys[p].group_id).unwrap_or(0)
    };

    let table_size = traversal_table_size(group_count);
    let mut tables = Vec::with_capacity(caps.classes.len());

    for class in &caps.classes {
        let mut set = base.clone();

        // Union groups bridged by links this class can take.
        for from in 0..snap.nodes.len() {
            let ga = group_at(mesh, from);
            if ga < FIRST_USABLE_POLY_GROUP {
                continue;
            }
            for &(to, kind) in &snap.edges[from] {
                let gb = group_at(mesh, to);
                if gb < FIRST_USABLE_POLY_GROUP || ga == gb {
                    continue;
                }
                let allowed = match kind {
                    EdgeKind::Direct => true,
                    EdgeKind::Traverse(t) => class.can_traverse(t),
                    EdgeKind::OffMesh(j) => class.can_jump(j),
                };
                if allowed {
                    set.union(ga, gb);
                }
            }
        }

        let mut table = vec![0u32; table_size];
        for a in 0..group_count {
            for b in 0..group_count {
                let reachable = a == b || set.find(a) == set.find(b);
                if reachable {
                    let (cell, bit) = table_cell(group_count, a, b);
                    table[cell] |= bit;
                }
            }
        }
        tables.push(table);
    }

    mesh.set_traversal_tables(group_count, tables, table_size);
    Ok(())
}
