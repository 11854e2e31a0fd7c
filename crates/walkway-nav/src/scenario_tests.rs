//! End-to-end scenarios: tile round-trips, island reachability, traverse
//! linking and sliced-versus-synchronous path equivalence.

use glam::Vec3;
use walkway_build::{BuildConfig, BuildPipeline, InputMesh, PolyMesh, ShapeVolumeSet};
use walkway_common::BuildContext;

use crate::builder::{OffMeshConnectionDef, TileBuildParams, build_tile_data};
use crate::groups::{
    FIRST_USABLE_POLY_GROUP, TraversalCaps, TraversalClass, build_poly_groups,
    build_traversal_tables, is_group_reachable,
};
use crate::mesh::{NavMesh, NavMeshParams};
use crate::query::NavMeshQuery;
use crate::traverse::{
    LineOfSight, TraverseTable, TraverseTypeDef, connect_traverse_links, verify_reverse_links,
};
use crate::{PolyFlags, PolyRef, QueryFilter, StatusDetail};

struct ClearSight;

impl LineOfSight for ClearSight {
    fn raycast(&self, _src: Vec3, _dst: Vec3) -> Option<f32> {
        None
    }
}

struct BlockedSight;

impl LineOfSight for BlockedSight {
    fn raycast(&self, _src: Vec3, _dst: Vec3) -> Option<f32> {
        Some(0.5)
    }
}

/// Hand-built mesh of two square islands separated by a 50-unit gap.
fn two_island_polymesh() -> PolyMesh {
    use walkway_build::MESH_NULL_IDX;

    let verts: Vec<[u16; 3]> = vec![
        // Island A: x 0..40, z 0..8.
        [0, 0, 0],
        [0, 0, 8],
        [40, 0, 8],
        [40, 0, 0],
        // Island B: x 90..130, z 0..8.
        [90, 0, 0],
        [90, 0, 8],
        [130, 0, 8],
        [130, 0, 0],
    ];
    let nvp = 6;
    let mut polys = vec![MESH_NULL_IDX; nvp * 2 * 2];
    polys[0..4].copy_from_slice(&[0, 1, 2, 3]);
    polys[nvp * 2..nvp * 2 + 4].copy_from_slice(&[4, 5, 6, 7]);

    PolyMesh {
        verts,
        polys,
        regs: vec![1, 2],
        flags: vec![0, 0],
        areas: vec![walkway_build::WALKABLE_AREA; 2],
        nvp,
        bmin: Vec3::ZERO,
        bmax: Vec3::new(130.0, 10.0, 8.0),
        cs: 1.0,
        ch: 1.0,
        border_size: 0,
    }
}

fn island_mesh() -> NavMesh {
    let pmesh = two_island_polymesh();
    let flags = vec![PolyFlags::WALK; 2];
    let params = TileBuildParams {
        polymesh: &pmesh,
        detail: None,
        off_mesh_cons: &[],
        poly_flags: &flags,
        tile_x: 0,
        tile_y: 0,
        tile_layer: 0,
        user_id: 0,
        walkable_height: 2.0,
        walkable_radius: 0.5,
        walkable_climb: 0.9,
        build_bv_tree: true,
    };
    let data = build_tile_data(&params).unwrap();

    let mut mesh = NavMesh::new(NavMeshParams {
        origin: Vec3::ZERO,
        tile_width: 130.0,
        tile_height: 8.0,
        max_tiles: 4,
        max_polys: 1 << crate::POLY_BITS,
    })
    .unwrap();
    mesh.add_tile(data).unwrap();
    mesh
}

fn island_traverse_table(max_dist: f32) -> TraverseTable {
    TraverseTable {
        types: vec![TraverseTypeDef {
            traverse_type: 3,
            min_dist: 40.0,
            max_dist,
            min_elev: -10.0,
            max_elev: 10.0,
            min_slope: 0.0,
            max_slope: 45.0,
            overlap_ratio: 0.0,
            overlap_elev: 0.0,
        }],
    }
}

#[test]
fn two_islands_get_exactly_one_bidirectional_link() {
    let mut mesh = island_mesh();
    let created =
        connect_traverse_links(&mut mesh, &island_traverse_table(120.0), &ClearSight, 0.5)
            .unwrap();
    assert_eq!(created, 1, "expected exactly one bidirectional link");
    assert!(verify_reverse_links(&mesh));

    // Both polys carry one traverse link each.
    let tile = mesh.tile(0).unwrap();
    for p in 0..2 {
        let traverse_links: Vec<_> = tile
            .poly_links(p)
            .filter(|(_, l)| l.is_traverse())
            .collect();
        assert_eq!(traverse_links.len(), 1);
        assert_eq!(traverse_links[0].1.traverse_type, 3);
    }
}

#[test]
fn narrowing_the_table_yields_zero_links() {
    let mut mesh = island_mesh();
    let created =
        connect_traverse_links(&mut mesh, &island_traverse_table(30.0), &ClearSight, 0.5)
            .unwrap();
    assert_eq!(created, 0);
}

#[test]
fn blocked_line_of_sight_yields_zero_links() {
    let mut mesh = island_mesh();
    let created =
        connect_traverse_links(&mut mesh, &island_traverse_table(120.0), &BlockedSight, 0.5)
            .unwrap();
    assert_eq!(created, 0);
}

#[test]
fn traversal_table_reflects_traverse_capability() {
    let mut mesh = island_mesh();
    connect_traverse_links(&mut mesh, &island_traverse_table(120.0), &ClearSight, 0.5).unwrap();

    let base = build_poly_groups(&mut mesh).unwrap();
    let caps = TraversalCaps {
        classes: vec![
            // Class 0 can take type-3 traverse links.
            TraversalClass {
                traverse_type_mask: 1 << 3,
                jump_type_mask: 0,
            },
            // Class 1 cannot traverse at all.
            TraversalClass {
                traverse_type_mask: 0,
                jump_type_mask: 0,
            },
        ],
    };
    build_traversal_tables(&mut mesh, &base, &caps).unwrap();

    let tile = mesh.tile(0).unwrap();
    let ga = tile.polys[0].group_id;
    let gb = tile.polys[1].group_id;
    assert!(ga >= FIRST_USABLE_POLY_GROUP);
    assert!(gb >= FIRST_USABLE_POLY_GROUP);
    assert_ne!(ga, gb, "islands must stay distinct groups");

    let gc = mesh.poly_group_count();
    let tables = mesh.traversal_tables();
    assert_eq!(tables.len(), 2);
    assert!(is_group_reachable(&tables[0], gc, ga, gb));
    assert!(is_group_reachable(&tables[0], gc, gb, ga));
    assert!(!is_group_reachable(&tables[1], gc, ga, gb));
}

#[test]
fn find_path_short_circuits_on_unreachable_groups() {
    let mut mesh = island_mesh();
    connect_traverse_links(&mut mesh, &island_traverse_table(120.0), &ClearSight, 0.5).unwrap();
    let base = build_poly_groups(&mut mesh).unwrap();
    let caps = TraversalCaps {
        classes: vec![TraversalClass {
            traverse_type_mask: 0,
            jump_type_mask: 0,
        }],
    };
    build_traversal_tables(&mut mesh, &base, &caps).unwrap();

    let start = mesh.tile_ref(0);
    let end = PolyRef::encode(mesh.tile(0).unwrap().salt, 1, 1);
    let mut query = NavMeshQuery::new(&mesh, 256);
    let filter = QueryFilter::default();
    let (status, path) = query.find_path(
        start,
        end,
        Vec3::new(20.0, 0.0, 4.0),
        Vec3::new(110.0, 0.0, 4.0),
        &filter,
    );
    assert!(status.is_failure());
    assert_eq!(status.detail, StatusDetail::Unreachable);
    assert!(path.is_empty());
}

#[test]
fn path_crosses_traverse_link_when_capability_allows() {
    let mut mesh = island_mesh();
    connect_traverse_links(&mut mesh, &island_traverse_table(120.0), &ClearSight, 0.5).unwrap();
    let base = build_poly_groups(&mut mesh).unwrap();
    build_traversal_tables(&mut mesh, &base, &TraversalCaps::default()).unwrap();

    let start = mesh.tile_ref(0);
    let end = PolyRef::encode(mesh.tile(0).unwrap().salt, 1, 1);
    let mut query = NavMeshQuery::new(&mesh, 256);
    let filter = QueryFilter::default();
    let (status, path) = query.find_path(
        start,
        end,
        Vec3::new(20.0, 0.0, 4.0),
        Vec3::new(110.0, 0.0, 4.0),
        &filter,
    );
    assert!(status.is_success());
    assert!(!status.is_partial());
    assert_eq!(path.len(), 2);
    assert_eq!(path[0], start);
    assert_eq!(path[1], end);
}

/// Floor with a steep pyramid in the middle: the partitioner must carve a
/// hole-free boundary around it and paths must route around the obstacle.
fn obstacle_course() -> (NavMesh, BuildConfig) {
    let mut cfg = BuildConfig {
        cs: 0.25,
        ch: 0.2,
        walkable_height: 4,
        walkable_climb: 1,
        walkable_radius: 0,
        min_region_area: 2,
        merge_region_area: 200,
        detail_sample_dist: 0.0,
        detail_sample_max_error: 0.5,
        max_edge_len: 0,
        ..Default::default()
    };
    cfg.calc_grid_size(Vec3::new(0.0, -0.5, 0.0), Vec3::new(12.0, 6.0, 12.0));

    // 3x3 grid of quads; the center quad is replaced by a steep pyramid.
    let mut input = InputMesh::default();
    let mut quad = |input: &mut InputMesh, x0: f32, z0: f32, x1: f32, z1: f32| {
        let base = input.verts.len() as u32;
        input.verts.extend_from_slice(&[
            Vec3::new(x0, 0.0, z0),
            Vec3::new(x1, 0.0, z0),
            Vec3::new(x1, 0.0, z1),
            Vec3::new(x0, 0.0, z1),
        ]);
        input.tris.push([base, base + 2, base + 1]);
        input.tris.push([base, base + 3, base + 2]);
    };
    for gz in 0..3 {
        for gx in 0..3 {
            if gx == 1 && gz == 1 {
                continue;
            }
            quad(
                &mut input,
                gx as f32 * 4.0,
                gz as f32 * 4.0,
                (gx + 1) as f32 * 4.0,
                (gz + 1) as f32 * 4.0,
            );
        }
    }
    // Steep pyramid over the center cell, apex far above the climb limit.
    let base = input.verts.len() as u32;
    input.verts.extend_from_slice(&[
        Vec3::new(4.0, 0.0, 4.0),
        Vec3::new(8.0, 0.0, 4.0),
        Vec3::new(8.0, 0.0, 8.0),
        Vec3::new(4.0, 0.0, 8.0),
        Vec3::new(6.0, 5.0, 6.0),
    ]);
    for (a, b) in [(0, 1), (1, 2), (2, 3), (3, 0)] {
        input.tris.push([base + a, base + 4, base + b]);
    }

    let pipeline = BuildPipeline::new(cfg.clone());
    let mut ctx = BuildContext::new();
    let artifacts = pipeline
        .build(&mut ctx, &input, &ShapeVolumeSet::default())
        .unwrap();

    let flags = vec![PolyFlags::WALK; artifacts.polymesh.poly_count()];
    let params = TileBuildParams {
        polymesh: &artifacts.polymesh,
        detail: Some(&artifacts.detail),
        off_mesh_cons: &[],
        poly_flags: &flags,
        tile_x: 0,
        tile_y: 0,
        tile_layer: 0,
        user_id: 0,
        walkable_height: 0.8,
        walkable_radius: 0.25,
        walkable_climb: 0.2,
        build_bv_tree: true,
    };
    let data = build_tile_data(&params).unwrap();

    let mut mesh = NavMesh::new(NavMeshParams {
        origin: Vec3::new(0.0, -0.5, 0.0),
        tile_width: 12.0,
        tile_height: 12.0,
        max_tiles: 4,
        max_polys: 1 << crate::POLY_BITS,
    })
    .unwrap();
    mesh.add_tile(data).unwrap();
    (mesh, cfg)
}

#[test]
fn obstacle_grid_path_avoids_center() {
    let (mesh, _) = obstacle_course();
    let mut query = NavMeshQuery::new(&mesh, 2048);
    let filter = QueryFilter::default();

    let (s1, start, _) = query.find_nearest_poly(
        Vec3::new(1.0, 0.0, 1.0),
        Vec3::new(1.0, 2.0, 1.0),
        &filter,
    );
    let (s2, end, _) = query.find_nearest_poly(
        Vec3::new(11.0, 0.0, 11.0),
        Vec3::new(1.0, 2.0, 1.0),
        &filter,
    );
    assert!(s1.is_success() && s2.is_success());

    let (status, path) = query.find_path(
        start,
        end,
        Vec3::new(1.0, 0.0, 1.0),
        Vec3::new(11.0, 0.0, 11.0),
        &filter,
    );
    assert!(status.is_success());
    assert!(!status.is_partial(), "path must reach the far corner");
    assert!(path.len() >= 2);

    // No polygon on the path may sit inside the obstacle footprint.
    for r in &path {
        let (tile, poly) = mesh.get_tile_and_poly(*r).unwrap();
        let c = tile.poly_center(poly);
        let inside = c.x > 4.5 && c.x < 7.5 && c.z > 4.5 && c.z < 7.5;
        assert!(!inside, "path crosses the obstacle at {c:?}");
    }
}

#[test]
fn sliced_path_matches_synchronous_path() {
    let (mesh, _) = obstacle_course();
    let filter = QueryFilter::default();

    let mut query = NavMeshQuery::new(&mesh, 2048);
    let (_, start, sp) = query.find_nearest_poly(
        Vec3::new(1.0, 0.0, 1.0),
        Vec3::new(1.0, 2.0, 1.0),
        &filter,
    );
    let (_, end, ep) = query.find_nearest_poly(
        Vec3::new(11.0, 0.0, 11.0),
        Vec3::new(1.0, 2.0, 1.0),
        &filter,
    );

    let (sync_status, sync_path) = query.find_path(start, end, sp, ep, &filter);
    assert!(sync_status.is_success());

    // Step the sliced search one expansion at a time.
    let mut sliced = NavMeshQuery::new(&mesh, 2048);
    let mut status = sliced.init_sliced_find_path(start, end, sp, ep, &filter);
    let mut guard = 0;
    while status.is_in_progress() {
        let (s, _) = sliced.update_sliced_find_path(1);
        status = s;
        guard += 1;
        assert!(guard < 100_000, "sliced search failed to converge");
    }
    let (sliced_status, sliced_path) = sliced.finalize_sliced_find_path();
    assert!(sliced_status.is_success());
    assert_eq!(sync_path, sliced_path);
}

#[test]
fn tile_round_trip_preserves_topology() {
    let (mesh, _) = obstacle_course();
    let (base_ref, tile) = mesh.resident_tiles().next().unwrap();

    let decoded = crate::format::decode_tile_data(&tile.data).unwrap();
    assert_eq!(decoded.polys.len(), tile.polys.len());
    assert_eq!(decoded.verts.len(), tile.verts.len());
    assert_eq!(decoded.off_mesh_cons.len(), tile.off_mesh_cons.len());
    for (a, b) in decoded.verts.iter().zip(tile.verts.iter()) {
        // Off-mesh endpoint snapping aside, vertices survive exactly.
        assert!((*a - *b).length() < 1e-4);
    }
    for (a, b) in decoded.polys.iter().zip(tile.polys.iter()) {
        assert_eq!(a.verts, b.verts);
        assert_eq!(a.neighbors, b.neighbors);
        assert_eq!(a.area, b.area);
        assert_eq!(a.flags, b.flags);
        assert_eq!(a.vert_count, b.vert_count);
    }
    let _ = base_ref;
}

#[test]
fn nav_mesh_set_round_trip() {
    let (mut mesh, _) = obstacle_course();
    let base = build_poly_groups(&mut mesh).unwrap();
    build_traversal_tables(&mut mesh, &base, &TraversalCaps::default()).unwrap();

    let blob = crate::format::save_nav_mesh(&mesh).unwrap();
    let loaded = crate::format::load_nav_mesh(&blob).unwrap();

    assert_eq!(loaded.poly_group_count(), mesh.poly_group_count());
    assert_eq!(
        loaded.traversal_tables().len(),
        mesh.traversal_tables().len()
    );
    assert_eq!(loaded.traversal_tables(), mesh.traversal_tables());

    // Group ids ride along inside the tile blobs.
    let (_, orig_tile) = mesh.resident_tiles().next().unwrap();
    let (_, loaded_tile) = loaded.resident_tiles().next().unwrap();
    for (a, b) in orig_tile.polys.iter().zip(loaded_tile.polys.iter()) {
        assert_eq!(a.group_id, b.group_id);
    }
}

#[test]
fn reachability_table_matches_union_find() {
    let mut mesh = island_mesh();
    connect_traverse_links(&mut mesh, &island_traverse_table(120.0), &ClearSight, 0.5).unwrap();
    let base = build_poly_groups(&mut mesh).unwrap();
    let caps = TraversalCaps::default();
    build_traversal_tables(&mut mesh, &base, &caps).unwrap();

    // Recompute the class-0 union independently and compare every pair.
    let mut set = base.clone();
    let tile = mesh.tile(0).unwrap();
    let (ga, gb) = (tile.polys[0].group_id, tile.polys[1].group_id);
    set.union(ga, gb);

    let gc = mesh.poly_group_count();
    let table = &mesh.traversal_tables()[0];
    for a in 0..gc {
        for b in 0..gc {
            let expected = a == b || set.find(a) == set.find(b);
            assert_eq!(
                is_group_reachable(table, gc, a, b),
                expected,
                "mismatch at ({a}, {b})"
            );
        }
    }
}

#[test]
fn off_mesh_connection_links_both_ways() {
    // One floor with an off-mesh connection hopping over its middle.
    let pmesh = two_island_polymesh();
    let flags = vec![PolyFlags::WALK; 2];
    let cons = vec![OffMeshConnectionDef {
        start: Vec3::new(35.0, 0.0, 4.0),
        end: Vec3::new(95.0, 0.0, 4.0),
        ref_pos: Vec3::new(35.0, 0.0, 4.0),
        radius: 6.0,
        yaw: 0.0,
        bidirectional: true,
        jump_type: 1,
        area: 5,
        flags: PolyFlags::JUMP,
        user_id: 7,
    }];
    let params = TileBuildParams {
        polymesh: &pmesh,
        detail: None,
        off_mesh_cons: &cons,
        poly_flags: &flags,
        tile_x: 0,
        tile_y: 0,
        tile_layer: 0,
        user_id: 0,
        walkable_height: 2.0,
        walkable_radius: 0.5,
        walkable_climb: 0.9,
        build_bv_tree: true,
    };
    let data = build_tile_data(&params).unwrap();

    let mut mesh = NavMesh::new(NavMeshParams {
        origin: Vec3::ZERO,
        tile_width: 130.0,
        tile_height: 8.0,
        max_tiles: 4,
        max_polys: 1 << crate::POLY_BITS,
    })
    .unwrap();
    mesh.add_tile(data).unwrap();

    let tile = mesh.tile(0).unwrap();
    assert_eq!(tile.off_mesh_cons.len(), 1);
    let con_poly = tile.off_mesh_cons[0].poly as usize;
    assert_eq!(
        tile.polys[con_poly].poly_type,
        crate::tile::PolyType::OffMeshConnection
    );
    // The connection polygon links to the mesh and the mesh links back.
    assert!(tile.poly_links(con_poly).count() >= 1);
    let land_link = tile
        .poly_links(0)
        .chain(tile.poly_links(1))
        .any(|(_, l)| l.target.poly() as usize == con_poly);
    assert!(land_link, "no return link to the off-mesh connection");
}

#[test]
fn off_mesh_connection_bridges_groups() {
    // Same setup as above, then groups: with jump capability the islands
    // become mutually reachable, without it they stay separate.
    let pmesh = two_island_polymesh();
    let flags = vec![PolyFlags::WALK; 2];
    let cons = vec![OffMeshConnectionDef {
        start: Vec3::new(35.0, 0.0, 4.0),
        end: Vec3::new(95.0, 0.0, 4.0),
        ref_pos: Vec3::new(35.0, 0.0, 4.0),
        radius: 6.0,
        yaw: 0.0,
        bidirectional: true,
        jump_type: 1,
        area: 5,
        flags: PolyFlags::JUMP,
        user_id: 0,
    }];
    let params = TileBuildParams {
        polymesh: &pmesh,
        detail: None,
        off_mesh_cons: &cons,
        poly_flags: &flags,
        tile_x: 0,
        tile_y: 0,
        tile_layer: 0,
        user_id: 0,
        walkable_height: 2.0,
        walkable_radius: 0.5,
        walkable_climb: 0.9,
        build_bv_tree: true,
    };
    let data = build_tile_data(&params).unwrap();
    let mut mesh = NavMesh::new(NavMeshParams {
        origin: Vec3::ZERO,
        tile_width: 130.0,
        tile_height: 8.0,
        max_tiles: 4,
        max_polys: 1 << crate::POLY_BITS,
    })
    .unwrap();
    mesh.add_tile(data).unwrap();

    let base = build_poly_groups(&mut mesh).unwrap();
    let caps = TraversalCaps {
        classes: vec![
            TraversalClass {
                traverse_type_mask: 0,
                jump_type_mask: 1 << 1,
            },
            TraversalClass {
                traverse_type_mask: 0,
                jump_type_mask: 0,
            },
        ],
    };
    build_traversal_tables(&mut mesh, &base, &caps).unwrap();

    let tile = mesh.tile(0).unwrap();
    let (ga, gb) = (tile.polys[0].group_id, tile.polys[1].group_id);
    assert_ne!(ga, gb);
    let gc = mesh.poly_group_count();
    assert!(is_group_reachable(&mesh.traversal_tables()[0], gc, ga, gb));
    assert!(!is_group_reachable(&mesh.traversal_tables()[1], gc, ga, gb));
}

#[test]
fn raycast_stops_at_island_edge() {
    let mesh = island_mesh();
    let start = mesh.tile_ref(0);
    let query = NavMeshQuery::new(&mesh, 64);
    let filter = QueryFilter::default();

    // Across island A: clear.
    let (status, hit) = query.raycast(
        start,
        Vec3::new(5.0, 0.0, 4.0),
        Vec3::new(35.0, 0.0, 4.0),
        &filter,
    );
    assert!(status.is_success());
    assert_eq!(hit.t, 1.0);

    // Toward island B: blocked at the gap.
    let (status, hit) = query.raycast(
        start,
        Vec3::new(5.0, 0.0, 4.0),
        Vec3::new(120.0, 0.0, 4.0),
        &filter,
    );
    assert!(status.is_success());
    assert!(hit.t < 1.0);
    assert!(hit.normal.x < 0.0, "wall normal should face back");
}

#[test]
fn polys_around_circle_truncates_silently() {
    let (mesh, _) = obstacle_course();
    let mut query = NavMeshQuery::new(&mesh, 2048);
    let filter = QueryFilter::default();
    let (_, start, _) = query.find_nearest_poly(
        Vec3::new(6.0, 0.0, 2.0),
        Vec3::new(1.0, 2.0, 1.0),
        &filter,
    );

    let (status, polys) =
        query.find_polys_around_circle(start, Vec3::new(6.0, 0.0, 2.0), 100.0, &filter, 2);
    assert!(status.is_success());
    assert!(polys.len() <= 2);
    if polys.len() == 2 {
        assert_eq!(status.detail, StatusDetail::BufferTooSmall);
    }
}
