//! Obstacle lifecycle scenarios against a live mesh.

use glam::Vec3;
use walkway_build::{Heightfield, WALKABLE_AREA};
use walkway_common::BuildContext;
use walkway_nav::{NavMesh, NavMeshParams, QueryFilter};

use crate::cache::{ObstacleState, TileCache, TileCacheParams};
use crate::codec::Lz4Codec;
use crate::layer::TileCacheLayer;

fn flat_layer() -> TileCacheLayer {
    let mut hf = Heightfield::new(
        24,
        24,
        Vec3::ZERO,
        Vec3::new(12.0, 6.0, 12.0),
        0.5,
        0.25,
    )
    .unwrap();
    for z in 0..24 {
        for x in 0..24 {
            hf.add_span(x, z, 1, 2, WALKABLE_AREA, 1).unwrap();
        }
    }
    TileCacheLayer::from_heightfield(&hf, 0, 0, 0)
}

fn cache_params() -> TileCacheParams {
    TileCacheParams {
        origin: Vec3::ZERO,
        cs: 0.5,
        ch: 0.25,
        tile_size: 24,
        walkable_height: 4,
        walkable_climb: 1,
        walkable_radius: 0,
        max_simplification_error: 1.3,
        min_region_area: 2,
        max_obstacles: 8,
    }
}

fn setup() -> (TileCache, NavMesh, BuildContext) {
    let mut cache = TileCache::new(cache_params(), Box::new(Lz4Codec)).unwrap();
    cache.add_layer(&flat_layer()).unwrap();

    let mesh = NavMesh::new(NavMeshParams {
        origin: Vec3::ZERO,
        tile_width: 12.0,
        tile_height: 12.0,
        max_tiles: 4,
        max_polys: 1 << 16,
    })
    .unwrap();

    let mut ctx = BuildContext::new();
    let mut mesh = mesh;
    cache.build_all_tiles(&mut ctx, &mut mesh).unwrap();
    (cache, mesh, ctx)
}

fn covered(mesh: &NavMesh, pos: Vec3) -> bool {
    let filter = QueryFilter::default();
    let (status, _, point) = mesh.find_nearest_poly(pos, Vec3::new(0.3, 2.0, 0.3), &filter);
    status.is_success() && walkway_common::dist_sqr_2d(point, pos) < 0.1
}

fn poly_count(mesh: &NavMesh) -> usize {
    mesh.resident_tiles().map(|(_, t)| t.polys.len()).sum()
}

#[test]
fn initial_build_covers_floor() {
    let (_, mesh, _) = setup();
    assert!(poly_count(&mesh) >= 1);
    assert!(covered(&mesh, Vec3::new(6.0, 0.5, 6.0)));
    assert!(covered(&mesh, Vec3::new(2.0, 0.5, 2.0)));
}

#[test]
fn obstacle_carves_footprint_after_one_unbounded_update() {
    let (mut cache, mut mesh, mut ctx) = setup();
    let original_polys = poly_count(&mesh);

    let r = cache
        .add_obstacle(Vec3::new(6.0, 0.0, 6.0), 1.0, 2.0)
        .unwrap();
    assert_eq!(cache.obstacle(r).unwrap().state, ObstacleState::Processing);

    let up_to_date = cache.update(f32::INFINITY, &mut ctx, &mut mesh).unwrap();
    assert!(up_to_date);
    assert_eq!(cache.obstacle(r).unwrap().state, ObstacleState::Processed);

    // The footprint is no longer covered; the rest of the floor is.
    assert!(!covered(&mesh, Vec3::new(6.0, 0.5, 6.0)));
    assert!(covered(&mesh, Vec3::new(2.0, 0.5, 2.0)));

    // Removing the obstacle restores the original polygon set.
    cache.remove_obstacle(r);
    let up_to_date = cache.update(f32::INFINITY, &mut ctx, &mut mesh).unwrap();
    assert!(up_to_date);
    assert!(covered(&mesh, Vec3::new(6.0, 0.5, 6.0)));
    assert_eq!(poly_count(&mesh), original_polys);
}

#[test]
fn obstacle_removal_is_idempotent() {
    let (mut cache, mut mesh, mut ctx) = setup();
    let r = cache
        .add_obstacle(Vec3::new(6.0, 0.0, 6.0), 1.0, 2.0)
        .unwrap();
    cache.update(f32::INFINITY, &mut ctx, &mut mesh).unwrap();

    assert!(cache.remove_obstacle(r).is_success());
    // Second removal before the rebuild happens: a no-op, not an error.
    assert!(cache.remove_obstacle(r).is_success());
    cache.update(f32::INFINITY, &mut ctx, &mut mesh).unwrap();

    assert!(cache.obstacle(r).is_none(), "slot salt must have advanced");
    // Removing via the stale handle after the slot was freed: still a
    // no-op.
    assert!(cache.remove_obstacle(r).is_success());
    assert!(covered(&mesh, Vec3::new(6.0, 0.5, 6.0)));
}

#[test]
fn bounded_update_spreads_work() {
    let (mut cache, mut mesh, mut ctx) = setup();
    cache
        .add_obstacle(Vec3::new(6.0, 0.0, 6.0), 1.0, 2.0)
        .unwrap();
    // One bounded call on a single-tile cache finishes the work; the
    // return value reports it.
    let up_to_date = cache.update(0.016, &mut ctx, &mut mesh).unwrap();
    assert!(up_to_date);
}

#[test]
fn cache_set_round_trip() {
    let (cache, _, _) = setup();
    let blob = cache.save().unwrap();
    let loaded = TileCache::load(&blob, Box::new(Lz4Codec)).unwrap();
    assert_eq!(loaded.layer_count(), cache.layer_count());
    assert_eq!(loaded.params().tile_size, cache.params().tile_size);

    // The reloaded cache rebuilds an identical tile.
    let layer = loaded.layer_at((0, 0, 0)).unwrap();
    assert_eq!(layer.width, 24);

    let mut mesh = NavMesh::new(NavMeshParams {
        origin: Vec3::ZERO,
        tile_width: 12.0,
        tile_height: 12.0,
        max_tiles: 4,
        max_polys: 1 << 16,
    })
    .unwrap();
    let mut ctx = BuildContext::new();
    loaded.build_all_tiles(&mut ctx, &mut mesh).unwrap();
    assert!(covered(&mesh, Vec3::new(6.0, 0.5, 6.0)));
}

#[test]
fn load_rejects_wrong_magic() {
    let (cache, _, _) = setup();
    let mut blob = cache.save().unwrap();
    blob[0] ^= 0xff;
    assert!(TileCache::load(&blob, Box::new(Lz4Codec)).is_err());
}
