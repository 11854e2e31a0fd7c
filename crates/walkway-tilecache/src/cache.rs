//! Dynamic tile cache: compressed layers plus temporary obstacles, with
//! incremental tile rebuilds hot-swapped into a live navigation mesh.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;

use walkway_build::{
    BuildConfig, ContourSet, CompactHeightfield, PartitionKind, PolyMesh, build_regions,
};
use walkway_common::{BuildContext, Error, Result, TimerCategory};
use walkway_nav::{NavMesh, PolyFlags, Status, TileBuildParams, build_tile_data};

use crate::codec::TileCodec;
use crate::layer::TileCacheLayer;

/// Salted handle to an obstacle.
pub type ObstacleRef = u32;

/// Tiles rebuilt per bounded `update` call.
const MAX_REBUILDS_PER_UPDATE: usize = 4;

/// Lifecycle of one obstacle; transitions are observable across frames so
/// partial rebuilds stay idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObstacleState {
    /// Slot free.
    Empty,
    /// Added, affected tiles not all rebuilt yet.
    Processing,
    /// Fully carved into the mesh.
    Processed,
    /// Removal requested, affected tiles not all rebuilt yet.
    Removing,
}

/// Cylindrical blocker.
#[derive(Debug, Clone)]
pub struct Obstacle {
    /// Cylinder base center.
    pub pos: Vec3,
    /// Cylinder radius.
    pub radius: f32,
    /// Cylinder height.
    pub height: f32,
    /// Lifecycle state.
    pub state: ObstacleState,
    /// Generation counter for handle validation.
    pub salt: u16,
    /// Tiles the obstacle footprint touches.
    pub touched: Vec<(i32, i32, i32)>,
    /// Tiles still waiting for a rebuild.
    pub pending: Vec<(i32, i32, i32)>,
}

impl Obstacle {
    fn empty() -> Self {
        Self {
            pos: Vec3::ZERO,
            radius: 0.0,
            height: 0.0,
            state: ObstacleState::Empty,
            salt: 1,
            touched: Vec::new(),
            pending: Vec::new(),
        }
    }
}

/// Build knobs for cache rebuilds; a subset of the full build
/// configuration scoped to single-tile rebuilds.
#[derive(Debug, Clone)]
pub struct TileCacheParams {
    /// Grid origin.
    pub origin: Vec3,
    /// Horizontal cell size.
    pub cs: f32,
    /// Vertical cell size.
    pub ch: f32,
    /// Cells along one tile edge.
    pub tile_size: i32,
    /// Agent clearance in cell units.
    pub walkable_height: i32,
    /// Agent climb in cell units.
    pub walkable_climb: i32,
    /// Agent radius in cell units.
    pub walkable_radius: i32,
    /// Contour simplification bound.
    pub max_simplification_error: f32,
    /// Minimum region area in cells.
    pub min_region_area: i32,
    /// Obstacle slots.
    pub max_obstacles: usize,
}

impl Default for TileCacheParams {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            cs: 0.3,
            ch: 0.2,
            tile_size: 48,
            walkable_height: 10,
            walkable_climb: 4,
            walkable_radius: 0,
            max_simplification_error: 1.3,
            min_region_area: 2,
            max_obstacles: 128,
        }
    }
}

enum Request {
    Add(usize),
    Remove(usize),
}

/// The cache itself: compressed layers, obstacles and the rebuild queue.
pub struct TileCache {
    params: TileCacheParams,
    codec: Box<dyn TileCodec>,
    layers: HashMap<(i32, i32, i32), Vec<u8>>,
    obstacles: Vec<Obstacle>,
    requests: VecDeque<Request>,
    rebuild_queue: VecDeque<(i32, i32, i32)>,
}

impl TileCache {
    /// Creates an empty cache with the given codec.
    pub fn new(params: TileCacheParams, codec: Box<dyn TileCodec>) -> Result<Self> {
        if params.cs <= 0.0 || params.ch <= 0.0 || params.tile_size <= 0 {
            return Err(Error::InvalidMesh("invalid tile cache params".to_string()));
        }
        let obstacles = (0..params.max_obstacles).map(|_| Obstacle::empty()).collect();
        Ok(Self {
            params,
            codec,
            layers: HashMap::new(),
            obstacles,
            requests: VecDeque::new(),
            rebuild_queue: VecDeque::new(),
        })
    }

    /// Cache parameters.
    pub fn params(&self) -> &TileCacheParams {
        &self.params
    }

    /// Number of stored layers.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Compresses and stores a layer.
    pub fn add_layer(&mut self, layer: &TileCacheLayer) -> Result<()> {
        let raw = layer.to_bytes()?;
        let packed = self.codec.compress(&raw)?;
        self.layers
            .insert((layer.tx, layer.ty, layer.tlayer), packed);
        Ok(())
    }

    /// Decompresses the layer stored at a location.
    pub fn layer_at(&self, loc: (i32, i32, i32)) -> Result<TileCacheLayer> {
        let packed = self
            .layers
            .get(&loc)
            .ok_or_else(|| Error::InvalidMesh(format!("no layer at {loc:?}")))?;
        let raw = self.codec.decompress(packed)?;
        TileCacheLayer::from_bytes(&raw)
    }

    /// Builds every stored layer into the mesh (initial population).
    pub fn build_all_tiles(&self, ctx: &mut BuildContext, mesh: &mut NavMesh) -> Result<()> {
        let locs: Vec<_> = self.layers.keys().copied().collect();
        for loc in locs {
            self.rebuild_tile(ctx, loc, mesh)?;
        }
        Ok(())
    }

    fn encode_obstacle_ref(&self, idx: usize) -> ObstacleRef {
        ((self.obstacles[idx].salt as u32) << 16) | idx as u32
    }

    fn decode_obstacle_ref(&self, r: ObstacleRef) -> Option<usize> {
        let idx = (r & 0xffff) as usize;
        let salt = (r >> 16) as u16;
        if idx >= self.obstacles.len() || self.obstacles[idx].salt != salt {
            return None;
        }
        Some(idx)
    }

    /// Shared access to an obstacle by handle.
    pub fn obstacle(&self, r: ObstacleRef) -> Option<&Obstacle> {
        self.decode_obstacle_ref(r).map(|i| &self.obstacles[i])
    }

    /// Requests a cylindrical obstacle. The mesh changes once `update`
    /// processes the affected tiles.
    pub fn add_obstacle(&mut self, pos: Vec3, radius: f32, height: f32) -> Result<ObstacleRef> {
        let Some(idx) = self
            .obstacles
            .iter()
            .position(|o| o.state == ObstacleState::Empty)
        else {
            return Err(Error::BuildFailed("out of obstacle slots".to_string()));
        };

        let touched = self.touched_tiles(pos, radius);
        let obstacle = &mut self.obstacles[idx];
        obstacle.pos = pos;
        obstacle.radius = radius;
        obstacle.height = height;
        obstacle.state = ObstacleState::Processing;
        obstacle.touched = touched.clone();
        obstacle.pending = touched;
        self.requests.push_back(Request::Add(idx));
        Ok(self.encode_obstacle_ref(idx))
    }

    /// Requests obstacle removal. Removing an already-removed obstacle is
    /// a no-op: no double free, no duplicate rebuild.
    pub fn remove_obstacle(&mut self, r: ObstacleRef) -> Status {
        let Some(idx) = self.decode_obstacle_ref(r) else {
            // Stale handle: the slot was already reused or freed.
            return Status::success();
        };
        match self.obstacles[idx].state {
            ObstacleState::Empty | ObstacleState::Removing => Status::success(),
            ObstacleState::Processing | ObstacleState::Processed => {
                self.obstacles[idx].state = ObstacleState::Removing;
                self.obstacles[idx].pending = self.obstacles[idx].touched.clone();
                self.requests.push_back(Request::Remove(idx));
                Status::success()
            }
        }
    }

    fn touched_tiles(&self, pos: Vec3, radius: f32) -> Vec<(i32, i32, i32)> {
        let tile_world = self.params.tile_size as f32 * self.params.cs;
        let min_tx = ((pos.x - radius - self.params.origin.x) / tile_world).floor() as i32;
        let max_tx = ((pos.x + radius - self.params.origin.x) / tile_world).floor() as i32;
        let min_tz = ((pos.z - radius - self.params.origin.z) / tile_world).floor() as i32;
        let max_tz = ((pos.z + radius - self.params.origin.z) / tile_world).floor() as i32;

        let mut out = Vec::new();
        for (&(tx, ty, tl), _) in &self.layers {
            if tx >= min_tx && tx <= max_tx && ty >= min_tz && ty <= max_tz {
                out.push((tx, ty, tl));
            }
        }
        out
    }

    /// Processes queued obstacle work, rebuilding a bounded number of
    /// tiles per call. A non-finite `dt` lifts the bound. Returns whether
    /// the cache is fully up to date.
    pub fn update(
        &mut self,
        dt: f32,
        ctx: &mut BuildContext,
        mesh: &mut NavMesh,
    ) -> Result<bool> {
        ctx.start_timer(TimerCategory::TileCache);

        // Fold requests into the rebuild queue.
        while let Some(request) = self.requests.pop_front() {
            let idx = match request {
                Request::Add(i) | Request::Remove(i) => i,
            };
            for loc in self.obstacles[idx].pending.clone() {
                if !self.rebuild_queue.contains(&loc) {
                    self.rebuild_queue.push_back(loc);
                }
            }
        }

        let budget = if dt.is_finite() {
            MAX_REBUILDS_PER_UPDATE
        } else {
            usize::MAX
        };

        let mut rebuilt = 0usize;
        while rebuilt < budget {
            let Some(loc) = self.rebuild_queue.pop_front() else {
                break;
            };
            self.rebuild_tile(ctx, loc, mesh)?;
            rebuilt += 1;

            // Settle obstacle states whose pending tiles all rebuilt.
            for obstacle in self.obstacles.iter_mut() {
                obstacle.pending.retain(|&l| l != loc);
                if obstacle.pending.is_empty() {
                    match obstacle.state {
                        ObstacleState::Processing => obstacle.state = ObstacleState::Processed,
                        ObstacleState::Removing => {
                            obstacle.state = ObstacleState::Empty;
                            obstacle.salt = obstacle.salt.wrapping_add(1).max(1);
                            obstacle.touched.clear();
                        }
                        _ => {}
                    }
                }
            }
        }

        ctx.stop_timer(TimerCategory::TileCache);
        Ok(self.rebuild_queue.is_empty() && self.requests.is_empty())
    }

    /// Rebuilds one tile from its compressed layer plus the active
    /// obstacle footprints and hot-swaps it into the mesh.
    pub fn rebuild_tile(
        &self,
        ctx: &mut BuildContext,
        loc: (i32, i32, i32),
        mesh: &mut NavMesh,
    ) -> Result<()> {
        let layer = self.layer_at(loc)?;
        let mut hf = layer.to_heightfield()?;

        // Carve obstacle footprints out of the walkable surface.
        for obstacle in &self.obstacles {
            let active = matches!(
                obstacle.state,
                ObstacleState::Processing | ObstacleState::Processed
            );
            if !active || !obstacle.touched.contains(&loc) {
                continue;
            }
            carve_cylinder(&mut hf, obstacle.pos, obstacle.radius, obstacle.height);
        }

        // Scoped rebuild: compact, partition, contour, polygonize.
        let cfg = BuildConfig {
            width: layer.width,
            height: layer.height,
            cs: layer.cs,
            ch: layer.ch,
            bmin: layer.bmin,
            bmax: layer.bmax,
            walkable_height: self.params.walkable_height,
            walkable_climb: self.params.walkable_climb,
            walkable_radius: self.params.walkable_radius,
            max_simplification_error: self.params.max_simplification_error,
            min_region_area: self.params.min_region_area,
            merge_region_area: 0,
            partition: PartitionKind::Layered,
            max_edge_len: 0,
            ..Default::default()
        };

        let mut chf =
            CompactHeightfield::build(ctx, &hf, cfg.walkable_height, cfg.walkable_climb)?;
        chf.erode_walkable_area(ctx, cfg.walkable_radius)?;
        build_regions(ctx, &mut chf, &cfg)?;
        let cset = ContourSet::build(ctx, &chf, cfg.max_simplification_error, cfg.max_edge_len)?;
        let pmesh = PolyMesh::build(ctx, &cset, cfg.max_verts_per_poly as usize)?;

        if pmesh.poly_count() == 0 {
            // The obstacle swallowed the whole tile; drop it from the mesh.
            if let Some(tile_idx) = mesh.tile_at(loc.0, loc.1, loc.2) {
                let r = mesh.tile_ref(tile_idx);
                mesh.remove_tile(r)
                    .map_err(|s| Error::BuildFailed(format!("tile removal failed: {s:?}")))?;
            }
            return Ok(());
        }

        let flags = vec![PolyFlags::WALK; pmesh.poly_count()];
        let tile_params = TileBuildParams {
            polymesh: &pmesh,
            detail: None,
            off_mesh_cons: &[],
            poly_flags: &flags,
            tile_x: loc.0,
            tile_y: loc.1,
            tile_layer: loc.2,
            user_id: 0,
            walkable_height: self.params.walkable_height as f32 * self.params.ch,
            walkable_radius: self.params.walkable_radius as f32 * self.params.cs,
            walkable_climb: self.params.walkable_climb as f32 * self.params.ch,
            build_bv_tree: true,
        };
        let data = build_tile_data(&tile_params)?;

        // Hot swap.
        if let Some(tile_idx) = mesh.tile_at(loc.0, loc.1, loc.2) {
            let r = mesh.tile_ref(tile_idx);
            mesh.remove_tile(r)
                .map_err(|s| Error::BuildFailed(format!("tile removal failed: {s:?}")))?;
        }
        mesh.add_tile(data)
            .map_err(|s| Error::BuildFailed(format!("tile swap failed: {s:?}")))?;

        ctx.log_info("tilecache", format!("rebuilt tile {loc:?}"));
        Ok(())
    }

    /// Persists the cache: header, params, then each compressed layer.
    pub fn save(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(walkway_nav::CACHE_SET_MAGIC)?;
        buf.write_u32::<LittleEndian>(walkway_nav::CACHE_SET_VERSION)?;
        buf.write_i32::<LittleEndian>(self.layers.len() as i32)?;
        for a in 0..3 {
            buf.write_f32::<LittleEndian>(self.params.origin[a])?;
        }
        buf.write_f32::<LittleEndian>(self.params.cs)?;
        buf.write_f32::<LittleEndian>(self.params.ch)?;
        buf.write_i32::<LittleEndian>(self.params.tile_size)?;
        buf.write_i32::<LittleEndian>(self.params.walkable_height)?;
        buf.write_i32::<LittleEndian>(self.params.walkable_climb)?;
        buf.write_i32::<LittleEndian>(self.params.walkable_radius)?;
        buf.write_f32::<LittleEndian>(self.params.max_simplification_error)?;
        buf.write_i32::<LittleEndian>(self.params.min_region_area)?;
        buf.write_i32::<LittleEndian>(self.params.max_obstacles as i32)?;

        let mut locs: Vec<_> = self.layers.keys().copied().collect();
        locs.sort();
        for loc in locs {
            let packed = &self.layers[&loc];
            buf.write_i32::<LittleEndian>(loc.0)?;
            buf.write_i32::<LittleEndian>(loc.1)?;
            buf.write_i32::<LittleEndian>(loc.2)?;
            buf.write_u32::<LittleEndian>(packed.len() as u32)?;
            buf.extend_from_slice(packed);
        }
        Ok(buf)
    }

    /// Loads a cache persisted by [`TileCache::save`].
    pub fn load(data: &[u8], codec: Box<dyn TileCodec>) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != walkway_nav::CACHE_SET_MAGIC {
            return Err(Error::InvalidMesh("cache set has wrong magic".to_string()));
        }
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != walkway_nav::CACHE_SET_VERSION {
            return Err(Error::InvalidMesh(format!(
                "unsupported cache set version {version}"
            )));
        }
        let tile_count = cursor.read_i32::<LittleEndian>()?;
        let mut origin = Vec3::ZERO;
        for a in 0..3 {
            origin[a] = cursor.read_f32::<LittleEndian>()?;
        }
        let params = TileCacheParams {
            origin,
            cs: cursor.read_f32::<LittleEndian>()?,
            ch: cursor.read_f32::<LittleEndian>()?,
            tile_size: cursor.read_i32::<LittleEndian>()?,
            walkable_height: cursor.read_i32::<LittleEndian>()?,
            walkable_climb: cursor.read_i32::<LittleEndian>()?,
            walkable_radius: cursor.read_i32::<LittleEndian>()?,
            max_simplification_error: cursor.read_f32::<LittleEndian>()?,
            min_region_area: cursor.read_i32::<LittleEndian>()?,
            max_obstacles: cursor.read_i32::<LittleEndian>()? as usize,
        };

        let mut cache = Self::new(params, codec)?;
        for _ in 0..tile_count {
            let tx = cursor.read_i32::<LittleEndian>()?;
            let ty = cursor.read_i32::<LittleEndian>()?;
            let tl = cursor.read_i32::<LittleEndian>()?;
            let size = cursor.read_u32::<LittleEndian>()? as usize;
            let pos = cursor.position() as usize;
            if pos + size > data.len() {
                return Err(Error::InvalidMesh("truncated cache set".to_string()));
            }
            cache
                .layers
                .insert((tx, ty, tl), data[pos..pos + size].to_vec());
            cursor.set_position((pos + size) as u64);
        }
        Ok(cache)
    }
}

/// Clears walkable spans whose top lies inside the cylinder.
fn carve_cylinder(hf: &mut walkway_build::Heightfield, pos: Vec3, radius: f32, height: f32) {
    let min_x = (((pos.x - radius - hf.bmin.x) / hf.cs).floor() as i32).max(0);
    let max_x = (((pos.x + radius - hf.bmin.x) / hf.cs).ceil() as i32).min(hf.width - 1);
    let min_z = (((pos.z - radius - hf.bmin.z) / hf.cs).floor() as i32).max(0);
    let max_z = (((pos.z + radius - hf.bmin.z) / hf.cs).ceil() as i32).min(hf.height - 1);
    let min_y = pos.y;
    let max_y = pos.y + height;
    let radius_sq = radius * radius;

    for z in min_z..=max_z {
        for x in min_x..=max_x {
            let cx = hf.bmin.x + (x as f32 + 0.5) * hf.cs;
            let cz = hf.bmin.z + (z as f32 + 0.5) * hf.cs;
            let dx = cx - pos.x;
            let dz = cz - pos.z;
            if dx * dx + dz * dz > radius_sq {
                continue;
            }
            let spans: Vec<u32> = hf.column_spans(x, z).map(|(i, _)| i).collect();
            for i in spans {
                let top = hf.bmin.y + hf.spans[i as usize].smax as f32 * hf.ch;
                if top >= min_y && top <= max_y {
                    hf.spans[i as usize].area = walkway_build::NULL_AREA;
                }
            }
        }
    }
}
