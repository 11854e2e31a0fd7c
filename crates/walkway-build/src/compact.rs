//! Compact, cache-friendly view of the walkable spans with neighbor
//! connectivity, the distance field and region ids.

use glam::Vec3;
use walkway_common::{BuildContext, Error, Result, TimerCategory};

use crate::heightfield::{Heightfield, MAX_SPAN_HEIGHT, NULL_AREA};

/// Marker for a missing neighbor connection.
pub const NOT_CONNECTED: u8 = 0x3f;

/// Maximum number of spans a single column may hold in the compact view.
pub const MAX_LAYERS: usize = NOT_CONNECTED as usize - 1;

/// Region id flag for border regions that never become contours.
pub const BORDER_REGION: u16 = 0x8000;

/// X offset for each of the four cardinal directions.
pub const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
/// Z offset for each of the four cardinal directions.
pub const DIR_OFFSET_Z: [i32; 4] = [0, 1, 0, -1];

/// One cell of the compact grid: a slice into the span array.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCell {
    /// Index of the first span in the cell.
    pub index: u32,
    /// Number of spans in the cell.
    pub count: u32,
}

/// One open (walkable) space above a solid span.
#[derive(Debug, Clone, Copy)]
pub struct CompactSpan {
    /// Floor height in cell-height units.
    pub y: u16,
    /// Region id, 0 when unassigned.
    pub reg: u16,
    /// Packed neighbor connections, one per direction.
    pub con: [u8; 4],
    /// Open height above the floor, clamped to 255.
    pub h: u8,
}

impl Default for CompactSpan {
    fn default() -> Self {
        Self {
            y: 0,
            reg: 0,
            con: [NOT_CONNECTED; 4],
            h: 0,
        }
    }
}

/// Compact heightfield: open spans, their areas, connectivity and (after
/// the partitioner ran) the distance field and region ids.
#[derive(Debug)]
pub struct CompactHeightfield {
    /// Grid width along the x-axis.
    pub width: i32,
    /// Grid height along the z-axis.
    pub height: i32,
    /// Number of spans.
    pub span_count: usize,
    /// Walkable height used during construction, in cell units.
    pub walkable_height: i32,
    /// Walkable climb used during construction, in cell units.
    pub walkable_climb: i32,
    /// Border size baked into region ids, in cell units.
    pub border_size: i32,
    /// Highest floor in the field.
    pub max_height: u16,
    /// Highest region id handed out by the partitioner.
    pub max_regions: u16,
    /// Highest value in the distance field.
    pub max_distance: u16,
    /// Minimum bounds.
    pub bmin: Vec3,
    /// Maximum bounds.
    pub bmax: Vec3,
    /// Horizontal cell size.
    pub cs: f32,
    /// Vertical cell size.
    pub ch: f32,
    /// Cells indexed `x + z * width`.
    pub cells: Vec<CompactCell>,
    /// Spans, grouped per cell.
    pub spans: Vec<CompactSpan>,
    /// Area id per span.
    pub areas: Vec<u8>,
    /// Distance field value per span; empty until built.
    pub dist: Vec<u16>,
}

impl CompactHeightfield {
    /// Builds the compact field from a filtered heightfield.
    pub fn build(
        ctx: &mut BuildContext,
        hf: &Heightfield,
        walkable_height: i32,
        walkable_climb: i32,
    ) -> Result<Self> {
        ctx.start_timer(TimerCategory::Compaction);

        let width = hf.width;
        let height = hf.height;
        let span_count = hf.walkable_span_count();

        let mut chf = CompactHeightfield {
            width,
            height,
            span_count,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_height: 0,
            max_regions: 0,
            max_distance: 0,
            bmin: hf.bmin,
            bmax: hf.bmax + Vec3::new(0.0, walkable_height as f32 * hf.ch, 0.0),
            cs: hf.cs,
            ch: hf.ch,
            cells: vec![CompactCell::default(); (width * height) as usize],
            spans: Vec::with_capacity(span_count),
            areas: Vec::with_capacity(span_count),
            dist: Vec::new(),
        };

        // Fill cells and spans: the open space above each walkable span.
        for z in 0..height {
            for x in 0..width {
                let cell_idx = (x + z * width) as usize;
                chf.cells[cell_idx].index = chf.spans.len() as u32;

                let mut count = 0u32;
                for (_, span) in hf.column_spans(x, z) {
                    if span.area == NULL_AREA {
                        continue;
                    }
                    let bot = span.smax as i32;
                    let top = span
                        .next
                        .map(|n| hf.spans[n as usize].smin as i32)
                        .unwrap_or(MAX_SPAN_HEIGHT);
                    let y = bot.clamp(0, 0xffff) as u16;
                    let h = (top - bot).clamp(0, 0xff) as u8;
                    chf.spans.push(CompactSpan {
                        y,
                        reg: 0,
                        con: [NOT_CONNECTED; 4],
                        h,
                    });
                    chf.areas.push(span.area);
                    chf.max_height = chf.max_height.max(y);
                    count += 1;
                }
                chf.cells[cell_idx].count = count;
            }
        }

        chf.build_connections(ctx)?;

        ctx.stop_timer(TimerCategory::Compaction);
        ctx.log_info(
            "compact",
            format!("{} walkable spans", chf.span_count),
        );
        Ok(chf)
    }

    fn build_connections(&mut self, ctx: &mut BuildContext) -> Result<()> {
        let mut too_high_layers = 0usize;

        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let span = self.spans[i as usize];
                    let mut con = [NOT_CONNECTED; 4];

                    for dir in 0..4 {
                        let nx = x + DIR_OFFSET_X[dir];
                        let nz = z + DIR_OFFSET_Z[dir];
                        if nx < 0 || nz < 0 || nx >= self.width || nz >= self.height {
                            continue;
                        }
                        let ncell = self.cells[(nx + nz * self.width) as usize];
                        for (layer, k) in (ncell.index..ncell.index + ncell.count).enumerate() {
                            let nspan = self.spans[k as usize];
                            let bot = span.y.max(nspan.y) as i32;
                            let top = (span.y as i32 + span.h as i32)
                                .min(nspan.y as i32 + nspan.h as i32);

                            if top - bot >= self.walkable_height
                                && (nspan.y as i32 - span.y as i32).abs() <= self.walkable_climb
                            {
                                if layer > MAX_LAYERS {
                                    too_high_layers += 1;
                                    break;
                                }
                                con[dir] = layer as u8;
                                break;
                            }
                        }
                    }

                    self.spans[i as usize].con = con;
                }
            }
        }

        if too_high_layers > 0 {
            ctx.log_warning(
                "compact",
                format!("{too_high_layers} spans exceeded the layer limit and were not connected"),
            );
        }
        Ok(())
    }

    /// Resolves a neighbor connection to a span index.
    #[inline]
    pub fn neighbor_span(&self, x: i32, z: i32, span: &CompactSpan, dir: usize) -> Option<usize> {
        let layer = span.con[dir];
        if layer == NOT_CONNECTED {
            return None;
        }
        let nx = x + DIR_OFFSET_X[dir];
        let nz = z + DIR_OFFSET_Z[dir];
        let ncell = self.cells[(nx + nz * self.width) as usize];
        Some((ncell.index + layer as u32) as usize)
    }

    /// Erodes the walkable area by the agent radius.
    ///
    /// Computes a city-block distance to the nearest unwalkable span and
    /// clears everything closer than `radius * 2` half-cells.
    pub fn erode_walkable_area(&mut self, ctx: &mut BuildContext, radius: i32) -> Result<()> {
        if radius <= 0 {
            return Ok(());
        }
        ctx.start_timer(TimerCategory::Compaction);

        let mut dist = vec![255u8; self.span_count];

        // Seed: boundary spans (unwalkable or missing any connection).
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    if self.areas[i] == NULL_AREA {
                        dist[i] = 0;
                        continue;
                    }
                    let span = self.spans[i];
                    let mut connected = 0;
                    for dir in 0..4 {
                        if let Some(n) = self.neighbor_span(x, z, &span, dir) {
                            if self.areas[n] != NULL_AREA {
                                connected += 1;
                            }
                        }
                    }
                    if connected != 4 {
                        dist[i] = 0;
                    }
                }
            }
        }

        // Two-pass chamfer distance over the span graph.
        self.chamfer_pass(&mut dist, true);
        self.chamfer_pass(&mut dist, false);

        let threshold = (radius * 2) as u8;
        let mut eroded = 0usize;
        for i in 0..self.span_count {
            if dist[i] < threshold && self.areas[i] != NULL_AREA {
                self.areas[i] = NULL_AREA;
                eroded += 1;
            }
        }

        ctx.stop_timer(TimerCategory::Compaction);
        ctx.log_info("erode", format!("eroded {eroded} spans"));
        Ok(())
    }

    fn chamfer_pass(&self, dist: &mut [u8], forward: bool) {
        // Forward pass visits (-1,0) and (0,-1) style neighbors; the reverse
        // pass the opposite pair, matching a standard two-pass transform.
        let (dirs, zs, xs): (&[usize; 2], Vec<i32>, Vec<i32>) = if forward {
            (&[0, 3], (0..self.height).collect(), (0..self.width).collect())
        } else {
            (
                &[2, 1],
                (0..self.height).rev().collect(),
                (0..self.width).rev().collect(),
            )
        };

        for &z in &zs {
            for &x in &xs {
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    let span = self.spans[i];
                    for &dir in dirs {
                        if let Some(n) = self.neighbor_span(x, z, &span, dir) {
                            let d = dist[n].saturating_add(2);
                            if d < dist[i] {
                                dist[i] = d;
                            }
                            // Diagonal through the neighbor.
                            let ndir = (dir + if forward { 1 } else { 3 }) % 4;
                            let nx = x + DIR_OFFSET_X[dir];
                            let nz = z + DIR_OFFSET_Z[dir];
                            let nspan = self.spans[n];
                            if let Some(nn) = self.neighbor_span(nx, nz, &nspan, ndir) {
                                let d = dist[nn].saturating_add(3);
                                if d < dist[i] {
                                    dist[i] = d;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Marks every span inside an axis-aligned box with an area id.
    pub fn mark_box_area(&mut self, bmin: Vec3, bmax: Vec3, area: u8) {
        let min_x = (((bmin.x - self.bmin.x) / self.cs).floor() as i32).max(0);
        let max_x = (((bmax.x - self.bmin.x) / self.cs).ceil() as i32).min(self.width - 1);
        let min_z = (((bmin.z - self.bmin.z) / self.cs).floor() as i32).max(0);
        let max_z = (((bmax.z - self.bmin.z) / self.cs).ceil() as i32).min(self.height - 1);
        let min_y = ((bmin.y - self.bmin.y) / self.ch).floor() as i32;
        let max_y = ((bmax.y - self.bmin.y) / self.ch).ceil() as i32;

        for z in min_z..=max_z {
            for x in min_x..=max_x {
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    let y = self.spans[i].y as i32;
                    if y >= min_y && y <= max_y && self.areas[i] != NULL_AREA {
                        self.areas[i] = area;
                    }
                }
            }
        }
    }

    /// Marks every span inside a convex polygon (XZ ring plus height range).
    pub fn mark_convex_poly_area(&mut self, verts: &[Vec3], hmin: f32, hmax: f32, area: u8) {
        let mut bmin = verts[0];
        let mut bmax = verts[0];
        for v in verts.iter().skip(1) {
            bmin = bmin.min(*v);
            bmax = bmax.max(*v);
        }
        bmin.y = hmin;
        bmax.y = hmax;

        let min_x = (((bmin.x - self.bmin.x) / self.cs).floor() as i32).max(0);
        let max_x = (((bmax.x - self.bmin.x) / self.cs).ceil() as i32).min(self.width - 1);
        let min_z = (((bmin.z - self.bmin.z) / self.cs).floor() as i32).max(0);
        let max_z = (((bmax.z - self.bmin.z) / self.cs).ceil() as i32).min(self.height - 1);
        let min_y = ((hmin - self.bmin.y) / self.ch).floor() as i32;
        let max_y = ((hmax - self.bmin.y) / self.ch).ceil() as i32;

        for z in min_z..=max_z {
            for x in min_x..=max_x {
                let p = Vec3::new(
                    self.bmin.x + (x as f32 + 0.5) * self.cs,
                    0.0,
                    self.bmin.z + (z as f32 + 0.5) * self.cs,
                );
                if !walkway_common::point_in_poly_2d(p, verts) {
                    continue;
                }
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    let y = self.spans[i].y as i32;
                    if y >= min_y && y <= max_y && self.areas[i] != NULL_AREA {
                        self.areas[i] = area;
                    }
                }
            }
        }
    }

    /// Marks every span inside a vertical cylinder with an area id.
    pub fn mark_cylinder_area(&mut self, pos: Vec3, radius: f32, height: f32, area: u8) {
        let min_x = (((pos.x - radius - self.bmin.x) / self.cs).floor() as i32).max(0);
        let max_x = (((pos.x + radius - self.bmin.x) / self.cs).ceil() as i32).min(self.width - 1);
        let min_z = (((pos.z - radius - self.bmin.z) / self.cs).floor() as i32).max(0);
        let max_z = (((pos.z + radius - self.bmin.z) / self.cs).ceil() as i32).min(self.height - 1);
        let min_y = ((pos.y - self.bmin.y) / self.ch).floor() as i32;
        let max_y = ((pos.y + height - self.bmin.y) / self.ch).ceil() as i32;
        let radius_sq = radius * radius;

        for z in min_z..=max_z {
            for x in min_x..=max_x {
                let cx = self.bmin.x + (x as f32 + 0.5) * self.cs;
                let cz = self.bmin.z + (z as f32 + 0.5) * self.cs;
                let dx = cx - pos.x;
                let dz = cz - pos.z;
                if dx * dx + dz * dz > radius_sq {
                    continue;
                }
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    let y = self.spans[i].y as i32;
                    if y >= min_y && y <= max_y && self.areas[i] != NULL_AREA {
                        self.areas[i] = area;
                    }
                }
            }
        }
    }

    /// Validates the field has at least one walkable span.
    pub fn ensure_non_empty(&self) -> Result<()> {
        if self.areas.iter().all(|&a| a == NULL_AREA) {
            return Err(Error::BuildFailed(
                "no walkable spans after filtering".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::WALKABLE_AREA;

    fn flat_field(size: i32) -> CompactHeightfield {
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
        CompactHeightfield::build(&mut ctx, &hf, 2, 1).unwrap()
    }

    #[test]
    fn test_build_counts_walkable_spans() {
        let chf = flat_field(4);
        assert_eq!(chf.span_count, 16);
        assert_eq!(chf.spans.len(), 16);
    }

    #[test]
    fn test_connections_on_flat_field() {
        let chf = flat_field(3);
        // Center cell connects in all four directions.
        let cell = chf.cells[(1 + 3) as usize];
        let span = chf.spans[cell.index as usize];
        assert!(span.con.iter().all(|&c| c != NOT_CONNECTED));
        // Corner cell has exactly two connections.
        let corner = chf.cells[0];
        let span = chf.spans[corner.index as usize];
        let connected = span.con.iter().filter(|&&c| c != NOT_CONNECTED).count();
        assert_eq!(connected, 2);
    }

    #[test]
    fn test_erode_clears_boundary() {
        let mut chf = flat_field(5);
        let mut ctx = BuildContext::new();
        chf.erode_walkable_area(&mut ctx, 1).unwrap();
        // Boundary spans are distance 0 and must be cleared.
        let corner = chf.cells[0];
        assert_eq!(chf.areas[corner.index as usize], NULL_AREA);
        // The very center of a 5x5 field survives an erosion radius of 1.
        let center = chf.cells[(2 + 2 * 5) as usize];
        assert_eq!(chf.areas[center.index as usize], WALKABLE_AREA);
    }

    #[test]
    fn test_mark_box_area() {
        let mut chf = flat_field(4);
        chf.mark_box_area(
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(2.5, 5.0, 2.5),
            7,
        );
        let cell = chf.cells[(1 + 4) as usize];
        assert_eq!(chf.areas[cell.index as usize], 7);
        let corner = chf.cells[0];
        assert_eq!(chf.areas[corner.index as usize], WALKABLE_AREA);
    }

    #[test]
    fn test_mark_cylinder_area() {
        let mut chf = flat_field(5);
        chf.mark_cylinder_area(Vec3::new(2.5, 0.0, 2.5), 1.2, 4.0, 9);
        let center = chf.cells[(2 + 2 * 5) as usize];
        assert_eq!(chf.areas[center.index as usize], 9);
        let corner = chf.cells[0];
        assert_eq!(chf.areas[corner.index as usize], WALKABLE_AREA);
    }
}
