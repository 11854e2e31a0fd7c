//! Column-major voxel heightfield built from rasterized triangles.
//!
//! Each grid cell owns an ordered linked list of solid spans. Spans live in
//! one pool and link to each other by index, so columns can be rewritten
//! without touching the rest of the pool.

use glam::Vec3;
use walkway_common::{Error, Result};

/// Area id for unwalkable space.
pub const NULL_AREA: u8 = 0;
/// Area id assigned to walkable surface by default.
pub const WALKABLE_AREA: u8 = 63;

/// Largest representable span height.
pub const MAX_SPAN_HEIGHT: i32 = 0xffff;

/// One solid vertical segment of a column.
#[derive(Debug, Clone, Copy)]
pub struct Span {
    /// Bottom of the span, in cell-height units.
    pub smin: u16,
    /// Top of the span, in cell-height units.
    pub smax: u16,
    /// Area id of the surface at the top of the span.
    pub area: u8,
    /// Pool index of the next span up the column.
    pub next: Option<u32>,
}

/// Voxel grid of solid spans.
#[derive(Debug)]
pub struct Heightfield {
    /// Width of the grid along the x-axis.
    pub width: i32,
    /// Height (depth) of the grid along the z-axis.
    pub height: i32,
    /// Minimum bounds of the grid AABB.
    pub bmin: Vec3,
    /// Maximum bounds of the grid AABB.
    pub bmax: Vec3,
    /// Horizontal cell size.
    pub cs: f32,
    /// Vertical cell size.
    pub ch: f32,
    /// First span of each column, indexed `x + z * width`.
    pub columns: Vec<Option<u32>>,
    /// Span pool.
    pub spans: Vec<Span>,
    free_list: Option<u32>,
}

impl Heightfield {
    /// Creates an empty heightfield covering the given grid.
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Result<Self> {
        if width <= 0 || height <= 0 {
            return Err(Error::InvalidMesh(format!(
                "heightfield grid {width}x{height} is degenerate"
            )));
        }
        Ok(Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![None; (width * height) as usize],
            spans: Vec::new(),
            free_list: None,
        })
    }

    #[inline]
    fn column_index(&self, x: i32, z: i32) -> usize {
        (x + z * self.width) as usize
    }

    fn alloc_span(&mut self, span: Span) -> u32 {
        if let Some(idx) = self.free_list {
            self.free_list = self.spans[idx as usize].next;
            self.spans[idx as usize] = span;
            idx
        } else {
            self.spans.push(span);
            (self.spans.len() - 1) as u32
        }
    }

    fn free_span(&mut self, idx: u32) {
        self.spans[idx as usize].next = self.free_list;
        self.free_list = Some(idx);
    }

    /// Adds a span to a column, merging it with overlapping spans.
    ///
    /// When the merged tops are within `flag_merge_threshold`, the higher
    /// area id wins so that thin walkable decals survive the merge.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        smin: u16,
        smax: u16,
        area: u8,
        flag_merge_threshold: i32,
    ) -> Result<()> {
        if x < 0 || x >= self.width || z < 0 || z >= self.height {
            return Err(Error::BuildFailed(format!(
                "span position ({x}, {z}) out of bounds"
            )));
        }
        if smin > smax {
            return Err(Error::BuildFailed(format!(
                "invalid span extents: min {smin} > max {smax}"
            )));
        }

        let col = self.column_index(x, z);
        let mut new_smin = smin;
        let mut new_smax = smax;
        let mut new_area = area;

        // Remove overlapped spans, widening the new span over them.
        let mut prev: Option<u32> = None;
        let mut cur = self.columns[col];
        while let Some(ci) = cur {
            let s = self.spans[ci as usize];
            if s.smin > new_smax {
                break;
            }
            if s.smax < new_smin {
                prev = Some(ci);
                cur = s.next;
                continue;
            }

            // Overlap: absorb the existing span.
            new_smin = new_smin.min(s.smin);
            new_smax = new_smax.max(s.smax);
            if (new_smax as i32 - s.smax as i32).abs() <= flag_merge_threshold {
                new_area = new_area.max(s.area);
            }

            let next = s.next;
            match prev {
                Some(p) => self.spans[p as usize].next = next,
                None => self.columns[col] = next,
            }
            self.free_span(ci);
            cur = next;
        }

        let idx = self.alloc_span(Span {
            smin: new_smin,
            smax: new_smax,
            area: new_area,
            next: cur,
        });
        match prev {
            Some(p) => self.spans[p as usize].next = Some(idx),
            None => self.columns[col] = Some(idx),
        }
        Ok(())
    }

    /// First span of the column at (x, z).
    #[inline]
    pub fn first_span(&self, x: i32, z: i32) -> Option<u32> {
        if x < 0 || x >= self.width || z < 0 || z >= self.height {
            return None;
        }
        self.columns[self.column_index(x, z)]
    }

    /// Iterates the spans of one column bottom-up.
    pub fn column_spans(&self, x: i32, z: i32) -> ColumnIter<'_> {
        ColumnIter {
            field: self,
            cur: self.first_span(x, z),
        }
    }

    /// Number of walkable spans in the field.
    pub fn walkable_span_count(&self) -> usize {
        let mut count = 0;
        for z in 0..self.height {
            for x in 0..self.width {
                for (_, s) in self.column_spans(x, z) {
                    if s.area != NULL_AREA {
                        count += 1;
                    }
                }
            }
        }
        count
    }
}

/// Iterator over the spans of a single column.
pub struct ColumnIter<'a> {
    field: &'a Heightfield,
    cur: Option<u32>,
}

impl Iterator for ColumnIter<'_> {
    type Item = (u32, Span);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let span = self.field.spans[idx as usize];
        self.cur = span.next;
        Some((idx, span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> Heightfield {
        Heightfield::new(
            4,
            4,
            Vec3::ZERO,
            Vec3::new(4.0, 10.0, 4.0),
            1.0,
            1.0,
        )
        .unwrap()
    }

    #[test]
    fn test_degenerate_grid_rejected() {
        assert!(Heightfield::new(0, 4, Vec3::ZERO, Vec3::ONE, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_add_span_keeps_order() {
        let mut hf = field();
        hf.add_span(1, 1, 6, 8, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 1, 0, 2, WALKABLE_AREA, 1).unwrap();
        let spans: Vec<_> = hf.column_spans(1, 1).map(|(_, s)| (s.smin, s.smax)).collect();
        assert_eq!(spans, vec![(0, 2), (6, 8)]);
    }

    #[test]
    fn test_add_span_merges_overlap() {
        let mut hf = field();
        hf.add_span(2, 2, 0, 4, NULL_AREA, 1).unwrap();
        hf.add_span(2, 2, 3, 6, WALKABLE_AREA, 1).unwrap();
        let spans: Vec<_> = hf.column_spans(2, 2).collect();
        assert_eq!(spans.len(), 1);
        let s = spans[0].1;
        assert_eq!((s.smin, s.smax), (0, 6));
        // The new span's top wins, so its area survives the merge.
        assert_eq!(s.area, WALKABLE_AREA);
    }

    #[test]
    fn test_merge_threshold_keeps_higher_area() {
        let mut hf = field();
        hf.add_span(0, 0, 0, 5, WALKABLE_AREA, 1).unwrap();
        // Same top within threshold: walkable area must survive even though
        // the incoming span is unwalkable.
        hf.add_span(0, 0, 0, 5, NULL_AREA, 1).unwrap();
        let (_, s) = hf.column_spans(0, 0).next().unwrap();
        assert_eq!(s.area, WALKABLE_AREA);
    }

    #[test]
    fn test_out_of_bounds_span_fails() {
        let mut hf = field();
        assert!(hf.add_span(9, 0, 0, 1, NULL_AREA, 1).is_err());
    }
}
