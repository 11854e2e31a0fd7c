//! Author-placed convex shape volumes applied to the compact heightfield
//! before partitioning.

use glam::Vec3;
use walkway_common::{BuildContext, Result};

use crate::compact::CompactHeightfield;
use crate::heightfield::NULL_AREA;

/// Maximum outline vertices of a shape volume.
pub const MAX_SHAPE_VOLUME_VERTS: usize = 12;

/// What a shape volume does to the cells it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum ShapeVolumeKind {
    /// Overrides the area id of covered walkable cells.
    Inclusion,
    /// Clears covered cells to unwalkable.
    Exclusion,
    /// Marks covered cells with a trigger area id for gameplay queries.
    Trigger,
}

/// A convex prism: an XZ outline extruded over a height range.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ShapeVolume {
    /// Convex outline on the XZ plane.
    pub verts: Vec<Vec3>,
    /// Bottom of the prism.
    pub hmin: f32,
    /// Top of the prism.
    pub hmax: f32,
    /// Area id written by inclusion/trigger volumes.
    pub area: u8,
    /// Effect of the volume.
    pub kind: ShapeVolumeKind,
}

/// Ordered list of shape volumes for one build.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ShapeVolumeSet {
    /// Volumes applied in insertion order; later volumes win.
    pub volumes: Vec<ShapeVolume>,
}

impl ShapeVolumeSet {
    /// Adds a volume; outlines above the vertex cap are truncated.
    pub fn push(&mut self, mut volume: ShapeVolume) {
        volume.verts.truncate(MAX_SHAPE_VOLUME_VERTS);
        self.volumes.push(volume);
    }

    /// Applies every volume to the compact heightfield, in order.
    pub fn apply(&self, ctx: &mut BuildContext, chf: &mut CompactHeightfield) -> Result<()> {
        for volume in &self.volumes {
            if volume.verts.len() < 3 {
                ctx.log_warning("volumes", "skipping shape volume with fewer than 3 vertices");
                continue;
            }
            let area = match volume.kind {
                ShapeVolumeKind::Inclusion | ShapeVolumeKind::Trigger => volume.area,
                ShapeVolumeKind::Exclusion => NULL_AREA,
            };
            chf.mark_convex_poly_area(&volume.verts, volume.hmin, volume.hmax, area);
        }
        if !self.volumes.is_empty() {
            ctx.log_info("volumes", format!("applied {} shape volumes", self.volumes.len()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::{Heightfield, WALKABLE_AREA};
    use walkway_common::BuildContext;

    fn flat_chf(size: i32) -> CompactHeightfield {
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
    fn test_exclusion_volume_clears_area() {
        let mut chf = flat_chf(6);
        let mut ctx = BuildContext::new();
        let mut set = ShapeVolumeSet::default();
        set.push(ShapeVolume {
            verts: vec![
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(4.0, 0.0, 1.0),
                Vec3::new(4.0, 0.0, 4.0),
                Vec3::new(1.0, 0.0, 4.0),
            ],
            hmin: 0.0,
            hmax: 5.0,
            area: 0,
            kind: ShapeVolumeKind::Exclusion,
        });
        set.apply(&mut ctx, &mut chf).unwrap();

        let inside = chf.cells[(2 + 2 * 6) as usize].index as usize;
        assert_eq!(chf.areas[inside], NULL_AREA);
        let outside = chf.cells[(5 + 5 * 6) as usize].index as usize;
        assert_eq!(chf.areas[outside], WALKABLE_AREA);
    }

    #[test]
    fn test_trigger_volume_marks_area() {
        let mut chf = flat_chf(6);
        let mut ctx = BuildContext::new();
        let mut set = ShapeVolumeSet::default();
        set.push(ShapeVolume {
            verts: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(3.0, 0.0, 0.0),
                Vec3::new(3.0, 0.0, 3.0),
                Vec3::new(0.0, 0.0, 3.0),
            ],
            hmin: 0.0,
            hmax: 5.0,
            area: 21,
            kind: ShapeVolumeKind::Trigger,
        });
        set.apply(&mut ctx, &mut chf).unwrap();
        let inside = chf.cells[(1 + 6) as usize].index as usize;
        assert_eq!(chf.areas[inside], 21);
    }
}
