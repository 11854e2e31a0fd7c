//! Build configuration knobs consumed read-only by every stage.

use glam::Vec3;
use walkway_common::{Error, Result};

/// Region partitioning strategy.
///
/// The three strategies are mutually exclusive and trade quality for speed:
/// watershed produces the least fragmented output but is the slowest,
/// monotone is a single sweep that may produce long thin polygons, and
/// layered splits the field into non-overlapping height layers and is the
/// one the dynamic tile cache uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum PartitionKind {
    /// Distance-field flood from the farthest cells inward.
    #[default]
    Watershed,
    /// Single-sweep row merging.
    Monotone,
    /// Non-overlapping height layers.
    Layered,
}

/// Flat configuration for a build run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BuildConfig {
    /// Grid width in cells along the x-axis. Derived from the bounds.
    pub width: i32,
    /// Grid height in cells along the z-axis. Derived from the bounds.
    pub height: i32,

    /// Horizontal cell size in world units.
    pub cs: f32,
    /// Vertical cell size in world units.
    pub ch: f32,

    /// Minimum bounds of the build AABB.
    pub bmin: Vec3,
    /// Maximum bounds of the build AABB.
    pub bmax: Vec3,

    /// Maximum walkable slope in degrees.
    pub walkable_slope_angle: f32,
    /// Minimum floor-to-ceiling clearance, in cell-height units.
    pub walkable_height: i32,
    /// Maximum ledge height the agent can still climb, in cell-height units.
    pub walkable_climb: i32,
    /// Agent radius used for erosion, in cell units.
    pub walkable_radius: i32,

    /// Maximum contour edge length, in cell units.
    pub max_edge_len: i32,
    /// Maximum deviation of a simplified contour from the raw boundary.
    pub max_simplification_error: f32,
    /// Regions with fewer cells than this are discarded.
    pub min_region_area: i32,
    /// Regions smaller than this are merged into larger neighbors.
    pub merge_region_area: i32,

    /// Maximum vertices per polygon (3..=6).
    pub max_verts_per_poly: i32,

    /// Sampling distance for the detail mesh, in world units.
    pub detail_sample_dist: f32,
    /// Maximum height error of the detail mesh, in world units.
    pub detail_sample_max_error: f32,

    /// Partitioning strategy.
    pub partition: PartitionKind,
    /// Per-axis resolution of the poly cell sampling grid in the serializer.
    pub poly_cell_resolution: i32,

    /// Unobstructed border added around tiles, in cell units.
    pub border_size: i32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            cs: 0.3,
            ch: 0.2,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            walkable_slope_angle: 45.0,
            walkable_height: 10,
            walkable_climb: 4,
            walkable_radius: 2,
            max_edge_len: 12,
            max_simplification_error: 1.3,
            min_region_area: 8,
            merge_region_area: 20,
            max_verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            partition: PartitionKind::Watershed,
            poly_cell_resolution: 4,
            border_size: 0,
        }
    }
}

impl BuildConfig {
    /// Derives the grid size from the bounds and cell size.
    pub fn calc_grid_size(&mut self, bmin: Vec3, bmax: Vec3) {
        self.bmin = bmin;
        self.bmax = bmax;
        self.width = ((bmax.x - bmin.x) / self.cs + 0.5).floor() as i32;
        self.height = ((bmax.z - bmin.z) / self.cs + 0.5).floor() as i32;
    }

    /// Rejects configurations no stage could build from.
    pub fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(Error::InvalidMesh("grid size is zero".to_string()));
        }
        if self.cs <= 0.0 || self.ch <= 0.0 {
            return Err(Error::InvalidMesh("cell size must be positive".to_string()));
        }
        if !(0.0..=90.0).contains(&self.walkable_slope_angle) {
            return Err(Error::InvalidMesh(
                "walkable slope angle out of range".to_string(),
            ));
        }
        if !(3..=crate::polymesh::MAX_VERTS_PER_POLY as i32).contains(&self.max_verts_per_poly) {
            return Err(Error::InvalidMesh(
                "max verts per poly out of range".to_string(),
            ));
        }
        if self.bmin.cmpge(self.bmax).any() {
            return Err(Error::InvalidMesh("degenerate bounds".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_size_from_bounds() {
        let mut cfg = BuildConfig {
            cs: 0.5,
            ..Default::default()
        };
        cfg.calc_grid_size(Vec3::ZERO, Vec3::new(10.0, 2.0, 5.0));
        assert_eq!(cfg.width, 20);
        assert_eq!(cfg.height, 10);
    }

    #[test]
    fn test_validate_rejects_degenerate_bounds() {
        let mut cfg = BuildConfig::default();
        cfg.calc_grid_size(Vec3::ZERO, Vec3::new(10.0, 1.0, 10.0));
        cfg.bmax.y = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_grid() {
        let cfg = BuildConfig::default();
        assert!(cfg.validate().is_err());
    }
}
