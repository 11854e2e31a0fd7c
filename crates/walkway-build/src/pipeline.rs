//! Build pipeline driver: triangle soup in, polygon + detail mesh out.

use glam::Vec3;
use walkway_common::{BuildContext, Error, Result, TimerCategory};

use crate::compact::CompactHeightfield;
use crate::config::BuildConfig;
use crate::contour::ContourSet;
use crate::detail::PolyMeshDetail;
use crate::filter::{
    filter_ledge_spans, filter_low_hanging_walkable_obstacles, filter_walkable_low_height_spans,
};
use crate::heightfield::{Heightfield, NULL_AREA};
use crate::polymesh::PolyMesh;
use crate::rasterize::{mark_walkable_triangles, rasterize_triangles};
use crate::region::build_regions;
use crate::volume::ShapeVolumeSet;

/// Input geometry for one build run.
#[derive(Debug, Clone, Default)]
pub struct InputMesh {
    /// Vertex positions.
    pub verts: Vec<Vec3>,
    /// Triangle indices.
    pub tris: Vec<[u32; 3]>,
    /// Optional per-triangle area hints; zero entries are re-marked from
    /// the walkable slope threshold.
    pub areas: Vec<u8>,
}

impl InputMesh {
    /// Axis-aligned bounds of the mesh.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = self.verts.first()?;
        let mut bmin = *first;
        let mut bmax = *first;
        for v in &self.verts {
            bmin = bmin.min(*v);
            bmax = bmax.max(*v);
        }
        Some((bmin, bmax))
    }
}

/// Everything the pipeline produced. Intermediate artifacts are kept so
/// hosts can inspect them; dropping the value frees the lot at once.
#[derive(Debug)]
pub struct BuildArtifacts {
    /// Filtered voxel field.
    pub heightfield: Heightfield,
    /// Compacted field with regions.
    pub compact: CompactHeightfield,
    /// Traced contours.
    pub contours: ContourSet,
    /// Final polygon mesh.
    pub polymesh: PolyMesh,
    /// Detail triangulation.
    pub detail: PolyMeshDetail,
}

/// Runs the build stages in order, stopping at the first failure.
pub struct BuildPipeline {
    config: BuildConfig,
}

impl BuildPipeline {
    /// Creates a pipeline for the configuration.
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// The configuration this pipeline runs with.
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Builds the polygon and detail meshes from the input geometry.
    pub fn build(
        &self,
        ctx: &mut BuildContext,
        input: &InputMesh,
        volumes: &ShapeVolumeSet,
    ) -> Result<BuildArtifacts> {
        self.config.validate()?;
        if input.verts.is_empty() || input.tris.is_empty() {
            return Err(Error::InvalidMesh("empty input mesh".to_string()));
        }

        ctx.start_timer(TimerCategory::Total);
        let cfg = &self.config;

        // Voxelize.
        let mut areas = if input.areas.len() == input.tris.len() {
            input.areas.clone()
        } else {
            vec![NULL_AREA; input.tris.len()]
        };
        mark_walkable_triangles(cfg.walkable_slope_angle, &input.verts, &input.tris, &mut areas);

        let mut hf = Heightfield::new(cfg.width, cfg.height, cfg.bmin, cfg.bmax, cfg.cs, cfg.ch)?;
        rasterize_triangles(ctx, &mut hf, cfg, &input.verts, &input.tris, &areas)?;

        // Filter.
        filter_low_hanging_walkable_obstacles(ctx, &mut hf, cfg.walkable_climb);
        filter_ledge_spans(ctx, &mut hf, cfg.walkable_height, cfg.walkable_climb);
        filter_walkable_low_height_spans(ctx, &mut hf, cfg.walkable_height);

        // Compact and erode.
        let mut chf =
            CompactHeightfield::build(ctx, &hf, cfg.walkable_height, cfg.walkable_climb)?;
        chf.erode_walkable_area(ctx, cfg.walkable_radius)?;
        volumes.apply(ctx, &mut chf)?;
        chf.ensure_non_empty()?;

        // Partition.
        build_regions(ctx, &mut chf, cfg)?;

        // Contours and polygons.
        let cset = ContourSet::build(ctx, &chf, cfg.max_simplification_error, cfg.max_edge_len)?;
        let pmesh = PolyMesh::build(ctx, &cset, cfg.max_verts_per_poly as usize)?;
        let detail = PolyMeshDetail::build(
            ctx,
            &pmesh,
            &chf,
            cfg.detail_sample_dist,
            cfg.detail_sample_max_error,
        )?;

        ctx.stop_timer(TimerCategory::Total);
        Ok(BuildArtifacts {
            heightfield: hf,
            compact: chf,
            contours: cset,
            polymesh: pmesh,
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionKind;

    /// A flat quad floor spanning the given extent.
    pub(crate) fn floor_mesh(extent: f32, y: f32) -> InputMesh {
        InputMesh {
            verts: vec![
                Vec3::new(0.0, y, 0.0),
                Vec3::new(extent, y, 0.0),
                Vec3::new(extent, y, extent),
                Vec3::new(0.0, y, extent),
            ],
            tris: vec![[0, 2, 1], [0, 3, 2]],
            areas: Vec::new(),
        }
    }

    fn config_for(extent: f32) -> BuildConfig {
        let mut cfg = BuildConfig {
            cs: 0.5,
            ch: 0.25,
            walkable_height: 4,
            walkable_climb: 2,
            walkable_radius: 0,
            min_region_area: 2,
            merge_region_area: 10,
            detail_sample_dist: 2.0,
            detail_sample_max_error: 0.5,
            ..Default::default()
        };
        cfg.calc_grid_size(
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::new(extent, 3.0, extent),
        );
        cfg
    }

    #[test]
    fn test_full_pipeline_on_flat_floor() {
        let cfg = config_for(8.0);
        let pipeline = BuildPipeline::new(cfg);
        let mut ctx = BuildContext::new();
        let artifacts = pipeline
            .build(&mut ctx, &floor_mesh(8.0, 0.0), &ShapeVolumeSet::default())
            .unwrap();
        assert!(artifacts.polymesh.poly_count() >= 1);
        assert_eq!(
            artifacts.detail.meshes.len(),
            artifacts.polymesh.poly_count()
        );
    }

    #[test]
    fn test_empty_input_rejected_before_allocation() {
        let cfg = config_for(8.0);
        let pipeline = BuildPipeline::new(cfg);
        let mut ctx = BuildContext::new();
        let err = pipeline
            .build(&mut ctx, &InputMesh::default(), &ShapeVolumeSet::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMesh(_)));
    }

    #[test]
    fn test_monotone_partition_also_builds() {
        let mut cfg = config_for(8.0);
        cfg.partition = PartitionKind::Monotone;
        let pipeline = BuildPipeline::new(cfg);
        let mut ctx = BuildContext::new();
        let artifacts = pipeline
            .build(&mut ctx, &floor_mesh(8.0, 0.0), &ShapeVolumeSet::default())
            .unwrap();
        assert!(artifacts.polymesh.poly_count() >= 1);
    }

    #[test]
    fn test_steep_only_geometry_fails_cleanly() {
        // A single vertical wall has no walkable surface at all.
        let cfg = config_for(8.0);
        let pipeline = BuildPipeline::new(cfg);
        let mut ctx = BuildContext::new();
        let wall = InputMesh {
            verts: vec![
                Vec3::new(1.0, -1.0, 1.0),
                Vec3::new(7.0, -1.0, 1.0),
                Vec3::new(7.0, 3.0, 1.0),
                Vec3::new(1.0, 3.0, 1.0),
            ],
            tris: vec![[0, 1, 2], [0, 2, 3]],
            areas: Vec::new(),
        };
        let err = pipeline
            .build(&mut ctx, &wall, &ShapeVolumeSet::default())
            .unwrap_err();
        assert!(matches!(err, Error::BuildFailed(_)));
    }
}
