//! Sampled velocity-obstacle local avoidance.
//!
//! Candidate velocities are scored against nearby agents (circles) and
//! wall segments; the candidate with the lowest combined penalty wins.

use glam::Vec3;

/// A neighboring agent seen as a moving circle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObstacleCircle {
    /// Position snapshot.
    pub pos: Vec3,
    /// Current velocity snapshot.
    pub vel: Vec3,
    /// Desired velocity snapshot.
    pub dvel: Vec3,
    /// Radius.
    pub radius: f32,
}

/// A wall segment obstacle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObstacleSegment {
    /// Segment start.
    pub p: Vec3,
    /// Segment end.
    pub q: Vec3,
}

/// Avoidance tuning; the sampling pattern is the quality knob.
#[derive(Debug, Clone, Copy)]
pub struct ObstacleAvoidanceParams {
    /// Bias toward the desired velocity when ranking samples.
    pub vel_bias: f32,
    /// Weight of deviation from the desired velocity.
    pub weight_des_vel: f32,
    /// Weight of deviation from the current velocity.
    pub weight_cur_vel: f32,
    /// Weight of the preferred-side term.
    pub weight_side: f32,
    /// Weight of the time-of-impact term.
    pub weight_toi: f32,
    /// Collision horizon in seconds.
    pub horiz_time: f32,
    /// Samples per axis for grid sampling.
    pub grid_size: u8,
    /// Directions per ring for adaptive sampling.
    pub adaptive_divs: u8,
    /// Rings for adaptive sampling.
    pub adaptive_rings: u8,
    /// Refinement depth for adaptive sampling.
    pub adaptive_depth: u8,
}

impl Default for ObstacleAvoidanceParams {
    fn default() -> Self {
        Self {
            vel_bias: 0.4,
            weight_des_vel: 2.0,
            weight_cur_vel: 0.75,
            weight_side: 0.75,
            weight_toi: 2.5,
            horiz_time: 2.5,
            grid_size: 33,
            adaptive_divs: 7,
            adaptive_rings: 2,
            adaptive_depth: 5,
        }
    }
}

/// Sampling quality presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvoidanceQuality {
    /// Few samples, cheapest.
    Low,
    /// Balanced.
    Medium,
    /// Dense sampling.
    High,
}

impl AvoidanceQuality {
    /// Parameters implementing the preset.
    pub fn params(self) -> ObstacleAvoidanceParams {
        let base = ObstacleAvoidanceParams::default();
        match self {
            AvoidanceQuality::Low => ObstacleAvoidanceParams {
                adaptive_divs: 5,
                adaptive_rings: 2,
                adaptive_depth: 1,
                ..base
            },
            AvoidanceQuality::Medium => ObstacleAvoidanceParams {
                adaptive_divs: 7,
                adaptive_rings: 2,
                adaptive_depth: 3,
                ..base
            },
            AvoidanceQuality::High => ObstacleAvoidanceParams {
                adaptive_divs: 7,
                adaptive_rings: 3,
                adaptive_depth: 5,
                ..base
            },
        }
    }
}

/// Avoidance solver state for one agent query.
#[derive(Debug, Default)]
pub struct ObstacleAvoidanceQuery {
    circles: Vec<ObstacleCircle>,
    segments: Vec<ObstacleSegment>,
}

impl ObstacleAvoidanceQuery {
    /// Creates an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears obstacles from the previous agent.
    pub fn reset(&mut self) {
        self.circles.clear();
        self.segments.clear();
    }

    /// Registers a neighboring agent.
    pub fn add_circle(&mut self, circle: ObstacleCircle) {
        self.circles.push(circle);
    }

    /// Registers a wall segment.
    pub fn add_segment(&mut self, segment: ObstacleSegment) {
        self.segments.push(segment);
    }

    /// Number of registered circles.
    pub fn circle_count(&self) -> usize {
        self.circles.len()
    }

    /// Scores one candidate velocity; lower is better.
    fn process_sample(
        &self,
        vcand: Vec3,
        pos: Vec3,
        radius: f32,
        vel: Vec3,
        dvel: Vec3,
        vmax: f32,
        params: &ObstacleAvoidanceParams,
    ) -> f32 {
        let inv_vmax = if vmax > 0.0 { 1.0 / vmax } else { 0.0 };
        let inv_horiz = 1.0 / params.horiz_time;

        // Earliest collision among all obstacles.
        let mut tmin = params.horiz_time;
        let mut side = 0.0f32;
        let mut nside = 0;

        for circle in &self.circles {
            // Relative velocity against the neighbor.
            let vab = vcand * 2.0 - vel - circle.vel;
            let orig = circle.pos - pos;

            // Side preference: passing on the neighbor's flank scores
            // better than head-on approaches.
            let dp = orig.normalize_or_zero();
            side += (walkway_common::dot_2d(dp.x, dp.z, vab.x, vab.z) * 0.5 + 0.5).clamp(0.0, 1.0);
            nside += 1;

            if let Some(t) = sweep_circle_circle(pos, radius, vab, circle.pos, circle.radius) {
                if t >= 0.0 && t < tmin {
                    tmin = t;
                }
            }
        }

        for segment in &self.segments {
            if let Some(t) = intersect_ray_segment_2d(pos, vcand, segment.p, segment.q) {
                if t >= 0.0 && t < tmin {
                    tmin = t;
                }
            }
        }

        if nside > 0 {
            side /= nside as f32;
        }

        let vpen = params.weight_des_vel * (vcand.distance(dvel) * inv_vmax);
        let vcpen = params.weight_cur_vel * (vcand.distance(vel) * inv_vmax);
        let spen = params.weight_side * side;
        let tpen = params.weight_toi * (1.0 / (0.1 + tmin * inv_horiz));

        vpen + vcpen + spen + tpen
    }

    /// Grid-pattern sampling over the velocity disc.
    pub fn sample_velocity_grid(
        &self,
        pos: Vec3,
        radius: f32,
        vmax: f32,
        vel: Vec3,
        dvel: Vec3,
        params: &ObstacleAvoidanceParams,
    ) -> Vec3 {
        let half = (params.grid_size as f32 - 1.0) * 0.5;
        let cvx = dvel.x * params.vel_bias;
        let cvz = dvel.z * params.vel_bias;
        let cs = vmax * 2.0 * (1.0 - params.vel_bias) / (params.grid_size as f32 - 1.0);

        let mut best = dvel;
        let mut best_penalty = f32::MAX;

        for gz in 0..params.grid_size {
            for gx in 0..params.grid_size {
                let vcand = Vec3::new(
                    cvx + (gx as f32 - half) * cs,
                    0.0,
                    cvz + (gz as f32 - half) * cs,
                );
                if walkway_common::sqr(vcand.x) + walkway_common::sqr(vcand.z)
                    > walkway_common::sqr(vmax + cs / 2.0)
                {
                    continue;
                }
                let penalty =
                    self.process_sample(vcand, pos, radius, vel, dvel, vmax, params);
                if penalty < best_penalty {
                    best_penalty = penalty;
                    best = vcand;
                }
            }
        }
        best
    }

    /// Adaptive ring sampling: coarse rings first, then refined around the
    /// best sample.
    pub fn sample_velocity_adaptive(
        &self,
        pos: Vec3,
        radius: f32,
        vmax: f32,
        vel: Vec3,
        dvel: Vec3,
        params: &ObstacleAvoidanceParams,
    ) -> Vec3 {
        let divs = params.adaptive_divs.clamp(1, 32) as usize;
        let rings = params.adaptive_rings.clamp(1, 4) as usize;
        let depth = params.adaptive_depth.max(1) as usize;

        let mut center = dvel * params.vel_bias;
        let mut sample_radius = vmax * (1.0 - params.vel_bias);
        let mut best = center;
        let mut best_penalty = f32::MAX;

        for _ in 0..depth {
            // One ring pattern around the current center.
            let mut local_best = center;
            let mut local_penalty =
                self.process_sample(center, pos, radius, vel, dvel, vmax, params);

            for ring in 1..=rings {
                let r = sample_radius * ring as f32 / rings as f32;
                for d in 0..divs {
                    let angle = d as f32 / divs as f32 * std::f32::consts::TAU;
                    let vcand = center + Vec3::new(angle.cos() * r, 0.0, angle.sin() * r);
                    if walkway_common::sqr(vcand.x) + walkway_common::sqr(vcand.z)
                        > walkway_common::sqr(vmax)
                    {
                        continue;
                    }
                    let penalty =
                        self.process_sample(vcand, pos, radius, vel, dvel, vmax, params);
                    if penalty < local_penalty {
                        local_penalty = penalty;
                        local_best = vcand;
                    }
                }
            }

            if local_penalty < best_penalty {
                best_penalty = local_penalty;
                best = local_best;
            }
            center = local_best;
            sample_radius *= 0.5;
        }
        best
    }
}

/// Earliest time two moving circles touch, treating the second as static
/// and the first as moving with the relative velocity.
fn sweep_circle_circle(
    c0: Vec3,
    r0: f32,
    v: Vec3,
    c1: Vec3,
    r1: f32,
) -> Option<f32> {
    const EPS: f32 = 0.0001;
    let s = c1 - c0;
    let r = r0 + r1;
    let c = walkway_common::dot_2d(s.x, s.z, s.x, s.z) - r * r;
    let mut a = walkway_common::dot_2d(v.x, v.z, v.x, v.z);
    if a < EPS {
        return None;
    }
    let b = walkway_common::dot_2d(v.x, v.z, s.x, s.z);
    let d = b * b - a * c;
    if d < 0.0 {
        return None;
    }
    a = 1.0 / a;
    Some((b - d.sqrt()) * a)
}

/// Ray versus segment on the XZ plane.
fn intersect_ray_segment_2d(origin: Vec3, dir: Vec3, p: Vec3, q: Vec3) -> Option<f32> {
    let v = q - p;
    let w = origin - p;
    let d = walkway_common::cross_2d(v.x, v.z, dir.x, dir.z);
    if d.abs() < 1e-6 {
        return None;
    }
    let inv_d = 1.0 / d;
    let t = walkway_common::cross_2d(v.x, v.z, w.x, w.z) * inv_d;
    let s = walkway_common::cross_2d(dir.x, dir.z, w.x, w.z) * inv_d;
    if !(0.0..=1.0).contains(&s) {
        return None;
    }
    Some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_space_keeps_desired_velocity() {
        let query = ObstacleAvoidanceQuery::new();
        let params = AvoidanceQuality::Medium.params();
        let dvel = Vec3::new(2.0, 0.0, 0.0);
        let picked = query.sample_velocity_adaptive(
            Vec3::ZERO,
            0.5,
            2.0,
            Vec3::new(2.0, 0.0, 0.0),
            dvel,
            &params,
        );
        // With nothing to avoid, the pick stays close to the desired
        // velocity.
        assert!(picked.distance(dvel) < 1.5);
    }

    #[test]
    fn test_head_on_neighbor_deflects_velocity() {
        let mut query = ObstacleAvoidanceQuery::new();
        query.add_circle(ObstacleCircle {
            pos: Vec3::new(2.0, 0.0, 0.0),
            vel: Vec3::new(-2.0, 0.0, 0.0),
            dvel: Vec3::new(-2.0, 0.0, 0.0),
            radius: 0.5,
        });
        let params = AvoidanceQuality::High.params();
        let dvel = Vec3::new(2.0, 0.0, 0.0);
        let picked = query.sample_velocity_grid(
            Vec3::ZERO,
            0.5,
            2.0,
            Vec3::new(2.0, 0.0, 0.0),
            dvel,
            &params,
        );
        // The straight-ahead velocity collides almost immediately; the
        // sampler must pick something measurably different.
        assert!(picked.distance(dvel) > 0.1);
    }

    #[test]
    fn test_sweep_circle_circle_hits() {
        let t = sweep_circle_circle(
            Vec3::ZERO,
            0.5,
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
            0.5,
        )
        .unwrap();
        assert!(t > 0.0 && t < 2.0);
    }

    #[test]
    fn test_sweep_circle_circle_misses_static() {
        assert!(sweep_circle_circle(
            Vec3::ZERO,
            0.5,
            Vec3::ZERO,
            Vec3::new(4.0, 0.0, 0.0),
            0.5
        )
        .is_none());
    }

    #[test]
    fn test_quality_presets_scale_sampling() {
        let low = AvoidanceQuality::Low.params();
        let high = AvoidanceQuality::High.params();
        assert!(high.adaptive_depth > low.adaptive_depth);
    }
}
