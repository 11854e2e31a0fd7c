//! Crowd manager: agents, their path requests and the per-tick update
//! pipeline (corridor refresh, proximity grid, local avoidance,
//! integration, off-mesh handling).

use glam::Vec3;

use walkway_nav::{NavMesh, NavMeshQuery, PolyRef, QueryFilter, Status, StatusDetail};

use crate::avoidance::{
    AvoidanceQuality, ObstacleAvoidanceQuery, ObstacleCircle,
};
use crate::corridor::PathCorridor;
use crate::grid::{GridItem, ProximityGrid};

/// Maximum neighbors considered per agent.
pub const MAX_AGENT_NEIGHBORS: usize = 6;

/// Steering corners requested from the corridor.
const MAX_CORNERS: usize = 4;

/// Path requests served per tick; the rest wait in the queue.
const MAX_PATH_REQUESTS_PER_TICK: usize = 4;

/// Target request lifecycle of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetState {
    /// No target set.
    #[default]
    None,
    /// Target requested this tick.
    Requesting,
    /// Waiting for a free path-request slot.
    WaitingForQueue,
    /// Path request issued, waiting for the result.
    WaitingForPath,
    /// Moving along a valid corridor.
    Valid,
    /// Steering by raw velocity, no corridor.
    Velocity,
    /// Pathfinding failed; the agent idles.
    Failed,
}

/// Tunables of one agent.
#[derive(Debug, Clone)]
pub struct AgentParams {
    /// Agent radius.
    pub radius: f32,
    /// Agent height.
    pub height: f32,
    /// Maximum speed, units/second.
    pub max_speed: f32,
    /// Maximum acceleration, units/second^2.
    pub max_acceleration: f32,
    /// Neighbor gathering radius.
    pub collision_query_range: f32,
    /// Avoidance sampling quality.
    pub avoidance_quality: AvoidanceQuality,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            radius: 0.5,
            height: 2.0,
            max_speed: 3.5,
            max_acceleration: 8.0,
            collision_query_range: 6.0,
            avoidance_quality: AvoidanceQuality::Medium,
        }
    }
}

/// One simulated agent.
#[derive(Debug, Clone)]
pub struct CrowdAgent {
    /// Whether the slot is in use.
    pub active: bool,
    /// Position.
    pub pos: Vec3,
    /// Current velocity.
    pub vel: Vec3,
    /// Desired velocity before avoidance.
    pub dvel: Vec3,
    /// Velocity picked by the avoidance solver.
    pub nvel: Vec3,
    /// Tunables.
    pub params: AgentParams,
    /// Path corridor.
    pub corridor: PathCorridor,
    /// Target request state.
    pub target_state: TargetState,
    /// Target polygon.
    pub target_ref: PolyRef,
    /// Target position.
    pub target_pos: Vec3,
    /// Neighbor agent indices gathered this tick.
    pub neighbors: Vec<usize>,
}

impl CrowdAgent {
    fn inactive() -> Self {
        Self {
            active: false,
            pos: Vec3::ZERO,
            vel: Vec3::ZERO,
            dvel: Vec3::ZERO,
            nvel: Vec3::ZERO,
            params: AgentParams::default(),
            corridor: PathCorridor::new(),
            target_state: TargetState::None,
            target_ref: PolyRef::NULL,
            target_pos: Vec3::ZERO,
            neighbors: Vec::new(),
        }
    }
}

/// The crowd simulation over one navigation mesh.
pub struct Crowd<'a> {
    query: NavMeshQuery<'a>,
    filter: QueryFilter,
    agents: Vec<CrowdAgent>,
    grid: ProximityGrid,
    avoidance: ObstacleAvoidanceQuery,
    half_extents: Vec3,
}

impl<'a> Crowd<'a> {
    /// Creates a crowd with `max_agents` slots.
    pub fn new(mesh: &'a NavMesh, max_agents: usize, max_agent_radius: f32) -> Self {
        Self {
            query: NavMeshQuery::new(mesh, 2048),
            filter: QueryFilter::default(),
            agents: (0..max_agents).map(|_| CrowdAgent::inactive()).collect(),
            grid: ProximityGrid::new(max_agent_radius * 3.0),
            avoidance: ObstacleAvoidanceQuery::new(),
            half_extents: Vec3::new(max_agent_radius * 2.0, 4.0, max_agent_radius * 2.0),
        }
    }

    /// The filter used for corridor and path queries.
    pub fn filter_mut(&mut self) -> &mut QueryFilter {
        &mut self.filter
    }

    /// Spawns an agent at the nearest navmesh position.
    pub fn add_agent(&mut self, pos: Vec3, params: AgentParams) -> Result<usize, Status> {
        let Some(idx) = self.agents.iter().position(|a| !a.active) else {
            return Err(Status::failure(StatusDetail::OutOfNodes));
        };

        let (status, r, nearest) = self
            .query
            .find_nearest_poly(pos, self.half_extents, &self.filter);
        if status.is_failure() {
            return Err(status);
        }

        let agent = &mut self.agents[idx];
        *agent = CrowdAgent::inactive();
        agent.active = true;
        agent.pos = nearest;
        agent.params = params;
        agent.corridor.reset(r, nearest);
        Ok(idx)
    }

    /// Removes an agent.
    pub fn remove_agent(&mut self, idx: usize) -> Status {
        match self.agents.get_mut(idx) {
            Some(agent) => {
                *agent = CrowdAgent::inactive();
                Status::success()
            }
            None => Status::failure(StatusDetail::InvalidParam),
        }
    }

    /// Shared access to an agent slot.
    pub fn agent(&self, idx: usize) -> Option<&CrowdAgent> {
        self.agents.get(idx).filter(|a| a.active)
    }

    /// Number of active agents.
    pub fn active_agent_count(&self) -> usize {
        self.agents.iter().filter(|a| a.active).count()
    }

    /// Requests that an agent move to a target polygon/position.
    pub fn request_move_target(&mut self, idx: usize, r: PolyRef, pos: Vec3) -> Status {
        match self.agents.get_mut(idx) {
            Some(agent) if agent.active => {
                agent.target_ref = r;
                agent.target_pos = pos;
                agent.target_state = TargetState::Requesting;
                Status::success()
            }
            _ => Status::failure(StatusDetail::InvalidParam),
        }
    }

    /// Requests raw-velocity steering for an agent.
    pub fn request_move_velocity(&mut self, idx: usize, vel: Vec3) -> Status {
        match self.agents.get_mut(idx) {
            Some(agent) if agent.active => {
                agent.dvel = vel;
                agent.target_state = TargetState::Velocity;
                Status::success()
            }
            _ => Status::failure(StatusDetail::InvalidParam),
        }
    }

    /// Advances the simulation one tick.
    ///
    /// Agents are processed in index order; neighbor gathering and
    /// avoidance read position snapshots taken before any agent moved, so
    /// no agent observes another's post-tick state mid-tick.
    pub fn update(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }

        // 1. Serve path requests, refreshing corridors.
        self.update_move_requests();

        // 2. Snapshot every agent into the proximity grid.
        self.grid.clear();
        for (i, agent) in self.agents.iter().enumerate() {
            if agent.active {
                self.grid.add(GridItem {
                    id: i,
                    pos: agent.pos,
                    radius: agent.params.radius,
                });
            }
        }

        // 3. Gather neighbors per agent from the snapshot.
        for i in 0..self.agents.len() {
            if !self.agents[i].active {
                continue;
            }
            let pos = self.agents[i].pos;
            let range = self.agents[i].params.collision_query_range;
            let mut neighbors: Vec<usize> = self
                .grid
                .query(pos, range)
                .into_iter()
                .map(|item| item.id)
                .filter(|&id| id != i)
                .collect();
            neighbors.truncate(MAX_AGENT_NEIGHBORS);
            self.agents[i].neighbors = neighbors;
        }

        // 4. Desired velocity from the corridor, then local avoidance.
        let snapshot: Vec<(Vec3, Vec3, Vec3, f32, bool)> = self
            .agents
            .iter()
            .map(|a| (a.pos, a.vel, a.dvel, a.params.radius, a.active))
            .collect();

        for i in 0..self.agents.len() {
            if !self.agents[i].active {
                continue;
            }

            if self.agents[i].target_state == TargetState::Valid {
                let corners = self.agents[i]
                    .corridor
                    .find_corners(&self.query, MAX_CORNERS);
                let dvel = if let Some(next) = corners.first() {
                    let to = *next - self.agents[i].pos;
                    let dist = walkway_common::dist_sqr_2d(*next, self.agents[i].pos).sqrt();
                    let speed = self.agents[i].params.max_speed;
                    // Slow down when closing in on the final corner.
                    let scale = if corners.len() == 1 {
                        (dist / self.agents[i].params.radius.max(0.01)).min(1.0)
                    } else {
                        1.0
                    };
                    Vec3::new(to.x, 0.0, to.z).normalize_or_zero() * speed * scale
                } else {
                    Vec3::ZERO
                };
                self.agents[i].dvel = dvel;
            }

            // Local avoidance against neighbor snapshots.
            self.avoidance.reset();
            for &n in &self.agents[i].neighbors {
                let (pos, vel, dvel, radius, active) = snapshot[n];
                if !active {
                    continue;
                }
                self.avoidance.add_circle(ObstacleCircle {
                    pos,
                    vel,
                    dvel,
                    radius,
                });
            }

            let (pos, vel, _, radius, _) = snapshot[i];
            let dvel = self.agents[i].dvel;
            let params = self.agents[i].params.avoidance_quality.params();
            let nvel = if self.avoidance.circle_count() > 0 {
                self.avoidance.sample_velocity_adaptive(
                    pos,
                    radius,
                    self.agents[i].params.max_speed,
                    vel,
                    dvel,
                    &params,
                )
            } else {
                dvel
            };
            self.agents[i].nvel = nvel;
        }

        // 5. Integrate and constrain to the corridor.
        for i in 0..self.agents.len() {
            if !self.agents[i].active {
                continue;
            }
            let max_delta = self.agents[i].params.max_acceleration * dt;
            let dv = self.agents[i].nvel - self.agents[i].vel;
            let dv = if dv.length() > max_delta {
                dv.normalize_or_zero() * max_delta
            } else {
                dv
            };
            self.agents[i].vel += dv;
            let new_pos = self.agents[i].pos + self.agents[i].vel * dt;

            let agent = &mut self.agents[i];
            if matches!(
                agent.target_state,
                TargetState::Valid | TargetState::Velocity
            ) {
                agent.pos = agent.corridor.move_position(new_pos, &self.query, &self.filter);
            }
        }

        // 6. Off-mesh connections: hop to the far endpoint.
        for i in 0..self.agents.len() {
            if !self.agents[i].active || self.agents[i].target_state != TargetState::Valid {
                continue;
            }
            if let Some(end) = self.agents[i]
                .corridor
                .move_over_offmesh_connection(&self.query)
            {
                self.agents[i].pos = end;
                self.agents[i].vel = Vec3::ZERO;
            }
        }
    }

    fn update_move_requests(&mut self) {
        let mut served = 0usize;
        for i in 0..self.agents.len() {
            if !self.agents[i].active {
                continue;
            }
            match self.agents[i].target_state {
                TargetState::Requesting | TargetState::WaitingForQueue => {
                    if served >= MAX_PATH_REQUESTS_PER_TICK {
                        self.agents[i].target_state = TargetState::WaitingForQueue;
                        continue;
                    }
                    served += 1;
                    self.agents[i].target_state = TargetState::WaitingForPath;

                    let start_ref = self.agents[i].corridor.first_poly();
                    let start_pos = self.agents[i].pos;
                    let target_ref = self.agents[i].target_ref;
                    let target_pos = self.agents[i].target_pos;

                    let (status, path) = self.query.find_path(
                        start_ref,
                        target_ref,
                        start_pos,
                        target_pos,
                        &self.filter,
                    );
                    if status.is_success() && !path.is_empty() {
                        self.agents[i].corridor.set_corridor(target_pos, &path);
                        self.agents[i].target_state = TargetState::Valid;
                    } else {
                        self.agents[i].target_state = TargetState::Failed;
                    }
                }
                _ => {}
            }
        }
    }
}
