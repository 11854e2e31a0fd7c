//! Multi-agent crowd simulation: path corridors, a proximity grid and a
//! sampled velocity-obstacle avoidance solver, updated once per tick.

mod avoidance;
mod corridor;
mod crowd;
mod grid;


pub use avoidance::{
    AvoidanceQuality, ObstacleAvoidanceParams, ObstacleAvoidanceQuery, ObstacleCircle,
    ObstacleSegment,
};
pub use corridor::PathCorridor;
pub use crowd::{AgentParams, Crowd, CrowdAgent, MAX_AGENT_NEIGHBORS, TargetState};
pub use grid::{GridItem, ProximityGrid};
