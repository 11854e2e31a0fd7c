//! Common utilities shared by the walkway build pipeline and the runtime mesh.

mod context;
mod math;

pub use context::*;
pub use math::*;

/// Represents a 3D position or direction in world units.
pub type Vec3 = glam::Vec3;

/// Error type shared by every build stage.
///
/// Query-time conditions are not errors; they are reported through
/// `walkway_nav::Status` instead. Everything here aborts the current build
/// stage only: tiles already committed to a mesh stay valid.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The input geometry cannot be built at all (degenerate bounds, empty
    /// mesh, invalid configuration). Raised before any allocation.
    #[error("invalid input mesh: {0}")]
    InvalidMesh(String),

    /// A build stage failed mid-way (exhausted region ids, unformable
    /// polygon, buffer overflow). The stage frees its partial state.
    #[error("build failed: {0}")]
    BuildFailed(String),

    /// A tile exceeded a serialization limit (vertex count, verts per poly).
    /// Aborts that tile only.
    #[error("serialization limit exceeded: {0}")]
    SerializationLimit(String),

    /// I/O failure while persisting or loading a tile set.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for walkway operations.
pub type Result<T> = std::result::Result<T, Error>;
