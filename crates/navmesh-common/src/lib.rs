//! Shared building blocks for the navigation mesh query engine.
//!
//! Everything here is stateless: the error type used while assembling mesh
//! data, and the XZ-plane geometry the search algorithms are built on.

mod geometry;
mod math;

pub use geometry::*;
pub use math::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Errors raised while building or assembling navigation mesh data
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid mesh data: {0}")]
    InvalidMesh(String),

    #[error("tile data has wrong magic number {0:#010x}")]
    WrongMagic(u32),

    #[error("tile data version {found} is not supported (expected {expected})")]
    WrongVersion { found: u32, expected: u32 },

    #[error("tile location ({x}, {y}, layer {layer}) is already occupied")]
    AlreadyOccupied { x: i32, y: i32, layer: i32 },

    #[error("no free tile slots left in the navigation mesh")]
    OutOfTiles,
}

/// Result type for mesh construction operations
pub type Result<T> = std::result::Result<T, Error>;
