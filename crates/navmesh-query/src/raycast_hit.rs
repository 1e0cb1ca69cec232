//! Raycast options and results

use navmesh_common::Vec3;

use super::{PolyRef, Status};

/// Options for [`NavMeshQuery::raycast`](super::NavMeshQuery::raycast)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaycastOptions {
    /// Accumulate the filter cost of the traversed segment into
    /// [`RaycastHit::path_cost`]
    pub use_costs: bool,
    /// Maximum number of visited polygons to record
    pub max_path: usize,
}

impl Default for RaycastOptions {
    fn default() -> Self {
        Self {
            use_costs: false,
            max_path: 256,
        }
    }
}

/// Result of a raycast along the mesh surface
#[derive(Debug, Clone, PartialEq)]
pub struct RaycastHit {
    /// Fraction of the segment travelled before hitting a wall, `f32::MAX`
    /// if the end point was reached
    pub t: f32,
    /// Normal of the wall that was hit, zero if none
    pub hit_normal: Vec3,
    /// Edge of the last visited polygon the ray left through
    pub hit_edge_index: Option<usize>,
    /// Visited polygons in order, up to the requested capacity
    pub path: Vec<PolyRef>,
    /// Accumulated traversal cost when costs were requested
    pub path_cost: f32,
    /// Success, possibly with [`Status::BUFFER_TOO_SMALL`]
    pub status: Status,
}

impl RaycastHit {
    pub(crate) fn new() -> Self {
        Self {
            t: 0.0,
            hit_normal: Vec3::ZERO,
            hit_edge_index: None,
            path: Vec::new(),
            path_cost: 0.0,
            status: Status::SUCCESS,
        }
    }

    /// Returns true if the ray stopped at a wall
    pub fn hit_wall(&self) -> bool {
        self.t < f32::MAX
    }

    /// Point where the ray stopped, or `end` if it reached it
    pub fn hit_point(&self, start: Vec3, end: Vec3) -> Vec3 {
        if self.hit_wall() {
            start.lerp(end, self.t)
        } else {
            end
        }
    }
}
