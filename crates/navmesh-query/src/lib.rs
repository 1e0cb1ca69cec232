//! Navigation mesh runtime and query engine
//!
//! A navigation mesh is a set of tiles, each holding convex polygons connected
//! through links. [`NavMesh`] owns the tiles and keeps their links in sync as
//! tiles come and go; [`NavMeshQuery`] runs searches over a borrowed mesh:
//! A* pathfinding (one-shot and time-sliced), string pulling, raycasts,
//! Dijkstra style area exploration and a handful of spatial lookups.

mod nav_mesh;
mod nav_mesh_builder;
mod nav_mesh_query;
mod node_pool;
mod poly_query;
mod query_filter;
mod random_point;
mod raycast;
mod raycast_hit;
mod sliced_pathfinding;
mod status;
mod straight_path;
mod surface_queries;

#[cfg(test)]
mod test_mesh_helpers;

#[cfg(test)]
mod spatial_query_tests;

use std::fmt;

pub use nav_mesh::{
    BVNode, Link, LinkIter, MeshTile, MeshTileData, NavMesh, OffMeshConnection, Poly, PolyDetail,
    TileHeader, decode_poly_ref, encode_poly_ref,
};
pub use nav_mesh_builder::{NavMeshBuilder, NavMeshCreateParams, OffMeshConnectionParams};
pub use nav_mesh_query::{NavMeshQuery, NearestPoly, PathResult};
pub use node_pool::{Node, NodeFlags, NodeIndex, NodePool, NodeQueue};
pub use poly_query::{CollectPolysQuery, FindNearestPolyQuery, PolyQuery};
pub use query_filter::{DefaultQueryFilter, PolyHandle, QueryFilter};
pub use random_point::RandomPoint;
pub use raycast_hit::{RaycastHit, RaycastOptions};
pub use sliced_pathfinding::SlicedUpdate;
pub use status::{QueryResult, Status};
pub use straight_path::{StraightPath, StraightPathPoint};
pub use surface_queries::{PolysAround, SurfaceMove, VisitedPoly, WallHit, WallSegment, WallSegments};

pub use navmesh_common::{Error, Result, Vec3};

/// Maximum number of vertices per navigation polygon
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Number of area ids a filter can assign costs to
pub const MAX_AREAS: usize = 64;

/// Tile data magic number ('D' 'N' 'A' 'V')
pub const NAVMESH_MAGIC: u32 =
    (b'D' as u32) << 24 | (b'N' as u32) << 16 | (b'A' as u32) << 8 | b'V' as u32;

/// Tile data version understood by this crate
pub const NAVMESH_VERSION: u32 = 7;

/// Marks a polygon edge that continues into a neighbouring tile
pub const EXT_LINK: u16 = 0x8000;

/// Terminates a polygon's link list
pub const NULL_LINK: u32 = u32::MAX;

/// Off-mesh connection can be traversed in both directions
pub const OFFMESH_CON_BIDIR: u8 = 1;

/// Marks an unused vertex or neighbour slot in builder input
pub const MESH_NULL_IDX: u16 = 0xffff;

/// Side code for links that do not cross a tile border
pub const SIDE_NONE: u8 = 0xff;

/// Reference to a polygon in the navigation mesh.
///
/// Packs the tile salt, tile index and polygon index. A reference becomes
/// stale when its tile is removed. The value `0` is never a valid reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyRef(u32);

impl PolyRef {
    pub const NULL: PolyRef = PolyRef(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl From<u32> for PolyRef {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for PolyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Reference to a tile in the navigation mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileRef(u32);

impl TileRef {
    pub const NULL: TileRef = TileRef(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

bitflags::bitflags! {
    /// Polygon flags used by filters to include or exclude polygons
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(
        feature = "serialization",
        derive(serde::Serialize, serde::Deserialize)
    )]
    pub struct PolyFlags: u16 {
        /// Ability to walk (ground, grass, road)
        const WALK = 0x01;
        /// Ability to swim (water)
        const SWIM = 0x02;
        /// Ability to move through doors
        const DOOR = 0x04;
        /// Ability to jump
        const JUMP = 0x08;
        /// Disabled polygon
        const DISABLED = 0x10;
        // Remaining bits are free for application use.
        const _ = !0;
    }
}

/// Polygon kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum PolyType {
    /// Part of the walkable surface
    #[default]
    Ground,
    /// Two-vertex connection between arbitrary points
    OffMeshConnection,
}

bitflags::bitflags! {
    /// Options for [`NavMeshQuery::init_sliced_find_path`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FindPathOptions: u32 {
        /// Use raycasts during the search to shortcut through visible polygons
        const ANY_ANGLE = 0x02;
    }
}

bitflags::bitflags! {
    /// Flags attached to each straight path vertex
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(
        feature = "serialization",
        derive(serde::Serialize, serde::Deserialize)
    )]
    pub struct StraightPathFlags: u8 {
        /// The vertex is the start position
        const START = 0x01;
        /// The vertex is the end position
        const END = 0x02;
        /// The vertex is the start of an off-mesh connection
        const OFFMESH_CONNECTION = 0x04;
    }
}

bitflags::bitflags! {
    /// Options for [`NavMeshQuery::find_straight_path`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StraightPathOptions: u32 {
        /// Add a vertex at every polygon edge crossing where the area changes
        const AREA_CROSSINGS = 0x01;
        /// Add a vertex at every polygon edge crossing
        const ALL_CROSSINGS = 0x02;
    }
}

/// Layout of a navigation mesh
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct NavMeshParams {
    /// World space origin of the tile grid
    pub origin: Vec3,
    /// Width of each tile along the x-axis
    pub tile_width: f32,
    /// Height of each tile along the z-axis
    pub tile_height: f32,
    /// Maximum number of tiles the mesh can hold
    pub max_tiles: usize,
    /// Maximum number of polygons per tile
    pub max_polys_per_tile: usize,
}

impl Default for NavMeshParams {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            tile_width: 32.0,
            tile_height: 32.0,
            max_tiles: 128,
            max_polys_per_tile: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poly_ref_validity() {
        assert!(!PolyRef::NULL.is_valid());
        assert!(PolyRef::new(1).is_valid());
        assert_eq!(PolyRef::from(42).id(), 42);
    }

    #[test]
    fn test_magic() {
        assert_eq!(NAVMESH_MAGIC, 0x444e_4156);
    }

    #[test]
    fn test_poly_flags_keep_unknown_bits() {
        let flags = PolyFlags::from_bits_truncate(0x8001);
        assert!(flags.contains(PolyFlags::WALK));
        assert_eq!(flags.bits(), 0x8001);
        assert_eq!(PolyFlags::all().bits(), 0xffff);
    }
}
