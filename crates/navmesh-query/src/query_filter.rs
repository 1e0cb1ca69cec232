//! Traversal filters
//!
//! A filter decides which polygons a query may visit and what it costs to
//! move across them.

use navmesh_common::Vec3;

use super::nav_mesh::{MeshTile, Poly};
use super::{MAX_AREAS, PolyFlags, PolyRef};

/// A polygon together with the tile that owns it
#[derive(Debug, Clone, Copy)]
pub struct PolyHandle<'t> {
    pub poly_ref: PolyRef,
    pub tile: &'t MeshTile,
    pub poly: &'t Poly,
}

/// Polygon admissibility and traversal cost policy
pub trait QueryFilter {
    /// Returns true if the polygon may be visited
    fn pass_filter(&self, poly_ref: PolyRef, tile: &MeshTile, poly: &Poly) -> bool;

    /// Cost of moving from `pa` to `pb` across `cur`, which was entered from
    /// `prev` and is left towards `next`.
    fn get_cost(
        &self,
        pa: Vec3,
        pb: Vec3,
        prev: Option<PolyHandle<'_>>,
        cur: PolyHandle<'_>,
        next: Option<PolyHandle<'_>>,
    ) -> f32;
}

impl<F: QueryFilter + ?Sized> QueryFilter for &F {
    fn pass_filter(&self, poly_ref: PolyRef, tile: &MeshTile, poly: &Poly) -> bool {
        (**self).pass_filter(poly_ref, tile, poly)
    }

    fn get_cost(
        &self,
        pa: Vec3,
        pb: Vec3,
        prev: Option<PolyHandle<'_>>,
        cur: PolyHandle<'_>,
        next: Option<PolyHandle<'_>>,
    ) -> f32 {
        (**self).get_cost(pa, pb, prev, cur, next)
    }
}

/// Flag mask filter with a per-area cost multiplier
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultQueryFilter {
    /// Cost multiplier per area id
    pub area_cost: [f32; MAX_AREAS],
    /// A polygon must have at least one of these flags
    pub include_flags: PolyFlags,
    /// A polygon must have none of these flags
    pub exclude_flags: PolyFlags,
}

impl Default for DefaultQueryFilter {
    fn default() -> Self {
        Self {
            area_cost: [1.0; MAX_AREAS],
            include_flags: PolyFlags::all(),
            exclude_flags: PolyFlags::empty(),
        }
    }
}

impl DefaultQueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn area_cost(&self, area: usize) -> f32 {
        self.area_cost.get(area).copied().unwrap_or(1.0)
    }

    pub fn set_area_cost(&mut self, area: usize, cost: f32) {
        if let Some(c) = self.area_cost.get_mut(area) {
            *c = cost;
        }
    }
}

impl QueryFilter for DefaultQueryFilter {
    fn pass_filter(&self, _poly_ref: PolyRef, _tile: &MeshTile, poly: &Poly) -> bool {
        poly.flags.intersects(self.include_flags) && !poly.flags.intersects(self.exclude_flags)
    }

    fn get_cost(
        &self,
        pa: Vec3,
        pb: Vec3,
        _prev: Option<PolyHandle<'_>>,
        cur: PolyHandle<'_>,
        _next: Option<PolyHandle<'_>>,
    ) -> f32 {
        pa.distance(pb) * self.area_cost(cur.poly.area as usize)
    }
}
