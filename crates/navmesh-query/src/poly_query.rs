//! Polygon query callbacks
//!
//! [`NavMeshQuery::query_polygons_with`](super::NavMeshQuery::query_polygons_with)
//! hands the polygons overlapping a box to a [`PolyQuery`] in small batches,
//! one tile at a time.

use navmesh_common::Vec3;

use super::nav_mesh::{MeshTile, Poly, decode_poly_index};
use super::nav_mesh_query::NearestPoly;
use super::PolyRef;

/// Receives batches of polygons found by a box query
pub trait PolyQuery {
    /// Called for each batch of polygons touched by the query box. May be
    /// called several times per tile. `polys` and `refs` are parallel.
    fn process(&mut self, tile: &MeshTile, polys: &[&Poly], refs: &[PolyRef]);
}

/// Collects polygon references up to a fixed capacity
#[derive(Debug, Clone)]
pub struct CollectPolysQuery {
    polys: Vec<PolyRef>,
    max_polys: usize,
    overflow: bool,
}

impl CollectPolysQuery {
    pub fn new(max_polys: usize) -> Self {
        Self {
            polys: Vec::with_capacity(max_polys.min(1024)),
            max_polys,
            overflow: false,
        }
    }

    pub fn polys(&self) -> &[PolyRef] {
        &self.polys
    }

    /// True if more polygons were found than fit
    pub fn overflow(&self) -> bool {
        self.overflow
    }

    pub fn into_polys(self) -> Vec<PolyRef> {
        self.polys
    }
}

impl PolyQuery for CollectPolysQuery {
    fn process(&mut self, _tile: &MeshTile, _polys: &[&Poly], refs: &[PolyRef]) {
        let remaining = self.max_polys.saturating_sub(self.polys.len());
        if remaining < refs.len() {
            self.overflow = true;
        }
        self.polys.extend_from_slice(&refs[..remaining.min(refs.len())]);
    }
}

/// Tracks the polygon nearest to a point.
///
/// A point above a polygon and within the tile's climb height of it counts
/// as lying on that polygon, which favours the surface the point stands on
/// over a closer wall below or above it.
#[derive(Debug, Clone)]
pub struct FindNearestPolyQuery {
    center: Vec3,
    nearest_distance_sqr: f32,
    nearest: Option<NearestPoly>,
}

impl FindNearestPolyQuery {
    pub fn new(center: Vec3) -> Self {
        Self {
            center,
            nearest_distance_sqr: f32::MAX,
            nearest: None,
        }
    }

    pub fn nearest(&self) -> Option<NearestPoly> {
        self.nearest
    }
}

impl PolyQuery for FindNearestPolyQuery {
    fn process(&mut self, tile: &MeshTile, _polys: &[&Poly], refs: &[PolyRef]) {
        let climb = tile.walkable_climb();
        for &poly_ref in refs {
            let (closest, over_poly) = tile.closest_point_on_poly(decode_poly_index(poly_ref), self.center);
            let diff = self.center - closest;
            let d = if over_poly {
                let d = diff.y.abs() - climb;
                if d > 0.0 { d * d } else { 0.0 }
            } else {
                diff.length_squared()
            };

            if d < self.nearest_distance_sqr {
                self.nearest_distance_sqr = d;
                self.nearest = Some(NearestPoly {
                    poly_ref,
                    pos: closest,
                    over_poly,
                });
            }
        }
    }
}
