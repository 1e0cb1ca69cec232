//! Random point sampling on the mesh surface
//!
//! Sampling picks a polygon with probability proportional to its area by
//! reservoir sampling, then a uniform point inside it. The caller supplies
//! the random source as a closure returning values in `[0, 1)`.

use log::debug;
use navmesh_common::{Vec3, dist_pt_seg_sqr_2d, random_point_in_convex_poly, sqr, tri_area_2d};

use super::nav_mesh::{MeshTile, Poly, decode_poly_index};
use super::nav_mesh_query::{NavMeshQuery, portal_points};
use super::node_pool::NodeFlags;
use super::query_filter::QueryFilter;
use super::status::INVALID_INPUT;
use super::{PolyRef, QueryResult, Status};

/// Point picked by the random sampling queries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomPoint {
    pub poly_ref: PolyRef,
    /// Location on the polygon's detail surface
    pub pos: Vec3,
    /// Success, with the out of nodes bit when the circle search could not
    /// reach every polygon and the choice was made among fewer of them
    pub status: Status,
}

/// Area of a convex polygon on the xz-plane
fn poly_area(tile: &MeshTile, poly: &Poly) -> f32 {
    let (verts, nv) = tile.poly_verts(poly);
    (2..nv)
        .map(|j| tri_area_2d(verts[0], verts[j - 1], verts[j]).abs())
        .sum()
}

impl NavMeshQuery<'_> {
    /// Picks a random point anywhere on the mesh.
    ///
    /// A tile is chosen uniformly, then a polygon of that tile passing the
    /// filter weighted by area.
    pub fn find_random_point<F, R>(&self, filter: &F, mut rand: R) -> QueryResult<RandomPoint>
    where
        F: QueryFilter + ?Sized,
        R: FnMut() -> f32,
    {
        let mut chosen_tile = None;
        let mut tile_sum = 0.0;
        for tile in self.nav_mesh.tiles() {
            // Every tile has the same weight.
            let area = 1.0;
            tile_sum += area;
            if rand() * tile_sum <= area {
                chosen_tile = Some(tile);
            }
        }
        let tile = chosen_tile.ok_or(Status::FAILURE)?;

        let mut chosen = None;
        let mut area_sum = 0.0;
        for (i, poly) in tile.polys.iter().enumerate() {
            if poly.is_off_mesh_connection() {
                continue;
            }
            let poly_ref = tile.poly_ref(i);
            if !filter.pass_filter(poly_ref, tile, poly) {
                continue;
            }

            let area = poly_area(tile, poly);
            area_sum += area;
            if rand() * area_sum <= area {
                chosen = Some(poly_ref);
            }
        }
        let poly_ref = chosen.ok_or(Status::FAILURE)?;

        self.random_point_in_poly(poly_ref, &mut rand, Status::SUCCESS)
    }

    /// Picks a random point on the polygons reachable from `start_ref`
    /// through portals within `max_radius` of `center`.
    ///
    /// The point is not clamped to the circle: polygons crossing the
    /// boundary contribute their whole area.
    pub fn find_random_point_around_circle<F, R>(
        &mut self,
        start_ref: PolyRef,
        center: Vec3,
        max_radius: f32,
        filter: &F,
        mut rand: R,
    ) -> QueryResult<RandomPoint>
    where
        F: QueryFilter + ?Sized,
        R: FnMut() -> f32,
    {
        if !center.is_finite() || !max_radius.is_finite() || max_radius < 0.0 {
            return Err(INVALID_INPUT);
        }
        let start = self.handle(start_ref)?;
        if !filter.pass_filter(start_ref, start.tile, start.poly) {
            return Err(INVALID_INPUT);
        }

        self.reset_main_pool();
        let start_idx = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(Status::OUT_OF_NODES))?;
        let node = self.node_pool.node_mut(start_idx);
        node.pos = center;
        node.flags = NodeFlags::OPEN;
        self.open_list.push(&mut self.node_pool, start_idx);

        let radius_sqr = sqr(max_radius);
        let mut area_sum = 0.0;
        let mut chosen = None;
        let mut status = Status::SUCCESS;

        while let Some(best) = self.open_list.pop(&mut self.node_pool) {
            let best_node = self.node_pool.node_mut(best);
            best_node.flags.remove(NodeFlags::OPEN);
            best_node.flags.insert(NodeFlags::CLOSED);
            let (best_ref, best_pos, best_total, parent) =
                (best_node.poly_ref, best_node.pos, best_node.total, best_node.parent);

            let cur = self.handle(best_ref)?;
            if !cur.poly.is_off_mesh_connection() {
                let area = poly_area(cur.tile, cur.poly);
                area_sum += area;
                if rand() * area_sum <= area {
                    chosen = Some(best_ref);
                }
            }

            let parent_ref = parent.map_or(PolyRef::NULL, |p| self.node_pool.node(p).poly_ref);

            for link in cur.tile.links_of(cur.poly) {
                let nei_ref = link.reference;
                if !nei_ref.is_valid() || nei_ref == parent_ref {
                    continue;
                }
                let Ok(nei) = self.handle(nei_ref) else {
                    continue;
                };
                if !filter.pass_filter(nei_ref, nei.tile, nei.poly) {
                    continue;
                }

                let Ok((left, right)) = portal_points(cur, nei) else {
                    continue;
                };
                if dist_pt_seg_sqr_2d(center, left, right).0 > radius_sqr {
                    continue;
                }

                let Some(nei_idx) = self.node_pool.get_node(nei_ref, 0) else {
                    status |= Status::OUT_OF_NODES;
                    continue;
                };
                let node = self.node_pool.node_mut(nei_idx);
                if node.is_closed() {
                    continue;
                }
                if node.flags.is_empty() {
                    node.pos = (left + right) * 0.5;
                }

                let total = best_total + best_pos.distance(node.pos);
                if node.is_open() && total >= node.total {
                    continue;
                }
                node.parent = Some(best);
                node.cost = total;
                node.total = total;

                if node.is_open() {
                    self.open_list.modify(&mut self.node_pool, nei_idx);
                } else {
                    node.flags = NodeFlags::OPEN;
                    self.open_list.push(&mut self.node_pool, nei_idx);
                }
            }
        }

        if status.is_out_of_nodes() {
            debug!("find_random_point_around_circle: ran out of search nodes");
        }
        let poly_ref = chosen.ok_or(Status::FAILURE)?;
        self.random_point_in_poly(poly_ref, &mut rand, status)
    }

    fn random_point_in_poly<R: FnMut() -> f32>(
        &self,
        poly_ref: PolyRef,
        rand: &mut R,
        status: Status,
    ) -> QueryResult<RandomPoint> {
        let h = self.handle(poly_ref)?;
        let (verts, nv) = h.tile.poly_verts(h.poly);
        let s = rand();
        let t = rand();
        let pt = random_point_in_convex_poly(&verts[..nv], s, t);

        // Snap to the detail surface.
        let (pos, _) = h.tile.closest_point_on_poly(decode_poly_index(poly_ref), pt);
        Ok(RandomPoint { poly_ref, pos, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{
        create_disconnected_mesh, create_grid_mesh, create_uneven_mesh, lcg, poly_ref_at,
    };
    use crate::{DefaultQueryFilter, PolyFlags, Result};

    const DRAWS: usize = 10_000;

    /// Deterministic generator cycling through fixed values
    fn sequence(values: &[f32]) -> impl FnMut() -> f32 + '_ {
        let mut i = 0;
        move || {
            let v = values[i % values.len()];
            i += 1;
            v
        }
    }

    #[test]
    fn test_random_point_lies_in_returned_polygon() -> Result<()> {
        let nav_mesh = create_grid_mesh(3, 3)?;
        let query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let filter = DefaultQueryFilter::new();
        let values = [0.1, 0.7, 0.35, 0.9, 0.05, 0.5, 0.65];

        for k in 0..values.len() {
            let sample = query
                .find_random_point(&filter, sequence(&values[k..]))
                .expect("random point");
            assert_eq!(sample.status, Status::SUCCESS);
            assert!(query.is_valid_poly_ref(sample.poly_ref, &filter));
            let height = query.get_poly_height(sample.poly_ref, sample.pos).expect("height");
            assert_eq!(height, Some(0.0), "{:?} not on {}", sample.pos, sample.poly_ref);
        }
        Ok(())
    }

    #[test]
    fn test_random_point_respects_filter() -> Result<()> {
        let nav_mesh = create_grid_mesh(2, 1)?;
        let query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let mut filter = DefaultQueryFilter::new();
        filter.include_flags = PolyFlags::SWIM;

        assert_eq!(query.find_random_point(&filter, || 0.5), Err(Status::FAILURE));
        Ok(())
    }

    #[test]
    fn test_polygon_choice_is_weighted_by_area() -> Result<()> {
        // Polygon 0 covers one unit square, polygon 1 three.
        let nav_mesh = create_uneven_mesh()?;
        let query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let filter = DefaultQueryFilter::new();
        let large = poly_ref_at(&nav_mesh, 0, 0, 1);

        let mut rand = lcg(7);
        let mut large_hits = 0;
        let mut x_sum = 0.0;
        for _ in 0..DRAWS {
            let sample = query.find_random_point(&filter, &mut rand).expect("random point");
            if sample.poly_ref == large {
                large_hits += 1;
            }
            x_sum += sample.pos.x;
        }

        let ratio = large_hits as f32 / DRAWS as f32;
        assert!((ratio - 0.75).abs() < 0.02, "large polygon picked {ratio} of the time");
        // Uniform over the whole strip puts the mean at its middle.
        let mean_x = x_sum / DRAWS as f32;
        assert!((mean_x - 2.0).abs() < 0.05, "mean x {mean_x}");
        Ok(())
    }

    #[test]
    fn test_circle_choice_is_weighted_by_area() -> Result<()> {
        let nav_mesh = create_uneven_mesh()?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let filter = DefaultQueryFilter::new();
        let (small, large) = (poly_ref_at(&nav_mesh, 0, 0, 0), poly_ref_at(&nav_mesh, 0, 0, 1));

        let mut rand = lcg(11);
        let mut large_hits = 0;
        for _ in 0..DRAWS {
            let sample = query
                .find_random_point_around_circle(small, Vec3::new(0.5, 0.0, 0.5), 2.0, &filter, &mut rand)
                .expect("random point");
            assert_eq!(sample.status, Status::SUCCESS);
            if sample.poly_ref == large {
                large_hits += 1;
            }
        }

        let ratio = large_hits as f32 / DRAWS as f32;
        assert!((ratio - 0.75).abs() < 0.02, "large polygon picked {ratio} of the time");
        Ok(())
    }

    #[test]
    fn test_starved_circle_sampling_is_flagged() -> Result<()> {
        let nav_mesh = create_uneven_mesh()?;
        let mut query = NavMeshQuery::new(&nav_mesh, 1).expect("query");
        let start = poly_ref_at(&nav_mesh, 0, 0, 0);

        let sample = query
            .find_random_point_around_circle(start, Vec3::new(0.5, 0.0, 0.5), 2.0, &DefaultQueryFilter::new(), || 0.5)
            .expect("random point");
        assert_eq!(sample.poly_ref, start);
        assert!(sample.status.is_success());
        assert!(sample.status.is_out_of_nodes());
        Ok(())
    }

    #[test]
    fn test_random_point_around_circle_stays_connected() -> Result<()> {
        let nav_mesh = create_disconnected_mesh()?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let filter = DefaultQueryFilter::new();
        let start = poly_ref_at(&nav_mesh, 0, 0, 0);

        for v in [0.0, 0.3, 0.6, 0.99] {
            let sample = query
                .find_random_point_around_circle(start, Vec3::new(0.5, 0.0, 0.5), 10.0, &filter, || v)
                .expect("random point");
            assert_eq!(sample.poly_ref, start);
            assert!((0.0..=1.0).contains(&sample.pos.x));
        }

        let mut excluding = DefaultQueryFilter::new();
        excluding.exclude_flags = PolyFlags::WALK;
        assert!(
            query
                .find_random_point_around_circle(start, Vec3::new(0.5, 0.0, 0.5), 1.0, &excluding, || 0.5)
                .is_err()
        );
        Ok(())
    }
}
