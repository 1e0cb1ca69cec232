//! Navigation mesh query engine
//!
//! [`NavMeshQuery`] borrows a [`NavMesh`] and owns the search memory: a node
//! pool and open list sized once at construction, plus a small node pool
//! for bounded local searches. Every search clears the memory it uses
//! instead of reallocating it.
//!
//! The one-shot A* search, path reconstruction and spatial lookups live
//! here. Sliced pathfinding, string pulling, raycasts and the local surface
//! queries extend `NavMeshQuery` from their own modules.

use log::debug;
use navmesh_common::{Vec3, dist_pt_seg_sqr_2d, distance_pt_poly_edges_sqr, next_pow2};

use super::nav_mesh::{MeshTile, NavMesh, decode_poly_index};
use super::node_pool::{NodeFlags, NodeIndex, NodePool, NodeQueue};
use super::poly_query::{CollectPolysQuery, FindNearestPolyQuery, PolyQuery};
use super::query_filter::{PolyHandle, QueryFilter};
use super::sliced_pathfinding::SlicedQuery;
use super::status::INVALID_INPUT;
use super::{MAX_VERTS_PER_POLY, PolyRef, QueryResult, SIDE_NONE, Status};

/// Scale applied to the straight line distance heuristic
pub(crate) const H_SCALE: f32 = 0.999;

/// Node capacity of the pool used by bounded local searches
const TINY_POOL_SIZE: usize = 64;

/// Number of polygons handed to a [`PolyQuery`] per call
const POLY_QUERY_BATCH: usize = 32;

/// Polygon corridor produced by a path search
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    /// Polygons from start to end
    pub path: Vec<PolyRef>,
    /// Success, possibly with partial result, out of nodes or buffer too
    /// small detail bits
    pub status: Status,
}

/// Polygon found by [`NavMeshQuery::find_nearest_poly`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPoly {
    pub poly_ref: PolyRef,
    /// Closest point on the polygon
    pub pos: Vec3,
    /// The query point lies over the polygon on the xz-plane
    pub over_poly: bool,
}

/// Search engine over a navigation mesh
pub struct NavMeshQuery<'a> {
    pub(crate) nav_mesh: &'a NavMesh,
    pub(crate) node_pool: NodePool,
    pub(crate) tiny_node_pool: NodePool,
    pub(crate) open_list: NodeQueue,
    pub(crate) sliced: Option<SlicedQuery<'a>>,
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a query engine with room for `max_nodes` search nodes
    /// (1..=65535).
    pub fn new(nav_mesh: &'a NavMesh, max_nodes: usize) -> QueryResult<Self> {
        if max_nodes == 0 || max_nodes > u16::MAX as usize {
            return Err(INVALID_INPUT);
        }

        let hash_size = next_pow2((max_nodes / 4) as u32) as usize;
        Ok(Self {
            nav_mesh,
            node_pool: NodePool::new(max_nodes, hash_size.max(1)),
            tiny_node_pool: NodePool::new(TINY_POOL_SIZE, 32),
            open_list: NodeQueue::new(max_nodes),
            sliced: None,
        })
    }

    pub fn nav_mesh(&self) -> &'a NavMesh {
        self.nav_mesh
    }

    /// Nodes of the last search that used the main pool
    pub fn node_pool(&self) -> &NodePool {
        &self.node_pool
    }

    pub(crate) fn handle(&self, poly_ref: PolyRef) -> QueryResult<PolyHandle<'a>> {
        let nav_mesh: &'a NavMesh = self.nav_mesh;
        let (tile, poly) = nav_mesh.get_tile_and_poly_by_ref(poly_ref)?;
        Ok(PolyHandle { poly_ref, tile, poly })
    }

    /// Starts a search on the main pool. Any sliced search in flight is
    /// abandoned since its nodes are about to be overwritten.
    pub(crate) fn reset_main_pool(&mut self) {
        self.sliced = None;
        self.node_pool.clear();
        self.open_list.clear();
    }

    /// Returns true if the reference resolves and passes the filter
    pub fn is_valid_poly_ref<F: QueryFilter + ?Sized>(&self, poly_ref: PolyRef, filter: &F) -> bool {
        self.handle(poly_ref)
            .is_ok_and(|h| filter.pass_filter(poly_ref, h.tile, h.poly))
    }

    /// Returns true if the polygon was expanded by the last search on the
    /// main pool
    pub fn is_in_closed_list(&self, poly_ref: PolyRef) -> bool {
        self.node_pool
            .find_nodes(poly_ref)
            .into_iter()
            .any(|idx| self.node_pool.node(idx).is_closed())
    }

    /// Finds a polygon corridor from `start_ref` to `end_ref` with A*.
    ///
    /// If the end cannot be reached, the path leads to the explored polygon
    /// closest to `end_pos` and [`Status::PARTIAL_RESULT`] is set. Running
    /// out of nodes is flagged with [`Status::OUT_OF_NODES`] and does not
    /// stop the search.
    pub fn find_path<F: QueryFilter + ?Sized>(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &F,
        max_path: usize,
    ) -> QueryResult<PathResult> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || !self.nav_mesh.is_valid_poly_ref(end_ref)
            || !start_pos.is_finite()
            || !end_pos.is_finite()
            || max_path == 0
        {
            return Err(INVALID_INPUT);
        }

        self.reset_main_pool();

        if start_ref == end_ref {
            return Ok(PathResult {
                path: vec![start_ref],
                status: Status::SUCCESS,
            });
        }

        let start = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(Status::OUT_OF_NODES))?;
        let start_node = self.node_pool.node_mut(start);
        start_node.pos = start_pos;
        start_node.cost = 0.0;
        start_node.total = start_pos.distance(end_pos) * H_SCALE;
        start_node.flags = NodeFlags::OPEN;
        let mut last_best_cost = start_node.total;
        self.open_list.push(&mut self.node_pool, start);

        let mut last_best = start;
        let mut out_of_nodes = false;

        while let Some(best) = self.open_list.pop(&mut self.node_pool) {
            let best_node = self.node_pool.node_mut(best);
            best_node.flags.remove(NodeFlags::OPEN);
            best_node.flags.insert(NodeFlags::CLOSED);

            if best_node.poly_ref == end_ref {
                last_best = best;
                break;
            }

            let (best_ref, best_pos, best_cost, parent_idx) =
                (best_node.poly_ref, best_node.pos, best_node.cost, best_node.parent);
            let cur = self.handle(best_ref)?;
            let parent = match parent_idx {
                Some(p) => Some(self.handle(self.node_pool.node(p).poly_ref)?),
                None => None,
            };
            let parent_ref = parent.map_or(PolyRef::NULL, |p| p.poly_ref);

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

                // Tile border crossings get their own state so that the same
                // polygon can be reached through different sides.
                let cross_side = if link.side != SIDE_NONE { link.side >> 1 } else { 0 };
                let Some(nei_idx) = self.node_pool.get_node(nei_ref, cross_side) else {
                    out_of_nodes = true;
                    continue;
                };

                if self.node_pool.node(nei_idx).flags.is_empty() {
                    if let Ok(mid) = edge_mid_point(cur, nei) {
                        self.node_pool.node_mut(nei_idx).pos = mid;
                    }
                }
                let nei_pos = self.node_pool.node(nei_idx).pos;

                let (cost, heuristic) = if nei_ref == end_ref {
                    let cur_cost = filter.get_cost(best_pos, nei_pos, parent, cur, Some(nei));
                    let end_cost = filter.get_cost(nei_pos, end_pos, Some(cur), nei, None);
                    (best_cost + cur_cost + end_cost, 0.0)
                } else {
                    let cur_cost = filter.get_cost(best_pos, nei_pos, parent, cur, Some(nei));
                    (best_cost + cur_cost, nei_pos.distance(end_pos) * H_SCALE)
                };
                let total = cost + heuristic;

                let node = self.node_pool.node_mut(nei_idx);
                if (node.is_open() || node.is_closed()) && total >= node.total {
                    continue;
                }

                node.parent = Some(best);
                node.flags.remove(NodeFlags::CLOSED);
                node.cost = cost;
                node.total = total;

                if node.is_open() {
                    self.open_list.modify(&mut self.node_pool, nei_idx);
                } else {
                    node.flags.insert(NodeFlags::OPEN);
                    self.open_list.push(&mut self.node_pool, nei_idx);
                }

                if heuristic < last_best_cost {
                    last_best_cost = heuristic;
                    last_best = nei_idx;
                }
            }
        }

        let (path, mut status) = self.get_path_to_node(last_best, max_path);

        if self.node_pool.node(last_best).poly_ref != end_ref {
            debug!("find_path: end {} not reached, returning partial path", end_ref);
            status |= Status::PARTIAL_RESULT;
        }
        if out_of_nodes {
            debug!("find_path: ran out of search nodes");
            status |= Status::OUT_OF_NODES;
        }

        Ok(PathResult { path, status })
    }

    /// Walks parent links from `end` back to the root. When the chain is
    /// longer than `max_path`, the polygons nearest the root are dropped.
    pub(crate) fn get_path_to_node(&self, end: NodeIndex, max_path: usize) -> (Vec<PolyRef>, Status) {
        let mut path = Vec::new();
        let mut cur = Some(end);
        while let Some(idx) = cur {
            // A longer chain would contain a cycle.
            if path.len() > self.node_pool.node_count() {
                break;
            }
            let node = self.node_pool.node(idx);
            path.push(node.poly_ref);
            cur = node.parent;
        }
        path.reverse();

        let mut status = Status::SUCCESS;
        if path.len() > max_path {
            path.drain(..path.len() - max_path);
            status |= Status::BUFFER_TOO_SMALL;
        }
        (path, status)
    }

    /// Reads the path to `end_ref` out of the last Dijkstra style search
    /// (circle or shape exploration). The polygon must have been expanded.
    pub fn get_path_from_dijkstra_search(&self, end_ref: PolyRef, max_path: usize) -> QueryResult<PathResult> {
        if !self.nav_mesh.is_valid_poly_ref(end_ref) || max_path == 0 {
            return Err(INVALID_INPUT);
        }

        let end = self
            .node_pool
            .find_nodes(end_ref)
            .first()
            .copied()
            .filter(|&idx| self.node_pool.node(idx).is_closed())
            .ok_or(INVALID_INPUT)?;

        let (path, status) = self.get_path_to_node(end, max_path);
        Ok(PathResult { path, status })
    }

    /// Left and right end points of the portal from `from_ref` to `to_ref`
    pub fn get_portal_points(&self, from_ref: PolyRef, to_ref: PolyRef) -> QueryResult<(Vec3, Vec3)> {
        portal_points(self.handle(from_ref)?, self.handle(to_ref)?)
    }

    /// Mid point of the portal from `from_ref` to `to_ref`
    pub fn get_edge_mid_point(&self, from_ref: PolyRef, to_ref: PolyRef) -> QueryResult<Vec3> {
        edge_mid_point(self.handle(from_ref)?, self.handle(to_ref)?)
    }

    /// Closest point on the polygon to `pos`, with the detail height when
    /// `pos` lies over it. The flag reports whether it does.
    pub fn closest_point_on_poly(&self, poly_ref: PolyRef, pos: Vec3) -> QueryResult<(Vec3, bool)> {
        if !pos.is_finite() {
            return Err(INVALID_INPUT);
        }
        let h = self.handle(poly_ref)?;
        Ok(h.tile.closest_point_on_poly(decode_poly_index(poly_ref), pos))
    }

    /// `pos` itself if it lies inside the polygon on the xz-plane, otherwise
    /// the closest point on the polygon boundary. Ignores the detail mesh.
    pub fn closest_point_on_poly_boundary(&self, poly_ref: PolyRef, pos: Vec3) -> QueryResult<Vec3> {
        if !pos.is_finite() {
            return Err(INVALID_INPUT);
        }
        let h = self.handle(poly_ref)?;
        let (verts, nv) = h.tile.poly_verts(h.poly);
        let verts = &verts[..nv];

        let mut edge_dist = [0.0; MAX_VERTS_PER_POLY];
        let mut edge_t = [0.0; MAX_VERTS_PER_POLY];
        if nv >= 3 && distance_pt_poly_edges_sqr(pos, verts, &mut edge_dist, &mut edge_t) {
            return Ok(pos);
        }

        if nv < 3 {
            // Off-mesh connection: clamp onto the segment.
            let (_, t) = dist_pt_seg_sqr_2d(pos, verts[0], verts[1]);
            return Ok(verts[0].lerp(verts[1], t));
        }

        let imin = edge_dist[..nv]
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0, |(i, _)| i);
        Ok(verts[imin].lerp(verts[(imin + 1) % nv], edge_t[imin]))
    }

    /// Detail surface height of a ground polygon at the xz-location of `pos`.
    ///
    /// `None` when the location is outside the polygon or the polygon is an
    /// off-mesh connection, which has no surface.
    pub fn get_poly_height(&self, poly_ref: PolyRef, pos: Vec3) -> QueryResult<Option<f32>> {
        if !pos.is_finite() {
            return Err(INVALID_INPUT);
        }
        let h = self.handle(poly_ref)?;
        Ok(h.tile.poly_height(decode_poly_index(poly_ref), pos))
    }

    /// Nearest polygon to `center` inside the query box
    pub fn find_nearest_poly<F: QueryFilter + ?Sized>(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &F,
    ) -> QueryResult<Option<NearestPoly>> {
        let mut query = FindNearestPolyQuery::new(center);
        self.query_polygons_with(center, half_extents, filter, &mut query)?;
        Ok(query.nearest())
    }

    /// Polygons whose bounds overlap the query box, up to `max_polys`
    pub fn query_polygons<F: QueryFilter + ?Sized>(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &F,
        max_polys: usize,
    ) -> QueryResult<(Vec<PolyRef>, Status)> {
        if max_polys == 0 {
            return Err(INVALID_INPUT);
        }
        let mut query = CollectPolysQuery::new(max_polys);
        self.query_polygons_with(center, half_extents, filter, &mut query)?;

        let status = if query.overflow() {
            Status::SUCCESS | Status::BUFFER_TOO_SMALL
        } else {
            Status::SUCCESS
        };
        Ok((query.into_polys(), status))
    }

    /// Feeds every polygon overlapping the query box and passing the filter
    /// to `query`, in batches per tile
    pub fn query_polygons_with<F, Q>(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &F,
        query: &mut Q,
    ) -> QueryResult<()>
    where
        F: QueryFilter + ?Sized,
        Q: PolyQuery + ?Sized,
    {
        if !center.is_finite() || !half_extents.is_finite() || half_extents.min_element() < 0.0 {
            return Err(INVALID_INPUT);
        }

        let bmin = center - half_extents;
        let bmax = center + half_extents;
        let (minx, miny) = self.nav_mesh.calc_tile_loc(bmin);
        let (maxx, maxy) = self.nav_mesh.calc_tile_loc(bmax);

        for y in miny..=maxy {
            for x in minx..=maxx {
                for tile in self.nav_mesh.get_tiles_at(x, y) {
                    query_polygons_in_tile(tile, bmin, bmax, filter, query);
                }
            }
        }
        Ok(())
    }
}

fn query_polygons_in_tile<F, Q>(tile: &MeshTile, qmin: Vec3, qmax: Vec3, filter: &F, query: &mut Q)
where
    F: QueryFilter + ?Sized,
    Q: PolyQuery + ?Sized,
{
    let mut refs = Vec::with_capacity(POLY_QUERY_BATCH);
    let mut polys = Vec::with_capacity(POLY_QUERY_BATCH);

    tile.query_polygons(qmin, qmax, |poly_ref, i| {
        let poly = &tile.polys[i];
        if !filter.pass_filter(poly_ref, tile, poly) {
            return;
        }
        refs.push(poly_ref);
        polys.push(poly);
        if refs.len() == POLY_QUERY_BATCH {
            query.process(tile, &polys, &refs);
            refs.clear();
            polys.clear();
        }
    });

    if !refs.is_empty() {
        query.process(tile, &polys, &refs);
    }
}

/// Portal end points between two linked polygons.
///
/// Off-mesh connections have a zero width portal at the end point that
/// touches the other polygon. Tile border links may cover only part of the
/// edge; the portal is narrowed to that part.
pub(crate) fn portal_points(from: PolyHandle<'_>, to: PolyHandle<'_>) -> QueryResult<(Vec3, Vec3)> {
    let link = from
        .tile
        .links_of(from.poly)
        .find(|l| l.reference == to.poly_ref)
        .ok_or(INVALID_INPUT)?;

    if from.poly.is_off_mesh_connection() {
        let v = from.tile.verts[from.poly.verts[link.edge as usize] as usize];
        return Ok((v, v));
    }

    if to.poly.is_off_mesh_connection() {
        let back = to
            .tile
            .links_of(to.poly)
            .find(|l| l.reference == from.poly_ref)
            .ok_or(INVALID_INPUT)?;
        let v = to.tile.verts[to.poly.verts[back.edge as usize] as usize];
        return Ok((v, v));
    }

    let nv = from.poly.vert_count as usize;
    let edge = link.edge as usize;
    let v0 = from.tile.verts[from.poly.verts[edge] as usize];
    let v1 = from.tile.verts[from.poly.verts[(edge + 1) % nv] as usize];

    if link.side != SIDE_NONE && (link.bmin != 0 || link.bmax != 255) {
        let s = 1.0 / 255.0;
        return Ok((
            v0.lerp(v1, link.bmin as f32 * s),
            v0.lerp(v1, link.bmax as f32 * s),
        ));
    }

    Ok((v0, v1))
}

pub(crate) fn edge_mid_point(from: PolyHandle<'_>, to: PolyHandle<'_>) -> QueryResult<Vec3> {
    let (left, right) = portal_points(from, to)?;
    Ok((left + right) * 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{create_grid_mesh, create_off_mesh_mesh, poly_ref_at};
    use crate::{DefaultQueryFilter, PolyFlags, Result};
    use approx::assert_relative_eq;

    #[test]
    fn test_new_validates_node_count() -> Result<()> {
        let nav_mesh = create_grid_mesh(1, 1)?;
        assert!(NavMeshQuery::new(&nav_mesh, 0).is_err_and(|s| s.is_invalid_param()));
        assert!(NavMeshQuery::new(&nav_mesh, 70_000).is_err());
        assert!(NavMeshQuery::new(&nav_mesh, 1).is_ok());
        assert!(NavMeshQuery::new(&nav_mesh, 65_535).is_ok());
        Ok(())
    }

    #[test]
    fn test_find_path_rejects_invalid_refs() -> Result<()> {
        let nav_mesh = create_grid_mesh(2, 1)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let filter = DefaultQueryFilter::new();
        let start = poly_ref_at(&nav_mesh, 0, 0, 0);

        let err = query
            .find_path(start, PolyRef::NULL, Vec3::ZERO, Vec3::ZERO, &filter, 8)
            .expect_err("null end");
        assert!(err.is_failure() && err.is_invalid_param());

        let stale = PolyRef::new(start.id() + 40);
        assert!(query.find_path(start, stale, Vec3::ZERO, Vec3::ZERO, &filter, 8).is_err());
        assert!(query.find_path(start, start, Vec3::ZERO, Vec3::ZERO, &filter, 0).is_err());
        Ok(())
    }

    #[test]
    fn test_find_path_same_polygon() -> Result<()> {
        let nav_mesh = create_grid_mesh(2, 1)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let start = poly_ref_at(&nav_mesh, 0, 0, 0);
        let result = query
            .find_path(
                start,
                start,
                Vec3::new(0.2, 0.0, 0.2),
                Vec3::new(0.8, 0.0, 0.8),
                &DefaultQueryFilter::new(),
                8,
            )
            .expect("path");
        assert_eq!(result.path, vec![start]);
        assert_eq!(result.status, Status::SUCCESS);
        Ok(())
    }

    #[test]
    fn test_closed_list_and_dijkstra_path() -> Result<()> {
        let nav_mesh = create_grid_mesh(3, 1)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let filter = DefaultQueryFilter::new();
        let refs: Vec<PolyRef> = (0..3).map(|i| poly_ref_at(&nav_mesh, 0, 0, i)).collect();

        let around = query
            .find_polys_around_circle(refs[0], Vec3::new(0.5, 0.0, 0.5), 5.0, &filter, 16)
            .expect("explore");
        assert_eq!(around.polys.len(), 3);
        assert!(refs.iter().all(|&r| query.is_in_closed_list(r)));

        let path = query.get_path_from_dijkstra_search(refs[2], 8).expect("path");
        assert_eq!(path.path, refs);

        let short = query.get_path_from_dijkstra_search(refs[2], 2).expect("path");
        assert_eq!(short.path, refs[1..].to_vec());
        assert!(short.status.is_buffer_too_small());
        Ok(())
    }

    #[test]
    fn test_portal_and_mid_points() -> Result<()> {
        let nav_mesh = create_grid_mesh(2, 1)?;
        let query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let a = poly_ref_at(&nav_mesh, 0, 0, 0);
        let b = poly_ref_at(&nav_mesh, 0, 0, 1);

        let (left, right) = query.get_portal_points(a, b).expect("portal");
        assert_eq!(left, Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(right, Vec3::new(1.0, 0.0, 0.0));

        let mid = query.get_edge_mid_point(a, b).expect("mid");
        assert_eq!(mid, Vec3::new(1.0, 0.0, 0.5));

        // Not neighbours of each other.
        assert!(query.get_portal_points(a, a).is_err());
        Ok(())
    }

    #[test]
    fn test_off_mesh_portal_is_a_point() -> Result<()> {
        let nav_mesh = create_off_mesh_mesh(true)?;
        let query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let ground = poly_ref_at(&nav_mesh, 0, 0, 0);
        let con = poly_ref_at(&nav_mesh, 0, 0, 2);

        let (left, right) = query.get_portal_points(ground, con).expect("portal");
        assert_eq!(left, right);
        assert_relative_eq!(left.x, 0.5);

        let landing = poly_ref_at(&nav_mesh, 0, 0, 1);
        let (left, right) = query.get_portal_points(con, landing).expect("portal");
        assert_eq!(left, right);
        assert_relative_eq!(left.x, 2.5);
        Ok(())
    }

    #[test]
    fn test_closest_points_and_height() -> Result<()> {
        let nav_mesh = create_grid_mesh(2, 1)?;
        let query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let a = poly_ref_at(&nav_mesh, 0, 0, 0);

        let (p, over) = query.closest_point_on_poly(a, Vec3::new(0.5, 2.0, 0.5)).expect("closest");
        assert!(over);
        assert_eq!(p, Vec3::new(0.5, 0.0, 0.5));

        let (p, over) = query.closest_point_on_poly(a, Vec3::new(-1.0, 0.0, 0.5)).expect("closest");
        assert!(!over);
        assert_relative_eq!(p.x, 0.0);
        assert_relative_eq!(p.z, 0.5);

        let p = query
            .closest_point_on_poly_boundary(a, Vec3::new(0.5, 0.0, 3.0))
            .expect("boundary");
        assert_relative_eq!(p.x, 0.5);
        assert_relative_eq!(p.z, 1.0);
        let inside = Vec3::new(0.25, 0.7, 0.25);
        assert_eq!(query.closest_point_on_poly_boundary(a, inside).expect("boundary"), inside);

        assert_eq!(query.get_poly_height(a, Vec3::new(0.5, 5.0, 0.5)).expect("height"), Some(0.0));
        assert_eq!(query.get_poly_height(a, Vec3::new(1.5, 5.0, 0.5)).expect("height"), None);
        assert!(query.get_poly_height(PolyRef::NULL, Vec3::ZERO).is_err());
        Ok(())
    }

    #[test]
    fn test_find_nearest_poly() -> Result<()> {
        let nav_mesh = create_grid_mesh(3, 3)?;
        let query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let filter = DefaultQueryFilter::new();

        let nearest = query
            .find_nearest_poly(Vec3::new(1.5, 0.2, 1.5), Vec3::splat(0.5), &filter)
            .expect("query")
            .expect("found");
        assert_eq!(nearest.poly_ref, poly_ref_at(&nav_mesh, 0, 0, 4));
        assert!(nearest.over_poly);

        let none = query
            .find_nearest_poly(Vec3::new(10.0, 0.0, 10.0), Vec3::splat(0.5), &filter)
            .expect("query");
        assert!(none.is_none());

        assert!(query.find_nearest_poly(Vec3::ZERO, Vec3::splat(-1.0), &filter).is_err());
        Ok(())
    }

    #[test]
    fn test_query_polygons_capacity_and_filter() -> Result<()> {
        let nav_mesh = create_grid_mesh(3, 3)?;
        let query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let center = Vec3::new(1.5, 0.0, 1.5);
        let mut filter = DefaultQueryFilter::new();

        let (refs, status) = query.query_polygons(center, Vec3::new(2.0, 1.0, 2.0), &filter, 16).expect("query");
        assert_eq!(refs.len(), 9);
        assert_eq!(status, Status::SUCCESS);

        let (refs, status) = query.query_polygons(center, Vec3::new(2.0, 1.0, 2.0), &filter, 4).expect("query");
        assert_eq!(refs.len(), 4);
        assert!(status.is_buffer_too_small());

        filter.include_flags = PolyFlags::SWIM;
        let (refs, _) = query.query_polygons(center, Vec3::new(2.0, 1.0, 2.0), &filter, 16).expect("query");
        assert!(refs.is_empty());
        Ok(())
    }

    #[test]
    fn test_query_polygons_batches() -> Result<()> {
        struct Batches(Vec<usize>);
        impl PolyQuery for Batches {
            fn process(&mut self, _tile: &MeshTile, polys: &[&crate::Poly], refs: &[PolyRef]) {
                assert_eq!(polys.len(), refs.len());
                self.0.push(refs.len());
            }
        }

        let nav_mesh = create_grid_mesh(10, 5)?;
        let query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let mut batches = Batches(Vec::new());
        query
            .query_polygons_with(
                Vec3::new(5.0, 0.0, 2.5),
                Vec3::new(6.0, 1.0, 3.0),
                &DefaultQueryFilter::new(),
                &mut batches,
            )
            .expect("query");
        assert_eq!(batches.0, vec![32, 18]);
        Ok(())
    }
}
