//! Local surface queries
//!
//! Dijkstra style explorations around a point or shape, the distance to the
//! nearest wall, constrained movement along the surface and the wall
//! segments of a single polygon.

use std::collections::VecDeque;

use log::debug;
use navmesh_common::{
    Vec3, dist_pt_seg_sqr_2d, intersect_segment_poly_2d, overlap_poly_poly_2d, point_in_polygon, sqr,
};

use super::nav_mesh_query::{NavMeshQuery, edge_mid_point, portal_points};
use super::node_pool::{NodeFlags, NodeIndex, NodePool};
use super::query_filter::{PolyHandle, QueryFilter};
use super::status::INVALID_INPUT;
use super::{EXT_LINK, MAX_VERTS_PER_POLY, PolyRef, QueryResult, Status};

/// Queue length of the bounded breadth-first searches
const MAX_STACK: usize = 48;

/// Neighbours considered per edge by [`NavMeshQuery::move_along_surface`]
const MAX_NEIS: usize = 8;

/// Interval slots per edge in [`NavMeshQuery::get_poly_wall_segments`]
const MAX_INTERVAL: usize = 16;

/// Polygon reached by an exploration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisitedPoly {
    pub poly_ref: PolyRef,
    /// Polygon it was reached from, [`PolyRef::NULL`] for the start
    pub parent: PolyRef,
    /// Accumulated cost from the start
    pub cost: f32,
}

/// Polygons found by an exploration
#[derive(Debug, Clone, PartialEq)]
pub struct PolysAround {
    pub polys: Vec<VisitedPoly>,
    /// Success, possibly with buffer too small or out of nodes bits
    pub status: Status,
}

/// Nearest wall found by [`NavMeshQuery::find_distance_to_wall`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallHit {
    /// Distance to the wall, the search radius if none was found
    pub distance: f32,
    /// Closest point on the wall, the search center if none was found
    pub hit_pos: Vec3,
    /// Direction from the wall towards the center, zero if none was found
    pub hit_normal: Vec3,
    /// Success, with the out of nodes bit when the search was cut short. The
    /// distance is then only an upper bound.
    pub status: Status,
}

/// Result of [`NavMeshQuery::move_along_surface`]
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceMove {
    /// Reached position
    pub pos: Vec3,
    /// Polygons from the start to the polygon containing `pos`
    pub visited: Vec<PolyRef>,
    pub status: Status,
}

/// Edge segment of a polygon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallSegment {
    pub start: Vec3,
    pub end: Vec3,
    /// Polygon on the other side for portal segments, [`PolyRef::NULL`]
    /// for walls
    pub neighbour: PolyRef,
}

/// Result of [`NavMeshQuery::get_poly_wall_segments`]
#[derive(Debug, Clone, PartialEq)]
pub struct WallSegments {
    pub segments: Vec<WallSegment>,
    pub status: Status,
}

/// How an exploration decides whether a portal is inside the searched area
enum SearchArea<'s> {
    Circle { center: Vec3, radius_sqr: f32 },
    Shape { verts: &'s [Vec3] },
}

impl SearchArea<'_> {
    fn contains_portal(&self, left: Vec3, right: Vec3) -> bool {
        match *self {
            SearchArea::Circle { center, radius_sqr } => dist_pt_seg_sqr_2d(center, left, right).0 <= radius_sqr,
            SearchArea::Shape { verts } => match intersect_segment_poly_2d(left, right, verts) {
                Some(hit) => hit.tmin <= 1.0 && hit.tmax >= 0.0,
                None => false,
            },
        }
    }
}

impl<'a> NavMeshQuery<'a> {
    /// Finds the polygons reachable from `start_ref` whose portals touch the
    /// circle, ordered by cost from the center.
    pub fn find_polys_around_circle<F: QueryFilter + ?Sized>(
        &mut self,
        start_ref: PolyRef,
        center: Vec3,
        radius: f32,
        filter: &F,
        max_result: usize,
    ) -> QueryResult<PolysAround> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || !center.is_finite()
            || !radius.is_finite()
            || radius < 0.0
            || max_result == 0
        {
            return Err(INVALID_INPUT);
        }

        let area = SearchArea::Circle {
            center,
            radius_sqr: sqr(radius),
        };
        self.explore(start_ref, center, &area, filter, max_result)
    }

    /// Finds the polygons reachable from `start_ref` whose portals touch the
    /// convex shape, ordered by cost from the shape's center.
    pub fn find_polys_around_shape<F: QueryFilter + ?Sized>(
        &mut self,
        start_ref: PolyRef,
        verts: &[Vec3],
        filter: &F,
        max_result: usize,
    ) -> QueryResult<PolysAround> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || verts.len() < 3
            || verts.iter().any(|v| !v.is_finite())
            || max_result == 0
        {
            return Err(INVALID_INPUT);
        }

        let center = verts.iter().copied().sum::<Vec3>() / verts.len() as f32;
        self.explore(start_ref, center, &SearchArea::Shape { verts }, filter, max_result)
    }

    fn explore<F: QueryFilter + ?Sized>(
        &mut self,
        start_ref: PolyRef,
        center: Vec3,
        area: &SearchArea<'_>,
        filter: &F,
        max_result: usize,
    ) -> QueryResult<PolysAround> {
        self.reset_main_pool();
        let start = self.seed_main_pool(start_ref, center)?;
        self.open_list.push(&mut self.node_pool, start);

        let mut polys = Vec::new();
        let mut status = Status::SUCCESS;

        while let Some(best) = self.open_list.pop(&mut self.node_pool) {
            let (best_ref, best_pos, best_total, parent) = self.close_node(best);
            let cur = self.handle(best_ref)?;
            let parent = match parent {
                Some(p) => Some(self.handle(self.node_pool.node(p).poly_ref)?),
                None => None,
            };
            let parent_ref = parent.map_or(PolyRef::NULL, |p| p.poly_ref);

            if polys.len() < max_result {
                polys.push(VisitedPoly {
                    poly_ref: best_ref,
                    parent: parent_ref,
                    cost: best_total,
                });
            } else {
                status |= Status::BUFFER_TOO_SMALL;
            }

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
                if !area.contains_portal(left, right) {
                    continue;
                }

                let Some(nei_idx) = self.node_pool.get_node(nei_ref, 0) else {
                    status |= Status::OUT_OF_NODES;
                    continue;
                };
                if self.node_pool.node(nei_idx).is_closed() {
                    continue;
                }
                if self.node_pool.node(nei_idx).flags.is_empty() {
                    self.node_pool.node_mut(nei_idx).pos = (left + right) * 0.5;
                }

                let nei_pos = self.node_pool.node(nei_idx).pos;
                let total = best_total + filter.get_cost(best_pos, nei_pos, parent, cur, Some(nei));
                self.relax(nei_idx, best, total);
            }
        }

        if status.is_out_of_nodes() {
            debug!("polygon exploration ran out of search nodes");
        }
        Ok(PolysAround { polys, status })
    }

    /// Seeds the main pool with the start node of a Dijkstra search
    fn seed_main_pool(&mut self, start_ref: PolyRef, pos: Vec3) -> QueryResult<NodeIndex> {
        let start = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(Status::OUT_OF_NODES))?;
        let node = self.node_pool.node_mut(start);
        node.pos = pos;
        node.cost = 0.0;
        node.total = 0.0;
        node.parent = None;
        node.flags = NodeFlags::OPEN;
        Ok(start)
    }

    /// Marks a popped node closed and returns its ref, position, total cost
    /// and parent
    fn close_node(&mut self, idx: NodeIndex) -> (PolyRef, Vec3, f32, Option<NodeIndex>) {
        let node = self.node_pool.node_mut(idx);
        node.flags.remove(NodeFlags::OPEN);
        node.flags.insert(NodeFlags::CLOSED);
        (node.poly_ref, node.pos, node.total, node.parent)
    }

    /// Queues `idx` with the given cost unless it is already queued cheaper
    fn relax(&mut self, idx: NodeIndex, parent: NodeIndex, total: f32) {
        let node = self.node_pool.node_mut(idx);
        if node.is_open() && total >= node.total {
            return;
        }

        node.parent = Some(parent);
        node.cost = total;
        node.total = total;

        if node.is_open() {
            self.open_list.modify(&mut self.node_pool, idx);
        } else {
            node.flags = NodeFlags::OPEN;
            self.open_list.push(&mut self.node_pool, idx);
        }
    }

    /// Collects the non-overlapping polygons around `center` within
    /// `radius`.
    ///
    /// A polygon that overlaps an already collected polygon it is not
    /// connected to is skipped, so the result is a simple patch of surface
    /// even where tile layers stack. Costs are not tracked and reported as 0.
    pub fn find_local_neighbourhood<F: QueryFilter + ?Sized>(
        &mut self,
        start_ref: PolyRef,
        center: Vec3,
        radius: f32,
        filter: &F,
        max_result: usize,
    ) -> QueryResult<PolysAround> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || !center.is_finite()
            || !radius.is_finite()
            || radius < 0.0
            || max_result == 0
        {
            return Err(INVALID_INPUT);
        }

        self.tiny_node_pool.clear();
        let start = self
            .tiny_node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(Status::OUT_OF_NODES))?;
        self.tiny_node_pool.node_mut(start).flags = NodeFlags::CLOSED;

        let radius_sqr = sqr(radius);
        let mut stack = VecDeque::with_capacity(MAX_STACK);
        stack.push_back(start);

        let mut polys = vec![VisitedPoly {
            poly_ref: start_ref,
            parent: PolyRef::NULL,
            cost: 0.0,
        }];
        let mut status = Status::SUCCESS;

        while let Some(cur_idx) = stack.pop_front() {
            let cur_ref = self.tiny_node_pool.node(cur_idx).poly_ref;
            let cur = self.handle(cur_ref)?;

            for link in cur.tile.links_of(cur.poly) {
                let nei_ref = link.reference;
                if !nei_ref.is_valid() {
                    continue;
                }
                let Some(nei_idx) = self.tiny_node_pool.get_node(nei_ref, 0) else {
                    continue;
                };
                if self.tiny_node_pool.node(nei_idx).is_closed() {
                    continue;
                }

                let Ok(nei) = self.handle(nei_ref) else {
                    continue;
                };
                if nei.poly.is_off_mesh_connection() || !filter.pass_filter(nei_ref, nei.tile, nei.poly) {
                    continue;
                }

                let Ok((left, right)) = portal_points(cur, nei) else {
                    continue;
                };
                if dist_pt_seg_sqr_2d(center, left, right).0 > radius_sqr {
                    continue;
                }

                let node = self.tiny_node_pool.node_mut(nei_idx);
                node.flags.insert(NodeFlags::CLOSED);
                node.parent = Some(cur_idx);

                if self.overlaps_collected(cur, nei, &polys) {
                    continue;
                }

                if polys.len() < max_result {
                    polys.push(VisitedPoly {
                        poly_ref: nei_ref,
                        parent: cur_ref,
                        cost: 0.0,
                    });
                } else {
                    status |= Status::BUFFER_TOO_SMALL;
                }

                if stack.len() < MAX_STACK {
                    stack.push_back(nei_idx);
                }
            }
        }

        Ok(PolysAround { polys, status })
    }

    /// True if `nei` overlaps a collected polygon that `cur` does not link to
    fn overlaps_collected(&self, cur: PolyHandle<'a>, nei: PolyHandle<'a>, collected: &[VisitedPoly]) -> bool {
        let (nei_verts, nei_nv) = nei.tile.poly_verts(nei.poly);

        collected.iter().any(|past| {
            if cur.tile.links_of(cur.poly).any(|l| l.reference == past.poly_ref) {
                return false;
            }
            let Ok(past) = self.handle(past.poly_ref) else {
                return false;
            };
            let (past_verts, past_nv) = past.tile.poly_verts(past.poly);
            overlap_poly_poly_2d(&nei_verts[..nei_nv], &past_verts[..past_nv])
        })
    }

    /// Distance from `center` to the nearest wall within `max_radius`,
    /// searching outwards from `start_ref`.
    ///
    /// A wall is a polygon edge without a neighbour that passes the filter.
    pub fn find_distance_to_wall<F: QueryFilter + ?Sized>(
        &mut self,
        start_ref: PolyRef,
        center: Vec3,
        max_radius: f32,
        filter: &F,
    ) -> QueryResult<WallHit> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || !center.is_finite()
            || !max_radius.is_finite()
            || max_radius < 0.0
        {
            return Err(INVALID_INPUT);
        }

        self.reset_main_pool();
        let start = self.seed_main_pool(start_ref, center)?;
        self.open_list.push(&mut self.node_pool, start);

        let mut radius_sqr = sqr(max_radius);
        let mut hit_pos = center;
        let mut out_of_nodes = false;

        while let Some(best) = self.open_list.pop(&mut self.node_pool) {
            let (best_ref, best_pos, best_total, parent) = self.close_node(best);
            let cur = self.handle(best_ref)?;
            let parent_ref = parent.map_or(PolyRef::NULL, |p| self.node_pool.node(p).poly_ref);

            let (verts, nv) = cur.tile.poly_verts(cur.poly);
            for j in 0..nv {
                if !self.is_wall_edge(cur, j, filter) {
                    continue;
                }
                let (d, t) = dist_pt_seg_sqr_2d(center, verts[j], verts[(j + 1) % nv]);
                if d > radius_sqr {
                    continue;
                }
                // Closer wall, shrink the search.
                radius_sqr = d;
                hit_pos = verts[j].lerp(verts[(j + 1) % nv], t);
            }

            for link in cur.tile.links_of(cur.poly) {
                let nei_ref = link.reference;
                if !nei_ref.is_valid() || nei_ref == parent_ref {
                    continue;
                }
                let Ok(nei) = self.handle(nei_ref) else {
                    continue;
                };
                if nei.poly.is_off_mesh_connection() {
                    continue;
                }

                let edge = link.edge as usize;
                if edge >= nv {
                    continue;
                }
                if dist_pt_seg_sqr_2d(center, verts[edge], verts[(edge + 1) % nv]).0 > radius_sqr {
                    continue;
                }
                if !filter.pass_filter(nei_ref, nei.tile, nei.poly) {
                    continue;
                }

                let Some(nei_idx) = self.node_pool.get_node(nei_ref, 0) else {
                    out_of_nodes = true;
                    continue;
                };
                if self.node_pool.node(nei_idx).is_closed() {
                    continue;
                }
                if self.node_pool.node(nei_idx).flags.is_empty() {
                    if let Ok(mid) = edge_mid_point(cur, nei) {
                        self.node_pool.node_mut(nei_idx).pos = mid;
                    }
                }

                let nei_pos = self.node_pool.node(nei_idx).pos;
                self.relax(nei_idx, best, best_total + best_pos.distance(nei_pos));
            }
        }

        let mut status = Status::SUCCESS;
        if out_of_nodes {
            debug!("find_distance_to_wall: ran out of search nodes");
            status |= Status::OUT_OF_NODES;
        }

        Ok(WallHit {
            distance: radius_sqr.sqrt(),
            hit_pos,
            hit_normal: (center - hit_pos).normalize_or_zero(),
            status,
        })
    }

    /// An edge is a wall unless it leads to a polygon passing the filter
    fn is_wall_edge<F: QueryFilter + ?Sized>(&self, cur: PolyHandle<'a>, edge: usize, filter: &F) -> bool {
        let nei = cur.poly.neis[edge];
        if nei & EXT_LINK != 0 {
            !cur.tile.links_of(cur.poly).any(|l| {
                l.edge as usize == edge
                    && self
                        .handle(l.reference)
                        .is_ok_and(|n| filter.pass_filter(l.reference, n.tile, n.poly))
            })
        } else if nei != 0 {
            let idx = (nei - 1) as usize;
            !filter.pass_filter(cur.tile.poly_ref(idx), cur.tile, &cur.tile.polys[idx])
        } else {
            true
        }
    }

    /// Slides from `start_pos` towards `end_pos` across the surface,
    /// starting in `start_ref`.
    ///
    /// The search only looks at polygons within reach of the straight move,
    /// so it is meant for small steps. If `end_pos` is not reachable the
    /// result is the closest point to it on the walls met on the way.
    /// `visited` is truncated to `max_visited` polygons.
    pub fn move_along_surface<F: QueryFilter + ?Sized>(
        &mut self,
        start_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &F,
        max_visited: usize,
    ) -> QueryResult<SurfaceMove> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || !start_pos.is_finite()
            || !end_pos.is_finite()
            || max_visited == 0
        {
            return Err(INVALID_INPUT);
        }

        self.tiny_node_pool.clear();
        let start = self
            .tiny_node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(Status::OUT_OF_NODES))?;
        self.tiny_node_pool.node_mut(start).flags = NodeFlags::CLOSED;

        let mut stack = VecDeque::with_capacity(MAX_STACK);
        stack.push_back(start);

        let mut best_pos = start_pos;
        let mut best_dist = f32::MAX;
        let mut best_node = start;

        // Search constraints.
        let search_pos = start_pos.lerp(end_pos, 0.5);
        let search_rad_sqr = sqr(start_pos.distance(end_pos) / 2.0 + 0.001);

        while let Some(cur_idx) = stack.pop_front() {
            let cur = self.handle(self.tiny_node_pool.node(cur_idx).poly_ref)?;
            let (verts, nv) = cur.tile.poly_verts(cur.poly);

            if point_in_polygon(end_pos, &verts[..nv]) {
                best_node = cur_idx;
                best_pos = end_pos;
                break;
            }

            for j in 0..nv {
                let (va, vb) = (verts[j], verts[(j + 1) % nv]);
                let neis = self.passable_neighbours(cur, j, filter);

                if neis.is_empty() {
                    // Wall edge, track the point closest to the target.
                    let (d, t) = dist_pt_seg_sqr_2d(end_pos, va, vb);
                    if d < best_dist {
                        best_pos = va.lerp(vb, t);
                        best_dist = d;
                        best_node = cur_idx;
                    }
                    continue;
                }

                if dist_pt_seg_sqr_2d(search_pos, va, vb).0 > search_rad_sqr {
                    continue;
                }

                for nei_ref in neis {
                    let Some(nei_idx) = self.tiny_node_pool.get_node(nei_ref, 0) else {
                        continue;
                    };
                    if self.tiny_node_pool.node(nei_idx).is_closed() {
                        continue;
                    }
                    enqueue_bounded(&mut self.tiny_node_pool, &mut stack, nei_idx, cur_idx);
                }
            }
        }

        let mut visited = Vec::new();
        let mut cur = Some(best_node);
        while let Some(idx) = cur {
            if visited.len() > self.tiny_node_pool.node_count() {
                break;
            }
            let node = self.tiny_node_pool.node(idx);
            visited.push(node.poly_ref);
            cur = node.parent;
        }
        visited.reverse();

        let mut status = Status::SUCCESS;
        if visited.len() > max_visited {
            visited.truncate(max_visited);
            status |= Status::BUFFER_TOO_SMALL;
        }

        Ok(SurfaceMove {
            pos: best_pos,
            visited,
            status,
        })
    }

    /// Polygons across edge `edge` of `cur` that pass the filter
    fn passable_neighbours<F: QueryFilter + ?Sized>(
        &self,
        cur: PolyHandle<'a>,
        edge: usize,
        filter: &F,
    ) -> Vec<PolyRef> {
        let nei = cur.poly.neis[edge];
        if nei & EXT_LINK != 0 {
            cur.tile
                .links_of(cur.poly)
                .filter(|l| l.edge as usize == edge && l.reference.is_valid())
                .filter(|l| {
                    self.handle(l.reference)
                        .is_ok_and(|n| filter.pass_filter(l.reference, n.tile, n.poly))
                })
                .map(|l| l.reference)
                .take(MAX_NEIS)
                .collect()
        } else if nei != 0 {
            let idx = (nei - 1) as usize;
            let nei_ref = cur.tile.poly_ref(idx);
            if filter.pass_filter(nei_ref, cur.tile, &cur.tile.polys[idx]) {
                vec![nei_ref]
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        }
    }

    /// Wall segments of a polygon, and its portal segments when
    /// `store_portals` is set.
    ///
    /// Tile border edges may be shared with several neighbours; the parts of
    /// such an edge not covered by any passable neighbour are reported as
    /// walls.
    pub fn get_poly_wall_segments<F: QueryFilter + ?Sized>(
        &self,
        poly_ref: PolyRef,
        filter: &F,
        max_segments: usize,
        store_portals: bool,
    ) -> QueryResult<WallSegments> {
        if max_segments == 0 {
            return Err(INVALID_INPUT);
        }
        let cur = self.handle(poly_ref)?;
        let (verts, nv) = cur.tile.poly_verts(cur.poly);

        let mut segments = Vec::new();
        let mut status = Status::SUCCESS;
        let mut store = |start: Vec3, end: Vec3, neighbour: PolyRef| {
            if segments.len() < max_segments {
                segments.push(WallSegment { start, end, neighbour });
            } else {
                status |= Status::BUFFER_TOO_SMALL;
            }
        };

        for j in 0..nv.min(MAX_VERTS_PER_POLY) {
            let (vj, vi) = (verts[j], verts[(j + 1) % nv]);
            let nei = cur.poly.neis[j];

            if nei & EXT_LINK != 0 {
                // Tile border: collect the covered parts of the edge.
                let mut ints: Vec<(i16, i16, PolyRef)> = Vec::with_capacity(MAX_INTERVAL);
                for link in cur.tile.links_of(cur.poly).filter(|l| l.edge as usize == j) {
                    let passes = self
                        .handle(link.reference)
                        .is_ok_and(|n| filter.pass_filter(link.reference, n.tile, n.poly));
                    if passes {
                        insert_interval(&mut ints, link.bmin as i16, link.bmax as i16, link.reference);
                    }
                }

                // Sentinels.
                insert_interval(&mut ints, -1, 0, PolyRef::NULL);
                insert_interval(&mut ints, 255, 256, PolyRef::NULL);

                let s = 1.0 / 255.0;
                for k in 1..ints.len() {
                    let (tmin, tmax, nei_ref) = ints[k];
                    if store_portals && nei_ref.is_valid() {
                        store(
                            vj.lerp(vi, tmin as f32 * s),
                            vj.lerp(vi, tmax as f32 * s),
                            nei_ref,
                        );
                    }

                    let imin = ints[k - 1].1;
                    let imax = tmin;
                    if imin != imax {
                        store(
                            vj.lerp(vi, imin as f32 * s),
                            vj.lerp(vi, imax as f32 * s),
                            PolyRef::NULL,
                        );
                    }
                }
                continue;
            }

            let mut nei_ref = PolyRef::NULL;
            if nei != 0 {
                let idx = (nei - 1) as usize;
                let candidate = cur.tile.poly_ref(idx);
                if filter.pass_filter(candidate, cur.tile, &cur.tile.polys[idx]) {
                    nei_ref = candidate;
                }
            }

            // A portal, only stored on request.
            if nei_ref.is_valid() && !store_portals {
                continue;
            }
            store(vj, vi, nei_ref);
        }

        Ok(WallSegments { segments, status })
    }
}

/// Queues `idx` reached from `parent` and closes it, unless the queue is
/// full. A node left out stays open to other parents.
fn enqueue_bounded(pool: &mut NodePool, queue: &mut VecDeque<NodeIndex>, idx: NodeIndex, parent: NodeIndex) -> bool {
    if queue.len() >= MAX_STACK {
        return false;
    }
    let node = pool.node_mut(idx);
    node.parent = Some(parent);
    node.flags.insert(NodeFlags::CLOSED);
    queue.push_back(idx);
    true
}

/// Inserts the interval sorted by start, dropping it when the list is full
fn insert_interval(ints: &mut Vec<(i16, i16, PolyRef)>, tmin: i16, tmax: i16, poly_ref: PolyRef) {
    if ints.len() + 1 > MAX_INTERVAL {
        return;
    }
    let idx = ints.iter().position(|&(imin, _, _)| tmax <= imin).unwrap_or(ints.len());
    ints.insert(idx, (tmin, tmax, poly_ref));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{create_grid_mesh, create_tiled_mesh, poly_ref_at};
    use crate::{DefaultQueryFilter, PolyFlags, Result};
    use approx::assert_relative_eq;

    #[test]
    fn test_circle_is_ordered_by_cost() -> Result<()> {
        let nav_mesh = create_grid_mesh(3, 3)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let center_ref = poly_ref_at(&nav_mesh, 0, 0, 4);

        let around = query
            .find_polys_around_circle(center_ref, Vec3::new(1.5, 0.0, 1.5), 0.6, &DefaultQueryFilter::new(), 32)
            .expect("circle");

        // The center cell and its four edge neighbours.
        assert_eq!(around.polys.len(), 5);
        assert_eq!(around.polys[0].poly_ref, center_ref);
        assert_eq!(around.polys[0].parent, PolyRef::NULL);
        assert!(around.polys.windows(2).all(|w| w[0].cost <= w[1].cost));
        assert!(around.polys[1..].iter().all(|p| p.parent == center_ref));
        Ok(())
    }

    #[test]
    fn test_circle_capacity() -> Result<()> {
        let nav_mesh = create_grid_mesh(3, 3)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let around = query
            .find_polys_around_circle(
                poly_ref_at(&nav_mesh, 0, 0, 4),
                Vec3::new(1.5, 0.0, 1.5),
                10.0,
                &DefaultQueryFilter::new(),
                3,
            )
            .expect("circle");
        assert_eq!(around.polys.len(), 3);
        assert!(around.status.is_buffer_too_small());
        Ok(())
    }

    #[test]
    fn test_shape_exploration() -> Result<()> {
        let nav_mesh = create_grid_mesh(4, 1)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let shape = [
            Vec3::new(0.2, 0.0, 0.2),
            Vec3::new(0.2, 0.0, 0.8),
            Vec3::new(2.5, 0.0, 0.8),
            Vec3::new(2.5, 0.0, 0.2),
        ];

        let around = query
            .find_polys_around_shape(poly_ref_at(&nav_mesh, 0, 0, 0), &shape, &DefaultQueryFilter::new(), 16)
            .expect("shape");
        let refs: Vec<PolyRef> = around.polys.iter().map(|p| p.poly_ref).collect();
        assert_eq!(refs.len(), 3);
        assert!(!refs.contains(&poly_ref_at(&nav_mesh, 0, 0, 3)));

        assert!(
            query
                .find_polys_around_shape(poly_ref_at(&nav_mesh, 0, 0, 0), &shape[..2], &DefaultQueryFilter::new(), 16)
                .is_err()
        );
        Ok(())
    }

    #[test]
    fn test_local_neighbourhood() -> Result<()> {
        let nav_mesh = create_grid_mesh(3, 3)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let center_ref = poly_ref_at(&nav_mesh, 0, 0, 4);

        let local = query
            .find_local_neighbourhood(center_ref, Vec3::new(1.5, 0.0, 1.5), 0.6, &DefaultQueryFilter::new(), 16)
            .expect("neighbourhood");
        assert_eq!(local.polys.len(), 5);
        assert_eq!(local.polys[0].parent, PolyRef::NULL);
        assert!(local.polys.iter().all(|p| p.cost == 0.0));

        let tight = query
            .find_local_neighbourhood(center_ref, Vec3::new(1.5, 0.0, 1.5), 0.6, &DefaultQueryFilter::new(), 2)
            .expect("neighbourhood");
        assert_eq!(tight.polys.len(), 2);
        assert!(tight.status.is_buffer_too_small());
        Ok(())
    }

    #[test]
    fn test_distance_to_wall() -> Result<()> {
        let nav_mesh = create_grid_mesh(3, 3)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let filter = DefaultQueryFilter::new();

        let hit = query
            .find_distance_to_wall(poly_ref_at(&nav_mesh, 0, 0, 4), Vec3::new(1.5, 0.0, 1.2), 5.0, &filter)
            .expect("wall");
        assert_relative_eq!(hit.distance, 1.2, epsilon = 1e-5);
        assert_relative_eq!(hit.hit_pos.z, 0.0, epsilon = 1e-5);
        assert_relative_eq!(hit.hit_normal.z, 1.0, epsilon = 1e-5);

        // Nothing within reach.
        let none = query
            .find_distance_to_wall(poly_ref_at(&nav_mesh, 0, 0, 4), Vec3::new(1.5, 0.0, 1.5), 0.5, &filter)
            .expect("wall");
        assert_relative_eq!(none.distance, 0.5);
        assert_eq!(none.hit_pos, Vec3::new(1.5, 0.0, 1.5));
        assert_eq!(none.hit_normal, Vec3::ZERO);
        Ok(())
    }

    #[test]
    fn test_filtered_neighbour_is_a_wall() -> Result<()> {
        let mut nav_mesh = create_grid_mesh(3, 1)?;
        nav_mesh.set_poly_flags(poly_ref_at(&nav_mesh, 0, 0, 2), PolyFlags::DISABLED).expect("flags");
        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let mut filter = DefaultQueryFilter::new();
        filter.exclude_flags = PolyFlags::DISABLED;

        let hit = query
            .find_distance_to_wall(poly_ref_at(&nav_mesh, 0, 0, 1), Vec3::new(1.8, 0.0, 0.5), 5.0, &filter)
            .expect("wall");
        assert_relative_eq!(hit.distance, 0.2, epsilon = 1e-5);
        assert_relative_eq!(hit.hit_pos.x, 2.0, epsilon = 1e-5);
        assert_eq!(hit.status, Status::SUCCESS);
        Ok(())
    }

    #[test]
    fn test_starved_searches_flag_out_of_nodes() -> Result<()> {
        let nav_mesh = create_grid_mesh(3, 3)?;
        let filter = DefaultQueryFilter::new();
        let center_ref = poly_ref_at(&nav_mesh, 0, 0, 4);
        let center = Vec3::new(1.5, 0.0, 1.5);

        let mut roomy = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let full = roomy.find_distance_to_wall(center_ref, center, 5.0, &filter).expect("wall");
        assert_eq!(full.status, Status::SUCCESS);
        assert_relative_eq!(full.distance, 1.5, epsilon = 1e-5);

        // The center cell has no walls of its own, so a single node cannot
        // find any and must say so.
        let mut starved = NavMeshQuery::new(&nav_mesh, 1).expect("query");
        let partial = starved.find_distance_to_wall(center_ref, center, 5.0, &filter).expect("wall");
        assert!(partial.status.is_success());
        assert!(partial.status.is_out_of_nodes());
        assert!(partial.distance >= full.distance);

        let around = starved
            .find_polys_around_circle(center_ref, center, 5.0, &filter, 16)
            .expect("circle");
        assert_eq!(around.polys.len(), 1);
        assert!(around.status.is_out_of_nodes());
        Ok(())
    }

    #[test]
    fn test_move_along_surface() -> Result<()> {
        let nav_mesh = create_grid_mesh(3, 1)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let filter = DefaultQueryFilter::new();
        let start = poly_ref_at(&nav_mesh, 0, 0, 0);

        let moved = query
            .move_along_surface(start, Vec3::new(0.5, 0.0, 0.5), Vec3::new(1.5, 0.0, 0.5), &filter, 8)
            .expect("move");
        assert_eq!(moved.pos, Vec3::new(1.5, 0.0, 0.5));
        assert_eq!(moved.visited, vec![start, poly_ref_at(&nav_mesh, 0, 0, 1)]);

        // Blocked by the outer wall.
        let blocked = query
            .move_along_surface(start, Vec3::new(0.5, 0.0, 0.5), Vec3::new(0.5, 0.0, -1.0), &filter, 8)
            .expect("move");
        assert_relative_eq!(blocked.pos.x, 0.5);
        assert_relative_eq!(blocked.pos.z, 0.0);
        assert_eq!(blocked.visited, vec![start]);
        Ok(())
    }

    #[test]
    fn test_wall_segments_of_single_tile() -> Result<()> {
        let nav_mesh = create_grid_mesh(3, 1)?;
        let query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let filter = DefaultQueryFilter::new();
        let middle = poly_ref_at(&nav_mesh, 0, 0, 1);

        let walls = query.get_poly_wall_segments(middle, &filter, 8, false).expect("walls");
        assert_eq!(walls.segments.len(), 2);
        assert!(walls.segments.iter().all(|s| s.neighbour == PolyRef::NULL));

        let all = query.get_poly_wall_segments(middle, &filter, 8, true).expect("walls");
        assert_eq!(all.segments.len(), 4);
        assert_eq!(all.segments.iter().filter(|s| s.neighbour.is_valid()).count(), 2);

        let few = query.get_poly_wall_segments(middle, &filter, 1, true).expect("walls");
        assert!(few.status.is_buffer_too_small());
        Ok(())
    }

    #[test]
    fn test_wall_segments_across_tiles() -> Result<()> {
        let nav_mesh = create_tiled_mesh(2, 1, 2)?;
        let query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let filter = DefaultQueryFilter::new();

        // Cell (1, 0) of tile (0, 0) borders tile (1, 0) on its x+ edge.
        let border = poly_ref_at(&nav_mesh, 0, 0, 1);
        let segments = query.get_poly_wall_segments(border, &filter, 8, true).expect("walls");
        let portals: Vec<&WallSegment> = segments.segments.iter().filter(|s| s.neighbour.is_valid()).collect();
        assert_eq!(portals.len(), 3);
        assert!(portals.iter().any(|s| s.neighbour == poly_ref_at(&nav_mesh, 1, 0, 0)));
        Ok(())
    }

    #[test]
    fn test_insert_interval_keeps_order() {
        let mut ints = Vec::new();
        insert_interval(&mut ints, 100, 200, PolyRef::new(1));
        insert_interval(&mut ints, -1, 0, PolyRef::NULL);
        insert_interval(&mut ints, 255, 256, PolyRef::NULL);
        insert_interval(&mut ints, 0, 50, PolyRef::new(2));
        let starts: Vec<i16> = ints.iter().map(|i| i.0).collect();
        assert_eq!(starts, vec![-1, 0, 100, 255]);
    }

    #[test]
    fn test_full_queue_leaves_node_open() {
        let mut pool = NodePool::new(MAX_STACK + 2, 16);
        let root = pool.get_node(PolyRef::new(1), 0).expect("node");
        let mut queue = VecDeque::new();

        for i in 0..MAX_STACK as u32 {
            let idx = pool.get_node(PolyRef::new(i + 2), 0).expect("node");
            assert!(enqueue_bounded(&mut pool, &mut queue, idx, root));
        }
        assert!(pool.node(queue[0]).is_closed());

        let late = pool.get_node(PolyRef::new(1000), 0).expect("node");
        assert!(!enqueue_bounded(&mut pool, &mut queue, late, root));
        assert_eq!(queue.len(), MAX_STACK);
        assert!(!pool.node(late).is_closed());
        assert_eq!(pool.node(late).parent, None);
    }
}
