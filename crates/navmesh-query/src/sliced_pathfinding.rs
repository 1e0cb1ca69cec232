//! Sliced pathfinding
//!
//! The A* search of [`NavMeshQuery::find_path`] split into three steps so a
//! caller can bound the work done per call:
//!
//! 1. [`NavMeshQuery::init_sliced_find_path`] validates the input and seeds
//!    the search.
//! 2. [`NavMeshQuery::update_sliced_find_path`] expands at most a given
//!    number of nodes and may be called as often as needed.
//! 3. [`NavMeshQuery::finalize_sliced_find_path`] (or the `_partial` variant)
//!    builds the corridor and ends the query.
//!
//! Only one sliced query can be in flight per [`NavMeshQuery`]. Any other
//! query that uses the main node pool abandons it.
//!
//! With [`FindPathOptions::ANY_ANGLE`] the search tries to shortcut from a
//! node's grandparent straight to the neighbour with a raycast. A node whose
//! parent was bypassed this way is marked [`NodeFlags::PARENT_DETACHED`] and
//! the skipped polygons are recovered during finalization.

use log::debug;
use navmesh_common::{Vec3, sqr};

use super::nav_mesh_query::{H_SCALE, NavMeshQuery, PathResult, edge_mid_point};
use super::node_pool::{NodeFlags, NodeIndex};
use super::query_filter::QueryFilter;
use super::raycast_hit::RaycastOptions;
use super::status::INVALID_INPUT;
use super::{FindPathOptions, PolyRef, QueryResult, Status};

/// Share of the agent radius used as the any-angle raycast range
const RAY_CAST_LIMIT_PROPORTIONS: f32 = 50.0;

/// Progress reported by [`NavMeshQuery::update_sliced_find_path`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlicedUpdate {
    /// Nodes expanded by this call
    pub iterations: usize,
    /// In progress, success (possibly with detail bits) or failure
    pub status: Status,
}

/// State of the sliced query in flight
pub(crate) struct SlicedQuery<'a> {
    status: Status,
    last_best: Option<NodeIndex>,
    last_best_cost: f32,
    start_ref: PolyRef,
    end_ref: PolyRef,
    end_pos: Vec3,
    filter: Box<dyn QueryFilter + 'a>,
    options: FindPathOptions,
    raycast_limit_sqr: f32,
}

impl<'a> NavMeshQuery<'a> {
    /// Starts a sliced path search from `start_ref` to `end_ref`.
    ///
    /// The filter is kept until the query is finalized. Returns
    /// [`Status::IN_PROGRESS`], or [`Status::SUCCESS`] when start and end are
    /// the same polygon.
    pub fn init_sliced_find_path<F: QueryFilter + 'a>(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: F,
        options: FindPathOptions,
    ) -> QueryResult<Status> {
        self.reset_main_pool();

        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || !self.nav_mesh.is_valid_poly_ref(end_ref)
            || !start_pos.is_finite()
            || !end_pos.is_finite()
        {
            return Err(INVALID_INPUT);
        }

        let mut raycast_limit_sqr = f32::MAX;
        if options.contains(FindPathOptions::ANY_ANGLE) {
            let start = self.handle(start_ref)?;
            let radius = start.tile.header.as_ref().map_or(0.0, |h| h.walkable_radius);
            raycast_limit_sqr = sqr(radius * RAY_CAST_LIMIT_PROPORTIONS);
        }

        let mut state = SlicedQuery {
            status: Status::IN_PROGRESS,
            last_best: None,
            last_best_cost: 0.0,
            start_ref,
            end_ref,
            end_pos,
            filter: Box::new(filter),
            options,
            raycast_limit_sqr,
        };

        if start_ref == end_ref {
            state.status = Status::SUCCESS;
            let status = state.status;
            self.sliced = Some(state);
            return Ok(status);
        }

        let start = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(Status::OUT_OF_NODES))?;
        let node = self.node_pool.node_mut(start);
        node.pos = start_pos;
        node.cost = 0.0;
        node.total = start_pos.distance(end_pos) * H_SCALE;
        node.flags = NodeFlags::OPEN;
        state.last_best = Some(start);
        state.last_best_cost = node.total;
        self.open_list.push(&mut self.node_pool, start);

        let status = state.status;
        self.sliced = Some(state);
        Ok(status)
    }

    /// Expands up to `max_iter` nodes of the sliced search in flight
    pub fn update_sliced_find_path(&mut self, max_iter: usize) -> QueryResult<SlicedUpdate> {
        let Some(mut state) = self.sliced.take() else {
            return Err(Status::FAILURE);
        };

        let result = self.run_sliced(&mut state, max_iter);
        let status = state.status;
        self.sliced = Some(state);

        let iterations = result?;
        Ok(SlicedUpdate { iterations, status })
    }

    fn run_sliced(&mut self, state: &mut SlicedQuery<'a>, max_iter: usize) -> QueryResult<usize> {
        if !state.status.is_in_progress() {
            return Ok(0);
        }

        // The tiles may have changed since the last call.
        if !self.nav_mesh.is_valid_poly_ref(state.start_ref) || !self.nav_mesh.is_valid_poly_ref(state.end_ref) {
            debug!("sliced find path: start or end polygon vanished");
            state.status = Status::FAILURE;
            return Ok(0);
        }

        let filter = &*state.filter;
        let any_angle = state.options.contains(FindPathOptions::ANY_ANGLE);
        let ray_options = RaycastOptions {
            use_costs: true,
            max_path: 0,
        };

        let mut iterations = 0;
        while iterations < max_iter {
            let Some(best) = self.open_list.pop(&mut self.node_pool) else {
                break;
            };
            iterations += 1;

            let best_node = self.node_pool.node_mut(best);
            best_node.flags.remove(NodeFlags::OPEN);
            best_node.flags.insert(NodeFlags::CLOSED);
            let (best_ref, best_pos, best_cost, parent_idx) =
                (best_node.poly_ref, best_node.pos, best_node.cost, best_node.parent);

            if best_ref == state.end_ref {
                state.last_best = Some(best);
                state.status = Status::SUCCESS | state.status.detail();
                return Ok(iterations);
            }

            let Ok(cur) = self.handle(best_ref) else {
                debug!("sliced find path: polygon {} vanished during search", best_ref);
                state.status = Status::FAILURE;
                return Ok(iterations);
            };

            let mut parent = None;
            let mut grandpa_ref = PolyRef::NULL;
            if let Some(p) = parent_idx {
                let parent_node = self.node_pool.node(p);
                if let Some(gp) = parent_node.parent {
                    grandpa_ref = self.node_pool.node(gp).poly_ref;
                }
                let (parent_ref, parent_pos) = (parent_node.poly_ref, parent_node.pos);
                let Ok(handle) = self.handle(parent_ref) else {
                    debug!("sliced find path: polygon {} vanished during search", parent_ref);
                    state.status = Status::FAILURE;
                    return Ok(iterations);
                };
                if grandpa_ref.is_valid() && !self.nav_mesh.is_valid_poly_ref(grandpa_ref) {
                    state.status = Status::FAILURE;
                    return Ok(iterations);
                }
                parent = Some((handle, parent_pos, p));
            }

            let try_los = any_angle
                && parent.is_some_and(|(_, pos, _)| pos.distance_squared(best_pos) < state.raycast_limit_sqr);
            let parent_ref = parent.map_or(PolyRef::NULL, |(h, _, _)| h.poly_ref);

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

                let Some(nei_idx) = self.node_pool.get_node(nei_ref, 0) else {
                    state.status |= Status::OUT_OF_NODES;
                    continue;
                };

                // Already reached through the same parent.
                if let (Some(np), Some(bp)) = (self.node_pool.node(nei_idx).parent, parent_idx) {
                    if np == bp {
                        continue;
                    }
                }

                if self.node_pool.node(nei_idx).flags.is_empty() {
                    if let Ok(mid) = edge_mid_point(cur, nei) {
                        self.node_pool.node_mut(nei_idx).pos = mid;
                    }
                }
                let nei_pos = self.node_pool.node(nei_idx).pos;

                let mut shortcut = false;
                let mut cost = 0.0;
                if let (true, Some((parent_handle, parent_pos, p))) = (try_los, parent) {
                    let ray = self.raycast(
                        parent_handle.poly_ref,
                        parent_pos,
                        nei_pos,
                        filter,
                        ray_options,
                        grandpa_ref,
                    );
                    if let Ok(hit) = ray {
                        if hit.t >= 1.0 {
                            shortcut = true;
                            cost = self.node_pool.node(p).cost + hit.path_cost;
                        }
                    }
                }

                if !shortcut {
                    let prev = parent.map(|(h, _, _)| h);
                    cost = best_cost + filter.get_cost(best_pos, nei_pos, prev, cur, Some(nei));
                }

                let heuristic = if nei_ref == state.end_ref {
                    cost += filter.get_cost(nei_pos, state.end_pos, Some(cur), nei, None);
                    0.0
                } else {
                    nei_pos.distance(state.end_pos) * H_SCALE
                };
                let total = cost + heuristic;

                let node = self.node_pool.node_mut(nei_idx);
                if (node.is_open() || node.is_closed()) && total >= node.total {
                    continue;
                }

                node.parent = if shortcut { parent_idx } else { Some(best) };
                node.flags.remove(NodeFlags::CLOSED | NodeFlags::PARENT_DETACHED);
                if shortcut {
                    node.flags.insert(NodeFlags::PARENT_DETACHED);
                }
                node.cost = cost;
                node.total = total;

                if node.is_open() {
                    self.open_list.modify(&mut self.node_pool, nei_idx);
                } else {
                    node.flags.insert(NodeFlags::OPEN);
                    self.open_list.push(&mut self.node_pool, nei_idx);
                }

                if heuristic < state.last_best_cost {
                    state.last_best_cost = heuristic;
                    state.last_best = Some(nei_idx);
                }
            }
        }

        if self.open_list.is_empty() {
            state.status = Status::SUCCESS | state.status.detail();
        }

        Ok(iterations)
    }

    /// Builds the corridor of the finished sliced query and ends it.
    ///
    /// If the end was not reached the corridor leads to the explored polygon
    /// closest to it and [`Status::PARTIAL_RESULT`] is set.
    pub fn finalize_sliced_find_path(&mut self, max_path: usize) -> QueryResult<PathResult> {
        if max_path == 0 {
            return Err(INVALID_INPUT);
        }
        let Some(state) = self.sliced.take() else {
            return Err(Status::FAILURE);
        };
        if state.status.is_failure() {
            return Err(Status::FAILURE);
        }

        if state.start_ref == state.end_ref {
            return Ok(PathResult {
                path: vec![state.start_ref],
                status: Status::SUCCESS,
            });
        }

        let Some(last_best) = state.last_best else {
            return Err(Status::FAILURE);
        };

        let mut status = state.status;
        if self.node_pool.node(last_best).poly_ref != state.end_ref {
            status |= Status::PARTIAL_RESULT;
        }

        self.finish_sliced_path(&state, last_best, status, max_path)
    }

    /// Like [`finalize_sliced_find_path`](Self::finalize_sliced_find_path),
    /// but continues from the furthest polygon of `existing` that the search
    /// visited. Used when the caller already follows a prefix of an earlier
    /// result.
    pub fn finalize_sliced_find_path_partial(
        &mut self,
        existing: &[PolyRef],
        max_path: usize,
    ) -> QueryResult<PathResult> {
        if existing.is_empty() || max_path == 0 {
            return Err(INVALID_INPUT);
        }
        let Some(state) = self.sliced.take() else {
            return Err(Status::FAILURE);
        };
        if state.status.is_failure() {
            return Err(Status::FAILURE);
        }

        if state.start_ref == state.end_ref {
            return Ok(PathResult {
                path: vec![state.start_ref],
                status: Status::SUCCESS,
            });
        }

        let mut status = state.status;
        let furthest = existing
            .iter()
            .rev()
            .find_map(|&r| self.node_pool.find_nodes(r).first().copied());

        let node = match furthest {
            Some(node) => node,
            None => {
                status |= Status::PARTIAL_RESULT;
                state.last_best.ok_or(Status::FAILURE)?
            }
        };

        self.finish_sliced_path(&state, node, status, max_path)
    }

    /// Walks from the root to `end`, expanding shortcut edges back into the
    /// polygons the raycast crossed
    fn finish_sliced_path(
        &mut self,
        state: &SlicedQuery<'a>,
        end: NodeIndex,
        mut status: Status,
        max_path: usize,
    ) -> QueryResult<PathResult> {
        let mut chain = Vec::new();
        let mut cur = Some(end);
        while let Some(idx) = cur {
            if chain.len() > self.node_pool.node_count() {
                break;
            }
            chain.push(idx);
            cur = self.node_pool.node(idx).parent;
        }
        chain.reverse();

        let filter = &*state.filter;
        let mut path: Vec<PolyRef> = Vec::new();

        for (i, &idx) in chain.iter().enumerate() {
            let node = self.node_pool.node(idx);
            let next = chain.get(i + 1).map(|&n| self.node_pool.node(n));

            if let Some(next) = next.filter(|n| n.flags.contains(NodeFlags::PARENT_DETACHED)) {
                let options = RaycastOptions {
                    use_costs: false,
                    max_path: max_path - path.len(),
                };
                let hit = self.raycast(node.poly_ref, node.pos, next.pos, filter, options, PolyRef::NULL)?;
                path.extend_from_slice(&hit.path);

                // The ray ends in the next polygon, which is added with it.
                if path.last() == Some(&next.poly_ref) {
                    path.pop();
                }

                if hit.status.is_buffer_too_small() {
                    status |= Status::BUFFER_TOO_SMALL;
                    break;
                }
            } else if path.len() < max_path {
                path.push(node.poly_ref);
            } else {
                status |= Status::BUFFER_TOO_SMALL;
                break;
            }
        }

        if status.is_out_of_nodes() {
            debug!("sliced find path: ran out of search nodes");
        }

        self.node_pool.clear();
        self.open_list.clear();

        Ok(PathResult {
            path,
            status: Status::SUCCESS | status.detail(),
        })
    }
}
