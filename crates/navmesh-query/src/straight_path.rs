//! Straight path extraction
//!
//! Turns a polygon corridor into the list of corner points an agent walks
//! through, using the funnel ("string pulling") algorithm over the portals
//! between consecutive corridor polygons.

use std::ops::ControlFlow;

use navmesh_common::{Vec3, dist_pt_seg_sqr_2d, intersect_seg_seg_2d, tri_area_2d, vequal};

use super::nav_mesh_query::{NavMeshQuery, portal_points};
use super::status::INVALID_INPUT;
use super::{PolyRef, PolyType, QueryResult, Status, StraightPathFlags, StraightPathOptions};

/// Corner of a straight path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraightPathPoint {
    pub pos: Vec3,
    pub flags: StraightPathFlags,
    /// Polygon entered at this point, [`PolyRef::NULL`] for the end point
    pub poly_ref: PolyRef,
}

/// Result of [`NavMeshQuery::find_straight_path`]
#[derive(Debug, Clone, PartialEq)]
pub struct StraightPath {
    pub points: Vec<StraightPathPoint>,
    /// Success, possibly with partial result or buffer too small bits
    pub status: Status,
}

struct StraightPathBuilder {
    points: Vec<StraightPathPoint>,
    max_points: usize,
}

impl StraightPathBuilder {
    /// Appends a corner, merging it into the previous one if both sit at
    /// the same location. Breaks once the end is written, or with
    /// [`Status::BUFFER_TOO_SMALL`] when a corner does not fit.
    fn append(&mut self, pos: Vec3, flags: StraightPathFlags, poly_ref: PolyRef) -> ControlFlow<Status> {
        if let Some(last) = self.points.last_mut() {
            if vequal(last.pos, pos) {
                last.flags = flags;
                last.poly_ref = poly_ref;
                return ControlFlow::Continue(());
            }
        }

        if self.points.len() >= self.max_points {
            return ControlFlow::Break(Status::SUCCESS | Status::BUFFER_TOO_SMALL);
        }
        self.points.push(StraightPathPoint { pos, flags, poly_ref });

        if flags.contains(StraightPathFlags::END) {
            return ControlFlow::Break(Status::SUCCESS);
        }
        ControlFlow::Continue(())
    }
}

impl NavMeshQuery<'_> {
    /// Finds the corner points along `path` from `start_pos` to `end_pos`.
    ///
    /// The start and end positions are clamped onto the first and last
    /// polygons. If a portal along the corridor cannot be resolved, the path
    /// stops at the last reachable polygon and [`Status::PARTIAL_RESULT`] is
    /// set. [`Status::BUFFER_TOO_SMALL`] is only set when a corner had to be
    /// dropped; a path that exactly fills `max_points` is a plain success.
    pub fn find_straight_path(
        &self,
        start_pos: Vec3,
        end_pos: Vec3,
        path: &[PolyRef],
        max_points: usize,
        options: StraightPathOptions,
    ) -> QueryResult<StraightPath> {
        if !start_pos.is_finite() || !end_pos.is_finite() || path.is_empty() || max_points == 0 {
            return Err(INVALID_INPUT);
        }
        if path.iter().any(|&r| !r.is_valid()) {
            return Err(INVALID_INPUT);
        }

        let closest_start = self.closest_point_on_poly_boundary(path[0], start_pos)?;
        let closest_end = self.closest_point_on_poly_boundary(path[path.len() - 1], end_pos)?;

        let mut builder = StraightPathBuilder {
            points: Vec::new(),
            max_points,
        };

        let status = match self.pull_string(&mut builder, closest_start, closest_end, path, options) {
            ControlFlow::Break(status) if status.is_failure() => return Err(status),
            ControlFlow::Break(status) => status,
            ControlFlow::Continue(()) => Status::SUCCESS,
        };

        Ok(StraightPath {
            points: builder.points,
            status,
        })
    }

    fn pull_string(
        &self,
        out: &mut StraightPathBuilder,
        start: Vec3,
        end: Vec3,
        path: &[PolyRef],
        options: StraightPathOptions,
    ) -> ControlFlow<Status> {
        out.append(start, StraightPathFlags::START, path[0])?;

        let crossings = options.intersects(StraightPathOptions::AREA_CROSSINGS | StraightPathOptions::ALL_CROSSINGS);

        if path.len() > 1 {
            let mut apex = start;
            let mut left = start;
            let mut right = start;
            let mut apex_index = 0;
            let mut left_index = 0;
            let mut right_index = 0;
            let mut left_type = PolyType::Ground;
            let mut right_type = PolyType::Ground;
            let mut left_ref = path[0];
            let mut right_ref = path[0];

            let mut i = 0;
            while i < path.len() {
                let (pl, pr, to_type) = if i + 1 < path.len() {
                    match self.corridor_portal(path[i], path[i + 1]) {
                        Ok((pl, pr, to_type)) => {
                            // Skip the first portal when the start is on it.
                            if i == 0 {
                                let (d, _) = dist_pt_seg_sqr_2d(apex, pl, pr);
                                if d < 0.001 * 0.001 {
                                    i += 1;
                                    continue;
                                }
                            }
                            (pl, pr, to_type)
                        }
                        Err(_) => {
                            // The corridor is broken; end at the last good
                            // polygon.
                            let Ok(clamped) = self.closest_point_on_poly_boundary(path[i], end) else {
                                return ControlFlow::Break(INVALID_INPUT);
                            };
                            if crossings {
                                self.append_portals(out, apex_index, i, clamped, path, options)?;
                            }
                            out.append(clamped, StraightPathFlags::empty(), path[i])?;
                            return ControlFlow::Break(Status::SUCCESS | Status::PARTIAL_RESULT);
                        }
                    }
                } else {
                    // The end point acts as the last portal.
                    (end, end, PolyType::Ground)
                };

                // Right vertex.
                if tri_area_2d(apex, right, pr) <= 0.0 {
                    if vequal(apex, right) || tri_area_2d(apex, left, pr) > 0.0 {
                        right = pr;
                        right_ref = path.get(i + 1).copied().unwrap_or(PolyRef::NULL);
                        right_type = to_type;
                        right_index = i;
                    } else {
                        // Right over left, the left point becomes the apex.
                        if crossings {
                            self.append_portals(out, apex_index, left_index, left, path, options)?;
                        }
                        apex = left;
                        apex_index = left_index;
                        out.append(apex, corner_flags(left_ref, left_type), left_ref)?;

                        left = apex;
                        right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                // Left vertex.
                if tri_area_2d(apex, left, pl) >= 0.0 {
                    if vequal(apex, left) || tri_area_2d(apex, right, pl) < 0.0 {
                        left = pl;
                        left_ref = path.get(i + 1).copied().unwrap_or(PolyRef::NULL);
                        left_type = to_type;
                        left_index = i;
                    } else {
                        // Left over right, the right point becomes the apex.
                        if crossings {
                            self.append_portals(out, apex_index, right_index, right, path, options)?;
                        }
                        apex = right;
                        apex_index = right_index;
                        out.append(apex, corner_flags(right_ref, right_type), right_ref)?;

                        left = apex;
                        right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }

            if crossings {
                self.append_portals(out, apex_index, path.len() - 1, end, path, options)?;
            }
        }

        out.append(end, StraightPathFlags::END, PolyRef::NULL)
    }

    fn corridor_portal(&self, from_ref: PolyRef, to_ref: PolyRef) -> QueryResult<(Vec3, Vec3, PolyType)> {
        let from = self.handle(from_ref)?;
        let to = self.handle(to_ref)?;
        let (left, right) = portal_points(from, to)?;
        Ok((left, right, to.poly.poly_type))
    }

    /// Adds a point at each portal crossed by the segment from the last
    /// corner to `end_pos`, between corridor indices `start_idx` and
    /// `end_idx`
    fn append_portals(
        &self,
        out: &mut StraightPathBuilder,
        start_idx: usize,
        end_idx: usize,
        end_pos: Vec3,
        path: &[PolyRef],
        options: StraightPathOptions,
    ) -> ControlFlow<Status> {
        let Some(start_pos) = out.points.last().map(|p| p.pos) else {
            return ControlFlow::Continue(());
        };

        for i in start_idx..end_idx {
            let (Ok(from), Ok(to)) = (self.handle(path[i]), self.handle(path[i + 1])) else {
                return ControlFlow::Continue(());
            };

            if options.contains(StraightPathOptions::AREA_CROSSINGS) && from.poly.area == to.poly.area {
                continue;
            }

            let Ok((left, right)) = portal_points(from, to) else {
                break;
            };

            if let Some((_, t)) = intersect_seg_seg_2d(start_pos, end_pos, left, right) {
                out.append(left.lerp(right, t), StraightPathFlags::empty(), path[i + 1])?;
            }
        }
        ControlFlow::Continue(())
    }
}

fn corner_flags(poly_ref: PolyRef, poly_type: PolyType) -> StraightPathFlags {
    if !poly_ref.is_valid() {
        StraightPathFlags::END
    } else if poly_type == PolyType::OffMeshConnection {
        StraightPathFlags::OFFMESH_CONNECTION
    } else {
        StraightPathFlags::empty()
    }
}
