//! Raycast along the mesh surface

use navmesh_common::{Vec3, intersect_segment_poly_2d};

use super::nav_mesh_query::NavMeshQuery;
use super::query_filter::{PolyHandle, QueryFilter};
use super::raycast_hit::{RaycastHit, RaycastOptions};
use super::status::INVALID_INPUT;
use super::{PolyRef, QueryResult, SIDE_NONE, Status};

impl<'a> NavMeshQuery<'a> {
    /// Casts a "walkability" ray from `start_pos` towards `end_pos` along
    /// the polygons, starting in `start_ref`.
    ///
    /// The ray is tested in 2D and stops at the first edge it cannot cross.
    /// `prev_ref` is the polygon the caller came from and is only passed to
    /// the filter's cost function.
    pub fn raycast<F: QueryFilter + ?Sized>(
        &self,
        start_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &F,
        options: RaycastOptions,
        prev_ref: PolyRef,
    ) -> QueryResult<RaycastHit> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || !start_pos.is_finite()
            || !end_pos.is_finite()
            || (prev_ref.is_valid() && !self.nav_mesh.is_valid_poly_ref(prev_ref))
        {
            return Err(INVALID_INPUT);
        }

        let mut hit = RaycastHit::new();
        let dir = end_pos - start_pos;
        let mut cur_pos = start_pos;

        let mut prev: Option<PolyHandle<'a>> = if prev_ref.is_valid() {
            Some(self.handle(prev_ref)?)
        } else {
            None
        };
        let mut cur = self.handle(start_ref)?;

        loop {
            let (verts, nv) = cur.tile.poly_verts(cur.poly);
            let Some(seg) = intersect_segment_poly_2d(start_pos, end_pos, &verts[..nv]) else {
                // Could not hit the polygon, keep the old t and report hit.
                return Ok(hit);
            };

            hit.hit_edge_index = seg.seg_max;
            if seg.tmax > hit.t {
                hit.t = seg.tmax;
            }

            if hit.path.len() < options.max_path {
                hit.path.push(cur.poly_ref);
            } else {
                hit.status |= Status::BUFFER_TOO_SMALL;
            }

            let Some(exit_edge) = seg.seg_max else {
                // The ray ends inside this polygon.
                hit.t = f32::MAX;
                if options.use_costs {
                    hit.path_cost += filter.get_cost(cur_pos, end_pos, prev, cur, Some(cur));
                }
                return Ok(hit);
            };

            let next = self.ray_exit_neighbour(cur, exit_edge, start_pos, end_pos, hit.t, filter);

            if options.use_costs {
                let last_pos = cur_pos;
                cur_pos = start_pos + dir * hit.t;
                let e1 = verts[exit_edge];
                let e2 = verts[(exit_edge + 1) % nv];
                let e_dir = e2 - e1;
                let diff = cur_pos - e1;
                let s = if e_dir.x * e_dir.x > e_dir.z * e_dir.z {
                    diff.x / e_dir.x
                } else {
                    diff.z / e_dir.z
                };
                cur_pos.y = e1.y + e_dir.y * s;

                hit.path_cost += filter.get_cost(last_pos, cur_pos, prev, cur, next);
            }

            let Some(next) = next else {
                // No neighbour, we hit a wall.
                let va = verts[exit_edge];
                let vb = verts[(exit_edge + 1) % nv];
                let dx = vb.x - va.x;
                let dz = vb.z - va.z;
                hit.hit_normal = Vec3::new(dz, 0.0, -dx).normalize_or_zero();
                return Ok(hit);
            };

            prev = Some(cur);
            cur = next;
        }
    }

    /// Polygon on the other side of `edge` that the ray at parameter `t`
    /// passes into, if any
    fn ray_exit_neighbour<F: QueryFilter + ?Sized>(
        &self,
        cur: PolyHandle<'a>,
        edge: usize,
        start_pos: Vec3,
        end_pos: Vec3,
        t: f32,
        filter: &F,
    ) -> Option<PolyHandle<'a>> {
        let (verts, nv) = cur.tile.poly_verts(cur.poly);
        let left = verts[edge];
        let right = verts[(edge + 1) % nv];

        for link in cur.tile.links_of(cur.poly) {
            if link.edge as usize != edge {
                continue;
            }
            let Ok(nei) = self.handle(link.reference) else {
                continue;
            };
            if nei.poly.is_off_mesh_connection() || !filter.pass_filter(link.reference, nei.tile, nei.poly) {
                continue;
            }

            // Internal edge, or a border link that spans the whole edge.
            if link.side == SIDE_NONE || (link.bmin == 0 && link.bmax == 255) {
                return Some(nei);
            }

            // Border link covering part of the edge: check that the ray
            // crosses the covered part.
            let s = 1.0 / 255.0;
            let crosses = if link.side == 0 || link.side == 4 {
                // Edge along z.
                let (mut lmin, mut lmax) = (
                    left.z + (right.z - left.z) * (link.bmin as f32 * s),
                    left.z + (right.z - left.z) * (link.bmax as f32 * s),
                );
                if lmin > lmax {
                    std::mem::swap(&mut lmin, &mut lmax);
                }
                let z = start_pos.z + (end_pos.z - start_pos.z) * t;
                (lmin..=lmax).contains(&z)
            } else if link.side == 2 || link.side == 6 {
                // Edge along x.
                let (mut lmin, mut lmax) = (
                    left.x + (right.x - left.x) * (link.bmin as f32 * s),
                    left.x + (right.x - left.x) * (link.bmax as f32 * s),
                );
                if lmin > lmax {
                    std::mem::swap(&mut lmin, &mut lmax);
                }
                let x = start_pos.x + (end_pos.x - start_pos.x) * t;
                (lmin..=lmax).contains(&x)
            } else {
                false
            };

            if crosses {
                return Some(nei);
            }
        }
        None
    }
}
