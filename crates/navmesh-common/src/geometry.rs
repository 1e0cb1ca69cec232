//! 2D geometry on the XZ plane
//!
//! The navigation mesh is Y-up. All "2D" operations in this module ignore the
//! Y component and treat (x, z) as the plane coordinates.

use glam::Vec3;

const SEGMENT_EPS: f32 = 1e-6;
const OVERLAP_EPS: f32 = 1e-4;

/// Twice the signed area of the triangle (a, b, c) on the XZ plane.
///
/// Polygons in the mesh are wound so that this is positive for consecutive
/// vertices of a convex polygon.
#[inline]
pub fn tri_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let abx = b.x - a.x;
    let abz = b.z - a.z;
    let acx = c.x - a.x;
    let acz = c.z - a.z;
    acx * abz - abx * acz
}

/// Dot product on the XZ plane.
#[inline]
pub fn dot_2d(u: Vec3, v: Vec3) -> f32 {
    u.x * v.x + u.z * v.z
}

/// Perp-dot product `u.z * v.x - u.x * v.z` on the XZ plane.
#[inline]
pub fn perp_2d(u: Vec3, v: Vec3) -> f32 {
    u.z * v.x - u.x * v.z
}

/// Axis aligned bounds overlap test (inclusive).
#[inline]
pub fn overlap_bounds(amin: Vec3, amax: Vec3, bmin: Vec3, bmax: Vec3) -> bool {
    amin.x <= bmax.x
        && amax.x >= bmin.x
        && amin.y <= bmax.y
        && amax.y >= bmin.y
        && amin.z <= bmax.z
        && amax.z >= bmin.z
}

/// Overlap test for quantized bounds.
#[inline]
pub fn overlap_quant_bounds(amin: &[u16; 3], amax: &[u16; 3], bmin: &[u16; 3], bmax: &[u16; 3]) -> bool {
    !(amin[0] > bmax[0]
        || amax[0] < bmin[0]
        || amin[1] > bmax[1]
        || amax[1] < bmin[1]
        || amin[2] > bmax[2]
        || amax[2] < bmin[2])
}

/// Squared distance from `pt` to the segment (p, q) on the XZ plane.
///
/// Returns the squared distance and the parametric position of the closest
/// point along the segment.
pub fn dist_pt_seg_sqr_2d(pt: Vec3, p: Vec3, q: Vec3) -> (f32, f32) {
    let pqx = q.x - p.x;
    let pqz = q.z - p.z;
    let dx = pt.x - p.x;
    let dz = pt.z - p.z;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = p.x + t * pqx - pt.x;
    let dz = p.z + t * pqz - pt.z;
    (dx * dx + dz * dz, t)
}

/// Height of the triangle (a, b, c) at the XZ location of `p`, if `p` lies
/// inside the triangle.
pub fn closest_height_point_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let mut denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < SEGMENT_EPS {
        return None;
    }

    let mut u = v1.z * v2.x - v1.x * v2.z;
    let mut v = v0.x * v2.z - v0.z * v2.x;

    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    if u >= 0.0 && v >= 0.0 && (u + v) <= denom {
        Some(a.y + (v0.y * u + v1.y * v) / denom)
    } else {
        None
    }
}

/// Result of clipping a segment against a convex polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPolyHit {
    /// Parametric entry position along the segment
    pub tmin: f32,
    /// Parametric exit position along the segment
    pub tmax: f32,
    /// Edge the segment enters through, `None` if it starts inside
    pub seg_min: Option<usize>,
    /// Edge the segment leaves through, `None` if it ends inside
    pub seg_max: Option<usize>,
}

/// Clips the segment (p0, p1) against a convex polygon on the XZ plane.
///
/// Edge `j` runs from `verts[j]` to `verts[j + 1]`.
pub fn intersect_segment_poly_2d(p0: Vec3, p1: Vec3, verts: &[Vec3]) -> Option<SegmentPolyHit> {
    let mut hit = SegmentPolyHit {
        tmin: 0.0,
        tmax: 1.0,
        seg_min: None,
        seg_max: None,
    };

    let dir = p1 - p0;
    let nverts = verts.len();
    let mut j = nverts.wrapping_sub(1);
    for i in 0..nverts {
        let edge = verts[i] - verts[j];
        let diff = p0 - verts[j];
        let n = perp_2d(edge, diff);
        let d = perp_2d(dir, edge);
        if d.abs() < SEGMENT_EPS {
            // Parallel to this edge; outside means no intersection at all.
            if n < 0.0 {
                return None;
            }
            j = i;
            continue;
        }
        let t = n / d;
        if d < 0.0 {
            if t > hit.tmin {
                hit.tmin = t;
                hit.seg_min = Some(j);
                if hit.tmin > hit.tmax {
                    return None;
                }
            }
        } else if t < hit.tmax {
            hit.tmax = t;
            hit.seg_max = Some(j);
            if hit.tmax < hit.tmin {
                return None;
            }
        }
        j = i;
    }

    Some(hit)
}

#[inline]
fn perp_xz(a: Vec3, b: Vec3) -> f32 {
    a.x * b.z - a.z * b.x
}

/// Intersects segment (ap, aq) with segment (bp, bq) as infinite lines on the
/// XZ plane.
///
/// Returns the parametric positions `(s, t)` along each segment, or `None`
/// when the lines are parallel.
pub fn intersect_seg_seg_2d(ap: Vec3, aq: Vec3, bp: Vec3, bq: Vec3) -> Option<(f32, f32)> {
    let u = aq - ap;
    let v = bq - bp;
    let w = ap - bp;
    let d = perp_xz(u, v);
    if d.abs() < SEGMENT_EPS {
        return None;
    }
    let s = perp_xz(v, w) / d;
    let t = perp_xz(u, w) / d;
    Some((s, t))
}

/// Crossing-number point in polygon test on the XZ plane.
pub fn point_in_polygon(pt: Vec3, verts: &[Vec3]) -> bool {
    let mut inside = false;
    let nverts = verts.len();
    let mut j = nverts.wrapping_sub(1);
    for i in 0..nverts {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > pt.z) != (vj.z > pt.z))
            && (pt.x < (vj.x - vi.x) * (pt.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Point in polygon test which also records the squared distance from `pt`
/// to every edge and the parametric closest position along it.
///
/// `edge_dist[j]` and `edge_t[j]` describe edge `j` (from `verts[j]` to
/// `verts[j + 1]`). Both slices must hold at least `verts.len()` values.
pub fn distance_pt_poly_edges_sqr(
    pt: Vec3,
    verts: &[Vec3],
    edge_dist: &mut [f32],
    edge_t: &mut [f32],
) -> bool {
    let mut inside = false;
    let nverts = verts.len();
    let mut j = nverts.wrapping_sub(1);
    for i in 0..nverts {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > pt.z) != (vj.z > pt.z))
            && (pt.x < (vj.x - vi.x) * (pt.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        let (d, t) = dist_pt_seg_sqr_2d(pt, vj, vi);
        edge_dist[j] = d;
        edge_t[j] = t;
        j = i;
    }
    inside
}

fn project_poly(axis: Vec3, poly: &[Vec3]) -> (f32, f32) {
    poly.iter().fold((f32::MAX, f32::MIN), |(rmin, rmax), &p| {
        let d = dot_2d(axis, p);
        (rmin.min(d), rmax.max(d))
    })
}

#[inline]
fn overlap_range(amin: f32, amax: f32, bmin: f32, bmax: f32, eps: f32) -> bool {
    !((amin + eps) > bmax || (amax - eps) < bmin)
}

fn separated_by_edges(edges_of: &[Vec3], a: &[Vec3], b: &[Vec3]) -> bool {
    let n = edges_of.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let va = edges_of[j];
        let vb = edges_of[i];
        let normal = Vec3::new(vb.z - va.z, 0.0, -(vb.x - va.x));
        let (amin, amax) = project_poly(normal, a);
        let (bmin, bmax) = project_poly(normal, b);
        if !overlap_range(amin, amax, bmin, bmax, OVERLAP_EPS) {
            return true;
        }
        j = i;
    }
    false
}

/// Separating axis overlap test for two convex polygons on the XZ plane.
///
/// Polygons that merely touch along an edge are not considered overlapping.
pub fn overlap_poly_poly_2d(polya: &[Vec3], polyb: &[Vec3]) -> bool {
    !(separated_by_edges(polya, polya, polyb) || separated_by_edges(polyb, polya, polyb))
}

/// Picks a point inside a convex polygon, uniformly by area.
///
/// `s` selects the fan triangle weighted by its area and `t` the point inside
/// it; both are expected in `[0, 1)`.
pub fn random_point_in_convex_poly(pts: &[Vec3], s: f32, t: f32) -> Vec3 {
    let npts = pts.len();
    if npts < 3 {
        return pts.first().copied().unwrap_or(Vec3::ZERO);
    }

    // Degenerate triangles keep a sliver of weight so every fan slot is reachable.
    let fan_area = |i: usize| tri_area_2d(pts[0], pts[i - 1], pts[i]).max(0.001);
    let area_sum: f32 = (2..npts).map(fan_area).sum();

    let thr = s * area_sum;
    let mut acc = 0.0;
    let mut u = 1.0;
    let mut tri = npts - 1;
    for i in 2..npts {
        let dacc = fan_area(i);
        if thr >= acc && thr < acc + dacc {
            u = (thr - acc) / dacc;
            tri = i;
            break;
        }
        acc += dacc;
    }

    let v = t.sqrt();
    let a = 1.0 - v;
    let b = (1.0 - u) * v;
    let c = u * v;

    pts[0] * a + pts[tri - 1] * b + pts[tri] * c
}
