//! Tile data builder
//!
//! Converts an indexed polygon mesh, as produced by a mesh baking pipeline,
//! into [`MeshTileData`] ready for [`NavMesh::add_tile`](super::NavMesh::add_tile):
//! world space vertices, polygons with decoded neighbour codes, detail
//! triangles, a bounding volume tree and off-mesh connection polygons.

use log::debug;
use navmesh_common::{Error, Result, Vec3};

use super::nav_mesh::{BVNode, MeshTileData, OffMeshConnection, Poly, PolyDetail, TileHeader};
use super::{
    EXT_LINK, MAX_AREAS, MAX_VERTS_PER_POLY, MESH_NULL_IDX, NULL_LINK, OFFMESH_CON_BIDIR,
    PolyFlags, PolyType, SIDE_NONE,
};

/// Off-mesh connection input
#[derive(Debug, Clone, PartialEq)]
pub struct OffMeshConnectionParams {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
    pub flags: PolyFlags,
    pub area: u8,
    pub bidirectional: bool,
    pub user_id: u32,
}

/// Input for [`NavMeshBuilder::build_tile`]
#[derive(Debug, Clone, PartialEq)]
pub struct NavMeshCreateParams {
    /// Polygon mesh vertices in cell units (x and z in `cs`, y in `ch`)
    pub verts: Vec<[u16; 3]>,
    /// `nvp` vertex indices followed by `nvp` neighbour codes per polygon.
    /// Unused slots hold [`MESH_NULL_IDX`]. A neighbour code is either the
    /// neighbouring polygon index or `0x8000 | dir` for a border edge, where
    /// `dir` 0..=3 names the tile side (x-, z+, x+, z-) and 0xf means no
    /// neighbour.
    pub polys: Vec<u16>,
    pub poly_flags: Vec<PolyFlags>,
    pub poly_areas: Vec<u8>,
    /// Maximum vertices per polygon in `polys`
    pub nvp: usize,

    /// Optional detail mesh: vertex base, vertex count, triangle base and
    /// triangle count per polygon. Each polygon's detail vertices start with
    /// the polygon's own vertices.
    pub detail_meshes: Vec<[u32; 4]>,
    pub detail_verts: Vec<Vec3>,
    pub detail_tris: Vec<[u8; 4]>,

    pub off_mesh_cons: Vec<OffMeshConnectionParams>,

    pub user_id: u32,
    pub tile_x: i32,
    pub tile_y: i32,
    pub tile_layer: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,

    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    /// Cell size on the xz-plane
    pub cs: f32,
    /// Cell height
    pub ch: f32,
    pub build_bv_tree: bool,
}

impl Default for NavMeshCreateParams {
    fn default() -> Self {
        Self {
            verts: Vec::new(),
            polys: Vec::new(),
            poly_flags: Vec::new(),
            poly_areas: Vec::new(),
            nvp: MAX_VERTS_PER_POLY,
            detail_meshes: Vec::new(),
            detail_verts: Vec::new(),
            detail_tris: Vec::new(),
            off_mesh_cons: Vec::new(),
            user_id: 0,
            tile_x: 0,
            tile_y: 0,
            tile_layer: 0,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.9,
            cs: 0.3,
            ch: 0.2,
            build_bv_tree: true,
        }
    }
}

impl NavMeshCreateParams {
    fn poly_count(&self) -> usize {
        self.polys.len() / (self.nvp * 2)
    }

    fn world_vert(&self, v: [u16; 3]) -> Vec3 {
        self.bmin + Vec3::new(v[0] as f32 * self.cs, v[1] as f32 * self.ch, v[2] as f32 * self.cs)
    }
}

#[derive(Debug, Clone, Copy)]
struct BVItem {
    bmin: [u16; 3],
    bmax: [u16; 3],
    i: i32,
}

/// Builds tile data from polygon mesh input
pub struct NavMeshBuilder;

impl NavMeshBuilder {
    /// Creates tile data from the provided parameters
    pub fn build_tile(params: &NavMeshCreateParams) -> Result<MeshTileData> {
        Self::validate_params(params)?;

        let poly_count = params.poly_count();

        // Vertical range of the tile, padded by climb height, used to
        // discard off-mesh connections that cannot touch this tile.
        let (mut hmin, mut hmax) = if params.detail_meshes.is_empty() {
            params.verts.iter().fold((f32::MAX, f32::MIN), |(mn, mx), v| {
                let h = params.bmin.y + v[1] as f32 * params.ch;
                (mn.min(h), mx.max(h))
            })
        } else {
            params
                .detail_verts
                .iter()
                .fold((f32::MAX, f32::MIN), |(mn, mx), v| (mn.min(v.y), mx.max(v.y)))
        };
        hmin -= params.walkable_climb;
        hmax += params.walkable_climb;
        let bmin = Vec3::new(params.bmin.x, hmin, params.bmin.z);
        let bmax = Vec3::new(params.bmax.x, hmax, params.bmax.z);

        let classes: Vec<(u8, u8)> = params
            .off_mesh_cons
            .iter()
            .map(|con| {
                let mut start = classify_off_mesh_point(con.start, bmin, bmax);
                let end = classify_off_mesh_point(con.end, bmin, bmax);
                if start == SIDE_NONE && (con.start.y < bmin.y || con.start.y > bmax.y) {
                    start = 0;
                }
                (start, end)
            })
            .collect();

        let mut verts: Vec<Vec3> = params.verts.iter().map(|&v| params.world_vert(v)).collect();
        let mut polys = Self::build_polygons(params)?;

        let mut off_mesh_cons = Vec::new();
        for (con, &(start_class, end_class)) in params.off_mesh_cons.iter().zip(&classes) {
            // Only connections starting inside this tile are stored here.
            if start_class != SIDE_NONE {
                continue;
            }
            let vbase = verts.len();
            if vbase + 2 > MESH_NULL_IDX as usize {
                return Err(Error::InvalidMesh("too many vertices for one tile".into()));
            }
            verts.push(con.start);
            verts.push(con.end);

            let mut poly = Poly {
                flags: con.flags,
                area: con.area,
                poly_type: PolyType::OffMeshConnection,
                vert_count: 2,
                ..Poly::default()
            };
            poly.verts[0] = vbase as u16;
            poly.verts[1] = (vbase + 1) as u16;

            off_mesh_cons.push(OffMeshConnection {
                pos: [con.start, con.end],
                radius: con.radius,
                poly: polys.len() as u16,
                flags: if con.bidirectional { OFFMESH_CON_BIDIR } else { 0 },
                side: end_class,
                user_id: con.user_id,
            });
            polys.push(poly);
        }

        let (detail_meshes, detail_verts, detail_tris) = Self::build_detail_meshes(params, &polys[..poly_count]);

        let bv_tree = if params.build_bv_tree {
            Self::build_bv_tree(params)
        } else {
            Vec::new()
        };

        let header = TileHeader {
            x: params.tile_x,
            y: params.tile_y,
            layer: params.tile_layer,
            user_id: params.user_id,
            walkable_height: params.walkable_height,
            walkable_radius: params.walkable_radius,
            walkable_climb: params.walkable_climb,
            bmin: params.bmin,
            bmax: params.bmax,
            bv_quant_factor: 1.0 / params.cs,
            off_mesh_base: poly_count,
            ..TileHeader::new(params.tile_x, params.tile_y, params.tile_layer)
        };

        debug!(
            "Built tile ({}, {}) with {} polygons, {} off-mesh connections, {} BV nodes",
            params.tile_x,
            params.tile_y,
            poly_count,
            off_mesh_cons.len(),
            bv_tree.len()
        );

        Ok(MeshTileData {
            header,
            verts,
            polys,
            detail_meshes,
            detail_verts,
            detail_tris,
            bv_tree,
            off_mesh_cons,
        })
    }

    fn validate_params(params: &NavMeshCreateParams) -> Result<()> {
        if params.nvp < 3 || params.nvp > MAX_VERTS_PER_POLY {
            return Err(Error::InvalidParam(format!(
                "nvp must be in 3..={MAX_VERTS_PER_POLY}, got {}",
                params.nvp
            )));
        }
        if params.verts.is_empty() || params.verts.len() >= MESH_NULL_IDX as usize {
            return Err(Error::InvalidParam(format!(
                "vertex count {} out of range",
                params.verts.len()
            )));
        }
        if params.polys.is_empty() || params.polys.len() % (params.nvp * 2) != 0 {
            return Err(Error::InvalidParam(
                "polygon data must hold nvp vertices and nvp neighbours per polygon".into(),
            ));
        }
        let poly_count = params.poly_count();
        if params.poly_flags.len() != poly_count || params.poly_areas.len() != poly_count {
            return Err(Error::InvalidParam(
                "poly_flags and poly_areas must have one entry per polygon".into(),
            ));
        }
        if params.poly_areas.iter().any(|&a| a as usize >= MAX_AREAS) {
            return Err(Error::InvalidParam(format!("area ids must be below {MAX_AREAS}")));
        }
        if !params.detail_meshes.is_empty() && params.detail_meshes.len() != poly_count {
            return Err(Error::InvalidParam(
                "detail mesh count must match polygon count".into(),
            ));
        }
        for dm in &params.detail_meshes {
            let [vb, ndv, tb, ntris] = dm.map(|x| x as usize);
            if vb + ndv > params.detail_verts.len() || tb + ntris > params.detail_tris.len() {
                return Err(Error::InvalidParam("detail mesh range out of bounds".into()));
            }
        }
        if params.cs <= 0.0 || params.ch <= 0.0 {
            return Err(Error::InvalidParam("cell size and height must be positive".into()));
        }
        Ok(())
    }

    fn build_polygons(params: &NavMeshCreateParams) -> Result<Vec<Poly>> {
        let nvp = params.nvp;
        params
            .polys
            .chunks_exact(nvp * 2)
            .enumerate()
            .map(|(i, src)| {
                let mut poly = Poly {
                    first_link: NULL_LINK,
                    flags: params.poly_flags[i],
                    area: params.poly_areas[i],
                    poly_type: PolyType::Ground,
                    ..Poly::default()
                };
                for j in 0..nvp {
                    if src[j] == MESH_NULL_IDX {
                        break;
                    }
                    if src[j] as usize >= params.verts.len() {
                        return Err(Error::InvalidMesh(format!(
                            "polygon {i} references missing vertex {}",
                            src[j]
                        )));
                    }
                    poly.verts[j] = src[j];
                    let nei = src[nvp + j];
                    poly.neis[j] = if nei & 0x8000 != 0 {
                        match nei & 0xf {
                            0 => EXT_LINK | 4,
                            1 => EXT_LINK | 2,
                            2 => EXT_LINK,
                            3 => EXT_LINK | 6,
                            _ => 0,
                        }
                    } else {
                        nei + 1
                    };
                    poly.vert_count += 1;
                }
                if poly.vert_count < 3 {
                    return Err(Error::InvalidMesh(format!("polygon {i} has fewer than 3 vertices")));
                }
                Ok(poly)
            })
            .collect()
    }

    /// Detail meshes for ground polygons. Without input detail data every
    /// polygon gets a triangle fan over its own vertices.
    fn build_detail_meshes(
        params: &NavMeshCreateParams,
        ground: &[Poly],
    ) -> (Vec<PolyDetail>, Vec<Vec3>, Vec<[u8; 4]>) {
        let mut detail_meshes = Vec::with_capacity(ground.len());
        let mut detail_verts = Vec::new();
        let mut detail_tris = Vec::new();

        if params.detail_meshes.is_empty() {
            for poly in ground {
                let nv = poly.vert_count as usize;
                detail_meshes.push(PolyDetail {
                    vert_base: 0,
                    vert_count: 0,
                    tri_base: detail_tris.len() as u32,
                    tri_count: (nv - 2) as u8,
                });
                for j in 2..nv {
                    // Edge flags: bit pair k marks edge k as polygon boundary.
                    let mut flags = 1 << 2;
                    if j == 2 {
                        flags |= 1;
                    }
                    if j == nv - 1 {
                        flags |= 1 << 4;
                    }
                    detail_tris.push([0, (j - 1) as u8, j as u8, flags]);
                }
            }
        } else {
            for (poly, dm) in ground.iter().zip(&params.detail_meshes) {
                let [vb, ndv, tb, ntris] = dm.map(|x| x as usize);
                let nv = poly.vert_count as usize;
                let extra = ndv.saturating_sub(nv);
                let first = (vb + nv).min(vb + ndv);
                detail_meshes.push(PolyDetail {
                    vert_base: detail_verts.len() as u32,
                    vert_count: extra as u8,
                    tri_base: tb as u32,
                    tri_count: ntris as u8,
                });
                // The polygon's own vertices are already in the tile.
                detail_verts.extend_from_slice(&params.detail_verts[first..first + extra]);
            }
            detail_tris = params.detail_tris.clone();
        }

        (detail_meshes, detail_verts, detail_tris)
    }

    fn build_bv_tree(params: &NavMeshCreateParams) -> Vec<BVNode> {
        let nvp = params.nvp;
        let quant_factor = 1.0 / params.cs;

        let mut items: Vec<BVItem> = params
            .polys
            .chunks_exact(nvp * 2)
            .enumerate()
            .map(|(i, p)| {
                let mut item = BVItem {
                    bmin: [u16::MAX; 3],
                    bmax: [0; 3],
                    i: i as i32,
                };

                if let Some(&[vb, ndv, _, _]) = params.detail_meshes.get(i) {
                    let (bmin, bmax) = params.detail_verts[vb as usize..(vb + ndv) as usize]
                        .iter()
                        .fold((Vec3::MAX, Vec3::MIN), |(mn, mx), v| (mn.min(*v), mx.max(*v)));
                    let qmin = ((bmin - params.bmin) * quant_factor).clamp(Vec3::ZERO, Vec3::splat(65535.0));
                    let qmax = ((bmax - params.bmin) * quant_factor).clamp(Vec3::ZERO, Vec3::splat(65535.0));
                    item.bmin = [qmin.x as u16, qmin.y as u16, qmin.z as u16];
                    item.bmax = [qmax.x as u16, qmax.y as u16, qmax.z as u16];
                } else {
                    for &vi in p[..nvp].iter().take_while(|&&v| v != MESH_NULL_IDX) {
                        let v = params.verts[vi as usize];
                        for k in 0..3 {
                            item.bmin[k] = item.bmin[k].min(v[k]);
                            item.bmax[k] = item.bmax[k].max(v[k]);
                        }
                    }
                    // Remap y into the same units as x and z.
                    item.bmin[1] = (item.bmin[1] as f32 * params.ch / params.cs).floor() as u16;
                    item.bmax[1] = (item.bmax[1] as f32 * params.ch / params.cs).ceil() as u16;
                }
                item
            })
            .collect();

        let mut nodes = Vec::with_capacity(items.len() * 2);
        subdivide(&mut items, &mut nodes);
        nodes
    }
}

fn calc_extents(items: &[BVItem]) -> ([u16; 3], [u16; 3]) {
    items.iter().fold(([u16::MAX; 3], [0; 3]), |(mut mn, mut mx), it| {
        for k in 0..3 {
            mn[k] = mn[k].min(it.bmin[k]);
            mx[k] = mx[k].max(it.bmax[k]);
        }
        (mn, mx)
    })
}

fn longest_axis(x: u16, y: u16, z: u16) -> usize {
    let mut axis = 0;
    let mut max_val = x;
    if y > max_val {
        axis = 1;
        max_val = y;
    }
    if z > max_val {
        axis = 2;
    }
    axis
}

fn subdivide(items: &mut [BVItem], nodes: &mut Vec<BVNode>) {
    let icur = nodes.len();
    nodes.push(BVNode::default());

    if let [item] = items {
        nodes[icur] = BVNode {
            bmin: item.bmin,
            bmax: item.bmax,
            i: item.i,
        };
        return;
    }

    let (bmin, bmax) = calc_extents(items);
    let axis = longest_axis(bmax[0] - bmin[0], bmax[1] - bmin[1], bmax[2] - bmin[2]);
    items.sort_by_key(|it| it.bmin[axis]);

    let split = items.len() / 2;
    let (left, right) = items.split_at_mut(split);
    subdivide(left, nodes);
    subdivide(right, nodes);

    let escape = (nodes.len() - icur) as i32;
    nodes[icur] = BVNode { bmin, bmax, i: -escape };
}

/// Side code of the tile border a point lies beyond, [`SIDE_NONE`] if inside
fn classify_off_mesh_point(pt: Vec3, bmin: Vec3, bmax: Vec3) -> u8 {
    const XP: u8 = 1 << 0;
    const ZP: u8 = 1 << 1;
    const XM: u8 = 1 << 2;
    const ZM: u8 = 1 << 3;

    let mut outcode = 0;
    if pt.x >= bmax.x {
        outcode |= XP;
    }
    if pt.z >= bmax.z {
        outcode |= ZP;
    }
    if pt.x < bmin.x {
        outcode |= XM;
    }
    if pt.z < bmin.z {
        outcode |= ZM;
    }

    match outcode {
        XP => 0,
        o if o == XP | ZP => 1,
        ZP => 2,
        o if o == XM | ZP => 3,
        XM => 4,
        o if o == XM | ZM => 5,
        ZM => 6,
        o if o == XP | ZM => 7,
        _ => SIDE_NONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_squares() -> NavMeshCreateParams {
        // Two unit squares side by side along x. The right square's x+ edge
        // is a tile border portal.
        let n = MESH_NULL_IDX;
        NavMeshCreateParams {
            verts: vec![[0, 0, 0], [0, 0, 1], [1, 0, 1], [1, 0, 0], [2, 0, 1], [2, 0, 0]],
            polys: vec![
                0, 1, 2, 3, n, n, /**/ n, n, 1, n, n, n, //
                3, 2, 4, 5, n, n, /**/ 0, n, 0x8002, n, n, n,
            ],
            poly_flags: vec![PolyFlags::WALK; 2],
            poly_areas: vec![0; 2],
            nvp: 6,
            bmin: Vec3::ZERO,
            bmax: Vec3::new(2.0, 1.0, 1.0),
            cs: 1.0,
            ch: 1.0,
            ..NavMeshCreateParams::default()
        }
    }

    #[test]
    fn test_build_polygons_and_neighbours() -> Result<()> {
        let data = NavMeshBuilder::build_tile(&two_squares())?;
        assert_eq!(data.polys.len(), 2);
        assert_eq!(data.polys[0].vert_count, 4);
        // Internal neighbours are stored one-based.
        assert_eq!(data.polys[0].neis[2], 2);
        assert_eq!(data.polys[1].neis[0], 1);
        // Border direction 2 (x+) becomes side 0.
        assert_eq!(data.polys[1].neis[2], EXT_LINK);
        assert_eq!(data.polys[0].neis[0], 0);
        assert_eq!(data.verts[4], Vec3::new(2.0, 0.0, 1.0));
        Ok(())
    }

    #[test]
    fn test_dummy_detail_mesh() -> Result<()> {
        let data = NavMeshBuilder::build_tile(&two_squares())?;
        assert_eq!(data.detail_meshes.len(), 2);
        assert_eq!(data.detail_meshes[1].tri_base, 2);
        assert_eq!(data.detail_meshes[1].tri_count, 2);
        assert_eq!(data.detail_tris[0], [0, 1, 2, (1 << 2) | 1]);
        assert_eq!(data.detail_tris[1], [0, 2, 3, (1 << 2) | (1 << 4)]);
        Ok(())
    }

    #[test]
    fn test_bv_tree_layout() -> Result<()> {
        let data = NavMeshBuilder::build_tile(&two_squares())?;
        assert_eq!(data.bv_tree.len(), 3);
        // Root covers everything and escapes past the whole tree.
        assert_eq!(data.bv_tree[0].i, -3);
        assert_eq!(data.bv_tree[0].bmin, [0, 0, 0]);
        assert_eq!(data.bv_tree[0].bmax, [2, 0, 1]);
        let leaves: Vec<i32> = data.bv_tree[1..].iter().map(|n| n.i).collect();
        assert_eq!(leaves, vec![0, 1]);
        Ok(())
    }

    #[test]
    fn test_off_mesh_connections() -> Result<()> {
        let mut params = two_squares();
        params.off_mesh_cons = vec![
            OffMeshConnectionParams {
                start: Vec3::new(0.5, 0.0, 0.5),
                end: Vec3::new(3.5, 0.0, 0.5),
                radius: 0.5,
                flags: PolyFlags::JUMP,
                area: 1,
                bidirectional: true,
                user_id: 7,
            },
            // Starts outside the tile, stored by the neighbour instead.
            OffMeshConnectionParams {
                start: Vec3::new(-1.0, 0.0, 0.5),
                end: Vec3::new(0.5, 0.0, 0.5),
                radius: 0.5,
                flags: PolyFlags::JUMP,
                area: 1,
                bidirectional: false,
                user_id: 8,
            },
        ];

        let data = NavMeshBuilder::build_tile(&params)?;
        assert_eq!(data.polys.len(), 3);
        assert_eq!(data.off_mesh_cons.len(), 1);
        let con = &data.off_mesh_cons[0];
        assert_eq!(con.poly, 2);
        assert_eq!(con.side, 0);
        assert!(con.is_bidirectional());
        assert_eq!(data.header.off_mesh_base, 2);
        assert!(data.polys[2].is_off_mesh_connection());
        assert_eq!(data.verts[data.polys[2].verts[1] as usize], Vec3::new(3.5, 0.0, 0.5));
        // Off-mesh polygons have no detail mesh.
        assert_eq!(data.detail_meshes.len(), 2);
        Ok(())
    }

    #[test]
    fn test_classify_off_mesh_point() {
        let bmin = Vec3::ZERO;
        let bmax = Vec3::splat(10.0);
        assert_eq!(classify_off_mesh_point(Vec3::splat(5.0), bmin, bmax), SIDE_NONE);
        assert_eq!(classify_off_mesh_point(Vec3::new(11.0, 0.0, 5.0), bmin, bmax), 0);
        assert_eq!(classify_off_mesh_point(Vec3::new(11.0, 0.0, 11.0), bmin, bmax), 1);
        assert_eq!(classify_off_mesh_point(Vec3::new(5.0, 0.0, -1.0), bmin, bmax), 6);
        assert_eq!(classify_off_mesh_point(Vec3::new(-1.0, 0.0, 11.0), bmin, bmax), 3);
    }

    #[test]
    fn test_validate_params() {
        let mut params = two_squares();
        params.nvp = 2;
        assert!(matches!(NavMeshBuilder::build_tile(&params), Err(Error::InvalidParam(_))));

        let mut params = two_squares();
        params.poly_flags.pop();
        assert!(NavMeshBuilder::build_tile(&params).is_err());

        let mut params = two_squares();
        params.polys[1] = 42;
        assert!(matches!(NavMeshBuilder::build_tile(&params), Err(Error::InvalidMesh(_))));
    }
}
