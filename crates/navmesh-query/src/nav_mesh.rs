//! Navigation mesh runtime data
//!
//! The navigation mesh is a grid of tiles. Each tile owns its polygons,
//! vertices, detail triangles and bounding volume tree, plus the links that
//! connect its polygons to each other and to polygons in neighbouring tiles.
//! Links are rebuilt whenever a tile is added or removed; everything else in
//! a tile is treated as read-only by the query engine.

use std::collections::HashMap;

use log::{info, warn};
use navmesh_common::{
    Error, Result, Vec3, closest_height_point_triangle, dist_pt_seg_sqr_2d, overlap_bounds,
    overlap_quant_bounds, point_in_polygon, sqr,
};

use super::{
    EXT_LINK, MAX_VERTS_PER_POLY, NAVMESH_MAGIC, NAVMESH_VERSION, NULL_LINK, NavMeshParams,
    OFFMESH_CON_BIDIR, PolyFlags, PolyRef, PolyType, QueryResult, SIDE_NONE, Status, TileRef,
};

/// Number of bits for polygon index
const POLY_BITS: u32 = 16;
/// Number of bits for tile index
const TILE_BITS: u32 = 10;
/// Number of bits for salt
const SALT_BITS: u32 = 6;

const POLY_MASK: u32 = (1 << POLY_BITS) - 1;
const TILE_MASK: u32 = (1 << TILE_BITS) - 1;
const SALT_MASK: u32 = (1 << SALT_BITS) - 1;

/// Detail triangle edge lies on the polygon boundary
const DETAIL_EDGE_BOUNDARY: u8 = 0x01;
/// Any of the three detail triangle edges lies on the boundary
const ANY_BOUNDARY_EDGE: u8 =
    DETAIL_EDGE_BOUNDARY | (DETAIL_EDGE_BOUNDARY << 2) | (DETAIL_EDGE_BOUNDARY << 4);

/// Maximum number of polygons collected when searching for the nearest one
/// inside a single tile
const MAX_NEAREST_CANDIDATES: usize = 128;

/// Creates a polygon reference from salt, tile and polygon indices
#[inline]
pub fn encode_poly_ref(salt: u32, tile_index: u32, poly_index: u32) -> PolyRef {
    PolyRef::new(
        ((salt & SALT_MASK) << (POLY_BITS + TILE_BITS))
            | ((tile_index & TILE_MASK) << POLY_BITS)
            | (poly_index & POLY_MASK),
    )
}

/// Decodes a polygon reference into salt, tile and polygon indices
#[inline]
pub fn decode_poly_ref(reference: PolyRef) -> (u32, u32, u32) {
    let id = reference.id();
    (
        (id >> (POLY_BITS + TILE_BITS)) & SALT_MASK,
        (id >> POLY_BITS) & TILE_MASK,
        id & POLY_MASK,
    )
}

#[inline]
pub(crate) fn decode_poly_index(reference: PolyRef) -> usize {
    (reference.id() & POLY_MASK) as usize
}

#[inline]
pub(crate) fn decode_tile_index(reference: PolyRef) -> usize {
    ((reference.id() >> POLY_BITS) & TILE_MASK) as usize
}

/// Side code of the tile on the other side of `side`
#[inline]
pub(crate) fn opposite_side(side: u8) -> u8 {
    (side + 4) & 0x7
}

/// Tile grid offset for each of the eight side codes
const SIDE_OFFSETS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Directed connection from a polygon to one of its neighbours
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Link {
    /// Neighbour polygon reference
    pub reference: PolyRef,
    /// Index of the next link of the same polygon, [`NULL_LINK`] if last
    pub next: u32,
    /// Index of the polygon edge that owns this link
    pub edge: u8,
    /// Tile border side code, [`SIDE_NONE`] for links inside a tile
    pub side: u8,
    /// Start of the connected edge portion, 0-255 along the edge
    pub bmin: u8,
    /// End of the connected edge portion, 0-255 along the edge
    pub bmax: u8,
}

impl Link {
    fn new(reference: PolyRef, edge: u8, side: u8) -> Self {
        Self {
            reference,
            next: NULL_LINK,
            edge,
            side,
            bmin: 0,
            bmax: 255,
        }
    }
}

/// Polygon in a tile
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Poly {
    /// Head of the polygon's link list
    pub first_link: u32,
    /// Vertex indices into the tile vertex array
    pub verts: [u16; MAX_VERTS_PER_POLY],
    /// Per-edge neighbour: 0 for none, `index + 1` inside the tile,
    /// `EXT_LINK | side` for tile border portals
    pub neis: [u16; MAX_VERTS_PER_POLY],
    /// User defined flags
    pub flags: PolyFlags,
    /// Number of used vertices
    pub vert_count: u8,
    /// Area id
    pub area: u8,
    /// Polygon kind
    pub poly_type: PolyType,
}

impl Default for Poly {
    fn default() -> Self {
        Self {
            first_link: NULL_LINK,
            verts: [0; MAX_VERTS_PER_POLY],
            neis: [0; MAX_VERTS_PER_POLY],
            flags: PolyFlags::empty(),
            vert_count: 0,
            area: 0,
            poly_type: PolyType::Ground,
        }
    }
}

impl Poly {
    /// Used vertex indices
    pub fn vert_indices(&self) -> &[u16] {
        &self.verts[..self.vert_count as usize]
    }

    pub fn is_off_mesh_connection(&self) -> bool {
        self.poly_type == PolyType::OffMeshConnection
    }
}

/// Detail sub-mesh of a ground polygon
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyDetail {
    /// First extra vertex in the tile detail vertex array
    pub vert_base: u32,
    /// First triangle in the tile detail triangle array
    pub tri_base: u32,
    /// Number of extra vertices
    pub vert_count: u8,
    /// Number of triangles
    pub tri_count: u8,
}

/// Bounding volume tree node with quantized bounds
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct BVNode {
    pub bmin: [u16; 3],
    pub bmax: [u16; 3],
    /// Polygon index for leaves, negative escape offset for internal nodes
    pub i: i32,
}

/// Off-mesh connection between two points
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct OffMeshConnection {
    /// Start and end points
    pub pos: [Vec3; 2],
    /// Snap radius of the end points
    pub radius: f32,
    /// Index of the connection polygon within the tile
    pub poly: u16,
    /// Connection flags, see [`OFFMESH_CON_BIDIR`]
    pub flags: u8,
    /// Side of the tile the end point lies in, [`SIDE_NONE`] if inside
    pub side: u8,
    pub user_id: u32,
}

impl OffMeshConnection {
    pub fn is_bidirectional(&self) -> bool {
        self.flags & OFFMESH_CON_BIDIR != 0
    }
}

/// Tile header
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileHeader {
    pub magic: u32,
    pub version: u32,
    /// Tile grid location
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    pub user_id: u32,
    /// Agent parameters the tile was built for
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    /// Tile bounds
    pub bmin: Vec3,
    pub bmax: Vec3,
    /// Converts world units to bounding volume tree units
    pub bv_quant_factor: f32,
    /// Index of the first off-mesh connection polygon
    pub off_mesh_base: usize,
}

impl TileHeader {
    pub fn new(x: i32, y: i32, layer: i32) -> Self {
        Self {
            magic: NAVMESH_MAGIC,
            version: NAVMESH_VERSION,
            x,
            y,
            layer,
            user_id: 0,
            walkable_height: 0.0,
            walkable_radius: 0.0,
            walkable_climb: 0.0,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            bv_quant_factor: 0.0,
            off_mesh_base: 0,
        }
    }
}

/// Tile contents as produced by the builder and handed to [`NavMesh::add_tile`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct MeshTileData {
    pub header: TileHeader,
    pub verts: Vec<Vec3>,
    pub polys: Vec<Poly>,
    pub detail_meshes: Vec<PolyDetail>,
    pub detail_verts: Vec<Vec3>,
    /// Detail triangles: three vertex indices and the edge flags
    pub detail_tris: Vec<[u8; 4]>,
    pub bv_tree: Vec<BVNode>,
    pub off_mesh_cons: Vec<OffMeshConnection>,
}

/// A tile slot of the navigation mesh
#[derive(Debug, Clone)]
pub struct MeshTile {
    /// Incremented every time the slot is freed
    pub salt: u32,
    /// `None` while the slot is unused
    pub header: Option<TileHeader>,
    pub verts: Vec<Vec3>,
    pub polys: Vec<Poly>,
    pub links: Vec<Link>,
    pub detail_meshes: Vec<PolyDetail>,
    pub detail_verts: Vec<Vec3>,
    pub detail_tris: Vec<[u8; 4]>,
    pub bv_tree: Vec<BVNode>,
    pub off_mesh_cons: Vec<OffMeshConnection>,
    index: u32,
    links_free_list: u32,
    next: Option<usize>,
}

/// Iterator over the link list of a polygon
pub struct LinkIter<'a> {
    links: &'a [Link],
    cur: u32,
}

impl<'a> Iterator for LinkIter<'a> {
    type Item = &'a Link;

    fn next(&mut self) -> Option<&'a Link> {
        let link = self.links.get(self.cur as usize)?;
        self.cur = link.next;
        Some(link)
    }
}

impl MeshTile {
    fn empty(index: usize) -> Self {
        Self {
            salt: 1,
            header: None,
            verts: Vec::new(),
            polys: Vec::new(),
            links: Vec::new(),
            detail_meshes: Vec::new(),
            detail_verts: Vec::new(),
            detail_tris: Vec::new(),
            bv_tree: Vec::new(),
            off_mesh_cons: Vec::new(),
            index: index as u32,
            links_free_list: NULL_LINK,
            next: None,
        }
    }

    /// Reference of polygon 0 in this tile; OR a polygon index onto it
    pub fn poly_ref_base(&self) -> PolyRef {
        encode_poly_ref(self.salt, self.index, 0)
    }

    pub(crate) fn poly_ref(&self, poly_index: usize) -> PolyRef {
        encode_poly_ref(self.salt, self.index, poly_index as u32)
    }

    /// World positions of a polygon's vertices. Only the first
    /// `poly.vert_count` entries are meaningful.
    pub fn poly_verts(&self, poly: &Poly) -> ([Vec3; MAX_VERTS_PER_POLY], usize) {
        let mut out = [Vec3::ZERO; MAX_VERTS_PER_POLY];
        let nv = poly.vert_count as usize;
        for (dst, &vi) in out.iter_mut().zip(poly.vert_indices()) {
            *dst = self.verts[vi as usize];
        }
        (out, nv)
    }

    /// Walks the link list of a polygon
    pub fn links_of(&self, poly: &Poly) -> LinkIter<'_> {
        LinkIter {
            links: &self.links,
            cur: poly.first_link,
        }
    }

    pub fn walkable_climb(&self) -> f32 {
        self.header.as_ref().map_or(0.0, |h| h.walkable_climb)
    }

    fn alloc_link(&mut self, link: Link) -> u32 {
        if self.links_free_list != NULL_LINK {
            let idx = self.links_free_list;
            self.links_free_list = self.links[idx as usize].next;
            self.links[idx as usize] = link;
            idx
        } else {
            self.links.push(link);
            (self.links.len() - 1) as u32
        }
    }

    fn free_link(&mut self, idx: u32) {
        self.links[idx as usize].next = self.links_free_list;
        self.links_free_list = idx;
    }

    /// Prepends a link to a polygon's link list
    fn push_link(&mut self, poly_index: usize, mut link: Link) {
        link.next = self.polys[poly_index].first_link;
        let idx = self.alloc_link(link);
        self.polys[poly_index].first_link = idx;
    }

    /// Vertices and edge flags of a detail triangle
    fn detail_tri(&self, pd: &PolyDetail, poly: &Poly, tri: usize) -> ([Vec3; 3], u8) {
        let t = self.detail_tris[pd.tri_base as usize + tri];
        let mut v = [Vec3::ZERO; 3];
        for (k, out) in v.iter_mut().enumerate() {
            let ti = t[k];
            *out = if ti < poly.vert_count {
                self.verts[poly.verts[ti as usize] as usize]
            } else {
                self.detail_verts[(pd.vert_base + (ti - poly.vert_count) as u32) as usize]
            };
        }
        (v, t[3])
    }

    /// Closest point to `pos` on the detail mesh edges of a polygon.
    ///
    /// With `only_boundary` set, only edges on the polygon boundary are
    /// considered.
    pub fn closest_point_on_detail_edges(&self, poly_index: usize, pos: Vec3, only_boundary: bool) -> Vec3 {
        let poly = &self.polys[poly_index];
        let mut dmin = f32::MAX;
        let mut tmin = 0.0;
        let mut pmin = Vec3::ZERO;
        let mut pmax = Vec3::ZERO;

        match self.detail_meshes.get(poly_index) {
            Some(pd) if pd.tri_count > 0 => {
                for i in 0..pd.tri_count as usize {
                    let (v, flags) = self.detail_tri(pd, poly, i);
                    if only_boundary && flags & ANY_BOUNDARY_EDGE == 0 {
                        continue;
                    }
                    let tris = self.detail_tris[pd.tri_base as usize + i];
                    let mut j = 2;
                    for k in 0..3 {
                        let edge_flags = (flags >> (j * 2)) & 0x3;
                        // Interior edges are shared by two triangles; visit them once.
                        if edge_flags & DETAIL_EDGE_BOUNDARY == 0 && (only_boundary || tris[j] < tris[k]) {
                            j = k;
                            continue;
                        }
                        let (d, t) = dist_pt_seg_sqr_2d(pos, v[j], v[k]);
                        if d < dmin {
                            dmin = d;
                            tmin = t;
                            pmin = v[j];
                            pmax = v[k];
                        }
                        j = k;
                    }
                }
            }
            _ => {
                let (verts, nv) = self.poly_verts(poly);
                let mut j = nv.wrapping_sub(1);
                for i in 0..nv {
                    let (d, t) = dist_pt_seg_sqr_2d(pos, verts[j], verts[i]);
                    if d < dmin {
                        dmin = d;
                        tmin = t;
                        pmin = verts[j];
                        pmax = verts[i];
                    }
                    j = i;
                }
            }
        }

        pmin.lerp(pmax, tmin)
    }

    /// Height of the detail surface of a ground polygon at the XZ location of
    /// `pos`, or `None` if the location is outside the polygon.
    pub fn poly_height(&self, poly_index: usize, pos: Vec3) -> Option<f32> {
        let poly = &self.polys[poly_index];
        if poly.is_off_mesh_connection() {
            return None;
        }

        let (verts, nv) = self.poly_verts(poly);
        if !point_in_polygon(pos, &verts[..nv]) {
            return None;
        }

        if let Some(pd) = self.detail_meshes.get(poly_index) {
            for i in 0..pd.tri_count as usize {
                let (v, _) = self.detail_tri(pd, poly, i);
                if let Some(h) = closest_height_point_triangle(pos, v[0], v[1], v[2]) {
                    return Some(h);
                }
            }
        }

        // The point is on an edge that the triangle tests rejected.
        Some(self.closest_point_on_detail_edges(poly_index, pos, false).y)
    }

    /// Closest point on a polygon to `pos`, and whether `pos` lies over it.
    pub fn closest_point_on_poly(&self, poly_index: usize, pos: Vec3) -> (Vec3, bool) {
        if let Some(h) = self.poly_height(poly_index, pos) {
            return (Vec3::new(pos.x, h, pos.z), true);
        }

        let poly = &self.polys[poly_index];
        if poly.is_off_mesh_connection() {
            let v0 = self.verts[poly.verts[0] as usize];
            let v1 = self.verts[poly.verts[1] as usize];
            let (_, t) = dist_pt_seg_sqr_2d(pos, v0, v1);
            return (v0.lerp(v1, t), false);
        }

        (self.closest_point_on_detail_edges(poly_index, pos, true), false)
    }

    /// Calls `visit` with the reference and index of every ground polygon
    /// whose bounds overlap the query box.
    pub(crate) fn query_polygons(&self, qmin: Vec3, qmax: Vec3, mut visit: impl FnMut(PolyRef, usize)) {
        let Some(header) = self.header.as_ref() else {
            return;
        };

        if !self.bv_tree.is_empty() {
            let tbmin = header.bmin;
            let tbmax = header.bmax;
            let qfac = header.bv_quant_factor;

            let minv = qmin.clamp(tbmin, tbmax) - tbmin;
            let maxv = qmax.clamp(tbmin, tbmax) - tbmin;
            let bmin = [
                ((qfac * minv.x) as u16) & 0xfffe,
                ((qfac * minv.y) as u16) & 0xfffe,
                ((qfac * minv.z) as u16) & 0xfffe,
            ];
            let bmax = [
                ((qfac * maxv.x + 1.0) as u16) | 1,
                ((qfac * maxv.y + 1.0) as u16) | 1,
                ((qfac * maxv.z + 1.0) as u16) | 1,
            ];

            let mut i = 0;
            while i < self.bv_tree.len() {
                let node = &self.bv_tree[i];
                let overlap = overlap_quant_bounds(&bmin, &bmax, &node.bmin, &node.bmax);
                let is_leaf = node.i >= 0;

                if is_leaf && overlap {
                    visit(self.poly_ref(node.i as usize), node.i as usize);
                }

                if overlap || is_leaf {
                    i += 1;
                } else {
                    i += (-node.i) as usize;
                }
            }
        } else {
            for (i, poly) in self.polys.iter().enumerate() {
                if poly.is_off_mesh_connection() {
                    continue;
                }
                let (verts, nv) = self.poly_verts(poly);
                let (bmin, bmax) = verts[..nv]
                    .iter()
                    .fold((Vec3::MAX, Vec3::MIN), |(mn, mx), v| (mn.min(*v), mx.max(*v)));
                if overlap_bounds(qmin, qmax, bmin, bmax) {
                    visit(self.poly_ref(i), i);
                }
            }
        }
    }

    /// Nearest ground polygon within the query box, without filtering.
    pub(crate) fn find_nearest_poly(&self, center: Vec3, half_extents: Vec3) -> Option<(PolyRef, Vec3)> {
        let climb = self.walkable_climb();
        let mut candidates = Vec::new();
        self.query_polygons(center - half_extents, center + half_extents, |r, i| {
            if candidates.len() < MAX_NEAREST_CANDIDATES {
                candidates.push((r, i));
            }
        });

        let mut best: Option<(PolyRef, Vec3, f32)> = None;
        for (r, i) in candidates {
            let (closest, over_poly) = self.closest_point_on_poly(i, center);
            let diff = center - closest;
            let d = if over_poly {
                // Above the polygon, within climb height counts as on it.
                let d = diff.y.abs() - climb;
                if d > 0.0 { d * d } else { 0.0 }
            } else {
                diff.length_squared()
            };
            if best.is_none_or(|(_, _, bd)| d < bd) {
                best = Some((r, closest, d));
            }
        }
        best.map(|(r, p, _)| (r, p))
    }
}

/// Navigation mesh made of tiles
#[derive(Debug, Clone)]
pub struct NavMesh {
    params: NavMeshParams,
    tiles: Vec<MeshTile>,
    next_free: Option<usize>,
    pos_lookup: HashMap<(i32, i32), Vec<usize>>,
}

impl NavMesh {
    /// Creates an empty navigation mesh
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if params.max_tiles == 0 || params.max_tiles > (1 << TILE_BITS) {
            return Err(Error::InvalidParam(format!(
                "max_tiles must be in 1..={}, got {}",
                1 << TILE_BITS,
                params.max_tiles
            )));
        }
        if params.max_polys_per_tile == 0 || params.max_polys_per_tile > (1 << POLY_BITS) {
            return Err(Error::InvalidParam(format!(
                "max_polys_per_tile must be in 1..={}, got {}",
                1 << POLY_BITS,
                params.max_polys_per_tile
            )));
        }
        if params.tile_width <= 0.0 || params.tile_height <= 0.0 {
            return Err(Error::InvalidParam("tile size must be positive".into()));
        }

        let mut tiles: Vec<MeshTile> = (0..params.max_tiles).map(MeshTile::empty).collect();
        let count = tiles.len();
        for (i, tile) in tiles.iter_mut().enumerate() {
            tile.next = (i + 1 < count).then_some(i + 1);
        }

        info!(
            "Created navigation mesh with {} tile slots of {}x{}",
            params.max_tiles, params.tile_width, params.tile_height
        );

        Ok(Self {
            params,
            tiles,
            next_free: Some(0),
            pos_lookup: HashMap::new(),
        })
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    pub fn max_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Tile slot by index, including unused slots
    pub fn tile(&self, index: usize) -> Option<&MeshTile> {
        self.tiles.get(index)
    }

    /// Iterates over tiles that currently hold data
    pub fn tiles(&self) -> impl Iterator<Item = &MeshTile> {
        self.tiles.iter().filter(|t| t.header.is_some())
    }

    /// Grid location of the tile containing `pos`
    pub fn calc_tile_loc(&self, pos: Vec3) -> (i32, i32) {
        let tx = ((pos.x - self.params.origin.x) / self.params.tile_width).floor() as i32;
        let ty = ((pos.z - self.params.origin.z) / self.params.tile_height).floor() as i32;
        (tx, ty)
    }

    fn tile_indices_at(&self, x: i32, y: i32) -> &[usize] {
        self.pos_lookup.get(&(x, y)).map(Vec::as_slice).unwrap_or(&[])
    }

    fn neighbour_tile_indices(&self, x: i32, y: i32, side: u8) -> &[usize] {
        let (dx, dy) = SIDE_OFFSETS[side as usize & 0x7];
        self.tile_indices_at(x + dx, y + dy)
    }

    /// All layers at a grid location
    pub fn get_tiles_at(&self, x: i32, y: i32) -> Vec<&MeshTile> {
        self.tile_indices_at(x, y).iter().map(|&i| &self.tiles[i]).collect()
    }

    pub fn get_tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.tile_indices_at(x, y)
            .iter()
            .map(|&i| &self.tiles[i])
            .find(|t| t.header.as_ref().is_some_and(|h| h.layer == layer))
    }

    pub fn get_tile_ref(&self, tile: &MeshTile) -> TileRef {
        TileRef::new(encode_poly_ref(tile.salt, tile.index, 0).id())
    }

    pub fn get_tile_by_ref(&self, tile_ref: TileRef) -> Option<&MeshTile> {
        let (salt, index, _) = decode_poly_ref(PolyRef::new(tile_ref.id()));
        self.tiles
            .get(index as usize)
            .filter(|t| t.salt == salt && t.header.is_some())
    }

    /// Resolves a polygon reference
    pub fn get_tile_and_poly_by_ref(&self, reference: PolyRef) -> QueryResult<(&MeshTile, &Poly)> {
        if !reference.is_valid() {
            return Err(Status::failure(Status::INVALID_PARAM));
        }
        let (salt, it, ip) = decode_poly_ref(reference);
        let tile = self
            .tiles
            .get(it as usize)
            .filter(|t| t.salt == salt && t.header.is_some())
            .ok_or(Status::failure(Status::INVALID_PARAM))?;
        let poly = tile
            .polys
            .get(ip as usize)
            .ok_or(Status::failure(Status::INVALID_PARAM))?;
        Ok((tile, poly))
    }

    pub fn is_valid_poly_ref(&self, reference: PolyRef) -> bool {
        self.get_tile_and_poly_by_ref(reference).is_ok()
    }

    fn poly_mut(&mut self, reference: PolyRef) -> QueryResult<&mut Poly> {
        self.get_tile_and_poly_by_ref(reference)?;
        let (_, it, ip) = decode_poly_ref(reference);
        Ok(&mut self.tiles[it as usize].polys[ip as usize])
    }

    pub fn set_poly_flags(&mut self, reference: PolyRef, flags: PolyFlags) -> QueryResult<()> {
        self.poly_mut(reference)?.flags = flags;
        Ok(())
    }

    pub fn get_poly_flags(&self, reference: PolyRef) -> QueryResult<PolyFlags> {
        Ok(self.get_tile_and_poly_by_ref(reference)?.1.flags)
    }

    pub fn set_poly_area(&mut self, reference: PolyRef, area: u8) -> QueryResult<()> {
        self.poly_mut(reference)?.area = area;
        Ok(())
    }

    pub fn get_poly_area(&self, reference: PolyRef) -> QueryResult<u8> {
        Ok(self.get_tile_and_poly_by_ref(reference)?.1.area)
    }

    /// Off-mesh connection record backing an off-mesh connection polygon
    pub fn get_off_mesh_connection_by_ref(&self, reference: PolyRef) -> QueryResult<&OffMeshConnection> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(reference)?;
        if !poly.is_off_mesh_connection() {
            return Err(Status::failure(Status::INVALID_PARAM));
        }
        let header = tile.header.as_ref().ok_or(Status::failure(Status::INVALID_PARAM))?;
        decode_poly_index(reference)
            .checked_sub(header.off_mesh_base)
            .and_then(|idx| tile.off_mesh_cons.get(idx))
            .ok_or(Status::failure(Status::INVALID_PARAM))
    }

    /// Start and end points of an off-mesh connection, ordered for travel
    /// from `prev_ref`.
    pub fn get_off_mesh_connection_poly_end_points(
        &self,
        prev_ref: PolyRef,
        poly_ref: PolyRef,
    ) -> QueryResult<(Vec3, Vec3)> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(poly_ref)?;
        if !poly.is_off_mesh_connection() {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        // The link with edge 0 points at the polygon the start vertex lands on.
        let mut idx0 = 0;
        let mut idx1 = 1;
        if let Some(link) = tile.links_of(poly).find(|l| l.edge == 0) {
            if link.reference != prev_ref {
                idx0 = 1;
                idx1 = 0;
            }
        }

        Ok((
            tile.verts[poly.verts[idx0] as usize],
            tile.verts[poly.verts[idx1] as usize],
        ))
    }

    /// Adds a tile and links it to its neighbours
    pub fn add_tile(&mut self, data: MeshTileData) -> Result<TileRef> {
        let header = &data.header;
        if header.magic != NAVMESH_MAGIC {
            warn!("Rejected tile data with magic {:#010x}", header.magic);
            return Err(Error::WrongMagic(header.magic));
        }
        if header.version != NAVMESH_VERSION {
            warn!("Rejected tile data with version {}", header.version);
            return Err(Error::WrongVersion {
                found: header.version,
                expected: NAVMESH_VERSION,
            });
        }
        if data.polys.len() > self.params.max_polys_per_tile {
            return Err(Error::InvalidParam(format!(
                "tile has {} polygons, mesh allows {}",
                data.polys.len(),
                self.params.max_polys_per_tile
            )));
        }
        let (x, y, layer) = (header.x, header.y, header.layer);
        if self.get_tile_at(x, y, layer).is_some() {
            return Err(Error::AlreadyOccupied { x, y, layer });
        }

        let idx = self.next_free.ok_or(Error::OutOfTiles)?;
        let tile = &mut self.tiles[idx];
        self.next_free = tile.next.take();

        tile.header = Some(data.header);
        tile.verts = data.verts;
        tile.polys = data.polys;
        tile.detail_meshes = data.detail_meshes;
        tile.detail_verts = data.detail_verts;
        tile.detail_tris = data.detail_tris;
        tile.bv_tree = data.bv_tree;
        tile.off_mesh_cons = data.off_mesh_cons;
        tile.links.clear();
        tile.links_free_list = NULL_LINK;

        self.pos_lookup.entry((x, y)).or_default().push(idx);

        self.connect_int_links(idx);
        self.base_off_mesh_links(idx);
        self.connect_ext_off_mesh_links(idx, idx, None);

        let layers: Vec<usize> = self
            .tile_indices_at(x, y)
            .iter()
            .copied()
            .filter(|&n| n != idx)
            .collect();
        for nei in layers {
            self.connect_ext_links(idx, nei, None);
            self.connect_ext_links(nei, idx, None);
            self.connect_ext_off_mesh_links(idx, nei, None);
            self.connect_ext_off_mesh_links(nei, idx, None);
        }

        for side in 0..8u8 {
            let neis = self.neighbour_tile_indices(x, y, side).to_vec();
            for nei in neis {
                self.connect_ext_links(idx, nei, Some(side));
                self.connect_ext_links(nei, idx, Some(opposite_side(side)));
                self.connect_ext_off_mesh_links(idx, nei, Some(side));
                self.connect_ext_off_mesh_links(nei, idx, Some(opposite_side(side)));
            }
        }

        let tile = &self.tiles[idx];
        info!(
            "Added tile ({}, {}, layer {}) with {} polygons and {} links",
            x,
            y,
            layer,
            tile.polys.len(),
            tile.links.len()
        );

        Ok(self.get_tile_ref(tile))
    }

    /// Removes a tile, unlinking it from its neighbours. References into the
    /// tile become stale.
    pub fn remove_tile(&mut self, tile_ref: TileRef) -> Result<MeshTileData> {
        let (salt, index, _) = decode_poly_ref(PolyRef::new(tile_ref.id()));
        let idx = index as usize;
        let (x, y, layer) = match self.tiles.get(idx) {
            Some(MeshTile {
                salt: s,
                header: Some(h),
                ..
            }) if *s == salt => (h.x, h.y, h.layer),
            _ => return Err(Error::InvalidParam(format!("invalid tile reference {:#x}", tile_ref.id()))),
        };

        if let Some(list) = self.pos_lookup.get_mut(&(x, y)) {
            list.retain(|&i| i != idx);
            if list.is_empty() {
                self.pos_lookup.remove(&(x, y));
            }
        }

        let layers = self.tile_indices_at(x, y).to_vec();
        for nei in layers {
            self.unconnect_links(nei, idx);
        }
        for side in 0..8u8 {
            let neis = self.neighbour_tile_indices(x, y, side).to_vec();
            for nei in neis {
                self.unconnect_links(nei, idx);
            }
        }

        let tile = &mut self.tiles[idx];
        let header = tile
            .header
            .take()
            .ok_or_else(|| Error::InvalidParam("tile has no data".into()))?;
        let data = MeshTileData {
            header,
            verts: std::mem::take(&mut tile.verts),
            polys: std::mem::take(&mut tile.polys),
            detail_meshes: std::mem::take(&mut tile.detail_meshes),
            detail_verts: std::mem::take(&mut tile.detail_verts),
            detail_tris: std::mem::take(&mut tile.detail_tris),
            bv_tree: std::mem::take(&mut tile.bv_tree),
            off_mesh_cons: std::mem::take(&mut tile.off_mesh_cons),
        };
        tile.links.clear();
        tile.links_free_list = NULL_LINK;

        tile.salt = (tile.salt + 1) & SALT_MASK;
        if tile.salt == 0 {
            tile.salt += 1;
        }

        tile.next = self.next_free;
        self.next_free = Some(idx);

        info!("Removed tile ({}, {}, layer {})", x, y, layer);

        Ok(data)
    }

    fn connect_int_links(&mut self, idx: usize) {
        let tile = &mut self.tiles[idx];
        for i in 0..tile.polys.len() {
            tile.polys[i].first_link = NULL_LINK;
            let poly = tile.polys[i];
            if poly.is_off_mesh_connection() {
                continue;
            }

            // Reverse order so the list reads in edge order.
            for j in (0..poly.vert_count as usize).rev() {
                let nei = poly.neis[j];
                if nei == 0 || nei & EXT_LINK != 0 {
                    continue;
                }
                let reference = tile.poly_ref((nei - 1) as usize);
                tile.push_link(i, Link::new(reference, j as u8, SIDE_NONE));
            }
        }
    }

    fn base_off_mesh_links(&mut self, idx: usize) {
        let tile = &mut self.tiles[idx];
        let climb = tile.walkable_climb();

        for n in 0..tile.off_mesh_cons.len() {
            let con = tile.off_mesh_cons[n];
            let ext = Vec3::new(con.radius, climb, con.radius);
            let p = con.pos[0];

            let Some((land_ref, nearest)) = tile.find_nearest_poly(p, ext) else {
                continue;
            };
            if sqr(nearest.x - p.x) + sqr(nearest.z - p.z) > sqr(con.radius) {
                continue;
            }

            let poly_index = con.poly as usize;
            let v0 = tile.polys[poly_index].verts[0] as usize;
            tile.verts[v0] = nearest;

            tile.push_link(poly_index, Link::new(land_ref, 0, SIDE_NONE));
            let con_ref = tile.poly_ref(poly_index);
            tile.push_link(decode_poly_index(land_ref), Link::new(con_ref, 0xff, SIDE_NONE));
        }
    }

    /// Links off-mesh connections of `target` whose end point lands in `tile`
    fn connect_ext_off_mesh_links(&mut self, tile_idx: usize, target_idx: usize, side: Option<u8>) {
        let opposite = side.map_or(SIDE_NONE, opposite_side);
        let tile = &self.tiles[tile_idx];
        let target = &self.tiles[target_idx];
        let climb = target.walkable_climb();

        let mut landed = Vec::new();
        for con in &target.off_mesh_cons {
            if con.side != opposite {
                continue;
            }
            let target_poly = &target.polys[con.poly as usize];
            // Skip connections whose start point never reached the mesh.
            if target_poly.first_link == NULL_LINK {
                continue;
            }

            let ext = Vec3::new(con.radius, climb, con.radius);
            let p = con.pos[1];
            let Some((land_ref, nearest)) = tile.find_nearest_poly(p, ext) else {
                continue;
            };
            if sqr(nearest.x - p.x) + sqr(nearest.z - p.z) > sqr(con.radius) {
                continue;
            }
            landed.push((*con, land_ref, nearest));
        }

        for (con, land_ref, nearest) in landed {
            let target = &mut self.tiles[target_idx];
            let poly_index = con.poly as usize;
            let v1 = target.polys[poly_index].verts[1] as usize;
            target.verts[v1] = nearest;
            target.push_link(poly_index, Link::new(land_ref, 1, opposite));
            let con_ref = target.poly_ref(poly_index);

            if con.is_bidirectional() {
                let tile = &mut self.tiles[tile_idx];
                tile.push_link(
                    decode_poly_index(land_ref),
                    Link::new(con_ref, 0xff, side.unwrap_or(SIDE_NONE)),
                );
            }
        }
    }

    /// Links border edges of `tile` to matching border edges of `target`
    fn connect_ext_links(&mut self, tile_idx: usize, target_idx: usize, side: Option<u8>) {
        let tile = &self.tiles[tile_idx];
        let target = &self.tiles[target_idx];
        if target.header.is_none() {
            return;
        }

        let mut pending = Vec::new();
        for (i, poly) in tile.polys.iter().enumerate() {
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                if poly.neis[j] & EXT_LINK == 0 {
                    continue;
                }
                let dir = (poly.neis[j] & 0xff) as u8;
                if side.is_some_and(|s| s != dir) {
                    continue;
                }

                let va = tile.verts[poly.verts[j] as usize];
                let vb = tile.verts[poly.verts[(j + 1) % nv] as usize];
                for (nei_ref, amin, amax) in find_connecting_polys(va, vb, target, opposite_side(dir)) {
                    let mut link = Link::new(nei_ref, j as u8, dir);
                    let span = match dir {
                        0 | 4 => Some((va.z, vb.z)),
                        2 | 6 => Some((va.x, vb.x)),
                        _ => None,
                    };
                    if let Some((a, b)) = span {
                        let mut tmin = (amin - a) / (b - a);
                        let mut tmax = (amax - a) / (b - a);
                        if tmin > tmax {
                            std::mem::swap(&mut tmin, &mut tmax);
                        }
                        link.bmin = (tmin.clamp(0.0, 1.0) * 255.0).round() as u8;
                        link.bmax = (tmax.clamp(0.0, 1.0) * 255.0).round() as u8;
                    }
                    pending.push((i, link));
                }
            }
        }

        let tile = &mut self.tiles[tile_idx];
        for (poly_index, link) in pending {
            tile.push_link(poly_index, link);
        }
    }

    /// Drops every link in `tile` that points into `target`
    fn unconnect_links(&mut self, tile_idx: usize, target_idx: usize) {
        let tile = &mut self.tiles[tile_idx];
        for i in 0..tile.polys.len() {
            let mut j = tile.polys[i].first_link;
            let mut pj = NULL_LINK;
            while j != NULL_LINK {
                let link = tile.links[j as usize];
                if decode_tile_index(link.reference) == target_idx {
                    let nj = link.next;
                    if pj == NULL_LINK {
                        tile.polys[i].first_link = nj;
                    } else {
                        tile.links[pj as usize].next = nj;
                    }
                    tile.free_link(j);
                    j = nj;
                } else {
                    pj = j;
                    j = link.next;
                }
            }
        }
    }
}

fn slab_end_points(va: Vec3, vb: Vec3, side: u8) -> ([f32; 2], [f32; 2]) {
    match side {
        0 | 4 => {
            if va.z < vb.z {
                ([va.z, va.y], [vb.z, vb.y])
            } else {
                ([vb.z, vb.y], [va.z, va.y])
            }
        }
        2 | 6 => {
            if va.x < vb.x {
                ([va.x, va.y], [vb.x, vb.y])
            } else {
                ([vb.x, vb.y], [va.x, va.y])
            }
        }
        _ => ([0.0; 2], [0.0; 2]),
    }
}

fn slab_coord(v: Vec3, side: u8) -> f32 {
    match side {
        0 | 4 => v.x,
        2 | 6 => v.z,
        _ => 0.0,
    }
}

/// Whether two border edge slabs overlap along the border and are within
/// climb height of each other.
fn overlap_slabs(amin: [f32; 2], amax: [f32; 2], bmin: [f32; 2], bmax: [f32; 2], px: f32, py: f32) -> bool {
    let minx = (amin[0] + px).max(bmin[0] + px);
    let maxx = (amax[0] - px).min(bmax[0] - px);
    if minx > maxx {
        return false;
    }

    let ad = (amax[1] - amin[1]) / (amax[0] - amin[0]);
    let ak = amin[1] - ad * amin[0];
    let aminy = ad * minx + ak;
    let amaxy = ad * maxx + ak;

    let bd = (bmax[1] - bmin[1]) / (bmax[0] - bmin[0]);
    let bk = bmin[1] - bd * bmin[0];
    let bminy = bd * minx + bk;
    let bmaxy = bd * maxx + bk;

    let dmin = bminy - aminy;
    let dmax = bmaxy - amaxy;

    // Crossing segments always overlap.
    if dmin * dmax < 0.0 {
        return true;
    }

    let thr = sqr(py * 2.0);
    dmin * dmin <= thr || dmax * dmax <= thr
}

/// Polygons of `tile` whose `side` border edge overlaps the edge (va, vb).
/// Returns at most four hits with the overlapping range along the border.
fn find_connecting_polys(va: Vec3, vb: Vec3, tile: &MeshTile, side: u8) -> Vec<(PolyRef, f32, f32)> {
    const MAX_CONNECTIONS: usize = 4;

    let (amin, amax) = slab_end_points(va, vb, side);
    let apos = slab_coord(va, side);
    let climb = tile.walkable_climb();
    let m = EXT_LINK | side as u16;

    let mut out = Vec::new();
    for (i, poly) in tile.polys.iter().enumerate() {
        let nv = poly.vert_count as usize;
        for j in 0..nv {
            if poly.neis[j] != m {
                continue;
            }
            let vc = tile.verts[poly.verts[j] as usize];
            let vd = tile.verts[poly.verts[(j + 1) % nv] as usize];
            if (apos - slab_coord(vc, side)).abs() > 0.01 {
                continue;
            }
            let (bmin, bmax) = slab_end_points(vc, vd, side);
            if !overlap_slabs(amin, amax, bmin, bmax, 0.01, climb) {
                continue;
            }
            if out.len() < MAX_CONNECTIONS {
                out.push((tile.poly_ref(i), amin[0].max(bmin[0]), amax[0].min(bmax[0])));
            }
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poly_ref_encoding() {
        let r = encode_poly_ref(5, 17, 1234);
        assert_eq!(decode_poly_ref(r), (5, 17, 1234));
        assert_eq!(decode_tile_index(r), 17);
        assert_eq!(decode_poly_index(r), 1234);
    }

    #[test]
    fn test_opposite_side() {
        assert_eq!(opposite_side(0), 4);
        assert_eq!(opposite_side(2), 6);
        assert_eq!(opposite_side(5), 1);
    }

    #[test]
    fn test_overlap_slabs() {
        assert!(overlap_slabs([0.0, 0.0], [2.0, 0.0], [1.0, 0.0], [3.0, 0.0], 0.01, 0.5));
        // Too far apart vertically.
        assert!(!overlap_slabs([0.0, 0.0], [2.0, 0.0], [1.0, 5.0], [3.0, 5.0], 0.01, 0.5));
        // Touching at a single point only.
        assert!(!overlap_slabs([0.0, 0.0], [1.0, 0.0], [1.0, 0.0], [2.0, 0.0], 0.01, 0.5));
    }

    #[test]
    fn test_new_validates_params() {
        let params = NavMeshParams {
            max_tiles: 0,
            ..NavMeshParams::default()
        };
        assert!(matches!(NavMesh::new(params), Err(Error::InvalidParam(_))));

        let params = NavMeshParams {
            max_tiles: 2048,
            ..NavMeshParams::default()
        };
        assert!(NavMesh::new(params).is_err());
    }

    #[test]
    fn test_rejects_wrong_magic_and_version() -> Result<()> {
        let mut nav_mesh = NavMesh::new(NavMeshParams::default())?;

        let mut data = MeshTileData {
            header: TileHeader::new(0, 0, 0),
            verts: Vec::new(),
            polys: Vec::new(),
            detail_meshes: Vec::new(),
            detail_verts: Vec::new(),
            detail_tris: Vec::new(),
            bv_tree: Vec::new(),
            off_mesh_cons: Vec::new(),
        };
        data.header.magic = 0x1234;
        assert!(matches!(nav_mesh.add_tile(data.clone()), Err(Error::WrongMagic(0x1234))));

        data.header.magic = NAVMESH_MAGIC;
        data.header.version = 3;
        assert!(matches!(
            nav_mesh.add_tile(data.clone()),
            Err(Error::WrongVersion { found: 3, .. })
        ));

        data.header.version = NAVMESH_VERSION;
        nav_mesh.add_tile(data.clone())?;
        assert!(matches!(
            nav_mesh.add_tile(data),
            Err(Error::AlreadyOccupied { x: 0, y: 0, layer: 0 })
        ));
        Ok(())
    }

    #[test]
    fn test_calc_tile_loc() -> Result<()> {
        let nav_mesh = NavMesh::new(NavMeshParams {
            origin: Vec3::new(-10.0, 0.0, -10.0),
            tile_width: 5.0,
            tile_height: 5.0,
            ..NavMeshParams::default()
        })?;
        assert_eq!(nav_mesh.calc_tile_loc(Vec3::new(-10.0, 0.0, -10.0)), (0, 0));
        assert_eq!(nav_mesh.calc_tile_loc(Vec3::new(1.0, 0.0, -11.0)), (2, -1));
        Ok(())
    }
}
