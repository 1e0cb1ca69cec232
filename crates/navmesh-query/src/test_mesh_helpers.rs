//! Test mesh fixtures
//!
//! Every fixture goes through [`NavMeshBuilder`] and [`NavMesh::add_tile`], so
//! tests exercise the same link setup as real tile data. Grids use unit
//! cells (`cs = ch = 1`) with cell (c, r) covering x in [c, c+1] and z in
//! [r, r+1]; polygon indices are assigned row by row over the kept cells.

use crate::nav_mesh_builder::{NavMeshBuilder, OffMeshConnectionParams};
use crate::{
    MESH_NULL_IDX, NavMesh, NavMeshCreateParams, NavMeshParams, PolyFlags, PolyRef, Result, Vec3,
};

/// Tile input for a `cols` x `rows` grid of unit squares at tile (tx, ty).
///
/// Cells rejected by `keep` are left out. With `portals` set, edges on the
/// tile boundary are marked as tile border portals.
pub fn grid_tile_params(
    cols: u16,
    rows: u16,
    tile: (i32, i32),
    portals: bool,
    keep: impl Fn(u16, u16) -> bool,
) -> NavMeshCreateParams {
    let n = MESH_NULL_IDX;
    let vert_index = |c: u16, r: u16| r * (cols + 1) + c;

    let mut verts = Vec::new();
    for r in 0..=rows {
        for c in 0..=cols {
            verts.push([c, 0, r]);
        }
    }

    let mut cell_poly = vec![None; cols as usize * rows as usize];
    let mut count = 0u16;
    for r in 0..rows {
        for c in 0..cols {
            if keep(c, r) {
                cell_poly[(r * cols + c) as usize] = Some(count);
                count += 1;
            }
        }
    }
    let poly_at = |c: i32, r: i32| -> Option<u16> {
        if c < 0 || r < 0 || c >= cols as i32 || r >= rows as i32 {
            return None;
        }
        cell_poly[(r * cols as i32 + c) as usize]
    };

    let mut polys = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            if poly_at(c as i32, r as i32).is_none() {
                continue;
            }
            let (ci, ri) = (c as i32, r as i32);
            // Edge order: x-, z+, x+, z-.
            let edges = [
                (poly_at(ci - 1, ri), c == 0, 0x8000),
                (poly_at(ci, ri + 1), r == rows - 1, 0x8001),
                (poly_at(ci + 1, ri), c == cols - 1, 0x8002),
                (poly_at(ci, ri - 1), r == 0, 0x8003),
            ];
            polys.extend_from_slice(&[
                vert_index(c, r),
                vert_index(c, r + 1),
                vert_index(c + 1, r + 1),
                vert_index(c + 1, r),
                n,
                n,
            ]);
            for (nei, on_border, portal) in edges {
                polys.push(match nei {
                    Some(p) => p,
                    None if portals && on_border => portal,
                    None => n,
                });
            }
            polys.extend_from_slice(&[n, n]);
        }
    }

    let origin = Vec3::new(tile.0 as f32 * cols as f32, 0.0, tile.1 as f32 * rows as f32);
    NavMeshCreateParams {
        verts,
        polys,
        poly_flags: vec![PolyFlags::WALK; count as usize],
        poly_areas: vec![0; count as usize],
        nvp: 6,
        tile_x: tile.0,
        tile_y: tile.1,
        bmin: origin,
        bmax: origin + Vec3::new(cols as f32, 1.0, rows as f32),
        walkable_height: 2.0,
        walkable_radius: 0.25,
        walkable_climb: 0.5,
        cs: 1.0,
        ch: 1.0,
        ..NavMeshCreateParams::default()
    }
}

/// Empty mesh whose tiles are `cols` x `rows` unit cells
pub fn empty_mesh(cols: u16, rows: u16, max_tiles: usize) -> Result<NavMesh> {
    NavMesh::new(NavMeshParams {
        origin: Vec3::ZERO,
        tile_width: cols as f32,
        tile_height: rows as f32,
        max_tiles,
        max_polys_per_tile: 256,
    })
}

/// Single tile mesh from prepared builder input
pub fn mesh_from_params(params: &NavMeshCreateParams, cols: u16, rows: u16) -> Result<NavMesh> {
    let mut nav_mesh = empty_mesh(cols, rows, 4)?;
    nav_mesh.add_tile(NavMeshBuilder::build_tile(params)?)?;
    Ok(nav_mesh)
}

/// Single tile, fully connected grid of unit squares
pub fn create_grid_mesh(cols: u16, rows: u16) -> Result<NavMesh> {
    mesh_from_params(&grid_tile_params(cols, rows, (0, 0), false, |_, _| true), cols, rows)
}

/// `tiles_x` x `tiles_y` tiles of `cells` x `cells` squares, connected
/// through tile border portals
pub fn create_tiled_mesh(tiles_x: i32, tiles_y: i32, cells: u16) -> Result<NavMesh> {
    let mut nav_mesh = empty_mesh(cells, cells, 16)?;
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let params = grid_tile_params(cells, cells, (tx, ty), true, |_, _| true);
            nav_mesh.add_tile(NavMeshBuilder::build_tile(&params)?)?;
        }
    }
    Ok(nav_mesh)
}

/// Row of three cells with the middle one missing: two islands, polygon 0
/// at x in [0, 1] and polygon 1 at x in [2, 3]
pub fn create_disconnected_mesh() -> Result<NavMesh> {
    mesh_from_params(&grid_tile_params(3, 1, (0, 0), false, |c, _| c != 1), 3, 1)
}

/// The two islands of [`create_disconnected_mesh`] joined by an off-mesh
/// connection from (0.5, 0, 0.5) to (2.5, 0, 0.5)
pub fn create_off_mesh_mesh(bidirectional: bool) -> Result<NavMesh> {
    let mut params = grid_tile_params(3, 1, (0, 0), false, |c, _| c != 1);
    params.off_mesh_cons.push(OffMeshConnectionParams {
        start: Vec3::new(0.5, 0.0, 0.5),
        end: Vec3::new(2.5, 0.0, 0.5),
        radius: 0.4,
        flags: PolyFlags::JUMP,
        area: 1,
        bidirectional,
        user_id: 42,
    });
    mesh_from_params(&params, 3, 1)
}

/// Reference of polygon `index` in the tile at (tx, ty)
pub fn poly_ref_at(nav_mesh: &NavMesh, tx: i32, ty: i32, index: u32) -> PolyRef {
    nav_mesh
        .get_tile_at(tx, ty, 0)
        .map_or(PolyRef::NULL, |t| PolyRef::new(t.poly_ref_base().id() | index))
}

/// One tile, two polygons of unequal area: polygon 0 covers x in [0, 1],
/// polygon 1 covers x in [1, 4], both with z in [0, 1]
pub fn create_uneven_mesh() -> Result<NavMesh> {
    let n = MESH_NULL_IDX;
    let mut params = grid_tile_params(4, 1, (0, 0), false, |_, _| true);
    params.verts = vec![[0, 0, 0], [0, 0, 1], [1, 0, 1], [1, 0, 0], [4, 0, 1], [4, 0, 0]];
    params.polys = vec![
        0, 1, 2, 3, n, n, n, n, 1, n, n, n, //
        3, 2, 4, 5, n, n, 0, n, n, n, n, n,
    ];
    params.poly_flags = vec![PolyFlags::WALK; 2];
    params.poly_areas = vec![0; 2];
    mesh_from_params(&params, 4, 1)
}

/// Deterministic uniform generator in `[0, 1)` (64-bit LCG, top 24 bits)
pub fn lcg(seed: u64) -> impl FnMut() -> f32 {
    let mut state = seed;
    move || {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (state >> 40) as f32 / (1u64 << 24) as f32
    }
}
