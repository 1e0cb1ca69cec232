//! Spatial lookups and local movement scenarios

#[cfg(test)]
mod tests {
    use crate::test_mesh_helpers::{create_grid_mesh, create_tiled_mesh, lcg, poly_ref_at};
    use crate::{DefaultQueryFilter, NavMeshQuery, PolyFlags, PolyRef, RaycastOptions, Result, Status, Vec3};
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_radius_circle_is_start_only() -> Result<()> {
        let nav_mesh = create_grid_mesh(3, 3)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let start = poly_ref_at(&nav_mesh, 0, 0, 4);

        let around = query
            .find_polys_around_circle(start, Vec3::new(1.5, 0.0, 1.5), 0.0, &DefaultQueryFilter::new(), 16)
            .expect("circle");
        assert_eq!(around.polys.len(), 1);
        assert_eq!(around.polys[0].poly_ref, start);
        assert_eq!(around.polys[0].parent, PolyRef::NULL);
        assert_relative_eq!(around.polys[0].cost, 0.0);
        Ok(())
    }

    #[test]
    fn test_nearest_poly_outside_mesh() -> Result<()> {
        let nav_mesh = create_grid_mesh(2, 2)?;
        let query = NavMeshQuery::new(&nav_mesh, 16).expect("query");
        let filter = DefaultQueryFilter::new();

        let far = query
            .find_nearest_poly(Vec3::new(50.0, 0.0, 50.0), Vec3::ONE, &filter)
            .expect("query");
        assert!(far.is_none());

        // Just off the edge: found, but not over the polygon.
        let near = query
            .find_nearest_poly(Vec3::new(2.3, 0.0, 0.5), Vec3::new(0.5, 1.0, 0.5), &filter)
            .expect("query")
            .expect("found");
        assert_eq!(near.poly_ref, poly_ref_at(&nav_mesh, 0, 0, 1));
        assert!(!near.over_poly);
        assert_relative_eq!(near.pos.x, 2.0, epsilon = 1e-5);

        let err = query
            .find_nearest_poly(Vec3::ZERO, Vec3::new(-1.0, 1.0, 1.0), &filter)
            .expect_err("negative extents");
        assert!(err.is_invalid_param());
        Ok(())
    }

    #[test]
    fn test_query_polygons_spans_tiles() -> Result<()> {
        let nav_mesh = create_tiled_mesh(2, 2, 2)?;
        let query = NavMeshQuery::new(&nav_mesh, 16).expect("query");
        let filter = DefaultQueryFilter::new();

        let (polys, status) = query
            .query_polygons(Vec3::new(2.0, 0.5, 2.0), Vec3::new(2.5, 1.0, 2.5), &filter, 64)
            .expect("query");
        assert_eq!(status, Status::SUCCESS);
        assert_eq!(polys.len(), 16);
        assert!(polys.iter().all(|&r| nav_mesh.is_valid_poly_ref(r)));

        // A small box around the shared corner reaches into every tile. The
        // bounding volume test is conservative, so only check containment.
        let (corner, _) = query
            .query_polygons(Vec3::new(2.0, 0.0, 2.0), Vec3::new(0.1, 1.0, 0.1), &filter, 64)
            .expect("query");
        for (tx, ty, index) in [(0, 0, 3), (1, 0, 2), (0, 1, 1), (1, 1, 0)] {
            assert!(corner.contains(&poly_ref_at(&nav_mesh, tx, ty, index)));
        }
        Ok(())
    }

    #[test]
    fn test_random_points_on_tiled_mesh() -> Result<()> {
        let nav_mesh = create_tiled_mesh(2, 2, 2)?;
        let query = NavMeshQuery::new(&nav_mesh, 16).expect("query");
        let filter = DefaultQueryFilter::new();

        let mut rand = lcg(0x2545_f491);

        for _ in 0..20 {
            let sample = query.find_random_point(&filter, &mut rand).expect("random point");
            let (poly_ref, pos) = (sample.poly_ref, sample.pos);
            assert!(query.is_valid_poly_ref(poly_ref, &filter));
            assert!((0.0..=4.0).contains(&pos.x) && (0.0..=4.0).contains(&pos.z));
            assert_eq!(query.get_poly_height(poly_ref, pos).expect("height"), Some(0.0));
        }
        Ok(())
    }

    #[test]
    fn test_blocked_move_and_raycast_agree() -> Result<()> {
        let mut nav_mesh = create_grid_mesh(3, 1)?;
        nav_mesh
            .set_poly_flags(poly_ref_at(&nav_mesh, 0, 0, 1), PolyFlags::SWIM)
            .expect("flags");

        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let mut filter = DefaultQueryFilter::new();
        filter.include_flags = PolyFlags::WALK;
        let start = poly_ref_at(&nav_mesh, 0, 0, 0);
        let (start_pos, end_pos) = (Vec3::new(0.5, 0.0, 0.5), Vec3::new(2.5, 0.0, 0.5));

        let hit = query
            .raycast(start, start_pos, end_pos, &filter, RaycastOptions::default(), PolyRef::NULL)
            .expect("raycast");
        assert!(hit.hit_wall());
        assert_relative_eq!(hit.t, 0.25, epsilon = 1e-5);
        assert_eq!(hit.path, vec![start]);
        assert_relative_eq!(hit.hit_point(start_pos, end_pos).x, 1.0, epsilon = 1e-5);

        let moved = query
            .move_along_surface(start, start_pos, end_pos, &filter, 8)
            .expect("move");
        assert_eq!(moved.visited, vec![start]);
        assert_relative_eq!(moved.pos.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(moved.pos.z, 0.5, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_local_neighbourhood_across_tiles() -> Result<()> {
        let nav_mesh = create_tiled_mesh(2, 1, 2)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64).expect("query");
        let start = poly_ref_at(&nav_mesh, 0, 0, 1);

        let around = query
            .find_local_neighbourhood(start, Vec3::new(1.9, 0.0, 0.5), 0.3, &DefaultQueryFilter::new(), 8)
            .expect("neighbourhood");
        let found: Vec<PolyRef> = around.polys.iter().map(|v| v.poly_ref).collect();
        assert_eq!(found, vec![start, poly_ref_at(&nav_mesh, 1, 0, 0)]);
        assert_eq!(around.polys[1].parent, start);
        Ok(())
    }
}
