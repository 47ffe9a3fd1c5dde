use rand::rngs::StdRng;
use rand::SeedableRng;
use spatial_rtree::{BoundingBox, RTreeBounds, RowId};
use spatial_rtree_int_test::test_util::{
    brute_force, cleanup, create_test_context, insert_boxes, random_boxes, random_query, run_test,
    sorted,
};

#[test]
fn test_scan_matches_brute_force() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(1234);
            let boxes = random_boxes(&mut rng, 3000, 1000.0, 25.0);
            let index = ctx.index();
            insert_boxes(&mut index.write(), &boxes, 0)?;

            let labelled: Vec<(RowId, BoundingBox)> = boxes
                .iter()
                .enumerate()
                .map(|(i, bbox)| (i as RowId, *bbox))
                .collect();

            let index = index.read();
            for _ in 0..100 {
                let query = random_query(&mut rng, 1000.0, 300.0);
                assert_eq!(sorted(index.query(&query)?), brute_force(&labelled, &query));
            }

            // whole extent
            let everything = RTreeBounds::new(-2000.0, -2000.0, 2000.0, 2000.0);
            assert_eq!(index.query(&everything)?.len(), 3000);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_batched_scan_has_no_duplicates() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(99);
            let boxes = random_boxes(&mut rng, 1000, 100.0, 10.0);
            let index = ctx.index();
            insert_boxes(&mut index.write(), &boxes, 1)?;

            let index = index.read();
            let query = RTreeBounds::new(-50.0, -50.0, 50.0, 50.0);
            let expected = sorted(index.query(&query)?);
            assert!(!expected.is_empty());

            for capacity in [1, 3, 16, 1000] {
                let mut state = index.initialize_scan(&query);
                let mut rows = Vec::new();
                loop {
                    let batch = index.scan(&mut state, capacity)?;
                    assert!(batch.len() <= capacity);
                    let done = batch.len() < capacity;
                    rows.extend(batch);
                    if done {
                        break;
                    }
                }
                let count = rows.len();
                let rows = sorted(rows);
                assert_eq!(rows.len(), count);
                assert_eq!(rows, expected, "capacity {}", capacity);
            }
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_disjoint_query_touches_no_nodes() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(5);
            let boxes = random_boxes(&mut rng, 500, 100.0, 5.0);
            let index = ctx.index();
            insert_boxes(&mut index.write(), &boxes, 0)?;

            let index = index.read();
            let reads = index.tree().node_reads();
            let mut state = index.initialize_scan(&RTreeBounds::new(1e6, 1e6, 2e6, 2e6));
            assert!(state.is_exhausted());
            assert!(index.scan(&mut state, 2048)?.is_empty());
            assert_eq!(index.tree().node_reads(), reads);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_unit_grid_queries() {
    run_test(
        create_test_context,
        |ctx| {
            let index = ctx.index();
            let mut index = index.write();

            let mut values = Vec::new();
            let mut row_ids = Vec::new();
            for y in 0..3 {
                for x in 0..3 {
                    let (cx, cy) = (x as f64, y as f64);
                    values.push(Some(BoundingBox::new(cx - 0.5, cy - 0.5, cx + 0.5, cy + 0.5)));
                    row_ids.push(Some(y * 3 + x + 1));
                }
            }
            index.insert(&values, &row_ids)?;

            // boxes touching the query border count as intersecting
            let border = RTreeBounds::new(0.5, 0.5, 1.5, 1.5);
            assert_eq!(sorted(index.query(&border)?), (1..=9).collect::<Vec<_>>());

            let interior = RTreeBounds::new(0.75, 0.75, 1.25, 1.25);
            assert_eq!(index.query(&interior)?, vec![5]);

            let middle_column = RTreeBounds::new(0.9, -1.0, 1.1, 3.0);
            assert_eq!(sorted(index.query(&middle_column)?), vec![2, 5, 8]);
            Ok(())
        },
        cleanup,
    )
}
