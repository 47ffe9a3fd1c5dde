use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use spatial_rtree::{BoundingBox, Pointer, RTreeBounds, RowId, SlotAllocator};
use spatial_rtree_int_test::test_util::{
    brute_force, cleanup, create_test_context, insert_boxes, random_boxes, random_query, reopen,
    run_test, sorted,
};

#[test]
fn test_delete_everything_empties_tree() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(21);
            let boxes = random_boxes(&mut rng, 1000, 200.0, 10.0);
            let index = ctx.index();
            let mut index = index.write();
            insert_boxes(&mut index, &boxes, 0)?;
            assert!(index.stats()?.height > 1);

            let mut order: Vec<usize> = (0..boxes.len()).collect();
            order.shuffle(&mut rng);
            for i in order {
                let outcome = index.delete(&[Some(boxes[i])], &[Some(i as RowId)])?;
                assert_eq!(outcome.applied, 1);
            }

            assert!(index.tree().is_empty());
            assert_eq!(index.tree().root().pointer, Pointer::Null);
            assert_eq!(index.tree().leaf_allocator().allocated_slots(), 0);
            assert_eq!(index.tree().node_allocator().allocated_slots(), 0);
            index.verify_allocations()?;
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_interleaved_insert_delete_matches_brute_force() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(22);
            let boxes = random_boxes(&mut rng, 1200, 400.0, 20.0);
            let mut live: Vec<(RowId, BoundingBox)> = Vec::new();
            let index = ctx.index();
            let mut index = index.write();

            for (round, chunk) in boxes.chunks(200).enumerate() {
                let first = (round * 200) as RowId;
                insert_boxes(&mut index, chunk, first)?;
                live.extend(chunk.iter().enumerate().map(|(i, b)| (first + i as RowId, *b)));

                // drop every third live row
                let (gone, kept): (Vec<_>, Vec<_>) = live
                    .iter()
                    .enumerate()
                    .partition(|(position, _)| position % 3 == 0);
                let values: Vec<_> = gone.iter().map(|(_, (_, b))| Some(*b)).collect();
                let row_ids: Vec<_> = gone.iter().map(|(_, (id, _))| Some(*id)).collect();
                let outcome = index.delete(&values, &row_ids)?;
                assert_eq!(outcome.applied, gone.len());
                live = kept.into_iter().map(|(_, entry)| *entry).collect();

                index.verify_allocations()?;
                for _ in 0..10 {
                    let query = random_query(&mut rng, 400.0, 150.0);
                    assert_eq!(sorted(index.query(&query)?), brute_force(&live, &query));
                }
            }
            assert_eq!(index.stats()?.entries, live.len() as u64);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_duplicate_bounds_delete_only_matching_row() {
    run_test(
        create_test_context,
        |ctx| {
            let index = ctx.index();
            let mut index = index.write();
            let same = BoundingBox::new(1.0, 1.0, 2.0, 2.0);
            let boxes = vec![same; 50];
            insert_boxes(&mut index, &boxes, 100)?;

            let outcome = index.delete(&[Some(same)], &[Some(125)])?;
            assert_eq!(outcome.applied, 1);
            let outcome = index.delete(&[Some(same)], &[Some(125)])?;
            assert_eq!(outcome.not_found, 1);

            let rows = sorted(index.query(&RTreeBounds::new(1.5, 1.5, 1.5, 1.5))?);
            let expected: Vec<RowId> = (100..150).filter(|id| *id != 125).collect();
            assert_eq!(rows, expected);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_delete_with_wrong_bounds_is_not_found() {
    run_test(
        create_test_context,
        |ctx| {
            let index = ctx.index();
            let mut index = index.write();
            let boxes: Vec<_> = (0..40)
                .map(|i| BoundingBox::new(i as f64, 0.0, i as f64 + 0.5, 0.5))
                .collect();
            insert_boxes(&mut index, &boxes, 0)?;

            let far = BoundingBox::new(900.0, 900.0, 901.0, 901.0);
            let outcome = index.delete(&[Some(far)], &[Some(7)])?;
            assert_eq!(outcome.not_found, 1);
            assert_eq!(index.stats()?.entries, 40);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_excluded_rows_are_counted_and_reset_on_open() {
    run_test(
        create_test_context,
        |ctx| {
            {
                let index = ctx.index();
                let mut index = index.write();
                let values = vec![
                    Some(BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
                    None,
                    Some(BoundingBox::new(f64::NAN, 0.0, 1.0, 1.0)),
                    Some(BoundingBox::new(2.0, 2.0, 3.0, 3.0)),
                ];
                let row_ids = vec![Some(1), Some(2), Some(3), None];
                let outcome = index.insert(&values, &row_ids)?;
                assert_eq!(outcome.applied, 1);
                assert_eq!(outcome.excluded, 3);
                assert_eq!(index.excluded_rows(), 3);
            }

            let ctx = reopen(&ctx)?;
            let index = ctx.index();
            let index = index.read();
            assert_eq!(index.excluded_rows(), 0);
            assert_eq!(index.query(&RTreeBounds::new(-5.0, -5.0, 5.0, 5.0))?, vec![1]);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_huge_coordinates_are_clamped() {
    run_test(
        create_test_context,
        |ctx| {
            let index = ctx.index();
            let mut index = index.write();
            let values = vec![
                Some(BoundingBox::new(-1e300, -1e300, 1e300, 1e300)),
                Some(BoundingBox::new(1e39, 1e39, f64::INFINITY, f64::INFINITY)),
            ];
            let outcome = index.insert(&values, &[Some(1), Some(2)])?;
            assert_eq!(outcome.applied, 2);

            assert_eq!(index.query(&RTreeBounds::new(0.0, 0.0, 1.0, 1.0))?, vec![1]);
            assert_eq!(
                sorted(index.query(&RTreeBounds::new(f32::MAX, f32::MAX, f32::MAX, f32::MAX))?),
                vec![1, 2]
            );
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_freed_slots_are_reused() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(23);
            let boxes = random_boxes(&mut rng, 400, 100.0, 5.0);
            let index = ctx.index();
            let mut index = index.write();

            insert_boxes(&mut index, &boxes, 0)?;
            let size = index.in_memory_size();
            let values: Vec<_> = boxes.iter().copied().map(Some).collect();
            let row_ids: Vec<_> = (0..400).map(Some).collect();

            for _ in 0..3 {
                index.delete(&values, &row_ids)?;
                assert!(index.tree().is_empty());
                insert_boxes(&mut index, &boxes, 0)?;
                assert_eq!(index.in_memory_size(), size);
            }
            index.verify_allocations()?;
            Ok(())
        },
        cleanup,
    )
}
