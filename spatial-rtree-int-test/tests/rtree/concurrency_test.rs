use rand::rngs::StdRng;
use rand::SeedableRng;
use spatial_rtree::{BoundingBox, RTreeBounds, RowId};
use spatial_rtree_int_test::test_util::{
    brute_force, cleanup, create_test_context, insert_boxes, random_boxes, random_query, run_test,
    sorted,
};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_concurrent_readers() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(11);
            let boxes = random_boxes(&mut rng, 2000, 500.0, 15.0);
            let index = ctx.index();
            insert_boxes(&mut index.write(), &boxes, 0)?;

            let labelled: Arc<Vec<(RowId, BoundingBox)>> = Arc::new(
                boxes
                    .iter()
                    .enumerate()
                    .map(|(i, bbox)| (i as RowId, *bbox))
                    .collect(),
            );

            let num_threads = 6;
            let barrier = Arc::new(Barrier::new(num_threads));
            let mut handles = vec![];

            for thread_id in 0..num_threads {
                let index = Arc::clone(&index);
                let labelled = Arc::clone(&labelled);
                let barrier = Arc::clone(&barrier);

                handles.push(thread::spawn(move || {
                    let mut rng = StdRng::seed_from_u64(100 + thread_id as u64);
                    barrier.wait();

                    for _ in 0..50 {
                        let query = random_query(&mut rng, 500.0, 150.0);
                        let found = index.read().query(&query).map(sorted);
                        assert_eq!(found.ok(), Some(brute_force(&labelled, &query)));
                    }
                }));
            }

            for handle in handles {
                handle.join().expect("reader thread panicked");
            }
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_readers_alongside_writer() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(12);
            let boxes = random_boxes(&mut rng, 1500, 300.0, 10.0);
            let index = ctx.index();
            insert_boxes(&mut index.write(), &boxes[..500], 0)?;

            let boxes = Arc::new(boxes);
            let barrier = Arc::new(Barrier::new(4));
            let mut handles = vec![];

            {
                let index = Arc::clone(&index);
                let boxes = Arc::clone(&boxes);
                let barrier = Arc::clone(&barrier);
                handles.push(thread::spawn(move || {
                    barrier.wait();
                    for (chunk, start) in boxes[500..].chunks(100).zip((500..).step_by(100)) {
                        insert_boxes(&mut index.write(), chunk, start).expect("insert failed");
                    }
                }));
            }

            for _ in 0..3 {
                let index = Arc::clone(&index);
                let barrier = Arc::clone(&barrier);
                handles.push(thread::spawn(move || {
                    barrier.wait();
                    let everything = RTreeBounds::new(-1000.0, -1000.0, 1000.0, 1000.0);
                    let mut last = 0;
                    for _ in 0..40 {
                        let count = index.read().query(&everything).map(|rows| rows.len());
                        let count = count.expect("scan failed");
                        // the writer only adds whole batches
                        assert!(count >= last);
                        assert_eq!(count % 100, 0);
                        last = count;
                    }
                }));
            }

            for handle in handles {
                handle.join().expect("worker thread panicked");
            }

            let index = index.read();
            assert_eq!(
                sorted(index.query(&RTreeBounds::new(-1000.0, -1000.0, 1000.0, 1000.0))?),
                (0..1500).collect::<Vec<_>>()
            );
            index.verify_allocations()?;
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_scan_states_are_independent() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(13);
            let boxes = random_boxes(&mut rng, 800, 100.0, 5.0);
            let index = ctx.index();
            insert_boxes(&mut index.write(), &boxes, 0)?;

            let index = index.read();
            let left = RTreeBounds::new(-100.0, -100.0, 0.0, 100.0);
            let right = RTreeBounds::new(0.0, -100.0, 100.0, 100.0);
            let mut left_state = index.initialize_scan(&left);
            let mut right_state = index.initialize_scan(&right);

            // interleave two scans over the same index
            let (mut left_rows, mut right_rows) = (Vec::new(), Vec::new());
            let (mut left_done, mut right_done) = (false, false);
            while !left_done || !right_done {
                if !left_done {
                    let batch = index.scan(&mut left_state, 13)?;
                    left_done = batch.len() < 13;
                    left_rows.extend(batch);
                }
                if !right_done {
                    let batch = index.scan(&mut right_state, 29)?;
                    right_done = batch.len() < 29;
                    right_rows.extend(batch);
                }
            }

            assert_eq!(sorted(left_rows), sorted(index.query(&left)?));
            assert_eq!(sorted(right_rows), sorted(index.query(&right)?));
            Ok(())
        },
        cleanup,
    )
}
