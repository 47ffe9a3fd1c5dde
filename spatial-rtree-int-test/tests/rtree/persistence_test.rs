use rand::rngs::StdRng;
use rand::SeedableRng;
use spatial_rtree::{
    BlockStore, FileBlockStore, IndexConstraintType, RTreeBounds, RTreeIndex, SpatialError,
    StorageDescriptor, DEFAULT_BLOCK_SIZE,
};
use spatial_rtree_int_test::test_util::{
    cleanup, create_test_context, insert_boxes, random_boxes, random_query, reopen, run_test,
    sorted, TEST_OPTIONS,
};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

#[test]
fn test_reopen_returns_same_results() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(2024);
            let boxes = random_boxes(&mut rng, 2000, 500.0, 20.0);
            insert_boxes(&mut ctx.index().write(), &boxes, 0)?;

            let queries: Vec<RTreeBounds> =
                (0..25).map(|_| random_query(&mut rng, 500.0, 200.0)).collect();
            let before: Vec<_> = {
                let index = ctx.index();
                let index = index.read();
                queries
                    .iter()
                    .map(|q| index.query(q).map(sorted))
                    .collect::<Result<_, _>>()?
            };

            let reopened = reopen(&ctx)?;
            let index = reopened.index();
            let index = index.read();
            assert_eq!(index.stats()?.entries, 2000);
            for (query, expected) in queries.iter().zip(&before) {
                assert_eq!(&sorted(index.query(query)?), expected);
            }
            index.verify_allocations()?;
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_mutations_after_reopen_persist() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(77);
            let boxes = random_boxes(&mut rng, 600, 200.0, 10.0);
            insert_boxes(&mut ctx.index().write(), &boxes[..300], 0)?;

            let ctx = reopen(&ctx)?;
            {
                let index = ctx.index();
                let mut index = index.write();
                insert_boxes(&mut index, &boxes[300..], 300)?;

                // drop the first hundred rows again
                let values: Vec<_> = boxes[..100].iter().copied().map(Some).collect();
                let row_ids: Vec<_> = (0..100).map(Some).collect();
                let outcome = index.delete(&values, &row_ids)?;
                assert_eq!(outcome.applied, 100);
            }

            let ctx = reopen(&ctx)?;
            let index = ctx.index();
            let index = index.read();
            let everything = RTreeBounds::new(-1000.0, -1000.0, 1000.0, 1000.0);
            assert_eq!(sorted(index.query(&everything)?), (100..600).collect::<Vec<_>>());
            index.verify_allocations()?;
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_dropped_index_releases_blocks() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(8);
            let boxes = random_boxes(&mut rng, 5000, 1000.0, 10.0);
            insert_boxes(&mut ctx.index().write(), &boxes, 0)?;

            let ctx = reopen(&ctx)?;
            {
                let index = ctx.index();
                let mut index = index.write();
                index.commit_drop();
                assert!(index.tree().is_empty());
            }

            let ctx = reopen(&ctx)?;
            let index = ctx.index();
            let index = index.read();
            assert!(index.tree().is_empty());
            assert_eq!(index.in_memory_size(), 0);
            assert!(index
                .query(&RTreeBounds::new(-1e4, -1e4, 1e4, 1e4))?
                .is_empty());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_corrupted_block_is_detected() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(3);
            let boxes = random_boxes(&mut rng, 200, 100.0, 10.0);
            insert_boxes(&mut ctx.index().write(), &boxes, 0)?;

            let descriptor = ctx.index().write().storage_descriptor()?;
            ctx.store().write_descriptor(&descriptor.encode()?)?;
            ctx.store().sync()?;

            // flip a payload byte of the first data block
            {
                let mut file = OpenOptions::new().write(true).open(ctx.store_file())?;
                file.seek(SeekFrom::Start(DEFAULT_BLOCK_SIZE as u64 + 16))?;
                file.write_all(&[0xAB, 0xCD])?;
                file.sync_all()?;
            }

            let store = Arc::new(FileBlockStore::open(ctx.store_file())?);
            let bytes = store.read_descriptor().unwrap_or_default();
            let descriptor = StorageDescriptor::decode(&bytes)?;
            let result = RTreeIndex::open(
                &descriptor.name,
                IndexConstraintType::None,
                TEST_OPTIONS,
                store,
                &descriptor,
            );
            assert!(matches!(result, Err(SpatialError::Corrupted(_))));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_reopen_with_different_options_fails() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(4);
            let boxes = random_boxes(&mut rng, 50, 100.0, 10.0);
            insert_boxes(&mut ctx.index().write(), &boxes, 0)?;
            let descriptor = ctx.index().write().storage_descriptor()?;

            let result = RTreeIndex::open(
                "test_index",
                IndexConstraintType::None,
                [("max_node_capacity", 16)],
                ctx.store(),
                &descriptor,
            );
            assert!(result.is_err());
            Ok(())
        },
        cleanup,
    )
}
