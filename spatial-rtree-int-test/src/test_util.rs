use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::Rng;
use spatial_rtree::{
    BlockStore, BoundingBox, FileBlockStore, IndexConstraintType, RTreeBounds, RTreeIndex, RowId,
    SpatialError, SpatialResult, StorageDescriptor,
};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{env, fs};

/// Options every test index is created with
pub const TEST_OPTIONS: [(&str, i64); 2] = [("max_node_capacity", 8), ("min_node_capacity", 3)];

/// Runs a test between a setup and a teardown step.
///
/// The teardown runs even when the test fails or panics; the failure is
/// reported afterwards.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: FnOnce(TestContext) -> SpatialResult<()>,
    B: FnOnce() -> SpatialResult<TestContext>,
    A: FnOnce(TestContext) -> SpatialResult<()>,
{
    let ctx = match before() {
        Ok(ctx) => ctx,
        Err(e) => panic!("Before run failed: {:?}", e),
    };

    let test_ctx = ctx.clone();
    let result = std::panic::catch_unwind(AssertUnwindSafe(move || test(test_ctx)));

    if let Err(e) = after(ctx) {
        eprintln!("Warning: after run failed: {:?}", e);
    }

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => panic!("Test failed: {:?}", e),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// A file-backed index living in its own temp directory
#[derive(Clone)]
pub struct TestContext {
    path: PathBuf,
    store: Arc<FileBlockStore>,
    index: Arc<RwLock<RTreeIndex>>,
}

impl TestContext {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self) -> Arc<FileBlockStore> {
        self.store.clone()
    }

    pub fn index(&self) -> Arc<RwLock<RTreeIndex>> {
        self.index.clone()
    }

    pub fn store_file(&self) -> PathBuf {
        self.path.join("index.rtree")
    }
}

pub fn random_path() -> PathBuf {
    env::temp_dir().join(format!("spatial-rtree-{:016x}", rand::random::<u64>()))
}

pub fn create_test_context() -> SpatialResult<TestContext> {
    let path = random_path();
    fs::create_dir_all(&path)?;

    let store = Arc::new(FileBlockStore::create(path.join("index.rtree"))?);
    let index = RTreeIndex::create(
        "test_index",
        IndexConstraintType::None,
        TEST_OPTIONS,
        store.clone(),
    )?;

    Ok(TestContext {
        path,
        store,
        index: Arc::new(RwLock::new(index)),
    })
}

/// Persist the index, drop it and load it back from its file
pub fn reopen(ctx: &TestContext) -> SpatialResult<TestContext> {
    {
        let mut index = ctx.index.write();
        let descriptor = index.storage_descriptor()?;
        ctx.store.write_descriptor(&descriptor.encode()?)?;
        ctx.store.sync()?;
    }

    let store = Arc::new(FileBlockStore::open(ctx.store_file())?);
    let bytes = store
        .read_descriptor()
        .ok_or_else(|| SpatialError::Corrupted("Store holds no index descriptor".into()))?;
    let descriptor = StorageDescriptor::decode(&bytes)?;
    let index = RTreeIndex::open(
        &descriptor.name,
        IndexConstraintType::None,
        TEST_OPTIONS,
        store.clone(),
        &descriptor,
    )?;

    Ok(TestContext {
        path: ctx.path.clone(),
        store,
        index: Arc::new(RwLock::new(index)),
    })
}

pub fn cleanup(ctx: TestContext) -> SpatialResult<()> {
    let path = ctx.path.clone();
    drop(ctx);
    match fs::remove_dir_all(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Random boxes inside `[-extent, extent]`, at most `max_size` wide
pub fn random_boxes(rng: &mut StdRng, count: usize, extent: f64, max_size: f64) -> Vec<BoundingBox> {
    (0..count)
        .map(|_| {
            let x = rng.gen_range(-extent..extent);
            let y = rng.gen_range(-extent..extent);
            let w = rng.gen_range(0.0..max_size);
            let h = rng.gen_range(0.0..max_size);
            BoundingBox::new(x, y, x + w, y + h)
        })
        .collect()
}

/// Insert `boxes` with row ids `first_row_id..`
pub fn insert_boxes(index: &mut RTreeIndex, boxes: &[BoundingBox], first_row_id: RowId) -> SpatialResult<()> {
    let values: Vec<_> = boxes.iter().copied().map(Some).collect();
    let row_ids: Vec<_> = (0..boxes.len() as RowId).map(|i| Some(first_row_id + i)).collect();
    index.insert(&values, &row_ids)?;
    Ok(())
}

/// Row ids a linear scan over the index bounds would return, sorted
pub fn brute_force(boxes: &[(RowId, BoundingBox)], query: &RTreeBounds) -> Vec<RowId> {
    let mut result: Vec<RowId> = boxes
        .iter()
        .filter(|(_, bbox)| {
            bbox.to_index_bounds()
                .map(|bounds| bounds.intersects(query))
                .unwrap_or(false)
        })
        .map(|(row_id, _)| *row_id)
        .collect();
    result.sort_unstable();
    result
}

pub fn sorted(mut row_ids: Vec<RowId>) -> Vec<RowId> {
    row_ids.sort_unstable();
    row_ids
}

pub fn random_query(rng: &mut StdRng, extent: f64, max_size: f64) -> RTreeBounds {
    let x = rng.gen_range(-extent..extent) as f32;
    let y = rng.gen_range(-extent..extent) as f32;
    let w = rng.gen_range(0.0..max_size) as f32;
    let h = rng.gen_range(0.0..max_size) as f32;
    RTreeBounds::new(x, y, x + w, y + h)
}
