use evtree::{
    EvtConfig, EvtEntry, EvtError, EvtFindOpc, EvtRect, EvtResult, EvtTree, PmemConfig, PmemPool,
    RootMmid, UmemInstance, EPOCH_MAX,
};
use std::backtrace::Backtrace;
use std::path::{Path, PathBuf};
use std::time::Instant;
use std::{env, fs, io};

/// Runs a test between its setup and cleanup steps.
///
/// Cleanup runs even when the test fails or panics, so that no pool files
/// are left behind in the temp directory.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> EvtResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> EvtResult<TestContext>,
    A: Fn(TestContext) -> EvtResult<()>,
{
    let ctx = match before() {
        Ok(ctx) => ctx,
        Err(e) => panic!("Before run failed: {:?}", e),
    };

    let start_time = Instant::now();
    let test_ctx = ctx.clone();
    let result = std::panic::catch_unwind(move || test(test_ctx));
    let elapsed = start_time.elapsed();

    if let Err(e) = after(ctx) {
        eprintln!("Warning: after run failed: {:?}", e);
    }

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let backtrace = Backtrace::capture().to_string();
            eprintln!("\n==================== TEST FAILED ====================");
            eprintln!("Failed after {:?}", elapsed);
            eprintln!("Error: {}", e);
            if !backtrace.is_empty() && !backtrace.contains("disabled") {
                eprintln!("\nBacktrace:\n{}", backtrace);
            }
            eprintln!("=====================================================\n");
            panic!("Test failed: {:?}", e);
        }
        Err(panic_err) => std::panic::resume_unwind(panic_err),
    }
}

#[derive(Clone, Debug)]
pub struct TestContext {
    path: PathBuf,
}

impl TestContext {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Path of the pool file, which does not exist until a pool is created.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn journal_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".journal");
        PathBuf::from(name)
    }

    pub fn create_pool(&self, config: &PmemConfig) -> EvtResult<UmemInstance> {
        Ok(UmemInstance::new(PmemPool::create(&self.path, config)?))
    }

    pub fn open_pool(&self, config: &PmemConfig) -> EvtResult<UmemInstance> {
        Ok(UmemInstance::new(PmemPool::open(&self.path, config)?))
    }
}

pub fn random_path() -> PathBuf {
    let id = uuid::Uuid::new_v4();
    env::temp_dir().join(format!("{}.pool", id))
}

pub fn create_test_context() -> EvtResult<TestContext> {
    let path = random_path();
    // unlikely with a UUID, but a stale file would be opened as a pool
    remove_if_exists(&path)?;
    Ok(TestContext::new(path))
}

pub fn cleanup(ctx: TestContext) -> EvtResult<()> {
    remove_if_exists(&ctx.journal_path())?;
    remove_if_exists(ctx.path())
}

fn remove_if_exists(path: &Path) -> EvtResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Creates a tree of `order` and records its root as the pool's root object.
pub fn create_tree(umem: &UmemInstance, order: u16) -> EvtResult<EvtTree> {
    let config = EvtConfig::builder().order(order).build()?;
    let tree = EvtTree::create(umem.clone(), &config)?;
    umem.set_root_object(tree.root_mmid().id())?;
    Ok(tree)
}

/// Opens the tree recorded as the pool's root object.
pub fn open_tree(umem: &UmemInstance) -> EvtResult<EvtTree> {
    let root = RootMmid::from_raw(umem.root_object()?);
    if root.is_null() {
        return Err(EvtError::NotFound);
    }
    EvtTree::open(umem.clone(), root, None)
}

/// The rectangle of `len` bytes from `off`, written at `epoch`.
pub fn extent(off: u64, len: u64, epoch: u64) -> EvtRect {
    EvtRect::at_epoch(off, off + len - 1, epoch)
}

/// Every entry of every epoch.
pub fn all_entries(tree: &EvtTree) -> EvtResult<Vec<EvtEntry>> {
    let everything = EvtRect::new(0, u64::MAX, 0, EPOCH_MAX);
    Ok(tree.find(&everything, EvtFindOpc::All)?.into_iter().collect())
}

/// Entries sorted by rectangle, for comparisons independent of tree shape.
pub fn sorted(mut entries: Vec<EvtEntry>) -> Vec<EvtEntry> {
    entries.sort_by_key(|e| (e.rect.off_lo, e.rect.epc_lo, e.rect.off_hi, e.rect.epc_hi));
    entries
}
