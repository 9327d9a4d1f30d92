//! Harness wiring the layers together the way an embedding would.

use std::sync::{Arc, Once};

use arbor_common::config::ArborConfig;
use arbor_common::error::ArborResult;
use arbor_common::types::Identifier;
use arbor_exec::{Executor, Promise};
use arbor_mvcc::{Repository, SessionMode, StorageSession};
use arbor_store::{MemoryStore, ObjectStore, RawStore};
use arbor_txn::{OperationScheduler, ScheduledStore};
use bytes::Bytes;

static TRACING: Once = Once::new();

/// Installs a test-friendly subscriber once per process.
///
/// Honors `RUST_LOG`; stays silent otherwise.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off"));
        // Another test binary may already have installed one.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// An executor, an in-memory store and a repository on top.
///
/// The repository talks to the memory store through a [`ScheduledStore`]
/// with its own scheduler. Trees and indices get `scheduler`, a separate
/// one, so their operations never queue behind their own node I/O.
pub struct Harness {
    /// Worker pool.
    pub executor: Executor,
    /// Backing store.
    pub memory: MemoryStore,
    /// Scheduler for structures built on sessions.
    pub scheduler: OperationScheduler,
    /// Scheduler in front of the backing store.
    pub io_scheduler: OperationScheduler,
    /// The repository.
    pub repo: Repository,
    config: ArborConfig,
}

impl Harness {
    /// Builds a harness with the default configuration.
    pub fn new() -> ArborResult<Self> {
        Self::with_config(ArborConfig::default().with_worker_threads(4))
    }

    /// Builds a harness from `config`.
    pub fn with_config(config: ArborConfig) -> ArborResult<Self> {
        init_tracing();
        let executor = Executor::with_config(&config)?;
        let memory = MemoryStore::new(executor.clone());
        Self::over(executor, memory, config)
    }

    fn over(executor: Executor, memory: MemoryStore, config: ArborConfig) -> ArborResult<Self> {
        let io_scheduler = OperationScheduler::new(executor.clone());
        let raw = ScheduledStore::new(Arc::new(memory.clone()), io_scheduler.clone());
        let repo = Repository::open(Arc::new(raw), executor.clone(), &config)?;
        Ok(Self {
            scheduler: OperationScheduler::new(executor.clone()),
            executor,
            memory,
            io_scheduler,
            repo,
            config,
        })
    }

    /// Opens a fresh repository over the same backing store, as after a
    /// restart.
    pub fn restart(&self) -> ArborResult<Self> {
        Self::over(self.executor.clone(), self.memory.clone(), self.config.clone())
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ArborConfig {
        &self.config
    }

    /// Opens a session.
    pub fn begin(&self, mode: SessionMode) -> ArborResult<Arc<StorageSession>> {
        self.repo.begin_session(mode).map(Arc::new)
    }

    /// Waits for `promise` on the harness executor.
    pub fn wait<T: Clone + Send + 'static>(&self, promise: Promise<T>) -> ArborResult<T> {
        promise.wait(&self.executor)
    }

    /// Stores `value` at `path` through `store`.
    pub fn put(&self, store: &dyn ObjectStore, path: &str, value: &[u8]) -> ArborResult<()> {
        self.wait(store.store(&Identifier::parse(path), Bytes::copy_from_slice(value)))
    }

    /// Fetches `path` through `store`.
    pub fn get(&self, store: &dyn ObjectStore, path: &str) -> ArborResult<Option<Bytes>> {
        self.wait(store.fetch(&Identifier::parse(path)))
    }

    /// Closes the backing store.
    pub fn shutdown(&self) -> ArborResult<()> {
        self.wait(self.memory.flush())?;
        self.wait(self.memory.close())
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("objects", &self.memory.len())
            .field("last_committed", &self.repo.last_committed())
            .finish()
    }
}
