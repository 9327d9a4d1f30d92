//! Repository: the entry point of the revisioned layer.
//!
//! A [`Repository`] owns the raw store, the executor and the
//! [`RevisionManager`]. It persists two things outside of object markers:
//!
//! ```text
//! ~commits                          watermark: next revision and compaction
//! ~commits/00000000000000000003     commit entry for r3 (its write set)
//! ```
//!
//! On open the watermark and the commit entries are read back, so revision
//! numbers are never reused across restarts and markers of revisions that
//! never committed stay invisible. Cleanup folds entries below its horizon
//! into the watermark and deletes them.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use arbor_common::codec::{self, Decode, Encode};
use arbor_common::config::ArborConfig;
use arbor_common::constants::COMMIT_LOG_SEGMENT;
use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::{Identifier, Revision};
use arbor_exec::{Executor, Promise};
use arbor_store::{ObjectStore, RawStore};
use bytes::{Buf, BytesMut};
use parking_lot::Mutex;

use crate::gc::{self, CleanupStats};
use crate::revision::{Compaction, RevisionManager, SessionMode};
use crate::session::StorageSession;

/// Returns the commit log directory.
#[must_use]
pub fn commit_log_dir() -> Identifier {
    Identifier::root().child(COMMIT_LOG_SEGMENT)
}

/// Returns the path of the commit entry for `revision`.
#[must_use]
pub fn commit_entry_path(revision: Revision) -> Identifier {
    commit_log_dir().child(revision.to_padded())
}

/// Persisted record of one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    /// The committed revision.
    pub revision: Revision,
    /// Paths written by the commit.
    pub writes: Vec<Identifier>,
}

impl Encode for CommitEntry {
    fn encode(&self, buf: &mut BytesMut) {
        self.revision.encode(buf);
        self.writes.encode(buf);
    }
}

impl Decode for CommitEntry {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        Ok(Self {
            revision: Revision::decode(buf)?,
            writes: Vec::decode(buf)?,
        })
    }
}

/// Persisted at the commit log directory itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitWatermark {
    /// The revision the next read-write session gets, at least.
    pub next: Revision,
    /// Every revision up to this one is decided.
    pub compacted_through: Revision,
    /// Revisions up to `compacted_through` that never committed.
    pub holes: Vec<Revision>,
}

impl CommitWatermark {
    fn compaction(&self) -> Compaction {
        Compaction {
            through: self.compacted_through,
            holes: self.holes.iter().copied().collect(),
        }
    }
}

impl Encode for CommitWatermark {
    fn encode(&self, buf: &mut BytesMut) {
        self.next.encode(buf);
        self.compacted_through.encode(buf);
        self.holes.encode(buf);
    }
}

impl Decode for CommitWatermark {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        Ok(Self {
            next: Revision::decode(buf)?,
            compacted_through: Revision::decode(buf)?,
            holes: Vec::decode(buf)?,
        })
    }
}

/// Counters kept by a repository.
#[derive(Debug, Default)]
pub struct RepositoryStats {
    sessions_opened: AtomicU64,
    commits: AtomicU64,
    conflicts: AtomicU64,
    rollbacks: AtomicU64,
}

impl RepositoryStats {
    pub(crate) fn record_session(&self) {
        self.sessions_opened.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Sessions opened so far.
    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(AtomicOrdering::Relaxed)
    }

    /// Successful read-write commits.
    pub fn commits(&self) -> u64 {
        self.commits.load(AtomicOrdering::Relaxed)
    }

    /// Commits refused by validation.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(AtomicOrdering::Relaxed)
    }

    /// Sessions whose markers were discarded.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(AtomicOrdering::Relaxed)
    }
}

/// State shared between a repository and its sessions.
pub(crate) struct Shared {
    pub(crate) raw: Arc<dyn RawStore>,
    pub(crate) executor: Executor,
    pub(crate) manager: RevisionManager,
    pub(crate) stats: RepositoryStats,
    /// Serializes watermark writes so a stale one never lands last.
    pub(crate) watermark: Mutex<()>,
}

impl Shared {
    /// Waits for a raw store call.
    pub(crate) fn wait<T: Clone + Send + 'static>(&self, promise: Promise<T>) -> ArborResult<T> {
        promise.wait(&self.executor)
    }

    /// Persists the watermark. Retries until the stored value covers every
    /// revision handed out so far.
    pub(crate) fn persist_watermark(&self) -> ArborResult<()> {
        let path = commit_log_dir();
        let _serial = self.watermark.lock();
        loop {
            let compaction = self.manager.compaction();
            let target = CommitWatermark {
                next: self.manager.next_revision(),
                compacted_through: compaction.through,
                holes: compaction.holes.into_iter().collect(),
            };
            self.wait(self.raw.store(&path, codec::to_bytes(&target)))?;
            if self.manager.next_revision() == target.next {
                return Ok(());
            }
        }
    }
}

/// A revisioned object repository.
#[derive(Clone)]
pub struct Repository {
    shared: Arc<Shared>,
}

impl Repository {
    /// Opens a repository over `raw`, recovering the commit log.
    pub fn open(
        raw: Arc<dyn RawStore>,
        executor: Executor,
        config: &ArborConfig,
    ) -> ArborResult<Self> {
        config.validate()?;
        let (watermark, committed) = recover(raw.as_ref(), &executor)?;
        tracing::info!(
            next = %watermark.next,
            compacted = %watermark.compacted_through,
            committed = committed.len(),
            "opened repository"
        );
        let manager =
            RevisionManager::recover_compacted(watermark.next, watermark.compaction(), committed);
        Ok(Self {
            shared: Arc::new(Shared {
                raw,
                executor,
                manager,
                stats: RepositoryStats::default(),
                watermark: Mutex::new(()),
            }),
        })
    }

    /// Opens a session.
    ///
    /// Read-write sessions reserve a revision and persist the new
    /// reservation watermark before returning.
    pub fn begin_session(&self, mode: SessionMode) -> ArborResult<StorageSession> {
        let ticket = self.shared.manager.begin(mode)?;
        if mode.is_writable() {
            if let Err(e) = self.shared.persist_watermark() {
                self.shared.manager.abort(&ticket);
                return Err(e);
            }
        }
        self.shared.stats.record_session();
        tracing::debug!(
            session = ticket.id,
            %mode,
            read_point = %ticket.read_point,
            "session opened"
        );
        Ok(StorageSession::new(Arc::clone(&self.shared), ticket))
    }

    /// Removes markers no open or future session can observe, then folds
    /// commit entries below the horizon into the watermark.
    ///
    /// Runs as a task on the executor.
    pub fn cleanup(&self) -> Promise<CleanupStats> {
        let shared = Arc::clone(&self.shared);
        self.shared.executor.spawn(move || {
            gc::run(&shared).map_err(|e| {
                tracing::warn!(error = %e, "cleanup aborted");
                e
            })
        })
    }

    /// Returns the revision manager.
    #[must_use]
    pub fn manager(&self) -> &RevisionManager {
        &self.shared.manager
    }

    /// Returns the highest committed revision.
    #[must_use]
    pub fn last_committed(&self) -> Revision {
        self.shared.manager.last_committed()
    }

    /// Returns the executor.
    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.shared.executor
    }

    /// Returns the raw store.
    #[must_use]
    pub fn raw(&self) -> &Arc<dyn RawStore> {
        &self.shared.raw
    }

    /// Returns repository counters.
    #[must_use]
    pub fn stats(&self) -> &RepositoryStats {
        &self.shared.stats
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("manager", &self.shared.manager)
            .finish_non_exhaustive()
    }
}

/// Reads the watermark and the committed revisions back from `raw`.
fn recover(
    raw: &dyn RawStore,
    executor: &Executor,
) -> ArborResult<(CommitWatermark, BTreeSet<Revision>)> {
    let dir = commit_log_dir();
    let watermark = match raw.fetch(&dir).wait(executor)? {
        Some(bytes) => codec::from_bytes::<CommitWatermark>(&bytes)?,
        None => CommitWatermark {
            next: Revision::INITIAL.next(),
            compacted_through: Revision::INITIAL,
            holes: Vec::new(),
        },
    };

    let mut committed = BTreeSet::new();
    for entry in raw.list_children(&dir).wait(executor)? {
        let Some(revision) = entry.name().and_then(Revision::parse_padded) else {
            tracing::warn!(path = %entry, "ignoring unrecognized commit log entry");
            continue;
        };
        if revision <= watermark.compacted_through {
            continue;
        }
        let bytes = raw
            .fetch(&entry)
            .wait(executor)?
            .ok_or_else(|| ArborError::NotFound { path: entry.clone() })?;
        let record: CommitEntry = codec::from_bytes(&bytes)?;
        if record.revision != revision {
            return Err(ArborError::corruption(format!(
                "commit entry {entry} records revision {}",
                record.revision
            )));
        }
        committed.insert(revision);
    }
    Ok((watermark, committed))
}
