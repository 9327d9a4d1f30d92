//! Storage sessions.
//!
//! A [`StorageSession`] is a transactional view of the repository. It
//! implements [`ObjectStore`], so anything built on the object store
//! interface (the B+Tree, the index layer) runs unchanged inside a session.
//!
//! Writes never touch an object in place. A store at revision `r` writes a
//! `store@r` marker holding the bytes, a delete writes an empty `delete@r`
//! marker. Reads resolve the highest marker visible to the session.
//!
//! Calls execute on the calling thread and return settled promises, so a
//! session observes its own operations in program order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use arbor_common::codec;
use arbor_common::constants::{COMMIT_LOG_SEGMENT, REVISION_SEGMENT};
use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::{Identifier, Revision};
use arbor_exec::Promise;
use arbor_store::ObjectStore;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::marker::{self, MarkerKind, RevisionMarker};
use crate::repository::{commit_entry_path, CommitEntry, Shared};
use crate::revision::{SessionMode, SessionTicket};

#[derive(Debug, Default)]
struct SessionState {
    open: bool,
    reads: BTreeSet<Identifier>,
    writes: BTreeSet<Identifier>,
    lists: BTreeSet<Identifier>,
    /// Marker this session currently holds per written object.
    markers: BTreeMap<Identifier, MarkerKind>,
}

/// A snapshot-isolated session over a repository.
pub struct StorageSession {
    shared: Arc<Shared>,
    ticket: SessionTicket,
    state: Mutex<SessionState>,
}

impl StorageSession {
    pub(crate) fn new(shared: Arc<Shared>, ticket: SessionTicket) -> Self {
        Self {
            shared,
            ticket,
            state: Mutex::new(SessionState {
                open: true,
                ..SessionState::default()
            }),
        }
    }

    /// Returns the revision this session is bound to: the one it writes at
    /// for read-write sessions, the one it reads otherwise.
    #[must_use]
    pub fn revision(&self) -> Revision {
        self.ticket.own.unwrap_or(self.ticket.read_point)
    }

    /// Returns the revision this session writes at, for read-write sessions.
    #[must_use]
    pub fn write_revision(&self) -> Option<Revision> {
        self.ticket.own
    }

    /// Returns the newest committed revision this session reads.
    #[must_use]
    pub fn read_point(&self) -> Revision {
        self.ticket.read_point
    }

    /// Returns the session mode.
    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.ticket.mode
    }

    /// Returns true until the session commits or closes.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Fetches every visible child of `path` with its bytes.
    pub fn fetch_children(&self, path: &Identifier) -> Promise<Vec<(Identifier, Bytes)>> {
        Promise::settled(self.fetch_children_now(path))
    }

    /// Commits the session.
    ///
    /// Read-write sessions are validated against commits made since they
    /// opened. On conflict the session's markers are discarded and the
    /// promise fails with [`ArborError::ConflictingCommit`]. Read-only
    /// sessions simply end. Yields the revision the session's view
    /// corresponds to.
    pub fn commit(&self) -> Promise<Revision> {
        Promise::settled(self.commit_now())
    }

    /// Discards the session and its markers. Closing twice is a no-op.
    pub fn close(&self) -> Promise<()> {
        Promise::settled(self.close_now())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn check_open(&self) -> ArborResult<()> {
        if self.state.lock().open {
            Ok(())
        } else {
            Err(ArborError::closed(format!("session {}", self.ticket.id)))
        }
    }

    fn check_writable(&self, path: &Identifier) -> ArborResult<Revision> {
        self.check_open()?;
        let own = self.ticket.own.ok_or_else(|| {
            ArborError::unsupported(format!("write to {path} in a {} session", self.ticket.mode))
        })?;
        if path.is_root() || marker::is_reserved(path) {
            return Err(ArborError::unsupported(format!("write to reserved path {path}")));
        }
        Ok(own)
    }

    fn markers_of(&self, object: &Identifier) -> ArborResult<Vec<RevisionMarker>> {
        let children = self
            .shared
            .wait(self.shared.raw.list_children(&marker::revision_dir(object)))?;
        Ok(children
            .iter()
            .filter_map(|child| {
                let parsed = child.name().and_then(RevisionMarker::parse);
                if parsed.is_none() {
                    tracing::trace!(path = %child, "skipping foreign entry in revision directory");
                }
                parsed
            })
            .collect())
    }

    fn winner(&self, object: &Identifier) -> ArborResult<Option<RevisionMarker>> {
        let markers = self.markers_of(object)?;
        Ok(marker::resolve(markers, |r| {
            self.shared.manager.is_visible(&self.ticket, r)
        }))
    }

    fn fetch_now(&self, path: &Identifier) -> ArborResult<Option<Bytes>> {
        self.check_open()?;
        if marker::is_reserved(path) {
            return Ok(None);
        }
        self.state.lock().reads.insert(path.clone());
        match self.winner(path)? {
            Some(m) if m.is_store() => {
                let bytes = self.shared.wait(self.shared.raw.fetch(&m.path_for(path)))?;
                // Cleanup never removes a winner visible to an open session.
                bytes.map(Some).ok_or_else(|| ArborError::NotFound {
                    path: m.path_for(path),
                })
            }
            _ => Ok(None),
        }
    }

    fn list_now(&self, path: &Identifier) -> ArborResult<Vec<Identifier>> {
        self.check_open()?;
        if marker::is_reserved(path) {
            return Ok(Vec::new());
        }
        self.state.lock().lists.insert(path.clone());
        let children = self.shared.wait(self.shared.raw.list_children(path))?;
        let mut visible = Vec::with_capacity(children.len());
        for child in children {
            let reserved = match child.name() {
                Some(REVISION_SEGMENT) => true,
                Some(COMMIT_LOG_SEGMENT) => path.is_root(),
                _ => false,
            };
            if reserved {
                continue;
            }
            if self.winner(&child)?.is_some_and(|m| m.is_store()) {
                visible.push(child);
            }
        }
        Ok(visible)
    }

    fn fetch_children_now(&self, path: &Identifier) -> ArborResult<Vec<(Identifier, Bytes)>> {
        let children = self.list_now(path)?;
        let mut out = Vec::with_capacity(children.len());
        for child in children {
            if let Some(bytes) = self.fetch_now(&child)? {
                out.push((child, bytes));
            }
        }
        Ok(out)
    }

    fn put_marker(&self, path: &Identifier, kind: MarkerKind, bytes: Bytes) -> ArborResult<()> {
        let own = self.check_writable(path)?;
        let raw = &self.shared.raw;
        self.shared
            .wait(raw.store(&RevisionMarker::new(kind, own).path_for(path), bytes))?;
        let previous = {
            let mut state = self.state.lock();
            state.writes.insert(path.clone());
            state.markers.insert(path.clone(), kind)
        };
        if previous == Some(kind.opposite()) {
            let stale = RevisionMarker::new(kind.opposite(), own);
            self.shared.wait(raw.delete(&stale.path_for(path)))?;
        }
        Ok(())
    }

    /// Deletes every marker this session wrote. Failures are logged; cleanup
    /// removes whatever is left once the revision is aborted.
    fn discard_markers(&self) {
        let Some(own) = self.ticket.own else {
            return;
        };
        let markers = std::mem::take(&mut self.state.lock().markers);
        let pending: Vec<_> = markers
            .iter()
            .map(|(path, kind)| {
                self.shared
                    .raw
                    .delete(&RevisionMarker::new(*kind, own).path_for(path))
            })
            .collect();
        for result in self.shared.wait(Promise::all_settled(pending)).unwrap_or_default() {
            if let Err(e) = result {
                tracing::warn!(revision = %own, error = %e, "failed to discard marker");
            }
        }
    }

    fn rollback(&self) {
        self.state.lock().open = false;
        self.discard_markers();
        self.shared.manager.abort(&self.ticket);
        self.shared.stats.record_rollback();
        tracing::debug!(session = self.ticket.id, "session rolled back");
    }

    fn commit_now(&self) -> ArborResult<Revision> {
        self.check_open()?;
        let Some(own) = self.ticket.own else {
            self.state.lock().open = false;
            self.shared.manager.abort(&self.ticket);
            return Ok(self.ticket.read_point);
        };

        if let Err(e) = self.shared.wait(self.shared.raw.flush()) {
            self.rollback();
            return Err(e);
        }

        let (reads, writes, lists) = {
            let state = self.state.lock();
            (state.reads.clone(), state.writes.clone(), state.lists.clone())
        };
        let seq = match self.shared.manager.validate(&self.ticket, &reads, &writes, &lists) {
            Ok(seq) => seq,
            Err(e) => {
                self.shared.stats.record_conflict();
                self.rollback();
                return Err(e);
            }
        };

        let entry = CommitEntry {
            revision: own,
            writes: writes.iter().cloned().collect(),
        };
        let persisted = self
            .shared
            .wait(self.shared.raw.store(&commit_entry_path(own), codec::to_bytes(&entry)));
        if let Err(e) = persisted {
            tracing::warn!(revision = %own, error = %e, "failed to persist commit entry");
            self.state.lock().open = false;
            self.discard_markers();
            self.shared.manager.abandon_commit(&self.ticket, seq);
            self.shared.stats.record_rollback();
            return Err(e);
        }

        self.state.lock().open = false;
        self.shared.manager.finish_commit(&self.ticket);
        self.shared.stats.record_commit();
        tracing::debug!(revision = %own, writes = writes.len(), "committed");
        Ok(own)
    }

    fn close_now(&self) -> ArborResult<()> {
        if !self.state.lock().open {
            return Ok(());
        }
        self.rollback();
        Ok(())
    }
}

impl ObjectStore for StorageSession {
    fn fetch(&self, path: &Identifier) -> Promise<Option<Bytes>> {
        Promise::settled(self.fetch_now(path))
    }

    fn store(&self, path: &Identifier, value: Bytes) -> Promise<()> {
        Promise::settled(self.put_marker(path, MarkerKind::Store, value))
    }

    fn delete(&self, path: &Identifier) -> Promise<()> {
        Promise::settled(self.put_marker(path, MarkerKind::Delete, Bytes::new()))
    }

    fn list_children(&self, path: &Identifier) -> Promise<Vec<Identifier>> {
        Promise::settled(self.list_now(path))
    }
}

impl Drop for StorageSession {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.open {
            return;
        }
        state.open = false;
        if self.ticket.own.is_some() && !state.markers.is_empty() {
            tracing::warn!(
                session = self.ticket.id,
                markers = state.markers.len(),
                "session dropped while open; leaving markers to cleanup"
            );
        }
        self.shared.manager.abort(&self.ticket);
    }
}

impl fmt::Debug for StorageSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSession")
            .field("id", &self.ticket.id)
            .field("mode", &self.ticket.mode)
            .field("revision", &self.ticket.own)
            .field("read_point", &self.ticket.read_point)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repository;
    use arbor_common::config::ArborConfig;
    use arbor_exec::Executor;
    use arbor_store::MemoryStore;

    struct Fixture {
        executor: Executor,
        memory: MemoryStore,
        repo: Repository,
    }

    fn fixture() -> Fixture {
        let executor = Executor::new(2);
        let memory = MemoryStore::new(executor.clone());
        let repo = Repository::open(
            Arc::new(memory.clone()),
            executor.clone(),
            &ArborConfig::default(),
        )
        .unwrap();
        Fixture {
            executor,
            memory,
            repo,
        }
    }

    fn id(path: &str) -> Identifier {
        Identifier::parse(path)
    }

    fn put(f: &Fixture, session: &StorageSession, path: &str, value: &'static [u8]) {
        session
            .store(&id(path), Bytes::from_static(value))
            .wait(&f.executor)
            .unwrap();
    }

    fn has_marker(f: &Fixture, kind: MarkerKind, rev: Revision, path: &str) -> bool {
        f.memory
            .contains(&RevisionMarker::new(kind, rev).path_for(&id(path)))
    }

    fn get(f: &Fixture, session: &StorageSession, path: &str) -> Option<Bytes> {
        session.fetch(&id(path)).wait(&f.executor).unwrap()
    }

    #[test]
    fn test_reads_own_writes() {
        let f = fixture();
        let s = f.repo.begin_session(SessionMode::ReadWrite).unwrap();
        put(&f, &s, "a", b"1");
        assert_eq!(get(&f, &s, "a"), Some(Bytes::from_static(b"1")));
        s.delete(&id("a")).wait(&f.executor).unwrap();
        assert_eq!(get(&f, &s, "a"), None);
        put(&f, &s, "a", b"2");
        assert_eq!(get(&f, &s, "a"), Some(Bytes::from_static(b"2")));

        // Only the latest marker of the session survives.
        let rev = s.write_revision().unwrap();
        assert!(has_marker(&f, MarkerKind::Store, rev, "a"));
        assert!(!has_marker(&f, MarkerKind::Delete, rev, "a"));
    }

    #[test]
    fn test_uncommitted_writes_invisible_to_others() {
        let f = fixture();
        let writer = f.repo.begin_session(SessionMode::ReadWrite).unwrap();
        put(&f, &writer, "doc", b"draft");
        let reader = f.repo.begin_session(SessionMode::ReadOnly).unwrap();
        assert_eq!(get(&f, &reader, "doc"), None);
        writer.commit().wait(&f.executor).unwrap();
        assert_eq!(get(&f, &reader, "doc"), None);

        let later = f.repo.begin_session(SessionMode::ReadOnly).unwrap();
        assert_eq!(get(&f, &later, "doc"), Some(Bytes::from_static(b"draft")));
    }

    #[test]
    fn test_list_children_hides_markers_and_deleted() {
        let f = fixture();
        let s = f.repo.begin_session(SessionMode::ReadWrite).unwrap();
        put(&f, &s, "dir/a", b"1");
        put(&f, &s, "dir/b", b"2");
        put(&f, &s, "dir", b"d");
        s.delete(&id("dir/b")).wait(&f.executor).unwrap();
        s.commit().wait(&f.executor).unwrap();

        let r = f.repo.begin_session(SessionMode::ReadOnly).unwrap();
        let children = r.list_children(&id("dir")).wait(&f.executor).unwrap();
        assert_eq!(children, vec![id("dir/a")]);
        let roots = r.list_children(&Identifier::root()).wait(&f.executor).unwrap();
        assert_eq!(roots, vec![id("dir")]);

        let all = r.fetch_children(&id("dir")).wait(&f.executor).unwrap();
        assert_eq!(all, vec![(id("dir/a"), Bytes::from_static(b"1"))]);
    }

    #[test]
    fn test_read_only_session_rejects_writes() {
        let f = fixture();
        let s = f.repo.begin_session(SessionMode::ReadOnly).unwrap();
        let err = s
            .store(&id("x"), Bytes::from_static(b"1"))
            .wait(&f.executor)
            .unwrap_err();
        assert!(matches!(err, ArborError::UnsupportedOperation { .. }));
        assert_eq!(s.write_revision(), None);
        assert_eq!(s.commit().wait(&f.executor).unwrap(), Revision::INITIAL);
        assert!(!s.is_open());
    }

    #[test]
    fn test_revision_reports_bound_snapshot() {
        let f = fixture();
        let w = f.repo.begin_session(SessionMode::ReadWrite).unwrap();
        put(&f, &w, "v", b"1");
        let committed = w.commit().wait(&f.executor).unwrap();

        let ro = f.repo.begin_session(SessionMode::ReadOnly).unwrap();
        assert_eq!(ro.revision(), committed);
        let pinned = f
            .repo
            .begin_session(SessionMode::AtRevision(Revision::INITIAL))
            .unwrap();
        assert_eq!(pinned.revision(), Revision::INITIAL);
        assert_eq!(pinned.write_revision(), None);

        let rw = f.repo.begin_session(SessionMode::ReadWrite).unwrap();
        assert_eq!(rw.revision(), committed.next());
        assert_eq!(rw.write_revision(), Some(committed.next()));
        assert_eq!(rw.read_point(), committed);
    }

    #[test]
    fn test_reserved_paths_rejected() {
        let f = fixture();
        let s = f.repo.begin_session(SessionMode::ReadWrite).unwrap();
        for path in ["a/~rev/store@00000000000000000001", "~commits/x"] {
            let err = s
                .store(&id(path), Bytes::from_static(b"1"))
                .wait(&f.executor)
                .unwrap_err();
            assert!(matches!(err, ArborError::UnsupportedOperation { .. }));
        }
    }

    #[test]
    fn test_conflict_rolls_back() {
        let f = fixture();
        let a = f.repo.begin_session(SessionMode::ReadWrite).unwrap();
        let b = f.repo.begin_session(SessionMode::ReadWrite).unwrap();
        put(&f, &a, "k", b"a");
        put(&f, &b, "k", b"b");
        a.commit().wait(&f.executor).unwrap();

        let err = b.commit().wait(&f.executor).unwrap_err();
        assert!(matches!(err, ArborError::ConflictingCommit { .. }));
        assert!(!b.is_open());
        let rev = b.write_revision().unwrap();
        assert!(!has_marker(&f, MarkerKind::Store, rev, "k"));
        assert!(f.repo.manager().is_aborted(rev));
        assert_eq!(f.repo.stats().conflicts(), 1);
    }

    #[test]
    fn test_closed_session_refuses_calls() {
        let f = fixture();
        let s = f.repo.begin_session(SessionMode::ReadWrite).unwrap();
        put(&f, &s, "tmp", b"x");
        s.close().wait(&f.executor).unwrap();
        s.close().wait(&f.executor).unwrap();
        assert!(matches!(
            s.fetch(&id("tmp")).wait(&f.executor).unwrap_err(),
            ArborError::Closed { .. }
        ));
        assert!(s.commit().wait(&f.executor).is_err());
        assert_eq!(f.repo.manager().open_sessions(), 0);
    }

    #[test]
    fn test_drop_aborts_revision() {
        let f = fixture();
        let rev = {
            let s = f.repo.begin_session(SessionMode::ReadWrite).unwrap();
            put(&f, &s, "orphan", b"x");
            s.revision()
        };
        assert!(f.repo.manager().is_aborted(rev));
        let r = f.repo.begin_session(SessionMode::ReadOnly).unwrap();
        assert_eq!(get(&f, &r, "orphan"), None);
    }

    #[test]
    fn test_at_revision_reads_history() {
        let f = fixture();
        let s1 = f.repo.begin_session(SessionMode::ReadWrite).unwrap();
        put(&f, &s1, "v", b"one");
        let r1 = s1.commit().wait(&f.executor).unwrap();
        let s2 = f.repo.begin_session(SessionMode::ReadWrite).unwrap();
        put(&f, &s2, "v", b"two");
        s2.commit().wait(&f.executor).unwrap();

        let old = f.repo.begin_session(SessionMode::AtRevision(r1)).unwrap();
        assert_eq!(get(&f, &old, "v"), Some(Bytes::from_static(b"one")));
        let new = f.repo.begin_session(SessionMode::ReadOnly).unwrap();
        assert_eq!(get(&f, &new, "v"), Some(Bytes::from_static(b"two")));
    }

    #[test]
    fn test_session_over_scheduled_store() {
        use arbor_txn::{OperationScheduler, ScheduledStore};

        let executor = Executor::new(4);
        let memory = MemoryStore::new(executor.clone());
        let scheduled = ScheduledStore::new(
            Arc::new(memory.clone()),
            OperationScheduler::new(executor.clone()),
        );
        let repo = Repository::open(Arc::new(scheduled), executor.clone(), &ArborConfig::default())
            .unwrap();

        let s = repo.begin_session(SessionMode::ReadWrite).unwrap();
        for n in 0..20u8 {
            s.store(&id(&format!("items/{n}")), Bytes::from(vec![n]))
                .wait(&executor)
                .unwrap();
        }
        s.delete(&id("items/3")).wait(&executor).unwrap();
        s.commit().wait(&executor).unwrap();

        let r = repo.begin_session(SessionMode::ReadOnly).unwrap();
        let items = r.list_children(&id("items")).wait(&executor).unwrap();
        assert_eq!(items.len(), 19);
        assert!(!items.contains(&id("items/3")));
    }
}
