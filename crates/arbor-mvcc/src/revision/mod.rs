//! The commit log.
//!
//! [`RevisionManager`] hands out revision numbers, records which revisions
//! committed or aborted, pins the snapshots of open sessions, and validates
//! commits against the write sets of commits that happened since a session
//! opened.
//!
//! # Revision Lifecycle
//!
//! ```text
//!              begin(ReadWrite)
//!   next ───────────────────────▶ in flight ──commit──▶ committed
//!                                     │
//!                                     └──close/conflict──▶ aborted
//! ```
//!
//! Numbers are never handed out twice, even after an abort.
//!
//! Cleanup folds decided revisions below the horizon into a [`Compaction`]:
//! a bound up to which every revision counts as committed, minus an explicit
//! list of holes that never did.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::{Identifier, Revision};
use parking_lot::Mutex;

/// How a session binds to revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMode {
    /// Reserves a fresh revision for its writes; reads as of the last
    /// committed revision at open.
    ReadWrite,
    /// Reads as of the last committed revision at open; consumes no number.
    ReadOnly,
    /// Reads as of a retained historical revision.
    AtRevision(Revision),
}

impl SessionMode {
    /// Returns true if the session may write.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, SessionMode::ReadWrite)
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::ReadWrite => write!(f, "read-write"),
            SessionMode::ReadOnly => write!(f, "read-only"),
            SessionMode::AtRevision(r) => write!(f, "read-only at {r}"),
        }
    }
}

/// Revisions folded out of the per-revision commit log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compaction {
    /// Every revision up to and including this one is decided.
    pub through: Revision,
    /// Revisions up to `through` that never committed.
    pub holes: BTreeSet<Revision>,
}

impl Compaction {
    /// Returns true if `revision` is covered and committed.
    #[must_use]
    pub fn covers_commit(&self, revision: Revision) -> bool {
        revision != Revision::INITIAL
            && revision <= self.through
            && !self.holes.contains(&revision)
    }

    /// Newest committed revision the compaction covers.
    fn last_committed(&self) -> Revision {
        let mut r = self.through;
        while r != Revision::INITIAL && self.holes.contains(&r) {
            r = Revision::new(r.as_u64() - 1);
        }
        r
    }
}

/// The snapshot a session was opened with.
#[derive(Debug, Clone)]
pub struct SessionTicket {
    /// Session id, unique per manager.
    pub id: u64,
    /// Session mode.
    pub mode: SessionMode,
    /// The revision this session writes at, for read-write sessions.
    pub own: Option<Revision>,
    /// Highest revision the session may read.
    pub read_point: Revision,
    /// Revisions reserved but not committed when the session opened. They
    /// stay invisible even if they commit later.
    pub in_flight: BTreeSet<Revision>,
    /// First commit sequence number the session has to validate against.
    pub commit_seq: u64,
}

impl SessionTicket {
    /// Oldest revision whose state this session can still observe.
    fn floor(&self) -> Revision {
        match self.in_flight.iter().next() {
            Some(first) => Revision::new(first.as_u64().saturating_sub(1)).min(self.read_point),
            None => self.read_point,
        }
    }
}

/// The write set of one commit.
#[derive(Debug, Clone)]
struct CommitRecord {
    seq: u64,
    revision: Revision,
    writes: BTreeSet<Identifier>,
}

#[derive(Debug)]
struct CommitLog {
    next: Revision,
    last_committed: Revision,
    compaction: Compaction,
    /// Committed revisions above the compaction bound.
    committed: BTreeSet<Revision>,
    /// Aborted revisions above the compaction bound.
    aborted: BTreeSet<Revision>,
    in_flight: BTreeSet<Revision>,
    sessions: HashMap<u64, SessionTicket>,
    next_session: u64,
    next_seq: u64,
    records: Vec<CommitRecord>,
    /// Revisions below this may have lost markers to cleanup.
    retained_from: Revision,
}

impl CommitLog {
    fn is_committed(&self, revision: Revision) -> bool {
        if revision <= self.compaction.through {
            self.compaction.covers_commit(revision)
        } else {
            self.committed.contains(&revision)
        }
    }
}

/// Coordinates revision numbers and commit validation.
pub struct RevisionManager {
    log: Mutex<CommitLog>,
}

impl RevisionManager {
    /// Creates a manager for an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::recover(Revision::INITIAL.next(), BTreeSet::new())
    }

    /// Rebuilds a manager from persisted state: the reservation watermark
    /// and the set of committed revisions.
    #[must_use]
    pub fn recover(next: Revision, committed: BTreeSet<Revision>) -> Self {
        Self::recover_compacted(next, Compaction::default(), committed)
    }

    /// Rebuilds a manager from a compacted commit log. Entries at or below
    /// the compaction bound are ignored.
    #[must_use]
    pub fn recover_compacted(
        next: Revision,
        compaction: Compaction,
        mut committed: BTreeSet<Revision>,
    ) -> Self {
        committed.retain(|r| *r > compaction.through);
        let last_committed = committed
            .iter()
            .next_back()
            .copied()
            .unwrap_or_else(|| compaction.last_committed());
        let next = next
            .max(last_committed.next())
            .max(compaction.through.next())
            .max(Revision::INITIAL.next());
        Self {
            log: Mutex::new(CommitLog {
                next,
                last_committed,
                compaction,
                committed,
                aborted: BTreeSet::new(),
                in_flight: BTreeSet::new(),
                sessions: HashMap::new(),
                next_session: 1,
                next_seq: 1,
                records: Vec::new(),
                retained_from: Revision::INITIAL,
            }),
        }
    }

    /// Opens a session snapshot.
    pub fn begin(&self, mode: SessionMode) -> ArborResult<SessionTicket> {
        let mut log = self.log.lock();
        let (own, read_point) = match mode {
            SessionMode::ReadWrite => {
                let own = log.next;
                log.next = own.next();
                (Some(own), log.last_committed)
            }
            SessionMode::ReadOnly => (None, log.last_committed),
            SessionMode::AtRevision(revision) => {
                if revision != Revision::INITIAL && !log.is_committed(revision) {
                    return Err(ArborError::unsupported(format!(
                        "revision {revision} was never committed"
                    )));
                }
                if revision < log.retained_from {
                    return Err(ArborError::unsupported(format!(
                        "revision {revision} is no longer retained"
                    )));
                }
                (None, revision)
            }
        };

        let id = log.next_session;
        log.next_session += 1;
        let ticket = SessionTicket {
            id,
            mode,
            own,
            read_point,
            in_flight: log.in_flight.clone(),
            commit_seq: log.next_seq,
        };
        if let Some(own) = own {
            log.in_flight.insert(own);
        }
        log.sessions.insert(id, ticket.clone());
        Ok(ticket)
    }

    /// Returns true if `revision` is visible to `ticket`.
    #[must_use]
    pub fn is_visible(&self, ticket: &SessionTicket, revision: Revision) -> bool {
        if ticket.own == Some(revision) {
            return true;
        }
        revision <= ticket.read_point
            && !ticket.in_flight.contains(&revision)
            && self.log.lock().is_committed(revision)
    }

    /// Validates a commit and registers its write set.
    ///
    /// Fails with [`ArborError::ConflictingCommit`] if a commit the session
    /// cannot see wrote a path this session read, wrote, or added a child to
    /// a path this session listed. That covers commits registered after the
    /// session opened and commits that were validated but not yet finished
    /// when it opened. Returns the commit's sequence number.
    pub fn validate(
        &self,
        ticket: &SessionTicket,
        reads: &BTreeSet<Identifier>,
        writes: &BTreeSet<Identifier>,
        lists: &BTreeSet<Identifier>,
    ) -> ArborResult<u64> {
        let own = ticket
            .own
            .ok_or_else(|| ArborError::invalid_state("read-only sessions do not commit writes"))?;
        let mut log = self.log.lock();
        let unseen = log
            .records
            .iter()
            .filter(|r| r.seq >= ticket.commit_seq || ticket.in_flight.contains(&r.revision));
        for record in unseen {
            for written in &record.writes {
                let overlaps = reads.contains(written)
                    || writes.contains(written)
                    || written.parent().is_some_and(|p| lists.contains(&p));
                if overlaps {
                    tracing::debug!(
                        revision = %own,
                        other = %record.revision,
                        path = %written,
                        "commit conflict"
                    );
                    return Err(ArborError::ConflictingCommit {
                        revision: own,
                        path: written.clone(),
                    });
                }
            }
        }
        let seq = log.next_seq;
        log.next_seq += 1;
        log.records.push(CommitRecord {
            seq,
            revision: own,
            writes: writes.clone(),
        });
        Ok(seq)
    }

    /// Makes a validated commit visible and closes the session.
    pub fn finish_commit(&self, ticket: &SessionTicket) {
        let mut log = self.log.lock();
        if let Some(own) = ticket.own {
            log.in_flight.remove(&own);
            log.committed.insert(own);
            log.last_committed = log.last_committed.max(own);
        }
        log.sessions.remove(&ticket.id);
    }

    /// Withdraws a validated commit that could not be persisted.
    pub fn abandon_commit(&self, ticket: &SessionTicket, seq: u64) {
        self.log.lock().records.retain(|r| r.seq != seq);
        self.abort(ticket);
    }

    /// Discards a session. A reserved revision is marked aborted.
    pub fn abort(&self, ticket: &SessionTicket) {
        let mut log = self.log.lock();
        if let Some(own) = ticket.own {
            if log.in_flight.remove(&own) {
                log.aborted.insert(own);
            }
        }
        log.sessions.remove(&ticket.id);
    }

    /// Returns true if `revision` committed.
    #[must_use]
    pub fn is_committed(&self, revision: Revision) -> bool {
        self.log.lock().is_committed(revision)
    }

    /// Returns true if `revision` was reserved and then discarded.
    #[must_use]
    pub fn is_aborted(&self, revision: Revision) -> bool {
        let log = self.log.lock();
        log.aborted.contains(&revision) || log.compaction.holes.contains(&revision)
    }

    /// Returns true if markers at `revision` can never become visible: it
    /// was aborted, or it was reserved before a restart and never committed.
    #[must_use]
    pub fn is_discarded(&self, revision: Revision) -> bool {
        let log = self.log.lock();
        if revision <= log.compaction.through {
            return log.compaction.holes.contains(&revision);
        }
        log.aborted.contains(&revision)
            || (revision < log.next
                && !log.committed.contains(&revision)
                && !log.in_flight.contains(&revision))
    }

    /// Returns the highest committed revision.
    #[must_use]
    pub fn last_committed(&self) -> Revision {
        self.log.lock().last_committed
    }

    /// Returns the revision the next read-write session will get.
    #[must_use]
    pub fn next_revision(&self) -> Revision {
        self.log.lock().next
    }

    /// Returns the number of open sessions.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.log.lock().sessions.len()
    }

    /// Returns the newest revision every open and future session can see
    /// in full.
    #[must_use]
    pub fn horizon(&self) -> Revision {
        let log = self.log.lock();
        log.sessions
            .values()
            .map(SessionTicket::floor)
            .fold(log.last_committed, Revision::min)
    }

    /// Records that markers below `horizon` may be removed, so historical
    /// sessions older than it are refused.
    pub fn retain_from(&self, horizon: Revision) {
        let mut log = self.log.lock();
        log.retained_from = log.retained_from.max(horizon);
    }

    /// Returns the current compaction.
    #[must_use]
    pub fn compaction(&self) -> Compaction {
        self.log.lock().compaction.clone()
    }

    /// Folds every decided revision up to `through` into the compaction.
    ///
    /// The bound is clamped below the oldest in-flight revision. Returns
    /// `None` if the bound did not advance, otherwise the committed revisions
    /// that were folded. Their commit entries are no longer needed once the
    /// compaction is persisted.
    pub fn compact(&self, through: Revision) -> Option<Vec<Revision>> {
        let mut guard = self.log.lock();
        let log = &mut *guard;
        let mut through = through.min(log.last_committed);
        if let Some(first) = log.in_flight.iter().next() {
            through = through.min(Revision::new(first.as_u64().saturating_sub(1)));
        }
        if through <= log.compaction.through {
            return None;
        }

        let mut folded = Vec::new();
        let mut r = log.compaction.through.next();
        while r <= through {
            if log.committed.remove(&r) {
                folded.push(r);
            } else {
                log.compaction.holes.insert(r);
            }
            r = r.next();
        }
        log.aborted.retain(|a| *a > through);
        log.compaction.through = through;
        Some(folded)
    }

    /// Drops commit write sets no open session has to validate against.
    /// Returns the number of records dropped.
    ///
    /// A record is kept while a read-write session opened after it, or one
    /// that opened while it was still unfinished, remains open.
    pub fn prune(&self) -> usize {
        let mut guard = self.log.lock();
        let log = &mut *guard;
        let sessions = &log.sessions;
        let before = log.records.len();
        log.records.retain(|r| {
            sessions
                .values()
                .filter(|t| t.own.is_some())
                .any(|t| r.seq >= t.commit_seq || t.in_flight.contains(&r.revision))
        });
        before - log.records.len()
    }
}

impl Default for RevisionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RevisionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let log = self.log.lock();
        f.debug_struct("RevisionManager")
            .field("next", &log.next)
            .field("last_committed", &log.last_committed)
            .field("in_flight", &log.in_flight)
            .field("sessions", &log.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(list: &[&str]) -> BTreeSet<Identifier> {
        list.iter().map(|p| Identifier::parse(p)).collect()
    }

    #[test]
    fn test_revisions_strictly_increase() {
        let manager = RevisionManager::new();
        let a = manager.begin(SessionMode::ReadWrite).unwrap();
        let b = manager.begin(SessionMode::ReadWrite).unwrap();
        manager.abort(&a);
        let c = manager.begin(SessionMode::ReadWrite).unwrap();
        assert!(a.own < b.own && b.own < c.own);
        assert!(manager.is_aborted(a.own.unwrap()));
    }

    #[test]
    fn test_read_only_consumes_no_number() {
        let manager = RevisionManager::new();
        let next = manager.next_revision();
        let ro = manager.begin(SessionMode::ReadOnly).unwrap();
        assert_eq!(manager.next_revision(), next);
        assert_eq!(ro.read_point, Revision::INITIAL);
    }

    #[test]
    fn test_in_flight_revision_stays_invisible() {
        let manager = RevisionManager::new();
        let writer = manager.begin(SessionMode::ReadWrite).unwrap();
        let reader = manager.begin(SessionMode::ReadOnly).unwrap();
        let rev = writer.own.unwrap();

        let seq = manager
            .validate(&writer, &BTreeSet::new(), &paths(&["a"]), &BTreeSet::new())
            .unwrap();
        assert!(seq >= 1);
        manager.finish_commit(&writer);
        assert!(manager.is_committed(rev));
        assert!(!manager.is_visible(&reader, rev));

        let later = manager.begin(SessionMode::ReadOnly).unwrap();
        assert!(manager.is_visible(&later, rev));
    }

    #[test]
    fn test_out_of_order_commit_hidden_from_snapshot() {
        let manager = RevisionManager::new();
        let slow = manager.begin(SessionMode::ReadWrite).unwrap();
        let fast = manager.begin(SessionMode::ReadWrite).unwrap();
        let none = BTreeSet::new();
        manager.validate(&fast, &none, &paths(&["x"]), &none).unwrap();
        manager.finish_commit(&fast);

        let reader = manager.begin(SessionMode::ReadOnly).unwrap();
        assert_eq!(reader.read_point, fast.own.unwrap());
        manager.validate(&slow, &none, &paths(&["y"]), &none).unwrap();
        manager.finish_commit(&slow);
        assert!(!manager.is_visible(&reader, slow.own.unwrap()));
        assert!(manager.is_visible(&reader, fast.own.unwrap()));
    }

    #[test]
    fn test_conflicts_on_read_write_and_list() {
        let manager = RevisionManager::new();
        let none = BTreeSet::new();
        let reader = manager.begin(SessionMode::ReadWrite).unwrap();
        let writer = manager.begin(SessionMode::ReadWrite).unwrap();
        let lister = manager.begin(SessionMode::ReadWrite).unwrap();
        let bystander = manager.begin(SessionMode::ReadWrite).unwrap();

        manager.validate(&writer, &none, &paths(&["a/b"]), &none).unwrap();
        manager.finish_commit(&writer);

        let err = manager
            .validate(&reader, &paths(&["a/b"]), &paths(&["q"]), &none)
            .unwrap_err();
        assert!(err.is_retryable());
        let err = manager
            .validate(&lister, &none, &paths(&["z"]), &paths(&["a"]))
            .unwrap_err();
        assert!(matches!(err, ArborError::ConflictingCommit { .. }));
        assert!(manager
            .validate(&bystander, &paths(&["a"]), &paths(&["a/c"]), &none)
            .is_ok());
    }

    #[test]
    fn test_unfinished_commit_conflicts_with_later_session() {
        let manager = RevisionManager::new();
        let none = BTreeSet::new();
        let first = manager.begin(SessionMode::ReadWrite).unwrap();
        manager.validate(&first, &none, &paths(&["k"]), &none).unwrap();

        // Opens while the first commit is validated but not yet persisted.
        let second = manager.begin(SessionMode::ReadWrite).unwrap();
        assert!(second.in_flight.contains(&first.own.unwrap()));
        assert_eq!(manager.prune(), 0);

        manager.finish_commit(&first);
        assert_eq!(manager.prune(), 0);
        let err = manager
            .validate(&second, &paths(&["k"]), &paths(&["k"]), &none)
            .unwrap_err();
        assert!(matches!(
            err,
            ArborError::ConflictingCommit { ref path, .. } if *path == Identifier::parse("k")
        ));

        manager.abort(&second);
        assert_eq!(manager.prune(), 1);
    }

    #[test]
    fn test_unfinished_disjoint_commit_does_not_conflict() {
        let manager = RevisionManager::new();
        let none = BTreeSet::new();
        let first = manager.begin(SessionMode::ReadWrite).unwrap();
        manager.validate(&first, &none, &paths(&["a"]), &none).unwrap();
        let second = manager.begin(SessionMode::ReadWrite).unwrap();
        manager.finish_commit(&first);
        assert!(manager
            .validate(&second, &paths(&["b"]), &paths(&["b"]), &none)
            .is_ok());
    }

    #[test]
    fn test_at_revision_requires_commit() {
        let manager = RevisionManager::new();
        assert!(manager.begin(SessionMode::AtRevision(Revision::new(4))).is_err());
        assert!(manager.begin(SessionMode::AtRevision(Revision::INITIAL)).is_ok());
    }

    #[test]
    fn test_horizon_and_prune() {
        let manager = RevisionManager::new();
        let none = BTreeSet::new();
        for _ in 0..3 {
            let t = manager.begin(SessionMode::ReadWrite).unwrap();
            manager.validate(&t, &none, &paths(&["k"]), &none).unwrap();
            manager.finish_commit(&t);
        }
        assert_eq!(manager.horizon(), Revision::new(3));
        assert_eq!(manager.prune(), 3);

        let pinned = manager.begin(SessionMode::ReadOnly).unwrap();
        let writer = manager.begin(SessionMode::ReadWrite).unwrap();
        manager.validate(&writer, &none, &paths(&["k"]), &none).unwrap();
        manager.finish_commit(&writer);
        assert_eq!(manager.horizon(), Revision::new(3));
        manager.abort(&pinned);
        assert_eq!(manager.horizon(), Revision::new(4));

        manager.retain_from(Revision::new(4));
        assert!(manager.begin(SessionMode::AtRevision(Revision::new(2))).is_err());
        assert!(manager.begin(SessionMode::AtRevision(Revision::new(4))).is_ok());
    }

    #[test]
    fn test_compact_folds_decided_revisions() {
        let manager = RevisionManager::new();
        let none = BTreeSet::new();
        let commit = |path: &str| {
            let t = manager.begin(SessionMode::ReadWrite).unwrap();
            manager.validate(&t, &none, &paths(&[path]), &none).unwrap();
            manager.finish_commit(&t);
            t.own.unwrap()
        };
        let r1 = commit("a");
        let dropped = manager.begin(SessionMode::ReadWrite).unwrap();
        manager.abort(&dropped);
        let r2 = dropped.own.unwrap();
        let r3 = commit("b");
        let open = manager.begin(SessionMode::ReadWrite).unwrap();

        assert_eq!(manager.compact(Revision::new(10)), Some(vec![r1, r3]));
        let compaction = manager.compaction();
        assert_eq!(compaction.through, r3);
        assert_eq!(compaction.holes, [r2].into_iter().collect());
        assert!(manager.is_committed(r1) && manager.is_committed(r3));
        assert!(!manager.is_committed(r2));
        assert!(manager.is_discarded(r2) && manager.is_aborted(r2));
        assert!(!manager.is_discarded(open.own.unwrap()));
        assert!(manager.compact(r3).is_none());

        let recovered =
            RevisionManager::recover_compacted(Revision::new(5), compaction, BTreeSet::new());
        assert_eq!(recovered.last_committed(), r3);
        assert_eq!(recovered.next_revision(), Revision::new(5));
        assert!(recovered.is_committed(r1));
        assert!(recovered.is_discarded(r2));
        assert!(recovered.begin(SessionMode::AtRevision(r2)).is_err());
        assert!(recovered.begin(SessionMode::AtRevision(r3)).is_ok());
    }

    #[test]
    fn test_recover_resumes_numbering() {
        let committed: BTreeSet<_> = [1, 2, 5].into_iter().map(Revision::new).collect();
        let manager = RevisionManager::recover(Revision::new(7), committed);
        assert_eq!(manager.last_committed(), Revision::new(5));
        assert_eq!(manager.next_revision(), Revision::new(7));
        assert!(!manager.is_committed(Revision::new(3)));
        assert!(manager.is_discarded(Revision::new(3)));
        assert!(!manager.is_discarded(Revision::new(5)));
        assert!(!manager.is_discarded(Revision::new(7)));
    }
}
