//! Marker cleanup.
//!
//! Old markers pile up as objects are rewritten. A cleanup pass walks the
//! namespace and removes the ones no session can observe any more:
//!
//! - markers of revisions that were discarded (aborted, or reserved before a
//!   restart and never committed)
//! - committed markers older than the object's winner at the horizon
//! - a delete marker that wins at the horizon with nothing older left, since
//!   "no markers" already reads as absent, unless it belongs to the latest
//!   committed revision
//!
//! The horizon is the newest revision every open session sees in full. It is
//! published with [`RevisionManager::retain_from`](crate::RevisionManager::retain_from)
//! before anything is deleted, so no historical session can open below it.
//!
//! Once the markers are done, commit entries up to the horizon are folded
//! into the watermark. The watermark is written before the entries go.

use arbor_common::constants::{COMMIT_LOG_SEGMENT, REVISION_SEGMENT};
use arbor_common::error::ArborResult;
use arbor_common::types::{Identifier, Revision};
use arbor_store::ObjectStore;

use crate::marker::{self, RevisionMarker};
use crate::repository::{commit_entry_path, Shared};

/// What one cleanup pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// The horizon the pass ran at.
    pub horizon: Revision,
    /// Objects whose markers were inspected.
    pub objects_scanned: usize,
    /// Markers removed.
    pub markers_removed: usize,
    /// Objects left without any marker.
    pub objects_purged: usize,
    /// Commit write sets dropped from memory.
    pub records_pruned: usize,
    /// Commit entries folded into the watermark.
    pub entries_compacted: usize,
}

pub(crate) fn run(shared: &Shared) -> ArborResult<CleanupStats> {
    let horizon = shared.manager.horizon();
    shared.manager.retain_from(horizon);

    let mut stats = CleanupStats {
        horizon,
        ..CleanupStats::default()
    };
    let mut stack = vec![Identifier::root()];
    while let Some(dir) = stack.pop() {
        for child in shared.wait(shared.raw.list_children(&dir))? {
            match child.name() {
                Some(REVISION_SEGMENT) => clean_object(shared, &dir, horizon, &mut stats)?,
                Some(COMMIT_LOG_SEGMENT) if dir.is_root() => {}
                _ => stack.push(child),
            }
        }
    }
    stats.records_pruned = shared.manager.prune();

    if let Some(folded) = shared.manager.compact(horizon) {
        shared.persist_watermark()?;
        for revision in &folded {
            shared.wait(shared.raw.delete(&commit_entry_path(*revision)))?;
        }
        stats.entries_compacted = folded.len();
    }

    tracing::info!(
        horizon = %stats.horizon,
        scanned = stats.objects_scanned,
        removed = stats.markers_removed,
        purged = stats.objects_purged,
        compacted = stats.entries_compacted,
        "cleanup finished"
    );
    Ok(stats)
}

fn clean_object(
    shared: &Shared,
    object: &Identifier,
    horizon: Revision,
    stats: &mut CleanupStats,
) -> ArborResult<()> {
    stats.objects_scanned += 1;
    let markers: Vec<RevisionMarker> = shared
        .wait(shared.raw.list_children(&marker::revision_dir(object)))?
        .iter()
        .filter_map(|child| child.name().and_then(RevisionMarker::parse))
        .collect();

    let manager = &shared.manager;
    let winner = marker::resolve(markers.iter().copied(), |r| {
        r <= horizon && manager.is_committed(r)
    });

    let mut doomed: Vec<RevisionMarker> = markers
        .iter()
        .copied()
        .filter(|m| {
            manager.is_discarded(m.revision)
                || winner.is_some_and(|w| {
                    m.revision < w.revision && manager.is_committed(m.revision)
                })
        })
        .collect();
    let survivors = markers.len() - doomed.len();
    let latest = manager.last_committed();
    if let Some(w) = winner.filter(|w| !w.is_store() && w.revision < latest) {
        if survivors == 1 {
            doomed.push(w);
            stats.objects_purged += 1;
        }
    }

    if !doomed.is_empty() {
        tracing::trace!(object = %object, markers = doomed.len(), "removing markers");
    }
    for m in doomed {
        shared.wait(shared.raw.delete(&m.path_for(object)))?;
        stats.markers_removed += 1;
    }
    Ok(())
}
