//! System-wide constants for ArborDB.
//!
//! Reserved path segments and engine defaults live here so that every crate
//! agrees on them.

use std::time::Duration;

// =============================================================================
// Namespace Constants
// =============================================================================

/// Separator between identifier segments in the textual form of a path.
pub const PATH_SEPARATOR: char = '/';

/// Reserved child segment holding the revision markers of an object.
///
/// The leading `~` keeps it out of the way of user segments; the storage
/// session never reports it as a child.
pub const REVISION_SEGMENT: &str = "~rev";

/// Reserved top-level segment holding the persisted commit log.
pub const COMMIT_LOG_SEGMENT: &str = "~commits";

/// Width used when zero-padding revision numbers inside marker names, so that
/// lexicographic and numeric marker order agree.
pub const REVISION_DIGITS: usize = 20;

// =============================================================================
// B+Tree Constants
// =============================================================================

/// Default maximum number of entries per B+Tree node.
pub const DEFAULT_PAGE_SIZE: usize = 64;

/// Smallest page size that still allows split and merge to preserve the
/// half-full occupancy invariant.
pub const MIN_PAGE_SIZE: usize = 4;

/// Largest supported page size.
pub const MAX_PAGE_SIZE: usize = 4096;

// =============================================================================
// Executor Constants
// =============================================================================

/// Worker threads per available processor when no explicit count is given.
pub const WORKERS_PER_CPU: usize = 2;

/// Maximum nesting of work-stealing waits on one thread before a waiter parks
/// instead of running more queued work.
pub const DEFAULT_MAX_STEAL_DEPTH: usize = 64;

/// How long an idle waiter parks before re-checking the run queue.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

// =============================================================================
// Store Constants
// =============================================================================

/// Default time a create-if-absent call waits for a colliding object to be
/// deleted before reporting failure.
pub const DEFAULT_CREATE_WAIT: Duration = Duration::from_millis(250);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_bounds() {
        assert!(MIN_PAGE_SIZE <= DEFAULT_PAGE_SIZE);
        assert!(DEFAULT_PAGE_SIZE <= MAX_PAGE_SIZE);
    }

    #[test]
    fn test_reserved_segments_are_distinct() {
        assert_ne!(REVISION_SEGMENT, COMMIT_LOG_SEGMENT);
        assert!(REVISION_SEGMENT.starts_with('~'));
        assert!(!REVISION_SEGMENT.contains(PATH_SEPARATOR));
    }
}
