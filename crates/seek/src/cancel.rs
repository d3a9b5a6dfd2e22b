//! Cancellation tokens for in-flight searches.
//!
//! The view layer starts a new search for every keystroke; each new
//! search version cancels the previous one. Tokens are cheap to clone
//! and check a single atomic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tracks the active search version.
///
/// Call `next_version()` when a new search starts; older searches see
/// their `CancellationToken` report cancelled on the next check.
#[derive(Debug, Default)]
pub struct SearchVersionTracker {
    active_version: Arc<AtomicU64>,
}

impl SearchVersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the active version, cancelling in-flight searches.
    pub fn next_version(&self) -> u64 {
        self.active_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the current active version without incrementing.
    pub fn current_version(&self) -> u64 {
        self.active_version.load(Ordering::SeqCst)
    }

    /// Creates a token bound to the given version.
    pub fn token_for_version(&self, version: u64) -> CancellationToken {
        CancellationToken {
            active_version: self.active_version.clone(),
            version,
        }
    }
}

/// A token for terminating a long-running search early.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    active_version: Arc<AtomicU64>,
    version: u64,
}

impl CancellationToken {
    /// A token that is never cancelled. Useful for tests and for
    /// operations that must run to completion.
    pub fn noop() -> Self {
        Self {
            active_version: Arc::new(AtomicU64::new(0)),
            version: 0,
        }
    }

    /// Returns `Some(())` while this token is still the active version,
    /// `None` once superseded. The `Option` shape allows `?`-style
    /// early returns from search loops.
    #[inline]
    pub fn is_active(&self) -> Option<()> {
        if self.version == self.active_version.load(Ordering::Relaxed) {
            Some(())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_stays_active_until_superseded() {
        let tracker = SearchVersionTracker::new();
        let v1 = tracker.next_version();
        let token = tracker.token_for_version(v1);
        assert!(token.is_active().is_some());

        tracker.next_version();
        assert!(token.is_active().is_none(), "old token should be cancelled");
    }

    #[test]
    fn noop_token_never_cancels() {
        let token = CancellationToken::noop();
        assert!(token.is_active().is_some());
    }
}
