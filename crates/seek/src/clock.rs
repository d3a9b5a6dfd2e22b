//! Wall-clock seam so date-dependent behavior is testable.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns seconds since the Unix epoch as a float.
pub fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A swappable source of "now", injected into the entry factory and
/// the indexer so tests can pin timestamps.
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> f64 + Send + Sync>);

impl Clock {
    /// The system clock.
    pub fn system() -> Self {
        Self(Arc::new(unix_now_secs))
    }

    /// A clock frozen at `epoch_secs`.
    pub fn fixed(epoch_secs: f64) -> Self {
        Self(Arc::new(move || epoch_secs))
    }

    pub fn now(&self) -> f64 {
        (self.0)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Clock")
    }
}
