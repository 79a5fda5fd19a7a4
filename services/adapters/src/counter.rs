//! Active-connection counting
//!
//! The session router reports +1 when a platform becomes connected and -1
//! when it stops being connected. Whatever sits behind the counter (a gauge,
//! a server-wide tally) only ever sees balanced deltas.

use std::sync::atomic::{AtomicI64, Ordering};

/// Receives connected-count deltas
pub trait ConnectionCounter: Send + Sync {
    /// Apply `delta` (always +1 or -1)
    fn apply(&self, delta: i64);
}

impl<F> ConnectionCounter for F
where
    F: Fn(i64) + Send + Sync,
{
    fn apply(&self, delta: i64) {
        self(delta)
    }
}

/// Process-wide tally of connected platforms
#[derive(Debug, Default)]
pub struct ActiveConnections {
    count: AtomicI64,
}

impl ActiveConnections {
    /// Create a zeroed counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tally
    pub fn get(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }
}

impl ConnectionCounter for ActiveConnections {
    fn apply(&self, delta: i64) {
        let now = self.count.fetch_add(delta, Ordering::AcqRel) + delta;
        if now < 0 {
            tracing::warn!(count = now, "Active connection count went negative");
        }
    }
}
