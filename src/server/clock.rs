// ABOUTME: Server-side wall clock
// ABOUTME: Stamps captured blocks with seconds since the Unix epoch

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in seconds since the Unix epoch.
///
/// Clients compare frame timestamps against their own wall clock, so this
/// is deliberately not a monotonic clock.
#[inline]
pub fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Server clock for generating block timestamps
#[derive(Debug, Clone, Default)]
pub struct ServerClock {
    /// Frozen time, for synthetic sources and tests
    fixed: Option<f64>,
}

impl ServerClock {
    /// Create a clock that follows the system wall clock
    pub fn new() -> Self {
        Self { fixed: None }
    }

    /// Create a clock that always reports `secs`
    pub fn fixed(secs: f64) -> Self {
        Self { fixed: Some(secs) }
    }

    /// Get current server time in seconds
    #[inline]
    pub fn now_secs(&self) -> f64 {
        self.fixed.unwrap_or_else(unix_now_secs)
    }
}
