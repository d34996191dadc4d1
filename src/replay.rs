//! Timestamp window for signed requests.
//!
//! A signed request declares the unix second it was made. With
//! `delta = now - declared`, the request is admitted only when
//! `-max_future <= delta <= max_past`: by default up to five minutes old or
//! up to one minute ahead of the server clock.

use crate::clock::SharedClock;
use crate::error::{AuthError, Result};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MAX_PAST: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_FUTURE: Duration = Duration::from_secs(60);

pub struct ReplayWindow {
    clock: SharedClock,
    max_past: i64,
    max_future: i64,
}

impl ReplayWindow {
    pub fn new(clock: SharedClock) -> Self {
        Self::with_bounds(clock, DEFAULT_MAX_PAST, DEFAULT_MAX_FUTURE)
    }

    pub fn with_bounds(clock: SharedClock, max_past: Duration, max_future: Duration) -> Self {
        Self {
            clock,
            max_past: max_past.as_secs() as i64,
            max_future: max_future.as_secs() as i64,
        }
    }

    pub fn check(&self, declared_unix: i64) -> Result<()> {
        let now = self.clock.now_secs();
        let delta = now.saturating_sub(declared_unix);
        if delta > self.max_past || delta < -self.max_future {
            debug!(declared_unix, now, delta, "request timestamp outside window");
            return Err(AuthError::ReplayWindow);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000;

    fn window() -> ReplayWindow {
        ReplayWindow::new(Arc::new(ManualClock::new(NOW)))
    }

    #[test]
    fn future_timestamps() {
        let w = window();
        assert!(w.check(NOW + 30).is_ok());
        assert!(w.check(NOW + 60).is_ok());
        assert!(matches!(w.check(NOW + 61), Err(AuthError::ReplayWindow)));
        assert!(matches!(w.check(NOW + 90), Err(AuthError::ReplayWindow)));
    }

    #[test]
    fn past_timestamps() {
        let w = window();
        assert!(w.check(NOW).is_ok());
        assert!(w.check(NOW - 4 * 60).is_ok());
        assert!(w.check(NOW - 5 * 60).is_ok());
        assert!(matches!(w.check(NOW - 5 * 60 - 1), Err(AuthError::ReplayWindow)));
        assert!(matches!(w.check(NOW - 6 * 60), Err(AuthError::ReplayWindow)));
    }

    #[test]
    fn extreme_values_do_not_overflow() {
        let w = window();
        assert!(w.check(i64::MIN).is_err());
        assert!(w.check(i64::MAX).is_err());
    }

    #[test]
    fn custom_bounds() {
        let w = ReplayWindow::with_bounds(
            Arc::new(ManualClock::new(NOW)),
            Duration::from_secs(10),
            Duration::ZERO,
        );
        assert!(w.check(NOW - 10).is_ok());
        assert!(w.check(NOW + 1).is_err());
    }
}
