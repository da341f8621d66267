//! Background sweep for expired sessions.

use crate::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Consecutive sweep failures before escalating to an error-level signal.
const MAX_SWEEP_FAILURES: u32 = 3;

/// Handle to the periodic expired-session sweep.
///
/// Dropping the handle aborts the task, so re-arming the sweep by replacing
/// the instance always clears the previous one first — two sweepers never run
/// concurrently for the same store.
pub struct CleanupTask {
    handle: JoinHandle<()>,
}

impl CleanupTask {
    /// Start sweeping the store at the given cadence.
    pub fn spawn(store: Arc<dyn SessionStore>, every: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick fires immediately

            let mut consecutive_failures = 0u32;
            loop {
                ticker.tick().await;
                match store.cleanup_expired_sessions() {
                    Ok(cleaned) => {
                        consecutive_failures = 0;
                        if cleaned > 0 {
                            debug!(cleaned, "session sweep completed");
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        warn!(
                            error = %e,
                            attempt = consecutive_failures,
                            "session sweep failed"
                        );
                        if consecutive_failures >= MAX_SWEEP_FAILURES {
                            error!(
                                consecutive_failures,
                                "session sweep failing repeatedly; \
                                 manual intervention may be required"
                            );
                        }
                    }
                }
            }
        });
        Self { handle }
    }

    /// Stop the sweep.
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
