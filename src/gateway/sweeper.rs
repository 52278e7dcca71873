//! Background eviction of idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::session::SessionManager;

/// Periodically closes sessions that have been idle longer than the
/// configured timeout.
pub struct SessionSweeper {
    sessions: Arc<SessionManager>,
    idle_timeout: Duration,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(sessions: Arc<SessionManager>, idle_timeout: Duration, interval: Duration) -> Self {
        Self {
            sessions,
            idle_timeout,
            interval,
        }
    }

    /// Sweep loop - call from a spawned task.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Session sweeper starting (idle_timeout={:?}, interval={:?})",
            self.idle_timeout, self.interval
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let evicted = self.sweep().await;
                    if evicted > 0 {
                        debug!("Sweep evicted {} sessions", evicted);
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Session sweeper shutting down");
                    break;
                }
            }
        }
    }

    /// Run a single sweep, returning the number of evicted sessions.
    pub async fn sweep(&self) -> usize {
        self.sessions.cleanup_idle_sessions(self.idle_timeout).await
    }
}
