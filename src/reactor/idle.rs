//! Idle-connection expiry.
//!
//! # Responsibilities
//! - Turn the configured idle timeout into a poll timeout
//! - Decide which connections have gone quiet for too long
//!
//! # Design Decisions
//! - Pure over `Instant`s so it is testable without sockets
//! - Zero seconds disables expiry and lets the poller block indefinitely

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    timeout: Option<Duration>,
}

impl IdlePolicy {
    pub fn from_secs(secs: u64) -> Self {
        Self {
            timeout: (secs > 0).then(|| Duration::from_secs(secs)),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// How long the poller may block given each connection's last activity.
    ///
    /// `None` means no deadline is pending.
    pub fn poll_timeout<I>(&self, last_activity: I, now: Instant) -> Option<Duration>
    where
        I: IntoIterator<Item = Instant>,
    {
        let timeout = self.timeout?;
        last_activity
            .into_iter()
            .map(|last| (last + timeout).saturating_duration_since(now))
            .min()
    }

    pub fn is_expired(&self, last_activity: Instant, now: Instant) -> bool {
        match self.timeout {
            Some(timeout) => now.saturating_duration_since(last_activity) >= timeout,
            None => false,
        }
    }
}
