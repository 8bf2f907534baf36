use std::time::Duration;

/// Minimum gap between two fresh dispatches to the same agent. A queued
/// message draining after a completion is exempt.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Hard ceiling on a single agent invocation.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(120);

/// Consecutive subscription errors tolerated before tearing the
/// subscription down and resubscribing.
pub const DEFAULT_ERROR_THRESHOLD: u32 = 10;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// How long shutdown waits for in-flight invocations before abandoning them.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub topic_id: String,
    /// Records at or below this sequence number are marked seen and never
    /// dispatched. `None` means react to everything the subscription yields.
    pub start_after: Option<u64>,
    pub cooldown: Duration,
    pub exec_timeout: Duration,
    pub error_threshold: u32,
    pub reconnect_delay: Duration,
    pub shutdown_grace: Duration,
}

impl WatcherConfig {
    pub fn new(topic_id: impl Into<String>) -> Self {
        Self {
            topic_id: topic_id.into(),
            start_after: None,
            cooldown: DEFAULT_COOLDOWN,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}
