use std::time::Duration;

/// The configuration of the coordination engine
#[derive(Debug, Clone)]
pub struct Config {
    /// How often a present client refreshes its own listener record
    pub heartbeat_interval: Duration,
    /// How many heartbeat intervals a record may age before it is treated
    /// as absent. One missed heartbeat must not evict a participant, but a
    /// disconnected client should age out within roughly a minute.
    pub staleness_multiplier: u32,
    /// The minimum interval between two accepted chat sends from this client
    pub chat_min_interval: Duration,
    /// Bound on join/start store round-trips before they surface as a
    /// retryable error instead of hanging
    pub store_timeout: Duration,
    /// Whether the hosting client writes the best-effort listener count
    /// mirror onto the session document
    pub mirror_listener_count: bool,
}

impl Config {
    /// The age beyond which a listener record is treated as absent.
    pub fn staleness_window(&self) -> Duration {
        self.heartbeat_interval * self.staleness_multiplier
    }

    /// Same window as a chrono duration, for comparing against store
    /// timestamps.
    pub fn staleness_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.staleness_window())
            .unwrap_or_else(|_| chrono::Duration::seconds(45))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            staleness_multiplier: 3,
            // At most 5 messages per second
            chat_min_interval: Duration::from_millis(200),
            store_timeout: Duration::from_secs(10),
            mirror_listener_count: true,
        }
    }
}
