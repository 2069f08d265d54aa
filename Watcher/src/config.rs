// Runtime tuning for a watcher
// Everything is passed programmatically; the library reads no environment

use crate::filter::NotifyFilter;
use std::time::Duration;

/// Watcher configuration
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Change kinds requested from each directory read
    pub notify_filter: NotifyFilter,

    /// How long stop waits for the monitor thread before detaching it
    pub join_timeout: Duration,

    /// Sleep between readiness polls in `wait_for_monitor`
    pub poll_interval: Duration,

    /// Attempts made to arm the next read before the loop gives up
    pub rearm_attempts: u32,

    /// Pause between failed arm attempts
    pub rearm_backoff: Duration,

    /// Failed read completions tolerated in a row before the loop gives up
    pub max_consecutive_failures: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfig {
            notify_filter: NotifyFilter::DEFAULT,
            join_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            rearm_attempts: 5,
            rearm_backoff: Duration::from_millis(100),
            max_consecutive_failures: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatcherConfig::default();
        assert_eq!(config.notify_filter, NotifyFilter::DEFAULT);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert!(config.rearm_attempts > 0);
    }
}
