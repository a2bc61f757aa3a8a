//! Configuration builders for integration tests

use esgf_dl::Config;
use esgf_dl::config::DownloadsSection;
use std::path::Path;
use std::time::Duration;

/// Monitor interval short enough that runs finish promptly
pub const TEST_MONITOR_INTERVAL: Duration = Duration::from_millis(20);

/// Configuration with `n` workers and the given dedicated hosts
pub fn test_config(db_path: &Path, n: i64, host_limits: &[(&str, i64)]) -> Config {
    let mut config = Config::default();
    config.downloads = Some(DownloadsSection {
        n,
        host_limits: host_limits
            .iter()
            .map(|(host, limit)| (host.to_string(), *limit))
            .collect(),
    });
    config.persistence.database_path = db_path.to_path_buf();
    config.monitor_interval = TEST_MONITOR_INTERVAL;
    config.retry.max_attempts = 0;
    config.retry.jitter = false;
    config
}
