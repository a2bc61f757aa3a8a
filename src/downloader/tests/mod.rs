use crate::config::{HttpConfig, RetryConfig};
use crate::downloader::HttpDownloader;
use crate::types::{ChecksumType, FileSpec};
use sha2::{Digest, Sha256};
use std::time::Duration;


/// Downloader with millisecond backoff so retry tests stay fast
pub(super) fn test_downloader(max_attempts: u32) -> HttpDownloader {
    let retry = RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    let http = HttpConfig {
        timeout: Duration::from_secs(10),
        connect_timeout: Duration::from_secs(5),
        ..HttpConfig::default()
    };
    HttpDownloader::new(&http, retry).unwrap()
}

pub(super) fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// File spec served at `<base>/<name>` whose checksum and size match `body`
pub(super) fn spec_for(base: &str, name: &str, body: &[u8]) -> FileSpec {
    FileSpec {
        url: format!("{base}/{name}"),
        filename: name.to_string(),
        checksum: sha256_hex(body),
        checksum_type: ChecksumType::Sha256,
        size: body.len() as u64,
    }
}
