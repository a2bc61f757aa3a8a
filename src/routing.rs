//! Host-based partitioning of the worker pool

use crate::config::DownloadsConfig;
use std::collections::BTreeMap;

/// Task queue a work item is routed to
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteKey {
    /// Dedicated queue of a configured host
    Host(String),
    /// Shared queue for every other host
    CatchAll,
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteKey::Host(host) => f.write_str(host),
            RouteKey::CatchAll => f.write_str("*"),
        }
    }
}

/// Immutable host → partition mapping with per-partition worker counts
#[derive(Clone, Debug)]
pub struct RoutingTable {
    dedicated: BTreeMap<String, usize>,
    catch_all_workers: usize,
}

impl RoutingTable {
    /// Derive the table from a validated worker layout
    ///
    /// Dedicated hosts get exactly their configured worker count; whatever is
    /// left of the total budget serves the catch-all partition.
    pub fn new(config: &DownloadsConfig) -> Self {
        let catch_all_workers = config.catch_all_workers();

        if config.dedicated_workers() > config.total_workers {
            tracing::warn!(
                total = config.total_workers,
                dedicated = config.dedicated_workers(),
                "Host limits exceed the total worker budget"
            );
        }
        if catch_all_workers == 0 {
            tracing::warn!(
                "No catch-all workers: items for hosts without a dedicated limit will not be downloaded"
            );
        }

        Self {
            dedicated: config.host_limits.clone(),
            catch_all_workers,
        }
    }

    /// Partition serving `host`
    pub fn route(&self, host: &str) -> RouteKey {
        if self.dedicated.contains_key(host) {
            RouteKey::Host(host.to_string())
        } else {
            RouteKey::CatchAll
        }
    }

    /// Every partition with its worker count, dedicated hosts first, catch-all last
    pub fn partitions(&self) -> Vec<(RouteKey, usize)> {
        self.dedicated
            .iter()
            .map(|(host, &workers)| (RouteKey::Host(host.clone()), workers))
            .chain(std::iter::once((RouteKey::CatchAll, self.catch_all_workers)))
            .collect()
    }

    /// Number of workers serving `key`
    pub fn workers_for(&self, key: &RouteKey) -> usize {
        match key {
            RouteKey::Host(host) => self.dedicated.get(host).copied().unwrap_or(0),
            RouteKey::CatchAll => self.catch_all_workers,
        }
    }

    /// Total number of workers across all partitions
    pub fn total_workers(&self) -> usize {
        self.dedicated.values().sum::<usize>() + self.catch_all_workers
    }
}
