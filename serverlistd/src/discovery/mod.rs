pub mod collector;

use std::net::IpAddr;
use anyhow::Result;
use futures::future::BoxFuture;
use shared::types::{DiscoveryResult, ServerRecord};

/// One full collection run: probe the network, gather replies until the
/// deadline, return the grouped result.
pub trait Collector: Send + Sync {
    fn collect(&self) -> BoxFuture<'_, Result<DiscoveryResult>>;
}

/// Servers seen during one run, grouped by source address.
/// Groups and servers keep first-seen order.
#[derive(Debug, Default)]
pub struct Accumulator {
    groups: Vec<(IpAddr, Vec<ServerRecord>)>,
}

impl Accumulator {
    /// Insert unless this address already announced a server of the same
    /// name. Returns false when the record was discarded.
    ///
    /// Keyed by name rather than id: another player browsing the in-game list
    /// during the run triggers a second round of announcements.
    pub fn insert(&mut self, source: IpAddr, server: ServerRecord) -> bool {
        let index = match self.groups.iter().position(|(addr, _)| *addr == source) {
            Some(index) => index,
            None => {
                self.groups.push((source, Vec::new()));
                self.groups.len() - 1
            }
        };

        let servers = &mut self.groups[index].1;
        if servers.iter().any(|existing| existing.name == server.name) {
            return false;
        }
        servers.push(server);
        true
    }

    pub fn into_groups(self) -> Vec<Vec<ServerRecord>> {
        self.groups.into_iter().map(|(_, servers)| servers).collect()
    }
}
