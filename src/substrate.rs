// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Interfaces to the routing substrates the engine sits on
//!
//! The unicast side answers first-hop AS queries for the loop check. The
//! multicast side reports local sources, local receivers, and accepts SPT
//! requests. `StaticSubstrate` implements both from configuration and the
//! control API.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::protocols::sa_cache::SaKey;

pub trait UnicastRib: Send + Sync {
    /// First AS on the best path toward `source`, `None` if unreachable
    fn first_hop_as(&self, source: Ipv4Addr) -> Option<u32>;
}

pub trait MulticastSubstrate: Send + Sync {
    /// (source, group) pairs active on directly connected networks for
    /// which this router is the designated forwarder
    fn active_local_sources(&self) -> Vec<SaKey>;

    fn has_local_receivers(&self, group: Ipv4Addr) -> bool;

    /// Ask the tree-building protocol to join the shortest path tree toward
    /// `source`; true when accepted
    fn request_spt(&self, source: Ipv4Addr, group: Ipv4Addr) -> bool;
}

/// IPv4 prefix in `a.b.c.d/len` form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Prefix {
    network: Ipv4Addr,
    len: u8,
}

impl Prefix {
    pub fn new(addr: Ipv4Addr, len: u8) -> Result<Self, String> {
        if len > 32 {
            return Err(format!("prefix length {} out of range", len));
        }
        Ok(Self {
            network: Ipv4Addr::from(u32::from(addr) & Self::mask(len)),
            len,
        })
    }

    fn mask(len: u8) -> u32 {
        if len == 0 {
            0
        } else {
            u32::MAX << (32 - len as u32)
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & Self::mask(self.len) == u32::from(self.network)
    }
}

impl FromStr for Prefix {
    type Err = String;

    /// A bare address is read as a host route
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = match s.split_once('/') {
            Some((a, l)) => (
                a,
                l.parse::<u8>()
                    .map_err(|_| format!("invalid prefix length in '{}'", s))?,
            ),
            None => (s, 32),
        };
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| format!("invalid address in '{}'", s))?;
        Prefix::new(addr, len)
    }
}

impl TryFrom<String> for Prefix {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Prefix> for String {
    fn from(p: Prefix) -> Self {
        p.to_string()
    }
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.len)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    pub prefix: Prefix,
    pub first_hop_as: u32,
}

/// Substrate backed by in-memory tables
///
/// Shared between the engine (reads) and the control socket (writes).
#[derive(Debug, Default)]
pub struct StaticSubstrate {
    routes: RwLock<Vec<StaticRoute>>,
    sources: RwLock<BTreeSet<SaKey>>,
    receivers: RwLock<BTreeSet<Ipv4Addr>>,
    spt_requests: RwLock<BTreeSet<SaKey>>,
}

impl StaticSubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the route for `prefix`
    pub fn add_route(&self, prefix: Prefix, first_hop_as: u32) {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        routes.retain(|r| r.prefix != prefix);
        routes.push(StaticRoute {
            prefix,
            first_hop_as,
        });
    }

    pub fn remove_route(&self, prefix: Prefix) -> bool {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let before = routes.len();
        routes.retain(|r| r.prefix != prefix);
        routes.len() != before
    }

    pub fn routes(&self) -> Vec<StaticRoute> {
        let mut routes = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        routes.sort_by_key(|r| r.prefix);
        routes
    }

    /// Returns false if the pair was already active
    pub fn add_source(&self, source: Ipv4Addr, group: Ipv4Addr) -> bool {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(SaKey::new(source, group))
    }

    pub fn remove_source(&self, source: Ipv4Addr, group: Ipv4Addr) -> bool {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&SaKey::new(source, group))
    }

    pub fn add_receiver(&self, group: Ipv4Addr) -> bool {
        self.receivers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(group)
    }

    pub fn remove_receiver(&self, group: Ipv4Addr) -> bool {
        self.receivers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&group)
    }

    /// SPT joins requested so far
    pub fn spt_requests(&self) -> Vec<SaKey> {
        self.spt_requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}

impl UnicastRib for StaticSubstrate {
    /// Longest-prefix match over the static routes
    fn first_hop_as(&self, source: Ipv4Addr) -> Option<u32> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.prefix.contains(source))
            .max_by_key(|r| r.prefix.len())
            .map(|r| r.first_hop_as)
    }
}

impl MulticastSubstrate for StaticSubstrate {
    fn active_local_sources(&self) -> Vec<SaKey> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    fn has_local_receivers(&self, group: Ipv4Addr) -> bool {
        self.receivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&group)
    }

    fn request_spt(&self, source: Ipv4Addr, group: Ipv4Addr) -> bool {
        if !self.has_local_receivers(group) {
            return false;
        }
        self.spt_requests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(SaKey::new(source, group));
        true
    }
}
