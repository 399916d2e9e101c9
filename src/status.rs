// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Read-only status projections
//!
//! The engine builds a `StatusSnapshot` after every event and publishes it
//! on a watch channel. Readers clone the `Arc` and never touch engine state.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::protocols::msdp_peer::{MsdpPeer, PeerCounters, SessionState};
use crate::protocols::sa_cache::{SaCache, SaOrigin};

/// One row of "show peers"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRow {
    pub peer: Ipv4Addr,
    pub local: Ipv4Addr,
    pub state: SessionState,
}

/// One row of "show source-active"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaRow {
    pub source: Ipv4Addr,
    pub group: Ipv4Addr,
    /// `-` for locally originated entries
    pub rp: String,
    /// `yes` or `no`
    pub local: String,
    /// `yes`, `no`, or `-` for local entries
    #[serde(rename = "sptSetup")]
    pub spt_setup: String,
}

/// "show peers" keyed by peer address
pub type PeersView = BTreeMap<Ipv4Addr, PeerRow>;

/// "show source-active" keyed by group, then source
pub type SourceActiveView = BTreeMap<Ipv4Addr, BTreeMap<Ipv4Addr, SaRow>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDetail {
    pub peer: Ipv4Addr,
    pub local: Ipv4Addr,
    pub state: SessionState,
    pub group: Option<String>,
    pub mesh: bool,
    pub remote_as: Option<u32>,
    pub description: Option<String>,
    pub uptime_secs: Option<u64>,
    pub counters: PeerCounters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaDetail {
    pub source: Ipv4Addr,
    pub group: Ipv4Addr,
    pub rp: Ipv4Addr,
    pub origin: SaOrigin,
    pub learned_from: Option<Ipv4Addr>,
    pub first_hop_as: Option<u32>,
    pub spt_setup: bool,
    pub age_secs: u64,
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsdpStats {
    pub enabled: bool,
    pub peers_configured: usize,
    pub peers_established: usize,
    pub sa_total: usize,
    pub sa_local: usize,
    pub sa_remote: usize,
    pub sa_spt_setup: usize,
    pub sa_received: u64,
    pub sa_sent: u64,
    pub sa_dropped: u64,
    pub loops_rejected: u64,
    pub violations: u64,
}

/// Consistent view of the engine at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub enabled: bool,
    /// Sorted by peer address
    pub peers: Vec<PeerDetail>,
    /// Insertion order of the SA database
    pub sa: Vec<SaDetail>,
    pub stats: MsdpStats,
}

impl StatusSnapshot {
    pub fn build<'a>(
        enabled: bool,
        peers: impl IntoIterator<Item = &'a MsdpPeer>,
        is_mesh: impl Fn(Option<&str>) -> bool,
        cache: &SaCache,
        now: Instant,
    ) -> Self {
        let mut peers: Vec<PeerDetail> = peers
            .into_iter()
            .map(|p| PeerDetail {
                peer: p.address(),
                local: p.session_local.unwrap_or(p.config.local_address),
                state: p.state,
                group: p.config.group.clone(),
                mesh: is_mesh(p.config.group.as_deref()),
                remote_as: p.config.remote_as,
                description: p.config.description.clone(),
                uptime_secs: p.uptime_secs(now),
                counters: p.counters.clone(),
            })
            .collect();
        peers.sort_by_key(|p| p.peer);

        let sa: Vec<SaDetail> = cache
            .iter_ordered()
            .map(|e| SaDetail {
                source: e.source,
                group: e.group,
                rp: e.rp,
                origin: e.origin,
                learned_from: e.learned_from,
                first_hop_as: e.first_hop_as,
                spt_setup: e.spt_setup,
                age_secs: e.age_secs(now),
                expires_in_secs: e.expires_in_secs(now),
            })
            .collect();

        let cache_stats = cache.stats();
        let mut stats = MsdpStats {
            enabled,
            peers_configured: peers.len(),
            peers_established: peers
                .iter()
                .filter(|p| p.state == SessionState::Established)
                .count(),
            sa_total: cache_stats.total,
            sa_local: cache_stats.local,
            sa_remote: cache_stats.remote,
            sa_spt_setup: cache_stats.spt_setup,
            ..MsdpStats::default()
        };
        for p in &peers {
            stats.sa_received += p.counters.sa_received;
            stats.sa_sent += p.counters.sa_sent;
            stats.sa_dropped += p.counters.sa_dropped;
            stats.loops_rejected += p.counters.loops_rejected;
            stats.violations += p.counters.violations;
        }

        Self {
            enabled,
            peers,
            sa,
            stats,
        }
    }

    pub fn show_peers(&self) -> PeersView {
        self.peers
            .iter()
            .map(|p| {
                (
                    p.peer,
                    PeerRow {
                        peer: p.peer,
                        local: p.local,
                        state: p.state,
                    },
                )
            })
            .collect()
    }

    pub fn show_source_active(&self) -> SourceActiveView {
        let mut view = SourceActiveView::new();
        for e in &self.sa {
            let local = e.origin == SaOrigin::Local;
            let row = SaRow {
                source: e.source,
                group: e.group,
                rp: if local { "-".to_string() } else { e.rp.to_string() },
                local: yes_no(local).to_string(),
                spt_setup: if local {
                    "-".to_string()
                } else {
                    yes_no(e.spt_setup).to_string()
                },
            };
            view.entry(e.group).or_default().insert(e.source, row);
        }
        view
    }

    pub fn peer(&self, address: Ipv4Addr) -> Option<&PeerDetail> {
        self.peers.iter().find(|p| p.peer == address)
    }
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}
