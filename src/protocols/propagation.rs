// SPDX-License-Identifier: Apache-2.0 OR MIT
//! SA propagation: loop prevention and peer-group forwarding
//!
//! Decisions here are pure. The engine passes in the cache, the unicast RIB
//! and a view of its established peers; what comes back is a list of
//! per-peer sends that the engine queues on the sessions.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use super::sa_cache::{SaCache, SaKey, SaOrigin, UpsertOutcome};
use crate::error::MsdpError;
use crate::substrate::UnicastRib;

/// What the propagation rules need to know about a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerView<'a> {
    pub address: Ipv4Addr,
    /// `None` is the implicit default group
    pub group: Option<&'a str>,
    pub mesh: bool,
    pub remote_as: Option<u32>,
}

/// Entries to send to one peer under one RP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaSend {
    pub peer: Ipv4Addr,
    pub rp: Ipv4Addr,
    pub entries: Vec<(Ipv4Addr, Ipv4Addr)>,
}

/// Outcome of processing one received SA message
#[derive(Debug, Default)]
pub struct ReceiveResult {
    pub inserted: Vec<SaKey>,
    pub refreshed: Vec<SaKey>,
    /// Remote advertisements for keys we originate
    pub ignored: Vec<SaKey>,
    pub rejected: Vec<MsdpError>,
    pub sends: Vec<SaSend>,
}

/// Mesh-group rule: never hand an entry to a peer in the same mesh group as
/// the peer it came from
pub fn should_forward(from: &PeerView<'_>, to: &PeerView<'_>) -> bool {
    to.address != from.address && (to.group != from.group || !to.mesh)
}

/// Collects entries per (peer, rp) so each peer gets one SA per RP
#[derive(Default)]
struct SendSet {
    by_peer: BTreeMap<(Ipv4Addr, Ipv4Addr), Vec<(Ipv4Addr, Ipv4Addr)>>,
}

impl SendSet {
    fn push(&mut self, peer: Ipv4Addr, rp: Ipv4Addr, key: SaKey) {
        self.by_peer
            .entry((peer, rp))
            .or_default()
            .push((key.source, key.group));
    }

    fn into_sends(self) -> Vec<SaSend> {
        self.by_peer
            .into_iter()
            .map(|((peer, rp), entries)| SaSend { peer, rp, entries })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct PropagationEngine {
    pub local_as: u32,
    /// RP address carried in locally originated SAs
    pub originator_id: Ipv4Addr,
    /// Minimum spacing between forwards of a refreshed entry
    pub forward_holddown: Duration,
}

impl PropagationEngine {
    pub fn new(local_as: u32, originator_id: Ipv4Addr, forward_holddown: Duration) -> Self {
        Self {
            local_as,
            originator_id,
            forward_holddown,
        }
    }

    /// First-hop AS check for SAs from inter-AS peers
    pub fn loop_check(
        &self,
        rib: &dyn UnicastRib,
        from: &PeerView<'_>,
        key: SaKey,
    ) -> Result<(), MsdpError> {
        let expected_as = match from.remote_as {
            Some(remote_as) if remote_as != self.local_as => remote_as,
            _ => return Ok(()),
        };
        let first_hop_as = rib.first_hop_as(key.source);
        if first_hop_as == Some(expected_as) {
            Ok(())
        } else {
            Err(MsdpError::LoopDetected {
                peer: from.address,
                sa_source: key.source,
                group: key.group,
                first_hop_as,
                expected_as,
            })
        }
    }

    /// Process the entries of one SA received from `from`
    pub fn on_receive(
        &self,
        cache: &mut SaCache,
        rib: &dyn UnicastRib,
        from: &PeerView<'_>,
        established: &[PeerView<'_>],
        rp: Ipv4Addr,
        entries: &[(Ipv4Addr, Ipv4Addr)],
        now: Instant,
    ) -> ReceiveResult {
        let mut result = ReceiveResult::default();
        let mut sends = SendSet::default();

        for &(source, group) in entries {
            let key = SaKey::new(source, group);
            if let Err(e) = self.loop_check(rib, from, key) {
                result.rejected.push(e);
                continue;
            }

            let first_hop_as = match from.remote_as {
                Some(remote_as) if remote_as != self.local_as => Some(remote_as),
                _ => rib.first_hop_as(source),
            };
            let outcome = cache.upsert(
                key,
                rp,
                SaOrigin::Remote,
                first_hop_as,
                Some(from.address),
                now,
            );
            let forward = match outcome {
                UpsertOutcome::Inserted => {
                    result.inserted.push(key);
                    true
                }
                UpsertOutcome::Refreshed => {
                    result.refreshed.push(key);
                    self.holddown_elapsed(cache, &key, now)
                }
                UpsertOutcome::Ignored => {
                    result.ignored.push(key);
                    false
                }
            };
            if !forward {
                continue;
            }

            let mut forwarded = false;
            for to in established.iter().filter(|to| should_forward(from, to)) {
                sends.push(to.address, rp, key);
                forwarded = true;
            }
            if forwarded {
                cache.mark_forwarded(&key, now);
            }
        }

        result.sends = sends.into_sends();
        result
    }

    fn holddown_elapsed(&self, cache: &SaCache, key: &SaKey, now: Instant) -> bool {
        match cache.get(key).and_then(|e| e.last_forwarded) {
            Some(at) => now.saturating_duration_since(at) >= self.forward_holddown,
            None => true,
        }
    }

    /// Originate (or refresh) a local source
    ///
    /// New entries go to every established peer; refreshes are not sent,
    /// the periodic advertisement covers them.
    pub fn on_local_origination(
        &self,
        cache: &mut SaCache,
        established: &[PeerView<'_>],
        key: SaKey,
        now: Instant,
    ) -> (UpsertOutcome, Vec<SaSend>) {
        let outcome = cache.upsert(
            key,
            self.originator_id,
            SaOrigin::Local,
            Some(self.local_as),
            None,
            now,
        );
        if outcome != UpsertOutcome::Inserted || established.is_empty() {
            return (outcome, Vec::new());
        }

        cache.mark_forwarded(&key, now);
        let sends = established
            .iter()
            .map(|to| SaSend {
                peer: to.address,
                rp: self.originator_id,
                entries: vec![(key.source, key.group)],
            })
            .collect();
        (outcome, sends)
    }

    /// Periodic advertisement to every established peer
    ///
    /// Mesh peers get our local entries; non-mesh peers get the whole
    /// database. Nothing goes back to the peer it was learned from.
    pub fn periodic(&self, cache: &SaCache, established: &[PeerView<'_>]) -> Vec<SaSend> {
        let mut sends = SendSet::default();
        for to in established {
            self.collect_for_peer(cache, to, &mut sends);
        }
        sends.into_sends()
    }

    /// What a peer gets right after its session comes up
    pub fn initial_sync(&self, cache: &SaCache, to: &PeerView<'_>) -> Vec<SaSend> {
        let mut sends = SendSet::default();
        self.collect_for_peer(cache, to, &mut sends);
        sends.into_sends()
    }

    fn collect_for_peer(&self, cache: &SaCache, to: &PeerView<'_>, sends: &mut SendSet) {
        for entry in cache.iter_ordered() {
            let eligible = match entry.origin {
                SaOrigin::Local => true,
                SaOrigin::Remote => !to.mesh && entry.learned_from != Some(to.address),
            };
            if eligible {
                sends.push(to.address, entry.rp, entry.key());
            }
        }
    }
}
