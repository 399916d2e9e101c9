// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Source-Active database
//!
//! One entry per (source, group). Entries carry a fixed TTL from the last
//! upsert and are removed by the periodic sweep once it elapses. The cache is
//! owned by the engine task; nothing here is shared or locked.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SaKey {
    pub source: Ipv4Addr,
    pub group: Ipv4Addr,
}

impl SaKey {
    pub fn new(source: Ipv4Addr, group: Ipv4Addr) -> Self {
        Self { source, group }
    }
}

impl std::fmt::Display for SaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.source, self.group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaOrigin {
    /// Originated by this router from a local source
    Local,
    /// Learned from a peer
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaEntry {
    pub source: Ipv4Addr,
    pub group: Ipv4Addr,
    /// RP carried in the SA; our originator address for local entries
    pub rp: Ipv4Addr,
    pub origin: SaOrigin,
    pub learned_from: Option<Ipv4Addr>,
    pub first_hop_as: Option<u32>,
    pub spt_setup: bool,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub last_forwarded: Option<Instant>,
    /// Insertion order
    pub seq: u64,
}

impl SaEntry {
    pub fn key(&self) -> SaKey {
        SaKey::new(self.source, self.group)
    }

    pub fn is_local(&self) -> bool {
        self.origin == SaOrigin::Local
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn age_secs(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.created_at).as_secs()
    }

    pub fn expires_in_secs(&self, now: Instant) -> u64 {
        self.expires_at.saturating_duration_since(now).as_secs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The key was not present (or a local origination took over a learned entry)
    Inserted,
    /// Deadline extended; attributes and insertion position kept
    Refreshed,
    /// A remote advertisement for a locally originated key, or one from a
    /// peer other than the one the entry was learned from
    Ignored,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaCacheStats {
    pub total: usize,
    pub local: usize,
    pub remote: usize,
    pub spt_setup: usize,
}

#[derive(Debug)]
pub struct SaCache {
    entries: HashMap<SaKey, SaEntry>,
    ttl: Duration,
    next_seq: u64,
}

impl SaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            next_seq: 0,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert a new entry or refresh an existing one
    ///
    /// Local origination always wins: a remote upsert on a local key is
    /// ignored, and a local upsert on a learned key replaces it. A learned
    /// entry is only refreshed by the peer it was learned from, so copies
    /// circulating between other peers cannot keep it alive.
    pub fn upsert(
        &mut self,
        key: SaKey,
        rp: Ipv4Addr,
        origin: SaOrigin,
        first_hop_as: Option<u32>,
        learned_from: Option<Ipv4Addr>,
        now: Instant,
    ) -> UpsertOutcome {
        let expires_at = now + self.ttl;
        if let Some(entry) = self.entries.get_mut(&key) {
            match (entry.origin, origin) {
                (SaOrigin::Local, SaOrigin::Remote) => return UpsertOutcome::Ignored,
                (SaOrigin::Remote, SaOrigin::Remote) if entry.learned_from != learned_from => {
                    return UpsertOutcome::Ignored
                }
                (SaOrigin::Remote, SaOrigin::Local) => {
                    self.entries.remove(&key);
                }
                _ => {
                    entry.expires_at = expires_at;
                    return UpsertOutcome::Refreshed;
                }
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key,
            SaEntry {
                source: key.source,
                group: key.group,
                rp,
                origin,
                learned_from: match origin {
                    SaOrigin::Local => None,
                    SaOrigin::Remote => learned_from,
                },
                first_hop_as,
                spt_setup: false,
                created_at: now,
                expires_at,
                last_forwarded: None,
                seq,
            },
        );
        UpsertOutcome::Inserted
    }

    /// Remove every entry whose deadline has passed
    pub fn expire(&mut self, now: Instant) -> Vec<SaKey> {
        let mut expired: Vec<(u64, SaKey)> = self
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| (e.seq, e.key()))
            .collect();
        expired.sort_unstable();
        for (_, key) in &expired {
            self.entries.remove(key);
        }
        expired.into_iter().map(|(_, key)| key).collect()
    }

    /// All entries in insertion order
    pub fn snapshot(&self) -> Vec<SaEntry> {
        let mut entries: Vec<SaEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    /// Borrowing iterator in insertion order
    pub fn iter_ordered(&self) -> impl Iterator<Item = &SaEntry> {
        let mut entries: Vec<&SaEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter()
    }

    pub fn get(&self, key: &SaKey) -> Option<&SaEntry> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &SaKey) -> Option<SaEntry> {
        self.entries.remove(key)
    }

    /// Drop a local entry; learned entries for the same key are untouched
    pub fn remove_local(&mut self, key: &SaKey) -> bool {
        match self.entries.get(key) {
            Some(e) if e.is_local() => self.entries.remove(key).is_some(),
            _ => false,
        }
    }

    /// Drop everything learned from `peer`
    pub fn remove_learned_from(&mut self, peer: Ipv4Addr) -> Vec<SaKey> {
        let keys: Vec<SaKey> = self
            .entries
            .values()
            .filter(|e| e.learned_from == Some(peer))
            .map(|e| e.key())
            .collect();
        for key in &keys {
            self.entries.remove(key);
        }
        keys
    }

    /// Mark that an SPT toward the source has been requested
    pub fn set_spt_setup(&mut self, key: &SaKey) -> bool {
        match self.entries.get_mut(key) {
            Some(e) if !e.is_local() => {
                e.spt_setup = true;
                true
            }
            _ => false,
        }
    }

    pub fn mark_forwarded(&mut self, key: &SaKey, now: Instant) {
        if let Some(e) = self.entries.get_mut(key) {
            e.last_forwarded = Some(now);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> SaCacheStats {
        let local = self.entries.values().filter(|e| e.is_local()).count();
        SaCacheStats {
            total: self.entries.len(),
            local,
            remote: self.entries.len() - local,
            spt_setup: self.entries.values().filter(|e| e.spt_setup).count(),
        }
    }
}
