// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Local source feeder
//!
//! Polls the multicast substrate for sources on directly connected networks
//! and reports what changed since the previous poll. Also requests shortest
//! path trees for learned sources that have local receivers.

use std::collections::BTreeSet;

use super::sa_cache::{SaCache, SaKey};
use crate::substrate::MulticastSubstrate;

/// Difference between two polls
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FeederUpdate {
    pub activated: Vec<SaKey>,
    pub deactivated: Vec<SaKey>,
    /// Active before and still active; these keep their SA entries alive
    pub still_active: Vec<SaKey>,
}

impl FeederUpdate {
    pub fn is_empty(&self) -> bool {
        self.activated.is_empty() && self.deactivated.is_empty() && self.still_active.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SourceFeeder {
    known: BTreeSet<SaKey>,
}

impl SourceFeeder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll(&mut self, substrate: &dyn MulticastSubstrate) -> FeederUpdate {
        let current: BTreeSet<SaKey> = substrate.active_local_sources().into_iter().collect();

        let update = FeederUpdate {
            activated: current.difference(&self.known).copied().collect(),
            deactivated: self.known.difference(&current).copied().collect(),
            still_active: current.intersection(&self.known).copied().collect(),
        };
        self.known = current;
        update
    }

    /// Forget everything; the next poll reports all sources as activated
    pub fn reset(&mut self) {
        self.known.clear();
    }

    pub fn known(&self) -> impl Iterator<Item = &SaKey> {
        self.known.iter()
    }
}

/// Request SPT setup for learned entries with interested receivers
///
/// Returns the keys whose request was accepted and recorded in the cache.
pub fn setup_spt(
    cache: &mut SaCache,
    substrate: &dyn MulticastSubstrate,
    keys: &[SaKey],
) -> Vec<SaKey> {
    let mut accepted = Vec::new();
    for key in keys {
        let wanted = cache
            .get(key)
            .map(|e| !e.is_local() && !e.spt_setup)
            .unwrap_or(false);
        if wanted
            && substrate.has_local_receivers(key.group)
            && substrate.request_spt(key.source, key.group)
            && cache.set_spt_setup(key)
        {
            accepted.push(*key);
        }
    }
    accepted
}
