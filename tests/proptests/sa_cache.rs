// SPDX-License-Identifier: Apache-2.0 OR MIT
//! SA cache invariants under arbitrary operation sequences

use msdpd::protocols::sa_cache::{SaCache, SaKey, SaOrigin, UpsertOutcome};
use proptest::prelude::*;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

const TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
enum Op {
    /// (source index, group index, local, peer index)
    Upsert(u8, u8, bool, u8),
    /// Advance the clock by this many seconds, then sweep
    Sweep(u8),
    RemoveLearnedFrom(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..6, 0u8..3, any::<bool>(), 0u8..3).prop_map(|(s, g, l, p)| Op::Upsert(s, g, l, p)),
        1 => (0u8..15).prop_map(Op::Sweep),
        1 => (0u8..3).prop_map(Op::RemoveLearnedFrom),
    ]
}

fn key(s: u8, g: u8) -> SaKey {
    SaKey::new(Ipv4Addr::new(10, 0, 0, s + 1), Ipv4Addr::new(239, 0, 0, g + 1))
}

fn peer(p: u8) -> Ipv4Addr {
    Ipv4Addr::new(192, 0, 2, p + 1)
}

proptest! {
    /// **Property:** one entry per key, snapshot in insertion order, no
    /// entry outlives its deadline across a sweep, a local entry is never
    /// displaced by a learned one, and only the learning peer refreshes a
    /// learned entry
    #[test]
    fn cache_invariants(ops in prop::collection::vec(op(), 1..80)) {
        let start = Instant::now();
        let mut now = start;
        let mut cache = SaCache::new(TTL);

        for op in ops {
            match op {
                Op::Upsert(s, g, local, p) => {
                    let k = key(s, g);
                    let before = cache.get(&k).map(|e| e.origin);
                    let before_from = cache.get(&k).and_then(|e| e.learned_from);
                    let len_before = cache.len();
                    let (origin, from) = if local {
                        (SaOrigin::Local, None)
                    } else {
                        (SaOrigin::Remote, Some(peer(p)))
                    };
                    let outcome = cache.upsert(k, peer(p), origin, Some(65000), from, now);
                    match outcome {
                        UpsertOutcome::Inserted => {
                            prop_assert!(before.is_none() || before != Some(origin));
                        }
                        UpsertOutcome::Refreshed => {
                            prop_assert_eq!(before, Some(origin));
                            prop_assert_eq!(before_from, from);
                            prop_assert_eq!(cache.len(), len_before);
                        }
                        UpsertOutcome::Ignored => {
                            prop_assert_eq!(origin, SaOrigin::Remote);
                            prop_assert!(
                                before == Some(SaOrigin::Local)
                                    || (before == Some(SaOrigin::Remote) && before_from != from)
                            );
                        }
                    }
                    if before == Some(SaOrigin::Local) {
                        prop_assert_eq!(cache.get(&k).unwrap().origin, SaOrigin::Local);
                    }
                }
                Op::Sweep(secs) => {
                    now += Duration::from_secs(secs as u64);
                    cache.expire(now);
                    for entry in cache.iter_ordered() {
                        prop_assert!(entry.expires_at > now);
                    }
                }
                Op::RemoveLearnedFrom(p) => {
                    cache.remove_learned_from(peer(p));
                    prop_assert!(cache.iter_ordered().all(|e| e.learned_from != Some(peer(p))));
                }
            }

            let snapshot = cache.snapshot();
            let keys: HashSet<SaKey> = snapshot.iter().map(|e| e.key()).collect();
            prop_assert_eq!(keys.len(), snapshot.len());
            prop_assert!(snapshot.windows(2).all(|w| w[0].seq < w[1].seq));
            prop_assert_eq!(snapshot.len(), cache.len());
        }
    }
}
