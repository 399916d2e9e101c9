// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Peer sessions between pairs and triples of routers

use std::time::Duration;

use msdpd::config::GroupConfig;
use msdpd::protocols::msdp::MsdpEvent;
use msdpd::protocols::sa_cache::SaKey;

use super::common::*;

#[tokio::test]
async fn test_session_lifecycle() {
    let mut a_config = router_config("127.2.1.1", 65010);
    a_config.peers.push(peer("127.2.1.1", "127.2.2.1", 65020));
    let mut b_config = router_config("127.2.2.1", 65020);
    b_config.peers.push(peer("127.2.2.1", "127.2.1.1", 65010));

    // A has the lower address and waits to be dialed
    let a = start(&a_config);
    assert!(wait_until(&a, |s| peer_state(s, "127.2.2.1").as_deref() == Some("connecting")).await);

    let b = start(&b_config);
    assert!(wait_until(&a, |s| is_established(s, "127.2.2.1")).await);
    assert!(wait_until(&b, |s| is_established(s, "127.2.1.1")).await);

    let status = a.status();
    let row = &status.show_peers()[&addr("127.2.2.1")];
    assert_eq!(row.local, addr("127.2.1.1"));
    assert!(status.peer(addr("127.2.2.1")).unwrap().uptime_secs.is_some());

    // B going away drops the session on A
    b.dispatch(MsdpEvent::Disable).await.unwrap();
    assert!(wait_until(&a, |s| !is_established(s, "127.2.2.1")).await);
    assert!(wait_until(&b, |s| peer_state(s, "127.2.1.1").as_deref() == Some("idle")).await);

    b.dispatch(MsdpEvent::Enable).await.unwrap();
    assert!(wait_until(&a, |s| is_established(s, "127.2.2.1")).await);
    assert!(
        wait_until(&a, |s| s
            .peer(addr("127.2.2.1"))
            .is_some_and(|p| p.counters.established_transitions >= 2))
        .await
    );

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_remove_peer_flushes_learned_entries() {
    let source = SaKey::new(addr("10.3.1.10"), addr("239.3.3.3"));

    let mut a_config = router_config("127.3.1.1", 65031);
    a_config.peers.push(peer("127.3.1.1", "127.3.2.1", 65032));
    a_config.local_sources.push(source);

    let mut b_config = router_config("127.3.2.1", 65032);
    b_config.peers.push(peer("127.3.2.1", "127.3.1.1", 65031));
    b_config.peers.push(peer("127.3.2.1", "127.3.3.1", 65033));
    b_config.routes.push(msdpd::substrate::StaticRoute {
        prefix: "10.3.1.0/24".parse().unwrap(),
        first_hop_as: 65031,
    });

    let mut c_config = router_config("127.3.3.1", 65033);
    c_config.peers.push(peer("127.3.3.1", "127.3.2.1", 65032));

    let a = start(&a_config);
    let b = start(&b_config);
    let c = start(&c_config);

    assert!(
        wait_until(&b, |s| s
            .sa
            .iter()
            .any(|e| e.source == source.source && e.learned_from == Some(addr("127.3.1.1"))))
        .await
    );
    assert!(wait_until(&b, |s| is_established(s, "127.3.3.1")).await);

    b.dispatch(MsdpEvent::RemovePeer {
        peer: addr("127.3.1.1"),
    })
    .await
    .unwrap();
    assert!(wait_until(&b, |s| s.peer(addr("127.3.1.1")).is_none() && s.sa.is_empty()).await);
    assert!(is_established(&b.status(), "127.3.3.1"));

    // A notices the session is gone and keeps trying to reconnect
    assert!(wait_until(&a, |s| !is_established(s, "127.3.2.1")).await);

    a.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
}

#[tokio::test]
async fn test_withdrawn_source_ages_out() {
    let source = SaKey::new(addr("10.4.1.10"), addr("239.4.4.4"));

    let mut a_config = router_config("127.4.1.1", 65040);
    a_config.peers.push(peer("127.4.1.1", "127.4.2.1", 65040));
    a_config.local_sources.push(source);

    let mut b_config = router_config("127.4.2.1", 65040);
    b_config.timers.sa_ttl = 2.0;
    b_config.peers.push(peer("127.4.2.1", "127.4.1.1", 65040));

    let a = start(&a_config);
    let b = start(&b_config);

    assert!(wait_until(&b, |s| s.stats.sa_remote == 1).await);

    assert!(a.substrate.remove_source(source.source, source.group));
    a.dispatch(MsdpEvent::SourcesChanged).await.unwrap();
    assert!(wait_until(&a, |s| s.sa.is_empty()).await);

    // Nothing refreshes B's copy any more
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(wait_until(&b, |s| s.sa.is_empty()).await);
    assert!(is_established(&b.status(), "127.4.1.1"));

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_mesh_group_members_do_not_reflect() {
    let source = SaKey::new(addr("10.5.1.10"), addr("239.5.5.5"));
    let routers = ["127.5.1.1", "127.5.2.1", "127.5.3.1"];

    let mut handles = Vec::new();
    for (i, router) in routers.iter().enumerate() {
        let mut config = router_config(router, 65050);
        config
            .groups
            .insert("backbone".to_string(), GroupConfig { mesh: true });
        for other in routers.iter().filter(|r| *r != router) {
            let mut p = peer(router, other, 65050);
            p.group = Some("backbone".to_string());
            config.peers.push(p);
        }
        if i == 0 {
            config.local_sources.push(source);
        }
        handles.push(start(&config));
    }

    for (handle, router) in handles.iter().zip(routers) {
        for other in routers.iter().filter(|r| **r != router) {
            assert!(wait_until(handle, |s| is_established(s, other)).await);
        }
    }
    for handle in &handles[1..] {
        assert!(
            wait_until(handle, |s| s
                .sa
                .iter()
                .any(|e| e.learned_from == Some(addr("127.5.1.1"))))
            .await
        );
    }

    // Let a few advertisement periods pass
    tokio::time::sleep(Duration::from_secs(2)).await;
    for (handle, router) in handles[1..].iter().zip(&routers[1..]) {
        let status = handle.status();
        for other in routers[1..].iter().filter(|r| *r != router) {
            let counters = &status.peer(addr(other)).unwrap().counters;
            assert_eq!(counters.sa_sent, 0, "{} reflected to {}", router, other);
        }
    }

    for handle in handles {
        handle.shutdown().await;
    }
}
