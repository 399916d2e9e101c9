// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Four routers in a square, one AS each
//!
//! ```text
//!        R1 (AS 65001, source 10.1.1.10 -> 229.1.2.3)
//!       /  \
//!     R2    R3
//!       \  /
//!        R4 (AS 65004, receivers for 229.1.2.3)
//! ```
//!
//! R2 and R4 reach the source through R1 and R2 respectively. R3's
//! unicast route points at AS 65002, so SAs arriving at R3 from R1 or R4
//! fail the first-hop AS check.

use msdpd::protocols::sa_cache::SaKey;
use msdpd::status::SourceActiveView;
use msdpd::substrate::StaticRoute;

use super::common::*;

const R1: &str = "127.1.1.1";
const R2: &str = "127.1.2.1";
const R3: &str = "127.1.3.1";
const R4: &str = "127.1.4.1";

const SOURCE: &str = "10.1.1.10";
const GROUP: &str = "229.1.2.3";

fn route_to_source(first_hop_as: u32) -> StaticRoute {
    StaticRoute {
        prefix: "10.1.1.0/24".parse().unwrap(),
        first_hop_as,
    }
}

fn lookup<'a>(view: &'a SourceActiveView) -> Option<&'a msdpd::status::SaRow> {
    view.get(&addr(GROUP))?.get(&addr(SOURCE))
}

#[tokio::test]
async fn test_four_router_source_active_propagation() {
    let mut r1 = router_config(R1, 65001);
    r1.peers.push(peer(R1, R2, 65002));
    r1.peers.push(peer(R1, R3, 65003));
    r1.local_sources
        .push(SaKey::new(addr(SOURCE), addr(GROUP)));

    let mut r2 = router_config(R2, 65002);
    r2.peers.push(peer(R2, R1, 65001));
    r2.peers.push(peer(R2, R4, 65004));
    r2.routes.push(route_to_source(65001));

    let mut r3 = router_config(R3, 65003);
    r3.peers.push(peer(R3, R1, 65001));
    r3.peers.push(peer(R3, R4, 65004));
    r3.routes.push(route_to_source(65002));

    let mut r4 = router_config(R4, 65004);
    r4.peers.push(peer(R4, R2, 65002));
    r4.peers.push(peer(R4, R3, 65003));
    r4.routes.push(route_to_source(65002));
    r4.receivers.push(addr(GROUP));

    let h1 = start(&r1);
    let h2 = start(&r2);
    let h3 = start(&r3);
    let h4 = start(&r4);

    // Every session in the square comes up
    for (handle, peers) in [
        (&h1, [R2, R3]),
        (&h2, [R1, R4]),
        (&h3, [R1, R4]),
        (&h4, [R2, R3]),
    ] {
        for p in peers {
            assert!(wait_until(handle, |s| is_established(s, p)).await, "session to {} never came up", p);
        }
    }

    // R1 originates
    assert!(
        wait_until(&h1, |s| lookup(&s.show_source_active())
            .is_some_and(|row| row.rp == "-" && row.local == "yes" && row.spt_setup == "-"))
        .await
    );

    // R2 learns it from R1, with R1 as the RP and no local receivers
    assert!(
        wait_until(&h2, |s| lookup(&s.show_source_active()).is_some_and(|row| row.rp == R1
            && row.local == "no"
            && row.spt_setup == "no"))
        .await
    );

    // R4 learns it through R2 and joins the SPT for its receivers
    assert!(
        wait_until(&h4, |s| lookup(&s.show_source_active())
            .is_some_and(|row| row.rp == R1 && row.spt_setup == "yes"))
        .await
    );
    assert!(h4
        .substrate
        .spt_requests()
        .contains(&SaKey::new(addr(SOURCE), addr(GROUP))));
    let detail = h4.status();
    let entry = detail.sa.iter().find(|e| e.source == addr(SOURCE)).unwrap();
    assert_eq!(entry.learned_from, Some(addr(R2)));
    assert_eq!(entry.first_hop_as, Some(65002));

    // R3 rejects both copies it is offered
    assert!(wait_until(&h3, |s| s.stats.loops_rejected >= 2).await);
    assert!(lookup(&h3.status().show_source_active()).is_none());

    for handle in [h1, h2, h3, h4] {
        handle.shutdown().await;
    }
}
