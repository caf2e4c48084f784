//! Integration test: metadata partition placement.
//!
//! Writability filtering plus carry scheduling through `ClusterState`.

use std::collections::{BTreeMap, HashSet};

use keeper_cluster::ClusterError;
use keeper_integration_tests::{
    GIB, T0, TestMaster, heartbeat, heartbeat_with_partitions, node_addr,
};
use keeper_placement::{PlacementError, Schedulable};

fn tally(master: &TestMaster, rounds: usize) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for _ in 0..rounds {
        for host in master.cluster.select_meta_hosts(1, &[]).unwrap() {
            *counts.entry(host).or_insert(0) += 1;
        }
    }
    counts
}

/// Free memory 8:4:2 GiB → selections split 4:2:1.
#[test]
fn test_selection_frequency_tracks_free_memory() {
    let master = TestMaster::new();
    for (i, total) in [8 * GIB, 4 * GIB, 2 * GIB].into_iter().enumerate() {
        master.add_meta_node(&node_addr(i), &heartbeat(total, 0), T0);
    }

    let counts = tally(&master, 7000);

    for (i, expected) in [4000usize, 2000, 1000].into_iter().enumerate() {
        let got = counts.get(&node_addr(i)).copied().unwrap_or(0);
        assert!(
            got.abs_diff(expected) <= 50,
            "node {i}: expected ~{expected}, got {got}"
        );
    }

    let recorded: u64 = master.cluster.snapshot().iter().map(|v| v.select_count).sum();
    assert_eq!(recorded, 7000);
}

/// Equal nodes share the load evenly.
#[test]
fn test_equal_nodes_share_load() {
    let master = TestMaster::new();
    master.add_meta_nodes(5, 16 * GIB, T0);

    let counts = tally(&master, 5000);
    assert_eq!(counts.len(), 5);
    for (addr, got) in counts {
        assert!(got.abs_diff(1000) <= 10, "{addr} selected {got} times");
    }
}

#[test]
fn test_replica_hosts_are_distinct() {
    let master = TestMaster::new();
    master.add_meta_nodes(6, 8 * GIB, T0);

    for _ in 0..200 {
        let hosts = master.cluster.select_meta_hosts(3, &[]).unwrap();
        assert_eq!(hosts.len(), 3);
        let unique: HashSet<&String> = hosts.iter().collect();
        assert_eq!(unique.len(), 3, "duplicate host in {hosts:?}");
    }
}

#[test]
fn test_exclusions_are_respected() {
    let master = TestMaster::new();
    let addrs = master.add_meta_nodes(4, 8 * GIB, T0);
    let exclude = vec![addrs[0].clone(), addrs[3].clone()];

    for _ in 0..100 {
        let hosts = master.cluster.select_meta_hosts(2, &exclude).unwrap();
        assert!(hosts.iter().all(|h| !exclude.contains(h)));
    }
}

/// Saturated, nearly-empty and partition-heavy nodes never receive writes.
#[test]
fn test_unwritable_nodes_never_selected() {
    let master = TestMaster::new();
    master.add_meta_node(&node_addr(0), &heartbeat(8 * GIB, GIB), T0);
    master.add_meta_node(&node_addr(1), &heartbeat(8 * GIB, 7 * GIB), T0); // ratio 0.875
    master.add_meta_node(&node_addr(2), &heartbeat(GIB, 0), T0); // not above the floor
    master.add_meta_node(
        &node_addr(3),
        &heartbeat_with_partitions(8 * GIB, 0, 100),
        T0,
    );
    master.add_meta_node(&node_addr(4), &heartbeat(4 * GIB, 0), T0);

    let writable: Vec<String> = master
        .cluster
        .writable_meta_nodes()
        .iter()
        .map(|n| n.addr().to_string())
        .collect();
    assert_eq!(writable, vec![node_addr(0), node_addr(4)]);

    let counts = tally(&master, 300);
    assert_eq!(
        counts.keys().cloned().collect::<Vec<_>>(),
        vec![node_addr(0), node_addr(4)]
    );
}

#[test]
fn test_not_enough_writable_nodes() {
    let master = TestMaster::new();
    master.add_meta_nodes(2, 8 * GIB, T0);
    master.add_meta_node(&node_addr(2), &heartbeat(8 * GIB, 8 * GIB), T0);

    let err = master.cluster.select_meta_hosts(3, &[]).unwrap_err();
    assert!(
        matches!(
            err,
            ClusterError::Placement(PlacementError::NotEnoughCandidates {
                needed: 3,
                available: 2,
            })
        ),
        "unexpected error: {err}"
    );

    // A failed request leaves no trace in the selection counters.
    assert!(master.cluster.snapshot().iter().all(|v| v.select_count == 0));
}

/// A node demoted by the liveness sweep drops out of placement until it
/// heartbeats again.
#[test]
fn test_inactive_node_leaves_and_rejoins_placement() {
    let master = TestMaster::new();
    let addrs = master.add_meta_nodes(3, 8 * GIB, T0);
    let timeout = master.config.liveness.node_timeout_secs;

    // Two nodes keep reporting; node 2 goes silent.
    let later = T0 + timeout + 1;
    for addr in &addrs[..2] {
        master
            .liveness
            .ingest_heartbeat_at(addr, &heartbeat(8 * GIB, 0), later)
            .unwrap();
    }
    assert_eq!(master.liveness.sweep_at(later), vec![addrs[2].clone()]);

    for _ in 0..50 {
        let hosts = master.cluster.select_meta_hosts(2, &[]).unwrap();
        assert!(!hosts.contains(&addrs[2]));
    }
    assert!(master.cluster.select_meta_hosts(3, &[]).is_err());

    master
        .liveness
        .ingest_heartbeat_at(&addrs[2], &heartbeat(8 * GIB, 0), later + 5)
        .unwrap();
    let hosts = master.cluster.select_meta_hosts(3, &[]).unwrap();
    assert!(hosts.contains(&addrs[2]));
}

/// Concurrent callers never lose a selection, and no node spends carry
/// it does not hold.
#[test]
fn test_concurrent_selection_accounting() {
    let master = TestMaster::new();
    master.add_meta_nodes(4, 8 * GIB, T0);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..500 {
                    master.cluster.select_meta_hosts(2, &[]).unwrap();
                }
            });
        }
    });

    let views = master.cluster.snapshot();
    let recorded: u64 = views.iter().map(|v| v.select_count).sum();
    assert_eq!(recorded, 4 * 500 * 2);
    for view in &views {
        assert!(view.carry >= 0.0, "{} overspent: {}", view.addr, view.carry);
        assert!(view.carry <= master.config.placement.carry_cap);
    }
}

/// A node with credit but less than a whole unit never beats one that can pay.
#[test]
fn test_partial_carry_node_waits_its_turn() {
    let master = TestMaster::new();
    let big = master.add_meta_node(&node_addr(0), &heartbeat(16 * GIB, 0), T0);
    let small = master.add_meta_node(&node_addr(1), &heartbeat(8 * GIB, 0), T0);
    big.set_carry(0.9);
    small.set_carry(1.0);

    let hosts = master.cluster.select_meta_hosts(1, &[]).unwrap();
    assert_eq!(hosts, vec![node_addr(1)]);
    assert_eq!(big.carry(), 0.9);
    assert_eq!(small.carry(), 0.0);
}
