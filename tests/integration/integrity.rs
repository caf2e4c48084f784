//! Integration test: integrity sweeps.
//!
//! Partitions spread over a set of data nodes, swept end to end through
//! `IntegritySweeper`, with warnings observed on the shared event bus.

use std::time::Duration;

use keeper_integration_tests::{CLUSTER_ID, T0, TestMaster, node_addr};
use keeper_types::events::{IntegrityWarning, UndecidableReason, WarningKind};
use keeper_types::{MasterConfig, PartitionId, unix_now};

/// Old enough to pass both the CRC and the missing-replica gates.
const STABLE: u64 = T0 - 3_600;

/// Ten three-replica partitions over five nodes, host sets rotated.
fn spread(master: &TestMaster, now: u64) -> Vec<Vec<String>> {
    (0..10u64)
        .map(|p| {
            let hosts: Vec<String> = (0..3).map(|r| node_addr((p as usize + r) % 5)).collect();
            master.add_partition(p + 1, &hosts, now);
            hosts
        })
        .collect()
}

/// Every replica reports `crc` for extent `name`.
fn report_uniform(master: &TestMaster, pid: u64, hosts: &[String], name: &str, crc: u32) {
    let partition = master.table.get(PartitionId::new(pid)).unwrap();
    let metas: Vec<(&str, u64, u32)> = hosts.iter().map(|h| (h.as_str(), 65_536, crc)).collect();
    master.report_file(&partition, name, &metas, STABLE);
}

#[test]
fn test_consistent_cluster_sweeps_clean() {
    let master = TestMaster::new();
    let layout = spread(&master, T0);
    for (i, hosts) in layout.iter().enumerate() {
        for extent in 1..=4 {
            report_uniform(&master, i as u64 + 1, hosts, &extent.to_string(), 0xABCD);
        }
    }

    let mut rx = master.events.subscribe::<IntegrityWarning>();
    let summary = master.sweeper.sweep_at(T0);

    assert_eq!(summary.partitions, 10);
    assert_eq!(summary.files_checked, 40);
    assert_eq!(summary.warnings, 0);
    assert_eq!(summary.unavailable, 0);
    assert!(rx.drain().is_empty());
}

/// One corrupted replica per affected partition is blamed, and only that one.
#[test]
fn test_corrupt_replicas_are_blamed() {
    let master = TestMaster::new();
    let layout = spread(&master, T0);
    for (i, hosts) in layout.iter().enumerate() {
        report_uniform(&master, i as u64 + 1, hosts, "100", 7);
    }

    // Corrupt the second replica of partitions 2 and 7.
    let mut corrupted = Vec::new();
    for pid in [2u64, 7] {
        let hosts = &layout[pid as usize - 1];
        let partition = master.table.get(PartitionId::new(pid)).unwrap();
        master.report_file(&partition, "100", &[(hosts[1].as_str(), 65_536, 8)], STABLE);
        corrupted.push((PartitionId::new(pid), hosts[1].clone()));
    }

    let mut rx = master.events.subscribe::<IntegrityWarning>();
    let summary = master.sweeper.sweep_at(T0);
    assert_eq!(summary.warnings, 2);
    assert_eq!(summary.bad_replicas, 2);

    let warnings = rx.drain();
    assert_eq!(warnings.len(), 2);
    for (warning, (pid, addr)) in warnings.iter().zip(&corrupted) {
        assert_eq!(warning.cluster_id, CLUSTER_ID);
        assert_eq!(warning.partition_id, *pid);
        assert_eq!(warning.file_name.as_deref(), Some("100"));
        assert_eq!(
            warning.kind,
            WarningKind::BadCrc {
                bad_addrs: vec![addr.clone()],
            }
        );
        // Both CRC groups are attached for auditing.
        assert_eq!(warning.details.len(), 2);
    }
}

/// A 2-2 split over four replicas names nobody.
#[test]
fn test_tied_replicas_are_undecidable() {
    let master = TestMaster::new();
    let hosts: Vec<String> = (0..4).map(node_addr).collect();
    let partition = master.add_partition(1, &hosts, T0);
    master.report_file(
        &partition,
        "42",
        &[
            (hosts[0].as_str(), 10, 1),
            (hosts[1].as_str(), 10, 1),
            (hosts[2].as_str(), 10, 2),
            (hosts[3].as_str(), 10, 2),
        ],
        STABLE,
    );

    let report = master.checker.check_partition_at(&partition, CLUSTER_ID, T0);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(
        report.warnings[0].kind,
        WarningKind::CrcUndecidable {
            reason: UndecidableReason::TiedMajority,
        }
    );
    assert!(report.bad_replicas().is_empty());
}

/// A data node that stops reporting is excluded from every vote it would
/// have taken part in, and each of its partitions is flagged under-replicated.
#[test]
fn test_silent_replica_is_excluded() {
    let master = TestMaster::new();
    let layout = spread(&master, T0 - 10);
    let silent = node_addr(4);

    for (i, hosts) in layout.iter().enumerate() {
        let pid = i as u64 + 1;
        report_uniform(&master, pid, hosts, "9", 3);
        let partition = master.table.get(PartitionId::new(pid)).unwrap();
        // The silent node's stale view disagrees with everybody.
        if hosts.contains(&silent) {
            master.report_file(&partition, "9", &[(silent.as_str(), 65_536, 99)], STABLE);
        }
    }

    // Everybody except the silent node reports again much later.
    let now = T0 + master.config.checker.replica_timeout_secs + 60;
    for partition in master.table.partitions() {
        for host in partition.hosts() {
            if *host != silent {
                partition.record_replica_report(host, now);
            }
        }
    }

    let summary = master.sweeper.sweep_at(now);
    let hosting = layout.iter().filter(|h| h.contains(&silent)).count();
    assert_eq!(hosting, 6);
    assert_eq!(summary.warnings, hosting);
    assert_eq!(summary.bad_replicas, 0);

    for partition in master.table.partitions() {
        let report = master.checker.check_partition_at(&partition, CLUSTER_ID, now);
        if partition.hosts().contains(&silent) {
            assert_eq!(report.live_replicas, 2);
            assert_eq!(report.count_kind("replicas_unavailable"), 1);
            assert_eq!(report.warnings[0].file_name, None);
        } else {
            assert!(report.is_clean());
        }
    }
}

/// A fresh divergence is left alone until the file has been quiet long enough.
#[test]
fn test_divergence_flagged_once_stable() {
    let master = TestMaster::new();
    let hosts: Vec<String> = (0..3).map(node_addr).collect();
    let partition = master.add_partition(1, &hosts, T0);
    master.report_file(
        &partition,
        "500",
        &[
            (hosts[0].as_str(), 10, 1),
            (hosts[1].as_str(), 10, 1),
            (hosts[2].as_str(), 10, 5),
        ],
        T0,
    );

    let summary = master.sweeper.sweep_at(T0 + 60);
    assert_eq!(summary.skipped_recent, 1);
    assert_eq!(summary.warnings, 0);

    let later = T0 + master.config.checker.file_delay_check_crc_secs + 1;
    for host in &hosts {
        partition.record_replica_report(host, later);
    }
    let report = master.checker.check_partition_at(&partition, CLUSTER_ID, later);
    assert_eq!(report.bad_replicas(), vec![hosts[2].clone()]);
}

/// Tiny extents tolerate CRC divergence but not size divergence.
#[test]
fn test_tiny_extents_compare_sizes_only() {
    let master = TestMaster::new();
    let hosts: Vec<String> = (0..3).map(node_addr).collect();
    let partition = master.add_partition(1, &hosts, T0);

    master.report_file(
        &partition,
        "5000000",
        &[
            (hosts[0].as_str(), 4096, 1),
            (hosts[1].as_str(), 4096, 2),
            (hosts[2].as_str(), 4096, 3),
        ],
        STABLE,
    );
    master.report_file(
        &partition,
        "5000127",
        &[
            (hosts[0].as_str(), 4096, 1),
            (hosts[1].as_str(), 8192, 1),
            (hosts[2].as_str(), 4096, 1),
        ],
        STABLE,
    );

    let report = master.checker.check_partition_at(&partition, CLUSTER_ID, T0);
    assert_eq!(report.files_checked, 2);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].kind, WarningKind::SizeMismatch);
    assert_eq!(report.warnings[0].file_name.as_deref(), Some("5000127"));
    assert_eq!(report.warnings[0].details.len(), 3);
}

/// Non-extent names are skipped without disturbing the rest of the scan.
#[test]
fn test_malformed_names_do_not_abort_the_sweep() {
    let master = TestMaster::new();
    let hosts: Vec<String> = (0..3).map(node_addr).collect();
    let partition = master.add_partition(1, &hosts, T0);

    for name in ["lost+found", "00x1", "77"] {
        master.report_file(
            &partition,
            name,
            &[
                (hosts[0].as_str(), 1, 1),
                (hosts[1].as_str(), 1, 1),
                (hosts[2].as_str(), 1, 2),
            ],
            STABLE,
        );
    }

    let summary = master.sweeper.sweep_at(T0);
    assert_eq!(summary.skipped_malformed, 2);
    assert_eq!(summary.files_checked, 1);
    assert_eq!(summary.bad_replicas, 1);
}

/// Removed partitions are no longer swept.
#[test]
fn test_removed_partition_not_swept() {
    let master = TestMaster::new();
    let layout = spread(&master, T0);
    let hosts = &layout[0];
    let partition = master.table.get(PartitionId::new(1)).unwrap();
    master.report_file(
        &partition,
        "1",
        &[(hosts[0].as_str(), 1, 1), (hosts[1].as_str(), 1, 1), (hosts[2].as_str(), 1, 9)],
        STABLE,
    );

    assert_eq!(master.sweeper.sweep_at(T0).warnings, 1);

    master.table.remove(PartitionId::new(1)).unwrap();
    let summary = master.sweeper.sweep_at(T0);
    assert_eq!(summary.partitions, 9);
    assert_eq!(summary.warnings, 0);
}

/// The background sweeper publishes warnings on the bus without being polled.
#[tokio::test]
async fn test_background_sweeper_publishes_warnings() {
    let mut config = MasterConfig::default();
    config.checker.sweep_interval_ms = 20;
    let master = TestMaster::with_config(config);

    let now = unix_now();
    let hosts: Vec<String> = (0..3).map(node_addr).collect();
    let partition = master.add_partition(1, &hosts, now);
    master.report_file(
        &partition,
        "314",
        &[(hosts[0].as_str(), 1, 1), (hosts[1].as_str(), 1, 1), (hosts[2].as_str(), 1, 4)],
        now - 3_600,
    );

    let mut rx = master.events.subscribe::<IntegrityWarning>();
    let handle = master.sweeper.clone().spawn();

    let warning = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("sweeper should publish a warning")
        .unwrap();
    assert_eq!(
        warning.kind,
        WarningKind::BadCrc {
            bad_addrs: vec![hosts[2].clone()],
        }
    );

    assert!(handle.is_running());
    handle.stop().await;
}
