//! Quorum CRC consistency checking.
//!
//! For every stable file of a partition, the checker compares the checksums
//! reported by the live replicas:
//! 1. Identical checksums everywhere → nothing to do.
//! 2. One group of replicas strictly outnumbers every other → each smaller
//!    group is reported as bad.
//! 3. All replicas differ, or the largest groups are tied → the conflict is
//!    reported as undecidable and no replica is blamed.
//!
//! Tiny extents are shared append-only containers whose checksums are not
//! comparable across replicas; only their sizes are checked.
//!
//! The checker never mutates partition data. Every anomaly is logged, emitted
//! on the [`EventBus`] as an [`IntegrityWarning`], and collected in the
//! returned [`CheckReport`].

use keeper_types::events::{EventBus, IntegrityWarning, ReplicaDetail, WarningKind};
use keeper_types::{
    CheckerConfig, DataReplica, ExtentId, ExtentKind, FileRecord, PartitionId, ReplicaFileMeta,
    unix_now,
};
use tracing::{debug, warn};

use crate::crc::{CrcGroup, CrcVote, group_by_crc, vote};
use crate::partition::DataPartition;

/// Identifies the pass a file check belongs to.
#[derive(Debug, Clone, Copy)]
pub struct CheckScope<'a> {
    pub cluster_id: &'a str,
    pub partition_id: PartitionId,
    /// Unix time the pass is evaluated at.
    pub now: u64,
}

/// Result of checking one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    /// The partition that was checked.
    pub partition_id: PartitionId,
    /// Number of replicas that were live during the check.
    pub live_replicas: usize,
    /// Files that passed the stability gate and were compared.
    pub files_checked: usize,
    /// Files modified too recently to compare.
    pub skipped_recent: usize,
    /// Files whose names are not extent IDs.
    pub skipped_malformed: usize,
    /// Every anomaly found, in discovery order.
    pub warnings: Vec<IntegrityWarning>,
}

impl CheckReport {
    /// An empty report for `partition_id`.
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            live_replicas: 0,
            files_checked: 0,
            skipped_recent: 0,
            skipped_malformed: 0,
            warnings: Vec::new(),
        }
    }

    /// Addresses blamed by a `BadCrc` warning, sorted and deduplicated.
    pub fn bad_replicas(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self
            .warnings
            .iter()
            .filter_map(|w| match &w.kind {
                WarningKind::BadCrc { bad_addrs } => Some(bad_addrs),
                _ => None,
            })
            .flatten()
            .cloned()
            .collect();
        addrs.sort();
        addrs.dedup();
        addrs
    }

    /// Number of warnings of the given kind (see [`WarningKind::name`]).
    pub fn count_kind(&self, name: &str) -> usize {
        self.warnings.iter().filter(|w| w.kind.name() == name).count()
    }

    /// Whether the check found nothing.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Compares per-replica checksums and attributes divergence to replicas.
#[derive(Debug, Clone)]
pub struct ConsistencyChecker {
    config: CheckerConfig,
    events: EventBus,
}

impl ConsistencyChecker {
    pub fn new(config: CheckerConfig, events: EventBus) -> Self {
        Self { config, events }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Check every file of `partition` against the wall clock.
    pub fn check_partition(&self, partition: &DataPartition, cluster_id: &str) -> CheckReport {
        self.check_partition_at(partition, cluster_id, unix_now())
    }

    /// Check every file of `partition` as of `now`.
    ///
    /// The partition lock is held for the whole scan.
    pub fn check_partition_at(
        &self,
        partition: &DataPartition,
        cluster_id: &str,
        now: u64,
    ) -> CheckReport {
        let scope = CheckScope {
            cluster_id,
            partition_id: partition.partition_id(),
            now,
        };
        let mut report = CheckReport::new(scope.partition_id);

        let inner = partition.lock();
        let live: Vec<DataReplica> = inner
            .replicas
            .iter()
            .filter(|r| r.is_live(now, self.config.replica_timeout_secs))
            .cloned()
            .collect();
        report.live_replicas = live.len();

        if live.is_empty() {
            debug!(partition_id = %scope.partition_id, "no live replicas, skipping file checks");
            return report;
        }

        if live.len() < partition.replica_num() {
            let live_addrs: Vec<String> = live.iter().map(|r| r.addr.clone()).collect();
            let unavailable = partition
                .hosts()
                .iter()
                .filter(|h| !live_addrs.contains(h))
                .cloned()
                .collect();
            self.emit(
                &scope,
                None,
                WarningKind::ReplicasUnavailable {
                    live: live_addrs,
                    unavailable,
                },
                Vec::new(),
                &mut report,
            );
        }

        self.check_files(&scope, inner.files.values(), &live, &mut report);

        debug!(
            partition_id = %scope.partition_id,
            vol = partition.vol_name(),
            files_checked = report.files_checked,
            warnings = report.warnings.len(),
            "partition checked"
        );
        report
    }

    /// Classify each file by extent ID and run the matching check.
    pub fn check_files<'f, I>(
        &self,
        scope: &CheckScope<'_>,
        files: I,
        live: &[DataReplica],
        report: &mut CheckReport,
    ) where
        I: IntoIterator<Item = &'f FileRecord>,
    {
        for file in files {
            let Some(extent_id) = ExtentId::parse(&file.name) else {
                report.skipped_malformed += 1;
                continue;
            };
            match extent_id.kind() {
                ExtentKind::Tiny => self.check_tiny_extent(scope, file, live, report),
                ExtentKind::Normal => self.check_extent_file(scope, file, live, report),
            }
        }
    }

    /// Whether `file` has been stable long enough for its checksums to be compared.
    pub fn is_check_crc(&self, file: &FileRecord, now: u64) -> bool {
        now.saturating_sub(file.last_modify) > self.config.file_delay_check_crc_secs
    }

    /// Collect the metas of live replicas in live-replica order, and decide
    /// whether any of them disagrees with the first one.
    pub fn need_crc_repair<'f>(
        file: &'f FileRecord,
        live: &[DataReplica],
    ) -> (Vec<&'f ReplicaFileMeta>, bool) {
        let metas: Vec<&ReplicaFileMeta> = live
            .iter()
            .filter_map(|r| file.meta_by_addr(&r.addr))
            .collect();
        let need_repair = match metas.split_first() {
            Some((base, rest)) => rest.iter().any(|m| m.crc != base.crc),
            None => false,
        };
        (metas, need_repair)
    }

    /// Tiny extents: flag size disagreement only.
    pub fn check_tiny_extent(
        &self,
        scope: &CheckScope<'_>,
        file: &FileRecord,
        live: &[DataReplica],
        report: &mut CheckReport,
    ) {
        if !self.gate(scope, file, report) {
            return;
        }

        let (metas, _) = Self::need_crc_repair(file, live);
        if metas.windows(2).all(|w| w[0].size == w[1].size) {
            return;
        }

        let details = metas.iter().map(|m| replica_detail(m)).collect();
        self.emit(scope, Some(&file.name), WarningKind::SizeMismatch, details, report);
    }

    /// Normal extents: flag missing reports and attribute CRC divergence.
    pub fn check_extent_file(
        &self,
        scope: &CheckScope<'_>,
        file: &FileRecord,
        live: &[DataReplica],
        report: &mut CheckReport,
    ) {
        if !self.gate(scope, file, report) {
            return;
        }

        let (metas, need_repair) = Self::need_crc_repair(file, live);

        if metas.len() < live.len()
            && scope.now.saturating_sub(file.last_modify) > self.config.check_miss_file_replica_secs
        {
            let kind = WarningKind::MissingReplicaReport {
                live: live.iter().map(|r| r.addr.clone()).collect(),
                reported: file.meta_addrs(),
            };
            let details = metas.iter().map(|m| replica_detail(m)).collect();
            self.emit(scope, Some(&file.name), kind, details, report);
        }

        if !need_repair {
            return;
        }

        let groups = group_by_crc(metas.iter().copied());
        let details: Vec<ReplicaDetail> = groups.iter().map(CrcGroup::detail).collect();

        match vote(&groups) {
            CrcVote::Undecidable(reason) => {
                self.emit(
                    scope,
                    Some(&file.name),
                    WarningKind::CrcUndecidable { reason },
                    details,
                    report,
                );
            }
            CrcVote::Majority(winner) => {
                for (index, group) in groups.iter().enumerate() {
                    if index == winner {
                        continue;
                    }
                    self.emit(
                        scope,
                        Some(&file.name),
                        WarningKind::BadCrc {
                            bad_addrs: group.addrs.clone(),
                        },
                        details.clone(),
                        report,
                    );
                }
            }
        }
    }

    /// Stability gate shared by both file checks. Updates the report counters.
    fn gate(&self, scope: &CheckScope<'_>, file: &FileRecord, report: &mut CheckReport) -> bool {
        if self.is_check_crc(file, scope.now) {
            report.files_checked += 1;
            true
        } else {
            report.skipped_recent += 1;
            false
        }
    }

    fn emit(
        &self,
        scope: &CheckScope<'_>,
        file_name: Option<&str>,
        kind: WarningKind,
        details: Vec<ReplicaDetail>,
        report: &mut CheckReport,
    ) {
        let warning = IntegrityWarning {
            cluster_id: scope.cluster_id.to_string(),
            partition_id: scope.partition_id,
            file_name: file_name.map(str::to_string),
            kind,
            details,
        };

        warn!(
            cluster_id = scope.cluster_id,
            partition_id = %scope.partition_id,
            file = file_name.unwrap_or("-"),
            kind = warning.kind.name(),
            "{warning}"
        );

        self.events.emit(warning.clone());
        report.warnings.push(warning);
    }
}

fn replica_detail(meta: &ReplicaFileMeta) -> ReplicaDetail {
    ReplicaDetail {
        addr: meta.addr.clone(),
        count: 1,
        crc: meta.crc,
        size: meta.size,
    }
}
