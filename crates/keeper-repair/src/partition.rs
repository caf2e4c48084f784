//! Data partitions and the partition table.
//!
//! A [`DataPartition`] holds the replica set and per-file metadata reported
//! by the storage nodes. Ingestion writes into it; the consistency checker
//! only reads, under the same lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use keeper_types::{DataReplica, FileRecord, PartitionId, ReplicaFileMeta};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

use crate::error::RepairError;

/// Replica set and file map of a partition, guarded together.
#[derive(Debug, Default)]
pub(crate) struct PartitionInner {
    pub(crate) replicas: Vec<DataReplica>,
    pub(crate) files: BTreeMap<String, FileRecord>,
}

/// A replicated unit of storage.
///
/// Replica count and hosts are fixed at creation.
#[derive(Debug)]
pub struct DataPartition {
    partition_id: PartitionId,
    vol_name: String,
    replica_num: usize,
    hosts: Vec<String>,
    inner: Mutex<PartitionInner>,
}

impl DataPartition {
    /// Create a partition with one never-reported replica per host.
    pub fn new(
        partition_id: PartitionId,
        vol_name: impl Into<String>,
        replica_num: usize,
        hosts: Vec<String>,
    ) -> Self {
        let replicas = hosts.iter().map(DataReplica::new).collect();
        Self {
            partition_id,
            vol_name: vol_name.into(),
            replica_num,
            hosts,
            inner: Mutex::new(PartitionInner {
                replicas,
                files: BTreeMap::new(),
            }),
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn vol_name(&self) -> &str {
        &self.vol_name
    }

    /// Declared number of replicas.
    pub fn replica_num(&self) -> usize {
        self.replica_num
    }

    /// Hosts that should hold a replica.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PartitionInner> {
        self.inner.lock()
    }

    /// Record a successful report from the replica on `addr`.
    ///
    /// Returns `false` if `addr` hosts no replica of this partition.
    pub fn record_replica_report(&self, addr: &str, now: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.replicas.iter_mut().find(|r| r.addr == addr) {
            Some(replica) => {
                replica.report_time = now;
                true
            }
            None => {
                debug!(partition_id = %self.partition_id, %addr, "report from unknown replica");
                false
            }
        }
    }

    /// Store the metadata a replica reported for one file.
    ///
    /// The file's `last_modify` only ever moves forward.
    pub fn record_file_meta(&self, name: &str, meta: ReplicaFileMeta, last_modify: u64) {
        let mut inner = self.inner.lock();
        let record = inner
            .files
            .entry(name.to_string())
            .or_insert_with(|| FileRecord::new(name, last_modify));
        record.last_modify = record.last_modify.max(last_modify);
        record.metas.insert(meta.addr.clone(), meta);
    }

    /// Replicas that reported within `timeout_secs` of `now`, in host order.
    pub fn live_replicas(&self, now: u64, timeout_secs: u64) -> Vec<DataReplica> {
        self.inner
            .lock()
            .replicas
            .iter()
            .filter(|r| r.is_live(now, timeout_secs))
            .cloned()
            .collect()
    }

    /// Return a copy of one file record.
    pub fn file(&self, name: &str) -> Option<FileRecord> {
        self.inner.lock().files.get(name).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.inner.lock().files.len()
    }
}

/// Owned registry of the data partitions known to the master.
#[derive(Debug, Default)]
pub struct PartitionTable {
    partitions: RwLock<BTreeMap<PartitionId, Arc<DataPartition>>>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a partition.
    pub fn insert(&self, partition: DataPartition) -> Result<Arc<DataPartition>, RepairError> {
        let partition_id = partition.partition_id();
        let mut partitions = self.partitions.write();
        if partitions.contains_key(&partition_id) {
            return Err(RepairError::PartitionExists(partition_id));
        }
        let partition = Arc::new(partition);
        partitions.insert(partition_id, partition.clone());
        drop(partitions);

        info!(%partition_id, vol = partition.vol_name(), "data partition added");
        Ok(partition)
    }

    pub fn get(&self, partition_id: PartitionId) -> Result<Arc<DataPartition>, RepairError> {
        self.partitions
            .read()
            .get(&partition_id)
            .cloned()
            .ok_or(RepairError::PartitionNotFound(partition_id))
    }

    /// Stop tracking a partition.
    pub fn remove(&self, partition_id: PartitionId) -> Result<Arc<DataPartition>, RepairError> {
        let partition = self
            .partitions
            .write()
            .remove(&partition_id)
            .ok_or(RepairError::PartitionNotFound(partition_id))?;

        info!(%partition_id, "data partition removed");
        Ok(partition)
    }

    /// All partitions, ordered by ID.
    pub fn partitions(&self) -> Vec<Arc<DataPartition>> {
        self.partitions.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.partitions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.read().is_empty()
    }
}
