//! Shared types and identifiers for Keeper.
//!
//! This crate defines the types shared across the Keeper workspace:
//! identifiers ([`PartitionId`], [`ExtentId`]), the replica/file data model
//! ([`DataReplica`], [`FileRecord`], [`ReplicaFileMeta`]), heartbeat payloads
//! ([`MetaNodeHeartbeat`]), and configuration ([`MasterConfig`]).

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub mod events;

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Create an ID from its raw numeric value.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Return the raw numeric value.
            pub const fn get(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a replicated data partition.
    PartitionId
);

define_id!(
    /// Numeric identifier of an extent, parsed from its file name.
    ExtentId
);

// ---------------------------------------------------------------------------
// Extent classification
// ---------------------------------------------------------------------------

/// First extent ID of the reserved tiny-extent range.
pub const TINY_EXTENT_START_ID: u64 = 5_000_000;

/// Number of IDs in the reserved tiny-extent range.
pub const TINY_EXTENT_COUNT: u64 = 128;

/// Kind of an extent, decided purely by its numeric ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtentKind {
    /// Shared, append-only container written by many clients.
    /// CRCs are not comparable across replicas.
    Tiny,
    /// Single-owner extent, CRC-comparable once stable.
    Normal,
}

impl ExtentId {
    /// Parse an extent ID from a file name. Returns `None` for anything but
    /// plain decimal digits (no sign, no whitespace) or on overflow.
    pub fn parse(name: &str) -> Option<Self> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        name.parse::<u64>().ok().map(Self)
    }

    /// Classify this extent as tiny or normal.
    pub fn kind(&self) -> ExtentKind {
        if self.0 >= TINY_EXTENT_START_ID && self.0 < TINY_EXTENT_START_ID + TINY_EXTENT_COUNT {
            ExtentKind::Tiny
        } else {
            ExtentKind::Normal
        }
    }
}

// ---------------------------------------------------------------------------
// Partition data model
// ---------------------------------------------------------------------------

/// One node's copy of a data partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataReplica {
    /// Address of the hosting node.
    pub addr: String,
    /// Unix time (seconds) of the last successful report. `0` = never reported.
    pub report_time: u64,
}

impl DataReplica {
    /// Create a replica that has never reported.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            report_time: 0,
        }
    }

    /// Whether the replica has reported within `timeout_secs` of `now`.
    pub fn is_live(&self, now: u64, timeout_secs: u64) -> bool {
        self.report_time > 0 && now.saturating_sub(self.report_time) <= timeout_secs
    }
}

/// Size and checksum of one file as observed on one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaFileMeta {
    /// Address of the replica that reported this meta.
    pub addr: String,
    /// Observed file size in bytes.
    pub size: u64,
    /// Observed checksum.
    pub crc: u32,
}

impl ReplicaFileMeta {
    /// Create a new replica file meta.
    pub fn new(addr: impl Into<String>, size: u64, crc: u32) -> Self {
        Self {
            addr: addr.into(),
            size,
            crc,
        }
    }
}

/// Everything the master knows about one file (extent) of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// File name; the decimal extent ID for extent files.
    pub name: String,
    /// Unix time (seconds) of the last modification seen on any replica.
    pub last_modify: u64,
    /// Per-replica metadata, keyed by replica address.
    pub metas: BTreeMap<String, ReplicaFileMeta>,
}

impl FileRecord {
    /// Create an empty file record.
    pub fn new(name: impl Into<String>, last_modify: u64) -> Self {
        Self {
            name: name.into(),
            last_modify,
            metas: BTreeMap::new(),
        }
    }

    /// Return the meta reported by `addr`, if any.
    pub fn meta_by_addr(&self, addr: &str) -> Option<&ReplicaFileMeta> {
        self.metas.get(addr)
    }

    /// Return the addresses of every replica that reported this file.
    pub fn meta_addrs(&self) -> Vec<String> {
        self.metas.keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Heartbeat payloads
// ---------------------------------------------------------------------------

/// One metadata partition as reported in a meta node heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaPartitionReport {
    /// The reported partition.
    pub partition_id: PartitionId,
    /// Whether the reporting node currently leads the partition.
    pub is_leader: bool,
}

/// Heartbeat payload sent by a metadata-service node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaNodeHeartbeat {
    /// Total memory in bytes.
    pub total: u64,
    /// Used memory in bytes.
    pub used: u64,
    /// Rack the node lives in.
    pub rack_name: String,
    /// Metadata partitions currently hosted by the node.
    pub partitions: Vec<MetaPartitionReport>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning for the replica consistency checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    /// A file must be unmodified for longer than this before its CRCs are compared.
    pub file_delay_check_crc_secs: u64,
    /// A file must be unmodified for longer than this before a missing
    /// replica report is flagged.
    pub check_miss_file_replica_secs: u64,
    /// A replica that has not reported for longer than this is not live.
    pub replica_timeout_secs: u64,
    /// Interval between integrity sweeps over all partitions (milliseconds).
    pub sweep_interval_ms: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            file_delay_check_crc_secs: 1_200,
            check_miss_file_replica_secs: 600,
            replica_timeout_secs: 600,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Tuning for node liveness tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Silence longer than this demotes a node to inactive.
    pub node_timeout_secs: u64,
    /// Interval between liveness sweeps (milliseconds).
    pub sweep_interval_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            node_timeout_secs: 180,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Limits that decide whether a node may accept new partitions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Nodes must have strictly more free memory than this (bytes).
    pub reserved_mem_floor: u64,
    /// Used/total ratio limit for nodes whose own threshold is unset.
    pub default_threshold: f32,
    /// Threshold stamped onto nodes at heartbeat ingestion.
    pub node_threshold: f32,
    /// Nodes must host fewer partitions than this.
    pub max_partitions_per_node: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            reserved_mem_floor: 1 << 30, // 1 GiB
            default_threshold: 0.75,
            node_threshold: 0.75,
            max_partitions_per_node: 100,
        }
    }
}

/// Tuning for the carry scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Upper bound on a node's accumulated carry.
    pub carry_cap: f64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self { carry_cap: 10.0 }
    }
}

/// Complete configuration of the master core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Consistency checker tuning.
    pub checker: CheckerConfig,
    /// Liveness tracking tuning.
    pub liveness: LivenessConfig,
    /// Writability limits.
    pub capacity: CapacityConfig,
    /// Scheduler tuning.
    pub placement: PlacementConfig,
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
