//! Type-safe event bus for intra-master pub/sub.
//!
//! The [`EventBus`] lets the checker and the liveness tracker publish typed
//! events, and lets any other component (alerting, the daemon's reporter,
//! tests) subscribe to the event types it cares about without direct coupling.
//!
//! # Design
//!
//! Each event type is a distinct struct implementing the [`Event`] marker trait.
//! Internally, the bus maintains a `HashMap<TypeId, Box<dyn Any>>` where each
//! value is a `tokio::sync::broadcast::Sender<E>`. Channels are created lazily
//! on the first `subscribe()`.
//!
//! # Example
//!
//! ```rust
//! use keeper_types::events::{EventBus, NodeActivated};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe::<NodeActivated>();
//!
//! bus.emit(NodeActivated {
//!     addr: "10.0.0.1:9021".to_string(),
//! });
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.addr, "10.0.0.1:9021");
//! # });
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

use crate::PartitionId;

// ---------------------------------------------------------------------------
// Event trait
// ---------------------------------------------------------------------------

/// Marker trait for all events that can travel through the [`EventBus`].
pub trait Event: Any + Send + Sync + Clone + std::fmt::Debug + 'static {}

// ---------------------------------------------------------------------------
// Integrity warnings
// ---------------------------------------------------------------------------

/// One line of a per-replica breakdown attached to a warning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaDetail {
    /// Replica address (the representative address for a CRC group).
    pub addr: String,
    /// How many replicas share this entry (1 for per-replica details).
    pub count: usize,
    /// Reported checksum.
    pub crc: u32,
    /// Reported size in bytes.
    pub size: u64,
}

impl fmt::Display for ReplicaDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "addr:{} count:{} crc:{} size:{}",
            self.addr, self.count, self.crc, self.size
        )
    }
}

/// Why a CRC conflict could not be attributed to specific replicas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UndecidableReason {
    /// No two replicas share a checksum.
    AllDiffer,
    /// Two or more checksum groups share the highest count.
    TiedMajority,
}

/// The kind of anomaly an [`IntegrityWarning`] reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WarningKind {
    /// Fewer replicas are live than the partition declares.
    ReplicasUnavailable {
        /// Addresses of live replicas.
        live: Vec<String>,
        /// Declared hosts that are not live.
        unavailable: Vec<String>,
    },
    /// Replicas of a tiny extent disagree on size.
    SizeMismatch,
    /// A live replica never reported metadata for a long-stable file.
    MissingReplicaReport {
        /// Addresses of live replicas.
        live: Vec<String>,
        /// Addresses that reported metadata for the file.
        reported: Vec<String>,
    },
    /// Replicas disagree on CRC and no majority can be established.
    CrcUndecidable {
        /// Why no replica could be blamed.
        reason: UndecidableReason,
    },
    /// Replicas outside the majority CRC group.
    BadCrc {
        /// Addresses of the replicas in one minority group.
        bad_addrs: Vec<String>,
    },
}

impl WarningKind {
    /// Short stable name, used as a structured log field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReplicasUnavailable { .. } => "replicas_unavailable",
            Self::SizeMismatch => "size_mismatch",
            Self::MissingReplicaReport { .. } => "missing_replica_report",
            Self::CrcUndecidable { .. } => "crc_undecidable",
            Self::BadCrc { .. } => "bad_crc",
        }
    }
}

/// A structured anomaly found by the consistency checker.
///
/// This is the only externally observable output of a consistency pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegrityWarning {
    /// Cluster the partition belongs to.
    pub cluster_id: String,
    /// The partition being checked.
    pub partition_id: PartitionId,
    /// The file concerned; `None` for partition-level warnings.
    pub file_name: Option<String>,
    /// What was found.
    pub kind: WarningKind,
    /// Full per-replica (or per-CRC-group) breakdown for auditability.
    pub details: Vec<ReplicaDetail>,
}
impl Event for IntegrityWarning {}

impl fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cluster[{}] partition[{}] file[{}] {}",
            self.cluster_id,
            self.partition_id,
            self.file_name.as_deref().unwrap_or("-"),
            self.kind.name()
        )?;
        for detail in &self.details {
            write!(f, " [{detail}]")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Node liveness events
// ---------------------------------------------------------------------------

/// A node went from inactive to active on a heartbeat.
#[derive(Clone, Debug)]
pub struct NodeActivated {
    /// The node that became active.
    pub addr: String,
}
impl Event for NodeActivated {}

/// A node was demoted to inactive after heartbeat silence.
#[derive(Clone, Debug)]
pub struct NodeInactive {
    /// The node that was demoted.
    pub addr: String,
    /// Seconds since the node's last heartbeat at demotion time.
    pub silent_secs: u64,
}
impl Event for NodeInactive {}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default broadcast channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Inner state of the event bus.
///
/// Each entry maps a `TypeId` to a type-erased `broadcast::Sender<E>`.
struct EventBusInner {
    channels: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

/// A type-safe event bus.
///
/// Clonable (`Arc` inside). Thread-safe. Non-blocking emits.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<EventBusInner>>,
}

impl EventBus {
    /// Create a new empty event bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventBusInner {
                channels: HashMap::new(),
            })),
        }
    }

    /// Emit an event to all current subscribers of type `E`.
    ///
    /// If no subscribers exist the event is dropped.
    pub fn emit<E: Event>(&self, event: E) {
        let inner = self.inner.lock();

        let sender = inner
            .channels
            .get(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast_ref::<broadcast::Sender<E>>());

        if let Some(sender) = sender {
            // Err means no active receivers.
            let _ = sender.send(event);
        }
    }

    /// Subscribe to events of type `E`.
    pub fn subscribe<E: Event>(&self) -> EventReceiver<E> {
        let mut inner = self.inner.lock();

        let sender = inner
            .channels
            .entry(TypeId::of::<E>())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel::<E>(DEFAULT_CHANNEL_CAPACITY);
                Box::new(tx)
            })
            .downcast_ref::<broadcast::Sender<E>>()
            .expect("channel is keyed by its event TypeId");

        EventReceiver {
            rx: sender.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventBus")
            .field("channel_count", &inner.channels.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventReceiver
// ---------------------------------------------------------------------------

/// Typed receiver for a specific event type.
pub struct EventReceiver<E: Event> {
    rx: broadcast::Receiver<E>,
}

impl<E: Event> EventReceiver<E> {
    /// Wait for the next event.
    ///
    /// Returns `None` once the bus has been dropped. Lagged events are
    /// skipped with a warning.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        skipped = n,
                        event_type = std::any::type_name::<E>(),
                        "event receiver lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next already-buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Drain every already-buffered event.
    pub fn drain(&mut self) -> Vec<E> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
